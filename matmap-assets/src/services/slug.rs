//! Identifier normalization
//!
//! Turns a free-form entity name into a single path/URL-safe directory name.
//! The transform is deterministic and idempotent, so it can be re-applied to
//! its own output without change.

use crate::models::MaterialEntity;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Substitute for characters that cannot appear in a path component
pub const PLACEHOLDER: char = '_';

const RESERVED: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Normalized entity identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Slug(String);

impl Slug {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<std::path::Path> for Slug {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlugError {
    #[error("name is empty after normalization")]
    Empty,
    #[error("name normalizes to reserved path component '{0}'")]
    Reserved(String),
}

/// Normalize a name into a slug
///
/// NFC-composes the input, replaces separators, reserved and control
/// characters with [`PLACEHOLDER`], then trims surrounding whitespace and
/// placeholder runs. Case is preserved.
pub fn slugify(name: &str) -> Result<Slug, SlugError> {
    let replaced: String = name
        .nfc()
        .map(|c| {
            if RESERVED.contains(&c) || c.is_control() {
                PLACEHOLDER
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| c == PLACEHOLDER || c.is_whitespace());

    match trimmed {
        "" => Err(SlugError::Empty),
        "." | ".." => Err(SlugError::Reserved(trimmed.to_string())),
        _ => Ok(Slug(trimmed.to_string())),
    }
}

/// Distinct entities whose names produce the same slug
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameConflict {
    pub slug: Slug,
    pub entity_ids: Vec<i64>,
}

/// Slug assignment for one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlugEntry {
    Unique(Slug),
    Conflict(NameConflict),
    Invalid(SlugError),
}

/// Entity id → slug map with collision detection
#[derive(Debug, Clone, Default)]
pub struct SlugIndex {
    entries: HashMap<i64, SlugEntry>,
    conflicts: Vec<NameConflict>,
}

impl SlugIndex {
    /// Slugify every entity's canonical name and record collisions
    pub fn build<'a, I>(entities: I) -> Self
    where
        I: IntoIterator<Item = &'a MaterialEntity>,
    {
        let mut entries = HashMap::new();
        let mut by_slug: BTreeMap<Slug, Vec<i64>> = BTreeMap::new();

        for entity in entities {
            match slugify(entity.canonical_name()) {
                Ok(slug) => by_slug.entry(slug).or_default().push(entity.id),
                Err(e) => {
                    entries.insert(entity.id, SlugEntry::Invalid(e));
                }
            }
        }

        let mut conflicts = Vec::new();
        for (slug, mut ids) in by_slug {
            ids.sort_unstable();
            ids.dedup();
            if ids.len() == 1 {
                entries.insert(ids[0], SlugEntry::Unique(slug));
            } else {
                tracing::warn!(slug = %slug, entity_ids = ?ids, "Slug collision between distinct entities");
                let conflict = NameConflict {
                    slug,
                    entity_ids: ids,
                };
                for id in &conflict.entity_ids {
                    entries.insert(*id, SlugEntry::Conflict(conflict.clone()));
                }
                conflicts.push(conflict);
            }
        }

        Self { entries, conflicts }
    }

    pub fn entry(&self, entity_id: i64) -> Option<&SlugEntry> {
        self.entries.get(&entity_id)
    }

    /// Slug of an entity that maps to its own directory
    pub fn unique_slug(&self, entity_id: i64) -> Option<&Slug> {
        match self.entries.get(&entity_id) {
            Some(SlugEntry::Unique(slug)) => Some(slug),
            _ => None,
        }
    }

    pub fn conflicts(&self) -> &[NameConflict] {
        &self.conflicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slug(name: &str) -> String {
        slugify(name).unwrap().as_str().to_string()
    }

    #[test]
    fn test_reserved_characters_replaced() {
        assert_eq!(slug("Foo/Bar"), "Foo_Bar");
        assert_eq!(slug("a:b*c?d\"e<f>g|h\\i"), "a_b_c_d_e_f_g_h_i");
    }

    #[test]
    fn test_surrounding_whitespace_and_placeholders_trimmed() {
        assert_eq!(slug("  Aluminum  "), "Aluminum");
        assert_eq!(slug("/Aluminum/"), "Aluminum");
        assert_eq!(slug(" _ /Oak\t"), "Oak");
    }

    #[test]
    fn test_case_and_inner_spaces_preserved() {
        assert_eq!(slug("Stainless Steel"), "Stainless Steel");
        assert_eq!(slug("ステンレス"), "ステンレス");
    }

    #[test]
    fn test_composed_and_decomposed_match() {
        // "é" precomposed vs "e" + combining acute
        assert_eq!(slug("Caf\u{e9}"), slug("Cafe\u{301}"));
    }

    #[test]
    fn test_control_characters_replaced() {
        assert_eq!(slug("Oak\u{7}Board"), "Oak_Board");
    }

    #[test]
    fn test_rejects_empty_and_dot_names() {
        assert_eq!(slugify(""), Err(SlugError::Empty));
        assert_eq!(slugify(" /:* "), Err(SlugError::Empty));
        assert_eq!(slugify(".."), Err(SlugError::Reserved("..".into())));
        assert_eq!(slugify("./"), Err(SlugError::Reserved(".".into())));
    }

    #[test]
    fn test_idempotent() {
        for name in [
            "Foo/Bar",
            " _x_ ",
            "Cafe\u{301}",
            "木材（オーク）",
            "a__b",
            "_\u{301}x",
            "Ａｌｕｍｉｎｕｍ",
        ] {
            let once = slugify(name).unwrap();
            let twice = slugify(once.as_str()).unwrap();
            assert_eq!(once, twice, "not idempotent for {:?}", name);
        }
    }

    #[test]
    fn test_index_detects_conflicts() {
        let entities = vec![
            MaterialEntity::new(1, "Foo/Bar"),
            MaterialEntity::new(2, "Foo:Bar"),
            MaterialEntity::new(3, "Oak"),
            MaterialEntity::new(4, ".."),
        ];
        let index = SlugIndex::build(&entities);

        assert_eq!(index.conflicts().len(), 1);
        assert_eq!(index.conflicts()[0].entity_ids, vec![1, 2]);
        assert!(matches!(index.entry(1), Some(SlugEntry::Conflict(_))));
        assert_eq!(index.unique_slug(3).map(Slug::as_str), Some("Oak"));
        assert!(matches!(index.entry(4), Some(SlugEntry::Invalid(_))));
        assert!(index.entry(99).is_none());
    }
}
