//! Entity matching
//!
//! Resolves a free-form filename token to exactly one registry entity.
//!
//! **Tiers** (first tier with any hit decides):
//! 1. Exact equality against a known name (canonical, `name`, `name_official`, alias)
//! 2. Normalized equality: NFKC, lowercase, whitespace removed
//! 3. Partial: normalized token contained in a normalized name, or the reverse
//!
//! A tier hitting more than one entity is ambiguous and is never guessed.
//! The matcher is immutable once built and is passed to callers explicitly.

use crate::models::{MaterialEntity, MaterialRegistry};
use serde::Serialize;
use std::collections::BTreeSet;
use unicode_normalization::UnicodeNormalization;

/// Shortest normalized string allowed to participate in a partial match
const MIN_PARTIAL_CHARS: usize = 2;

/// Whether sync resolves tokens against the registry at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Registry,
    /// Use the raw token as identity
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    Exact,
    Normalized,
    Partial,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome<'a> {
    Matched {
        entity: &'a MaterialEntity,
        tier: MatchTier,
    },
    Unmatched,
    Ambiguous(Vec<i64>),
    /// Token only hit an alias whose material row no longer exists
    Dangling { material_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Target {
    Entity(usize),
    Orphan(i64),
}

#[derive(Debug, Clone)]
struct NameKey {
    raw: String,
    normalized: String,
    target: Target,
}

/// Fold a name for tier-2/3 comparison
///
/// NFKC collapses full-width and half-width forms before case folding.
pub fn normalize_for_match(s: &str) -> String {
    s.nfkc()
        .flat_map(char::to_lowercase)
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Immutable name → entity matcher
#[derive(Debug, Clone)]
pub struct EntityMatcher {
    registry: MaterialRegistry,
    keys: Vec<NameKey>,
}

impl EntityMatcher {
    pub fn new(registry: MaterialRegistry) -> Self {
        let mut keys = Vec::new();

        for (idx, entity) in registry.entities.iter().enumerate() {
            for name in entity.known_names() {
                keys.push(NameKey {
                    raw: name.to_string(),
                    normalized: normalize_for_match(name),
                    target: Target::Entity(idx),
                });
            }
        }

        for (material_id, alias) in &registry.orphan_aliases {
            if registry.find(*material_id).is_some() || alias.trim().is_empty() {
                continue;
            }
            keys.push(NameKey {
                raw: alias.clone(),
                normalized: normalize_for_match(alias),
                target: Target::Orphan(*material_id),
            });
        }

        tracing::debug!(
            entities = registry.entities.len(),
            names = keys.len(),
            "Entity matcher built"
        );

        Self { registry, keys }
    }

    pub fn registry(&self) -> &MaterialRegistry {
        &self.registry
    }

    pub fn entities(&self) -> &[MaterialEntity] {
        &self.registry.entities
    }

    /// Match a filename token
    pub fn match_token(&self, token: &str) -> MatchOutcome<'_> {
        let token = token.trim();
        if token.is_empty() {
            return MatchOutcome::Unmatched;
        }

        let exact = self.hits(|key| key.raw == token);
        if !exact.is_empty() {
            return self.decide(exact, MatchTier::Exact);
        }

        let normalized_token = normalize_for_match(token);
        if normalized_token.is_empty() {
            return MatchOutcome::Unmatched;
        }

        let normalized = self.hits(|key| key.normalized == normalized_token);
        if !normalized.is_empty() {
            return self.decide(normalized, MatchTier::Normalized);
        }

        let partial = self.hits(|key| partial_match(&normalized_token, &key.normalized));
        if !partial.is_empty() {
            return self.decide(partial, MatchTier::Partial);
        }

        MatchOutcome::Unmatched
    }

    fn hits<F>(&self, pred: F) -> BTreeSet<Target>
    where
        F: Fn(&NameKey) -> bool,
    {
        self.keys
            .iter()
            .filter(|key| pred(key))
            .map(|key| key.target)
            .collect()
    }

    fn decide(&self, hits: BTreeSet<Target>, tier: MatchTier) -> MatchOutcome<'_> {
        let live: Vec<usize> = hits
            .iter()
            .filter_map(|t| match t {
                Target::Entity(idx) => Some(*idx),
                Target::Orphan(_) => None,
            })
            .collect();
        let orphans: Vec<i64> = hits
            .iter()
            .filter_map(|t| match t {
                Target::Orphan(id) => Some(*id),
                Target::Entity(_) => None,
            })
            .collect();

        match (live.as_slice(), orphans.as_slice()) {
            ([idx], []) => MatchOutcome::Matched {
                entity: &self.registry.entities[*idx],
                tier,
            },
            ([], [material_id]) => MatchOutcome::Dangling {
                material_id: *material_id,
            },
            _ => {
                let mut ids: Vec<i64> = live
                    .iter()
                    .map(|idx| self.registry.entities[*idx].id)
                    .chain(orphans.iter().copied())
                    .collect();
                ids.sort_unstable();
                ids.dedup();
                MatchOutcome::Ambiguous(ids)
            }
        }
    }
}

fn partial_match(token: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let (shorter, longer) = if token.chars().count() <= name.chars().count() {
        (token, name)
    } else {
        (name, token)
    };
    shorter.chars().count() >= MIN_PARTIAL_CHARS && longer.contains(shorter)
}
