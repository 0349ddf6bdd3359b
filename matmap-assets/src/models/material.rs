//! Material entities as loaded from the relational store

use serde::{Deserialize, Serialize};

/// A material record with its known names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialEntity {
    pub id: i64,
    pub name: String,
    pub name_official: Option<String>,
    pub aliases: Vec<String>,
}

impl MaterialEntity {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            name_official: None,
            aliases: Vec::new(),
        }
    }

    pub fn with_official(mut self, official: impl Into<String>) -> Self {
        self.name_official = Some(official.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// `name_official` when set and non-blank, otherwise `name`
    pub fn canonical_name(&self) -> &str {
        match self.name_official.as_deref() {
            Some(official) if !official.trim().is_empty() => official,
            _ => &self.name,
        }
    }

    /// Every distinct non-blank name this entity is known by, canonical name first
    pub fn known_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::with_capacity(2 + self.aliases.len());
        let candidates = std::iter::once(self.canonical_name())
            .chain(std::iter::once(self.name.as_str()))
            .chain(self.name_official.as_deref())
            .chain(self.aliases.iter().map(String::as_str));
        for name in candidates {
            if !name.trim().is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

/// Snapshot of the registry used by one run
///
/// `orphan_aliases` holds alias rows whose material no longer exists.
#[derive(Debug, Clone, Default)]
pub struct MaterialRegistry {
    pub entities: Vec<MaterialEntity>,
    pub orphan_aliases: Vec<(i64, String)>,
}

impl MaterialRegistry {
    pub fn new(entities: Vec<MaterialEntity>) -> Self {
        Self {
            entities,
            orphan_aliases: Vec::new(),
        }
    }

    pub fn find(&self, id: i64) -> Option<&MaterialEntity> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// First entity any of whose known names equals `name` exactly
    pub fn find_by_name(&self, name: &str) -> Option<&MaterialEntity> {
        self.entities
            .iter()
            .find(|e| e.known_names().contains(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name_prefers_official() {
        let e = MaterialEntity::new(1, "アルミ").with_official("Aluminum");
        assert_eq!(e.canonical_name(), "Aluminum");

        let blank = MaterialEntity::new(2, "Steel").with_official("  ");
        assert_eq!(blank.canonical_name(), "Steel");
    }

    #[test]
    fn test_known_names_are_distinct() {
        let e = MaterialEntity::new(1, "Oak")
            .with_official("Oak")
            .with_alias("オーク")
            .with_alias("")
            .with_alias("オーク");
        assert_eq!(e.known_names(), vec!["Oak", "オーク"]);
    }
}
