//! Canonical asset tree layout
//!
//! `{root}/{slug}/primary.{ext}` and `{root}/{slug}/uses/{space|product}.{ext}`.
//! At most one file per (slug, role) is authoritative; when several encodings
//! exist the extension arbitrator decides.

use crate::models::{AssetRole, CandidateFile, ImageExtension};
use crate::services::extension_arbiter::arbitrate;
use crate::services::slug::Slug;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CanonicalTree {
    root: PathBuf,
}

impl CanonicalTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entity_dir(&self, slug: &Slug) -> PathBuf {
        self.root.join(slug)
    }

    pub fn path_for(&self, slug: &Slug, role: AssetRole, ext: ImageExtension) -> PathBuf {
        self.entity_dir(slug).join(role.relative_file(ext))
    }

    /// Every existing file for (slug, role), one per supported extension (blocking)
    pub fn existing(&self, slug: &Slug, role: AssetRole) -> Vec<CandidateFile> {
        existing_role_files(&self.entity_dir(slug), slug.as_str(), role)
    }

    /// The authoritative file for (slug, role), if any (blocking)
    pub fn current(&self, slug: &Slug, role: AssetRole) -> Option<CandidateFile> {
        let files = self.existing(slug, role);
        arbitrate(&files).cloned()
    }
}

/// Files named `{role}.{ext}` under `entity_dir` (in `uses/` for secondary roles)
pub fn existing_role_files(entity_dir: &Path, token: &str, role: AssetRole) -> Vec<CandidateFile> {
    ImageExtension::ALL
        .iter()
        .filter_map(|ext| {
            let path = entity_dir.join(role.relative_file(*ext));
            let metadata = std::fs::metadata(&path).ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some(CandidateFile::from_metadata(
                path,
                token.to_string(),
                role,
                *ext,
                &metadata,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::slug::slugify;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let tree = CanonicalTree::new("/srv/img");
        let slug = slugify("Aluminum").unwrap();
        assert_eq!(
            tree.path_for(&slug, AssetRole::Primary, ImageExtension::Jpg),
            PathBuf::from("/srv/img/Aluminum/primary.jpg")
        );
        assert_eq!(
            tree.path_for(&slug, AssetRole::Product, ImageExtension::Webp),
            PathBuf::from("/srv/img/Aluminum/uses/product.webp")
        );
    }

    #[test]
    fn test_current_prefers_priority() {
        let dir = TempDir::new().unwrap();
        let tree = CanonicalTree::new(dir.path());
        let slug = slugify("Oak").unwrap();
        let uses = tree.entity_dir(&slug).join("uses");
        std::fs::create_dir_all(&uses).unwrap();
        std::fs::write(uses.join("space.webp"), b"w").unwrap();
        std::fs::write(uses.join("space.png"), b"p").unwrap();

        assert_eq!(tree.existing(&slug, AssetRole::Space).len(), 2);
        assert_eq!(
            tree.current(&slug, AssetRole::Space).unwrap().extension,
            ImageExtension::Png
        );
        assert!(tree.current(&slug, AssetRole::Primary).is_none());
    }
}
