//! Inbox scanner
//!
//! Lists candidate images from the upload inbox. Two namespaces exist:
//! - primary: top-level files of the inbox, named `{token}.{ext}`
//! - secondary: top-level files of `{inbox}/uses`, named `{token}{1|2}.{ext}`
//!
//! Role inference from a file name happens in exactly one place,
//! [`classify_file_name`].

use crate::models::asset::SECONDARY_DIR;
use crate::models::{AssetRole, CandidateFile, ImageExtension};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Error)]
pub enum ScanError {
    /// Inbox root does not exist
    #[error("Inbox not found: {0}")]
    PathNotFound(PathBuf),

    /// Inbox root exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Which part of the inbox a file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Primary,
    Secondary,
}

/// Role and identity token implied by a file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileShape {
    Primary { token: String, extension: ImageExtension },
    Space { token: String, extension: ImageExtension },
    Product { token: String, extension: ImageExtension },
    Unrecognized { reason: String },
}

impl FileShape {
    pub fn role(&self) -> Option<AssetRole> {
        match self {
            FileShape::Primary { .. } => Some(AssetRole::Primary),
            FileShape::Space { .. } => Some(AssetRole::Space),
            FileShape::Product { .. } => Some(AssetRole::Product),
            FileShape::Unrecognized { .. } => None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            FileShape::Primary { token, .. }
            | FileShape::Space { token, .. }
            | FileShape::Product { token, .. } => Some(token),
            FileShape::Unrecognized { .. } => None,
        }
    }

    pub fn extension(&self) -> Option<ImageExtension> {
        match self {
            FileShape::Primary { extension, .. }
            | FileShape::Space { extension, .. }
            | FileShape::Product { extension, .. } => Some(*extension),
            FileShape::Unrecognized { .. } => None,
        }
    }
}

fn unrecognized(reason: impl Into<String>) -> FileShape {
    FileShape::Unrecognized {
        reason: reason.into(),
    }
}

/// Classify a bare file name from the given namespace
pub fn classify_file_name(namespace: Namespace, file_name: &str) -> FileShape {
    let Some((stem, ext)) = file_name.rsplit_once('.') else {
        return unrecognized("missing extension");
    };

    let Some(extension) = ImageExtension::parse(ext) else {
        return unrecognized(format!("unsupported extension '{}'", ext));
    };

    match namespace {
        Namespace::Primary => {
            let token = stem.trim();
            if token.is_empty() {
                return unrecognized("empty name");
            }
            FileShape::Primary {
                token: token.to_string(),
                extension,
            }
        }
        Namespace::Secondary => {
            let mut chars = stem.chars();
            let Some(suffix) = chars.next_back() else {
                return unrecognized("empty name");
            };
            let Some(role) = AssetRole::from_ordinal(suffix) else {
                return unrecognized(format!(
                    "secondary image name must end in 1 or 2, found '{}'",
                    suffix
                ));
            };
            let token = chars.as_str().trim();
            if token.is_empty() {
                return unrecognized("empty name before role suffix");
            }
            let token = token.to_string();
            match role {
                AssetRole::Space => FileShape::Space { token, extension },
                _ => FileShape::Product { token, extension },
            }
        }
    }
}

/// One inbox file with its classification
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub namespace: Namespace,
    pub shape: FileShape,
    pub modified: SystemTime,
    pub byte_len: u64,
}

impl ScannedFile {
    /// Candidate view of a recognized file
    pub fn to_candidate(&self) -> Option<CandidateFile> {
        let role = self.shape.role()?;
        Some(CandidateFile {
            path: self.path.clone(),
            token: self.shape.token()?.to_string(),
            role,
            extension: self.shape.extension()?,
            modified: self.modified,
            byte_len: self.byte_len,
        })
    }
}

/// Scan result
#[derive(Debug, Clone, Default)]
pub struct InboxScan {
    pub files: Vec<ScannedFile>,
    /// Entries that could not be read; the scan continues past them
    pub errors: Vec<String>,
}

/// Inbox scanner
pub struct InboxScanner {
    ignore_names: Vec<String>,
}

impl InboxScanner {
    /// Create a scanner ignoring dot files and common system files
    pub fn new() -> Self {
        Self {
            ignore_names: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
            ],
        }
    }

    /// Scan both namespaces (blocking)
    ///
    /// A missing inbox root is an error; a missing `uses` directory is empty.
    pub fn scan(&self, inbox_root: &Path) -> Result<InboxScan, ScanError> {
        if !inbox_root.exists() {
            return Err(ScanError::PathNotFound(inbox_root.to_path_buf()));
        }
        if !inbox_root.is_dir() {
            return Err(ScanError::NotADirectory(inbox_root.to_path_buf()));
        }

        let mut scan = InboxScan::default();
        self.scan_namespace(inbox_root, Namespace::Primary, &mut scan);

        let secondary = inbox_root.join(SECONDARY_DIR);
        if secondary.is_dir() {
            self.scan_namespace(&secondary, Namespace::Secondary, &mut scan);
        }

        scan.files.sort_by(|a, b| a.path.cmp(&b.path));

        tracing::debug!(
            inbox = %inbox_root.display(),
            files = scan.files.len(),
            errors = scan.errors.len(),
            "Inbox scanned"
        );

        Ok(scan)
    }

    fn scan_namespace(&self, dir: &Path, namespace: Namespace, scan: &mut InboxScan) {
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !self.is_ignored(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Error accessing inbox entry: {}", e);
                    scan.errors.push(e.to_string());
                    continue;
                }
            };

            // Symlinks count when they point at a regular file
            let path = entry.path();
            if !(entry.file_type().is_file() || (entry.path_is_symlink() && path.is_file())) {
                continue;
            }

            let metadata = match std::fs::metadata(path) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Cannot stat inbox file: {}", e);
                    scan.errors.push(format!("{}: {}", path.display(), e));
                    continue;
                }
            };

            let shape = match entry.file_name().to_str() {
                Some(name) => classify_file_name(namespace, name),
                None => unrecognized("file name is not valid UTF-8"),
            };

            scan.files.push(ScannedFile {
                path: path.to_path_buf(),
                namespace,
                shape,
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                byte_len: metadata.len(),
            });
        }
    }

    fn is_ignored(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || self.ignore_names.iter().any(|n| n.as_str() == name)
    }
}

impl Default for InboxScanner {
    fn default() -> Self {
        Self::new()
    }
}
