//! Asset roles, image encodings and sync candidates

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

/// Directory holding secondary-role images, both in the inbox and the canonical tree
pub const SECONDARY_DIR: &str = "uses";

/// Image purpose tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetRole {
    Primary,
    Space,
    Product,
}

impl AssetRole {
    pub const ALL: [AssetRole; 3] = [AssetRole::Primary, AssetRole::Space, AssetRole::Product];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetRole::Primary => "primary",
            AssetRole::Space => "space",
            AssetRole::Product => "product",
        }
    }

    /// Secondary role for an inbox ordinal suffix (`1` → space, `2` → product)
    pub fn from_ordinal(ordinal: char) -> Option<Self> {
        match ordinal {
            '1' => Some(AssetRole::Space),
            '2' => Some(AssetRole::Product),
            _ => None,
        }
    }

    pub fn is_secondary(&self) -> bool {
        !matches!(self, AssetRole::Primary)
    }

    /// Directory of this role's file, relative to the entity directory
    pub fn relative_dir(&self) -> &'static Path {
        if self.is_secondary() {
            Path::new(SECONDARY_DIR)
        } else {
            Path::new("")
        }
    }

    /// `primary.jpg` or `uses/space.png`, relative to the entity directory
    pub fn relative_file(&self, ext: ImageExtension) -> PathBuf {
        self.relative_dir()
            .join(format!("{}.{}", self.as_str(), ext.as_str()))
    }

    /// Same as [`relative_file`](Self::relative_file) but with `/` separators, for URLs and keys
    pub fn url_file(&self, ext: ImageExtension) -> String {
        if self.is_secondary() {
            format!("{}/{}.{}", SECONDARY_DIR, self.as_str(), ext.as_str())
        } else {
            format!("{}.{}", self.as_str(), ext.as_str())
        }
    }
}

impl fmt::Display for AssetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(AssetRole::Primary),
            "space" => Ok(AssetRole::Space),
            "product" => Ok(AssetRole::Product),
            other => Err(format!(
                "unknown role '{}' (expected primary, space or product)",
                other
            )),
        }
    }
}

/// Supported image encodings, declared in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageExtension {
    Jpg,
    Jpeg,
    Png,
    Webp,
}

impl ImageExtension {
    pub const ALL: [ImageExtension; 4] = [
        ImageExtension::Jpg,
        ImageExtension::Jpeg,
        ImageExtension::Png,
        ImageExtension::Webp,
    ];

    /// Lower is preferred
    pub fn priority(&self) -> u8 {
        match self {
            ImageExtension::Jpg => 0,
            ImageExtension::Jpeg => 1,
            ImageExtension::Png => 2,
            ImageExtension::Webp => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageExtension::Jpg => "jpg",
            ImageExtension::Jpeg => "jpeg",
            ImageExtension::Png => "png",
            ImageExtension::Webp => "webp",
        }
    }

    /// Parse a bare extension (no dot), case-insensitively
    pub fn parse(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" => Some(ImageExtension::Jpg),
            "jpeg" => Some(ImageExtension::Jpeg),
            "png" => Some(ImageExtension::Png),
            "webp" => Some(ImageExtension::Webp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::parse)
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageExtension::Jpg | ImageExtension::Jpeg => "image/jpeg",
            ImageExtension::Png => "image/png",
            ImageExtension::Webp => "image/webp",
        }
    }
}

impl fmt::Display for ImageExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file competing for one (identity, role) destination during a sync pass
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// Identity token taken from the file name
    pub token: String,
    pub role: AssetRole,
    pub extension: ImageExtension,
    pub modified: SystemTime,
    pub byte_len: u64,
}

impl CandidateFile {
    /// Build a candidate from file system metadata
    pub fn from_metadata(
        path: PathBuf,
        token: String,
        role: AssetRole,
        extension: ImageExtension,
        metadata: &std::fs::Metadata,
    ) -> Self {
        Self {
            path,
            token,
            role,
            extension,
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            byte_len: metadata.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_paths() {
        assert_eq!(
            AssetRole::Primary.relative_file(ImageExtension::Jpg),
            PathBuf::from("primary.jpg")
        );
        assert_eq!(
            AssetRole::Space.relative_file(ImageExtension::Png),
            PathBuf::from("uses").join("space.png")
        );
        assert_eq!(AssetRole::Product.url_file(ImageExtension::Webp), "uses/product.webp");
    }

    #[test]
    fn test_role_ordinals() {
        assert_eq!(AssetRole::from_ordinal('1'), Some(AssetRole::Space));
        assert_eq!(AssetRole::from_ordinal('2'), Some(AssetRole::Product));
        assert_eq!(AssetRole::from_ordinal('3'), None);
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("Space".parse::<AssetRole>(), Ok(AssetRole::Space));
        assert!("thumbnail".parse::<AssetRole>().is_err());
    }

    #[test]
    fn test_extension_parse_is_case_insensitive() {
        assert_eq!(ImageExtension::parse("JPG"), Some(ImageExtension::Jpg));
        assert_eq!(ImageExtension::parse("WebP"), Some(ImageExtension::Webp));
        assert_eq!(ImageExtension::parse("gif"), None);
        assert_eq!(
            ImageExtension::from_path(Path::new("/a/b/Steel.JPEG")),
            Some(ImageExtension::Jpeg)
        );
        assert_eq!(ImageExtension::from_path(Path::new("/a/b/README")), None);
    }

    #[test]
    fn test_extension_priority_order() {
        let priorities: Vec<u8> = ImageExtension::ALL.iter().map(|e| e.priority()).collect();
        assert_eq!(priorities, vec![0, 1, 2, 3]);
    }
}
