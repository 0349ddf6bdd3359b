//! Configuration loading and root folder resolution
//!
//! Every setting resolves with the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Missing TOML files never abort startup; a missing remote section only matters
//! once a command actually talks to the remote store.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const ENV_ROOT_FOLDER: &str = "MATMAP_ROOT_FOLDER";
pub const ENV_CANONICAL_ROOT: &str = "MATMAP_CANONICAL_ROOT";
pub const ENV_INBOX_ROOT: &str = "MATMAP_INBOX_ROOT";
pub const ENV_DATABASE: &str = "MATMAP_DATABASE";
pub const ENV_LEGACY_ROOTS: &str = "MATMAP_LEGACY_ROOTS";
pub const ENV_IMAGE_BASE_URL: &str = "MATMAP_IMAGE_BASE_URL";
pub const ENV_ASSET_VERSION: &str = "MATMAP_ASSET_VERSION";
pub const ENV_ENTITY_GROUP: &str = "MATMAP_ENTITY_GROUP";
pub const ENV_S3_BUCKET: &str = "S3_BUCKET";
pub const ENV_AWS_REGION: &str = "AWS_REGION";
pub const ENV_S3_ENDPOINT_URL: &str = "S3_ENDPOINT_URL";
pub const ENV_S3_PUBLIC_BASE_URL: &str = "S3_PUBLIC_BASE_URL";
pub const ENV_AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";

const DEFAULT_ENTITY_GROUP: &str = "materials";
const DEFAULT_REGION: &str = "ap-northeast-1";

/// Compiled defaults used when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: get_default_root_folder(),
            log_level: "info".to_string(),
        }
    }
}

/// Logging section of the TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

/// Resolution section: how display locators are built
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionConfig {
    pub image_base_url: Option<String>,
    pub asset_version: Option<String>,
    pub entity_group: Option<String>,
}

/// Health section: degenerate-image heuristic tunables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthConfig {
    pub luminance_threshold: Option<f64>,
    pub max_samples_per_axis: Option<u32>,
}

/// Sync section: worker pool and per-item timeout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    pub workers: Option<usize>,
    pub item_timeout_secs: Option<u64>,
}

/// Remote object store section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub public_base_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub make_public: Option<bool>,
}

/// Migration section: upload pacing and retry bounds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrateConfig {
    pub concurrency: Option<usize>,
    pub rate_per_sec: Option<u32>,
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub attempt_timeout_secs: Option<u64>,
}

/// On-disk TOML configuration (every field optional)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub canonical_root: Option<PathBuf>,
    pub inbox_root: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub legacy_roots: Vec<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub migrate: MigrateConfig,
}

/// Load the TOML configuration
///
/// An explicitly requested file must exist and parse. Without an explicit path the
/// platform config locations are searched; absence falls back to defaults.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match find_config_file() {
            Some(path) => path,
            None => {
                debug!("No config file found, using defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    debug!(path = %path.display(), "Loaded TOML config");
    Ok(config)
}

/// Locate the platform config file, if any
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("matmap").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/matmap/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("matmap"))
        .unwrap_or_else(|| PathBuf::from("./matmap_data"))
}

/// Path overrides supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub root_folder: Option<PathBuf>,
    pub canonical_root: Option<PathBuf>,
    pub inbox_root: Option<PathBuf>,
    pub database: Option<PathBuf>,
}

/// Display-locator settings
#[derive(Debug, Clone)]
pub struct ResolutionSettings {
    pub image_base_url: Option<String>,
    pub asset_version: Option<String>,
    pub entity_group: String,
}

/// Degenerate-image heuristic settings
#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub luminance_threshold: f64,
    pub max_samples_per_axis: u32,
}

/// Sync worker settings
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub workers: usize,
    pub item_timeout: Duration,
}

/// Remote object store settings
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub bucket: Option<String>,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub public_base_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub make_public: bool,
}

/// Credentials required to talk to the remote store
#[derive(Debug, Clone)]
pub struct RemoteCredentials {
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl RemoteSettings {
    /// Bucket and credentials, or a configuration error naming what is missing
    pub fn require_credentials(&self) -> Result<RemoteCredentials> {
        let mut missing = Vec::new();
        if self.bucket.is_none() {
            missing.push(ENV_S3_BUCKET);
        }
        if self.access_key_id.is_none() {
            missing.push(ENV_AWS_ACCESS_KEY_ID);
        }
        if self.secret_access_key.is_none() {
            missing.push(ENV_AWS_SECRET_ACCESS_KEY);
        }

        match (&self.bucket, &self.access_key_id, &self.secret_access_key) {
            (Some(bucket), Some(id), Some(secret)) => Ok(RemoteCredentials {
                bucket: bucket.clone(),
                access_key_id: id.clone(),
                secret_access_key: secret.clone(),
            }),
            _ => Err(Error::Config(format!(
                "Remote store not configured, missing: {}",
                missing.join(", ")
            ))),
        }
    }
}

/// Upload pacing settings
#[derive(Debug, Clone)]
pub struct MigrateSettings {
    pub concurrency: usize,
    pub rate_per_sec: u32,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub attempt_timeout: Duration,
}

/// Fully resolved settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub root_folder: PathBuf,
    pub canonical_root: PathBuf,
    pub inbox_root: PathBuf,
    pub database_path: PathBuf,
    pub legacy_roots: Vec<PathBuf>,
    pub log_level: String,
    pub resolution: ResolutionSettings,
    pub health: HealthSettings,
    pub sync: SyncSettings,
    pub remote: RemoteSettings,
    pub migrate: MigrateSettings,
}

impl Settings {
    /// Resolve settings from the process environment
    pub fn resolve(toml: &TomlConfig, overrides: &PathOverrides) -> Self {
        Self::resolve_with(toml, overrides, |key| std::env::var(key).ok())
    }

    /// Resolve settings with an explicit environment lookup
    ///
    /// Empty environment values count as unset.
    pub fn resolve_with<F>(toml: &TomlConfig, overrides: &PathOverrides, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let defaults = CompiledDefaults::for_current_platform();

        let root_folder = overrides
            .root_folder
            .clone()
            .or_else(|| env(ENV_ROOT_FOLDER).map(PathBuf::from))
            .or_else(|| toml.root_folder.clone())
            .unwrap_or(defaults.root_folder);

        let canonical_root = overrides
            .canonical_root
            .clone()
            .or_else(|| env(ENV_CANONICAL_ROOT).map(PathBuf::from))
            .or_else(|| toml.canonical_root.clone())
            .unwrap_or_else(|| root_folder.join("static").join("images").join("materials"));

        let inbox_root = overrides
            .inbox_root
            .clone()
            .or_else(|| env(ENV_INBOX_ROOT).map(PathBuf::from))
            .or_else(|| toml.inbox_root.clone())
            .unwrap_or_else(|| root_folder.join("uploads"));

        let database_path = overrides
            .database
            .clone()
            .or_else(|| env(ENV_DATABASE).map(PathBuf::from))
            .or_else(|| toml.database_path.clone())
            .unwrap_or_else(|| root_folder.join("materials.db"));

        let legacy_roots = match env(ENV_LEGACY_ROOTS) {
            Some(list) => std::env::split_paths(&list).collect(),
            None => toml.legacy_roots.clone(),
        };

        let log_level = toml
            .logging
            .level
            .clone()
            .unwrap_or(defaults.log_level);

        let resolution = ResolutionSettings {
            image_base_url: env(ENV_IMAGE_BASE_URL)
                .or_else(|| toml.resolution.image_base_url.clone())
                .filter(|v| !v.trim().is_empty()),
            asset_version: env(ENV_ASSET_VERSION)
                .or_else(|| toml.resolution.asset_version.clone())
                .filter(|v| !v.trim().is_empty()),
            entity_group: env(ENV_ENTITY_GROUP)
                .or_else(|| toml.resolution.entity_group.clone())
                .unwrap_or_else(|| DEFAULT_ENTITY_GROUP.to_string()),
        };

        let health = HealthSettings {
            luminance_threshold: toml.health.luminance_threshold.unwrap_or(10.0),
            max_samples_per_axis: toml.health.max_samples_per_axis.unwrap_or(256).max(1),
        };

        let sync = SyncSettings {
            workers: toml.sync.workers.unwrap_or(4).max(1),
            item_timeout: Duration::from_secs(toml.sync.item_timeout_secs.unwrap_or(30)),
        };

        let remote = RemoteSettings {
            bucket: env(ENV_S3_BUCKET).or_else(|| toml.remote.bucket.clone()),
            region: env(ENV_AWS_REGION)
                .or_else(|| toml.remote.region.clone())
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint_url: env(ENV_S3_ENDPOINT_URL).or_else(|| toml.remote.endpoint_url.clone()),
            public_base_url: env(ENV_S3_PUBLIC_BASE_URL)
                .or_else(|| toml.remote.public_base_url.clone()),
            access_key_id: env(ENV_AWS_ACCESS_KEY_ID)
                .or_else(|| toml.remote.access_key_id.clone()),
            secret_access_key: env(ENV_AWS_SECRET_ACCESS_KEY)
                .or_else(|| toml.remote.secret_access_key.clone()),
            make_public: toml.remote.make_public.unwrap_or(true),
        };

        let migrate = MigrateSettings {
            concurrency: toml.migrate.concurrency.unwrap_or(4).max(1),
            rate_per_sec: toml.migrate.rate_per_sec.unwrap_or(5).max(1),
            max_attempts: toml.migrate.max_attempts.unwrap_or(3).max(1),
            initial_backoff: Duration::from_millis(toml.migrate.initial_backoff_ms.unwrap_or(500)),
            attempt_timeout: Duration::from_secs(toml.migrate.attempt_timeout_secs.unwrap_or(60)),
        };

        if let Some(url) = &resolution.image_base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                warn!(url = %url, "Image base URL is not an absolute http(s) URL");
            }
        }

        Self {
            root_folder,
            canonical_root,
            inbox_root,
            database_path,
            legacy_roots,
            log_level,
            resolution,
            health,
            sync,
            remote,
            migrate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_cli_override_beats_env_and_toml() {
        let toml = TomlConfig {
            inbox_root: Some(PathBuf::from("/toml/inbox")),
            ..Default::default()
        };
        let overrides = PathOverrides {
            inbox_root: Some(PathBuf::from("/cli/inbox")),
            ..Default::default()
        };
        let settings =
            Settings::resolve_with(&toml, &overrides, lookup(&[(ENV_INBOX_ROOT, "/env/inbox")]));
        assert_eq!(settings.inbox_root, PathBuf::from("/cli/inbox"));
    }

    #[test]
    fn test_env_beats_toml() {
        let toml = TomlConfig {
            canonical_root: Some(PathBuf::from("/toml/canonical")),
            ..Default::default()
        };
        let settings = Settings::resolve_with(
            &toml,
            &PathOverrides::default(),
            lookup(&[(ENV_CANONICAL_ROOT, "/env/canonical")]),
        );
        assert_eq!(settings.canonical_root, PathBuf::from("/env/canonical"));
    }

    #[test]
    fn test_paths_derive_from_root_folder() {
        let settings = Settings::resolve_with(
            &TomlConfig::default(),
            &PathOverrides::default(),
            lookup(&[(ENV_ROOT_FOLDER, "/srv/matmap")]),
        );
        assert_eq!(
            settings.canonical_root,
            PathBuf::from("/srv/matmap/static/images/materials")
        );
        assert_eq!(settings.inbox_root, PathBuf::from("/srv/matmap/uploads"));
        assert_eq!(settings.database_path, PathBuf::from("/srv/matmap/materials.db"));
    }

    #[test]
    fn test_empty_env_value_is_unset() {
        let toml = TomlConfig {
            resolution: ResolutionConfig {
                image_base_url: Some("https://cdn.example.com/img".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let settings = Settings::resolve_with(
            &toml,
            &PathOverrides::default(),
            lookup(&[(ENV_IMAGE_BASE_URL, "  ")]),
        );
        assert_eq!(
            settings.resolution.image_base_url.as_deref(),
            Some("https://cdn.example.com/img")
        );
    }

    #[test]
    fn test_require_credentials_lists_missing() {
        let settings = Settings::resolve_with(
            &TomlConfig::default(),
            &PathOverrides::default(),
            lookup(&[(ENV_S3_BUCKET, "assets")]),
        );
        let err = settings.remote.require_credentials().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(ENV_AWS_ACCESS_KEY_ID));
        assert!(msg.contains(ENV_AWS_SECRET_ACCESS_KEY));
        assert!(!msg.contains(ENV_S3_BUCKET));
    }

    #[test]
    fn test_defaults_for_tunables() {
        let settings = Settings::resolve_with(
            &TomlConfig::default(),
            &PathOverrides::default(),
            lookup(&[]),
        );
        assert_eq!(settings.health.luminance_threshold, 10.0);
        assert_eq!(settings.health.max_samples_per_axis, 256);
        assert_eq!(settings.resolution.entity_group, "materials");
        assert_eq!(settings.remote.region, "ap-northeast-1");
        assert_eq!(settings.migrate.max_attempts, 3);
        assert!(settings.legacy_roots.is_empty());
    }
}
