//! Runtime resolution of display locators
//!
//! An [`AssetResolver`] holds an explicit, ordered list of tiers. Each tier
//! either resolves the request or passes with a reason; the first resolution
//! wins and a request no tier resolves is absent.
//!
//! Standard order:
//! 1. [`RemoteReferenceTier`]: recorded remote URL, returned verbatim
//! 2. [`BaseUrlTier`]: configured image base URL plus a cache-busting token
//! 3. [`LocalCanonicalTier`]: healthy file in the canonical tree
//! 4. [`LegacyTier`]: healthy file in an older layout
//!
//! Resolution is synchronous. Its only side effect is a regeneration request
//! for an unhealthy canonical file.

use crate::models::{AssetRole, CandidateFile, ImageExtension, MaterialEntity};
use crate::services::canonical_tree::{existing_role_files, CanonicalTree};
use crate::services::extension_arbiter::arbitrate;
use crate::services::health_checker::{HealthChecker, HealthVerdict};
use crate::services::slug::Slug;
use matmap_common::config::Settings;
use reqwest::Url;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Cache token used when neither an asset version nor a build hash is available
pub const FALLBACK_CACHE_TOKEN: &str = "dev";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    RemoteReference,
    BaseUrl,
    LocalCanonical,
    Legacy,
}

impl ResolutionTier {
    pub const ALL: [ResolutionTier; 4] = [
        ResolutionTier::RemoteReference,
        ResolutionTier::BaseUrl,
        ResolutionTier::LocalCanonical,
        ResolutionTier::Legacy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionTier::RemoteReference => "remote_reference",
            ResolutionTier::BaseUrl => "base_url",
            ResolutionTier::LocalCanonical => "local_canonical",
            ResolutionTier::Legacy => "legacy",
        }
    }
}

/// One resolution question: which bytes represent (entity, role) right now
#[derive(Debug, Clone, Copy)]
pub struct ResolutionRequest<'a> {
    pub entity: &'a MaterialEntity,
    /// `None` when the entity has no usable slug (invalid or conflicting name)
    pub slug: Option<&'a Slug>,
    pub role: AssetRole,
    pub remote_url: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionResult {
    pub locator: String,
    pub tier: ResolutionTier,
    pub cache_token: Option<String>,
}

/// What a single tier did with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOutcome {
    Resolved(ResolutionResult),
    Passed { reason: String },
}

fn passed(reason: impl Into<String>) -> TierOutcome {
    TierOutcome::Passed {
        reason: reason.into(),
    }
}

/// Trace entry for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTrace {
    pub tier: ResolutionTier,
    pub outcome: TierOutcome,
}

/// A single resolution tier
pub trait TierResolver: Send + Sync {
    fn tier(&self) -> ResolutionTier;

    fn resolve(&self, request: &ResolutionRequest<'_>) -> TierOutcome;
}

/// Regeneration request for an unhealthy canonical file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerationRequest {
    pub material_id: i64,
    pub material_name: String,
    pub role: AssetRole,
    pub path: PathBuf,
    pub verdict: HealthVerdict,
}

/// Receiver of regeneration requests (image generation lives elsewhere)
pub trait RegenerationSink: Send + Sync {
    fn request_regeneration(&self, request: RegenerationRequest);
}

/// Sink that only records requests in the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRegenerationSink;

impl RegenerationSink for LogRegenerationSink {
    fn request_regeneration(&self, request: RegenerationRequest) {
        tracing::warn!(
            material_id = request.material_id,
            material = %request.material_name,
            role = %request.role,
            path = %request.path.display(),
            verdict = request.verdict.as_str(),
            "Canonical image unhealthy, regeneration requested"
        );
    }
}

/// Cache token: configured asset version, else build git hash, else [`FALLBACK_CACHE_TOKEN`]
pub fn cache_token(asset_version: Option<&str>) -> String {
    asset_version
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| Some(env!("GIT_HASH")).filter(|h| !h.is_empty()))
        .unwrap_or(FALLBACK_CACHE_TOKEN)
        .to_string()
}

fn mtime_token(file: &CandidateFile) -> String {
    file.modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
        .to_string()
}

/// Tier 1: recorded remote reference
#[derive(Debug, Default)]
pub struct RemoteReferenceTier;

impl TierResolver for RemoteReferenceTier {
    fn tier(&self) -> ResolutionTier {
        ResolutionTier::RemoteReference
    }

    fn resolve(&self, request: &ResolutionRequest<'_>) -> TierOutcome {
        let Some(url) = request.remote_url.map(str::trim).filter(|u| !u.is_empty()) else {
            return passed("no remote reference");
        };
        let absolute = Url::parse(url).is_ok_and(|parsed| {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some_and(|h| !h.is_empty())
        });
        if !absolute {
            return passed(format!("remote reference is not an absolute http(s) URL: {}", url));
        }
        TierOutcome::Resolved(ResolutionResult {
            locator: url.to_string(),
            tier: ResolutionTier::RemoteReference,
            cache_token: None,
        })
    }
}

/// Tier 2: `{base}/{entity_group}/{slug}/{role_file}?v={token}`
pub struct BaseUrlTier {
    base_url: Option<String>,
    entity_group: String,
    token: String,
    tree: CanonicalTree,
}

impl BaseUrlTier {
    pub fn new(
        base_url: Option<String>,
        entity_group: impl Into<String>,
        token: impl Into<String>,
        tree: CanonicalTree,
    ) -> Self {
        Self {
            base_url: base_url.filter(|b| !b.trim().is_empty()),
            entity_group: entity_group.into(),
            token: token.into(),
            tree,
        }
    }

    /// Build the versioned URL, percent-encoding every path segment
    pub fn build_url(&self, base: &str, slug: &Slug, role: AssetRole, ext: ImageExtension) -> Option<String> {
        let mut url = Url::parse(base.trim()).ok()?;
        {
            let mut segments = url.path_segments_mut().ok()?;
            segments.pop_if_empty();
            segments.extend(self.entity_group.split('/').filter(|s| !s.is_empty()));
            segments.push(slug.as_str());
            segments.extend(role.url_file(ext).split('/'));
        }
        url.set_query(None);
        url.query_pairs_mut().append_pair("v", &self.token);
        Some(url.to_string())
    }
}

impl TierResolver for BaseUrlTier {
    fn tier(&self) -> ResolutionTier {
        ResolutionTier::BaseUrl
    }

    fn resolve(&self, request: &ResolutionRequest<'_>) -> TierOutcome {
        let Some(base) = self.base_url.as_deref() else {
            return passed("no image base URL configured");
        };
        let Some(slug) = request.slug else {
            return passed("entity has no usable slug");
        };

        let ext = self
            .tree
            .current(slug, request.role)
            .map(|f| f.extension)
            .unwrap_or(ImageExtension::Jpg);

        match self.build_url(base, slug, request.role, ext) {
            Some(locator) => TierOutcome::Resolved(ResolutionResult {
                locator,
                tier: ResolutionTier::BaseUrl,
                cache_token: Some(self.token.clone()),
            }),
            None => passed(format!("image base URL is not a valid absolute URL: {}", base)),
        }
    }
}

/// Tier 3: healthy file in the canonical tree
pub struct LocalCanonicalTier {
    tree: CanonicalTree,
    checker: HealthChecker,
    sink: Arc<dyn RegenerationSink>,
}

impl LocalCanonicalTier {
    pub fn new(tree: CanonicalTree, checker: HealthChecker, sink: Arc<dyn RegenerationSink>) -> Self {
        Self {
            tree,
            checker,
            sink,
        }
    }
}

impl TierResolver for LocalCanonicalTier {
    fn tier(&self) -> ResolutionTier {
        ResolutionTier::LocalCanonical
    }

    fn resolve(&self, request: &ResolutionRequest<'_>) -> TierOutcome {
        let Some(slug) = request.slug else {
            return passed("entity has no usable slug");
        };
        let Some(file) = self.tree.current(slug, request.role) else {
            return passed("no canonical file");
        };

        let report = self.checker.check(&file.path);
        if !report.is_healthy() {
            self.sink.request_regeneration(RegenerationRequest {
                material_id: request.entity.id,
                material_name: request.entity.canonical_name().to_string(),
                role: request.role,
                path: file.path.clone(),
                verdict: report.verdict,
            });
            return passed(format!(
                "canonical file {} is {}",
                file.path.display(),
                report.verdict.as_str()
            ));
        }

        TierOutcome::Resolved(ResolutionResult {
            locator: file.path.display().to_string(),
            tier: ResolutionTier::LocalCanonical,
            cache_token: Some(mtime_token(&file)),
        })
    }
}

/// Tier 4: older layouts
///
/// - nested primary layout `{root}/{slug}/primary/primary.{ext}`, checked under the
///   canonical root and every legacy root
/// - raw-name layout `{legacy_root}/{name}/primary.{ext}` (or `uses/{role}.{ext}`)
///   for every known name of the entity
pub struct LegacyTier {
    canonical_root: PathBuf,
    legacy_roots: Vec<PathBuf>,
    checker: HealthChecker,
}

impl LegacyTier {
    pub fn new(canonical_root: PathBuf, legacy_roots: Vec<PathBuf>, checker: HealthChecker) -> Self {
        Self {
            canonical_root,
            legacy_roots,
            checker,
        }
    }

    /// Candidate directories in lookup order, with the file stem expected in each
    fn locations(&self, request: &ResolutionRequest<'_>) -> Vec<(PathBuf, AssetRole)> {
        let mut dirs = Vec::new();
        let nested_roots = std::iter::once(&self.canonical_root).chain(self.legacy_roots.iter());

        if let (Some(slug), AssetRole::Primary) = (request.slug, request.role) {
            for root in nested_roots {
                dirs.push((root.join(slug).join("primary"), AssetRole::Primary));
            }
        }

        for root in &self.legacy_roots {
            for name in request.entity.known_names() {
                // Raw names containing separators cannot form a single directory
                if name.contains(['/', '\\']) || name == "." || name == ".." {
                    continue;
                }
                dirs.push((root.join(name), request.role));
            }
        }
        dirs
    }

    fn healthy_file(&self, dir: &Path, token: &str, role: AssetRole) -> Option<CandidateFile> {
        let files = existing_role_files(dir, token, role);
        let file = arbitrate(&files)?;
        if self.checker.check(&file.path).is_healthy() {
            Some(file.clone())
        } else {
            tracing::debug!(path = %file.path.display(), "Legacy file unhealthy, skipped");
            None
        }
    }
}

impl TierResolver for LegacyTier {
    fn tier(&self) -> ResolutionTier {
        ResolutionTier::Legacy
    }

    fn resolve(&self, request: &ResolutionRequest<'_>) -> TierOutcome {
        for (dir, role) in self.locations(request) {
            if let Some(file) = self.healthy_file(&dir, request.entity.canonical_name(), role) {
                return TierOutcome::Resolved(ResolutionResult {
                    locator: file.path.display().to_string(),
                    tier: ResolutionTier::Legacy,
                    cache_token: Some(mtime_token(&file)),
                });
            }
        }
        passed("no healthy legacy file")
    }
}

/// Ordered tier list
pub struct AssetResolver {
    tiers: Vec<Box<dyn TierResolver>>,
}

impl AssetResolver {
    pub fn new(tiers: Vec<Box<dyn TierResolver>>) -> Self {
        Self { tiers }
    }

    /// The standard four-tier resolver for the given settings
    pub fn from_settings(settings: &Settings, sink: Arc<dyn RegenerationSink>) -> Self {
        let tree = CanonicalTree::new(&settings.canonical_root);
        let checker = HealthChecker::from_settings(&settings.health);
        let token = cache_token(settings.resolution.asset_version.as_deref());

        Self::new(vec![
            Box::new(RemoteReferenceTier),
            Box::new(BaseUrlTier::new(
                settings.resolution.image_base_url.clone(),
                settings.resolution.entity_group.clone(),
                token,
                tree.clone(),
            )),
            Box::new(LocalCanonicalTier::new(tree, checker.clone(), sink)),
            Box::new(LegacyTier::new(
                settings.canonical_root.clone(),
                settings.legacy_roots.clone(),
                checker,
            )),
        ])
    }

    pub fn tiers(&self) -> impl Iterator<Item = ResolutionTier> + '_ {
        self.tiers.iter().map(|t| t.tier())
    }

    /// First resolving tier wins; `None` is absent
    pub fn resolve(&self, request: &ResolutionRequest<'_>) -> Option<ResolutionResult> {
        self.tiers.iter().find_map(|tier| match tier.resolve(request) {
            TierOutcome::Resolved(result) => Some(result),
            TierOutcome::Passed { .. } => None,
        })
    }

    /// Resolve and return the outcome of every tier consulted
    pub fn resolve_with_trace(
        &self,
        request: &ResolutionRequest<'_>,
    ) -> (Option<ResolutionResult>, Vec<TierTrace>) {
        let mut trace = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            let outcome = tier.resolve(request);
            let resolved = match &outcome {
                TierOutcome::Resolved(result) => Some(result.clone()),
                TierOutcome::Passed { .. } => None,
            };
            trace.push(TierTrace {
                tier: tier.tier(),
                outcome,
            });
            if resolved.is_some() {
                return (resolved, trace);
            }
        }
        (None, trace)
    }
}
