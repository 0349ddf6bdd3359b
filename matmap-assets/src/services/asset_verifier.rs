//! Asset verification across the resolution tiers
//!
//! Resolves every material × role the same way a page render would, records
//! which tier answered and the health of the local canonical file, and
//! optionally checks recorded remote URLs with HEAD requests.

use crate::db::{load_remote_refs, RemoteRefs};
use crate::error::{AssetError, AssetResult};
use crate::models::{AssetRole, MaterialRegistry, VerifyItem, VerifyReport};
use crate::services::canonical_tree::CanonicalTree;
use crate::services::health_checker::HealthChecker;
use crate::services::resolver::{AssetResolver, ResolutionRequest, ResolutionTier};
use crate::services::slug::SlugIndex;
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

const REMOTE_CHECK_CONCURRENCY: usize = 4;
const REMOTE_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub strict: bool,
    pub check_remote: bool,
}

pub struct AssetVerifier {
    pool: SqlitePool,
    resolver: Arc<AssetResolver>,
    tree: CanonicalTree,
    checker: HealthChecker,
}

impl AssetVerifier {
    pub fn new(
        pool: SqlitePool,
        resolver: Arc<AssetResolver>,
        tree: CanonicalTree,
        checker: HealthChecker,
    ) -> Self {
        Self {
            pool,
            resolver,
            tree,
            checker,
        }
    }

    pub async fn run(&self, registry: &MaterialRegistry, options: &VerifyOptions) -> AssetResult<VerifyReport> {
        let remote_refs = load_remote_refs(&self.pool).await?;

        // Resolution and health checks touch the filesystem and decode images
        let resolver = self.resolver.clone();
        let tree = self.tree.clone();
        let checker = self.checker.clone();
        let registry = registry.clone();
        let mut items = tokio::task::spawn_blocking(move || {
            resolve_all(&resolver, &tree, &checker, &registry, &remote_refs)
        })
        .await
        .map_err(|e| AssetError::Common(matmap_common::Error::Internal(format!("Verify task failed: {}", e))))?;

        if options.check_remote {
            check_remote(&mut items).await?;
        }

        let report = VerifyReport {
            items,
            strict: options.strict,
        };
        for item in report.unresolved() {
            tracing::warn!(
                material_id = item.material_id,
                material = %item.material_name,
                role = %item.role,
                "No resolvable image"
            );
        }
        Ok(report)
    }
}

fn resolve_all(
    resolver: &AssetResolver,
    tree: &CanonicalTree,
    checker: &HealthChecker,
    registry: &MaterialRegistry,
    remote_refs: &RemoteRefs,
) -> Vec<VerifyItem> {
    let slugs = SlugIndex::build(&registry.entities);
    let mut entities: Vec<_> = registry.entities.iter().collect();
    entities.sort_by_key(|e| e.id);

    let mut items = Vec::with_capacity(entities.len() * AssetRole::ALL.len());
    for entity in entities {
        let slug = slugs.unique_slug(entity.id);
        for role in AssetRole::ALL {
            let request = ResolutionRequest {
                entity,
                slug,
                role,
                remote_url: remote_refs.get(entity.id, role),
            };
            let resolved = resolver.resolve(&request);
            let local_health = slug
                .and_then(|s| tree.current(s, role))
                .map(|file| checker.check(&file.path).verdict);

            tracing::debug!(
                material_id = entity.id,
                role = %role,
                tier = resolved.as_ref().map(|r| r.tier.as_str()).unwrap_or("absent"),
                "Resolved"
            );
            items.push(VerifyItem {
                material_id: entity.id,
                material_name: entity.canonical_name().to_string(),
                role,
                tier: resolved.as_ref().map(|r| r.tier),
                locator: resolved.map(|r| r.locator),
                local_health,
                remote_status: None,
                remote_error: None,
            });
        }
    }
    items
}

/// HEAD every remote-reference locator and record the status
async fn check_remote(items: &mut [VerifyItem]) -> AssetResult<()> {
    let client = reqwest::Client::builder()
        .timeout(REMOTE_CHECK_TIMEOUT)
        .build()
        .map_err(|e| AssetError::Network(format!("Failed to build HTTP client: {}", e)))?;

    let targets: Vec<(usize, String)> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.tier == Some(ResolutionTier::RemoteReference))
        .filter_map(|(i, item)| item.locator.clone().map(|url| (i, url)))
        .collect();

    let results: Vec<(usize, Result<u16, String>)> = stream::iter(targets)
        .map(|(i, url)| {
            let client = client.clone();
            async move {
                let result = client
                    .head(&url)
                    .send()
                    .await
                    .map(|resp| resp.status().as_u16())
                    .map_err(|e| e.to_string());
                (i, result)
            }
        })
        .buffer_unordered(REMOTE_CHECK_CONCURRENCY)
        .collect()
        .await;

    for (i, result) in results {
        let item = &mut items[i];
        match result {
            Ok(status) => {
                if !(200..300).contains(&status) {
                    tracing::warn!(
                        material_id = item.material_id,
                        role = %item.role,
                        status,
                        "Remote reference not retrievable"
                    );
                }
                item.remote_status = Some(status);
            }
            Err(e) => {
                tracing::warn!(
                    material_id = item.material_id,
                    role = %item.role,
                    "Remote check failed: {}",
                    e
                );
                item.remote_error = Some(e);
            }
        }
    }
    Ok(())
}
