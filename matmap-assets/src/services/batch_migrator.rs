//! Batch migration of canonical images to the remote object store
//!
//! **Per item** (material × role, ordered by material id then role):
//! 1. Remote reference already recorded → skipped-already-migrated
//! 2. No canonical file → skipped-missing
//! 3. Canonical file fails the health check → skipped-unhealthy, regeneration requested
//! 4. Upload `{entity_group}/{material_id}/{role}/{filename}`, write the URL back
//!
//! Dry run stops after classification: no network calls, no writes.
//! `limit` caps upload-eligible items only; the excess is deferred to a later run.
//!
//! Transient upload failures are retried with exponential backoff up to the
//! configured attempt bound. A permanent failure (authorization, missing bucket)
//! cancels every item that has not started. Nothing is remembered between runs:
//! the next invocation re-classifies from the store and the canonical tree.

use crate::db::{load_remote_refs, upsert_remote_url};
use crate::error::{AssetError, AssetResult};
use crate::models::{AssetRole, CandidateFile, MaterialRegistry, MigrationItem, MigrationOutcome, MigrationReport};
use crate::services::canonical_tree::CanonicalTree;
use crate::services::health_checker::HealthChecker;
use crate::services::object_store::{ObjectStore, StoreError};
use crate::services::resolver::{RegenerationRequest, RegenerationSink};
use crate::services::slug::SlugIndex;
use crate::utils::{retry_with_backoff, BackoffPolicy};
use futures::stream::{self, StreamExt};
use governor::{Quota, RateLimiter};
use matmap_common::config::MigrateSettings;
use sqlx::SqlitePool;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Options for one migrate invocation
#[derive(Debug, Clone)]
pub struct MigrateOptions {
    pub dry_run: bool,
    pub limit: Option<usize>,
    /// Roles to migrate; empty means all
    pub roles: Vec<AssetRole>,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            limit: None,
            roles: AssetRole::ALL.to_vec(),
        }
    }
}

/// Object key for an item
pub fn object_key(entity_group: &str, material_id: i64, role: AssetRole, file_name: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        entity_group.trim_matches('/'),
        material_id,
        role.as_str(),
        file_name
    )
}

/// Upload-eligible item
#[derive(Debug, Clone)]
struct UploadJob {
    material_id: i64,
    material_name: String,
    role: AssetRole,
    file: CandidateFile,
    key: String,
}

impl UploadJob {
    fn finish(self, outcome: MigrationOutcome) -> MigrationItem {
        MigrationItem {
            material_id: self.material_id,
            material_name: self.material_name,
            role: self.role,
            outcome,
        }
    }
}

pub struct BatchMigrator {
    pool: SqlitePool,
    tree: CanonicalTree,
    entity_group: String,
    settings: MigrateSettings,
    checker: HealthChecker,
    sink: Arc<dyn RegenerationSink>,
}

impl BatchMigrator {
    pub fn new(
        pool: SqlitePool,
        tree: CanonicalTree,
        entity_group: impl Into<String>,
        settings: MigrateSettings,
        checker: HealthChecker,
        sink: Arc<dyn RegenerationSink>,
    ) -> Self {
        Self {
            pool,
            tree,
            entity_group: entity_group.into(),
            settings,
            checker,
            sink,
        }
    }

    /// Classify every item and, unless dry-running, upload the eligible ones
    ///
    /// `store` may be `None` only for dry runs.
    pub async fn run(
        &self,
        registry: &MaterialRegistry,
        store: Option<Arc<dyn ObjectStore>>,
        options: &MigrateOptions,
    ) -> AssetResult<MigrationReport> {
        let start = Instant::now();
        let remote_refs = load_remote_refs(&self.pool).await?;
        let slugs = SlugIndex::build(&registry.entities);

        let mut roles = if options.roles.is_empty() {
            AssetRole::ALL.to_vec()
        } else {
            options.roles.clone()
        };
        roles.sort();
        roles.dedup();

        let mut entities: Vec<_> = registry.entities.iter().collect();
        entities.sort_by_key(|e| e.id);

        let mut report = MigrationReport {
            dry_run: options.dry_run,
            ..Default::default()
        };
        let mut jobs = Vec::new();

        for entity in entities {
            for role in &roles {
                let role = *role;
                let name = entity.canonical_name().to_string();

                if let Some(url) = remote_refs.get(entity.id, role) {
                    tracing::info!(material_id = entity.id, role = %role, "Skipped: already migrated");
                    report.items.push(MigrationItem {
                        material_id: entity.id,
                        material_name: name,
                        role,
                        outcome: MigrationOutcome::SkippedAlreadyMigrated { url: url.to_string() },
                    });
                    continue;
                }

                let file = slugs
                    .unique_slug(entity.id)
                    .and_then(|slug| self.tree.current(slug, role));
                let Some(file) = file else {
                    tracing::debug!(material_id = entity.id, role = %role, "Skipped: no canonical file");
                    report.items.push(MigrationItem {
                        material_id: entity.id,
                        material_name: name,
                        role,
                        outcome: MigrationOutcome::SkippedMissing,
                    });
                    continue;
                };

                // Only healthy files may become remote references
                let health = self.checker.check_async(&file.path).await;
                if !health.is_healthy() {
                    tracing::warn!(
                        material_id = entity.id,
                        role = %role,
                        path = %file.path.display(),
                        verdict = health.verdict.as_str(),
                        "Skipped: canonical image unhealthy"
                    );
                    if !options.dry_run {
                        self.sink.request_regeneration(RegenerationRequest {
                            material_id: entity.id,
                            material_name: name.clone(),
                            role,
                            path: file.path.clone(),
                            verdict: health.verdict,
                        });
                    }
                    report.items.push(MigrationItem {
                        material_id: entity.id,
                        material_name: name,
                        role,
                        outcome: MigrationOutcome::SkippedUnhealthy {
                            verdict: health.verdict.as_str().to_string(),
                        },
                    });
                    continue;
                }

                if options.limit.is_some_and(|limit| jobs.len() >= limit) {
                    report.deferred += 1;
                    continue;
                }

                let file_name = file
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| role.url_file(file.extension));
                jobs.push(UploadJob {
                    material_id: entity.id,
                    material_name: name,
                    role,
                    key: object_key(&self.entity_group, entity.id, role, &file_name),
                    file,
                });
            }
        }

        if report.deferred > 0 {
            tracing::info!(deferred = report.deferred, "Eligible items beyond --limit deferred");
        }

        if options.dry_run {
            for job in jobs {
                tracing::info!(
                    material_id = job.material_id,
                    role = %job.role,
                    key = %job.key,
                    "Would migrate"
                );
                let key = job.key.clone();
                report.items.push(job.finish(MigrationOutcome::WouldMigrate { key }));
            }
        } else if !jobs.is_empty() {
            let store = store.ok_or_else(|| {
                AssetError::Configuration("Remote store required for migration".to_string())
            })?;
            let (items, attempts) = self.upload_all(store, jobs).await;
            report.items.extend(items);
            report.upload_attempts = attempts;
        }

        report
            .items
            .sort_by(|a, b| (a.material_id, a.role).cmp(&(b.material_id, b.role)));
        report.duration_ms = start.elapsed().as_millis() as u64;

        tracing::info!("Migration complete: {}", report.display_string());
        Ok(report)
    }

    async fn upload_all(
        &self,
        store: Arc<dyn ObjectStore>,
        jobs: Vec<UploadJob>,
    ) -> (Vec<MigrationItem>, usize) {
        let limiter: Arc<DirectLimiter> = Arc::new(RateLimiter::direct(Quota::per_second(
            NonZeroU32::new(self.settings.rate_per_sec).unwrap_or(NonZeroU32::MIN),
        )));
        let cancel = CancellationToken::new();
        let policy = BackoffPolicy::new(self.settings.max_attempts, self.settings.initial_backoff);
        let attempt_timeout = self.settings.attempt_timeout;

        let results: Vec<(MigrationItem, u32)> = stream::iter(jobs)
            .map(|job| {
                let store = store.clone();
                let limiter = limiter.clone();
                let cancel = cancel.clone();
                let pool = self.pool.clone();

                async move {
                    let content_type = job.file.extension.content_type();
                    let (result, attempts) = retry_with_backoff(
                        "object upload",
                        policy,
                        |e: &AttemptError| matches!(e, AttemptError::Store(StoreError::Transient(_))),
                        |_attempt| {
                            let store = store.clone();
                            let limiter = limiter.clone();
                            let cancel = cancel.clone();
                            let key = job.key.clone();
                            let path = job.file.path.clone();
                            async move {
                                if cancel.is_cancelled() {
                                    return Err(AttemptError::Aborted);
                                }
                                limiter.until_ready().await;
                                upload_once(store.as_ref(), &key, &path, content_type, attempt_timeout)
                                    .await
                                    .map_err(AttemptError::Store)
                            }
                        },
                    )
                    .await;

                    let outcome = match result {
                        Ok(url) => match upsert_remote_url(&pool, job.material_id, job.role, &url).await {
                            Ok(()) => {
                                tracing::info!(
                                    material_id = job.material_id,
                                    role = %job.role,
                                    url = %url,
                                    "Migrated"
                                );
                                MigrationOutcome::Migrated { url }
                            }
                            Err(e) => {
                                tracing::error!(
                                    material_id = job.material_id,
                                    role = %job.role,
                                    "Uploaded but URL write-back failed: {}",
                                    e
                                );
                                MigrationOutcome::Failed {
                                    error: format!("write-back failed: {}", e),
                                }
                            }
                        },
                        Err(AttemptError::Aborted) => {
                            tracing::debug!(material_id = job.material_id, role = %job.role, "Aborted");
                            MigrationOutcome::Aborted
                        }
                        Err(AttemptError::Store(e @ StoreError::Permanent(_))) => {
                            tracing::error!(
                                material_id = job.material_id,
                                role = %job.role,
                                "Permanent upload failure, aborting remaining items: {}",
                                e
                            );
                            cancel.cancel();
                            MigrationOutcome::Failed {
                                error: e.to_string(),
                            }
                        }
                        Err(AttemptError::Store(e)) => {
                            tracing::warn!(
                                material_id = job.material_id,
                                role = %job.role,
                                attempts,
                                "Upload failed: {}",
                                e
                            );
                            MigrationOutcome::Failed {
                                error: e.to_string(),
                            }
                        }
                    };

                    // The aborted check itself is not an upload
                    let attempts = if outcome == MigrationOutcome::Aborted {
                        attempts.saturating_sub(1)
                    } else {
                        attempts
                    };
                    (job.finish(outcome), attempts)
                }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let attempts = results.iter().map(|(_, n)| *n as usize).sum();
        (results.into_iter().map(|(item, _)| item).collect(), attempts)
    }
}

/// Why a single attempt did not produce a URL
#[derive(Debug)]
enum AttemptError {
    Store(StoreError),
    /// Batch cancelled by a permanent failure elsewhere
    Aborted,
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Store(e) => e.fmt(f),
            AttemptError::Aborted => f.write_str("batch aborted"),
        }
    }
}

/// One upload attempt bounded by `timeout`
async fn upload_once(
    store: &dyn ObjectStore,
    key: &str,
    path: &Path,
    content_type: &str,
    timeout: std::time::Duration,
) -> Result<String, StoreError> {
    match tokio::time::timeout(timeout, store.put_object(key, path, content_type)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Transient(format!(
            "upload timed out after {:?}",
            timeout
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(
            object_key("materials", 42, AssetRole::Space, "space.png"),
            "materials/42/space/space.png"
        );
        assert_eq!(
            object_key("/materials/", 1, AssetRole::Primary, "primary.jpg"),
            "materials/1/primary/primary.jpg"
        );
    }

    #[test]
    fn test_default_options_cover_all_roles() {
        let options = MigrateOptions::default();
        assert!(!options.dry_run);
        assert_eq!(options.roles, AssetRole::ALL.to_vec());
    }
}
