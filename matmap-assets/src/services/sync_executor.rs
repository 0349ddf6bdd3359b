//! Inbox → canonical tree synchronization
//!
//! **Pass:**
//! 1. Scan and classify inbox file names
//! 2. Resolve each distinct token to an identity (entity matcher, or the raw token)
//! 3. Map identity → slug; conflicting or unusable names are skipped
//! 4. Group candidates by destination (slug, role) and arbitrate to one file
//! 5. Digest the chosen source and compare with the destination
//! 6. Create, overwrite or skip; remove stale siblings with other extensions
//!
//! A second pass over an unchanged inbox writes nothing. There is no retry
//! state: rerunning the pass is the retry.

use crate::error::{AssetError, AssetResult};
use crate::models::{AssetRole, CandidateFile, SyncAction, SyncItem, SyncOutcome, SyncReport};
use crate::services::canonical_tree::CanonicalTree;
use crate::services::content_hasher::files_identical;
use crate::services::entity_matcher::{EntityMatcher, MatchMode, MatchOutcome};
use crate::services::extension_arbiter;
use crate::services::inbox_scanner::{FileShape, InboxScanner};
use crate::services::slug::{slugify, Slug, SlugEntry, SlugIndex};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Options for one sync pass
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub match_mode: MatchMode,
    pub workers: usize,
    pub item_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            match_mode: MatchMode::Registry,
            workers: 4,
            item_timeout: Duration::from_secs(30),
        }
    }
}

/// Identity of a token after matching
enum Identity {
    Resolved(Slug),
    Skip(SyncOutcome),
}

/// One destination with its winning source
struct SyncJob {
    slug: Slug,
    role: AssetRole,
    source: CandidateFile,
}

/// Temp file used while writing `dest`; lives next to it so the rename is atomic
fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.matmap-tmp", name))
}

pub struct SyncExecutor {
    inbox_root: PathBuf,
    tree: CanonicalTree,
}

impl SyncExecutor {
    pub fn new(inbox_root: impl Into<PathBuf>, tree: CanonicalTree) -> Self {
        Self {
            inbox_root: inbox_root.into(),
            tree,
        }
    }

    /// Run one pass
    ///
    /// Only a missing or unreadable inbox is an error; every per-item failure
    /// ends up in the report.
    pub async fn run(&self, matcher: &EntityMatcher, options: &SyncOptions) -> AssetResult<SyncReport> {
        let start = Instant::now();
        let inbox_root = self.inbox_root.clone();
        let scan = tokio::task::spawn_blocking(move || InboxScanner::new().scan(&inbox_root))
            .await
            .map_err(|e| AssetError::Common(matmap_common::Error::Internal(format!("Inbox scan task failed: {}", e))))?
            .map_err(|e| AssetError::Configuration(e.to_string()))?;

        tracing::info!(
            inbox = %self.inbox_root.display(),
            files = scan.files.len(),
            dry_run = options.dry_run,
            "Sync pass started"
        );
        for err in &scan.errors {
            tracing::warn!("Inbox entry unreadable: {}", err);
        }

        let mut report = SyncReport {
            dry_run: options.dry_run,
            ..Default::default()
        };

        let slugs = match options.match_mode {
            MatchMode::Registry => SlugIndex::build(matcher.entities()),
            MatchMode::Disabled => SlugIndex::default(),
        };
        let mut identities: HashMap<String, Identity> = match options.match_mode {
            MatchMode::Registry => HashMap::new(),
            MatchMode::Disabled => {
                raw_slug_conflicts(scan.files.iter().filter_map(|f| f.to_candidate()).map(|c| c.token))
            }
        };
        let mut groups: BTreeMap<(Slug, AssetRole), Vec<CandidateFile>> = BTreeMap::new();

        for file in &scan.files {
            let file_name = file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            if let FileShape::Unrecognized { reason } = &file.shape {
                report.items.push(SyncItem {
                    source: file.path.clone(),
                    token: file_name,
                    role: None,
                    destination: None,
                    outcome: SyncOutcome::SkippedMalformedName {
                        reason: reason.clone(),
                    },
                });
                continue;
            }
            let Some(candidate) = file.to_candidate() else {
                continue;
            };

            let identity = identities
                .entry(candidate.token.clone())
                .or_insert_with(|| resolve_identity(matcher, &slugs, options.match_mode, &candidate.token));

            match identity {
                Identity::Resolved(slug) => {
                    groups
                        .entry((slug.clone(), candidate.role))
                        .or_default()
                        .push(candidate);
                }
                Identity::Skip(outcome) => {
                    report.items.push(SyncItem {
                        source: candidate.path.clone(),
                        token: candidate.token.clone(),
                        role: Some(candidate.role),
                        destination: None,
                        outcome: outcome.clone(),
                    });
                }
            }
        }

        let mut jobs = Vec::with_capacity(groups.len());
        for ((slug, role), candidates) in groups {
            let Some((winner, losers)) = extension_arbiter::partition(candidates) else {
                continue;
            };
            for loser in &losers {
                tracing::debug!(
                    superseded = %loser.path.display(),
                    by = %winner.path.display(),
                    "Candidate lost extension arbitration"
                );
            }
            report.superseded += losers.len();
            jobs.push(SyncJob {
                slug,
                role,
                source: winner,
            });
        }

        let dry_run = options.dry_run;
        let item_timeout = options.item_timeout;
        let results: Vec<(SyncItem, usize)> = stream::iter(jobs)
            .map(|job| {
                let tree = self.tree.clone();
                async move {
                    let dest = tree.path_for(&job.slug, job.role, job.source.extension);
                    let work = sync_destination(&tree, &job, &dest, dry_run);
                    let (outcome, removed) = run_with_timeout(item_timeout, &dest, work).await;

                    (
                        SyncItem {
                            source: job.source.path.clone(),
                            token: job.source.token.clone(),
                            role: Some(job.role),
                            destination: Some(dest),
                            outcome,
                        },
                        removed,
                    )
                }
            })
            .buffer_unordered(options.workers.max(1))
            .collect()
            .await;

        for (item, removed) in results {
            report.stale_removed += removed;
            report.items.push(item);
        }

        report.items.sort_by(|a, b| a.source.cmp(&b.source));
        for item in &report.items {
            log_item(item);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!("Sync pass complete: {}", report.display_string());
        Ok(report)
    }
}

/// Raw-token mode: distinct tokens sharing one slug are skipped, never merged
fn raw_slug_conflicts(tokens: impl IntoIterator<Item = String>) -> HashMap<String, Identity> {
    let mut by_slug: BTreeMap<Slug, BTreeSet<String>> = BTreeMap::new();
    for token in tokens {
        if let Ok(slug) = slugify(&token) {
            by_slug.entry(slug).or_default().insert(token);
        }
    }

    let mut conflicts = HashMap::new();
    for (slug, tokens) in by_slug.into_iter().filter(|(_, tokens)| tokens.len() > 1) {
        tracing::warn!(slug = %slug, tokens = ?tokens, "Inbox names collide on one slug");
        for token in tokens {
            conflicts.insert(
                token,
                Identity::Skip(SyncOutcome::SkippedNameConflict {
                    slug: slug.to_string(),
                    entity_ids: Vec::new(),
                }),
            );
        }
    }
    conflicts
}

/// Run one destination under the item timeout; an error or timeout fails this item only
async fn run_with_timeout<F>(item_timeout: Duration, dest: &Path, work: F) -> (SyncOutcome, usize)
where
    F: Future<Output = AssetResult<(SyncOutcome, usize)>>,
{
    match tokio::time::timeout(item_timeout, work).await {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => (SyncOutcome::Failed { error: e.to_string() }, 0),
        Err(_) => {
            // The interrupted copy may have left its temp file
            let _ = tokio::fs::remove_file(temp_path_for(dest)).await;
            (
                SyncOutcome::Failed {
                    error: AssetError::Timeout(item_timeout).to_string(),
                },
                0,
            )
        }
    }
}

fn resolve_identity(
    matcher: &EntityMatcher,
    slugs: &SlugIndex,
    mode: MatchMode,
    token: &str,
) -> Identity {
    if mode == MatchMode::Disabled {
        return match slugify(token) {
            Ok(slug) => Identity::Resolved(slug),
            Err(e) => Identity::Skip(SyncOutcome::SkippedMalformedName {
                reason: e.to_string(),
            }),
        };
    }

    match matcher.match_token(token) {
        MatchOutcome::Matched { entity, tier } => {
            tracing::debug!(token, material_id = entity.id, tier = ?tier, "Token matched");
            match slugs.entry(entity.id) {
                Some(SlugEntry::Unique(slug)) => Identity::Resolved(slug.clone()),
                Some(SlugEntry::Conflict(conflict)) => Identity::Skip(SyncOutcome::SkippedNameConflict {
                    slug: conflict.slug.to_string(),
                    entity_ids: conflict.entity_ids.clone(),
                }),
                Some(SlugEntry::Invalid(e)) => Identity::Skip(SyncOutcome::SkippedMalformedName {
                    reason: format!("entity {} name unusable: {}", entity.id, e),
                }),
                None => Identity::Skip(SyncOutcome::SkippedMalformedName {
                    reason: format!("entity {} has no slug", entity.id),
                }),
            }
        }
        MatchOutcome::Unmatched => Identity::Skip(SyncOutcome::SkippedUnmatched {
            reason: AssetError::MatchMiss(token.to_string()).to_string(),
        }),
        MatchOutcome::Ambiguous(ids) => Identity::Skip(SyncOutcome::SkippedUnmatched {
            reason: format!("'{}' is ambiguous between entities {:?}", token, ids),
        }),
        MatchOutcome::Dangling { material_id } => {
            Identity::Skip(SyncOutcome::SkippedMissingRegistryEntry { material_id })
        }
    }
}

/// Bring one destination in line with its source
///
/// Returns the outcome and the number of stale siblings removed.
async fn sync_destination(
    tree: &CanonicalTree,
    job: &SyncJob,
    dest: &Path,
    dry_run: bool,
) -> AssetResult<(SyncOutcome, usize)> {
    let action = if tokio::fs::try_exists(dest).await? {
        if files_identical(&job.source.path, dest).await? {
            None
        } else {
            Some(SyncAction::Overwritten)
        }
    } else {
        Some(SyncAction::Created)
    };

    if dry_run {
        return Ok((
            match action {
                Some(action) => SyncOutcome::WouldWrite { action },
                None => SyncOutcome::SkippedSame,
            },
            0,
        ));
    }

    if action.is_some() {
        write_atomically(&job.source.path, dest).await?;
    }
    // Destination is written; cleanup errors only warn
    let stale = tree.existing(&job.slug, job.role).into_iter().map(|f| f.path);
    let removed = remove_stale_siblings(stale, dest).await;

    Ok((
        match action {
            Some(action) => SyncOutcome::Synced { action },
            None => SyncOutcome::SkippedSame,
        },
        removed,
    ))
}

/// Copy to a temp file beside `dest`, then rename over it
async fn write_atomically(source: &Path, dest: &Path) -> AssetResult<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = temp_path_for(dest);
    let result = async {
        tokio::fs::copy(source, &tmp).await?;
        tokio::fs::rename(&tmp, dest).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Remove same-role files with other extensions so one file per destination remains
///
/// Returns how many were removed. A sibling that cannot be removed is logged and left.
async fn remove_stale_siblings(siblings: impl IntoIterator<Item = PathBuf>, dest: &Path) -> usize {
    let mut removed = 0;
    for sibling in siblings {
        if sibling.as_path() == dest {
            continue;
        }
        match tokio::fs::remove_file(&sibling).await {
            Ok(()) => {
                tracing::info!(removed = %sibling.display(), kept = %dest.display(), "Removed stale sibling");
                removed += 1;
            }
            Err(e) => tracing::warn!(
                sibling = %sibling.display(),
                kept = %dest.display(),
                "Failed to remove stale sibling: {}",
                e
            ),
        }
    }
    removed
}

fn log_item(item: &SyncItem) {
    let classification = item.outcome.label();
    let role = item.role.map(|r| r.as_str()).unwrap_or("-");
    let destination = item
        .destination
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_default();
    match &item.outcome {
        SyncOutcome::Failed { error } => tracing::warn!(
            classification,
            role,
            source = %item.source.display(),
            destination = %destination,
            error = %error,
            "Sync item failed"
        ),
        SyncOutcome::SkippedUnmatched { reason } | SyncOutcome::SkippedMalformedName { reason } => {
            tracing::info!(
                classification,
                role,
                source = %item.source.display(),
                reason = %reason,
                "Sync item skipped"
            )
        }
        _ => tracing::info!(
            classification,
            role,
            source = %item.source.display(),
            destination = %destination,
            "Sync item"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_is_hidden_sibling() {
        let tmp = temp_path_for(Path::new("/srv/img/Oak/uses/space.png"));
        assert_eq!(tmp, PathBuf::from("/srv/img/Oak/uses/.space.png.matmap-tmp"));
    }

    #[test]
    fn test_raw_slug_conflicts_cover_every_colliding_token() {
        let conflicts = raw_slug_conflicts(
            ["Foo", "Foo_", "Bar", "Foo"].into_iter().map(String::from),
        );
        assert_eq!(conflicts.len(), 2);
        for token in ["Foo", "Foo_"] {
            match conflicts.get(token) {
                Some(Identity::Skip(SyncOutcome::SkippedNameConflict { slug, entity_ids })) => {
                    assert_eq!(slug, "Foo");
                    assert!(entity_ids.is_empty());
                }
                _ => panic!("{} should be a name conflict", token),
            }
        }
        assert!(!conflicts.contains_key("Bar"));
    }

    #[tokio::test]
    async fn test_item_timeout_fails_only_that_item() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("primary.jpg");
        std::fs::write(temp_path_for(&dest), b"partial").unwrap();

        let (outcome, removed) = run_with_timeout(
            Duration::from_millis(20),
            &dest,
            std::future::pending::<AssetResult<(SyncOutcome, usize)>>(),
        )
        .await;

        match outcome {
            SyncOutcome::Failed { error } => assert!(error.starts_with("Timed out after"), "{}", error),
            other => panic!("expected failed, got {:?}", other),
        }
        assert_eq!(removed, 0);
        assert!(!temp_path_for(&dest).exists(), "temp file should be cleaned up");
    }

    #[tokio::test]
    async fn test_item_error_becomes_failed_outcome() {
        let (outcome, _) = run_with_timeout(Duration::from_secs(5), Path::new("/nonexistent/primary.jpg"), async {
            Err(AssetError::Decode("bad bytes".into()))
        })
        .await;
        assert_eq!(outcome.label(), "failed");
    }

    #[tokio::test]
    async fn test_unremovable_sibling_is_not_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("primary.jpg");
        let stale = dir.path().join("primary.png");
        let vanished = dir.path().join("primary.webp");
        std::fs::write(&dest, b"new").unwrap();
        std::fs::write(&stale, b"old").unwrap();

        let removed = remove_stale_siblings(vec![dest.clone(), vanished, stale.clone()], &dest).await;

        assert_eq!(removed, 1);
        assert!(dest.exists());
        assert!(!stale.exists());
    }
}
