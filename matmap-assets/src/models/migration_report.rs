//! Batch migration results

use super::{render_table, AssetRole};
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-item classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "classification", rename_all = "snake_case")]
pub enum MigrationOutcome {
    SkippedAlreadyMigrated { url: String },
    SkippedMissing,
    /// The canonical file failed the health check and was not uploaded
    SkippedUnhealthy { verdict: String },
    /// Dry run: the key the upload would use
    WouldMigrate { key: String },
    Migrated { url: String },
    Failed { error: String },
    /// Not attempted because a permanent failure stopped the batch
    Aborted,
}

impl MigrationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            MigrationOutcome::SkippedAlreadyMigrated { .. } => "skipped-already-migrated",
            MigrationOutcome::SkippedMissing => "skipped-missing",
            MigrationOutcome::SkippedUnhealthy { .. } => "skipped-unhealthy",
            MigrationOutcome::WouldMigrate { .. } => "would-migrate",
            MigrationOutcome::Migrated { .. } => "migrated",
            MigrationOutcome::Failed { .. } => "failed",
            MigrationOutcome::Aborted => "aborted",
        }
    }
}

/// One (material, role) migration item
#[derive(Debug, Clone, Serialize)]
pub struct MigrationItem {
    pub material_id: i64,
    pub material_name: String,
    pub role: AssetRole,
    pub outcome: MigrationOutcome,
}

/// Result of one migrate invocation
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub items: Vec<MigrationItem>,
    /// Upload-eligible items left for a later run by `--limit`
    pub deferred: usize,
    /// Upload attempts made, retries included
    pub upload_attempts: usize,
    pub duration_ms: u64,
}

impl MigrationReport {
    pub fn count(&self, label: &str) -> usize {
        self.items
            .iter()
            .filter(|i| i.outcome.label() == label)
            .count()
    }

    pub fn counts_by_classification(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            *counts.entry(item.outcome.label()).or_insert(0) += 1;
        }
        counts
    }

    pub fn was_aborted(&self) -> bool {
        self.count("aborted") > 0
    }

    pub fn display_string(&self) -> String {
        if self.dry_run {
            format!(
                "{} would migrate, {} already migrated, {} missing, {} unhealthy, {} deferred",
                self.count("would-migrate"),
                self.count("skipped-already-migrated"),
                self.count("skipped-missing"),
                self.count("skipped-unhealthy"),
                self.deferred
            )
        } else {
            format!(
                "{} migrated, {} already migrated, {} missing, {} unhealthy, {} failed, {} aborted, {} deferred",
                self.count("migrated"),
                self.count("skipped-already-migrated"),
                self.count("skipped-missing"),
                self.count("skipped-unhealthy"),
                self.count("failed"),
                self.count("aborted"),
                self.deferred
            )
        }
    }

    pub fn summary_table(&self) -> String {
        let mut rows: Vec<(String, usize)> = self
            .counts_by_classification()
            .into_iter()
            .map(|(label, n)| (label.to_string(), n))
            .collect();
        rows.push(("deferred".to_string(), self.deferred));
        if !self.dry_run {
            rows.push(("upload-attempts".to_string(), self.upload_attempts));
        }
        let title = if self.dry_run {
            "migrate summary (dry run)"
        } else {
            "migrate summary"
        };
        render_table(title, &rows)
    }
}
