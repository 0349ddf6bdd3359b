//! Sync pass results

use super::{render_table, AssetRole};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What a write did (or would do) to the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Overwritten,
}

/// Per-item classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "classification", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced { action: SyncAction },
    /// Dry run: the write that would have happened
    WouldWrite { action: SyncAction },
    SkippedSame,
    SkippedUnmatched { reason: String },
    SkippedMalformedName { reason: String },
    SkippedMissingRegistryEntry { material_id: i64 },
    SkippedNameConflict { slug: String, entity_ids: Vec<i64> },
    Failed { error: String },
}

impl SyncOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SyncOutcome::Synced { .. } => "synced",
            SyncOutcome::WouldWrite { .. } => "would-write",
            SyncOutcome::SkippedSame => "skipped-same",
            SyncOutcome::SkippedUnmatched { .. } => "skipped-unmatched",
            SyncOutcome::SkippedMalformedName { .. } => "skipped-malformed-name",
            SyncOutcome::SkippedMissingRegistryEntry { .. } => "skipped-missing-registry-entry",
            SyncOutcome::SkippedNameConflict { .. } => "skipped-name-conflict",
            SyncOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_skip(&self) -> bool {
        self.label().starts_with("skipped")
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }
}

/// One classified sync item
#[derive(Debug, Clone, Serialize)]
pub struct SyncItem {
    /// Chosen source file (or the malformed/unmatched file itself)
    pub source: PathBuf,
    pub token: String,
    /// `None` when the file name could not be classified
    pub role: Option<AssetRole>,
    pub destination: Option<PathBuf>,
    pub outcome: SyncOutcome,
}

/// Result of one sync pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    pub items: Vec<SyncItem>,
    /// Candidates that lost extension arbitration
    pub superseded: usize,
    /// Stale sibling files removed from the canonical tree
    pub stale_removed: usize,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn count(&self, label: &str) -> usize {
        self.items
            .iter()
            .filter(|i| i.outcome.label() == label)
            .count()
    }

    pub fn synced_count(&self) -> usize {
        self.count("synced")
    }

    pub fn skipped_count(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_skip()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_failure()).count()
    }

    /// Items per classification label
    pub fn counts_by_classification(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            *counts.entry(item.outcome.label()).or_insert(0) += 1;
        }
        counts
    }

    /// Items per (role, classification); unclassified names count under `unknown`
    pub fn counts_by_role(&self) -> BTreeMap<(String, &'static str), usize> {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            let role = item
                .role
                .map(|r| r.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            *counts.entry((role, item.outcome.label())).or_insert(0) += 1;
        }
        counts
    }

    pub fn display_string(&self) -> String {
        let written = if self.dry_run {
            self.count("would-write")
        } else {
            self.synced_count()
        };
        format!(
            "{} {}, {} skipped, {} failed ({} items, {} superseded)",
            written,
            if self.dry_run { "would be written" } else { "synced" },
            self.skipped_count(),
            self.failed_count(),
            self.items.len(),
            self.superseded
        )
    }

    pub fn summary_table(&self) -> String {
        let mut rows: Vec<(String, usize)> = self
            .counts_by_classification()
            .into_iter()
            .map(|(label, n)| (label.to_string(), n))
            .collect();
        for ((role, label), n) in self.counts_by_role() {
            rows.push((format!("  {} / {}", role, label), n));
        }
        rows.push(("superseded".to_string(), self.superseded));
        if !self.dry_run {
            rows.push(("stale-removed".to_string(), self.stale_removed));
        }
        let title = if self.dry_run {
            "sync summary (dry run)"
        } else {
            "sync summary"
        };
        render_table(title, &rows)
    }
}
