//! Data models for matmap-assets

pub mod asset;
pub mod material;
pub mod migration_report;
pub mod sync_report;
pub mod verify_report;

pub use asset::{AssetRole, CandidateFile, ImageExtension};
pub use material::{MaterialEntity, MaterialRegistry};
pub use migration_report::{MigrationItem, MigrationOutcome, MigrationReport};
pub use sync_report::{SyncAction, SyncItem, SyncOutcome, SyncReport};
pub use verify_report::{VerifyItem, VerifyReport};

/// Render a two-column count table
///
/// ```text
/// sync summary
/// -------------------------
/// synced                  2
/// skipped-same            1
/// ```
pub(crate) fn render_table(title: &str, rows: &[(String, usize)]) -> String {
    let label_width = rows
        .iter()
        .map(|(label, _)| label.chars().count())
        .max()
        .unwrap_or(0)
        .max(title.chars().count());
    let mut out = String::new();
    out.push_str(title);
    out.push('\n');
    out.push_str(&"-".repeat(label_width + 8));
    out.push('\n');
    for (label, count) in rows {
        out.push_str(&format!("{:<width$} {:>7}\n", label, count, width = label_width));
    }
    out
}
