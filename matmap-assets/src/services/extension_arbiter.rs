//! Extension arbitration
//!
//! Picks the single authoritative file among candidates for one destination.
//! Encoding priority dominates recency: a `jpg` beats a newer `webp`.

use crate::models::CandidateFile;
use std::cmp::Ordering;

/// Ordering where the preferred candidate sorts first
fn preference(a: &CandidateFile, b: &CandidateFile) -> Ordering {
    a.extension
        .priority()
        .cmp(&b.extension.priority())
        // newest first
        .then_with(|| b.modified.cmp(&a.modified))
        .then_with(|| a.path.cmp(&b.path))
}

/// Select the winning candidate, `None` for an empty set
pub fn arbitrate(candidates: &[CandidateFile]) -> Option<&CandidateFile> {
    candidates.iter().min_by(|a, b| preference(a, b))
}

/// Split candidates into the winner and the superseded rest
pub fn partition(mut candidates: Vec<CandidateFile>) -> Option<(CandidateFile, Vec<CandidateFile>)> {
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(preference);
    let winner = candidates.remove(0);
    Some((winner, candidates))
}
