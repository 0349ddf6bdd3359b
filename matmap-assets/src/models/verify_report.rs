//! Asset verification results

use super::{render_table, AssetRole};
use crate::services::health_checker::HealthVerdict;
use crate::services::resolver::ResolutionTier;
use serde::Serialize;

/// Verification result for one (material, role)
#[derive(Debug, Clone, Serialize)]
pub struct VerifyItem {
    pub material_id: i64,
    pub material_name: String,
    pub role: AssetRole,
    /// Winning tier, `None` when nothing resolved
    pub tier: Option<ResolutionTier>,
    pub locator: Option<String>,
    /// Verdict of the local canonical file, `None` when there is none
    pub local_health: Option<HealthVerdict>,
    /// HTTP status of the remote reference when `--check-remote` was requested
    pub remote_status: Option<u16>,
    pub remote_error: Option<String>,
}

impl VerifyItem {
    pub fn is_resolved(&self) -> bool {
        self.tier.is_some()
    }

    pub fn remote_ok(&self) -> bool {
        self.remote_error.is_none() && self.remote_status.map_or(true, |s| (200..300).contains(&s))
    }
}

/// Result of one verify run
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub items: Vec<VerifyItem>,
    pub strict: bool,
}

impl VerifyReport {
    pub fn unresolved(&self) -> impl Iterator<Item = &VerifyItem> {
        self.items.iter().filter(|i| !i.is_resolved())
    }

    pub fn unhealthy_local(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.local_health, Some(v) if v != HealthVerdict::Healthy))
            .count()
    }

    pub fn remote_failures(&self) -> usize {
        self.items.iter().filter(|i| !i.remote_ok()).count()
    }

    /// Strict mode fails on any item without a locator
    pub fn passed(&self) -> bool {
        !self.strict || self.unresolved().next().is_none()
    }

    pub fn summary_table(&self) -> String {
        let mut rows: Vec<(String, usize)> = Vec::new();
        for tier in ResolutionTier::ALL {
            let n = self.items.iter().filter(|i| i.tier == Some(tier)).count();
            rows.push((tier.as_str().to_string(), n));
        }
        rows.push(("absent".to_string(), self.unresolved().count()));
        rows.push(("unhealthy-local".to_string(), self.unhealthy_local()));
        rows.push(("remote-failures".to_string(), self.remote_failures()));
        render_table("verify summary", &rows)
    }
}
