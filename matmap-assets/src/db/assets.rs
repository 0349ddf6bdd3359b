//! Remote reference persistence (`material_assets`)

use crate::models::AssetRole;
use crate::utils::retry_on_lock;
use matmap_common::db::{get_setting_i64, MaterialAssetRow};
use matmap_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;

/// Non-empty remote URLs keyed by (material id, role)
#[derive(Debug, Clone, Default)]
pub struct RemoteRefs {
    urls: HashMap<(i64, AssetRole), String>,
}

impl RemoteRefs {
    pub fn get(&self, material_id: i64, role: AssetRole) -> Option<&str> {
        self.urls.get(&(material_id, role)).map(String::as_str)
    }

    pub fn insert(&mut self, material_id: i64, role: AssetRole, url: impl Into<String>) {
        self.urls.insert((material_id, role), url.into());
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Load every recorded remote reference
///
/// Blank URLs count as absent. Rows with an unknown role are skipped.
pub async fn load_remote_refs(pool: &SqlitePool) -> Result<RemoteRefs> {
    let rows: Vec<MaterialAssetRow> =
        sqlx::query_as("SELECT material_id, role, url FROM material_assets")
            .fetch_all(pool)
            .await?;

    let mut refs = RemoteRefs::default();
    for row in rows {
        let Some(url) = row.url.filter(|u| !u.trim().is_empty()) else {
            continue;
        };
        match row.role.parse::<AssetRole>() {
            Ok(role) => refs.insert(row.material_id, role, url.trim()),
            Err(e) => tracing::warn!(material_id = row.material_id, "Skipping asset row: {}", e),
        }
    }
    Ok(refs)
}

/// Remote reference for one item, blank treated as absent
pub async fn get_remote_url(
    pool: &SqlitePool,
    material_id: i64,
    role: AssetRole,
) -> Result<Option<String>> {
    let url: Option<Option<String>> =
        sqlx::query_scalar("SELECT url FROM material_assets WHERE material_id = ? AND role = ?")
            .bind(material_id)
            .bind(role.as_str())
            .fetch_optional(pool)
            .await?;

    Ok(url
        .flatten()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty()))
}

/// Record the remote URL for one item (last write wins)
///
/// Retried on lock contention for up to the `db_max_lock_wait_ms` setting.
pub async fn upsert_remote_url(
    pool: &SqlitePool,
    material_id: i64,
    role: AssetRole,
    url: &str,
) -> Result<()> {
    let max_wait_ms = get_setting_i64(pool, "db_max_lock_wait_ms", 5000).await?;

    retry_on_lock("remote url write-back", max_wait_ms.max(0) as u64, || async {
        sqlx::query(
            r#"
            INSERT INTO material_assets (material_id, role, url, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(material_id, role) DO UPDATE SET
                url = excluded.url,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(material_id)
        .bind(role.as_str())
        .bind(url)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await?;

    tracing::debug!(material_id, role = %role, url, "Recorded remote reference");
    Ok(())
}
