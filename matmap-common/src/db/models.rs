//! Database models

use serde::{Deserialize, Serialize};

/// Row of the `materials` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MaterialRow {
    pub id: i64,
    pub name: String,
    pub name_official: Option<String>,
}

/// Row of the `material_aliases` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MaterialAliasRow {
    pub material_id: i64,
    pub alias: String,
}

/// Row of the `material_assets` table (one per material and role)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MaterialAssetRow {
    pub material_id: i64,
    pub role: String,
    pub url: Option<String>,
}
