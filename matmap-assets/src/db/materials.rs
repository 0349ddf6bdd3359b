//! Material registry loading

use crate::models::{MaterialEntity, MaterialRegistry};
use matmap_common::db::{MaterialAliasRow, MaterialRow};
use matmap_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;

/// Load every material with its aliases
///
/// Alias rows pointing at a missing material are kept separately so the matcher
/// can report them instead of silently dropping the hit.
pub async fn load_registry(pool: &SqlitePool) -> Result<MaterialRegistry> {
    let rows: Vec<MaterialRow> =
        sqlx::query_as("SELECT id, name, name_official FROM materials ORDER BY id")
            .fetch_all(pool)
            .await?;

    let aliases: Vec<MaterialAliasRow> = sqlx::query_as(
        "SELECT material_id, alias FROM material_aliases ORDER BY material_id, alias",
    )
    .fetch_all(pool)
    .await?;

    let mut by_id: HashMap<i64, Vec<String>> = HashMap::new();
    for row in aliases {
        by_id.entry(row.material_id).or_default().push(row.alias);
    }

    let mut entities = Vec::with_capacity(rows.len());
    for row in rows {
        entities.push(MaterialEntity {
            id: row.id,
            name: row.name,
            name_official: row.name_official,
            aliases: by_id.remove(&row.id).unwrap_or_default(),
        });
    }

    // Whatever is left has no material row
    let mut orphan_aliases: Vec<(i64, String)> = by_id
        .into_iter()
        .flat_map(|(id, aliases)| aliases.into_iter().map(move |a| (id, a)))
        .collect();
    orphan_aliases.sort();

    if !orphan_aliases.is_empty() {
        tracing::warn!(
            count = orphan_aliases.len(),
            "Aliases reference materials that no longer exist"
        );
    }

    tracing::debug!(materials = entities.len(), "Loaded material registry");

    Ok(MaterialRegistry {
        entities,
        orphan_aliases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use matmap_common::db::create_schema;

    #[tokio::test]
    async fn test_load_registry_with_orphans() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();

        sqlx::query("INSERT INTO materials (id, name, name_official) VALUES (1, 'アルミ', 'Aluminum'), (2, 'Oak', NULL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO material_aliases (material_id, alias) VALUES (1, 'Alu'), (1, 'アルミニウム'), (7, 'Ghost')")
            .execute(&pool)
            .await
            .unwrap();

        let registry = load_registry(&pool).await.unwrap();
        assert_eq!(registry.entities.len(), 2);
        assert_eq!(registry.entities[0].aliases, vec!["Alu", "アルミニウム"]);
        assert_eq!(registry.entities[0].canonical_name(), "Aluminum");
        assert!(registry.entities[1].aliases.is_empty());
        assert_eq!(registry.orphan_aliases, vec![(7, "Ghost".to_string())]);
    }
}
