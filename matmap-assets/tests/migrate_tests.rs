//! Batch migration against an in-memory registry and a scripted fake store

mod helpers;

use helpers::{insert_material, insert_remote_url, memory_pool, write_image, CollectingSink, FakeStore};
use image::ImageFormat;
use matmap_assets::db::{get_remote_url, load_registry};
use matmap_assets::models::{AssetRole, MigrationOutcome};
use matmap_assets::services::{
    BatchMigrator, CanonicalTree, HealthChecker, HealthVerdict, MigrateOptions, ObjectStore, StoreError,
};
use matmap_common::config::MigrateSettings;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn settings(concurrency: usize) -> MigrateSettings {
    MigrateSettings {
        concurrency,
        rate_per_sec: 1000,
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        attempt_timeout: Duration::from_secs(5),
    }
}

fn primary_only(dry_run: bool, limit: Option<usize>) -> MigrateOptions {
    MigrateOptions {
        dry_run,
        limit,
        roles: vec![AssetRole::Primary],
    }
}

/// Five materials, each with a canonical primary image
async fn five_materials(canonical: &TempDir) -> SqlitePool {
    let pool = memory_pool().await;
    for (id, name) in [(1, "Aluminum"), (2, "Brass"), (3, "Copper"), (4, "Granite"), (5, "Oak")] {
        insert_material(&pool, id, name, None).await;
        write_image(
            &canonical.path().join(name).join("primary.jpg"),
            120,
            ImageFormat::Jpeg,
        );
    }
    pool
}

fn migrator(pool: &SqlitePool, canonical: &TempDir, concurrency: usize) -> BatchMigrator {
    migrator_with_sink(pool, canonical, concurrency, Arc::new(CollectingSink::default()))
}

fn migrator_with_sink(
    pool: &SqlitePool,
    canonical: &TempDir,
    concurrency: usize,
    sink: Arc<CollectingSink>,
) -> BatchMigrator {
    BatchMigrator::new(
        pool.clone(),
        CanonicalTree::new(canonical.path()),
        "materials",
        settings(concurrency),
        HealthChecker::new(10.0, 64),
        sink,
    )
}

#[tokio::test]
async fn test_dry_run_classifies_without_store_calls() {
    let canonical = TempDir::new().unwrap();
    let pool = five_materials(&canonical).await;
    insert_remote_url(&pool, 2, "primary", "https://cdn.test/materials/2/primary/primary.jpg").await;
    insert_remote_url(&pool, 4, "primary", "https://cdn.test/materials/4/primary/primary.jpg").await;

    let store = Arc::new(FakeStore::new());
    let registry = load_registry(&pool).await.unwrap();
    let report = migrator(&pool, &canonical, 2)
        .run(&registry, Some(store.clone() as Arc<dyn ObjectStore>), &primary_only(true, None))
        .await
        .unwrap();

    assert_eq!(report.count("would-migrate"), 3);
    assert_eq!(report.count("skipped-already-migrated"), 2);
    assert!(store.calls().is_empty());
    assert_eq!(get_remote_url(&pool, 1, AssetRole::Primary).await.unwrap(), None);
    assert_eq!(
        report.items[0].outcome,
        MigrationOutcome::WouldMigrate {
            key: "materials/1/primary/primary.jpg".to_string()
        }
    );
}

#[tokio::test]
async fn test_second_run_uploads_nothing() {
    let canonical = TempDir::new().unwrap();
    let pool = five_materials(&canonical).await;
    let store = Arc::new(FakeStore::new());
    let registry = load_registry(&pool).await.unwrap();
    let migrator = migrator(&pool, &canonical, 2);

    let first = migrator
        .run(&registry, Some(store.clone() as Arc<dyn ObjectStore>), &primary_only(false, None))
        .await
        .unwrap();
    assert_eq!(first.count("migrated"), 5);
    assert_eq!(store.calls().len(), 5);
    assert_eq!(
        get_remote_url(&pool, 3, AssetRole::Primary).await.unwrap().as_deref(),
        Some("https://cdn.test/materials/3/primary/primary.jpg")
    );

    let second = migrator
        .run(&registry, Some(store.clone() as Arc<dyn ObjectStore>), &primary_only(false, None))
        .await
        .unwrap();
    assert_eq!(second.count("skipped-already-migrated"), 5);
    assert_eq!(store.calls().len(), 5);
}

#[tokio::test]
async fn test_missing_canonical_file_is_skipped() {
    let canonical = TempDir::new().unwrap();
    let pool = memory_pool().await;
    insert_material(&pool, 1, "Aluminum", None).await;
    write_image(
        &canonical.path().join("Aluminum").join("uses").join("space.png"),
        120,
        ImageFormat::Png,
    );

    let store = Arc::new(FakeStore::new());
    let registry = load_registry(&pool).await.unwrap();
    let report = migrator(&pool, &canonical, 1)
        .run(&registry, Some(store.clone() as Arc<dyn ObjectStore>), &MigrateOptions::default())
        .await
        .unwrap();

    assert_eq!(report.count("migrated"), 1);
    assert_eq!(report.count("skipped-missing"), 2);
    assert_eq!(store.calls(), vec!["materials/1/space/space.png".to_string()]);
}

#[tokio::test]
async fn test_limit_defers_excess_items() {
    let canonical = TempDir::new().unwrap();
    let pool = five_materials(&canonical).await;
    let store = Arc::new(FakeStore::new());
    let registry = load_registry(&pool).await.unwrap();
    let migrator = migrator(&pool, &canonical, 1);

    let first = migrator
        .run(&registry, Some(store.clone() as Arc<dyn ObjectStore>), &primary_only(false, Some(2)))
        .await
        .unwrap();
    assert_eq!(first.count("migrated"), 2);
    assert_eq!(first.deferred, 3);
    assert_eq!(store.calls().len(), 2);

    let rest = migrator
        .run(&registry, Some(store.clone() as Arc<dyn ObjectStore>), &primary_only(false, None))
        .await
        .unwrap();
    assert_eq!(rest.count("skipped-already-migrated"), 2);
    assert_eq!(rest.count("migrated"), 3);
    assert_eq!(store.calls().len(), 5);
}

#[tokio::test]
async fn test_permanent_failure_aborts_remaining_items() {
    let canonical = TempDir::new().unwrap();
    let pool = five_materials(&canonical).await;
    let store = Arc::new(FakeStore::new());
    store.fail_with(
        "materials/1/primary/primary.jpg",
        vec![StoreError::Permanent("AccessDenied".into())],
    );
    let registry = load_registry(&pool).await.unwrap();

    // One worker: items run strictly in order
    let report = migrator(&pool, &canonical, 1)
        .run(&registry, Some(store.clone() as Arc<dyn ObjectStore>), &primary_only(false, None))
        .await
        .unwrap();

    assert!(report.was_aborted());
    assert_eq!(report.count("failed"), 1);
    assert_eq!(report.count("aborted"), 4);
    assert_eq!(store.calls().len(), 1);
    assert_eq!(report.upload_attempts, 1);
    assert_eq!(get_remote_url(&pool, 2, AssetRole::Primary).await.unwrap(), None);
}

#[tokio::test]
async fn test_transient_failure_retried_up_to_bound() {
    let canonical = TempDir::new().unwrap();
    let pool = five_materials(&canonical).await;
    let store = Arc::new(FakeStore::new());
    // Recovers on the third attempt
    store.fail_with(
        "materials/1/primary/primary.jpg",
        vec![
            StoreError::Transient("503".into()),
            StoreError::Transient("SlowDown".into()),
        ],
    );
    // Never recovers within three attempts
    store.fail_with(
        "materials/2/primary/primary.jpg",
        vec![
            StoreError::Transient("503".into()),
            StoreError::Transient("503".into()),
            StoreError::Transient("503".into()),
            StoreError::Transient("503".into()),
        ],
    );
    let registry = load_registry(&pool).await.unwrap();

    let report = migrator(&pool, &canonical, 1)
        .run(&registry, Some(store.clone() as Arc<dyn ObjectStore>), &primary_only(false, None))
        .await
        .unwrap();

    assert!(!report.was_aborted());
    assert_eq!(report.count("migrated"), 4);
    assert_eq!(report.count("failed"), 1);
    assert!(matches!(report.items[1].outcome, MigrationOutcome::Failed { .. }));

    let calls = store.calls();
    assert_eq!(calls.iter().filter(|k| k.starts_with("materials/1/")).count(), 3);
    assert_eq!(calls.iter().filter(|k| k.starts_with("materials/2/")).count(), 3);
    assert_eq!(report.upload_attempts, 3 + 3 + 3);
}

#[tokio::test]
async fn test_real_run_without_store_is_configuration_error() {
    let canonical = TempDir::new().unwrap();
    let pool = five_materials(&canonical).await;
    let registry = load_registry(&pool).await.unwrap();

    let err = migrator(&pool, &canonical, 1)
        .run(&registry, None, &primary_only(false, None))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_unhealthy_image_is_never_uploaded() {
    let canonical = TempDir::new().unwrap();
    let pool = memory_pool().await;
    insert_material(&pool, 1, "Coal", None).await;
    insert_material(&pool, 2, "Oak", None).await;
    write_image(&canonical.path().join("Coal").join("primary.png"), 0, ImageFormat::Png);
    write_image(&canonical.path().join("Oak").join("primary.png"), 120, ImageFormat::Png);

    let sink = Arc::new(CollectingSink::default());
    let store = Arc::new(FakeStore::new());
    let registry = load_registry(&pool).await.unwrap();
    let report = migrator_with_sink(&pool, &canonical, 1, sink.clone())
        .run(&registry, Some(store.clone() as Arc<dyn ObjectStore>), &primary_only(false, None))
        .await
        .unwrap();

    assert_eq!(
        report.items[0].outcome,
        MigrationOutcome::SkippedUnhealthy {
            verdict: "degenerate".to_string()
        }
    );
    assert_eq!(report.count("migrated"), 1);
    assert_eq!(store.calls(), vec!["materials/2/primary/primary.png".to_string()]);
    assert_eq!(get_remote_url(&pool, 1, AssetRole::Primary).await.unwrap(), None);

    let requests = sink.0.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].material_id, 1);
    assert_eq!(requests[0].verdict, HealthVerdict::Degenerate);
}

#[tokio::test]
async fn test_dry_run_reports_unhealthy_without_regeneration() {
    let canonical = TempDir::new().unwrap();
    let pool = memory_pool().await;
    insert_material(&pool, 1, "Coal", None).await;
    let path = canonical.path().join("Coal").join("primary.jpg");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"").unwrap();

    let sink = Arc::new(CollectingSink::default());
    let registry = load_registry(&pool).await.unwrap();
    let report = migrator_with_sink(&pool, &canonical, 1, sink.clone())
        .run(&registry, None, &primary_only(true, None))
        .await
        .unwrap();

    assert_eq!(report.count("skipped-unhealthy"), 1);
    assert_eq!(report.count("would-migrate"), 0);
    assert!(report.display_string().contains("1 unhealthy"));
    assert!(sink.0.lock().unwrap().is_empty());
}
