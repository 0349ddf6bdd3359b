//! Shared fixtures for matmap-assets integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use matmap_assets::services::{ObjectStore, RegenerationRequest, RegenerationSink, StoreError};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

/// Single-connection in-memory database with the full schema
///
/// More than one connection would give each its own empty database.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    matmap_common::db::create_schema(&pool)
        .await
        .expect("Failed to create schema");
    pool
}

pub async fn insert_material(pool: &SqlitePool, id: i64, name: &str, official: Option<&str>) {
    sqlx::query("INSERT INTO materials (id, name, name_official) VALUES (?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(official)
        .execute(pool)
        .await
        .expect("Failed to insert material");
}

pub async fn insert_remote_url(pool: &SqlitePool, id: i64, role: &str, url: &str) {
    sqlx::query("INSERT INTO material_assets (material_id, role, url) VALUES (?, ?, ?)")
        .bind(id)
        .bind(role)
        .bind(url)
        .execute(pool)
        .await
        .expect("Failed to insert remote reference");
}

/// Write a solid-color image; `level` 0 is black
pub fn write_image(path: &Path, level: u8, format: ImageFormat) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create image directory");
    }
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, image::Rgb([level, level, level])));
    img.save_with_format(path, format).expect("Failed to write image");
}

/// In-memory object store with scripted failures
#[derive(Default)]
pub struct FakeStore {
    calls: Mutex<Vec<String>>,
    script: Mutex<HashMap<String, VecDeque<StoreError>>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next uploads of `key` with `errors`, in order
    pub fn fail_with(&self, key: &str, errors: Vec<StoreError>) {
        self.script
            .lock()
            .unwrap()
            .insert(key.to_string(), errors.into_iter().collect());
    }

    /// Every upload attempt, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn preflight(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn put_object(&self, key: &str, path: &Path, _content_type: &str) -> Result<String, StoreError> {
        self.calls.lock().unwrap().push(key.to_string());
        if let Some(err) = self
            .script
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(|queue| queue.pop_front())
        {
            return Err(err);
        }
        if !path.exists() {
            return Err(StoreError::Local(format!("missing {}", path.display())));
        }
        Ok(format!("https://cdn.test/{}", key))
    }
}

/// Regeneration sink that keeps every request
#[derive(Default)]
pub struct CollectingSink(pub Mutex<Vec<RegenerationRequest>>);

impl RegenerationSink for CollectingSink {
    fn request_regeneration(&self, request: RegenerationRequest) {
        self.0.lock().unwrap().push(request);
    }
}
