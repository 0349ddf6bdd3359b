//! # Material Map Asset Engine
//!
//! Decides which image bytes represent a material in a given role, and keeps
//! the three storage tiers (upload inbox, canonical tree, remote store)
//! consistent without ever duplicating work on rerun.
//!
//! Exposed as a library for the `matmap-assets` binary and integration tests.

pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{AssetError, AssetResult};
