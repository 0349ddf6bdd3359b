//! # Material Map Common Library
//!
//! Shared code for the material map asset tooling:
//! - Error type shared by every crate
//! - Configuration loading (TOML, environment, command line)
//! - SQLite initialization and the material/asset schema

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
