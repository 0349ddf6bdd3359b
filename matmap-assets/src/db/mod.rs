//! Database access for matmap-assets
//!
//! Reads the material registry and reads/writes remote references.
//! Schema creation lives in `matmap_common::db`.

pub mod assets;
pub mod materials;

pub use assets::{get_remote_url, load_remote_refs, upsert_remote_url, RemoteRefs};
pub use materials::load_registry;
