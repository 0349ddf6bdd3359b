//! Asset engine components
//!
//! Pure building blocks (slug, extension arbitration, matching, hashing, health)
//! and the three pipelines built on them: inbox sync, runtime resolution and
//! batch migration to the remote store.

pub mod asset_verifier;
pub mod batch_migrator;
pub mod canonical_tree;
pub mod content_hasher;
pub mod entity_matcher;
pub mod extension_arbiter;
pub mod health_checker;
pub mod inbox_scanner;
pub mod object_store;
pub mod resolver;
pub mod slug;
pub mod sync_executor;

pub use asset_verifier::{AssetVerifier, VerifyOptions};
pub use batch_migrator::{object_key, BatchMigrator, MigrateOptions};
pub use canonical_tree::CanonicalTree;
pub use content_hasher::{files_identical, hash_file};
pub use entity_matcher::{EntityMatcher, MatchMode, MatchOutcome, MatchTier};
pub use health_checker::{HealthChecker, HealthReport, HealthVerdict};
pub use inbox_scanner::{classify_file_name, FileShape, InboxScanner, Namespace, ScanError};
pub use object_store::{ObjectStore, S3ObjectStore, StoreError};
pub use resolver::{
    AssetResolver, LogRegenerationSink, RegenerationRequest, RegenerationSink, ResolutionRequest,
    ResolutionResult, ResolutionTier, TierOutcome, TierResolver, TierTrace,
};
pub use slug::{slugify, NameConflict, Slug, SlugEntry, SlugError, SlugIndex};
pub use sync_executor::{SyncExecutor, SyncOptions};
