//! matmap-assets - Material image asset tool
//!
//! Subcommands:
//! - `sync`: copy inbox uploads into the canonical tree
//! - `migrate`: upload canonical images to the remote store and record their URLs
//! - `verify`: resolve every material × role and report gaps
//! - `resolve`: show how one material's image resolves, tier by tier
//!
//! Exit codes: 2 on configuration errors, 1 on other setup failures or a failing
//! `verify --strict`, otherwise 0. Individual item failures never change the code.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use matmap_assets::db::{get_remote_url, load_registry};
use matmap_assets::models::{AssetRole, MaterialRegistry};
use matmap_assets::services::{
    AssetResolver, AssetVerifier, BatchMigrator, CanonicalTree, EntityMatcher, HealthChecker,
    LogRegenerationSink, MatchMode, MatchOutcome, MigrateOptions, ObjectStore, ResolutionRequest,
    S3ObjectStore, SlugIndex, SyncExecutor, SyncOptions, TierOutcome, VerifyOptions,
};
use matmap_assets::AssetError;
use matmap_common::config::{load_toml_config, PathOverrides, Settings};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Command-line arguments for matmap-assets
#[derive(Parser, Debug)]
#[command(name = "matmap-assets")]
#[command(about = "Material image sync, resolution and migration")]
#[command(version)]
struct Cli {
    /// TOML config file (default: ~/.config/matmap/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root folder for default paths
    #[arg(long, global = true, value_name = "DIR")]
    root_folder: Option<PathBuf>,

    /// Canonical image tree
    #[arg(long, global = true, value_name = "DIR")]
    canonical_root: Option<PathBuf>,

    /// Upload inbox
    #[arg(long, global = true, value_name = "DIR")]
    inbox_root: Option<PathBuf>,

    /// SQLite database
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy inbox uploads into the canonical tree
    Sync {
        /// Classify only; write nothing
        #[arg(long)]
        dry_run: bool,

        /// Use raw file-name tokens as slugs instead of matching the registry
        #[arg(long)]
        no_registry_match: bool,

        /// Concurrent items (default from config)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Upload canonical images to the remote store
    Migrate {
        /// Classify only; no uploads, no database writes
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of items to upload this run
        #[arg(long)]
        limit: Option<usize>,

        /// Restrict to a role (repeatable)
        #[arg(long = "role", value_name = "ROLE")]
        roles: Vec<AssetRole>,
    },

    /// Resolve every material × role and report gaps
    Verify {
        /// Exit 1 when any item has no resolvable image
        #[arg(long)]
        strict: bool,

        /// HEAD-check recorded remote URLs
        #[arg(long)]
        check_remote: bool,
    },

    /// Show how one material's image resolves
    Resolve {
        /// Material name, alias or id
        name: String,

        #[arg(long, default_value = "primary")]
        role: AssetRole,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging level comes from the TOML file, so read it before tracing starts
    let toml = match load_toml_config(cli.config.as_deref()) {
        Ok(toml) => toml,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(2);
        }
    };

    let default_level = toml.logging.level.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    info!(
        "Starting matmap-assets v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let overrides = PathOverrides {
        root_folder: cli.root_folder.clone(),
        canonical_root: cli.canonical_root.clone(),
        inbox_root: cli.inbox_root.clone(),
        database: cli.database.clone(),
    };
    let settings = Settings::resolve(&toml, &overrides);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli.command, settings)) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            if is_configuration_error(&e) {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn is_configuration_error(err: &anyhow::Error) -> bool {
    if let Some(asset) = err.downcast_ref::<AssetError>() {
        return asset.is_configuration();
    }
    matches!(
        err.downcast_ref::<matmap_common::Error>(),
        Some(matmap_common::Error::Config(_))
    )
}

async fn run(command: Command, settings: Settings) -> Result<ExitCode> {
    info!("Canonical root: {}", settings.canonical_root.display());

    match command {
        Command::Sync {
            dry_run,
            no_registry_match,
            workers,
        } => {
            let match_mode = if no_registry_match {
                MatchMode::Disabled
            } else {
                MatchMode::Registry
            };
            let registry = match match_mode {
                MatchMode::Registry => {
                    let pool = open_database(&settings).await?;
                    load_registry(&pool).await.context("Failed to load material registry")?
                }
                MatchMode::Disabled => MaterialRegistry::default(),
            };
            let matcher = EntityMatcher::new(registry);

            let options = SyncOptions {
                dry_run,
                match_mode,
                workers: workers.unwrap_or(settings.sync.workers).max(1),
                item_timeout: settings.sync.item_timeout,
            };
            info!("Inbox: {}", settings.inbox_root.display());
            let executor = SyncExecutor::new(
                settings.inbox_root.clone(),
                CanonicalTree::new(&settings.canonical_root),
            );
            let report = executor.run(&matcher, &options).await?;

            println!("{}", report.summary_table());
            Ok(ExitCode::SUCCESS)
        }

        Command::Migrate {
            dry_run,
            limit,
            roles,
        } => {
            // Credentials are checked up front, dry run included
            let store = S3ObjectStore::connect(&settings.remote).await?;
            if !dry_run {
                let timeout = settings.migrate.attempt_timeout;
                match tokio::time::timeout(timeout, store.preflight()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        return Err(AssetError::Configuration(format!(
                            "Remote store preflight failed: {}",
                            e
                        ))
                        .into())
                    }
                    Err(_) => {
                        return Err(AssetError::Configuration(format!(
                            "Remote store preflight timed out after {:?}",
                            timeout
                        ))
                        .into())
                    }
                }
            }

            let pool = open_database(&settings).await?;
            let registry = load_registry(&pool).await.context("Failed to load material registry")?;
            let migrator = BatchMigrator::new(
                pool,
                CanonicalTree::new(&settings.canonical_root),
                settings.resolution.entity_group.clone(),
                settings.migrate.clone(),
                HealthChecker::from_settings(&settings.health),
                Arc::new(LogRegenerationSink),
            );
            let options = MigrateOptions {
                dry_run,
                limit,
                roles: if roles.is_empty() {
                    AssetRole::ALL.to_vec()
                } else {
                    roles
                },
            };
            let store: Arc<dyn ObjectStore> = Arc::new(store);
            let report = migrator.run(&registry, Some(store), &options).await?;

            println!("{}", report.display_string());
            println!("{}", report.summary_table());
            Ok(ExitCode::SUCCESS)
        }

        Command::Verify {
            strict,
            check_remote,
        } => {
            let pool = open_database(&settings).await?;
            let registry = load_registry(&pool).await.context("Failed to load material registry")?;
            let resolver = Arc::new(AssetResolver::from_settings(
                &settings,
                Arc::new(LogRegenerationSink),
            ));
            let verifier = AssetVerifier::new(
                pool,
                resolver,
                CanonicalTree::new(&settings.canonical_root),
                HealthChecker::from_settings(&settings.health),
            );
            let report = verifier
                .run(
                    &registry,
                    &VerifyOptions {
                        strict,
                        check_remote,
                    },
                )
                .await?;

            for item in &report.items {
                println!(
                    "{:>6} {:<24} {:<8} {:<16} {}",
                    item.material_id,
                    item.material_name,
                    item.role.as_str(),
                    item.tier.map(|t| t.as_str()).unwrap_or("absent"),
                    item.locator.as_deref().unwrap_or("-")
                );
            }
            println!("{}", report.summary_table());

            if report.passed() {
                Ok(ExitCode::SUCCESS)
            } else {
                error!("Strict verification failed: {} unresolved", report.unresolved().count());
                Ok(ExitCode::from(1))
            }
        }

        Command::Resolve { name, role } => {
            let pool = open_database(&settings).await?;
            let registry = load_registry(&pool).await.context("Failed to load material registry")?;
            let slugs = SlugIndex::build(&registry.entities);
            let matcher = EntityMatcher::new(registry);

            let entity = match name.trim().parse::<i64>().ok().and_then(|id| matcher.registry().find(id)) {
                Some(entity) => entity,
                None => match matcher.match_token(&name) {
                    MatchOutcome::Matched { entity, tier } => {
                        info!(tier = ?tier, "Matched '{}' to material {}", name, entity.id);
                        entity
                    }
                    other => {
                        println!("No single material matches '{}': {:?}", name, other);
                        return Ok(ExitCode::SUCCESS);
                    }
                },
            };

            let remote_url = get_remote_url(&pool, entity.id, role)
                .await
                .context("Failed to read remote reference")?;
            let resolver = AssetResolver::from_settings(&settings, Arc::new(LogRegenerationSink));
            let request = ResolutionRequest {
                entity,
                slug: slugs.unique_slug(entity.id),
                role,
                remote_url: remote_url.as_deref(),
            };
            let (result, trace) = resolver.resolve_with_trace(&request);

            println!("{} ({}) role={}", entity.canonical_name(), entity.id, role);
            for step in &trace {
                match &step.outcome {
                    TierOutcome::Resolved(r) => println!("  {:<16} resolved {}", step.tier.as_str(), r.locator),
                    TierOutcome::Passed { reason } => println!("  {:<16} passed   {}", step.tier.as_str(), reason),
                }
            }
            match result {
                Some(r) => println!(
                    "=> {} [{}] cache token {}",
                    r.locator,
                    r.tier.as_str(),
                    r.cache_token.as_deref().unwrap_or("-")
                ),
                None => println!("=> absent"),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn open_database(settings: &Settings) -> Result<SqlitePool> {
    info!("Database: {}", settings.database_path.display());
    matmap_common::db::init_database(&settings.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", settings.database_path.display()))
}
