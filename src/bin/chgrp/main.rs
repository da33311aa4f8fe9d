//! chgrp CLI tool
//!
//! Runs graph operations against a sqlite store.
//!
//! ## Commands
//!
//! - `move <type> <ids..> --group <g>`: move rows to another group, validating references
//! - `delete <type> <ids..>`: delete rows
//! - `check <type> <ids..> --group <g>`: report what a move would violate, without moving
//! - `reap <type> <cache-dir>`: drop disk-cache entries whose rows no longer exist
//!
//! Lock candidates, the user group and the default database come from the TOML config file
//! (`--config`, default `graphops.toml`). `move` and `delete` run as one transaction; a
//! constraint failure leaves the store untouched and exits with status 2 after printing the
//! offending rows per table.

use chgrp_core::{
    cache::{DiskCache, IdBackedCache},
    config::{ConfigProvider, GraphOpsConfig, TomlConfigProvider},
    db::{db_init, DbConnection},
    error::GraphOpError,
    executor::find_violations,
    factory::plan_operation,
    graphspec::GraphSpec,
    metadata::ExtendedMetadata,
    properties::{GraphOpts, GroupId, ObjectType, OperationKind, RowId},
};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::ExitCode, sync::Arc};

#[derive(Parser)]
#[command(name = "chgrp")]
#[command(author, version, about = "Move or delete rows with cross-group reference validation", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "graphops.toml")]
    config: PathBuf,

    /// Sqlite database (overrides the config file)
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Move rows into another group
    Move {
        object_type: String,
        #[arg(required = true)]
        ids: Vec<RowId>,
        /// Destination group id
        #[arg(short, long)]
        group: i64,
        /// Delete blocking references instead of failing
        #[arg(short, long)]
        force: bool,
    },

    /// Delete rows
    Delete {
        object_type: String,
        #[arg(required = true)]
        ids: Vec<RowId>,
    },

    /// Report the references a move would leave behind
    Check {
        object_type: String,
        #[arg(required = true)]
        ids: Vec<RowId>,
        /// Destination group id
        #[arg(short, long)]
        group: i64,
    },

    /// Evict disk-cache entries whose rows no longer exist
    Reap {
        object_type: String,
        /// Cache directory (relative to the configured cache_dir, if any)
        cache_dir: PathBuf,
    },
}

fn print_violations(err: &GraphOpError) {
    if let Some(violations) = err.as_constraint() {
        eprintln!("{violations}");
        for message in violations.messages.iter() {
            eprintln!("  {message}");
        }
        for (table, ids) in violations.by_table.iter() {
            eprintln!("  {table}: {ids:?}");
        }
    } else {
        eprintln!("error: {err}");
    }
}

async fn run_operation(
    db: &DbConnection,
    config: &GraphOpsConfig,
    kind: OperationKind,
    object_type: ObjectType,
    ids: Vec<RowId>,
    opts: GraphOpts,
) -> Result<(), GraphOpError> {
    let metadata = ExtendedMetadata::from_config(config)?;
    let entry = format!("/{object_type}");
    let spec = Arc::new(GraphSpec::parse(&entry, &[entry.as_str()])?);
    let plan = plan_operation(kind, &spec, &[(0, ids)], config.user_group)?;

    let report = db.execute_and_record(&metadata, &plan, opts).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), GraphOpError> {
    let config = TomlConfigProvider::new(cli.config.clone()).load()?;
    let Some(db_path) = cli.db.clone().or_else(|| config.database.clone()) else {
        return Err(GraphOpError::Config(
            "no database given (use --db or set `database` in the config file)".to_string(),
        ));
    };
    let db = DbConnection(db_init(&db_path).await?);

    match cli.command {
        Commands::Move {
            object_type,
            ids,
            group,
            force,
        } => {
            run_operation(
                &db,
                &config,
                OperationKind::Chgrp {
                    target: GroupId(group),
                },
                ObjectType::new(&object_type)?,
                ids,
                GraphOpts { force },
            )
            .await
        }
        Commands::Delete { object_type, ids } => {
            run_operation(
                &db,
                &config,
                OperationKind::Delete,
                ObjectType::new(&object_type)?,
                ids,
                GraphOpts::default(),
            )
            .await
        }
        Commands::Check {
            object_type,
            ids,
            group,
        } => {
            let metadata = ExtendedMetadata::from_config(&config)?;
            let violations = find_violations(
                &db,
                &metadata,
                &ObjectType::new(&object_type)?,
                &ids,
                GroupId(group),
                config.user_group,
            )
            .await?;
            if violations.is_empty() {
                println!("no violations");
                Ok(())
            } else {
                Err(GraphOpError::Constraint(violations))
            }
        }
        Commands::Reap {
            object_type,
            cache_dir,
        } => {
            let dir = match &config.cache_dir {
                Some(root) => root.join(cache_dir),
                None => cache_dir,
            };
            let disk = DiskCache::<serde_json::Value>::open(&dir)?;
            let cache = IdBackedCache::new(ObjectType::new(&object_type)?, disk, db)
                .with_batch_size(config.reap_batch_size);
            let evicted = cache.reap().await;
            println!("evicted {evicted} entries, {} remain", cache.len());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: could not start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_violations(&err);
            ExitCode::from(err.exit_code())
        }
    }
}
