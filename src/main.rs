//! Binary entry point for tabserve.
//!
//! This binary provides the CLI interface for serving and inspecting
//! embedded database tables.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stdout in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tabserve::config::EngineConfig;
use tabserve::models::{QueryRequest, SortOrder};
use tabserve::{QueryEngine, server};

/// Tabserve - query and caching engine for embedded SQLite table data.
#[derive(Parser)]
#[command(name = "tabserve")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory of database files (overrides config).
    #[arg(short, long, global = true, env = "TABSERVE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP query surface.
    Serve {
        /// Address to bind.
        #[arg(short, long, env = "TABSERVE_LISTEN")]
        listen: Option<String>,
    },

    /// List the tables in a database.
    Tables {
        /// Database file name within the data directory.
        db: String,
    },

    /// Run one table query and print the result as JSON.
    Query {
        /// Database file name within the data directory.
        db: String,
        /// Table to query.
        table: String,
        /// Maximum rows to return.
        #[arg(long, default_value_t = 100)]
        limit: u64,
        /// Row offset.
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Sort column.
        #[arg(long)]
        sort: Option<String>,
        /// Sort descending instead of ascending.
        #[arg(long)]
        desc: bool,
        /// Free-text search value.
        #[arg(long)]
        search: Option<String>,
    },

    /// Print per-column statistics for a table.
    Stats {
        /// Database file name within the data directory.
        db: String,
        /// Table to inspect.
        table: String,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?
            .with_env_overrides(),
        None => EngineConfig::load_default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir.clone_from(data_dir);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            let engine = Arc::new(QueryEngine::new(config));
            let listen = engine.config().listen.clone();
            server::serve(Arc::clone(&engine), &listen).await?;
            engine.shutdown();
        },
        Commands::Tables { db } => {
            let engine = QueryEngine::new(config);
            let tables = engine.list_tables(&db)?;
            println!("{}", serde_json::to_string_pretty(&tables)?);
        },
        Commands::Query {
            db,
            table,
            limit,
            offset,
            sort,
            desc,
            search,
        } => {
            let engine = QueryEngine::new(config);
            let request = QueryRequest {
                limit,
                offset,
                sort_column: sort,
                sort_order: desc.then_some(SortOrder::Desc),
                search_value: search,
                ..QueryRequest::for_table(table)
            };
            let result = engine.execute(&db, &request)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        },
        Commands::Stats { db, table } => {
            let engine = QueryEngine::new(config);
            let stats = engine.table_stats(&db, &table)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        },
    }
    Ok(())
}
