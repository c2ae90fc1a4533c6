//! duckgate server entrypoint
//!
//! Parses arguments, loads configuration, initializes logging, and hands
//! off to the server module; the heavy lifting lives in the library so this
//! file remains a thin orchestrator.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};

use duckgate::engine::duckdb::DuckDbEngine;
use duckgate::{logging, server, ServerConfig};

/// Local SQL query gateway over an embedded DuckDB database.
#[derive(Parser, Debug)]
#[command(name = "duckgate", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,

    /// Override the database file (empty string for in-memory)
    #[arg(long)]
    database: Option<String>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Missing config file is not fatal; the defaults describe a usable
    // local in-memory gateway.
    let mut config = if cli.config.exists() {
        ServerConfig::from_file(&cli.config)?
    } else {
        eprintln!(
            "config file {} not found, using defaults",
            cli.config.display()
        );
        ServerConfig::default()
    };

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(database) = cli.database {
        config.engine.database_path = database;
    }
    config.validate()?;

    // Logging before any other side effects
    logging::init_logging(
        &config.logging.level,
        &config.logging.file_path,
        config.logging.log_to_console,
        &config.logging.format,
    )?;

    info!("duckgate v{}", env!("CARGO_PKG_VERSION"));

    let engine = if config.engine.database_path.is_empty() {
        warn!("no database path configured, data will not survive restarts");
        DuckDbEngine::open_in_memory()?
    } else {
        info!("opening database at {}", config.engine.database_path);
        DuckDbEngine::open(&config.engine.database_path)?
    };

    let dispatcher = server::build_dispatcher(&engine, &config)?;
    server::run(&config, dispatcher).await
}
