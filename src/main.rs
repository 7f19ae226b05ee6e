//! Application entry point for the song-play warehouse ETL pipeline.
//!
//! This binary orchestrates one full pipeline run:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool to the warehouse
//!   (unreachable warehouse surfaces as a connectivity error; retrying is
//!   the provisioning side's job, not this binary's)
//! - Creating the star schema if it does not exist
//! - Bulk-loading the raw source files into the staging relations
//! - Running the five transform derivations in dependency order
//! - Logging a per-step row-count summary
//!
//! # Environment Variables
//! - `WAREHOUSE_HOST` / `WAREHOUSE_PORT` / `WAREHOUSE_DB` /
//!   `WAREHOUSE_USER` / `WAREHOUSE_PASSWORD` – warehouse connection
//! - `EVENT_DATA_PREFIX` – directory holding event-log JSON files
//! - `SONG_DATA_MANIFEST` – manifest listing song-metadata files
//! - `LOAD_ROLE` (optional) – bulk-load credential for remote sources
//! - `DB_POOL_MAX` (optional) – maximum DB connections (default: 5)
//! - `LOAD_ERROR_LIMIT` (optional) – malformed records tolerated per file
//! - `MATCH_POLICY` (optional) – `all` or `first` song-match tie-break
//! - `ETL_LOG_LEVEL` / `ETL_SPAN_EVENTS` (optional) – log verbosity/spans
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating schema setup to `schema`, configuration parsing to `config`,
//! staging loads to `staging`, and the derivations to `transform`.
use std::{env, io::IsTerminal};

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod config;
mod error;
mod models;
mod schema;
mod staging;
mod transform;

pub use config::Config;
pub use error::EtlError;

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Connecting to warehouse at {}", cfg.endpoint());

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect_with(cfg.pg_options())
        .await
        .map_err(|e| EtlError::Connectivity {
            endpoint: cfg.endpoint(),
            source: e,
        })?;

    tracing::info!("Successfully connected to warehouse");

    schema::create_schema(&pool).await?;

    let loaded = staging::load(&pool, &cfg).await?;
    let transformed = transform::run(&pool, cfg.match_policy).await?;

    tracing::info!("Pipeline complete:");
    tracing::info!(
        "  staged    : {} events ({} files), {} songs ({} files)",
        loaded.events_loaded,
        loaded.event_files,
        loaded.songs_loaded,
        loaded.song_files
    );
    tracing::info!(
        "  inserted  : {} users, {} songs, {} artists, {} songplays, {} time",
        transformed.users,
        transformed.songs,
        transformed.artists,
        transformed.songplays,
        transformed.time
    );

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `ETL_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `ETL_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked. It installs the subscriber globally
/// for the lifetime of the process.
fn init_tracing() {
    // ---
    let span_events = match env::var("ETL_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to ETL_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("ETL_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
