//! Configuration loader for the song-play warehouse ETL pipeline.
//!
//! This module centralizes all runtime configuration values and their
//! defaults, loading from environment variables (with optional `.env` file
//! support provided by the caller). The loaded [`Config`] is passed by
//! reference into each pipeline stage; nothing reads the environment after
//! startup.

use std::env;

use anyhow::{anyhow, Result};
use sqlx::postgres::PgConnectOptions;

use crate::transform::MatchPolicy;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_num {
    ($ty:ty, $var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed pipeline configuration.
///
/// All fields are immutable after loading, ensuring a consistent
/// configuration snapshot for the lifetime of the run.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Warehouse hostname or IP.
    pub host: String,

    /// Warehouse port.
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Database user.
    pub user: String,

    /// Database password.
    pub password: String,

    /// Credential reference authorizing bulk-load access to remote source
    /// files; sent as a bearer credential when fetching `http(s)://`
    /// manifest entries. Not needed for local sources.
    pub load_role: Option<String>,

    /// Directory prefix holding the JSON event-log files.
    pub event_data_prefix: String,

    /// Path to the JSON manifest listing the song-metadata files.
    pub song_data_manifest: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Tolerated malformed records per source file before the load aborts.
    pub load_error_limit: u32,

    /// Tie-break policy for ambiguous event-to-song matches.
    pub match_policy: MatchPolicy,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `WAREHOUSE_HOST`, `WAREHOUSE_DB`, `WAREHOUSE_USER`, `WAREHOUSE_PASSWORD`
/// - `EVENT_DATA_PREFIX` – directory holding event-log JSON files
/// - `SONG_DATA_MANIFEST` – manifest file listing song-metadata files
///
/// Optional:
/// - `WAREHOUSE_PORT` – warehouse port (default: 5439)
/// - `LOAD_ROLE` – bulk-load credential for remote manifest entries
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `LOAD_ERROR_LIMIT` – malformed records tolerated per file (default: 10)
/// - `MATCH_POLICY` – `all` or `first` (default: `all`)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let host = require_env!("WAREHOUSE_HOST");
    let database = require_env!("WAREHOUSE_DB");
    let user = require_env!("WAREHOUSE_USER");
    let password = require_env!("WAREHOUSE_PASSWORD");
    let event_data_prefix = require_env!("EVENT_DATA_PREFIX");
    let song_data_manifest = require_env!("SONG_DATA_MANIFEST");

    let port = parse_env_num!(u16, "WAREHOUSE_PORT", 5439);
    let load_role = env::var("LOAD_ROLE").ok();
    let db_pool_max = parse_env_num!(u32, "DB_POOL_MAX", 5);
    let load_error_limit = parse_env_num!(u32, "LOAD_ERROR_LIMIT", 10);

    let match_policy = match env::var("MATCH_POLICY").ok().as_deref() {
        None | Some("all") => MatchPolicy::AllMatches,
        Some("first") => MatchPolicy::FirstBySongId,
        Some(other) => {
            return Err(anyhow!(
                "Invalid MATCH_POLICY '{}': expected 'all' or 'first'",
                other
            ))
        }
    };

    Ok(Config {
        host,
        port,
        database,
        user,
        password,
        load_role,
        event_data_prefix,
        song_data_manifest,
        db_pool_max,
        load_error_limit,
        match_policy,
    })
}

impl Config {
    // ---

    /// Warehouse endpoint as `host:port`, for log and error messages.
    pub fn endpoint(&self) -> String {
        // ---
        format!("{}:{}", self.host, self.port)
    }

    /// Connection options for the warehouse, built from the discrete fields
    /// so passwords never need URL escaping.
    pub fn pg_options(&self) -> PgConnectOptions {
        // ---
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// The password is always masked; every other value is shown as loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  WAREHOUSE_HOST     : {}", self.host);
        tracing::info!("  WAREHOUSE_PORT     : {}", self.port);
        tracing::info!("  WAREHOUSE_DB       : {}", self.database);
        tracing::info!("  WAREHOUSE_USER     : {}", self.user);
        tracing::info!("  WAREHOUSE_PASSWORD : ****");
        tracing::info!(
            "  LOAD_ROLE          : {}",
            if self.load_role.is_some() { "<set>" } else { "<unset>" }
        );
        tracing::info!("  EVENT_DATA_PREFIX  : {}", self.event_data_prefix);
        tracing::info!("  SONG_DATA_MANIFEST : {}", self.song_data_manifest);
        tracing::info!("  DB_POOL_MAX        : {}", self.db_pool_max);
        tracing::info!("  LOAD_ERROR_LIMIT   : {}", self.load_error_limit);
        tracing::info!("  MATCH_POLICY       : {:?}", self.match_policy);
    }
}
