//! Error taxonomy for the song-play ETL pipeline.
//!
//! Three failure classes are surfaced to callers (EMBP: `main.rs` only ever
//! matches on this enum):
//! - [`EtlError::Connectivity`] – the warehouse is unreachable; fatal, no
//!   retry here (retries belong to the provisioning side).
//! - [`EtlError::Load`] – a source file exceeded the malformed-record limit
//!   during staging; the staging area is treated as contaminated.
//! - [`EtlError::Constraint`] – a transform step violated a primary or
//!   foreign key; the whole transform transaction rolls back.

use thiserror::Error;

// ---

/// SQLSTATE class 23 codes that the transform maps to [`EtlError::Constraint`].
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum EtlError {
    /// Warehouse endpoint could not be reached or refused the connection.
    #[error("cannot reach warehouse at {endpoint}: {source}")]
    Connectivity {
        endpoint: String,
        #[source]
        source: sqlx::Error,
    },

    /// A staging source file exceeded the tolerated malformed-record count.
    #[error("staging load of '{location}' aborted: {errors} malformed records (limit {limit})")]
    Load {
        location: String,
        errors: u32,
        limit: u32,
    },

    /// A source file or manifest could not be read.
    #[error("cannot read source '{location}': {detail}")]
    Source { location: String, detail: String },

    /// A transform step tried to insert a row that violates a key constraint.
    #[error("transform step '{step}' violated {kind} constraint: {detail}")]
    Constraint {
        step: &'static str,
        kind: &'static str,
        detail: String,
    },

    /// Any other database error (DDL, truncation, plain query failures).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EtlError {
    // ---

    /// Classify a database error raised by a transform insert.
    ///
    /// Unique (23505) and foreign-key (23503) violations become
    /// [`EtlError::Constraint`] carrying the step name and the server's
    /// detail message (which names the offending key). Everything else
    /// passes through as [`EtlError::Database`].
    pub fn from_step(step: &'static str, err: sqlx::Error) -> Self {
        // ---
        let kind = match err.as_database_error().and_then(|e| e.code()) {
            Some(code) if code == UNIQUE_VIOLATION => Some("primary-key"),
            Some(code) if code == FOREIGN_KEY_VIOLATION => Some("foreign-key"),
            _ => None,
        };
        let Some(kind) = kind else {
            return EtlError::Database(err);
        };

        let detail = err
            .as_database_error()
            .map(|e| e.message().to_string())
            .unwrap_or_else(|| err.to_string());

        EtlError::Constraint { step, kind, detail }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn load_error_names_file_and_counts() {
        // ---
        let err = EtlError::Load {
            location: "log_data/2018-11-01-events.json".to_string(),
            errors: 11,
            limit: 10,
        };
        assert_eq!(
            err.to_string(),
            "staging load of 'log_data/2018-11-01-events.json' aborted: \
             11 malformed records (limit 10)"
        );
    }

    #[test]
    fn constraint_error_names_step() {
        // ---
        let err = EtlError::Constraint {
            step: "users",
            kind: "primary-key",
            detail: "duplicate key value violates unique constraint \"users_pkey\"".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("step 'users'"), "got: {msg}");
        assert!(msg.contains("primary-key"), "got: {msg}");
    }

    #[test]
    fn non_constraint_db_errors_pass_through() {
        // ---
        let err = EtlError::from_step("songs", sqlx::Error::RowNotFound);
        assert!(matches!(err, EtlError::Database(_)));
    }
}
