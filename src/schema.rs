//! Warehouse schema management for the song-play star schema.
//!
//! Ensures the two staging relations, the four dimensions, and the fact
//! table exist before any load or transform runs. Applied once on startup
//! from `main.rs` (EMBP: single gateway call).
//!
//! Foreign keys on `songplays` are active. The reference to `time` is
//! `DEFERRABLE INITIALLY DEFERRED`: the time dimension is derived *from* the
//! fact rows, so within the transform transaction `songplays` is populated
//! first and the check passes at commit.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create the warehouse schema (idempotent).
///
/// Staging tables carry no constraints; raw files land verbatim and are
/// validated only by the transform. Safe to call on every startup.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Landing table for raw event-log lines
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_events (
            artist_name     TEXT,
            auth            TEXT,
            first_name      TEXT,
            gender          TEXT,
            item_in_session INTEGER,
            last_name       TEXT,
            length          DOUBLE PRECISION,
            level           TEXT,
            location        TEXT,
            method          TEXT,
            page            TEXT,
            registration    DOUBLE PRECISION,
            session_id      BIGINT,
            song_title      TEXT,
            status          INTEGER,
            start_time      BIGINT,
            user_agent      TEXT,
            user_id         BIGINT
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Landing table for raw song-metadata records
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_songs (
            num_songs  INTEGER,
            artist_id  TEXT,
            latitude   DOUBLE PRECISION,
            longitude  DOUBLE PRECISION,
            location   TEXT,
            artist_name TEXT,
            song_id    TEXT,
            title      TEXT,
            duration   DOUBLE PRECISION,
            year       INTEGER
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id    BIGINT PRIMARY KEY,
            first_name TEXT,
            last_name  TEXT,
            gender     TEXT,
            level      TEXT
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS songs (
            song_id   TEXT PRIMARY KEY,
            title     TEXT,
            artist_id TEXT,
            year      INTEGER,
            duration  DOUBLE PRECISION
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artists (
            artist_id TEXT PRIMARY KEY,
            name      TEXT,
            location  TEXT,
            latitude  DOUBLE PRECISION,
            longitude DOUBLE PRECISION
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS time (
            start_time TIMESTAMPTZ PRIMARY KEY,
            hour       INTEGER NOT NULL,
            day        INTEGER NOT NULL,
            week       INTEGER NOT NULL,
            month      INTEGER NOT NULL,
            year       INTEGER NOT NULL,
            weekday    TEXT    NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Fact table; song_id/artist_id stay null when no catalog match exists
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS songplays (
            songplay_id BIGSERIAL PRIMARY KEY,
            start_time  TIMESTAMPTZ NOT NULL
                        REFERENCES time (start_time) DEFERRABLE INITIALLY DEFERRED,
            user_id     BIGINT REFERENCES users (user_id),
            level       TEXT,
            song_id     TEXT REFERENCES songs (song_id),
            artist_id   TEXT REFERENCES artists (artist_id),
            session_id  BIGINT,
            location    TEXT,
            user_agent  TEXT
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Basic indexes for common analytical queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_songplays_start_time
            ON songplays (start_time);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_songplays_user_id
            ON songplays (user_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

// ---

/// Empty both staging relations.
///
/// Staging is write-once per load cycle; the loader calls this before
/// copying in a fresh set of source files.
pub async fn truncate_staging(pool: &PgPool) -> Result<(), sqlx::Error> {
    // ---
    sqlx::query("TRUNCATE staging_events, staging_songs")
        .execute(pool)
        .await?;

    Ok(())
}
