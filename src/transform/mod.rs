//! Transform Engine: staging snapshot in, star schema out.
//!
//! Gateway for the five derivations (EMBP: siblings stay private, callers
//! see [`run`] and [`MatchPolicy`]). The derivations themselves are pure set
//! computations over the staging rows; this module owns the I/O around
//! them: one transaction covering the staging reads and all five inserts,
//! in the dependency-safe order {users, songs, artists, songplays, time}.
//! `songplays` precedes `time` (time is derived from the fact rows; its
//! foreign key is deferred to commit), and the three independent dimensions
//! precede `songplays` so its immediate foreign keys hold at insert.
//!
//! All-or-nothing: a key violation in any step rolls back the whole run and
//! surfaces as [`EtlError::Constraint`] naming the step.

use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::info;

use crate::error::EtlError;
use crate::models::{Artist, Song, Songplay, StagingEvent, StagingSong, TimeRow, User};

mod dimensions;
mod songplays;
mod time;

pub use songplays::{matches, MatchPolicy};

// ---

/// Rows per multi-row `INSERT` batch.
const INSERT_BATCH_SIZE: usize = 500;

/// Rows inserted per transform step.
#[derive(Debug, Default)]
pub struct TransformReport {
    pub users: u64,
    pub songs: u64,
    pub artists: u64,
    pub songplays: u64,
    pub time: u64,
}

// ---

/// Run the five derivations against the current staging snapshot.
///
/// Re-running against already-populated targets is not key-safe by design:
/// the second run violates a dimension primary key and the whole
/// transaction rolls back.
pub async fn run(pool: &PgPool, policy: MatchPolicy) -> Result<TransformReport, EtlError> {
    // ---
    let mut tx = pool.begin().await?;

    // Fixed snapshot: the staging reads share the insert transaction.
    let events: Vec<StagingEvent> = sqlx::query_as("SELECT * FROM staging_events")
        .fetch_all(&mut *tx)
        .await?;
    let staged_songs: Vec<StagingSong> = sqlx::query_as("SELECT * FROM staging_songs")
        .fetch_all(&mut *tx)
        .await?;

    info!(
        "Transforming {} staged events and {} staged songs",
        events.len(),
        staged_songs.len()
    );

    let users = dimensions::derive_users(&events);
    let songs = dimensions::derive_songs(&staged_songs);
    let artists = dimensions::derive_artists(&staged_songs);
    let plays = songplays::derive(&events, &staged_songs, policy);
    let time_rows = time::derive(&plays);

    let mut report = TransformReport::default();

    report.users = insert_users(&mut tx, &users)
        .await
        .map_err(|e| EtlError::from_step("users", e))?;
    info!("  users     : {} rows", report.users);

    report.songs = insert_songs(&mut tx, &songs)
        .await
        .map_err(|e| EtlError::from_step("songs", e))?;
    info!("  songs     : {} rows", report.songs);

    report.artists = insert_artists(&mut tx, &artists)
        .await
        .map_err(|e| EtlError::from_step("artists", e))?;
    info!("  artists   : {} rows", report.artists);

    report.songplays = insert_songplays(&mut tx, &plays)
        .await
        .map_err(|e| EtlError::from_step("songplays", e))?;
    info!("  songplays : {} rows", report.songplays);

    report.time = insert_time(&mut tx, &time_rows)
        .await
        .map_err(|e| EtlError::from_step("time", e))?;
    info!("  time      : {} rows", report.time);

    // Deferred foreign keys (songplays.start_time -> time) are checked here.
    tx.commit()
        .await
        .map_err(|e| EtlError::from_step("commit", e))?;

    Ok(report)
}

// ---

async fn insert_users(conn: &mut PgConnection, users: &[User]) -> Result<u64, sqlx::Error> {
    // ---
    let mut inserted = 0u64;
    for chunk in users.chunks(INSERT_BATCH_SIZE) {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO users (user_id, first_name, last_name, gender, level) ",
        );
        qb.push_values(chunk, |mut b, u| {
            b.push_bind(u.user_id)
                .push_bind(u.first_name.clone())
                .push_bind(u.last_name.clone())
                .push_bind(u.gender.clone())
                .push_bind(u.level.clone());
        });
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

async fn insert_songs(conn: &mut PgConnection, songs: &[Song]) -> Result<u64, sqlx::Error> {
    // ---
    let mut inserted = 0u64;
    for chunk in songs.chunks(INSERT_BATCH_SIZE) {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO songs (song_id, title, artist_id, year, duration) ",
        );
        qb.push_values(chunk, |mut b, s| {
            b.push_bind(s.song_id.clone())
                .push_bind(s.title.clone())
                .push_bind(s.artist_id.clone())
                .push_bind(s.year)
                .push_bind(s.duration);
        });
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

async fn insert_artists(conn: &mut PgConnection, artists: &[Artist]) -> Result<u64, sqlx::Error> {
    // ---
    let mut inserted = 0u64;
    for chunk in artists.chunks(INSERT_BATCH_SIZE) {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO artists (artist_id, name, location, latitude, longitude) ",
        );
        qb.push_values(chunk, |mut b, a| {
            b.push_bind(a.artist_id.clone())
                .push_bind(a.name.clone())
                .push_bind(a.location.clone())
                .push_bind(a.latitude)
                .push_bind(a.longitude);
        });
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

async fn insert_songplays(conn: &mut PgConnection, plays: &[Songplay]) -> Result<u64, sqlx::Error> {
    // ---
    let mut inserted = 0u64;
    for chunk in plays.chunks(INSERT_BATCH_SIZE) {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO songplays (start_time, user_id, level, song_id, artist_id, \
             session_id, location, user_agent) ",
        );
        qb.push_values(chunk, |mut b, p| {
            b.push_bind(p.start_time)
                .push_bind(p.user_id)
                .push_bind(p.level.clone())
                .push_bind(p.song_id.clone())
                .push_bind(p.artist_id.clone())
                .push_bind(p.session_id)
                .push_bind(p.location.clone())
                .push_bind(p.user_agent.clone());
        });
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

async fn insert_time(conn: &mut PgConnection, rows: &[TimeRow]) -> Result<u64, sqlx::Error> {
    // ---
    let mut inserted = 0u64;
    for chunk in rows.chunks(INSERT_BATCH_SIZE) {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO time (start_time, hour, day, week, month, year, weekday) ",
        );
        qb.push_values(chunk, |mut b, t| {
            b.push_bind(t.start_time)
                .push_bind(t.hour)
                .push_bind(t.day)
                .push_bind(t.week)
                .push_bind(t.month)
                .push_bind(t.year)
                .push_bind(t.weekday.clone());
        });
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}
