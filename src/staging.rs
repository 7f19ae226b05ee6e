//! Staging Loader: bulk-copies raw source files into the staging relations.
//!
//! Event logs are discovered under a directory prefix (every `*.json` file,
//! recursively); song metadata comes from an explicit JSON manifest whose
//! entries may be local paths or `http(s)://` URLs. Files for one target
//! load with bounded parallelism, and each file tolerates up to
//! `LOAD_ERROR_LIMIT` malformed lines (skip-and-count) before its load
//! aborts with [`EtlError::Load`].
//!
//! A failed file poisons the whole cycle: in-flight files finish and their
//! counts are logged, but `load()` returns the error so the caller never
//! runs the transform against a contaminated staging area. The loader never
//! touches dimension or fact tables.

use std::fmt;
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, warn};

use crate::error::EtlError;
use crate::models::{StagingEvent, StagingSong};
use crate::{schema, Config};

// ---

/// Concurrent file loads per staging target.
const MAX_CONCURRENT_LOADS: usize = 4;

/// Rows per multi-row `INSERT` batch.
const INSERT_BATCH_SIZE: usize = 500;

/// Where one source file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Path(PathBuf),
    Url(String),
}

impl Location {
    // ---
    fn parse(raw: &str) -> Self {
        // ---
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Location::Url(raw.to_string())
        } else {
            Location::Path(PathBuf::from(raw))
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Path(p) => write!(f, "{}", p.display()),
            Location::Url(u) => write!(f, "{u}"),
        }
    }
}

/// One manifest entry, Redshift manifest format. Non-mandatory entries that
/// cannot be fetched are skipped with a warning instead of failing the load.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    url: String,
    #[serde(default)]
    mandatory: bool,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    entries: Vec<ManifestEntry>,
}

/// Row counts produced by one load cycle.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub event_files: usize,
    pub events_loaded: u64,
    pub song_files: usize,
    pub songs_loaded: u64,
}

// ---

/// Populate both staging relations from the configured sources.
///
/// Truncates staging first (write-once per cycle), then loads event-log
/// files and song-metadata files. Returns the first per-file error after
/// all in-flight work has drained.
pub async fn load(pool: &PgPool, config: &Config) -> Result<LoadReport, EtlError> {
    // ---
    schema::truncate_staging(pool).await?;

    let mut report = LoadReport::default();

    // Event logs: every JSON file under the prefix, no credential needed.
    let event_files = resolve_prefix(Path::new(&config.event_data_prefix))?;
    info!(
        "Loading {} event-log files from prefix '{}'",
        event_files.len(),
        config.event_data_prefix
    );

    let event_tasks = event_files.into_iter().map(|path| {
        let location = Location::Path(path);
        async move {
            load_file::<StagingEvent>(
                pool,
                &location,
                None,
                config.load_error_limit,
                "staging_events",
            )
            .await
        }
    });

    let mut first_error = None;
    let mut results = stream::iter(event_tasks).buffer_unordered(MAX_CONCURRENT_LOADS);
    while let Some(result) = results.next().await {
        match result {
            Ok(rows) => {
                report.event_files += 1;
                report.events_loaded += rows;
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    // Song metadata: explicit manifest, entries may be remote.
    let entries = read_manifest(&config.song_data_manifest, config.load_role.as_deref()).await?;
    info!(
        "Loading {} song-metadata files from manifest '{}'",
        entries.len(),
        config.song_data_manifest
    );

    let song_tasks = entries.into_iter().map(|entry| {
        let location = Location::parse(&entry.url);
        let role = config.load_role.clone();
        async move {
            match load_file::<StagingSong>(
                pool,
                &location,
                role.as_deref(),
                config.load_error_limit,
                "staging_songs",
            )
            .await
            {
                Ok(rows) => Ok(Some(rows)),
                Err(EtlError::Source { location, detail }) if !entry.mandatory => {
                    warn!("Skipping optional manifest entry '{location}': {detail}");
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        }
    });

    let mut results = stream::iter(song_tasks).buffer_unordered(MAX_CONCURRENT_LOADS);
    while let Some(result) = results.next().await {
        match result {
            Ok(Some(rows)) => {
                report.song_files += 1;
                report.songs_loaded += rows;
            }
            Ok(None) => {}
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            info!(
                "Staging load complete: {} events from {} files, {} songs from {} files",
                report.events_loaded, report.event_files, report.songs_loaded, report.song_files
            );
            Ok(report)
        }
    }
}

// ---

/// Collect every `*.json` file under `prefix`, recursively, in path order.
fn resolve_prefix(prefix: &Path) -> Result<Vec<PathBuf>, EtlError> {
    // ---
    fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(&path, out)?;
            } else if path.extension().is_some_and(|ext| ext == "json") {
                out.push(path);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(prefix, &mut files).map_err(|e| EtlError::Source {
        location: prefix.display().to_string(),
        detail: e.to_string(),
    })?;
    files.sort();
    Ok(files)
}

/// Fetch and parse the song-data manifest.
async fn read_manifest(raw: &str, role: Option<&str>) -> Result<Vec<ManifestEntry>, EtlError> {
    // ---
    let location = Location::parse(raw);
    let text = fetch(&location, role).await?;

    let manifest: Manifest = serde_json::from_str(&text).map_err(|e| EtlError::Source {
        location: location.to_string(),
        detail: format!("invalid manifest: {e}"),
    })?;

    Ok(manifest.entries)
}

/// Retrieve one source file's contents.
///
/// Local paths are read from disk; URLs are fetched with the bulk-load
/// role reference as a bearer credential when one is configured.
async fn fetch(location: &Location, role: Option<&str>) -> Result<String, EtlError> {
    // ---
    match location {
        Location::Path(path) => {
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| EtlError::Source {
                    location: path.display().to_string(),
                    detail: e.to_string(),
                })
        }
        Location::Url(url) => {
            let mut request = reqwest::Client::new().get(url);
            if let Some(role) = role {
                request = request.bearer_auth(role);
            }

            let response = request
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| EtlError::Source {
                    location: url.clone(),
                    detail: e.to_string(),
                })?;

            response.text().await.map_err(|e| EtlError::Source {
                location: url.clone(),
                detail: e.to_string(),
            })
        }
    }
}

/// Parse newline-delimited JSON, skipping and counting malformed lines.
///
/// Aborts with [`EtlError::Load`] as soon as the malformed count exceeds
/// `limit`; the file's rows are then discarded entirely.
fn parse_lines<T: DeserializeOwned>(
    text: &str,
    location: &Location,
    limit: u32,
) -> Result<(Vec<T>, u32), EtlError> {
    // ---
    let mut rows = Vec::new();
    let mut errors = 0u32;

    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(row) => rows.push(row),
            Err(e) => {
                errors += 1;
                debug!("Malformed record at {location}:{}: {e}", lineno + 1);
                if errors > limit {
                    return Err(EtlError::Load {
                        location: location.to_string(),
                        errors,
                        limit,
                    });
                }
            }
        }
    }

    Ok((rows, errors))
}

/// Fetch, parse, and insert one source file into its staging relation.
async fn load_file<T>(
    pool: &PgPool,
    location: &Location,
    role: Option<&str>,
    limit: u32,
    target: &'static str,
) -> Result<u64, EtlError>
where
    T: DeserializeOwned + StagingInsert,
{
    // ---
    let text = fetch(location, role).await?;
    let (rows, errors) = parse_lines::<T>(&text, location, limit)?;

    if errors > 0 {
        warn!("{location}: skipped {errors} malformed records (limit {limit})");
    }

    let count = rows.len() as u64;
    for chunk in rows.chunks(INSERT_BATCH_SIZE) {
        T::insert_batch(pool, chunk).await?;
    }

    debug!("{location}: {count} rows into {target}");
    Ok(count)
}

// ---

/// Batched multi-row insert into a staging relation.
pub trait StagingInsert: Sized {
    fn insert_batch(
        pool: &PgPool,
        rows: &[Self],
    ) -> impl std::future::Future<Output = Result<(), sqlx::Error>> + Send;
}

impl StagingInsert for StagingEvent {
    async fn insert_batch(pool: &PgPool, rows: &[Self]) -> Result<(), sqlx::Error> {
        // ---
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO staging_events (artist_name, auth, first_name, gender, \
             item_in_session, last_name, length, level, location, method, page, \
             registration, session_id, song_title, status, start_time, user_agent, user_id) ",
        );
        qb.push_values(rows, |mut b, e| {
            b.push_bind(e.artist_name.clone())
                .push_bind(e.auth.clone())
                .push_bind(e.first_name.clone())
                .push_bind(e.gender.clone())
                .push_bind(e.item_in_session)
                .push_bind(e.last_name.clone())
                .push_bind(e.length)
                .push_bind(e.level.clone())
                .push_bind(e.location.clone())
                .push_bind(e.method.clone())
                .push_bind(e.page.clone())
                .push_bind(e.registration)
                .push_bind(e.session_id)
                .push_bind(e.song_title.clone())
                .push_bind(e.status)
                .push_bind(e.start_time)
                .push_bind(e.user_agent.clone())
                .push_bind(e.user_id);
        });
        qb.build().execute(pool).await?;

        Ok(())
    }
}

impl StagingInsert for StagingSong {
    async fn insert_batch(pool: &PgPool, rows: &[Self]) -> Result<(), sqlx::Error> {
        // ---
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO staging_songs (num_songs, artist_id, latitude, longitude, \
             location, artist_name, song_id, title, duration, year) ",
        );
        qb.push_values(rows, |mut b, s| {
            b.push_bind(s.num_songs)
                .push_bind(s.artist_id.clone())
                .push_bind(s.latitude)
                .push_bind(s.longitude)
                .push_bind(s.location.clone())
                .push_bind(s.artist_name.clone())
                .push_bind(s.song_id.clone())
                .push_bind(s.title.clone())
                .push_bind(s.duration)
                .push_bind(s.year);
        });
        qb.build().execute(pool).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn path_location(name: &str) -> Location {
        // ---
        Location::Path(PathBuf::from(name))
    }

    #[test]
    fn location_parse_distinguishes_urls_from_paths() {
        // ---
        assert_eq!(
            Location::parse("https://example.com/songs/part-0.json"),
            Location::Url("https://example.com/songs/part-0.json".to_string())
        );
        assert_eq!(
            Location::parse("song_data/part-0.json"),
            Location::Path(PathBuf::from("song_data/part-0.json"))
        );
    }

    #[test]
    fn manifest_parses_entries() {
        // ---
        let text = r#"{
            "entries": [
                {"url": "song_data/A/A/A/part-0.json", "mandatory": true},
                {"url": "https://bucket.example.com/part-1.json"}
            ]
        }"#;

        let manifest: Manifest = serde_json::from_str(text).unwrap();
        assert_eq!(manifest.entries.len(), 2);
        assert!(manifest.entries[0].mandatory);
        // mandatory defaults to false when omitted
        assert!(!manifest.entries[1].mandatory);
    }

    #[test]
    fn parse_lines_skips_and_counts_malformed_records() {
        // ---
        let text = "\
            {\"song_id\":\"S1\",\"title\":\"one\"}\n\
            not json at all\n\
            \n\
            {\"song_id\":\"S2\",\"title\":\"two\"}\n";

        let (rows, errors) =
            parse_lines::<StagingSong>(text, &path_location("part-0.json"), 10).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(errors, 1);
        assert_eq!(rows[0].song_id.as_deref(), Some("S1"));
        assert_eq!(rows[1].song_id.as_deref(), Some("S2"));
    }

    #[test]
    fn parse_lines_aborts_once_error_limit_is_exceeded() {
        // ---
        let mut text = String::new();
        for _ in 0..3 {
            text.push_str("garbage\n");
        }

        let err = parse_lines::<StagingSong>(&text, &path_location("bad.json"), 2).unwrap_err();
        match err {
            EtlError::Load {
                location,
                errors,
                limit,
            } => {
                assert_eq!(location, "bad.json");
                assert_eq!(errors, 3);
                assert_eq!(limit, 2);
            }
            other => panic!("expected Load error, got {other:?}"),
        }
    }

    #[test]
    fn parse_lines_tolerates_errors_at_the_limit() {
        // ---
        let text = "garbage\n{\"song_id\":\"S1\"}\ngarbage\n";
        let (rows, errors) =
            parse_lines::<StagingSong>(text, &path_location("edge.json"), 2).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(errors, 2);
    }

    #[test]
    fn resolve_prefix_finds_json_files_recursively_in_order() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("2018/11");
        std::fs::create_dir_all(&sub).unwrap();

        std::fs::write(dir.path().join("b-events.json"), "{}\n").unwrap();
        std::fs::write(sub.join("a-events.json"), "{}\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = resolve_prefix(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        // nested 2018/11 sorts before the root-level file
        assert!(files[0].ends_with("2018/11/a-events.json"));
        assert!(files[1].ends_with("b-events.json"));
    }

    #[test]
    fn resolve_prefix_reports_missing_directory() {
        // ---
        let err = resolve_prefix(Path::new("/no/such/prefix")).unwrap_err();
        assert!(matches!(err, EtlError::Source { .. }));
    }
}
