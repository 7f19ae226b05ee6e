//! Record types for the staging and star-schema relations.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Deserialize;

// ---

/// One raw event-log line, loaded verbatim into `staging_events`.
///
/// Serde renames map the log file's camelCase keys onto the staging column
/// names. Every field is optional: staging accepts whatever the logs contain
/// and the transform filters later (`page = "NextSong"`, non-null `user_id`).
#[derive(Debug, Clone, Deserialize, sqlx::FromRow)]
pub struct StagingEvent {
    // ---
    #[serde(rename = "artist")]
    pub artist_name: Option<String>,
    pub auth: Option<String>,
    #[serde(rename = "firstName")]
    pub first_name: Option<String>,
    pub gender: Option<String>,
    #[serde(rename = "itemInSession")]
    pub item_in_session: Option<i32>,
    #[serde(rename = "lastName")]
    pub last_name: Option<String>,
    /// Play length in seconds.
    pub length: Option<f64>,
    pub level: Option<String>,
    pub location: Option<String>,
    pub method: Option<String>,
    pub page: Option<String>,
    pub registration: Option<f64>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<i64>,
    #[serde(rename = "song")]
    pub song_title: Option<String>,
    pub status: Option<i32>,
    /// Event timestamp in epoch milliseconds.
    #[serde(rename = "ts")]
    pub start_time: Option<i64>,
    #[serde(rename = "userAgent")]
    pub user_agent: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<i64>,
}

/// One raw song-metadata record, loaded verbatim into `staging_songs`.
#[derive(Debug, Clone, Deserialize, sqlx::FromRow)]
pub struct StagingSong {
    // ---
    pub num_songs: Option<i32>,
    pub artist_id: Option<String>,
    #[serde(rename = "artist_latitude")]
    pub latitude: Option<f64>,
    #[serde(rename = "artist_longitude")]
    pub longitude: Option<f64>,
    #[serde(rename = "artist_location")]
    pub location: Option<String>,
    pub artist_name: Option<String>,
    pub song_id: Option<String>,
    pub title: Option<String>,
    /// Track duration in seconds.
    pub duration: Option<f64>,
    pub year: Option<i32>,
}

// ---

/// `users` dimension row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct User {
    // ---
    pub user_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: Option<String>,
}

/// `songs` dimension row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Song {
    // ---
    pub song_id: String,
    pub title: Option<String>,
    pub artist_id: Option<String>,
    pub year: Option<i32>,
    pub duration: Option<f64>,
}

/// `artists` dimension row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Artist {
    // ---
    pub artist_id: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// `songplays` fact row. `songplay_id` is assigned by the warehouse
/// (`BIGSERIAL`) and never appears here.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Songplay {
    // ---
    pub start_time: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub level: Option<String>,
    pub song_id: Option<String>,
    pub artist_id: Option<String>,
    pub session_id: Option<i64>,
    pub location: Option<String>,
    pub user_agent: Option<String>,
}

/// `time` dimension row: one songplay timestamp decomposed into calendar
/// parts.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TimeRow {
    // ---
    pub start_time: DateTime<Utc>,
    pub hour: i32,
    pub day: i32,
    pub week: i32,
    pub month: i32,
    pub year: i32,
    pub weekday: String,
}

// ---

/// Weekday names under the 0=Sunday indexing convention.
const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Convert an event timestamp from epoch milliseconds, preserving
/// millisecond precision. `None` for values outside the representable range.
pub fn start_time_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    // ---
    DateTime::from_timestamp_millis(ms)
}

impl TimeRow {
    /// Decompose a songplay timestamp into calendar parts.
    ///
    /// Week is the ISO week number; weekday is the day name indexed with
    /// Sunday as day 0.
    pub fn from_start_time(start_time: DateTime<Utc>) -> Self {
        // ---
        let weekday_idx = start_time.weekday().num_days_from_sunday() as usize;

        TimeRow {
            start_time,
            hour: start_time.hour() as i32,
            day: start_time.day() as i32,
            week: start_time.iso_week().week() as i32,
            month: start_time.month() as i32,
            year: start_time.year(),
            weekday: WEEKDAY_NAMES[weekday_idx].to_string(),
        }
    }
}
