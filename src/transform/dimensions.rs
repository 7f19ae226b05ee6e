//! Dimension derivation: grouped reduce with explicit merge reducers.
//!
//! Staging data may carry duplicate or null keys; each dimension is built by
//! grouping on its primary key (null keys excluded) and folding duplicates
//! with a `merge(a, b) -> winner` reducer. The shipped reducers are max-wins
//! per field: the greatest non-null value under the store's ordering. That
//! is last-wins by value, not by time: a user whose `level` flips between
//! "free" and "paid" always resolves to "paid". Swapping the reducer changes
//! the resolution policy without touching the pipeline shape.

use std::collections::BTreeMap;

use crate::models::{Artist, Song, StagingEvent, StagingSong, User};

// ---

/// Keep the greater of two candidate values, treating null as smallest.
fn max_field<T: PartialOrd>(a: Option<T>, b: Option<T>) -> Option<T> {
    // ---
    match (a, b) {
        (Some(x), Some(y)) => Some(if y > x { y } else { x }),
        (Some(x), None) => Some(x),
        (None, y) => y,
    }
}

/// Group rows by key and fold duplicates with the given reducer.
///
/// `BTreeMap` keeps the output in key order, so downstream inserts are
/// deterministic run to run.
fn reduce_by_key<K, R, I, F>(rows: I, merge: F) -> Vec<R>
where
    K: Ord,
    I: Iterator<Item = (K, R)>,
    F: Fn(R, R) -> R,
{
    // ---
    let mut grouped: BTreeMap<K, R> = BTreeMap::new();
    for (key, row) in rows {
        let merged = match grouped.remove(&key) {
            Some(existing) => merge(existing, row),
            None => row,
        };
        grouped.insert(key, merged);
    }
    grouped.into_values().collect()
}

// ---

fn merge_users(a: User, b: User) -> User {
    // ---
    User {
        user_id: a.user_id,
        first_name: max_field(a.first_name, b.first_name),
        last_name: max_field(a.last_name, b.last_name),
        gender: max_field(a.gender, b.gender),
        level: max_field(a.level, b.level),
    }
}

fn merge_songs(a: Song, b: Song) -> Song {
    // ---
    Song {
        song_id: a.song_id,
        title: max_field(a.title, b.title),
        artist_id: max_field(a.artist_id, b.artist_id),
        year: max_field(a.year, b.year),
        duration: max_field(a.duration, b.duration),
    }
}

fn merge_artists(a: Artist, b: Artist) -> Artist {
    // ---
    Artist {
        artist_id: a.artist_id,
        name: max_field(a.name, b.name),
        location: max_field(a.location, b.location),
        latitude: max_field(a.latitude, b.latitude),
        longitude: max_field(a.longitude, b.longitude),
    }
}

// ---

/// Derive the `users` dimension from staging events.
///
/// Rows with a null `user_id` are excluded entirely.
pub fn derive_users(events: &[StagingEvent]) -> Vec<User> {
    // ---
    let keyed = events.iter().filter_map(|e| {
        let user_id = e.user_id?;
        Some((
            user_id,
            User {
                user_id,
                first_name: e.first_name.clone(),
                last_name: e.last_name.clone(),
                gender: e.gender.clone(),
                level: e.level.clone(),
            },
        ))
    });

    reduce_by_key(keyed, merge_users)
}

/// Derive the `songs` dimension from staging song metadata.
pub fn derive_songs(songs: &[StagingSong]) -> Vec<Song> {
    // ---
    let keyed = songs.iter().filter_map(|s| {
        let song_id = s.song_id.clone()?;
        Some((
            song_id.clone(),
            Song {
                song_id,
                title: s.title.clone(),
                artist_id: s.artist_id.clone(),
                year: s.year,
                duration: s.duration,
            },
        ))
    });

    reduce_by_key(keyed, merge_songs)
}

/// Derive the `artists` dimension from staging song metadata.
pub fn derive_artists(songs: &[StagingSong]) -> Vec<Artist> {
    // ---
    let keyed = songs.iter().filter_map(|s| {
        let artist_id = s.artist_id.clone()?;
        Some((
            artist_id.clone(),
            Artist {
                artist_id,
                name: s.artist_name.clone(),
                location: s.location.clone(),
                latitude: s.latitude,
                longitude: s.longitude,
            },
        ))
    });

    reduce_by_key(keyed, merge_artists)
}
