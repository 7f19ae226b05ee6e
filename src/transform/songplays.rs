//! Fact derivation: the `NextSong` filter and the fuzzy event-to-song join.
//!
//! The join predicate is approximate on purpose: the two sources encode the
//! same track slightly differently, so equality is taken over case-folded
//! title, case-folded artist name, and duration rounded to the nearest
//! second. It runs as a hash join on that composite key. Left-join
//! semantics: every qualifying event emits at least one fact row, with null
//! `song_id`/`artist_id` when the catalog has no match.

use std::collections::HashMap;

use tracing::debug;

use crate::models::{start_time_from_millis, Songplay, StagingEvent, StagingSong};

// ---

/// Events qualify for the fact table only on this page value.
const NEXT_SONG: &str = "NextSong";

/// Tie-break policy when several catalog songs match one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// One fact row per matching song. Ambiguous matches duplicate the
    /// play; this mirrors the warehouse's plain left join.
    AllMatches,
    /// Exactly one fact row per event: the match with the lowest `song_id`.
    FirstBySongId,
}

/// Composite approximate key the join hashes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MatchKey {
    title: String,
    artist: String,
    seconds: i64,
}

impl MatchKey {
    // ---
    fn for_event(e: &StagingEvent) -> Option<MatchKey> {
        // ---
        Some(MatchKey {
            title: e.song_title.as_ref()?.to_lowercase(),
            artist: e.artist_name.as_ref()?.to_lowercase(),
            seconds: e.length?.round() as i64,
        })
    }

    fn for_song(s: &StagingSong) -> Option<MatchKey> {
        // ---
        Some(MatchKey {
            title: s.title.as_ref()?.to_lowercase(),
            artist: s.artist_name.as_ref()?.to_lowercase(),
            seconds: s.duration?.round() as i64,
        })
    }
}

/// The join predicate: does this event's play refer to this catalog song?
///
/// False whenever either side is missing a component of the key.
pub fn matches(event: &StagingEvent, song: &StagingSong) -> bool {
    // ---
    match (MatchKey::for_event(event), MatchKey::for_song(song)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

// ---

/// Derive the `songplays` fact rows from the staging snapshot.
///
/// Filters events to `page = "NextSong"`, converts `start_time` from epoch
/// milliseconds, and left-joins against the song catalog under `policy`.
/// Qualifying events without a convertible timestamp cannot be represented
/// (the fact table's `start_time` is NOT NULL) and are dropped with a log
/// line.
pub fn derive(events: &[StagingEvent], songs: &[StagingSong], policy: MatchPolicy) -> Vec<Songplay> {
    // ---
    let mut catalog: HashMap<MatchKey, Vec<&StagingSong>> = HashMap::new();
    for song in songs {
        if let Some(key) = MatchKey::for_song(song) {
            catalog.entry(key).or_default().push(song);
        }
    }
    // Candidate order decides the FirstBySongId winner; sort for determinism.
    for candidates in catalog.values_mut() {
        candidates.sort_by(|a, b| a.song_id.cmp(&b.song_id));
    }

    let mut out = Vec::new();
    for event in events {
        if event.page.as_deref() != Some(NEXT_SONG) {
            continue;
        }

        let Some(start_time) = event.start_time.and_then(start_time_from_millis) else {
            debug!(
                "Dropping NextSong event without usable timestamp (session {:?})",
                event.session_id
            );
            continue;
        };

        let emit = |song: Option<&StagingSong>| Songplay {
            start_time,
            user_id: event.user_id,
            level: event.level.clone(),
            song_id: song.and_then(|s| s.song_id.clone()),
            artist_id: song.and_then(|s| s.artist_id.clone()),
            session_id: event.session_id,
            location: event.location.clone(),
            user_agent: event.user_agent.clone(),
        };

        let candidates = MatchKey::for_event(event).and_then(|key| catalog.get(&key));
        match (candidates, policy) {
            (None, _) => out.push(emit(None)),
            (Some(list), MatchPolicy::FirstBySongId) => out.push(emit(list.first().copied())),
            (Some(list), MatchPolicy::AllMatches) => {
                for song in list {
                    debug_assert!(matches(event, song));
                    out.push(emit(Some(song)));
                }
            }
        }
    }

    out
}
