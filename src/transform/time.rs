//! Time-dimension derivation from the derived fact rows.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::models::{Songplay, TimeRow};

// ---

/// Calendar rows for exactly the distinct timestamps present in the fact
/// rows: no orphans, none missing.
pub fn derive(songplays: &[Songplay]) -> Vec<TimeRow> {
    // ---
    let distinct: BTreeSet<DateTime<Utc>> = songplays.iter().map(|p| p.start_time).collect();
    distinct.into_iter().map(TimeRow::from_start_time).collect()
}
