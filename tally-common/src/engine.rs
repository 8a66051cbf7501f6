//! Filter & stats engine
//!
//! Pure function from (tracks, play events, fetch filter) to an ordered list of
//! tracks carrying per-filter aggregates. Stages run in a fixed order, each one
//! narrowing the candidate set:
//!
//! 1. Trim events to `playedAtRange` (when present), then drop tracks without plays
//! 2. Keep tracks with at least one play by a selected user
//! 3. Artist facet (include over exclude)
//! 4. Album facet (include over exclude)
//! 5. Trim events to the selected users
//! 6. Aggregate (`totalPlays`, `totalMS`, `playsPerUser`), then apply the
//!    numeric range facets
//! 7. Stable sort by `spec.sort`, then reverse the whole list if `spec.reverse`
//!
//! An empty user selection yields an empty result, not "all users".

use crate::model::{FilterSpec, PlayEvent, SortMethod, TrackRecord, TrackStats, TrackWithStats};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Run the engine over one dataset snapshot
///
/// Tracks keep their input order until the stage 7 sort, so ties resolve to the
/// order the upstream store returned them in.
pub fn filter_tracks(
    tracks: &[TrackRecord],
    plays: &[PlayEvent],
    spec: &FilterSpec,
) -> Vec<TrackWithStats> {
    let plays_by_track = group_plays(plays, spec);

    let mut out: Vec<TrackWithStats> = tracks
        .iter()
        .filter_map(|track| {
            let events = plays_by_track.get(track.id.as_str())?;
            if events.is_empty() {
                return None;
            }
            if !events.iter().any(|p| spec.selects_user(&p.user_id)) {
                return None;
            }
            if !spec.artists.admits_any(track.artist_ids()) {
                return None;
            }
            if !spec.albums.admits(&track.album.id) {
                return None;
            }

            let trimmed: Vec<&PlayEvent> = events
                .iter()
                .copied()
                .filter(|p| spec.selects_user(&p.user_id))
                .collect();

            let stats = aggregate(track, &trimmed);
            if !passes_ranges(track, &stats, spec) {
                return None;
            }

            Some(TrackWithStats {
                track: track.clone(),
                stats,
            })
        })
        .collect();

    sort_tracks(&mut out, spec.sort, spec.reverse);
    out
}

/// Index events by track id, honoring `playedAtRange`
fn group_plays<'a>(plays: &'a [PlayEvent], spec: &FilterSpec) -> HashMap<&'a str, Vec<&'a PlayEvent>> {
    let mut map: HashMap<&str, Vec<&PlayEvent>> = HashMap::new();
    for play in plays {
        if let Some(range) = &spec.played_at_range {
            if !range.contains(&play.played_at) {
                continue;
            }
        }
        map.entry(play.track_id.as_str()).or_default().push(play);
    }
    map
}

/// Aggregate already-trimmed events for one track
pub fn aggregate(track: &TrackRecord, events: &[&PlayEvent]) -> TrackStats {
    let mut plays_per_user: BTreeMap<String, i64> = BTreeMap::new();
    for play in events {
        *plays_per_user.entry(play.user_id.clone()).or_insert(0) += 1;
    }

    let total_plays = events.len() as i64;
    TrackStats {
        track_id: track.id.clone(),
        total_plays,
        total_ms: total_plays * track.duration_ms,
        plays_per_user,
    }
}

fn passes_ranges(track: &TrackRecord, stats: &TrackStats, spec: &FilterSpec) -> bool {
    spec.play_count_range
        .map_or(true, |r| r.contains(stats.total_plays))
        && spec.playtime_range.map_or(true, |r| r.contains(stats.total_ms))
        && spec
            .track_length_range
            .map_or(true, |r| r.contains(track.duration_ms))
}

// ========================================
// Sorting
// ========================================

/// Comparator for the numeric sort methods, largest first
fn compare_numeric(sort: SortMethod, a: &TrackWithStats, b: &TrackWithStats) -> Ordering {
    let key = |t: &TrackWithStats| match sort {
        SortMethod::Playtime => t.stats.total_ms,
        SortMethod::TrackLength => t.track.duration_ms,
        _ => t.stats.total_plays,
    };
    key(b).cmp(&key(a))
}

/// Case-insensitive first, then exact, so "alpha" and "Alpha" sit together
fn text_key(text: String) -> (String, String) {
    (text.to_lowercase(), text)
}

/// Stable sort, then reverse the final list when requested
///
/// Reversal is applied to the sorted list instead of negating the comparator,
/// so tied tracks come out in inverted input order. Text keys are built once
/// per track.
pub fn sort_tracks(tracks: &mut [TrackWithStats], sort: SortMethod, reverse: bool) {
    match sort {
        SortMethod::TrackName => tracks.sort_by_cached_key(|t| text_key(t.track.name.clone())),
        SortMethod::ArtistName => {
            tracks.sort_by_cached_key(|t| text_key(t.track.joined_artist_names()))
        }
        SortMethod::Playtime | SortMethod::PlayCount | SortMethod::TrackLength => {
            tracks.sort_by(|a, b| compare_numeric(sort, a, b))
        }
    }
    if reverse {
        tracks.reverse();
    }
}
