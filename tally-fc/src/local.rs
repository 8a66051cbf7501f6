//! Local (client-only) refinement of the working set
//!
//! Album allow-list, then search, then sort. Never touches the network.

use tally_common::engine::sort_tracks;
use tally_common::{LocalFilterSpec, TrackWithStats};

/// Apply `local` to an already-fetched working set
pub fn apply_local_filter(tracks: &[TrackWithStats], local: &LocalFilterSpec) -> Vec<TrackWithStats> {
    let needle = local.search.trim().to_lowercase();

    let mut out: Vec<TrackWithStats> = tracks
        .iter()
        .filter(|t| local.album.include.is_empty() || local.album.include.contains(&t.track.album.id))
        .filter(|t| needle.is_empty() || matches_search(t, &needle))
        .cloned()
        .collect();

    sort_tracks(&mut out, local.sort, local.reverse);
    out
}

/// Case-insensitive substring over track, artist and album names
fn matches_search(t: &TrackWithStats, needle: &str) -> bool {
    t.track.name.to_lowercase().contains(needle)
        || t.track
            .artists
            .iter()
            .any(|a| a.name.to_lowercase().contains(needle))
        || t.track.album.name.to_lowercase().contains(needle)
}
