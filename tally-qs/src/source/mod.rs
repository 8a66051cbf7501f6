//! Upstream listening-history source
//!
//! The store owning raw tracks and play events is an external collaborator.
//! The query handler only needs two reads, treated as one consistent snapshot
//! per request:
//! - play events for a set of users
//! - track/album/artist metadata for a set of track ids

use async_trait::async_trait;
use std::collections::HashSet;
use tally_common::{FilterSpec, PlayEvent, TrackRecord};
use thiserror::Error;

mod sqlite;

pub use sqlite::{init_schema, SqliteHistorySource};

/// Upstream read failures. Never retried here.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("history source unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to the listening history
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Play events for the given users, in any order
    async fn load_plays(&self, user_ids: &[String]) -> Result<Vec<PlayEvent>, SourceError>;

    /// Metadata for the given tracks, in the store's preferred listing order
    async fn load_tracks(&self, track_ids: &[String]) -> Result<Vec<TrackRecord>, SourceError>;
}

/// Everything the engine needs for one request
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    pub tracks: Vec<TrackRecord>,
    pub plays: Vec<PlayEvent>,
}

/// Load the snapshot relevant to `filter`
///
/// An empty user selection matches nothing, so the store is not queried.
pub async fn load_snapshot(
    source: &dyn HistorySource,
    filter: &FilterSpec,
) -> Result<HistorySnapshot, SourceError> {
    if filter.users.is_empty() {
        return Ok(HistorySnapshot::default());
    }

    let users = filter.canonical().users;
    let plays = source.load_plays(&users).await?;

    let mut seen = HashSet::new();
    let track_ids: Vec<String> = plays
        .iter()
        .filter(|p| seen.insert(p.track_id.as_str()))
        .map(|p| p.track_id.clone())
        .collect();

    if track_ids.is_empty() {
        return Ok(HistorySnapshot { tracks: Vec::new(), plays });
    }

    let tracks = source.load_tracks(&track_ids).await?;
    Ok(HistorySnapshot { tracks, plays })
}
