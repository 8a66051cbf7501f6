//! SQLite-backed history source
//!
//! Schema (owned by the ingestion side, bootstrapped here if missing):
//!
//! ```text
//! albums(id, name, url, image)
//! artists(id, name, url, image)
//! tracks(id, name, duration_ms, url, image, album_id, color)
//! track_artists(track_id, artist_id, position)
//! track_plays(track_id, user_id, played_at)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use tally_common::{AlbumRef, ArtistRef, PlayEvent, TrackRecord};
use tracing::debug;

use super::{HistorySource, SourceError};

/// Bound parameters per statement, well under SQLite's variable limit
const IN_CHUNK: usize = 500;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS albums (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        url TEXT NOT NULL DEFAULT '',
        image TEXT
    )",
    "CREATE TABLE IF NOT EXISTS artists (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        url TEXT NOT NULL DEFAULT '',
        image TEXT
    )",
    "CREATE TABLE IF NOT EXISTS tracks (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        duration_ms INTEGER NOT NULL,
        url TEXT NOT NULL DEFAULT '',
        image TEXT,
        album_id TEXT NOT NULL REFERENCES albums(id),
        color TEXT
    )",
    "CREATE TABLE IF NOT EXISTS track_artists (
        track_id TEXT NOT NULL REFERENCES tracks(id),
        artist_id TEXT NOT NULL REFERENCES artists(id),
        position INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (track_id, artist_id)
    )",
    "CREATE TABLE IF NOT EXISTS track_plays (
        track_id TEXT NOT NULL REFERENCES tracks(id),
        user_id TEXT NOT NULL,
        played_at TEXT NOT NULL,
        PRIMARY KEY (track_id, user_id, played_at)
    )",
    "CREATE INDEX IF NOT EXISTS idx_track_plays_user ON track_plays(user_id)",
];

/// History source reading from a SQLite database
#[derive(Clone)]
pub struct SqliteHistorySource {
    pool: SqlitePool,
}

impl SqliteHistorySource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file and ensure the schema
    pub async fn open(db_path: &Path) -> Result<Self, SourceError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        init_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Create tables and indexes if they do not exist
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait]
impl HistorySource for SqliteHistorySource {
    async fn load_plays(&self, user_ids: &[String]) -> Result<Vec<PlayEvent>, SourceError> {
        let mut plays = Vec::new();

        for chunk in user_ids.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT track_id, user_id, played_at FROM track_plays
                 WHERE user_id IN ({})
                 ORDER BY played_at DESC",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query_as::<_, (String, String, DateTime<Utc>)>(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            let rows = query.fetch_all(&self.pool).await?;
            plays.extend(rows.into_iter().map(|(track_id, user_id, played_at)| PlayEvent {
                track_id,
                user_id,
                played_at,
            }));
        }

        debug!(users = user_ids.len(), plays = plays.len(), "Loaded play events");
        Ok(plays)
    }

    async fn load_tracks(&self, track_ids: &[String]) -> Result<Vec<TrackRecord>, SourceError> {
        // (play count, record) so chunks can be merged into one listing order
        let mut tracks: Vec<(i64, TrackRecord)> = Vec::with_capacity(track_ids.len());
        let mut artists: HashMap<String, Vec<ArtistRef>> = HashMap::new();

        for chunk in track_ids.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT t.id, t.name, t.duration_ms, t.url, t.image, t.color,
                        a.id, a.name, a.url, a.image,
                        (SELECT COUNT(*) FROM track_plays p WHERE p.track_id = t.id)
                 FROM tracks t
                 JOIN albums a ON a.id = t.album_id
                 WHERE t.id IN ({})",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            for row in query.fetch_all(&self.pool).await? {
                let record = TrackRecord {
                    id: row.try_get(0)?,
                    name: row.try_get(1)?,
                    duration_ms: row.try_get(2)?,
                    url: row.try_get(3)?,
                    image: row.try_get(4)?,
                    color: row.try_get(5)?,
                    album: AlbumRef {
                        id: row.try_get(6)?,
                        name: row.try_get(7)?,
                        url: row.try_get(8)?,
                        image: row.try_get(9)?,
                    },
                    artists: Vec::new(),
                };
                tracks.push((row.try_get(10)?, record));
            }

            let sql = format!(
                "SELECT ta.track_id, ar.id, ar.name, ar.url, ar.image
                 FROM track_artists ta
                 JOIN artists ar ON ar.id = ta.artist_id
                 WHERE ta.track_id IN ({})
                 ORDER BY ta.track_id, ta.position",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            for row in query.fetch_all(&self.pool).await? {
                let track_id: String = row.try_get(0)?;
                artists.entry(track_id).or_default().push(ArtistRef {
                    id: row.try_get(1)?,
                    name: row.try_get(2)?,
                    url: row.try_get(3)?,
                    image: row.try_get(4)?,
                });
            }
        }

        // Most played first, id as the tie-break so listing order is stable
        tracks.sort_by(|(a_count, a), (b_count, b)| b_count.cmp(a_count).then_with(|| a.id.cmp(&b.id)));

        let records = tracks
            .into_iter()
            .map(|(_, mut record)| {
                record.artists = artists.remove(&record.id).unwrap_or_default();
                record
            })
            .collect::<Vec<_>>();

        debug!(requested = track_ids.len(), loaded = records.len(), "Loaded track metadata");
        Ok(records)
    }
}
