//! Persisted track-data cache
//!
//! Track metadata rarely changes, so it is kept across sessions in a JSON
//! file keyed by track id. A file that cannot be read or parsed is removed
//! and the cache starts empty.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tally_common::TrackRecord;
use tracing::{debug, info, warn};

use crate::error::Result;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedTracks {
    version: u32,
    tracks: BTreeMap<String, TrackRecord>,
}

/// Track records keyed by id, optionally backed by a file
#[derive(Debug, Default)]
pub struct TrackDataCache {
    path: Option<PathBuf>,
    tracks: BTreeMap<String, TrackRecord>,
    dirty: bool,
}

impl TrackDataCache {
    /// Cache that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache file at `path`, starting empty if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let tracks = match read_file(&path) {
            Ok(Some(tracks)) => {
                info!("Loaded {} cached tracks from {}", tracks.len(), path.display());
                tracks
            }
            Ok(None) => BTreeMap::new(),
            Err(reason) => {
                warn!("Discarding track cache {}: {}", path.display(), reason);
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
                BTreeMap::new()
            }
        };

        Self {
            path: Some(path),
            tracks,
            dirty: false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&TrackRecord> {
        self.tracks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tracks.contains_key(id)
    }

    /// Ids from `ids` not yet cached, in input order
    pub fn missing(&self, ids: &[String]) -> Vec<String> {
        ids.iter().filter(|id| !self.contains(id)).cloned().collect()
    }

    /// Insert or replace records
    pub fn insert_all<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = TrackRecord>,
    {
        let mut count = 0;
        for record in records {
            self.tracks.insert(record.id.clone(), record);
            count += 1;
        }
        if count > 0 {
            self.dirty = true;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the cache file if anything changed since the last save
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let persisted = PersistedTracks {
            version: FORMAT_VERSION,
            tracks: self.tracks.clone(),
        };
        // Write then rename so a crash never leaves a truncated file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&persisted)?)?;
        fs::rename(&tmp, path)?;

        self.dirty = false;
        debug!("Saved {} tracks to {}", self.tracks.len(), path.display());
        Ok(())
    }
}

/// `Ok(None)` when the file does not exist, `Err` with a reason when unusable
fn read_file(path: &Path) -> std::result::Result<Option<BTreeMap<String, TrackRecord>>, String> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };

    let persisted: PersistedTracks = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
    if persisted.version != FORMAT_VERSION {
        return Err(format!("unsupported format version {}", persisted.version));
    }
    Ok(Some(persisted.tracks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_common::{AlbumRef, ArtistRef};
    use tempfile::TempDir;

    fn record(id: &str) -> TrackRecord {
        TrackRecord {
            id: id.into(),
            name: format!("Track {id} ü"),
            duration_ms: 123_000,
            url: String::new(),
            image: None,
            album: AlbumRef {
                id: "AL1".into(),
                name: "Album".into(),
                url: String::new(),
                image: None,
            },
            artists: vec![ArtistRef {
                id: "AR1".into(),
                name: "Artist".into(),
                url: String::new(),
                image: None,
            }],
            color: Some("#112233".into()),
        }
    }

    #[test]
    fn test_missing_preserves_order() {
        let mut cache = TrackDataCache::in_memory();
        cache.insert_all([record("T2")]);
        let ids = vec!["T3".to_string(), "T2".to_string(), "T1".to_string()];
        assert_eq!(cache.missing(&ids), vec!["T3", "T1"]);
    }

    #[test]
    fn test_persists_across_sessions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tally").join("track-data.json");

        let mut cache = TrackDataCache::open(&path);
        assert!(cache.is_empty());
        cache.insert_all([record("T1"), record("T2")]);
        cache.save().unwrap();
        assert!(path.exists());

        let reopened = TrackDataCache::open(&path);
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("T1"), Some(&record("T1")));
    }

    #[test]
    fn test_corrupt_file_is_discarded_and_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("track-data.json");
        fs::write(&path, b"{ not json").unwrap();

        let cache = TrackDataCache::open(&path);
        assert!(cache.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_unknown_version_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("track-data.json");
        fs::write(&path, br#"{"version":99,"tracks":{}}"#).unwrap();

        assert!(TrackDataCache::open(&path).is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_save_skipped_when_clean() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("track-data.json");

        let mut cache = TrackDataCache::open(&path);
        cache.save().unwrap();
        assert!(!path.exists(), "nothing to write");

        assert_eq!(cache.insert_all(Vec::new()), 0);
        cache.save().unwrap();
        assert!(!path.exists());
    }
}
