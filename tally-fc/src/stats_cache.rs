//! Session stats cache
//!
//! Stats depend on the whole filter, so entries are keyed by fingerprint and
//! never shared between filters. Lives only as long as the process.

use std::collections::HashMap;
use std::sync::Arc;
use tally_common::{Fingerprint, TrackStats};

/// Stats of one filter, keyed by track id
pub type StatsMap = HashMap<String, TrackStats>;

#[derive(Debug, Default)]
pub struct StatsCache {
    entries: HashMap<Fingerprint, Arc<StatsMap>>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<StatsMap>> {
        self.entries.get(fingerprint).cloned()
    }

    pub fn insert<I>(&mut self, fingerprint: Fingerprint, stats: I) -> Arc<StatsMap>
    where
        I: IntoIterator<Item = TrackStats>,
    {
        let map: StatsMap = stats.into_iter().map(|s| (s.track_id.clone(), s)).collect();
        let map = Arc::new(map);
        self.entries.insert(fingerprint, map.clone());
        map
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
