//! Server-side result cache
//!
//! Three independent stores (index, data, stats), each mapping a filter
//! fingerprint to an encoded packet. Entries are written lazily by the query
//! handler on a miss and never invalidated individually: a background task
//! empties every store on a fixed interval (10 minutes by default). There is
//! no size bound between clears.
//!
//! Locks are held only for a single map operation. Concurrent puts for the
//! same fingerprint are last-writer-wins, which is harmless because the same
//! filter over the same snapshot encodes to the same bytes. A read racing a
//! clear may still return the old bytes.
//!
//! Known limitation: there is no in-flight de-duplication. Two concurrent
//! misses on a never-cached fingerprint both run the engine.

use axum::body::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tally_common::api::PacketKind;
use tally_common::Fingerprint;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Default clear interval
pub const DEFAULT_CLEAR_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Result cache seam, so tests can run with [`NullResultCache`] and a
/// multi-instance deployment could plug in a shared store
pub trait ResultCache: Send + Sync {
    fn get(&self, kind: PacketKind, fingerprint: &Fingerprint) -> Option<Bytes>;
    fn put(&self, kind: PacketKind, fingerprint: Fingerprint, packet: Bytes);
    /// Empty all three stores
    fn clear(&self);
    /// Total entries across all stores
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Store = RwLock<HashMap<Fingerprint, Bytes>>;

/// In-process cache, one map per packet kind
#[derive(Default)]
pub struct MemoryResultCache {
    index: Store,
    data: Store,
    stats: Store,
}

impl MemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, kind: PacketKind) -> &Store {
        match kind {
            PacketKind::Index => &self.index,
            PacketKind::Data => &self.data,
            PacketKind::Stats => &self.stats,
        }
    }
}

impl ResultCache for MemoryResultCache {
    fn get(&self, kind: PacketKind, fingerprint: &Fingerprint) -> Option<Bytes> {
        let map = self.store(kind).read().unwrap_or_else(|e| e.into_inner());
        map.get(fingerprint).cloned()
    }

    fn put(&self, kind: PacketKind, fingerprint: Fingerprint, packet: Bytes) {
        let mut map = self.store(kind).write().unwrap_or_else(|e| e.into_inner());
        map.insert(fingerprint, packet);
    }

    fn clear(&self) {
        for kind in PacketKind::ALL {
            self.store(kind)
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
        }
    }

    fn len(&self) -> usize {
        PacketKind::ALL
            .iter()
            .map(|kind| self.store(*kind).read().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }
}

/// Cache that never stores anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResultCache;

impl ResultCache for NullResultCache {
    fn get(&self, _kind: PacketKind, _fingerprint: &Fingerprint) -> Option<Bytes> {
        None
    }

    fn put(&self, _kind: PacketKind, _fingerprint: Fingerprint, _packet: Bytes) {}

    fn clear(&self) {}

    fn len(&self) -> usize {
        0
    }
}

/// Spawn the background task that empties the cache every `every`
///
/// The first clear happens one full interval after spawning.
pub fn spawn_eviction_task(cache: Arc<dyn ResultCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Result cache eviction every {}s", every.as_secs());
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        tick.tick().await;

        loop {
            tick.tick().await;
            let entries = cache.len();
            cache.clear();
            info!(entries, "Cleared result cache");
        }
    })
}
