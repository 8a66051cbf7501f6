//! Client fetch orchestrator
//!
//! One fetch cycle per filter fingerprint:
//!
//! ```text
//! Idle → IndexRequested → Fetching (data ∥ stats) → Settled
//! ```
//!
//! The index arrives first so the client knows which ids to ask for. Data
//! and stats are then fetched concurrently, each short-circuited by its own
//! cache: track data per id (persisted), stats per fingerprint (session).
//!
//! Every cycle takes a generation number. A response belonging to a cycle
//! that has since been superseded is discarded instead of overwriting the
//! newer result. A failed cycle leaves the previous working set in place.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tally_common::api::{PacketKind, QueryRequest};
use tally_common::codec::{decode_index, decode_track_data, decode_track_stats};
use tally_common::{fingerprint, FilterSpec, Fingerprint, LocalFilterSpec, TrackStats, TrackWithStats};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::local::apply_local_filter;
use crate::stats_cache::{StatsCache, StatsMap};
use crate::track_cache::TrackDataCache;
use crate::transport::QueryTransport;

/// Default number of index ids loaded per window step
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Where the latest cycle stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    IndexRequested,
    /// Data and stats requests in flight
    Fetching,
    Settled,
}

/// Result of [`FetchOrchestrator::apply_filter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Working set replaced; `total` ids matched, `loaded` are in the window
    Settled { total: usize, loaded: usize },
    /// Same fingerprint as the settled cycle, nothing fetched
    Unchanged,
    /// A newer filter was applied while this cycle was in flight
    Superseded,
}

#[derive(Debug, Default)]
struct Cycle {
    phase: Phase,
    filter: Option<FilterSpec>,
    fingerprint: Option<Fingerprint>,
    /// Full ordered id list of the settled filter
    index: Vec<String>,
    /// Number of leading index ids loaded into the working set
    window: usize,
    stats: Arc<StatsMap>,
    working_set: Vec<TrackWithStats>,
    /// Bumped on every commit; a page fetched against an older value is stale
    commits: u64,
}

/// What a cycle fetched, before it is committed
struct Fetched {
    index: Vec<String>,
    window: usize,
    stats: Arc<StatsMap>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct FetchOrchestrator {
    transport: Arc<dyn QueryTransport>,
    tracks: Mutex<TrackDataCache>,
    stats: Mutex<StatsCache>,
    cycle: Mutex<Cycle>,
    generation: AtomicU64,
    page_size: usize,
}

impl FetchOrchestrator {
    pub fn new(transport: Arc<dyn QueryTransport>, tracks: TrackDataCache, page_size: usize) -> Self {
        Self {
            transport,
            tracks: Mutex::new(tracks),
            stats: Mutex::new(StatsCache::new()),
            cycle: Mutex::new(Cycle::default()),
            generation: AtomicU64::new(0),
            page_size: page_size.max(1),
        }
    }

    pub fn phase(&self) -> Phase {
        lock(&self.cycle).phase
    }

    /// Fingerprint of the settled filter
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        lock(&self.cycle).fingerprint.clone()
    }

    /// Loaded tracks of the settled filter, in server order
    pub fn working_set(&self) -> Vec<TrackWithStats> {
        lock(&self.cycle).working_set.clone()
    }

    /// Working set refined by a local filter; never fetches
    pub fn local_view(&self, local: &LocalFilterSpec) -> Vec<TrackWithStats> {
        apply_local_filter(&lock(&self.cycle).working_set, local)
    }

    /// Number of ids matched by the settled filter
    pub fn total_matches(&self) -> usize {
        lock(&self.cycle).index.len()
    }

    /// Whether `load_more` would load anything
    pub fn has_more(&self) -> bool {
        let cycle = lock(&self.cycle);
        cycle.window < cycle.index.len()
    }

    pub fn cached_tracks(&self) -> usize {
        lock(&self.tracks).len()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_phase(&self, generation: u64, phase: Phase) {
        let mut cycle = lock(&self.cycle);
        if self.is_current(generation) {
            cycle.phase = phase;
        }
    }

    /// Run a fetch cycle for `filter` unless it is already settled
    pub async fn apply_filter(&self, filter: FilterSpec) -> Result<CycleOutcome, FetchError> {
        let fp = fingerprint(&filter);
        {
            let cycle = lock(&self.cycle);
            if cycle.phase == Phase::Settled && cycle.fingerprint.as_ref() == Some(&fp) {
                debug!(fingerprint = %fp, "Filter unchanged");
                return Ok(CycleOutcome::Unchanged);
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_phase(generation, Phase::IndexRequested);
        debug!(generation, fingerprint = %fp, "Fetch cycle started");

        let fetched = match self.run_cycle(generation, &filter, &fp).await {
            Ok(Some(fetched)) => fetched,
            Ok(None) => return Ok(self.superseded(generation)),
            Err(e) => {
                warn!(generation, "Fetch cycle failed, keeping previous results: {}", e);
                let mut cycle = lock(&self.cycle);
                if self.is_current(generation) {
                    cycle.phase = if cycle.fingerprint.is_some() {
                        Phase::Settled
                    } else {
                        Phase::Idle
                    };
                }
                return Err(e);
            }
        };

        let outcome = {
            let mut cycle = lock(&self.cycle);
            if !self.is_current(generation) {
                None
            } else {
                let commits = cycle.commits + 1;
                let working_set = assemble(&lock(&self.tracks), &fetched.index[..fetched.window], &fetched.stats);
                let outcome = CycleOutcome::Settled {
                    total: fetched.index.len(),
                    loaded: working_set.len(),
                };
                *cycle = Cycle {
                    phase: Phase::Settled,
                    filter: Some(filter),
                    fingerprint: Some(fp),
                    index: fetched.index,
                    window: fetched.window,
                    stats: fetched.stats,
                    working_set,
                    commits,
                };
                Some(outcome)
            }
        };

        match outcome {
            Some(outcome) => {
                info!(generation, ?outcome, "Fetch cycle settled");
                self.persist_tracks();
                Ok(outcome)
            }
            None => Ok(self.superseded(generation)),
        }
    }

    fn superseded(&self, generation: u64) -> CycleOutcome {
        info!(
            generation,
            current = self.generation.load(Ordering::SeqCst),
            "Discarding response of superseded fetch cycle"
        );
        CycleOutcome::Superseded
    }

    /// `Ok(None)` when superseded before the fan-out
    async fn run_cycle(
        &self,
        generation: u64,
        filter: &FilterSpec,
        fp: &Fingerprint,
    ) -> Result<Option<Fetched>, FetchError> {
        let index = self.fetch_index(filter, fp).await?;
        if !self.is_current(generation) {
            return Ok(None);
        }

        if filter.users.is_empty() {
            debug!("No users selected, skipping data and stats");
            return Ok(Some(Fetched {
                index: Vec::new(),
                window: 0,
                stats: Arc::default(),
            }));
        }

        self.set_phase(generation, Phase::Fetching);
        let window = index.len().min(self.page_size);

        let (_, stats) = tokio::try_join!(
            self.fetch_missing_tracks(filter, fp, &index[..window]),
            self.fetch_stats(filter, fp),
        )?;

        Ok(Some(Fetched { index, window, stats }))
    }

    async fn fetch_index(&self, filter: &FilterSpec, fp: &Fingerprint) -> Result<Vec<String>, FetchError> {
        let bytes = self
            .transport
            .fetch(&QueryRequest::new(PacketKind::Index, filter.clone()))
            .await?;
        let payload = decode_index(&bytes)?;
        check_hash(fp, payload.filter_hash.as_ref())?;
        debug!(tracks = payload.track_ids.len(), "Index received");
        Ok(payload.track_ids)
    }

    /// Request data only for ids the track cache lacks
    async fn fetch_missing_tracks(
        &self,
        filter: &FilterSpec,
        fp: &Fingerprint,
        ids: &[String],
    ) -> Result<usize, FetchError> {
        let missing = lock(&self.tracks).missing(ids);
        if missing.is_empty() {
            debug!(ids = ids.len(), "All track data cached, skipping data request");
            return Ok(0);
        }

        let requested = missing.len();
        let bytes = self
            .transport
            .fetch(&QueryRequest::data_subset(filter.clone(), missing))
            .await?;
        let payload = decode_track_data(&bytes)?;
        check_hash(fp, payload.filter_hash.as_ref())?;

        let received = lock(&self.tracks).insert_all(payload.tracks);
        debug!(requested, received, "Track data received");
        Ok(received)
    }

    async fn fetch_stats(&self, filter: &FilterSpec, fp: &Fingerprint) -> Result<Arc<StatsMap>, FetchError> {
        let cached = lock(&self.stats).get(fp);
        if let Some(stats) = cached {
            debug!(fingerprint = %fp, "Stats cache hit");
            return Ok(stats);
        }

        let bytes = self
            .transport
            .fetch(&QueryRequest::new(PacketKind::Stats, filter.clone()))
            .await?;
        let payload = decode_track_stats(&bytes)?;
        check_hash(fp, payload.filter_hash.as_ref())?;

        Ok(lock(&self.stats).insert(fp.clone(), payload.stats))
    }

    /// Extend the window of the settled filter by one page
    ///
    /// Only ids absent from the track cache are requested. Returns how many
    /// tracks were added to the working set; the page is dropped when another
    /// cycle settles while it is in flight.
    pub async fn load_more(&self) -> Result<usize, FetchError> {
        let (commits, filter, fp, start, ids) = {
            let cycle = lock(&self.cycle);
            let (Some(filter), Some(fp)) = (cycle.filter.clone(), cycle.fingerprint.clone()) else {
                return Err(FetchError::NoActiveFilter);
            };
            let start = cycle.window;
            let end = (start + self.page_size).min(cycle.index.len());
            if start == end {
                return Ok(0);
            }
            (
                cycle.commits,
                filter,
                fp,
                start,
                cycle.index[start..end].to_vec(),
            )
        };

        self.fetch_missing_tracks(&filter, &fp, &ids).await?;

        let added = {
            let mut cycle = lock(&self.cycle);
            if cycle.commits != commits {
                None
            } else {
                let end = (start + ids.len()).max(cycle.window);
                let before = cycle.working_set.len();
                let working_set = assemble(&lock(&self.tracks), &cycle.index[..end], &cycle.stats);
                cycle.working_set = working_set;
                cycle.window = end;
                Some(cycle.working_set.len().saturating_sub(before))
            }
        };

        match added {
            Some(added) => {
                debug!(added, "Window extended");
                self.persist_tracks();
                Ok(added)
            }
            None => {
                info!(fingerprint = %fp, "Discarding page of a replaced working set");
                Ok(0)
            }
        }
    }

    fn persist_tracks(&self) {
        if let Err(e) = lock(&self.tracks).save() {
            warn!("Failed to persist track cache: {}", e);
        }
    }
}

fn check_hash(expected: &Fingerprint, received: Option<&Fingerprint>) -> Result<(), FetchError> {
    match received {
        Some(received) if received != expected => Err(FetchError::HashMismatch {
            expected: expected.clone(),
            received: received.clone(),
        }),
        _ => Ok(()),
    }
}

/// Merge cached track data with filter stats, in index order
fn assemble(tracks: &TrackDataCache, ids: &[String], stats: &StatsMap) -> Vec<TrackWithStats> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .filter_map(|id| match tracks.get(id) {
            Some(track) => Some(TrackWithStats {
                track: track.clone(),
                stats: stats.get(id).cloned().unwrap_or_else(|| TrackStats::empty(id.as_str())),
            }),
            None => {
                warn!(track_id = %id, "Track data missing after fetch");
                None
            }
        })
        .collect()
}
