//! tally-fc (Fetch Client)
//!
//! Client side of the statistics pipeline: fetches index, data and stats
//! packets from tally-qs, keeps track data in a persisted cache and stats in
//! a session cache, and refines the fetched working set locally.

pub mod config;
pub mod debounce;
pub mod error;
pub mod local;
pub mod orchestrator;
pub mod stats_cache;
pub mod track_cache;
pub mod transport;

pub use debounce::Debouncer;
pub use error::{Error, FetchError, Result};
pub use local::apply_local_filter;
pub use orchestrator::{CycleOutcome, FetchOrchestrator, Phase};
pub use track_cache::TrackDataCache;
pub use transport::{HttpTransport, QueryTransport};
