//! # Tally Common Library
//!
//! Shared code for the listening-history query server and fetch client:
//! - Filter model (server facet filter, local refinement filter)
//! - Filter fingerprinting (cache key)
//! - Filter & stats engine
//! - Wire codec for index/data/stats packets
//! - Query request/response types
//! - Configuration helpers

pub mod api;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod model;

pub use error::{Error, Result};
pub use fingerprint::{fingerprint, Fingerprint};
pub use model::{
    AlbumRef, ArtistRef, FacetFilter, FilterSpec, LocalFilterSpec, PlayEvent, SortMethod,
    TrackRecord, TrackStats, TrackWithStats,
};
