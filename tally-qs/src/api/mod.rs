//! HTTP API handlers for tally-qs

pub mod health;
pub mod query;

pub use health::health_routes;
pub use query::query_tracks;
