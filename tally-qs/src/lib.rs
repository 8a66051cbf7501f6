//! tally-qs (Query Server)
//!
//! Serves filtered listening statistics as compact binary packets. Each
//! request is fingerprinted, answered from the result cache when possible,
//! and otherwise computed from a snapshot of the history source.

use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod gate;
pub mod source;

pub use cache::{MemoryResultCache, NullResultCache, ResultCache};
pub use error::{Error, QueryError, Result};
pub use gate::{AllowListGate, ViewerGate};
pub use source::{HistorySource, SqliteHistorySource};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Fingerprint-keyed packet cache
    pub cache: Arc<dyn ResultCache>,
    /// Upstream listening history
    pub source: Arc<dyn HistorySource>,
    /// Caller permission check
    pub gate: Arc<dyn ViewerGate>,
}

impl AppState {
    pub fn new(
        cache: Arc<dyn ResultCache>,
        source: Arc<dyn HistorySource>,
        gate: Arc<dyn ViewerGate>,
    ) -> Self {
        Self { cache, source, gate }
    }
}

/// Build application router
///
/// The query endpoint sits behind the viewer gate; `/health` does not.
/// CORS preflights are answered before the gate runs.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::post;
    use tally_common::api::QUERY_PATH;

    let protected = Router::new()
        .route(QUERY_PATH, post(api::query_tracks))
        .layer(middleware::from_fn_with_state(state.clone(), gate::viewer_gate));

    let public = Router::new().merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
