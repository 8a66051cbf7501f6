//! Viewer gate
//!
//! Identity comes from the `x-viewer-id` header, set by whatever fronts this
//! service. The gate only answers "may this caller view statistics".

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::HashSet;
use tally_common::api::VIEWER_HEADER;
use tracing::warn;

use crate::error::QueryError;
use crate::AppState;

/// Permission predicate over the caller identity
pub trait ViewerGate: Send + Sync {
    fn is_permitted(&self, viewer: Option<&str>) -> bool;
}

/// Gate admitting a fixed set of viewer ids
#[derive(Debug, Clone, Default)]
pub struct AllowListGate {
    allowed: HashSet<String>,
}

impl AllowListGate {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl ViewerGate for AllowListGate {
    fn is_permitted(&self, viewer: Option<&str>) -> bool {
        match viewer.map(str::trim) {
            Some(id) if !id.is_empty() => self.allowed.contains(id),
            _ => false,
        }
    }
}

/// Middleware rejecting callers the gate does not permit
///
/// Runs before the body is read, so a denied caller never reaches the engine.
pub async fn viewer_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, QueryError> {
    let viewer = request
        .headers()
        .get(VIEWER_HEADER)
        .and_then(|v| v.to_str().ok());

    if !state.gate.is_permitted(viewer) {
        warn!(viewer = viewer.unwrap_or("<none>"), "Viewer not permitted");
        return Err(QueryError::Unauthorized);
    }

    Ok(next.run(request).await)
}
