//! Query request/response types shared by the server and the fetch client
//!
//! ```text
//! POST /api/tracks  { "kind": "index"|"data"|"stats", "filter": {...}, "ids": [...]? }
//!   -> { "index": "<base64>" } | { "trackData": "<base64>" } | { "trackStats": "<base64>" }
//! ```

use crate::model::FilterSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Header carrying the caller identity checked by the viewer gate
pub const VIEWER_HEADER: &str = "x-viewer-id";

/// Query endpoint path
pub const QUERY_PATH: &str = "/api/tracks";

/// Packet kind requested from the query endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketKind {
    Index,
    Data,
    Stats,
}

impl PacketKind {
    pub const ALL: [PacketKind; 3] = [PacketKind::Index, PacketKind::Data, PacketKind::Stats];

    pub fn as_str(&self) -> &'static str {
        match self {
            PacketKind::Index => "index",
            PacketKind::Data => "data",
            PacketKind::Stats => "stats",
        }
    }

    /// JSON field of the response body carrying this packet
    pub fn response_field(&self) -> &'static str {
        match self {
            PacketKind::Index => "index",
            PacketKind::Data => "trackData",
            PacketKind::Stats => "trackStats",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PacketKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "index" => Ok(PacketKind::Index),
            "data" => Ok(PacketKind::Data),
            "stats" => Ok(PacketKind::Stats),
            other => Err(format!("unknown packet kind '{}' (expected index|data|stats)", other)),
        }
    }
}

/// Body of `POST /api/tracks`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub kind: PacketKind,
    pub filter: FilterSpec,
    /// Page subset for `data` requests; `None` asks for every matching track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
}

impl QueryRequest {
    pub fn new(kind: PacketKind, filter: FilterSpec) -> Self {
        Self { kind, filter, ids: None }
    }

    pub fn data_subset(filter: FilterSpec, ids: Vec<String>) -> Self {
        Self {
            kind: PacketKind::Data,
            filter,
            ids: Some(ids),
        }
    }
}

/// Response body; exactly one field is set, holding a base64 packet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_stats: Option<String>,
}

impl QueryResponse {
    pub fn for_kind(kind: PacketKind, encoded: String) -> Self {
        let mut response = Self::default();
        match kind {
            PacketKind::Index => response.index = Some(encoded),
            PacketKind::Data => response.track_data = Some(encoded),
            PacketKind::Stats => response.track_stats = Some(encoded),
        }
        response
    }

    /// Packet field for `kind`, if present
    pub fn packet(&self, kind: PacketKind) -> Option<&str> {
        match kind {
            PacketKind::Index => self.index.as_deref(),
            PacketKind::Data => self.track_data.as_deref(),
            PacketKind::Stats => self.track_stats.as_deref(),
        }
    }
}
