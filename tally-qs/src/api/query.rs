//! Query endpoint
//!
//! `POST /api/tracks` returns one packet kind for one filter:
//! 1. parse kind and filter (400 on failure, before any engine work)
//! 2. fingerprint the filter
//! 3. serve from the result cache on a hit
//! 4. on a miss, load a snapshot, run the engine, encode, cache
//!
//! A `data` request may carry `ids`, a page subset of the filtered result.
//! Subset responses are neither read from nor written to the cache.

use axum::{
    body::Bytes,
    extract::{Query, State},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use std::collections::HashSet;
use tally_common::api::{PacketKind, QueryResponse};
use tally_common::codec::{encode_index, encode_track_data, encode_track_stats};
use tally_common::engine::filter_tracks;
use tally_common::{fingerprint, FilterSpec, Fingerprint, TrackWithStats};
use tracing::debug;

use crate::error::QueryError;
use crate::source::load_snapshot;
use crate::AppState;

/// Legacy query-string selector (`?type=index`)
#[derive(Debug, Default, Deserialize)]
pub struct LegacyParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Request body as received; kind may instead come from the query string
#[derive(Debug, Deserialize)]
struct RawQuery {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    filter: Option<FilterSpec>,
    #[serde(default)]
    ids: Option<Vec<String>>,
}

/// Validated request
#[derive(Debug)]
struct ParsedQuery {
    kind: PacketKind,
    filter: FilterSpec,
    ids: Option<Vec<String>>,
}

fn parse_request(params: &LegacyParams, body: &[u8]) -> Result<ParsedQuery, QueryError> {
    let raw: RawQuery = serde_json::from_slice(body)
        .map_err(|e| QueryError::BadRequest(format!("invalid request body: {}", e)))?;

    let kind = raw
        .kind
        .as_deref()
        .or(params.kind.as_deref())
        .ok_or_else(|| QueryError::BadRequest("missing packet kind".to_string()))?
        .parse::<PacketKind>()
        .map_err(QueryError::BadRequest)?;

    let filter = raw
        .filter
        .ok_or_else(|| QueryError::BadRequest("missing filter".to_string()))?;

    if raw.ids.is_some() && kind != PacketKind::Data {
        return Err(QueryError::BadRequest(format!(
            "ids are only accepted for data requests, not {}",
            kind
        )));
    }

    Ok(ParsedQuery {
        kind,
        filter,
        ids: raw.ids,
    })
}

/// POST /api/tracks
pub async fn query_tracks(
    State(state): State<AppState>,
    Query(params): Query<LegacyParams>,
    body: Bytes,
) -> Result<Json<QueryResponse>, QueryError> {
    let ParsedQuery { kind, filter, ids } = parse_request(&params, &body)?;
    let fp = fingerprint(&filter);
    let cacheable = ids.is_none();

    if cacheable {
        if let Some(packet) = state.cache.get(kind, &fp) {
            debug!(%kind, fingerprint = %fp, bytes = packet.len(), "Result cache hit");
            return Ok(Json(respond(kind, &packet)));
        }
    }

    debug!(%kind, fingerprint = %fp, subset = !cacheable, "Result cache miss");

    let snapshot = load_snapshot(state.source.as_ref(), &filter).await?;
    let mut result = filter_tracks(&snapshot.tracks, &snapshot.plays, &filter);

    if let Some(ids) = &ids {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        result.retain(|t| wanted.contains(t.id()));
    }

    let packet = Bytes::from(encode_packet(kind, &fp, &result));

    if cacheable {
        state.cache.put(kind, fp, packet.clone());
    }

    Ok(Json(respond(kind, &packet)))
}

fn encode_packet(kind: PacketKind, fp: &Fingerprint, result: &[TrackWithStats]) -> Vec<u8> {
    match kind {
        PacketKind::Index => {
            let ids: Vec<String> = result.iter().map(|t| t.track.id.clone()).collect();
            encode_index(fp, &ids)
        }
        PacketKind::Data => encode_track_data(fp, result.iter().map(|t| &t.track)),
        PacketKind::Stats => encode_track_stats(fp, result.iter().map(|t| &t.stats)),
    }
}

fn respond(kind: PacketKind, packet: &[u8]) -> QueryResponse {
    QueryResponse::for_kind(kind, general_purpose::STANDARD.encode(packet))
}
