//! Wire codec for index, track-data and track-stats packets
//!
//! Packets use the protocol-buffers wire format. Field tags are part of the
//! compatibility contract with deployed clients and must not be renumbered:
//!
//! ```text
//! TrackIndexPacket { filterHash = 1, trackIds = 2 (repeated) }
//! TrackDataPacket  { filterHash = 1, trackData = 2 (repeated TrackData) }
//!   TrackData  { name = 1, id = 2, duration = 3, url = 4, image = 5,
//!                albumId = 6, album = 7, artists = 8 (repeated), color = 9 }
//!   AlbumData  { name = 1, id = 2, url = 3, image = 4 }
//!   ArtistData { name = 1, id = 2, url = 3, image = 4 }
//! TrackStatsPacket { filterHash = 1, trackStats = 2 (repeated TrackStat) }
//!   TrackStat  { trackId = 1, totalPlays = 2, totalMS = 3,
//!                playsPerUser = 4 (JSON object as string) }
//! ```
//!
//! A zero-length buffer decodes to an empty payload ("no matches"). Malformed
//! bytes are a [`CodecError`].

use crate::fingerprint::Fingerprint;
use crate::model::{AlbumRef, ArtistRef, TrackRecord, TrackStats};
use prost::Message;
use std::collections::BTreeMap;
use thiserror::Error;

/// Codec failures
#[derive(Error, Debug)]
pub enum CodecError {
    /// Buffer is not a valid packet
    #[error("malformed packet: {0}")]
    Malformed(#[from] prost::DecodeError),

    /// `playsPerUser` sub-field is not a JSON object of counts
    #[error("malformed playsPerUser for track {track_id}: {source}")]
    PlaysPerUser {
        track_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// Track entry without its album
    #[error("track {0} has no album")]
    MissingAlbum(String),
}

// ========================================
// Wire messages
// ========================================

#[derive(Clone, PartialEq, Message)]
pub struct TrackIndexPacket {
    #[prost(string, tag = "1")]
    pub filter_hash: String,
    #[prost(string, repeated, tag = "2")]
    pub track_ids: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TrackDataPacket {
    #[prost(string, tag = "1")]
    pub filter_hash: String,
    #[prost(message, repeated, tag = "2")]
    pub track_data: Vec<TrackData>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TrackData {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(int64, tag = "3")]
    pub duration: i64,
    #[prost(string, tag = "4")]
    pub url: String,
    #[prost(string, optional, tag = "5")]
    pub image: Option<String>,
    #[prost(string, tag = "6")]
    pub album_id: String,
    #[prost(message, optional, tag = "7")]
    pub album: Option<AlbumData>,
    #[prost(message, repeated, tag = "8")]
    pub artists: Vec<ArtistData>,
    #[prost(string, optional, tag = "9")]
    pub color: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AlbumData {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(string, tag = "3")]
    pub url: String,
    #[prost(string, optional, tag = "4")]
    pub image: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ArtistData {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(string, tag = "3")]
    pub url: String,
    #[prost(string, optional, tag = "4")]
    pub image: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TrackStatsPacket {
    #[prost(string, tag = "1")]
    pub filter_hash: String,
    #[prost(message, repeated, tag = "2")]
    pub track_stats: Vec<TrackStat>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TrackStat {
    #[prost(string, tag = "1")]
    pub track_id: String,
    #[prost(int64, tag = "2")]
    pub total_plays: i64,
    #[prost(int64, tag = "3")]
    pub total_ms: i64,
    #[prost(string, tag = "4")]
    pub plays_per_user: String,
}

// ========================================
// Decoded payloads
// ========================================

/// Decoded index packet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexPayload {
    /// `None` when the buffer was empty
    pub filter_hash: Option<Fingerprint>,
    pub track_ids: Vec<String>,
}

/// Decoded track-data packet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataPayload {
    pub filter_hash: Option<Fingerprint>,
    pub tracks: Vec<TrackRecord>,
}

/// Decoded track-stats packet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsPayload {
    pub filter_hash: Option<Fingerprint>,
    pub stats: Vec<TrackStats>,
}

fn wire_hash(hash: String) -> Option<Fingerprint> {
    if hash.is_empty() {
        None
    } else {
        Some(Fingerprint::from_wire(hash))
    }
}

// ========================================
// Index
// ========================================

pub fn encode_index(filter_hash: &Fingerprint, track_ids: &[String]) -> Vec<u8> {
    TrackIndexPacket {
        filter_hash: filter_hash.to_string(),
        track_ids: track_ids.to_vec(),
    }
    .encode_to_vec()
}

pub fn decode_index(bytes: &[u8]) -> Result<IndexPayload, CodecError> {
    if bytes.is_empty() {
        return Ok(IndexPayload::default());
    }
    let packet = TrackIndexPacket::decode(bytes)?;
    Ok(IndexPayload {
        filter_hash: wire_hash(packet.filter_hash),
        track_ids: packet.track_ids,
    })
}

// ========================================
// Track data
// ========================================

impl From<&AlbumRef> for AlbumData {
    fn from(album: &AlbumRef) -> Self {
        Self {
            name: album.name.clone(),
            id: album.id.clone(),
            url: album.url.clone(),
            image: album.image.clone(),
        }
    }
}

impl From<AlbumData> for AlbumRef {
    fn from(album: AlbumData) -> Self {
        Self {
            id: album.id,
            name: album.name,
            url: album.url,
            image: album.image,
        }
    }
}

impl From<&ArtistRef> for ArtistData {
    fn from(artist: &ArtistRef) -> Self {
        Self {
            name: artist.name.clone(),
            id: artist.id.clone(),
            url: artist.url.clone(),
            image: artist.image.clone(),
        }
    }
}

impl From<ArtistData> for ArtistRef {
    fn from(artist: ArtistData) -> Self {
        Self {
            id: artist.id,
            name: artist.name,
            url: artist.url,
            image: artist.image,
        }
    }
}

impl From<&TrackRecord> for TrackData {
    fn from(track: &TrackRecord) -> Self {
        Self {
            name: track.name.clone(),
            id: track.id.clone(),
            duration: track.duration_ms,
            url: track.url.clone(),
            image: track.image.clone(),
            album_id: track.album.id.clone(),
            album: Some(AlbumData::from(&track.album)),
            artists: track.artists.iter().map(ArtistData::from).collect(),
            color: track.color.clone(),
        }
    }
}

impl TryFrom<TrackData> for TrackRecord {
    type Error = CodecError;

    fn try_from(data: TrackData) -> Result<Self, Self::Error> {
        let album = data
            .album
            .map(AlbumRef::from)
            .ok_or_else(|| CodecError::MissingAlbum(data.id.clone()))?;
        Ok(Self {
            id: data.id,
            name: data.name,
            duration_ms: data.duration,
            url: data.url,
            image: data.image,
            album,
            artists: data.artists.into_iter().map(ArtistRef::from).collect(),
            color: data.color,
        })
    }
}

/// Encode track metadata only; play-derived fields never reach this packet
pub fn encode_track_data<'a, I>(filter_hash: &Fingerprint, tracks: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a TrackRecord>,
{
    TrackDataPacket {
        filter_hash: filter_hash.to_string(),
        track_data: tracks.into_iter().map(TrackData::from).collect(),
    }
    .encode_to_vec()
}

pub fn decode_track_data(bytes: &[u8]) -> Result<DataPayload, CodecError> {
    if bytes.is_empty() {
        return Ok(DataPayload::default());
    }
    let packet = TrackDataPacket::decode(bytes)?;
    let tracks = packet
        .track_data
        .into_iter()
        .map(TrackRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DataPayload {
        filter_hash: wire_hash(packet.filter_hash),
        tracks,
    })
}

// ========================================
// Track stats
// ========================================

pub fn encode_track_stats<'a, I>(filter_hash: &Fingerprint, stats: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a TrackStats>,
{
    TrackStatsPacket {
        filter_hash: filter_hash.to_string(),
        track_stats: stats
            .into_iter()
            .map(|s| TrackStat {
                track_id: s.track_id.clone(),
                total_plays: s.total_plays,
                total_ms: s.total_ms,
                // BTreeMap<String, i64> always serializes
                plays_per_user: serde_json::to_string(&s.plays_per_user)
                    .unwrap_or_else(|_| "{}".to_string()),
            })
            .collect(),
    }
    .encode_to_vec()
}

pub fn decode_track_stats(bytes: &[u8]) -> Result<StatsPayload, CodecError> {
    if bytes.is_empty() {
        return Ok(StatsPayload::default());
    }
    let packet = TrackStatsPacket::decode(bytes)?;
    let stats = packet
        .track_stats
        .into_iter()
        .map(|s| {
            let plays_per_user = parse_plays_per_user(&s.track_id, &s.plays_per_user)?;
            Ok(TrackStats {
                track_id: s.track_id,
                total_plays: s.total_plays,
                total_ms: s.total_ms,
                plays_per_user,
            })
        })
        .collect::<Result<Vec<_>, CodecError>>()?;
    Ok(StatsPayload {
        filter_hash: wire_hash(packet.filter_hash),
        stats,
    })
}

fn parse_plays_per_user(track_id: &str, json: &str) -> Result<BTreeMap<String, i64>, CodecError> {
    if json.is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(json).map_err(|source| CodecError::PlaysPerUser {
        track_id: track_id.to_string(),
        source,
    })
}
