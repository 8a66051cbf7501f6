//! Filter model and track/stat records
//!
//! Two filters exist side by side:
//! - [`FilterSpec`]: the fetch filter. Every field requires a server round trip
//!   to re-evaluate, and its fingerprint keys every server and client cache.
//! - [`LocalFilterSpec`]: the local refinement filter, applied to the already
//!   fetched working set without touching the network.
//!
//! JSON field names follow the packet shape the browser client has always
//! sent (`reverseOrder`, `playedAtRange`, ...), so fingerprints stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

// ========================================
// Sorting
// ========================================

/// Sort method shared by the fetch filter and the local filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortMethod {
    /// Descending total listening time
    Playtime,
    /// Descending total play count
    #[default]
    PlayCount,
    /// Descending track duration
    TrackLength,
    /// Ascending track name
    TrackName,
    /// Ascending comma-joined artist names
    ArtistName,
}

impl SortMethod {
    pub const ALL: [SortMethod; 5] = [
        SortMethod::Playtime,
        SortMethod::PlayCount,
        SortMethod::TrackLength,
        SortMethod::TrackName,
        SortMethod::ArtistName,
    ];

    /// Wire identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMethod::Playtime => "playtime",
            SortMethod::PlayCount => "play_count",
            SortMethod::TrackLength => "track_length",
            SortMethod::TrackName => "track_name",
            SortMethod::ArtistName => "artist_name",
        }
    }

    /// Parse a wire identifier, falling back to play count for unknown ids
    pub fn parse_lenient(id: &str) -> Self {
        match id {
            "playtime" => SortMethod::Playtime,
            "play_count" => SortMethod::PlayCount,
            "track_length" => SortMethod::TrackLength,
            "track_name" => SortMethod::TrackName,
            "artist_name" => SortMethod::ArtistName,
            other => {
                warn!(sort = %other, "Unknown sort method, falling back to play_count");
                SortMethod::PlayCount
            }
        }
    }
}

impl fmt::Display for SortMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SortMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SortMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = String::deserialize(deserializer)?;
        Ok(SortMethod::parse_lenient(&id))
    }
}

// ========================================
// Fetch filter
// ========================================

/// Include/exclude lists for one facet
///
/// A non-empty `include` list wins: `exclude` is only consulted when
/// `include` is empty. Both empty means the facet does not restrict.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FacetFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl FacetFilter {
    pub fn including<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: ids.into_iter().map(Into::into).collect(),
            exclude: Vec::new(),
        }
    }

    pub fn excluding<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: Vec::new(),
            exclude: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// True when neither list restricts the facet
    pub fn is_unrestricted(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Apply the include-over-exclude rule to a multi-valued attribute
    ///
    /// With includes: keep when any value is included.
    /// With only excludes: keep when no value is excluded.
    pub fn admits_any<'a, I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        if !self.include.is_empty() {
            return values
                .into_iter()
                .any(|v| self.include.iter().any(|id| id == v));
        }
        if !self.exclude.is_empty() {
            return !values
                .into_iter()
                .any(|v| self.exclude.iter().any(|id| id == v));
        }
        true
    }

    /// Apply the include-over-exclude rule to a single-valued attribute
    pub fn admits(&self, value: &str) -> bool {
        self.admits_any(std::iter::once(value))
    }

    fn canonical(&self) -> Self {
        Self {
            include: sorted_unique(&self.include),
            exclude: sorted_unique(&self.exclude),
        }
    }
}

/// Inclusive `playedAt` window; a missing bound is open
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayedAtRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl PlayedAtRange {
    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| *at >= s) && self.end.map_or(true, |e| *at <= e)
    }

    /// True when neither bound is set
    pub fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Inclusive numeric bounds; a missing bound is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

impl ValueRange {
    pub fn contains(&self, value: i64) -> bool {
        self.min.map_or(true, |m| value >= m) && self.max.map_or(true, |m| value <= m)
    }

    /// True when neither bound is set
    pub fn is_open(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Server facet filter (the "fetch filter")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterSpec {
    pub sort: SortMethod,
    #[serde(rename = "reverseOrder")]
    pub reverse: bool,
    /// Viewer-selected user ids. Empty selects nothing.
    pub users: Vec<String>,
    pub albums: FacetFilter,
    pub artists: FacetFilter,
    pub genres: FacetFilter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub played_at_range: Option<PlayedAtRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub play_count_range: Option<ValueRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playtime_range: Option<ValueRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_length_range: Option<ValueRange>,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            sort: SortMethod::PlayCount,
            reverse: false,
            users: Vec::new(),
            albums: FacetFilter::default(),
            artists: FacetFilter::default(),
            genres: FacetFilter::default(),
            played_at_range: None,
            play_count_range: None,
            playtime_range: None,
            track_length_range: None,
        }
    }
}

impl FilterSpec {
    /// Filter selecting the given users with default sorting and no facets
    pub fn for_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Order-independent form: every id list sorted and de-duplicated,
    /// ranges without bounds dropped
    pub fn canonical(&self) -> Self {
        Self {
            users: sorted_unique(&self.users),
            albums: self.albums.canonical(),
            artists: self.artists.canonical(),
            genres: self.genres.canonical(),
            played_at_range: self.played_at_range.clone().filter(|r| !r.is_open()),
            play_count_range: bounded(self.play_count_range),
            playtime_range: bounded(self.playtime_range),
            track_length_range: bounded(self.track_length_range),
            ..self.clone()
        }
    }

    pub fn selects_user(&self, user_id: &str) -> bool {
        self.users.iter().any(|u| u == user_id)
    }
}

fn bounded(range: Option<ValueRange>) -> Option<ValueRange> {
    range.filter(|r| !r.is_open())
}

fn sorted_unique(ids: &[String]) -> Vec<String> {
    let mut out = ids.to_vec();
    out.sort();
    out.dedup();
    out
}

// ========================================
// Local filter
// ========================================

/// Album allow-list of the local filter
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalAlbumFilter {
    pub include: Vec<String>,
}

/// Client-only refinement, never triggers a fetch by itself
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocalFilterSpec {
    /// Case-insensitive substring over track, artist and album names
    pub search: String,
    pub sort: SortMethod,
    #[serde(rename = "reverseOrder")]
    pub reverse: bool,
    pub album: LocalAlbumFilter,
}

// ========================================
// Records
// ========================================

/// Album reference carried by a track
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlbumRef {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Artist reference carried by a track
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Track metadata, owned by the upstream store and read-only here
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: String,
    pub name: String,
    /// Duration in milliseconds
    #[serde(rename = "duration")]
    pub duration_ms: i64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub album: AlbumRef,
    /// Ordered; the first artist dominates artist-name sorting
    pub artists: Vec<ArtistRef>,
    /// Accent color derived from artwork (e.g. `#aabbcc`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl TrackRecord {
    /// Artist names joined in order with `", "`
    pub fn joined_artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn artist_ids(&self) -> impl Iterator<Item = &str> + Clone {
        self.artists.iter().map(|a| a.id.as_str())
    }
}

/// One raw listening event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayEvent {
    pub track_id: String,
    pub user_id: String,
    pub played_at: DateTime<Utc>,
}

/// Per (track, filter) aggregate
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStats {
    pub track_id: String,
    pub total_plays: i64,
    /// `total_plays * duration_ms`
    #[serde(rename = "totalMS")]
    pub total_ms: i64,
    pub plays_per_user: BTreeMap<String, i64>,
}

impl TrackStats {
    /// Zero stats, used when a track has data but no stats yet
    pub fn empty(track_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            ..Self::default()
        }
    }
}

/// Track metadata merged with its filter-dependent stats
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackWithStats {
    pub track: TrackRecord,
    pub stats: TrackStats,
}

impl TrackWithStats {
    pub fn id(&self) -> &str {
        &self.track.id
    }
}
