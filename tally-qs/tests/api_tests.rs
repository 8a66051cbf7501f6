//! Integration tests for the tally-qs HTTP API
//!
//! Tests cover:
//! - Health endpoint (no viewer gate)
//! - Viewer gate denial
//! - Request validation (kind, filter, ids)
//! - Result cache hits, bypass for page subsets, eviction
//! - Upstream failure propagation
//! - Concurrent misses (no in-flight de-duplication)
//! - SQLite history source end to end

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tally_common::api::{PacketKind, VIEWER_HEADER};
use tally_common::codec::{decode_index, decode_track_data, decode_track_stats};
use tally_common::{fingerprint, AlbumRef, ArtistRef, FilterSpec, PlayEvent, TrackRecord};
use tally_qs::source::{init_schema, SourceError};
use tally_qs::{
    build_router, AllowListGate, AppState, HistorySource, MemoryResultCache, ResultCache,
    SqliteHistorySource,
};
use tokio::sync::Barrier;
use tower::util::ServiceExt; // for `oneshot` method

const VIEWER: &str = "viewer-1";

// =============================================================================
// Fixtures
// =============================================================================

fn track(id: &str, name: &str, duration_ms: i64, album: &str, artist: &str) -> TrackRecord {
    TrackRecord {
        id: id.into(),
        name: name.into(),
        duration_ms,
        url: format!("https://open.example/track/{id}"),
        image: Some(format!("https://img.example/{id}.jpg")),
        album: AlbumRef {
            id: album.into(),
            name: format!("Album {album}"),
            url: format!("https://open.example/album/{album}"),
            image: None,
        },
        artists: vec![ArtistRef {
            id: artist.into(),
            name: format!("Artist {artist}"),
            url: format!("https://open.example/artist/{artist}"),
            image: None,
        }],
        color: None,
    }
}

/// T1 (200000ms, U1×3 U2×1), T2 (180000ms, U1×1), T3 (100000ms, U3×2)
fn dataset() -> (Vec<TrackRecord>, Vec<PlayEvent>) {
    let tracks = vec![
        track("T1", "Beta", 200_000, "AL1", "AR1"),
        track("T2", "Alpha", 180_000, "AL1", "AR2"),
        track("T3", "Gamma", 100_000, "AL2", "AR2"),
    ];
    let base = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
    let play = |track_id: &str, user_id: &str, i: i64| PlayEvent {
        track_id: track_id.into(),
        user_id: user_id.into(),
        played_at: base + Duration::minutes(i),
    };
    let plays = vec![
        play("T1", "U1", 0),
        play("T1", "U1", 1),
        play("T1", "U1", 2),
        play("T1", "U2", 3),
        play("T2", "U1", 4),
        play("T3", "U3", 5),
        play("T3", "U3", 6),
    ];
    (tracks, plays)
}

/// In-memory history source counting upstream reads
#[derive(Default)]
struct FixtureSource {
    tracks: Vec<TrackRecord>,
    plays: Vec<PlayEvent>,
    play_loads: AtomicUsize,
    fail: bool,
    barrier: Option<Arc<Barrier>>,
}

impl FixtureSource {
    fn new() -> Self {
        let (tracks, plays) = dataset();
        Self {
            tracks,
            plays,
            ..Self::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn loads(&self) -> usize {
        self.play_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistorySource for FixtureSource {
    async fn load_plays(&self, user_ids: &[String]) -> Result<Vec<PlayEvent>, SourceError> {
        self.play_loads.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if self.fail {
            return Err(SourceError::Unavailable("connection refused by 10.0.0.7".into()));
        }
        Ok(self
            .plays
            .iter()
            .filter(|p| user_ids.contains(&p.user_id))
            .cloned()
            .collect())
    }

    async fn load_tracks(&self, track_ids: &[String]) -> Result<Vec<TrackRecord>, SourceError> {
        Ok(self
            .tracks
            .iter()
            .filter(|t| track_ids.contains(&t.id))
            .cloned()
            .collect())
    }
}

struct TestApp {
    router: Router,
    cache: Arc<MemoryResultCache>,
    source: Arc<FixtureSource>,
}

fn setup_app(source: FixtureSource) -> TestApp {
    let cache = Arc::new(MemoryResultCache::new());
    let source = Arc::new(source);
    let state = AppState::new(
        cache.clone(),
        source.clone(),
        Arc::new(AllowListGate::new([VIEWER])),
    );
    TestApp {
        router: build_router(state),
        cache,
        source,
    }
}

fn query_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header(VIEWER_HEADER, VIEWER)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn query(kind: &str, filter: Value) -> Request<Body> {
    query_request("/api/tracks", json!({ "kind": kind, "filter": filter }))
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

/// Base64 packet from the response field for `kind`
async fn extract_packet(body: Body, kind: PacketKind) -> Vec<u8> {
    let json = extract_json(body).await;
    let encoded = json[kind.response_field()]
        .as_str()
        .unwrap_or_else(|| panic!("missing {} field in {}", kind.response_field(), json));
    general_purpose::STANDARD.decode(encoded).unwrap()
}

// =============================================================================
// Health and gate
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_no_viewer_required() {
    let app = setup_app(FixtureSource::new());

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "tally-qs");
}

#[tokio::test]
async fn test_missing_viewer_is_unauthorized() {
    let app = setup_app(FixtureSource::new());

    let request = Request::builder()
        .method("POST")
        .uri("/api/tracks")
        .body(Body::from(json!({"kind": "index", "filter": {"users": ["U1"]}}).to_string()))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"Unauthorized");
    assert_eq!(app.source.loads(), 0);
}

#[tokio::test]
async fn test_unlisted_viewer_is_unauthorized() {
    let app = setup_app(FixtureSource::new());

    let request = Request::builder()
        .method("POST")
        .uri("/api/tracks")
        .header(VIEWER_HEADER, "mallory")
        .body(Body::from(json!({"kind": "index", "filter": {"users": ["U1"]}}).to_string()))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_unknown_kind_is_bad_request() {
    let app = setup_app(FixtureSource::new());

    let response = app
        .router
        .oneshot(query("everything", json!({"users": ["U1"]})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert!(body["error"].as_str().unwrap().contains("everything"));
    assert_eq!(app.source.loads(), 0, "rejected before any engine work");
}

#[tokio::test]
async fn test_unparseable_filter_is_bad_request() {
    let app = setup_app(FixtureSource::new());

    let response = app
        .router
        .oneshot(query("index", json!({"users": "U1"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.source.loads(), 0);
}

#[tokio::test]
async fn test_legacy_type_parameter() {
    let app = setup_app(FixtureSource::new());

    let request = query_request("/api/tracks?type=stats", json!({"filter": {"users": ["U1"]}}));
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let packet = extract_packet(response.into_body(), PacketKind::Stats).await;
    let stats = decode_track_stats(&packet).unwrap();
    assert_eq!(stats.stats.len(), 2);
}

// =============================================================================
// Results
// =============================================================================

#[tokio::test]
async fn test_index_orders_by_play_count() {
    let app = setup_app(FixtureSource::new());
    let filter = json!({"users": ["U1", "U2"], "sort": "play_count"});

    let response = app.router.oneshot(query("index", filter.clone())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let packet = extract_packet(response.into_body(), PacketKind::Index).await;
    let index = decode_index(&packet).unwrap();
    assert_eq!(index.track_ids, vec!["T1", "T2"]);

    let spec: FilterSpec = serde_json::from_value(filter).unwrap();
    assert_eq!(index.filter_hash, Some(fingerprint(&spec)));
}

#[tokio::test]
async fn test_stats_satisfy_aggregate_invariants() {
    let app = setup_app(FixtureSource::new());

    let response = app
        .router
        .oneshot(query("stats", json!({"users": ["U1", "U2", "U3"]})))
        .await
        .unwrap();
    let packet = extract_packet(response.into_body(), PacketKind::Stats).await;
    let stats = decode_track_stats(&packet).unwrap().stats;

    let (tracks, _) = dataset();
    assert_eq!(stats.len(), 3);
    for stat in &stats {
        let duration = tracks.iter().find(|t| t.id == stat.track_id).unwrap().duration_ms;
        assert_eq!(stat.total_ms, stat.total_plays * duration);
        assert_eq!(stat.plays_per_user.values().sum::<i64>(), stat.total_plays);
    }
    assert_eq!(stats[0].track_id, "T1");
    assert_eq!(stats[0].total_plays, 4);
}

#[tokio::test]
async fn test_artist_exclude_drops_tracks() {
    let app = setup_app(FixtureSource::new());

    let filter = json!({"users": ["U1", "U3"], "artists": {"include": [], "exclude": ["AR2"]}});
    let response = app.router.oneshot(query("index", filter)).await.unwrap();

    let packet = extract_packet(response.into_body(), PacketKind::Index).await;
    assert_eq!(decode_index(&packet).unwrap().track_ids, vec!["T1"]);
}

#[tokio::test]
async fn test_empty_users_matches_nothing_without_upstream_read() {
    let app = setup_app(FixtureSource::new());

    let response = app.router.oneshot(query("index", json!({"users": []}))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let packet = extract_packet(response.into_body(), PacketKind::Index).await;
    assert!(decode_index(&packet).unwrap().track_ids.is_empty());
    assert_eq!(app.source.loads(), 0);
}

#[tokio::test]
async fn test_data_subset_returns_requested_page_uncached() {
    let app = setup_app(FixtureSource::new());

    let request = query_request(
        "/api/tracks",
        json!({"kind": "data", "filter": {"users": ["U1", "U3"]}, "ids": ["T3", "T9"]}),
    );
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let packet = extract_packet(response.into_body(), PacketKind::Data).await;
    let data = decode_track_data(&packet).unwrap();
    assert_eq!(data.tracks.len(), 1);
    assert_eq!(data.tracks[0].id, "T3");
    assert!(app.cache.is_empty(), "subset responses are not cached");
}

// =============================================================================
// Result cache
// =============================================================================

#[tokio::test]
async fn test_repeat_query_served_from_cache() {
    let app = setup_app(FixtureSource::new());
    let filter = json!({"users": ["U1", "U2"]});

    let first = app.router.clone().oneshot(query("data", filter.clone())).await.unwrap();
    let first = extract_json(first.into_body()).await;

    // Same filter, different list order: same fingerprint
    let second = app
        .router
        .clone()
        .oneshot(query("data", json!({"users": ["U2", "U1"]})))
        .await
        .unwrap();
    let second = extract_json(second.into_body()).await;

    assert_eq!(first, second);
    assert_eq!(app.source.loads(), 1, "second request must not reach the source");
    assert_eq!(app.cache.len(), 1);
}

#[tokio::test]
async fn test_kinds_are_cached_independently() {
    let app = setup_app(FixtureSource::new());
    let filter = json!({"users": ["U1"]});

    for kind in ["index", "stats", "index", "stats"] {
        let response = app.router.clone().oneshot(query(kind, filter.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(app.source.loads(), 2);
    assert_eq!(app.cache.len(), 2);
}

#[tokio::test]
async fn test_clear_forces_recompute() {
    let app = setup_app(FixtureSource::new());
    let filter = json!({"users": ["U1"]});

    app.router.clone().oneshot(query("index", filter.clone())).await.unwrap();
    app.cache.clear();
    app.router.clone().oneshot(query("index", filter)).await.unwrap();

    assert_eq!(app.source.loads(), 2);
}

#[tokio::test]
async fn test_concurrent_misses_both_compute() {
    // Both requests must be inside load_plays before either can finish
    let source = FixtureSource {
        barrier: Some(Arc::new(Barrier::new(2))),
        ..FixtureSource::new()
    };
    let app = setup_app(source);
    let filter = json!({"users": ["U1"]});

    let (a, b) = tokio::join!(
        app.router.clone().oneshot(query("index", filter.clone())),
        app.router.clone().oneshot(query("index", filter.clone())),
    );
    let a = extract_json(a.unwrap().into_body()).await;
    let b = extract_json(b.unwrap().into_body()).await;

    assert_eq!(a, b, "duplicate computations produce identical packets");
    assert_eq!(app.source.loads(), 2, "no in-flight de-duplication");
    assert_eq!(app.cache.len(), 1);
}

// =============================================================================
// Upstream failure
// =============================================================================

#[tokio::test]
async fn test_upstream_failure_is_bad_gateway_and_not_cached() {
    let app = setup_app(FixtureSource::failing());

    let response = app
        .router
        .oneshot(query("index", json!({"users": ["U1"]})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = extract_json(response.into_body()).await;
    let message = body["error"].as_str().unwrap();
    assert!(!message.contains("10.0.0.7"), "upstream detail must not leak");
    assert!(app.cache.is_empty());
}

// =============================================================================
// SQLite history source
// =============================================================================

async fn seeded_sqlite() -> SqliteHistorySource {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();

    let (tracks, plays) = dataset();
    for t in &tracks {
        sqlx::query("INSERT OR IGNORE INTO albums (id, name, url, image) VALUES (?, ?, ?, ?)")
            .bind(&t.album.id)
            .bind(&t.album.name)
            .bind(&t.album.url)
            .bind(&t.album.image)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO tracks (id, name, duration_ms, url, image, album_id, color)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&t.id)
        .bind(&t.name)
        .bind(t.duration_ms)
        .bind(&t.url)
        .bind(&t.image)
        .bind(&t.album.id)
        .bind(&t.color)
        .execute(&pool)
        .await
        .unwrap();
        for (position, a) in t.artists.iter().enumerate() {
            sqlx::query("INSERT OR IGNORE INTO artists (id, name, url, image) VALUES (?, ?, ?, ?)")
                .bind(&a.id)
                .bind(&a.name)
                .bind(&a.url)
                .bind(&a.image)
                .execute(&pool)
                .await
                .unwrap();
            sqlx::query("INSERT INTO track_artists (track_id, artist_id, position) VALUES (?, ?, ?)")
                .bind(&t.id)
                .bind(&a.id)
                .bind(position as i64)
                .execute(&pool)
                .await
                .unwrap();
        }
    }
    for p in &plays {
        sqlx::query("INSERT INTO track_plays (track_id, user_id, played_at) VALUES (?, ?, ?)")
            .bind(&p.track_id)
            .bind(&p.user_id)
            .bind(p.played_at)
            .execute(&pool)
            .await
            .unwrap();
    }

    SqliteHistorySource::new(pool)
}

#[tokio::test]
async fn test_sqlite_source_round_trips_records() {
    let source = seeded_sqlite().await;
    let (tracks, _) = dataset();

    let plays = source.load_plays(&["U1".to_string()]).await.unwrap();
    assert_eq!(plays.len(), 4);
    assert!(plays.iter().all(|p| p.user_id == "U1"));

    let loaded = source
        .load_tracks(&["T2".to_string(), "T1".to_string()])
        .await
        .unwrap();
    // Most played first
    assert_eq!(loaded, vec![tracks[0].clone(), tracks[1].clone()]);
}

#[tokio::test]
async fn test_sqlite_source_serves_queries() {
    let cache = Arc::new(MemoryResultCache::new());
    let state = AppState::new(
        cache.clone(),
        Arc::new(seeded_sqlite().await),
        Arc::new(AllowListGate::new([VIEWER])),
    );
    let router = build_router(state);

    let response = router
        .oneshot(query("stats", json!({"users": ["U1", "U2"], "sort": "playtime"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let packet = extract_packet(response.into_body(), PacketKind::Stats).await;
    let stats = decode_track_stats(&packet).unwrap().stats;
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].track_id, "T1");
    assert_eq!(stats[0].total_ms, 800_000);
    assert_eq!(stats[1].track_id, "T2");
    assert_eq!(stats[1].total_ms, 180_000);
    assert_eq!(cache.len(), 1);
}
