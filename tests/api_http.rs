// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

mod common;

use std::sync::Arc;

use serde_json::Value as Json;
use http::{header, Request, StatusCode};
use shuttle_axum::axum::{
    body::{self, Body},
    Router,
};
use tower::ServiceExt as _;

use common::{event, FakeProvider};
use venvi::api::{self, AppState};
use venvi::ingest::sync::{populate_record, SyncGate, EVENTS_COLLECTION};
use venvi::ingest::types::EventProvider;
use venvi::store::{MemoryStore, RecordStore};

const BODY_LIMIT: usize = 1024 * 1024;

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(&[EVENTS_COLLECTION]));
    let c = store.find_collection_by_name(EVENTS_COLLECTION).await.unwrap();

    let mut far = event("odh", "far", 2);
    far.category = "art".into();
    far.latitude = 48.1351;
    far.longitude = 11.5820;

    let mut near = event("noi", "near", 2);
    near.category = "technology".into();
    near.latitude = 46.4990;
    near.longitude = 11.3550;

    let past = event("odh", "past", -10);

    for ev in [far, near, past] {
        let mut rec = store.create_record(&c);
        populate_record(&mut rec, &ev, true).unwrap();
        store.save(&mut rec).await.unwrap();
    }
    store
}

fn state(store: Arc<MemoryStore>, token: Option<&str>) -> AppState {
    let providers: Vec<Box<dyn EventProvider>> = vec![
        Box::new(FakeProvider::new("drinbz", vec![event("drinbz", "1", 3)])),
        Box::new(FakeProvider::failing("unibz")),
    ];
    AppState::new(store, Arc::new(providers)).with_admin_token(token.map(String::from))
}

fn app(store: Arc<MemoryStore>, token: Option<&str>) -> Router {
    api::router(state(store, token))
}

fn post_sync() -> Request<Body> {
    Request::builder().method("POST").uri("/api/sync").body(Body::empty()).expect("build POST")
}

async fn body_json(resp: shuttle_axum::axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).expect("build GET")
}

#[tokio::test]
async fn health_returns_ok() {
    let resp = app(seeded_store().await, None).oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn events_are_upcoming_and_ranked_by_viewer() {
    let resp = app(seeded_store().await, None)
        .oneshot(get("/api/events?lat=46.4983&long=11.3548"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["source_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["near", "far"], "ended events are excluded, nearest first");
    assert_eq!(body[0]["category"], "technology");
    assert!(body[0]["date_start"].is_string());
}

#[tokio::test]
async fn events_filter_by_category_and_source() {
    let store = seeded_store().await;

    let body = body_json(app(store.clone(), None).oneshot(get("/api/events?category=art")).await.unwrap()).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["source_id"], "far");

    let body = body_json(app(store, None).oneshot(get("/api/events?source=noi&lat=junk")).await.unwrap()).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["source_name"], "noi");
}

#[tokio::test]
async fn sync_requires_token_when_configured() {
    let store = seeded_store().await;

    let req = Request::builder().method("POST").uri("/api/sync").body(Body::empty()).unwrap();
    let resp = app(store.clone(), Some("s3cret")).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .method("POST")
        .uri("/api/sync")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let resp = app(store, Some("s3cret")).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sync_returns_aggregated_report() {
    let store = seeded_store().await;
    let req = Request::builder()
        .method("POST")
        .uri("/api/sync")
        .header(header::AUTHORIZATION, "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let resp = app(store.clone(), Some("s3cret")).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["total_new"], 1);
    assert_eq!(body["total_errors"], 1);
    assert_eq!(body["providers"]["drinbz"]["new"], 1);
    assert_eq!(body["providers"]["unibz"]["errors"], 1);
    assert!(body["message"].as_str().unwrap().contains("1 new"));
    assert_eq!(store.len(EVENTS_COLLECTION), 4);
}

#[tokio::test]
async fn sync_is_refused_while_another_run_is_active() {
    let store = seeded_store().await;
    let gate = SyncGate::new();
    let router = api::router(state(store.clone(), None).with_sync_gate(gate.clone()));

    let running = gate.enter().await;
    let resp = router.clone().oneshot(post_sync()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(store.len(EVENTS_COLLECTION), 3, "nothing synced while busy");

    drop(running);
    let resp = router.oneshot(post_sync()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(store.len(EVENTS_COLLECTION), 4);
}
