use std::sync::Arc;

use serde::Deserialize;
use shuttle_axum::axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::geo::GeoPoint;
use crate::ingest::sync::{
    record_to_event, sync_all, SyncGate, SyncOptions, SyncReport, EVENTS_COLLECTION,
};
use crate::ingest::types::{Event, EventProvider};
use crate::recommend::{recommend, ViewerContext};
use crate::store::{Params, RecordStore, StoreError};

/// Upper bound on candidates loaded for one ranking request.
pub const MAX_CANDIDATES: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub providers: Arc<Vec<Box<dyn EventProvider>>>,
    pub sync: SyncOptions,
    pub admin_token: Option<Arc<str>>,
    pub sync_gate: SyncGate,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, providers: Arc<Vec<Box<dyn EventProvider>>>) -> Self {
        Self {
            store,
            providers,
            sync: SyncOptions::default(),
            admin_token: None,
            sync_gate: SyncGate::new(),
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.map(Arc::from);
        self
    }

    pub fn with_sync_options(mut self, opts: SyncOptions) -> Self {
        self.sync = opts;
        self
    }

    /// Shares the gate with the scheduler so manual and timed runs never overlap.
    pub fn with_sync_gate(mut self, gate: SyncGate) -> Self {
        self.sync_gate = gate;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/events", get(list_events))
        .route("/api/sync", post(trigger_sync))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Query string of the read endpoint. Coordinates stay raw so junk falls back to 0.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct EventQuery {
    pub category: Option<String>,
    pub source: Option<String>,
    pub lat: Option<String>,
    pub long: Option<String>,
}

impl EventQuery {
    pub fn viewer(&self) -> GeoPoint {
        fn coord(v: &Option<String>) -> f64 {
            v.as_deref()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|x| x.is_finite())
                .unwrap_or(0.0)
        }
        GeoPoint::new(coord(&self.lat), coord(&self.long))
    }

    fn filter(&self) -> (String, Params) {
        let mut filter = String::from("date_end >= @now");
        let mut params = Params::new();
        if let Some(c) = self.category.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            filter.push_str(" && category = {:category}");
            params.insert("category".into(), c.into());
        }
        if let Some(s) = self.source.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            filter.push_str(" && source_name = {:source}");
            params.insert("source".into(), s.into());
        }
        (filter, params)
    }
}

/// Not-yet-ended events matching `q`, soonest first.
pub async fn upcoming_events(store: &dyn RecordStore, q: &EventQuery) -> Result<Vec<Event>, StoreError> {
    let collection = store.find_collection_by_name(EVENTS_COLLECTION).await?;
    let (filter, params) = q.filter();
    let records = store
        .find_records_by_filter(&collection, &filter, "+date_start", MAX_CANDIDATES, 0, &params)
        .await?;

    Ok(records
        .iter()
        .filter_map(|r| {
            let ev = record_to_event(r);
            if ev.is_none() {
                tracing::debug!(target: "api", record = %r.id, "skipping record with unreadable dates");
            }
            ev
        })
        .collect())
}

/// Upcoming events ranked for the viewer in `q`.
pub async fn recommended_feed(store: &dyn RecordStore, q: &EventQuery) -> Result<Vec<Event>, StoreError> {
    let events = upcoming_events(store, q).await?;
    let ctx = ViewerContext::at(q.viewer(), chrono::Utc::now());
    Ok(recommend(&ctx, events))
}

pub struct ApiError(StatusCode, String);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        tracing::error!(target: "api", error = %e, "store error");
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

async fn list_events(
    State(state): State<AppState>,
    Query(q): Query<EventQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let events = recommended_feed(state.store.as_ref(), &q).await?;
    tracing::debug!(target: "api", count = events.len(), "served events");
    Ok(Json(events))
}

fn authorized(headers: &HeaderMap, token: Option<&str>) -> bool {
    let Some(expected) = token else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|given| given.trim() == expected)
}

async fn trigger_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SyncReport>, ApiError> {
    if !authorized(&headers, state.admin_token.as_deref()) {
        tracing::warn!(target: "api", "rejected sync trigger without valid token");
        return Err(ApiError(StatusCode::UNAUTHORIZED, "unauthorized".into()));
    }

    let Some(_running) = state.sync_gate.try_enter() else {
        tracing::info!(target: "api", "sync trigger refused, a run is in progress");
        return Err(ApiError(StatusCode::CONFLICT, "sync already running".into()));
    };

    tracing::info!(target: "api", providers = state.providers.len(), "manual sync triggered");
    let stats = sync_all(state.providers.as_slice(), state.store.as_ref(), state.sync).await;
    Ok(Json(SyncReport::from_stats(stats)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shuttle_axum::axum::http::HeaderValue;

    #[test]
    fn viewer_falls_back_to_zero() {
        let q = EventQuery {
            lat: Some("46.49".into()),
            long: Some("east".into()),
            ..Default::default()
        };
        let p = q.viewer();
        assert_eq!(p.latitude, 46.49);
        assert_eq!(p.longitude, 0.0);
        assert!(!EventQuery::default().viewer().is_known());
    }

    #[test]
    fn filter_adds_optional_clauses() {
        let q = EventQuery {
            category: Some("art".into()),
            source: Some(" ".into()),
            ..Default::default()
        };
        let (f, p) = q.filter();
        assert_eq!(f, "date_end >= @now && category = {:category}");
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn bearer_check() {
        let mut h = HeaderMap::new();
        assert!(authorized(&h, None));
        assert!(!authorized(&h, Some("s3cret")));
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(authorized(&h, Some("s3cret")));
        assert!(!authorized(&h, Some("other")));
    }
}
