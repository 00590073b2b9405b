//! Read-only dashboard API over the event store
//!
//! Events are addressed by their store id, which stays valid until the event
//! is evicted.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::protocol::WireStatus;
use crate::store::EventStore;

#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    pub id: u64,
    pub name: String,
    pub status: WireStatus,
    pub timestamp: String,
    pub image_bytes: usize,
    /// Capture file under the gateway's captures directory
    pub capture: Option<String>,
}

/// Snapshot plus counts, all taken from the same snapshot
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub total: usize,
    pub granted: usize,
    pub denied: usize,
    pub events: Vec<EventView>,
}

impl DashboardView {
    pub fn from_store(store: &EventStore) -> Self {
        let summary = store.summary();
        let events = summary
            .events
            .into_iter()
            .map(|e| EventView {
                id: e.id,
                image_bytes: e.event.image.len(),
                name: e.event.name,
                status: e.event.status,
                timestamp: e.event.timestamp,
                capture: e.capture,
            })
            .collect();
        Self {
            total: summary.total,
            granted: summary.granted,
            denied: summary.denied,
            events,
        }
    }
}

pub fn router(store: Arc<EventStore>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/events", get(list_events))
        .route("/api/events/:id/image", get(event_image))
        .with_state(store)
}

async fn list_events(State(store): State<Arc<EventStore>>) -> Json<DashboardView> {
    Json(DashboardView::from_store(&store))
}

async fn event_image(State(store): State<Arc<EventStore>>, Path(id): Path<u64>) -> Response {
    match store.get(id) {
        Some(entry) => ([(header::CONTENT_TYPE, "image/jpeg")], entry.event.image).into_response(),
        None => (StatusCode::NOT_FOUND, "no such event").into_response(),
    }
}
