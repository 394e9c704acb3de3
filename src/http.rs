//! HTTP ingress for the bus. Maps HTTP requests onto `send` / `publish`.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `POST /:message_type`: send a command or publish an event. Body = JSON
//!   payload, request headers become envelope properties. Answers
//!   `202 { "id": ... }`.
//! - `GET /health`: `{ "ok": true, "running": ..., "message_types": [...], "loops": [...] }`.
//!
//! ## Example
//!
//! ```ignore
//! let bus = Bus::builder()./* ... */.build()?;
//! bus.start().await?;
//!
//! // Compose with other axum routes
//! let app = courier_rust::http::router(bus.clone());
//!
//! // Or serve directly
//! courier_rust::http::serve(bus, "0.0.0.0:3000").await?;
//! ```

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::bus::Bus;
use crate::error::BusError;

/// Build an axum `Router` that feeds the given bus.
pub fn router(bus: Bus) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/:message_type", post(message_handler))
        .with_state(bus)
}

/// Serve the bus over HTTP at the given address (e.g. `"0.0.0.0:3000"`).
pub async fn serve(bus: Bus, addr: &str) -> Result<(), std::io::Error> {
    let app = router(bus);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn health_handler(State(bus): State<Bus>) -> impl IntoResponse {
    let message_types: Vec<Value> = bus
        .message_types()
        .into_iter()
        .map(|(name, kind)| json!({ "name": name, "kind": kind.as_str() }))
        .collect();
    let loops = bus.loop_stats().await;
    Json(json!({
        "ok": true,
        "running": bus.is_running(),
        "application": bus.config().application_name,
        "instance": bus.config().instance_name,
        "message_types": message_types,
        "loops": loops,
    }))
}

async fn message_handler(
    State(bus): State<Bus>,
    Path(message_type): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    match bus
        .send_json(&message_type, &payload, properties_from_headers(&headers))
        .await
    {
        Ok(id) => (StatusCode::ACCEPTED, Json(json!({ "id": id }))).into_response(),
        Err(e) => {
            let body = json!({ "error": e.to_string() });
            (status_for(&e), Json(body)).into_response()
        }
    }
}

fn status_for(error: &BusError) -> StatusCode {
    match error {
        BusError::UnknownMessageType(_) => StatusCode::NOT_FOUND,
        BusError::UnsupportedKind { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        BusError::Codec(_) => StatusCode::BAD_REQUEST,
        BusError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// All headers, lowercased, as envelope properties.
fn properties_from_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}
