pub mod auth;
pub mod stops;
pub mod trips;

use axum::{http::Uri, routing::get, Json, Router};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{error::AppError, state::AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(auth::router())
        .merge(trips::router())
        .merge(stops::router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

const TRIPS_PREFIX: &str = "/api/trips/";

/// The `:trip` path segment exactly as it arrived, still percent-encoded.
fn raw_trip_segment(uri: &Uri) -> Result<&str, AppError> {
    uri.path()
        .strip_prefix(TRIPS_PREFIX)
        .and_then(|rest| rest.split('/').next())
        .filter(|segment| !segment.is_empty())
        .ok_or(AppError::NotFound)
}
