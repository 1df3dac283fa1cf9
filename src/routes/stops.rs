use axum::{
    extract::State,
    http::{StatusCode, Uri},
    routing::get,
    Json, Router,
};

use super::raw_trip_segment;
use crate::{
    auth::CurrentUser,
    error::AppError,
    models::stop::Stop,
    services::{
        access::{decode_trip_name, TripAccessGuard},
        insertion::StopRequest,
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/trips/:trip/stops", get(stops_list).post(stop_create))
}

async fn stops_list(
    State(state): State<AppState>,
    current: CurrentUser,
    uri: Uri,
) -> Result<Json<Vec<Stop>>, AppError> {
    let user = current.require_user()?;
    let trip_name = decode_trip_name(raw_trip_segment(&uri)?)?;
    let trip = TripAccessGuard::new(&state.store)
        .authorize(user.identity(), &trip_name)
        .await?;
    Ok(Json(trip.stops))
}

async fn stop_create(
    State(state): State<AppState>,
    current: CurrentUser,
    uri: Uri,
    Json(request): Json<StopRequest>,
) -> Result<(StatusCode, Json<Stop>), AppError> {
    let user = current.require_user()?;
    let stop = state
        .stops
        .create_stop(raw_trip_segment(&uri)?, user.identity(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(stop)))
}
