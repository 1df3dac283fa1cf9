use axum::{
    extract::State,
    http::{StatusCode, Uri},
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::raw_trip_segment;
use crate::{
    auth::CurrentUser,
    error::AppError,
    models::{normalize_name, trip::Trip},
    services::access::{decode_trip_name, TripAccessGuard},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/trips", get(trips_list).post(trip_create))
        .route("/api/trips/:trip", delete(trip_delete))
}

async fn trips_list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<Trip>>, AppError> {
    let user = current.require_user()?;
    Ok(Json(state.store.get_trips_for_owner(user.identity()).await))
}

#[derive(Deserialize)]
struct TripForm {
    name: Option<String>,
}

async fn trip_create(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(form): Json<TripForm>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let user = current.require_user()?;
    let name = normalize_name("trip name", form.name.as_deref())?;

    let mut uow = state.store.begin();
    uow.add_trip(Trip::new(name, user.identity()));
    if !uow.save_all().await? {
        return Err(AppError::Persist("trip was not saved".into()));
    }
    let trip = uow
        .saved_trips()
        .first()
        .cloned()
        .ok_or_else(|| AppError::Persist("saved trip missing from commit".into()))?;

    info!(trip = %trip.name, "trip created");
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn trip_delete(
    State(state): State<AppState>,
    current: CurrentUser,
    uri: Uri,
) -> Result<StatusCode, AppError> {
    let user = current.require_user()?;
    let trip_name = decode_trip_name(raw_trip_segment(&uri)?)?;
    TripAccessGuard::new(&state.store)
        .authorize(user.identity(), &trip_name)
        .await?;

    let mut uow = state.store.begin();
    uow.delete_trip(&trip_name, user.identity()).await?;
    if !uow.save_all().await? {
        return Err(AppError::NotFound);
    }

    info!(trip = %trip_name, "trip deleted");
    Ok(StatusCode::NO_CONTENT)
}
