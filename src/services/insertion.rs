use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::AppError,
    models::{
        normalize_name,
        stop::{NewStop, Stop},
    },
    services::{
        access::{decode_trip_name, TripAccessGuard},
        geocode::Geocoder,
        store::TripStore,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    GeocodeLookup,
    GeocodeFailed,
    GeocodeSucceeded,
    Persisting,
    Committed,
    PersistFailed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::GeocodeLookup => "geocode_lookup",
            Stage::GeocodeFailed => "geocode_failed",
            Stage::GeocodeSucceeded => "geocode_succeeded",
            Stage::Persisting => "persisting",
            Stage::Committed => "committed",
            Stage::PersistFailed => "persist_failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopRequest {
    pub name: Option<String>,
    pub arrival: Option<DateTime<Utc>>,
}

impl StopRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            arrival: None,
        }
    }
}

/// Geocodes a place name and appends it to a trip as one attempt. Every
/// failure is final for the request; nothing is retried.
#[derive(Clone)]
pub struct StopInsertionService {
    store: TripStore,
    geocoder: Arc<dyn Geocoder>,
}

impl StopInsertionService {
    pub fn new(store: TripStore, geocoder: Arc<dyn Geocoder>) -> Self {
        Self { store, geocoder }
    }

    #[instrument(name = "create_stop", skip(self, trip_name_raw, request), fields(trip = trip_name_raw))]
    pub async fn create_stop(
        &self,
        trip_name_raw: &str,
        owner: &str,
        request: StopRequest,
    ) -> Result<Stop, AppError> {
        debug!(stage = %Stage::Received);
        let place = normalize_name("stop name", request.name.as_deref())?;
        let trip_name = decode_trip_name(trip_name_raw)?;
        TripAccessGuard::new(&self.store)
            .authorize(owner, &trip_name)
            .await?;

        debug!(stage = %Stage::GeocodeLookup, place = %place);
        let located = self.geocoder.lookup(&place).await?;
        if !located.success {
            // A failed lookup never produces a stop, not even one at (0, 0).
            debug!(stage = %Stage::GeocodeFailed, message = %located.message);
            return Err(AppError::GeocodeRejected(located.message));
        }

        debug!(
            stage = %Stage::GeocodeSucceeded,
            latitude = located.latitude,
            longitude = located.longitude
        );
        let stop = NewStop {
            name: place,
            latitude: located.latitude,
            longitude: located.longitude,
            arrival: request.arrival,
        };

        debug!(stage = %Stage::Persisting);
        let mut uow = self.store.begin();
        uow.add_stop(&trip_name, owner, stop)
            .await
            .map_err(persist_failure)?;
        let saved = uow.save_all().await.map_err(persist_failure)?;
        if !saved {
            warn!(stage = %Stage::PersistFailed, "stop was not saved");
            return Err(AppError::Persist("no changes were saved".into()));
        }

        let stop = uow
            .saved_stops()
            .first()
            .cloned()
            .ok_or_else(|| AppError::Persist("saved stop missing from commit".into()))?;
        info!(stage = %Stage::Committed, order = stop.order, "stop saved");
        Ok(stop)
    }
}

fn persist_failure(err: AppError) -> AppError {
    match err {
        AppError::Database(err) => {
            warn!(stage = %Stage::PersistFailed, "storage fault: {err}");
            AppError::Persist(err.to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        db::{init_pool, run_migrations},
        models::trip::Trip,
        services::geocode::GeocodeResult,
    };

    struct CountingGeocoder {
        answer: GeocodeResult,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Geocoder for CountingGeocoder {
        async fn lookup(&self, _place_name: &str) -> Result<GeocodeResult, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    async fn service(answer: GeocodeResult) -> (StopInsertionService, Arc<CountingGeocoder>, TempDir) {
        let root = TempDir::new().unwrap();
        let url = format!("sqlite://{}", root.path().join("insert.sqlite").display());
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = TripStore::new(pool);

        let mut uow = store.begin();
        uow.add_trip(Trip::new("Paris Trip", "alice"));
        assert!(uow.save_all().await.unwrap());

        let geocoder = Arc::new(CountingGeocoder {
            answer,
            calls: AtomicUsize::new(0),
        });
        (StopInsertionService::new(store, geocoder.clone()), geocoder, root)
    }

    #[tokio::test]
    async fn committed_stop_carries_coordinates_and_order() {
        let (service, _geo, _root) = service(GeocodeResult::located(48.8584, 2.2945)).await;

        let stop = service
            .create_stop("Paris%20Trip", "alice", StopRequest::named("Eiffel Tower"))
            .await
            .unwrap();

        assert_eq!(stop.name, "Eiffel Tower");
        assert_eq!(stop.order, 1);
        assert_eq!((stop.latitude, stop.longitude), (48.8584, 2.2945));
    }

    #[tokio::test]
    async fn missing_place_name_stops_before_geocoding() {
        let (service, geo, _root) = service(GeocodeResult::located(1.0, 2.0)).await;

        let err = service
            .create_stop("Paris%20Trip", "alice", StopRequest::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(geo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn foreign_trip_stops_before_geocoding() {
        let (service, geo, _root) = service(GeocodeResult::located(1.0, 2.0)).await;

        let err = service
            .create_stop("Paris%20Trip", "bob", StopRequest::named("Louvre"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound));
        assert_eq!(geo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_lookup_surfaces_provider_message() {
        let (service, geo, _root) = service(GeocodeResult::no_confident_match("Springfield")).await;

        let err = service
            .create_stop("Paris%20Trip", "alice", StopRequest::named("Springfield"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::GeocodeRejected(ref msg) if msg == "no confident match for Springfield"));
        assert_eq!(geo.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stages_render_as_snake_case() {
        assert_eq!(Stage::GeocodeLookup.to_string(), "geocode_lookup");
        assert_eq!(Stage::PersistFailed.to_string(), "persist_failed");
    }
}
