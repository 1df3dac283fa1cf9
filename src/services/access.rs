use tracing::debug;

use crate::{error::AppError, models::trip::Trip, services::store::TripStore};

/// Decodes a trip name taken raw from the request path.
pub fn decode_trip_name(raw: &str) -> Result<String, AppError> {
    let decoded = urlencoding::decode(raw)
        .map_err(|_| AppError::validation("trip name is not valid UTF-8"))?;
    let name = decoded.trim();
    if name.is_empty() {
        return Err(AppError::validation("trip name must not be empty"));
    }
    Ok(name.to_string())
}

/// Lets an identity reach only the trips it owns. Trips owned by anyone else
/// look exactly like trips that do not exist.
pub struct TripAccessGuard<'a> {
    store: &'a TripStore,
}

impl<'a> TripAccessGuard<'a> {
    pub fn new(store: &'a TripStore) -> Self {
        Self { store }
    }

    pub async fn authorize(&self, identity: &str, trip_name: &str) -> Result<Trip, AppError> {
        match self.store.get_trip_by_name(trip_name, identity).await? {
            Some(trip) if trip.is_owned_by(identity) => Ok(trip),
            _ => {
                debug!(trip = trip_name, "trip not visible to caller");
                Err(AppError::NotFound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::db::{init_pool, run_migrations};

    #[test]
    fn decodes_percent_encoded_names() {
        assert_eq!(decode_trip_name("Paris%20Trip").unwrap(), "Paris Trip");
        assert_eq!(decode_trip_name("Caf%C3%A9%20Tour").unwrap(), "Café Tour");
        assert_eq!(decode_trip_name("plain").unwrap(), "plain");
    }

    #[test]
    fn rejects_blank_or_broken_names() {
        assert!(matches!(decode_trip_name("%20%20"), Err(AppError::Validation(_))));
        assert!(matches!(decode_trip_name("%FF%FE"), Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn foreign_trip_is_indistinguishable_from_missing_trip() {
        let root = TempDir::new().unwrap();
        let url = format!("sqlite://{}", root.path().join("guard.sqlite").display());
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = TripStore::new(pool);

        let mut uow = store.begin();
        uow.add_trip(Trip::new("Paris Trip", "alice"));
        assert!(uow.save_all().await.unwrap());

        let guard = TripAccessGuard::new(&store);
        let trip = guard.authorize("alice", "Paris Trip").await.unwrap();
        assert_eq!(trip.owner, "alice");

        let foreign = guard.authorize("bob", "Paris Trip").await.unwrap_err();
        let missing = guard.authorize("bob", "No Such Trip").await.unwrap_err();
        assert!(matches!(foreign, AppError::NotFound));
        assert!(matches!(missing, AppError::NotFound));
        assert_eq!(foreign.to_string(), missing.to_string());
        assert_eq!(foreign.status(), missing.status());
    }
}
