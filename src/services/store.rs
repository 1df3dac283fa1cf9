use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::{error, warn};

use crate::{
    config::AppConfig,
    db::{init_pool, run_migrations, DbPool},
    error::AppError,
    models::{
        stop::{NewStop, Stop},
        trip::Trip,
    },
};

// The next order is computed inside the insert, so two writers can never read
// the same maximum; UNIQUE(trip_id, stop_order) backs this up.
const INSERT_STOP: &str = r#"
INSERT INTO stops (trip_id, name, latitude, longitude, arrival, stop_order)
SELECT t.id, ?3, ?4, ?5, ?6,
       COALESCE((SELECT MAX(s.stop_order) FROM stops s WHERE s.trip_id = t.id), 0) + 1
FROM trips t
WHERE t.owner = ?1 AND t.name = ?2
RETURNING id, stop_order
"#;

#[derive(Debug, FromRow)]
struct TripRow {
    id: i64,
    owner: String,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<TripRow> for Trip {
    fn from(row: TripRow) -> Self {
        Trip {
            id: Some(row.id),
            name: row.name,
            owner: row.owner,
            created_at: row.created_at,
            stops: Vec::new(),
        }
    }
}

#[derive(Debug, FromRow)]
struct StopRow {
    id: i64,
    trip_id: i64,
    name: String,
    latitude: f64,
    longitude: f64,
    stop_order: i64,
    arrival: Option<DateTime<Utc>>,
}

impl From<StopRow> for Stop {
    fn from(row: StopRow) -> Self {
        Stop {
            id: Some(row.id),
            name: row.name,
            latitude: row.latitude,
            longitude: row.longitude,
            order: row.stop_order,
            arrival: row.arrival,
        }
    }
}

/// Trips and their stops, always scoped to the owning identity on lookup.
#[derive(Clone)]
pub struct TripStore {
    pool: DbPool,
}

impl TripStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &AppConfig) -> Result<Self, AppError> {
        let pool = init_pool(&config.database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Returns the trip only when `owner` owns it. A trip of the same name
    /// belonging to someone else is reported as absent.
    pub async fn get_trip_by_name(&self, name: &str, owner: &str) -> Result<Option<Trip>, AppError> {
        let row = sqlx::query_as::<_, TripRow>(
            "SELECT id, owner, name, created_at FROM trips WHERE owner = ?1 AND name = ?2",
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let stops = sqlx::query_as::<_, StopRow>(
            r#"SELECT id, trip_id, name, latitude, longitude, stop_order, arrival
               FROM stops WHERE trip_id = ?1 ORDER BY stop_order"#,
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let mut trip = Trip::from(row);
        trip.stops = stops.into_iter().map(Stop::from).collect();
        Ok(Some(trip))
    }

    pub async fn get_all_trips(&self) -> Vec<Trip> {
        let result = self.load_trips(None).await;
        degrade("trips", result)
    }

    pub async fn get_all_trips_with_stops(&self) -> Vec<Trip> {
        let result = self.load_trips_with_stops(None).await;
        degrade("trips with stops", result)
    }

    pub async fn get_trips_for_owner(&self, owner: &str) -> Vec<Trip> {
        let result = self.load_trips_with_stops(Some(owner)).await;
        degrade("trips for owner", result)
    }

    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork::new(self.clone())
    }

    async fn trip_id(&self, name: &str, owner: &str) -> Result<Option<i64>, AppError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM trips WHERE owner = ?1 AND name = ?2")
            .bind(owner)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn load_trips(&self, owner: Option<&str>) -> Result<Vec<Trip>, AppError> {
        let rows = match owner {
            Some(owner) => {
                sqlx::query_as::<_, TripRow>(
                    "SELECT id, owner, name, created_at FROM trips WHERE owner = ?1 ORDER BY name",
                )
                .bind(owner)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, TripRow>(
                    "SELECT id, owner, name, created_at FROM trips ORDER BY name, owner",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(Trip::from).collect())
    }

    async fn load_trips_with_stops(&self, owner: Option<&str>) -> Result<Vec<Trip>, AppError> {
        let mut trips = self.load_trips(owner).await?;

        let rows = match owner {
            Some(owner) => {
                sqlx::query_as::<_, StopRow>(
                    r#"SELECT s.id, s.trip_id, s.name, s.latitude, s.longitude, s.stop_order, s.arrival
                       FROM stops s JOIN trips t ON t.id = s.trip_id
                       WHERE t.owner = ?1
                       ORDER BY s.trip_id, s.stop_order"#,
                )
                .bind(owner)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, StopRow>(
                    r#"SELECT id, trip_id, name, latitude, longitude, stop_order, arrival
                       FROM stops ORDER BY trip_id, stop_order"#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut by_trip: HashMap<i64, Vec<Stop>> = HashMap::new();
        for row in rows {
            by_trip.entry(row.trip_id).or_default().push(Stop::from(row));
        }
        for trip in &mut trips {
            if let Some(stops) = trip.id.and_then(|id| by_trip.remove(&id)) {
                trip.stops = stops;
            }
        }
        Ok(trips)
    }
}

fn degrade<T>(what: &str, result: Result<Vec<T>, AppError>) -> Vec<T> {
    result.unwrap_or_else(|err| {
        error!("could not load {what}, serving an empty list: {err}");
        Vec::new()
    })
}

#[derive(Debug)]
enum Pending {
    Trip(Trip),
    Stop {
        owner: String,
        trip_name: String,
        stop: NewStop,
    },
    DeleteTrip {
        owner: String,
        trip_name: String,
    },
}

/// Changes staged against a [`TripStore`] and committed together by
/// [`UnitOfWork::save_all`]. Dropping it discards everything staged.
pub struct UnitOfWork {
    store: TripStore,
    pending: Vec<Pending>,
    saved_trips: Vec<Trip>,
    saved_stops: Vec<Stop>,
}

impl UnitOfWork {
    fn new(store: TripStore) -> Self {
        Self {
            store,
            pending: Vec::new(),
            saved_trips: Vec::new(),
            saved_stops: Vec::new(),
        }
    }

    pub fn add_trip(&mut self, trip: Trip) {
        self.pending.push(Pending::Trip(trip));
    }

    /// Stages `stop` at the end of the owner's trip. Fails with
    /// [`AppError::NotFound`] and stages nothing when the trip is unknown to
    /// this owner. The order is assigned on commit.
    pub async fn add_stop(
        &mut self,
        trip_name: &str,
        owner: &str,
        stop: NewStop,
    ) -> Result<(), AppError> {
        if !self.trip_visible(trip_name, owner).await? {
            return Err(AppError::NotFound);
        }
        self.pending.push(Pending::Stop {
            owner: owner.to_string(),
            trip_name: trip_name.to_string(),
            stop,
        });
        Ok(())
    }

    /// Stages removal of an owned trip. Its stops go with it.
    pub async fn delete_trip(&mut self, trip_name: &str, owner: &str) -> Result<(), AppError> {
        if self.store.trip_id(trip_name, owner).await?.is_none() {
            return Err(AppError::NotFound);
        }
        self.pending.push(Pending::DeleteTrip {
            owner: owner.to_string(),
            trip_name: trip_name.to_string(),
        });
        Ok(())
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Commits every staged change in one transaction. Returns `Ok(true)` only
    /// when all of them landed; if any staged change no longer applies the
    /// transaction is rolled back and `Ok(false)` is returned.
    pub async fn save_all(&mut self) -> Result<bool, AppError> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(false);
        }

        let mut tx = self.store.pool.begin().await?;
        let mut trips = Vec::new();
        let mut stops = Vec::new();

        for change in pending {
            let landed = match change {
                Pending::Trip(mut trip) => {
                    let id: i64 = sqlx::query_scalar(
                        "INSERT INTO trips (owner, name, created_at) VALUES (?1, ?2, ?3) RETURNING id",
                    )
                    .bind(&trip.owner)
                    .bind(&trip.name)
                    .bind(trip.created_at)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|err| duplicate_trip(err, &trip.name))?;
                    trip.id = Some(id);
                    trips.push(trip);
                    true
                }
                Pending::Stop {
                    owner,
                    trip_name,
                    stop,
                } => {
                    let row: Option<(i64, i64)> = sqlx::query_as(INSERT_STOP)
                        .bind(&owner)
                        .bind(&trip_name)
                        .bind(&stop.name)
                        .bind(stop.latitude)
                        .bind(stop.longitude)
                        .bind(stop.arrival)
                        .fetch_optional(&mut *tx)
                        .await?;
                    match row {
                        Some((id, order)) => {
                            stops.push(stop.into_stop(id, order));
                            true
                        }
                        None => {
                            warn!(trip = %trip_name, "trip vanished before its stop was saved");
                            false
                        }
                    }
                }
                Pending::DeleteTrip { owner, trip_name } => {
                    let result = sqlx::query("DELETE FROM trips WHERE owner = ?1 AND name = ?2")
                        .bind(&owner)
                        .bind(&trip_name)
                        .execute(&mut *tx)
                        .await?;
                    if result.rows_affected() == 0 {
                        warn!(trip = %trip_name, "trip vanished before it could be deleted");
                    }
                    result.rows_affected() > 0
                }
            };

            if !landed {
                tx.rollback().await?;
                return Ok(false);
            }
        }

        tx.commit().await?;
        self.saved_trips.extend(trips);
        self.saved_stops.extend(stops);
        Ok(true)
    }

    /// Trips written by the last successful [`save_all`](Self::save_all).
    pub fn saved_trips(&self) -> &[Trip] {
        &self.saved_trips
    }

    /// Stops written by the last successful [`save_all`](Self::save_all),
    /// with their assigned order.
    pub fn saved_stops(&self) -> &[Stop] {
        &self.saved_stops
    }

    async fn trip_visible(&self, trip_name: &str, owner: &str) -> Result<bool, AppError> {
        let staged = self.pending.iter().any(|change| {
            matches!(change, Pending::Trip(trip) if trip.name == trip_name && trip.is_owned_by(owner))
        });
        if staged {
            return Ok(true);
        }
        Ok(self.store.trip_id(trip_name, owner).await?.is_some())
    }
}

fn duplicate_trip(err: sqlx::Error, name: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::validation(format!("a trip named '{name}' already exists"))
        }
        _ => err.into(),
    }
}
