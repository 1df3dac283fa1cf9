use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stop {
    #[serde(skip)]
    pub id: Option<i64>,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub order: i64,
    pub arrival: Option<DateTime<Utc>>,
}

/// A stop whose coordinates are already resolved but which has no position yet.
/// The store assigns `order` when the stop is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStop {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub arrival: Option<DateTime<Utc>>,
}

impl NewStop {
    pub fn into_stop(self, id: i64, order: i64) -> Stop {
        Stop {
            id: Some(id),
            name: self.name,
            latitude: self.latitude,
            longitude: self.longitude,
            order,
            arrival: self.arrival,
        }
    }
}
