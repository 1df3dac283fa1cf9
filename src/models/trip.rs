use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stop::Stop;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trip {
    #[serde(skip)]
    pub id: Option<i64>,
    pub name: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub stops: Vec<Stop>,
}

impl Trip {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            owner: owner.into(),
            created_at: Utc::now(),
            stops: Vec::new(),
        }
    }

    pub fn is_owned_by(&self, identity: &str) -> bool {
        self.owner == identity
    }

    /// Highest order currently assigned, 0 for an empty trip.
    pub fn max_order(&self) -> i64 {
        self.stops.iter().map(|s| s.order).max().unwrap_or(0)
    }
}
