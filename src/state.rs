use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};

use crate::{
    config::AppConfig,
    db::DbPool,
    services::{geocode::Geocoder, insertion::StopInsertionService, store::TripStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub store: TripStore,
    pub stops: StopInsertionService,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(config: AppConfig, store: TripStore, geocoder: Arc<dyn Geocoder>) -> Self {
        let digest = Sha512::digest(config.cookie_secret.as_bytes());
        let cookie_key = Key::from(&digest[..]);
        let stops = StopInsertionService::new(store.clone(), geocoder);
        Self {
            config,
            db: store.pool().clone(),
            store,
            stops,
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
