use std::{env, net::SocketAddr, time::Duration};

use crate::error::AppError;

const DEFAULT_GEOCODE_ENDPOINT: &str = "https://dev.virtualearth.net/REST/v1/Locations";
const DEFAULT_GEOCODE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub cookie_secret: String,
    pub geocode: GeocodeConfig,
}

/// Settings for the external location lookup.
#[derive(Debug, Clone)]
pub struct GeocodeConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://world.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let cookie_secret = env::var("COOKIE_SECRET")
            .unwrap_or_else(|_| "change-me-this-is-not-a-real-cookie-secret".to_string());

        let geocode = GeocodeConfig::from_env()?;

        Ok(Self {
            database_url,
            listen_addr,
            cookie_secret,
            geocode,
        })
    }
}

impl GeocodeConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let endpoint = env::var("GEOCODE_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_GEOCODE_ENDPOINT.to_string());

        let api_key = env::var("GEOCODE_API_KEY")
            .map(|key| key.trim().to_string())
            .unwrap_or_default();
        if api_key.is_empty() {
            return Err(AppError::Config("GEOCODE_API_KEY must be set".into()));
        }

        let timeout_ms = match env::var("GEOCODE_TIMEOUT_MS") {
            Ok(raw) => raw
                .parse::<u64>()
                .map_err(|err| AppError::Config(format!("invalid GEOCODE_TIMEOUT_MS: {err}")))?,
            Err(_) => DEFAULT_GEOCODE_TIMEOUT_MS,
        };
        if timeout_ms == 0 {
            return Err(AppError::Config(
                "GEOCODE_TIMEOUT_MS must be greater than zero".into(),
            ));
        }

        Ok(Self {
            endpoint,
            api_key,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}
