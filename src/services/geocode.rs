use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{config::GeocodeConfig, error::AppError};

/// Confidence tier the provider must report before a match is accepted.
pub const HIGH_CONFIDENCE: &str = "High";

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeResult {
    pub success: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub message: String,
}

impl GeocodeResult {
    pub fn located(latitude: f64, longitude: f64) -> Self {
        Self {
            success: true,
            latitude,
            longitude,
            message: "success".into(),
        }
    }

    pub fn no_location(place_name: &str) -> Self {
        Self::failed(format!("no location found for {place_name}"))
    }

    pub fn no_confident_match(place_name: &str) -> Self {
        Self::failed(format!("no confident match for {place_name}"))
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            latitude: 0.0,
            longitude: 0.0,
            message,
        }
    }
}

/// Resolves free-text place names to coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn lookup(&self, place_name: &str) -> Result<GeocodeResult, AppError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationsResponse {
    pub resource_sets: Vec<ResourceSet>,
}

#[derive(Debug, Deserialize)]
pub struct ResourceSet {
    pub resources: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub confidence: String,
    #[serde(default)]
    pub geocode_points: Vec<GeocodePoint>,
}

#[derive(Debug, Deserialize)]
pub struct GeocodePoint {
    pub coordinates: Vec<f64>,
}

/// Turns a decoded provider response into a lookup outcome. Only the top
/// resource of the first resource set is considered.
pub fn classify(place_name: &str, response: LocationsResponse) -> Result<GeocodeResult, AppError> {
    let set = response
        .resource_sets
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Transport("response carried no resource sets".into()))?;

    let Some(top) = set.resources.into_iter().next() else {
        return Ok(GeocodeResult::no_location(place_name));
    };

    if top.confidence != HIGH_CONFIDENCE {
        return Ok(GeocodeResult::no_confident_match(place_name));
    }

    let point = top
        .geocode_points
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Transport("matched location has no geocode points".into()))?;

    match point.coordinates.as_slice() {
        [latitude, longitude, ..] => Ok(GeocodeResult::located(*latitude, *longitude)),
        _ => Err(AppError::Transport(
            "geocode point must carry latitude and longitude".into(),
        )),
    }
}

/// HTTP client for the Bing Maps style Locations API.
#[derive(Clone)]
pub struct GeocodeClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl GeocodeClient {
    pub fn new(config: &GeocodeConfig) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| AppError::Config(format!("could not build geocode client: {err}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request_url(&self, place_name: &str) -> String {
        format!(
            "{}?q={}&key={}",
            self.endpoint,
            urlencoding::encode(place_name),
            urlencoding::encode(&self.api_key)
        )
    }
}

#[async_trait]
impl Geocoder for GeocodeClient {
    async fn lookup(&self, place_name: &str) -> Result<GeocodeResult, AppError> {
        let place_name = place_name.trim();
        if place_name.is_empty() {
            return Err(AppError::validation("place name must not be empty"));
        }

        debug!(place = place_name, "looking up coordinates");
        let response = self
            .http
            .get(self.request_url(place_name))
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(transport_error)?;

        let body: LocationsResponse = response.json().await.map_err(transport_error)?;
        let result = classify(place_name, body)?;
        if !result.success {
            debug!(place = place_name, message = %result.message, "lookup rejected");
        }
        Ok(result)
    }
}

// The request url carries the api key, so it is stripped before the error travels further.
fn transport_error(err: reqwest::Error) -> AppError {
    let err = err.without_url();
    if err.is_timeout() {
        warn!("geocoding request timed out");
        return AppError::Transport("request timed out".into());
    }
    warn!("geocoding request failed: {err}");
    AppError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use axum::{
        extract::Query,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::get,
        Json, Router,
    };
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    use super::*;

    fn locations(resources: Value) -> Value {
        json!({
            "statusCode": 200,
            "resourceSets": [{ "estimatedTotal": 1, "resources": resources }]
        })
    }

    fn resource(confidence: &str, lat: f64, lon: f64) -> Value {
        json!({
            "name": "somewhere",
            "confidence": confidence,
            "geocodePoints": [
                { "type": "Point", "coordinates": [lat, lon], "usageTypes": ["Display"] },
                { "type": "Point", "coordinates": [0.5, 0.5], "usageTypes": ["Route"] }
            ]
        })
    }

    fn parse(value: Value) -> LocationsResponse {
        serde_json::from_value(value).expect("valid provider document")
    }

    #[test]
    fn empty_resource_set_is_no_location() {
        let result = classify("Atlantis", parse(locations(json!([])))).unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "no location found for Atlantis");
    }

    #[test]
    fn medium_confidence_is_rejected() {
        let body = locations(json!([resource("Medium", 39.78, -89.65)]));
        let result = classify("Springfield", parse(body)).unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "no confident match for Springfield");
    }

    #[test]
    fn confidence_comparison_is_case_sensitive() {
        let body = locations(json!([resource("high", 1.0, 2.0)]));
        let result = classify("Somewhere", parse(body)).unwrap();
        assert!(!result.success);
    }

    #[test]
    fn high_confidence_takes_first_point_of_first_resource() {
        let body = locations(json!([
            resource("High", 48.8584, 2.2945),
            resource("High", 10.0, 20.0)
        ]));
        let result = classify("Eiffel Tower", parse(body)).unwrap();
        assert_eq!(result, GeocodeResult::located(48.8584, 2.2945));
        assert_eq!(result.message, "success");
    }

    #[test]
    fn missing_resource_sets_is_transport_error() {
        let err = classify("x", parse(json!({ "resourceSets": [] }))).unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));
    }

    #[test]
    fn high_match_without_coordinates_is_transport_error() {
        let body = locations(json!([{ "confidence": "High", "geocodePoints": [] }]));
        let err = classify("x", parse(body)).unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));

        let body = locations(json!([
            { "confidence": "High", "geocodePoints": [{ "coordinates": [1.0] }] }
        ]));
        let err = classify("x", parse(body)).unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));
    }

    #[test]
    fn missing_confidence_does_not_deserialize() {
        let body = locations(json!([{ "geocodePoints": [] }]));
        assert!(serde_json::from_value::<LocationsResponse>(body).is_err());
    }

    async fn fake_provider(Query(params): Query<HashMap<String, String>>) -> Response {
        if params.get("key").map(String::as_str) != Some("test-key") {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        match params.get("q").map(String::as_str) {
            Some("Eiffel Tower") => {
                Json(locations(json!([resource("High", 48.8584, 2.2945)]))).into_response()
            }
            Some("Springfield") => {
                Json(locations(json!([resource("Medium", 39.78, -89.65)]))).into_response()
            }
            Some("Nowhere") => Json(locations(json!([]))).into_response(),
            Some("Garbage") => "<html>not json</html>".into_response(),
            Some("Slow") => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(locations(json!([]))).into_response()
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }

    async fn client_for_fake_provider(api_key: &str) -> GeocodeClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/REST/v1/Locations", get(fake_provider));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        GeocodeClient::new(&GeocodeConfig {
            endpoint: format!("http://{addr}/REST/v1/Locations"),
            api_key: api_key.into(),
            timeout: Duration::from_millis(300),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn lookup_resolves_high_confidence_match() {
        let client = client_for_fake_provider("test-key").await;
        let result = client.lookup("Eiffel Tower").await.unwrap();
        assert!(result.success);
        assert_eq!(result.latitude, 48.8584);
        assert_eq!(result.longitude, 2.2945);
    }

    #[tokio::test]
    async fn lookup_reports_rejections_as_unsuccessful_results() {
        let client = client_for_fake_provider("test-key").await;

        let none = client.lookup("Nowhere").await.unwrap();
        assert_eq!(none.message, "no location found for Nowhere");

        let vague = client.lookup("Springfield").await.unwrap();
        assert_eq!(vague.message, "no confident match for Springfield");
    }

    #[tokio::test]
    async fn lookup_rejects_blank_place_names_without_calling_out() {
        let client = GeocodeClient::new(&GeocodeConfig {
            endpoint: "http://127.0.0.1:9/unreachable".into(),
            api_key: "k".into(),
            timeout: Duration::from_millis(100),
        })
        .unwrap();
        let err = client.lookup("   ").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn provider_failures_are_transport_errors() {
        let client = client_for_fake_provider("test-key").await;

        let err = client.lookup("Explode").await.unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));

        let err = client.lookup("Garbage").await.unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));

        let err = client.lookup("Slow").await.unwrap_err();
        assert!(matches!(err, AppError::Transport(ref msg) if msg == "request timed out"));
    }

    #[tokio::test]
    async fn wrong_api_key_is_transport_error_without_leaking_the_key() {
        let client = client_for_fake_provider("secret-wrong-key").await;
        let err = client.lookup("Eiffel Tower").await.unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));
        assert!(!err.to_string().contains("secret-wrong-key"));
    }
}
