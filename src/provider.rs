use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GeocoderConfig;
use crate::errors::{AppError, AppResult};

const USER_AGENT: &str = concat!("contact-geocoder/", env!("CARGO_PKG_VERSION"));
const PROVIDER_CONFIDENCE_SCALE: f64 = 10.0;
const UNKNOWN_PRECISION: &str = "unknown";

/// One accepted geocode. `confidence` is always within `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodeResult {
    pub lat: f64,
    pub lng: f64,
    pub label: String,
    pub confidence: f64,
    pub precision_type: String,
    pub components: BTreeMap<String, serde_json::Value>,
}

/// Why a single query produced no result. Every variant is a property of
/// the query and is safe to cache for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupFailure {
    Transport(String),
    Status(u16),
    EmptyResult,
}

impl fmt::Display for LookupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupFailure::Transport(reason) => write!(f, "transport failure: {reason}"),
            LookupFailure::Status(code) => write!(f, "provider returned HTTP {code}"),
            LookupFailure::EmptyResult => f.write_str("provider returned no results"),
        }
    }
}

#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    async fn geocode(&self, query: &str) -> Result<GeocodeResult, LookupFailure>;
}

pub fn normalize_confidence(raw: f64) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    (raw / PROVIDER_CONFIDENCE_SCALE).clamp(0.0, 1.0)
}

/// Forward geocoder speaking the OpenCage-style `q`/`key` JSON API.
pub struct HttpGeocodeProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl HttpGeocodeProvider {
    pub fn new(config: &GeocoderConfig) -> AppResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Config("GEOCODER_API_KEY is not configured".into()))?;
        if config.base_url.trim().is_empty() {
            return Err(AppError::Config("geocoder base URL is empty".into()));
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl GeocodeProvider for HttpGeocodeProvider {
    async fn geocode(&self, query: &str) -> Result<GeocodeResult, LookupFailure> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            results: Vec<ResponseResult>,
        }

        #[derive(Deserialize)]
        struct ResponseResult {
            geometry: ResponseGeometry,
            formatted: Option<String>,
            confidence: Option<f64>,
            #[serde(default)]
            components: BTreeMap<String, serde_json::Value>,
        }

        #[derive(Deserialize)]
        struct ResponseGeometry {
            lat: f64,
            lng: f64,
        }

        debug!(query, "issuing geocode request");
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("q", query),
                ("key", self.api_key.expose_secret()),
                ("limit", "1"),
                ("language", "en"),
            ])
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if !status.is_success() {
            warn!(query, status = status.as_u16(), "geocode request rejected");
            return Err(LookupFailure::Status(status.as_u16()));
        }

        let parsed: Response = response.json().await.map_err(transport_failure)?;
        let first = parsed
            .results
            .into_iter()
            .next()
            .ok_or(LookupFailure::EmptyResult)?;

        let precision_type = first
            .components
            .get("_type")
            .and_then(|value| value.as_str())
            .unwrap_or(UNKNOWN_PRECISION)
            .to_string();

        Ok(GeocodeResult {
            lat: first.geometry.lat,
            lng: first.geometry.lng,
            label: first.formatted.unwrap_or_else(|| query.to_string()),
            confidence: normalize_confidence(first.confidence.unwrap_or(0.0)),
            precision_type,
            components: first.components,
        })
    }
}

fn transport_failure(err: reqwest::Error) -> LookupFailure {
    // the request URL carries the API key
    let err = err.without_url();
    warn!(error = %err, "geocode transport failure");
    LookupFailure::Transport(err.to_string())
}
