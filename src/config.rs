use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.opencagedata.com/geocode/v1/json";
const DEFAULT_MAX_CALLS: usize = 2_500;
const DEFAULT_MIN_INTERVAL_MS: u64 = 250;
const DEFAULT_CHUNK_SIZE: usize = 3;
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.4;
const DEFAULT_STREET_LEVEL_PRIORITY_FLOOR: u8 = 6;
const DEFAULT_DOMESTIC_COUNTRY: &str = "India";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Clone, Debug)]
pub struct GeocoderConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub max_calls: usize,
    pub min_interval_ms: u64,
    pub chunk_size: usize,
    pub confidence_threshold: f64,
    pub street_level_priority_floor: u8,
    pub domestic_country: String,
    pub request_timeout_ms: u64,
    pub telemetry_enabled: bool,
    pub telemetry_batch_size: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicGeocoderConfig {
    pub base_url: String,
    pub max_calls: usize,
    pub min_interval_ms: u64,
    pub chunk_size: usize,
    pub confidence_threshold: f64,
    pub street_level_priority_floor: u8,
    pub domestic_country: String,
    pub request_timeout_ms: u64,
    pub telemetry_enabled: bool,
    pub telemetry_batch_size: usize,
    pub has_api_key: bool,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_calls: DEFAULT_MAX_CALLS,
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            street_level_priority_floor: DEFAULT_STREET_LEVEL_PRIORITY_FLOOR,
            domestic_country: DEFAULT_DOMESTIC_COUNTRY.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            telemetry_enabled: true,
            telemetry_batch_size: 25,
        }
    }
}

impl GeocoderConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            api_key: env::var("GEOCODER_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| SecretString::new(v.into())),
            base_url: env::var("GEOCODER_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_calls: parse_usize("GEOCODER_MAX_CALLS", DEFAULT_MAX_CALLS),
            min_interval_ms: parse_u64("GEOCODER_MIN_INTERVAL_MS", DEFAULT_MIN_INTERVAL_MS),
            chunk_size: parse_usize("GEOCODER_CHUNK_SIZE", DEFAULT_CHUNK_SIZE).max(1),
            confidence_threshold: parse_f64(
                "GEOCODER_CONFIDENCE_THRESHOLD",
                DEFAULT_CONFIDENCE_THRESHOLD,
            )
            .clamp(0.0, 1.0),
            street_level_priority_floor: parse_u8(
                "GEOCODER_STREET_LEVEL_PRIORITY_FLOOR",
                DEFAULT_STREET_LEVEL_PRIORITY_FLOOR,
            ),
            domestic_country: env::var("GEOCODER_DOMESTIC_COUNTRY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DOMESTIC_COUNTRY.to_string()),
            request_timeout_ms: parse_u64(
                "GEOCODER_REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT_MS,
            ),
            telemetry_enabled: parse_bool("TELEMETRY_ENABLED", true),
            telemetry_batch_size: parse_usize("TELEMETRY_BATCH_SIZE", 25).max(1),
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn public_profile(&self) -> PublicGeocoderConfig {
        PublicGeocoderConfig {
            base_url: self.base_url.clone(),
            max_calls: self.max_calls,
            min_interval_ms: self.min_interval_ms,
            chunk_size: self.chunk_size,
            confidence_threshold: self.confidence_threshold,
            street_level_priority_floor: self.street_level_priority_floor,
            domestic_country: self.domestic_country.clone(),
            request_timeout_ms: self.request_timeout_ms,
            telemetry_enabled: self.telemetry_enabled,
            telemetry_batch_size: self.telemetry_batch_size,
            has_api_key: self.api_key.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u8(key: &str, default: u8) -> u8 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u8>().ok())
        .unwrap_or(default)
}

fn parse_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}
