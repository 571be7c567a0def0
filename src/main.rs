use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use futures_util::StreamExt;
use tracing::{info, warn};

use contact_geocoder::{init_tracing, AddressInput, GeocodeBatch, GeocoderConfig, TelemetryClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let Some(input) = std::env::args_os().nth(1).map(PathBuf::from) else {
        bail!("usage: contact-geocoder <contacts.json>");
    };
    let raw = std::fs::read_to_string(&input)
        .with_context(|| format!("reading {}", input.display()))?;
    let contacts: Vec<AddressInput> =
        serde_json::from_str(&raw).context("contacts file must be a JSON array of contacts")?;

    let config = GeocoderConfig::from_env();
    info!(config = ?config.public_profile(), "loaded geocoder configuration");
    let mut batch = GeocodeBatch::from_config(config.clone())?;
    if let Some(data_dir) = std::env::var_os("GEOCODER_DATA_DIR") {
        match TelemetryClient::new(PathBuf::from(data_dir), &config) {
            Ok(telemetry) => batch = batch.with_telemetry(telemetry),
            Err(err) => warn!(?err, "telemetry disabled; data dir unavailable"),
        }
    }

    let (handle, mut progress) = Arc::new(batch).spawn(contacts);
    while let Some(event) = progress.next().await {
        info!(
            processed = event.processed,
            total = event.total,
            "geocoding {}%",
            event.percentage
        );
    }
    let outcome = handle.await.context("geocode batch task failed")?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
