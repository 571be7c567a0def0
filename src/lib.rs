mod address;
mod batch;
mod client;
mod config;
mod errors;
mod pipeline;
mod provider;
mod ranking;
mod session;
mod strategy;
mod telemetry;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use address::AddressInput;
pub use batch::{
    BatchOutcome, BatchProgress, BatchSummary, GeocodeBatch, ProgressObserver, ProgressStream,
};
pub use client::{GeocodeClient, Lookup};
pub use config::{GeocoderConfig, PublicGeocoderConfig};
pub use errors::{AppError, AppResult};
pub use pipeline::{
    resolve_contact, PipelineOutcome, PipelineStats, Position, ResolutionPolicy,
    ResolvedContact, StrategyUsed,
};
pub use provider::{
    normalize_confidence, GeocodeProvider, GeocodeResult, HttpGeocodeProvider, LookupFailure,
};
pub use ranking::{composite_score, rank_results};
pub use session::{
    CachedOutcome, CallBudget, QueryGuard, RateLimiter, ResolutionCache, ResolverSession,
};
pub use strategy::{extract_landmark, generate_strategies, normalize_query, Strategy, StrategyKind};
pub use telemetry::{TelemetryClient, TelemetryEvent};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,contact_geocoder=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
