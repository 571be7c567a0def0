use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::join_all;
use futures_util::Stream;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::address::AddressInput;
use crate::client::GeocodeClient;
use crate::config::GeocoderConfig;
use crate::errors::{AppError, AppResult};
use crate::pipeline::{resolve_contact, ResolutionPolicy, ResolvedContact};
use crate::provider::{GeocodeProvider, HttpGeocodeProvider};
use crate::ranking::rank_results;
use crate::session::ResolverSession;
use crate::telemetry::TelemetryClient;

pub type ProgressObserver = Arc<dyn Fn(BatchProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    pub percentage: u8,
}

impl BatchProgress {
    fn new(processed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            (processed.min(total) * 100 / total) as u8
        };
        Self {
            processed,
            total,
            percentage,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_input: usize,
    pub eligible: usize,
    pub skipped_invalid: usize,
    pub skipped_budget: usize,
    pub attempted: usize,
    pub total_mapped: usize,
    pub unresolved: usize,
    /// Percentage of attempted contacts that were mapped.
    pub success_rate: f64,
    pub api_calls_used: usize,
    pub api_calls_remaining: usize,
    pub cache_hits: usize,
    pub network_calls: usize,
    pub low_confidence_rejections: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<ResolvedContact>,
    pub summary: BatchSummary,
}

/// Progress events of a spawned run. Yields one event per chunk and ends
/// after the run finishes.
pub struct ProgressStream {
    rx: mpsc::Receiver<BatchProgress>,
}

impl ProgressStream {
    pub async fn recv(&mut self) -> Option<BatchProgress> {
        self.rx.recv().await
    }
}

impl Stream for ProgressStream {
    type Item = BatchProgress;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Contacts that survive the pre-filter and the budget cut, in input order.
struct BatchPlan<'a> {
    attempted: Vec<&'a AddressInput>,
    total_input: usize,
    eligible: usize,
}

impl BatchPlan<'_> {
    fn chunk_count(&self, chunk_size: usize) -> usize {
        self.attempted.len().div_ceil(chunk_size)
    }
}

pub struct GeocodeBatch {
    provider: Arc<dyn GeocodeProvider>,
    config: GeocoderConfig,
    policy: ResolutionPolicy,
    telemetry: Option<TelemetryClient>,
}

impl GeocodeBatch {
    pub fn new(provider: Arc<dyn GeocodeProvider>, config: GeocoderConfig) -> AppResult<Self> {
        if config.chunk_size == 0 {
            return Err(AppError::Config("chunk size must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&config.confidence_threshold) {
            return Err(AppError::Config(format!(
                "confidence threshold {} is outside [0, 1]",
                config.confidence_threshold
            )));
        }
        let policy = ResolutionPolicy {
            confidence_threshold: config.confidence_threshold,
            street_level_priority_floor: config.street_level_priority_floor,
            domestic_country: config.domestic_country.clone(),
        };
        Ok(Self {
            provider,
            config,
            policy,
            telemetry: None,
        })
    }

    /// Batch backed by the HTTP provider described in `config`.
    pub fn from_config(config: GeocoderConfig) -> AppResult<Self> {
        let provider = HttpGeocodeProvider::new(&config)?;
        Self::new(Arc::new(provider), config)
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryClient) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn config(&self) -> &GeocoderConfig {
        &self.config
    }

    pub fn new_session(&self) -> ResolverSession {
        ResolverSession::new(self.config.max_calls, self.config.min_interval())
    }

    /// Resolves `contacts` in a fresh session.
    pub async fn run(
        &self,
        contacts: &[AddressInput],
        observer: Option<ProgressObserver>,
    ) -> BatchOutcome {
        let session = self.new_session();
        self.run_in_session(&session, contacts, observer).await
    }

    /// Runs the batch on a background task and hands back its progress.
    pub fn spawn(
        self: Arc<Self>,
        contacts: Vec<AddressInput>,
    ) -> (JoinHandle<BatchOutcome>, ProgressStream) {
        let session = self.new_session();
        let capacity = self
            .plan(&contacts, session.budget().remaining())
            .chunk_count(self.config.chunk_size)
            .max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let observer: ProgressObserver = Arc::new(move |progress| {
            if let Err(err) = tx.try_send(progress) {
                debug!(%err, "progress event dropped");
            }
        });
        let handle = tokio::spawn(async move {
            self.run_in_session(&session, &contacts, Some(observer))
                .await
        });
        (handle, ProgressStream { rx })
    }

    pub async fn run_in_session(
        &self,
        session: &ResolverSession,
        contacts: &[AddressInput],
        observer: Option<ProgressObserver>,
    ) -> BatchOutcome {
        let plan = self.plan(contacts, session.budget().remaining());
        let total = plan.attempted.len();
        info!(
            total_input = plan.total_input,
            eligible = plan.eligible,
            attempted = total,
            calls_remaining = session.budget().remaining(),
            "starting geocode batch"
        );
        self.record_event(
            "geocode_batch_started",
            json!({
                "total_input": plan.total_input,
                "eligible": plan.eligible,
                "attempted": total,
            }),
        );

        let calls_before = session.budget().used();
        let client = GeocodeClient::new(self.provider.as_ref(), session);
        let mut results = Vec::new();
        let mut seen = HashSet::new();
        let mut summary = BatchSummary {
            total_input: plan.total_input,
            eligible: plan.eligible,
            skipped_invalid: plan.total_input - plan.eligible,
            skipped_budget: plan.eligible - total,
            attempted: total,
            ..BatchSummary::default()
        };

        let mut processed = 0;
        for chunk in plan.attempted.chunks(self.config.chunk_size) {
            let outcomes = join_all(
                chunk
                    .iter()
                    .map(|contact| resolve_contact(&client, &self.policy, contact)),
            )
            .await;

            for outcome in outcomes {
                summary.cache_hits += outcome.stats.cache_hits;
                summary.network_calls += outcome.stats.network_calls;
                summary.low_confidence_rejections += outcome.stats.low_confidence_rejections;
                let Some(resolved) = outcome.resolved else {
                    continue;
                };
                if seen.insert(resolved.contact_id.clone()) {
                    results.push(resolved);
                } else {
                    debug!(
                        contact_id = %resolved.contact_id,
                        "duplicate contact id; keeping first result"
                    );
                }
            }

            processed += chunk.len();
            let progress = BatchProgress::new(processed, total);
            debug!(
                processed,
                total,
                percentage = progress.percentage,
                "geocode batch progress"
            );
            if let Some(callback) = &observer {
                callback(progress);
            }
        }

        rank_results(&mut results);

        summary.total_mapped = results.len();
        summary.unresolved = total - summary.total_mapped.min(total);
        summary.success_rate = if total == 0 {
            0.0
        } else {
            summary.total_mapped as f64 * 100.0 / total as f64
        };
        summary.api_calls_used = session.budget().used() - calls_before;
        summary.api_calls_remaining = session.budget().remaining();

        info!(
            mapped = summary.total_mapped,
            attempted = summary.attempted,
            calls_used = summary.api_calls_used,
            calls_remaining = summary.api_calls_remaining,
            cache_hits = summary.cache_hits,
            "geocode batch finished"
        );
        self.record_event("geocode_batch_completed", json!(summary));
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.flush() {
                warn!(?err, "failed to flush telemetry queue");
            }
        }

        BatchOutcome { results, summary }
    }

    fn plan<'a>(&self, contacts: &'a [AddressInput], remaining_budget: usize) -> BatchPlan<'a> {
        let eligible: Vec<&AddressInput> = contacts
            .iter()
            .filter(|contact| {
                let keep = contact.is_geocodable();
                if !keep {
                    debug!(contact = %contact.name, "skipping contact without id or city");
                }
                keep
            })
            .collect();
        let eligible_count = eligible.len();
        let attempted = eligible
            .into_iter()
            .take(remaining_budget.min(eligible_count))
            .collect();
        BatchPlan {
            attempted,
            total_input: contacts.len(),
            eligible: eligible_count,
        }
    }

    fn record_event(&self, name: &str, payload: serde_json::Value) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        if let Err(err) = telemetry.record(name, payload) {
            warn!(?err, event = name, "failed to record telemetry event");
        }
    }
}
