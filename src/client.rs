use tracing::{debug, trace};

use crate::provider::{GeocodeProvider, GeocodeResult, LookupFailure};
use crate::session::{CachedOutcome, ResolverSession};

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Resolved { result: GeocodeResult, cached: bool },
    Failed { failure: LookupFailure, cached: bool },
    BudgetExhausted,
}

impl Lookup {
    pub fn into_result(self) -> Option<GeocodeResult> {
        match self {
            Lookup::Resolved { result, .. } => Some(result),
            Lookup::Failed { .. } | Lookup::BudgetExhausted => None,
        }
    }

    pub fn is_network_call(&self) -> bool {
        matches!(
            self,
            Lookup::Resolved { cached: false, .. } | Lookup::Failed { cached: false, .. }
        )
    }
}

/// Budget- and cache-gated access to a provider for one session.
pub struct GeocodeClient<'a> {
    provider: &'a dyn GeocodeProvider,
    session: &'a ResolverSession,
}

impl<'a> GeocodeClient<'a> {
    pub fn new(provider: &'a dyn GeocodeProvider, session: &'a ResolverSession) -> Self {
        Self { provider, session }
    }

    pub async fn resolve(&self, query: &str) -> Option<GeocodeResult> {
        self.lookup(query).await.into_result()
    }

    pub async fn lookup(&self, query: &str) -> Lookup {
        let budget = self.session.budget();
        if budget.is_exhausted() {
            trace!(query, "call budget exhausted; skipping lookup");
            return Lookup::BudgetExhausted;
        }

        let _query_guard = self.session.cache().lock_query(query).await;
        // a duplicate may have waited here while the budget ran out
        if budget.is_exhausted() {
            trace!(query, "call budget exhausted while waiting on query");
            return Lookup::BudgetExhausted;
        }
        match self.session.cache().get(query) {
            Some(CachedOutcome::Success(result)) => {
                trace!(query, "geocode cache hit");
                return Lookup::Resolved {
                    result,
                    cached: true,
                };
            }
            Some(CachedOutcome::Failure(failure)) => {
                trace!(query, %failure, "known failing query");
                return Lookup::Failed {
                    failure,
                    cached: true,
                };
            }
            None => {}
        }

        // claimed before awaiting so interleaved tasks cannot overshoot
        if !budget.try_reserve() {
            trace!(query, "call budget claimed by a concurrent lookup");
            return Lookup::BudgetExhausted;
        }
        self.session.rate_limiter().wait().await;

        match self.provider.geocode(query).await {
            Ok(result) => {
                debug!(
                    query,
                    confidence = result.confidence,
                    precision = %result.precision_type,
                    calls_used = budget.used(),
                    "geocode resolved"
                );
                self.session.cache().record_success(query, result.clone());
                Lookup::Resolved {
                    result,
                    cached: false,
                }
            }
            Err(failure) => {
                debug!(query, %failure, calls_used = budget.used(), "geocode failed");
                self.session.cache().record_failure(query, failure.clone());
                Lookup::Failed {
                    failure,
                    cached: false,
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::future::join_all;

    use super::test_support::{result_for, TableProvider};
    use super::*;

    fn session(max_calls: usize) -> ResolverSession {
        ResolverSession::new(max_calls, Duration::from_millis(250))
    }

    #[tokio::test(start_paused = true)]
    async fn second_lookup_is_served_from_cache() {
        let provider = TableProvider::default().with("Paris, France", 0.9);
        let session = session(10);
        let client = GeocodeClient::new(&provider, &session);

        let first = client.lookup("Paris, France").await;
        assert_eq!(
            first,
            Lookup::Resolved {
                result: result_for("Paris, France", 0.9),
                cached: false
            }
        );
        let second = client.lookup("  paris, france").await;
        assert_eq!(
            second,
            Lookup::Resolved {
                result: result_for("Paris, France", 0.9),
                cached: true
            }
        );
        assert_eq!(session.budget().used(), 1);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(session.cache().success_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_cached_and_cost_one_call() {
        let provider = TableProvider::default().failing("Nowhere", LookupFailure::Status(503));
        let session = session(10);
        let client = GeocodeClient::new(&provider, &session);

        assert!(client.resolve("Nowhere").await.is_none());
        assert!(client.resolve("nowhere").await.is_none());
        assert!(client.resolve("Atlantis").await.is_none());
        assert_eq!(session.budget().used(), 2);
        assert_eq!(provider.call_count(), 2);
        assert_eq!(session.cache().failure_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_short_circuits_even_for_cached_queries() {
        let provider = TableProvider::default().with("Paris, France", 0.9);
        let session = session(1);
        let client = GeocodeClient::new(&provider, &session);

        assert!(client.resolve("Paris, France").await.is_some());
        assert_eq!(client.lookup("Paris, France").await, Lookup::BudgetExhausted);
        assert_eq!(client.lookup("Lyon, France").await, Lookup::BudgetExhausted);
        assert_eq!(session.cache().failure_count(), 0);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_duplicates_share_one_call() {
        let provider = TableProvider::default().with("Paris, France", 0.9);
        let session = session(10);
        let client = GeocodeClient::new(&provider, &session);

        let outcomes = join_all([
            client.lookup("Paris, France"),
            client.lookup("PARIS, FRANCE"),
            client.lookup("paris, france "),
        ])
        .await;

        assert_eq!(provider.call_count(), 1);
        assert_eq!(session.budget().used(), 1);
        assert_eq!(outcomes.iter().filter(|o| o.is_network_call()).count(), 1);
        assert!(outcomes.into_iter().all(|o| o.into_result().is_some()));
        assert_eq!(session.cache().in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_duplicate_sees_exhausted_budget() {
        let provider = TableProvider::default().with("Paris, France", 0.9);
        let session = session(1);
        let client = GeocodeClient::new(&provider, &session);

        let outcomes = join_all([
            client.lookup("Paris, France"),
            client.lookup("paris, france"),
        ])
        .await;

        assert!(matches!(outcomes[0], Lookup::Resolved { cached: false, .. }));
        assert_eq!(outcomes[1], Lookup::BudgetExhausted);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(session.budget().used(), 1);
        assert_eq!(session.cache().in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_lookups_respect_the_ceiling() {
        let provider = TableProvider::default();
        let session = session(3);
        let client = GeocodeClient::new(&provider, &session);

        let queries: Vec<String> = (0..8).map(|i| format!("Town {i}, Nowhere")).collect();
        let outcomes = join_all(queries.iter().map(|q| client.lookup(q))).await;

        assert_eq!(session.budget().used(), 3);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, Lookup::BudgetExhausted))
                .count(),
            5
        );
    }
}
