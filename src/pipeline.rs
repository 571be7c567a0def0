use serde::Serialize;
use tracing::{debug, trace};

use crate::address::AddressInput;
use crate::client::{GeocodeClient, Lookup};
use crate::strategy::{generate_strategies, StrategyKind};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyUsed {
    pub index: usize,
    pub kind: StrategyKind,
    pub priority: u8,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedContact {
    pub contact_id: String,
    pub name: String,
    pub category: Option<String>,
    pub position: Position,
    pub label: String,
    pub source: AddressInput,
    pub strategy_used: StrategyUsed,
    pub confidence: f64,
    pub precision_type: String,
    pub original_address: String,
}

/// Policy knobs for accepting a geocode.
#[derive(Debug, Clone)]
pub struct ResolutionPolicy {
    pub confidence_threshold: f64,
    pub street_level_priority_floor: u8,
    pub domestic_country: String,
}

impl ResolutionPolicy {
    /// Street-level strategies must clear the confidence threshold; coarser
    /// ones are taken as they come.
    pub fn accepts(&self, priority: u8, confidence: f64) -> bool {
        priority < self.street_level_priority_floor || confidence >= self.confidence_threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Pending,
    Trying,
    Accepted,
    Exhausted,
}

/// What happened while resolving one contact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub cache_hits: usize,
    pub network_calls: usize,
    pub low_confidence_rejections: usize,
    pub budget_exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub resolved: Option<ResolvedContact>,
    pub stats: PipelineStats,
}

/// Tries each strategy for `contact` in priority order, one at a time, until
/// a result passes the policy or the strategies run out.
pub async fn resolve_contact(
    client: &GeocodeClient<'_>,
    policy: &ResolutionPolicy,
    contact: &AddressInput,
) -> PipelineOutcome {
    let contact_id = contact.contact_id().unwrap_or_default();
    let strategies = generate_strategies(contact, &policy.domestic_country);
    let mut stats = PipelineStats::default();
    let mut state = PipelineState::Pending;
    trace!(contact_id, strategies = strategies.len(), ?state, "resolving contact");

    for (index, strategy) in strategies.iter().enumerate() {
        state = PipelineState::Trying;
        trace!(
            contact_id,
            ?state,
            index,
            query = %strategy.address,
            kind = %strategy.kind,
            "trying strategy"
        );

        let lookup = client.lookup(&strategy.address).await;
        match &lookup {
            Lookup::Resolved { cached: true, .. } | Lookup::Failed { cached: true, .. } => {
                stats.cache_hits += 1
            }
            Lookup::Resolved { cached: false, .. } | Lookup::Failed { cached: false, .. } => {
                stats.network_calls += 1
            }
            Lookup::BudgetExhausted => stats.budget_exhausted = true,
        }

        let Some(result) = lookup.into_result() else {
            continue;
        };
        if !policy.accepts(strategy.priority, result.confidence) {
            debug!(
                contact_id,
                kind = %strategy.kind,
                confidence = result.confidence,
                "rejecting low-confidence street-level match"
            );
            stats.low_confidence_rejections += 1;
            continue;
        }

        state = PipelineState::Accepted;
        trace!(contact_id, ?state, index, "contact resolved");
        let resolved = ResolvedContact {
            contact_id: contact_id.to_string(),
            name: contact.name.clone(),
            category: contact.category.clone(),
            position: Position {
                lat: result.lat,
                lng: result.lng,
            },
            label: result.label,
            source: contact.clone(),
            strategy_used: StrategyUsed {
                index,
                kind: strategy.kind,
                priority: strategy.priority,
                query: strategy.address.clone(),
            },
            confidence: result.confidence,
            precision_type: result.precision_type,
            original_address: contact.original_address(),
        };
        return PipelineOutcome {
            resolved: Some(resolved),
            stats,
        };
    }

    state = PipelineState::Exhausted;
    debug!(contact_id, ?state, "no acceptable geocode for contact");
    PipelineOutcome {
        resolved: None,
        stats,
    }
}
