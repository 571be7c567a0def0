use std::cmp::Ordering;

use crate::pipeline::ResolvedContact;

const POSTAL_BONUS: f64 = 0.2;

/// Display score: confidence, plus a bonus for postal/PIN anchored matches.
pub fn composite_score(contact: &ResolvedContact) -> f64 {
    let bonus = if contact.strategy_used.kind.is_postal() {
        POSTAL_BONUS
    } else {
        0.0
    };
    contact.confidence + bonus
}

/// Orders results best first. Ties keep their aggregation order.
pub fn rank_results(results: &mut [ResolvedContact]) {
    results.sort_by(|a, b| {
        composite_score(b)
            .partial_cmp(&composite_score(a))
            .unwrap_or(Ordering::Equal)
    });
}
