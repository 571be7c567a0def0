use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::address::AddressInput;

const MIN_QUERY_CHARS: usize = 3;
const LANDMARK_MARKERS: &[&str] = &["next to", "opposite", "opp", "near", "behind", "beside"];
const LANDMARK_SEPARATORS: &[char] = &[',', ';', '|', '\n'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    FullAddress,
    StreetPin,
    StreetCityCountry,
    PinCityState,
    PostalCountry,
    CityCountry,
    Landmark,
}

impl StrategyKind {
    pub fn priority(&self) -> u8 {
        match self {
            StrategyKind::FullAddress => 10,
            StrategyKind::StreetPin => 9,
            StrategyKind::StreetCityCountry | StrategyKind::PinCityState => 8,
            StrategyKind::PostalCountry => 7,
            StrategyKind::CityCountry => 6,
            StrategyKind::Landmark => 5,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            StrategyKind::FullAddress => "full_address",
            StrategyKind::StreetPin => "street_pin",
            StrategyKind::StreetCityCountry => "street_city_country",
            StrategyKind::PinCityState => "pin_city_state",
            StrategyKind::PostalCountry => "postal_country",
            StrategyKind::CityCountry => "city_country",
            StrategyKind::Landmark => "landmark",
        }
    }

    /// Strategies anchored on a postal or PIN code.
    pub fn is_postal(&self) -> bool {
        matches!(
            self,
            StrategyKind::StreetPin | StrategyKind::PinCityState | StrategyKind::PostalCountry
        )
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Strategy {
    pub address: String,
    pub kind: StrategyKind,
    pub priority: u8,
}

impl Strategy {
    fn new(kind: StrategyKind, parts: &[Option<&str>]) -> Self {
        let address = parts
            .iter()
            .flatten()
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            address,
            kind,
            priority: kind.priority(),
        }
    }
}

/// Builds the candidate queries for one contact, best first.
///
/// Domestic-only strategies (PIN code and landmark variants) are added when
/// the contact's country matches `domestic_country`. The output never holds
/// two queries that normalize to the same string.
pub fn generate_strategies(input: &AddressInput, domestic_country: &str) -> Vec<Strategy> {
    let street = input.street();
    let city = input.city();
    let state = input.state();
    let country = input.country();
    let postal = input.postal();

    let mut strategies = Vec::new();

    if let (Some(_), Some(_), Some(_), Some(_), Some(_)) = (street, city, state, postal, country) {
        strategies.push(Strategy::new(
            StrategyKind::FullAddress,
            &[street, city, state, postal, country],
        ));
    }
    if street.is_some() && city.is_some() && country.is_some() {
        strategies.push(Strategy::new(
            StrategyKind::StreetCityCountry,
            &[street, city, country],
        ));
    }
    if postal.is_some() && country.is_some() {
        strategies.push(Strategy::new(
            StrategyKind::PostalCountry,
            &[postal, country],
        ));
    }
    if city.is_some() && country.is_some() {
        strategies.push(Strategy::new(StrategyKind::CityCountry, &[city, country]));
    }

    let is_domestic = country
        .map(|value| value.eq_ignore_ascii_case(domestic_country.trim()))
        .unwrap_or(false);
    if is_domestic {
        if street.is_some() && postal.is_some() {
            strategies.push(Strategy::new(StrategyKind::StreetPin, &[street, postal]));
        }
        if postal.is_some() && city.is_some() {
            strategies.push(Strategy::new(
                StrategyKind::PinCityState,
                &[postal, city, state],
            ));
        }
        if let (Some(landmark), Some(_)) = (street.and_then(extract_landmark), city) {
            strategies.push(Strategy::new(
                StrategyKind::Landmark,
                &[Some(landmark), city],
            ));
        }
    }

    strategies.retain(|strategy| strategy.address.chars().count() >= MIN_QUERY_CHARS);
    // stable: equal priorities keep generation order
    strategies.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut seen = HashSet::new();
    strategies.retain(|strategy| seen.insert(normalize_query(&strategy.address)));
    strategies
}

/// Cache key for a query string.
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Text following a landmark marker word ("near", "opp.", ...) up to the
/// next separator.
pub fn extract_landmark(street: &str) -> Option<&str> {
    let lowered = street.to_ascii_lowercase();
    let (_, end) = LANDMARK_MARKERS
        .iter()
        .filter_map(|marker| find_word(&lowered, marker).map(|start| (start, start + marker.len())))
        .min_by_key(|(start, _)| *start)?;

    let rest = street[end..]
        .trim_start_matches(|c: char| c == '.' || c == ':' || c.is_whitespace());
    let landmark = rest
        .split(LANDMARK_SEPARATORS)
        .next()
        .map(str::trim)
        .unwrap_or_default();
    (!landmark.is_empty()).then_some(landmark)
}

fn find_word(haystack: &str, word: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    haystack.match_indices(word).map(|(idx, _)| idx).find(|&idx| {
        let before_ok = idx == 0 || !bytes[idx - 1].is_ascii_alphanumeric();
        let after = idx + word.len();
        let after_ok = after >= bytes.len() || !bytes[after].is_ascii_alphanumeric();
        before_ok && after_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> AddressInput {
        AddressInput {
            id: Some("c1".into()),
            name: "Test".into(),
            ..Default::default()
        }
    }

    #[test]
    fn city_and_country_only_yields_single_fallback() {
        let input = AddressInput {
            city: Some("Paris".into()),
            country: Some("France".into()),
            ..contact()
        };
        let strategies = generate_strategies(&input, "India");
        assert_eq!(
            strategies,
            vec![Strategy {
                address: "Paris, France".into(),
                kind: StrategyKind::CityCountry,
                priority: 6,
            }]
        );
    }

    #[test]
    fn full_record_orders_by_descending_priority() {
        let input = AddressInput {
            street: Some("12 MG Road".into()),
            city: Some("Bengaluru".into()),
            state: Some("Karnataka".into()),
            country: Some("india".into()),
            pin_code: Some("560001".into()),
            ..contact()
        };
        let strategies = generate_strategies(&input, "India");
        let kinds: Vec<_> = strategies.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StrategyKind::FullAddress,
                StrategyKind::StreetPin,
                StrategyKind::StreetCityCountry,
                StrategyKind::PinCityState,
                StrategyKind::PostalCountry,
                StrategyKind::CityCountry,
            ]
        );
        assert!(strategies
            .windows(2)
            .all(|pair| pair[0].priority >= pair[1].priority));
        assert_eq!(
            strategies[0].address,
            "12 MG Road, Bengaluru, Karnataka, 560001, india"
        );
        assert_eq!(strategies[3].address, "560001, Bengaluru, Karnataka");
    }

    #[test]
    fn landmark_strategy_for_domestic_street() {
        let input = AddressInput {
            street: Some("Near Central Park".into()),
            city: Some("Mumbai".into()),
            country: Some("India".into()),
            ..contact()
        };
        let strategies = generate_strategies(&input, "India");
        assert!(strategies.contains(&Strategy {
            address: "Central Park, Mumbai".into(),
            kind: StrategyKind::Landmark,
            priority: 5,
        }));
        assert_eq!(strategies.last().unwrap().kind, StrategyKind::Landmark);
    }

    #[test]
    fn no_domestic_strategies_abroad() {
        let input = AddressInput {
            street: Some("Near the station".into()),
            city: Some("Lyon".into()),
            country: Some("France".into()),
            postal_code: Some("69001".into()),
            ..contact()
        };
        let strategies = generate_strategies(&input, "India");
        assert!(strategies
            .iter()
            .all(|s| !matches!(s.kind, StrategyKind::Landmark | StrategyKind::StreetPin)));
    }

    #[test]
    fn short_queries_are_dropped() {
        let input = AddressInput {
            city: Some("X".into()),
            country: Some("Y".into()),
            postal_code: Some("1".into()),
            ..contact()
        };
        // "X, Y" survives, "1, Y" survives; nothing shorter than 3 chars
        let strategies = generate_strategies(&input, "India");
        assert!(strategies.iter().all(|s| s.address.chars().count() >= 3));

        let input = AddressInput {
            city: Some("Paris".into()),
            ..contact()
        };
        assert!(generate_strategies(&input, "India").is_empty());
    }

    #[test]
    fn extracts_landmark_up_to_separator() {
        assert_eq!(
            extract_landmark("Shop 4, opp. City Mall; Sector 5"),
            Some("City Mall")
        );
        assert_eq!(extract_landmark("Behind Ganesh Temple"), Some("Ganesh Temple"));
        assert_eq!(extract_landmark("Nearby Lane 4"), None);
        assert_eq!(extract_landmark("14 Park Street"), None);
        assert_eq!(extract_landmark("next to"), None);
    }

    #[test]
    fn normalizes_queries_for_cache_keys() {
        assert_eq!(normalize_query("  Paris, France "), "paris, france");
    }
}
