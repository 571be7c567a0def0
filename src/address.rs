use serde::{Deserialize, Serialize};

/// A contact record as supplied by the caller. Every address field is
/// free text and may be missing or blank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddressInput {
    pub id: Option<String>,
    pub name: String,
    pub category: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub pin_code: Option<String>,
    pub zip_code: Option<String>,
}

impl AddressInput {
    pub fn contact_id(&self) -> Option<&str> {
        non_blank(&self.id)
    }

    pub fn street(&self) -> Option<&str> {
        non_blank(&self.street)
    }

    pub fn city(&self) -> Option<&str> {
        non_blank(&self.city)
    }

    pub fn state(&self) -> Option<&str> {
        non_blank(&self.state)
    }

    pub fn country(&self) -> Option<&str> {
        non_blank(&self.country)
    }

    /// First non-blank postal code variant.
    pub fn postal(&self) -> Option<&str> {
        non_blank(&self.postal_code)
            .or_else(|| non_blank(&self.pin_code))
            .or_else(|| non_blank(&self.zip_code))
    }

    pub fn has_any_address_field(&self) -> bool {
        self.street().is_some()
            || self.city().is_some()
            || self.state().is_some()
            || self.country().is_some()
            || self.postal().is_some()
    }

    /// Contacts that fail this check never reach the resolution pipeline.
    pub fn is_geocodable(&self) -> bool {
        self.contact_id().is_some() && self.city().is_some() && self.has_any_address_field()
    }

    /// The raw fields joined the way a person would write them.
    pub fn original_address(&self) -> String {
        [
            self.street(),
            self.city(),
            self.state(),
            self.postal(),
            self.country(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ")
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
}
