//! Address normalization.
//!
//! Turns a free-text property address (or a `{Address, City, StateZip}` CSV
//! row) into an immutable [`SearchQuery`] whose components can be formatted
//! into each source's search key.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

static ZIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{5}(?:-\d{4})?$").expect("zip regex"));

const STATE_CODES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FL", "GA", "HI", "ID", "IL", "IN",
    "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH",
    "NJ", "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VT", "VA", "WA", "WV", "WI", "WY", "PR",
];

/// Raised when an address cannot be split into a street plus a
/// city/state-or-zip component. Fatal for one row, never for a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid address `{address}`: {reason}")]
pub struct InvalidAddressError {
    pub address: String,
    pub reason: &'static str,
}

impl InvalidAddressError {
    fn new(address: &str, reason: &'static str) -> Self {
        Self {
            address: address.to_string(),
            reason,
        }
    }
}

/// Canonical pieces of a US property address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct AddressComponents {
    pub street: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

impl AddressComponents {
    /// `"Portland, IN 47371"` style locality string, omitting missing parts.
    pub fn city_state_zip(&self) -> String {
        let region = [self.state.as_deref(), self.zip.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        match (self.city.as_deref(), region.is_empty()) {
            (Some(city), false) => format!("{city}, {region}"),
            (Some(city), true) => city.to_string(),
            (None, _) => region,
        }
    }
}

/// One immutable lookup built from an input address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SearchQuery {
    raw_address: String,
    components: AddressComponents,
}

impl SearchQuery {
    /// Parse a free-text address such as `709 W High St, Portland, IN 47371`.
    pub fn parse(raw: &str) -> Result<Self, InvalidAddressError> {
        let raw_address = collapse_whitespace(raw);
        if raw_address.is_empty() {
            return Err(InvalidAddressError::new(raw, "address is empty"));
        }

        let mut segments = raw_address.split(',').map(str::trim);
        if segments.next().is_some_and(str::is_empty) {
            return Err(InvalidAddressError::new(raw, "missing street component"));
        }
        let parts: Vec<&str> = raw_address
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();

        let components = match parts.as_slice() {
            [] => return Err(InvalidAddressError::new(raw, "address is empty")),
            [single] => {
                let (rest, state, zip) = split_region(single);
                if state.is_none() && zip.is_none() {
                    return Err(InvalidAddressError::new(
                        raw,
                        "missing city/state or zip component",
                    ));
                }
                AddressComponents {
                    street: rest,
                    city: None,
                    state,
                    zip,
                }
            }
            [street, locality] => {
                let (city, state, zip) = split_region(locality);
                AddressComponents {
                    street: street.to_string(),
                    city: non_empty(city),
                    state,
                    zip,
                }
            }
            [street, city, region @ ..] => {
                let region = region.join(" ");
                let (leftover, state, zip) = split_region(&region);
                // Anything that is neither a state code nor a zip ("Indiana")
                // is kept verbatim as the state.
                let state = state.or_else(|| non_empty(leftover));
                AddressComponents {
                    street: street.to_string(),
                    city: Some(city.to_string()),
                    state,
                    zip,
                }
            }
        };

        Self::from_components(raw_address, components)
    }

    /// Build a query from the batch CSV columns. `city` and `state_zip` may be
    /// blank, in which case the address column must carry the locality.
    pub fn from_row(
        address: &str,
        city: Option<&str>,
        state_zip: Option<&str>,
    ) -> Result<Self, InvalidAddressError> {
        let city = city.map(str::trim).filter(|value| !value.is_empty());
        let state_zip = state_zip.map(str::trim).filter(|value| !value.is_empty());

        if city.is_none() && state_zip.is_none() {
            return Self::parse(address);
        }

        let joined = [Some(address.trim()), city, state_zip]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ");
        Self::parse(&joined)
    }

    fn from_components(
        raw_address: String,
        mut components: AddressComponents,
    ) -> Result<Self, InvalidAddressError> {
        components.street = collapse_whitespace(&components.street);
        if components.street.is_empty() {
            return Err(InvalidAddressError::new(&raw_address, "missing street component"));
        }
        if components.city.is_none() && components.state.is_none() && components.zip.is_none() {
            return Err(InvalidAddressError::new(
                &raw_address,
                "missing city/state or zip component",
            ));
        }

        Ok(Self {
            raw_address,
            components,
        })
    }

    pub fn raw_address(&self) -> &str {
        &self.raw_address
    }

    pub fn components(&self) -> &AddressComponents {
        &self.components
    }

    pub fn street(&self) -> &str {
        &self.components.street
    }

    /// Stable key used to correlate batch pre-submissions with queries.
    pub fn key(&self) -> String {
        format!(
            "{}|{}",
            self.components.street.to_lowercase(),
            self.components.city_state_zip().to_lowercase()
        )
    }

    /// `application/x-www-form-urlencoded` encoding of the given pairs.
    pub fn encode_pairs<'a, I>(pairs: I) -> String
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish()
    }

    /// Lowercase, hyphen-separated slug of the full address
    /// (`709-w-high-st-portland-in`).
    pub fn slug(&self) -> String {
        let full = format!(
            "{} {}",
            self.components.street,
            self.components.city_state_zip()
        );
        full.to_lowercase()
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric() || ch.is_whitespace() || *ch == '-')
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn is_state_code(token: &str) -> bool {
    let upper = token.to_ascii_uppercase();
    STATE_CODES.contains(&upper.as_str())
}

/// Peel a trailing zip and/or two-letter state off `value`.
/// Returns `(leading text, state, zip)`.
fn split_region(value: &str) -> (String, Option<String>, Option<String>) {
    let mut tokens: Vec<&str> = value.split_whitespace().collect();

    let zip = match tokens.last() {
        Some(last) if ZIP_RE.is_match(last) => tokens.pop().map(str::to_string),
        _ => None,
    };
    let state = match tokens.last() {
        Some(last) if is_state_code(last) => tokens.pop().map(str::to_ascii_uppercase),
        _ => None,
    };

    (tokens.join(" "), state, zip)
}
