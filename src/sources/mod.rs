//! People-search sources.
//!
//! Every supported website is a variant of [`Source`]. Each variant maps to a
//! [`SearchSource`] adapter that knows how to build the search URL for a
//! [`SearchQuery`] and how to extract [`ContactRecord`]s from the returned
//! page. Adding a source means adding a variant and an adapter; the scheduler
//! and aggregator never change.

pub mod fastpeoplesearch;
pub mod phones;
pub mod truepeoplesearch;

use std::fmt;
use std::str::FromStr;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::fetch::{InteractionStep, RawResponse};
use crate::query::SearchQuery;

pub use fastpeoplesearch::FastPeopleSearch;
pub use phones::{dedup_phones, extract_phones, normalize_phone};
pub use truepeoplesearch::TruePeopleSearch;

/// Enumeration of supported sources, declared in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Source {
    TruePeopleSearch,
    FastPeopleSearch,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::TruePeopleSearch, Source::FastPeopleSearch];

    pub fn name(&self) -> &'static str {
        match self {
            Source::TruePeopleSearch => "TruePeopleSearch",
            Source::FastPeopleSearch => "FastPeopleSearch",
        }
    }

    pub fn adapter(&self) -> &'static dyn SearchSource {
        match self {
            Source::TruePeopleSearch => &TruePeopleSearch,
            Source::FastPeopleSearch => &FastPeopleSearch,
        }
    }

    pub fn search_url(&self, query: &SearchQuery) -> Result<Url, url::ParseError> {
        self.adapter().search_url(query)
    }

    pub fn parse(&self, response: &RawResponse) -> Result<SourceResult, ParseError> {
        self.adapter().parse(response)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let compact: String = value
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match compact.as_str() {
            "truepeoplesearch" | "tps" => Ok(Source::TruePeopleSearch),
            "fastpeoplesearch" | "fps" => Ok(Source::FastPeopleSearch),
            _ => Err(format!("unknown source `{value}`")),
        }
    }
}

/// Fetch/parse capability pair implemented by every source adapter.
pub trait SearchSource: Send + Sync {
    fn source(&self) -> Source;

    fn search_url(&self, query: &SearchQuery) -> Result<Url, url::ParseError>;

    /// Selector whose presence signals that the results page finished
    /// rendering (used by the browser backend).
    fn ready_selector(&self) -> &'static str {
        "body"
    }

    /// Scripted steps run in a browser before the page is captured.
    fn interaction_steps(&self) -> Vec<InteractionStep> {
        vec![InteractionStep::Scroll { y: 1200 }]
    }

    /// Extract records from an unblocked response. An empty result is a
    /// valid outcome; `ParseError` is reserved for unexpected structure.
    fn parse(&self, response: &RawResponse) -> Result<SourceResult, ParseError>;
}

/// Canonical output unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactRecord {
    name: String,
    phones: Vec<String>,
    city_state: String,
    source: Source,
}

impl ContactRecord {
    /// Phones are normalized and deduplicated here so every record upholds
    /// the no-duplicate invariant regardless of where it was built.
    pub fn new<I, S>(
        name: impl Into<String>,
        phones: I,
        city_state: impl Into<String>,
        source: Source,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            phones: dedup_phones(phones),
            city_state: city_state.into(),
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phones(&self) -> &[String] {
        &self.phones
    }

    pub fn city_state(&self) -> &str {
        &self.city_state
    }

    pub fn source(&self) -> Source {
        self.source
    }
}

/// Records produced by one source for one query; may be empty.
pub type SourceResult = Vec<ContactRecord>;

/// Raised when a page does not have the structure a parser expects.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{site} returned a non-HTML document")]
    NotHtml { site: Source },
    #[error("{site} markup changed: {detail}")]
    UnexpectedStructure { site: Source, detail: String },
    #[error("invalid selector `{0}`")]
    Selector(String),
}

/// Markup description of a card-based results page.
pub(crate) struct CardLayout {
    pub source: Source,
    pub card_selectors: &'static [&'static str],
    pub name_selector: &'static str,
    pub location_selector: &'static str,
}

impl CardLayout {
    /// Shared extraction routine for card-based results pages: one card per
    /// person, a link to the person's detail page holding the name, an
    /// address block, and phone numbers somewhere in the card text.
    pub(crate) fn extract(&self, response: &RawResponse) -> Result<SourceResult, ParseError> {
        let body = response.body.trim_start();
        if body.starts_with('{') || body.starts_with('[') {
            return Err(ParseError::NotHtml { site: self.source });
        }

        let document = Html::parse_document(&response.body);
        let name_selector = selector(self.name_selector)?;
        let location_selector = selector(self.location_selector)?;

        let mut cards: Vec<ElementRef<'_>> = Vec::new();
        for raw in self.card_selectors {
            let card_selector = selector(raw)?;
            cards = document.select(&card_selector).collect();
            if !cards.is_empty() {
                break;
            }
        }

        log::debug!("{}: found {} cards", self.source, cards.len());

        let mut records = Vec::new();
        for card in &cards {
            let Some(name_el) = card.select(&name_selector).next() else {
                continue;
            };
            let name = element_text(&name_el);
            let city_state = card
                .select(&location_selector)
                .next()
                .map(|el| element_text(&el))
                .unwrap_or_default();
            let phones = extract_phones(&card.text().collect::<Vec<_>>().join(" "));

            if !name.is_empty() || !phones.is_empty() {
                records.push(ContactRecord::new(name, phones, city_state, self.source));
            }
        }

        if !cards.is_empty() && records.is_empty() {
            return Err(ParseError::UnexpectedStructure {
                site: self.source,
                detail: format!("{} cards without a `{}` link", cards.len(), self.name_selector),
            });
        }

        Ok(records)
    }
}

fn selector(raw: &str) -> Result<Selector, ParseError> {
    Selector::parse(raw).map_err(|_| ParseError::Selector(raw.to_string()))
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_names_round_trip_through_from_str() {
        for source in Source::ALL {
            assert_eq!(source.name().parse::<Source>().unwrap(), source);
        }
        assert_eq!("fps".parse::<Source>().unwrap(), Source::FastPeopleSearch);
        assert!("whitepages".parse::<Source>().is_err());
    }

    #[test]
    fn record_serializes_in_output_shape() {
        let record = ContactRecord::new(
            "John D Smith",
            ["(260) 555-1234", "260-555-1234"],
            "Portland, IN",
            Source::TruePeopleSearch,
        );
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"name":"John D Smith","phones":["+1 (260) 555-1234"],"city_state":"Portland, IN","source":"TruePeopleSearch"}"#
        );
    }
}
