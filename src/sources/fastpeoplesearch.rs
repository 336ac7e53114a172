//! FastPeopleSearch adapter.

use url::Url;

use super::{CardLayout, ParseError, SearchSource, Source, SourceResult};
use crate::fetch::RawResponse;
use crate::query::SearchQuery;

const BASE_URL: &str = "https://www.fastpeoplesearch.com/address/";

const LAYOUT: CardLayout = CardLayout {
    source: Source::FastPeopleSearch,
    card_selectors: &["div.people-list div.card", "div.card", "div.result"],
    name_selector: "a[href*=\"/person\"]",
    location_selector: "div[class*=\"address\"]",
};

#[derive(Debug, Clone, Copy, Default)]
pub struct FastPeopleSearch;

impl SearchSource for FastPeopleSearch {
    fn source(&self) -> Source {
        Source::FastPeopleSearch
    }

    fn search_url(&self, query: &SearchQuery) -> Result<Url, url::ParseError> {
        Url::parse(BASE_URL)?.join(&query.slug())
    }

    fn ready_selector(&self) -> &'static str {
        "div.card, div.result, #site-content"
    }

    fn parse(&self, response: &RawResponse) -> Result<SourceResult, ParseError> {
        LAYOUT.extract(response)
    }
}
