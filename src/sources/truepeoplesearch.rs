//! TruePeopleSearch adapter (primary source).

use url::Url;

use super::{CardLayout, ParseError, SearchSource, Source, SourceResult};
use crate::fetch::{InteractionStep, RawResponse};
use crate::query::SearchQuery;

const BASE_URL: &str = "https://www.truepeoplesearch.com/resultaddress";

const LAYOUT: CardLayout = CardLayout {
    source: Source::TruePeopleSearch,
    card_selectors: &["div.card-summary", "div.card", "div.result"],
    name_selector: "a[href*=\"/details\"]",
    location_selector: "div[class*=\"address\"]",
};

#[derive(Debug, Clone, Copy, Default)]
pub struct TruePeopleSearch;

impl SearchSource for TruePeopleSearch {
    fn source(&self) -> Source {
        Source::TruePeopleSearch
    }

    fn search_url(&self, query: &SearchQuery) -> Result<Url, url::ParseError> {
        let locality = query.components().city_state_zip();
        let encoded = SearchQuery::encode_pairs([
            ("streetaddress", query.street()),
            ("citystatezip", locality.as_str()),
        ]);
        Url::parse(&format!("{BASE_URL}?{encoded}"))
    }

    fn ready_selector(&self) -> &'static str {
        "div.card-summary, div.card, div.result, #divNoResults"
    }

    fn interaction_steps(&self) -> Vec<InteractionStep> {
        vec![
            InteractionStep::Scroll { y: 1500 },
            InteractionStep::Wait { millis: 750 },
        ]
    }

    fn parse(&self, response: &RawResponse) -> Result<SourceResult, ParseError> {
        LAYOUT.extract(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> RawResponse {
        RawResponse::html(Url::parse(BASE_URL).unwrap(), body)
    }

    #[test]
    fn builds_address_search_url() {
        let query = SearchQuery::parse("709 W High St, Portland, IN 47371").unwrap();
        let url = TruePeopleSearch.search_url(&query).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.truepeoplesearch.com/resultaddress?streetaddress=709+W+High+St&citystatezip=Portland%2C+IN+47371"
        );
    }

    #[test]
    fn extracts_cards() {
        let html = r#"
            <html><body>
              <div class="card card-summary">
                <a href="/details?id=abc">John  D Smith</a>
                <div class="content-address">Portland, IN</div>
                <span>(260) 555-1234</span><span>260.555.1234</span>
              </div>
              <div class="card card-summary">
                <a href="/details?id=def">Jane Smith</a>
                <div class="content-address">Fort Wayne, IN</div>
              </div>
            </body></html>
        "#;
        let records = TruePeopleSearch.parse(&response(html)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name(), "John D Smith");
        assert_eq!(records[0].phones(), ["+1 (260) 555-1234"]);
        assert_eq!(records[0].city_state(), "Portland, IN");
        assert!(records[1].phones().is_empty());
    }

    #[test]
    fn empty_results_page_is_not_an_error() {
        let html = "<html><body><div id=\"divNoResults\">No records found</div></body></html>";
        assert!(TruePeopleSearch.parse(&response(html)).unwrap().is_empty());
    }

    #[test]
    fn cards_without_detail_links_signal_markup_drift() {
        let html = r#"<html><body><div class="card"><span>John Smith</span></div></body></html>"#;
        let err = TruePeopleSearch.parse(&response(html)).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedStructure { .. }));
    }
}
