//! Result aggregation.
//!
//! Merges per-source outcomes into the final record list, ordered by fixed
//! source priority so the output never depends on which worker finished
//! first.

use std::fmt;

use serde::Serialize;

use crate::scheduler::{SourceOutcome, SourceStatus};
use crate::sources::{ContactRecord, Source};

/// Outcome summary written with every batch row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Ok,
    NoMatch,
    Blocked,
    Error,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RowStatus::Ok => "ok",
            RowStatus::NoMatch => "no_match",
            RowStatus::Blocked => "blocked",
            RowStatus::Error => "error",
        })
    }
}

/// One line of the batch output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRow {
    #[serde(rename = "Input Address")]
    pub input_address: String,
    #[serde(rename = "Result Name")]
    pub result_name: String,
    #[serde(rename = "Result Address")]
    pub result_address: String,
    #[serde(rename = "Phone Number(s)")]
    pub phone_numbers: String,
    #[serde(rename = "Status")]
    pub status: RowStatus,
}

impl BatchRow {
    /// Row with empty contact fields.
    pub fn empty(input_address: impl Into<String>, status: RowStatus) -> Self {
        Self {
            input_address: input_address.into(),
            result_name: String::new(),
            result_address: String::new(),
            phone_numbers: String::new(),
            status,
        }
    }

    pub fn from_record(input_address: impl Into<String>, record: &ContactRecord) -> Self {
        Self {
            input_address: input_address.into(),
            result_name: record.name().to_string(),
            result_address: record.city_state().to_string(),
            phone_numbers: record.phones().join("; "),
            status: RowStatus::Ok,
        }
    }
}

/// Merges source outcomes in a fixed priority order.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    priority: Vec<Source>,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(Source::ALL)
    }
}

impl ResultAggregator {
    pub fn new(priority: impl IntoIterator<Item = Source>) -> Self {
        Self {
            priority: priority.into_iter().collect(),
        }
    }

    fn rank(&self, source: Source) -> usize {
        self.priority
            .iter()
            .position(|candidate| *candidate == source)
            .unwrap_or(self.priority.len())
    }

    /// Every record, primary source first. Ties keep the input order.
    pub fn merge(&self, outcomes: &[SourceOutcome]) -> Vec<ContactRecord> {
        let mut ordered: Vec<&SourceOutcome> = outcomes.iter().collect();
        ordered.sort_by_key(|outcome| self.rank(outcome.source));
        ordered
            .into_iter()
            .flat_map(|outcome| outcome.records.iter().cloned())
            .collect()
    }

    /// `ok` when any record exists, `no_match` when some source completed
    /// cleanly, `blocked` when some source was blocked, `error` otherwise.
    pub fn status(&self, outcomes: &[SourceOutcome]) -> RowStatus {
        if outcomes.iter().any(|outcome| !outcome.records.is_empty()) {
            RowStatus::Ok
        } else if outcomes.iter().any(|outcome| outcome.status.is_clean()) {
            RowStatus::NoMatch
        } else if outcomes
            .iter()
            .any(|outcome| outcome.status == SourceStatus::Blocked)
        {
            RowStatus::Blocked
        } else {
            RowStatus::Error
        }
    }

    /// Batch row: only the first merged record is kept.
    pub fn batch_row(&self, input_address: &str, outcomes: &[SourceOutcome]) -> BatchRow {
        match self.merge(outcomes).first() {
            Some(record) => BatchRow::from_record(input_address, record),
            None => BatchRow::empty(input_address, self.status(outcomes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(source: Source, status: SourceStatus, names: &[&str]) -> SourceOutcome {
        SourceOutcome {
            source,
            records: names
                .iter()
                .map(|name| ContactRecord::new(*name, ["2605551234"], "Portland, IN", source))
                .collect(),
            status,
            attempts: Vec::new(),
            last_response: None,
            error: None,
        }
    }

    #[test]
    fn merge_order_is_priority_not_completion_order() {
        let aggregator = ResultAggregator::default();
        let finished_first = vec![
            outcome(Source::FastPeopleSearch, SourceStatus::Success, &["Fast One"]),
            outcome(Source::TruePeopleSearch, SourceStatus::Success, &["True One", "True Two"]),
        ];
        let names: Vec<_> = aggregator
            .merge(&finished_first)
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, ["True One", "True Two", "Fast One"]);

        let reversed: Vec<_> = finished_first.into_iter().rev().collect();
        assert_eq!(aggregator.merge(&reversed).len(), 3);
        assert_eq!(aggregator.merge(&reversed)[0].name(), "True One");
    }

    #[test]
    fn status_prefers_records_then_clean_then_blocked() {
        let aggregator = ResultAggregator::default();
        let blocked = outcome(Source::TruePeopleSearch, SourceStatus::Blocked, &[]);
        let timeout = outcome(Source::FastPeopleSearch, SourceStatus::Timeout, &[]);
        let no_match = outcome(Source::FastPeopleSearch, SourceStatus::NoMatch, &[]);

        assert_eq!(aggregator.status(&[blocked.clone(), timeout.clone()]), RowStatus::Blocked);
        assert_eq!(aggregator.status(&[blocked.clone(), no_match]), RowStatus::NoMatch);
        assert_eq!(aggregator.status(&[timeout]), RowStatus::Error);
        assert_eq!(aggregator.status(&[]), RowStatus::Error);
    }

    #[test]
    fn batch_row_keeps_first_record_only() {
        let aggregator = ResultAggregator::default();
        let row = aggregator.batch_row(
            "709 W High St, Portland, IN",
            &[outcome(Source::TruePeopleSearch, SourceStatus::Success, &["John D Smith", "Jane Smith"])],
        );
        assert_eq!(row.result_name, "John D Smith");
        assert_eq!(row.result_address, "Portland, IN");
        assert_eq!(row.phone_numbers, "+1 (260) 555-1234");
        assert_eq!(row.status, RowStatus::Ok);
    }
}
