//! Batch mode.
//!
//! Reads addresses from a CSV file, traces them in chunks, and writes one
//! output row per input row. The output file is rewritten from scratch on
//! every run and flushed after each row, so an interrupted run leaves every
//! completed row on disk.

use std::fs::File;
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::Instant;

use crate::aggregate::{BatchRow, RowStatus};
use crate::fetch::PlannedFetch;
use crate::query::{InvalidAddressError, SearchQuery};
use crate::skiptracer::SkipTracer;

pub const OUTPUT_HEADERS: [&str; 5] = [
    "Input Address",
    "Result Name",
    "Result Address",
    "Phone Number(s)",
    "Status",
];

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("input file has no `{0}` column")]
    MissingColumn(&'static str),
}

/// One input line: `Address` plus optional `City` and `StateZip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRow {
    pub address: String,
    pub city: Option<String>,
    pub state_zip: Option<String>,
}

impl InputRow {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            city: None,
            state_zip: None,
        }
    }

    /// Address as echoed into the `Input Address` column.
    pub fn display_address(&self) -> String {
        [Some(self.address.as_str()), self.city.as_deref(), self.state_zip.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn query(&self) -> Result<SearchQuery, InvalidAddressError> {
        SearchQuery::from_row(&self.address, self.city.as_deref(), self.state_zip.as_deref())
    }
}

fn column(headers: &[String], names: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let compact: String = header
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        names.contains(&compact.as_str())
    })
}

fn decode(record: &csv::ByteRecord) -> Vec<String> {
    record
        .iter()
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

/// Read every record of `path`. Rows with unusable addresses are kept so
/// they still produce an `error` output row. Fields are decoded lossily, so
/// a row in a legacy encoding is still traced rather than failing the file.
pub fn read_input(path: &Path) -> Result<Vec<InputRow>, BatchError> {
    let file = File::open(path).map_err(|source| BatchError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);

    let headers = decode(reader.byte_headers()?);
    let address_idx = column(&headers, &["address", "streetaddress"])
        .ok_or(BatchError::MissingColumn("Address"))?;
    let city_idx = column(&headers, &["city"]);
    let state_zip_idx = column(&headers, &["statezip", "state"]);

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let fields = decode(&record?);
        let field = |idx: Option<usize>| {
            idx.and_then(|idx| fields.get(idx))
                .cloned()
                .filter(|value| !value.is_empty())
        };
        rows.push(InputRow {
            address: field(Some(address_idx)).unwrap_or_default(),
            city: field(city_idx),
            state_zip: field(state_zip_idx),
        });
    }
    log::info!("loaded {} row(s) from {}", rows.len(), path.display());
    Ok(rows)
}

/// Output file writer; truncates on creation and flushes every row.
pub struct BatchWriter {
    writer: csv::Writer<File>,
}

impl BatchWriter {
    pub fn create(path: &Path) -> Result<Self, BatchError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| BatchError::Open {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(path).map_err(|source| BatchError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record(OUTPUT_HEADERS)?;
        writer.flush().map_err(csv::Error::from)?;
        Ok(Self { writer })
    }

    pub fn write(&mut self, row: &BatchRow) -> Result<(), BatchError> {
        self.writer.serialize(row)?;
        self.writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Rows per chunk; each chunk is pre-submitted as one remote batch.
    pub batch_size: usize,
    /// Rows traced concurrently.
    pub parallel: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 25,
            parallel: 1,
        }
    }
}

/// Row counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub ok: usize,
    pub no_match: usize,
    pub blocked: usize,
    pub error: usize,
}

impl BatchSummary {
    fn record(&mut self, status: RowStatus) {
        self.total += 1;
        match status {
            RowStatus::Ok => self.ok += 1,
            RowStatus::NoMatch => self.no_match += 1,
            RowStatus::Blocked => self.blocked += 1,
            RowStatus::Error => self.error += 1,
        }
    }

    /// At least one row completed cleanly.
    pub fn any_clean(&self) -> bool {
        self.ok + self.no_match > 0
    }
}

/// Trace every row of `input` and write the results to `output`.
pub async fn run(
    tracer: &SkipTracer,
    input: &Path,
    output: &Path,
    options: BatchOptions,
) -> Result<BatchSummary, BatchError> {
    let rows = read_input(input)?;
    let mut writer = BatchWriter::create(output)?;
    let mut summary = BatchSummary::default();
    let parallel = options.parallel.max(1);
    let deadline = tracer.run_deadline();

    for (index, chunk) in rows.chunks(options.batch_size.max(1)).enumerate() {
        let queries: Vec<_> = chunk.iter().map(InputRow::query).collect();
        log::info!(
            "chunk {}: {} row(s), {} valid",
            index + 1,
            chunk.len(),
            queries.iter().filter(|query| query.is_ok()).count()
        );

        let expired = deadline.is_some_and(|deadline| Instant::now() >= deadline);
        let planned = if expired { Vec::new() } else { plan(tracer, &queries) };
        if !planned.is_empty()
            && let Err(err) = tracer.backend().prepare_batch(&planned).await
        {
            log::warn!("batch pre-submission failed, rows fall back to single requests: {err}");
        }

        let mut traced = stream::iter(chunk.iter().zip(queries))
            .map(|(row, query)| async move {
                let input_address = row.display_address();
                match query {
                    Ok(query) => tracer
                        .trace_query_until(&query, deadline)
                        .await
                        .batch_row(&input_address),
                    Err(err) => {
                        log::warn!("skipping row: {err}");
                        BatchRow::empty(input_address, RowStatus::Error)
                    }
                }
            })
            .buffered(parallel);

        while let Some(row) = traced.next().await {
            summary.record(row.status);
            writer.write(&row)?;
        }
    }

    log::info!(
        "batch finished: {} row(s), ok={} no_match={} blocked={} error={}",
        summary.total,
        summary.ok,
        summary.no_match,
        summary.blocked,
        summary.error
    );
    Ok(summary)
}

fn plan(tracer: &SkipTracer, queries: &[Result<SearchQuery, InvalidAddressError>]) -> Vec<PlannedFetch> {
    queries
        .iter()
        .filter_map(|query| query.as_ref().ok())
        .flat_map(|query| {
            tracer.sources().iter().filter_map(move |&source| {
                source.search_url(query).ok().map(|url| PlannedFetch {
                    query: query.clone(),
                    source,
                    url,
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn input(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_address_only_files() {
        let file = input("Address\n\"709 W High St, Portland, IN\"\n\n\" 12 Main St, Muncie, IN 47305 \"\n");
        let rows = read_input(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].address, "12 Main St, Muncie, IN 47305");
        assert!(rows[0].query().is_ok());
    }

    #[test]
    fn reads_split_columns() {
        let file = input("Address,City,StateZip\n709 W High St,Portland,IN 47371\nnowhere,,\n");
        let rows = read_input(file.path()).unwrap();
        assert_eq!(rows[0].display_address(), "709 W High St, Portland, IN 47371");
        assert_eq!(rows[0].query().unwrap().components().zip.as_deref(), Some("47371"));
        assert!(rows[1].query().is_err());
    }

    #[test]
    fn latin1_row_does_not_abort_the_file() {
        let mut contents = b"Address\n\"1 Main St, Muncie, IN\"\n".to_vec();
        contents.extend_from_slice(b"\"12 Caf\xE9 St, Muncie, IN\"\n");
        contents.extend_from_slice(b"\"3 Oak Ave, Fort Wayne, IN\"\n");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&contents).unwrap();

        let rows = read_input(file.path()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].address, "12 Caf\u{FFFD} St, Muncie, IN");
        assert!(rows[1].query().is_ok());
        assert_eq!(rows[2].address, "3 Oak Ave, Fort Wayne, IN");
    }

    #[test]
    fn missing_address_column_is_rejected() {
        let file = input("Street,Town\n1 A St,B\n");
        assert!(matches!(
            read_input(file.path()),
            Err(BatchError::MissingColumn("Address"))
        ));
    }

    #[test]
    fn writer_overwrites_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/results.csv");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale contents\n").unwrap();

        let mut writer = BatchWriter::create(&path).unwrap();
        writer
            .write(&BatchRow::empty("1 A St, B, IN", RowStatus::NoMatch))
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "Input Address,Result Name,Result Address,Phone Number(s),Status\n\"1 A St, B, IN\",,,,no_match\n"
        );
    }
}
