use std::path::PathBuf;

use clap::Parser;

use skiptracer_rs::BackendChoice;
use skiptracer_rs::Settings;
use skiptracer_rs::config::split_proxy_list;

/// Command-line interface definition.
///
/// Either one address (positional, words are joined with spaces) or a CSV
/// file through `--input`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "skiptracer",
    author,
    version,
    about = "Look up public contact records (names, phones) for a US property address"
)]
pub struct Cli {
    /// Property address, e.g. "709 W High St, Portland, IN"
    #[arg(required_unless_present = "input", conflicts_with = "input")]
    pub address: Vec<String>,

    /// CSV file with an `Address` column (optional `City`, `StateZip`)
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Batch output CSV (defaults to the configured batch output path)
    #[arg(long, value_name = "FILE", requires = "input")]
    pub output: Option<PathBuf>,

    /// JSON settings file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose logging and a metrics summary at the end of the run
    #[arg(long)]
    pub debug: bool,

    /// Show the browser window (browser backend only)
    #[arg(long)]
    pub visible: bool,

    /// Proxy spec(s), comma separated; added to SKIPTRACE_PROXIES
    #[arg(long, value_name = "SPEC[,SPEC...]")]
    pub proxy: Vec<String>,

    /// Skip human-like pacing between attempts
    #[arg(long)]
    pub fast: bool,

    /// Write the records to the configured results file as a JSON array
    #[arg(long)]
    pub save: bool,

    /// Rows traced concurrently in batch mode
    #[arg(long, value_name = "N", num_args = 0..=1, default_missing_value = "4")]
    pub parallel: Option<usize>,

    /// redb file for cookies and proxy health, kept across runs
    #[arg(long = "cookie-store", value_name = "PATH")]
    pub cookie_store: Option<PathBuf>,

    /// Rows per batch chunk
    #[arg(long = "batch-size", value_name = "N")]
    pub batch_size: Option<usize>,

    /// Per-attempt timeout in seconds
    #[arg(long = "request-timeout", value_name = "SECONDS")]
    pub request_timeout: Option<u64>,

    /// auto, direct, browser or remote
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<BackendChoice>,
}

impl Cli {
    /// Address words joined back into one string.
    pub fn address(&self) -> Option<String> {
        let joined = self.address.join(" ");
        let trimmed = joined.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Layer the flags on top of file settings.
    pub fn apply(&self, settings: &mut Settings) {
        if self.visible {
            settings.visible_browser = true;
        }
        if self.fast {
            settings.fast = true;
        }
        if let Some(parallel) = self.parallel {
            settings.parallel = parallel;
        }
        if let Some(path) = &self.cookie_store {
            settings.cookie_store = Some(path.clone());
        }
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }
        if let Some(secs) = self.request_timeout {
            settings.request_timeout_secs = secs;
        }
        if let Some(backend) = self.backend {
            settings.backend = backend;
        }
        for raw in &self.proxy {
            for spec in split_proxy_list(raw) {
                if !settings.proxies.contains(&spec) {
                    settings.proxies.push(spec);
                }
            }
        }
    }
}
