mod cli;

use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use log::LevelFilter;

use skiptracer_rs::{Credentials, Settings, SkipTracer, SkipTracerError};

use crate::cli::Cli;

const EXIT_FAILED: u8 = 1;
const EXIT_INVALID: u8 = 2;

fn init_logger(debug: bool) {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .filter_level(if debug { LevelFilter::Debug } else { LevelFilter::Info })
        .parse_default_env()
        .init();
}

fn build_tracer(cli: &Cli) -> anyhow::Result<SkipTracer> {
    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    cli.apply(&mut settings);
    let tracer = SkipTracer::builder()
        .with_settings(settings)
        .with_credentials(Credentials::from_env())
        .build()
        .context("starting skip tracer")?;
    Ok(tracer)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.debug);

    let tracer = match build_tracer(&cli) {
        Ok(tracer) => tracer,
        Err(err) => {
            log::error!("{err:#}");
            return ExitCode::from(EXIT_INVALID);
        }
    };

    let code = match &cli.input {
        Some(input) => run_batch(&tracer, &cli, input).await,
        None => run_single(&tracer, &cli).await,
    };

    if cli.debug {
        for line in tracer.metrics().summary_lines() {
            log::debug!("{line}");
        }
        let health = tracer.proxy_health();
        log::debug!(
            "proxies: {} total, {} available, {} cooling down",
            health.total_proxies,
            health.available_proxies,
            health.cooling_down
        );
    }
    tracer.shutdown().await;
    code
}

async fn run_single(tracer: &SkipTracer, cli: &Cli) -> ExitCode {
    let address = cli.address().unwrap_or_default();
    let report = match tracer.trace(&address).await {
        Ok(report) => report,
        Err(err @ SkipTracerError::InvalidAddress(_)) => {
            log::error!("{err}");
            return ExitCode::from(EXIT_INVALID);
        }
        Err(err) => {
            log::error!("{err}");
            return ExitCode::from(EXIT_FAILED);
        }
    };

    match report.to_json() {
        Ok(json) => println!("{json}"),
        Err(err) => log::error!("cannot encode results: {err}"),
    }
    if cli.save
        && let Err(err) = tracer.save_results(&report.records, &tracer.settings().results_path)
    {
        log::error!("{err}");
    }
    if let Some(path) = &report.debug_capture {
        log::info!("raw page saved to {} for inspection", path.display());
    }

    if report.any_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILED)
    }
}

async fn run_batch(tracer: &SkipTracer, cli: &Cli, input: &std::path::Path) -> ExitCode {
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| tracer.settings().batch_output_path.clone());
    match tracer.run_batch(input, &output).await {
        Ok(summary) => {
            log::info!("results written to {}", output.display());
            if summary.any_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FAILED)
            }
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(EXIT_INVALID)
        }
    }
}
