//! medco-gateway - privacy-preserving query gateway for i2b2 sites
//!
//! Reads a query request, runs it through the tagging, execution and
//! aggregation pipeline, and writes a report of the encrypted result.
//!
//! Exit codes:
//!   0 - Query completed, or status query bypassed
//!   1 - Runtime error (config, transport, unsupported query type, etc.)
//!   2 - Query rejected (authentication failed or no public key)

mod auth;
mod cells;
mod cli;
mod config;
mod error;
mod models;
mod pipeline;
mod ports;
mod query;
mod report;
mod unlynx;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use models::{ClientQuery, PipelineOutcome, QueryRequest};
use pipeline::{Pipeline, PipelineServices, RetryPolicy};
use query::TermClassifier;
use report::{FailureSummary, RunMetadata, RunReport, RunResult};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Configuration comes first: it may turn on verbose logging.
    let (mut config, source) = load_config(&args);
    config.merge_with_args(&args);

    init_logging(args.log_level(config.general.verbose))?;

    info!("medco-gateway v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    source.log();

    let config = match source {
        ConfigSource::Unreadable(path, e) => {
            error!("Failed to load config {}: {:#}", path.display(), e);
            eprintln!("\nError: Failed to load config {}: {:#}", path.display(), e);
            std::process::exit(1);
        }
        _ => config,
    };

    match run_query(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Query failed: {:#}", e);
            eprintln!("\nError: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default configuration file.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set the PM, CRC and Unlynx endpoints.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Run one query request. Returns the exit code.
async fn run_query(args: Args, config: Config) -> Result<i32> {
    let started_at = Utc::now();
    let start_time = Instant::now();

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let request_path = args
        .request
        .clone()
        .context("A request file is required (--request)")?;
    let input = std::fs::read_to_string(&request_path)
        .with_context(|| format!("Failed to read request: {}", request_path.display()))?;
    let request = if args.client_query {
        ClientQuery::parse(&input)?.into_request()
    } else {
        QueryRequest::parse(&input)?
    };
    let query_name = request.query_name().to_string();

    if args.dry_run {
        return handle_dry_run(&config, &request);
    }

    let services = PipelineServices::from_config(&config)?;
    let pipeline = Pipeline::new(services, &config.query, RetryPolicy::from(&config.retry))?;

    info!(
        "Running query {} (PM: {}, CRC: {}, Unlynx: {})",
        query_name, config.directory.url, config.crc.url, config.unlynx.url
    );

    let spinner = (!args.quiet).then(|| spinner(&query_name));
    let result = pipeline.execute(request).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let (result, exit_code) = match result {
        Ok(outcome) => {
            let code = match outcome {
                PipelineOutcome::Rejected(_) => 2,
                PipelineOutcome::Completed(_) | PipelineOutcome::Bypassed(_) => 0,
            };
            (RunResult::Outcome(outcome), code)
        }
        Err(failure) => {
            warn!("{}", failure);
            (
                RunResult::Failed {
                    failure: FailureSummary::from(&failure),
                },
                1,
            )
        }
    };

    let report = RunReport {
        metadata: RunMetadata {
            query_name,
            started_at,
            duration_seconds: start_time.elapsed().as_secs_f64(),
            gateway_version: env!("CARGO_PKG_VERSION").to_string(),
        },
        result,
    };

    let output_path = args.output_path(&config.general.output);
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    if !args.quiet {
        println!("\nQuery {}: {}", report.metadata.query_name, report.status());
        println!("   Duration: {:.1}s", report.metadata.duration_seconds);
        println!("   Report saved to: {}", output_path.display());
    }

    Ok(exit_code)
}

/// Handle --dry-run: classify the request terms and exit.
fn handle_dry_run(config: &Config, request: &QueryRequest) -> Result<i32> {
    println!("\nDry run: classifying query {} (no service call)...\n", request.query_name());

    let classifier = TermClassifier::new(&config.query)?;
    let extracted = classifier.extract(&request.query_definition);

    if extracted.is_empty() {
        println!("   No encrypted terms found.");
    } else {
        println!("   Found {} encrypted terms:\n", extracted.len());
        for term in extracted.terms() {
            println!(
                "     panel {} item {}: {}",
                term.panel, term.item, term.ciphertext
            );
        }
    }

    println!(
        "\n   Requested output types: {}",
        request.output_type_names().join(", ")
    );

    if extracted.contains(&config.query.test_marker) {
        println!("\n   Status query: would be forwarded without tagging.");
    }

    println!("\nDry run complete. No services were contacted.");
    Ok(0)
}

fn spinner(query_name: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(format!("Running query {}", query_name));
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Where the configuration came from. Logged once logging is set up.
enum ConfigSource {
    Explicit(PathBuf),
    Default,
    Builtin,
    /// The default file exists but could not be used.
    Ignored(anyhow::Error),
    /// The file given with `--config` could not be used.
    Unreadable(PathBuf, anyhow::Error),
}

impl ConfigSource {
    fn log(&self) {
        match self {
            ConfigSource::Explicit(path) => info!("Loaded config from: {}", path.display()),
            ConfigSource::Default => info!("Loaded default config from {}", DEFAULT_CONFIG_FILE),
            ConfigSource::Builtin => debug!("No config file found, using defaults"),
            ConfigSource::Ignored(e) => warn!("Failed to load config: {:#}", e),
            ConfigSource::Unreadable(..) => {}
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> (Config, ConfigSource) {
    if let Some(ref config_path) = args.config {
        return match Config::load(config_path) {
            Ok(config) => (config, ConfigSource::Explicit(config_path.clone())),
            Err(e) => (Config::default(), ConfigSource::Unreadable(config_path.clone(), e)),
        };
    }

    match Config::load_default() {
        Ok(Some(config)) => (config, ConfigSource::Default),
        Ok(None) => (Config::default(), ConfigSource::Builtin),
        Err(e) => (Config::default(), ConfigSource::Ignored(e)),
    }
}
