//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::{Path, PathBuf};

/// medco-gateway - privacy-preserving query gateway for i2b2 sites
///
/// Runs a query request through authentication, tagging of encrypted
/// terms, local execution and secure aggregation, and writes the
/// encrypted result as a Markdown/JSON report.
///
/// Examples:
///   medco-gateway --request query.json
///   medco-gateway --request query.json --format json --output result.json
///   medco-gateway --request query.json --dry-run
///   medco-gateway --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Query request file (JSON)
    #[arg(short, long, value_name = "FILE", required_unless_present = "init_config")]
    pub request: Option<PathBuf>,

    /// Output file path for the report
    ///
    /// Defaults to the `general.output` setting.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "json", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .medco-gateway.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// PM cell URL
    #[arg(long, value_name = "URL", env = "MEDCO_PM_URL")]
    pub pm_url: Option<String>,

    /// CRC cell URL
    #[arg(long, value_name = "URL", env = "MEDCO_CRC_URL")]
    pub crc_url: Option<String>,

    /// Unlynx protocol service URL
    #[arg(long, value_name = "URL", env = "MEDCO_UNLYNX_URL")]
    pub unlynx_url: Option<String>,

    /// Timeout in seconds for the PM and CRC cells
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Timeout in seconds of a tagging or aggregation protocol run
    #[arg(long, value_name = "SECS")]
    pub protocol_timeout: Option<u64>,

    /// Total attempts per external call, first one included
    ///
    /// Only timeouts and connection failures are attempted again.
    #[arg(long, value_name = "COUNT")]
    pub max_attempts: Option<usize>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Read the request as a compact client query
    ///
    /// The file holds `message_header`, `query_name` and `panels` (item
    /// keys grouped by panel) instead of a full query request.
    #[arg(long)]
    pub client_query: bool,

    /// Dry run: parse the request and list its encrypted terms
    ///
    /// No service is contacted.
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .medco-gateway.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format
    Markdown,
    /// JSON format (default)
    #[default]
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        match self.request {
            Some(ref path) if !path.is_file() => {
                return Err(format!("Request file does not exist: {}", path.display()));
            }
            None => return Err("A request file is required (--request)".to_string()),
            _ => {}
        }

        for url in [&self.pm_url, &self.crc_url, &self.unlynx_url]
            .into_iter()
            .flatten()
        {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("URL must start with 'http://' or 'https://': {}", url));
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.timeout == Some(0) || self.protocol_timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.max_attempts == Some(0) {
            return Err("Max attempts must be at least 1".to_string());
        }

        Ok(())
    }

    /// Report path: `--output` if given, else `default` with the extension
    /// of the chosen format.
    pub fn output_path(&self, default: &str) -> PathBuf {
        match self.output {
            Some(ref path) => path.clone(),
            None => Path::new(default).with_extension(self.format.extension()),
        }
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `verbose_default` comes from the configuration file; `--quiet` wins
    /// over both.
    pub fn log_level(&self, verbose_default: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || verbose_default {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn make_args(request: PathBuf) -> Args {
        Args {
            request: Some(request),
            output: None,
            format: OutputFormat::Json,
            config: None,
            pm_url: None,
            crc_url: None,
            unlynx_url: None,
            timeout: None,
            protocol_timeout: None,
            max_attempts: None,
            verbose: false,
            quiet: false,
            client_query: false,
            dry_run: false,
            init_config: false,
        }
    }

    #[test]
    fn test_validation_ok() {
        let file = NamedTempFile::new().unwrap();
        let args = make_args(file.path().to_path_buf());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_missing_request() {
        let args = make_args(PathBuf::from("/nonexistent/query.json"));
        assert!(args.validate().unwrap_err().contains("does not exist"));

        let mut args = args;
        args.request = None;
        assert!(args.validate().is_err());

        args.init_config = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_url() {
        let file = NamedTempFile::new().unwrap();
        let mut args = make_args(file.path().to_path_buf());
        args.unlynx_url = Some("localhost:2000".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let file = NamedTempFile::new().unwrap();
        let mut args = make_args(file.path().to_path_buf());
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_bounds() {
        let file = NamedTempFile::new().unwrap();
        let mut args = make_args(file.path().to_path_buf());
        args.timeout = Some(0);
        assert!(args.validate().is_err());

        args.timeout = None;
        args.protocol_timeout = Some(0);
        assert!(args.validate().is_err());

        args.protocol_timeout = None;
        args.max_attempts = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_max_attempts_flag() {
        let args = Args::try_parse_from(["medco-gateway", "--request", "q.json", "--max-attempts", "1"])
            .unwrap();
        assert_eq!(args.max_attempts, Some(1));
        assert!(Args::try_parse_from(["medco-gateway", "--request", "q.json", "--retries", "1"]).is_err());
    }

    #[test]
    fn test_default_output_follows_format() {
        let file = NamedTempFile::new().unwrap();
        let mut args = make_args(file.path().to_path_buf());
        assert_eq!(args.output_path("medco_response.json"), PathBuf::from("medco_response.json"));

        args.format = OutputFormat::Markdown;
        assert_eq!(args.output_path("medco_response.json"), PathBuf::from("medco_response.md"));
        assert_eq!(args.output_path("out/result"), PathBuf::from("out/result.md"));

        args.output = Some(PathBuf::from("custom.txt"));
        assert_eq!(args.output_path("medco_response.json"), PathBuf::from("custom.txt"));
    }

    #[test]
    fn test_log_level() {
        let file = NamedTempFile::new().unwrap();
        let mut args = make_args(file.path().to_path_buf());
        assert_eq!(args.log_level(false), tracing::Level::INFO);
        assert_eq!(args.log_level(true), tracing::Level::DEBUG);

        args.verbose = true;
        assert_eq!(args.log_level(false), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(false), tracing::Level::ERROR);
        assert_eq!(args.log_level(true), tracing::Level::ERROR);
    }
}
