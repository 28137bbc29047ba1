//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.medco-gateway.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = ".medco-gateway.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Directory (PM cell) endpoint.
    #[serde(default = "default_directory")]
    pub directory: EndpointConfig,

    /// Query execution (CRC cell) endpoint.
    #[serde(default = "default_crc")]
    pub crc: EndpointConfig,

    /// Tagging and aggregation protocol service.
    #[serde(default)]
    pub unlynx: UnlynxConfig,

    /// Retry policy for transport failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Item key conventions.
    #[serde(default)]
    pub query: QueryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            directory: default_directory(),
            crc: default_crc(),
            unlynx: UnlynxConfig::default(),
            retry: RetryConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Log at debug level unless `--quiet` is given.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "medco_response.json".to_string()
}

/// An HTTP service endpoint with its own timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_service_timeout")]
    pub timeout_seconds: u64,
}

fn default_directory() -> EndpointConfig {
    EndpointConfig {
        url: "http://localhost:9090/i2b2/services/PMService".to_string(),
        timeout_seconds: default_service_timeout(),
    }
}

fn default_crc() -> EndpointConfig {
    EndpointConfig {
        url: "http://localhost:9090/i2b2/services/QueryToolService".to_string(),
        timeout_seconds: default_service_timeout(),
    }
}

fn default_service_timeout() -> u64 {
    60
}

/// Protocol service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlynxConfig {
    #[serde(default = "default_unlynx_url")]
    pub url: String,

    /// Group definition file of the participating servers.
    #[serde(default = "default_group_file")]
    pub group_file: String,

    /// Index of the server this site enters the protocol through.
    #[serde(default)]
    pub entry_point_idx: usize,

    /// Whether the protocol generates proofs.
    #[serde(default)]
    pub proofs: bool,

    #[serde(default = "default_debug_level")]
    pub debug_level: u8,

    /// Protocol timeout in seconds, sent with every run.
    #[serde(default = "default_protocol_timeout")]
    pub timeout_seconds: u64,
}

impl Default for UnlynxConfig {
    fn default() -> Self {
        Self {
            url: default_unlynx_url(),
            group_file: default_group_file(),
            entry_point_idx: 0,
            proofs: false,
            debug_level: default_debug_level(),
            timeout_seconds: default_protocol_timeout(),
        }
    }
}

fn default_unlynx_url() -> String {
    "http://localhost:2000".to_string()
}

fn default_group_file() -> String {
    "group.toml".to_string()
}

fn default_debug_level() -> u8 {
    1
}

fn default_protocol_timeout() -> u64 {
    600
}

/// Retry settings for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per external call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Delay before the second attempt; grows linearly.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> usize {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

/// Item key conventions shared with the query tool and the sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Prefix of keys holding an encrypted (sensitive) term.
    #[serde(default = "default_sensitive_prefix")]
    pub sensitive_prefix: String,

    /// Prefix of keys rewritten with a tag.
    #[serde(default = "default_tagged_prefix")]
    pub tagged_prefix: String,

    /// Concept path delimiter ending every key.
    #[serde(default = "default_path_delimiter")]
    pub path_delimiter: String,

    /// Term value marking a connectivity test query.
    #[serde(default = "default_test_marker")]
    pub test_marker: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            sensitive_prefix: default_sensitive_prefix(),
            tagged_prefix: default_tagged_prefix(),
            path_delimiter: default_path_delimiter(),
            test_marker: default_test_marker(),
        }
    }
}

fn default_sensitive_prefix() -> String {
    "\\\\SENSITIVE_ENCRYPTED\\medco\\encrypted\\".to_string()
}

fn default_tagged_prefix() -> String {
    "\\\\SENSITIVE_TAGGED\\medco\\tagged\\".to_string()
}

fn default_path_delimiter() -> String {
    "\\".to_string()
}

fn default_test_marker() -> String {
    "SHRINE_STATUS_TEST".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only explicitly provided CLI values override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref url) = args.pm_url {
            self.directory.url = url.clone();
        }
        if let Some(ref url) = args.crc_url {
            self.crc.url = url.clone();
        }
        if let Some(ref url) = args.unlynx_url {
            self.unlynx.url = url.clone();
        }

        if let Some(timeout) = args.timeout {
            self.directory.timeout_seconds = timeout;
            self.crc.timeout_seconds = timeout;
        }
        if let Some(timeout) = args.protocol_timeout {
            self.unlynx.timeout_seconds = timeout;
        }

        if let Some(max_attempts) = args.max_attempts {
            self.retry.max_attempts = max_attempts;
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Check values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        for (name, url) in [
            ("directory", &self.directory.url),
            ("crc", &self.crc.url),
            ("unlynx", &self.unlynx.url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("{} URL must start with 'http://' or 'https://'", name));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }

        if self.query.sensitive_prefix.is_empty() || self.query.tagged_prefix.is_empty() {
            return Err("query prefixes must not be empty".to_string());
        }

        if self.query.path_delimiter.is_empty() {
            return Err("query.path_delimiter must not be empty".to_string());
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use clap::Parser;
    use std::io::Write;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["medco-gateway", "--request", "query.json"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.unlynx.timeout_seconds, 600);
        assert_eq!(config.query.path_delimiter, "\\");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[directory]
url = "https://pm.example.org/PMService"
timeout_seconds = 5

[unlynx]
url = "http://unlynx:2000"
entry_point_idx = 2
proofs = true

[retry]
max_attempts = 5
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.directory.url, "https://pm.example.org/PMService");
        assert_eq!(config.directory.timeout_seconds, 5);
        assert_eq!(config.crc.url, default_crc().url);
        assert_eq!(config.unlynx.entry_point_idx, 2);
        assert!(config.unlynx.proofs);
        assert_eq!(config.unlynx.group_file, "group.toml");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_ms, 500);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[query]\ntest_marker = \"PING\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.query.test_marker, "PING");
        assert_eq!(config.query.tagged_prefix, default_tagged_prefix());
    }

    #[test]
    fn test_load_invalid_file_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retry\nmax_attempts = ").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.crc.url = "ftp://crc".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_flags_stay_separate() {
        let mut config = Config::default();
        config.merge_with_args(&args(&["--timeout", "5"]));
        assert_eq!(config.directory.timeout_seconds, 5);
        assert_eq!(config.crc.timeout_seconds, 5);
        assert_eq!(config.unlynx.timeout_seconds, 600);

        config.merge_with_args(&args(&["--protocol-timeout", "900", "--max-attempts", "1"]));
        assert_eq!(config.unlynx.timeout_seconds, 900);
        assert_eq!(config.directory.timeout_seconds, 5);
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn test_verbose_from_file_sets_log_level() {
        let mut config: Config = toml::from_str("[general]\nverbose = true").unwrap();
        let cli = args(&[]);
        config.merge_with_args(&cli);

        assert!(config.general.verbose);
        assert_eq!(cli.log_level(config.general.verbose), tracing::Level::DEBUG);

        let quiet = args(&["--quiet"]);
        config.merge_with_args(&quiet);
        assert_eq!(quiet.log_level(config.general.verbose), tracing::Level::ERROR);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[directory]"));
        assert!(toml_str.contains("[unlynx]"));
        assert!(toml_str.contains("[query]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.query.sensitive_prefix, default_sensitive_prefix());
    }
}
