//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.carbonlens.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".carbonlens.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Record source settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Fail (exit code 2) when more rows than this are skipped.
    #[serde(default)]
    pub max_skipped: Option<usize>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            max_skipped: None,
        }
    }
}

fn default_output() -> String {
    "carbon_report.md".to_string()
}

/// Where emission records come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// JSON or JSON-lines record file.
    #[serde(default)]
    pub path: Option<String>,

    /// Base URL of a record service.
    #[serde(default)]
    pub url: Option<String>,

    /// Records requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Request timeout in seconds (record service only).
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Number of retries on failure (record service only).
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Base delay between retries in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: None,
            url: None,
            page_size: default_page_size(),
            timeout_seconds: default_timeout(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_page_size() -> usize {
    crate::aggregation::aggregator::DEFAULT_PAGE_SIZE
}

fn default_timeout() -> u64 {
    30
}

fn default_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Include nested breakdowns in the report.
    #[serde(default = "default_true")]
    pub include_children: bool,

    /// Include pie-chart shares.
    #[serde(default = "default_true")]
    pub include_shares: bool,

    /// Maximum groups listed per level.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            include_children: true,
            include_shares: true,
            top_n: default_top_n(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_top_n() -> usize {
    20
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
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given explicitly on the command line override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        // A source flag replaces whatever source the file configured.
        if let Some(ref path) = args.source {
            self.source.path = Some(path.display().to_string());
            self.source.url = None;
        }
        if let Some(ref url) = args.url {
            self.source.url = Some(url.clone());
            self.source.path = None;
        }

        if let Some(page_size) = args.page_size {
            self.source.page_size = page_size;
        }
        if let Some(timeout) = args.timeout {
            self.source.timeout_seconds = timeout;
        }
        if let Some(max_skipped) = args.max_skipped {
            self.general.max_skipped = Some(max_skipped);
        }
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
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

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.output, "carbon_report.md");
        assert_eq!(config.source.page_size, 1000);
        assert!(config.source.path.is_none());
        assert!(config.report.include_children);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "ganesha.md"
verbose = true
max_skipped = 10

[source]
url = "http://records.internal:8080"
page_size = 250

[report]
include_shares = false
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "ganesha.md");
        assert!(config.general.verbose);
        assert_eq!(config.general.max_skipped, Some(10));
        assert_eq!(config.source.url.as_deref(), Some("http://records.internal:8080"));
        assert_eq!(config.source.page_size, 250);
        assert_eq!(config.source.retries, 3);
        assert!(!config.report.include_shares);
        assert!(config.report.include_children);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[source]\npath = \"fixtures/emissions.json\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.source.path.as_deref(), Some("fixtures/emissions.json"));
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[source\npath = ").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_merge_with_args_prefers_cli_source() {
        let mut config = Config::default();
        config.source.url = Some("http://records.internal".to_string());
        config.source.page_size = 200;

        let args = Args::parse_from(["carbonlens", "--source", "data.json", "--page-size", "50"]);
        config.merge_with_args(&args);

        assert_eq!(config.source.path.as_deref(), Some("data.json"));
        assert!(config.source.url.is_none());
        assert_eq!(config.source.page_size, 50);
        assert_eq!(config.source.retries, 3);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[source]"));
        assert!(toml_str.contains("[report]"));
    }
}
