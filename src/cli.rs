//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::aggregation::GroupBy;
use crate::models::{Dimension, DimensionFilter, Selector};
use crate::navigator::DrillStep;
use clap::Parser;
use std::path::PathBuf;

/// CarbonLens - drill-down emission totals for campus dashboards
///
/// Folds per-event emission records into nested totals (campus, building,
/// room, device, year, month) and replays dashboard drill-down sessions.
///
/// Examples:
///   carbonlens --source fixtures/emissions.json
///   carbonlens --source fixtures/emissions.json --campus Ganesha --group building,room
///   carbonlens --url http://records.internal:8080 --year 2024 --group month --format json
///   carbonlens --source fixtures/emissions.json --drill campus:Ganesha,building:Labtek,back
///   carbonlens --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// JSON or JSON-lines file of emission records
    #[arg(short, long, value_name = "FILE", env = "CARBONLENS_SOURCE", conflicts_with = "url")]
    pub source: Option<PathBuf>,

    /// Base URL of an emission record service
    ///
    /// Pages are requested from {URL}/emissions?offset=..&limit=..
    #[arg(long, value_name = "URL", env = "CARBONLENS_URL")]
    pub url: Option<String>,

    /// Only include this campus ("All" for every campus)
    #[arg(long, value_name = "NAME")]
    pub campus: Option<String>,

    /// Only include this year ("All" for every year)
    #[arg(long, value_name = "YEAR")]
    pub year: Option<String>,

    /// Only include this building
    #[arg(long, value_name = "NAME")]
    pub building: Option<String>,

    /// Only include this room
    #[arg(long, value_name = "NAME")]
    pub room: Option<String>,

    /// Dimensions to group by, outermost first (at most two)
    ///
    /// Example: --group building,room
    #[arg(
        short,
        long,
        value_name = "DIMS",
        value_delimiter = ',',
        default_value = "building,room"
    )]
    pub group: Vec<Dimension>,

    /// Replay a drill-down session instead of writing a report
    ///
    /// Steps: campus:NAME, building:NAME, room:NAME, year:YYYY, back,
    /// back:space, back:time. Example: --drill campus:Ganesha,year:2024,back
    #[arg(long, value_name = "STEPS", value_delimiter = ',')]
    pub drill: Option<Vec<String>>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .carbonlens.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Records requested per page
    #[arg(long, value_name = "COUNT")]
    pub page_size: Option<usize>,

    /// Record service request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Fail if more than this many records are skipped
    ///
    /// Useful for CI data-quality gates. Exit code 2 when exceeded.
    #[arg(long, value_name = "COUNT")]
    pub max_skipped: Option<usize>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .carbonlens.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Record service URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref path) = self.source {
            if !path.is_file() {
                return Err(format!("Record file does not exist: {}", path.display()));
            }
        }

        if self.page_size == Some(0) {
            return Err("Page size must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        self.filter()?;
        self.group_by()?;
        self.drill_steps()?;

        Ok(())
    }

    /// Builds the dimension filter from the filter flags.
    pub fn filter(&self) -> Result<DimensionFilter, String> {
        let text = |value: &Option<String>| -> Selector<String> {
            value
                .as_deref()
                .map_or(Selector::All, |v| v.parse().unwrap_or(Selector::All))
        };

        let year = match self.year.as_deref() {
            Some(year) => year
                .parse::<Selector<i32>>()
                .map_err(|_| format!("Invalid year '{}' (expected a number or All)", year))?,
            None => Selector::All,
        };

        Ok(DimensionFilter {
            campus: text(&self.campus),
            year,
            building: text(&self.building),
            room: text(&self.room),
        })
    }

    pub fn group_by(&self) -> Result<GroupBy, String> {
        GroupBy::from_dimensions(&self.group).map_err(|e| e.to_string())
    }

    /// Parsed drill steps, empty when no session was requested.
    pub fn drill_steps(&self) -> Result<Vec<DrillStep>, String> {
        self.drill
            .iter()
            .flatten()
            .map(|step| step.parse::<DrillStep>())
            .collect()
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `verbose_default` comes from the configuration file; `--quiet` wins
    /// over it.
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
    use crate::models::Dimension;
    use crate::navigator::drill::Selection;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["carbonlens"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_default_group() {
        let args = parse(&[]);
        assert_eq!(args.group, vec![Dimension::Building, Dimension::Room]);
        assert_eq!(
            args.group_by().unwrap(),
            GroupBy::Nested(Dimension::Building, Dimension::Room)
        );
        assert_eq!(args.format, OutputFormat::Markdown);
    }

    #[test]
    fn test_filter_flags() {
        let args = parse(&["--campus", "Ganesha", "--year", "2024", "--building", "All"]);
        let filter = args.filter().unwrap();
        assert_eq!(filter.campus, Selector::Only("Ganesha".to_string()));
        assert_eq!(filter.year, Selector::Only(2024));
        assert_eq!(filter.building, Selector::All);
        assert_eq!(filter.room, Selector::All);
    }

    #[test]
    fn test_validation_invalid_year() {
        let args = parse(&["--year", "last"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_too_many_dimensions() {
        let args = parse(&["--group", "campus,building,room"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_url() {
        let args = parse(&["--url", "records.internal"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let args = parse(&["--verbose", "--quiet"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_drill_steps() {
        let args = parse(&["--drill", "campus:Ganesha,year:2024,back"]);
        let steps = args.drill_steps().unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps[0],
            DrillStep::Select(Selection::Space("Ganesha".to_string()))
        );
        assert_eq!(steps[1], DrillStep::Select(Selection::Year(2024)));

        let bad = parse(&["--drill", "floor:3"]);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = parse(&[]);
        assert_eq!(args.log_level(false), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(false), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(false), tracing::Level::ERROR);
    }

    #[test]
    fn test_log_level_follows_config_verbose() {
        let args = parse(&[]);
        assert_eq!(args.log_level(true), tracing::Level::DEBUG);

        let quiet = parse(&["--quiet"]);
        assert_eq!(quiet.log_level(true), tracing::Level::ERROR);
    }
}
