//! CarbonLens - drill-down aggregation for campus carbon dashboards
//!
//! A CLI tool that folds paginated emission records into nested,
//! rounding-stable totals and replays dashboard drill-down sessions.
//!
//! Exit codes:
//!   0 - Success (skipped rows within --max-skipped, or no gate set)
//!   1 - Runtime error (unreadable source, config, service failure, etc.)
//!   2 - More rows skipped than --max-skipped allows

mod aggregation;
mod cli;
mod config;
mod models;
mod navigator;
mod report;
mod source;

use aggregation::{shares, Aggregator};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use models::{AggregationReport, ReportMetadata};
use navigator::{Axis, AxisStatus, DrillSession, DrillStep};
use source::{HttpSource, HttpSourceConfig, InMemorySource, RecordSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration before logging so the file can raise verbosity
    let (mut config, origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    init_logging(&args, &config);

    info!("CarbonLens v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    origin.log();

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .carbonlens.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set the record source, page size and report options.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args, config: &Config) {
    let level = args.log_level(config.general.verbose);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Build the source and dispatch. Returns the exit code.
async fn run(args: Args, config: Config) -> Result<i32> {
    let source = build_source(&config)?;
    let aggregator = Aggregator::new(config.source.page_size);
    info!(
        "Reading from {} ({} records per page)",
        source.describe(),
        aggregator.page_size()
    );

    let steps = args.drill_steps().map_err(anyhow::Error::msg)?;
    let skipped = if steps.is_empty() {
        run_report(&args, &config, source, &aggregator).await?
    } else {
        run_drill(&config, source, aggregator, &steps).await?
    };

    // Check --max-skipped gate
    if let Some(max_skipped) = config.general.max_skipped {
        if skipped > max_skipped {
            eprintln!(
                "\n⛔ {} record(s) skipped, more than the allowed {}. Failing (exit code 2).",
                skipped, max_skipped
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Aggregate once and write a report. Returns the skipped row count.
async fn run_report(
    args: &Args,
    config: &Config,
    source: Arc<dyn RecordSource>,
    aggregator: &Aggregator,
) -> Result<usize> {
    let start_time = Instant::now();

    let filter = args.filter().map_err(anyhow::Error::msg)?;
    let group_by = args.group_by().map_err(anyhow::Error::msg)?;

    println!("📊 Aggregating emissions by {}", group_by);
    println!("   Source: {}", source.describe());
    if !filter.is_unconstrained() {
        println!("   Filter: {}", filter);
    }

    let spinner = (!args.quiet).then(|| {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            pb.set_style(style);
        }
        pb.set_message("Fetching record pages...");
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    });

    let outcome = aggregator
        .aggregate(source.as_ref(), &filter, group_by)
        .await;

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let outcome = outcome.context("Aggregation failed")?;

    let duration = start_time.elapsed().as_secs_f64();
    let metadata = ReportMetadata {
        source: source.describe(),
        filter,
        grouping: group_by.to_string(),
        generated_at: Utc::now(),
        duration_seconds: duration,
        pages_fetched: outcome.pages_fetched,
        records_folded: outcome.records_folded,
        skipped_count: outcome.skipped_count,
    };

    let report = AggregationReport {
        metadata,
        total: outcome.total,
        shares: shares(&outcome.result),
        result: outcome.result,
    };

    // Generate and save the report
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report, &config.report),
    };

    let output_path = Path::new(&config.general.output);
    std::fs::write(output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    // Print summary
    println!("\n📊 Aggregation Summary:");
    println!("   Total emission: {:.3}", report.total);
    println!("   Groups: {}", report.result.len());
    println!(
        "   Records folded: {} | Skipped: {} | Pages: {}",
        report.metadata.records_folded, report.metadata.skipped_count, report.metadata.pages_fetched
    );
    println!("   Duration: {:.1}s", duration);
    println!("\n✅ Report saved to: {}", output_path.display());

    Ok(report.metadata.skipped_count)
}

/// Replay a drill-down session, printing each view. Returns the most
/// rows skipped by any view's backing aggregation.
async fn run_drill(
    config: &Config,
    source: Arc<dyn RecordSource>,
    aggregator: Aggregator,
    steps: &[DrillStep],
) -> Result<usize> {
    let top_n = config.report.top_n;
    let mut session = DrillSession::new(source, aggregator, &[Axis::Space, Axis::Time]);
    let mut skipped = 0;

    println!("🧭 Replaying {} drill step(s)\n", steps.len());

    session.settle().await;
    retry_failed_axes(&mut session).await;
    skipped = skipped.max(max_skipped(&session));
    println!("{}", report::render_navigation(session.navigator(), top_n));

    for (i, step) in steps.iter().enumerate() {
        let before = session.state().clone();
        let after = session.step(step).await;
        retry_failed_axes(&mut session).await;
        skipped = skipped.max(max_skipped(&session));

        println!("── Step {}: {}", i + 1, step);
        if after == before {
            println!("   (view unchanged)");
        }
        println!("{}", report::render_navigation(session.navigator(), top_n));
    }

    let nav = session.navigator();
    let failed: Vec<Axis> = [Axis::Space, Axis::Time]
        .into_iter()
        .filter(|axis| matches!(nav.status(*axis), AxisStatus::Failed(_)))
        .collect();
    if !failed.is_empty() {
        bail!(
            "Data for {} could not be loaded",
            failed
                .iter()
                .map(|axis| axis.to_string())
                .collect::<Vec<_>>()
                .join(" and ")
        );
    }

    println!(
        "✅ Session finished at {:?} / {:?} granularity",
        nav.state().spatial_depth(),
        nav.state().time_granularity()
    );
    debug!("Final filter: {}", nav.current_filter());

    Ok(skipped)
}

/// Give each failed axis one manual retry.
async fn retry_failed_axes(session: &mut DrillSession) {
    for axis in [Axis::Space, Axis::Time] {
        let status = session.navigator().status(axis).clone();
        if let AxisStatus::Failed(reason) = status {
            warn!("Retrying {} data after failure: {}", axis, reason);
            let report = session.refresh(axis).await;
            debug!(
                "Retry settled: {} applied, {} stale",
                report.applied, report.stale
            );
        }
    }
}

fn max_skipped(session: &DrillSession) -> usize {
    let nav = session.navigator();
    nav.skipped(Axis::Space).max(nav.skipped(Axis::Time))
}

/// Build the record source named by the configuration.
fn build_source(config: &Config) -> Result<Arc<dyn RecordSource>> {
    if let Some(ref path) = config.source.path {
        let file_source = InMemorySource::from_path(Path::new(path))?;
        if file_source.is_empty() {
            warn!("Record file {} contains no records", path);
        } else {
            debug!("{} record(s) held in memory", file_source.len());
        }
        return Ok(Arc::new(file_source));
    }

    if config.source.url.is_some() {
        let http_source = HttpSource::new(HttpSourceConfig::from(&config.source))
            .context("Failed to create record service client")?;
        return Ok(Arc::new(http_source));
    }

    bail!(
        "No record source configured. Pass --source or --url, or set [source] in {}",
        CONFIG_FILE
    )
}

/// Where the configuration came from, logged once logging is up.
enum ConfigOrigin {
    Explicit(PathBuf),
    DefaultFile,
    Defaults,
    DefaultFileUnreadable(String),
}

impl ConfigOrigin {
    fn log(&self) {
        match self {
            ConfigOrigin::Explicit(path) => info!("Loaded config from: {}", path.display()),
            ConfigOrigin::DefaultFile => info!("Loaded default config from {}", CONFIG_FILE),
            ConfigOrigin::Defaults => debug!("No config file found, using defaults"),
            ConfigOrigin::DefaultFileUnreadable(reason) => {
                warn!("Failed to load config: {}", reason)
            }
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigOrigin)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigOrigin::Explicit(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigOrigin::DefaultFile)),
        Ok(None) => Ok((Config::default(), ConfigOrigin::Defaults)),
        Err(e) => Ok((
            Config::default(),
            ConfigOrigin::DefaultFileUnreadable(format!("{:#}", e)),
        )),
    }
}
