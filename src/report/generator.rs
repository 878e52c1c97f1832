//! Markdown report generation.
//!
//! This module renders aggregation reports as Markdown or JSON.

use crate::aggregation::{ranked, top_groups};
use crate::config::ReportConfig;
use crate::models::{AggregationReport, AggregationResult, GroupTotal, ReportMetadata, Share};
use anyhow::Result;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &AggregationReport, config: &ReportConfig) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# CarbonLens Emission Report\n\n");

    // Metadata section
    output.push_str(&generate_metadata_section(&report.metadata));

    // Summary section
    output.push_str(&generate_summary_section(report));

    // Breakdown
    output.push_str(&generate_breakdown_section(&report.result, config));

    // Shares
    if config.include_shares {
        output.push_str(&generate_shares_section(&report.shares));
    }

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Source:** {}\n", metadata.source));
    section.push_str(&format!("- **Filter:** {}\n", metadata.filter));
    section.push_str(&format!("- **Grouping:** `{}`\n", metadata.grouping));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Pages Fetched:** {}\n", metadata.pages_fetched));
    section.push_str(&format!(
        "- **Records Folded:** {}\n",
        metadata.records_folded
    ));
    if metadata.skipped_count > 0 {
        section.push_str(&format!(
            "- **Records Skipped:** {}\n",
            metadata.skipped_count
        ));
    }
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the summary section.
fn generate_summary_section(report: &AggregationReport) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Total Emission | Groups | Skipped |\n");
    section.push_str("|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| **{:.3}** | {} | {} |\n\n",
        report.total,
        report.result.len(),
        report.metadata.skipped_count
    ));

    if let Some((key, group)) = ranked(&report.result).first() {
        section.push_str(&format!(
            "Largest contributor: **{}** ({:.3})\n\n",
            key, group.total
        ));
    }

    section
}

/// Generate the ranked breakdown section.
fn generate_breakdown_section(result: &AggregationResult, config: &ReportConfig) -> String {
    let mut section = String::new();

    section.push_str("## Breakdown\n\n");

    if result.is_empty() {
        section.push_str("No emission records matched the filter.\n\n");
        return section;
    }

    section.push_str("| Group | Total |\n");
    section.push_str("|:---|---:|\n");

    let groups = top_groups(result, config.top_n);
    for (key, group) in &groups {
        section.push_str(&format!("| {} | {:.3} |\n", key, group.total));
    }
    if result.len() > groups.len() {
        section.push_str(&format!(
            "\n*{} smaller group(s) not shown.*\n",
            result.len() - groups.len()
        ));
    }
    section.push('\n');

    if config.include_children {
        for (key, group) in &groups {
            section.push_str(&generate_children_block(key, group, config.top_n));
        }
    }

    section
}

/// Generate the nested breakdown of one group.
fn generate_children_block(key: &str, group: &GroupTotal, top_n: usize) -> String {
    let Some(ref children) = group.children else {
        return String::new();
    };

    let mut block = String::new();

    block.push_str(&format!("### {} ({:.3})\n\n", key, group.total));
    block.push_str("| Group | Total |\n");
    block.push_str("|:---|---:|\n");
    for (child, child_group) in top_groups(children, top_n) {
        block.push_str(&format!("| {} | {:.3} |\n", child, child_group.total));
    }
    if let Some(unattributed) = group.unattributed {
        block.push_str(&format!("| *(unattributed)* | {:.3} |\n", unattributed));
    }
    block.push('\n');

    block
}

/// Generate the shares section.
fn generate_shares_section(shares: &[Share]) -> String {
    if shares.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Shares\n\n");
    section.push_str("| Group | Total | Share |\n");
    section.push_str("|:---|---:|---:|\n");
    for share in shares {
        section.push_str(&format!(
            "| {} | {:.3} | {:.2}% |\n",
            share.key, share.total, share.percent
        ));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by CarbonLens v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &AggregationReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
