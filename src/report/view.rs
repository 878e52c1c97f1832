//! Plain-text rendering of drill-down views.

use crate::aggregation::shares;
use crate::models::AggregationResult;
use crate::navigator::{Axis, AxisStatus, DrillNavigator, SpatialView, TimeView};

/// Render everything a navigator currently shows.
pub fn render_navigation(navigator: &DrillNavigator, top_n: usize) -> String {
    let mut output = String::new();

    output.push_str(&format!("📍 {}\n", navigator.state()));

    if let Some(block) = axis_status_line(navigator, Axis::Space) {
        output.push_str(&block);
    } else if let Some(view) = navigator.spatial_view() {
        output.push_str(&render_spatial_view(&view, top_n));
    }

    if let Some(block) = axis_status_line(navigator, Axis::Time) {
        output.push_str(&block);
    } else if let Some(view) = navigator.time_view() {
        output.push_str(&render_time_view(&view, top_n));
    }

    output
}

/// A one-line notice when an axis has nothing ready to show.
fn axis_status_line(navigator: &DrillNavigator, axis: Axis) -> Option<String> {
    match navigator.status(axis) {
        AxisStatus::Idle => None,
        AxisStatus::Ready => None,
        AxisStatus::Loading => Some(format!("   ⏳ {} data loading\n", axis)),
        AxisStatus::Failed(reason) => Some(format!("   ⚠️  {} data unavailable: {}\n", axis, reason)),
    }
}

pub fn render_spatial_view(view: &SpatialView<'_>, top_n: usize) -> String {
    match view {
        SpatialView::Campuses(totals) => render_table("Campus", totals, None, top_n),
        SpatialView::Buildings { campus, totals } => {
            render_table(&format!("Building ({})", campus), totals, None, top_n)
        }
        SpatialView::Rooms {
            campus,
            building,
            totals,
            highlighted,
        } => render_table(
            &format!("Room ({} / {})", campus, building),
            totals,
            *highlighted,
            top_n,
        ),
    }
}

pub fn render_time_view(view: &TimeView<'_>, top_n: usize) -> String {
    match view {
        TimeView::Years(totals) => render_table("Year", totals, None, top_n),
        TimeView::Months { year, totals } => {
            render_table(&format!("Month ({})", year), totals, None, top_n)
        }
    }
}

fn render_table(
    heading: &str,
    totals: &AggregationResult,
    highlighted: Option<&str>,
    top_n: usize,
) -> String {
    let mut table = String::new();

    table.push_str(&format!("\n   {:<24} {:>14} {:>8}\n", heading, "Emission", "Share"));
    table.push_str(&format!("   {}\n", "-".repeat(48)));

    if totals.is_empty() {
        table.push_str("   (no data)\n");
        return table;
    }

    let rows = shares(totals);
    for share in rows.iter().take(top_n) {
        let marker = if highlighted == Some(share.key.as_str()) {
            "▶"
        } else {
            " "
        };
        table.push_str(&format!(
            "  {}{:<24} {:>14.3} {:>7.2}%\n",
            marker, share.key, share.total, share.percent
        ));
    }
    if rows.len() > top_n {
        table.push_str(&format!("   ... {} more\n", rows.len() - top_n));
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{AggregationOutcome, GroupBy};
    use crate::models::GroupTotal;
    use crate::navigator::drill::{AggregationResponse, Selection};

    fn totals(entries: &[(&str, f64)]) -> AggregationResult {
        entries
            .iter()
            .map(|(k, t)| (k.to_string(), GroupTotal::leaf(*t)))
            .collect()
    }

    fn outcome(result: AggregationResult) -> AggregationOutcome {
        AggregationOutcome {
            total: result.sum_of_totals(),
            records_folded: result.len(),
            result,
            skipped_count: 0,
            pages_fetched: 1,
        }
    }

    #[test]
    fn test_render_table_ranks_and_highlights() {
        let result = totals(&[("R1", 1.0), ("R2", 3.0)]);
        let view = SpatialView::Rooms {
            campus: "Ganesha",
            building: "Lab",
            totals: &result,
            highlighted: Some("R1"),
        };
        let text = render_spatial_view(&view, 10);

        assert!(text.contains("Room (Ganesha / Lab)"));
        let r2 = text.find("R2").unwrap();
        let r1 = text.find("▶R1").unwrap();
        assert!(r2 < r1);
        assert!(text.contains("75.00%"));
    }

    #[test]
    fn test_render_table_truncates() {
        let result = totals(&[("2022", 1.0), ("2023", 2.0), ("2024", 3.0)]);
        let text = render_time_view(&TimeView::Years(&result), 2);
        assert!(text.contains("... 1 more"));
        assert!(!text.contains("2022"));
    }

    #[test]
    fn test_render_navigation_shows_loading_and_data() {
        let (mut nav, mut rx) = DrillNavigator::new(&[Axis::Space, Axis::Time]);
        let text = render_navigation(&nav, 10);
        assert!(text.contains("All campuses | year All"));
        assert!(text.contains("space data loading"));

        let space = rx.try_recv().unwrap();
        assert_eq!(space.group_by, GroupBy::One(crate::models::Dimension::Campus));
        nav.apply(AggregationResponse {
            tag: space.tag,
            outcome: Ok(outcome(totals(&[("Ganesha", 4.0)]))),
        });

        let text = render_navigation(&nav, 10);
        assert!(text.contains("Campus"));
        assert!(text.contains("Ganesha"));
        assert!(text.contains("time data loading"));

        let state = nav.select(Selection::Space("Ganesha".to_string()));
        assert_eq!(state.selected_campus(), Some("Ganesha"));
    }
}
