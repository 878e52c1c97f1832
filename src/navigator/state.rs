//! Navigation state value object.
//!
//! The dashboard position is the product of two independent axes: a
//! spatial drill (campus, building, room) and a time drill (year, month).

use crate::aggregation::GroupBy;
use crate::models::{Dimension, DimensionFilter, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two independent drill axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Space,
    Time,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Space => f.write_str("space"),
            Axis::Time => f.write_str("time"),
        }
    }
}

/// Position on the spatial axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum SpatialLevel {
    /// Totals per campus.
    #[default]
    CampusOverview,
    /// Totals per building of one campus.
    BuildingOverview { campus: String },
    /// Totals per room of one building, optionally with one room highlighted.
    RoomOverview {
        campus: String,
        building: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
}

/// Position on the time axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum TimeLevel {
    /// Totals per year.
    #[default]
    YearOverview,
    /// Totals per month of one year.
    MonthOverview { year: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpatialDepth {
    Campus,
    Building,
    Room,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeGranularity {
    Year,
    Month,
}

/// What the user is currently looking at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NavigationState {
    pub space: SpatialLevel,
    pub time: TimeLevel,
}

impl NavigationState {
    /// Campus overview by year: the coarsest view.
    pub fn initial() -> Self {
        Self::default()
    }

    pub fn spatial_depth(&self) -> SpatialDepth {
        match self.space {
            SpatialLevel::CampusOverview => SpatialDepth::Campus,
            SpatialLevel::BuildingOverview { .. } => SpatialDepth::Building,
            SpatialLevel::RoomOverview { .. } => SpatialDepth::Room,
        }
    }

    pub fn time_granularity(&self) -> TimeGranularity {
        match self.time {
            TimeLevel::YearOverview => TimeGranularity::Year,
            TimeLevel::MonthOverview { .. } => TimeGranularity::Month,
        }
    }

    /// The open year, or `All` at year granularity.
    pub fn selected_year(&self) -> Selector<i32> {
        match self.time {
            TimeLevel::YearOverview => Selector::All,
            TimeLevel::MonthOverview { year } => Selector::Only(year),
        }
    }

    pub fn selected_campus(&self) -> Option<&str> {
        match &self.space {
            SpatialLevel::CampusOverview => None,
            SpatialLevel::BuildingOverview { campus } | SpatialLevel::RoomOverview { campus, .. } => {
                Some(campus.as_str())
            }
        }
    }

    pub fn selected_building(&self) -> Option<&str> {
        match &self.space {
            SpatialLevel::RoomOverview { building, .. } => Some(building.as_str()),
            _ => None,
        }
    }

    pub fn selected_room(&self) -> Option<&str> {
        match &self.space {
            SpatialLevel::RoomOverview { room, .. } => room.as_deref(),
            _ => None,
        }
    }

    /// Filter describing everything currently on screen.
    pub fn current_filter(&self) -> DimensionFilter {
        let mut filter = DimensionFilter {
            year: self.selected_year(),
            ..DimensionFilter::all()
        };
        if let Some(campus) = self.selected_campus() {
            filter = filter.with_campus(campus);
        }
        if let Some(building) = self.selected_building() {
            filter = filter.with_building(building);
        }
        if let Some(room) = self.selected_room() {
            filter = filter.with_room(room);
        }
        filter
    }

    /// The aggregation backing the given axis at its current level.
    ///
    /// Room totals are the nested part of the building-level result, so
    /// both spatial levels below the campus share one request.
    pub fn data_request(&self, axis: Axis) -> (DimensionFilter, GroupBy) {
        match axis {
            Axis::Space => match &self.space {
                SpatialLevel::CampusOverview => {
                    (DimensionFilter::all(), GroupBy::One(Dimension::Campus))
                }
                SpatialLevel::BuildingOverview { campus }
                | SpatialLevel::RoomOverview { campus, .. } => (
                    DimensionFilter::all().with_campus(campus.clone()),
                    GroupBy::Nested(Dimension::Building, Dimension::Room),
                ),
            },
            Axis::Time => match self.time {
                TimeLevel::YearOverview => (DimensionFilter::all(), GroupBy::One(Dimension::Year)),
                TimeLevel::MonthOverview { year } => (
                    DimensionFilter::all().with_year(year),
                    GroupBy::One(Dimension::Month),
                ),
            },
        }
    }

    /// Breadcrumb trail, outermost first.
    pub fn breadcrumbs(&self) -> Vec<String> {
        let mut crumbs = vec!["All campuses".to_string()];
        if let Some(campus) = self.selected_campus() {
            crumbs.push(campus.to_string());
        }
        if let Some(building) = self.selected_building() {
            crumbs.push(building.to_string());
        }
        if let Some(room) = self.selected_room() {
            crumbs.push(room.to_string());
        }
        crumbs
    }
}

impl fmt::Display for NavigationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | year {}", self.breadcrumbs().join(" > "), self.selected_year())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = NavigationState::initial();
        assert_eq!(state.spatial_depth(), SpatialDepth::Campus);
        assert_eq!(state.time_granularity(), TimeGranularity::Year);
        assert_eq!(state.selected_year(), Selector::All);
        assert!(state.selected_campus().is_none());
        assert!(state.current_filter().is_unconstrained());
    }

    #[test]
    fn test_current_filter_combines_axes() {
        let state = NavigationState {
            space: SpatialLevel::RoomOverview {
                campus: "Ganesha".to_string(),
                building: "Labtek V".to_string(),
                room: Some("R101".to_string()),
            },
            time: TimeLevel::MonthOverview { year: 2024 },
        };

        let filter = state.current_filter();
        assert_eq!(filter.campus, Selector::Only("Ganesha".to_string()));
        assert_eq!(filter.building, Selector::Only("Labtek V".to_string()));
        assert_eq!(filter.room, Selector::Only("R101".to_string()));
        assert_eq!(filter.year, Selector::Only(2024));
    }

    #[test]
    fn test_room_level_shares_building_request() {
        let building = NavigationState {
            space: SpatialLevel::BuildingOverview {
                campus: "Ganesha".to_string(),
            },
            ..NavigationState::initial()
        };
        let room = NavigationState {
            space: SpatialLevel::RoomOverview {
                campus: "Ganesha".to_string(),
                building: "Lab".to_string(),
                room: None,
            },
            ..NavigationState::initial()
        };

        assert_eq!(building.data_request(Axis::Space), room.data_request(Axis::Space));
        assert_ne!(
            building.data_request(Axis::Space),
            NavigationState::initial().data_request(Axis::Space)
        );
    }

    #[test]
    fn test_display_breadcrumbs() {
        let state = NavigationState {
            space: SpatialLevel::BuildingOverview {
                campus: "Ganesha".to_string(),
            },
            time: TimeLevel::MonthOverview { year: 2023 },
        };
        assert_eq!(state.to_string(), "All campuses > Ganesha | year 2023");
    }
}
