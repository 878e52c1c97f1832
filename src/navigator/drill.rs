//! Drill-down state machine.
//!
//! The navigator owns the [`NavigationState`] of one view together with the
//! aggregation results currently backing it. Selections and back-outs are
//! synchronous; any data they need is requested through a channel and comes
//! back through [`DrillNavigator::apply`], where responses issued for a
//! superseded state are dropped.

use crate::aggregation::{AggregateError, AggregationOutcome, GroupBy};
use crate::models::{AggregationResult, DimensionFilter};
use crate::navigator::state::{Axis, NavigationState, SpatialLevel, TimeLevel};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A click on a chart element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// A campus, building or room name, depending on the spatial level.
    Space(String),
    Year(i32),
}

impl Selection {
    pub fn axis(&self) -> Axis {
        match self {
            Selection::Space(_) => Axis::Space,
            Selection::Year(_) => Axis::Time,
        }
    }

    fn value(&self) -> String {
        match self {
            Selection::Space(name) => name.clone(),
            Selection::Year(year) => year.to_string(),
        }
    }
}

/// Why a selection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The view does not drive this axis.
    AxisNotDriven,
    /// No result has been loaded for the current level yet.
    NotLoaded,
    /// The value is not a group of the most recent result.
    UnknownValue,
    /// The axis cannot drill any deeper.
    DeepestLevel,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::AxisNotDriven => f.write_str("axis not driven by this view"),
            RejectReason::NotLoaded => f.write_str("no data loaded for the current level"),
            RejectReason::UnknownValue => f.write_str("value not present in the current data"),
            RejectReason::DeepestLevel => f.write_str("already at the deepest level"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("invalid {axis} selection '{value}': {reason}")]
    InvalidSelection {
        axis: Axis,
        value: String,
        reason: RejectReason,
    },
}

/// Identifies the navigation state a request was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTag {
    pub axis: Axis,
    /// Monotonic per axis; only the latest issued sequence can be applied.
    pub sequence: u64,
    pub state: NavigationState,
}

/// An aggregation the view layer should run on the navigator's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationRequest {
    pub tag: RequestTag,
    pub filter: DimensionFilter,
    pub group_by: GroupBy,
}

/// The result of running an [`AggregationRequest`].
#[derive(Debug)]
pub struct AggregationResponse {
    pub tag: RequestTag,
    pub outcome: Result<AggregationOutcome, AggregateError>,
}

/// Whether a response reached the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    Applied,
    Stale,
}

/// Loading status of one axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxisStatus {
    Idle,
    Loading,
    Ready,
    /// The last request failed; the view may offer a retry.
    Failed(String),
}

#[derive(Debug)]
struct AxisSlot {
    driven: bool,
    sequence: u64,
    pending: Option<u64>,
    status: AxisStatus,
    skipped: usize,
}

impl AxisSlot {
    fn new(driven: bool) -> Self {
        Self {
            driven,
            sequence: 0,
            pending: None,
            status: AxisStatus::Idle,
            skipped: 0,
        }
    }
}

/// Spatial data currently on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpatialView<'a> {
    Campuses(&'a AggregationResult),
    Buildings {
        campus: &'a str,
        totals: &'a AggregationResult,
    },
    Rooms {
        campus: &'a str,
        building: &'a str,
        totals: &'a AggregationResult,
        highlighted: Option<&'a str>,
    },
}

/// Time data currently on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeView<'a> {
    Years(&'a AggregationResult),
    Months {
        year: i32,
        totals: &'a AggregationResult,
    },
}

/// Finite state machine over one view's [`NavigationState`].
pub struct DrillNavigator {
    state: NavigationState,
    space: AxisSlot,
    time: AxisSlot,
    campus_totals: Option<AggregationResult>,
    building_totals: Option<AggregationResult>,
    year_totals: Option<AggregationResult>,
    month_totals: Option<AggregationResult>,
    requests: mpsc::UnboundedSender<AggregationRequest>,
}

impl DrillNavigator {
    /// Create a navigator at the initial state driving the given axes.
    ///
    /// The initial aggregations are issued immediately on the returned
    /// receiver.
    pub fn new(axes: &[Axis]) -> (Self, mpsc::UnboundedReceiver<AggregationRequest>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        let mut navigator = Self {
            state: NavigationState::initial(),
            space: AxisSlot::new(axes.contains(&Axis::Space)),
            time: AxisSlot::new(axes.contains(&Axis::Time)),
            campus_totals: None,
            building_totals: None,
            year_totals: None,
            month_totals: None,
            requests,
        };

        navigator.issue(Axis::Space);
        navigator.issue(Axis::Time);

        (navigator, receiver)
    }

    pub fn state(&self) -> &NavigationState {
        &self.state
    }

    pub fn current_filter(&self) -> DimensionFilter {
        self.state.current_filter()
    }

    pub fn status(&self, axis: Axis) -> &AxisStatus {
        &self.slot(axis).status
    }

    /// Rows excluded from the most recent result on this axis.
    pub fn skipped(&self, axis: Axis) -> usize {
        self.slot(axis).skipped
    }

    fn slot(&self, axis: Axis) -> &AxisSlot {
        match axis {
            Axis::Space => &self.space,
            Axis::Time => &self.time,
        }
    }

    fn slot_mut(&mut self, axis: Axis) -> &mut AxisSlot {
        match axis {
            Axis::Space => &mut self.space,
            Axis::Time => &mut self.time,
        }
    }

    /// Send the request backing `axis` at the current state.
    fn issue(&mut self, axis: Axis) {
        if !self.slot(axis).driven {
            return;
        }

        let (filter, group_by) = self.state.data_request(axis);
        let state = self.state.clone();
        let slot = self.slot_mut(axis);
        slot.sequence += 1;
        slot.pending = Some(slot.sequence);
        slot.status = AxisStatus::Loading;

        let request = AggregationRequest {
            tag: RequestTag {
                axis,
                sequence: slot.sequence,
                state,
            },
            filter,
            group_by,
        };
        debug!(
            "Issuing {} request #{} ({} by {})",
            axis, request.tag.sequence, request.filter, request.group_by
        );

        if self.requests.send(request).is_err() {
            warn!("Request channel closed; {} data will not load", axis);
            let slot = self.slot_mut(axis);
            slot.pending = None;
            slot.status = AxisStatus::Failed("request channel closed".to_string());
        }
    }

    /// Forget any in-flight request and show already-loaded data.
    fn settle_without_fetch(&mut self, axis: Axis) {
        let slot = self.slot_mut(axis);
        slot.pending = None;
        slot.status = AxisStatus::Ready;
    }

    /// Apply a selection, leaving the state unchanged if it is rejected.
    pub fn select(&mut self, selection: Selection) -> NavigationState {
        if let Err(e) = self.try_select(selection) {
            warn!("{}", e);
        }
        self.state.clone()
    }

    /// Apply a selection, reporting why it was rejected.
    pub fn try_select(&mut self, selection: Selection) -> Result<NavigationState, NavigationError> {
        let axis = selection.axis();
        let reject = |reason| NavigationError::InvalidSelection {
            axis,
            value: selection.value(),
            reason,
        };

        if !self.slot(axis).driven {
            return Err(reject(RejectReason::AxisNotDriven));
        }

        match (&selection, &self.state.space, &self.state.time) {
            (Selection::Space(campus), SpatialLevel::CampusOverview, _) => {
                check_membership(self.campus_totals.as_ref(), campus).map_err(reject)?;
                self.state.space = SpatialLevel::BuildingOverview {
                    campus: campus.clone(),
                };
                self.building_totals = None;
                self.issue(Axis::Space);
            }
            (Selection::Space(building), SpatialLevel::BuildingOverview { campus }, _) => {
                check_membership(self.building_totals.as_ref(), building).map_err(reject)?;
                self.state.space = SpatialLevel::RoomOverview {
                    campus: campus.clone(),
                    building: building.clone(),
                    room: None,
                };
            }
            (
                Selection::Space(room),
                SpatialLevel::RoomOverview {
                    campus, building, ..
                },
                _,
            ) => {
                let rooms = self
                    .building_totals
                    .as_ref()
                    .and_then(|totals| totals.get(building))
                    .and_then(|group| group.children.as_ref());
                check_membership(rooms, room).map_err(reject)?;
                self.state.space = SpatialLevel::RoomOverview {
                    campus: campus.clone(),
                    building: building.clone(),
                    room: Some(room.clone()),
                };
            }
            (Selection::Year(year), _, TimeLevel::YearOverview) => {
                check_membership(self.year_totals.as_ref(), &year.to_string()).map_err(reject)?;
                self.state.time = TimeLevel::MonthOverview { year: *year };
                self.month_totals = None;
                self.issue(Axis::Time);
            }
            (Selection::Year(_), _, TimeLevel::MonthOverview { .. }) => {
                return Err(reject(RejectReason::DeepestLevel));
            }
        }

        info!("Navigated to {}", self.state);
        Ok(self.state.clone())
    }

    /// Back out one level, spatial axis first.
    pub fn back(&mut self) -> NavigationState {
        let spatial_open = self.space.driven && self.state.space != SpatialLevel::CampusOverview;
        if spatial_open {
            self.back_axis(Axis::Space)
        } else {
            self.back_axis(Axis::Time)
        }
    }

    /// Back out one level on a specific axis; a no-op at the top level.
    pub fn back_axis(&mut self, axis: Axis) -> NavigationState {
        match axis {
            Axis::Space => match self.state.space.clone() {
                SpatialLevel::CampusOverview => {}
                SpatialLevel::BuildingOverview { .. } => {
                    self.state.space = SpatialLevel::CampusOverview;
                    self.building_totals = None;
                    if self.campus_totals.is_some() {
                        self.settle_without_fetch(Axis::Space);
                    } else {
                        self.issue(Axis::Space);
                    }
                }
                SpatialLevel::RoomOverview { campus, .. } => {
                    self.state.space = SpatialLevel::BuildingOverview { campus };
                    self.settle_without_fetch(Axis::Space);
                }
            },
            Axis::Time => match self.state.time {
                TimeLevel::YearOverview => {}
                TimeLevel::MonthOverview { .. } => {
                    self.state.time = TimeLevel::YearOverview;
                    self.month_totals = None;
                    self.issue(Axis::Time);
                }
            },
        }

        debug!("Backed out on {} axis to {}", axis, self.state);
        self.state.clone()
    }

    /// Re-issue the request backing `axis`, e.g. after a failure.
    pub fn refresh(&mut self, axis: Axis) {
        self.issue(axis);
    }

    /// Apply a response if it still belongs to the current state.
    pub fn apply(&mut self, response: AggregationResponse) -> ApplyStatus {
        let AggregationResponse { tag, outcome } = response;
        let axis = tag.axis;

        let current = self.slot(axis).pending == Some(tag.sequence)
            && tag.state.data_request(axis) == self.state.data_request(axis);
        if !current {
            debug!(
                "Dropping stale {} response #{} issued for {}",
                axis, tag.sequence, tag.state
            );
            return ApplyStatus::Stale;
        }

        match outcome {
            Ok(outcome) => {
                let slot = self.slot_mut(axis);
                slot.pending = None;
                slot.status = AxisStatus::Ready;
                slot.skipped = outcome.skipped_count;
                if outcome.skipped_count > 0 {
                    info!(
                        "{} record(s) excluded from the {} view",
                        outcome.skipped_count, axis
                    );
                }
                self.store(axis, outcome.result);
            }
            Err(e) => {
                warn!("Failed to load {} data: {}", axis, e);
                let slot = self.slot_mut(axis);
                slot.pending = None;
                slot.status = AxisStatus::Failed(e.to_string());
            }
        }

        ApplyStatus::Applied
    }

    fn store(&mut self, axis: Axis, result: AggregationResult) {
        match (axis, &self.state.space, &self.state.time) {
            (Axis::Space, SpatialLevel::CampusOverview, _) => self.campus_totals = Some(result),
            (Axis::Space, _, _) => self.building_totals = Some(result),
            (Axis::Time, _, TimeLevel::YearOverview) => self.year_totals = Some(result),
            (Axis::Time, _, TimeLevel::MonthOverview { .. }) => self.month_totals = Some(result),
        }
    }

    /// Spatial data for the current level, if loaded.
    pub fn spatial_view(&self) -> Option<SpatialView<'_>> {
        match &self.state.space {
            SpatialLevel::CampusOverview => self.campus_totals.as_ref().map(SpatialView::Campuses),
            SpatialLevel::BuildingOverview { campus } => {
                self.building_totals
                    .as_ref()
                    .map(|totals| SpatialView::Buildings { campus, totals })
            }
            SpatialLevel::RoomOverview {
                campus,
                building,
                room,
            } => self
                .building_totals
                .as_ref()
                .and_then(|totals| totals.get(building))
                .and_then(|group| group.children.as_ref())
                .map(|totals| SpatialView::Rooms {
                    campus,
                    building,
                    totals,
                    highlighted: room.as_deref(),
                }),
        }
    }

    /// Time data for the current level, if loaded.
    pub fn time_view(&self) -> Option<TimeView<'_>> {
        match self.state.time {
            TimeLevel::YearOverview => self.year_totals.as_ref().map(TimeView::Years),
            TimeLevel::MonthOverview { year } => self
                .month_totals
                .as_ref()
                .map(|totals| TimeView::Months { year, totals }),
        }
    }
}

fn check_membership(totals: Option<&AggregationResult>, value: &str) -> Result<(), RejectReason> {
    match totals {
        None => Err(RejectReason::NotLoaded),
        Some(totals) if totals.contains_key(value) => Ok(()),
        Some(_) => Err(RejectReason::UnknownValue),
    }
}
