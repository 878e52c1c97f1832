//! Drives a [`DrillNavigator`] against a record source.
//!
//! The navigator only emits requests; the session runs them through the
//! aggregator and feeds the responses back, the way a dashboard view would.

use crate::aggregation::Aggregator;
use crate::navigator::drill::{
    AggregationRequest, AggregationResponse, ApplyStatus, DrillNavigator, Selection,
};
use crate::navigator::state::{Axis, NavigationState};
use crate::source::RecordSource;
use futures::future::join_all;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// One scripted user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrillStep {
    Select(Selection),
    /// Back out one level, spatial axis first.
    Back,
    BackAxis(Axis),
}

impl FromStr for DrillStep {
    type Err = String;

    /// Parses `campus:NAME`, `building:NAME`, `room:NAME`, `year:YYYY`,
    /// `back`, `back:space` and `back:time`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("back") {
            return Ok(DrillStep::Back);
        }

        let (kind, value) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid drill step '{}' (expected KIND:VALUE or back)", s))?;
        let value = value.trim();

        match kind.trim().to_lowercase().as_str() {
            "back" => match value.to_lowercase().as_str() {
                "space" => Ok(DrillStep::BackAxis(Axis::Space)),
                "time" => Ok(DrillStep::BackAxis(Axis::Time)),
                other => Err(format!("Unknown axis '{}' (expected space or time)", other)),
            },
            "campus" | "building" | "room" | "space" if !value.is_empty() => {
                Ok(DrillStep::Select(Selection::Space(value.to_string())))
            }
            "year" => value
                .parse::<i32>()
                .map(|year| DrillStep::Select(Selection::Year(year)))
                .map_err(|_| format!("Invalid year '{}' in drill step", value)),
            _ => Err(format!("Invalid drill step '{}'", s)),
        }
    }
}

impl fmt::Display for DrillStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrillStep::Select(Selection::Space(name)) => write!(f, "select {}", name),
            DrillStep::Select(Selection::Year(year)) => write!(f, "select year {}", year),
            DrillStep::Back => f.write_str("back"),
            DrillStep::BackAxis(axis) => write!(f, "back ({})", axis),
        }
    }
}

/// Counts from one [`DrillSession::settle`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettleReport {
    pub applied: usize,
    pub stale: usize,
}

/// A navigator paired with the source its requests run against.
pub struct DrillSession {
    navigator: DrillNavigator,
    requests: mpsc::UnboundedReceiver<AggregationRequest>,
    source: Arc<dyn RecordSource>,
    aggregator: Aggregator,
}

impl DrillSession {
    pub fn new(source: Arc<dyn RecordSource>, aggregator: Aggregator, axes: &[Axis]) -> Self {
        let (navigator, requests) = DrillNavigator::new(axes);
        Self {
            navigator,
            requests,
            source,
            aggregator,
        }
    }

    pub fn navigator(&self) -> &DrillNavigator {
        &self.navigator
    }

    pub fn state(&self) -> &NavigationState {
        self.navigator.state()
    }

    /// Run every outstanding request and apply the responses.
    ///
    /// Requests queued together run concurrently; superseded ones are
    /// still executed but their responses are dropped by the navigator.
    pub async fn settle(&mut self) -> SettleReport {
        let mut report = SettleReport::default();

        loop {
            let mut batch = Vec::new();
            while let Ok(request) = self.requests.try_recv() {
                batch.push(request);
            }
            if batch.is_empty() {
                break;
            }

            debug!("Running {} aggregation request(s)", batch.len());
            let source = &self.source;
            let aggregator = &self.aggregator;
            let responses = join_all(batch.into_iter().map(|request| async move {
                let outcome = aggregator
                    .aggregate(source.as_ref(), &request.filter, request.group_by)
                    .await;
                AggregationResponse {
                    tag: request.tag,
                    outcome,
                }
            }))
            .await;

            for response in responses {
                match self.navigator.apply(response) {
                    ApplyStatus::Applied => report.applied += 1,
                    ApplyStatus::Stale => report.stale += 1,
                }
            }
        }

        report
    }

    /// Perform one action without waiting for its data.
    pub fn perform(&mut self, step: &DrillStep) -> NavigationState {
        info!("Drill step: {}", step);
        match step {
            DrillStep::Select(selection) => self.navigator.select(selection.clone()),
            DrillStep::Back => self.navigator.back(),
            DrillStep::BackAxis(axis) => self.navigator.back_axis(*axis),
        }
    }

    /// Perform one action and wait for the data it needs.
    pub async fn step(&mut self, step: &DrillStep) -> NavigationState {
        self.perform(step);
        self.settle().await;
        self.navigator.state().clone()
    }

    /// Re-issue the request for `axis` and wait for it.
    pub async fn refresh(&mut self, axis: Axis) -> SettleReport {
        self.navigator.refresh(axis);
        self.settle().await
    }
}
