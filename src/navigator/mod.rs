//! Dashboard drill-down navigation.
//!
//! A view's position is a [`state::NavigationState`]; the
//! [`DrillNavigator`] moves it on user selections and keeps the data
//! backing it current.

pub mod drill;
pub mod session;
pub mod state;

pub use drill::{AxisStatus, DrillNavigator, SpatialView, TimeView};
pub use session::{DrillSession, DrillStep};
pub use state::Axis;
