//! Control-flow boundary tracking for lifted methods.
//!
//! A pre-scan finds jump destinations and loops; the [`BoundaryTracker`] then
//! follows the instruction walk and recovers nested if/else/loop regions.

mod null_check;
mod scan;
mod tracker;

pub use null_check::*;
pub use scan::*;
pub use tracker::*;
