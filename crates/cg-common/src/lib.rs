//! Shared building blocks for the CourseGate crates: logging setup and the
//! clock abstraction every time-windowed check reads from.

pub mod clock;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
