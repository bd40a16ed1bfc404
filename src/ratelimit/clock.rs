//! Time sources for window evaluation.
//!
//! Calendar windows need wall-clock fields (hour of day, day of month), so the
//! clock hands out local date-times rather than monotonic instants.

use chrono::{DateTime, Local};
use std::fmt::Debug;

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    /// Get the current local time.
    fn now(&self) -> DateTime<Local>;
}

/// System clock backed by `Local::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}
