//! Rate limiting rules, counters and the per-tag engines that enforce them.

mod backend;
mod clock;
mod counter;
mod limiter;
mod registry;
mod rules;

pub use backend::{build_authority, Authority, Limiter};
pub use clock::{Clock, SystemClock};
pub use counter::{CalendarPeriod, Counter, ResetPolicy};
pub use limiter::LimiterEngine;
pub use registry::Registry;
pub use rules::{parse_duration, Rule, RuleSpec};
