//! Core limiter engine for a single tag.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::counter::Counter;
use super::rules::{Rule, RuleSpec};
use crate::error::RuleError;

/// State guarded by the engine lock.
#[derive(Debug, Default)]
struct EngineState {
    /// The rule for this tag
    rule: Rule,
    /// Counters indexed by caller key
    counters: HashMap<String, Counter>,
}

/// The authoritative limiter for one tag.
///
/// A single lock guards the rule and every counter. [`increment`] and
/// [`admit`] take it exclusively; [`allow`] only needs shared access.
///
/// `allow` followed by `increment` is not atomic: concurrent callers can all
/// observe `true` before any of their increments land. Use [`admit`] when the
/// limit must hold under contention.
///
/// [`increment`]: LimiterEngine::increment
/// [`allow`]: LimiterEngine::allow
/// [`admit`]: LimiterEngine::admit
#[derive(Debug)]
pub struct LimiterEngine {
    tag: String,
    state: RwLock<EngineState>,
    clock: Arc<dyn Clock>,
}

impl LimiterEngine {
    /// Create an engine with an empty rule, using the system clock.
    pub fn new(tag: impl Into<String>) -> Self {
        Self::with_clock(tag, Arc::new(SystemClock::new()))
    }

    /// Create an engine with an empty rule and a custom clock.
    pub fn with_clock(tag: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tag: tag.into(),
            state: RwLock::new(EngineState::default()),
            clock,
        }
    }

    /// Get the tag this engine is responsible for.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Parse `spec` and merge it into the rule.
    ///
    /// The string is validated as a whole before anything is applied, so a
    /// rejected spec leaves the rule as it was.
    pub fn set_rules(&self, spec: &str) -> Result<(), RuleError> {
        let parsed: RuleSpec = spec.parse()?;

        let mut state = self.state.write();
        state.rule.apply(parsed);

        debug!(
            tag = %self.tag,
            max_count = ?state.rule.max_count(),
            reset = ?state.rule.reset_policy(),
            active = state.rule.is_active(),
            "Rules updated"
        );
        Ok(())
    }

    /// Count one request for `key`, starting a new window if the current one
    /// is over.
    ///
    /// Does nothing while the rule is inactive.
    pub fn increment(&self, key: &str) {
        let now = self.clock.now();
        let mut state = self.state.write();
        let EngineState { rule, counters } = &mut *state;

        let Some((_, policy)) = rule.enforced() else {
            trace!(tag = %self.tag, key = %key, "Rule inactive, increment ignored");
            return;
        };

        let count = counters
            .entry(key.to_string())
            .or_insert_with(|| Counter::new(now))
            .increment(policy, now);

        trace!(tag = %self.tag, key = %key, count = count, "Counter incremented");
    }

    /// Check whether `key` may proceed, without recording anything.
    ///
    /// Keys that were never incremented are always allowed, as are keys whose
    /// window would reset on the next increment. Otherwise the key is allowed
    /// while its count is at most the limit.
    pub fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();
        let state = self.state.read();

        let Some((max_count, policy)) = state.rule.enforced() else {
            return true;
        };

        let allowed = match state.counters.get(key) {
            Some(counter) => counter.allows(max_count, policy, now),
            None => true,
        };

        trace!(tag = %self.tag, key = %key, allowed = allowed, "Checked allowance");
        allowed
    }

    /// Count one request for `key` and decide on it under a single lock.
    ///
    /// Admits at most `max_count` requests per window, no matter how many
    /// callers race. Rejected requests are still counted.
    pub fn admit(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state.write();
        let EngineState { rule, counters } = &mut *state;

        let Some((max_count, policy)) = rule.enforced() else {
            return true;
        };

        let count = counters
            .entry(key.to_string())
            .or_insert_with(|| Counter::new(now))
            .increment(policy, now);

        if count <= max_count {
            true
        } else {
            debug!(
                tag = %self.tag,
                key = %key,
                count = count,
                max_count = max_count,
                "Rate limit exceeded"
            );
            false
        }
    }

    /// Get a copy of the current rule.
    pub fn rule(&self) -> Rule {
        self.state.read().rule.clone()
    }

    /// Get a copy of the counter for `key`, if one exists.
    pub fn counter(&self, key: &str) -> Option<Counter> {
        self.state.read().counters.get(key).cloned()
    }

    /// Get the number of keys with a counter.
    pub fn key_count(&self) -> usize {
        self.state.read().counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::mock::MockClock;
    use chrono::{Local, TimeZone};
    use std::time::Duration;

    fn engine_at(rule: &str, clock: &MockClock) -> LimiterEngine {
        let engine = LimiterEngine::with_clock("test", Arc::new(clock.clone()));
        engine.set_rules(rule).unwrap();
        engine
    }

    fn mid_morning() -> MockClock {
        MockClock::new(Local.with_ymd_and_hms(2024, 6, 15, 10, 20, 0).unwrap())
    }

    #[test]
    fn test_engine_creation() {
        let engine = LimiterEngine::new("api");
        assert_eq!(engine.tag(), "api");
        assert_eq!(engine.key_count(), 0);
        assert!(!engine.rule().is_active());
    }

    #[test]
    fn test_unknown_key_always_allowed() {
        let clock = mid_morning();
        let engine = engine_at("limit=1;reset=1h", &clock);

        assert!(engine.allow("nobody"));
        assert!(engine.counter("nobody").is_none());
    }

    #[test]
    fn test_duration_window_sequence() {
        let engine = LimiterEngine::new("test");
        engine.set_rules("limit=2;reset=1s").unwrap();

        engine.increment("user1");
        assert!(engine.allow("user1"));
        engine.increment("user1");
        assert!(engine.allow("user1"));
        engine.increment("user1");
        assert!(!engine.allow("user1"));

        std::thread::sleep(Duration::from_secs(1));

        assert!(engine.allow("user1"));
        // The check predicted the reset without performing it
        assert_eq!(engine.counter("user1").unwrap().count(), 3);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let clock = mid_morning();
        let engine = engine_at("limit=5;reset=1m", &clock);

        for _ in 0..5 {
            engine.increment("k");
        }
        assert!(engine.allow("k"));

        engine.increment("k");
        assert!(!engine.allow("k"));
    }

    #[test]
    fn test_calendar_hour_reset() {
        let clock = mid_morning();
        let engine = engine_at("limit=2;reset=calendar@hour", &clock);

        for _ in 0..3 {
            engine.increment("user1");
        }
        assert!(!engine.allow("user1"));

        clock.advance(chrono::Duration::hours(1));
        assert!(engine.allow("user1"));

        engine.increment("user1");
        assert_eq!(engine.counter("user1").unwrap().count(), 1);
    }

    #[test]
    fn test_calendar_hour_boundary_before_full_hour() {
        let clock = MockClock::new(Local.with_ymd_and_hms(2024, 6, 15, 10, 59, 0).unwrap());
        let engine = engine_at("limit=1;reset=calendar@hour", &clock);

        engine.increment("k");
        engine.increment("k");
        assert!(!engine.allow("k"));

        clock.advance(chrono::Duration::minutes(2));
        assert!(engine.allow("k"));
    }

    #[test]
    fn test_calendar_day_reset() {
        let clock = mid_morning();
        let engine = engine_at("limit=2;reset=calendar@day", &clock);

        for _ in 0..3 {
            engine.increment("user1");
        }
        assert!(!engine.allow("user1"));

        clock.advance(chrono::Duration::hours(13));
        assert!(!engine.allow("user1"));

        clock.advance(chrono::Duration::hours(11));
        assert!(engine.allow("user1"));
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = mid_morning();
        let engine = engine_at("limit=1;reset=1m", &clock);

        engine.increment("a");
        engine.increment("a");

        assert!(!engine.allow("a"));
        assert!(engine.allow("b"));
        assert_eq!(engine.key_count(), 1);
    }

    #[test]
    fn test_inactive_rule_is_permissive() {
        let clock = mid_morning();
        let engine = engine_at("limit=1", &clock);

        for _ in 0..10 {
            engine.increment("k");
            assert!(engine.admit("k"));
        }
        assert!(engine.allow("k"));
        assert_eq!(engine.key_count(), 0);

        engine.set_rules("reset=1m").unwrap();
        assert!(engine.rule().is_active());

        engine.increment("k");
        engine.increment("k");
        assert!(!engine.allow("k"));
    }

    #[test]
    fn test_rejected_rule_keeps_previous_rule() {
        let clock = mid_morning();
        let engine = engine_at("limit=2;reset=1m", &clock);

        let err = engine.set_rules("limit=50;reset=calendar@week").unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule(_)));
        assert_eq!(engine.rule().max_count(), Some(2));
    }

    #[test]
    fn test_admit_enforces_exact_limit() {
        let clock = mid_morning();
        let engine = engine_at("limit=3;reset=1m", &clock);

        assert!(engine.admit("k"));
        assert!(engine.admit("k"));
        assert!(engine.admit("k"));
        assert!(!engine.admit("k"));
        assert_eq!(engine.counter("k").unwrap().count(), 4);

        clock.advance(chrono::Duration::seconds(60));
        assert!(engine.admit("k"));
        assert_eq!(engine.counter("k").unwrap().count(), 1);
    }

    #[test]
    fn test_admit_holds_under_contention() {
        let engine = Arc::new(LimiterEngine::new("contended"));
        engine.set_rules("limit=50;reset=1h").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || (0..25).filter(|_| engine.admit("shared")).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
        assert_eq!(engine.counter("shared").unwrap().count(), 200);
    }
}
