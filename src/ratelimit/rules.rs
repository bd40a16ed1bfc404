//! Rate limit rule parsing and validation.
//!
//! A rule specification is a `;`-separated list of `field=value` pairs:
//!
//! ```text
//! limit=100;reset=1m
//! limit=5000;reset=calendar@day
//! ```
//!
//! `limit` is a positive integer. `reset` is either `calendar@hour`,
//! `calendar@day`, or a duration expression such as `1s`, `250ms` or `1h30m`.

use std::str::FromStr;
use std::time::Duration;

use super::counter::{CalendarPeriod, ResetPolicy};
use crate::error::RuleError;

const CALENDAR_PREFIX: &str = "calendar@";

/// A validated rule specification.
///
/// Fields absent from the string stay `None` and leave the corresponding part
/// of a [`Rule`] untouched when applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSpec {
    /// Maximum count per window
    pub limit: Option<u64>,
    /// When the window resets
    pub reset: Option<ResetPolicy>,
}

impl FromStr for RuleSpec {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut spec = RuleSpec::default();

        for part in s.split(';') {
            let mut fields = part.split('=');
            let (field, value) = match (fields.next(), fields.next(), fields.next()) {
                (Some(field), Some(value), None) => (field, value),
                _ => {
                    return Err(RuleError::InvalidRule(format!(
                        "expected field=value, got {:?}",
                        part
                    )))
                }
            };

            match field {
                "limit" => spec.limit = Some(parse_limit(value)?),
                "reset" => spec.reset = Some(parse_reset(value)?),
                other => return Err(RuleError::UnknownField(other.to_string())),
            }
        }

        Ok(spec)
    }
}

fn parse_limit(value: &str) -> Result<u64, RuleError> {
    let limit: i64 = value
        .parse()
        .map_err(|e| RuleError::InvalidRule(format!("invalid limit {:?}: {}", value, e)))?;

    if limit < 1 {
        return Err(RuleError::InvalidRule(
            "invalid limit: value must be greater than 0".to_string(),
        ));
    }

    Ok(limit as u64)
}

fn parse_reset(value: &str) -> Result<ResetPolicy, RuleError> {
    if let Some(period) = value.strip_prefix(CALENDAR_PREFIX) {
        return period
            .parse::<CalendarPeriod>()
            .map(ResetPolicy::Calendar)
            .map_err(|_| RuleError::InvalidRule(format!("invalid calendar period {:?}", period)));
    }

    parse_duration(value).map(ResetPolicy::Interval)
}

/// Parse a duration expression like `1h30m`, `1.5s` or `300ms`.
///
/// Accepts an optional sign followed by one or more decimal numbers, each with
/// a unit suffix (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`). Zero and negative
/// durations are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, RuleError> {
    let invalid = || RuleError::InvalidRule(format!("invalid duration {:?}", input));
    let not_positive =
        || RuleError::InvalidRule("invalid duration: value must be greater than 0".to_string());

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Err(not_positive());
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total_nanos: u128 = 0;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        rest = tail;

        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3600 * 1_000_000_000,
            "" => {
                return Err(RuleError::InvalidRule(format!(
                    "missing unit in duration {:?}",
                    input
                )))
            }
            other => {
                return Err(RuleError::InvalidRule(format!(
                    "unknown unit {:?} in duration {:?}",
                    other, input
                )))
            }
        };

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(invalid());
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };

        let mut term = whole.checked_mul(unit_nanos).ok_or_else(invalid)?;

        // Digits past nanosecond precision of the largest unit cannot matter
        let fraction = &fraction[..fraction.len().min(18)];
        if !fraction.is_empty() {
            let digits: u128 = fraction.parse().map_err(|_| invalid())?;
            let scale = 10u128.pow(fraction.len() as u32);
            term = term
                .checked_add(digits * unit_nanos / scale)
                .ok_or_else(invalid)?;
        }

        total_nanos = total_nanos.checked_add(term).ok_or_else(invalid)?;
    }

    if negative || total_nanos == 0 {
        return Err(not_positive());
    }

    u64::try_from(total_nanos)
        .map(Duration::from_nanos)
        .map_err(|_| invalid())
}

/// The limit and reset policy configured for a tag.
///
/// A rule starts empty and only becomes active once both a limit and a reset
/// policy have been set, possibly across several updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rule {
    max_count: Option<u64>,
    reset: Option<ResetPolicy>,
}

impl Rule {
    /// Create an empty, inactive rule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a validated specification into this rule.
    pub fn apply(&mut self, spec: RuleSpec) {
        if let Some(limit) = spec.limit {
            self.max_count = Some(limit);
        }
        if let Some(reset) = spec.reset {
            self.reset = Some(reset);
        }
    }

    /// Get the configured limit, if any.
    pub fn max_count(&self) -> Option<u64> {
        self.max_count
    }

    /// Get the configured reset policy, if any.
    pub fn reset_policy(&self) -> Option<&ResetPolicy> {
        self.reset.as_ref()
    }

    /// Whether both a limit and a reset policy are set.
    pub fn is_active(&self) -> bool {
        self.enforced().is_some()
    }

    /// The limit and policy to enforce, or `None` while the rule is inert.
    pub fn enforced(&self) -> Option<(u64, &ResetPolicy)> {
        match (self.max_count, self.reset.as_ref()) {
            (Some(max_count), Some(policy)) => Some((max_count, policy)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_from(spec: &str) -> Result<Rule, RuleError> {
        let mut rule = Rule::new();
        rule.apply(spec.parse()?);
        Ok(rule)
    }

    #[test]
    fn test_parse_duration_rule() {
        let rule = rule_from("limit=10;reset=1m").unwrap();
        assert_eq!(rule.max_count(), Some(10));
        assert_eq!(
            rule.reset_policy(),
            Some(&ResetPolicy::Interval(Duration::from_secs(60)))
        );
        assert!(rule.is_active());
    }

    #[test]
    fn test_parse_calendar_rule() {
        let rule = rule_from("limit=5;reset=calendar@hour").unwrap();
        assert_eq!(rule.max_count(), Some(5));
        assert_eq!(
            rule.reset_policy(),
            Some(&ResetPolicy::Calendar(CalendarPeriod::Hour))
        );
        assert!(rule.is_active());

        let rule = rule_from("reset=calendar@day;limit=1").unwrap();
        assert_eq!(
            rule.reset_policy(),
            Some(&ResetPolicy::Calendar(CalendarPeriod::Day))
        );
        assert!(rule.is_active());
    }

    #[test]
    fn test_partial_rule_stays_inactive() {
        let rule = rule_from("limit=10").unwrap();
        assert!(!rule.is_active());
        assert!(rule.enforced().is_none());

        let rule = rule_from("reset=30s").unwrap();
        assert!(!rule.is_active());
    }

    #[test]
    fn test_rule_activates_across_updates() {
        let mut rule = rule_from("limit=10").unwrap();
        rule.apply("reset=1h".parse().unwrap());

        assert_eq!(
            rule.enforced(),
            Some((10, &ResetPolicy::Interval(Duration::from_secs(3600))))
        );
    }

    #[test]
    fn test_later_reset_replaces_calendar_policy() {
        let mut rule = rule_from("limit=3;reset=calendar@day").unwrap();
        rule.apply("reset=5s".parse().unwrap());

        assert_eq!(
            rule.reset_policy(),
            Some(&ResetPolicy::Interval(Duration::from_secs(5)))
        );
    }

    #[test]
    fn test_malformed_rules_rejected() {
        let invalid = [
            "limit=;reset=calendar@hour",
            "limit=2;reset=invalid@period",
            "limit=-1;reset=calendar@day",
            "limit=0;reset=1s",
            "limit=2;reset=",
            "limit=2;reset=calendar@week",
            "limit=2;reset=0s",
            "limit=2;reset=-5s",
            "limit=2;reset=10",
            "limit=2=3",
            "limit",
            "limit=2;",
            "",
        ];

        for spec in invalid {
            let err = spec.parse::<RuleSpec>().unwrap_err();
            assert!(
                matches!(err, RuleError::InvalidRule(_)),
                "expected InvalidRule for {:?}, got {:?}",
                spec,
                err
            );
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert_eq!(
            "unknown=key".parse::<RuleSpec>(),
            Err(RuleError::UnknownField("unknown".to_string()))
        );
        assert!(matches!(
            "limit=1;burst=4".parse::<RuleSpec>(),
            Err(RuleError::UnknownField(_))
        ));
    }

    #[test]
    fn test_failed_update_leaves_rule_untouched() {
        let mut rule = rule_from("limit=10;reset=1m").unwrap();
        let before = rule.clone();

        // limit would parse, but the whole spec is rejected first
        if let Ok(spec) = "limit=99;reset=bogus".parse::<RuleSpec>() {
            rule.apply(spec);
        }

        assert_eq!(rule, before);
    }

    #[test]
    fn test_repeated_field_last_wins() {
        let spec: RuleSpec = "limit=1;limit=7".parse().unwrap();
        assert_eq!(spec.limit, Some(7));
    }

    #[test]
    fn test_parse_duration_expressions() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration(".5m").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("2us").unwrap(), Duration::from_nanos(2000));
        assert_eq!(parse_duration("2µs").unwrap(), Duration::from_nanos(2000));
        assert_eq!(parse_duration("+10ns").unwrap(), Duration::from_nanos(10));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for input in ["", "0", "-1s", "s", "1", "1x", "1..5s", ".s", "1s2", "99999999999999999999h"] {
            assert!(parse_duration(input).is_err(), "accepted {:?}", input);
        }
    }
}
