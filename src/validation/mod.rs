//! Sample validation.
//!
//! Turns raw observations into numeric [`Sample`]s or typed rejections.
//! Validation never fails: every input yields a [`ValidatedResult`].

pub mod ranges;
pub mod units;

use crate::domain::{Observation, RawValue, Sample};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

pub use ranges::{infer_category, range_for};

/// States that mean "no reading", compared case-insensitively.
const INVALID_STATES: &[&str] = &["unavailable", "unknown", "", "none"];

/// Two-valued states and their numeric meaning, compared case-insensitively.
const BOOLEAN_STATES: &[(&str, f64)] = &[
    ("on", 1.0),
    ("off", 0.0),
    ("home", 1.0),
    ("not_home", 0.0),
    ("open", 1.0),
    ("closed", 0.0),
    ("locked", 1.0),
    ("unlocked", 0.0),
    ("true", 1.0),
    ("false", 0.0),
    ("yes", 1.0),
    ("no", 0.0),
    ("active", 1.0),
    ("inactive", 0.0),
    ("detected", 1.0),
    ("clear", 0.0),
];

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Samples older than this are rejected as stale. `None` disables the check.
    pub stale_threshold: Option<Duration>,
    pub validate_ranges: bool,
    pub track_changes_only: bool,
    /// Minimum absolute change for a sample to count as changed.
    pub change_threshold: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Some(Duration::from_secs(300)),
            validate_ranges: true,
            track_changes_only: false,
            change_threshold: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    InvalidState,
    InvalidType,
    InvalidRange,
    Stale,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Valid,
    InvalidState,
    InvalidType,
    InvalidRange,
    Stale,
    Unchanged,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Valid => "valid",
            ValidationOutcome::InvalidState => "invalid_state",
            ValidationOutcome::InvalidType => "invalid_type",
            ValidationOutcome::InvalidRange => "invalid_range",
            ValidationOutcome::Stale => "stale",
            ValidationOutcome::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RejectionKind> for ValidationOutcome {
    fn from(kind: RejectionKind) -> Self {
        match kind {
            RejectionKind::InvalidState => ValidationOutcome::InvalidState,
            RejectionKind::InvalidType => ValidationOutcome::InvalidType,
            RejectionKind::InvalidRange => ValidationOutcome::InvalidRange,
            RejectionKind::Stale => ValidationOutcome::Stale,
            RejectionKind::Unchanged => ValidationOutcome::Unchanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedResult {
    Valid {
        sample: Sample,
        /// The value was coerced from a non-numeric form or unit-normalized.
        converted: bool,
    },
    Rejected {
        kind: RejectionKind,
        detail: String,
    },
}

impl ValidatedResult {
    pub fn outcome(&self) -> ValidationOutcome {
        match self {
            ValidatedResult::Valid { .. } => ValidationOutcome::Valid,
            ValidatedResult::Rejected { kind, .. } => (*kind).into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidatedResult::Valid { .. })
    }

    pub fn into_sample(self) -> Option<Sample> {
        match self {
            ValidatedResult::Valid { sample, .. } => Some(sample),
            ValidatedResult::Rejected { .. } => None,
        }
    }

    fn rejected(kind: RejectionKind, detail: impl Into<String>) -> Self {
        ValidatedResult::Rejected {
            kind,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationStats {
    pub total: u64,
    pub valid: u64,
    pub converted: u64,
    pub invalid_state: u64,
    pub invalid_type: u64,
    pub invalid_range: u64,
    pub stale: u64,
    pub unchanged: u64,
}

impl ValidationStats {
    /// Percentage of validated inputs that were accepted.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.valid as f64 / self.total as f64 * 100.0
        }
    }

    fn record(&mut self, result: &ValidatedResult) {
        self.total += 1;
        match result {
            ValidatedResult::Valid { converted, .. } => {
                self.valid += 1;
                if *converted {
                    self.converted += 1;
                }
            }
            ValidatedResult::Rejected { kind, .. } => match kind {
                RejectionKind::InvalidState => self.invalid_state += 1,
                RejectionKind::InvalidType => self.invalid_type += 1,
                RejectionKind::InvalidRange => self.invalid_range += 1,
                RejectionKind::Stale => self.stale += 1,
                RejectionKind::Unchanged => self.unchanged += 1,
            },
        }
    }
}

/// Validates raw readings. Holds the last accepted value of every stream for
/// change-only filtering.
#[derive(Debug, Default)]
pub struct SampleValidator {
    config: ValidatorConfig,
    last_values: HashMap<String, f64>,
    stats: ValidationStats,
}

impl SampleValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            last_values: HashMap::new(),
            stats: ValidationStats::default(),
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn validate(
        &mut self,
        raw: &RawValue,
        stream_id: &str,
        category: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> ValidatedResult {
        self.validate_at(raw, stream_id, category, timestamp, Utc::now())
    }

    /// Same as [`validate`](Self::validate) with an explicit reference time for
    /// the staleness check.
    pub fn validate_at(
        &mut self,
        raw: &RawValue,
        stream_id: &str,
        category: Option<&str>,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ValidatedResult {
        self.evaluate(raw, stream_id, category, None, timestamp, now)
    }

    /// Validate a full observation. A missing category is inferred from the
    /// attribute name and a reported unit is normalized before the range check.
    pub fn validate_observation(&mut self, observation: &Observation) -> ValidatedResult {
        self.validate_observation_at(observation, Utc::now())
    }

    pub fn validate_observation_at(
        &mut self,
        observation: &Observation,
        now: DateTime<Utc>,
    ) -> ValidatedResult {
        let category = observation
            .category
            .as_deref()
            .or_else(|| observation.attribute.as_deref().and_then(infer_category));
        self.evaluate(
            &observation.value,
            &observation.stream_id,
            category,
            observation.unit.as_deref(),
            observation.timestamp,
            now,
        )
    }

    pub fn stats(&self) -> &ValidationStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = ValidationStats::default();
    }

    /// Forget the last accepted value of every stream.
    pub fn clear_history(&mut self) {
        self.last_values.clear();
    }

    fn evaluate(
        &mut self,
        raw: &RawValue,
        stream_id: &str,
        category: Option<&str>,
        unit: Option<&str>,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ValidatedResult {
        let result = self.check(raw, stream_id, category, unit, timestamp, now);
        self.stats.record(&result);

        match &result {
            ValidatedResult::Valid { sample, .. } => {
                if self.config.track_changes_only {
                    self.last_values
                        .insert(sample.stream_id.clone(), sample.value);
                }
            }
            ValidatedResult::Rejected {
                kind: RejectionKind::InvalidState | RejectionKind::Unchanged,
                detail,
            } => {
                trace!(stream_id, detail = %detail, "Sample skipped");
            }
            ValidatedResult::Rejected { kind, detail } => {
                debug!(stream_id, kind = ?kind, detail = %detail, "Sample rejected");
            }
        }

        result
    }

    fn check(
        &self,
        raw: &RawValue,
        stream_id: &str,
        category: Option<&str>,
        unit: Option<&str>,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ValidatedResult {
        if is_invalid_state(raw) {
            return ValidatedResult::rejected(
                RejectionKind::InvalidState,
                format!("state {raw:?} carries no reading"),
            );
        }

        if let Some(threshold) = self.config.stale_threshold {
            let age = now.signed_duration_since(timestamp);
            if age.to_std().is_ok_and(|age| age > threshold) {
                return ValidatedResult::rejected(
                    RejectionKind::Stale,
                    format!(
                        "sample is {}s old, threshold {}s",
                        age.num_seconds(),
                        threshold.as_secs()
                    ),
                );
            }
        }

        let (mut value, mut converted) = match coerce(raw) {
            Ok(coerced) => coerced,
            Err(detail) => return ValidatedResult::rejected(RejectionKind::InvalidType, detail),
        };

        if !value.is_finite() {
            return ValidatedResult::rejected(
                RejectionKind::InvalidType,
                format!("value {value} is not finite"),
            );
        }

        if let (Some(unit), Some(category)) = (unit, category)
            && let Some(normalized) = units::normalize(value, unit, category)
        {
            value = normalized;
            converted = true;
        }

        if self.config.validate_ranges
            && let Some(category) = category
            && let Some((min, max)) = range_for(category)
            && !(min..=max).contains(&value)
        {
            return ValidatedResult::rejected(
                RejectionKind::InvalidRange,
                format!("{value} outside {category} range [{min}, {max}]"),
            );
        }

        if self.config.track_changes_only
            && let Some(previous) = self.last_values.get(stream_id)
        {
            let delta = (value - previous).abs();
            if delta == 0.0 || delta < self.config.change_threshold {
                return ValidatedResult::rejected(
                    RejectionKind::Unchanged,
                    format!("change {delta} below threshold {}", self.config.change_threshold),
                );
            }
        }

        ValidatedResult::Valid {
            sample: Sample {
                stream_id: stream_id.to_string(),
                value,
                timestamp,
                category: category.map(str::to_string),
            },
            converted,
        }
    }
}

fn is_invalid_state(raw: &RawValue) -> bool {
    match raw {
        RawValue::Missing => true,
        RawValue::Text(text) => {
            let text = text.trim().to_lowercase();
            INVALID_STATES.contains(&text.as_str())
        }
        RawValue::Bool(_) | RawValue::Number(_) => false,
    }
}

/// Coerce a raw value to a float. The flag reports whether any conversion
/// beyond a plain number was needed.
fn coerce(raw: &RawValue) -> Result<(f64, bool), String> {
    match raw {
        RawValue::Number(value) => Ok((*value, false)),
        RawValue::Bool(flag) => Ok((if *flag { 1.0 } else { 0.0 }, true)),
        RawValue::Text(text) => {
            let trimmed = text.trim();
            let lower = trimmed.to_lowercase();
            if let Some((_, value)) = BOOLEAN_STATES.iter().find(|(state, _)| *state == lower) {
                return Ok((*value, true));
            }
            trimmed
                .parse::<f64>()
                .map(|value| (value, true))
                .map_err(|_| format!("cannot convert {trimmed:?} to a number"))
        }
        RawValue::Missing => Err("missing value".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn now() -> DateTime<Utc> {
        "2024-06-01T12:00:00Z".parse().unwrap()
    }

    fn validator() -> SampleValidator {
        SampleValidator::new(ValidatorConfig::default())
    }

    fn run(v: &mut SampleValidator, raw: RawValue, category: Option<&str>) -> ValidatedResult {
        v.validate_at(&raw, "sensor.test", category, now(), now())
    }

    #[test]
    fn test_invalid_states_rejected() {
        let mut v = validator();
        for raw in [
            RawValue::Missing,
            RawValue::from("unavailable"),
            RawValue::from("Unknown"),
            RawValue::from(""),
            RawValue::from("None"),
            RawValue::from("none"),
        ] {
            assert_eq!(run(&mut v, raw, None).outcome(), ValidationOutcome::InvalidState);
        }
        assert_eq!(v.stats().invalid_state, 6);
    }

    #[test]
    fn test_boolean_lexicon() {
        let mut v = validator();
        for (text, expected) in [("on", 1.0), ("OFF", 0.0), ("not_home", 0.0), ("Detected", 1.0)] {
            match run(&mut v, RawValue::from(text), None) {
                ValidatedResult::Valid { sample, converted } => {
                    assert_eq!(sample.value, expected);
                    assert!(converted);
                }
                other => panic!("expected valid for {text}, got {other:?}"),
            }
        }
        assert_eq!(v.stats().converted, 4);
    }

    #[test]
    fn test_numeric_and_string_numbers() {
        let mut v = validator();
        let result = run(&mut v, RawValue::from(21.5), Some("temperature"));
        assert!(matches!(result, ValidatedResult::Valid { converted: false, .. }));

        let result = run(&mut v, RawValue::from(" 42.0 "), None);
        assert_eq!(result.clone().into_sample().map(|s| s.value), Some(42.0));
        assert!(matches!(result, ValidatedResult::Valid { converted: true, .. }));
    }

    #[test]
    fn test_unparseable_and_non_finite_are_invalid_type() {
        let mut v = validator();
        assert_eq!(
            run(&mut v, RawValue::from("warm"), None).outcome(),
            ValidationOutcome::InvalidType
        );
        assert_eq!(
            run(&mut v, RawValue::from(f64::NAN), None).outcome(),
            ValidationOutcome::InvalidType
        );
        assert_eq!(
            run(&mut v, RawValue::from("inf"), None).outcome(),
            ValidationOutcome::InvalidType
        );
    }

    #[test]
    fn test_range_check_inclusive_and_optional() {
        let mut v = validator();
        assert!(run(&mut v, RawValue::from(100.0), Some("humidity")).is_valid());
        assert_eq!(
            run(&mut v, RawValue::from(100.1), Some("humidity")).outcome(),
            ValidationOutcome::InvalidRange
        );
        assert!(run(&mut v, RawValue::from(1e9), Some("wind_speed")).is_valid());

        let mut lenient = SampleValidator::new(ValidatorConfig {
            validate_ranges: false,
            ..ValidatorConfig::default()
        });
        assert!(run(&mut lenient, RawValue::from(500.0), Some("humidity")).is_valid());
    }

    #[test]
    fn test_stale_samples() {
        let mut v = validator();
        let old = now() - TimeDelta::seconds(301);
        let result = v.validate_at(&RawValue::from(1.0), "s", None, old, now());
        assert_eq!(result.outcome(), ValidationOutcome::Stale);

        let fresh = now() - TimeDelta::seconds(299);
        assert!(v.validate_at(&RawValue::from(1.0), "s", None, fresh, now()).is_valid());

        let mut unlimited = SampleValidator::new(ValidatorConfig {
            stale_threshold: None,
            ..ValidatorConfig::default()
        });
        let ancient = now() - TimeDelta::days(30);
        assert!(unlimited.validate_at(&RawValue::from(1.0), "s", None, ancient, now()).is_valid());
    }

    #[test]
    fn test_invalid_state_checked_before_staleness() {
        let mut v = validator();
        let old = now() - TimeDelta::hours(2);
        let result = v.validate_at(&RawValue::from("unknown"), "s", None, old, now());
        assert_eq!(result.outcome(), ValidationOutcome::InvalidState);
    }

    #[test]
    fn test_change_only_mode() {
        let mut v = SampleValidator::new(ValidatorConfig {
            track_changes_only: true,
            change_threshold: 0.5,
            ..ValidatorConfig::default()
        });
        assert!(run(&mut v, RawValue::from(20.0), None).is_valid());
        assert_eq!(
            run(&mut v, RawValue::from(20.0), None).outcome(),
            ValidationOutcome::Unchanged
        );
        assert_eq!(
            run(&mut v, RawValue::from(20.3), None).outcome(),
            ValidationOutcome::Unchanged
        );
        assert!(run(&mut v, RawValue::from(20.6), None).is_valid());
        // Compared against the last accepted value, not the last seen one
        assert_eq!(
            run(&mut v, RawValue::from(21.0), None).outcome(),
            ValidationOutcome::Unchanged
        );
        assert_eq!(v.stats().unchanged, 3);
    }

    #[test]
    fn test_observation_unit_normalization_before_range() {
        let mut v = validator();
        let obs = Observation::new("sensor.oven", 350.0, now())
            .with_category("temperature")
            .with_unit("°F");
        match v.validate_observation_at(&obs, now()) {
            ValidatedResult::Valid { sample, converted } => {
                assert!((sample.value - 176.666_666).abs() < 1e-3);
                assert!(converted);
            }
            other => panic!("expected valid, got {other:?}"),
        }
    }

    #[test]
    fn test_observation_category_inference() {
        let mut v = validator();
        let mut obs = Observation::new("sensor.attic", 150.0, now());
        obs.attribute = Some("relative_humidity".to_string());
        assert_eq!(
            v.validate_observation_at(&obs, now()).outcome(),
            ValidationOutcome::InvalidRange
        );
    }

    #[test]
    fn test_stats_success_rate_and_reset() {
        let mut v = validator();
        assert_eq!(v.stats().success_rate(), 0.0);
        run(&mut v, RawValue::from(1.0), None);
        run(&mut v, RawValue::from("unknown"), None);
        assert_eq!(v.stats().total, 2);
        assert!((v.stats().success_rate() - 50.0).abs() < f64::EPSILON);
        v.reset_stats();
        assert_eq!(v.stats(), &ValidationStats::default());
    }
}
