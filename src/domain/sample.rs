use super::priority::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw value as handed over by the source, before validation.
///
/// Deserializes from any JSON scalar; `null` becomes `Missing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Missing,
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(RawValue::Missing, Into::into)
    }
}

/// One reading from the source feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub stream_id: String,
    #[serde(default = "missing")]
    pub value: RawValue,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub category: Option<String>,
    /// Unit of measurement reported by the source, normalized during validation.
    #[serde(default)]
    pub unit: Option<String>,
    /// Source attribute name, used to infer a category when none is given.
    #[serde(default)]
    pub attribute: Option<String>,
}

fn missing() -> RawValue {
    RawValue::Missing
}

impl Observation {
    pub fn new(
        stream_id: impl Into<String>,
        value: impl Into<RawValue>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            value: value.into(),
            timestamp,
            category: None,
            unit: None,
            attribute: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// A validated numeric reading. Only the validator constructs these in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub stream_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub category: Option<String>,
}

impl Sample {
    pub fn new(stream_id: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            stream_id: stream_id.into(),
            value,
            timestamp,
            category: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferEntry {
    pub sample: Sample,
    pub priority: Option<Priority>,
}

impl BufferEntry {
    pub fn new(sample: Sample) -> Self {
        Self {
            sample,
            priority: None,
        }
    }

    pub fn with_priority(sample: Sample, priority: Priority) -> Self {
        Self {
            sample,
            priority: Some(priority),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_deserializes_scalars() {
        let obs: Observation = serde_json::from_str(
            r#"{"stream_id":"sensor.kitchen","value":21.5,"timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(obs.value, RawValue::Number(21.5));
        assert!(obs.category.is_none());

        let obs: Observation = serde_json::from_str(
            r#"{"stream_id":"switch.lamp","value":"on","timestamp":"2024-01-01T00:00:00Z","category":"power"}"#,
        )
        .unwrap();
        assert_eq!(obs.value, RawValue::Text("on".to_string()));
        assert_eq!(obs.category.as_deref(), Some("power"));

        let obs: Observation = serde_json::from_str(
            r#"{"stream_id":"x","value":null,"timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(obs.value, RawValue::Missing);

        let obs: Observation =
            serde_json::from_str(r#"{"stream_id":"x","timestamp":"2024-01-01T00:00:00Z"}"#)
                .unwrap();
        assert_eq!(obs.value, RawValue::Missing);
    }

    #[test]
    fn test_raw_value_from_option() {
        assert_eq!(RawValue::from(None::<f64>), RawValue::Missing);
        assert_eq!(RawValue::from(Some(true)), RawValue::Bool(true));
    }
}
