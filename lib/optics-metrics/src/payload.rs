//! Wire format for measurement uploads.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::tags::Tags;

/// Long unit label for rates and counts.
pub const OPERATIONS: &str = "operations";

/// Short unit label for rates and counts.
pub const OPERATIONS_SHORT: &str = "ops";

/// A batch of measurements, uploaded in a single request.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Batch {
    /// Unix timestamp, in seconds, aligned to the reporting interval.
    pub time: i64,

    /// Tags applied to every measurement which does not carry its own.
    pub tags: Tags,

    /// Measurements.
    pub measurements: Vec<Measurement>,
}

impl Batch {
    /// Returns `true` if the batch holds no measurements.
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Returns the number of measurements in the batch.
    pub fn len(&self) -> usize {
        self.measurements.len()
    }
}

/// A single data point.
///
/// Either `value` is set, or the summary fields (`count`, `sum`, `min`, `max`, `stddev`) are. Unset fields are left out
/// of the payload entirely.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Measurement {
    /// Metric name.
    pub name: String,

    /// Single value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    /// Number of samples summarized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,

    /// Sum of the samples summarized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,

    /// Largest sample.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Smallest sample.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Standard deviation of the samples.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stddev: Option<f64>,

    /// Reporting period, in seconds.
    pub period: u64,

    /// Tags.
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,

    /// Display attributes.
    #[serde(skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl Measurement {
    /// Creates a single-value measurement.
    pub fn value<N>(name: N, value: f64, period: u64, tags: Tags) -> Self
    where
        N: Into<String>,
    {
        Self {
            name: name.into(),
            value: Some(value),
            period,
            tags,
            ..Default::default()
        }
    }

    /// Sets the display attributes of this measurement.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Hints for how a measurement should be displayed by the destination.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Attributes {
    /// Long unit label, such as `operations`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_units_long: Option<String>,

    /// Short unit label, such as `ops` or `ms`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_units_short: Option<String>,

    /// Lower bound of the displayed value range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_min: Option<String>,

    /// Transformation applied to raw values before display, such as `x/1000000`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_transform: Option<String>,
}

impl Attributes {
    /// Attributes for counts and rates of operations.
    pub fn operations() -> Self {
        Self {
            display_units_long: Some(OPERATIONS.to_string()),
            display_units_short: Some(OPERATIONS_SHORT.to_string()),
            display_min: Some("0".to_string()),
            display_transform: None,
        }
    }

    /// Attributes for nanosecond durations, displayed in the given unit.
    pub fn duration(unit: DisplayUnit) -> Self {
        Self {
            display_transform: Some(format!("x/{}", unit.as_nanos())),
            display_units_short: Some(unit.short_label().to_string()),
            ..Default::default()
        }
    }

    /// Returns `true` if no attributes are set.
    pub fn is_empty(&self) -> bool {
        self.display_units_long.is_none()
            && self.display_units_short.is_none()
            && self.display_min.is_none()
            && self.display_transform.is_none()
    }
}

/// Unit in which timer durations are displayed.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(try_from = "String")]
pub enum DisplayUnit {
    /// Nanoseconds.
    Nanoseconds,

    /// Microseconds.
    Microseconds,

    /// Milliseconds.
    #[default]
    Milliseconds,

    /// Seconds.
    Seconds,

    /// Minutes.
    Minutes,
}

impl DisplayUnit {
    /// Returns the length of one unit.
    pub const fn as_duration(&self) -> Duration {
        match self {
            Self::Nanoseconds => Duration::from_nanos(1),
            Self::Microseconds => Duration::from_micros(1),
            Self::Milliseconds => Duration::from_millis(1),
            Self::Seconds => Duration::from_secs(1),
            Self::Minutes => Duration::from_secs(60),
        }
    }

    /// Returns the length of one unit, in nanoseconds.
    pub const fn as_nanos(&self) -> u128 {
        self.as_duration().as_nanos()
    }

    /// Returns the short label of this unit.
    pub const fn short_label(&self) -> &'static str {
        match self {
            Self::Nanoseconds => "ns",
            Self::Microseconds => "µs",
            Self::Milliseconds => "ms",
            Self::Seconds => "s",
            Self::Minutes => "m",
        }
    }
}

impl fmt::Display for DisplayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_label())
    }
}

impl TryFrom<String> for DisplayUnit {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ns" | "nanosecond" | "nanoseconds" => Ok(Self::Nanoseconds),
            "us" | "µs" | "microsecond" | "microseconds" => Ok(Self::Microseconds),
            "ms" | "millisecond" | "milliseconds" => Ok(Self::Milliseconds),
            "s" | "second" | "seconds" => Ok(Self::Seconds),
            "m" | "min" | "minute" | "minutes" => Ok(Self::Minutes),
            _ => Err(format!("invalid display unit '{}'", value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unset_fields_are_omitted() {
        let measurement = Measurement::value("queue.depth", 12.0, 60, Tags::new());
        let encoded = serde_json::to_value(&measurement).unwrap();
        assert_eq!(encoded, json!({ "name": "queue.depth", "value": 12.0, "period": 60 }));
    }

    #[test]
    fn batch_encoding() {
        let mut tags = Tags::new();
        tags.insert("host".to_string(), "web-1".to_string());

        let batch = Batch {
            time: 120,
            tags: tags.clone(),
            measurements: vec![
                Measurement::value("jobs.count", 3.0, 60, tags.clone()).with_attributes(Attributes::operations()),
                Measurement {
                    name: "latency.hist".to_string(),
                    count: Some(2),
                    sum: Some(30.0),
                    max: Some(20.0),
                    min: Some(10.0),
                    stddev: Some(5.0),
                    period: 60,
                    tags,
                    ..Default::default()
                },
            ],
        };

        let encoded = serde_json::to_value(&batch).unwrap();
        similar_asserts::assert_eq!(
            encoded,
            json!({
                "time": 120,
                "tags": { "host": "web-1" },
                "measurements": [
                    {
                        "name": "jobs.count",
                        "value": 3.0,
                        "period": 60,
                        "tags": { "host": "web-1" },
                        "attributes": {
                            "display_units_long": "operations",
                            "display_units_short": "ops",
                            "display_min": "0",
                        },
                    },
                    {
                        "name": "latency.hist",
                        "count": 2,
                        "sum": 30.0,
                        "max": 20.0,
                        "min": 10.0,
                        "stddev": 5.0,
                        "period": 60,
                        "tags": { "host": "web-1" },
                    },
                ],
            })
        );
    }

    #[test]
    fn duration_attributes() {
        let attributes = Attributes::duration(DisplayUnit::Milliseconds);
        assert_eq!(attributes.display_transform.as_deref(), Some("x/1000000"));
        assert_eq!(attributes.display_units_short.as_deref(), Some("ms"));
        assert!(attributes.display_units_long.is_none());

        let attributes = Attributes::duration(DisplayUnit::Seconds);
        assert_eq!(attributes.display_transform.as_deref(), Some("x/1000000000"));
        assert_eq!(attributes.display_units_short.as_deref(), Some("s"));
    }

    #[test]
    fn display_unit_parsing() {
        assert_eq!(DisplayUnit::try_from("ms".to_string()), Ok(DisplayUnit::Milliseconds));
        assert_eq!(DisplayUnit::try_from("Microseconds".to_string()), Ok(DisplayUnit::Microseconds));
        assert_eq!(DisplayUnit::try_from(" min ".to_string()), Ok(DisplayUnit::Minutes));
        assert!(DisplayUnit::try_from("fortnights".to_string()).is_err());
    }
}
