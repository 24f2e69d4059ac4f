//! Data models for the water-quality history core.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

// ---

/// The four water-quality parameters a sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parameter {
    #[serde(rename = "pH")]
    Ph,
    Temperature,
    Turbidity,
    Salinity,
}

impl Parameter {
    pub const ALL: [Parameter; 4] = [
        Parameter::Ph,
        Parameter::Temperature,
        Parameter::Turbidity,
        Parameter::Salinity,
    ];

    /// Canonical field name in raw documents.
    pub fn key(self) -> &'static str {
        match self {
            Parameter::Ph => "pH",
            Parameter::Temperature => "temperature",
            Parameter::Turbidity => "turbidity",
            Parameter::Salinity => "salinity",
        }
    }

    /// Inclusive physical sanity bounds. Values outside are flagged, never clamped.
    pub fn sanity_bounds(self) -> (f64, f64) {
        match self {
            Parameter::Ph => (0.0, 14.0),
            Parameter::Temperature => (-5.0, 50.0), // °C
            Parameter::Turbidity => (0.0, 4000.0),  // NTU
            Parameter::Salinity => (0.0, 70.0),     // ppt
        }
    }

    pub fn in_bounds(self, value: f64) -> bool {
        let (lo, hi) = self.sanity_bounds();
        (lo..=hi).contains(&value)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// How many of the four parameters a reading carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Complete,
    Good,
    Partial,
    Incomplete,
}

impl Quality {
    pub fn from_present(present: usize) -> Self {
        // ---
        let fraction = present as f64 / Parameter::ALL.len() as f64;
        if fraction >= 1.0 {
            Quality::Complete
        } else if fraction >= 0.75 {
            Quality::Good
        } else if fraction >= 0.5 {
            Quality::Partial
        } else {
            Quality::Incomplete
        }
    }
}

/// Data-quality signals attached during normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingFlags {
    /// The source timestamp could not be parsed and "now" was substituted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timestamp_fallback: bool,

    /// Parameters whose value lies outside [`Parameter::sanity_bounds`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub out_of_range: Vec<Parameter>,
}

impl ReadingFlags {
    pub fn is_clean(&self) -> bool {
        !self.timestamp_fallback && self.out_of_range.is_empty()
    }
}

/// Untrusted document as returned by the store.
///
/// Field casing varies, values may be numbers or strings, and the
/// timestamp comes in several shapes; see [`crate::normalize`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawReading(pub Map<String, Value>);

impl RawReading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for RawReading {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Canonical reading after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    // ---
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "pH")]
    pub ph: Option<f64>,
    pub temperature: Option<f64>,
    pub turbidity: Option<f64>,
    pub salinity: Option<f64>,
    pub quality: Quality,
    #[serde(default)]
    pub flags: ReadingFlags,
}

impl SensorReading {
    pub fn value(&self, parameter: Parameter) -> Option<f64> {
        match parameter {
            Parameter::Ph => self.ph,
            Parameter::Temperature => self.temperature,
            Parameter::Turbidity => self.turbidity,
            Parameter::Salinity => self.salinity,
        }
    }

    pub fn present_count(&self) -> usize {
        Parameter::ALL
            .iter()
            .filter(|p| self.value(**p).is_some())
            .count()
    }
}

/// Render a canonical reading back into the raw shape the store would hold.
impl From<&SensorReading> for RawReading {
    fn from(reading: &SensorReading) -> Self {
        // ---
        let mut raw = RawReading::new().with(
            "timestamp",
            reading
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        for parameter in Parameter::ALL {
            if let Some(value) = reading.value(parameter) {
                raw = raw.with(parameter.key(), value);
            }
        }
        raw
    }
}

/// Per-parameter contributor counts for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCounts {
    #[serde(rename = "pH")]
    pub ph: usize,
    pub temperature: usize,
    pub turbidity: usize,
    pub salinity: usize,
}

impl SampleCounts {
    pub fn get(&self, parameter: Parameter) -> usize {
        match parameter {
            Parameter::Ph => self.ph,
            Parameter::Temperature => self.temperature,
            Parameter::Turbidity => self.turbidity,
            Parameter::Salinity => self.salinity,
        }
    }
}

/// Per-window averages produced by [`crate::aggregate::aggregate`].
///
/// `bucket_start` is an absolute instant annotated with the device's UTC
/// offset at that instant, so it serializes as e.g. `2025-01-01T08:00:00-05:00`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedBucket {
    pub bucket_start: DateTime<FixedOffset>,
    #[serde(rename = "pH")]
    pub ph: Option<f64>,
    pub temperature: Option<f64>,
    pub turbidity: Option<f64>,
    pub salinity: Option<f64>,
    /// Readings behind each mean. Missing in older snapshots, which read back as zero.
    #[serde(default)]
    pub sample_counts: SampleCounts,
}

impl AggregatedBucket {
    pub fn value(&self, parameter: Parameter) -> Option<f64> {
        match parameter {
            Parameter::Ph => self.ph,
            Parameter::Temperature => self.temperature,
            Parameter::Turbidity => self.turbidity,
            Parameter::Salinity => self.salinity,
        }
    }

    /// True when no parameter had a contributing reading: a gap, not a zero.
    pub fn is_gap(&self) -> bool {
        Parameter::ALL.iter().all(|p| self.value(*p).is_none())
    }
}

/// Aggregation granularity selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    Daily,
    Weekly,
    Monthly,
    Annually,
}

impl TimeFilter {
    pub const ALL: [TimeFilter; 4] = [
        TimeFilter::Daily,
        TimeFilter::Weekly,
        TimeFilter::Monthly,
        TimeFilter::Annually,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TimeFilter::Daily => "daily",
            TimeFilter::Weekly => "weekly",
            TimeFilter::Monthly => "monthly",
            TimeFilter::Annually => "annually",
        }
    }
}

impl fmt::Display for TimeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(TimeFilter::Daily),
            "weekly" => Ok(TimeFilter::Weekly),
            "monthly" => Ok(TimeFilter::Monthly),
            "annually" | "annual" => Ok(TimeFilter::Annually),
            _ => Err(Error::UnknownFilter(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn create_test_reading(ph: Option<f64>, temperature: Option<f64>) -> SensorReading {
        // ---
        let mut reading = SensorReading {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap(),
            ph,
            temperature,
            turbidity: None,
            salinity: None,
            quality: Quality::Incomplete,
            flags: ReadingFlags::default(),
        };
        reading.quality = Quality::from_present(reading.present_count());
        reading
    }

    #[test]
    fn test_quality_thresholds() {
        // ---
        assert_eq!(Quality::from_present(4), Quality::Complete);
        assert_eq!(Quality::from_present(3), Quality::Good);
        assert_eq!(Quality::from_present(2), Quality::Partial);
        assert_eq!(Quality::from_present(1), Quality::Incomplete);
        assert_eq!(Quality::from_present(0), Quality::Incomplete);
    }

    #[test]
    fn test_filter_parsing() {
        // ---
        assert_eq!("daily".parse::<TimeFilter>().unwrap(), TimeFilter::Daily);
        assert_eq!(" Weekly ".parse::<TimeFilter>().unwrap(), TimeFilter::Weekly);
        assert_eq!("annual".parse::<TimeFilter>().unwrap(), TimeFilter::Annually);

        // Unknown filters are rejected, not passed through
        let err = "hourly".parse::<TimeFilter>().unwrap_err();
        assert!(matches!(err, Error::UnknownFilter(ref s) if s == "hourly"));
    }

    #[test]
    fn test_sanity_bounds() {
        // ---
        assert!(Parameter::Ph.in_bounds(0.0));
        assert!(Parameter::Ph.in_bounds(14.0));
        assert!(!Parameter::Ph.in_bounds(14.2));
        assert!(!Parameter::Turbidity.in_bounds(-1.0));
    }

    #[test]
    fn test_reading_serializes_ph_key() {
        // ---
        let reading = create_test_reading(Some(7.1), None);
        let json = serde_json::to_value(&reading).unwrap();

        assert_eq!(json["pH"], 7.1);
        assert!(json["temperature"].is_null());
        assert_eq!(json["quality"], "incomplete");
        // Clean flags are omitted entirely
        assert_eq!(json["flags"], serde_json::json!({}));
    }

    #[test]
    fn test_canonical_raw_rendering() {
        // ---
        let reading = create_test_reading(Some(7.0), Some(21.5));
        let raw = RawReading::from(&reading);

        assert_eq!(raw.fields()["timestamp"], "2025-03-26T18:45:00.000Z");
        assert_eq!(raw.fields()["pH"], 7.0);
        assert_eq!(raw.fields()["temperature"], 21.5);
        assert!(!raw.fields().contains_key("salinity"));
    }
}
