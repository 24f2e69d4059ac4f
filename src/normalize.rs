//! Reading normalizer.
//!
//! The one place that guesses at field casing and timestamp shapes. Raw
//! documents come in through here and leave as [`SensorReading`]; nothing
//! downstream looks at a raw field again.
//!
//! Normalization never fails. An unparseable timestamp becomes `now` with
//! [`ReadingFlags::timestamp_fallback`] set, an unparseable number becomes
//! `None`, and out-of-range numbers are kept but listed in
//! [`ReadingFlags::out_of_range`].

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};

use crate::models::{Parameter, Quality, RawReading, ReadingFlags, SensorReading};
use crate::range::resolve_local;

// ---

/// Field names that may carry the reading's timestamp, in preference order.
const TIMESTAMP_KEYS: [&str; 2] = ["timestamp", "time"];

/// Naive formats, interpreted in the device zone.
const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Convert one raw document into a canonical reading.
pub fn normalize(raw: &RawReading, tz: &Tz, now: DateTime<Utc>) -> SensorReading {
    // ---
    let fields = raw.fields();

    let parsed = TIMESTAMP_KEYS
        .iter()
        .find_map(|key| lookup(fields, key).and_then(|value| parse_timestamp(value, tz)));

    let mut flags = ReadingFlags::default();
    let timestamp = match parsed {
        Some(ts) => ts,
        None => {
            tracing::debug!("unparseable timestamp in raw reading, substituting now");
            flags.timestamp_fallback = true;
            now
        }
    };

    let mut values = [None; 4];
    for (slot, parameter) in values.iter_mut().zip(Parameter::ALL) {
        *slot = lookup(fields, parameter.key()).and_then(parse_number);

        if let Some(value) = *slot {
            if !parameter.in_bounds(value) {
                tracing::debug!(%parameter, value, "value outside sanity bounds");
                flags.out_of_range.push(parameter);
            }
        }
    }

    let [ph, temperature, turbidity, salinity] = values;
    let present = values.iter().filter(|v| v.is_some()).count();

    SensorReading {
        timestamp,
        ph,
        temperature,
        turbidity,
        salinity,
        quality: Quality::from_present(present),
        flags,
    }
}

/// Normalize a batch, preserving order.
pub fn normalize_all(raws: &[RawReading], tz: &Tz, now: DateTime<Utc>) -> Vec<SensorReading> {
    raws.iter().map(|raw| normalize(raw, tz, now)).collect()
}

/// Case-tolerant field lookup: exact key, then lowercase key, then any casing.
pub fn lookup<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    // ---
    if let Some(value) = fields.get(key).filter(|v| !v.is_null()) {
        return Some(value);
    }
    let lower = key.to_ascii_lowercase();
    if let Some(value) = fields.get(&lower).filter(|v| !v.is_null()) {
        return Some(value);
    }
    fields
        .iter()
        .find(|(k, v)| k.eq_ignore_ascii_case(key) && !v.is_null())
        .map(|(_, v)| v)
}

/// Parse any accepted timestamp representation.
///
/// Firestore-style wrapper objects win over plain strings and numbers since
/// they carry an exact instant.
pub fn parse_timestamp(value: &Value, tz: &Tz) -> Option<DateTime<Utc>> {
    match value {
        Value::Object(obj) => parse_timestamp_wrapper(obj, tz),
        Value::String(s) => parse_timestamp_str(s, tz),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn parse_timestamp_wrapper(obj: &Map<String, Value>, tz: &Tz) -> Option<DateTime<Utc>> {
    // ---
    let seconds = ["seconds", "_seconds"]
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(as_i64);

    if let Some(seconds) = seconds {
        let nanos = ["nanoseconds", "_nanoseconds", "nanos"]
            .iter()
            .find_map(|k| obj.get(*k))
            .and_then(as_i64)
            .filter(|n| (0..1_000_000_000).contains(n))
            .unwrap_or(0);
        return DateTime::from_timestamp(seconds, nanos as u32);
    }

    obj.get("timestampValue")
        .and_then(Value::as_str)
        .and_then(|s| parse_timestamp_str(s, tz))
}

fn parse_timestamp_str(s: &str, tz: &Tz) -> Option<DateTime<Utc>> {
    // ---
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(resolve_local(tz, naive).with_timezone(&Utc));
        }
    }

    s.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numbers or numeric strings; NaN and infinities count as absent.
pub fn parse_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{TimeZone, Timelike};
    use chrono_tz::America::New_York;
    use serde_json::json;

    fn test_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn create_test_raw(value: Value) -> RawReading {
        // ---
        match value {
            Value::Object(map) => RawReading::from(map),
            other => panic!("test fixture must be an object, got {other}"),
        }
    }

    #[test]
    fn test_firestore_wrapper_is_preferred() {
        // ---
        let raw = create_test_raw(json!({
            "timestamp": { "seconds": 1_735_737_300, "nanoseconds": 500_000_000 },
            "pH": 7.0
        }));
        let reading = normalize(&raw, &New_York, test_now());

        assert_eq!(reading.timestamp.timestamp(), 1_735_737_300);
        assert_eq!(reading.timestamp.timestamp_subsec_millis(), 500);
        assert!(!reading.flags.timestamp_fallback);
    }

    #[test]
    fn test_admin_sdk_wrapper_and_rest_wrapper() {
        // ---
        let admin = create_test_raw(json!({ "timestamp": { "_seconds": 1_700_000_000, "_nanoseconds": 0 } }));
        let rest = create_test_raw(json!({ "timestamp": { "timestampValue": "2023-11-14T22:13:20Z" } }));

        let a = normalize(&admin, &New_York, test_now());
        let b = normalize(&rest, &New_York, test_now());
        assert_eq!(a.timestamp, b.timestamp);
    }

    #[test]
    fn test_timestamp_string_shapes() {
        // ---
        let rfc = create_test_raw(json!({ "timestamp": "2025-01-01T13:15:00Z" }));
        let naive = create_test_raw(json!({ "timestamp": "2025-01-01T08:15:00" }));
        let spaced = create_test_raw(json!({ "Timestamp": "2025-01-01 08:15:00.000" }));
        let millis = create_test_raw(json!({ "time": 1_735_737_300_000_i64 }));
        let millis_str = create_test_raw(json!({ "timestamp": "1735737300000" }));

        let expected = Utc.with_ymd_and_hms(2025, 1, 1, 13, 15, 0).unwrap();
        for raw in [rfc, naive, spaced, millis, millis_str] {
            assert_eq!(normalize(&raw, &New_York, test_now()).timestamp, expected, "{raw:?}");
        }
    }

    #[test]
    fn test_unparseable_timestamp_falls_back_to_now() {
        // ---
        let raw = create_test_raw(json!({ "timestamp": "yesterday-ish", "pH": 7.2 }));
        let reading = normalize(&raw, &New_York, test_now());

        assert_eq!(reading.timestamp, test_now());
        assert!(reading.flags.timestamp_fallback);
        assert_eq!(reading.ph, Some(7.2));

        let missing = create_test_raw(json!({ "pH": 7.2 }));
        assert!(normalize(&missing, &New_York, test_now()).flags.timestamp_fallback);
    }

    #[test]
    fn test_unreadable_timestamp_key_falls_through_to_time() {
        // ---
        let raw = create_test_raw(json!({
            "timestamp": "not-a-date",
            "time": "2025-01-01T13:15:00Z",
            "pH": 7.0
        }));
        let reading = normalize(&raw, &New_York, test_now());

        assert_eq!(reading.timestamp, Utc.with_ymd_and_hms(2025, 1, 1, 13, 15, 0).unwrap());
        assert!(!reading.flags.timestamp_fallback);
    }

    #[test]
    fn test_case_insensitive_parameter_lookup() {
        // ---
        let raw = create_test_raw(json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "ph": 6.8,
            "Temperature": "21.5",
            "TURBIDITY": 3,
            "salinity": null
        }));
        let reading = normalize(&raw, &New_York, test_now());

        assert_eq!(reading.ph, Some(6.8));
        assert_eq!(reading.temperature, Some(21.5));
        assert_eq!(reading.turbidity, Some(3.0));
        assert_eq!(reading.salinity, None);
        assert_eq!(reading.quality, Quality::Good);
    }

    #[test]
    fn test_bad_numbers_become_absent() {
        // ---
        let raw = create_test_raw(json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "pH": "NaN",
            "temperature": "warm",
            "turbidity": true,
            "salinity": " 35.0 "
        }));
        let reading = normalize(&raw, &New_York, test_now());

        assert_eq!(reading.ph, None);
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.turbidity, None);
        assert_eq!(reading.salinity, Some(35.0));
        assert_eq!(reading.quality, Quality::Incomplete);
    }

    #[test]
    fn test_out_of_range_is_flagged_not_clamped() {
        // ---
        let raw = create_test_raw(json!({ "timestamp": "2025-01-01T00:00:00Z", "pH": 14.6, "temperature": 20.0 }));
        let reading = normalize(&raw, &New_York, test_now());

        assert_eq!(reading.ph, Some(14.6));
        assert_eq!(reading.flags.out_of_range, vec![Parameter::Ph]);
        assert_eq!(reading.quality, Quality::Partial);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        // ---
        let raw = create_test_raw(json!({
            "Timestamp": { "seconds": 1_735_737_300, "nanoseconds": 250_000_000 },
            "PH": "7.4",
            "temperature": 18.25,
            "salinity": 90.0
        }));
        let once = normalize(&raw, &New_York, test_now());
        let twice = normalize(&RawReading::from(&once), &New_York, test_now());

        assert_eq!(once, twice);
    }

    #[test]
    fn test_naive_time_in_gap_resolves_after_gap() {
        // ---
        let raw = create_test_raw(json!({ "timestamp": "2025-03-09T02:30:00" }));
        let reading = normalize(&raw, &New_York, test_now());
        assert_eq!(reading.timestamp.with_timezone(&New_York).hour(), 3);
    }
}
