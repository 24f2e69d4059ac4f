//! Time-bucket aggregation.
//!
//! Readings are grouped by local wall-clock window and each window is
//! reduced to per-parameter means:
//!
//! | filter             | window        | key                       |
//! |--------------------|---------------|---------------------------|
//! | daily              | 2 hours       | local date + even hour    |
//! | weekly, monthly    | 1 day         | local date, 00:00         |
//! | annually           | 1 month       | first local day of month  |
//!
//! Windows are cut in the device zone, not UTC, so "the 8-10 AM bucket" means
//! 8-10 AM on the device's wall clock.

use std::collections::BTreeMap;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDateTime, NaiveTime, Offset, Timelike, Utc,
};
use chrono_tz::Tz;

use crate::models::{AggregatedBucket, Parameter, SampleCounts, SensorReading, TimeFilter};
use crate::range::resolve_local;

// ---

/// Local wall-clock start of the bucket containing `timestamp`.
pub fn bucket_key(timestamp: DateTime<Utc>, filter: TimeFilter, tz: &Tz) -> NaiveDateTime {
    // ---
    let local = timestamp.with_timezone(tz).naive_local();
    let date = local.date();

    match filter {
        TimeFilter::Daily => {
            let even_hour = (local.hour() / 2) * 2;
            date.and_time(NaiveTime::from_hms_opt(even_hour, 0, 0).unwrap_or(NaiveTime::MIN))
        }
        TimeFilter::Weekly | TimeFilter::Monthly => date.and_time(NaiveTime::MIN),
        TimeFilter::Annually => {
            (date - Duration::days(date.day0() as i64)).and_time(NaiveTime::MIN)
        }
    }
}

/// Absolute start of a bucket, annotated with the local offset in force then.
pub fn bucket_start(key: NaiveDateTime, tz: &Tz) -> DateTime<FixedOffset> {
    let local = resolve_local(tz, key);
    let offset = local.offset().fix();
    local.with_timezone(&offset)
}

#[derive(Debug, Default)]
struct Accumulator {
    sums: [f64; 4],
    counts: [usize; 4],
}

impl Accumulator {
    fn add(&mut self, reading: &SensorReading) {
        for (i, parameter) in Parameter::ALL.iter().enumerate() {
            if let Some(value) = reading.value(*parameter) {
                self.sums[i] += value;
                self.counts[i] += 1;
            }
        }
    }

    fn mean(&self, i: usize) -> Option<f64> {
        (self.counts[i] > 0).then(|| self.sums[i] / self.counts[i] as f64)
    }

    fn finish(self, bucket_start: DateTime<FixedOffset>) -> AggregatedBucket {
        AggregatedBucket {
            bucket_start,
            ph: self.mean(0),
            temperature: self.mean(1),
            turbidity: self.mean(2),
            salinity: self.mean(3),
            sample_counts: SampleCounts {
                ph: self.counts[0],
                temperature: self.counts[1],
                turbidity: self.counts[2],
                salinity: self.counts[3],
            },
        }
    }
}

/// Bucket and average readings, ascending by bucket start.
///
/// Every reading lands in exactly one bucket. A bucket whose readings carry no
/// value for a parameter reports `None` for it; a bucket with no values at all
/// is still emitted so callers can render the gap. Empty input gives empty output.
///
/// Timestamps are taken at face value: readings whose timestamp was
/// substituted during normalization must be dropped by the caller first.
pub fn aggregate(readings: &[SensorReading], filter: TimeFilter, tz: &Tz) -> Vec<AggregatedBucket> {
    // ---
    let mut buckets: BTreeMap<NaiveDateTime, Accumulator> = BTreeMap::new();

    for reading in readings {
        buckets
            .entry(bucket_key(reading.timestamp, filter, tz))
            .or_default()
            .add(reading);
    }

    buckets
        .into_iter()
        .map(|(key, acc)| acc.finish(bucket_start(key, tz)))
        .collect()
}
