//! Test utilities for dashboard tests
//!
//! Sample fixtures and response builders shared by unit and integration
//! tests.

use serde_json::{Value, json};

use crate::datamodel::{CaosDateTime, CaosDateTimeExt, DateRange, Sample};

/// Midnight UTC, 2024-01-01. All fixtures hang off this instant.
pub const TEST_EPOCH_SECONDS: f64 = 1_704_067_200.0;

/// A sample `hours` hours after the test epoch.
pub fn sample_at(hours: u64, value: f64) -> Sample {
    Sample::new(
        CaosDateTime::from_unix_seconds_f64(TEST_EPOCH_SECONDS + hours as f64 * 3600.0),
        value,
    )
}

/// Hourly samples starting at the test epoch, one per value.
pub fn samples_hourly(values: &[f64]) -> Vec<Sample> {
    values
        .iter()
        .enumerate()
        .map(|(hour, value)| sample_at(hour as u64, *value))
        .collect()
}

/// A day-long window starting at the test epoch.
pub fn test_range() -> DateRange {
    let start = CaosDateTime::from_unix_seconds_f64(TEST_EPOCH_SECONDS);
    DateRange {
        start,
        end: start + hifitime::Duration::from_days(1.0),
    }
}

/// The GraphQL response body the API serves for a samples query.
pub fn graphql_samples_response(samples: &[(f64, f64)]) -> Value {
    let samples: Vec<Value> = samples
        .iter()
        .map(|(unix_ts, v)| json!({ "unix_ts": unix_ts, "v": v }))
        .collect();
    json!({ "data": { "samples": samples } })
}
