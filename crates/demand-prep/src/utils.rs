//! Shared helpers for timestamps and column access.
//!
//! Timestamps travel through the pipeline as a polars `Datetime` column in
//! milliseconds without a timezone. Stage code reads them back as epoch
//! milliseconds, which keeps timeline arithmetic in plain `i64`.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;

// =============================================================================
// Timestamp Utilities
// =============================================================================

/// Time unit of every key column produced by the pipeline.
pub const KEY_TIME_UNIT: TimeUnit = TimeUnit::Milliseconds;

/// Format used when writing timestamps to CSV.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Accepted naive timestamp layouts, tried in order.
const NAIVE_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// The dtype of a key column.
pub fn key_dtype() -> DataType {
    DataType::Datetime(KEY_TIME_UNIT, None)
}

/// Convert a naive timestamp to epoch milliseconds.
#[inline]
pub fn to_millis(ts: &NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_millis()
}

/// Convert epoch milliseconds back to a naive timestamp.
#[inline]
pub fn from_millis(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

/// Parse an ISO-8601 style timestamp.
///
/// RFC 3339 values with an offset are converted to UTC; a bare date is read
/// as midnight.
///
/// # Example
///
/// ```rust,ignore
/// use demand_prep::utils::parse_timestamp;
///
/// assert!(parse_timestamp("2016-03-15 14:00:00").is_some());
/// assert!(parse_timestamp("2016-03-15T14:00:00+02:00").is_some());
/// assert!(parse_timestamp("yesterday").is_none());
/// ```
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts);
        }
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

// =============================================================================
// Column Utilities
// =============================================================================

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Fetch a column as a materialized series, mapping absence to a schema error.
pub fn series<'a>(df: &'a DataFrame, column: &str) -> Result<&'a Series> {
    df.column(column)
        .map(|col| col.as_materialized_series())
        .map_err(|_| PipelineError::Schema(column.to_string()))
}

/// Read a key column as epoch milliseconds.
pub fn key_values(df: &DataFrame, column: &str) -> Result<Vec<Option<i64>>> {
    let physical = series(df, column)?.cast(&DataType::Int64)?;
    Ok(physical.i64()?.into_iter().collect())
}

/// Build a key column from epoch milliseconds.
pub fn key_series(name: &str, values: Vec<Option<i64>>) -> PolarsResult<Series> {
    Series::new(name.into(), values).cast(&key_dtype())
}

/// Read a numeric column as `f64`; NaN counts as missing.
pub fn float_values(df: &DataFrame, column: &str) -> Result<Vec<Option<f64>>> {
    let floats = series(df, column)?.cast(&DataType::Float64)?;
    Ok(floats
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect())
}

/// Names of every column except the key, in frame order.
pub fn value_columns(df: &DataFrame, key_column: &str) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .filter(|name| name.as_str() != key_column)
        .map(|name| name.to_string())
        .collect()
}

/// Total number of null cells in a frame.
pub fn null_cells(df: &DataFrame) -> usize {
    df.get_columns().iter().map(|col| col.null_count()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2016, 3, 15)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();

        assert_eq!(parse_timestamp("2016-03-15 14:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2016-03-15T14:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2016-03-15 14:00"), Some(expected));
        assert_eq!(parse_timestamp(" 2016-03-15 14:00:00 "), Some(expected));
        assert_eq!(parse_timestamp("2016-03-15T16:00:00+02:00"), Some(expected));
    }

    #[test]
    fn test_parse_timestamp_bare_date_is_midnight() {
        let ts = parse_timestamp("2016-03-15").unwrap();
        assert_eq!(ts.to_string(), "2016-03-15 00:00:00");
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp("2016-13-40 00:00:00"), None);
    }

    #[test]
    fn test_millis_roundtrip() {
        let ts = parse_timestamp("2012-01-01 05:00:00").unwrap();
        assert_eq!(from_millis(to_millis(&ts)), Some(ts));
    }

    #[test]
    fn test_key_series_is_datetime() {
        let ts = parse_timestamp("2012-01-01 00:00:00").unwrap();
        let key = key_series("timestamp", vec![Some(to_millis(&ts)), None]).unwrap();
        assert_eq!(key.dtype(), &key_dtype());
        assert_eq!(key.null_count(), 1);
    }

    #[test]
    fn test_float_values_treats_nan_as_missing() {
        let df = df!["temp" => [Some(1.0), Some(f64::NAN), None]].unwrap();
        assert_eq!(
            float_values(&df, "temp").unwrap(),
            vec![Some(1.0), None, None]
        );
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let df = df!["temp" => [1.0]].unwrap();
        let err = float_values(&df, "demand").unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_ERROR");
    }

    #[test]
    fn test_value_columns_skip_key() {
        let df = df![
            "timestamp" => [1i64],
            "demand" => [1.0],
            "temp" => [2.0],
        ]
        .unwrap();
        assert_eq!(value_columns(&df, "timestamp"), vec!["demand", "temp"]);
    }
}
