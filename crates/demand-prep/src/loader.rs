//! Loading and merging of the raw demand and weather sources.
//!
//! Each source is a CSV with a header, a timestamp column and one or more
//! numeric value columns. After [`normalize_source`] the key is a `Datetime`
//! column and every value column is `Float64`. [`merge_sources`] then performs
//! a full outer join on the key.

use crate::error::{PipelineError, Result};
use crate::utils::{is_numeric_dtype, key_series, parse_timestamp, series, to_millis, value_columns};
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// Read a raw CSV source and normalize it.
///
/// Fails with [`PipelineError::Parse`] when the file cannot be read, lacks
/// the timestamp column, or holds unparseable values.
pub fn read_source(
    path: &Path,
    source_name: &str,
    timestamp_column: &str,
) -> Result<DataFrame> {
    info!("Loading {} source from: {}", source_name, path.display());

    let df = CsvReadOptions::default()
        .with_infer_schema_length(Some(100))
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| {
            PipelineError::parse(source_name, format!("cannot read {}: {}", path.display(), e))
        })?;

    debug!("{} source shape: {:?}", source_name, df.shape());
    normalize_source(&df, source_name, timestamp_column)
}

/// Parse the key column and coerce every value column to `Float64`.
///
/// Blank strings and nulls become missing values; any other string that is
/// not a number is an error rather than a silent null.
pub fn normalize_source(
    df: &DataFrame,
    source_name: &str,
    timestamp_column: &str,
) -> Result<DataFrame> {
    let raw_key = df.column(timestamp_column).map_err(|_| {
        PipelineError::parse(
            source_name,
            format!("missing timestamp column '{}'", timestamp_column),
        )
    })?;
    let keys = parse_key_column(raw_key.as_materialized_series(), source_name)?;

    let mut seen = BTreeSet::new();
    for (row, key) in keys.iter().enumerate() {
        if !seen.insert(*key) {
            return Err(PipelineError::parse(
                source_name,
                format!("duplicate timestamp at row {}", row + 1),
            ));
        }
    }

    let mut columns: Vec<Column> = Vec::with_capacity(df.width());
    columns.push(key_series(timestamp_column, keys.into_iter().map(Some).collect())?.into());

    for name in value_columns(df, timestamp_column) {
        let values = coerce_to_float(series(df, &name)?, source_name)?;
        columns.push(values.into());
    }

    Ok(DataFrame::new(columns)?)
}

/// Full outer join of the two sources on the key column.
///
/// Both inputs go through [`normalize_source`] first, so a value that cannot
/// be coerced to `Float64` is an error here too. The result holds one row per
/// distinct timestamp seen in either source, sorted ascending. Columns unique
/// to a source are null where that source lacked the timestamp.
pub fn merge_sources(
    demand: &DataFrame,
    weather: &DataFrame,
    timestamp_column: &str,
    demand_column: &str,
) -> Result<DataFrame> {
    if demand.column(demand_column).is_err() {
        return Err(PipelineError::Schema(demand_column.to_string()));
    }

    let demand_values = value_columns(demand, timestamp_column);
    let weather_values = value_columns(weather, timestamp_column);
    if let Some(shared) = demand_values.iter().find(|c| weather_values.contains(c)) {
        return Err(PipelineError::parse(
            "weather",
            format!("column '{}' also present in the demand source", shared),
        ));
    }

    let left = normalize_source(demand, "demand", timestamp_column)?;
    let right = normalize_source(weather, "weather", timestamp_column)?;

    let merged = left
        .lazy()
        .join(
            right.lazy(),
            [col(timestamp_column)],
            [col(timestamp_column)],
            JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
        )
        .sort([timestamp_column], SortMultipleOptions::default())
        .collect()?;

    info!(
        "Merged sources: {} demand rows + {} weather rows -> {} rows",
        demand.height(),
        weather.height(),
        merged.height()
    );
    Ok(merged)
}

fn parse_key_column(raw: &Series, source_name: &str) -> Result<Vec<i64>> {
    match raw.dtype() {
        DataType::String => raw
            .str()?
            .into_iter()
            .enumerate()
            .map(|(row, value)| {
                let text = value.unwrap_or_default();
                parse_timestamp(text).map(|ts| to_millis(&ts)).ok_or_else(|| {
                    PipelineError::parse(
                        source_name,
                        format!("row {}: '{}' is not a valid timestamp", row + 1, text),
                    )
                })
            })
            .collect(),
        DataType::Datetime(_, _) | DataType::Date => {
            let physical = raw
                .cast(&crate::utils::key_dtype())?
                .cast(&DataType::Int64)?;
            physical
                .i64()?
                .into_iter()
                .enumerate()
                .map(|(row, value)| {
                    value.ok_or_else(|| {
                        PipelineError::parse(source_name, format!("row {}: missing timestamp", row + 1))
                    })
                })
                .collect()
        }
        other => Err(PipelineError::parse(
            source_name,
            format!("timestamp column has unsupported type {}", other),
        )),
    }
}

/// Coerce a value column to `Float64`.
///
/// NaN becomes null. Infinite values are rejected along with unparseable text.
fn coerce_to_float(raw: &Series, source_name: &str) -> Result<Series> {
    let name = raw.name().clone();
    let floats = match raw.dtype() {
        DataType::Float64 => raw.clone(),
        DataType::Null => raw.cast(&DataType::Float64)?,
        dtype if is_numeric_dtype(dtype) => raw.cast(&DataType::Float64)?,
        DataType::String => {
            let parsed = raw
                .str()?
                .into_iter()
                .enumerate()
                .map(|(row, value)| match value.map(str::trim) {
                    None | Some("") => Ok(None),
                    Some(text) => text.parse::<f64>().map(Some).map_err(|_| {
                        PipelineError::parse(
                            source_name,
                            format!("column '{}' row {}: '{}' is not numeric", name, row + 1, text),
                        )
                    }),
                })
                .collect::<Result<Vec<Option<f64>>>>()?;
            Series::new(name.clone(), parsed)
        }
        other => {
            return Err(PipelineError::parse(
                source_name,
                format!("column '{}' has non-numeric type {}", name, other),
            ));
        }
    };

    let finite = floats
        .f64()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value {
            Some(v) if v.is_nan() => Ok(None),
            Some(v) if v.is_infinite() => Err(PipelineError::parse(
                source_name,
                format!("column '{}' row {}: value {} is not finite", name, row + 1, v),
            )),
            other => Ok(other),
        })
        .collect::<Result<Vec<Option<f64>>>>()?;
    Ok(Series::new(name, finite))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{float_values, from_millis, key_values};
    use pretty_assertions::assert_eq;

    fn hours(df: &DataFrame) -> Vec<String> {
        key_values(df, "timestamp")
            .unwrap()
            .into_iter()
            .map(|ms| from_millis(ms.unwrap()).unwrap().format("%H:%M").to_string())
            .collect()
    }

    #[test]
    fn test_normalize_parses_strings_and_coerces_demand() {
        let raw = df![
            "timestamp" => ["2016-01-01 00:00:00", "2016-01-01 01:00:00"],
            "demand" => ["5", " "],
        ]
        .unwrap();

        let df = normalize_source(&raw, "demand", "timestamp").unwrap();

        assert_eq!(df.column("timestamp").unwrap().dtype(), &crate::utils::key_dtype());
        assert_eq!(df.column("demand").unwrap().dtype(), &DataType::Float64);
        assert_eq!(float_values(&df, "demand").unwrap(), vec![Some(5.0), None]);
    }

    #[test]
    fn test_normalize_rejects_unparseable_value() {
        let raw = df![
            "timestamp" => ["2016-01-01 00:00:00"],
            "demand" => ["lots"],
        ]
        .unwrap();

        let err = normalize_source(&raw, "demand", "timestamp").unwrap_err();
        assert_eq!(err.error_code(), "PARSE_ERROR");
        assert!(err.to_string().contains("lots"));
    }

    #[test]
    fn test_normalize_requires_timestamp_column() {
        let raw = df!["time" => ["2016-01-01 00:00:00"], "temp" => [1.0]].unwrap();
        let err = normalize_source(&raw, "weather", "timestamp").unwrap_err();
        assert_eq!(err.error_code(), "PARSE_ERROR");
    }

    #[test]
    fn test_normalize_rejects_duplicate_timestamps() {
        let raw = df![
            "timestamp" => ["2016-01-01 00:00:00", "2016-01-01 00:00:00"],
            "temp" => [1.0, 2.0],
        ]
        .unwrap();
        assert!(normalize_source(&raw, "weather", "timestamp").is_err());
    }

    #[test]
    fn test_merge_is_full_outer_join() {
        let demand = normalize_source(
            &df![
                "timestamp" => ["2016-01-01 00:00:00", "2016-01-01 02:00:00"],
                "demand" => [5.0, 7.0],
            ]
            .unwrap(),
            "demand",
            "timestamp",
        )
        .unwrap();
        let weather = normalize_source(
            &df![
                "timestamp" => ["2016-01-01 01:00:00", "2016-01-01 02:00:00", "2016-01-01 03:00:00"],
                "temp" => [1.0, 2.0, 3.0],
            ]
            .unwrap(),
            "weather",
            "timestamp",
        )
        .unwrap();

        let merged = merge_sources(&demand, &weather, "timestamp", "demand").unwrap();

        assert_eq!(hours(&merged), vec!["00:00", "01:00", "02:00", "03:00"]);
        assert_eq!(
            float_values(&merged, "demand").unwrap(),
            vec![Some(5.0), None, Some(7.0), None]
        );
        assert_eq!(
            float_values(&merged, "temp").unwrap(),
            vec![None, Some(1.0), Some(2.0), Some(3.0)]
        );
    }

    #[test]
    fn test_merge_requires_demand_column() {
        let demand = normalize_source(
            &df!["timestamp" => ["2016-01-01 00:00:00"], "load" => [1.0]].unwrap(),
            "demand",
            "timestamp",
        )
        .unwrap();
        let weather = normalize_source(
            &df!["timestamp" => ["2016-01-01 00:00:00"], "temp" => [1.0]].unwrap(),
            "weather",
            "timestamp",
        )
        .unwrap();

        let err = merge_sources(&demand, &weather, "timestamp", "demand").unwrap_err();
        assert!(matches!(err, PipelineError::Schema(ref c) if c == "demand"));
    }

    #[test]
    fn test_merge_rejects_overlapping_columns() {
        let demand = normalize_source(
            &df!["timestamp" => ["2016-01-01 00:00:00"], "demand" => [1.0]].unwrap(),
            "demand",
            "timestamp",
        )
        .unwrap();
        let weather = normalize_source(
            &df!["timestamp" => ["2016-01-01 00:00:00"], "demand" => [2.0]].unwrap(),
            "weather",
            "timestamp",
        )
        .unwrap();

        assert!(merge_sources(&demand, &weather, "timestamp", "demand").is_err());
    }

    #[test]
    fn test_merge_coerces_unnormalized_values() {
        let raw_demand = df![
            "timestamp" => ["2016-01-01 00:00:00", "2016-01-01 01:00:00"],
            "demand" => [5.0, 6.0],
        ]
        .unwrap();
        let normalized = normalize_source(&raw_demand, "demand", "timestamp").unwrap();
        let demand = DataFrame::new(vec![
            normalized.column("timestamp").unwrap().clone(),
            Series::new("demand".into(), ["5", "lots"]).into(),
        ])
        .unwrap();
        let weather = normalize_source(
            &df!["timestamp" => ["2016-01-01 00:00:00"], "temp" => [1.0]].unwrap(),
            "weather",
            "timestamp",
        )
        .unwrap();

        let err = merge_sources(&demand, &weather, "timestamp", "demand").unwrap_err();

        assert_eq!(err.error_code(), "PARSE_ERROR");
        assert!(err.to_string().contains("lots"));
    }

    #[test]
    fn test_normalize_rejects_infinite_values() {
        let raw = df![
            "timestamp" => ["2016-01-01 00:00:00", "2016-01-01 01:00:00"],
            "demand" => [f64::INFINITY, 1.0],
        ]
        .unwrap();
        let err = normalize_source(&raw, "demand", "timestamp").unwrap_err();
        assert_eq!(err.error_code(), "PARSE_ERROR");

        let text = df![
            "timestamp" => ["2016-01-01 00:00:00"],
            "demand" => ["-inf"],
        ]
        .unwrap();
        assert!(normalize_source(&text, "demand", "timestamp").is_err());
    }

    #[test]
    fn test_normalize_turns_nan_into_null() {
        let raw = df![
            "timestamp" => ["2016-01-01 00:00:00", "2016-01-01 01:00:00"],
            "demand" => [f64::NAN, 1.0],
        ]
        .unwrap();
        let df = normalize_source(&raw, "demand", "timestamp").unwrap();
        assert_eq!(df.column("demand").unwrap().null_count(), 1);
    }

    #[test]
    fn test_read_source_missing_file_is_parse_error() {
        let err = read_source(Path::new("/nonexistent/demand.csv"), "demand", "timestamp")
            .unwrap_err();
        assert_eq!(err.error_code(), "PARSE_ERROR");
    }
}
