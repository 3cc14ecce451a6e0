//! Calendar and lag feature generation.
//!
//! Calendar fields are pure functions of each row's timestamp. Lag features
//! look values up by timestamp (`T - k * step`), never by row offset, so they
//! stay aligned even if the input timeline were not contiguous.

use crate::error::{PipelineError, Result};
use crate::utils::{float_values, from_millis, key_values};
use chrono::{Datelike, TimeDelta, Timelike};
use polars::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info};

/// Hour of day, 0-23.
pub const HOUR_COLUMN: &str = "hour";
/// Calendar month minus one, 0-11.
pub const MONTH_COLUMN: &str = "month";
/// Day of week, 0 = Monday through 6 = Sunday.
pub const DAY_OF_WEEK_COLUMN: &str = "dayofweek";

/// Name of the `k`-step lag column for `variable`.
pub fn lag_column_name(variable: &str, k: usize) -> String {
    format!("{}_lag{}", variable, k)
}

/// Append `hour`, `month` and `dayofweek` derived from the key column.
pub fn calendar_features(df: &DataFrame, key_column: &str) -> Result<DataFrame> {
    let stamps: Vec<_> = key_values(df, key_column)?
        .into_iter()
        .map(|ms| ms.and_then(from_millis))
        .collect();

    let hour: Vec<Option<i32>> = stamps.iter().map(|t| t.map(|t| t.hour() as i32)).collect();
    let month: Vec<Option<i32>> = stamps.iter().map(|t| t.map(|t| t.month0() as i32)).collect();
    let dayofweek: Vec<Option<i32>> = stamps
        .iter()
        .map(|t| t.map(|t| t.weekday().num_days_from_monday() as i32))
        .collect();

    append_columns(
        df,
        vec![
            Series::new(HOUR_COLUMN.into(), hour).into(),
            Series::new(MONTH_COLUMN.into(), month).into(),
            Series::new(DAY_OF_WEEK_COLUMN.into(), dayofweek).into(),
        ],
    )
}

/// Append `<var>_lag1 ..= <var>_lag<depth>` for each variable.
///
/// `<var>_lag<k>` at time `T` holds the value of `var` at `T - k * step`,
/// or null when that time is not in the table.
///
/// # Errors
///
/// Returns [`PipelineError::Schema`] if a variable is not a column of `df`.
pub fn lag_features(
    df: &DataFrame,
    key_column: &str,
    variables: &[String],
    depth: usize,
    step: TimeDelta,
) -> Result<DataFrame> {
    let keys = key_values(df, key_column)?;
    let step_ms = step.num_milliseconds();
    let mut columns: Vec<Column> = Vec::with_capacity(variables.len() * depth);

    for variable in variables {
        if df.column(variable).is_err() {
            return Err(PipelineError::Schema(variable.clone()));
        }
        let values = float_values(df, variable)?;
        let by_time: HashMap<i64, Option<f64>> = keys
            .iter()
            .zip(values.iter())
            .filter_map(|(key, value)| key.map(|k| (k, *value)))
            .collect();

        for k in 1..=depth {
            let offset = step_ms * k as i64;
            let lagged: Vec<Option<f64>> = keys
                .iter()
                .map(|key| key.and_then(|t| by_time.get(&(t - offset)).copied().flatten()))
                .collect();
            columns.push(Series::new(lag_column_name(variable, k).into(), lagged).into());
        }
        debug!("Generated {} lag columns for '{}'", depth, variable);
    }

    append_columns(df, columns)
}

/// Calendar features followed by lag features.
pub fn generate_features(
    df: &DataFrame,
    key_column: &str,
    variables: &[String],
    depth: usize,
    step: TimeDelta,
) -> Result<DataFrame> {
    let with_calendar = calendar_features(df, key_column)?;
    let with_lags = lag_features(&with_calendar, key_column, variables, depth, step)?;
    info!(
        "Feature generation complete: {} -> {} columns",
        df.width(),
        with_lags.width()
    );
    Ok(with_lags)
}

fn append_columns(df: &DataFrame, columns: Vec<Column>) -> Result<DataFrame> {
    if let Some(existing) = columns.iter().find(|c| df.column(c.name()).is_ok()) {
        return Err(PipelineError::InvalidConfig(format!(
            "feature column '{}' already exists in the table",
            existing.name()
        )));
    }
    Ok(df.hstack(&columns)?)
}
