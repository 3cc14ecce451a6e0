//! Final null removal and the train/test split.

use crate::error::Result;
use crate::utils::{key_values, to_millis};
use chrono::NaiveDateTime;
use polars::prelude::*;
use tracing::info;

/// The three output tables.
#[derive(Debug, Clone)]
pub struct SplitTables {
    /// Every complete row, before splitting.
    pub processed: DataFrame,
    /// Rows strictly before the cutoff.
    pub train: DataFrame,
    /// Rows at or after the cutoff.
    pub test: DataFrame,
}

/// Remove every row that holds a null, or a NaN float, in any column.
pub fn drop_incomplete_rows(df: &DataFrame) -> Result<DataFrame> {
    let non_null = df.drop_nulls::<String>(None)?;

    let mut keep = vec![true; non_null.height()];
    for column in non_null.get_columns() {
        if let Ok(values) = column.as_materialized_series().f64() {
            for (flag, value) in keep.iter_mut().zip(values.into_iter()) {
                if value.is_some_and(f64::is_nan) {
                    *flag = false;
                }
            }
        }
    }
    let complete = non_null.filter(&BooleanChunked::from_slice("complete".into(), &keep))?;
    info!(
        "Dropped {} incomplete rows ({} remain)",
        df.height() - complete.height(),
        complete.height()
    );
    Ok(complete)
}

/// Partition rows by `cutoff`, keeping row order within each side.
pub fn split_at(
    df: &DataFrame,
    key_column: &str,
    cutoff: NaiveDateTime,
) -> Result<(DataFrame, DataFrame)> {
    let cutoff_ms = to_millis(&cutoff);
    let before: Vec<bool> = key_values(df, key_column)?
        .into_iter()
        .map(|key| key.is_some_and(|k| k < cutoff_ms))
        .collect();
    let after: Vec<bool> = before.iter().map(|b| !b).collect();

    let train = df.filter(&BooleanChunked::from_slice("train".into(), &before))?;
    let test = df.filter(&BooleanChunked::from_slice("test".into(), &after))?;
    Ok((train, test))
}

/// Drop incomplete rows, then split at `cutoff`.
pub fn finalize(df: &DataFrame, key_column: &str, cutoff: NaiveDateTime) -> Result<SplitTables> {
    let processed = drop_incomplete_rows(df)?;
    let (train, test) = split_at(&processed, key_column, cutoff)?;
    info!(
        "Split at {}: {} train rows, {} test rows",
        cutoff,
        train.height(),
        test.height()
    );
    Ok(SplitTables {
        processed,
        train,
        test,
    })
}
