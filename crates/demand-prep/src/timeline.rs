//! Timeline regularization.
//!
//! Rebuilds the merged table on a contiguous, fixed-step time index running
//! from the earliest to the latest observed timestamp, inclusive. Hours that
//! neither source reported become rows whose value columns are all null; their
//! key is taken from the timeline itself.

use crate::error::{PipelineError, Result};
use crate::utils::{from_millis, key_dtype, key_series, key_values, to_millis};
use chrono::{NaiveDateTime, TimeDelta};
use polars::prelude::*;
use std::collections::HashSet;
use tracing::{debug, info};

/// A regularized table together with reindexing statistics.
#[derive(Debug, Clone)]
pub struct Regularized {
    /// The table on the contiguous timeline.
    pub frame: DataFrame,
    /// Number of rows that were absent from the merged input.
    pub synthesized_rows: usize,
}

/// Every timestamp from `start` to `end` inclusive, `step` apart.
///
/// Returns an empty vector when `end < start` or the step is not positive.
pub fn expected_timeline(
    start: NaiveDateTime,
    end: NaiveDateTime,
    step: TimeDelta,
) -> Vec<NaiveDateTime> {
    timeline_millis(to_millis(&start), to_millis(&end), step.num_milliseconds())
        .into_iter()
        .filter_map(from_millis)
        .collect()
}

fn timeline_millis(start: i64, end: i64, step_ms: i64) -> Vec<i64> {
    if step_ms <= 0 || end < start {
        return Vec::new();
    }
    let slots = (end - start) / step_ms + 1;
    (0..slots).map(|i| start + i * step_ms).collect()
}

/// Reindex `df` onto the full timeline between its min and max key.
///
/// # Errors
///
/// - [`PipelineError::EmptyInput`] when the table has no rows or no keys.
/// - [`PipelineError::Parse`] when a timestamp is off the step grid anchored
///   at the earliest timestamp, or appears twice.
pub fn regularize(df: &DataFrame, key_column: &str, step: TimeDelta) -> Result<Regularized> {
    if df.height() == 0 {
        return Err(PipelineError::EmptyInput(
            "merged table has no rows".to_string(),
        ));
    }

    let keys = key_values(df, key_column)?;
    let (min, max) = keys
        .iter()
        .flatten()
        .fold(None, |acc: Option<(i64, i64)>, &k| match acc {
            None => Some((k, k)),
            Some((lo, hi)) => Some((lo.min(k), hi.max(k))),
        })
        .ok_or_else(|| PipelineError::EmptyInput("merged table has no timestamps".to_string()))?;

    let step_ms = step.num_milliseconds();
    if step_ms <= 0 {
        return Err(PipelineError::InvalidConfig(format!(
            "timeline step must be positive, got {}",
            step
        )));
    }

    let mut observed: HashSet<i64> = HashSet::with_capacity(keys.len());
    for key in keys.iter().flatten() {
        let shown = || from_millis(*key).map(|ts| ts.to_string()).unwrap_or_default();
        if (key - min) % step_ms != 0 {
            return Err(PipelineError::parse(
                "merged",
                format!("timestamp {} is not aligned to the {} grid", shown(), step),
            ));
        }
        if !observed.insert(*key) {
            return Err(PipelineError::parse(
                "merged",
                format!("duplicate timestamp {}", shown()),
            ));
        }
    }

    let timeline = timeline_millis(min, max, step_ms);
    let synthesized_rows = timeline.len() - observed.len();
    let grid = DataFrame::new(vec![
        key_series(key_column, timeline.into_iter().map(Some).collect())?.into(),
    ])?;

    let frame = grid
        .lazy()
        .join(
            df.clone()
                .lazy()
                .with_column(col(key_column).cast(key_dtype())),
            [col(key_column)],
            [col(key_column)],
            JoinArgs::new(JoinType::Left),
        )
        .sort([key_column], SortMultipleOptions::default())
        .collect()?;

    info!(
        "Regularized timeline: {} rows ({} synthesized) from {} to {}",
        frame.height(),
        synthesized_rows,
        from_millis(min).map(|t| t.to_string()).unwrap_or_default(),
        from_millis(max).map(|t| t.to_string()).unwrap_or_default(),
    );
    debug!("Reindexed {} value columns", frame.width() - 1);

    Ok(Regularized {
        frame,
        synthesized_rows,
    })
}

/// Whether the key column is gap-free, duplicate-free and `step` apart.
pub fn is_contiguous(df: &DataFrame, key_column: &str, step: TimeDelta) -> Result<bool> {
    let keys = key_values(df, key_column)?;
    let step_ms = step.num_milliseconds();
    let mut previous: Option<i64> = None;
    for key in keys {
        let Some(key) = key else { return Ok(false) };
        if let Some(prev) = previous
            && key - prev != step_ms
        {
            return Ok(false);
        }
        previous = Some(key);
    }
    Ok(true)
}
