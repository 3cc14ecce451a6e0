//! Missing-value resolution on the regularized table.
//!
//! Two rules are applied in order:
//!
//! 1. Bounded linear interpolation for every numeric value column that is not
//!    a mode-fill column. A run of nulls is filled only when it has a known
//!    neighbor on both sides and its length does not exceed the limit; longer
//!    runs stay entirely null.
//! 2. Mode fill for the configured default-fill columns, using the most
//!    frequent non-null value of the column before filling. Ties resolve to
//!    the smallest value.
//!
//! Nulls that survive both rules are removed later by the finalizer.

use crate::error::Result;
use crate::utils::{float_values, key_values, value_columns};
use polars::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Per-column counts of what the gap filler changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FillReport {
    /// Cells filled by interpolation, per column.
    pub interpolated: BTreeMap<String, usize>,
    /// Cells filled with the column mode, per column.
    pub mode_filled: BTreeMap<String, usize>,
    /// The mode used for each mode-filled column.
    pub modes: BTreeMap<String, f64>,
    /// Null cells left in place because their run was too long or one-sided.
    pub left_unfilled: usize,
    /// Columns that could not be processed as configured.
    pub warnings: Vec<String>,
}

impl FillReport {
    /// Total number of cells filled by either rule.
    pub fn total_filled(&self) -> usize {
        self.interpolated.values().sum::<usize>() + self.mode_filled.values().sum::<usize>()
    }
}

/// A gap-filled table and its report.
#[derive(Debug, Clone)]
pub struct Filled {
    pub frame: DataFrame,
    pub report: FillReport,
}

/// Fill a single column by bounded linear interpolation over time.
///
/// `times` holds the key of each row in ascending order. Returns the filled
/// values and the number of cells filled.
///
/// # Example
///
/// ```rust,ignore
/// let times = [0, 1, 2, 3];
/// let values = [Some(1.0), None, None, Some(4.0)];
/// let (filled, count) = interpolate_bounded(&times, &values, 6);
/// assert_eq!(filled, vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
/// assert_eq!(count, 2);
/// ```
pub fn interpolate_bounded(
    times: &[i64],
    values: &[Option<f64>],
    limit: usize,
) -> (Vec<Option<f64>>, usize) {
    let mut filled = values.to_vec();
    let mut count = 0;
    let mut last_known: Option<usize> = None;
    let mut i = 0;

    while i < values.len() {
        if values[i].is_some() {
            last_known = Some(i);
            i += 1;
            continue;
        }

        let run_start = i;
        while i < values.len() && values[i].is_none() {
            i += 1;
        }
        let run_len = i - run_start;

        let (Some(left), true) = (last_known, i < values.len()) else {
            continue;
        };
        if run_len > limit {
            continue;
        }

        let (Some(v0), Some(v1)) = (values[left], values[i]) else {
            continue;
        };
        if !(v0.is_finite() && v1.is_finite()) {
            continue;
        }
        let (t0, t1) = (times[left] as f64, times[i] as f64);
        for j in run_start..i {
            let weight = (times[j] as f64 - t0) / (t1 - t0);
            filled[j] = Some(v0 + (v1 - v0) * weight);
        }
        count += run_len;
    }

    (filled, count)
}

/// The most frequent non-null value; ties resolve to the smallest value.
///
/// `-0.0` counts as `0.0`.
pub fn column_mode(values: &[Option<f64>]) -> Option<f64> {
    let mut observed: Vec<f64> = values
        .iter()
        .flatten()
        .map(|v| if *v == 0.0 { 0.0 } else { *v })
        .collect();
    observed.sort_by(|a, b| a.total_cmp(b));

    let mut best: Option<(f64, usize)> = None;
    let mut i = 0;
    while i < observed.len() {
        let value = observed[i];
        let mut j = i;
        while j < observed.len() && observed[j].total_cmp(&value) == Ordering::Equal {
            j += 1;
        }
        let run = j - i;
        if best.is_none_or(|(_, count)| run > count) {
            best = Some((value, run));
        }
        i = j;
    }

    best.map(|(value, _)| value)
}

/// Apply interpolation and mode fill to every value column of `df`.
pub fn fill_gaps(
    df: &DataFrame,
    key_column: &str,
    interpolation_limit: usize,
    mode_columns: &[String],
) -> Result<Filled> {
    let times: Vec<i64> = key_values(df, key_column)?
        .into_iter()
        .map(|k| k.unwrap_or_default())
        .collect();
    let mut report = FillReport::default();

    for missing in mode_columns.iter().filter(|c| df.column(c).is_err()) {
        let message = format!("Mode-fill column '{}' not present, skipped", missing);
        warn!("{}", message);
        report.warnings.push(message);
    }

    let mut columns: Vec<Column> = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        let name = column.name().to_string();
        if name == key_column || column.dtype() != &DataType::Float64 {
            columns.push(column.clone());
            continue;
        }

        let values = float_values(df, &name)?;
        let filled = if mode_columns.contains(&name) {
            fill_with_mode(&name, &values, &mut report)
        } else {
            let (filled, count) = interpolate_bounded(&times, &values, interpolation_limit);
            if count > 0 {
                debug!("Interpolated {} cells in '{}'", count, name);
            }
            report.interpolated.insert(name.clone(), count);
            filled
        };

        report.left_unfilled += filled.iter().filter(|v| v.is_none()).count();
        columns.push(Series::new(name.as_str().into(), filled).into());
    }

    let frame = DataFrame::new(columns)?;
    info!(
        "Gap filling complete: {} cells filled, {} left null across {:?}",
        report.total_filled(),
        report.left_unfilled,
        value_columns(&frame, key_column)
    );
    Ok(Filled { frame, report })
}

fn fill_with_mode(name: &str, values: &[Option<f64>], report: &mut FillReport) -> Vec<Option<f64>> {
    let Some(mode) = column_mode(values) else {
        let message = format!("Column '{}' has no observed values, mode fill skipped", name);
        warn!("{}", message);
        report.warnings.push(message);
        return values.to_vec();
    };

    let count = values.iter().filter(|v| v.is_none()).count();
    debug!("Filling {} cells in '{}' with mode {}", count, name, mode);
    report.mode_filled.insert(name.to_string(), count);
    report.modes.insert(name.to_string(), mode);
    values.iter().map(|v| Some(v.unwrap_or(mode))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{key_series, parse_timestamp, to_millis};
    use pretty_assertions::assert_eq;

    fn hourly(n: usize) -> Vec<i64> {
        (0..n as i64).map(|h| h * 3_600_000).collect()
    }

    fn frame(columns: Vec<(&str, Vec<Option<f64>>)>) -> DataFrame {
        let height = columns[0].1.len();
        let start = to_millis(&parse_timestamp("2016-01-01 00:00:00").unwrap());
        let keys = (0..height as i64).map(|h| Some(start + h * 3_600_000)).collect();
        let mut cols: Vec<Column> = vec![key_series("timestamp", keys).unwrap().into()];
        for (name, values) in columns {
            cols.push(Series::new(name.into(), values).into());
        }
        DataFrame::new(cols).unwrap()
    }

    #[test]
    fn test_interpolates_short_run_monotonically() {
        let mut values = vec![Some(10.0)];
        values.extend(std::iter::repeat_n(None, 5));
        values.push(Some(17.0));

        let (filled, count) = interpolate_bounded(&hourly(7), &values, 6);

        assert_eq!(count, 5);
        let inner: Vec<f64> = filled[1..6].iter().map(|v| v.unwrap()).collect();
        for window in inner.windows(2) {
            assert!(window[0] < window[1]);
        }
        assert!(inner.iter().all(|v| *v > 10.0 && *v < 17.0));
        assert!((inner[0] - 10.0 - 7.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_leaves_long_run_entirely_null() {
        let mut values = vec![Some(10.0)];
        values.extend(std::iter::repeat_n(None, 8));
        values.push(Some(17.0));

        let (filled, count) = interpolate_bounded(&hourly(10), &values, 6);

        assert_eq!(count, 0);
        assert!(filled[1..9].iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_run_exactly_at_limit_is_filled() {
        let mut values = vec![Some(0.0)];
        values.extend(std::iter::repeat_n(None, 6));
        values.push(Some(7.0));

        let (filled, count) = interpolate_bounded(&hourly(8), &values, 6);

        assert_eq!(count, 6);
        assert!((filled[3].unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_edge_runs_are_not_filled() {
        let values = vec![None, Some(1.0), Some(2.0), None];
        let (filled, count) = interpolate_bounded(&hourly(4), &values, 6);
        assert_eq!(count, 0);
        assert_eq!(filled, values);
    }

    #[test]
    fn test_interpolation_follows_time_not_position() {
        let times = vec![0, 1, 3];
        let values = vec![Some(0.0), None, Some(3.0)];
        let (filled, _) = interpolate_bounded(&times, &values, 6);
        assert_eq!(filled[1], Some(1.0));
    }

    #[test]
    fn test_mode_and_tie_break() {
        assert_eq!(
            column_mode(&[Some(0.0), Some(0.0), Some(0.0), Some(1.0), None, None]),
            Some(0.0)
        );
        assert_eq!(column_mode(&[Some(2.0), Some(1.0), Some(2.0), Some(1.0)]), Some(1.0));
        assert_eq!(column_mode(&[None, None]), None);
    }

    #[test]
    fn test_mode_treats_negative_zero_as_zero() {
        let values = [Some(0.0), Some(-0.0), Some(1.0), Some(1.0), Some(0.0), None];
        let mode = column_mode(&values).unwrap();
        assert_eq!(mode, 0.0);
        assert!(mode.is_sign_positive());
    }

    #[test]
    fn test_infinite_neighbour_is_not_interpolated() {
        let values = vec![Some(f64::INFINITY), None, Some(1.0), Some(2.0)];
        let (filled, count) = interpolate_bounded(&hourly(4), &values, 6);
        assert_eq!(count, 0);
        assert_eq!(filled[1], None);
    }

    #[test]
    fn test_fill_gaps_mode_fills_precip() {
        let df = frame(vec![(
            "precip",
            vec![Some(0.0), Some(0.0), Some(0.0), Some(1.0), None, None],
        )]);

        let filled = fill_gaps(&df, "timestamp", 6, &["precip".to_string()]).unwrap();

        assert_eq!(
            float_values(&filled.frame, "precip").unwrap(),
            vec![Some(0.0), Some(0.0), Some(0.0), Some(1.0), Some(0.0), Some(0.0)]
        );
        assert_eq!(filled.report.mode_filled.get("precip"), Some(&2));
        assert_eq!(filled.report.modes.get("precip"), Some(&0.0));
    }

    #[test]
    fn test_mode_columns_are_not_interpolated() {
        let df = frame(vec![(
            "precip",
            vec![Some(1.0), None, Some(3.0), Some(3.0)],
        )]);

        let filled = fill_gaps(&df, "timestamp", 6, &["precip".to_string()]).unwrap();

        assert_eq!(
            float_values(&filled.frame, "precip").unwrap()[1],
            Some(3.0)
        );
    }

    #[test]
    fn test_fill_gaps_keeps_shape() {
        let df = frame(vec![
            ("demand", vec![Some(5.0), None, Some(7.0)]),
            ("temp", vec![Some(1.0), Some(2.0), Some(3.0)]),
        ]);

        let filled = fill_gaps(&df, "timestamp", 6, &[]).unwrap();

        assert_eq!(filled.frame.shape(), df.shape());
        assert_eq!(
            float_values(&filled.frame, "demand").unwrap(),
            vec![Some(5.0), Some(6.0), Some(7.0)]
        );
        assert_eq!(filled.report.interpolated.get("demand"), Some(&1));
        assert_eq!(filled.report.left_unfilled, 0);
    }

    #[test]
    fn test_absent_mode_column_warns() {
        let df = frame(vec![("demand", vec![Some(1.0)])]);
        let filled = fill_gaps(&df, "timestamp", 6, &["precip".to_string()]).unwrap();
        assert_eq!(filled.report.warnings.len(), 1);
    }
}
