//! Configuration types for the preparation pipeline.
//!
//! Every tunable constant of the pipeline lives in [`PipelineConfig`], which
//! is passed explicitly into [`crate::Pipeline`]. Use the builder for fluent
//! construction, or deserialize the struct from a JSON file; every field has a
//! default so partial JSON documents are accepted.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Default run-length limit for linear interpolation.
pub const DEFAULT_INTERPOLATION_LIMIT: usize = 6;

/// Default number of lag steps generated per variable.
pub const DEFAULT_LAG_DEPTH: usize = 6;

/// Default timeline step (one hour).
pub const DEFAULT_STEP_MINUTES: u32 = 60;

/// Default number of decimals for train/test exports.
pub const DEFAULT_FLOAT_PRECISION: usize = 4;

fn default_split_cutoff() -> NaiveDateTime {
    NaiveDateTime::new(
        NaiveDate::from_ymd_opt(2017, 2, 1).unwrap_or_default(),
        NaiveTime::MIN,
    )
}

/// Configuration for the preparation pipeline.
///
/// # Example
///
/// ```rust,ignore
/// use demand_prep::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .demand_path("data/demand.csv")
///     .weather_path("data/weather.csv")
///     .lag_depth(3)
///     .interpolation_limit(4)
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Path of the demand CSV (used by [`crate::Pipeline::run`]).
    pub demand_path: Option<PathBuf>,

    /// Path of the weather CSV (used by [`crate::Pipeline::run`]).
    pub weather_path: Option<PathBuf>,

    /// Name of the timestamp column in both sources and in every output.
    /// Default: "timestamp"
    pub timestamp_column: String,

    /// Name of the demand column in the demand source.
    /// Default: "demand"
    pub demand_column: String,

    /// Timeline step in minutes.
    /// Default: 60
    pub step_minutes: u32,

    /// Longest run of consecutive nulls that interpolation may fill.
    /// Default: 6
    pub interpolation_limit: usize,

    /// Columns filled with their mode instead of being interpolated.
    /// Default: ["precip"]
    pub mode_fill_columns: Vec<String>,

    /// Number of lag columns generated per lagged variable.
    /// Default: 6
    pub lag_depth: usize,

    /// Variables to lag. `None` lags the demand column and every weather column.
    /// Default: None
    pub lag_variables: Option<Vec<String>>,

    /// Rows strictly before this instant go to train, the rest to test.
    /// Default: 2017-02-01 00:00:00
    pub split_cutoff: NaiveDateTime,

    /// Output directory for the processed/train/test files.
    /// Default: "output"
    pub output_dir: PathBuf,

    /// File stem and dataset name of the processed table.
    pub processed_name: String,

    /// File stem and dataset name of the train table.
    pub train_name: String,

    /// File stem and dataset name of the test table.
    pub test_name: String,

    /// Decimal places used for floats in the train/test exports.
    /// Default: 4
    pub float_precision: usize,

    /// Whether to hand the written tables to the artifact sink.
    /// Default: true
    pub register_artifacts: bool,

    /// Whether to write the output tables to disk.
    /// When false, results are kept in memory only.
    /// Default: true
    pub save_to_disk: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            demand_path: None,
            weather_path: None,
            timestamp_column: "timestamp".to_string(),
            demand_column: "demand".to_string(),
            step_minutes: DEFAULT_STEP_MINUTES,
            interpolation_limit: DEFAULT_INTERPOLATION_LIMIT,
            mode_fill_columns: vec!["precip".to_string()],
            lag_depth: DEFAULT_LAG_DEPTH,
            lag_variables: None,
            split_cutoff: default_split_cutoff(),
            output_dir: PathBuf::from("output"),
            processed_name: "processed".to_string(),
            train_name: "train".to_string(),
            test_name: "test".to_string(),
            float_precision: DEFAULT_FLOAT_PRECISION,
            register_artifacts: true,
            save_to_disk: true,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// The timeline step as a duration.
    pub fn step(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.step_minutes))
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.step_minutes == 0 {
            return Err(ConfigValidationError::InvalidStep(self.step_minutes));
        }

        if self.lag_depth == 0 {
            return Err(ConfigValidationError::InvalidLagDepth(self.lag_depth));
        }

        if self.float_precision > 10 {
            return Err(ConfigValidationError::InvalidPrecision(
                self.float_precision,
            ));
        }

        let named = [
            ("timestamp_column", &self.timestamp_column),
            ("demand_column", &self.demand_column),
            ("processed_name", &self.processed_name),
            ("train_name", &self.train_name),
            ("test_name", &self.test_name),
        ];
        for (field, value) in named {
            if value.trim().is_empty() {
                return Err(ConfigValidationError::EmptyName(field.to_string()));
            }
        }

        let columns = self
            .mode_fill_columns
            .iter()
            .chain(self.lag_variables.iter().flatten());
        for column in columns {
            if column.trim().is_empty() {
                return Err(ConfigValidationError::EmptyName(column.clone()));
            }
            if column == &self.timestamp_column {
                return Err(ConfigValidationError::TimestampAsValue(column.clone()));
            }
        }

        let mut seen = HashSet::new();
        for name in [&self.processed_name, &self.train_name, &self.test_name] {
            if !seen.insert(name) {
                return Err(ConfigValidationError::DuplicateOutputName(name.clone()));
            }
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid timeline step: {0} minutes (must be at least 1)")]
    InvalidStep(u32),

    #[error("Invalid lag depth: {0} (must be at least 1)")]
    InvalidLagDepth(usize),

    #[error("Invalid float precision: {0} (must be at most 10)")]
    InvalidPrecision(usize),

    #[error("Name for '{0}' must not be empty")]
    EmptyName(String),

    #[error("Timestamp column '{0}' cannot be used as a value column")]
    TimestampAsValue(String),

    #[error("Output name '{0}' is used more than once")]
    DuplicateOutputName(String),
}

/// Builder for [`PipelineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    demand_path: Option<PathBuf>,
    weather_path: Option<PathBuf>,
    timestamp_column: Option<String>,
    demand_column: Option<String>,
    step_minutes: Option<u32>,
    interpolation_limit: Option<usize>,
    mode_fill_columns: Option<Vec<String>>,
    lag_depth: Option<usize>,
    lag_variables: Option<Vec<String>>,
    split_cutoff: Option<NaiveDateTime>,
    output_dir: Option<PathBuf>,
    processed_name: Option<String>,
    train_name: Option<String>,
    test_name: Option<String>,
    float_precision: Option<usize>,
    register_artifacts: Option<bool>,
    save_to_disk: Option<bool>,
}

impl PipelineConfigBuilder {
    /// Set the demand source path.
    pub fn demand_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.demand_path = Some(path.into());
        self
    }

    /// Set the weather source path.
    pub fn weather_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.weather_path = Some(path.into());
        self
    }

    /// Set the timestamp column name shared by both sources.
    pub fn timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self
    }

    /// Set the demand column name.
    pub fn demand_column(mut self, column: impl Into<String>) -> Self {
        self.demand_column = Some(column.into());
        self
    }

    /// Set the timeline step in minutes.
    pub fn step_minutes(mut self, minutes: u32) -> Self {
        self.step_minutes = Some(minutes);
        self
    }

    /// Set the longest null run that interpolation may bridge.
    pub fn interpolation_limit(mut self, limit: usize) -> Self {
        self.interpolation_limit = Some(limit);
        self
    }

    /// Set the columns filled with their mode.
    pub fn mode_fill_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mode_fill_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Set the number of lag columns per variable.
    pub fn lag_depth(mut self, depth: usize) -> Self {
        self.lag_depth = Some(depth);
        self
    }

    /// Restrict lag generation to the given variables.
    pub fn lag_variables<I, S>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lag_variables = Some(variables.into_iter().map(Into::into).collect());
        self
    }

    /// Set the train/test cutoff.
    pub fn split_cutoff(mut self, cutoff: NaiveDateTime) -> Self {
        self.split_cutoff = Some(cutoff);
        self
    }

    /// Set the output directory.
    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    /// Set the processed/train/test dataset names.
    pub fn output_names(
        mut self,
        processed: impl Into<String>,
        train: impl Into<String>,
        test: impl Into<String>,
    ) -> Self {
        self.processed_name = Some(processed.into());
        self.train_name = Some(train.into());
        self.test_name = Some(test.into());
        self
    }

    /// Set the float precision of the train/test exports.
    pub fn float_precision(mut self, precision: usize) -> Self {
        self.float_precision = Some(precision);
        self
    }

    /// Enable or disable artifact registration.
    pub fn register_artifacts(mut self, register: bool) -> Self {
        self.register_artifacts = Some(register);
        self
    }

    /// Enable or disable writing outputs to disk.
    pub fn save_to_disk(mut self, save: bool) -> Self {
        self.save_to_disk = Some(save);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `PipelineConfig` or an error if validation fails.
    pub fn build(self) -> Result<PipelineConfig, ConfigValidationError> {
        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            demand_path: self.demand_path,
            weather_path: self.weather_path,
            timestamp_column: self.timestamp_column.unwrap_or(defaults.timestamp_column),
            demand_column: self.demand_column.unwrap_or(defaults.demand_column),
            step_minutes: self.step_minutes.unwrap_or(defaults.step_minutes),
            interpolation_limit: self
                .interpolation_limit
                .unwrap_or(defaults.interpolation_limit),
            mode_fill_columns: self.mode_fill_columns.unwrap_or(defaults.mode_fill_columns),
            lag_depth: self.lag_depth.unwrap_or(defaults.lag_depth),
            lag_variables: self.lag_variables,
            split_cutoff: self.split_cutoff.unwrap_or(defaults.split_cutoff),
            output_dir: self.output_dir.unwrap_or(defaults.output_dir),
            processed_name: self.processed_name.unwrap_or(defaults.processed_name),
            train_name: self.train_name.unwrap_or(defaults.train_name),
            test_name: self.test_name.unwrap_or(defaults.test_name),
            float_precision: self.float_precision.unwrap_or(defaults.float_precision),
            register_artifacts: self
                .register_artifacts
                .unwrap_or(defaults.register_artifacts),
            save_to_disk: self.save_to_disk.unwrap_or(defaults.save_to_disk),
        };

        config.validate()?;
        Ok(config)
    }
}
