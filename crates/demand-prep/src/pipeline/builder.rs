//! Main preparation pipeline.
//!
//! This module provides the `Pipeline` struct and its builder, which chain
//! the stages in order: merge, regularize, fill, featurize, finalize, then
//! export and register.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, ResultExt};
use crate::export::{ExportedFiles, export_tables};
use crate::features::generate_features;
use crate::finalize::{SplitTables, finalize};
use crate::gaps::fill_gaps;
use crate::loader::{merge_sources, read_source};
use crate::pipeline::progress::{
    ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate,
};
use crate::sink::{ArtifactSink, NoopSink};
use crate::timeline::{is_contiguous, regularize};
use crate::types::{PipelineResult, PipelineSummary};
use crate::utils::{null_cells, value_columns};
use polars::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// The dataset preparation pipeline.
///
/// Use [`Pipeline::builder()`] to create a pipeline.
///
/// # Example
///
/// ```rust,ignore
/// use demand_prep::{Pipeline, PipelineConfig};
/// use demand_prep::sink::DirectorySink;
/// use std::sync::Arc;
///
/// let config = PipelineConfig::builder()
///     .demand_path("data/demand.csv")
///     .weather_path("data/weather.csv")
///     .build()?;
///
/// let result = Pipeline::builder()
///     .config(config)
///     .artifact_sink(Arc::new(DirectorySink::new("registry")))
///     .on_progress(|update| {
///         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
///     })
///     .build()?
///     .run()?;
///
/// println!("{} train rows", result.summary.train_rows);
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    sink: Arc<dyn ArtifactSink>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

static_assertions::assert_impl_all!(Pipeline: Send);

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load both sources from the configured paths and process them.
    ///
    /// Loading errors are reported through the progress reporter like any
    /// other stage failure.
    pub fn run(&self) -> Result<PipelineResult> {
        let outcome = self
            .load_sources()
            .and_then(|(demand, weather)| self.process_internal(&demand, &weather));
        self.finish(outcome)
    }

    /// Process two raw or normalized sources.
    ///
    /// Both frames are normalized again while merging (see
    /// [`crate::loader::normalize_source`]). Stages 1-5 are fatal on error.
    /// Export errors are fatal too; a registration failure is logged and
    /// returned in [`PipelineResult::registration_failures`].
    pub fn process(&self, demand: &DataFrame, weather: &DataFrame) -> Result<PipelineResult> {
        self.finish(self.process_internal(demand, weather))
    }

    /// Run stages 1-5 in memory, without export or registration.
    pub fn prepare(
        &self,
        demand: &DataFrame,
        weather: &DataFrame,
    ) -> Result<(SplitTables, PipelineSummary)> {
        let config = &self.config;
        let key = config.timestamp_column.as_str();
        let step = config.step();
        let mut summary = PipelineSummary::new();
        summary.demand_rows = demand.height();
        summary.weather_rows = weather.height();
        summary.split_cutoff = Some(config.split_cutoff);

        // Step 1: merge
        info!("Step 1: Merging sources...");
        let merged = merge_sources(demand, weather, key, &config.demand_column)?;
        summary.merged_rows = merged.height();
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Loading,
            1.0,
            format!("Merged {} rows", merged.height()),
        ));

        // Step 2: regularize
        info!("Step 2: Regularizing timeline...");
        let regularized = regularize(&merged, key, step)?;
        if !is_contiguous(&regularized.frame, key, step)? {
            return Err(PipelineError::InvalidConfig(
                "regularized timeline is not contiguous".to_string(),
            ));
        }
        summary.regularized_rows = regularized.frame.height();
        summary.synthesized_rows = regularized.synthesized_rows;
        summary.nulls_before_fill = null_cells(&regularized.frame);
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Regularizing,
            1.0,
            format!(
                "{} timeline rows ({} synthesized)",
                regularized.frame.height(),
                regularized.synthesized_rows
            ),
        ));

        // Step 3: fill gaps
        info!("Step 3: Filling gaps...");
        let filled = fill_gaps(
            &regularized.frame,
            key,
            config.interpolation_limit,
            &config.mode_fill_columns,
        )?;
        summary.nulls_after_fill = null_cells(&filled.frame);
        for warning in &filled.report.warnings {
            summary.add_warning(warning.clone());
        }
        summary.fill = filled.report;
        self.report_progress(ProgressUpdate::new(
            PipelineStage::GapFilling,
            1.0,
            format!("{} cells filled", summary.fill.total_filled()),
        ));

        // Step 4: features
        info!("Step 4: Generating features...");
        let lag_variables = config
            .lag_variables
            .clone()
            .unwrap_or_else(|| value_columns(&merged, key));
        let featured = generate_features(&filled.frame, key, &lag_variables, config.lag_depth, step)?;
        summary.feature_columns = featured.width() - filled.frame.width();
        summary.lag_variables = lag_variables;
        self.report_progress(ProgressUpdate::new(
            PipelineStage::FeatureGeneration,
            1.0,
            format!("{} feature columns added", summary.feature_columns),
        ));

        // Step 5: finalize
        info!("Step 5: Dropping incomplete rows and splitting...");
        let tables = finalize(&featured, key, config.split_cutoff)?;
        summary.rows_dropped = featured.height() - tables.processed.height();
        summary.processed_rows = tables.processed.height();
        summary.train_rows = tables.train.height();
        summary.test_rows = tables.test.height();
        summary.columns = tables
            .processed
            .get_column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Finalizing,
            1.0,
            format!("{} train / {} test rows", summary.train_rows, summary.test_rows),
        ));

        if tables.train.height() == 0 || tables.test.height() == 0 {
            summary.add_warning(format!(
                "Split at {} produced an empty partition ({} train, {} test)",
                config.split_cutoff, summary.train_rows, summary.test_rows
            ));
        }
        if summary.rows_dropped_percentage() > 30.0 {
            summary.add_warning(format!(
                "High data loss: {:.1}% of timeline rows were dropped",
                summary.rows_dropped_percentage()
            ));
        }

        Ok((tables, summary))
    }

    fn load_sources(&self) -> Result<(DataFrame, DataFrame)> {
        let (demand_path, weather_path) =
            match (&self.config.demand_path, &self.config.weather_path) {
                (Some(d), Some(w)) => (d, w),
                _ => {
                    return Err(PipelineError::InvalidConfig(
                        "both demand_path and weather_path must be set".to_string(),
                    ));
                }
            };

        self.report_progress(ProgressUpdate::new(
            PipelineStage::Loading,
            0.0,
            "Reading source files...",
        ));
        let key = &self.config.timestamp_column;
        let demand = read_source(demand_path, "demand", key).context("Loading demand source")?;
        let weather =
            read_source(weather_path, "weather", key).context("Loading weather source")?;
        Ok((demand, weather))
    }

    fn finish(&self, outcome: Result<PipelineResult>) -> Result<PipelineResult> {
        match &outcome {
            Ok(_) => self.report_progress(ProgressUpdate::complete("Pipeline completed successfully")),
            Err(e) => {
                error!("Pipeline error: {}", e);
                self.report_progress(ProgressUpdate::failed(e.to_string()));
            }
        }
        outcome
    }

    fn process_internal(&self, demand: &DataFrame, weather: &DataFrame) -> Result<PipelineResult> {
        let start_time = Instant::now();
        info!("Starting preparation pipeline...");

        let (tables, mut summary) = self.prepare(demand, weather)?;

        let files = if self.config.save_to_disk {
            self.report_progress(ProgressUpdate::new(
                PipelineStage::Exporting,
                0.0,
                "Writing output files...",
            ));
            info!("Step 6: Writing output files...");
            let files = export_tables(&tables, &self.config).context("Exporting tables")?;
            self.report_progress(ProgressUpdate::new(
                PipelineStage::Exporting,
                1.0,
                "Output files saved",
            ));
            Some(files)
        } else {
            info!("Step 6: Skipping file output (save_to_disk disabled)");
            None
        };

        let registration_failures = if self.config.register_artifacts {
            info!("Step 7: Registering datasets...");
            self.register_tables(&tables, &mut summary)
        } else {
            Vec::new()
        };

        summary.duration_ms = start_time.elapsed().as_millis() as u64;
        if let Some(ExportedFiles { processed, .. }) = &files {
            info!("Processed dataset: {}", processed.display());
        }

        Ok(PipelineResult {
            tables,
            summary,
            files,
            registration_failures,
        })
    }

    fn register_tables(
        &self,
        tables: &SplitTables,
        summary: &mut PipelineSummary,
    ) -> Vec<PipelineError> {
        let cutoff = self.config.split_cutoff;
        let datasets = [
            (
                &self.config.processed_name,
                "Hourly demand and weather with calendar and lag features, incomplete rows removed"
                    .to_string(),
                &tables.processed,
            ),
            (
                &self.config.train_name,
                format!("Training split: rows before {}", cutoff),
                &tables.train,
            ),
            (
                &self.config.test_name,
                format!("Test split: rows at or after {}", cutoff),
                &tables.test,
            ),
        ];

        let mut failures = Vec::new();
        for (i, (name, description, table)) in datasets.into_iter().enumerate() {
            match self.sink.register(name, &description, table) {
                Ok(()) => summary.registered.push(name.clone()),
                Err(e) => {
                    warn!("Registration of '{}' failed: {}", name, e);
                    summary.add_warning(format!("Registration of '{}' failed: {}", name, e));
                    failures.push(e);
                }
            }
            self.report_progress(ProgressUpdate::new(
                PipelineStage::Registering,
                (i + 1) as f32 / 3.0,
                format!("Registered {}", name),
            ));
        }
        failures
    }

    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }
}

/// Builder for creating a [`Pipeline`] instance.
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    sink: Option<Arc<dyn ArtifactSink>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the artifact sink that receives the output tables.
    ///
    /// Defaults to [`NoopSink`].
    pub fn artifact_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set a progress reporter for receiving updates during processing.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Build the pipeline.
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> std::result::Result<Pipeline, crate::config::ConfigValidationError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(Pipeline {
            config,
            sink: self.sink.unwrap_or_else(|| Arc::new(NoopSink)),
            progress_reporter: self.progress_reporter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::normalize_source;
    use crate::utils::float_values;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink;

    impl ArtifactSink for FailingSink {
        fn register(&self, name: &str, _description: &str, _table: &DataFrame) -> Result<()> {
            Err(PipelineError::registration(name, "workspace unreachable"))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        names: Mutex<Vec<String>>,
    }

    impl ArtifactSink for RecordingSink {
        fn register(&self, name: &str, _description: &str, _table: &DataFrame) -> Result<()> {
            self.names.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    fn sources() -> (DataFrame, DataFrame) {
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
                "timestamp" => ["2016-01-01 00:00:00", "2016-01-01 01:00:00", "2016-01-01 02:00:00"],
                "temp" => [1.0, 2.0, 3.0],
            ]
            .unwrap(),
            "weather",
            "timestamp",
        )
        .unwrap();
        (demand, weather)
    }

    fn in_memory_config() -> PipelineConfig {
        PipelineConfig::builder()
            .lag_depth(1)
            .save_to_disk(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_pipeline_builder_default() {
        let pipeline = Pipeline::builder().build().unwrap();
        assert_eq!(pipeline.config().lag_depth, 6);
        assert!(pipeline.progress_reporter.is_none());
    }

    #[test]
    fn test_pipeline_builder_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.step_minutes = 0;
        assert!(Pipeline::builder().config(config).build().is_err());
    }

    #[test]
    fn test_prepare_small_scenario() {
        let (demand, weather) = sources();
        let pipeline = Pipeline::builder().config(in_memory_config()).build().unwrap();

        let (tables, summary) = pipeline.prepare(&demand, &weather).unwrap();

        assert_eq!(summary.merged_rows, 3);
        assert_eq!(summary.regularized_rows, 3);
        assert_eq!(summary.nulls_before_fill, 1);
        assert_eq!(summary.nulls_after_fill, 0);
        // first row has no lag-1 predecessor
        assert_eq!(summary.rows_dropped, 1);
        assert_eq!(
            float_values(&tables.processed, "demand").unwrap(),
            vec![Some(6.0), Some(7.0)]
        );
        assert_eq!(
            float_values(&tables.processed, "demand_lag1").unwrap(),
            vec![Some(5.0), Some(6.0)]
        );
        assert_eq!(summary.lag_variables, vec!["demand", "temp"]);
    }

    #[test]
    fn test_registration_failure_is_not_fatal() {
        let (demand, weather) = sources();
        let pipeline = Pipeline::builder()
            .config(in_memory_config())
            .artifact_sink(Arc::new(FailingSink))
            .build()
            .unwrap();

        let result = pipeline.process(&demand, &weather).unwrap();

        assert_eq!(result.registration_failures.len(), 3);
        assert!(result.registration_failures.iter().all(|e| e.is_recoverable()));
        assert!(!result.fully_registered());
        assert_eq!(result.tables.processed.height(), 2);
        assert!(result.summary.registered.is_empty());
    }

    #[test]
    fn test_registers_all_three_tables() {
        let (demand, weather) = sources();
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Pipeline::builder()
            .config(in_memory_config())
            .artifact_sink(sink.clone())
            .build()
            .unwrap();

        let result = pipeline.process(&demand, &weather).unwrap();

        assert!(result.fully_registered());
        assert_eq!(
            *sink.names.lock().unwrap(),
            vec!["processed".to_string(), "train".to_string(), "test".to_string()]
        );
    }

    #[test]
    fn test_unknown_lag_variable_aborts() {
        let (demand, weather) = sources();
        let config = PipelineConfig::builder()
            .lag_variables(["humidity"])
            .save_to_disk(false)
            .build()
            .unwrap();
        let pipeline = Pipeline::builder().config(config).build().unwrap();

        let err = pipeline.process(&demand, &weather).unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_ERROR");
    }

    #[test]
    fn test_progress_reaches_completion() {
        let (demand, weather) = sources();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let last_stage = Arc::new(Mutex::new(None));
        let last_stage_clone = last_stage.clone();

        let pipeline = Pipeline::builder()
            .config(in_memory_config())
            .on_progress(move |update| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                *last_stage_clone.lock().unwrap() = Some(update.stage);
            })
            .build()
            .unwrap();

        pipeline.process(&demand, &weather).unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 5);
        assert_eq!(*last_stage.lock().unwrap(), Some(PipelineStage::Complete));
    }

    #[test]
    fn test_string_values_are_rejected_not_nulled() {
        let (demand, weather) = sources();
        let raw = DataFrame::new(vec![
            demand.column("timestamp").unwrap().clone(),
            Series::new("demand".into(), ["5", "lots"]).into(),
        ])
        .unwrap();
        let pipeline = Pipeline::builder().config(in_memory_config()).build().unwrap();

        let err = pipeline.process(&raw, &weather).unwrap_err();

        assert_eq!(err.error_code(), "PARSE_ERROR");
    }

    #[test]
    fn test_infinite_demand_is_rejected() {
        let (demand, weather) = sources();
        let raw = DataFrame::new(vec![
            demand.column("timestamp").unwrap().clone(),
            Series::new("demand".into(), [f64::INFINITY, 2.0]).into(),
        ])
        .unwrap();
        let pipeline = Pipeline::builder().config(in_memory_config()).build().unwrap();

        let err = pipeline.prepare(&raw, &weather).unwrap_err();

        assert_eq!(err.error_code(), "PARSE_ERROR");
    }

    #[test]
    fn test_loading_failure_is_reported() {
        let last = Arc::new(Mutex::new(None));
        let last_clone = last.clone();
        let config = PipelineConfig::builder()
            .demand_path("/nonexistent/demand.csv")
            .weather_path("/nonexistent/weather.csv")
            .save_to_disk(false)
            .build()
            .unwrap();
        let pipeline = Pipeline::builder()
            .config(config)
            .on_progress(move |update| *last_clone.lock().unwrap() = Some(update.stage))
            .build()
            .unwrap();

        let err = pipeline.run().unwrap_err();

        assert_eq!(err.error_code(), "PARSE_ERROR");
        assert_eq!(*last.lock().unwrap(), Some(PipelineStage::Failed));
    }

    #[test]
    fn test_run_requires_paths() {
        let pipeline = Pipeline::builder().build().unwrap();
        let err = pipeline.run().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }
}
