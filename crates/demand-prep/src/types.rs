//! Result and summary types returned by the pipeline.

use crate::error::PipelineError;
use crate::export::ExportedFiles;
use crate::finalize::SplitTables;
use crate::gaps::FillReport;
use chrono::NaiveDateTime;
use serde::Serialize;

/// Statistics collected while preparing a dataset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSummary {
    /// Total execution time in milliseconds.
    pub duration_ms: u64,

    /// Rows in the demand source.
    pub demand_rows: usize,
    /// Rows in the weather source.
    pub weather_rows: usize,
    /// Rows after the outer join.
    pub merged_rows: usize,

    /// Rows on the contiguous timeline.
    pub regularized_rows: usize,
    /// Timeline rows absent from both sources.
    pub synthesized_rows: usize,

    /// Null cells before gap filling.
    pub nulls_before_fill: usize,
    /// Null cells after gap filling.
    pub nulls_after_fill: usize,
    /// Per-column fill details.
    pub fill: FillReport,

    /// Variables that received lag columns.
    pub lag_variables: Vec<String>,
    /// Columns added by feature generation.
    pub feature_columns: usize,

    /// Rows removed because they still held nulls.
    pub rows_dropped: usize,
    pub processed_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub split_cutoff: Option<NaiveDateTime>,

    /// Final column order of every output table.
    pub columns: Vec<String>,

    /// Datasets accepted by the artifact sink.
    pub registered: Vec<String>,

    /// Warnings and notes generated during the run.
    pub warnings: Vec<String>,
}

impl PipelineSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Percentage of timeline rows removed by the finalizer.
    pub fn rows_dropped_percentage(&self) -> f32 {
        if self.regularized_rows == 0 {
            0.0
        } else {
            (self.rows_dropped as f32 / self.regularized_rows as f32) * 100.0
        }
    }
}

/// Everything produced by a pipeline run.
#[derive(Debug)]
pub struct PipelineResult {
    /// The processed, train and test tables.
    pub tables: SplitTables,
    pub summary: PipelineSummary,
    /// Written files; `None` when `save_to_disk` is off.
    pub files: Option<ExportedFiles>,
    /// Registration errors. The tables and files above remain valid.
    pub registration_failures: Vec<PipelineError>,
}

impl PipelineResult {
    /// Whether every dataset was registered (or registration was off).
    pub fn fully_registered(&self) -> bool {
        self.registration_failures.is_empty()
    }
}
