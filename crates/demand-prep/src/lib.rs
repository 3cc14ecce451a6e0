//! Hourly Demand Dataset Preparation Library
//!
//! Turns two raw hourly sources, an energy demand series and a weather
//! series, into a model-ready table built with Rust and Polars.
//!
//! # Overview
//!
//! The pipeline runs these stages in order:
//!
//! - **Loading**: Both sources are parsed, their timestamps normalized and
//!   outer-joined on the timestamp ([`loader`])
//! - **Regularizing**: Missing hours are inserted so the timeline is a
//!   contiguous hourly grid ([`timeline`])
//! - **Gap Filling**: Short null runs are interpolated in time, categorical
//!   columns get their mode ([`gaps`])
//! - **Feature Generation**: Hour, month and day-of-week columns plus lagged
//!   copies of the demand and weather variables ([`features`])
//! - **Finalizing**: Incomplete rows are dropped and the table is split at a
//!   cutoff instant ([`finalize`])
//! - **Export and Registration**: Tables are written as CSV and handed to an
//!   [`sink::ArtifactSink`] ([`export`], [`sink`])
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use demand_prep::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::builder()
//!     .demand_path("data/demand.csv")
//!     .weather_path("data/weather.csv")
//!     .output_dir("output")
//!     .build()?;
//!
//! let result = Pipeline::builder()
//!     .config(config)
//!     .on_progress(|update| {
//!         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
//!     })
//!     .build()?
//!     .run()?;
//!
//! println!("Train rows: {}", result.summary.train_rows);
//! println!("Test rows: {}", result.summary.test_rows);
//! ```
//!
//! # Working in memory
//!
//! [`Pipeline::prepare`] runs every stage up to the split without touching
//! the filesystem:
//!
//! ```rust,ignore
//! use demand_prep::{Pipeline, loader::normalize_source};
//!
//! let demand = normalize_source(&raw_demand, "demand", "timestamp")?;
//! let weather = normalize_source(&raw_weather, "weather", "timestamp")?;
//! let (tables, summary) = Pipeline::builder().build()?.prepare(&demand, &weather)?;
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod features;
pub mod finalize;
pub mod gaps;
pub mod loader;
pub mod pipeline;
pub mod sink;
pub mod timeline;
pub mod types;
pub mod utils;

// Re-exports for convenient access
pub use config::{ConfigValidationError, PipelineConfig, PipelineConfigBuilder};
pub use error::{PipelineError, Result as PrepResult, ResultExt};
pub use export::ExportedFiles;
pub use finalize::SplitTables;
pub use gaps::FillReport;
pub use pipeline::{
    ClosureProgressReporter, Pipeline, PipelineBuilder, PipelineStage, ProgressReporter,
    ProgressUpdate,
};
pub use sink::{ArtifactSink, DirectorySink, NoopSink, RegistryEntry};
pub use types::{PipelineResult, PipelineSummary};
