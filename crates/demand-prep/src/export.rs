//! CSV export of the processed, train and test tables.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::finalize::SplitTables;
use crate::utils::TIMESTAMP_FORMAT;
use polars::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

/// Paths of the files written by [`export_tables`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedFiles {
    pub processed: PathBuf,
    pub train: PathBuf,
    pub test: PathBuf,
}

/// Write a table as CSV with a header.
///
/// `float_precision` fixes the number of decimals for float columns; `None`
/// keeps full precision. Timestamps use [`TIMESTAMP_FORMAT`].
pub fn write_csv(df: &DataFrame, path: &Path, float_precision: Option<usize>) -> Result<()> {
    let mut file = File::create(path).map_err(|e| {
        PipelineError::Io(e).with_context(format!("Creating {}", path.display()))
    })?;
    let mut table = df.clone();

    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b',')
        .with_float_precision(float_precision)
        .with_datetime_format(Some(TIMESTAMP_FORMAT.to_string()))
        .finish(&mut table)?;

    info!("Dataset saved: {} ({} rows)", path.display(), df.height());
    Ok(())
}

/// Write the three tables into the configured output directory.
///
/// The processed table keeps full precision; train and test use the
/// configured float precision.
pub fn export_tables(tables: &SplitTables, config: &PipelineConfig) -> Result<ExportedFiles> {
    std::fs::create_dir_all(&config.output_dir)?;

    let path_for = |name: &str| config.output_dir.join(format!("{}.csv", name));
    let files = ExportedFiles {
        processed: path_for(&config.processed_name),
        train: path_for(&config.train_name),
        test: path_for(&config.test_name),
    };

    write_csv(&tables.processed, &files.processed, None)?;
    write_csv(&tables.train, &files.train, Some(config.float_precision))?;
    write_csv(&tables.test, &files.test, Some(config.float_precision))?;

    Ok(files)
}
