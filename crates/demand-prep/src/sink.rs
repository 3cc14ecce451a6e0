//! Named-dataset registration.
//!
//! After the output files are written, each table is handed to an
//! [`ArtifactSink`] under a name and a description. Registration is
//! fire-and-forget: a failure is reported to the caller but never rolls back
//! files that were already written.
//!
//! # Implementing a sink
//!
//! ```rust,ignore
//! use demand_prep::sink::ArtifactSink;
//! use polars::prelude::DataFrame;
//!
//! struct RemoteWorkspace { /* client */ }
//!
//! impl ArtifactSink for RemoteWorkspace {
//!     fn register(&self, name: &str, description: &str, table: &DataFrame) -> demand_prep::error::Result<()> {
//!         // upload `table` and tag it with `name`/`description`
//!         Ok(())
//!     }
//! }
//! ```

use crate::error::{PipelineError, Result};
use crate::export::write_csv;
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Receives finished tables under a dataset name.
///
/// Implementations must be `Send + Sync` so a [`crate::Pipeline`] holding one
/// can be moved to a worker thread.
pub trait ArtifactSink: Send + Sync {
    /// Register `table` as the dataset `name`.
    fn register(&self, name: &str, description: &str, table: &DataFrame) -> Result<()>;
}

/// A sink that accepts everything and stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ArtifactSink for NoopSink {
    fn register(&self, name: &str, _description: &str, table: &DataFrame) -> Result<()> {
        debug!("Registration skipped for '{}' ({} rows)", name, table.height());
        Ok(())
    }
}

/// One dataset entry of a [`DirectorySink`] manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub description: String,
    pub file: String,
    pub rows: usize,
    pub columns: Vec<String>,
    pub registered_at: DateTime<Utc>,
}

/// A local dataset registry.
///
/// Each registration writes `<name>.csv` into the registry directory and
/// upserts an entry in `registry.json`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
    float_precision: Option<usize>,
}

impl DirectorySink {
    pub const MANIFEST: &'static str = "registry.json";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            float_precision: None,
        }
    }

    /// Fix the float precision of registered copies.
    pub fn with_float_precision(mut self, precision: usize) -> Self {
        self.float_precision = Some(precision);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether registered copies would land in `dir`, where they could
    /// overwrite exported files of the same name.
    pub fn shares_directory_with(&self, dir: &Path) -> bool {
        match (std::fs::canonicalize(&self.root), std::fs::canonicalize(dir)) {
            (Ok(root), Ok(other)) => root == other,
            _ => plain_components(&self.root) == plain_components(dir),
        }
    }

    /// Read the manifest; a missing manifest is an empty registry.
    pub fn entries(&self) -> Result<Vec<RegistryEntry>> {
        let path = self.root.join(Self::MANIFEST);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn store(&self, name: &str, description: &str, table: &DataFrame) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;

        let file = format!("{}.csv", name);
        write_csv(table, &self.root.join(&file), self.float_precision)?;

        let entry = RegistryEntry {
            name: name.to_string(),
            description: description.to_string(),
            file,
            rows: table.height(),
            columns: table
                .get_column_names()
                .into_iter()
                .map(|c| c.to_string())
                .collect(),
            registered_at: Utc::now(),
        };

        let mut entries = self.entries()?;
        entries.retain(|e| e.name != name);
        entries.push(entry);

        let manifest = serde_json::to_string_pretty(&entries)?;
        std::fs::write(self.root.join(Self::MANIFEST), manifest)?;
        Ok(())
    }
}

fn plain_components(path: &Path) -> Vec<Component<'_>> {
    path.components()
        .filter(|c| *c != Component::CurDir)
        .collect()
}

impl ArtifactSink for DirectorySink {
    fn register(&self, name: &str, description: &str, table: &DataFrame) -> Result<()> {
        self.store(name, description, table)
            .map_err(|e| PipelineError::registration(name, e.to_string()))?;
        info!("Registered dataset '{}' in {}", name, self.root.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> DataFrame {
        df!["demand" => [1.0, 2.0], "temp" => [3.0, 4.0]].unwrap()
    }

    #[test]
    fn test_directory_sink_writes_file_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());

        sink.register("train", "Training split", &table()).unwrap();

        assert!(dir.path().join("train.csv").exists());
        let entries = sink.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "train");
        assert_eq!(entries[0].rows, 2);
        assert_eq!(entries[0].columns, vec!["demand", "temp"]);
    }

    #[test]
    fn test_directory_sink_upserts_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());

        sink.register("train", "first", &table()).unwrap();
        sink.register("test", "other", &table()).unwrap();
        sink.register("train", "second", &table()).unwrap();

        let entries = sink.entries().unwrap();
        assert_eq!(entries.len(), 2);
        let train = entries.iter().find(|e| e.name == "train").unwrap();
        assert_eq!(train.description, "second");
    }

    #[test]
    fn test_directory_sink_failure_is_registration_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "x").unwrap();
        let sink = DirectorySink::new(&blocker);

        let err = sink.register("train", "Training split", &table()).unwrap_err();

        assert_eq!(err.error_code(), "REGISTRATION_ERROR");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_shares_directory_with_output() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());

        assert!(sink.shares_directory_with(dir.path()));
        assert!(sink.shares_directory_with(&dir.path().join(".")));
        assert!(!sink.shares_directory_with(&dir.path().join("output")));
        assert!(DirectorySink::new("out").shares_directory_with(Path::new("./out")));
    }

    #[test]
    fn test_noop_sink_accepts() {
        assert!(NoopSink.register("x", "y", &table()).is_ok());
    }
}
