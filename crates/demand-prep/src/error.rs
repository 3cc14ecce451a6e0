//! Error types for the dataset preparation pipeline.
//!
//! Errors raised by the loading, regularization, gap-filling and feature
//! stages are fatal and abort the run. Registration errors are the only
//! recoverable class: they are reported but never invalidate files that were
//! already written.
//!
//! Errors are serializable as `{code, message}` so a caller can emit them as
//! JSON next to the preparation report.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the preparation pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A raw source was unreadable, lacked the timestamp column, or held a
    /// value that could not be parsed.
    #[error("Failed to parse source '{source_name}': {reason}")]
    Parse { source_name: String, reason: String },

    /// The merged table has no rows, so the timeline bounds are undefined.
    #[error("Input is empty: {0}")]
    EmptyInput(String),

    /// A configured column does not exist in the table.
    #[error("Column '{0}' not found in table")]
    Schema(String),

    /// The artifact sink rejected a dataset.
    #[error("Failed to register dataset '{name}': {reason}")]
    Registration { name: String, reason: String },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Build a [`PipelineError::Parse`] for the named source.
    pub fn parse(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Parse {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`PipelineError::Registration`] for the named dataset.
    pub fn registration(name: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Registration {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stable error code, preserved through any added context.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "PARSE_ERROR",
            Self::EmptyInput(_) => "EMPTY_INPUT",
            Self::Schema(_) => "SCHEMA_ERROR",
            Self::Registration { .. } => "REGISTRATION_ERROR",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Only registration failures leave the pipeline's outputs valid.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Registration { .. } => true,
            Self::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}

impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PipelineError::Polars(e).with_context(context))
    }
}
