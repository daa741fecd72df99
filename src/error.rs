//! Error types for the map pipeline.
//!
//! Every stage returns [`Result`]; nothing is allowed to panic past a stage
//! boundary. [`Error::kind`] groups the variants into the four failure classes
//! operators care about (configuration, validation, engine, unexpected).

use std::fmt;
use std::path::PathBuf;

use crate::engine::EngineError;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure class, used for exit messages and log routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Engine,
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Engine => "engine",
            ErrorKind::Unexpected => "unexpected",
        };
        f.write_str(s)
    }
}

/// Pipeline stage names, attached to errors that cross a stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BuildExpression,
    Intersection,
    Vegetation,
    RenderLayouts,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::BuildExpression => "build-expression",
            Stage::Intersection => "intersection",
            Stage::Vegetation => "vegetation",
            Stage::RenderLayouts => "render-layouts",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// Site identifier not present in the configured allow-list
    #[error("Invalid substation '{name}'. Valid options are: {}", valid.join(", "))]
    InvalidSubstation { name: String, valid: Vec<String> },

    #[error("Workspace directory does not exist: {}", .0.display())]
    MissingWorkspace(PathBuf),

    #[error("Invalid file: {}", .0.display())]
    InvalidFile(PathBuf),

    #[error("Layer does not exist: {0}")]
    MissingLayer(String),

    #[error("No layout found in {}", .0.display())]
    NoLayout(PathBuf),

    /// Summary table has no circuits to build a filter expression from
    #[error("No circuits recorded in {table}; seed it with `process-veg {site} --circuit ...`")]
    NoCircuits { site: String, table: String },

    /// Error reported by the external GIS engine
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Lock contention persisted through every attempt
    #[error("Still locked after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: EngineError,
    },

    /// Failure inside a named pipeline stage
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    /// Layout export failed; remaining layouts were not attempted
    #[error("Failed to process {layout} map: {source}")]
    Layout {
        layout: crate::types::LayoutType,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::Yaml(_) => ErrorKind::Configuration,
            Error::InvalidSubstation { .. }
            | Error::MissingWorkspace(_)
            | Error::InvalidFile(_)
            | Error::MissingLayer(_)
            | Error::NoLayout(_)
            | Error::NoCircuits { .. } => ErrorKind::Validation,
            Error::Engine(_) | Error::RetriesExhausted { .. } => ErrorKind::Engine,
            Error::Stage { source, .. } | Error::Layout { source, .. } => source.kind(),
            Error::Io(_) | Error::Json(_) | Error::Csv(_) => ErrorKind::Unexpected,
        }
    }

    pub fn in_stage(self, stage: Stage) -> Error {
        Error::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The stage that failed, if the error crossed a stage boundary.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            Error::Layout { .. } => Some(Stage::RenderLayouts),
            _ => None,
        }
    }
}
