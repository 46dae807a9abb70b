//! Error taxonomy for perflow.
//!
//! Every fatal condition names the rank, attribute or path involved. Recoverable
//! trace incompleteness is reported as a [`Diagnostic`](crate::build::Diagnostic)
//! instead, unless the caller asked for strict construction.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the perflow library.
#[derive(Error, Debug)]
pub enum Error {
    /// The target program failed to start, timed out or exited non-zero.
    #[error("failed to launch {binary}: {source:#}")]
    Launch {
        binary: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// One or more rank streams are missing or truncated (strict mode only).
    #[error("trace incomplete for rank(s) {ranks:?}: {reason}")]
    TraceIncomplete { ranks: Vec<usize>, reason: String },

    /// No usable trace data, or the built graphs failed validation.
    #[error("PAG construction failed: {0}")]
    Construction(String),

    /// A raw trace record is corrupt (not a torn tail).
    #[error("invalid trace for rank {rank} at line {line}: {reason}")]
    InvalidTrace {
        rank: usize,
        line: usize,
        reason: String,
    },

    /// A pass needs attributes the supplied set does not carry.
    #[error("missing data for vertex '{vertex}': {reason}")]
    MissingData { vertex: String, reason: String },

    /// A filter or report named an attribute no item knows.
    #[error("invalid attribute(s): {}", .names.join(", "))]
    InvalidAttribute { names: Vec<String> },

    /// A persisted directory is unreadable or corrupt.
    #[error("{}: {reason} (re-run PAG construction to regenerate it)", .path.display())]
    Persistence { path: PathBuf, reason: String },

    /// The external renderer failed.
    #[error("failed to render {}: {source:#}", .path.display())]
    Render {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown pass '{0}'")]
    UnknownPass(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn missing_data(vertex: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MissingData {
            vertex: vertex.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
