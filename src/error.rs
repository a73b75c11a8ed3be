//! Error types for the scan pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Every way a pipeline stage can fail. Nothing is recovered locally; the
/// binary reports the stage and exits non-zero.
#[derive(Debug, Error)]
pub enum Error {
    /// Input file does not exist
    #[error("{}: no such file", path.display())]
    NotFound { path: PathBuf },

    /// Input file exists but could not be read
    #[error("{}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed row in the input file (1-based line number)
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// Model could not be fitted or used
    #[error("{0}")]
    Fit(String),

    /// Chart could not be displayed
    #[error("{0}")]
    Render(String),

    /// Invalid detector or chart parameters
    #[error("{0}")]
    Config(String),

    /// Writing a report or chart failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Name of the pipeline stage the error belongs to.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::NotFound { .. } | Error::Read { .. } | Error::Parse { .. } => "load",
            Error::Fit(_) => "detect",
            Error::Render(_) => "render",
            Error::Config(_) => "config",
            Error::Io(_) => "output",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
