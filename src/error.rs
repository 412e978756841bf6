//! Error types for the import pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Run-level failures. Any of these stops the batch.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Destination path '{0}' doesn't exist")]
    DestinationMissing(PathBuf),

    #[error("Metadata file '{path}' is corrupt: {source}")]
    LedgerCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Metadata file '{path}' has duplicate entry '{name}'")]
    LedgerDuplicate { path: PathBuf, name: String },

    #[error("Failed to access metadata file '{path}': {source}")]
    LedgerIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize metadata file '{path}': {source}")]
    LedgerSerialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failures local to a single file. The pipeline rolls these back and moves on.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tag error: {0}")]
    Tag(String),

    #[error("Failed to start {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with code {code}\nstdout:\n{stdout}\nstderr:\n{stderr}")]
    ToolFailed {
        tool: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("{tool} was terminated by a signal\nstderr:\n{stderr}")]
    ToolKilled { tool: String, stderr: String },

    #[error("No path configured for {0}")]
    ToolMissing(&'static str),

    #[error("Invalid file path: {0}")]
    InvalidPath(String),

    #[error("Import cancelled")]
    Cancelled,
}

impl From<lofty::error::LoftyError> for ProcessingError {
    fn from(value: lofty::error::LoftyError) -> Self {
        Self::Tag(value.to_string())
    }
}
