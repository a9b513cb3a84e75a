//! Error types for the npuforge core.
//!
//! One enum covers the whole conversion surface so callers can match on the
//! failure class: validation problems are reported immediately and never
//! retried, collaborator failures carry the failing stage, and calibration
//! unavailability is deliberately *not* represented here (it is a warning on
//! the success path, see the pipeline module).

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for npuforge operations.
#[derive(Debug, Error)]
pub enum ForgeError {
    // Validation errors
    #[error("Unknown model family: {family_id}")]
    UnknownFamily { family_id: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Unsupported device profile: {profile}")]
    UnsupportedProfile { profile: String },

    // Task identity: raised only on a confirmed mismatch. An inconclusive
    // check degrades to a warning and never reaches this variant.
    #[error("Model task mismatch: selected family expects '{expected}', checkpoint reports '{actual}'")]
    TaskMismatch { expected: String, actual: String },

    // Delegated failure from the checkpoint exporter; message is verbatim.
    #[error("Graph export failed: {message}")]
    Export { message: String },

    // Delegated failure from an accelerator-compiler stage.
    #[error("Compiler {stage} stage failed: {message}")]
    CompilerStage { stage: CompileStage, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors (driver protocol lines)
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// The four stages of the accelerator-compiler collaborator. Failures are
/// reported per stage so the caller sees exactly where a build died.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStage {
    Configure,
    Load,
    Build,
    Export,
}

impl CompileStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompileStage::Configure => "configure",
            CompileStage::Load => "load",
            CompileStage::Build => "build",
            CompileStage::Export => "export",
        }
    }
}

impl std::fmt::Display for CompileStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result type alias for npuforge operations.
pub type Result<T> = std::result::Result<T, ForgeError>;

// Conversion implementations for common error types

impl From<std::io::Error> for ForgeError {
    fn from(err: std::io::Error) -> Self {
        ForgeError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ForgeError {
    fn from(err: serde_json::Error) -> Self {
        ForgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ForgeError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ForgeError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// True for errors the caller could fix by correcting the request
    /// (wrong family, wrong extension, missing input file).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ForgeError::UnknownFamily { .. }
                | ForgeError::Validation { .. }
                | ForgeError::FileNotFound(_)
                | ForgeError::NotADirectory(_)
                | ForgeError::UnsupportedProfile { .. }
                | ForgeError::TaskMismatch { .. }
        )
    }
}
