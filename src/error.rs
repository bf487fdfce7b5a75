//! Domain-specific error types for the deployment engine.
//!
//! This module provides a structured error hierarchy using [`thiserror`].
//! Internal modules return [`EngineError`] so callers can branch on the
//! error kind; orchestration code at the engine boundary converts them to
//! [`anyhow::Error`] via the standard `?` operator where the kind no
//! longer matters.
//!
//! # Error kinds
//!
//! ```text
//! EngineError
//! ├── NotFound   — named pack missing, source file disappeared mid-run
//! ├── Conflict   — a user link exists and points somewhere foreign
//! ├── Invalid    — malformed rule or handler options
//! ├── Io         — unexpected filesystem failure, with path context
//! ├── Execution  — a provisioning command exited non-zero
//! └── Integrity  — dangling-link findings (reported, never fatal)
//! ```

use std::path::PathBuf;

use thiserror::Error;

/// Machine-readable classification of an [`EngineError`].
///
/// Mirrors the error variants one-to-one so the result tree can record
/// the kind next to the verbatim message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A named thing (pack, source file) does not exist.
    NotFound,
    /// A destination is occupied by something the engine does not own.
    Conflict,
    /// Configuration or handler options are malformed.
    Invalid,
    /// An unexpected I/O failure.
    Io,
    /// An external command failed.
    Execution,
    /// A deployed symlink chain is broken.
    Integrity,
}

/// Top-level error type for the deployment engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A named pack or a source file required by an operation is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The path is occupied by a file or link the engine does not own.
    /// The filesystem is left untouched.
    #[error("conflict at {path}: {details}")]
    Conflict {
        /// Path of the occupied destination.
        path: PathBuf,
        /// What currently occupies it.
        details: String,
    },

    /// A rule or handler option set is malformed. Detected before any
    /// mutation; nothing has been written.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// An unexpected filesystem failure, wrapped with the path it hit.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path the failing operation targeted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A provisioning command exited non-zero or could not be spawned.
    /// No sentinel is written.
    #[error("command '{command}' failed: {detail}")]
    Execution {
        /// The program that was invoked.
        command: String,
        /// Exit status or spawn failure description.
        detail: String,
    },

    /// A deployed symlink chain failed one of the dangling-link checks.
    #[error("integrity: {0}")]
    Integrity(String),
}

impl EngineError {
    /// The machine-readable kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Invalid(_) => ErrorKind::Invalid,
            Self::Io { .. } => ErrorKind::Io,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Integrity(_) => ErrorKind::Integrity,
        }
    }

    /// Wrap an [`std::io::Error`] with the path it occurred at.
    ///
    /// A `NotFound` I/O error is promoted to [`EngineError::NotFound`] so
    /// the distinguished does-not-exist condition survives the wrapping.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.display().to_string())
        } else {
            Self::Io { path, source }
        }
    }
}

/// Convenience alias used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
