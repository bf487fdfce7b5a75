//! Pure value objects describing what a run did (or would do).
//!
//! Nothing here touches the filesystem; the engine fills these in and a
//! display collaborator renders them. Everything serializes to JSON for
//! the structured exit surface.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Outcome of one file within a handler batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// The operation applied (or verified an already-correct state).
    Success,
    /// Nothing to do; state already current (e.g. matching sentinel).
    Skipped,
    /// The operation failed; `message` carries the verbatim error.
    Error,
    /// Not yet applied; reported by dry-run and status.
    Pending,
}

/// One file's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    /// Pack-relative path of the source file.
    pub path: PathBuf,
    pub status: FileStatus,
    /// Error or finding text, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FileOutcome {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            status,
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// One handler's result within a pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerResult {
    pub handler: String,
    pub files: Vec<FileOutcome>,
    /// Handler-level failure (e.g. planning failed before any file ran).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent in this handler, in milliseconds.
    pub duration_ms: u64,
}

impl HandlerResult {
    #[must_use]
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            files: Vec::new(),
            error: None,
            duration_ms: 0,
        }
    }

    /// Record elapsed time.
    #[must_use]
    pub fn timed(mut self, elapsed: Duration) -> Self {
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Whether this handler carries any error.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.is_some() || self.files.iter().any(|f| f.status == FileStatus::Error)
    }
}

/// Aggregate status of one pack, derived from its handler results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackStatus {
    /// At least one handler errored.
    Alert,
    /// Every outcome succeeded (or was already current).
    Success,
    /// A mix of applied and pending work.
    Partial,
    /// Everything still pending (dry-run, or status on a fresh tree).
    Queue,
    /// The pack carries the ignore marker.
    Ignored,
}

/// One pack's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackResult {
    pub pack: String,
    pub handlers: Vec<HandlerResult>,
    pub status: PackStatus,
}

impl PackResult {
    /// Build a pack result, deriving the aggregate status.
    #[must_use]
    pub fn new(pack: impl Into<String>, handlers: Vec<HandlerResult>) -> Self {
        let status = derive_status(&handlers);
        Self {
            pack: pack.into(),
            handlers,
            status,
        }
    }

    /// A result for a pack carrying the ignore marker.
    #[must_use]
    pub fn ignored(pack: impl Into<String>) -> Self {
        Self {
            pack: pack.into(),
            handlers: Vec::new(),
            status: PackStatus::Ignored,
        }
    }

    /// A result for a named pack that does not exist.
    #[must_use]
    pub fn missing(pack: impl Into<String>, message: impl Into<String>) -> Self {
        let pack = pack.into();
        let mut handler = HandlerResult::new("discovery");
        handler.error = Some(message.into());
        Self {
            pack,
            handlers: vec![handler],
            status: PackStatus::Alert,
        }
    }
}

fn derive_status(handlers: &[HandlerResult]) -> PackStatus {
    if handlers.iter().any(HandlerResult::has_error) {
        return PackStatus::Alert;
    }
    let outcomes: Vec<FileStatus> = handlers
        .iter()
        .flat_map(|h| h.files.iter().map(|f| f.status))
        .collect();
    let pending = outcomes
        .iter()
        .filter(|s| **s == FileStatus::Pending)
        .count();
    if !outcomes.is_empty() && pending == outcomes.len() {
        PackStatus::Queue
    } else if pending > 0 {
        PackStatus::Partial
    } else {
        PackStatus::Success
    }
}

/// The run-level result handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Which pipeline ran (`link`, `provision`, `status`, `deprovision`).
    pub command: String,
    pub packs: Vec<PackResult>,
    pub dry_run: bool,
    /// RFC3339 UTC completion timestamp.
    pub timestamp: String,
}

impl ExecutionResult {
    /// Whether any pack carries an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.packs.iter().any(|p| p.status == PackStatus::Alert)
    }

    /// Serialize for the structured exit surface.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
