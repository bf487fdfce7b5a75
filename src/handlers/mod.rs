//! Handlers turn rule matches into datastore operations.
//!
//! Two families exist. Linking handlers produce idempotent
//! configuration (symlink chains, PATH entries, shell-init fragments)
//! and know how to reverse it under ownership checks. Provisioning
//! handlers produce side effects tracked by sentinels and reverse only
//! their record, never the effect itself.

pub mod homebrew;
pub mod install;
pub mod path;
pub mod shell_profile;
pub mod symlink;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::datastore::Datastore;
use crate::error::Result;
use crate::exec::CommandSpec;
use crate::packs::{Pack, RuleMatch};

/// Handler family tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandlerKind {
    /// Idempotent configuration; safe to rerun.
    Linking,
    /// Side-effecting; runs once per source content.
    Provisioning,
}

/// One unit of work against the datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create (or repair) the intermediate symlink for a source.
    CreateDataLink { source: PathBuf },
    /// Create the user-facing symlink onto an intermediate.
    CreateUserLink {
        intermediate: PathBuf,
        user_path: PathBuf,
    },
    /// Execute a command once per source content, recording a sentinel.
    RunAndRecord {
        command: CommandSpec,
        sentinel: String,
        source: PathBuf,
    },
}

/// Planned operations for one matched file. The engine executes the
/// operations in order and folds them into a single per-file outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    /// Pack-relative path, carried into the result tree.
    pub path: PathBuf,
    pub ops: Vec<Operation>,
}

/// What a handler's clear did (or would do, under dry-run).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Paths removed: user links, intermediates, sentinel names.
    pub removed: Vec<PathBuf>,
    /// Paths preserved, with the reason they were not touched.
    pub kept: Vec<(PathBuf, String)>,
}

/// Everything a handler needs to plan or clear for one pack.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    pub datastore: &'a Datastore,
    pub pack: &'a Pack,
}

/// A named operator over one pack's match batch.
pub trait Handler: Send + Sync + std::fmt::Debug {
    /// Registry key; also names the per-(pack, handler) state tree.
    fn name(&self) -> &'static str;

    fn kind(&self) -> HandlerKind;

    /// Turn a batch of matches into planned operations. Pure: no
    /// filesystem mutation happens here.
    ///
    /// # Errors
    ///
    /// Returns an error when the batch cannot be planned at all; the
    /// engine records it as a handler-level failure for the pack.
    fn plan(&self, ctx: &HandlerContext<'_>, batch: &[RuleMatch]) -> Result<Vec<PlannedFile>>;

    /// Reverse this handler's state for the pack.
    ///
    /// Linking handlers verify ownership per user link, remove the
    /// verified ones plus their intermediates, and report the rest
    /// untouched; provisioning handlers drop their record only. Both
    /// end by removing the per-(pack, handler) state tree. With
    /// `dry_run` nothing is mutated and the report says what would go.
    ///
    /// # Errors
    ///
    /// Propagates unexpected I/O failures.
    fn clear(
        &self,
        ctx: &HandlerContext<'_>,
        batch: &[RuleMatch],
        dry_run: bool,
    ) -> Result<ClearReport>;
}

/// Registry of available handlers, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with all five built-in handlers.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(symlink::SymlinkHandler));
        registry.register(Arc::new(shell_profile::ShellProfileHandler));
        registry.register(Arc::new(path::PathHandler));
        registry.register(Arc::new(install::InstallHandler));
        registry.register(Arc::new(homebrew::HomebrewHandler));
        registry
    }

    /// Add (or replace) a handler.
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.name(), handler);
    }

    /// Look up a handler by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(name)
    }

    /// All registered handler names in dispatch order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let all: Vec<&'static str> = self.handlers.keys().copied().collect();
        self.dispatch_order(all)
    }

    /// Order a set of handler names for execution: linking family
    /// first, then provisioning, lexicographic within each family.
    /// Unknown names are dropped; the engine reports them separately.
    #[must_use]
    pub fn dispatch_order<I, S>(&self, names: I) -> Vec<&'static str>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut known: Vec<(HandlerKind, &'static str)> = Vec::new();
        for name in names {
            if let Some(handler) = self.handlers.get(name.as_ref()) {
                let entry = (handler.kind(), handler.name());
                if !known.contains(&entry) {
                    known.push(entry);
                }
            }
        }
        known.sort();
        known.into_iter().map(|(_, name)| name).collect()
    }
}
