//! Durable state layer: content-addressed links, sentinels, and
//! per-(pack, handler) state trees.
//!
//! The datastore is a thin, explicit interface over [`Fs`]; policy lives
//! in the handlers and the engine. Five operations mutate state
//! ([`Datastore::create_data_link`], [`Datastore::create_user_link`],
//! [`Datastore::run_and_record`], [`Datastore::remove_state`], plus the
//! sentinel existence check) and three queries serve status and
//! deprovision. All operations are idempotent: repeating an
//! already-applied operation is a no-op.

pub mod sentinel;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::exec::{CommandRunner, CommandSpec};
use crate::fsys::{EntryKind, Fs};
use crate::paths::{Paths, paths_equal};

pub use sentinel::{Sentinel, sha256_hex};

/// Outcome of [`Datastore::run_and_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The sentinel matched the current source checksum; nothing ran.
    Skipped,
    /// The command ran to completion and the sentinel was written.
    Executed,
}

/// The engine's durable state, rooted at the data root.
///
/// The datastore exclusively owns its directory subtree; pack source
/// files are never touched.
#[derive(Debug, Clone)]
pub struct Datastore {
    fs: Arc<dyn Fs>,
    paths: Paths,
    config: Config,
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
}

impl Datastore {
    /// Build a datastore over the given collaborators.
    #[must_use]
    pub fn new(
        fs: Arc<dyn Fs>,
        paths: Paths,
        config: Config,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fs,
            paths,
            config,
            runner,
            clock,
        }
    }

    /// The path derivations this datastore was built with.
    #[must_use]
    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// The filesystem this datastore operates on.
    #[must_use]
    pub fn fs(&self) -> &Arc<dyn Fs> {
        &self.fs
    }

    /// The root configuration the datastore derives targets from.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The clock stamping sentinels.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Derive the intermediate path for a (handler, source) pair.
    ///
    /// The derivation is stable: the symlink handler keys on the
    /// basename of the deployment target, PATH entries on the directory
    /// basename, shell profiles on the file stem.
    pub fn intermediate_for(&self, pack: &str, handler: &str, source: &Path) -> Result<PathBuf> {
        let name = |p: &Path| -> String {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        match handler {
            "symlink" => {
                let (_, rel) = self.paths.split_pack_source(source).ok_or_else(|| {
                    EngineError::Invalid(format!(
                        "source {} is outside the dotfiles root",
                        source.display()
                    ))
                })?;
                let target = self.paths.map_pack_file_to_system(&self.config, &rel);
                Ok(self.paths.deployed_symlink(&name(&target)))
            }
            "path" => Ok(self.paths.deployed_path(pack, &name(source))),
            "shell_profile" => {
                let stem = source
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok(self.paths.deployed_shell_profile(pack, &stem))
            }
            other => Err(EngineError::Invalid(format!(
                "handler '{other}' does not create data links"
            ))),
        }
    }

    /// Create (or repair) the intermediate symlink for `source`.
    ///
    /// Ensures the parent directory and the per-(pack, handler) state
    /// root exist, then links the derived intermediate path to `source`.
    /// An intermediate already pointing at `source` is left alone; one
    /// pointing elsewhere is replaced without following the old target.
    ///
    /// # Errors
    ///
    /// Propagates filesystem failures; `Invalid` when the source cannot
    /// be attributed to a pack.
    pub fn create_data_link(&self, pack: &str, handler: &str, source: &Path) -> Result<PathBuf> {
        let intermediate = self.intermediate_for(pack, handler, source)?;
        if let Some(parent) = intermediate.parent() {
            self.fs
                .create_dir_all(parent)
                .map_err(|e| EngineError::io(parent, e))?;
        }
        let state_root = self.paths.pack_handler_dir(pack, handler);
        self.fs
            .create_dir_all(&state_root)
            .map_err(|e| EngineError::io(&state_root, e))?;

        if self.fs.exists_no_follow(&intermediate) {
            let current = self.fs.read_link(&intermediate).ok();
            if current.as_deref().is_some_and(|t| paths_equal(t, source)) {
                return Ok(intermediate);
            }
            // Wrong target or not a symlink: replace the entry itself.
            self.fs
                .remove(&intermediate)
                .map_err(|e| EngineError::io(&intermediate, e))?;
            debug!(path = %intermediate.display(), "replaced stale intermediate");
        }
        self.fs
            .symlink(source, &intermediate)
            .map_err(|e| EngineError::io(&intermediate, e))?;
        debug!(
            link = %intermediate.display(),
            target = %source.display(),
            "created data link"
        );
        Ok(intermediate)
    }

    /// Create the user-facing symlink pointing at an intermediate.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when `user_path` exists and is anything other
    /// than a symlink to `intermediate`; the filesystem is left
    /// untouched in that case.
    pub fn create_user_link(&self, intermediate: &Path, user_path: &Path) -> Result<()> {
        if self.fs.exists_no_follow(user_path) {
            if self.fs.symlink_metadata(user_path).ok() == Some(EntryKind::Symlink) {
                match self.fs.read_link(user_path) {
                    Ok(target) if paths_equal(&target, intermediate) => return Ok(()),
                    Ok(target) => {
                        return Err(EngineError::Conflict {
                            path: user_path.to_path_buf(),
                            details: format!("points to {}", target.display()),
                        });
                    }
                    Err(e) => return Err(EngineError::io(user_path, e)),
                }
            }
            return Err(EngineError::Conflict {
                path: user_path.to_path_buf(),
                details: "exists and is not a symlink".to_string(),
            });
        }
        if let Some(parent) = user_path.parent() {
            self.fs
                .create_dir_all(parent)
                .map_err(|e| EngineError::io(parent, e))?;
        }
        self.fs
            .symlink(intermediate, user_path)
            .map_err(|e| EngineError::io(user_path, e))?;
        debug!(
            link = %user_path.display(),
            target = %intermediate.display(),
            "created user link"
        );
        Ok(())
    }

    /// Run a provisioning command once per source content.
    ///
    /// When a sentinel exists and its checksum matches the current
    /// source bytes, nothing runs. Otherwise the command executes; on
    /// success the sentinel `"<sha256>:<rfc3339>"` is written, on
    /// failure no sentinel is left behind.
    ///
    /// # Errors
    ///
    /// `NotFound` when the source vanished; `Execution` when the command
    /// cannot spawn or exits non-zero.
    pub fn run_and_record(
        &self,
        pack: &str,
        handler: &str,
        spec: &CommandSpec,
        sentinel_name: &str,
        source: &Path,
    ) -> Result<RunOutcome> {
        let bytes = self
            .fs
            .read(source)
            .map_err(|e| EngineError::io(source, e))?;
        let checksum = sha256_hex(&bytes);

        if let Some(existing) = self.read_sentinel(pack, handler, sentinel_name)? {
            if existing.matches_checksum(&checksum) {
                debug!(pack, handler, sentinel_name, "sentinel current, skipping");
                return Ok(RunOutcome::Skipped);
            }
        }

        let result = self
            .runner
            .run(spec)
            .map_err(|e| EngineError::Execution {
                command: spec.display(),
                detail: format!("{e:#}"),
            })?;
        if !result.success {
            return Err(EngineError::Execution {
                command: spec.display(),
                detail: format!(
                    "exit {}: {}",
                    result.code.map_or_else(|| "?".to_string(), |c| c.to_string()),
                    result.stderr.trim()
                ),
            });
        }

        let sentinel = Sentinel::new(checksum, self.clock.now());
        let file = self.paths.sentinel_file(handler, pack, sentinel_name);
        if let Some(parent) = file.parent() {
            self.fs
                .create_dir_all(parent)
                .map_err(|e| EngineError::io(parent, e))?;
        }
        self.fs
            .write(&file, sentinel.render().as_bytes(), None)
            .map_err(|e| EngineError::io(&file, e))?;
        debug!(pack, handler, sentinel_name, "sentinel written");
        Ok(RunOutcome::Executed)
    }

    /// Whether the named sentinel exists.
    #[must_use]
    pub fn has_sentinel(&self, pack: &str, handler: &str, sentinel_name: &str) -> bool {
        self.fs
            .exists(&self.paths.sentinel_file(handler, pack, sentinel_name))
    }

    /// Read and parse the named sentinel, if present.
    ///
    /// Unparseable contents read as absent so a later provision run can
    /// overwrite them.
    ///
    /// # Errors
    ///
    /// Propagates unexpected I/O failures.
    pub fn read_sentinel(
        &self,
        pack: &str,
        handler: &str,
        sentinel_name: &str,
    ) -> Result<Option<Sentinel>> {
        let file = self.paths.sentinel_file(handler, pack, sentinel_name);
        match self.fs.read(&file) {
            Ok(bytes) => Ok(Sentinel::parse(&String::from_utf8_lossy(&bytes)).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::io(&file, e)),
        }
    }

    /// Delete the per-(pack, handler) state subtree. Missing state is a
    /// no-op; sentinels, user links and pack sources are never touched
    /// here. Once the pack's last handler tree is gone the pack
    /// directory itself is dropped too.
    ///
    /// # Errors
    ///
    /// Propagates unexpected I/O failures.
    pub fn remove_state(&self, pack: &str, handler: &str) -> Result<()> {
        let state_root = self.paths.pack_handler_dir(pack, handler);
        if self.fs.exists_no_follow(&state_root) {
            self.fs
                .remove_all(&state_root)
                .map_err(|e| EngineError::io(&state_root, e))?;
            debug!(pack, handler, "removed handler state tree");
        }
        if let Some(pack_root) = state_root.parent() {
            if self.fs.read_dir(pack_root).is_ok_and(|c| c.is_empty()) {
                self.fs
                    .remove(pack_root)
                    .map_err(|e| EngineError::io(pack_root, e))?;
            }
        }
        Ok(())
    }

    /// Delete every sentinel recorded for a (pack, handler) pair.
    ///
    /// Kept separate from [`Datastore::remove_state`]: provisioning
    /// handlers for one pack share a sentinel directory, so linking
    /// handlers clearing their state must never reach into it.
    ///
    /// # Errors
    ///
    /// Propagates unexpected I/O failures.
    pub fn remove_sentinels(&self, pack: &str, handler: &str) -> Result<()> {
        for name in self.list_handler_sentinels(pack, handler) {
            let file = self.paths.sentinel_file(handler, pack, &name);
            if self.fs.exists_no_follow(&file) {
                self.fs
                    .remove(&file)
                    .map_err(|e| EngineError::io(&file, e))?;
            }
        }
        Ok(())
    }

    /// Whether any state exists for a (pack, handler) pair.
    #[must_use]
    pub fn has_handler_state(&self, pack: &str, handler: &str) -> bool {
        self.fs
            .exists_no_follow(&self.paths.pack_handler_dir(pack, handler))
            || !self.list_handler_sentinels(pack, handler).is_empty()
    }

    /// Handlers with stored state for `pack`, sorted by name.
    #[must_use]
    pub fn list_pack_handlers(&self, pack: &str) -> Vec<String> {
        let mut handlers = BTreeSet::new();
        let pack_root = self.paths.data_root().join("packs").join(pack);
        if let Ok(children) = self.fs.read_dir(&pack_root) {
            for child in children {
                if self.fs.is_dir(&child) {
                    if let Some(name) = child.file_name().and_then(|n| n.to_str()) {
                        handlers.insert(name.to_string());
                    }
                }
            }
        }
        for handler in ["install", "homebrew"] {
            if !self.list_handler_sentinels(pack, handler).is_empty() {
                handlers.insert(handler.to_string());
            }
        }
        handlers.into_iter().collect()
    }

    /// Sentinel names recorded for a (pack, handler) pair, sorted.
    #[must_use]
    pub fn list_handler_sentinels(&self, pack: &str, handler: &str) -> Vec<String> {
        let dir = self.paths.sentinel_dir(handler);
        let prefix = format!("{pack}_");
        let Ok(children) = self.fs.read_dir(&dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = children
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .filter_map(|n| n.strip_suffix(".sentinel"))
            .filter_map(|n| n.strip_prefix(&prefix))
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }
}
