//! The execution engine: drives discovery, matching, dispatch, and
//! aggregation for every pipeline.
//!
//! One `Engine` is built per invocation and owns nothing but value
//! state; all filesystem access goes through the datastore's
//! collaborators. A failing handler fails its pack, never the run.

pub mod dangling;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::datastore::{Datastore, RunOutcome, Sentinel, sha256_hex};
use crate::error::{EngineError, Result};
use crate::handlers::{
    Handler, HandlerContext, HandlerKind, HandlerRegistry, Operation, PlannedFile, symlink,
};
use crate::packs::{self, Discovery, Pack, RuleMatch, matching};
use crate::results::{ExecutionResult, FileOutcome, FileStatus, HandlerResult, PackResult};

pub use dangling::{ChainHealth, DanglingLink};

/// One-shot pipeline driver.
#[derive(Debug)]
pub struct Engine {
    datastore: Datastore,
    registry: HandlerRegistry,
    pack_configs: BTreeMap<String, Config>,
    cancel: Option<Arc<AtomicBool>>,
    dry_run: bool,
}

impl Engine {
    /// An engine over the given datastore with the built-in handlers.
    #[must_use]
    pub fn new(datastore: Datastore) -> Self {
        Self {
            datastore,
            registry: HandlerRegistry::builtin(),
            pack_configs: BTreeMap::new(),
            cancel: None,
            dry_run: false,
        }
    }

    /// Replace the handler registry.
    #[must_use]
    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Supply per-pack configuration deltas, merged onto the root
    /// configuration at discovery time.
    #[must_use]
    pub fn with_pack_config(mut self, pack: impl Into<String>, config: Config) -> Self {
        self.pack_configs.insert(pack.into(), config);
        self
    }

    /// Attach a cooperative cancellation flag. When set, the engine
    /// returns after the current handler's current operation; sentinels
    /// already written persist and nothing is rolled back.
    #[must_use]
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Enable dry-run: no filesystem mutation, outcomes report what
    /// would happen.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn discover(&self, names: &[String]) -> Result<Discovery> {
        packs::discover(
            self.datastore.fs(),
            self.datastore.paths(),
            self.datastore.config(),
            &self.pack_configs,
            names,
        )
    }

    fn finish(&self, command: &str, packs: Vec<PackResult>) -> ExecutionResult {
        ExecutionResult {
            command: command.to_string(),
            packs,
            dry_run: self.dry_run,
            timestamp: self.datastore.clock().now_rfc3339(),
        }
    }

    fn missing_results(discovery: &Discovery) -> Vec<PackResult> {
        discovery
            .missing
            .iter()
            .map(|name| PackResult::missing(name, format!("pack not found: {name}")))
            .collect()
    }

    fn pack_failure(pack: &str, stage: &str, err: &EngineError) -> PackResult {
        let mut handler = HandlerResult::new(stage);
        handler.error = Some(err.to_string());
        PackResult::new(pack, vec![handler])
    }

    // -----------------------------------------------------------------------
    // link / provision
    // -----------------------------------------------------------------------

    /// Deploy linking handlers for the selected packs.
    ///
    /// # Errors
    ///
    /// Fails only on discovery-level I/O; per-pack failures land in the
    /// result tree.
    pub fn link(&self, names: &[String]) -> Result<ExecutionResult> {
        self.deploy("link", names, false)
    }

    /// Deploy linking handlers, then run provisioning handlers under
    /// their sentinel gate.
    ///
    /// # Errors
    ///
    /// Fails only on discovery-level I/O.
    pub fn provision(&self, names: &[String]) -> Result<ExecutionResult> {
        self.deploy("provision", names, true)
    }

    fn deploy(
        &self,
        command: &str,
        names: &[String],
        include_provisioning: bool,
    ) -> Result<ExecutionResult> {
        info!(command, dry_run = self.dry_run, "starting run");
        let discovery = self.discover(names)?;
        let mut results = Self::missing_results(&discovery);

        for pack in &discovery.packs {
            if self.cancelled() {
                warn!("cancellation requested, stopping");
                break;
            }
            if pack.ignored {
                results.push(PackResult::ignored(&pack.name));
                continue;
            }
            let matches = match matching::match_pack(self.datastore.fs(), pack) {
                Ok(matches) => matches,
                Err(e) => {
                    results.push(Self::pack_failure(&pack.name, "matching", &e));
                    continue;
                }
            };
            if matches.is_empty() {
                debug!(pack = %pack.name, "no matches, skipping");
                continue;
            }
            let handlers = self.run_handlers(pack, &matches, include_provisioning);
            results.push(PackResult::new(&pack.name, handlers));
        }

        if !self.dry_run {
            self.regenerate_shell_init()?;
        }
        Ok(self.finish(command, results))
    }

    fn run_handlers(
        &self,
        pack: &Pack,
        matches: &[RuleMatch],
        include_provisioning: bool,
    ) -> Vec<HandlerResult> {
        let groups = matching::group_by_handler(matches);
        let order = self
            .registry
            .dispatch_order(groups.iter().map(|(h, _)| h.as_str()));
        let ctx = HandlerContext {
            datastore: &self.datastore,
            pack,
        };
        let mut results = Vec::new();

        for name in order {
            if self.cancelled() {
                break;
            }
            let Some(handler) = self.registry.get(name) else {
                continue;
            };
            if !include_provisioning && handler.kind() == HandlerKind::Provisioning {
                continue;
            }
            let batch = groups
                .iter()
                .find(|(h, _)| h == name)
                .map(|(_, b)| b.as_slice())
                .unwrap_or_default();
            let start = Instant::now();
            let mut result = HandlerResult::new(name);
            match handler.plan(&ctx, batch) {
                Ok(planned) => {
                    for file in planned {
                        if self.cancelled() {
                            break;
                        }
                        result.files.push(self.execute_file(pack, name, &file));
                    }
                }
                Err(e) => result.error = Some(e.to_string()),
            }
            results.push(result.timed(start.elapsed()));
        }

        for (name, _) in &groups {
            if self.registry.get(name).is_none() {
                let mut result = HandlerResult::new(name.clone());
                result.error = Some(format!("unknown handler '{name}'"));
                results.push(result);
            }
        }
        results
    }

    fn execute_file(&self, pack: &Pack, handler: &str, file: &PlannedFile) -> FileOutcome {
        if self.dry_run {
            return self.preview_file(pack, handler, file);
        }
        let mut all_skipped = !file.ops.is_empty();
        for op in &file.ops {
            let status = match op {
                Operation::CreateDataLink { source } => self
                    .datastore
                    .create_data_link(&pack.name, handler, source)
                    .map(|_| FileStatus::Success),
                Operation::CreateUserLink {
                    intermediate,
                    user_path,
                } => self
                    .guarded_user_link(pack, intermediate, user_path)
                    .map(|()| FileStatus::Success),
                Operation::RunAndRecord {
                    command,
                    sentinel,
                    source,
                } => self
                    .datastore
                    .run_and_record(&pack.name, handler, command, sentinel, source)
                    .map(|outcome| match outcome {
                        RunOutcome::Skipped => FileStatus::Skipped,
                        RunOutcome::Executed => FileStatus::Success,
                    }),
            };
            match status {
                Ok(FileStatus::Skipped) => {}
                Ok(_) => all_skipped = false,
                Err(e) => {
                    return FileOutcome::new(file.path.clone(), FileStatus::Error)
                        .with_message(e.to_string());
                }
            }
        }
        let status = if all_skipped {
            FileStatus::Skipped
        } else {
            FileStatus::Success
        };
        FileOutcome::new(file.path.clone(), status)
    }

    fn guarded_user_link(
        &self,
        pack: &Pack,
        intermediate: &std::path::Path,
        user_path: &std::path::Path,
    ) -> Result<()> {
        if pack.config.protected_paths.contains(user_path) {
            return Err(EngineError::Conflict {
                path: user_path.to_path_buf(),
                details: "path is protected".to_string(),
            });
        }
        self.datastore.create_user_link(intermediate, user_path)
    }

    fn preview_file(&self, pack: &Pack, handler: &str, file: &PlannedFile) -> FileOutcome {
        // A provisioning file whose sentinel is current would be
        // skipped, and a dry run can tell without mutating anything.
        if let [
            Operation::RunAndRecord {
                sentinel, source, ..
            },
        ] = file.ops.as_slice()
        {
            let current = self
                .datastore
                .fs()
                .read(source)
                .ok()
                .map(|bytes| sha256_hex(&bytes));
            let recorded = self
                .datastore
                .read_sentinel(&pack.name, handler, sentinel)
                .ok()
                .flatten();
            if let (Some(checksum), Some(sentinel)) = (current, recorded) {
                if sentinel.matches_checksum(&checksum) {
                    return FileOutcome::new(file.path.clone(), FileStatus::Skipped);
                }
            }
        }
        FileOutcome::new(file.path.clone(), FileStatus::Pending)
    }

    // -----------------------------------------------------------------------
    // status
    // -----------------------------------------------------------------------

    /// Inspect without mutating: classify every chain and sentinel.
    ///
    /// # Errors
    ///
    /// Fails only on discovery-level I/O.
    pub fn status(&self, names: &[String]) -> Result<ExecutionResult> {
        let discovery = self.discover(names)?;
        let mut results = Self::missing_results(&discovery);

        for pack in &discovery.packs {
            if pack.ignored {
                results.push(PackResult::ignored(&pack.name));
                continue;
            }
            let matches = match matching::match_pack(self.datastore.fs(), pack) {
                Ok(matches) => matches,
                Err(e) => {
                    results.push(Self::pack_failure(&pack.name, "matching", &e));
                    continue;
                }
            };
            let handlers = self.status_handlers(pack, &matches);
            if handlers.is_empty() {
                continue;
            }
            results.push(PackResult::new(&pack.name, handlers));
        }
        Ok(self.finish("status", results))
    }

    fn status_handlers(&self, pack: &Pack, matches: &[RuleMatch]) -> Vec<HandlerResult> {
        let groups = matching::group_by_handler(matches);
        let ctx = HandlerContext {
            datastore: &self.datastore,
            pack,
        };
        let mut names: BTreeSet<String> = groups.iter().map(|(h, _)| h.clone()).collect();
        // Symlink chains can outlive their matches (deleted sources).
        names.insert("symlink".to_string());
        let order = self.registry.dispatch_order(names.iter());
        let mut results = Vec::new();

        for name in order {
            let batch = groups
                .iter()
                .find(|(h, _)| h == name)
                .map(|(_, b)| b.as_slice())
                .unwrap_or_default();
            let files = match name {
                "symlink" => self.symlink_status(&ctx, batch),
                "shell_profile" | "path" => self.intermediate_status(&ctx, name, batch),
                _ => self.sentinel_status(pack, name, batch),
            };
            if files.is_empty() {
                continue;
            }
            results.push(HandlerResult {
                handler: name.to_string(),
                files,
                error: None,
                duration_ms: 0,
            });
        }
        results
    }

    fn symlink_status(&self, ctx: &HandlerContext<'_>, batch: &[RuleMatch]) -> Vec<FileOutcome> {
        let fs = self.datastore.fs();
        symlink::chain_entries(ctx, batch)
            .iter()
            .map(|entry| {
                let path = self
                    .datastore
                    .paths()
                    .split_pack_source(&entry.source)
                    .map_or_else(|| entry.user_path.clone(), |(_, rel)| rel);
                match dangling::classify(fs, entry) {
                    ChainHealth::Healthy => FileOutcome::new(path, FileStatus::Success),
                    ChainHealth::NotDeployed => FileOutcome::new(path, FileStatus::Pending),
                    ChainHealth::NotOurs => FileOutcome::new(path, FileStatus::Skipped)
                        .with_message("exists but is not managed"),
                    ChainHealth::Dangling(problem) => {
                        FileOutcome::new(path, FileStatus::Error).with_message(problem)
                    }
                }
            })
            .collect()
    }

    fn intermediate_status(
        &self,
        _ctx: &HandlerContext<'_>,
        handler: &str,
        batch: &[RuleMatch],
    ) -> Vec<FileOutcome> {
        let fs = self.datastore.fs();
        batch
            .iter()
            .map(|m| {
                let Ok(intermediate) =
                    self.datastore
                        .intermediate_for(&m.pack, handler, &m.absolute)
                else {
                    return FileOutcome::new(m.path.clone(), FileStatus::Error)
                        .with_message("cannot derive intermediate path");
                };
                if !fs.exists_no_follow(&intermediate) {
                    return FileOutcome::new(m.path.clone(), FileStatus::Pending);
                }
                match fs.read_link(&intermediate) {
                    Ok(target) if crate::paths::paths_equal(&target, &m.absolute) => {
                        FileOutcome::new(m.path.clone(), FileStatus::Success)
                    }
                    _ => FileOutcome::new(m.path.clone(), FileStatus::Error)
                        .with_message("intermediate points to wrong file"),
                }
            })
            .collect()
    }

    fn sentinel_status(&self, pack: &Pack, handler: &str, batch: &[RuleMatch]) -> Vec<FileOutcome> {
        batch
            .iter()
            .map(|m| {
                let sentinel_name = m
                    .absolute
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let recorded = self
                    .datastore
                    .read_sentinel(&pack.name, handler, &sentinel_name)
                    .ok()
                    .flatten();
                match recorded {
                    None => FileOutcome::new(m.path.clone(), FileStatus::Pending),
                    Some(Sentinel { checksum: None, .. }) => {
                        FileOutcome::new(m.path.clone(), FileStatus::Success)
                            .with_message("completed (no checksum recorded)")
                    }
                    Some(sentinel) => {
                        let current = self
                            .datastore
                            .fs()
                            .read(&m.absolute)
                            .ok()
                            .map(|bytes| sha256_hex(&bytes));
                        if current.is_some_and(|c| sentinel.matches_checksum(&c)) {
                            FileOutcome::new(m.path.clone(), FileStatus::Success)
                        } else {
                            FileOutcome::new(m.path.clone(), FileStatus::Pending)
                                .with_message("source modified; will re-run")
                        }
                    }
                }
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // deprovision
    // -----------------------------------------------------------------------

    /// Reverse prior state for the selected packs.
    ///
    /// Handlers with stored state are enumerated from the datastore and
    /// unioned with the current matches, so state survives even when
    /// sources were deleted. Each handler's clear runs under its
    /// family's safety policy.
    ///
    /// # Errors
    ///
    /// Fails only on discovery-level I/O.
    pub fn deprovision(&self, names: &[String]) -> Result<ExecutionResult> {
        info!(dry_run = self.dry_run, "starting deprovision");
        let discovery = self.discover(names)?;
        let mut results = Self::missing_results(&discovery);

        for pack in &discovery.packs {
            if self.cancelled() {
                break;
            }
            if pack.ignored {
                results.push(PackResult::ignored(&pack.name));
                continue;
            }
            let matches = match matching::match_pack(self.datastore.fs(), pack) {
                Ok(matches) => matches,
                Err(e) => {
                    results.push(Self::pack_failure(&pack.name, "matching", &e));
                    continue;
                }
            };
            let groups = matching::group_by_handler(&matches);
            let mut handler_names: BTreeSet<String> = self
                .datastore
                .list_pack_handlers(&pack.name)
                .into_iter()
                .collect();
            handler_names.extend(groups.iter().map(|(h, _)| h.clone()));
            if handler_names.is_empty() {
                continue;
            }

            let ctx = HandlerContext {
                datastore: &self.datastore,
                pack,
            };
            let mut handler_results = Vec::new();
            for name in self.registry.dispatch_order(handler_names.iter()) {
                if self.cancelled() {
                    break;
                }
                let Some(handler) = self.registry.get(name) else {
                    continue;
                };
                let batch = groups
                    .iter()
                    .find(|(h, _)| h == name)
                    .map(|(_, b)| b.as_slice())
                    .unwrap_or_default();
                handler_results.push(self.clear_handler(&ctx, handler.as_ref(), batch));
            }
            for name in &handler_names {
                if self.registry.get(name).is_none() {
                    let mut result = HandlerResult::new(name.clone());
                    result.error = Some(format!("unknown handler '{name}'"));
                    handler_results.push(result);
                }
            }
            results.push(PackResult::new(&pack.name, handler_results));
        }
        if !self.dry_run {
            self.regenerate_shell_init()?;
        }
        Ok(self.finish("deprovision", results))
    }

    fn clear_handler(
        &self,
        ctx: &HandlerContext<'_>,
        handler: &dyn Handler,
        batch: &[RuleMatch],
    ) -> HandlerResult {
        let start = Instant::now();
        let mut result = HandlerResult::new(handler.name());
        match handler.clear(ctx, batch, self.dry_run) {
            Ok(report) => {
                let removed_status = if self.dry_run {
                    FileStatus::Pending
                } else {
                    FileStatus::Success
                };
                for path in report.removed {
                    result
                        .files
                        .push(FileOutcome::new(path, removed_status).with_message("removed"));
                }
                for (path, reason) in report.kept {
                    result
                        .files
                        .push(FileOutcome::new(path, FileStatus::Skipped).with_message(reason));
                }
            }
            Err(e) => result.error = Some(e.to_string()),
        }
        result.timed(start.elapsed())
    }

    // -----------------------------------------------------------------------
    // dangling links
    // -----------------------------------------------------------------------

    /// Scan the selected packs' chains and return the broken ones.
    ///
    /// # Errors
    ///
    /// Fails on discovery-level I/O or an invalid ignore pattern.
    pub fn check_dangling(&self, names: &[String]) -> Result<Vec<DanglingLink>> {
        let discovery = self.discover(names)?;
        let mut findings = Vec::new();
        for pack in &discovery.packs {
            if pack.ignored {
                continue;
            }
            let matches = matching::match_pack(self.datastore.fs(), pack)?;
            let batch: Vec<RuleMatch> = matches
                .into_iter()
                .filter(|m| m.handler == "symlink")
                .collect();
            let ctx = HandlerContext {
                datastore: &self.datastore,
                pack,
            };
            let entries = symlink::chain_entries(&ctx, &batch);
            findings.extend(dangling::scan(self.datastore.fs(), &entries));
        }
        findings.sort_by(|a, b| a.deployed_path.cmp(&b.deployed_path));
        Ok(findings)
    }

    /// Scan and remove broken chains under the ownership re-check.
    /// Returns the links actually repaired (all findings under
    /// dry-run).
    ///
    /// # Errors
    ///
    /// Propagates scan failures and removal I/O errors.
    pub fn repair_dangling(&self, names: &[String]) -> Result<Vec<DanglingLink>> {
        let findings = self.check_dangling(names)?;
        if self.dry_run {
            return Ok(findings);
        }
        let mut repaired = Vec::new();
        for finding in findings {
            if self.cancelled() {
                break;
            }
            if dangling::repair(self.datastore.fs(), &finding)? {
                repaired.push(finding);
            }
        }
        Ok(repaired)
    }

    // -----------------------------------------------------------------------
    // shell init
    // -----------------------------------------------------------------------

    /// Regenerate the aggregated shell init file from the intermediates
    /// currently on disk. Interactive shells source this file; it
    /// prepends every deployed PATH entry and sources every deployed
    /// profile fragment.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures writing the file.
    pub fn regenerate_shell_init(&self) -> Result<()> {
        let paths = self.datastore.paths();
        let fs = self.datastore.fs();
        let mut lines = vec![
            "# Generated by dodot. Source this file from your shell rc.".to_string(),
        ];
        for dir_entry in self.sorted_dir(&paths.deployed_path_dir())? {
            lines.push(format!("export PATH=\"{}:$PATH\"", dir_entry.display()));
        }
        for profile in self.sorted_dir(&paths.deployed_shell_profile_dir())? {
            lines.push(format!("[ -r \"{0}\" ] && . \"{0}\"", profile.display()));
        }
        let file = paths.shell_init_file();
        if let Some(parent) = file.parent() {
            fs.create_dir_all(parent)
                .map_err(|e| EngineError::io(parent, e))?;
        }
        let body = lines.join("\n") + "\n";
        fs.write(&file, body.as_bytes(), Some(0o644))
            .map_err(|e| EngineError::io(&file, e))?;
        debug!(path = %file.display(), "shell init regenerated");
        Ok(())
    }

    fn sorted_dir(&self, dir: &std::path::Path) -> Result<Vec<PathBuf>> {
        match self.datastore.fs().read_dir(dir) {
            Ok(mut entries) => {
                entries.sort();
                Ok(entries)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(EngineError::io(dir, e)),
        }
    }
}
