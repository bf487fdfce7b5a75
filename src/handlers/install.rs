//! The install handler: runs a pack's install script once per script
//! content.
//!
//! The sentinel name is the script basename, so a pack with several
//! configured install scripts tracks each independently. Clearing only
//! forgets the record; the script's side effects are never reversed.

use tracing::debug;

use crate::error::Result;
use crate::exec::CommandSpec;
use crate::packs::RuleMatch;

use super::{ClearReport, Handler, HandlerContext, HandlerKind, Operation, PlannedFile};

/// Provisioning handler for install scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallHandler;

fn basename(m: &RuleMatch) -> String {
    m.absolute
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Handler for InstallHandler {
    fn name(&self) -> &'static str {
        "install"
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Provisioning
    }

    fn plan(&self, ctx: &HandlerContext<'_>, batch: &[RuleMatch]) -> Result<Vec<PlannedFile>> {
        Ok(batch
            .iter()
            .map(|m| {
                let shell = m
                    .options
                    .get("shell")
                    .map_or("sh", String::as_str)
                    .to_string();
                let command = CommandSpec::new(shell)
                    .arg(m.absolute.display().to_string())
                    .current_dir(&ctx.pack.path)
                    .env("DODOT_PACK", &ctx.pack.name);
                PlannedFile {
                    path: m.path.clone(),
                    ops: vec![Operation::RunAndRecord {
                        command,
                        sentinel: basename(m),
                        source: m.absolute.clone(),
                    }],
                }
            })
            .collect())
    }

    fn clear(
        &self,
        ctx: &HandlerContext<'_>,
        _batch: &[RuleMatch],
        dry_run: bool,
    ) -> Result<ClearReport> {
        clear_sentinels(ctx, self.name(), dry_run)
    }
}

/// Drop every sentinel recorded for `(pack, handler)`. Shared by the
/// package-manifest handler, whose clear policy is identical.
pub(super) fn clear_sentinels(
    ctx: &HandlerContext<'_>,
    handler: &str,
    dry_run: bool,
) -> Result<ClearReport> {
    let mut report = ClearReport::default();
    for name in ctx.datastore.list_handler_sentinels(&ctx.pack.name, handler) {
        report
            .removed
            .push(ctx.datastore.paths().sentinel_file(handler, &ctx.pack.name, &name));
    }
    if !dry_run {
        ctx.datastore.remove_state(&ctx.pack.name, handler)?;
        ctx.datastore.remove_sentinels(&ctx.pack.name, handler)?;
        debug!(pack = %ctx.pack.name, handler, "cleared provisioning record");
    }
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::{Config, HandlerOptions};
    use crate::datastore::Datastore;
    use crate::exec::test_helpers::MockRunner;
    use crate::fsys::Fs;
    use crate::fsys::memory::MemoryFs;
    use crate::packs::Pack;
    use crate::paths::Paths;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    fn fixture() -> (Datastore, Arc<MemoryFs>, Pack) {
        let fs = Arc::new(MemoryFs::new());
        fs.create_dir_all(Path::new("/dotfiles/tools")).unwrap();
        fs.create_dir_all(Path::new("/data")).unwrap();
        let store = Datastore::new(
            Arc::clone(&fs) as Arc<dyn Fs>,
            Paths::new("/dotfiles", "/data", "/home/user", "/home/user/.config"),
            Config::default(),
            Arc::new(MockRunner::ok()),
            Arc::new(FixedClock::at("2026-08-25T10:00:00Z")),
        );
        let pack = Pack {
            name: "tools".to_string(),
            path: PathBuf::from("/dotfiles/tools"),
            config: Config::default(),
            ignored: false,
        };
        (store, fs, pack)
    }

    fn install_match(options: HandlerOptions) -> RuleMatch {
        RuleMatch {
            rule_name: "install-script".to_string(),
            pack: "tools".to_string(),
            path: PathBuf::from("install.sh"),
            absolute: PathBuf::from("/dotfiles/tools/install.sh"),
            handler: "install".to_string(),
            options,
            priority: 30,
        }
    }

    #[test]
    fn plan_runs_script_through_sh_in_pack_dir() {
        let (store, _fs, pack) = fixture();
        let ctx = HandlerContext {
            datastore: &store,
            pack: &pack,
        };
        let planned = InstallHandler
            .plan(&ctx, &[install_match(HandlerOptions::new())])
            .unwrap();
        let Operation::RunAndRecord {
            command, sentinel, ..
        } = &planned[0].ops[0]
        else {
            panic!("expected RunAndRecord");
        };
        assert_eq!(command.program, "sh");
        assert_eq!(command.args, vec!["/dotfiles/tools/install.sh"]);
        assert_eq!(command.cwd, Some(PathBuf::from("/dotfiles/tools")));
        assert!(command.env.contains(&("DODOT_PACK".to_string(), "tools".to_string())));
        assert_eq!(sentinel, "install.sh");
    }

    #[test]
    fn shell_option_overrides_interpreter() {
        let (store, _fs, pack) = fixture();
        let ctx = HandlerContext {
            datastore: &store,
            pack: &pack,
        };
        let mut options = HandlerOptions::new();
        options.insert("shell".to_string(), "bash".to_string());
        let planned = InstallHandler.plan(&ctx, &[install_match(options)]).unwrap();
        let Operation::RunAndRecord { command, .. } = &planned[0].ops[0] else {
            panic!("expected RunAndRecord");
        };
        assert_eq!(command.program, "bash");
    }

    #[test]
    fn clear_drops_sentinels_only() {
        let (store, fs, pack) = fixture();
        fs.write(Path::new("/dotfiles/tools/install.sh"), b"#!/bin/sh\n", None)
            .unwrap();
        store
            .run_and_record(
                "tools",
                "install",
                &CommandSpec::new("sh"),
                "install.sh",
                Path::new("/dotfiles/tools/install.sh"),
            )
            .unwrap();
        let ctx = HandlerContext {
            datastore: &store,
            pack: &pack,
        };

        let report = InstallHandler.clear(&ctx, &[], false).unwrap();

        assert_eq!(
            report.removed,
            vec![PathBuf::from("/data/provision/tools_install.sh.sentinel")]
        );
        assert!(!store.has_sentinel("tools", "install", "install.sh"));
        assert!(fs.exists(Path::new("/dotfiles/tools/install.sh")));
    }

    #[test]
    fn clear_dry_run_keeps_sentinels() {
        let (store, fs, pack) = fixture();
        fs.write(Path::new("/dotfiles/tools/install.sh"), b"#!/bin/sh\n", None)
            .unwrap();
        store
            .run_and_record(
                "tools",
                "install",
                &CommandSpec::new("sh"),
                "install.sh",
                Path::new("/dotfiles/tools/install.sh"),
            )
            .unwrap();
        let ctx = HandlerContext {
            datastore: &store,
            pack: &pack,
        };

        let report = InstallHandler.clear(&ctx, &[], true).unwrap();

        assert_eq!(report.removed.len(), 1);
        assert!(store.has_sentinel("tools", "install", "install.sh"));
    }
}
