//! The shell-profile handler: pack shell fragments sourced by the
//! generated init file.
//!
//! Only the data-link layer exists here; no user link is created. The
//! generated `dodot-init.sh` sources every intermediate in the
//! shell-profile deploy directory, so creating the intermediate is the
//! whole deployment.

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::packs::RuleMatch;

use super::{ClearReport, Handler, HandlerContext, HandlerKind, Operation, PlannedFile};

/// Linking handler for shell-init fragments.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellProfileHandler;

impl Handler for ShellProfileHandler {
    fn name(&self) -> &'static str {
        "shell_profile"
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Linking
    }

    fn plan(&self, _ctx: &HandlerContext<'_>, batch: &[RuleMatch]) -> Result<Vec<PlannedFile>> {
        Ok(batch
            .iter()
            .map(|m| PlannedFile {
                path: m.path.clone(),
                ops: vec![Operation::CreateDataLink {
                    source: m.absolute.clone(),
                }],
            })
            .collect())
    }

    fn clear(
        &self,
        ctx: &HandlerContext<'_>,
        _batch: &[RuleMatch],
        dry_run: bool,
    ) -> Result<ClearReport> {
        let report = remove_pack_intermediates(
            ctx,
            &ctx.datastore.paths().deployed_shell_profile_dir(),
            dry_run,
        )?;
        if !dry_run {
            ctx.datastore.remove_state(&ctx.pack.name, self.name())?;
        }
        Ok(report)
    }
}

/// Remove every intermediate in `dir` named `<pack>_...`. Shared with
/// the PATH handler, whose intermediates follow the same naming.
pub(super) fn remove_pack_intermediates(
    ctx: &HandlerContext<'_>,
    dir: &std::path::Path,
    dry_run: bool,
) -> Result<ClearReport> {
    let fs = ctx.datastore.fs();
    let prefix = format!("{}_", ctx.pack.name);
    let mut report = ClearReport::default();
    let Ok(entries) = fs.read_dir(dir) else {
        return Ok(report);
    };
    for entry in entries {
        let owned = entry
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&prefix));
        if !owned {
            continue;
        }
        if !dry_run {
            fs.remove(&entry).map_err(|e| EngineError::io(&entry, e))?;
            debug!(path = %entry.display(), "removed intermediate");
        }
        report.removed.push(entry);
    }
    Ok(report)
}
