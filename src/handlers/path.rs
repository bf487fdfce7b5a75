//! The PATH handler: a pack's executable directory joins `PATH`.
//!
//! The match is the directory itself, delivered as one intermediate
//! symlink; the generated init file prepends each intermediate to
//! `PATH`. Executables keep their mode because the chain is symlinks
//! all the way down.

use crate::error::Result;
use crate::packs::RuleMatch;

use super::shell_profile::remove_pack_intermediates;
use super::{ClearReport, Handler, HandlerContext, HandlerKind, Operation, PlannedFile};

/// Linking handler for PATH directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathHandler;

impl Handler for PathHandler {
    fn name(&self) -> &'static str {
        "path"
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
        let report =
            remove_pack_intermediates(ctx, &ctx.datastore.paths().deployed_path_dir(), dry_run)?;
        if !dry_run {
            ctx.datastore.remove_state(&ctx.pack.name, self.name())?;
        }
        Ok(report)
    }
}
