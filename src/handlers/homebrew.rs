//! The homebrew handler: applies a pack's Brewfile via `brew bundle`.
//!
//! Sentinels live in their own directory (`$DATA/homebrew/`) but behave
//! exactly like install-script sentinels: one run per manifest content,
//! cleared record-only.

use crate::error::Result;
use crate::exec::CommandSpec;
use crate::packs::RuleMatch;

use super::install::clear_sentinels;
use super::{ClearReport, Handler, HandlerContext, HandlerKind, Operation, PlannedFile};

/// Provisioning handler for package manifests.
#[derive(Debug, Clone, Copy, Default)]
pub struct HomebrewHandler;

impl Handler for HomebrewHandler {
    fn name(&self) -> &'static str {
        "homebrew"
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Provisioning
    }

    fn plan(&self, ctx: &HandlerContext<'_>, batch: &[RuleMatch]) -> Result<Vec<PlannedFile>> {
        Ok(batch
            .iter()
            .map(|m| {
                let command = CommandSpec::new("brew")
                    .arg("bundle")
                    .arg("--file")
                    .arg(m.absolute.display().to_string())
                    .current_dir(&ctx.pack.path);
                let sentinel = m
                    .absolute
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                PlannedFile {
                    path: m.path.clone(),
                    ops: vec![Operation::RunAndRecord {
                        command,
                        sentinel,
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
