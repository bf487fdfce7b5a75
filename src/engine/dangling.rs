//! Dangling-link detection: classify every three-layer chain and
//! optionally repair the broken ones.
//!
//! Classification walks the chain from the user link inward. A link
//! that is not ours is skipped, never touched. Repair re-verifies
//! ownership immediately before unlinking so a link swapped underneath
//! us between scan and removal is abandoned silently.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::fsys::{EntryKind, Fs};
use crate::handlers::symlink::ChainEntry;
use crate::paths::paths_equal;

/// Health of one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainHealth {
    /// The user link does not exist; nothing was deployed.
    NotDeployed,
    /// Something occupies the user path but it is not our link.
    NotOurs,
    /// Ours, but broken; carries the problem description.
    Dangling(&'static str),
    /// All three layers verify.
    Healthy,
}

/// A broken chain finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingLink {
    pub pack: String,
    /// The user-facing link.
    pub deployed_path: std::path::PathBuf,
    pub intermediate: std::path::PathBuf,
    pub source: std::path::PathBuf,
    /// Literal problem description.
    pub problem: String,
}

/// Classify one expected chain.
pub fn classify(fs: &Arc<dyn Fs>, entry: &ChainEntry) -> ChainHealth {
    if !fs.exists_no_follow(&entry.user_path) {
        return ChainHealth::NotDeployed;
    }
    if fs.symlink_metadata(&entry.user_path).ok() != Some(EntryKind::Symlink) {
        return ChainHealth::NotOurs;
    }
    let Ok(target) = fs.read_link(&entry.user_path) else {
        return ChainHealth::NotOurs;
    };
    if !paths_equal(&target, &entry.intermediate) {
        return ChainHealth::NotOurs;
    }
    if !fs.exists_no_follow(&entry.intermediate) {
        return ChainHealth::Dangling("intermediate symlink missing");
    }
    if fs.symlink_metadata(&entry.intermediate).ok() != Some(EntryKind::Symlink) {
        return ChainHealth::Dangling("intermediate is not a symlink");
    }
    let Ok(intermediate_target) = fs.read_link(&entry.intermediate) else {
        return ChainHealth::Dangling("cannot read intermediate symlink");
    };
    if !paths_equal(&intermediate_target, &entry.source) {
        return ChainHealth::Dangling("intermediate points to wrong file");
    }
    if !fs.exists(&entry.source) {
        return ChainHealth::Dangling("source file missing");
    }
    ChainHealth::Healthy
}

/// Findings for a set of expected chains.
#[must_use]
pub fn scan(fs: &Arc<dyn Fs>, entries: &[ChainEntry]) -> Vec<DanglingLink> {
    entries
        .iter()
        .filter_map(|entry| match classify(fs, entry) {
            ChainHealth::Dangling(problem) => Some(DanglingLink {
                pack: entry.pack.clone(),
                deployed_path: entry.user_path.clone(),
                intermediate: entry.intermediate.clone(),
                source: entry.source.clone(),
                problem: problem.to_string(),
            }),
            _ => None,
        })
        .collect()
}

/// Remove a dangling user link and its orphaned intermediate.
///
/// Ownership is re-verified against the expected intermediate right
/// before unlinking; on mismatch nothing is removed and `false` is
/// returned.
///
/// # Errors
///
/// Propagates unexpected I/O failures from the removals themselves.
pub fn repair(fs: &Arc<dyn Fs>, link: &DanglingLink) -> Result<bool> {
    let still_ours = fs.symlink_metadata(&link.deployed_path).ok() == Some(EntryKind::Symlink)
        && fs
            .read_link(&link.deployed_path)
            .is_ok_and(|t| paths_equal(&t, &link.intermediate));
    if !still_ours {
        warn!(path = %link.deployed_path.display(), "link changed since scan, leaving it");
        return Ok(false);
    }
    fs.remove(&link.deployed_path)
        .map_err(|e| EngineError::io(&link.deployed_path, e))?;
    if fs.exists_no_follow(&link.intermediate)
        && fs.symlink_metadata(&link.intermediate).ok() == Some(EntryKind::Symlink)
    {
        fs.remove(&link.intermediate)
            .map_err(|e| EngineError::io(&link.intermediate, e))?;
    }
    debug!(path = %link.deployed_path.display(), problem = %link.problem, "repaired dangling link");
    Ok(true)
}

/// Convenience for tests and status rendering.
#[must_use]
pub fn entry(pack: &str, user: &Path, intermediate: &Path, source: &Path) -> ChainEntry {
    ChainEntry {
        user_path: user.to_path_buf(),
        intermediate: intermediate.to_path_buf(),
        source: source.to_path_buf(),
        pack: pack.to_string(),
    }
}
