//! Pack discovery: enumerate the dotfiles root, resolve each pack's
//! effective configuration, and honor ignore markers.
//!
//! A pack is one subdirectory of the dotfiles root. A pack containing
//! `.dodotignore` is still discovered (so it can be reported) but is
//! flagged ignored and produces no matches.

pub mod matching;
pub mod rules;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::fsys::Fs;
use crate::paths::Paths;

pub use matching::match_pack;
pub use rules::{Rule, RuleMatch};

/// Marker file that excludes a pack from deployment.
pub const IGNORE_MARKER: &str = ".dodotignore";

/// One discovered pack.
#[derive(Debug, Clone)]
pub struct Pack {
    /// Basename of the pack directory.
    pub name: String,
    /// Absolute directory path.
    pub path: PathBuf,
    /// Effective configuration (root merged with the pack's deltas).
    pub config: Config,
    /// Whether the ignore marker is present.
    pub ignored: bool,
}

/// Outcome of pack discovery.
///
/// Missing names are collected rather than failing the whole run, so
/// the engine can report `NotFound` per pack and continue with the rest.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Discovered packs, ordered by name (or by the caller's list).
    pub packs: Vec<Pack>,
    /// Requested pack names with no corresponding directory.
    pub missing: Vec<String>,
}

/// Enumerate packs under the dotfiles root.
///
/// With an empty `names` list every non-hidden subdirectory is a pack,
/// in lexicographic order. With a non-empty list only the named packs
/// are considered, in the caller's order; names that do not resolve to
/// a directory land in [`Discovery::missing`].
///
/// # Errors
///
/// Propagates unexpected I/O failures reading the dotfiles root.
pub fn discover(
    fs: &Arc<dyn Fs>,
    paths: &Paths,
    root_config: &Config,
    pack_configs: &BTreeMap<String, Config>,
    names: &[String],
) -> Result<Discovery> {
    let mut discovery = Discovery::default();
    let candidates: Vec<String> = if names.is_empty() {
        all_pack_names(fs, paths)?
    } else {
        names.to_vec()
    };

    for name in candidates {
        let path = paths.pack_dir(&name);
        if !fs.is_dir(&path) {
            if names.is_empty() {
                continue;
            }
            debug!(pack = %name, "named pack does not exist");
            discovery.missing.push(name);
            continue;
        }
        let config = match pack_configs.get(&name) {
            Some(delta) => root_config.merged_with(delta),
            None => root_config.clone(),
        };
        let ignored = fs.exists(&path.join(IGNORE_MARKER));
        discovery.packs.push(Pack {
            name,
            path,
            config,
            ignored,
        });
    }
    debug!(
        packs = discovery.packs.len(),
        missing = discovery.missing.len(),
        "pack discovery complete"
    );
    Ok(discovery)
}

fn all_pack_names(fs: &Arc<dyn Fs>, paths: &Paths) -> Result<Vec<String>> {
    let root = paths.dotfiles_root();
    let entries = match fs.read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(crate::error::EngineError::io(root, e)),
    };
    let mut names: Vec<String> = entries
        .iter()
        .filter(|p| fs.is_dir(p))
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
        .filter(|n| !n.starts_with('.'))
        .map(str::to_string)
        .collect();
    names.sort();
    Ok(names)
}
