//! Resolved configuration consumed by the engine.
//!
//! The engine never parses configuration files itself; a collaborator
//! loads and merges root and per-pack configuration and hands the engine
//! the value objects defined here. All types are serde-deserializable so
//! that a loader can populate them directly, and [`Config::default`]
//! carries the built-in rule set so collaborators only supply deltas.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Free-form options forwarded to a handler alongside its matches.
pub type HandlerOptions = BTreeMap<String, String>;

/// Filename-to-handler mapping keys (`mappings.*` in the configuration).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mappings {
    /// Pack-relative directory prefix whose contents join `PATH`.
    pub path: String,
    /// Filenames dispatched to the install-script handler.
    pub install: Vec<String>,
    /// Filenames dispatched to the shell-profile handler.
    pub shell: Vec<String>,
    /// Filenames dispatched to the package-manifest handler.
    pub homebrew: Vec<String>,
}

impl Default for Mappings {
    fn default() -> Self {
        Self {
            path: "bin".to_string(),
            install: vec!["install.sh".to_string()],
            shell: vec!["profile.sh".to_string(), "aliases.sh".to_string()],
            homebrew: vec!["Brewfile".to_string()],
        }
    }
}

/// A per-file handler override supplied by pack configuration.
///
/// Overrides always outrank built-in rules; among themselves they are
/// ordered by pattern specificity, then by their position in the list
/// (first written wins on an exact tie).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRule {
    /// Glob matched against the pack-relative path.
    pub path: String,
    /// Name of the handler that receives the match.
    pub handler: String,
    /// Options forwarded to the handler.
    #[serde(default, rename = "with")]
    pub options: HandlerOptions,
}

/// Resolved effective configuration (root and pack merged).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Glob patterns skipped during the pack walk.
    pub ignore: Vec<String>,
    /// First path segments routed to `$HOME` instead of the config root.
    pub force_home: BTreeSet<String>,
    /// Absolute paths at which the engine never creates or replaces a
    /// user link.
    pub protected_paths: BTreeSet<PathBuf>,
    /// Filename-to-handler mappings.
    pub mappings: Mappings,
    /// Per-file handler overrides.
    #[serde(rename = "override")]
    pub overrides: Vec<OverrideRule>,
}

/// First path segments that deploy to `$HOME` regardless of configuration.
const BUILTIN_FORCE_HOME: &[&str] = &[
    "ssh", "gnupg", "aws", "kube", "docker", "gitconfig", "bashrc", "zshrc", "profile",
];

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore: Vec::new(),
            force_home: BUILTIN_FORCE_HOME
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            protected_paths: BTreeSet::new(),
            mappings: Mappings::default(),
            overrides: Vec::new(),
        }
    }
}

impl Config {
    /// Merge per-pack deltas onto this configuration.
    ///
    /// Lists are appended (pack entries after root entries, preserving
    /// override insertion order); sets are unioned; a non-default pack
    /// `mappings` replaces the root one wholesale.
    #[must_use]
    pub fn merged_with(&self, pack: &Self) -> Self {
        let mut out = self.clone();
        out.ignore.extend(pack.ignore.iter().cloned());
        out.force_home.extend(pack.force_home.iter().cloned());
        out.protected_paths
            .extend(pack.protected_paths.iter().cloned());
        if pack.mappings != Mappings::default() {
            out.mappings = pack.mappings.clone();
        }
        out.overrides.extend(pack.overrides.iter().cloned());
        out
    }

    /// Validate every glob in the configuration before any mutation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invalid`] naming the offending pattern.
    pub fn validate(&self) -> Result<()> {
        for pattern in &self.ignore {
            glob::Pattern::new(pattern).map_err(|e| {
                EngineError::Invalid(format!("ignore pattern '{pattern}': {e}"))
            })?;
        }
        for rule in &self.overrides {
            glob::Pattern::new(&rule.path).map_err(|e| {
                EngineError::Invalid(format!("override pattern '{}': {e}", rule.path))
            })?;
            if rule.handler.is_empty() {
                return Err(EngineError::Invalid(format!(
                    "override for '{}' names no handler",
                    rule.path
                )));
            }
        }
        Ok(())
    }
}
