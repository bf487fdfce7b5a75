//! Rules map pack files to handlers.
//!
//! A rule is a (trigger pattern, handler, options, priority) tuple.
//! Built-in rules derive from the resolved configuration's mapping keys;
//! per-pack overrides always outrank them. Matching is first-match-wins
//! in priority order, with ties broken by the longer literal prefix and
//! then by insertion order.

use std::path::{Path, PathBuf};

use crate::config::{Config, HandlerOptions};
use crate::error::{EngineError, Result};

/// Priority assigned to every configured override.
pub const OVERRIDE_PRIORITY: i32 = 100;

/// One trigger-to-handler rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Name reported in match output (e.g. `install-script`, `override`).
    pub name: String,
    /// Glob matched against the pack-relative path.
    pub pattern: String,
    /// Handler that receives matched files.
    pub handler: String,
    /// Options forwarded to the handler.
    pub options: HandlerOptions,
    /// Higher wins; overrides sit strictly above every built-in.
    pub priority: i32,
}

impl Rule {
    fn new(name: &str, pattern: impl Into<String>, handler: &str, priority: i32) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.into(),
            handler: handler.to_string(),
            options: HandlerOptions::new(),
            priority,
        }
    }

    /// Length of the pattern's leading literal run (up to the first glob
    /// metacharacter). Longer runs are more specific and win ties.
    #[must_use]
    pub fn literal_prefix_len(&self) -> usize {
        self.pattern
            .find(['*', '?', '['])
            .unwrap_or(self.pattern.len())
    }

    /// Whether the rule's pattern matches a pack-relative path.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invalid`] when the pattern is not a valid
    /// glob. [`Config::validate`] catches this earlier for configured
    /// rules.
    pub fn matches(&self, relative: &Path) -> Result<bool> {
        let pattern = glob::Pattern::new(&self.pattern)
            .map_err(|e| EngineError::Invalid(format!("rule pattern '{}': {e}", self.pattern)))?;
        Ok(pattern.matches_path(relative))
    }
}

/// The built-in rule set for a resolved configuration, ordered by
/// descending priority. The catch-all symlink rule sits at the bottom so
/// any file not claimed by a more specific mapping becomes a symlink.
#[must_use]
pub fn builtin_rules(config: &Config) -> Vec<Rule> {
    let m = &config.mappings;
    let mut rules = Vec::new();
    for filename in &m.install {
        rules.push(Rule::new("install-script", filename.clone(), "install", 30));
    }
    for filename in &m.homebrew {
        rules.push(Rule::new(
            "package-manifest",
            filename.clone(),
            "homebrew",
            30,
        ));
    }
    for filename in &m.shell {
        rules.push(Rule::new(
            "shell-profile",
            filename.clone(),
            "shell_profile",
            20,
        ));
    }
    rules.push(Rule::new("path-dir", m.path.clone(), "path", 10));
    rules.push(Rule::new("catch-all", "**", "symlink", 0));
    rules
}

/// Override rules from the resolved configuration, in insertion order.
#[must_use]
pub fn override_rules(config: &Config) -> Vec<Rule> {
    config
        .overrides
        .iter()
        .map(|o| Rule {
            name: "override".to_string(),
            pattern: o.path.clone(),
            handler: o.handler.clone(),
            options: o.options.clone(),
            priority: OVERRIDE_PRIORITY,
        })
        .collect()
}

/// A rule's realization against one concrete file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    /// Name of the rule that claimed the file.
    pub rule_name: String,
    /// Owning pack.
    pub pack: String,
    /// Path relative to the pack directory.
    pub path: PathBuf,
    /// Absolute path of the matched file.
    pub absolute: PathBuf,
    /// Receiving handler.
    pub handler: String,
    /// Options carried from the rule.
    pub options: HandlerOptions,
    /// Priority of the winning rule.
    pub priority: i32,
}

/// Pick the winning rule for one file, if any.
///
/// Rules are assumed pre-sorted by priority descending; within equal
/// priority the longer literal prefix wins, and a full tie keeps the
/// earlier rule.
///
/// # Errors
///
/// Propagates invalid glob patterns.
pub fn resolve<'a>(rules: &'a [Rule], relative: &Path) -> Result<Option<&'a Rule>> {
    let mut best: Option<&Rule> = None;
    for rule in rules {
        if let Some(current) = best {
            if rule.priority < current.priority {
                break;
            }
        }
        if !rule.matches(relative)? {
            continue;
        }
        let beats = match best {
            None => true,
            Some(current) => {
                rule.priority == current.priority
                    && rule.literal_prefix_len() > current.literal_prefix_len()
            }
        };
        if beats {
            best = Some(rule);
        }
    }
    Ok(best)
}
