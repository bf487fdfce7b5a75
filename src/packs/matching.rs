//! The pack walk: visit every file, apply ignore globs, and resolve the
//! winning rule per file.
//!
//! The `mappings.path` directory is matched as a whole (one PATH entry
//! per pack) and not descended into; every other directory is walked
//! recursively. Output is ordered priority-descending then
//! path-ascending, which is the order handlers process their batches in.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{EngineError, Result};
use crate::fsys::Fs;

use super::Pack;
use super::rules::{self, Rule, RuleMatch};

/// Walk one pack and produce its ordered matches.
///
/// An ignored pack produces no matches. The ignore marker and dot-files
/// at the pack root are never matched.
///
/// # Errors
///
/// Propagates I/O failures from the walk and invalid glob patterns.
pub fn match_pack(fs: &Arc<dyn Fs>, pack: &Pack) -> Result<Vec<RuleMatch>> {
    if pack.ignored {
        return Ok(Vec::new());
    }
    let mut rule_set = rules::override_rules(&pack.config);
    rule_set.extend(rules::builtin_rules(&pack.config));
    rule_set.sort_by(|a, b| b.priority.cmp(&a.priority));

    let ignore = compile_ignore(&pack.config.ignore)?;
    let mut matches = Vec::new();
    walk(fs, pack, &rule_set, &ignore, &pack.path, &mut matches)?;

    matches.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.path.cmp(&b.path))
    });
    debug!(pack = %pack.name, count = matches.len(), "pack matched");
    Ok(matches)
}

fn compile_ignore(patterns: &[String]) -> Result<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| EngineError::Invalid(format!("ignore pattern '{p}': {e}")))
        })
        .collect()
}

fn is_ignored(ignore: &[glob::Pattern], relative: &Path) -> bool {
    ignore.iter().any(|p| p.matches_path(relative))
}

fn walk(
    fs: &Arc<dyn Fs>,
    pack: &Pack,
    rule_set: &[Rule],
    ignore: &[glob::Pattern],
    dir: &Path,
    matches: &mut Vec<RuleMatch>,
) -> Result<()> {
    let entries = fs.read_dir(dir).map_err(|e| EngineError::io(dir, e))?;
    for entry in entries {
        let Ok(relative) = entry.strip_prefix(&pack.path).map(Path::to_path_buf) else {
            continue;
        };
        if at_root_and_hidden(&relative) {
            continue;
        }
        if is_ignored(ignore, &relative) {
            trace!(pack = %pack.name, path = %relative.display(), "ignored");
            continue;
        }
        if fs.is_dir(&entry) {
            if relative == Path::new(&pack.config.mappings.path) {
                // The PATH directory deploys as one unit.
                push_match(pack, rule_set, &relative, &entry, matches)?;
            } else {
                walk(fs, pack, rule_set, ignore, &entry, matches)?;
            }
        } else {
            push_match(pack, rule_set, &relative, &entry, matches)?;
        }
    }
    Ok(())
}

fn at_root_and_hidden(relative: &Path) -> bool {
    relative.components().count() == 1
        && relative
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'))
}

fn push_match(
    pack: &Pack,
    rule_set: &[Rule],
    relative: &Path,
    absolute: &Path,
    matches: &mut Vec<RuleMatch>,
) -> Result<()> {
    let Some(rule) = rules::resolve(rule_set, relative)? else {
        return Ok(());
    };
    matches.push(RuleMatch {
        rule_name: rule.name.clone(),
        pack: pack.name.clone(),
        path: relative.to_path_buf(),
        absolute: absolute.to_path_buf(),
        handler: rule.handler.clone(),
        options: rule.options.clone(),
        priority: rule.priority,
    });
    Ok(())
}

/// Group a pack's matches into per-handler batches, preserving the
/// walk's priority-then-path order inside each batch.
#[must_use]
pub fn group_by_handler(matches: &[RuleMatch]) -> Vec<(String, Vec<RuleMatch>)> {
    let mut groups: Vec<(String, Vec<RuleMatch>)> = Vec::new();
    for m in matches {
        match groups.iter_mut().find(|(h, _)| *h == m.handler) {
            Some((_, batch)) => batch.push(m.clone()),
            None => groups.push((m.handler.clone(), vec![m.clone()])),
        }
    }
    groups
}
