//! The symlink handler: the default destination for any pack file not
//! claimed by a more specific rule.
//!
//! Every file is delivered through a three-layer chain: the user link
//! points at a datastore intermediate, which points at the pack source.
//! User links never point directly at the source, so a moved dotfiles
//! root only requires relinking the intermediates.

use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;
use crate::fsys::EntryKind;
use crate::packs::RuleMatch;
use crate::paths::paths_equal;

use super::{ClearReport, Handler, HandlerContext, HandlerKind, Operation, PlannedFile};

/// One expected chain: user link, intermediate, source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub user_path: PathBuf,
    pub intermediate: PathBuf,
    pub source: PathBuf,
    pub pack: String,
}

/// Expected chains for a pack: one per current match, plus one per
/// intermediate on disk that points into the pack directory. The
/// second set keeps deleted sources visible to deprovision and to the
/// dangling detector, since reading a symlink works even when its
/// target is gone.
#[must_use]
pub fn chain_entries(ctx: &HandlerContext<'_>, batch: &[RuleMatch]) -> Vec<ChainEntry> {
    let paths = ctx.datastore.paths();
    let fs = ctx.datastore.fs();
    let mut entries: Vec<ChainEntry> = Vec::new();
    let mut push = |entry: ChainEntry| {
        if !entries.iter().any(|e| e.user_path == entry.user_path) {
            entries.push(entry);
        }
    };

    for m in batch {
        if let Ok(intermediate) =
            ctx.datastore
                .intermediate_for(&m.pack, "symlink", &m.absolute)
        {
            push(ChainEntry {
                user_path: paths.map_pack_file_to_system(&ctx.pack.config, &m.path),
                intermediate,
                source: m.absolute.clone(),
                pack: m.pack.clone(),
            });
        }
    }

    let pack_dir = paths.pack_dir(&ctx.pack.name);
    if let Ok(links) = fs.read_dir(&paths.deployed_symlink_dir()) {
        for link in links {
            let Ok(source) = fs.read_link(&link) else {
                continue;
            };
            if !source.starts_with(&pack_dir) {
                continue;
            }
            let Some((_, rel)) = paths.split_pack_source(&source) else {
                continue;
            };
            push(ChainEntry {
                user_path: paths.map_pack_file_to_system(&ctx.pack.config, &rel),
                intermediate: link,
                source,
                pack: ctx.pack.name.clone(),
            });
        }
    }
    entries
}

/// Linking handler for the three-layer symlink chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymlinkHandler;

impl Handler for SymlinkHandler {
    fn name(&self) -> &'static str {
        "symlink"
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Linking
    }

    fn plan(&self, ctx: &HandlerContext<'_>, batch: &[RuleMatch]) -> Result<Vec<PlannedFile>> {
        let paths = ctx.datastore.paths();
        let mut planned = Vec::with_capacity(batch.len());
        for m in batch {
            let intermediate = ctx
                .datastore
                .intermediate_for(&m.pack, self.name(), &m.absolute)?;
            let user_path = paths.map_pack_file_to_system(&ctx.pack.config, &m.path);
            planned.push(PlannedFile {
                path: m.path.clone(),
                ops: vec![
                    Operation::CreateDataLink {
                        source: m.absolute.clone(),
                    },
                    Operation::CreateUserLink {
                        intermediate,
                        user_path,
                    },
                ],
            });
        }
        Ok(planned)
    }

    fn clear(
        &self,
        ctx: &HandlerContext<'_>,
        batch: &[RuleMatch],
        dry_run: bool,
    ) -> Result<ClearReport> {
        let fs = ctx.datastore.fs();
        let mut report = ClearReport::default();

        for entry in chain_entries(ctx, batch) {
            if !fs.exists_no_follow(&entry.user_path) {
                continue;
            }
            let owned = fs.symlink_metadata(&entry.user_path).ok() == Some(EntryKind::Symlink)
                && fs
                    .read_link(&entry.user_path)
                    .is_ok_and(|t| paths_equal(&t, &entry.intermediate));
            if !owned {
                report.kept.push((
                    entry.user_path.clone(),
                    "not a link to the managed intermediate".to_string(),
                ));
                continue;
            }
            if !dry_run {
                fs.remove(&entry.user_path)
                    .map_err(|e| crate::error::EngineError::io(&entry.user_path, e))?;
                if fs.exists_no_follow(&entry.intermediate) {
                    fs.remove(&entry.intermediate)
                        .map_err(|e| crate::error::EngineError::io(&entry.intermediate, e))?;
                }
                debug!(user = %entry.user_path.display(), "removed symlink chain");
            }
            report.removed.push(entry.user_path);
        }

        if !dry_run {
            ctx.datastore.remove_state(&ctx.pack.name, self.name())?;
        }
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::Config;
    use crate::datastore::Datastore;
    use crate::exec::test_helpers::MockRunner;
    use crate::fsys::Fs;
    use crate::fsys::memory::MemoryFs;
    use crate::packs::Pack;
    use crate::paths::Paths;
    use std::path::Path;
    use std::sync::Arc;

    struct Fixture {
        store: Datastore,
        fs: Arc<MemoryFs>,
        pack: Pack,
    }

    fn fixture() -> Fixture {
        let fs = Arc::new(MemoryFs::new());
        for dir in ["/dotfiles/vim", "/home/user", "/data"] {
            fs.create_dir_all(Path::new(dir)).unwrap();
        }
        let paths = Paths::new("/dotfiles", "/data", "/home/user", "/home/user/.config");
        let store = Datastore::new(
            Arc::clone(&fs) as Arc<dyn Fs>,
            paths,
            Config::default(),
            Arc::new(MockRunner::ok()),
            Arc::new(FixedClock::at("2026-08-25T10:00:00Z")),
        );
        let pack = Pack {
            name: "vim".to_string(),
            path: PathBuf::from("/dotfiles/vim"),
            config: Config::default(),
            ignored: false,
        };
        Fixture { store, fs, pack }
    }

    fn vimrc_match() -> RuleMatch {
        RuleMatch {
            rule_name: "catch-all".to_string(),
            pack: "vim".to_string(),
            path: PathBuf::from("vimrc"),
            absolute: PathBuf::from("/dotfiles/vim/vimrc"),
            handler: "symlink".to_string(),
            options: crate::config::HandlerOptions::new(),
            priority: 0,
        }
    }

    fn deploy(f: &Fixture) {
        f.fs.write(Path::new("/dotfiles/vim/vimrc"), b"syntax on", None)
            .unwrap();
        let ctx = HandlerContext {
            datastore: &f.store,
            pack: &f.pack,
        };
        for planned in SymlinkHandler.plan(&ctx, &[vimrc_match()]).unwrap() {
            for op in planned.ops {
                match op {
                    Operation::CreateDataLink { source } => {
                        f.store.create_data_link("vim", "symlink", &source).unwrap();
                    }
                    Operation::CreateUserLink {
                        intermediate,
                        user_path,
                    } => {
                        f.store.create_user_link(&intermediate, &user_path).unwrap();
                    }
                    Operation::RunAndRecord { .. } => unreachable!(),
                }
            }
        }
    }

    #[test]
    fn plan_builds_two_layer_operations() {
        let f = fixture();
        let ctx = HandlerContext {
            datastore: &f.store,
            pack: &f.pack,
        };
        let planned = SymlinkHandler.plan(&ctx, &[vimrc_match()]).unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(
            planned[0].ops,
            vec![
                Operation::CreateDataLink {
                    source: PathBuf::from("/dotfiles/vim/vimrc"),
                },
                Operation::CreateUserLink {
                    intermediate: PathBuf::from("/data/deployed/symlink/.vimrc"),
                    user_path: PathBuf::from("/home/user/.vimrc"),
                },
            ]
        );
    }

    #[test]
    fn clear_removes_owned_chain() {
        let f = fixture();
        deploy(&f);
        let ctx = HandlerContext {
            datastore: &f.store,
            pack: &f.pack,
        };

        let report = SymlinkHandler.clear(&ctx, &[vimrc_match()], false).unwrap();

        assert_eq!(report.removed, vec![PathBuf::from("/home/user/.vimrc")]);
        assert!(report.kept.is_empty());
        assert!(!f.fs.exists_no_follow(Path::new("/home/user/.vimrc")));
        assert!(!f.fs.exists_no_follow(Path::new("/data/deployed/symlink/.vimrc")));
        assert!(!f.store.has_handler_state("vim", "symlink"));
        // Source untouched.
        assert!(f.fs.exists(Path::new("/dotfiles/vim/vimrc")));
    }

    #[test]
    fn clear_preserves_foreign_link() {
        let f = fixture();
        f.fs.write(Path::new("/home/user/my-own-vimrc"), b"mine", None)
            .unwrap();
        f.fs.symlink(
            Path::new("/home/user/my-own-vimrc"),
            Path::new("/home/user/.vimrc"),
        )
        .unwrap();
        f.fs.write(Path::new("/dotfiles/vim/vimrc"), b"x", None)
            .unwrap();
        let ctx = HandlerContext {
            datastore: &f.store,
            pack: &f.pack,
        };

        let report = SymlinkHandler.clear(&ctx, &[vimrc_match()], false).unwrap();

        assert!(report.removed.is_empty());
        assert_eq!(report.kept.len(), 1);
        assert_eq!(
            f.fs.read_link(Path::new("/home/user/.vimrc")).unwrap(),
            PathBuf::from("/home/user/my-own-vimrc")
        );
    }

    #[test]
    fn clear_dry_run_mutates_nothing() {
        let f = fixture();
        deploy(&f);
        let ctx = HandlerContext {
            datastore: &f.store,
            pack: &f.pack,
        };

        let report = SymlinkHandler.clear(&ctx, &[vimrc_match()], true).unwrap();

        assert_eq!(report.removed, vec![PathBuf::from("/home/user/.vimrc")]);
        assert!(f.fs.exists_no_follow(Path::new("/home/user/.vimrc")));
        assert!(f.store.has_handler_state("vim", "symlink"));
    }

    #[test]
    fn chain_entries_cover_deleted_sources() {
        let f = fixture();
        deploy(&f);
        f.fs.remove(Path::new("/dotfiles/vim/vimrc")).unwrap();
        let ctx = HandlerContext {
            datastore: &f.store,
            pack: &f.pack,
        };

        // Empty batch: the source is gone so the walk finds nothing,
        // but the intermediate on disk still names the chain.
        let entries = chain_entries(&ctx, &[]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_path, PathBuf::from("/home/user/.vimrc"));
        assert_eq!(entries[0].source, PathBuf::from("/dotfiles/vim/vimrc"));
    }

    #[test]
    fn chain_entries_dedup_match_and_disk() {
        let f = fixture();
        deploy(&f);
        let ctx = HandlerContext {
            datastore: &f.store,
            pack: &f.pack,
        };
        let entries = chain_entries(&ctx, &[vimrc_match()]);
        assert_eq!(entries.len(), 1);
    }
}
