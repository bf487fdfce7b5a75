// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed environment (dotfiles root,
// data root, fake home) over the real filesystem, with a mock command
// runner and a fixed clock so sentinel contents are deterministic.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dodot_engine::clock::FixedClock;
use dodot_engine::config::Config;
use dodot_engine::datastore::Datastore;
use dodot_engine::engine::Engine;
use dodot_engine::exec::CommandRunner;
use dodot_engine::exec::test_helpers::MockRunner;
use dodot_engine::fsys::{Fs, OsFs};
use dodot_engine::paths::Paths;

/// The fixed instant every test run stamps sentinels with.
pub const TEST_INSTANT: &str = "2026-08-25T10:00:00Z";

/// An isolated engine environment backed by a [`tempfile::TempDir`].
///
/// Layout under the temp dir: `dotfiles/` (pack tree), `data/` (the
/// datastore), `home/` (fake user home). Deleted on drop.
pub struct EngineTestContext {
    root: tempfile::TempDir,
    pub runner: Arc<MockRunner>,
}

impl EngineTestContext {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        for dir in ["dotfiles", "data", "home"] {
            std::fs::create_dir_all(root.path().join(dir)).expect("create fixture dir");
        }
        Self {
            root,
            runner: Arc::new(MockRunner::ok()),
        }
    }

    pub fn dotfiles(&self) -> PathBuf {
        self.root.path().join("dotfiles")
    }

    pub fn data(&self) -> PathBuf {
        self.root.path().join("data")
    }

    pub fn home(&self) -> PathBuf {
        self.root.path().join("home")
    }

    pub fn config_root(&self) -> PathBuf {
        self.home().join(".config")
    }

    /// Write a file into a pack, creating parents as needed.
    pub fn pack_file(&self, pack: &str, relative: &str, contents: &str) -> PathBuf {
        let path = self.dotfiles().join(pack).join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create pack dirs");
        }
        std::fs::write(&path, contents).expect("write pack file");
        path
    }

    /// Create an empty pack directory.
    pub fn pack_dir(&self, pack: &str, relative: &str) -> PathBuf {
        let path = self.dotfiles().join(pack).join(relative);
        std::fs::create_dir_all(&path).expect("create pack dir");
        path
    }

    /// Build an engine with the default configuration.
    pub fn engine(&self) -> Engine {
        self.engine_with(Config::default())
    }

    /// Build an engine with an explicit root configuration.
    pub fn engine_with(&self, config: Config) -> Engine {
        let paths = Paths::new(
            self.dotfiles(),
            self.data(),
            self.home(),
            self.config_root(),
        );
        let datastore = Datastore::new(
            Arc::new(OsFs) as Arc<dyn Fs>,
            paths,
            config,
            Arc::clone(&self.runner) as Arc<dyn CommandRunner>,
            Arc::new(FixedClock::at(TEST_INSTANT)),
        );
        Engine::new(datastore)
    }

    /// Read a symlink's target without following it.
    pub fn read_link(&self, path: &Path) -> PathBuf {
        std::fs::read_link(path).expect("read link")
    }

    /// Whether a path exists without following a final symlink.
    pub fn exists_no_follow(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path).is_ok()
    }

    pub fn read_to_string(&self, path: &Path) -> String {
        std::fs::read_to_string(path).expect("read file")
    }
}

/// Fluent builder for [`EngineTestContext`].
pub struct TestContextBuilder {
    ctx: EngineTestContext,
}

impl TestContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: EngineTestContext::new(),
        }
    }

    /// Seed a pack file before the context is finalised.
    pub fn with_pack_file(self, pack: &str, relative: &str, contents: &str) -> Self {
        self.ctx.pack_file(pack, relative, contents);
        self
    }

    /// Mark a pack ignored.
    pub fn with_ignored_pack(self, pack: &str) -> Self {
        self.ctx.pack_file(pack, ".dodotignore", "");
        self
    }

    /// Queue mock command responses as `(success, output)` pairs.
    pub fn with_command_responses(mut self, responses: Vec<(bool, String)>) -> Self {
        self.ctx.runner = Arc::new(MockRunner::with_responses(responses));
        self
    }

    pub fn build(self) -> EngineTestContext {
        self.ctx
    }
}
