//! Derivation of every on-disk location the engine touches.
//!
//! All interior paths are derived from four roots: the dotfiles root
//! (the pack tree), the data root (the datastore), the user's home, and
//! the user config root. The derivations are deterministic and stable;
//! the datastore layout is:
//!
//! ```text
//! $DATA/packs/<pack>/<handler>/...               handler state root
//! $DATA/deployed/symlink/<basename-of-target>    intermediate symlink
//! $DATA/deployed/path/<pack>_<dir-basename>      intermediate for PATH entry
//! $DATA/deployed/shell_profile/<pack>_<stem>.sh  intermediate for shell init
//! $DATA/provision/<pack>_<script>.sentinel       install-script sentinel
//! $DATA/homebrew/<pack>_Brewfile.sentinel        package-manifest sentinel
//! $DATA/shell/dodot-init.sh                      generated shell init
//! ```

use std::path::{Component, Path, PathBuf};

use crate::config::Config;

/// The four roots plus the XDG cache and state locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    dotfiles_root: PathBuf,
    data_root: PathBuf,
    home: PathBuf,
    config_root: PathBuf,
    cache_root: PathBuf,
    state_root: PathBuf,
}

impl Paths {
    /// Build a `Paths` from explicit roots.
    ///
    /// The cache and state roots default to XDG-style locations under
    /// `home`; use [`Paths::with_cache_root`] / [`Paths::with_state_root`]
    /// to override them.
    #[must_use]
    pub fn new(
        dotfiles_root: impl Into<PathBuf>,
        data_root: impl Into<PathBuf>,
        home: impl Into<PathBuf>,
        config_root: impl Into<PathBuf>,
    ) -> Self {
        let home = home.into();
        let cache_root = home.join(".cache").join("dodot");
        let state_root = home.join(".local").join("state").join("dodot");
        Self {
            dotfiles_root: dotfiles_root.into(),
            data_root: data_root.into(),
            home,
            config_root: config_root.into(),
            cache_root,
            state_root,
        }
    }

    /// Resolve the roots from the environment.
    ///
    /// Reads `DOTFILES_ROOT` (required), `HOME` (required),
    /// `DODOT_DATA_DIR` (default `$XDG_DATA_HOME/dodot`, falling back to
    /// `$HOME/.local/share/dodot`) and `XDG_CONFIG_HOME` (default
    /// `$HOME/.config`).
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let dotfiles_root = std::env::var_os("DOTFILES_ROOT")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow::anyhow!("DOTFILES_ROOT is not set"))?;
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
        let data_root = std::env::var_os("DODOT_DATA_DIR").map_or_else(
            || {
                std::env::var_os("XDG_DATA_HOME").map_or_else(
                    || home.join(".local").join("share").join("dodot"),
                    |xdg| PathBuf::from(xdg).join("dodot"),
                )
            },
            PathBuf::from,
        );
        let config_root = std::env::var_os("XDG_CONFIG_HOME")
            .map_or_else(|| home.join(".config"), PathBuf::from);
        Ok(Self::new(dotfiles_root, data_root, home, config_root))
    }

    /// Override the cache root.
    #[must_use]
    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    /// Override the state root.
    #[must_use]
    pub fn with_state_root(mut self, state_root: impl Into<PathBuf>) -> Self {
        self.state_root = state_root.into();
        self
    }

    /// Root of the pack tree.
    #[must_use]
    pub fn dotfiles_root(&self) -> &Path {
        &self.dotfiles_root
    }

    /// Root of the datastore.
    #[must_use]
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// The user's home directory.
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// The user config root (XDG config home).
    #[must_use]
    pub fn config_root(&self) -> &Path {
        &self.config_root
    }

    /// The cache root.
    #[must_use]
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// The state root.
    #[must_use]
    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    /// Directory of the named pack.
    #[must_use]
    pub fn pack_dir(&self, pack: &str) -> PathBuf {
        self.dotfiles_root.join(pack)
    }

    /// Per-(pack, handler) state root under the datastore.
    #[must_use]
    pub fn pack_handler_dir(&self, pack: &str, handler: &str) -> PathBuf {
        self.data_root.join("packs").join(pack).join(handler)
    }

    /// Directory holding intermediate symlinks for the symlink handler.
    #[must_use]
    pub fn deployed_symlink_dir(&self) -> PathBuf {
        self.data_root.join("deployed").join("symlink")
    }

    /// Intermediate symlink for a user link whose file name is
    /// `target_name` (e.g. `.vimrc`).
    #[must_use]
    pub fn deployed_symlink(&self, target_name: &str) -> PathBuf {
        self.deployed_symlink_dir().join(target_name)
    }

    /// Directory holding intermediate symlinks for PATH entries.
    #[must_use]
    pub fn deployed_path_dir(&self) -> PathBuf {
        self.data_root.join("deployed").join("path")
    }

    /// Intermediate symlink for a pack's PATH directory.
    #[must_use]
    pub fn deployed_path(&self, pack: &str, dir_name: &str) -> PathBuf {
        self.deployed_path_dir().join(format!("{pack}_{dir_name}"))
    }

    /// Directory holding intermediate symlinks for shell profiles.
    #[must_use]
    pub fn deployed_shell_profile_dir(&self) -> PathBuf {
        self.data_root.join("deployed").join("shell_profile")
    }

    /// Intermediate symlink for a pack's shell profile fragment.
    #[must_use]
    pub fn deployed_shell_profile(&self, pack: &str, stem: &str) -> PathBuf {
        self.deployed_shell_profile_dir()
            .join(format!("{pack}_{stem}.sh"))
    }

    /// Sentinel directory for the named provisioning handler.
    #[must_use]
    pub fn sentinel_dir(&self, handler: &str) -> PathBuf {
        if handler == "homebrew" {
            self.data_root.join("homebrew")
        } else {
            self.data_root.join("provision")
        }
    }

    /// Sentinel file recording one completed provisioning invocation.
    #[must_use]
    pub fn sentinel_file(&self, handler: &str, pack: &str, name: &str) -> PathBuf {
        self.sentinel_dir(handler)
            .join(format!("{pack}_{name}.sentinel"))
    }

    /// The generated shell init file consumed by interactive shells.
    #[must_use]
    pub fn shell_init_file(&self) -> PathBuf {
        self.data_root.join("shell").join("dodot-init.sh")
    }

    /// Map a pack-relative file to its deployment target on the system.
    ///
    /// - A root-level file (`vimrc`) becomes a dotfile in the home
    ///   directory: `$HOME/.vimrc`.
    /// - A file whose first segment is in the force-home set
    ///   (`ssh/config`) is rooted at home with a leading dot:
    ///   `$HOME/.ssh/config`.
    /// - Everything else lands under the config root unchanged:
    ///   `nvim/init.lua` → `<config_root>/nvim/init.lua`.
    #[must_use]
    pub fn map_pack_file_to_system(&self, config: &Config, relative: &Path) -> PathBuf {
        let mut segments = relative.iter();
        let Some(first) = segments.next().and_then(|s| s.to_str()) else {
            return self.home.clone();
        };
        let is_root_level = segments.next().is_none();
        if is_root_level || config.force_home.contains(first) {
            self.home.join(format!(".{}", relative.display()))
        } else {
            self.config_root.join(relative)
        }
    }

    /// Split an absolute source path into `(pack, pack-relative path)`
    /// if it lies inside the dotfiles root.
    #[must_use]
    pub fn split_pack_source(&self, source: &Path) -> Option<(String, PathBuf)> {
        let rel = source.strip_prefix(&self.dotfiles_root).ok()?;
        let mut parts = rel.iter();
        let pack = parts.next()?.to_str()?.to_string();
        let rest: PathBuf = parts.collect();
        if rest.as_os_str().is_empty() {
            return None;
        }
        Some((pack, rest))
    }
}

/// Lexical path cleanup: drop `.` segments, resolve `..` one level up,
/// and strip the Windows `\\?\` prefix so link targets compare equal
/// regardless of how they were produced.
#[must_use]
pub fn clean_path(path: &Path) -> PathBuf {
    #[cfg(windows)]
    let path = {
        let s = path.to_string_lossy();
        s.strip_prefix(r"\\?\")
            .map_or_else(|| path.to_path_buf(), PathBuf::from)
    };
    #[cfg(windows)]
    let path = &path;

    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Compare two paths after lexical cleanup.
#[must_use]
pub fn paths_equal(a: &Path, b: &Path) -> bool {
    clean_path(a) == clean_path(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> Paths {
        Paths::new("/dotfiles", "/data", "/home/user", "/home/user/.config")
    }

    #[test]
    fn pack_handler_dir_layout() {
        assert_eq!(
            paths().pack_handler_dir("vim", "symlink"),
            PathBuf::from("/data/packs/vim/symlink")
        );
    }

    #[test]
    fn deployed_symlink_layout() {
        assert_eq!(
            paths().deployed_symlink(".vimrc"),
            PathBuf::from("/data/deployed/symlink/.vimrc")
        );
    }

    #[test]
    fn deployed_path_layout() {
        assert_eq!(
            paths().deployed_path("tools", "bin"),
            PathBuf::from("/data/deployed/path/tools_bin")
        );
    }

    #[test]
    fn deployed_shell_profile_layout() {
        assert_eq!(
            paths().deployed_shell_profile("zsh", "aliases"),
            PathBuf::from("/data/deployed/shell_profile/zsh_aliases.sh")
        );
    }

    #[test]
    fn install_sentinel_layout() {
        assert_eq!(
            paths().sentinel_file("install", "tools", "install.sh"),
            PathBuf::from("/data/provision/tools_install.sh.sentinel")
        );
    }

    #[test]
    fn homebrew_sentinel_layout() {
        assert_eq!(
            paths().sentinel_file("homebrew", "tools", "Brewfile"),
            PathBuf::from("/data/homebrew/tools_Brewfile.sentinel")
        );
    }

    #[test]
    fn shell_init_layout() {
        assert_eq!(
            paths().shell_init_file(),
            PathBuf::from("/data/shell/dodot-init.sh")
        );
    }

    #[test]
    fn map_root_level_file_to_home_dotfile() {
        let config = Config::default();
        assert_eq!(
            paths().map_pack_file_to_system(&config, Path::new("vimrc")),
            PathBuf::from("/home/user/.vimrc")
        );
    }

    #[test]
    fn map_force_home_first_segment() {
        let config = Config::default();
        assert_eq!(
            paths().map_pack_file_to_system(&config, Path::new("ssh/config")),
            PathBuf::from("/home/user/.ssh/config")
        );
    }

    #[test]
    fn map_nested_file_to_config_root() {
        let config = Config::default();
        assert_eq!(
            paths().map_pack_file_to_system(&config, Path::new("nvim/init.lua")),
            PathBuf::from("/home/user/.config/nvim/init.lua")
        );
    }

    #[test]
    fn map_respects_configured_force_home_additions() {
        let mut config = Config::default();
        config.force_home.insert("tmux".to_string());
        assert_eq!(
            paths().map_pack_file_to_system(&config, Path::new("tmux/tmux.conf")),
            PathBuf::from("/home/user/.tmux/tmux.conf")
        );
    }

    #[test]
    fn split_pack_source_roundtrip() {
        let p = paths();
        let (pack, rel) = p
            .split_pack_source(Path::new("/dotfiles/vim/colors/dark.vim"))
            .expect("should split");
        assert_eq!(pack, "vim");
        assert_eq!(rel, PathBuf::from("colors/dark.vim"));
    }

    #[test]
    fn split_pack_source_outside_root_is_none() {
        assert!(paths().split_pack_source(Path::new("/etc/passwd")).is_none());
    }

    #[test]
    fn split_pack_source_bare_pack_dir_is_none() {
        assert!(paths().split_pack_source(Path::new("/dotfiles/vim")).is_none());
    }

    #[test]
    fn clean_path_resolves_dot_segments() {
        assert_eq!(
            clean_path(Path::new("/data/deployed/../deployed/symlink/./.vimrc")),
            PathBuf::from("/data/deployed/symlink/.vimrc")
        );
    }

    #[test]
    fn paths_equal_after_cleanup() {
        assert!(paths_equal(
            Path::new("/a/b/../b/c"),
            Path::new("/a/b/c")
        ));
        assert!(!paths_equal(Path::new("/a/b"), Path::new("/a/c")));
    }

    #[test]
    fn from_env_requires_dotfiles_root() {
        // Only asserts the error path when the variable is absent; the
        // success path is covered by explicit-root construction above.
        if std::env::var_os("DOTFILES_ROOT").is_none() {
            assert!(Paths::from_env().is_err());
        }
    }
}
