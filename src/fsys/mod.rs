//! Filesystem operation abstractions for dependency injection.
//!
//! Provides the [`Fs`] trait so the datastore, matcher and engine can be
//! unit-tested without touching the real filesystem. Production code uses
//! [`OsFs`]; tests use [`MemoryFs`](memory::MemoryFs), which reproduces
//! symlink semantics in memory.
//!
//! Every method returns [`std::io::Result`] so the distinguished
//! does-not-exist condition stays observable as
//! [`std::io::ErrorKind::NotFound`]; all other errors pass through
//! verbatim.

pub mod memory;

use std::io;
use std::path::{Path, PathBuf};

/// Kind of filesystem entry, as reported without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
    /// A symbolic link (target may or may not exist).
    Symlink,
}

/// Abstraction over the filesystem operations the engine needs.
///
/// Implementations must not follow symlinks in [`Fs::symlink_metadata`],
/// [`Fs::read_link`] and [`Fs::remove`], and must follow them in
/// [`Fs::metadata`] and [`Fs::read`], matching `std::fs`.
pub trait Fs: Send + Sync + std::fmt::Debug {
    /// Entry kind at `path`, following symlinks.
    fn metadata(&self, path: &Path) -> io::Result<EntryKind>;

    /// Entry kind at `path`, not following symlinks.
    fn symlink_metadata(&self, path: &Path) -> io::Result<EntryKind>;

    /// Read the full contents of the file at `path`.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write `contents` to `path`, creating or truncating the file.
    ///
    /// When `mode` is `Some`, the unix permission bits are applied after
    /// the write (ignored on non-unix platforms).
    fn write(&self, path: &Path, contents: &[u8], mode: Option<u32>) -> io::Result<()>;

    /// Create `path` and all missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// The immediate child paths inside `path`, in unspecified order.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Create a symlink at `link` pointing to `target`.
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    /// Read the target of the symlink at `path` (one level, no cleanup).
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Remove the file, symlink, or empty directory at `path`.
    ///
    /// The entry itself is removed; a symlink's target is never touched.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Remove the entire subtree rooted at `path`.
    ///
    /// Missing `path` is an error; callers that want remove-if-present
    /// semantics check [`Fs::exists_no_follow`] first.
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    /// Whether anything exists at `path`, following symlinks.
    fn exists(&self, path: &Path) -> bool {
        self.metadata(path).is_ok()
    }

    /// Whether an entry exists at `path` itself, not following symlinks.
    ///
    /// Returns `true` for a broken symlink, unlike [`Fs::exists`].
    fn exists_no_follow(&self, path: &Path) -> bool {
        self.symlink_metadata(path).is_ok()
    }

    /// Whether `path` is a directory, following symlinks.
    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.metadata(path), Ok(EntryKind::Dir))
    }
}

/// Production [`Fs`] implementation that delegates to [`std::fs`].
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFs;

fn kind_of(meta: &std::fs::Metadata) -> EntryKind {
    if meta.is_symlink() {
        EntryKind::Symlink
    } else if meta.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    }
}

impl Fs for OsFs {
    fn metadata(&self, path: &Path) -> io::Result<EntryKind> {
        std::fs::metadata(path).map(|m| kind_of(&m))
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<EntryKind> {
        std::fs::symlink_metadata(path).map(|m| kind_of(&m))
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8], mode: Option<u32>) -> io::Result<()> {
        std::fs::write(path, contents)?;
        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt as _;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        std::fs::read_dir(path)?
            .map(|e| e.map(|entry| entry.path()))
            .collect()
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target, link)
        }
        #[cfg(windows)]
        {
            if target.is_dir() {
                std::os::windows::fs::symlink_dir(target, link)
            } else {
                std::os::windows::fs::symlink_file(target, link)
            }
        }
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = std::fs::symlink_metadata(path)?;
        if meta.is_dir() {
            std::fs::remove_dir(path)
        } else {
            std::fs::remove_file(path)
        }
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let meta = std::fs::symlink_metadata(path)?;
        if meta.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
    }
}
