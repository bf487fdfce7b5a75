//! In-memory [`Fs`] implementation for tests.
//!
//! Reproduces the semantics the engine relies on: lstat vs stat,
//! one-level `read_link`, parent-directory requirements, and subtree
//! removal. Backed by a mutexed path map, so a single instance can be
//! shared across threads in tests.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use super::{EntryKind, Fs};

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, mode: Option<u32> },
    Dir,
    Symlink(PathBuf),
}

/// An in-memory filesystem tree.
///
/// All paths are normalized lexically (`.` removed, `..` resolved
/// against the parent), matching the path cleanup the engine applies
/// when comparing link targets.
#[derive(Debug, Default)]
pub struct MemoryFs {
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
}

/// Lexical path cleanup: drop `.`, resolve `..` one level up.
fn normalize(path: &Path) -> PathBuf {
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

fn not_found() -> io::Error {
    io::Error::from(io::ErrorKind::NotFound)
}

impl MemoryFs {
    /// Create an empty filesystem containing only the root directory.
    #[must_use]
    pub fn new() -> Self {
        let fs = Self::default();
        if let Ok(mut nodes) = fs.nodes.lock() {
            nodes.insert(PathBuf::from("/"), Node::Dir);
        }
        fs
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<PathBuf, Node>> {
        self.nodes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Follow final-component symlinks, up to a hop limit.
    fn resolve(nodes: &BTreeMap<PathBuf, Node>, path: &Path) -> io::Result<PathBuf> {
        let mut current = normalize(path);
        for _ in 0..16 {
            match nodes.get(&current) {
                Some(Node::Symlink(target)) => {
                    current = normalize(target);
                }
                Some(_) => return Ok(current),
                None => return Err(not_found()),
            }
        }
        Err(io::Error::other("too many levels of symbolic links"))
    }

    fn require_parent_dir(nodes: &BTreeMap<PathBuf, Node>, path: &Path) -> io::Result<()> {
        match path.parent() {
            None => Ok(()),
            Some(parent) => match nodes.get(&normalize(parent)) {
                Some(Node::Dir) => Ok(()),
                Some(_) => Err(io::Error::from(io::ErrorKind::NotADirectory)),
                None => Err(not_found()),
            },
        }
    }

    fn kind(node: &Node) -> EntryKind {
        match node {
            Node::File { .. } => EntryKind::File,
            Node::Dir => EntryKind::Dir,
            Node::Symlink(_) => EntryKind::Symlink,
        }
    }

    /// The unix mode recorded for the file at `path`, if any was set.
    #[must_use]
    pub fn mode_of(&self, path: &Path) -> Option<u32> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, path).ok()?;
        match nodes.get(&resolved) {
            Some(Node::File { mode, .. }) => *mode,
            _ => None,
        }
    }
}

impl Fs for MemoryFs {
    fn metadata(&self, path: &Path) -> io::Result<EntryKind> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, path)?;
        nodes.get(&resolved).map(Self::kind).ok_or_else(not_found)
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<EntryKind> {
        let nodes = self.lock();
        nodes
            .get(&normalize(path))
            .map(Self::kind)
            .ok_or_else(not_found)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, path)?;
        match nodes.get(&resolved) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(_) => Err(io::Error::from(io::ErrorKind::InvalidInput)),
            None => Err(not_found()),
        }
    }

    fn write(&self, path: &Path, contents: &[u8], mode: Option<u32>) -> io::Result<()> {
        let mut nodes = self.lock();
        let path = normalize(path);
        // Follow an existing symlink so writes land on the target,
        // like std::fs::write does.
        let dest = Self::resolve(&nodes, &path).unwrap_or(path);
        Self::require_parent_dir(&nodes, &dest)?;
        if matches!(nodes.get(&dest), Some(Node::Dir)) {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        nodes.insert(
            dest,
            Node::File {
                data: contents.to_vec(),
                mode,
            },
        );
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        let path = normalize(path);
        let mut ancestors: Vec<&Path> = path.ancestors().collect();
        ancestors.reverse();
        for ancestor in ancestors {
            match nodes.get(ancestor) {
                Some(Node::Dir) => {}
                Some(_) => return Err(io::Error::from(io::ErrorKind::AlreadyExists)),
                None => {
                    nodes.insert(ancestor.to_path_buf(), Node::Dir);
                }
            }
        }
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let nodes = self.lock();
        let path = Self::resolve(&nodes, path)?;
        if !matches!(nodes.get(&path), Some(Node::Dir)) {
            return Err(io::Error::from(io::ErrorKind::NotADirectory));
        }
        Ok(nodes
            .keys()
            .filter(|p| p.parent() == Some(path.as_path()))
            .cloned()
            .collect())
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        let link = normalize(link);
        Self::require_parent_dir(&nodes, &link)?;
        if nodes.contains_key(&link) {
            return Err(io::Error::from(io::ErrorKind::AlreadyExists));
        }
        nodes.insert(link, Node::Symlink(target.to_path_buf()));
        Ok(())
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        let nodes = self.lock();
        match nodes.get(&normalize(path)) {
            Some(Node::Symlink(target)) => Ok(target.clone()),
            Some(_) => Err(io::Error::from(io::ErrorKind::InvalidInput)),
            None => Err(not_found()),
        }
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        let path = normalize(path);
        match nodes.get(&path) {
            Some(Node::Dir) => {
                let has_children = nodes.keys().any(|p| p.parent() == Some(path.as_path()));
                if has_children {
                    return Err(io::Error::from(io::ErrorKind::DirectoryNotEmpty));
                }
            }
            Some(_) => {}
            None => return Err(not_found()),
        }
        nodes.remove(&path);
        Ok(())
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        let path = normalize(path);
        if !nodes.contains_key(&path) {
            return Err(not_found());
        }
        nodes.retain(|p, _| !p.starts_with(&path));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fs_with_dirs(dirs: &[&str]) -> MemoryFs {
        let fs = MemoryFs::new();
        for d in dirs {
            fs.create_dir_all(Path::new(d)).unwrap();
        }
        fs
    }

    #[test]
    fn write_then_read() {
        let fs = fs_with_dirs(&["/home"]);
        fs.write(Path::new("/home/file"), b"data", None).unwrap();
        assert_eq!(fs.read(Path::new("/home/file")).unwrap(), b"data");
    }

    #[test]
    fn write_requires_parent() {
        let fs = MemoryFs::new();
        let err = fs.write(Path::new("/no/parent"), b"x", None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn symlink_metadata_does_not_follow() {
        let fs = fs_with_dirs(&["/home"]);
        fs.write(Path::new("/home/target"), b"t", None).unwrap();
        fs.symlink(Path::new("/home/target"), Path::new("/home/link"))
            .unwrap();

        assert_eq!(
            fs.symlink_metadata(Path::new("/home/link")).unwrap(),
            EntryKind::Symlink
        );
        assert_eq!(
            fs.metadata(Path::new("/home/link")).unwrap(),
            EntryKind::File
        );
    }

    #[test]
    fn read_follows_symlink() {
        let fs = fs_with_dirs(&["/home"]);
        fs.write(Path::new("/home/target"), b"via-link", None)
            .unwrap();
        fs.symlink(Path::new("/home/target"), Path::new("/home/link"))
            .unwrap();
        assert_eq!(fs.read(Path::new("/home/link")).unwrap(), b"via-link");
    }

    #[test]
    fn broken_symlink_lstat_ok_stat_err() {
        let fs = fs_with_dirs(&["/home"]);
        fs.symlink(Path::new("/home/gone"), Path::new("/home/link"))
            .unwrap();

        assert!(fs.exists_no_follow(Path::new("/home/link")));
        assert!(!fs.exists(Path::new("/home/link")));
        // read_link still works on a broken symlink.
        assert_eq!(
            fs.read_link(Path::new("/home/link")).unwrap(),
            PathBuf::from("/home/gone")
        );
    }

    #[test]
    fn symlink_refuses_to_overwrite() {
        let fs = fs_with_dirs(&["/home"]);
        fs.write(Path::new("/home/f"), b"", None).unwrap();
        let err = fs
            .symlink(Path::new("/t"), Path::new("/home/f"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn read_link_on_regular_file_is_invalid_input() {
        let fs = fs_with_dirs(&["/home"]);
        fs.write(Path::new("/home/f"), b"", None).unwrap();
        let err = fs.read_link(Path::new("/home/f")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn remove_symlink_keeps_target() {
        let fs = fs_with_dirs(&["/home"]);
        fs.write(Path::new("/home/target"), b"t", None).unwrap();
        fs.symlink(Path::new("/home/target"), Path::new("/home/link"))
            .unwrap();

        fs.remove(Path::new("/home/link")).unwrap();
        assert!(!fs.exists_no_follow(Path::new("/home/link")));
        assert!(fs.exists(Path::new("/home/target")));
    }

    #[test]
    fn remove_non_empty_dir_fails() {
        let fs = fs_with_dirs(&["/home/sub"]);
        let err = fs.remove(Path::new("/home")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::DirectoryNotEmpty);
    }

    #[test]
    fn remove_all_deletes_subtree() {
        let fs = fs_with_dirs(&["/data/packs/vim/symlink"]);
        fs.write(Path::new("/data/packs/vim/symlink/state"), b"", None)
            .unwrap();

        fs.remove_all(Path::new("/data/packs/vim")).unwrap();
        assert!(!fs.exists_no_follow(Path::new("/data/packs/vim")));
        assert!(fs.exists(Path::new("/data/packs")));
    }

    #[test]
    fn remove_all_missing_is_not_found() {
        let fs = MemoryFs::new();
        let err = fs.remove_all(Path::new("/nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn read_dir_lists_direct_children_only() {
        let fs = fs_with_dirs(&["/a/b/c"]);
        fs.write(Path::new("/a/top"), b"", None).unwrap();

        let children = fs.read_dir(Path::new("/a")).unwrap();
        assert_eq!(children, vec![PathBuf::from("/a/b"), PathBuf::from("/a/top")]);
    }

    #[test]
    fn normalize_cleans_dot_segments() {
        assert_eq!(
            normalize(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
    }

    #[test]
    fn mode_is_recorded() {
        let fs = fs_with_dirs(&["/bin"]);
        fs.write(Path::new("/bin/tool"), b"#!/bin/sh\n", Some(0o755))
            .unwrap();
        assert_eq!(fs.mode_of(Path::new("/bin/tool")), Some(0o755));
    }
}
