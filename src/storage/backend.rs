//! The storage port.
//!
//! Everything above this module talks to a [`Storage`] rather than to
//! `std::fs`, so the aggregation and cascade algorithms run unchanged against
//! the real filesystem ([`FsStorage`]) or an in-memory tree
//! ([`MemoryStorage`]).

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Component, Path, PathBuf},
};

use parking_lot::RwLock;
use walkdir::WalkDir;

/// An immediate child of a directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    /// File or directory name.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Minimal filesystem surface the store needs.
///
/// Missing targets are reported as [`io::ErrorKind::NotFound`].
pub trait Storage: Send + Sync {
    /// Immediate children of `dir`, sorted by name.
    ///
    /// # Errors
    ///
    /// Fails if `dir` does not exist or cannot be read.
    fn list(&self, dir: &Path) -> io::Result<Vec<DirEntry>>;

    /// The full contents of the file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file does not exist or cannot be read.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace the file at `path`, creating missing parent directories.
    ///
    /// # Errors
    ///
    /// Fails if the file or its parents cannot be created or written.
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Create `dir` and any missing parents.
    ///
    /// # Errors
    ///
    /// Fails if a directory cannot be created.
    fn create_dir(&self, dir: &Path) -> io::Result<()>;

    /// Remove a file, or a directory together with everything below it.
    ///
    /// # Errors
    ///
    /// Fails if `path` does not exist or cannot be removed.
    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Every file below `dir`, at most `max_depth` levels deep, as paths
    /// relative to `dir`, sorted.
    ///
    /// # Errors
    ///
    /// Fails if `dir` does not exist.
    fn walk(&self, dir: &Path, max_depth: usize) -> io::Result<Vec<PathBuf>>;
}

/// Render a relative path with `/` separators regardless of platform.
#[must_use]
pub fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// [`Storage`] backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl Storage for FsStorage {
    fn list(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = fs::read_dir(dir)?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry in {}: {e}", dir.display());
                    None
                }
            })
            .map(|entry| {
                let is_dir = entry.file_type().is_ok_and(|kind| kind.is_dir());
                DirEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    is_dir,
                }
            })
            .collect::<Vec<_>>();
        entries.sort();
        Ok(entries)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    }

    fn create_dir(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        if fs::symlink_metadata(path)?.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn walk(&self, dir: &Path, max_depth: usize) -> io::Result<Vec<PathBuf>> {
        if !fs::metadata(dir)?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", dir.display()),
            ));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry below {}: {e}", dir.display());
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.path().strip_prefix(dir).ok().map(Path::to_path_buf))
            .collect();
        files.sort();
        Ok(files)
    }
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

/// [`Storage`] held entirely in memory.
///
/// Intended for tests and benchmarks. Empty directories are representable, so
/// half-created entries (a question directory without its document) can be
/// modelled faithfully.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    nodes: RwLock<BTreeMap<PathBuf, Node>>,
}

impl MemoryStorage {
    /// An empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )
    }

    fn insert_ancestors(nodes: &mut BTreeMap<PathBuf, Node>, path: &Path) -> io::Result<()> {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            match nodes.get(ancestor) {
                Some(Node::File(_)) => {
                    return Err(io::Error::other(format!(
                        "{} is a file",
                        ancestor.display()
                    )));
                }
                Some(Node::Dir) => {}
                None => {
                    nodes.insert(ancestor.to_path_buf(), Node::Dir);
                }
            }
        }
        Ok(())
    }

    fn require_dir(nodes: &BTreeMap<PathBuf, Node>, dir: &Path) -> io::Result<()> {
        match nodes.get(dir) {
            Some(Node::Dir) => Ok(()),
            Some(Node::File(_)) => Err(io::Error::other(format!(
                "{} is not a directory",
                dir.display()
            ))),
            None => Err(Self::not_found(dir)),
        }
    }
}

impl Storage for MemoryStorage {
    fn list(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
        let nodes = self.nodes.read();
        Self::require_dir(&nodes, dir)?;
        Ok(nodes
            .iter()
            .filter(|(path, _)| path.parent() == Some(dir))
            .filter_map(|(path, node)| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some(DirEntry {
                    name,
                    is_dir: matches!(node, Node::Dir),
                })
            })
            .collect())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        match self.nodes.read().get(path) {
            Some(Node::File(contents)) => Ok(contents.clone()),
            Some(Node::Dir) => Err(io::Error::other(format!(
                "{} is a directory",
                path.display()
            ))),
            None => Err(Self::not_found(path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut nodes = self.nodes.write();
        if matches!(nodes.get(path), Some(Node::Dir)) {
            return Err(io::Error::other(format!(
                "{} is a directory",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            Self::insert_ancestors(&mut nodes, parent)?;
        }
        nodes.insert(path.to_path_buf(), Node::File(contents.to_vec()));
        Ok(())
    }

    fn create_dir(&self, dir: &Path) -> io::Result<()> {
        Self::insert_ancestors(&mut self.nodes.write(), dir)
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.write();
        if nodes.remove(path).is_none() {
            return Err(Self::not_found(path));
        }
        nodes.retain(|candidate, _| !candidate.starts_with(path));
        Ok(())
    }

    fn walk(&self, dir: &Path, max_depth: usize) -> io::Result<Vec<PathBuf>> {
        let nodes = self.nodes.read();
        Self::require_dir(&nodes, dir)?;
        Ok(nodes
            .iter()
            .filter(|(_, node)| matches!(node, Node::File(_)))
            .filter_map(|(path, _)| path.strip_prefix(dir).ok())
            .filter(|relative| relative.components().count() <= max_depth)
            .map(Path::to_path_buf)
            .collect())
    }
}
