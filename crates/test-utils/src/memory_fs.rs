use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use watchbuild::fs::FileSystem;

#[derive(Debug, Default)]
struct Tree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

/// In-memory [`FileSystem`]. Cloning shares the tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    tree: Arc<Mutex<Tree>>,
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file (and its parent directories).
    pub fn add_file(&self, path: impl AsRef<Path>, contents: &str) {
        self.write(path.as_ref(), contents.as_bytes())
            .expect("in-memory write cannot fail");
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) -> bool {
        let path = normalize(path.as_ref());
        self.tree.lock().unwrap().files.remove(&path).is_some()
    }

    pub fn read(&self, path: impl AsRef<Path>) -> Option<String> {
        let path = normalize(path.as_ref());
        let tree = self.tree.lock().unwrap();
        tree.files
            .get(&path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    fn add_dirs(tree: &mut Tree, path: &Path) {
        let mut current = Some(path);
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }
            tree.dirs.insert(dir.to_path_buf());
            current = dir.parent();
        }
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.read(path)
            .ok_or_else(|| anyhow!("no such file: {}", path.display()))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let path = normalize(path);
        let mut tree = self.tree.lock().unwrap();
        if let Some(parent) = path.parent() {
            Self::add_dirs(&mut tree, parent);
        }
        tree.files.insert(path, contents.to_vec());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let path = normalize(path);
        Self::add_dirs(&mut self.tree.lock().unwrap(), &path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.is_file(path) || self.is_dir(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.tree.lock().unwrap().files.contains_key(&normalize(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.tree.lock().unwrap().dirs.contains(&normalize(path))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let path = normalize(path);
        let tree = self.tree.lock().unwrap();
        if !tree.dirs.contains(&path) {
            return Err(anyhow!("no such directory: {}", path.display()));
        }
        let children = tree
            .files
            .keys()
            .chain(tree.dirs.iter())
            .filter(|p| p.parent() == Some(path.as_path()))
            .cloned()
            .collect::<BTreeSet<_>>();
        Ok(children.into_iter().collect())
    }
}
