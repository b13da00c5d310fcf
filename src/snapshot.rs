//! Persisted scan results.
//!
//! A snapshot stores structure only: names, kinds, file sizes and scanned
//! flags, plus the scan options used. Aggregates and extension indexes are
//! recomputed after a restore.

use dashmap::DashMap;
use indextree::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::config::{project_dirs, CacheConfig};
use crate::crawler::ScanOptions;
use crate::error::{Error, Result};
use crate::tree::{EntryKind, FileTree, NodeKind};

const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SnapshotKind {
    File { size: u64 },
    Dir { scanned: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SnapshotNode {
    name: String,
    kind: SnapshotKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<SnapshotNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    version: u32,
    root_path: PathBuf,
    /// The options the tree was scanned with. A tree scanned with other
    /// options is a different tree.
    options: ScanOptions,
    /// Seconds since the Unix epoch.
    saved_at: u64,
    root: SnapshotNode,
}

impl Snapshot {
    pub fn capture(tree: &FileTree, options: &ScanOptions) -> Self {
        let saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            version: SNAPSHOT_VERSION,
            root_path: tree.root_path().to_path_buf(),
            options: options.clone(),
            saved_at,
            root: capture_node(tree, tree.root()),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn saved_at(&self) -> u64 {
        self.saved_at
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Rebuild a tree through the normal create/attach path.
    ///
    /// The snapshot is untrusted input: every name must be a single path
    /// component, unique among its siblings, and only directories may have
    /// children. Anything else is `Error::SnapshotCorrupt`.
    pub fn restore(&self) -> Result<FileTree> {
        let SnapshotKind::Dir { scanned } = self.root.kind else {
            return Err(self.corrupt("root is not a directory".to_string()));
        };
        self.check_children(&self.root)?;

        let mut tree = FileTree::new(&self.root_path);
        let mut scanned_dirs = Vec::new();
        if scanned {
            scanned_dirs.push(tree.root());
        }

        let mut stack: Vec<(NodeId, PathBuf, &SnapshotNode)> = self
            .root
            .children
            .iter()
            .rev()
            .map(|child| (tree.root(), self.root_path.join(&child.name), child))
            .collect();

        while let Some((parent, path, node)) = stack.pop() {
            let kind = match node.kind {
                SnapshotKind::File { size } => NodeKind::File { size },
                SnapshotKind::Dir { .. } => NodeKind::Dir,
            };
            let id = tree.create_node(node.name.clone(), path.clone(), kind);
            tree.attach_child(parent, id);

            match node.kind {
                SnapshotKind::Dir { scanned } => {
                    self.check_children(node)?;
                    if scanned {
                        scanned_dirs.push(id);
                    }
                    for child in node.children.iter().rev() {
                        stack.push((id, path.join(&child.name), child));
                    }
                }
                SnapshotKind::File { .. } if !node.children.is_empty() => {
                    return Err(self.corrupt(format!("file {} has children", path.display())));
                }
                SnapshotKind::File { .. } => {}
            }
        }

        for dir in scanned_dirs {
            tree.mark_scanned(dir);
        }
        Ok(tree)
    }

    fn check_children(&self, node: &SnapshotNode) -> Result<()> {
        let mut seen = HashSet::with_capacity(node.children.len());
        for child in &node.children {
            if !is_single_component(&child.name) {
                return Err(self.corrupt(format!("invalid entry name {:?}", child.name)));
            }
            if !seen.insert(child.name.as_str()) {
                return Err(self.corrupt(format!("duplicate entry {:?} in {:?}", child.name, node.name)));
            }
        }
        Ok(())
    }

    fn corrupt(&self, reason: String) -> Error {
        Error::SnapshotCorrupt {
            root: self.root_path.clone(),
            reason,
        }
    }
}

/// True for a plain file name: no separators, not `.` or `..`, not empty.
fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => part == OsStr::new(name),
        _ => false,
    }
}

fn capture_node(tree: &FileTree, id: NodeId) -> SnapshotNode {
    let Some(entry) = tree.get(id) else {
        return SnapshotNode {
            name: String::new(),
            kind: SnapshotKind::Dir { scanned: false },
            children: Vec::new(),
        };
    };

    match &entry.kind {
        EntryKind::File { size } => SnapshotNode {
            name: entry.name.clone(),
            kind: SnapshotKind::File { size: *size },
            children: Vec::new(),
        },
        EntryKind::Dir(_) => SnapshotNode {
            name: entry.name.clone(),
            kind: SnapshotKind::Dir {
                scanned: entry.is_scanned(),
            },
            children: tree.children(id).map(|child| capture_node(tree, child)).collect(),
        },
    }
}

fn path_hash(path: &Path) -> u64 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}

/// Snapshots on disk, one JSON file per scanned root, with an in-memory
/// layer for repeated loads in the same process.
pub struct ScanCache {
    dir: PathBuf,
    memory: DashMap<PathBuf, Arc<Snapshot>>,
}

impl ScanCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            memory: DashMap::new(),
        }
    }

    /// Cache rooted at the configured directory, else the platform one.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        match &config.dir {
            Some(dir) => Ok(Self::new(dir)),
            None => project_dirs()
                .map(|dirs| Self::new(dirs.cache_dir().join("snapshots")))
                .ok_or(Error::NoCacheDir),
        }
    }

    pub fn file_for(&self, root: &Path) -> PathBuf {
        self.dir.join(format!("{:016x}.json", path_hash(root)))
    }

    /// The stored snapshot for `root`, if any was taken with `options`.
    pub fn snapshot(&self, root: &Path, options: &ScanOptions) -> Result<Option<Arc<Snapshot>>> {
        if let Some(hit) = self.memory.get(root) {
            if hit.options != *options {
                debug!("cached snapshot of {} used other scan options", root.display());
                return Ok(None);
            }
            return Ok(Some(Arc::clone(hit.value())));
        }

        let file = self.file_for(root);
        let raw = match std::fs::read(&file) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(Error::SnapshotIo { path: file, source }),
        };

        let snapshot: Snapshot = serde_json::from_slice(&raw).map_err(|source| Error::SnapshotFormat {
            path: file.clone(),
            source,
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::SnapshotVersion {
                path: file,
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        if snapshot.root_path != root {
            debug!("snapshot {} belongs to {}", file.display(), snapshot.root_path.display());
            return Ok(None);
        }
        if snapshot.options != *options {
            debug!("snapshot {} was taken with other scan options", file.display());
            return Ok(None);
        }

        let snapshot = Arc::new(snapshot);
        self.memory.insert(root.to_path_buf(), Arc::clone(&snapshot));
        Ok(Some(snapshot))
    }

    /// Restore the cached tree for `root` scanned with `options`.
    pub fn load(&self, root: &Path, options: &ScanOptions) -> Result<Option<FileTree>> {
        let Some(snapshot) = self.snapshot(root, options)? else {
            return Ok(None);
        };
        match snapshot.restore() {
            Ok(tree) => Ok(Some(tree)),
            Err(err) => {
                self.memory.remove(root);
                Err(err)
            }
        }
    }

    pub fn save(&self, tree: &FileTree, options: &ScanOptions) -> Result<PathBuf> {
        let snapshot = Snapshot::capture(tree, options);
        let file = self.file_for(tree.root_path());

        std::fs::create_dir_all(&self.dir).map_err(|source| Error::SnapshotIo {
            path: self.dir.clone(),
            source,
        })?;
        let raw = serde_json::to_vec(&snapshot).map_err(|source| Error::SnapshotFormat {
            path: file.clone(),
            source,
        })?;
        std::fs::write(&file, raw).map_err(|source| Error::SnapshotIo {
            path: file.clone(),
            source,
        })?;

        debug!("saved snapshot of {} to {}", tree.root_path().display(), file.display());
        self.memory.insert(tree.root_path().to_path_buf(), Arc::new(snapshot));
        Ok(file)
    }

    pub fn clear(&self, root: &Path) -> Result<()> {
        self.memory.remove(root);
        let file = self.file_for(root);
        match std::fs::remove_file(&file) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::SnapshotIo { path: file, source }),
        }
    }
}
