use indextree::{Arena, NodeId};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::extensions::ExtensionIndex;

/// What kind of node to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File { size: u64 },
    Dir,
}

/// Memoized aggregate size: value + valid flag.
#[derive(Debug, Default)]
struct SizeCache {
    valid: AtomicBool,
    value: AtomicU64,
}

impl SizeCache {
    fn get(&self) -> Option<u64> {
        if self.valid.load(Ordering::Acquire) {
            Some(self.value.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
        self.valid.store(true, Ordering::Release);
    }

    fn invalidate(&mut self) {
        *self.valid.get_mut() = false;
    }

    fn is_valid(&mut self) -> bool {
        *self.valid.get_mut()
    }
}

/// Directory-only state. Caches are filled lazily through `&FileTree`, so
/// they use interior mutability that is safe for concurrent readers.
#[derive(Debug, Default)]
pub struct DirState {
    scanned: bool,
    size: SizeCache,
    extensions: RwLock<Option<Arc<ExtensionIndex>>>,
}

impl DirState {
    fn invalidate_extensions(&mut self) -> bool {
        self.extensions.get_mut().take().is_some()
    }
}

#[derive(Debug)]
pub enum EntryKind {
    File { size: u64 },
    Dir(DirState),
}

/// A file or directory in the tree.
#[derive(Debug)]
pub struct Entry {
    pub path: PathBuf,
    pub name: String,
    pub kind: EntryKind,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Dir(_))
    }

    /// Own byte length for files, 0 for directories.
    pub fn own_size(&self) -> u64 {
        match self.kind {
            EntryKind::File { size } => size,
            EntryKind::Dir(_) => 0,
        }
    }

    /// Files count as scanned; directories once their listing was applied.
    pub fn is_scanned(&self) -> bool {
        match &self.kind {
            EntryKind::File { .. } => true,
            EntryKind::Dir(dir) => dir.scanned,
        }
    }
}

/// Hierarchical size model on an arena allocator.
///
/// Mutation needs `&mut self`; every query takes `&self` and the type is
/// `Sync`, so layout and statistics may run on several threads at once.
pub struct FileTree {
    arena: Arena<Entry>,
    root: NodeId,
    path_to_node: HashMap<PathBuf, NodeId>,
}

impl FileTree {
    /// Create a new tree with an unscanned root directory.
    pub fn new<P: AsRef<Path>>(root_path: P) -> Self {
        let root_path_buf = root_path.as_ref().to_path_buf();
        let root_name = root_path_buf
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root_path_buf.to_string_lossy().to_string());

        let mut arena = Arena::new();
        let root = arena.new_node(Entry {
            path: root_path_buf.clone(),
            name: root_name,
            kind: EntryKind::Dir(DirState::default()),
        });
        let mut path_to_node = HashMap::new();
        path_to_node.insert(root_path_buf, root);

        Self {
            arena,
            root,
            path_to_node,
        }
    }

    /// Allocate an unattached node.
    pub fn create_node(&mut self, name: impl Into<String>, path: PathBuf, kind: NodeKind) -> NodeId {
        let kind = match kind {
            NodeKind::File { size } => EntryKind::File { size },
            NodeKind::Dir => EntryKind::Dir(DirState::default()),
        };
        self.arena.new_node(Entry {
            path,
            name: name.into(),
            kind,
        })
    }

    /// Append `child` under `parent` and invalidate the parent chain.
    ///
    /// Paths are indexed only once they are reachable from the root, so a
    /// detached subtree is indexed as a whole when it gets attached.
    ///
    /// # Panics
    ///
    /// If `parent` is a file, if `child` is the root, already has a parent,
    /// or one of the paths it brings into the tree is already present.
    pub fn attach_child(&mut self, parent: NodeId, child: NodeId) {
        assert!(
            self.get(parent).is_some_and(Entry::is_dir),
            "attach_child: parent {:?} is not a live directory",
            parent
        );
        assert!(child != self.root, "attach_child: the root cannot be attached");
        assert!(
            self.arena.get(child).is_some_and(|n| n.parent().is_none() && !n.is_removed()),
            "attach_child: child {:?} is already attached or removed",
            child
        );

        let connected = parent.ancestors(&self.arena).any(|a| a == self.root);
        let mut incoming: HashMap<PathBuf, NodeId> = HashMap::new();
        if connected {
            for node in child.descendants(&self.arena) {
                let path = &self.arena[node].get().path;
                assert!(
                    !self.path_to_node.contains_key(path) && !incoming.contains_key(path),
                    "attach_child: {} is already in the tree",
                    path.display()
                );
                incoming.insert(path.clone(), node);
            }
        }

        parent.append(child, &mut self.arena);
        self.path_to_node.extend(incoming);
        self.invalidate_from(parent);
    }

    /// `create_node` followed by `attach_child`.
    pub fn add_child(&mut self, parent: NodeId, name: impl Into<String>, path: PathBuf, kind: NodeKind) -> NodeId {
        let child = self.create_node(name, path, kind);
        self.attach_child(parent, child);
        child
    }

    /// Sets `scanned`. Sizes already reflect the attached children, so only
    /// extension caches are dropped, and only on a false -> true transition.
    pub fn mark_scanned(&mut self, id: NodeId) {
        let transitioned = match self.entry_mut(id).map(|e| &mut e.kind) {
            Some(EntryKind::Dir(dir)) if !dir.scanned => {
                dir.scanned = true;
                true
            }
            _ => false,
        };
        if transitioned {
            let chain: Vec<NodeId> = id.ancestors(&self.arena).collect();
            for ancestor in chain {
                if let EntryKind::Dir(dir) = &mut self.arena[ancestor].get_mut().kind {
                    dir.invalidate_extensions();
                }
            }
        }
    }

    /// Update a file's byte length after a refresh.
    pub fn set_file_size(&mut self, id: NodeId, new_size: u64) {
        let changed = match self.entry_mut(id).map(|e| &mut e.kind) {
            Some(EntryKind::File { size }) if *size != new_size => {
                *size = new_size;
                true
            }
            _ => false,
        };
        if changed {
            if let Some(parent) = self.parent(id) {
                self.invalidate_from(parent);
            }
        }
    }

    /// Drop `id` and its descendants. The root cannot be removed.
    pub fn remove_subtree(&mut self, id: NodeId) {
        if id == self.root || self.get(id).is_none() {
            return;
        }
        let parent = self.parent(id);
        let doomed: Vec<NodeId> = id.descendants(&self.arena).collect();
        for node in doomed {
            let path = &self.arena[node].get().path;
            if self.path_to_node.get(path) == Some(&node) {
                self.path_to_node.remove(path);
            }
        }
        id.remove_subtree(&mut self.arena);
        if let Some(parent) = parent {
            self.invalidate_from(parent);
        }
    }

    /// Remove every child of a directory and mark it unscanned again.
    pub fn reset_children(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.children(id).collect();
        for child in children {
            self.remove_subtree(child);
        }
        if let Some(EntryKind::Dir(dir)) = self.entry_mut(id).map(|e| &mut e.kind) {
            dir.scanned = false;
        }
        self.invalidate_from(id);
    }

    /// Invalidate both caches on `id` and upward. A directory whose caches
    /// are both already invalid has invalid ancestors too, so the walk stops.
    fn invalidate_from(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let Some(node) = self.arena.get_mut(node_id).filter(|n| !n.is_removed()) else {
                break;
            };
            let parent = node.parent();
            if let EntryKind::Dir(dir) = &mut node.get_mut().kind {
                let had_size = dir.size.is_valid();
                dir.size.invalidate();
                let had_extensions = dir.invalidate_extensions();
                if !had_size && !had_extensions && node_id != id {
                    break;
                }
            }
            current = parent;
        }
    }

    /// Total bytes under `id`: a file's own size, or the recursive sum over a
    /// directory's children (0 while a directory has none).
    pub fn aggregate_size(&self, id: NodeId) -> u64 {
        let Some(entry) = self.get(id) else {
            return 0;
        };
        match &entry.kind {
            EntryKind::File { size } => *size,
            EntryKind::Dir(dir) => {
                if let Some(cached) = dir.size.get() {
                    return cached;
                }
                let total = id
                    .children(&self.arena)
                    .fold(0u64, |acc, child| acc.saturating_add(self.aggregate_size(child)));
                dir.size.set(total);
                total
            }
        }
    }

    /// Children by aggregate size descending; ties keep discovery order.
    pub fn sorted_children(&self, id: NodeId) -> Vec<NodeId> {
        let mut sized: Vec<(NodeId, u64)> = self
            .children(id)
            .map(|child| (child, self.aggregate_size(child)))
            .collect();
        sized.sort_by(|a, b| b.1.cmp(&a.1));
        sized.into_iter().map(|(child, _)| child).collect()
    }

    /// Extension statistics over every file below `id`. Directories never
    /// appear as buckets. For a file, the index holds just that file.
    pub fn extension_stats(&self, id: NodeId) -> Arc<ExtensionIndex> {
        let Some(entry) = self.get(id) else {
            return Arc::default();
        };
        let dir = match &entry.kind {
            EntryKind::File { size } => {
                let mut index = ExtensionIndex::default();
                index.record(&entry.name, *size);
                return Arc::new(index);
            }
            EntryKind::Dir(dir) => dir,
        };

        if let Some(cached) = dir.extensions.read().as_ref() {
            return Arc::clone(cached);
        }

        let children: Vec<NodeId> = self.children(id).collect();
        let index = children
            .par_iter()
            .fold(ExtensionIndex::default, |mut acc, &child| {
                let child_entry = self.arena[child].get();
                match child_entry.kind {
                    EntryKind::File { size } => acc.record(&child_entry.name, size),
                    EntryKind::Dir(_) => acc.merge(&self.extension_stats(child)),
                }
                acc
            })
            .reduce(ExtensionIndex::default, |mut a, b| {
                a.merge(&b);
                a
            });

        let index = Arc::new(index);
        *dir.extensions.write() = Some(Arc::clone(&index));
        index
    }

    /// Number of files below `id` (1 for a file).
    pub fn file_count(&self, id: NodeId) -> u64 {
        self.extension_stats(id).total_count()
    }

    pub fn is_scanned(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(Entry::is_scanned)
    }

    pub fn is_dir(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(Entry::is_dir)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_path(&self) -> &Path {
        &self.arena[self.root].get().path
    }

    /// Live entry for `id`, `None` once removed.
    pub fn get(&self, id: NodeId) -> Option<&Entry> {
        self.arena
            .get(id)
            .filter(|node| !node.is_removed())
            .map(|node| node.get())
    }

    fn entry_mut(&mut self, id: NodeId) -> Option<&mut Entry> {
        self.arena
            .get_mut(id)
            .filter(|node| !node.is_removed())
            .map(|node| node.get_mut())
    }

    pub fn get_node(&self, path: &Path) -> Option<NodeId> {
        self.path_to_node.get(path).copied()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena.get(id).and_then(|node| node.parent())
    }

    /// Children in discovery order.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let live = self.get(id).is_some();
        live.then(|| id.children(&self.arena)).into_iter().flatten()
    }

    /// Path from the root down to `id`, both included.
    pub fn breadcrumbs(&self, id: NodeId) -> Vec<NodeId> {
        if self.get(id).is_none() {
            return Vec::new();
        }
        let mut chain: Vec<NodeId> = id.ancestors(&self.arena).collect();
        chain.reverse();
        chain
    }

    /// Live nodes reachable from the root.
    pub fn node_count(&self) -> usize {
        self.root.descendants(&self.arena).count()
    }

    /// Total size of the tree.
    pub fn total_size(&self) -> u64 {
        self.aggregate_size(self.root)
    }
}
