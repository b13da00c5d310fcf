use indextree::NodeId;
use jwalk::WalkDir;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::tree::{FileTree, NodeKind};

const PROGRESS_EMIT_INTERVAL_MS: u64 = 100;

/// What to leave out of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    pub skip_hidden: bool,
    pub skip_patterns: Vec<String>,
    /// Directories at this depth below the root are kept as unscanned
    /// placeholders. `None` scans everything.
    pub max_depth: Option<usize>,
}

impl ScanOptions {
    fn skips_name(&self, name: &str) -> bool {
        (self.skip_hidden && name.starts_with('.')) || self.skip_patterns.iter().any(|p| p == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub total_files: u64,
    pub total_dirs: u64,
    pub total_size: u64,
    pub skipped_symlinks: u64,
    pub unreadable_dirs: u64,
    pub duration_ms: u128,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Discovering,
    Processing,
}

#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub phase: ScanPhase,
    pub discovered_entries: u64,
    pub processed_entries: u64,
    pub total_entries: Option<u64>,
    pub total_files: u64,
    pub total_dirs: u64,
    pub total_size: u64,
}

impl ScanProgress {
    pub fn starting() -> Self {
        Self {
            phase: ScanPhase::Discovering,
            discovered_entries: 0,
            processed_entries: 0,
            total_entries: None,
            total_files: 0,
            total_dirs: 0,
            total_size: 0,
        }
    }

    pub fn fraction(&self) -> Option<f32> {
        match self.phase {
            ScanPhase::Discovering => None,
            ScanPhase::Processing => {
                let total = self.total_entries?;
                if total == 0 {
                    Some(1.0)
                } else {
                    Some((self.processed_entries as f32 / total as f32).clamp(0.0, 1.0))
                }
            }
        }
    }
}

pub type ProgressReporter = Arc<dyn Fn(ScanProgress) + Send + Sync>;

/// Entry discovered by the walk, before it is attached to a tree.
#[derive(Debug, Clone)]
struct CrawledEntry {
    path: PathBuf,
    parent: PathBuf,
    name: String,
    depth: usize,
    kind: NodeKind,
}

/// Parallel full-tree crawler: jwalk for the walk, rayon for metadata.
pub struct FileCrawler {
    options: ScanOptions,
    cancel: Arc<AtomicBool>,
    file_count: Arc<AtomicU64>,
    dir_count: Arc<AtomicU64>,
    total_size: Arc<AtomicU64>,
    skipped_symlinks: Arc<AtomicU64>,
}

impl FileCrawler {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            options,
            cancel: Arc::new(AtomicBool::new(false)),
            file_count: Arc::new(AtomicU64::new(0)),
            dir_count: Arc::new(AtomicU64::new(0)),
            total_size: Arc::new(AtomicU64::new(0)),
            skipped_symlinks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Flag that abandons the scan when set. The tree built so far stays
    /// consistent but no directory in it is marked scanned.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn emit_progress(reporter: &Option<ProgressReporter>, progress: ScanProgress) {
        if let Some(cb) = reporter {
            cb(progress);
        }
    }

    fn should_emit_progress(last_emit_ms: &AtomicU64, elapsed_ms: u64) -> bool {
        let previous = last_emit_ms.load(Ordering::Relaxed);
        if elapsed_ms.saturating_sub(previous) < PROGRESS_EMIT_INTERVAL_MS {
            return false;
        }

        last_emit_ms
            .compare_exchange(previous, elapsed_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    fn processing_parallelism() -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        (cores * 2).clamp(4, 64)
    }

    fn snapshot(&self, phase: ScanPhase, discovered: u64, processed: u64, total: Option<u64>) -> ScanProgress {
        ScanProgress {
            phase,
            discovered_entries: discovered,
            processed_entries: processed,
            total_entries: total,
            total_files: self.file_count.load(Ordering::Relaxed),
            total_dirs: self.dir_count.load(Ordering::Relaxed),
            total_size: self.total_size.load(Ordering::Relaxed),
        }
    }

    /// Scan `root` completely (down to `max_depth`) into a fresh tree.
    pub fn scan_with_progress<P: AsRef<Path>>(
        &mut self,
        root: P,
        reporter: Option<ProgressReporter>,
    ) -> (FileTree, ScanStats) {
        let root_path = root.as_ref().to_path_buf();
        let start = Instant::now();

        self.file_count.store(0, Ordering::Relaxed);
        self.dir_count.store(0, Ordering::Relaxed);
        self.total_size.store(0, Ordering::Relaxed);
        self.skipped_symlinks.store(0, Ordering::Relaxed);

        let scan_threads = Self::processing_parallelism();
        let options = self.options.clone();
        let skipped_symlinks = Arc::clone(&self.skipped_symlinks);

        let mut walker = WalkDir::new(&root_path)
            .skip_hidden(options.skip_hidden)
            .follow_links(false)
            .sort(true)
            .parallelism(jwalk::Parallelism::RayonNewPool(scan_threads))
            .process_read_dir(move |_, _, _, children| {
                // Symlinks are dropped here, before any size or type probe.
                children.retain(|entry| match entry {
                    Ok(dir_entry) => {
                        if dir_entry.file_type.is_symlink() {
                            skipped_symlinks.fetch_add(1, Ordering::Relaxed);
                            return false;
                        }
                        !options.skips_name(&dir_entry.file_name.to_string_lossy())
                    }
                    Err(_) => true,
                });
            });
        if let Some(depth) = self.options.max_depth {
            walker = walker.max_depth(depth);
        }

        // Phase 1: walk.
        let mut entries = Vec::new();
        let mut unreadable_dirs = 0u64;
        let mut discovered_entries = 0u64;
        let mut cancelled = false;
        let mut discovery_last_emit = Instant::now();

        for entry in walker {
            if self.cancel.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("skipping unreadable entry: {}", err);
                    continue;
                }
            };

            if let Some(err) = entry.read_children_error.as_ref() {
                debug!("cannot enumerate {}: {}", entry.path().display(), err);
                unreadable_dirs += 1;
            }

            discovered_entries += 1;
            if reporter.is_some() && discovery_last_emit.elapsed().as_millis() as u64 >= PROGRESS_EMIT_INTERVAL_MS {
                discovery_last_emit = Instant::now();
                Self::emit_progress(
                    &reporter,
                    self.snapshot(ScanPhase::Discovering, discovered_entries, 0, None),
                );
            }

            // The root already exists in the tree.
            if entry.depth > 0 {
                entries.push(entry);
            }
        }

        let total_entries = entries.len() as u64;
        Self::emit_progress(
            &reporter,
            self.snapshot(ScanPhase::Processing, discovered_entries, 0, Some(total_entries)),
        );

        // Phase 2: metadata, in parallel.
        let processed = AtomicU64::new(0);
        let processing_last_emit_ms = AtomicU64::new(0);
        let processing_started = Instant::now();

        let process_entries = || {
            entries
                .par_iter()
                .map(|entry| {
                    let processed_now = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    let path = entry.path();

                    let kind = if entry.file_type.is_dir() {
                        self.dir_count.fetch_add(1, Ordering::Relaxed);
                        NodeKind::Dir
                    } else {
                        let size = match entry.metadata() {
                            Ok(metadata) => metadata.len(),
                            Err(err) => {
                                debug!("cannot read size of {}: {}", path.display(), err);
                                0
                            }
                        };
                        self.file_count.fetch_add(1, Ordering::Relaxed);
                        self.total_size.fetch_add(size, Ordering::Relaxed);
                        NodeKind::File { size }
                    };

                    if let Some(cb) = reporter.as_ref() {
                        let elapsed_ms = processing_started.elapsed().as_millis() as u64;
                        if processed_now == total_entries
                            || Self::should_emit_progress(&processing_last_emit_ms, elapsed_ms)
                        {
                            cb(self.snapshot(
                                ScanPhase::Processing,
                                discovered_entries,
                                processed_now,
                                Some(total_entries),
                            ));
                        }
                    }

                    CrawledEntry {
                        parent: entry.parent_path.to_path_buf(),
                        name: entry.file_name.to_string_lossy().to_string(),
                        depth: entry.depth,
                        path,
                        kind,
                    }
                })
                .collect::<Vec<_>>()
        };

        let crawled = ThreadPoolBuilder::new()
            .num_threads(scan_threads)
            .build()
            .map(|pool| pool.install(process_entries))
            .unwrap_or_else(|_| process_entries());

        // Phase 3: attach, parents first.
        let tree = self.build_tree(&root_path, crawled, cancelled);

        let stats = ScanStats {
            total_files: self.file_count.load(Ordering::Relaxed),
            total_dirs: self.dir_count.load(Ordering::Relaxed),
            total_size: self.total_size.load(Ordering::Relaxed),
            skipped_symlinks: self.skipped_symlinks.load(Ordering::Relaxed),
            unreadable_dirs,
            duration_ms: start.elapsed().as_millis(),
            cancelled,
        };

        info!(
            root = %root_path.display(),
            files = stats.total_files,
            dirs = stats.total_dirs,
            bytes = stats.total_size,
            ms = stats.duration_ms as u64,
            cancelled,
            "scan finished"
        );

        (tree, stats)
    }

    fn build_tree(&self, root_path: &Path, mut crawled: Vec<CrawledEntry>, cancelled: bool) -> FileTree {
        let mut tree = FileTree::new(root_path);
        // jwalk already yields parents first; the stable sort keeps sibling order.
        crawled.sort_by_key(|entry| entry.depth);

        let mut dirs = Vec::new();
        if self.options.max_depth != Some(0) {
            dirs.push(tree.root());
        }
        for entry in crawled {
            let Some(parent) = tree.get_node(&entry.parent) else {
                debug!("orphaned entry {}", entry.path.display());
                continue;
            };
            let is_dir = entry.kind == NodeKind::Dir;
            let reached_limit = self.options.max_depth.is_some_and(|max| entry.depth >= max);
            let id = tree.add_child(parent, entry.name, entry.path, entry.kind);
            if is_dir && !reached_limit {
                dirs.push(id);
            }
        }

        if !cancelled {
            for dir in dirs {
                tree.mark_scanned(dir);
            }
        }
        tree
    }
}

impl Default for FileCrawler {
    fn default() -> Self {
        Self::new(ScanOptions::default())
    }
}

/// One level of a directory, read without touching any tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub path: PathBuf,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub path: PathBuf,
    pub entries: Vec<ListingEntry>,
    /// False when the directory itself could not be enumerated.
    pub readable: bool,
    pub skipped_symlinks: u64,
}

/// Enumerate the immediate children of `path`. Safe to call off the thread
/// that owns the tree. Never fails: an unreadable directory yields an empty,
/// `readable == false` listing and unreadable sizes become 0.
pub fn read_listing(path: &Path, options: &ScanOptions) -> Listing {
    let mut listing = Listing {
        path: path.to_path_buf(),
        entries: Vec::new(),
        readable: true,
        skipped_symlinks: 0,
    };

    let read_dir = match std::fs::read_dir(path) {
        Ok(read_dir) => read_dir,
        Err(err) => {
            debug!("cannot enumerate {}: {}", path.display(), err);
            listing.readable = false;
            return listing;
        }
    };

    for dir_entry in read_dir {
        let dir_entry = match dir_entry {
            Ok(dir_entry) => dir_entry,
            Err(err) => {
                debug!("skipping entry in {}: {}", path.display(), err);
                continue;
            }
        };
        let name = dir_entry.file_name().to_string_lossy().to_string();
        if options.skips_name(&name) {
            continue;
        }

        // DirEntry::file_type does not follow symlinks.
        let file_type = match dir_entry.file_type() {
            Ok(file_type) => file_type,
            Err(err) => {
                debug!("cannot stat {}: {}", dir_entry.path().display(), err);
                continue;
            }
        };
        if file_type.is_symlink() {
            listing.skipped_symlinks += 1;
            continue;
        }

        let kind = if file_type.is_dir() {
            NodeKind::Dir
        } else {
            let size = dir_entry.metadata().map(|m| m.len()).unwrap_or_else(|err| {
                debug!("cannot read size of {}: {}", dir_entry.path().display(), err);
                0
            });
            NodeKind::File { size }
        };

        listing.entries.push(ListingEntry {
            name,
            path: dir_entry.path(),
            kind,
        });
    }

    // Same order the full crawler produces.
    listing.entries.sort_by(|a, b| a.name.cmp(&b.name));
    listing
}

/// Merge a listing into the children of `id` and mark it scanned.
///
/// Directories that are still present keep their subtree, files get their
/// new size, vanished entries are dropped and new ones are appended (new
/// directories as unscanned placeholders).
pub fn apply_listing(tree: &mut FileTree, id: NodeId, listing: Listing) {
    if !tree.is_dir(id) {
        return;
    }

    let mut existing: HashMap<PathBuf, NodeId> = tree
        .children(id)
        .filter_map(|child| tree.get(child).map(|entry| (entry.path.clone(), child)))
        .collect();

    for entry in listing.entries {
        if let Some(child) = existing.remove(&entry.path) {
            match (entry.kind, tree.is_dir(child)) {
                (NodeKind::Dir, true) => continue,
                (NodeKind::File { size }, false) => {
                    tree.set_file_size(child, size);
                    continue;
                }
                _ => tree.remove_subtree(child),
            }
        }
        tree.add_child(id, entry.name, entry.path, entry.kind);
    }

    let vanished: HashSet<NodeId> = existing.into_values().collect();
    for child in vanished {
        tree.remove_subtree(child);
    }

    tree.mark_scanned(id);
}

/// Scan one level of an unscanned directory in place. Returns whether a
/// listing was applied.
pub fn expand(tree: &mut FileTree, id: NodeId, options: &ScanOptions) -> bool {
    let Some(path) = tree
        .get(id)
        .filter(|entry| entry.is_dir() && !entry.is_scanned())
        .map(|entry| entry.path.clone())
    else {
        return false;
    };

    let listing = read_listing(&path, options);
    apply_listing(tree, id, listing);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// root/
    ///   a.txt (100)   b.log (300)
    ///   sub/ big.bin (450) small.bin (150)
    ///        deep/ leaf.txt (7)
    fn fixture() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.txt"), vec![0u8; 100]).unwrap();
        fs::write(root.join("b.log"), vec![0u8; 300]).unwrap();
        fs::create_dir_all(root.join("sub/deep")).unwrap();
        fs::write(root.join("sub/big.bin"), vec![0u8; 450]).unwrap();
        fs::write(root.join("sub/small.bin"), vec![0u8; 150]).unwrap();
        fs::write(root.join("sub/deep/leaf.txt"), vec![0u8; 7]).unwrap();
        dir
    }

    #[test]
    fn test_crawler_basic() {
        let dir = fixture();
        let mut crawler = FileCrawler::default();
        let (tree, stats) = crawler.scan_with_progress(dir.path(), None);

        assert_eq!(stats.total_files, 5);
        assert_eq!(stats.total_dirs, 2);
        assert_eq!(stats.total_size, 1007);
        assert!(!stats.cancelled);

        let root = tree.root();
        assert_eq!(tree.aggregate_size(root), 1007);
        assert!(tree.is_scanned(root));

        let sub = tree.get_node(&dir.path().join("sub")).unwrap();
        let deep = tree.get_node(&dir.path().join("sub/deep")).unwrap();
        assert!(tree.is_scanned(sub));
        assert!(tree.is_scanned(deep));
        assert_eq!(tree.aggregate_size(sub), 607);
        assert_eq!(tree.sorted_children(root)[0], sub);
    }

    #[test]
    fn test_progress_is_reported() {
        let dir = fixture();
        let seen = Arc::new(AtomicU64::new(0));
        let seen_cb = Arc::clone(&seen);
        let reporter: ProgressReporter = Arc::new(move |progress: ScanProgress| {
            if progress.phase == ScanPhase::Processing {
                seen_cb.fetch_max(progress.processed_entries, Ordering::Relaxed);
            }
        });

        let mut crawler = FileCrawler::default();
        crawler.scan_with_progress(dir.path(), Some(reporter));
        assert_eq!(seen.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn test_max_depth_leaves_placeholders() {
        let dir = fixture();
        let mut crawler = FileCrawler::new(ScanOptions {
            max_depth: Some(1),
            ..ScanOptions::default()
        });
        let (tree, _) = crawler.scan_with_progress(dir.path(), None);

        let sub = tree.get_node(&dir.path().join("sub")).unwrap();
        assert!(tree.is_scanned(tree.root()));
        assert!(!tree.is_scanned(sub));
        assert_eq!(tree.aggregate_size(sub), 0);
        assert_eq!(tree.total_size(), 400);
    }

    #[test]
    fn test_skip_patterns_and_hidden() {
        let dir = fixture();
        fs::write(dir.path().join(".hidden"), vec![0u8; 50]).unwrap();

        let mut crawler = FileCrawler::new(ScanOptions {
            skip_hidden: true,
            skip_patterns: vec!["sub".to_string()],
            max_depth: None,
        });
        let (tree, _) = crawler.scan_with_progress(dir.path(), None);
        assert_eq!(tree.total_size(), 400);
        assert!(tree.get_node(&dir.path().join("sub")).is_none());

        let (tree, _) = FileCrawler::default().scan_with_progress(dir.path(), None);
        assert_eq!(tree.total_size(), 1057);
    }

    #[test]
    fn test_cancelled_scan_marks_nothing_scanned() {
        let dir = fixture();
        let mut crawler = FileCrawler::default();
        crawler.cancel_handle().store(true, Ordering::Relaxed);
        let (tree, stats) = crawler.scan_with_progress(dir.path(), None);

        assert!(stats.cancelled);
        assert!(!tree.is_scanned(tree.root()));
        assert_eq!(tree.total_size(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let dir = fixture();
        let root = dir.path();
        std::os::unix::fs::symlink(root, root.join("sub/loop")).unwrap();
        std::os::unix::fs::symlink(root.join("a.txt"), root.join("alias.txt")).unwrap();
        std::os::unix::fs::symlink(root.join("self"), root.join("self")).unwrap();

        let (tree, stats) = FileCrawler::default().scan_with_progress(root, None);
        assert_eq!(stats.skipped_symlinks, 3);
        assert_eq!(tree.total_size(), 1007);
        assert!(tree.get_node(&root.join("sub/loop")).is_none());
        assert!(tree.get_node(&root.join("alias.txt")).is_none());
        assert!(tree.get_node(&root.join("self")).is_none());

        let listing = read_listing(root, &ScanOptions::default());
        assert_eq!(listing.skipped_symlinks, 2);
        assert!(listing.entries.iter().all(|e| e.name != "alias.txt" && e.name != "self"));
    }

    #[test]
    fn test_lazy_expand() {
        let dir = fixture();
        let mut tree = FileTree::new(dir.path());
        let root = tree.root();

        assert!(expand(&mut tree, root, &ScanOptions::default()));
        assert!(!expand(&mut tree, root, &ScanOptions::default()));
        assert!(tree.is_scanned(root));
        assert_eq!(tree.children(root).count(), 3);

        // sub is known but not enumerated yet.
        let sub = tree.get_node(&dir.path().join("sub")).unwrap();
        assert!(!tree.is_scanned(sub));
        assert_eq!(tree.total_size(), 400);

        expand(&mut tree, sub, &ScanOptions::default());
        assert_eq!(tree.total_size(), 1000);
        let deep = tree.get_node(&dir.path().join("sub/deep")).unwrap();
        expand(&mut tree, deep, &ScanOptions::default());
        assert_eq!(tree.total_size(), 1007);
    }

    #[test]
    fn test_unreadable_directory_is_scanned_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = FileTree::new(dir.path());
        let root = tree.root();
        let gone = dir.path().join("gone");
        let ghost = tree.add_child(root, "gone", gone.clone(), NodeKind::Dir);

        let listing = read_listing(&gone, &ScanOptions::default());
        assert!(!listing.readable);
        apply_listing(&mut tree, ghost, listing);

        assert!(tree.is_scanned(ghost));
        assert_eq!(tree.children(ghost).count(), 0);
        assert_eq!(tree.aggregate_size(ghost), 0);
    }

    #[test]
    fn test_apply_listing_refresh_keeps_surviving_subtrees() {
        let dir = fixture();
        let (mut tree, _) = FileCrawler::default().scan_with_progress(dir.path(), None);
        let root = tree.root();
        let sub = tree.get_node(&dir.path().join("sub")).unwrap();
        assert_eq!(tree.total_size(), 1007);

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        fs::write(dir.path().join("b.log"), vec![0u8; 30]).unwrap();
        fs::write(dir.path().join("new.md"), vec![0u8; 5]).unwrap();

        let listing = read_listing(dir.path(), &ScanOptions::default());
        apply_listing(&mut tree, root, listing);

        // sub kept its node id and everything below it.
        assert_eq!(tree.get_node(&dir.path().join("sub")), Some(sub));
        assert!(tree.is_scanned(sub));
        assert!(tree.get_node(&dir.path().join("a.txt")).is_none());
        assert_eq!(tree.total_size(), 607 + 30 + 5);
        assert_eq!(tree.extension_stats(root).get(".md").map(|s| s.count), Some(1));
    }

    #[test]
    fn test_apply_listing_replaces_kind_changes() {
        let dir = fixture();
        let mut tree = FileTree::new(dir.path());
        let root = tree.root();
        expand(&mut tree, root, &ScanOptions::default());

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        fs::create_dir(dir.path().join("a.txt")).unwrap();

        let listing = read_listing(dir.path(), &ScanOptions::default());
        apply_listing(&mut tree, root, listing);

        let replaced = tree.get_node(&dir.path().join("a.txt")).unwrap();
        assert!(tree.is_dir(replaced));
        assert!(!tree.is_scanned(replaced));
        assert_eq!(tree.total_size(), 300);
    }
}
