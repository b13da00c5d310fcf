use dashmap::DashSet;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;

/// Recursive filesystem watcher that remembers which directories changed.
///
/// Consumers poll [`ChangeWatcher::drain`] and re-list each returned
/// directory with [`crate::crawler::read_listing`].
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
    dirty: Arc<DashSet<PathBuf>>,
}

impl ChangeWatcher {
    pub fn new(root: &Path) -> Result<Self> {
        let dirty = Arc::new(DashSet::new());
        let sink = Arc::clone(&dirty);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => record_event(&sink, &event),
            Err(err) => warn!("watch error: {}", err),
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        debug!("watching {}", root.display());

        Ok(Self {
            _watcher: watcher,
            dirty,
        })
    }

    /// Directories whose listing changed since the last call.
    pub fn drain(&self) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        self.dirty.retain(|path| {
            changed.push(path.clone());
            false
        });
        changed.sort();
        changed
    }

    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty()
    }
}

fn record_event(dirty: &DashSet<PathBuf>, event: &Event) {
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }
    for path in &event.paths {
        if let Some(parent) = path.parent() {
            dirty.insert(parent.to_path_buf());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind};
    use std::time::{Duration, Instant};

    #[test]
    fn test_events_mark_parent_directories() {
        let dirty = DashSet::new();
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/data/sub/new.txt"))
            .add_path(PathBuf::from("/data/other.txt"));
        record_event(&dirty, &event);

        assert!(dirty.contains(Path::new("/data/sub")));
        assert!(dirty.contains(Path::new("/data")));
        assert_eq!(dirty.len(), 2);

        let access = Event::new(EventKind::Access(AccessKind::Any)).add_path(PathBuf::from("/x/y"));
        record_event(&dirty, &access);
        assert_eq!(dirty.len(), 2);
    }

    #[test]
    fn test_watcher_reports_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let Ok(watcher) = ChangeWatcher::new(&root) else {
            // No notification backend in this environment.
            return;
        };

        std::fs::write(root.join("fresh.txt"), b"hello").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !watcher.has_changes() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        let changed = watcher.drain();
        assert!(changed.contains(&root));
        assert!(!watcher.has_changes());
    }
}
