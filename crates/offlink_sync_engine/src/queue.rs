//! Offline mutation queue.
//!
//! Writes made while disconnected are appended here and replayed in FIFO
//! order on reconnect. The in-memory list is authoritative; a
//! [`QueueStore`] mirrors it so pending writes survive a restart.

use crate::error::QueueResult;
use offlink_protocol::{Operation, QueuedMutation, Tag};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persistence backend for the offline queue.
pub trait QueueStore: Send + Sync {
    /// Loads all persisted entries in submission order.
    fn load(&self) -> QueueResult<Vec<QueuedMutation>>;

    /// Persists one newly pushed entry.
    fn append(&self, entry: &QueuedMutation) -> QueueResult<()>;

    /// Replaces the persisted contents with `entries`.
    fn rewrite(&self, entries: &[QueuedMutation]) -> QueueResult<()>;
}

/// A store that keeps nothing. Pending writes are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryQueueStore;

impl QueueStore for MemoryQueueStore {
    fn load(&self) -> QueueResult<Vec<QueuedMutation>> {
        Ok(Vec::new())
    }

    fn append(&self, _entry: &QueuedMutation) -> QueueResult<()> {
        Ok(())
    }

    fn rewrite(&self, _entries: &[QueuedMutation]) -> QueueResult<()> {
        Ok(())
    }
}

/// JSONL file store: one entry per line, fsynced on every write.
#[derive(Debug)]
pub struct JsonlQueueStore {
    path: PathBuf,
}

impl JsonlQueueStore {
    /// Creates or opens a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> QueueResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueueStore for JsonlQueueStore {
    fn load(&self) -> QueueResult<Vec<QueuedMutation>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    fn append(&self, entry: &QueuedMutation) -> QueueResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(entry)?)?;
        file.sync_all()?;
        Ok(())
    }

    /// Writes `entries` to a sibling temp file, then renames it over the
    /// live file so a crash mid-rewrite leaves the previous contents intact.
    fn rewrite(&self, entries: &[QueuedMutation]) -> QueueResult<()> {
        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path)?;
        for entry in entries {
            writeln!(file, "{}", serde_json::to_string(entry)?)?;
        }
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        self.sync_directory()?;
        Ok(())
    }
}

impl JsonlQueueStore {
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> QueueResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?,
            _ => File::open(".")?,
        };
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> QueueResult<()> {
        // NTFS journals the rename itself
        Ok(())
    }
}

/// FIFO queue of writes recorded while offline.
///
/// # Invariants
///
/// - `get_all` returns entries in the exact order they were pushed
/// - An entry disappears only through `remove` (after a confirmed replay)
///   or `clear` (session termination)
/// - No deduplication and no expiry
pub struct OfflineQueue {
    entries: Mutex<VecDeque<QueuedMutation>>,
    store: Box<dyn QueueStore>,
}

impl OfflineQueue {
    /// Creates a queue that is not persisted.
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            store: Box::new(MemoryQueueStore),
        }
    }

    /// Opens a queue backed by `store`, restoring any persisted entries.
    pub fn open(store: impl QueueStore + 'static) -> QueueResult<Self> {
        let restored = store.load()?;
        if !restored.is_empty() {
            debug!(count = restored.len(), "restored offline queue");
        }
        Ok(Self {
            entries: Mutex::new(restored.into()),
            store: Box::new(store),
        })
    }

    /// Appends a new entry and returns a copy of it.
    ///
    /// Never fails: if the store cannot be written the entry is still
    /// queued in memory.
    pub fn push(&self, operation: Operation, variables: Value, tags: Option<Vec<Tag>>) -> QueuedMutation {
        let entry = QueuedMutation::new(operation, variables, tags);
        let mut entries = self.entries.lock();
        if let Err(e) = self.store.append(&entry) {
            warn!(id = %entry.id, error = %e, "failed to persist queued mutation");
        }
        entries.push_back(entry.clone());
        debug!(id = %entry.id, operation = %operation, len = entries.len(), "queued offline mutation");
        entry
    }

    /// Returns a snapshot of all entries in FIFO order.
    pub fn get_all(&self) -> Vec<QueuedMutation> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Returns the oldest entry without removing it.
    pub fn peek(&self) -> Option<QueuedMutation> {
        self.entries.lock().front().cloned()
    }

    /// Returns true if the entry with `id` is still pending.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().iter().any(|e| e.id == id)
    }

    /// Removes the entry with `id`. Returns false if it was not queued.
    pub fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.lock();
        let Some(index) = entries.iter().position(|e| e.id == id) else {
            return false;
        };
        entries.remove(index);
        if let Err(e) = self.store.rewrite(entries.make_contiguous()) {
            warn!(id, error = %e, "failed to persist queue removal");
        }
        debug!(id, len = entries.len(), "removed offline mutation");
        true
    }

    /// Drops every pending entry.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        if let Err(e) = self.store.rewrite(&[]) {
            warn!(error = %e, "failed to persist queue clear");
        }
        if dropped > 0 {
            debug!(dropped, "cleared offline queue");
        }
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn fifo_order() {
        let queue = OfflineQueue::in_memory();
        let a = queue.push(Operation::UserUpdateProfile, json!({"n": "a"}), None);
        let b = queue.push(Operation::UserUpdateProfile, json!({"n": "b"}), None);
        let c = queue.push(Operation::UserUploadAvatar, json!({"n": "c"}), None);

        let ids: Vec<_> = queue.get_all().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        assert_eq!(queue.peek().unwrap().variables, json!({"n": "a"}));
    }

    #[test]
    fn snapshot_is_detached() {
        let queue = OfflineQueue::in_memory();
        queue.push(Operation::UserUpdateProfile, json!(1), None);
        let mut snapshot = queue.get_all();
        snapshot.clear();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_and_clear() {
        let queue = OfflineQueue::in_memory();
        let a = queue.push(Operation::UserUpdateProfile, json!(1), None);
        let b = queue.push(Operation::UserUpdateProfile, json!(2), Some(vec!["user:me".into()]));

        assert!(queue.contains(&a.id));
        assert!(queue.remove(&a.id));
        assert!(!queue.remove(&a.id));
        assert!(!queue.contains(&a.id));
        assert_eq!(queue.get_all(), vec![b]);

        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn tags_are_copied() {
        let queue = OfflineQueue::in_memory();
        let mut tags = vec![Tag::from("user:me")];
        queue.push(Operation::UserUpdateProfile, json!({}), Some(tags.clone()));
        tags.push(Tag::from("user:list"));
        assert_eq!(queue.get_all()[0].tags(), &[Tag::from("user:me")]);
    }

    #[test]
    fn jsonl_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("queue.jsonl");

        let (a, c) = {
            let queue = OfflineQueue::open(JsonlQueueStore::open(&path).unwrap()).unwrap();
            let a = queue.push(Operation::UserUpdateProfile, json!({"n": 1}), None);
            let b = queue.push(Operation::UserUpdateProfile, json!({"n": 2}), None);
            let c = queue.push(Operation::UserUpdateProfile, json!({"n": 3}), Some(vec!["user:me".into()]));
            assert!(queue.remove(&b.id));
            (a, c)
        };

        let reopened = OfflineQueue::open(JsonlQueueStore::open(&path).unwrap()).unwrap();
        assert_eq!(reopened.get_all(), vec![a, c]);

        reopened.clear();
        let again = OfflineQueue::open(JsonlQueueStore::open(&path).unwrap()).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn interrupted_rewrite_keeps_previous_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.jsonl");

        let pending = {
            let queue = OfflineQueue::open(JsonlQueueStore::open(&path).unwrap()).unwrap();
            queue.push(Operation::UserUpdateProfile, json!({"n": 1}), None);
            queue.push(Operation::UserUpdateProfile, json!({"n": 2}), None);
            queue.get_all()
        };

        // A crash after the temp file was started but before the rename.
        let temp = dir.path().join("queue.jsonl.tmp");
        std::fs::write(&temp, "{\"id\":").unwrap();

        let reopened = OfflineQueue::open(JsonlQueueStore::open(&path).unwrap()).unwrap();
        assert_eq!(reopened.get_all(), pending);

        assert!(reopened.remove(&pending[0].id));
        assert!(!temp.exists());
        let again = OfflineQueue::open(JsonlQueueStore::open(&path).unwrap()).unwrap();
        assert_eq!(again.get_all(), vec![pending[1].clone()]);
    }

    #[test]
    fn jsonl_store_rejects_corrupt_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();

        let store = JsonlQueueStore::open(&path).unwrap();
        assert!(matches!(
            OfflineQueue::open(store),
            Err(crate::error::QueueError::Serialization(_))
        ));
    }
}
