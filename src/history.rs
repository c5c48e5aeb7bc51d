//! "Continue watching" history.
//!
//! A bounded, most-recent-first list of [`HistoryEntry`] kept as one JSON blob
//! under [`HISTORY_KEY`]. Re-watching a title moves it to the front; the list
//! never grows past [`HISTORY_LIMIT`] and the oldest entries fall off the end.
//!
//! Every mutation is a read-modify-write of that single slot. Operations are
//! serialised inside one process, but two processes sharing the same storage
//! still race and the last writer wins.
//!
//! None of the operations report errors to the caller. Storage and
//! serialization failures are logged and the call becomes a no-op.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    catalog::{CatalogItem, HistoryEntry},
    storage::KeyValueStorage,
};

pub const HISTORY_KEY: &str = "moviebox-history";
pub const HISTORY_LIMIT: usize = 50;

/// Change notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    Added(String),
    Removed(String),
    Cleared,
}

type Listener = Arc<dyn Fn(&HistoryEvent) + Send + Sync>;
type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener)>>,
}

impl Listeners {
    fn emit(&self, event: HistoryEvent) {
        // Snapshot so a listener may (un)subscribe while being notified.
        let snapshot: Vec<Listener> = self
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(&event);
        }
    }
}

/// Handle returned by [`HistoryStore::subscribe`]. Dropping it, or calling
/// [`Subscription::unsubscribe`], detaches the listener.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.entries.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct HistoryStore {
    storage: Option<Arc<dyn KeyValueStorage>>,
    listeners: Arc<Listeners>,
    write_lock: Mutex<()>,
    clock: Clock,
}

impl HistoryStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage: Some(storage),
            listeners: Arc::new(Listeners::default()),
            write_lock: Mutex::new(()),
            clock: Box::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    /// A store with no durable storage behind it, e.g. while rendering on a
    /// server. Reads are empty, writes do nothing and nobody is notified.
    pub fn detached() -> Self {
        Self {
            storage: None,
            listeners: Arc::new(Listeners::default()),
            write_lock: Mutex::new(()),
            clock: Box::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Replaces the timestamp source (epoch milliseconds).
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn is_attached(&self) -> bool {
        self.storage.is_some()
    }

    /// Registers a listener called synchronously after each successful change.
    /// Events are not queued or replayed for late subscribers.
    pub fn subscribe(
        &self,
        listener: impl Fn(&HistoryEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.entries.lock().push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Current entries, most recent first. Missing or unreadable data yields
    /// an empty list.
    pub fn get_history(&self) -> Vec<HistoryEntry> {
        match &self.storage {
            Some(storage) => read_entries(storage.as_ref()),
            None => Vec::new(),
        }
    }

    /// Records `item` as just watched: drops any previous entry with the same
    /// id, puts the new one in front and trims the tail to the limit.
    pub fn add_to_history(&self, item: &CatalogItem) {
        let Some(storage) = &self.storage else {
            return;
        };
        let guard = self.write_lock.lock();

        let mut entries = read_entries(storage.as_ref());
        entries.retain(|entry| entry.subject_id() != item.subject_id);
        entries.insert(
            0,
            HistoryEntry {
                item: item.clone(),
                timestamp: (self.clock)(),
            },
        );
        entries.truncate(HISTORY_LIMIT);

        let saved = write_entries(storage.as_ref(), &entries);
        drop(guard);

        if saved {
            debug!(subject_id = %item.subject_id, len = entries.len(), "history entry recorded");
            self.listeners
                .emit(HistoryEvent::Added(item.subject_id.clone()));
        }
    }

    /// Removes the entry for `subject_id`; absent ids are not an error.
    pub fn remove_from_history(&self, subject_id: &str) {
        let Some(storage) = &self.storage else {
            return;
        };
        let guard = self.write_lock.lock();

        let mut entries = read_entries(storage.as_ref());
        entries.retain(|entry| entry.subject_id() != subject_id);
        let saved = write_entries(storage.as_ref(), &entries);
        drop(guard);

        if saved {
            self.listeners
                .emit(HistoryEvent::Removed(subject_id.to_owned()));
        }
    }

    /// Deletes the storage slot entirely.
    pub fn clear_history(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let guard = self.write_lock.lock();
        let deleted = match storage.delete(HISTORY_KEY) {
            Ok(()) => true,
            Err(err) => {
                error!(key = HISTORY_KEY, error = %err, "failed to clear history");
                false
            }
        };
        drop(guard);

        if deleted {
            self.listeners.emit(HistoryEvent::Cleared);
        }
    }
}

fn read_entries(storage: &dyn KeyValueStorage) -> Vec<HistoryEntry> {
    let bytes = match storage.get(HISTORY_KEY) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Vec::new(),
        Err(err) => {
            warn!(key = HISTORY_KEY, error = %err, "failed to read history");
            return Vec::new();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(key = HISTORY_KEY, error = %err, "discarding unreadable history");
            Vec::new()
        }
    }
}

fn write_entries(storage: &dyn KeyValueStorage, entries: &[HistoryEntry]) -> bool {
    let bytes = match serde_json::to_vec(entries) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(key = HISTORY_KEY, error = %err, "failed to serialize history");
            return false;
        }
    };
    match storage.set(HISTORY_KEY, &bytes) {
        Ok(()) => true,
        Err(err) => {
            error!(key = HISTORY_KEY, error = %err, "failed to save history");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, SqliteStorage, StorageError, StorageResult};
    use std::sync::atomic::AtomicI64;
    use tempfile::tempdir;

    fn item(id: &str) -> CatalogItem {
        CatalogItem {
            subject_id: id.into(),
            title: format!("Title {id}"),
            ..Default::default()
        }
    }

    /// Store over fresh memory storage with a clock that ticks by one per call.
    fn ticking_store() -> (HistoryStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let tick = AtomicI64::new(1_000);
        let store = HistoryStore::new(storage.clone())
            .with_clock(move || tick.fetch_add(1, Ordering::SeqCst));
        (store, storage)
    }

    fn ids(store: &HistoryStore) -> Vec<String> {
        store
            .get_history()
            .into_iter()
            .map(|entry| entry.item.subject_id)
            .collect()
    }

    #[test]
    fn empty_storage_reads_as_empty_history() {
        let (store, _) = ticking_store();
        assert!(store.get_history().is_empty());
    }

    #[test]
    fn corrupt_payload_reads_as_empty_history() {
        let (store, storage) = ticking_store();
        storage.set(HISTORY_KEY, b"{not json").unwrap();
        assert!(store.get_history().is_empty());

        store.add_to_history(&item("a"));
        assert_eq!(ids(&store), vec!["a"]);
    }

    #[test]
    fn added_item_is_first_and_unique() {
        let (store, _) = ticking_store();
        for id in ["a", "b", "c", "b"] {
            store.add_to_history(&item(id));
            let history = store.get_history();
            assert_eq!(history[0].item.subject_id, id);
            assert_eq!(
                history.iter().filter(|e| e.item.subject_id == id).count(),
                1
            );
        }
        assert_eq!(ids(&store), vec!["b", "c", "a"]);
    }

    #[test]
    fn rewatch_moves_to_front_and_refreshes_timestamp() {
        let (store, _) = ticking_store();
        store.add_to_history(&CatalogItem {
            title: "X".into(),
            ..item("A")
        });
        store.add_to_history(&item("B"));
        let before = store.get_history();
        let b_before = before[0].clone();
        let a_before = before[1].timestamp;

        store.add_to_history(&item("A"));
        let after = store.get_history();
        assert_eq!(ids(&store), vec!["A", "B"]);
        assert!(after[0].timestamp > a_before);
        assert_eq!(after[1], b_before);
    }

    #[test]
    fn history_never_exceeds_limit_and_evicts_oldest() {
        let (store, _) = ticking_store();
        for n in 0..=HISTORY_LIMIT {
            store.add_to_history(&item(&format!("id-{n}")));
            assert!(store.get_history().len() <= HISTORY_LIMIT);
        }

        let history = ids(&store);
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert!(!history.contains(&"id-0".to_string()));
        let expected: Vec<String> = (1..=HISTORY_LIMIT)
            .rev()
            .map(|n| format!("id-{n}"))
            .collect();
        assert_eq!(history, expected);
    }

    #[test]
    fn removing_missing_id_leaves_list_unchanged() {
        let (store, _) = ticking_store();
        store.add_to_history(&item("a"));
        store.add_to_history(&item("b"));
        let before = store.get_history();

        store.remove_from_history("zzz");
        assert_eq!(store.get_history(), before);

        store.remove_from_history("a");
        assert_eq!(ids(&store), vec!["b"]);
    }

    #[test]
    fn clear_then_get_is_empty() {
        let (store, storage) = ticking_store();
        store.add_to_history(&item("a"));
        store.clear_history();
        assert!(store.get_history().is_empty());
        assert!(storage.get(HISTORY_KEY).unwrap().is_none());
    }

    #[test]
    fn failed_write_is_swallowed_and_not_announced() {
        let storage = Arc::new(MemoryStorage::with_quota(8));
        let store = HistoryStore::new(storage);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = store.subscribe(move |event| sink.lock().push(event.clone()));

        store.add_to_history(&item("a"));
        assert!(store.get_history().is_empty());
        assert!(events.lock().is_empty());
    }

    /// Memory slots whose delete always fails.
    struct StickyStorage(MemoryStorage);

    impl KeyValueStorage for StickyStorage {
        fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
            self.0.set(key, value)
        }

        fn delete(&self, _key: &str) -> StorageResult<()> {
            Err(StorageError::Directory {
                path: "/read-only".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        }
    }

    #[test]
    fn failed_clear_keeps_entries_and_is_not_announced() {
        let store = HistoryStore::new(Arc::new(StickyStorage(MemoryStorage::new())));
        store.add_to_history(&item("a"));

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = store.subscribe(move |event| sink.lock().push(event.clone()));

        store.clear_history();
        assert_eq!(ids(&store), vec!["a"]);
        assert!(events.lock().is_empty());
    }

    #[test]
    fn listeners_receive_events_until_unsubscribed() {
        let (store, _) = ticking_store();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let sub = store.subscribe(move |event| sink.lock().push(event.clone()));

        store.add_to_history(&item("a"));
        store.remove_from_history("a");
        store.clear_history();
        sub.unsubscribe();
        store.add_to_history(&item("b"));

        assert_eq!(
            *events.lock(),
            vec![
                HistoryEvent::Added("a".into()),
                HistoryEvent::Removed("a".into()),
                HistoryEvent::Cleared,
            ]
        );
    }

    #[test]
    fn detached_store_is_inert() {
        let store = HistoryStore::detached();
        let events = Arc::new(Mutex::new(0usize));
        let sink = events.clone();
        let _sub = store.subscribe(move |_| *sink.lock() += 1);

        store.add_to_history(&item("a"));
        store.remove_from_history("a");
        store.clear_history();
        assert!(!store.is_attached());
        assert!(store.get_history().is_empty());
        assert_eq!(*events.lock(), 0);
    }

    #[test]
    fn history_survives_sqlite_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let store = HistoryStore::new(Arc::new(SqliteStorage::open(&path).unwrap()));
            store.add_to_history(&item("a"));
            store.add_to_history(&item("b"));
        }
        let store = HistoryStore::new(Arc::new(SqliteStorage::open(&path).unwrap()));
        assert_eq!(ids(&store), vec!["b", "a"]);
    }
}
