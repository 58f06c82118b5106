//! Snapshot persistence.
//!
//! The whole store is exported as one binary image and written to durable
//! key-value storage under a single key. Writes are explicit: callers
//! `schedule()` after every mutation that matters, and overlapping schedules
//! collapse into one writer that keeps going while the store is dirty.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, warn};

use crate::Database;

/// Storage key holding the store image.
pub const SNAPSHOT_KEY: &str = "ember.snapshot";

/// Durable client-side key-value storage.
pub trait SnapshotStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// In-memory storage for tests and ephemeral sessions.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self.data.read().map_err(|e| anyhow!("storage lock poisoned: {}", e))?;
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut data = self.data.write().map_err(|e| anyhow!("storage lock poisoned: {}", e))?;
        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// One file per key inside a directory. Writes go to a temp file first and
/// are renamed into place, so a crash mid-write leaves the previous image.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl SnapshotStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{}.tmp", key));
        fs::write(&tmp, value).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }
}

/// How the store came up at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No snapshot existed; a new store was created.
    Fresh,
    /// The snapshot was restored and migrated.
    Restored,
    /// The snapshot was unreadable and was replaced by an empty store.
    Recovered,
}

pub struct Persister {
    db: Arc<Database>,
    storage: Arc<dyn SnapshotStorage>,
    key: String,
    outcome: LoadOutcome,
    dirty: AtomicBool,
    in_flight: AtomicBool,
    write_lock: Mutex<()>,
}

impl Persister {
    /// Bring the store up from `storage`. Never fails on a bad snapshot:
    /// a corrupt image is discarded in favour of an empty store.
    pub fn load(storage: Arc<dyn SnapshotStorage>, key: &str) -> Result<Arc<Self>> {
        let (db, outcome) = match storage.get(key)? {
            None => (Database::open_in_memory()?, LoadOutcome::Fresh),
            Some(image) => match Database::from_image(&image) {
                Ok(db) => (db, LoadOutcome::Restored),
                Err(e) => {
                    warn!("Discarding unreadable snapshot '{}' ({} bytes): {}", key, image.len(), e);
                    (Database::open_in_memory()?, LoadOutcome::Recovered)
                }
            },
        };

        let persister = Arc::new(Self {
            db: Arc::new(db),
            storage,
            key: key.to_string(),
            outcome,
            dirty: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        });

        if outcome != LoadOutcome::Restored {
            persister.persist()?;
        }

        info!("Store ready ({:?})", outcome);
        Ok(persister)
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn outcome(&self) -> LoadOutcome {
        self.outcome
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Export and write the image now. Concurrent callers queue on the write lock.
    pub fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(|e| anyhow!("persist lock poisoned: {}", e))?;
        self.write_image()
    }

    /// Write only if something changed since the last successful write. Waits
    /// for a background write in progress, so the image is current on return.
    pub fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(|e| anyhow!("persist lock poisoned: {}", e))?;
        if self.is_dirty() { self.write_image() } else { Ok(()) }
    }

    // Caller holds write_lock.
    fn write_image(&self) -> Result<()> {
        self.dirty.store(false, Ordering::Release);

        let result = self
            .db
            .export_image()
            .and_then(|image| self.storage.put(&self.key, &image).map(|_| image.len()));

        match result {
            Ok(len) => {
                debug!("Persisted {} byte snapshot to '{}'", len, self.key);
                Ok(())
            }
            Err(e) => {
                // Leave the store dirty so the next mutation retries.
                self.dirty.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Mark the store dirty and make sure a writer is running. Returns
    /// immediately; without a tokio runtime the write happens inline.
    pub fn schedule(self: &Arc<Self>) {
        self.dirty.store(true, Ordering::Release);

        if self.in_flight.swap(true, Ordering::AcqRel) {
            // The running writer will pick up this change.
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = Arc::clone(self);
                handle.spawn_blocking(move || this.drain());
            }
            Err(_) => self.drain(),
        }
    }

    fn drain(&self) {
        loop {
            while self.dirty.load(Ordering::Acquire) {
                if let Err(e) = self.persist() {
                    error!("Snapshot write failed, will retry on next change: {:#}", e);
                    self.in_flight.store(false, Ordering::Release);
                    return;
                }
            }

            self.in_flight.store(false, Ordering::Release);

            // A schedule() that raced with the release above saw in_flight=true
            // and returned; take the work back if nobody else has.
            if !self.dirty.load(Ordering::Acquire) || self.in_flight.swap(true, Ordering::AcqRel) {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStorage {
        inner: MemoryStorage,
        fail: AtomicBool,
    }

    impl SnapshotStorage for FailingStorage {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &[u8]) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow!("disk full"));
            }
            self.inner.put(key, value)
        }
    }

    fn insert_peer(db: &Database, id: &str) {
        db.execute(
            "INSERT INTO directory (id, name, status, updated_at) VALUES (?1, ?1, 'online', 1)",
            [id],
        )
        .unwrap();
    }

    fn peer_count(db: &Database) -> i64 {
        db.query_one::<i64, _>("SELECT COUNT(*) FROM directory", []).unwrap().unwrap()
    }

    #[test]
    fn first_start_creates_and_persists() {
        let storage = MemoryStorage::new();
        let persister = Persister::load(Arc::new(storage.clone()), SNAPSHOT_KEY).unwrap();

        assert_eq!(persister.outcome(), LoadOutcome::Fresh);
        assert!(storage.get(SNAPSHOT_KEY).unwrap().is_some());
    }

    #[test]
    fn restart_restores_written_rows() {
        let storage = MemoryStorage::new();
        let persister = Persister::load(Arc::new(storage.clone()), SNAPSHOT_KEY).unwrap();
        insert_peer(persister.db(), "p1");
        persister.schedule();

        let reopened = Persister::load(Arc::new(storage), SNAPSHOT_KEY).unwrap();
        assert_eq!(reopened.outcome(), LoadOutcome::Restored);
        assert_eq!(peer_count(reopened.db()), 1);
    }

    #[test]
    fn corrupt_snapshot_falls_back_to_empty_store() {
        let storage = MemoryStorage::new();
        storage.put(SNAPSHOT_KEY, b"\x00\x01garbage-not-sqlite").unwrap();

        let persister = Persister::load(Arc::new(storage.clone()), SNAPSHOT_KEY).unwrap();
        assert_eq!(persister.outcome(), LoadOutcome::Recovered);
        assert_eq!(peer_count(persister.db()), 0);

        insert_peer(persister.db(), "p1");
        persister.persist().unwrap();

        let reopened = Persister::load(Arc::new(storage), SNAPSHOT_KEY).unwrap();
        assert_eq!(reopened.outcome(), LoadOutcome::Restored);
        assert_eq!(peer_count(reopened.db()), 1);
    }

    #[test]
    fn failed_write_is_retried_on_next_change() {
        let storage = Arc::new(FailingStorage {
            inner: MemoryStorage::new(),
            fail: AtomicBool::new(false),
        });
        let persister = Persister::load(storage.clone(), SNAPSHOT_KEY).unwrap();

        storage.fail.store(true, Ordering::SeqCst);
        insert_peer(persister.db(), "p1");
        persister.schedule();
        assert!(persister.is_dirty());

        storage.fail.store(false, Ordering::SeqCst);
        insert_peer(persister.db(), "p2");
        persister.schedule();
        assert!(!persister.is_dirty());

        let reopened = Persister::load(storage, SNAPSHOT_KEY).unwrap();
        assert_eq!(peer_count(reopened.db()), 2);
    }

    #[tokio::test]
    async fn scheduled_writes_coalesce_and_land() {
        let storage = MemoryStorage::new();
        let persister = Persister::load(Arc::new(storage.clone()), SNAPSHOT_KEY).unwrap();

        for i in 0..20 {
            insert_peer(persister.db(), &format!("p{}", i));
            persister.schedule();
        }
        // Whatever the background writer has done, a flush settles it.
        persister.flush().unwrap();

        let reopened = Persister::load(Arc::new(storage), SNAPSHOT_KEY).unwrap();
        assert_eq!(peer_count(reopened.db()), 20);
    }

    #[test]
    fn file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("data")).unwrap();
        assert!(storage.get("k").unwrap().is_none());
        storage.put("k", b"v1").unwrap();
        storage.put("k", b"v2").unwrap();
        assert_eq!(storage.get("k").unwrap().unwrap(), b"v2");
    }
}
