//! Durable memory store backed by [redb](https://docs.rs/redb).
//!
//! Holds every [`MemoryEntry`] produced by compaction, keyed by ID, plus an
//! append-only log of [`CompactionEvent`]s. Every operation runs in its own
//! transaction and nothing is cached in process, so a crash never loses more
//! than the operation in flight. Entries are never deleted.
//!
//! Opening a store recovers from corruption on its own: a zero-byte file, a
//! file redb rejects as corrupt or not a database, or a file without our
//! schema is repaired if possible and otherwise recreated from scratch. The
//! placeholder text in the live conversation keeps each summary, so a lost
//! store only costs the ability to recall full detail.
//!
//! Anything else is returned to the caller and the file is left alone. In
//! particular a store that another process (or another handle in this one)
//! holds open fails with [`MemoryError::Storage`]; it is never recreated.

pub mod entry;
pub mod schema;

pub use entry::{CompactionEvent, MemoryEntry, new_memory_id};

use crate::error::{MemoryError, Result};
use redb::{
    Database, DatabaseError, ReadableDatabase, ReadableTable, ReadableTableMetadata, StorageError,
};
use schema::{ENTRIES_TABLE, EVENTS_TABLE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Snapshot returned by [`MemoryStore::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_entries: usize,
    pub pinned_entries: usize,
    /// Most recently accessed entries, newest first.
    pub recent: Vec<MemoryEntry>,
}

/// Durable keyed storage for memory entries and compaction events.
pub struct MemoryStore {
    db: Database,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Open (or create) the store at `path`, recovering from corruption.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let db = match open_checked(path) {
            Ok(db) => db,
            Err(MemoryError::StoreCorrupted(reason)) => {
                warn!(
                    "Memory store at {} is corrupted ({reason}); recreating it",
                    path.display()
                );
                recreate(path)?
            }
            Err(e) => return Err(e),
        };

        let store = match Self::from_database(db, Some(path.to_path_buf())) {
            Ok(store) => store,
            Err(
                e @ (MemoryError::StoreCorrupted(_)
                | MemoryError::Serialization(_)
                | MemoryError::DeserializationFailed(_)),
            ) => {
                warn!(
                    "Memory store at {} failed its schema upgrade ({e}); recreating it",
                    path.display()
                );
                Self::from_database(recreate(path)?, Some(path.to_path_buf()))?
            }
            Err(e) => return Err(e),
        };
        debug!("Opened memory store at {}", path.display());
        Ok(store)
    }

    /// Open a store that lives only in memory (tests, dry runs).
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::from_database(db, None)
    }

    fn from_database(db: Database, path: Option<PathBuf>) -> Result<Self> {
        schema::upgrade(&db)?;
        Ok(Self { db, path })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ── Entries ──────────────────────────────────────────────────────

    /// Insert or replace an entry by ID.
    pub fn put(&self, entry: &MemoryEntry) -> Result<()> {
        let bytes = entry.to_bytes()?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES_TABLE)?;
            table.insert(entry.id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        debug!("Stored memory entry {}", entry.id);
        Ok(())
    }

    /// Read an entry without modifying it.
    pub fn get(&self, id: &str) -> Result<MemoryEntry> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES_TABLE)?;
        let bytes = table
            .get(id)?
            .map(|v| v.value().to_vec())
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        MemoryEntry::from_bytes(&bytes)
    }

    /// Read an entry, apply `mutate` to it and write it back, all in one
    /// write transaction. Returns the entry as written.
    pub fn access<F>(&self, id: &str, mutate: F) -> Result<MemoryEntry>
    where
        F: FnOnce(&mut MemoryEntry),
    {
        let txn = self.db.begin_write()?;
        let entry = {
            let mut table = txn.open_table(ENTRIES_TABLE)?;
            let bytes = table
                .get(id)?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
            let mut entry = MemoryEntry::from_bytes(&bytes)?;
            mutate(&mut entry);
            table.insert(id, entry.to_bytes()?.as_slice())?;
            entry
        };
        txn.commit()?;
        Ok(entry)
    }

    /// Pin or unpin an entry.
    ///
    /// Pinning a currently unpinned entry fails with
    /// [`MemoryError::PinLimitExceeded`] when `max_pins` entries are already
    /// pinned; nothing is written in that case. Unpinning always succeeds.
    /// `last_access` is updated on success.
    pub fn pin(&self, id: &str, pin: bool, max_pins: usize) -> Result<MemoryEntry> {
        let txn = self.db.begin_write()?;
        let entry = {
            let mut table = txn.open_table(ENTRIES_TABLE)?;
            let bytes = table
                .get(id)?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
            let mut entry = MemoryEntry::from_bytes(&bytes)?;

            if pin && !entry.pinned {
                let pinned = count_pinned(&table)?;
                if pinned >= max_pins {
                    debug!("Refusing to pin {id}: {pinned} of {max_pins} pins in use");
                    return Err(MemoryError::PinLimitExceeded { max: max_pins });
                }
            }

            entry.pinned = pin;
            entry.touch();
            table.insert(id, entry.to_bytes()?.as_slice())?;
            entry
        };
        txn.commit()?;
        info!(
            "Memory entry {id} {}",
            if pin { "pinned" } else { "unpinned" }
        );
        Ok(entry)
    }

    /// Number of pinned entries.
    pub fn pinned_count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES_TABLE)?;
        count_pinned(&table)
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES_TABLE)?;
        Ok(table.len()? as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Totals plus the `limit` most recently accessed entries.
    pub fn stats(&self, limit: usize) -> Result<StoreStats> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES_TABLE)?;

        let mut entries = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            match MemoryEntry::from_bytes(value.value()) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping unreadable memory entry {}: {e}", key.value()),
            }
        }

        let total_entries = entries.len();
        let pinned_entries = entries.iter().filter(|e| e.pinned).count();
        entries.sort_by(|a, b| b.last_access.cmp(&a.last_access));
        entries.truncate(limit);

        Ok(StoreStats {
            total_entries,
            pinned_entries,
            recent: entries,
        })
    }

    // ── Compaction events ────────────────────────────────────────────

    /// Append a compaction event to the audit log.
    pub fn save_compaction_event(&self, event: &CompactionEvent) -> Result<()> {
        let bytes = serde_json::to_vec(event)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(EVENTS_TABLE)?;
            let next = table.last()?.map_or(0, |(k, _)| k.value() + 1);
            table.insert(next, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Load up to `limit` compaction events, most recent first.
    pub fn load_compaction_events(&self, limit: usize) -> Result<Vec<CompactionEvent>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EVENTS_TABLE)?;
        let mut events = Vec::new();
        for item in table.iter()?.rev().take(limit) {
            let (_, value) = item?;
            events.push(serde_json::from_slice(value.value())?);
        }
        Ok(events)
    }
}

/// The only field `count_pinned` needs. The rest of the row, including the
/// original messages, is skipped without being materialized.
#[derive(Deserialize)]
struct PinFlag {
    #[serde(default)]
    pinned: bool,
}

fn count_pinned(table: &impl ReadableTable<&'static str, &'static [u8]>) -> Result<usize> {
    let mut pinned = 0;
    for item in table.iter()? {
        let (key, value) = item?;
        match serde_json::from_slice::<PinFlag>(value.value()) {
            Ok(flag) if flag.pinned => pinned += 1,
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable memory entry {}: {e}", key.value()),
        }
    }
    Ok(pinned)
}

/// Map a redb open error to [`MemoryError::StoreCorrupted`] when it says the
/// file is damaged or not a redb file at all. Lock conflicts, permission
/// problems and other I/O failures keep their own variants.
fn classify_open_error(err: DatabaseError) -> MemoryError {
    match err {
        DatabaseError::Storage(StorageError::Corrupted(reason)) => {
            MemoryError::StoreCorrupted(reason)
        }
        DatabaseError::Storage(StorageError::Io(e))
            if matches!(
                e.kind(),
                std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof
            ) =>
        {
            MemoryError::StoreCorrupted(format!("not a redb file: {e}"))
        }
        DatabaseError::UpgradeRequired(version) => {
            MemoryError::StoreCorrupted(format!("unsupported redb file format v{version}"))
        }
        DatabaseError::RepairAborted => MemoryError::StoreCorrupted("repair aborted".into()),
        DatabaseError::Storage(StorageError::Io(e)) => MemoryError::Io(e),
        other => other.into(),
    }
}

/// Open `path`, classifying a damaged file as [`MemoryError::StoreCorrupted`].
fn open_checked(path: &Path) -> Result<Database> {
    let existing_len = std::fs::metadata(path).map(|m| m.len()).ok();
    if existing_len == Some(0) {
        return Err(MemoryError::StoreCorrupted("zero-byte file".into()));
    }

    let builder_path = path.display().to_string();
    let mut db = Database::builder()
        .set_repair_callback(move |session| {
            warn!(
                "Repairing memory store {builder_path}: {:.0}%",
                session.progress() * 100.0
            );
        })
        .create(path)
        .map_err(classify_open_error)?;

    // A pre-existing file must already carry our schema. Give redb one
    // integrity check and repair before giving up on it.
    if existing_len.is_some() && !schema::has_schema(&db)? {
        warn!(
            "Memory store at {} has no schema; checking integrity",
            path.display()
        );
        let repaired = db
            .check_integrity()
            .map_err(classify_open_error)?;
        debug!("Integrity check finished (clean: {repaired})");
        if !schema::has_schema(&db)? {
            return Err(MemoryError::StoreCorrupted("schema missing".into()));
        }
    }

    Ok(db)
}

/// Destroy whatever is at `path` and create an empty database there.
fn recreate(path: &Path) -> Result<Database> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let db = Database::create(path)?;
    info!("Recreated memory store at {}", path.display());
    Ok(db)
}
