//! Table layout and versioned schema upgrades.
//!
//! The schema version lives in the `memory_meta` table. [`upgrade`] runs once
//! at store open and walks the version forward one step at a time, each step
//! in its own write transaction:
//!
//! - **0 → 1**: create the entries, events and meta tables. A version-0 file
//!   may already hold an entries table written before versioning existed.
//! - **1 → 2**: backfill the `placeholder` of legacy rows that predate it.
//!   Rows that don't decode are logged and left as they are.

use crate::context::compaction::render_placeholder;
use crate::error::Result;
use crate::store::entry::MemoryEntry;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableError};
use tracing::{debug, info, warn};

/// Primary table: memory id -> serialized [`MemoryEntry`] JSON.
pub const ENTRIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("memory_entries");

/// Append-only audit log: sequence number -> serialized compaction event JSON.
pub const EVENTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("compaction_events");

/// Store metadata (schema version).
pub const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("memory_meta");

pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Current schema version.
pub const SCHEMA_VERSION: u64 = 2;

/// Read the recorded schema version. `None` when the meta table is absent.
pub fn read_version(db: &Database) -> Result<Option<u64>> {
    let txn = db.begin_read()?;
    let table = match txn.open_table(META_TABLE) {
        Ok(t) => t,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(table.get(SCHEMA_VERSION_KEY)?.map(|v| v.value()))
}

/// Whether the file carries any sign of our schema (meta or entries table).
pub fn has_schema(db: &Database) -> Result<bool> {
    if read_version(db)?.is_some() {
        return Ok(true);
    }
    let txn = db.begin_read()?;
    match txn.open_table(ENTRIES_TABLE) {
        Ok(_) => Ok(true),
        Err(TableError::TableDoesNotExist(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Bring the database up to [`SCHEMA_VERSION`]. Returns the final version.
pub fn upgrade(db: &Database) -> Result<u64> {
    let mut version = read_version(db)?.unwrap_or(0);
    let start = version;

    while version < SCHEMA_VERSION {
        match version {
            0 => create_tables(db)?,
            1 => backfill_placeholders(db)?,
            _ => {}
        }
        version += 1;
        write_version(db, version)?;
        debug!("Memory store schema upgraded to v{version}");
    }

    if start < version {
        info!("Memory store schema upgraded from v{start} to v{version}");
    }
    Ok(version)
}

fn write_version(db: &Database, version: u64) -> Result<()> {
    let txn = db.begin_write()?;
    {
        let mut meta = txn.open_table(META_TABLE)?;
        meta.insert(SCHEMA_VERSION_KEY, version)?;
    }
    txn.commit()?;
    Ok(())
}

fn create_tables(db: &Database) -> Result<()> {
    let txn = db.begin_write()?;
    txn.open_table(ENTRIES_TABLE)?;
    txn.open_table(EVENTS_TABLE)?;
    txn.open_table(META_TABLE)?;
    txn.commit()?;
    Ok(())
}

fn backfill_placeholders(db: &Database) -> Result<()> {
    let txn = db.begin_write()?;
    let mut fixed = 0usize;
    {
        let mut table = txn.open_table(ENTRIES_TABLE)?;
        let mut legacy = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            match MemoryEntry::from_bytes(value.value()) {
                Ok(entry) if entry.placeholder.is_empty() => legacy.push(entry),
                Ok(_) => {}
                Err(e) => warn!("Leaving unreadable legacy entry {} as is: {e}", key.value()),
            }
        }
        for mut entry in legacy {
            entry.placeholder = render_placeholder(&entry.id, &entry.summary);
            table.insert(entry.id.as_str(), entry.to_bytes()?.as_slice())?;
            fixed += 1;
        }
    }
    txn.commit()?;
    if fixed > 0 {
        info!("Backfilled placeholders for {fixed} legacy memory entries");
    }
    Ok(())
}
