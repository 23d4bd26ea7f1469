pub mod tables;

use redb::{Database, Error as RedbError, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use tables::RecordTable;

/// Database handle type (Arc-wrapped for sharing across handlers)
pub type Db = Arc<Database>;

pub const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

/// Open or create the redb database at the given path
///
/// Creates all required tables on first run.
#[allow(clippy::result_large_err)]
pub fn open_database(path: impl AsRef<Path>) -> std::result::Result<Db, RedbError> {
    tracing::info!("Opening database at: {:?}", path.as_ref());

    // Create parent directory if it doesn't exist
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                tracing::error!("Failed to create database directory: {}", e);
                RedbError::Io(e)
            })?;
        }
    }

    let db = Database::create(path)?;

    let write_txn = db.begin_write()?;
    for table in tables::ALL {
        let _ = write_txn.open_table(table)?;
    }
    write_txn.commit()?;

    tracing::info!("Database initialized successfully");

    Ok(Arc::new(db))
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(value, BINCODE_CONFIG)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, BINCODE_CONFIG)?;
    Ok(value)
}

/// Fetch and decode one record
pub fn get_record<T: DeserializeOwned>(db: &Database, table: RecordTable, key: &str) -> Result<Option<T>> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(table)?;
    match table.get(key)? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Insert or replace one record
pub fn put_record<T: Serialize>(db: &Database, table: RecordTable, key: &str, value: &T) -> Result<()> {
    let bytes = encode(value)?;
    let write_txn = db.begin_write()?;
    {
        let mut table = write_txn.open_table(table)?;
        table.insert(key, bytes.as_slice())?;
    }
    write_txn.commit()?;
    Ok(())
}

/// Read-modify-write one record inside a single write transaction.
/// Returns the updated record, or None when the key is absent.
pub fn update_record<T, F>(db: &Database, table: RecordTable, key: &str, f: F) -> Result<Option<T>>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut T) -> Result<()>,
{
    let write_txn = db.begin_write()?;
    let updated = {
        let mut table = write_txn.open_table(table)?;
        let current: Option<T> = match table.get(key)? {
            Some(guard) => Some(decode(guard.value())?),
            None => None,
        };
        match current {
            Some(mut record) => {
                f(&mut record)?;
                let bytes = encode(&record)?;
                table.insert(key, bytes.as_slice())?;
                Some(record)
            }
            None => None,
        }
    };
    write_txn.commit()?;
    Ok(updated)
}

/// Remove one record, returning whether it existed
pub fn remove_record(db: &Database, table: RecordTable, key: &str) -> Result<bool> {
    let write_txn = db.begin_write()?;
    let existed;
    {
        let mut table = write_txn.open_table(table)?;
        existed = table.remove(key)?.is_some();
    }
    write_txn.commit()?;
    Ok(existed)
}

/// Decode every record in key order
pub fn list_records<T: DeserializeOwned>(db: &Database, table: RecordTable) -> Result<Vec<T>> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(table)?;
    let mut records = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        records.push(decode(value.value())?);
    }
    Ok(records)
}

/// Decode records whose key starts with `prefix`
pub fn list_records_with_prefix<T: DeserializeOwned>(
    db: &Database,
    table: RecordTable,
    prefix: &str,
) -> Result<Vec<T>> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(table)?;
    let mut records = Vec::new();
    for entry in table.range(prefix..)? {
        let (key, value) = entry?;
        if !key.value().starts_with(prefix) {
            break;
        }
        records.push(decode(value.value())?);
    }
    Ok(records)
}

/// Decode records whose key sorts at or after `start`
pub fn list_records_from<T: DeserializeOwned>(db: &Database, table: RecordTable, start: &str) -> Result<Vec<T>> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(table)?;
    let mut records = Vec::new();
    for entry in table.range(start..)? {
        let (_, value) = entry?;
        records.push(decode(value.value())?);
    }
    Ok(records)
}

/// Decode the last `limit` records in reverse key order
pub fn list_latest_records<T: DeserializeOwned>(db: &Database, table: RecordTable, limit: usize) -> Result<Vec<T>> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(table)?;
    let mut records = Vec::with_capacity(limit);
    for entry in table.iter()?.rev().take(limit) {
        let (_, value) = entry?;
        records.push(decode(value.value())?);
    }
    Ok(records)
}

/// Number of rows in a table
pub fn count_records(db: &Database, table: RecordTable) -> Result<u64> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(table)?;
    Ok(table.len()?)
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a random-looking 16 hex character id
pub fn new_id(seed: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(nanos.to_be_bytes());
    hasher.update(counter.to_be_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Key that sorts by creation time, used for append-only log tables
pub fn time_ordered_key(timestamp_millis: i64, id: &str) -> String {
    format!("{:016x}-{}", timestamp_millis.max(0), id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let db = open_database(temp_dir.path().join("test.db")).unwrap();

        put_record(&db, tables::LAYOUTS, "theme/a", &"first".to_string()).unwrap();
        put_record(&db, tables::LAYOUTS, "theme/b", &"second".to_string()).unwrap();
        put_record(&db, tables::LAYOUTS, "hero_block/a", &"other".to_string()).unwrap();

        let value: Option<String> = get_record(&db, tables::LAYOUTS, "theme/a").unwrap();
        assert_eq!(value.as_deref(), Some("first"));

        let themes: Vec<String> = list_records_with_prefix(&db, tables::LAYOUTS, "theme/").unwrap();
        assert_eq!(themes, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(count_records(&db, tables::LAYOUTS).unwrap(), 3);

        assert!(remove_record(&db, tables::LAYOUTS, "theme/a").unwrap());
        assert!(!remove_record(&db, tables::LAYOUTS, "theme/a").unwrap());
    }

    #[test]
    fn test_time_ordered_keys_sort_chronologically() {
        let earlier = time_ordered_key(1_000, "ffff");
        let later = time_ordered_key(20_000, "0000");
        assert!(earlier < later);
    }

    #[test]
    fn test_time_ordered_scans() {
        let temp_dir = TempDir::new().unwrap();
        let db = open_database(temp_dir.path().join("test.db")).unwrap();

        for (millis, value) in [(1_000, "old"), (5_000, "mid"), (9_000, "new")] {
            let key = time_ordered_key(millis, &new_id(value));
            put_record(&db, tables::SECURITY_LOGS, &key, &value.to_string()).unwrap();
        }

        let recent: Vec<String> =
            list_records_from(&db, tables::SECURITY_LOGS, &time_ordered_key(5_000, "")).unwrap();
        assert_eq!(recent, vec!["mid".to_string(), "new".to_string()]);

        let latest: Vec<String> = list_latest_records(&db, tables::SECURITY_LOGS, 2).unwrap();
        assert_eq!(latest, vec!["new".to_string(), "mid".to_string()]);
    }

    #[test]
    fn test_new_id_is_unique() {
        let a = new_id("x");
        let b = new_id("x");
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
