//! Storage layer over RocksDB.
//!
//! All stores share one keyspace partitioned by string prefixes; multi-key
//! commits ride a single `WriteBatch` so a settlement unit is all-or-nothing
//! on disk.

use crate::errors::{CashdeskResult, StorageError};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> CashdeskResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_target_file_size_base(64 * 1024 * 1024);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)
            .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get(&self, key: &[u8]) -> CashdeskResult<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()).into())
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> CashdeskResult<()> {
        self.db
            .put(key, value)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    pub fn delete(&self, key: &[u8]) -> CashdeskResult<()> {
        self.db
            .delete(key)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    /// Commit a prepared batch atomically.
    pub fn write(&self, batch: WriteBatch) -> CashdeskResult<()> {
        self.db
            .write(batch)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    pub fn batch_write<K, V>(&self, items: &[(K, V)]) -> CashdeskResult<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = WriteBatch::default();
        for (key, value) in items {
            batch.put(key, value);
        }
        self.write(batch)
    }

    /// Scan keys under `prefix` in ascending key order, starting strictly
    /// after `after` when a cursor is supplied. Returns at most `limit` rows.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let start: Vec<u8> = match after {
            // The smallest key greater than the cursor is cursor + 0x00.
            Some(cursor) => {
                let mut k = cursor.to_vec();
                k.push(0);
                k
            }
            None => prefix.to_vec(),
        };

        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(&start, Direction::Forward));
        for item in iter {
            let Ok((key, value)) = item else { break };
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
            if rows.len() >= limit {
                break;
            }
        }
        rows
    }

    /// Estimated live key count, used by the health endpoint.
    pub fn estimated_keys(&self) -> u64 {
        self.db
            .property_int_value("rocksdb.estimate-num-keys")
            .ok()
            .flatten()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_put_get_delete() {
        let (_dir, storage) = temp_storage();

        storage.put(b"k1", b"v1").unwrap();
        assert_eq!(storage.get(b"k1").unwrap(), Some(b"v1".to_vec()));

        storage.delete(b"k1").unwrap();
        assert_eq!(storage.get(b"k1").unwrap(), None);
    }

    #[test]
    fn test_batch_is_atomic_for_reads_after_write() {
        let (_dir, storage) = temp_storage();

        let mut batch = WriteBatch::default();
        batch.put(b"a:1", b"one");
        batch.put(b"a:2", b"two");
        batch.delete(b"a:0");
        storage.write(batch).unwrap();

        assert_eq!(storage.get(b"a:1").unwrap(), Some(b"one".to_vec()));
        assert_eq!(storage.get(b"a:2").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn test_scan_prefix_respects_prefix_and_limit() {
        let (_dir, storage) = temp_storage();

        storage.put(b"tx:1", b"").unwrap();
        storage.put(b"tx:2", b"").unwrap();
        storage.put(b"tx:3", b"").unwrap();
        storage.put(b"user:1", b"").unwrap();

        let rows = storage.scan_prefix(b"tx:", None, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, b"tx:1".to_vec());
        assert_eq!(rows[1].0, b"tx:2".to_vec());
    }

    #[test]
    fn test_scan_prefix_cursor_starts_after() {
        let (_dir, storage) = temp_storage();

        storage.put(b"tx:1", b"").unwrap();
        storage.put(b"tx:2", b"").unwrap();
        storage.put(b"tx:3", b"").unwrap();

        let first = storage.scan_prefix(b"tx:", None, 2);
        let cursor = first.last().map(|(k, _)| k.clone()).unwrap();
        let rest = storage.scan_prefix(b"tx:", Some(&cursor), 10);

        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].0, b"tx:3".to_vec());
    }
}
