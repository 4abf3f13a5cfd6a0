//! Metadata store backed by RocksDB
//!
//! Column families:
//! - `nodes`: store path → bincode-encoded [`Node`]
//! - `sequences`: parent path → next sequential suffix (big-endian u64)
//!
//! Each `multi` is evaluated under a writer lock and committed as a single
//! `WriteBatch`. Sessions do not survive a restart, so ephemeral nodes found
//! at open time are purged.

use crate::common::{Error, Result};
use crate::coordinator::store::{
    child_names, MetaStore, Node, NodeSource, Op, OpResult, SessionId, Transaction,
};
use parking_lot::Mutex;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

const CF_NODES: &str = "nodes";
const CF_SEQUENCES: &str = "sequences";

pub struct RocksMetaStore {
    db: DB,
    write_lock: Mutex<()>,
    next_session: AtomicU64,
}

impl RocksMetaStore {
    /// Open or create metadata store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_NODES, CF_SEQUENCES])?;
        let store = Self {
            db,
            write_lock: Mutex::new(()),
            next_session: AtomicU64::new(1),
        };
        let purged = store.purge_ephemeral_nodes()?;
        if purged > 0 {
            tracing::info!("Purged {} ephemeral nodes left by a previous session", purged);
        }
        Ok(store)
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::MetadataCorrupted(format!("missing column family {}", name)))
    }

    fn purge_ephemeral_nodes(&self) -> Result<usize> {
        let cf = self.cf(CF_NODES)?;
        let mut batch = WriteBatch::default();
        let mut purged = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let node: Node = bincode::deserialize(&value)
                .map_err(|e| Error::MetadataCorrupted(e.to_string()))?;
            if node.ephemeral_owner.is_some() {
                batch.delete_cf(cf, key);
                purged += 1;
            }
        }
        if purged > 0 {
            self.db.write(batch)?;
        }
        Ok(purged)
    }

    fn commit(&self, changes: crate::coordinator::store::Changes) -> Result<()> {
        let nodes = self.cf(CF_NODES)?;
        let sequences = self.cf(CF_SEQUENCES)?;
        let mut batch = WriteBatch::default();
        for (path, node) in changes.writes {
            match node {
                Some(node) => batch.put_cf(nodes, path.as_bytes(), bincode::serialize(&node)?),
                None => batch.delete_cf(nodes, path.as_bytes()),
            }
        }
        for (parent, next) in changes.sequences {
            batch.put_cf(sequences, parent.as_bytes(), next.to_be_bytes());
        }
        self.db.write(batch)?;
        Ok(())
    }
}

impl NodeSource for RocksMetaStore {
    fn read(&self, path: &str) -> Result<Option<Node>> {
        let cf = self.cf(CF_NODES)?;
        match self.db.get_cf(cf, path.as_bytes())? {
            Some(bytes) => {
                let node: Node = bincode::deserialize(&bytes)
                    .map_err(|e| Error::MetadataCorrupted(e.to_string()))?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    fn descendants(&self, path: &str) -> Result<Vec<String>> {
        let cf = self.cf(CF_NODES)?;
        let prefix = format!("{}/", path);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward));

        let mut keys = Vec::new();
        for item in iter {
            let (key_bytes, _) = item?;
            if !key_bytes.starts_with(prefix.as_bytes()) {
                break;
            }
            let key = String::from_utf8(key_bytes.to_vec())
                .map_err(|_| Error::MetadataCorrupted("Invalid UTF-8".into()))?;
            keys.push(key);
        }
        Ok(keys)
    }

    fn next_sequence(&self, parent: &str) -> Result<u64> {
        let cf = self.cf(CF_SEQUENCES)?;
        match self.db.get_cf(cf, parent.as_bytes())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::MetadataCorrupted(format!("bad sequence for {}", parent)))?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }
}

impl MetaStore for RocksMetaStore {
    fn get(&self, path: &str) -> Result<Option<Node>> {
        self.read(path)
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        let descendants = self.descendants(path)?;
        Ok(child_names(path, descendants.iter().map(|s| s.as_str())))
    }

    fn multi(&self, ops: Vec<Op>) -> Result<Vec<OpResult>> {
        let _guard = self.write_lock.lock();
        let (results, changes) = Transaction::new(self).run(ops)?;
        self.commit(changes)?;
        Ok(results)
    }

    fn new_session(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::SeqCst)
    }

    fn expire_session(&self, session: SessionId) -> Result<Vec<String>> {
        let _guard = self.write_lock.lock();
        let cf = self.cf(CF_NODES)?;
        let mut owned = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let node: Node = bincode::deserialize(&value)
                .map_err(|e| Error::MetadataCorrupted(e.to_string()))?;
            if node.ephemeral_owner == Some(session) {
                owned.push(
                    String::from_utf8(key.to_vec())
                        .map_err(|_| Error::MetadataCorrupted("Invalid UTF-8".into()))?,
                );
            }
        }
        if !owned.is_empty() {
            let ops = owned
                .iter()
                .map(|p| Op::DeleteRecursive { path: p.clone() })
                .collect();
            let (_, changes) = Transaction::new(self).run(ops)?;
            self.commit(changes)?;
        }
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::store::CreateMode;
    use tempfile::tempdir;

    #[test]
    fn test_rocks_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RocksMetaStore::open(dir.path().join("meta.db")).unwrap();

        store
            .create("/metadata/databases/db1", b"{}".to_vec(), CreateMode::Persistent)
            .unwrap();
        assert_eq!(
            store.children("/metadata/databases").unwrap(),
            vec!["db1".to_string()]
        );
        assert_eq!(store.set("/metadata/databases/db1", b"{\"a\":1}".to_vec(), Some(0)).unwrap(), 1);

        let node = store.get("/metadata/databases/db1").unwrap().unwrap();
        assert_eq!(node.version, 1);

        store.delete_recursive("/metadata").unwrap();
        assert!(store.get("/metadata/databases/db1").unwrap().is_none());
    }

    #[test]
    fn test_rocks_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.db");

        {
            let store = RocksMetaStore::open(&path).unwrap();
            store
                .create("/persistent", b"p".to_vec(), CreateMode::Persistent)
                .unwrap();
            let session = store.new_session();
            store
                .create("/ephemeral", b"e".to_vec(), CreateMode::Ephemeral(session))
                .unwrap();
            store
                .create("/seq/n-", vec![], CreateMode::PersistentSequential)
                .unwrap();
            store.flush().unwrap();
        }

        let store = RocksMetaStore::open(&path).unwrap();
        assert!(store.exists("/persistent").unwrap());
        assert!(!store.exists("/ephemeral").unwrap());
        let next = store
            .create("/seq/n-", vec![], CreateMode::PersistentSequential)
            .unwrap();
        assert_eq!(next, "/seq/n-0000000001");
    }

    #[test]
    fn test_rocks_multi_rolls_back() {
        let dir = tempdir().unwrap();
        let store = RocksMetaStore::open(dir.path().join("meta.db")).unwrap();

        let result = store.multi(vec![
            Op::Create {
                path: "/a".into(),
                data: vec![],
                mode: CreateMode::Persistent,
            },
            Op::Set {
                path: "/missing".into(),
                data: vec![],
                expected_version: None,
            },
        ]);
        assert!(matches!(result, Err(Error::NoNode(_))));
        assert!(!store.exists("/a").unwrap());
    }
}
