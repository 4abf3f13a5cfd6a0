//! Typed access to the metadata store
//!
//! Layout:
//! - `/coordinators/epoch` coordinator epoch
//! - `/metadata/databases/{db}` database registration
//! - `/metadata/databases/{db}/tables/{table}` table registration
//! - `/tabletservers/ids/{id}` live tablet server (ephemeral)
//! - `/tabletservers/tables/{table_id}` replica assignment, parent of all
//!   per-bucket state of the table
//! - `/table_seqid/id-` sequential table id allocation
//!
//! Records are JSON encoded.

use crate::common::{timestamp_now_millis, Error, Result};
use crate::coordinator::store::{CreateMode, MetaStore, Op, SessionId};
use crate::metadata::{
    CompletedSnapshot, DatabaseDescriptor, LakeTableSnapshot, LeaderAndIsr,
    RemoteLogManifestHandle, ServerId, TableAssignment, TableBucket, TableDescriptor, TableId,
    TablePath,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const COORDINATOR_EPOCH_PATH: &str = "/coordinators/epoch";
pub const DATABASES_PATH: &str = "/metadata/databases";
pub const SERVER_IDS_PATH: &str = "/tabletservers/ids";
pub const TABLE_ASSIGNMENTS_PATH: &str = "/tabletservers/tables";
const TABLE_SEQ_PREFIX: &str = "/table_seqid/id-";

pub fn database_path(database: &str) -> String {
    format!("{}/{}", DATABASES_PATH, database)
}

pub fn tables_path(database: &str) -> String {
    format!("{}/tables", database_path(database))
}

pub fn table_path(path: &TablePath) -> String {
    format!("{}/{}", tables_path(&path.database_name), path.table_name)
}

pub fn server_path(server_id: ServerId) -> String {
    format!("{}/{}", SERVER_IDS_PATH, server_id)
}

pub fn assignment_path(table_id: TableId) -> String {
    format!("{}/{}", TABLE_ASSIGNMENTS_PATH, table_id)
}

pub fn bucket_path(tb: &TableBucket) -> String {
    match tb.partition_id {
        Some(p) => format!(
            "{}/partitions/{}/buckets/{}",
            assignment_path(tb.table_id),
            p,
            tb.bucket
        ),
        None => format!("{}/buckets/{}", assignment_path(tb.table_id), tb.bucket),
    }
}

pub fn leader_isr_path(tb: &TableBucket) -> String {
    format!("{}/leader_isr", bucket_path(tb))
}

pub fn snapshots_path(tb: &TableBucket) -> String {
    format!("{}/snapshots", bucket_path(tb))
}

pub fn snapshot_path(tb: &TableBucket, snapshot_id: i64) -> String {
    format!("{}/{}", snapshots_path(tb), snapshot_id)
}

pub fn remote_log_manifest_path(tb: &TableBucket) -> String {
    format!("{}/remote_logs", bucket_path(tb))
}

pub fn lake_snapshot_path(table_id: TableId) -> String {
    format!("{}/laketable", assignment_path(table_id))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseRegistration {
    pub descriptor: DatabaseDescriptor,
    pub created_time: i64,
    pub modified_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRegistration {
    pub table_id: TableId,
    pub descriptor: TableDescriptor,
    pub created_time: i64,
    pub modified_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabletServerRegistration {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rack: Option<String>,
    pub registered_time: i64,
}

/// A decoded record with the store version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i32,
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::MetadataCorrupted(format!("{}: {}", path, e)))
}

#[derive(Clone)]
pub struct MetaClient {
    store: Arc<dyn MetaStore>,
}

impl MetaClient {
    pub fn new(store: Arc<dyn MetaStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MetaStore> {
        &self.store
    }

    fn read<T: DeserializeOwned>(&self, path: &str) -> Result<Option<Versioned<T>>> {
        match self.store.get(path)? {
            Some(node) => Ok(Some(Versioned {
                value: decode(path, &node.data)?,
                version: node.version,
            })),
            None => Ok(None),
        }
    }

    // === Coordinator epoch ===

    pub fn coordinator_epoch(&self) -> Result<Option<Versioned<i32>>> {
        self.read(COORDINATOR_EPOCH_PATH)
    }

    /// Claim the next coordinator epoch with compare-and-set.
    pub fn bump_coordinator_epoch(&self) -> Result<Versioned<i32>> {
        loop {
            let result = match self.coordinator_epoch()? {
                None => self
                    .store
                    .create(COORDINATOR_EPOCH_PATH, encode(&0i32)?, CreateMode::Persistent)
                    .map(|_| Versioned { value: 0, version: 0 }),
                Some(current) => {
                    let next = current.value + 1;
                    self.store
                        .set(COORDINATOR_EPOCH_PATH, encode(&next)?, Some(current.version))
                        .map(|version| Versioned { value: next, version })
                }
            };
            match result {
                Ok(epoch) => return Ok(epoch),
                Err(Error::NodeExists(_)) | Err(Error::BadVersion { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Guard op failing once another coordinator bumped the epoch.
    pub fn coordinator_epoch_check(epoch_version: i32) -> Op {
        Op::Check {
            path: COORDINATOR_EPOCH_PATH.to_string(),
            expected_version: Some(epoch_version),
        }
    }

    // === Databases ===

    pub fn create_database(&self, name: &str, descriptor: &DatabaseDescriptor) -> Result<()> {
        let now = timestamp_now_millis();
        let registration = DatabaseRegistration {
            descriptor: descriptor.clone(),
            created_time: now,
            modified_time: now,
        };
        match self
            .store
            .create(&database_path(name), encode(&registration)?, CreateMode::Persistent)
        {
            Ok(_) => Ok(()),
            Err(Error::NodeExists(_)) => Err(Error::DatabaseAlreadyExists(name.to_string())),
            Err(e) => Err(e),
        }
    }

    pub fn get_database(&self, name: &str) -> Result<Option<DatabaseRegistration>> {
        Ok(self.read(&database_path(name))?.map(|v| v.value))
    }

    pub fn database_exists(&self, name: &str) -> Result<bool> {
        self.store.exists(&database_path(name))
    }

    pub fn list_databases(&self) -> Result<Vec<String>> {
        self.store.children(DATABASES_PATH)
    }

    // === Tables ===

    pub fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        self.store.children(&tables_path(database))
    }

    pub fn get_table(&self, path: &TablePath) -> Result<Option<TableRegistration>> {
        Ok(self.read(&table_path(path))?.map(|v| v.value))
    }

    pub fn table_exists(&self, path: &TablePath) -> Result<bool> {
        self.store.exists(&table_path(path))
    }

    pub fn allocate_table_id(&self) -> Result<TableId> {
        let created = self
            .store
            .create(TABLE_SEQ_PREFIX, Vec::new(), CreateMode::PersistentSequential)?;
        let id = created
            .strip_prefix(TABLE_SEQ_PREFIX)
            .and_then(|s| s.parse::<TableId>().ok())
            .ok_or_else(|| Error::MetadataCorrupted(format!("bad sequential node {}", created)))?;
        self.store.delete(&created, None)?;
        Ok(id)
    }

    /// Persist a table registration, its assignment and the initial leadership
    /// of every bucket in one atomic batch.
    pub fn register_table(
        &self,
        path: &TablePath,
        registration: &TableRegistration,
        assignment: Option<&TableAssignment>,
        initial_leadership: &[(TableBucket, LeaderAndIsr)],
    ) -> Result<()> {
        let mut ops = vec![Op::Create {
            path: table_path(path),
            data: encode(registration)?,
            mode: CreateMode::Persistent,
        }];
        if let Some(assignment) = assignment {
            ops.push(Op::Create {
                path: assignment_path(registration.table_id),
                data: encode(assignment)?,
                mode: CreateMode::Persistent,
            });
        }
        for (tb, lai) in initial_leadership {
            ops.push(Op::Create {
                path: leader_isr_path(tb),
                data: encode(lai)?,
                mode: CreateMode::Persistent,
            });
        }
        match self.store.multi(ops) {
            Ok(_) => Ok(()),
            Err(Error::NodeExists(p)) if p == table_path(path) => {
                Err(Error::TableAlreadyExists(path.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Ops removing a table registration and every piece of per-bucket state.
    pub fn delete_table_ops(path: &TablePath, table_id: TableId) -> Vec<Op> {
        vec![
            Op::Delete {
                path: table_path(path),
                expected_version: None,
            },
            Op::DeleteRecursive {
                path: assignment_path(table_id),
            },
        ]
    }

    pub fn get_table_assignment(&self, table_id: TableId) -> Result<Option<Versioned<TableAssignment>>> {
        self.read(&assignment_path(table_id))
    }

    /// Guard op failing once the table has been dropped.
    pub fn table_check(table_id: TableId) -> Op {
        Op::Check {
            path: assignment_path(table_id),
            expected_version: None,
        }
    }

    // === Bucket state ===

    pub fn leader_and_isr(&self, tb: &TableBucket) -> Result<Option<Versioned<LeaderAndIsr>>> {
        self.read(&leader_isr_path(tb))
    }

    pub fn snapshot_ids(&self, tb: &TableBucket) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .store
            .children(&snapshots_path(tb))?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn get_snapshot(&self, tb: &TableBucket, snapshot_id: i64) -> Result<Option<CompletedSnapshot>> {
        Ok(self.read(&snapshot_path(tb, snapshot_id))?.map(|v| v.value))
    }

    pub fn latest_snapshot(&self, tb: &TableBucket) -> Result<Option<CompletedSnapshot>> {
        match self.snapshot_ids(tb)?.last() {
            Some(&id) => self.get_snapshot(tb, id),
            None => Ok(None),
        }
    }

    pub fn remote_log_manifest(&self, tb: &TableBucket) -> Result<Option<Versioned<RemoteLogManifestHandle>>> {
        self.read(&remote_log_manifest_path(tb))
    }

    pub fn lake_table_snapshot(&self, table_id: TableId) -> Result<Option<Versioned<LakeTableSnapshot>>> {
        self.read(&lake_snapshot_path(table_id))
    }

    // === Tablet servers ===

    pub fn register_tablet_server(
        &self,
        server_id: ServerId,
        registration: &TabletServerRegistration,
        session: SessionId,
    ) -> Result<()> {
        self.store.create(
            &server_path(server_id),
            encode(registration)?,
            CreateMode::Ephemeral(session),
        )?;
        Ok(())
    }

    pub fn get_tablet_server(&self, server_id: ServerId) -> Result<Option<TabletServerRegistration>> {
        Ok(self.read(&server_path(server_id))?.map(|v| v.value))
    }

    pub fn list_tablet_servers(&self) -> Result<Vec<ServerId>> {
        let mut ids: Vec<ServerId> = self
            .store
            .children(SERVER_IDS_PATH)?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::store::MemoryMetaStore;

    fn client() -> MetaClient {
        MetaClient::new(Arc::new(MemoryMetaStore::new()))
    }

    #[test]
    fn test_bump_coordinator_epoch() {
        let client = client();
        assert!(client.coordinator_epoch().unwrap().is_none());
        assert_eq!(client.bump_coordinator_epoch().unwrap().value, 0);
        let second = client.bump_coordinator_epoch().unwrap();
        assert_eq!(second.value, 1);
        assert_eq!(second.version, 1);
        assert_eq!(client.coordinator_epoch().unwrap().unwrap(), second);
    }

    #[test]
    fn test_allocate_table_ids_are_unique() {
        let client = client();
        let a = client.allocate_table_id().unwrap();
        let b = client.allocate_table_id().unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn test_duplicate_database() {
        let client = client();
        let desc = DatabaseDescriptor::default();
        client.create_database("db", &desc).unwrap();
        assert!(matches!(
            client.create_database("db", &desc),
            Err(Error::DatabaseAlreadyExists(_))
        ));
        assert_eq!(client.list_databases().unwrap(), vec!["db".to_string()]);
    }

    #[test]
    fn test_bucket_paths() {
        let tb = TableBucket::new(3, 1);
        assert_eq!(leader_isr_path(&tb), "/tabletservers/tables/3/buckets/1/leader_isr");
        assert_eq!(snapshot_path(&tb, 9), "/tabletservers/tables/3/buckets/1/snapshots/9");
        let partitioned = TableBucket {
            table_id: 3,
            partition_id: Some(4),
            bucket: 0,
        };
        assert_eq!(
            bucket_path(&partitioned),
            "/tabletservers/tables/3/partitions/4/buckets/0"
        );
    }
}
