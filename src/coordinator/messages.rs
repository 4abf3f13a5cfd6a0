//! Request and response messages of the coordinator service
//!
//! Descriptors and completed snapshots travel as JSON document blobs inside
//! the requests; everything else is a structured message.

use crate::common::ApiError;
use crate::metadata::{
    LakeTableSnapshot, LeaderAndIsr, RemoteLogManifestHandle, ServerId, TableBucket, TableId,
    TablePath,
};
use serde::{Deserialize, Serialize};

/// Outcome of one entry of a batch request.
pub type EntryResult<T> = std::result::Result<T, ApiError>;

// === DDL ===

#[derive(Debug, Clone)]
pub struct CreateDatabaseRequest {
    pub database_name: String,
    pub database_json: Option<Vec<u8>>,
    pub ignore_if_exists: bool,
}

#[derive(Debug, Clone)]
pub struct DropDatabaseRequest {
    pub database_name: String,
    pub ignore_if_not_exists: bool,
    pub cascade: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropDatabaseResponse {
    pub dropped_table_ids: Vec<TableId>,
}

#[derive(Debug, Clone)]
pub struct CreateTableRequest {
    pub table_path: TablePath,
    pub table_json: Vec<u8>,
    pub ignore_if_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTableResponse {
    /// `None` when the table already existed and the request ignored it
    pub table_id: Option<TableId>,
}

#[derive(Debug, Clone)]
pub struct DropTableRequest {
    pub table_path: TablePath,
    pub ignore_if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropTableResponse {
    pub table_id: Option<TableId>,
}

// === AdjustIsr ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustIsrRequest {
    /// Server sending the request, normally the current bucket leader
    pub server_id: ServerId,
    pub coordinator_epoch: i32,
    pub buckets: Vec<AdjustIsrBucket>,
}

/// Proposed leadership of one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustIsrBucket {
    pub table_bucket: TableBucket,
    /// Leader epoch the proposal is based on
    pub leader_epoch: i32,
    pub leader: ServerId,
    pub isr: Vec<ServerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustIsrResponse {
    pub buckets: Vec<AdjustIsrBucketResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustIsrBucketResult {
    pub table_bucket: TableBucket,
    pub result: EntryResult<LeaderAndIsr>,
}

// === KV snapshots ===

#[derive(Debug, Clone)]
pub struct CommitKvSnapshotRequest {
    /// JSON encoded completed snapshot
    pub completed_snapshot: Vec<u8>,
    pub coordinator_epoch: i32,
    pub bucket_leader_epoch: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitKvSnapshotResponse {
    pub table_bucket: TableBucket,
    pub snapshot_id: i64,
}

// === Remote log manifests ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRemoteLogManifestRequest {
    pub manifest: RemoteLogManifestHandle,
    pub coordinator_epoch: i32,
    pub bucket_leader_epoch: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRemoteLogManifestResponse {
    pub commit_success: bool,
}

// === Lake table snapshots ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitLakeTableSnapshotRequest {
    pub coordinator_epoch: i32,
    pub tables: Vec<LakeTableSnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LakeTableSnapshotEntry {
    pub table_id: TableId,
    pub snapshot: LakeTableSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitLakeTableSnapshotResponse {
    pub tables: Vec<LakeTableSnapshotResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LakeTableSnapshotResult {
    pub table_id: TableId,
    pub result: EntryResult<()>,
}

// === Tablet servers ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterTabletServerRequest {
    pub server_id: ServerId,
    pub endpoint: String,
    #[serde(default)]
    pub rack: Option<String>,
}
