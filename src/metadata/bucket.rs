//! Per-bucket and per-table replication state

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type TableId = i64;
pub type ServerId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableBucket {
    pub table_id: TableId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<i64>,
    pub bucket: i32,
}

impl TableBucket {
    pub fn new(table_id: TableId, bucket: i32) -> Self {
        Self {
            table_id,
            partition_id: None,
            bucket,
        }
    }
}

impl fmt::Display for TableBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.partition_id {
            Some(p) => write!(f, "TableBucket{{table_id={}, partition_id={}, bucket={}}}", self.table_id, p, self.bucket),
            None => write!(f, "TableBucket{{table_id={}, bucket={}}}", self.table_id, self.bucket),
        }
    }
}

/// Bucket index to ordered replica list; the first replica is the preferred leader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableAssignment {
    pub buckets: BTreeMap<i32, Vec<ServerId>>,
}

impl TableAssignment {
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn replicas(&self, bucket: i32) -> Option<&[ServerId]> {
        self.buckets.get(&bucket).map(|v| v.as_slice())
    }
}

/// Leadership and in-sync replica state of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderAndIsr {
    pub leader: ServerId,
    pub leader_epoch: i32,
    pub isr: Vec<ServerId>,
    pub coordinator_epoch: i32,
}

impl LeaderAndIsr {
    /// State right after assignment: preferred leader, every replica in sync.
    pub fn initial(replicas: &[ServerId], coordinator_epoch: i32) -> Option<Self> {
        replicas.first().map(|&leader| Self {
            leader,
            leader_epoch: 0,
            isr: replicas.to_vec(),
            coordinator_epoch,
        })
    }
}

/// A committed KV snapshot of a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedSnapshot {
    pub table_bucket: TableBucket,
    pub snapshot_id: i64,
    pub snapshot_location: String,
    /// Log offset the snapshot covers up to (exclusive)
    pub log_offset: i64,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CompletedSnapshot {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidSnapshot(format!("Failed to parse completed snapshot: {}", e)))
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Pointer to the active remote log manifest of a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLogManifestHandle {
    pub table_bucket: TableBucket,
    pub manifest_path: String,
    pub remote_log_start_offset: i64,
    pub remote_log_end_offset: i64,
}

/// Latest snapshot of a table committed to the lakehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LakeTableSnapshot {
    pub snapshot_id: i64,
    /// Bucket to the log end offset tiered by this snapshot
    #[serde(default)]
    pub bucket_log_end_offsets: BTreeMap<i32, i64>,
}
