//! Commit protocol handlers run on the coordinator event thread
//!
//! Every commit follows the same path: validate the coordinator epoch, then
//! any bucket leader epoch, then write through one `multi` guarded by a
//! version check on the coordinator epoch node and an existence check on the
//! table's assignment node. A failed write leaves the store untouched and the
//! cached state of the bucket is dropped so it is re-read on the next event.
//! Successful commits publish a [`MetadataNotification`].

use crate::common::{CoordinatorMetrics, Error, Result};
use crate::coordinator::event::{
    CommitKvSnapshotData, CommitLakeTableSnapshotData, CoordinatorEvent, PendingResult,
};
use crate::coordinator::event_manager::EventProcessor;
use crate::coordinator::meta_client::{
    assignment_path, encode, lake_snapshot_path, leader_isr_path, remote_log_manifest_path, snapshot_path,
    MetaClient, Versioned, COORDINATOR_EPOCH_PATH,
};
use crate::coordinator::messages::{
    AdjustIsrBucket, AdjustIsrBucketResult, AdjustIsrRequest, AdjustIsrResponse,
    CommitKvSnapshotResponse, CommitLakeTableSnapshotResponse, CommitRemoteLogManifestRequest,
    CommitRemoteLogManifestResponse, LakeTableSnapshotResult,
};
use crate::coordinator::store::{CreateMode, Op, OpResult};
use crate::coordinator::validation::{
    validate_coordinator_epoch, validate_isr, validate_leader_epoch, validate_requester,
};
use crate::metadata::{
    LakeTableSnapshot, LeaderAndIsr, ServerId, TableAssignment, TableBucket, TableId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Follow-on notifications published after state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MetadataNotification {
    LeaderAndIsrChanged {
        table_bucket: TableBucket,
        leader_and_isr: LeaderAndIsr,
    },
    KvSnapshotCommitted {
        table_bucket: TableBucket,
        snapshot_id: i64,
    },
    RemoteLogManifestCommitted {
        table_bucket: TableBucket,
        remote_log_end_offset: i64,
    },
    LakeTableSnapshotCommitted {
        table_id: TableId,
        snapshot_id: i64,
    },
    TableDropped {
        table_id: TableId,
    },
}

/// The coordinator epoch this process owns, with the store version of the
/// epoch node at the time it was claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorEpoch {
    pub epoch: i32,
    pub version: i32,
}

impl From<Versioned<i32>> for CoordinatorEpoch {
    fn from(v: Versioned<i32>) -> Self {
        Self {
            epoch: v.value,
            version: v.version,
        }
    }
}

/// Cached replication state, owned by the event thread.
#[derive(Default)]
struct CoordinatorContext {
    assignments: HashMap<TableId, TableAssignment>,
    leadership: HashMap<TableBucket, Versioned<LeaderAndIsr>>,
}

impl CoordinatorContext {
    fn remove_table(&mut self, table_id: TableId) {
        self.assignments.remove(&table_id);
        self.leadership.retain(|tb, _| tb.table_id != table_id);
    }
}

pub struct CoordinatorEventProcessor {
    client: MetaClient,
    epoch: CoordinatorEpoch,
    kv_max_retained_snapshots: usize,
    context: CoordinatorContext,
    notifications: broadcast::Sender<MetadataNotification>,
    metrics: Arc<CoordinatorMetrics>,
}

impl CoordinatorEventProcessor {
    pub fn new(
        client: MetaClient,
        epoch: CoordinatorEpoch,
        kv_max_retained_snapshots: usize,
        notifications: broadcast::Sender<MetadataNotification>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        Self {
            client,
            epoch,
            kv_max_retained_snapshots: kv_max_retained_snapshots.max(1),
            context: CoordinatorContext::default(),
            notifications,
            metrics,
        }
    }

    fn notify(&self, notification: MetadataNotification) {
        // no subscribers is fine
        let _ = self.notifications.send(notification);
    }

    fn check_coordinator_epoch(&self, request: i32) -> Result<()> {
        validate_coordinator_epoch(request, self.epoch.epoch)
    }

    fn fencing_ops(&self, table_id: TableId) -> Vec<Op> {
        vec![
            MetaClient::coordinator_epoch_check(self.epoch.version),
            MetaClient::table_check(table_id),
        ]
    }

    /// Translate failed guard checks into the errors callers act on.
    fn map_store_error(&self, error: Error, table_id: TableId) -> Error {
        match error {
            Error::BadVersion { ref path, .. } if path == COORDINATOR_EPOCH_PATH => {
                tracing::error!(
                    "Coordinator epoch {} has been superseded, rejecting writes",
                    self.epoch.epoch
                );
                Error::CoordinatorFenced(self.epoch.epoch)
            }
            Error::NoNode(ref path) if *path == assignment_path(table_id) => {
                Error::UnknownTableOrBucket(format!("table {} does not exist", table_id))
            }
            other => other,
        }
    }

    fn assignment(&mut self, table_id: TableId) -> Result<&TableAssignment> {
        if !self.context.assignments.contains_key(&table_id) {
            let assignment = self
                .client
                .get_table_assignment(table_id)?
                .ok_or_else(|| {
                    Error::UnknownTableOrBucket(format!("table {} does not exist", table_id))
                })?;
            self.context.assignments.insert(table_id, assignment.value);
        }
        self.context
            .assignments
            .get(&table_id)
            .ok_or_else(|| Error::Internal(format!("assignment of table {} not cached", table_id)))
    }

    fn replicas(&mut self, tb: &TableBucket) -> Result<Vec<ServerId>> {
        let assignment = self.assignment(tb.table_id)?;
        assignment
            .replicas(tb.bucket)
            .map(|r| r.to_vec())
            .ok_or_else(|| Error::UnknownTableOrBucket(tb.to_string()))
    }

    fn leader_and_isr(&mut self, tb: &TableBucket) -> Result<Versioned<LeaderAndIsr>> {
        if let Some(cached) = self.context.leadership.get(tb) {
            return Ok(cached.clone());
        }
        let current = self
            .client
            .leader_and_isr(tb)?
            .ok_or_else(|| Error::UnknownTableOrBucket(tb.to_string()))?;
        self.context.leadership.insert(*tb, current.clone());
        Ok(current)
    }

    /// Validate the bucket exists and the request's leader epoch is current.
    fn check_bucket_leader_epoch(&mut self, tb: &TableBucket, request: i32) -> Result<Versioned<LeaderAndIsr>> {
        self.replicas(tb)?;
        let current = self.leader_and_isr(tb)?;
        validate_leader_epoch(tb, request, current.value.leader_epoch)?;
        Ok(current)
    }

    fn record_rejection(&self, error: &Error) {
        if error.is_stale_epoch() {
            self.metrics.stale_epoch_rejections.inc();
        }
    }

    // === AdjustIsr ===

    fn adjust_isr(&mut self, request: AdjustIsrRequest) -> Result<AdjustIsrResponse> {
        self.check_coordinator_epoch(request.coordinator_epoch)?;
        let mut buckets = Vec::with_capacity(request.buckets.len());
        for bucket in &request.buckets {
            let result = self.adjust_bucket_isr(request.server_id, bucket);
            if let Err(e) = &result {
                tracing::warn!(
                    "Rejected ISR change of {} from server {}: {}",
                    bucket.table_bucket,
                    request.server_id,
                    e
                );
                self.record_rejection(e);
            }
            buckets.push(AdjustIsrBucketResult {
                table_bucket: bucket.table_bucket,
                result: result.map_err(|e| e.to_api_error()),
            });
        }
        Ok(AdjustIsrResponse { buckets })
    }

    fn adjust_bucket_isr(&mut self, requester: ServerId, proposal: &AdjustIsrBucket) -> Result<LeaderAndIsr> {
        let tb = proposal.table_bucket;
        let replicas = self.replicas(&tb)?;
        validate_requester(&tb, requester, &replicas)?;
        let current = self.leader_and_isr(&tb)?;
        validate_leader_epoch(&tb, proposal.leader_epoch, current.value.leader_epoch)?;
        validate_isr(&tb, proposal.leader, &proposal.isr, &replicas)?;

        let next = LeaderAndIsr {
            leader: proposal.leader,
            leader_epoch: current.value.leader_epoch + 1,
            isr: proposal.isr.clone(),
            coordinator_epoch: self.epoch.epoch,
        };
        let mut ops = self.fencing_ops(tb.table_id);
        ops.push(Op::Set {
            path: leader_isr_path(&tb),
            data: encode(&next)?,
            expected_version: Some(current.version),
        });

        let version = match self.client.store().multi(ops) {
            Ok(results) => match results.last() {
                Some(OpResult::Set { version }) => *version,
                _ => current.version + 1,
            },
            Err(e) => {
                self.context.leadership.remove(&tb);
                return Err(self.map_store_error(e, tb.table_id));
            }
        };
        self.context.leadership.insert(
            tb,
            Versioned {
                value: next.clone(),
                version,
            },
        );
        tracing::info!(
            "Updated leader and ISR of {}: leader {} epoch {} isr {:?}",
            tb,
            next.leader,
            next.leader_epoch,
            next.isr
        );
        self.notify(MetadataNotification::LeaderAndIsrChanged {
            table_bucket: tb,
            leader_and_isr: next.clone(),
        });
        Ok(next)
    }

    // === KV snapshots ===

    fn commit_kv_snapshot(&mut self, data: CommitKvSnapshotData) -> Result<CommitKvSnapshotResponse> {
        self.check_coordinator_epoch(data.coordinator_epoch)?;
        let snapshot = data.snapshot;
        let tb = snapshot.table_bucket;
        let leadership = self.check_bucket_leader_epoch(&tb, data.bucket_leader_epoch)?;

        let response = CommitKvSnapshotResponse {
            table_bucket: tb,
            snapshot_id: snapshot.snapshot_id,
        };
        if let Some(latest) = self.client.latest_snapshot(&tb)? {
            if latest.snapshot_id == snapshot.snapshot_id && latest == snapshot {
                tracing::debug!("Snapshot {} of {} already committed", snapshot.snapshot_id, tb);
                return Ok(response);
            }
            if snapshot.snapshot_id <= latest.snapshot_id {
                return Err(Error::InvalidSnapshot(format!(
                    "snapshot {} of {} is not newer than the latest snapshot {}",
                    snapshot.snapshot_id, tb, latest.snapshot_id
                )));
            }
        }

        let mut ops = self.fencing_ops(tb.table_id);
        ops.push(Op::Check {
            path: leader_isr_path(&tb),
            expected_version: Some(leadership.version),
        });
        ops.push(Op::Create {
            path: snapshot_path(&tb, snapshot.snapshot_id),
            data: snapshot.to_json_bytes()?,
            mode: CreateMode::Persistent,
        });
        if let Err(e) = self.client.store().multi(ops) {
            self.context.leadership.remove(&tb);
            return Err(self.map_store_error(e, tb.table_id));
        }
        tracing::info!(
            "Committed snapshot {} of {} at log offset {}",
            snapshot.snapshot_id,
            tb,
            snapshot.log_offset
        );

        self.prune_snapshots(&tb);
        self.notify(MetadataNotification::KvSnapshotCommitted {
            table_bucket: tb,
            snapshot_id: snapshot.snapshot_id,
        });
        Ok(response)
    }

    /// Drop the oldest snapshot records beyond the retention limit. Failures
    /// only delay cleanup to the next commit.
    fn prune_snapshots(&self, tb: &TableBucket) {
        let ids = match self.client.snapshot_ids(tb) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("Failed to list snapshots of {}: {}", tb, e);
                return;
            }
        };
        if ids.len() <= self.kv_max_retained_snapshots {
            return;
        }
        let expired = &ids[..ids.len() - self.kv_max_retained_snapshots];
        let ops = expired
            .iter()
            .map(|id| Op::Delete {
                path: snapshot_path(tb, *id),
                expected_version: None,
            })
            .collect();
        match self.client.store().multi(ops) {
            Ok(_) => tracing::debug!("Removed {} expired snapshots of {}", expired.len(), tb),
            Err(e) => tracing::warn!("Failed to remove expired snapshots of {}: {}", tb, e),
        }
    }

    // === Remote log manifests ===

    fn commit_remote_log_manifest(
        &mut self,
        request: CommitRemoteLogManifestRequest,
    ) -> Result<CommitRemoteLogManifestResponse> {
        self.check_coordinator_epoch(request.coordinator_epoch)?;
        let manifest = request.manifest;
        let tb = manifest.table_bucket;
        let leadership = self.check_bucket_leader_epoch(&tb, request.bucket_leader_epoch)?;
        if manifest.remote_log_end_offset < manifest.remote_log_start_offset {
            return Err(Error::InvalidSnapshot(format!(
                "remote log end offset {} is before start offset {} for {}",
                manifest.remote_log_end_offset, manifest.remote_log_start_offset, tb
            )));
        }

        let path = remote_log_manifest_path(&tb);
        let data = encode(&manifest)?;
        let mut ops = self.fencing_ops(tb.table_id);
        ops.push(Op::Check {
            path: leader_isr_path(&tb),
            expected_version: Some(leadership.version),
        });
        ops.push(match self.client.remote_log_manifest(&tb)? {
            Some(current) => Op::Set {
                path,
                data,
                expected_version: Some(current.version),
            },
            None => Op::Create {
                path,
                data,
                mode: CreateMode::Persistent,
            },
        });
        if let Err(e) = self.client.store().multi(ops) {
            self.context.leadership.remove(&tb);
            return Err(self.map_store_error(e, tb.table_id));
        }
        tracing::info!(
            "Committed remote log manifest {} of {} up to offset {}",
            manifest.manifest_path,
            tb,
            manifest.remote_log_end_offset
        );
        self.notify(MetadataNotification::RemoteLogManifestCommitted {
            table_bucket: tb,
            remote_log_end_offset: manifest.remote_log_end_offset,
        });
        Ok(CommitRemoteLogManifestResponse {
            commit_success: true,
        })
    }

    // === Lake table snapshots ===

    fn commit_lake_table_snapshot(
        &mut self,
        data: CommitLakeTableSnapshotData,
    ) -> Result<CommitLakeTableSnapshotResponse> {
        self.check_coordinator_epoch(data.coordinator_epoch)?;
        let mut tables = Vec::with_capacity(data.snapshots.len());
        for (table_id, snapshot) in data.snapshots {
            let result = self.commit_table_lake_snapshot(table_id, &snapshot);
            if let Err(e) = &result {
                tracing::warn!("Rejected lake snapshot of table {}: {}", table_id, e);
            }
            tables.push(LakeTableSnapshotResult {
                table_id,
                result: result.map_err(|e| e.to_api_error()),
            });
        }
        Ok(CommitLakeTableSnapshotResponse { tables })
    }

    fn commit_table_lake_snapshot(&mut self, table_id: TableId, snapshot: &LakeTableSnapshot) -> Result<()> {
        self.assignment(table_id)?;
        let path = lake_snapshot_path(table_id);
        let data = encode(snapshot)?;
        let write = match self.client.lake_table_snapshot(table_id)? {
            Some(current) => {
                if snapshot.snapshot_id < current.value.snapshot_id {
                    return Err(Error::InvalidSnapshot(format!(
                        "lake snapshot {} of table {} is older than the committed snapshot {}",
                        snapshot.snapshot_id, table_id, current.value.snapshot_id
                    )));
                }
                Op::Set {
                    path,
                    data,
                    expected_version: Some(current.version),
                }
            }
            None => Op::Create {
                path,
                data,
                mode: CreateMode::Persistent,
            },
        };
        let mut ops = self.fencing_ops(table_id);
        ops.push(write);
        self.client
            .store()
            .multi(ops)
            .map_err(|e| self.map_store_error(e, table_id))?;
        tracing::info!("Committed lake snapshot {} of table {}", snapshot.snapshot_id, table_id);
        self.notify(MetadataNotification::LakeTableSnapshotCommitted {
            table_id,
            snapshot_id: snapshot.snapshot_id,
        });
        Ok(())
    }
}

fn finish<T>(
    processor: &CoordinatorEventProcessor,
    name: &str,
    result: Result<T>,
    pending: PendingResult<T>,
) -> bool {
    let success = result.is_ok();
    if let Err(e) = &result {
        processor.record_rejection(e);
        tracing::warn!("Event {} failed: {}", name, e);
    }
    pending.complete(result);
    success
}

impl EventProcessor for CoordinatorEventProcessor {
    fn process(&mut self, event: CoordinatorEvent) -> bool {
        let name = event.name();
        match event {
            CoordinatorEvent::AdjustIsrReceived(request, pending) => {
                let result = self.adjust_isr(request);
                finish(self, name, result, pending)
            }
            CoordinatorEvent::CommitKvSnapshot(data, pending) => {
                let result = self.commit_kv_snapshot(data);
                finish(self, name, result, pending)
            }
            CoordinatorEvent::CommitRemoteLogManifest(request, pending) => {
                let result = self.commit_remote_log_manifest(request);
                finish(self, name, result, pending)
            }
            CoordinatorEvent::CommitLakeTableSnapshot(data, pending) => {
                let result = self.commit_lake_table_snapshot(data);
                finish(self, name, result, pending)
            }
            CoordinatorEvent::TableDropped { table_id } => {
                self.context.remove_table(table_id);
                tracing::debug!("Evicted cached state of dropped table {}", table_id);
                self.notify(MetadataNotification::TableDropped { table_id });
                true
            }
            CoordinatorEvent::Shutdown => true,
        }
    }

    fn on_shutdown(&mut self) {
        self.context = CoordinatorContext::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::assignment::generate_assignment;
    use crate::coordinator::event::wait_for;
    use crate::coordinator::meta_client::TableRegistration;
    use crate::coordinator::store::MemoryMetaStore;
    use crate::metadata::{Column, CompletedSnapshot, DataType, Schema, TableDescriptor, TablePath};
    use std::collections::BTreeMap;

    struct Fixture {
        store: Arc<MemoryMetaStore>,
        client: MetaClient,
        processor: CoordinatorEventProcessor,
        table_id: TableId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryMetaStore::new());
        let client = MetaClient::new(store.clone());
        let epoch = client.bump_coordinator_epoch().unwrap();
        let table_id = 0;
        let assignment = generate_assignment(1, 3, &[1, 2, 3]).unwrap();
        let leadership = vec![(
            TableBucket::new(table_id, 0),
            LeaderAndIsr::initial(assignment.replicas(0).unwrap(), epoch.value).unwrap(),
        )];
        let registration = TableRegistration {
            table_id,
            descriptor: TableDescriptor::new(Schema {
                columns: vec![Column::new("id", DataType::Int)],
                primary_key: None,
            }),
            created_time: 0,
            modified_time: 0,
        };
        client
            .register_table(&TablePath::new("db", "t"), &registration, Some(&assignment), &leadership)
            .unwrap();
        let (tx, _) = broadcast::channel(16);
        let processor = CoordinatorEventProcessor::new(
            client.clone(),
            epoch.into(),
            2,
            tx,
            Arc::new(CoordinatorMetrics::new()),
        );
        Fixture {
            store,
            client,
            processor,
            table_id,
        }
    }

    fn snapshot(table_id: TableId, id: i64) -> CompletedSnapshot {
        CompletedSnapshot {
            table_bucket: TableBucket::new(table_id, 0),
            snapshot_id: id,
            snapshot_location: format!("oss://bucket/snap-{}", id),
            log_offset: id * 100,
            size_bytes: 1024,
            metadata: BTreeMap::new(),
        }
    }

    fn isr_request(epoch: i32, leader_epoch: i32, isr: Vec<ServerId>) -> AdjustIsrRequest {
        AdjustIsrRequest {
            server_id: 1,
            coordinator_epoch: epoch,
            buckets: vec![AdjustIsrBucket {
                table_bucket: TableBucket::new(0, 0),
                leader_epoch,
                leader: 1,
                isr,
            }],
        }
    }

    #[test]
    fn test_adjust_isr_bumps_leader_epoch() {
        let mut f = fixture();
        let response = f.processor.adjust_isr(isr_request(0, 0, vec![1, 2])).unwrap();
        let lai = response.buckets[0].result.clone().unwrap();
        assert_eq!(lai.leader_epoch, 1);
        assert_eq!(lai.isr, vec![1, 2]);

        let stored = f.client.leader_and_isr(&TableBucket::new(0, 0)).unwrap().unwrap();
        assert_eq!(stored.value, lai);

        // a proposal based on the old epoch is fenced
        let response = f.processor.adjust_isr(isr_request(0, 0, vec![1])).unwrap();
        let err = response.buckets[0].result.clone().unwrap_err();
        assert_eq!(err.code, crate::common::ErrorCode::FencedLeaderEpoch);
    }

    #[test]
    fn test_adjust_isr_rejects_stale_coordinator_epoch() {
        let mut f = fixture();
        // another coordinator took over
        f.client.bump_coordinator_epoch().unwrap();
        let result = f.processor.adjust_isr(isr_request(0, 0, vec![1, 2]));
        let response = result.unwrap();
        let err = response.buckets[0].result.clone().unwrap_err();
        assert_eq!(err.code, crate::common::ErrorCode::StaleEpoch);
        let stored = f.client.leader_and_isr(&TableBucket::new(0, 0)).unwrap().unwrap();
        assert_eq!(stored.value.leader_epoch, 0);
        assert_eq!(stored.value.isr, vec![1, 2, 3]);

        assert!(matches!(
            f.processor.adjust_isr(isr_request(-1, 0, vec![1])),
            Err(Error::StaleCoordinatorEpoch { .. })
        ));
    }

    #[test]
    fn test_adjust_isr_rejects_unassigned_requester() {
        let mut f = fixture();
        let mut request = isr_request(0, 0, vec![1]);
        request.server_id = 9;
        let response = f.processor.adjust_isr(request).unwrap();
        let err = response.buckets[0].result.clone().unwrap_err();
        assert_eq!(err.code, crate::common::ErrorCode::IneligibleReplica);
    }

    #[test]
    fn test_commit_kv_snapshot_and_retention() {
        let mut f = fixture();
        for id in 1..=3 {
            f.processor
                .commit_kv_snapshot(CommitKvSnapshotData {
                    snapshot: snapshot(f.table_id, id),
                    coordinator_epoch: 0,
                    bucket_leader_epoch: 0,
                })
                .unwrap();
        }
        let tb = TableBucket::new(f.table_id, 0);
        assert_eq!(f.client.snapshot_ids(&tb).unwrap(), vec![2, 3]);

        // identical re-commit is accepted, an older id is not
        f.processor
            .commit_kv_snapshot(CommitKvSnapshotData {
                snapshot: snapshot(f.table_id, 3),
                coordinator_epoch: 0,
                bucket_leader_epoch: 0,
            })
            .unwrap();
        assert!(matches!(
            f.processor.commit_kv_snapshot(CommitKvSnapshotData {
                snapshot: snapshot(f.table_id, 2),
                coordinator_epoch: 0,
                bucket_leader_epoch: 0,
            }),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_commit_kv_snapshot_fenced_leader() {
        let mut f = fixture();
        let tb = TableBucket::new(f.table_id, 0);
        f.processor
            .commit_kv_snapshot(CommitKvSnapshotData {
                snapshot: snapshot(f.table_id, 1),
                coordinator_epoch: 0,
                bucket_leader_epoch: 0,
            })
            .unwrap();
        f.processor.adjust_isr(isr_request(0, 0, vec![1, 2])).unwrap();

        let result = f.processor.commit_kv_snapshot(CommitKvSnapshotData {
            snapshot: snapshot(f.table_id, 2),
            coordinator_epoch: 0,
            bucket_leader_epoch: 0,
        });
        assert!(matches!(
            result,
            Err(Error::FencedLeaderEpoch {
                request: 0,
                current: 1,
                ..
            })
        ));
        assert_eq!(f.client.latest_snapshot(&tb).unwrap().unwrap().snapshot_id, 1);
    }

    #[test]
    fn test_store_failure_leaves_state_untouched() {
        let mut f = fixture();
        f.store.set_unavailable(true);
        let result = f.processor.commit_kv_snapshot(CommitKvSnapshotData {
            snapshot: snapshot(f.table_id, 1),
            coordinator_epoch: 0,
            bucket_leader_epoch: 0,
        });
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
        f.store.set_unavailable(false);
        assert!(f.client.latest_snapshot(&TableBucket::new(0, 0)).unwrap().is_none());
    }

    #[test]
    fn test_commit_remote_log_manifest_replaces_pointer() {
        let mut f = fixture();
        let tb = TableBucket::new(f.table_id, 0);
        for end in [100, 200] {
            f.processor
                .commit_remote_log_manifest(CommitRemoteLogManifestRequest {
                    manifest: crate::metadata::RemoteLogManifestHandle {
                        table_bucket: tb,
                        manifest_path: format!("oss://remote/{}.manifest", end),
                        remote_log_start_offset: 0,
                        remote_log_end_offset: end,
                    },
                    coordinator_epoch: 0,
                    bucket_leader_epoch: 0,
                })
                .unwrap();
        }
        let current = f.client.remote_log_manifest(&tb).unwrap().unwrap();
        assert_eq!(current.value.remote_log_end_offset, 200);
        assert_eq!(current.version, 1);
    }

    #[test]
    fn test_commit_lake_snapshot_per_table_results() {
        let mut f = fixture();
        let mut snapshots = BTreeMap::new();
        snapshots.insert(
            f.table_id,
            LakeTableSnapshot {
                snapshot_id: 5,
                bucket_log_end_offsets: BTreeMap::from([(0, 42)]),
            },
        );
        snapshots.insert(
            99,
            LakeTableSnapshot {
                snapshot_id: 1,
                bucket_log_end_offsets: BTreeMap::new(),
            },
        );
        let response = f
            .processor
            .commit_lake_table_snapshot(CommitLakeTableSnapshotData {
                coordinator_epoch: 0,
                snapshots,
            })
            .unwrap();
        assert!(response.tables[0].result.is_ok());
        assert_eq!(
            response.tables[1].result.clone().unwrap_err().code,
            crate::common::ErrorCode::UnknownTableOrBucket
        );
        assert_eq!(
            f.client.lake_table_snapshot(f.table_id).unwrap().unwrap().value.snapshot_id,
            5
        );
    }

    #[tokio::test]
    async fn test_table_dropped_evicts_cache_and_notifies() {
        let mut f = fixture();
        let mut rx = f.processor.notifications.subscribe();
        f.processor.adjust_isr(isr_request(0, 0, vec![1, 2, 3])).unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            MetadataNotification::LeaderAndIsrChanged { .. }
        ));

        f.client
            .store()
            .multi(MetaClient::delete_table_ops(&TablePath::new("db", "t"), 0))
            .unwrap();
        assert!(f.processor.process(CoordinatorEvent::TableDropped { table_id: 0 }));
        assert_eq!(
            rx.recv().await.unwrap(),
            MetadataNotification::TableDropped { table_id: 0 }
        );

        let (pending, result) = PendingResult::new();
        f.processor.process(CoordinatorEvent::AdjustIsrReceived(
            isr_request(0, 1, vec![1]),
            pending,
        ));
        let response = wait_for(result).await.unwrap();
        assert_eq!(
            response.buckets[0].result.clone().unwrap_err().code,
            crate::common::ErrorCode::UnknownTableOrBucket
        );
    }
}
