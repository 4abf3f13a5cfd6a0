//! Events handled by the coordinator event thread

use crate::common::{Error, Result};
use crate::coordinator::messages::{
    AdjustIsrRequest, AdjustIsrResponse, CommitKvSnapshotResponse,
    CommitLakeTableSnapshotResponse, CommitRemoteLogManifestRequest,
    CommitRemoteLogManifestResponse,
};
use crate::metadata::{CompletedSnapshot, LakeTableSnapshot, TableId};
use std::collections::BTreeMap;
use tokio::sync::oneshot;

/// One-shot result slot resolved by the event thread.
///
/// Resolving consumes the handle, so a result is delivered at most once. A
/// handle dropped without being resolved (e.g. while a handler unwinds)
/// delivers an internal error instead, so no caller waits forever.
pub struct PendingResult<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
}

pub type ResultReceiver<T> = oneshot::Receiver<Result<T>>;

impl<T> PendingResult<T> {
    pub fn new() -> (Self, ResultReceiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn complete(mut self, result: Result<T>) {
        if let Some(tx) = self.tx.take() {
            // the caller may have given up waiting
            let _ = tx.send(result);
        }
    }
}

impl<T> Drop for PendingResult<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(Error::Internal(
                "event was dropped before it completed".into(),
            )));
        }
    }
}

/// Wait for the event thread to resolve a pending result.
pub async fn wait_for<T>(rx: ResultReceiver<T>) -> Result<T> {
    rx.await
        .map_err(|_| Error::Internal("event result channel closed".into()))?
}

#[derive(Debug, Clone)]
pub struct CommitKvSnapshotData {
    pub snapshot: CompletedSnapshot,
    pub coordinator_epoch: i32,
    pub bucket_leader_epoch: i32,
}

#[derive(Debug, Clone)]
pub struct CommitLakeTableSnapshotData {
    pub coordinator_epoch: i32,
    pub snapshots: BTreeMap<TableId, LakeTableSnapshot>,
}

pub enum CoordinatorEvent {
    AdjustIsrReceived(AdjustIsrRequest, PendingResult<AdjustIsrResponse>),
    CommitKvSnapshot(CommitKvSnapshotData, PendingResult<CommitKvSnapshotResponse>),
    CommitRemoteLogManifest(
        CommitRemoteLogManifestRequest,
        PendingResult<CommitRemoteLogManifestResponse>,
    ),
    CommitLakeTableSnapshot(
        CommitLakeTableSnapshotData,
        PendingResult<CommitLakeTableSnapshotResponse>,
    ),
    /// A table and its persisted state are gone; cached state must go too
    TableDropped { table_id: TableId },
    Shutdown,
}

impl CoordinatorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorEvent::AdjustIsrReceived(..) => "adjust_isr",
            CoordinatorEvent::CommitKvSnapshot(..) => "commit_kv_snapshot",
            CoordinatorEvent::CommitRemoteLogManifest(..) => "commit_remote_log_manifest",
            CoordinatorEvent::CommitLakeTableSnapshot(..) => "commit_lake_table_snapshot",
            CoordinatorEvent::TableDropped { .. } => "table_dropped",
            CoordinatorEvent::Shutdown => "shutdown",
        }
    }

    /// Resolve the event's pending result with `error` without processing it.
    pub fn fail(self, error: Error) {
        match self {
            CoordinatorEvent::AdjustIsrReceived(_, result) => result.complete(Err(error)),
            CoordinatorEvent::CommitKvSnapshot(_, result) => result.complete(Err(error)),
            CoordinatorEvent::CommitRemoteLogManifest(_, result) => result.complete(Err(error)),
            CoordinatorEvent::CommitLakeTableSnapshot(_, result) => result.complete(Err(error)),
            CoordinatorEvent::TableDropped { .. } | CoordinatorEvent::Shutdown => {}
        }
    }
}
