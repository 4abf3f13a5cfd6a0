//! Coordinator service
//!
//! The entry point every transport calls into. DDL runs synchronously through
//! the [`MetadataManager`]; AdjustIsr and the commit requests are validated
//! for shape, turned into events and resolved by the event thread.

use crate::common::{CoordinatorConfig, CoordinatorMetrics, Error, Result};
use crate::coordinator::assignment::generate_assignment;
use crate::coordinator::event::{
    wait_for, CommitKvSnapshotData, CommitLakeTableSnapshotData, CoordinatorEvent, PendingResult,
};
use crate::coordinator::event_manager::EventManager;
use crate::coordinator::messages::{
    AdjustIsrRequest, AdjustIsrResponse, CommitKvSnapshotRequest, CommitKvSnapshotResponse,
    CommitLakeTableSnapshotRequest, CommitLakeTableSnapshotResponse,
    CommitRemoteLogManifestRequest, CommitRemoteLogManifestResponse, CreateDatabaseRequest,
    CreateTableRequest, CreateTableResponse, DropDatabaseRequest, DropDatabaseResponse,
    DropTableRequest, DropTableResponse, RegisterTabletServerRequest,
};
use crate::coordinator::meta_client::{DatabaseRegistration, MetaClient, TableRegistration};
use crate::coordinator::metadata_manager::MetadataManager;
use crate::coordinator::processor::{
    CoordinatorEpoch, CoordinatorEventProcessor, MetadataNotification,
};
use crate::coordinator::server_registry::TabletServerRegistry;
use crate::coordinator::store::MetaStore;
use crate::coordinator::validation::validate_reserved_columns;
use crate::metadata::descriptor::TABLE_DATALAKE_ENABLED;
use crate::metadata::table_path::validate_database_name;
use crate::metadata::{
    CompletedSnapshot, DatabaseDescriptor, ServerId, TableAssignment, TableDescriptor, TableId,
    TablePath,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 1024;

pub struct CoordinatorService {
    config: CoordinatorConfig,
    epoch: CoordinatorEpoch,
    metadata: MetadataManager,
    servers: Arc<TabletServerRegistry>,
    events: EventManager,
    notifications: broadcast::Sender<MetadataNotification>,
    metrics: Arc<CoordinatorMetrics>,
}

impl CoordinatorService {
    /// Claim a new coordinator epoch and start the event thread.
    pub fn start(config: CoordinatorConfig, store: Arc<dyn MetaStore>) -> Result<Self> {
        config.validate()?;
        let client = MetaClient::new(store);
        let epoch: CoordinatorEpoch = client.bump_coordinator_epoch()?.into();
        tracing::info!("Coordinator epoch {} claimed", epoch.epoch);

        let servers = Arc::new(TabletServerRegistry::new(client.clone()));
        let loaded = servers.load_from_store()?;
        if loaded > 0 {
            tracing::info!("Loaded {} registered tablet servers", loaded);
        }

        let metrics = Arc::new(CoordinatorMetrics::new());
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let processor = CoordinatorEventProcessor::new(
            client.clone(),
            epoch,
            config.kv_max_retained_snapshots,
            notifications.clone(),
            metrics.clone(),
        );
        let events = EventManager::start(processor, config.event_queue_capacity, metrics.clone())?;

        Ok(Self {
            config,
            epoch,
            metadata: MetadataManager::new(client),
            servers,
            events,
            notifications,
            metrics,
        })
    }

    pub fn coordinator_epoch(&self) -> i32 {
        self.epoch.epoch
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.metrics
    }

    pub fn servers(&self) -> &Arc<TabletServerRegistry> {
        &self.servers
    }

    pub fn metadata(&self) -> &MetadataManager {
        &self.metadata
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetadataNotification> {
        self.notifications.subscribe()
    }

    pub async fn shutdown(&self) {
        self.events.shutdown().await;
    }

    // === Databases ===

    pub async fn create_database(&self, request: CreateDatabaseRequest) -> Result<()> {
        validate_database_name(&request.database_name)?;
        let descriptor = match &request.database_json {
            Some(json) => DatabaseDescriptor::from_json_bytes(json)?,
            None => DatabaseDescriptor::default(),
        };
        self.metadata
            .create_database(&request.database_name, &descriptor, request.ignore_if_exists)
    }

    pub async fn drop_database(&self, request: DropDatabaseRequest) -> Result<DropDatabaseResponse> {
        validate_database_name(&request.database_name)?;
        let dropped = self.metadata.drop_database(
            &request.database_name,
            request.ignore_if_not_exists,
            request.cascade,
        )?;
        for table_id in &dropped {
            self.table_dropped(*table_id).await;
        }
        Ok(DropDatabaseResponse {
            dropped_table_ids: dropped,
        })
    }

    pub async fn list_databases(&self) -> Result<Vec<String>> {
        self.metadata.list_databases()
    }

    pub async fn get_database(&self, name: &str) -> Result<DatabaseRegistration> {
        self.metadata.get_database(name)
    }

    // === Tables ===

    pub async fn create_table(&self, request: CreateTableRequest) -> Result<CreateTableResponse> {
        let path = request.table_path;
        path.validate()?;

        let descriptor = TableDescriptor::from_json_bytes(&request.table_json)
            .and_then(|d| validate_reserved_columns(&d.schema).map(|_| d))
            .map_err(|e| match e {
                Error::InvalidTable(_) => e,
                other => Error::InvalidTable(other.to_string()),
            })?;
        let descriptor = self.apply_system_defaults(descriptor)?;

        if request.ignore_if_exists && self.metadata.table_exists(&path)? {
            return Ok(CreateTableResponse { table_id: None });
        }

        let assignment = if descriptor.is_partitioned() {
            // partitions get their buckets assigned when they are created
            TableAssignment::default()
        } else {
            let bucket_count = descriptor
                .bucket_count()
                .unwrap_or(self.config.default_bucket_number);
            let replication_factor = descriptor
                .replication_factor()?
                .unwrap_or(self.config.default_replication_factor);
            generate_assignment(
                bucket_count,
                replication_factor,
                &self.servers.get_live_server_ids(),
            )?
        };

        let table_id = self.metadata.create_table(
            &path,
            descriptor,
            Some(assignment),
            self.epoch.epoch,
            request.ignore_if_exists,
        )?;
        Ok(CreateTableResponse { table_id })
    }

    /// Fill in what the table leaves to the cluster configuration.
    pub fn apply_system_defaults(&self, descriptor: TableDescriptor) -> Result<TableDescriptor> {
        let mut descriptor = descriptor;
        if descriptor.bucket_count().is_none() {
            descriptor = descriptor.with_bucket_count(self.config.default_bucket_number);
        }
        if descriptor.replication_factor()?.is_none() {
            descriptor = descriptor.with_replication_factor(self.config.default_replication_factor);
        }

        let lake_enabled = descriptor.is_datalake_enabled()?;
        match self.config.datalake_format {
            Some(format) => {
                if descriptor.datalake_format()?.is_none() {
                    descriptor = descriptor.with_datalake_format(format);
                }
                if lake_enabled {
                    if let Some(options) = self.config.default_table_lake_options() {
                        descriptor = descriptor.with_default_custom_properties(&options);
                    }
                }
            }
            None if lake_enabled => {
                return Err(Error::InvalidTable(format!(
                    "'{}' is enabled for the table, but the cluster doesn't enable datalake tables.",
                    TABLE_DATALAKE_ENABLED
                )));
            }
            None => {}
        }
        Ok(descriptor)
    }

    pub async fn drop_table(&self, request: DropTableRequest) -> Result<DropTableResponse> {
        request.table_path.validate()?;
        let table_id = self
            .metadata
            .drop_table(&request.table_path, request.ignore_if_not_exists)?;
        if let Some(table_id) = table_id {
            self.table_dropped(table_id).await;
        }
        Ok(DropTableResponse { table_id })
    }

    pub async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        self.metadata.list_tables(database)
    }

    pub async fn get_table(&self, path: &TablePath) -> Result<TableRegistration> {
        self.metadata.get_table(path)
    }

    async fn table_dropped(&self, table_id: TableId) {
        // the persisted state is already gone; the event only evicts caches
        if let Err(e) = self
            .events
            .put(CoordinatorEvent::TableDropped { table_id })
            .await
        {
            tracing::warn!("Could not notify event thread of dropped table {}: {}", table_id, e);
        }
    }

    // === Replication state ===

    pub async fn adjust_isr(&self, request: AdjustIsrRequest) -> Result<AdjustIsrResponse> {
        let (pending, rx) = PendingResult::new();
        self.events
            .put(CoordinatorEvent::AdjustIsrReceived(request, pending))
            .await?;
        wait_for(rx).await
    }

    pub async fn commit_kv_snapshot(
        &self,
        request: CommitKvSnapshotRequest,
    ) -> Result<CommitKvSnapshotResponse> {
        let snapshot = CompletedSnapshot::from_json_bytes(&request.completed_snapshot)?;
        let data = CommitKvSnapshotData {
            snapshot,
            coordinator_epoch: request.coordinator_epoch,
            bucket_leader_epoch: request.bucket_leader_epoch,
        };
        let (pending, rx) = PendingResult::new();
        self.events
            .put(CoordinatorEvent::CommitKvSnapshot(data, pending))
            .await?;
        wait_for(rx).await
    }

    pub async fn commit_remote_log_manifest(
        &self,
        request: CommitRemoteLogManifestRequest,
    ) -> Result<CommitRemoteLogManifestResponse> {
        let (pending, rx) = PendingResult::new();
        self.events
            .put(CoordinatorEvent::CommitRemoteLogManifest(request, pending))
            .await?;
        wait_for(rx).await
    }

    pub async fn commit_lake_table_snapshot(
        &self,
        request: CommitLakeTableSnapshotRequest,
    ) -> Result<CommitLakeTableSnapshotResponse> {
        let mut snapshots = BTreeMap::new();
        for entry in request.tables {
            if snapshots.insert(entry.table_id, entry.snapshot).is_some() {
                return Err(Error::InvalidSnapshot(format!(
                    "table {} appears more than once in the request",
                    entry.table_id
                )));
            }
        }
        let data = CommitLakeTableSnapshotData {
            coordinator_epoch: request.coordinator_epoch,
            snapshots,
        };
        let (pending, rx) = PendingResult::new();
        self.events
            .put(CoordinatorEvent::CommitLakeTableSnapshot(data, pending))
            .await?;
        wait_for(rx).await
    }

    // === Tablet servers ===

    pub async fn register_tablet_server(&self, request: RegisterTabletServerRequest) -> Result<()> {
        self.servers
            .register(request.server_id, request.endpoint, request.rack)
    }

    pub async fn heartbeat(&self, server_id: ServerId) -> bool {
        self.servers.heartbeat(server_id)
    }

    pub async fn unregister_tablet_server(&self, server_id: ServerId) -> Result<bool> {
        self.servers.unregister(server_id)
    }

    pub fn live_servers(&self) -> Vec<ServerId> {
        self.servers.get_live_server_ids()
    }
}
