//! DDL against the metadata store
//!
//! Databases and tables are created and dropped synchronously on the calling
//! task. Every mutation takes the DDL lock, so a check-then-create of the same
//! path can never interleave with another one. Dropping a table removes its
//! registration together with the whole assignment subtree (leadership,
//! snapshots, manifests, lake pointer) in one atomic batch.

use crate::common::{timestamp_now_millis, Error, Result};
use crate::coordinator::meta_client::{
    assignment_path, database_path, DatabaseRegistration, MetaClient, TableRegistration,
};
use crate::coordinator::store::Op;
use crate::metadata::table_path::validate_database_name;
use crate::metadata::{
    DatabaseDescriptor, LeaderAndIsr, TableAssignment, TableBucket, TableDescriptor, TableId,
    TablePath,
};
use parking_lot::Mutex;

pub struct MetadataManager {
    client: MetaClient,
    ddl_lock: Mutex<()>,
}

impl MetadataManager {
    pub fn new(client: MetaClient) -> Self {
        Self {
            client,
            ddl_lock: Mutex::new(()),
        }
    }

    pub fn client(&self) -> &MetaClient {
        &self.client
    }

    // === Databases ===

    pub fn create_database(
        &self,
        name: &str,
        descriptor: &DatabaseDescriptor,
        ignore_if_exists: bool,
    ) -> Result<()> {
        validate_database_name(name)?;
        let _guard = self.ddl_lock.lock();
        if self.client.database_exists(name)? {
            if ignore_if_exists {
                return Ok(());
            }
            return Err(Error::DatabaseAlreadyExists(name.to_string()));
        }
        self.client.create_database(name, descriptor)?;
        tracing::info!("Created database {}", name);
        Ok(())
    }

    /// Drop a database; returns the ids of the tables removed with it.
    pub fn drop_database(
        &self,
        name: &str,
        ignore_if_not_exists: bool,
        cascade: bool,
    ) -> Result<Vec<TableId>> {
        validate_database_name(name)?;
        let _guard = self.ddl_lock.lock();
        if !self.client.database_exists(name)? {
            if ignore_if_not_exists {
                return Ok(Vec::new());
            }
            return Err(Error::DatabaseNotExist(name.to_string()));
        }

        let tables = self.client.list_tables(name)?;
        if !tables.is_empty() && !cascade {
            return Err(Error::DatabaseNotEmpty(format!(
                "{} (contains {} tables)",
                name,
                tables.len()
            )));
        }

        let mut table_ids = Vec::with_capacity(tables.len());
        for table in &tables {
            let path = TablePath::new(name, table.as_str());
            if let Some(registration) = self.client.get_table(&path)? {
                table_ids.push(registration.table_id);
            }
        }

        let mut ops = vec![Op::DeleteRecursive {
            path: database_path(name),
        }];
        ops.extend(table_ids.iter().map(|id| Op::DeleteRecursive {
            path: assignment_path(*id),
        }));
        self.client.store().multi(ops)?;
        tracing::info!("Dropped database {} with {} tables", name, table_ids.len());
        Ok(table_ids)
    }

    pub fn list_databases(&self) -> Result<Vec<String>> {
        self.client.list_databases()
    }

    pub fn get_database(&self, name: &str) -> Result<DatabaseRegistration> {
        validate_database_name(name)?;
        self.client
            .get_database(name)?
            .ok_or_else(|| Error::DatabaseNotExist(name.to_string()))
    }

    pub fn database_exists(&self, name: &str) -> Result<bool> {
        validate_database_name(name)?;
        self.client.database_exists(name)
    }

    // === Tables ===

    /// Register a table whose defaults are already resolved.
    ///
    /// Returns the new table id, or `None` when the table existed and
    /// `ignore_if_exists` was set.
    pub fn create_table(
        &self,
        path: &TablePath,
        descriptor: TableDescriptor,
        assignment: Option<TableAssignment>,
        coordinator_epoch: i32,
        ignore_if_exists: bool,
    ) -> Result<Option<TableId>> {
        path.validate()?;
        let _guard = self.ddl_lock.lock();
        if !self.client.database_exists(&path.database_name)? {
            return Err(Error::DatabaseNotExist(path.database_name.clone()));
        }
        if self.client.table_exists(path)? {
            if ignore_if_exists {
                return Ok(None);
            }
            return Err(Error::TableAlreadyExists(path.to_string()));
        }

        let table_id = self.client.allocate_table_id()?;
        let now = timestamp_now_millis();
        let registration = TableRegistration {
            table_id,
            descriptor,
            created_time: now,
            modified_time: now,
        };
        let leadership: Vec<(TableBucket, LeaderAndIsr)> = assignment
            .iter()
            .flat_map(|a| a.buckets.iter())
            .filter_map(|(bucket, replicas)| {
                LeaderAndIsr::initial(replicas, coordinator_epoch)
                    .map(|lai| (TableBucket::new(table_id, *bucket), lai))
            })
            .collect();

        self.client
            .register_table(path, &registration, assignment.as_ref(), &leadership)?;
        tracing::info!("Created table {} with id {}", path, table_id);
        Ok(Some(table_id))
    }

    /// Drop a table and all its per-bucket state; returns the dropped id.
    pub fn drop_table(&self, path: &TablePath, ignore_if_not_exists: bool) -> Result<Option<TableId>> {
        path.validate()?;
        let _guard = self.ddl_lock.lock();
        let registration = match self.client.get_table(path)? {
            Some(registration) => registration,
            None if ignore_if_not_exists => return Ok(None),
            None => return Err(Error::TableNotExist(path.to_string())),
        };
        self.client
            .store()
            .multi(MetaClient::delete_table_ops(path, registration.table_id))?;
        tracing::info!("Dropped table {} with id {}", path, registration.table_id);
        Ok(Some(registration.table_id))
    }

    pub fn get_table(&self, path: &TablePath) -> Result<TableRegistration> {
        path.validate()?;
        self.client
            .get_table(path)?
            .ok_or_else(|| Error::TableNotExist(path.to_string()))
    }

    pub fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        validate_database_name(database)?;
        if !self.client.database_exists(database)? {
            return Err(Error::DatabaseNotExist(database.to_string()));
        }
        self.client.list_tables(database)
    }

    pub fn table_exists(&self, path: &TablePath) -> Result<bool> {
        path.validate()?;
        self.client.table_exists(path)
    }
}
