//! Configuration for the coordinator
//!
//! Values come from an optional TOML file, `TABLECOORD_*` environment
//! variables and finally CLI flags, in increasing priority.

use crate::common::{Error, Result};
use crate::metadata::lake::DataLakeFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Coordinator-specific config
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_node_id() -> String {
    "coordinator-0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            coordinator: CoordinatorConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from `path` (if it exists) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("TABLECOORD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.coordinator.validate()?;
        Ok(config)
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the RPC (HTTP) endpoint
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// RocksDB path for the metadata store
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Bucket count applied to tables that do not set one
    #[serde(default = "default_bucket_number")]
    pub default_bucket_number: i32,

    /// Replication factor applied to tables that do not set one
    #[serde(default = "default_replication_factor")]
    pub default_replication_factor: i32,

    /// Cluster-wide lake format, `None` when lake tables are disabled
    #[serde(default)]
    pub datalake_format: Option<DataLakeFormat>,

    /// Cluster lake options, keyed `datalake.<format>.<option>`
    #[serde(default)]
    pub datalake_options: BTreeMap<String, String>,

    /// Capacity of the coordinator event queue
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Completed KV snapshots kept per bucket
    #[serde(default = "default_kv_max_retained_snapshots")]
    pub kv_max_retained_snapshots: usize,

    /// Tablet servers silent for longer than this are expired
    #[serde(default = "default_server_session_timeout")]
    pub server_session_timeout_ms: u64,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9123))
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./coord-data")
}
fn default_bucket_number() -> i32 {
    1
}
fn default_replication_factor() -> i32 {
    1
}
fn default_event_queue_capacity() -> usize {
    1024
}
fn default_kv_max_retained_snapshots() -> usize {
    1
}
fn default_server_session_timeout() -> u64 {
    30_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            default_bucket_number: default_bucket_number(),
            default_replication_factor: default_replication_factor(),
            datalake_format: None,
            datalake_options: BTreeMap::new(),
            event_queue_capacity: default_event_queue_capacity(),
            kv_max_retained_snapshots: default_kv_max_retained_snapshots(),
            server_session_timeout_ms: default_server_session_timeout(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_bucket_number <= 0 {
            return Err(Error::InvalidConfig(format!(
                "default_bucket_number must be positive, got {}",
                self.default_bucket_number
            )));
        }
        if self.default_replication_factor <= 0 {
            return Err(Error::InvalidConfig(format!(
                "default_replication_factor must be positive, got {}",
                self.default_replication_factor
            )));
        }
        if self.event_queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_queue_capacity must be positive".into(),
            ));
        }
        if self.kv_max_retained_snapshots == 0 {
            return Err(Error::InvalidConfig(
                "kv_max_retained_snapshots must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn server_session_timeout(&self) -> Duration {
        Duration::from_millis(self.server_session_timeout_ms)
    }

    /// Default lake options a lake-enabled table inherits from the cluster.
    ///
    /// `datalake.<format>.<key>` becomes `table.<key>`. Returns `None` when the
    /// cluster has no lake format.
    pub fn default_table_lake_options(&self) -> Option<BTreeMap<String, String>> {
        let format = self.datalake_format?;
        let prefix = format!("datalake.{}.", format);
        Some(
            self.datalake_options
                .iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix(&prefix)
                        .map(|rest| (format!("table.{}", rest), v.clone()))
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let conf = CoordinatorConfig::default();
        assert!(conf.validate().is_ok());
        assert!(conf.datalake_format.is_none());
        assert!(conf.default_table_lake_options().is_none());
    }

    #[test]
    fn test_rejects_zero_bucket_number() {
        let conf = CoordinatorConfig {
            default_bucket_number: 0,
            ..Default::default()
        };
        assert!(matches!(conf.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_default_table_lake_options() {
        let mut conf = CoordinatorConfig {
            datalake_format: Some(DataLakeFormat::Paimon),
            ..Default::default()
        };
        conf.datalake_options
            .insert("datalake.paimon.warehouse".into(), "/tmp/paimon".into());
        conf.datalake_options
            .insert("datalake.iceberg.warehouse".into(), "/tmp/iceberg".into());

        let opts = conf.default_table_lake_options().unwrap();
        assert_eq!(opts.len(), 1);
        assert_eq!(opts.get("table.warehouse").unwrap(), "/tmp/paimon");
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coord.toml");
        std::fs::write(
            &path,
            r#"
node_id = "coord-7"

[coordinator]
default_bucket_number = 8
default_replication_factor = 3
datalake_format = "paimon"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.node_id, "coord-7");
        assert_eq!(config.coordinator.default_bucket_number, 8);
        assert_eq!(config.coordinator.default_replication_factor, 3);
        assert_eq!(
            config.coordinator.datalake_format,
            Some(DataLakeFormat::Paimon)
        );
    }
}
