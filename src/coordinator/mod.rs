//! Coordinator control plane
//!
//! The coordinator is responsible for:
//! - DDL on databases and tables, persisted in the metadata store
//! - Replica assignment of new tables across live tablet servers
//! - Epoch-fenced commits of ISR changes, KV snapshots, remote log
//!   manifests and lake table snapshots
//! - Tablet server membership
//!
//! Replication state is only ever written by the single event thread.

pub mod assignment;
pub mod event;
pub mod event_manager;
pub mod http;
pub mod messages;
pub mod meta_client;
pub mod metadata_manager;
pub mod processor;
pub mod rocks_store;
pub mod server;
pub mod server_registry;
pub mod service;
pub mod store;
pub mod validation;

pub use assignment::generate_assignment;
pub use meta_client::MetaClient;
pub use metadata_manager::MetadataManager;
pub use processor::MetadataNotification;
pub use rocks_store::RocksMetaStore;
pub use server::Coordinator;
pub use service::CoordinatorService;
pub use store::{MemoryMetaStore, MetaStore};
