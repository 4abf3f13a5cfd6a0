//! # tablecoord
//!
//! The coordinator of a distributed streaming table store:
//! - DDL for databases and tables, with deterministic replica assignment
//! - A single-writer event thread for all replication state changes
//! - Epoch fencing of every commit against coordinator failover
//! - A versioned hierarchical metadata store backed by RocksDB
//! - HTTP for clients and tablet servers, SSE for change notifications
//!
//! ## Architecture
//!
//! ```text
//!  clients (DDL)          tablet servers (AdjustIsr, commits, heartbeats)
//!        │                              │
//! ┌──────▼──────────────────────────────▼──────┐
//! │            CoordinatorService              │
//! │   DDL ──► MetadataManager (ddl lock)       │
//! │   commits ──► EventManager (bounded queue) │
//! └──────┬──────────────────────┬──────────────┘
//!        │                      │ coordinator-event-thread
//!        │              ┌───────▼────────────────────┐
//!        │              │ CoordinatorEventProcessor  │
//!        │              │  epoch + leader fencing    │
//!        │              └───────┬────────────────────┘
//!        │   atomic multi-ops   │
//! ┌──────▼──────────────────────▼──────┐
//! │   MetaStore (RocksDB / in-memory)  │
//! └────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! tablecoord-coordinator serve \
//!   --id coordinator-0 \
//!   --bind 0.0.0.0:9123 \
//!   --db ./coord-data \
//!   --default-bucket-number 4 \
//!   --default-replication-factor 3 \
//!   --datalake-format paimon
//! ```
//!
//! ### Create a table
//! ```bash
//! curl -X POST localhost:9123/databases -d '{"name": "fluss"}' \
//!   -H 'content-type: application/json'
//! curl -X POST localhost:9123/databases/fluss/tables \
//!   -H 'content-type: application/json' \
//!   -d '{"name": "orders", "descriptor": {"schema": {"columns": [
//!         {"name": "id", "data_type": {"type": "BIGINT"}}]}}}'
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod coordinator;
pub mod metadata;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{Coordinator, CoordinatorService};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
