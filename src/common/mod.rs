//! Common utilities and types shared across tablecoord

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, CoordinatorConfig};
pub use error::{ApiError, Error, ErrorCode, Result};
pub use metrics::CoordinatorMetrics;
pub use utils::{parent_path, timestamp_now_millis};
