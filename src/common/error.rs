//! Error types for tablecoord

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Request validation ===
    #[error("Invalid database name: {0}")]
    InvalidDatabaseName(String),

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid table: {0}")]
    InvalidTable(String),

    #[error("Invalid replication factor: {0}")]
    InvalidReplicationFactor(String),

    // === DDL idempotency ===
    #[error("Database {0} already exists")]
    DatabaseAlreadyExists(String),

    #[error("Database {0} does not exist")]
    DatabaseNotExist(String),

    #[error("Database {0} is not empty")]
    DatabaseNotEmpty(String),

    #[error("Table {0} already exists")]
    TableAlreadyExists(String),

    #[error("Table {0} does not exist")]
    TableNotExist(String),

    #[error("Unknown table or bucket: {0}")]
    UnknownTableOrBucket(String),

    // === Fencing ===
    #[error("Stale coordinator epoch: request carries {request}, current is {current}")]
    StaleCoordinatorEpoch { request: i32, current: i32 },

    #[error("Coordinator fenced: epoch {0} has been superseded")]
    CoordinatorFenced(i32),

    #[error("Fenced leader epoch for {bucket}: request carries {request}, current is {current}")]
    FencedLeaderEpoch {
        bucket: String,
        request: i32,
        current: i32,
    },

    #[error("Invalid update version: {0}")]
    InvalidUpdateVersion(String),

    #[error("Ineligible replica: {0}")]
    IneligibleReplica(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    // === Placement ===
    #[error("Insufficient replicas: need {needed}, have {available}")]
    InsufficientReplicas { needed: usize, available: usize },

    // === Metadata store ===
    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node does not exist: {0}")]
    NoNode(String),

    #[error("Bad version for {path}: expected {expected}, actual {actual}")]
    BadVersion {
        path: String,
        expected: i32,
        actual: i32,
    },

    #[error("Metadata store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Metadata corrupted: {0}")]
    MetadataCorrupted(String),

    // === Event queue ===
    #[error("Event queue is full")]
    QueueFull,

    #[error("Coordinator is shutting down")]
    ShuttingDown,

    // === Config ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Wire-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidDatabaseName,
    InvalidTableName,
    InvalidTable,
    InvalidReplicationFactor,
    DatabaseAlreadyExists,
    DatabaseNotExist,
    DatabaseNotEmpty,
    TableAlreadyExists,
    TableNotExist,
    UnknownTableOrBucket,
    StaleEpoch,
    FencedLeaderEpoch,
    InvalidUpdateVersion,
    IneligibleReplica,
    InvalidSnapshot,
    NotEnoughReplicas,
    StoreUnavailable,
    QueueFull,
    ShuttingDown,
    InvalidConfig,
    Internal,
}

/// Serializable error carried inside batch responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    /// Whether the caller may resend the same request.
    #[serde(default)]
    pub retryable: bool,
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidDatabaseName(_) => ErrorCode::InvalidDatabaseName,
            Error::InvalidTableName(_) => ErrorCode::InvalidTableName,
            Error::InvalidTable(_) => ErrorCode::InvalidTable,
            Error::InvalidReplicationFactor(_) => ErrorCode::InvalidReplicationFactor,
            Error::DatabaseAlreadyExists(_) => ErrorCode::DatabaseAlreadyExists,
            Error::DatabaseNotExist(_) => ErrorCode::DatabaseNotExist,
            Error::DatabaseNotEmpty(_) => ErrorCode::DatabaseNotEmpty,
            Error::TableAlreadyExists(_) => ErrorCode::TableAlreadyExists,
            Error::TableNotExist(_) => ErrorCode::TableNotExist,
            Error::UnknownTableOrBucket(_) => ErrorCode::UnknownTableOrBucket,
            Error::StaleCoordinatorEpoch { .. } | Error::CoordinatorFenced(_) => {
                ErrorCode::StaleEpoch
            }
            Error::FencedLeaderEpoch { .. } => ErrorCode::FencedLeaderEpoch,
            Error::InvalidUpdateVersion(_) => ErrorCode::InvalidUpdateVersion,
            Error::IneligibleReplica(_) => ErrorCode::IneligibleReplica,
            Error::InvalidSnapshot(_) => ErrorCode::InvalidSnapshot,
            Error::InsufficientReplicas { .. } => ErrorCode::NotEnoughReplicas,
            Error::StoreUnavailable(_)
            | Error::RocksDb(_)
            | Error::Io(_)
            | Error::NodeExists(_)
            | Error::NoNode(_)
            | Error::BadVersion { .. } => ErrorCode::StoreUnavailable,
            Error::QueueFull => ErrorCode::QueueFull,
            Error::ShuttingDown => ErrorCode::ShuttingDown,
            Error::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Error::Serialization(_) | Error::MetadataCorrupted(_) | Error::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Whether the fencing layer rejected this request.
    pub fn is_stale_epoch(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::StaleEpoch | ErrorCode::FencedLeaderEpoch
        )
    }

    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::StoreUnavailable
                | ErrorCode::StaleEpoch
                | ErrorCode::FencedLeaderEpoch
                | ErrorCode::QueueFull
                | ErrorCode::ShuttingDown
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.code() {
            ErrorCode::InvalidDatabaseName
            | ErrorCode::InvalidTableName
            | ErrorCode::InvalidTable
            | ErrorCode::InvalidReplicationFactor
            | ErrorCode::InvalidConfig
            | ErrorCode::InvalidSnapshot
            | ErrorCode::IneligibleReplica => StatusCode::BAD_REQUEST,
            ErrorCode::DatabaseNotExist
            | ErrorCode::TableNotExist
            | ErrorCode::UnknownTableOrBucket => StatusCode::NOT_FOUND,
            ErrorCode::DatabaseAlreadyExists
            | ErrorCode::TableAlreadyExists
            | ErrorCode::DatabaseNotEmpty
            | ErrorCode::StaleEpoch
            | ErrorCode::FencedLeaderEpoch
            | ErrorCode::InvalidUpdateVersion => StatusCode::CONFLICT,
            ErrorCode::NotEnoughReplicas
            | ErrorCode::StoreUnavailable
            | ErrorCode::QueueFull
            | ErrorCode::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        ApiError {
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

impl From<&Error> for ApiError {
    fn from(e: &Error) -> Self {
        e.to_api_error()
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Internal(e.to_string())
    }
}
