//! Cluster metadata model: identifiers, descriptors and replication state

pub mod bucket;
pub mod descriptor;
pub mod lake;
pub mod table_path;

pub use bucket::{
    CompletedSnapshot, LakeTableSnapshot, LeaderAndIsr, RemoteLogManifestHandle, ServerId,
    TableAssignment, TableBucket, TableId,
};
pub use descriptor::{
    Column, DataType, DatabaseDescriptor, Schema, TableDescriptor, TableDistribution,
};
pub use lake::DataLakeFormat;
pub use table_path::TablePath;
