//! Request validation shared by the DDL path and the commit handlers
//!
//! Every check is a pure function so it runs before any state is touched.

use crate::common::{Error, Result};
use crate::metadata::{Schema, ServerId, TableBucket};
use std::collections::HashSet;

/// Column names the storage layer adds to change logs.
pub const RESERVED_COLUMNS: [&str; 3] = ["_change_type", "_log_offset", "_commit_timestamp"];

pub fn validate_reserved_columns(schema: &Schema) -> Result<()> {
    for name in schema.column_names() {
        if RESERVED_COLUMNS.contains(&name) {
            return Err(Error::InvalidTable(format!(
                "Column name '{}' is reserved for system use.",
                name
            )));
        }
    }
    Ok(())
}

/// A request from an older coordinator generation is stale; one from a newer
/// generation means this coordinator has been superseded.
pub fn validate_coordinator_epoch(request: i32, current: i32) -> Result<()> {
    if request < current {
        return Err(Error::StaleCoordinatorEpoch { request, current });
    }
    if request > current {
        return Err(Error::CoordinatorFenced(current));
    }
    Ok(())
}

pub fn validate_leader_epoch(bucket: &TableBucket, request: i32, current: i32) -> Result<()> {
    if request < current {
        return Err(Error::FencedLeaderEpoch {
            bucket: bucket.to_string(),
            request,
            current,
        });
    }
    if request > current {
        return Err(Error::InvalidUpdateVersion(format!(
            "{} carries leader epoch {} ahead of current {}",
            bucket, request, current
        )));
    }
    Ok(())
}

pub fn validate_requester(
    bucket: &TableBucket,
    requester: ServerId,
    assignment: &[ServerId],
) -> Result<()> {
    if !assignment.contains(&requester) {
        return Err(Error::IneligibleReplica(format!(
            "Server {} is not an assigned replica of {}",
            requester, bucket
        )));
    }
    Ok(())
}

/// A proposed ISR must be non-empty, hold the leader and only assigned replicas.
pub fn validate_isr(
    bucket: &TableBucket,
    leader: ServerId,
    isr: &[ServerId],
    assignment: &[ServerId],
) -> Result<()> {
    if isr.is_empty() {
        return Err(Error::IneligibleReplica(format!("Empty ISR proposed for {}", bucket)));
    }
    if !isr.contains(&leader) {
        return Err(Error::IneligibleReplica(format!(
            "Leader {} of {} is not in the proposed ISR {:?}",
            leader, bucket, isr
        )));
    }
    let mut seen = HashSet::new();
    for replica in isr {
        if !assignment.contains(replica) {
            return Err(Error::IneligibleReplica(format!(
                "Replica {} is not assigned to {}",
                replica, bucket
            )));
        }
        if !seen.insert(*replica) {
            return Err(Error::IneligibleReplica(format!(
                "Replica {} appears twice in the proposed ISR of {}",
                replica, bucket
            )));
        }
    }
    Ok(())
}
