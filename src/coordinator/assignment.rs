//! Replica assignment for new tables
//!
//! Round-robin placement over the sorted live servers. The first replica of
//! bucket `b` lands on server `b % n`; followers are placed at a shifted
//! distance from the leader, and the shift advances each time the leaders
//! wrap around the server list so consecutive rounds use different
//! follower pairs. No randomness is involved: the same inputs always give
//! the same assignment.

use crate::common::{Error, Result};
use crate::metadata::{ServerId, TableAssignment};
use std::collections::BTreeMap;

/// Compute the replica list of every bucket of a table.
pub fn generate_assignment(
    bucket_count: i32,
    replication_factor: i32,
    live_servers: &[ServerId],
) -> Result<TableAssignment> {
    if bucket_count <= 0 {
        return Err(Error::InvalidTable(format!(
            "Bucket count must be positive, got {}",
            bucket_count
        )));
    }
    if replication_factor <= 0 {
        return Err(Error::InvalidReplicationFactor(format!(
            "Replication factor must be larger than 0, got {}",
            replication_factor
        )));
    }

    let mut servers = live_servers.to_vec();
    servers.sort_unstable();
    servers.dedup();

    let rf = replication_factor as usize;
    if servers.len() < rf {
        return Err(Error::InsufficientReplicas {
            needed: rf,
            available: servers.len(),
        });
    }

    let n = servers.len();
    let mut next_shift = 0usize;
    let mut buckets = BTreeMap::new();
    for bucket in 0..bucket_count {
        let b = bucket as usize;
        if b > 0 && b % n == 0 {
            next_shift += 1;
        }
        let first = b % n;
        let mut replicas = Vec::with_capacity(rf);
        replicas.push(servers[first]);
        for j in 0..rf - 1 {
            replicas.push(servers[replica_index(first, next_shift, j, n)]);
        }
        buckets.insert(bucket, replicas);
    }

    Ok(TableAssignment { buckets })
}

// Only called with n >= 2: a second replica needs a second server.
fn replica_index(first: usize, next_shift: usize, follower: usize, n: usize) -> usize {
    let shift = 1 + (next_shift + follower) % (n - 1);
    (first + shift) % n
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    #[test]
    fn test_no_duplicate_replicas() {
        let servers = vec![0, 1, 2, 3, 4];
        for bucket_count in 1..20 {
            for rf in 1..=5 {
                let assignment = generate_assignment(bucket_count, rf, &servers).unwrap();
                assert_eq!(assignment.bucket_count(), bucket_count as usize);
                for replicas in assignment.buckets.values() {
                    assert_eq!(replicas.len(), rf as usize);
                    let unique: HashSet<_> = replicas.iter().collect();
                    assert_eq!(unique.len(), replicas.len(), "{:?}", replicas);
                }
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let a = generate_assignment(12, 3, &[5, 1, 9, 3]).unwrap();
        let b = generate_assignment(12, 3, &[3, 9, 1, 5]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_leaders_spread_evenly() {
        let assignment = generate_assignment(9, 2, &[10, 20, 30]).unwrap();
        let mut leaders: HashMap<ServerId, usize> = HashMap::new();
        for replicas in assignment.buckets.values() {
            *leaders.entry(replicas[0]).or_default() += 1;
        }
        assert_eq!(leaders.len(), 3);
        assert!(leaders.values().all(|&c| c == 3));
    }

    #[test]
    fn test_followers_rotate_between_rounds() {
        let assignment = generate_assignment(6, 2, &[0, 1, 2]).unwrap();
        assert_eq!(assignment.replicas(0), Some(&[0, 1][..]));
        assert_eq!(assignment.replicas(1), Some(&[1, 2][..]));
        assert_eq!(assignment.replicas(2), Some(&[2, 0][..]));
        // second round shifts followers by one more
        assert_eq!(assignment.replicas(3), Some(&[0, 2][..]));
        assert_eq!(assignment.replicas(4), Some(&[1, 0][..]));
        assert_eq!(assignment.replicas(5), Some(&[2, 1][..]));
    }

    #[test]
    fn test_single_server() {
        let assignment = generate_assignment(3, 1, &[7]).unwrap();
        assert!(assignment.buckets.values().all(|r| r == &vec![7]));
    }

    #[test]
    fn test_insufficient_replicas() {
        let result = generate_assignment(3, 3, &[1, 2]);
        assert!(matches!(
            result,
            Err(Error::InsufficientReplicas {
                needed: 3,
                available: 2
            })
        ));
        assert!(generate_assignment(1, 1, &[]).is_err());
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(matches!(
            generate_assignment(3, 0, &[1, 2]),
            Err(Error::InvalidReplicationFactor(_))
        ));
        assert!(matches!(
            generate_assignment(0, 1, &[1]),
            Err(Error::InvalidTable(_))
        ));
    }
}
