//! Persistent metadata store abstraction
//!
//! A hierarchical key/value tree in the style of ZooKeeper: every node has
//! a version that increases on each update, nodes may be ephemeral (bound to
//! a session) or sequential, and `multi` applies a batch of operations
//! atomically. Version checks inside `multi` provide compare-and-set, which
//! the coordinator uses for epoch fencing.

use crate::common::{parent_path, Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateMode {
    Persistent,
    /// Removed when the owning session expires
    Ephemeral(SessionId),
    /// A 10-digit monotonically increasing suffix is appended to the path
    PersistentSequential,
}

/// A stored node with its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub data: Vec<u8>,
    pub version: i32,
    pub ephemeral_owner: Option<SessionId>,
}

#[derive(Debug, Clone)]
pub enum Op {
    Create {
        path: String,
        data: Vec<u8>,
        mode: CreateMode,
    },
    Set {
        path: String,
        data: Vec<u8>,
        expected_version: Option<i32>,
    },
    Delete {
        path: String,
        expected_version: Option<i32>,
    },
    /// Delete a node and everything below it; a missing node is not an error
    DeleteRecursive { path: String },
    Check {
        path: String,
        expected_version: Option<i32>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    Created(String),
    Set { version: i32 },
    Deleted,
    Checked,
}

pub trait MetaStore: Send + Sync {
    fn get(&self, path: &str) -> Result<Option<Node>>;

    /// Names of the direct children of `path`, sorted.
    fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Apply all operations or none of them.
    fn multi(&self, ops: Vec<Op>) -> Result<Vec<OpResult>>;

    fn new_session(&self) -> SessionId;

    /// Drop every ephemeral node owned by `session`, returning their paths.
    fn expire_session(&self, session: SessionId) -> Result<Vec<String>>;

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.get(path)?.is_some())
    }

    fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String> {
        match self.multi(vec![Op::Create {
            path: path.to_string(),
            data,
            mode,
        }])?
        .pop()
        {
            Some(OpResult::Created(p)) => Ok(p),
            other => Err(Error::Internal(format!("unexpected create result {:?}", other))),
        }
    }

    fn set(&self, path: &str, data: Vec<u8>, expected_version: Option<i32>) -> Result<i32> {
        match self
            .multi(vec![Op::Set {
                path: path.to_string(),
                data,
                expected_version,
            }])?
            .pop()
        {
            Some(OpResult::Set { version }) => Ok(version),
            other => Err(Error::Internal(format!("unexpected set result {:?}", other))),
        }
    }

    fn delete(&self, path: &str, expected_version: Option<i32>) -> Result<()> {
        self.multi(vec![Op::Delete {
            path: path.to_string(),
            expected_version,
        }])
        .map(|_| ())
    }

    fn delete_recursive(&self, path: &str) -> Result<()> {
        self.multi(vec![Op::DeleteRecursive {
            path: path.to_string(),
        }])
        .map(|_| ())
    }
}

/// Read side a transaction is evaluated against.
pub(crate) trait NodeSource {
    fn read(&self, path: &str) -> Result<Option<Node>>;
    /// Every path strictly below `path`.
    fn descendants(&self, path: &str) -> Result<Vec<String>>;
    fn next_sequence(&self, parent: &str) -> Result<u64>;
}

/// Writes produced by a successful transaction.
pub(crate) struct Changes {
    /// `None` deletes the node
    pub writes: BTreeMap<String, Option<Node>>,
    pub sequences: BTreeMap<String, u64>,
}

/// Evaluates operations against a source plus pending writes.
pub(crate) struct Transaction<'a, S: NodeSource + ?Sized> {
    source: &'a S,
    overlay: BTreeMap<String, Option<Node>>,
    sequences: BTreeMap<String, u64>,
}

impl<'a, S: NodeSource + ?Sized> Transaction<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            overlay: BTreeMap::new(),
            sequences: BTreeMap::new(),
        }
    }

    pub fn run(mut self, ops: Vec<Op>) -> Result<(Vec<OpResult>, Changes)> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            results.push(self.apply(op)?);
        }
        Ok((
            results,
            Changes {
                writes: self.overlay,
                sequences: self.sequences,
            },
        ))
    }

    fn read(&self, path: &str) -> Result<Option<Node>> {
        match self.overlay.get(path) {
            Some(pending) => Ok(pending.clone()),
            None => self.source.read(path),
        }
    }

    fn descendants(&self, path: &str) -> Result<BTreeSet<String>> {
        let prefix = format!("{}/", path);
        let mut all: BTreeSet<String> = self.source.descendants(path)?.into_iter().collect();
        for (k, v) in self.overlay.range(prefix.clone()..) {
            if !k.starts_with(&prefix) {
                break;
            }
            if v.is_some() {
                all.insert(k.clone());
            } else {
                all.remove(k);
            }
        }
        Ok(all)
    }

    fn apply(&mut self, op: Op) -> Result<OpResult> {
        match op {
            Op::Create { path, data, mode } => {
                validate_path(&path)?;
                let path = match mode {
                    CreateMode::PersistentSequential => {
                        let parent = parent_path(&path).unwrap_or("/").to_string();
                        let seq = match self.sequences.get(&parent) {
                            Some(seq) => *seq,
                            None => self.source.next_sequence(&parent)?,
                        };
                        self.sequences.insert(parent, seq + 1);
                        format!("{}{:010}", path, seq)
                    }
                    _ => path,
                };
                if self.read(&path)?.is_some() {
                    return Err(Error::NodeExists(path));
                }
                self.create_parents(&path)?;
                let owner = match mode {
                    CreateMode::Ephemeral(session) => Some(session),
                    _ => None,
                };
                self.overlay.insert(
                    path.clone(),
                    Some(Node {
                        data,
                        version: 0,
                        ephemeral_owner: owner,
                    }),
                );
                Ok(OpResult::Created(path))
            }
            Op::Set {
                path,
                data,
                expected_version,
            } => {
                let current = self.existing(&path, expected_version)?;
                let version = current.version + 1;
                self.overlay.insert(
                    path,
                    Some(Node {
                        data,
                        version,
                        ephemeral_owner: current.ephemeral_owner,
                    }),
                );
                Ok(OpResult::Set { version })
            }
            Op::Delete {
                path,
                expected_version,
            } => {
                self.existing(&path, expected_version)?;
                if !self.descendants(&path)?.is_empty() {
                    return Err(Error::Internal(format!("node {} has children", path)));
                }
                self.overlay.insert(path, None);
                Ok(OpResult::Deleted)
            }
            Op::DeleteRecursive { path } => {
                for child in self.descendants(&path)? {
                    self.overlay.insert(child, None);
                }
                if self.read(&path)?.is_some() {
                    self.overlay.insert(path, None);
                }
                Ok(OpResult::Deleted)
            }
            Op::Check {
                path,
                expected_version,
            } => {
                self.existing(&path, expected_version)?;
                Ok(OpResult::Checked)
            }
        }
    }

    fn existing(&self, path: &str, expected_version: Option<i32>) -> Result<Node> {
        let node = self
            .read(path)?
            .ok_or_else(|| Error::NoNode(path.to_string()))?;
        if let Some(expected) = expected_version {
            if expected != node.version {
                return Err(Error::BadVersion {
                    path: path.to_string(),
                    expected,
                    actual: node.version,
                });
            }
        }
        Ok(node)
    }

    fn create_parents(&mut self, path: &str) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = parent_path(path);
        while let Some(parent) = current {
            if self.read(parent)?.is_some() {
                break;
            }
            missing.push(parent.to_string());
            current = parent_path(parent);
        }
        for parent in missing {
            self.overlay.insert(
                parent,
                Some(Node {
                    data: Vec::new(),
                    version: 0,
                    ephemeral_owner: None,
                }),
            );
        }
        Ok(())
    }
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') || path.contains("//") {
        return Err(Error::Internal(format!("invalid store path: {:?}", path)));
    }
    Ok(())
}

/// Immediate child names of `path` from a sorted iterator of descendants.
pub(crate) fn child_names<'a>(path: &str, descendants: impl Iterator<Item = &'a str>) -> Vec<String> {
    let prefix = format!("{}/", path);
    descendants
        .filter_map(|k| k.strip_prefix(&prefix))
        .filter(|rest| !rest.contains('/'))
        .map(|rest| rest.to_string())
        .collect()
}

#[derive(Default)]
struct MemState {
    nodes: BTreeMap<String, Node>,
    sequences: HashMap<String, u64>,
}

impl NodeSource for MemState {
    fn read(&self, path: &str) -> Result<Option<Node>> {
        Ok(self.nodes.get(path).cloned())
    }

    fn descendants(&self, path: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", path);
        Ok(self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn next_sequence(&self, parent: &str) -> Result<u64> {
        Ok(self.sequences.get(parent).copied().unwrap_or(0))
    }
}

/// In-process store for tests and single-node development.
pub struct MemoryMetaStore {
    state: Mutex<MemState>,
    unavailable: AtomicBool,
    next_session: AtomicU64,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemState::default()),
            unavailable: AtomicBool::new(false),
            next_session: AtomicU64::new(1),
        }
    }

    /// Make every following call fail with `StoreUnavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("metadata store is unreachable".into()));
        }
        Ok(())
    }
}

impl Default for MemoryMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaStore for MemoryMetaStore {
    fn get(&self, path: &str) -> Result<Option<Node>> {
        self.check_available()?;
        self.state.lock().read(path)
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let state = self.state.lock();
        let descendants = state.descendants(path)?;
        Ok(child_names(path, descendants.iter().map(|s| s.as_str())))
    }

    fn multi(&self, ops: Vec<Op>) -> Result<Vec<OpResult>> {
        self.check_available()?;
        let mut state = self.state.lock();
        let (results, changes) = Transaction::new(&*state).run(ops)?;
        for (path, node) in changes.writes {
            match node {
                Some(node) => {
                    state.nodes.insert(path, node);
                }
                None => {
                    state.nodes.remove(&path);
                }
            }
        }
        state.sequences.extend(changes.sequences);
        Ok(results)
    }

    fn new_session(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::SeqCst)
    }

    fn expire_session(&self, session: SessionId) -> Result<Vec<String>> {
        self.check_available()?;
        let owned: Vec<String> = {
            let state = self.state.lock();
            state
                .nodes
                .iter()
                .filter(|(_, n)| n.ephemeral_owner == Some(session))
                .map(|(k, _)| k.clone())
                .collect()
        };
        if !owned.is_empty() {
            self.multi(
                owned
                    .iter()
                    .map(|p| Op::DeleteRecursive { path: p.clone() })
                    .collect(),
            )?;
        }
        Ok(owned)
    }
}
