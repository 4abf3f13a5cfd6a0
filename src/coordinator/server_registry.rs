//! Registry of live tablet servers
//!
//! A read-mostly cache in front of the ephemeral `/tabletservers/ids` nodes.
//! Registration binds the node to a fresh store session; a server that
//! stops heartbeating has its session expired, which removes the node.

use crate::common::{timestamp_now_millis, Error, Result};
use crate::coordinator::meta_client::{MetaClient, TabletServerRegistration};
use crate::coordinator::store::SessionId;
use crate::metadata::ServerId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct LiveServer {
    pub registration: TabletServerRegistration,
    pub session: Option<SessionId>,
    pub last_heartbeat: Instant,
}

pub struct TabletServerRegistry {
    client: MetaClient,
    servers: RwLock<BTreeMap<ServerId, LiveServer>>,
}

impl TabletServerRegistry {
    pub fn new(client: MetaClient) -> Self {
        Self {
            client,
            servers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Rebuild the cache from the store, e.g. after a coordinator restart.
    ///
    /// Loaded servers have no session owned by this process; they are kept
    /// until they miss the session timeout.
    pub fn load_from_store(&self) -> Result<usize> {
        let ids = self.client.list_tablet_servers()?;
        let mut servers = self.servers.write();
        for id in &ids {
            if let Some(registration) = self.client.get_tablet_server(*id)? {
                servers.entry(*id).or_insert(LiveServer {
                    registration,
                    session: None,
                    last_heartbeat: Instant::now(),
                });
            }
        }
        Ok(ids.len())
    }

    pub fn register(&self, server_id: ServerId, endpoint: String, rack: Option<String>) -> Result<()> {
        if server_id < 0 {
            return Err(Error::IneligibleReplica(format!(
                "server id must not be negative, got {}",
                server_id
            )));
        }
        let mut servers = self.servers.write();
        if let Some(previous) = servers.remove(&server_id) {
            // re-registration after a restart replaces the old session
            self.expire(server_id, previous.session)?;
        }

        let registration = TabletServerRegistration {
            endpoint,
            rack,
            registered_time: timestamp_now_millis(),
        };
        let session = self.client.store().new_session();
        self.client
            .register_tablet_server(server_id, &registration, session)?;
        servers.insert(
            server_id,
            LiveServer {
                registration,
                session: Some(session),
                last_heartbeat: Instant::now(),
            },
        );
        tracing::info!("Tablet server {} registered", server_id);
        Ok(())
    }

    /// Returns false when the server is unknown and must register again.
    pub fn heartbeat(&self, server_id: ServerId) -> bool {
        match self.servers.write().get_mut(&server_id) {
            Some(server) => {
                server.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, server_id: ServerId) -> Result<bool> {
        let mut servers = self.servers.write();
        let session = match servers.get(&server_id) {
            Some(server) => server.session,
            None => return Ok(false),
        };
        self.expire(server_id, session)?;
        servers.remove(&server_id);
        tracing::info!("Tablet server {} unregistered", server_id);
        Ok(true)
    }

    /// Expire every server silent for longer than `timeout`.
    ///
    /// A server stays cached until its store session is gone, so a failed
    /// expiry is retried on the next sweep.
    pub fn expire_stale(&self, timeout: Duration) -> Result<Vec<ServerId>> {
        let stale: Vec<(ServerId, Option<SessionId>)> = self
            .servers
            .read()
            .iter()
            .filter(|(_, s)| s.last_heartbeat.elapsed() > timeout)
            .map(|(id, s)| (*id, s.session))
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        let mut first_error = None;
        for (id, session) in stale {
            tracing::warn!("Tablet server {} missed its session timeout, expiring", id);
            match self.expire(id, session) {
                Ok(()) => {
                    let mut servers = self.servers.write();
                    // a re-registration in between owns a new session
                    if servers.get(&id).map(|s| s.session) == Some(session) {
                        servers.remove(&id);
                    }
                    expired.push(id);
                }
                Err(e) => {
                    tracing::warn!("Failed to expire tablet server {}: {}", id, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if expired.is_empty() => Err(e),
            _ => Ok(expired),
        }
    }

    fn expire(&self, server_id: ServerId, session: Option<SessionId>) -> Result<()> {
        match session {
            Some(session) => {
                self.client.store().expire_session(session)?;
            }
            None => {
                self.client
                    .store()
                    .delete_recursive(&crate::coordinator::meta_client::server_path(server_id))?;
            }
        }
        Ok(())
    }

    /// Alive server ids in ascending order.
    pub fn get_live_server_ids(&self) -> Vec<ServerId> {
        self.servers.read().keys().copied().collect()
    }

}
