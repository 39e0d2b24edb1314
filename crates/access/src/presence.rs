//! Node presence via TTL-bounded heartbeat records.
//!
//! A node is alive while its record at `presence/servers/{id}` exists. Each
//! heartbeat overwrites the record and resets its TTL; nothing in this module
//! tracks time itself.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use certplane_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    codec,
    error::{AccessError, Result},
    keys::{self, validate_name},
    types::Role,
};

/// A registered node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct Server {
    /// Unique node identifier.
    #[builder(into)]
    pub id: String,
    /// `host:port` the node is reachable at.
    #[builder(into)]
    pub addr: String,
    /// Human-readable host name.
    #[builder(into, default)]
    #[serde(default)]
    pub hostname: String,
    /// What the node does in the cluster.
    pub role: Role,
    /// Free-form labels used for routing and selection.
    #[builder(default)]
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Server {
    /// Checks the identifier and address.
    ///
    /// # Errors
    ///
    /// [`AccessError::InvalidServer`] if the id is not a path-safe name or
    /// the address is not `host:port` with a numeric port.
    pub fn validate(&self) -> Result<()> {
        validate_name("server id", &self.id)
            .map_err(|err| AccessError::InvalidServer(err.to_string()))?;

        let Some((host, port)) = self.addr.rsplit_once(':') else {
            return Err(AccessError::InvalidServer(format!(
                "address {:?} is not host:port",
                self.addr
            )));
        };
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(AccessError::InvalidServer(format!("address {:?} has no host", self.addr)));
        }
        if port.parse::<u16>().is_err() {
            return Err(AccessError::InvalidServer(format!(
                "address {:?} has an invalid port",
                self.addr
            )));
        }
        Ok(())
    }
}

/// Converts a heartbeat TTL into the backend TTL, `None` meaning permanent.
fn heartbeat_ttl(ttl: Duration) -> Result<Option<Duration>> {
    if ttl.is_zero() {
        return Ok(None);
    }
    if ttl < Duration::from_secs(1) {
        return Err(AccessError::InvalidTtl(format!(
            "{ttl:?} is below the one second resolution; use 0 for a permanent record"
        )));
    }
    Ok(Some(Duration::from_secs(ttl.as_secs())))
}

/// Tracks which nodes are currently alive.
pub struct PresenceRegistry<B> {
    backend: Arc<B>,
}

impl<B> Clone for PresenceRegistry<B> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend) }
    }
}

impl<B: StorageBackend> PresenceRegistry<B> {
    /// Creates a registry over `backend`.
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Registers or refreshes `server`.
    ///
    /// A `ttl` of zero makes the record permanent. Otherwise it must be at
    /// least one second and is truncated to whole seconds.
    ///
    /// # Errors
    ///
    /// [`AccessError::InvalidTtl`] or [`AccessError::InvalidServer`] before
    /// any write.
    #[tracing::instrument(skip(self, server), fields(server_id = %server.id, ttl = ?ttl))]
    pub async fn upsert_server(&self, server: &Server, ttl: Duration) -> Result<()> {
        let ttl = heartbeat_ttl(ttl)?;
        server.validate()?;

        let key = keys::server(&server.id).into_bytes();
        let value = codec::encode(server)?;
        match ttl {
            Some(ttl) => self.backend.set_with_ttl(key, value, ttl).await?,
            None => self.backend.set(key, value).await?,
        }

        debug!("heartbeat recorded");
        Ok(())
    }

    /// Returns every live server. Expired registrations are absent.
    #[tracing::instrument(skip(self))]
    pub async fn servers(&self) -> Result<Vec<Server>> {
        let servers: Vec<Server> = codec::list(&*self.backend, keys::SERVERS_PREFIX).await?;
        debug!(count = servers.len(), "listed servers");
        Ok(servers)
    }

    /// Returns one live server.
    ///
    /// # Errors
    ///
    /// [`AccessError::NotFound`] if it is not registered or has expired.
    #[tracing::instrument(skip(self))]
    pub async fn server(&self, id: &str) -> Result<Server> {
        validate_name("server id", id)?;
        codec::read(&*self.backend, &keys::server(id))
            .await?
            .ok_or_else(|| AccessError::not_found("server", id))
    }

    /// Removes a registration. Removing an absent server is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn deregister_server(&self, id: &str) -> Result<()> {
        validate_name("server id", id)?;
        self.backend.delete(keys::server(id).as_bytes()).await?;
        info!("server deregistered");
        Ok(())
    }
}
