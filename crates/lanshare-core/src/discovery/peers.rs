//! Known-peers table.
//!
//! Peers are keyed by `"ip:port"` and upserted on every discovery response,
//! so the table holds exactly the most recent data for each endpoint. Nothing
//! expires on its own; callers prune explicitly with
//! [`PeerTable::prune_stale`].

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A peer learned through discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    /// Table key, `"ip:port"`
    pub id: String,
    /// Display name announced by the peer
    pub name: String,
    /// IPv4 address the peer accepts transfers on
    pub ip: Ipv4Addr,
    /// TCP port the peer accepts transfers on
    pub port: u16,
    /// When the last response from this peer was processed
    pub last_seen: DateTime<Utc>,
}

impl Device {
    /// Create a device seen just now.
    #[must_use]
    pub fn new(name: impl Into<String>, ip: Ipv4Addr, port: u16) -> Self {
        Self {
            id: Self::key(ip, port),
            name: name.into(),
            ip,
            port,
            last_seen: Utc::now(),
        }
    }

    /// Table key for an endpoint.
    #[must_use]
    pub fn key(ip: Ipv4Addr, port: u16) -> String {
        format!("{ip}:{port}")
    }

    /// Address to open a direct transfer connection to.
    #[must_use]
    pub fn transfer_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

/// Concurrency-safe table of discovered peers.
///
/// Clones share the same underlying table.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    inner: Arc<RwLock<HashMap<String, Device>>>,
}

impl PeerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `device.id`.
    pub fn upsert(&self, device: Device) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.id.clone(), device);
    }

    /// Look up a peer by its `"ip:port"` key.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Device> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Find a peer by display name (case-insensitive).
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Device> {
        let name = name.to_lowercase();
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|d| d.name.to_lowercase() == name)
            .cloned()
    }

    /// Point-in-time copy of every peer, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Number of known peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no peers are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every peer.
    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drop peers not seen within `max_age`. Returns how many were removed.
    pub fn prune_stale(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut peers = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = peers.len();
        peers.retain(|_, d| d.last_seen >= cutoff);
        before - peers.len()
    }
}
