//! Client registry: the host's in-memory table of admitted controllers.
//!
//! Each entry is keyed by the connection [`Fingerprint`] (remote
//! `address:port`) and tracks:
//!
//! - The [`ClientHandle`] the host returned for it, once known.
//! - When it connected and how many input records it has delivered.
//! - A one-shot "kick" sender the admin surface uses to close it.
//!
//! # Invariants
//!
//! - At most one entry per fingerprint.  A second insert for the same key is
//!   rejected, never merged or replaced.
//! - The entry count never exceeds the `max_clients` passed to
//!   [`ClientRegistry::try_insert`]; the capacity check and the insert happen
//!   in the same call, under the caller's lock.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::SystemTime;

use tokio::sync::oneshot;

use crate::application::client_sink::ClientHandle;

/// Connection fingerprint: the remote `address:port` as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_addr(addr: SocketAddr) -> Self {
        Fingerprint(format!("{}:{}", addr.ip(), addr.port()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Fingerprint(value.to_string())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why an insert was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertRejection {
    Full,
    Duplicate,
}

/// One admitted client.
#[derive(Debug)]
pub struct ClientEntry {
    pub fingerprint: Fingerprint,
    pub handle: Option<ClientHandle>,
    pub connected_at: SystemTime,
    pub inputs_received: u64,
    kick: Option<oneshot::Sender<()>>,
}

/// Read-only copy of an entry for the admin surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub fingerprint: Fingerprint,
    pub handle: Option<ClientHandle>,
    pub connected_at: SystemTime,
    pub inputs_received: u64,
}

/// In-memory registry of admitted clients.
///
/// Stored behind a `tokio::sync::Mutex` in the lifecycle manager so every
/// connection task sees the same table.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<Fingerprint, ClientEntry>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.clients.contains_key(fingerprint)
    }

    /// Inserts a new entry if there is room and the key is unused.
    ///
    /// Capacity is checked first, then duplication.  On success returns the
    /// receiver that fires when the admin surface asks for this client to be
    /// disconnected.
    pub fn try_insert(
        &mut self,
        fingerprint: Fingerprint,
        max_clients: usize,
    ) -> Result<oneshot::Receiver<()>, InsertRejection> {
        if self.clients.len() >= max_clients {
            return Err(InsertRejection::Full);
        }
        if self.clients.contains_key(&fingerprint) {
            return Err(InsertRejection::Duplicate);
        }

        let (kick_tx, kick_rx) = oneshot::channel();
        self.clients.insert(
            fingerprint.clone(),
            ClientEntry {
                fingerprint,
                handle: None,
                connected_at: SystemTime::now(),
                inputs_received: 0,
                kick: Some(kick_tx),
            },
        );
        Ok(kick_rx)
    }

    /// Records the host's handle for an entry.
    pub fn set_handle(&mut self, fingerprint: &Fingerprint, handle: ClientHandle) {
        if let Some(entry) = self.clients.get_mut(fingerprint) {
            entry.handle = Some(handle);
        }
    }

    /// Bumps the input counter for an entry.
    pub fn record_input(&mut self, fingerprint: &Fingerprint) {
        if let Some(entry) = self.clients.get_mut(fingerprint) {
            entry.inputs_received += 1;
        }
    }

    /// Fires the kick signal for an entry.  Returns `false` if the entry does
    /// not exist or was already kicked.
    pub fn kick(&mut self, fingerprint: &Fingerprint) -> bool {
        self.clients
            .get_mut(fingerprint)
            .and_then(|entry| entry.kick.take())
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }

    /// Removes an entry, returning it.
    pub fn remove(&mut self, fingerprint: &Fingerprint) -> Option<ClientEntry> {
        self.clients.remove(fingerprint)
    }

    /// Returns a snapshot of all entries sorted by fingerprint.
    pub fn snapshot(&self) -> Vec<ClientSnapshot> {
        let mut all: Vec<ClientSnapshot> = self
            .clients
            .values()
            .map(|entry| ClientSnapshot {
                fingerprint: entry.fingerprint.clone(),
                handle: entry.handle,
                connected_at: entry.connected_at,
                inputs_received: entry.inputs_received,
            })
            .collect();
        all.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from(s)
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = ClientRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_fingerprint_from_addr_is_ip_colon_port() {
        let addr: SocketAddr = "192.168.1.20:51234".parse().unwrap();
        assert_eq!(Fingerprint::from_addr(addr).as_str(), "192.168.1.20:51234");
    }

    #[test]
    fn test_fingerprint_from_ipv6_addr_has_no_brackets() {
        let addr: SocketAddr = "[fe80::1]:7000".parse().unwrap();
        assert_eq!(Fingerprint::from_addr(addr).as_str(), "fe80::1:7000");
    }

    #[test]
    fn test_try_insert_adds_entry() {
        let mut registry = ClientRegistry::new();
        assert!(registry.try_insert(fp("10.0.0.2:5000"), 2).is_ok());
        assert!(registry.contains(&fp("10.0.0.2:5000")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_try_insert_rejects_when_full() {
        // Arrange
        let mut registry = ClientRegistry::new();
        registry.try_insert(fp("a:1"), 2).unwrap();
        registry.try_insert(fp("b:1"), 2).unwrap();

        // Act
        let result = registry.try_insert(fp("c:1"), 2);

        // Assert
        assert_eq!(result.unwrap_err(), InsertRejection::Full);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_try_insert_rejects_duplicate_under_capacity() {
        let mut registry = ClientRegistry::new();
        registry.try_insert(fp("a:1"), 4).unwrap();
        let result = registry.try_insert(fp("a:1"), 4);
        assert_eq!(result.unwrap_err(), InsertRejection::Duplicate);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_full_takes_precedence_over_duplicate() {
        let mut registry = ClientRegistry::new();
        registry.try_insert(fp("a:1"), 1).unwrap();
        assert_eq!(registry.try_insert(fp("a:1"), 1).unwrap_err(), InsertRejection::Full);
    }

    #[test]
    fn test_set_handle_and_record_input_update_snapshot() {
        // Arrange
        let mut registry = ClientRegistry::new();
        let key = fp("a:1");
        registry.try_insert(key.clone(), 2).unwrap();
        let handle = ClientHandle::new();

        // Act
        registry.set_handle(&key, handle);
        registry.record_input(&key);
        registry.record_input(&key);

        // Assert
        let snap = registry.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].handle, Some(handle));
        assert_eq!(snap[0].inputs_received, 2);
    }

    #[test]
    fn test_kick_fires_receiver_once() {
        let mut registry = ClientRegistry::new();
        let key = fp("a:1");
        let mut rx = registry.try_insert(key.clone(), 2).unwrap();

        assert!(registry.kick(&key));
        assert!(rx.try_recv().is_ok());
        assert!(!registry.kick(&key), "second kick must report false");
    }

    #[test]
    fn test_kick_unknown_fingerprint_returns_false() {
        let mut registry = ClientRegistry::new();
        assert!(!registry.kick(&fp("nobody:0")));
    }

    #[test]
    fn test_remove_deletes_entry_and_frees_capacity() {
        let mut registry = ClientRegistry::new();
        registry.try_insert(fp("a:1"), 1).unwrap();
        let removed = registry.remove(&fp("a:1"));
        assert_eq!(removed.map(|e| e.fingerprint), Some(fp("a:1")));
        assert!(registry.try_insert(fp("b:1"), 1).is_ok());
    }

    #[test]
    fn test_snapshot_is_sorted_by_fingerprint() {
        let mut registry = ClientRegistry::new();
        for key in ["c:1", "a:1", "b:1"] {
            registry.try_insert(fp(key), 8).unwrap();
        }
        let order: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|s| s.fingerprint.to_string())
            .collect();
        assert_eq!(order, vec!["a:1", "b:1", "c:1"]);
    }
}
