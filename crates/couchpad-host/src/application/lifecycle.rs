//! LifecycleManager: runtime state machine and per-connection admission.
//!
//! # Runtime state
//!
//! ```text
//!             start_runtime()
//!   Standby  ─────────────────►  Runtime
//!      ▲                            │
//!      └────────────────────────────┘
//!             stop_runtime()
//! ```
//!
//! - `Standby` (initial): new connections may join, typically a lobby.
//! - `Runtime`: the game is running.  Connected clients keep playing, new
//!   connections are turned away.
//!
//! Calling a transition that is already in effect is a no-op.  A real
//! transition tells the host through `on_runtime_started` or
//! `on_runtime_stopped`.
//!
//! # Admission
//!
//! Every connection that completes the upgrade handshake is checked, in
//! order:
//!
//! 1. state must be `Standby`, else [`AdmissionError::NotOnStandby`];
//! 2. the registry must have room, else [`AdmissionError::AtCapacity`];
//! 3. the fingerprint must be unused, else [`AdmissionError::Duplicate`].
//!
//! Checks 2 and 3 and the insert run under the registry lock in one step, so
//! two racing connections can never both take the last slot.
//!
//! The state is an atomic flag: written only by the admin surface, read once
//! per connection.  The registry is a `tokio::sync::Mutex` shared by every
//! connection task; it is never held across a collaborator call.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use couchpad_core::ControllerInputRecord;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::application::client_sink::{ClientHandle, ClientSink, SinkError};
use crate::application::manage_clients::{
    ClientRegistry, ClientSnapshot, Fingerprint, InsertRejection,
};

/// Capacity used when the configured maximum is zero.
pub const FALLBACK_MAX_CLIENTS: usize = 2;

const STANDBY: u8 = 0;
const RUNTIME: u8 = 1;

/// Whether the host is accepting new clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Standby,
    Runtime,
}

impl RuntimeState {
    fn from_u8(value: u8) -> Self {
        if value == RUNTIME {
            RuntimeState::Runtime
        } else {
            RuntimeState::Standby
        }
    }
}

/// Why a connection was turned away after a successful handshake.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("server is not on standby")]
    NotOnStandby,

    #[error("server is at capacity")]
    AtCapacity,

    #[error("fingerprint is already connected")]
    Duplicate,
}

impl AdmissionError {
    /// Text sent to the peer in a final text frame before the socket closes.
    pub fn peer_message(self) -> &'static str {
        match self {
            AdmissionError::NotOnStandby => "Server not accepting new connections.",
            AdmissionError::AtCapacity => "Server on maximum occupancy.",
            AdmissionError::Duplicate => "Internal Server Error",
        }
    }

    /// Whether the host's invalid-connection hook fires for this rejection.
    /// Duplicates are only logged.
    pub fn notifies_host(self) -> bool {
        !matches!(self, AdmissionError::Duplicate)
    }
}

/// Owns the runtime state, the client registry and the collaborator.
pub struct LifecycleManager {
    state: AtomicU8,
    max_clients: usize,
    registry: Mutex<ClientRegistry>,
    sink: Arc<dyn ClientSink>,
}

impl LifecycleManager {
    /// Creates a manager in `Standby`.
    ///
    /// A `max_clients` of zero is replaced by [`FALLBACK_MAX_CLIENTS`].
    pub fn new(max_clients: usize, sink: Arc<dyn ClientSink>) -> Self {
        let max_clients = if max_clients == 0 {
            warn!("max_clients is 0; using {FALLBACK_MAX_CLIENTS}");
            FALLBACK_MAX_CLIENTS
        } else {
            max_clients
        };
        Self {
            state: AtomicU8::new(STANDBY),
            max_clients,
            registry: Mutex::new(ClientRegistry::new()),
            sink,
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn sink(&self) -> &Arc<dyn ClientSink> {
        &self.sink
    }

    // ── State machine ─────────────────────────────────────────────────────────

    pub fn current_state(&self) -> RuntimeState {
        RuntimeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Standby → Runtime.  Returns `true` if the state changed.
    ///
    /// The host's runtime-started hook fires only on an actual change, so a
    /// repeated call is silent.
    pub async fn start_runtime(&self) -> bool {
        let changed = self
            .state
            .compare_exchange(STANDBY, RUNTIME, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if changed {
            info!("runtime started; new connections will be rejected");
            self.sink.on_runtime_started().await;
        }
        changed
    }

    /// Runtime → Standby.  Returns `true` if the state changed.
    pub async fn stop_runtime(&self) -> bool {
        let changed = self
            .state
            .compare_exchange(RUNTIME, STANDBY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if changed {
            info!("runtime stopped; accepting new connections");
            self.sink.on_runtime_stopped().await;
        }
        changed
    }

    // ── Admission ─────────────────────────────────────────────────────────────

    /// Runs the admission checks and, on success, inserts the registry entry.
    ///
    /// Returns the receiver that fires when the admin surface kicks this
    /// client.
    pub async fn admit(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<oneshot::Receiver<()>, AdmissionError> {
        if self.current_state() != RuntimeState::Standby {
            warn!("received new connection from [{fingerprint}] while not on standby");
            return Err(AdmissionError::NotOnStandby);
        }

        let mut registry = self.registry.lock().await;
        match registry.try_insert(fingerprint.clone(), self.max_clients) {
            Ok(kick) => {
                debug!(
                    "admitted [{fingerprint}] ({}/{})",
                    registry.len(),
                    self.max_clients
                );
                Ok(kick)
            }
            Err(InsertRejection::Full) => {
                warn!("received new connection from [{fingerprint}] while on connection limit");
                Err(AdmissionError::AtCapacity)
            }
            Err(InsertRejection::Duplicate) => {
                warn!("duplicate connection for [{fingerprint}] rejected");
                Err(AdmissionError::Duplicate)
            }
        }
    }

    /// Fires the invalid-connection hook if `error` calls for it.
    pub async fn report_rejection(&self, error: AdmissionError) {
        if error.notifies_host() {
            self.sink.on_invalid_connection_attempt().await;
        }
    }

    /// Asks the host for a handle for an admitted entry.
    ///
    /// On failure the entry is removed again, freeing its slot.
    pub async fn connect(&self, fingerprint: &Fingerprint) -> Result<ClientHandle, SinkError> {
        match self.sink.on_client_connect(fingerprint).await {
            Ok(handle) => {
                self.registry.lock().await.set_handle(fingerprint, handle);
                info!("client [{fingerprint}] connected as {handle}");
                Ok(handle)
            }
            Err(e) => {
                self.registry.lock().await.remove(fingerprint);
                warn!("host refused [{fingerprint}]: {e}");
                Err(e)
            }
        }
    }

    /// Hands one decoded record to the host.
    pub async fn deliver_input(
        &self,
        fingerprint: &Fingerprint,
        handle: ClientHandle,
        record: ControllerInputRecord,
    ) {
        self.registry.lock().await.record_input(fingerprint);
        self.sink.on_input_received(handle, record).await;
    }

    /// Removes the entry and, if the host had issued a handle for it, fires
    /// the disconnect hook.
    pub async fn release(&self, fingerprint: &Fingerprint) -> Option<ClientHandle> {
        let entry = self.registry.lock().await.remove(fingerprint);
        let handle = entry.and_then(|e| e.handle);
        if let Some(handle) = handle {
            self.sink.on_client_disconnect(handle).await;
        }
        handle
    }

    // ── Admin ─────────────────────────────────────────────────────────────────

    /// Asks the connection task for `fingerprint` to close with a close frame.
    pub async fn disconnect_client(&self, fingerprint: &Fingerprint) -> bool {
        let kicked = self.registry.lock().await.kick(fingerprint);
        if kicked {
            info!("disconnect requested for [{fingerprint}]");
        }
        kicked
    }

    pub async fn connected_clients(&self) -> Vec<ClientSnapshot> {
        self.registry.lock().await.snapshot()
    }

    pub async fn client_count(&self) -> usize {
        self.registry.lock().await.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::client_sink::MockClientSink;
    use couchpad_core::Vector2;

    fn quiet_sink() -> MockClientSink {
        let mut sink = MockClientSink::new();
        sink.expect_on_client_connect()
            .returning(|_| Ok(ClientHandle::new()));
        sink.expect_on_client_disconnect().returning(|_| ());
        sink.expect_on_invalid_connection_attempt().returning(|| ());
        sink.expect_on_input_received().returning(|_, _| ());
        sink.expect_on_runtime_started().returning(|| ());
        sink.expect_on_runtime_stopped().returning(|| ());
        sink
    }

    fn manager(max: usize, sink: MockClientSink) -> LifecycleManager {
        LifecycleManager::new(max, Arc::new(sink))
    }

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from(s)
    }

    // ── State machine ─────────────────────────────────────────────────────────

    #[test]
    fn test_initial_state_is_standby() {
        let mgr = manager(2, quiet_sink());
        assert_eq!(mgr.current_state(), RuntimeState::Standby);
    }

    #[tokio::test]
    async fn test_transitions_are_idempotent() {
        let mgr = manager(2, quiet_sink());
        assert!(mgr.start_runtime().await);
        assert!(!mgr.start_runtime().await);
        assert_eq!(mgr.current_state(), RuntimeState::Runtime);
        assert!(mgr.stop_runtime().await);
        assert!(!mgr.stop_runtime().await);
        assert_eq!(mgr.current_state(), RuntimeState::Standby);
    }

    #[tokio::test]
    async fn test_runtime_hooks_fire_once_per_real_transition() {
        // Arrange: each hook may fire exactly once.
        let mut sink = MockClientSink::new();
        sink.expect_on_runtime_started().times(1).returning(|| ());
        sink.expect_on_runtime_stopped().times(1).returning(|| ());
        let mgr = manager(2, sink);

        // Act: the second call of each pair changes nothing.
        mgr.start_runtime().await;
        mgr.start_runtime().await;
        mgr.stop_runtime().await;
        mgr.stop_runtime().await;

        // Assert
        assert_eq!(mgr.current_state(), RuntimeState::Standby);
    }

    #[tokio::test]
    async fn test_stop_on_standby_fires_no_hook() {
        let mut sink = MockClientSink::new();
        sink.expect_on_runtime_started().times(0);
        sink.expect_on_runtime_stopped().times(0);
        let mgr = manager(2, sink);

        assert!(!mgr.stop_runtime().await);
    }

    #[test]
    fn test_zero_max_clients_falls_back_to_two() {
        let mgr = manager(0, quiet_sink());
        assert_eq!(mgr.max_clients(), FALLBACK_MAX_CLIENTS);
    }

    // ── Admission ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_capacity_two_admits_two_and_rejects_third() {
        // Arrange
        let mgr = manager(2, quiet_sink());

        // Act
        let first = mgr.admit(&fp("10.0.0.2:1000")).await;
        let second = mgr.admit(&fp("10.0.0.3:1000")).await;
        let third = mgr.admit(&fp("10.0.0.4:1000")).await;

        // Assert
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(third.unwrap_err(), AdmissionError::AtCapacity);
        assert_eq!(mgr.client_count().await, 2);
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_rejected_under_capacity() {
        let mgr = manager(4, quiet_sink());
        mgr.admit(&fp("10.0.0.2:1000")).await.unwrap();
        let again = mgr.admit(&fp("10.0.0.2:1000")).await;
        assert_eq!(again.unwrap_err(), AdmissionError::Duplicate);
        assert_eq!(mgr.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_runtime_state_rejects_regardless_of_capacity() {
        let mgr = manager(8, quiet_sink());
        mgr.start_runtime().await;
        let result = mgr.admit(&fp("10.0.0.9:1000")).await;
        assert_eq!(result.unwrap_err(), AdmissionError::NotOnStandby);
        assert_eq!(mgr.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_admissions_never_exceed_capacity() {
        // Arrange
        let mgr = Arc::new(manager(3, quiet_sink()));

        // Act
        let mut tasks = Vec::new();
        for i in 0..32 {
            let mgr = Arc::clone(&mgr);
            tasks.push(tokio::spawn(async move {
                mgr.admit(&Fingerprint::from(format!("10.0.0.{i}:9").as_str()))
                    .await
                    .is_ok()
            }));
        }
        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }

        // Assert
        assert_eq!(admitted, 3);
        assert_eq!(mgr.client_count().await, 3);
    }

    #[test]
    fn test_peer_messages() {
        assert_eq!(
            AdmissionError::AtCapacity.peer_message(),
            "Server on maximum occupancy."
        );
        assert_eq!(
            AdmissionError::Duplicate.peer_message(),
            "Internal Server Error"
        );
        assert!(AdmissionError::NotOnStandby.notifies_host());
        assert!(AdmissionError::AtCapacity.notifies_host());
        assert!(!AdmissionError::Duplicate.notifies_host());
    }

    #[tokio::test]
    async fn test_report_rejection_skips_hook_for_duplicate() {
        // Arrange: the hook may fire exactly once, for the capacity rejection.
        let mut sink = MockClientSink::new();
        sink.expect_on_invalid_connection_attempt()
            .times(1)
            .returning(|| ());
        let mgr = manager(1, sink);

        // Act
        mgr.report_rejection(AdmissionError::Duplicate).await;
        mgr.report_rejection(AdmissionError::AtCapacity).await;
    }

    // ── Connect / release ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_connect_stores_handle_and_release_fires_disconnect() {
        // Arrange
        let handle = ClientHandle::new();
        let mut sink = MockClientSink::new();
        sink.expect_on_client_connect()
            .withf(|f| f.as_str() == "10.0.0.2:1000")
            .times(1)
            .returning(move |_| Ok(handle));
        sink.expect_on_client_disconnect()
            .withf(move |h| *h == handle)
            .times(1)
            .returning(|_| ());
        let mgr = manager(2, sink);
        let key = fp("10.0.0.2:1000");
        mgr.admit(&key).await.unwrap();

        // Act
        let connected = mgr.connect(&key).await;
        let snapshot = mgr.connected_clients().await;
        let released = mgr.release(&key).await;

        // Assert
        assert_eq!(connected, Ok(handle));
        assert_eq!(snapshot[0].handle, Some(handle));
        assert_eq!(released, Some(handle));
        assert_eq!(mgr.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_connect_frees_the_slot_without_disconnect_hook() {
        let mut sink = MockClientSink::new();
        sink.expect_on_client_connect()
            .returning(|_| Err(SinkError::ConsumerGone));
        sink.expect_on_client_disconnect().times(0);
        let mgr = manager(1, sink);
        let key = fp("10.0.0.2:1000");
        mgr.admit(&key).await.unwrap();

        assert_eq!(mgr.connect(&key).await, Err(SinkError::ConsumerGone));
        assert_eq!(mgr.client_count().await, 0);
        assert!(mgr.admit(&fp("10.0.0.3:1000")).await.is_ok());
    }

    #[tokio::test]
    async fn test_deliver_input_counts_and_forwards() {
        // Arrange
        let mut sink = MockClientSink::new();
        sink.expect_on_client_connect()
            .returning(|_| Ok(ClientHandle::new()));
        sink.expect_on_input_received()
            .withf(|_, r| r.letter_buttons == 4)
            .times(2)
            .returning(|_, _| ());
        let mgr = manager(2, sink);
        let key = fp("10.0.0.2:1000");
        mgr.admit(&key).await.unwrap();
        let handle = mgr.connect(&key).await.unwrap();
        let record = ControllerInputRecord {
            stick_a: Vector2::ZERO,
            stick_b: Vector2::ZERO,
            letter_buttons: 4,
            direction_buttons: 0,
        };

        // Act
        mgr.deliver_input(&key, handle, record).await;
        mgr.deliver_input(&key, handle, record).await;

        // Assert
        assert_eq!(mgr.connected_clients().await[0].inputs_received, 2);
    }

    #[tokio::test]
    async fn test_disconnect_client_fires_kick_receiver() {
        let mgr = manager(2, quiet_sink());
        let key = fp("10.0.0.2:1000");
        let kick = mgr.admit(&key).await.unwrap();

        assert!(mgr.disconnect_client(&key).await);
        assert!(kick.await.is_ok());
        assert!(!mgr.disconnect_client(&fp("10.0.0.3:1000")).await);
    }
}
