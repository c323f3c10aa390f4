//! Collaborator interface implemented by the embedding host.
//!
//! The network side calls these hooks; the host decides what a "player" is.
//! Every hook is invoked from a connection task, never from the host's own
//! loop, so implementations that touch single-threaded state must hand the
//! work over (see `infrastructure::host_queue`).

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use couchpad_core::{ControllerInputRecord, RoomCode};
use thiserror::Error;
use uuid::Uuid;

use crate::application::manage_clients::Fingerprint;

/// Opaque handle the host returns for an admitted client.
///
/// The network side stores it and passes it back on disconnect and input;
/// it never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(pub Uuid);

impl ClientHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when the host cannot take a new client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The host's consumer loop is gone; nobody will answer.
    #[error("host event consumer has shut down")]
    ConsumerGone,

    /// The host refused the client.
    #[error("host refused client: {0}")]
    Refused(String),
}

/// Hooks invoked by the lifecycle manager.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// The listener is bound and accepting.
    async fn on_server_ready(&self, address: IpAddr, room_code: &RoomCode);

    /// A connection passed admission.  The connection task waits for the
    /// returned handle before it reads any frame.
    async fn on_client_connect(&self, fingerprint: &Fingerprint) -> Result<ClientHandle, SinkError>;

    /// A previously connected client is gone.
    async fn on_client_disconnect(&self, handle: ClientHandle);

    /// The host left `Standby`; new connections are now turned away.
    async fn on_runtime_started(&self);

    /// The host is back on `Standby` and accepting new connections.
    async fn on_runtime_stopped(&self);

    /// A connection was turned away for state or capacity.
    async fn on_invalid_connection_attempt(&self);

    /// One decoded input record from a connected client.
    async fn on_input_received(&self, handle: ClientHandle, record: ControllerInputRecord);
}
