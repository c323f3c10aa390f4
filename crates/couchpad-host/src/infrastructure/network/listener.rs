//! Listener startup, the accept loop and the admin handle.
//!
//! [`Server::start`] resolves the host's LAN address, derives the room code,
//! binds the socket and spawns the accept loop.  Each accepted socket gets
//! its own task running [`handle_connection`], which performs the handshake
//! there so a slow client never stalls the acceptor.
//!
//! The returned [`ServerHandle`] is the admin surface: runtime transitions,
//! the client list, kicks and shutdown.  Shutdown stops the accept loop
//! immediately; sessions already running are left to finish on their own.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use couchpad_core::protocol::frame::DEFAULT_MAX_PAYLOAD;
use couchpad_core::RoomCode;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::application::client_sink::ClientSink;
use crate::application::lifecycle::{LifecycleManager, RuntimeState};
use crate::application::manage_clients::{ClientSnapshot, Fingerprint};
use crate::infrastructure::network::discovery::discover_local_ipv4;
use crate::infrastructure::network::session::{handle_connection, SessionSettings};

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 7777;

/// How long one `accept()` may wait before the loop re-checks the
/// running flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

// ── Configuration ─────────────────────────────────────────────────────────────

/// Runtime settings for one listener.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    /// Skips interface discovery when set.  Must be IPv4.
    pub bind_address: Option<IpAddr>,
    pub max_clients: usize,
    pub max_frame_payload: usize,
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: None,
            max_clients: 2,
            max_frame_payload: DEFAULT_MAX_PAYLOAD,
            handshake_timeout: Duration::from_millis(5000),
        }
    }
}

/// Errors that prevent the accept loop from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("no usable non-loopback IPv4 address found")]
    NoLocalAddress,

    #[error("room codes are derived from IPv4 addresses; cannot bind {0}")]
    NotIpv4(IpAddr),

    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

// ── Server ────────────────────────────────────────────────────────────────────

/// Entry point for starting a listener.
pub struct Server;

impl Server {
    /// Binds the listener and spawns the accept loop.
    ///
    /// Calls [`ClientSink::on_server_ready`] once the socket is bound.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] if no address can be determined or the bind
    /// fails.  The accept loop is not started in that case.
    pub async fn start(
        config: ServerConfig,
        sink: Arc<dyn ClientSink>,
    ) -> Result<ServerHandle, StartupError> {
        let address = match resolve_address(config.bind_address) {
            Ok(address) => address,
            Err(e) => {
                error!("server startup failed: {e}");
                return Err(e);
            }
        };
        let room_code = RoomCode::from_ipv4(address);

        let bind_addr = SocketAddr::new(IpAddr::V4(address), config.port);
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| StartupError::Bind {
                addr: bind_addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| StartupError::Bind {
                addr: bind_addr,
                source,
            })?;

        let lifecycle = Arc::new(LifecycleManager::new(
            config.max_clients,
            Arc::clone(&sink),
        ));
        sink.on_server_ready(IpAddr::V4(address), &room_code).await;
        info!(
            "Server successfully started on {}:{}. Room Code: {}",
            address,
            local_addr.port(),
            room_code
        );

        let settings = SessionSettings {
            max_frame_payload: config.max_frame_payload,
            handshake_timeout: config.handshake_timeout,
        };
        let running = Arc::new(AtomicBool::new(true));
        let accept_task = tokio::spawn(run_accept_loop(
            listener,
            Arc::clone(&lifecycle),
            settings,
            Arc::clone(&running),
        ));

        Ok(ServerHandle {
            lifecycle,
            room_code,
            address,
            local_addr,
            running,
            accept_task,
        })
    }
}

fn resolve_address(configured: Option<IpAddr>) -> Result<Ipv4Addr, StartupError> {
    match configured {
        Some(IpAddr::V4(v4)) => Ok(v4),
        Some(other) => Err(StartupError::NotIpv4(other)),
        None => discover_local_ipv4().ok_or(StartupError::NoLocalAddress),
    }
}

/// Accepts connections until `running` is cleared or the task is aborted.
async fn run_accept_loop(
    listener: TcpListener,
    lifecycle: Arc<LifecycleManager>,
    settings: SessionSettings,
    running: Arc<AtomicBool>,
) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("accepted connection from {peer_addr}");
                let lifecycle = Arc::clone(&lifecycle);
                tokio::spawn(handle_connection(stream, peer_addr, lifecycle, settings));
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Admin surface for a running listener.
///
/// Dropping the handle stops the accept loop, as [`ServerHandle::shutdown`]
/// does.
pub struct ServerHandle {
    lifecycle: Arc<LifecycleManager>,
    room_code: RoomCode,
    address: Ipv4Addr,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    accept_task: JoinHandle<()>,
}

impl ServerHandle {
    pub async fn start_runtime(&self) -> bool {
        self.lifecycle.start_runtime().await
    }

    pub async fn stop_runtime(&self) -> bool {
        self.lifecycle.stop_runtime().await
    }

    pub fn current_state(&self) -> RuntimeState {
        self.lifecycle.current_state()
    }

    /// `true` while the accept loop is alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed) && !self.accept_task.is_finished()
    }

    pub fn room_code(&self) -> &RoomCode {
        &self.room_code
    }

    /// The LAN address the room code was derived from.
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// The bound socket address, including the OS-assigned port when the
    /// configured port was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn connected_clients(&self) -> Vec<ClientSnapshot> {
        self.lifecycle.connected_clients().await
    }

    /// Closes the named client with a server close frame.  Returns `false`
    /// if no such client is connected.
    pub async fn disconnect_client(&self, fingerprint: &Fingerprint) -> bool {
        self.lifecycle.disconnect_client(fingerprint).await
    }

    /// Stops accepting.  In-flight sessions are not drained.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.accept_task.abort();
        info!("server on {} shut down", self.local_addr);
    }
}

impl Drop for ServerHandle {
    /// A dropped handle takes the accept loop with it.
    fn drop(&mut self) {
        if self.running.swap(false, Ordering::Relaxed) {
            self.accept_task.abort();
            debug!("server handle for {} dropped; accept loop stopped", self.local_addr);
        }
    }
}
