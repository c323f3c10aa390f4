//! couchpad-host library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::client_sink::{ClientHandle, ClientSink, SinkError};
pub use application::lifecycle::{AdmissionError, LifecycleManager, RuntimeState};
pub use application::manage_clients::{ClientSnapshot, Fingerprint};
pub use infrastructure::host_queue::{HostEvent, HostEventQueue, HostEventReceiver, HostHandler};
pub use infrastructure::network::listener::{Server, ServerConfig, ServerHandle, StartupError};
