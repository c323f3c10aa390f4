//! Application layer for the host.
//!
//! Sits between the wire formats in `couchpad_core` and the sockets in
//! `infrastructure`.  Nothing here touches a socket; the lifecycle manager
//! decides *whether* a connection may become a client, the network layer
//! carries the decision out.
//!
//! # Sub-modules
//!
//! - **`client_sink`**    – The collaborator interface the embedding host
//!   implements to hear about connects, disconnects and input.
//!
//! - **`manage_clients`** – In-memory registry of admitted clients keyed by
//!   connection fingerprint.
//!
//! - **`lifecycle`**      – The Standby/Runtime state machine and the
//!   admission checks run for every new connection.

pub mod client_sink;
pub mod lifecycle;
pub mod manage_clients;
