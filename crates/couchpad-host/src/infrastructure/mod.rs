//! Infrastructure layer: sockets, configuration files and the host-side
//! event queue.
//!
//! # Sub-modules
//!
//! - **`network`**    – Listener, accept loop and per-connection sessions.
//!
//! - **`host_queue`** – A [`crate::ClientSink`] that forwards every callback
//!   onto a channel drained by a single-threaded consumer.
//!
//! - **`storage`**    – TOML configuration persistence.

pub mod host_queue;
pub mod network;
pub mod storage;
