//! Network infrastructure for the host.
//!
//! # Sub-modules
//!
//! - **`listener`**  – Binds the TCP listener, runs the accept loop and owns
//!   the admin [`listener::ServerHandle`].
//!
//! - **`session`**   – Per-connection task: single-read upgrade handshake,
//!   admission, the sequential frame loop and the close rules.
//!
//! - **`discovery`** – Picks the LAN IPv4 address the listener binds to and
//!   the room code is derived from.

pub mod discovery;
pub mod listener;
pub mod session;
