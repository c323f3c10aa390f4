//! # couchpad-core
//!
//! Shared library for couchpad containing the hand-rolled WebSocket frame
//! codec, the HTTP upgrade handshake, the controller input record decoder and
//! the room code generator.
//!
//! Everything in this crate is a pure function over byte slices or strings.
//! It has zero dependencies on sockets, async runtimes or OS interface APIs,
//! so it can be tested and benchmarked in isolation.
//!
//! # Architecture overview
//!
//! couchpad turns phones into game controllers: a browser page on the phone
//! opens a WebSocket to the host on the local network and streams a small
//! binary record every time a stick moves or a button is pressed.
//!
//! - **`protocol`** – How bytes travel over the network.  The upgrade
//!   handshake promotes a TCP connection to a WebSocket session, the frame
//!   codec splits the stream into frames, and the controller module decodes a
//!   frame payload into a typed [`ControllerInputRecord`].
//!
//! - **`domain`** – Pure logic with no wire concerns.  The [`RoomCode`] is a
//!   short letter code derived from the host's LAN address that players type
//!   on their phone to find the host.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `couchpad_core::RoomCode` instead of `couchpad_core::domain::room_code::RoomCode`.
pub use domain::room_code::{RoomCode, RoomCodeError};
pub use protocol::controller::{
    decode_controller_record, encode_controller_record, extract_button_flags,
    ControllerInputRecord, DirectionButtons, LetterButtons, RecordError, Vector2,
    CONTROLLER_RECORD_SIZE,
};
pub use protocol::frame::{
    apply_mask, decode_frame, encode_frame, encode_text_frame, Frame, FrameError, FrameHeader,
    Opcode, CLOSE_FRAME,
};
pub use protocol::handshake::{
    accept_key, bad_request_response, negotiate, switching_protocols_response, HandshakeError,
    HandshakeOutcome, HANDSHAKE_BUFFER_SIZE,
};
