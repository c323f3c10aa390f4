//! Protocol module containing the upgrade handshake, the frame codec and the
//! controller record layout.

pub mod controller;
pub mod frame;
pub mod handshake;

pub use controller::{decode_controller_record, ControllerInputRecord, RecordError};
pub use frame::{decode_frame, encode_text_frame, Frame, FrameError, FrameHeader, Opcode};
pub use handshake::{negotiate, HandshakeError, HandshakeOutcome};
