//! Domain values for couchpad.
//!
//! This module contains pure logic with no wire or infrastructure
//! dependencies.  The only value today is the room code shown to players.

/// Human-shareable room code derived from the host address.
///
/// See [`room_code::RoomCode`] for the main type.
pub mod room_code;
