//! Controller input record carried in every data frame.
//!
//! Layout, relative to the start offset (all values little-endian):
//! ```text
//! [reserved:4][stick_a.x:f32][stick_a.y:f32][stick_b.x:f32][stick_b.y:f32][letters:i16][directions:i16]
//! ```
//! Total: 24 bytes.  The reserved prefix is skipped, never validated.
//!
//! # Button flags
//!
//! A button mask expands into four flags with these exact expressions:
//!
//! | flag   | expression          | true when                  |
//! |--------|---------------------|----------------------------|
//! | first  | `mask & 4 == 4`     | bit 2 set                  |
//! | second | `mask & 2 == 2`     | bit 1 set                  |
//! | third  | `(mask ^ 1) == 1`   | the whole mask is zero     |
//! | fourth | `(mask & 0) == 0`   | always                     |
//!
//! The third and fourth expressions are almost certainly slips for real bit
//! tests.  [`extract_button_flags`] keeps them verbatim; the raw masks stay on
//! [`ControllerInputRecord`] for consumers that want real bit tests.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of one controller record on the wire.
pub const CONTROLLER_RECORD_SIZE: usize = 24;

const STICK_A_X: usize = 4;
const STICK_A_Y: usize = 8;
const STICK_B_X: usize = 12;
const STICK_B_Y: usize = 16;
const LETTER_BUTTONS: usize = 20;
const DIRECTION_BUTTONS: usize = 22;

/// Errors that can occur while decoding a controller record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    /// The buffer ends before `offset + 24`.
    #[error("controller record at offset {offset} needs {needed} bytes, got {available}")]
    TooShort {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

// ── Values ────────────────────────────────────────────────────────────────────

/// A 2-D analog stick position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Returns the unit vector in the same direction, or [`Vector2::ZERO`]
    /// when the length is too small to normalize.
    pub fn normalized(&self) -> Vector2 {
        let len = self.length();
        if len > 1e-5 {
            Vector2::new(self.x / len, self.y / len)
        } else {
            Vector2::ZERO
        }
    }
}

/// One decoded controller input sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerInputRecord {
    pub stick_a: Vector2,
    pub stick_b: Vector2,
    pub letter_buttons: i16,
    pub direction_buttons: i16,
}

/// Direction pad flags in extraction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectionButtons {
    pub up: bool,
    pub down: bool,
    pub right: bool,
    pub left: bool,
}

/// Letter button flags in extraction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LetterButtons {
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
}

impl ControllerInputRecord {
    pub fn directions(&self) -> DirectionButtons {
        let (up, down, right, left) = extract_button_flags(self.direction_buttons);
        DirectionButtons {
            up,
            down,
            right,
            left,
        }
    }

    pub fn letters(&self) -> LetterButtons {
        let (a, b, x, y) = extract_button_flags(self.letter_buttons);
        LetterButtons { a, b, x, y }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Expands a button mask into four flags (see the module docs for the table).
#[allow(clippy::identity_op, clippy::erasing_op, clippy::bad_bit_mask)]
pub fn extract_button_flags(mask: i16) -> (bool, bool, bool, bool) {
    (
        (mask & 4) == 4,
        (mask & 2) == 2,
        (mask ^ 1) == 1,
        (mask & 0) == 0,
    )
}

/// Decodes one controller record starting at `offset` in `data`.
///
/// # Errors
///
/// Returns [`RecordError::TooShort`] if fewer than `offset + 24` bytes are
/// available.
///
/// # Examples
///
/// ```rust
/// use couchpad_core::protocol::controller::decode_controller_record;
///
/// let mut bytes = [0u8; 24];
/// bytes[4..8].copy_from_slice(&1.0f32.to_le_bytes());
/// bytes[20..22].copy_from_slice(&4i16.to_le_bytes());
/// let record = decode_controller_record(0, &bytes).unwrap();
/// assert_eq!(record.stick_a.x, 1.0);
/// assert!(record.letters().a);
/// ```
pub fn decode_controller_record(
    offset: usize,
    data: &[u8],
) -> Result<ControllerInputRecord, RecordError> {
    let needed = offset.saturating_add(CONTROLLER_RECORD_SIZE);
    if data.len() < needed {
        return Err(RecordError::TooShort {
            offset,
            needed,
            available: data.len(),
        });
    }
    let record = &data[offset..needed];

    Ok(ControllerInputRecord {
        stick_a: Vector2::new(read_f32(record, STICK_A_X), read_f32(record, STICK_A_Y)),
        stick_b: Vector2::new(read_f32(record, STICK_B_X), read_f32(record, STICK_B_Y)),
        letter_buttons: read_i16(record, LETTER_BUTTONS),
        direction_buttons: read_i16(record, DIRECTION_BUTTONS),
    })
}

/// Encodes a record in the wire layout with a zeroed reserved prefix.
///
/// The host never sends records; this exists for test peers and benchmarks
/// that play the phone's part.
pub fn encode_controller_record(record: &ControllerInputRecord) -> [u8; CONTROLLER_RECORD_SIZE] {
    let mut buf = [0u8; CONTROLLER_RECORD_SIZE];
    buf[STICK_A_X..STICK_A_X + 4].copy_from_slice(&record.stick_a.x.to_le_bytes());
    buf[STICK_A_Y..STICK_A_Y + 4].copy_from_slice(&record.stick_a.y.to_le_bytes());
    buf[STICK_B_X..STICK_B_X + 4].copy_from_slice(&record.stick_b.x.to_le_bytes());
    buf[STICK_B_Y..STICK_B_Y + 4].copy_from_slice(&record.stick_b.y.to_le_bytes());
    buf[LETTER_BUTTONS..LETTER_BUTTONS + 2].copy_from_slice(&record.letter_buttons.to_le_bytes());
    buf[DIRECTION_BUTTONS..DIRECTION_BUTTONS + 2]
        .copy_from_slice(&record.direction_buttons.to_le_bytes());
    buf
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn read_f32(buf: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_i16(buf: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([buf[at], buf[at + 1]])
}

// ── Tests ─────────────────────────────────────────────────────────────────────
