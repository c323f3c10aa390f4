//! WebSocket frame codec (the RFC 6455 subset couchpad needs).
//!
//! Wire format:
//! ```text
//! [FIN|RSV|opcode:1][MASK|len7:1][len16:2 | len64:8]?[mask_key:4]?[payload:N]
//! ```
//! `len7` of 126 means a big-endian `u16` length follows, 127 means a
//! big-endian `u64` length follows.  Client frames carry a masking key and the
//! payload is XORed with `key[i % 4]`.  Server frames are never masked.
//!
//! Fragmentation is not supported: every logical message must arrive as a
//! single frame, and the FIN bit of inbound frames is reported but never
//! checked.  Decoding either consumes one whole frame or fails; nothing is
//! buffered across calls.

use thiserror::Error;
use tracing::debug;

// ── Wire constants ────────────────────────────────────────────────────────────

/// Server-initiated close frame: FIN + opcode 8, zero-length payload.
pub const CLOSE_FRAME: [u8; 2] = [0x88, 0x00];

/// Largest payload length that fits in the 7-bit length indicator.
pub const MAX_INLINE_PAYLOAD: usize = 125;

/// Default upper bound on an inbound payload, in bytes.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const LEN7_MASK: u8 = 0x7F;
const LEN_U16_MARKER: u8 = 126;
const LEN_U64_MARKER: u8 = 127;
const MASK_KEY_LEN: usize = 4;

/// Errors that can occur while decoding a frame.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FrameError {
    /// The byte slice is shorter than the frame it starts.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// A 64-bit payload length does not fit this platform's `usize`.
    #[error("payload length {0} does not fit in memory on this platform")]
    LengthOverflow(u64),

    /// The declared payload length exceeds the configured limit.
    #[error("payload length {length} exceeds the {limit} byte limit")]
    PayloadTooLarge { length: u64, limit: usize },
}

// ── Opcode ────────────────────────────────────────────────────────────────────

/// Frame opcode (low nibble of the first header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Any of the reserved opcodes 0x3–0x7 and 0xB–0xF.
    Reserved(u8),
}

impl Opcode {
    /// Returns the 4-bit wire value.
    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(n) => n & OPCODE_MASK,
        }
    }

    /// Returns `true` for opcodes that carry application data.
    ///
    /// Everything except the three control opcodes counts as data; reserved
    /// opcodes are treated as data rather than rejected.
    pub fn is_data(self) -> bool {
        !matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value & OPCODE_MASK {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            n => Opcode::Reserved(n),
        }
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    /// Payload length exactly as declared on the wire.
    pub payload_len: u64,
    pub mask_key: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Size of the fixed part of every header.
    pub const BASE_LEN: usize = 2;

    /// Returns the full header length implied by the first two header bytes,
    /// including the extended length and the masking key.
    ///
    /// Stream readers read [`Self::BASE_LEN`] bytes, call this, read the
    /// remainder and then hand the whole header to [`FrameHeader::decode`].
    pub fn required_len(first_two: [u8; 2]) -> usize {
        let extended = match first_two[1] & LEN7_MASK {
            LEN_U16_MARKER => 2,
            LEN_U64_MARKER => 8,
            _ => 0,
        };
        let mask = if first_two[1] & MASK_BIT != 0 {
            MASK_KEY_LEN
        } else {
            0
        };
        Self::BASE_LEN + extended + mask
    }

    /// Decodes a header from the beginning of `bytes`.
    ///
    /// Returns the header and the number of header bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InsufficientData`] if `bytes` ends inside the
    /// header.
    pub fn decode(bytes: &[u8]) -> Result<(FrameHeader, usize), FrameError> {
        require_len(bytes, Self::BASE_LEN)?;
        let header_len = Self::required_len([bytes[0], bytes[1]]);
        require_len(bytes, header_len)?;

        let fin = bytes[0] & FIN_BIT != 0;
        let opcode = Opcode::from(bytes[0]);
        let masked = bytes[1] & MASK_BIT != 0;

        let mut cursor = Self::BASE_LEN;
        let payload_len = match bytes[1] & LEN7_MASK {
            LEN_U16_MARKER => {
                let len = u16::from_be_bytes([bytes[2], bytes[3]]);
                cursor += 2;
                u64::from(len)
            }
            LEN_U64_MARKER => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[2..10]);
                cursor += 8;
                u64::from_be_bytes(raw)
            }
            n => u64::from(n),
        };

        let mask_key = if masked {
            let mut key = [0u8; MASK_KEY_LEN];
            key.copy_from_slice(&bytes[cursor..cursor + MASK_KEY_LEN]);
            cursor += MASK_KEY_LEN;
            Some(key)
        } else {
            None
        };

        Ok((
            FrameHeader {
                fin,
                opcode,
                payload_len,
                mask_key,
            },
            cursor,
        ))
    }

    /// Converts the declared payload length to a buffer size, rejecting
    /// anything above `limit` before a buffer is allocated for it.
    ///
    /// # Errors
    ///
    /// [`FrameError::LengthOverflow`] if the length does not fit `usize`,
    /// [`FrameError::PayloadTooLarge`] if it exceeds `limit`.
    pub fn checked_payload_len(&self, limit: usize) -> Result<usize, FrameError> {
        let len = usize::try_from(self.payload_len)
            .map_err(|_| FrameError::LengthOverflow(self.payload_len))?;
        if len > limit {
            debug!(length = self.payload_len, limit, "frame payload over limit");
            return Err(FrameError::PayloadTooLarge {
                length: self.payload_len,
                limit,
            });
        }
        Ok(len)
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One decoded frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// XORs `payload` in place with `key[i % 4]`.
///
/// Applying the same key twice restores the input bytes.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % MASK_KEY_LEN];
    }
}

/// Decodes one frame from the beginning of `bytes`.
///
/// Returns the frame and the total number of bytes consumed (header +
/// payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`FrameError`] if the bytes end early or the declared payload
/// length exceeds `max_payload`.
///
/// # Examples
///
/// ```rust
/// use couchpad_core::protocol::frame::{decode_frame, encode_text_frame, Opcode};
///
/// let bytes = encode_text_frame("hello");
/// let (frame, consumed) = decode_frame(&bytes, 1024).unwrap();
/// assert_eq!(frame.opcode, Opcode::Text);
/// assert_eq!(frame.payload, b"hello");
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn decode_frame(bytes: &[u8], max_payload: usize) -> Result<(Frame, usize), FrameError> {
    let (header, header_len) = FrameHeader::decode(bytes)?;
    let payload_len = header.checked_payload_len(max_payload)?;

    let total = header_len
        .checked_add(payload_len)
        .ok_or(FrameError::LengthOverflow(header.payload_len))?;
    require_len(bytes, total)?;

    let mut payload = bytes[header_len..total].to_vec();
    if let Some(key) = header.mask_key {
        apply_mask(&mut payload, key);
    }

    Ok((
        Frame {
            fin: header.fin,
            opcode: header.opcode,
            payload,
        },
        total,
    ))
}

/// Encodes a single unmasked text frame with FIN set (first byte `0x81`).
///
/// # Examples
///
/// ```rust
/// use couchpad_core::protocol::frame::encode_text_frame;
///
/// assert_eq!(encode_text_frame("hi"), vec![0x81, 0x02, b'h', b'i']);
/// ```
pub fn encode_text_frame(text: &str) -> Vec<u8> {
    encode_frame(Opcode::Text, text.as_bytes(), None)
}

/// Encodes a single frame with FIN set.
///
/// The server only ever passes `mask_key: None`; a key is accepted so test
/// peers and benchmarks can produce browser-style masked frames.
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask_key: Option<[u8; 4]>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 14);
    buf.push(FIN_BIT | opcode.as_u8());

    let mask_flag = if mask_key.is_some() { MASK_BIT } else { 0 };
    let len = payload.len();
    if len <= MAX_INLINE_PAYLOAD {
        buf.push(mask_flag | len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(mask_flag | LEN_U16_MARKER);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(mask_flag | LEN_U64_MARKER);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask_key {
        Some(key) => {
            buf.extend_from_slice(&key);
            let start = buf.len();
            buf.extend_from_slice(payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.extend_from_slice(payload),
    }
    buf
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize) -> Result<(), FrameError> {
    if buf.len() < needed {
        Err(FrameError::InsufficientData {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
