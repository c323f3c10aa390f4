//! HTTP-to-WebSocket upgrade handshake.
//!
//! This is not a general HTTP parser.  The request is treated as a text blob
//! and only four header checks matter:
//!
//! ```text
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: <key>
//! Sec-WebSocket-Version: 13
//! ```
//!
//! All four are matched case-insensitively as substrings.  The key is the
//! text after the first colon of the first line starting with
//! `Sec-WebSocket-Key:`, trimmed.
//!
//! # Single-read constraint
//!
//! The host reads the request with one read of at most
//! [`HANDSHAKE_BUFFER_SIZE`] bytes and assumes the whole request arrived in
//! it.  A request split across TCP segments, or longer than the buffer, fails
//! the header checks and is answered with a 400.  Browsers on a LAN send the
//! request in a single segment, which is what this relies on.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Size of the single read used to receive the upgrade request.
pub const HANDSHAKE_BUFFER_SIZE: usize = 1024;

/// GUID appended to the client key before hashing (RFC 6455 §1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const KEY_HEADER: &str = "Sec-WebSocket-Key:";

/// Header substrings that must all be present, in check order.
const REQUIRED_HEADERS: [&str; 4] = [
    "Upgrade: websocket",
    "Connection: Upgrade",
    KEY_HEADER,
    "Sec-WebSocket-Version: 13",
];

/// Errors that make an upgrade request unacceptable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// The peer closed or sent nothing before the request was read.
    #[error("empty upgrade request")]
    EmptyRequest,

    /// A required header substring is absent.
    #[error("upgrade request is missing `{0}`")]
    MissingHeader(&'static str),

    /// The key header is present somewhere but not at the start of a line,
    /// or has an empty value.
    #[error("upgrade request has no usable Sec-WebSocket-Key line")]
    MissingKey,
}

// ── Status codes ──────────────────────────────────────────────────────────────

/// Status codes reported in JSON bodies sent to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum StatusCode {
    Ok = 200,
    Ignore = 201,
    Return = 202,
    BadRequest = 400,
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

#[derive(Serialize)]
struct StatusBody {
    code: u16,
}

// ── Outcome ───────────────────────────────────────────────────────────────────

/// Result of negotiating one upgrade request.
///
/// Either way there is a response to write back before anything else
/// happens on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The request is a valid upgrade; `response` is the 101 reply.
    Accepted { key: String, response: String },
    /// The request was refused; `response` is the 400 reply and the socket
    /// must be closed after writing it.
    Rejected {
        reason: HandshakeError,
        response: String,
    },
}

impl HandshakeOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, HandshakeOutcome::Accepted { .. })
    }

    /// Bytes to write back to the peer.
    pub fn response_bytes(&self) -> &[u8] {
        match self {
            HandshakeOutcome::Accepted { response, .. }
            | HandshakeOutcome::Rejected { response, .. } => response.as_bytes(),
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Validates an upgrade request and returns the client key.
///
/// Invalid UTF-8 is replaced rather than rejected, so only the header checks
/// decide the outcome.
///
/// # Errors
///
/// Returns [`HandshakeError`] naming the first check that failed.
pub fn parse_upgrade_request(request: &[u8]) -> Result<String, HandshakeError> {
    if request.is_empty() {
        return Err(HandshakeError::EmptyRequest);
    }
    let text = String::from_utf8_lossy(request);
    let lowered = text.to_ascii_lowercase();

    for header in REQUIRED_HEADERS {
        if !lowered.contains(&header.to_ascii_lowercase()) {
            return Err(HandshakeError::MissingHeader(header));
        }
    }

    text.split("\r\n")
        .find(|line| starts_with_ignore_case(line, KEY_HEADER))
        .and_then(|line| line.split_once(':'))
        .map(|(_, value)| value.trim())
        .filter(|key| !key.is_empty())
        .map(str::to_owned)
        .ok_or(HandshakeError::MissingKey)
}

/// Computes `base64(SHA-1(key + GUID))`.
///
/// # Examples
///
/// ```rust
/// use couchpad_core::protocol::handshake::accept_key;
///
/// assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Builds the `101 Switching Protocols` reply for `key`.
pub fn switching_protocols_response(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    )
}

/// Builds the `400 Bad Request` reply with a `{"code":400}` JSON body.
pub fn bad_request_response() -> String {
    let body = serde_json::to_string(&StatusBody {
        code: StatusCode::BadRequest.as_u16(),
    })
    .unwrap_or_else(|_| String::from("{\"code\":400}"));
    format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n\
         {body}",
        body.len()
    )
}

/// Negotiates one upgrade request, producing the reply to write back.
pub fn negotiate(request: &[u8]) -> HandshakeOutcome {
    match parse_upgrade_request(request) {
        Ok(key) => {
            let response = switching_protocols_response(&key);
            HandshakeOutcome::Accepted { key, response }
        }
        Err(reason) => HandshakeOutcome::Rejected {
            reason,
            response: bad_request_response(),
        },
    }
}

fn starts_with_ignore_case(line: &str, prefix: &str) -> bool {
    line.len() >= prefix.len()
        && line.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
