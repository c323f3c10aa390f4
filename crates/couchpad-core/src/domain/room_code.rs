//! Room code: a short letter code derived from the host's IPv4 address.
//!
//! Each octet `n` becomes two letters, `ALPHABET[n / 10]` then
//! `ALPHABET[n % 10]`, over the 52-letter alphabet `A–Z a–z`.  Since
//! `n / 10 <= 25`, the first letter of a pair is always upper case and the
//! second is always one of `A`–`J`.
//!
//! The code is purely informational.  It is never used for routing or access
//! control.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

const ALPHABET: &[u8; 52] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Error returned when the input is not an IPv4 dotted quad.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomCodeError {
    #[error("not an IPv4 address: {0:?}")]
    InvalidAddress(String),
}

/// Eight-letter code shown to players.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    /// Encodes an IPv4 address.
    pub fn from_ipv4(addr: Ipv4Addr) -> Self {
        let mut code = String::with_capacity(8);
        for octet in addr.octets() {
            let n = usize::from(octet);
            code.push(char::from(ALPHABET[n / 10]));
            code.push(char::from(ALPHABET[n % 10]));
        }
        RoomCode(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomCode {
    type Err = RoomCodeError;

    /// Parses a dotted quad such as `"192.168.1.42"` and encodes it.
    fn from_str(dotted: &str) -> Result<Self, Self::Err> {
        dotted
            .parse::<Ipv4Addr>()
            .map(RoomCode::from_ipv4)
            .map_err(|_| RoomCodeError::InvalidAddress(dotted.to_string()))
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
