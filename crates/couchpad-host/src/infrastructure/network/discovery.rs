//! Local address discovery.
//!
//! The room code is derived from the host's LAN address, so the listener
//! needs one concrete IPv4 address rather than `0.0.0.0`.  The operating
//! system's interface list is read with `if-addrs`; the choice itself is the
//! pure [`select_local_ipv4`] so it can be tested without real interfaces.
//!
//! Selection rules, applied to interfaces in the order the OS reports them:
//!
//! 1. IPv6 addresses are ignored.
//! 2. Loopback interfaces and any address whose dotted form starts with
//!    `127.0` are skipped.
//! 3. The first remaining address wins.

use std::net::{IpAddr, Ipv4Addr};

use tracing::{debug, warn};

/// One address reported by the operating system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceCandidate {
    pub name: String,
    pub address: IpAddr,
    pub is_loopback: bool,
}

/// Picks the first usable IPv4 address from `candidates`.
pub fn select_local_ipv4(candidates: &[InterfaceCandidate]) -> Option<Ipv4Addr> {
    candidates.iter().find_map(|candidate| match candidate.address {
        IpAddr::V4(v4) if !candidate.is_loopback && !v4.to_string().starts_with("127.0") => {
            debug!("using {} on interface {}", v4, candidate.name);
            Some(v4)
        }
        _ => None,
    })
}

/// Reads the interface list and returns the first usable IPv4 address.
///
/// Returns `None` if the list cannot be read or holds no usable address.
pub fn discover_local_ipv4() -> Option<Ipv4Addr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("could not list network interfaces: {e}");
            return None;
        }
    };

    let candidates: Vec<InterfaceCandidate> = interfaces
        .iter()
        .map(|iface| InterfaceCandidate {
            name: iface.name.clone(),
            address: iface.ip(),
            is_loopback: iface.is_loopback(),
        })
        .collect();
    select_local_ipv4(&candidates)
}
