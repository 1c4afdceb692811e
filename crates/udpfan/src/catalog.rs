// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Address catalog: which broadcast/multicast targets exist on this host.
//!
//! Discovery walks the kernel interface list once (`getifaddrs`) and emits
//! one target per usable interface: the broadcast address where the
//! interface has one, the peer address for point-to-point links, and the
//! all-nodes group `ff02::1` (tagged with the interface index) for IPv6.
//! Operator-supplied `host[:port]` tokens are resolved and merged on top,
//! then exact `(family, address, port)` duplicates are removed.
//!
//! Per-interface failures are logged and skipped; discovery never aborts
//! because one interface is misconfigured.

use crate::addr::{all_nodes_target, same_endpoint, AddressFamily};
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, ToSocketAddrs};

/// One relay/beacon target plus the interface it came from.
///
/// The interface index is what a caller needs to join the all-nodes group
/// on the right link; operator-configured entries have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub addr: SocketAddr,
    pub interface_index: Option<u32>,
}

impl CatalogEntry {
    fn new(addr: SocketAddr, interface_index: Option<u32>) -> CatalogEntry {
        CatalogEntry {
            addr,
            interface_index,
        }
    }
}

/// Interface selector for discovery.
#[derive(Debug, Clone, Copy)]
pub enum MatchFilter {
    /// Every usable interface.
    Any,
    /// Only the interface carrying this address. IPv4 matches exactly; an
    /// IPv6 link-local filter matches any link-local address on the
    /// interface named by its scope id.
    Exact(SocketAddr),
}

/// One interface address record, decoded from the kernel list.
#[derive(Debug, Clone)]
struct IfAddr {
    index: Option<u32>,
    up: bool,
    loopback: bool,
    broadcast: bool,
    point_to_point: bool,
    addr: IpAddr,
    /// Broadcast address (broadcast interfaces) or peer address
    /// (point-to-point interfaces).
    peer: Option<IpAddr>,
}

/// Enumerate interfaces and build the target list for `filter`.
pub fn discover_broadcast_targets(filter: &MatchFilter) -> Vec<CatalogEntry> {
    match enumerate_interfaces() {
        Ok(interfaces) => targets_from(&interfaces, filter),
        Err(e) => {
            log::error!("[Catalog] interface enumeration failed: {}", e);
            Vec::new()
        }
    }
}

/// Pure half of discovery, separated so the selection rules are testable
/// without real interfaces.
fn targets_from(interfaces: &[IfAddr], filter: &MatchFilter) -> Vec<CatalogEntry> {
    // A loopback match filter short-circuits: the caller is asking for a
    // local-only list, which exists even on a host with no interfaces.
    if let MatchFilter::Exact(SocketAddr::V4(want)) = filter {
        if want.ip().is_loopback() {
            return vec![CatalogEntry::new(AddressFamily::V4.loopback(0), None)];
        }
    }

    let mut out = Vec::new();
    let mut v6_joined: Vec<u32> = Vec::new();

    for ifa in interfaces {
        if !filter_matches(filter, ifa) {
            continue;
        }
        if !ifa.up {
            log::debug!("[Catalog] skipping down interface address {}", ifa.addr);
            continue;
        }
        if ifa.loopback {
            continue;
        }

        match ifa.addr {
            IpAddr::V4(_) => {
                if ifa.broadcast {
                    match ifa.peer {
                        Some(IpAddr::V4(bcast)) if !bcast.is_unspecified() => {
                            out.push(CatalogEntry::new(
                                SocketAddr::new(IpAddr::V4(bcast), 0),
                                ifa.index,
                            ));
                        }
                        _ => {
                            log::debug!(
                                "[Catalog] interface {} reports no usable broadcast address",
                                ifa.addr
                            );
                        }
                    }
                } else if ifa.point_to_point {
                    match ifa.peer {
                        Some(IpAddr::V4(peer)) => {
                            out.push(CatalogEntry::new(
                                SocketAddr::new(IpAddr::V4(peer), 0),
                                ifa.index,
                            ));
                        }
                        _ => {
                            log::debug!(
                                "[Catalog] point-to-point interface {} has no peer address",
                                ifa.addr
                            );
                        }
                    }
                } else {
                    log::debug!(
                        "[Catalog] interface {} is neither broadcast nor point-to-point",
                        ifa.addr
                    );
                }
            }
            IpAddr::V6(_) => {
                // No broadcast in IPv6: rewrite to the all-nodes group on
                // this interface. One entry per interface, not per address.
                let Some(index) = ifa.index else {
                    log::debug!("[Catalog] no interface index for {}", ifa.addr);
                    continue;
                };
                if v6_joined.contains(&index) {
                    continue;
                }
                v6_joined.push(index);
                out.push(CatalogEntry::new(all_nodes_target(index, 0), Some(index)));
            }
        }
    }
    out
}

fn filter_matches(filter: &MatchFilter, ifa: &IfAddr) -> bool {
    match filter {
        MatchFilter::Any => true,
        MatchFilter::Exact(SocketAddr::V4(want)) => {
            matches!(ifa.addr, IpAddr::V4(have) if have == *want.ip())
        }
        MatchFilter::Exact(SocketAddr::V6(want)) => {
            let IpAddr::V6(have) = ifa.addr else {
                return false;
            };
            let scope_ok = want.scope_id() == 0 || ifa.index == Some(want.scope_id());
            if is_link_local_v6(want.ip()) {
                is_link_local_v6(&have) && scope_ok
            } else {
                have == *want.ip() && scope_ok
            }
        }
    }
}

fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Rewrite every entry onto `port`.
pub fn force_port(entries: &mut [CatalogEntry], port: u16) {
    for entry in entries {
        entry.addr.set_port(port);
    }
}

/// Drain `source` into `dest`, dropping entries whose exact
/// `(family, address, port)` already occurs in `dest`.
///
/// Only IPv4 entries are deduplicated; IPv6 entries are appended
/// unconditionally (distinct scopes can render textually equal addresses
/// distinct, so the relay never second-guesses them). Non-silent mode logs
/// each discard.
pub fn deduplicate(dest: &mut Vec<CatalogEntry>, source: Vec<CatalogEntry>, silent: bool) {
    for entry in source {
        let duplicate = entry.addr.is_ipv4()
            && dest.iter().any(|have| same_endpoint(&have.addr, &entry.addr));
        if duplicate {
            if !silent {
                log::warn!("[Catalog] discarding duplicate target {}", entry.addr);
            }
            continue;
        }
        dest.push(entry);
    }
}

/// Resolve one `host[:port]` token: numeric IPv4/IPv6, `[v6]:port`, or a
/// DNS name. A token without a port gets `default_port`.
pub fn resolve_token(token: &str, default_port: u16) -> Result<SocketAddr> {
    if let Ok(sa) = token.parse::<SocketAddr>() {
        return Ok(sa);
    }
    if let Ok(ip) = token.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }
    // Bare bracketed IPv6 without a port.
    if let Some(inner) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        if let Ok(ip) = inner.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, default_port));
        }
    }
    // hostname[:port]; a ':' inside an unbracketed IPv6 literal was already
    // consumed by the IpAddr parse above.
    let (host, port) = match token.rsplit_once(':') {
        Some((host, port_str)) if !host.contains(':') => {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| Error::InvalidAddress(token.to_string()))?;
            (host, port)
        }
        _ => (token, default_port),
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|_| Error::InvalidAddress(token.to_string()))?
        .next()
        .ok_or_else(|| Error::InvalidAddress(token.to_string()))
}

/// Tokenize an operator address list and append every resolvable entry.
///
/// `ignore_non_default_port` drops tokens that resolved to a foreign port
/// (guards against accidentally targeting an unrelated service). Returns
/// true when at least one entry was appended; failed tokens are logged and
/// skipped, never fatal.
pub fn add_configured_addresses(
    dest: &mut Vec<CatalogEntry>,
    config_value: &str,
    port: u16,
    ignore_non_default_port: bool,
) -> bool {
    let mut added = 0usize;
    for token in config_value.split_whitespace() {
        let addr = match resolve_token(token, port) {
            Ok(addr) => addr,
            Err(e) => {
                log::warn!("[Catalog] {}", e);
                continue;
            }
        };
        if ignore_non_default_port && addr.port() != port {
            log::warn!(
                "[Catalog] ignoring '{}': port {} differs from the expected {}",
                token,
                addr.port(),
                port
            );
            continue;
        }
        dest.push(CatalogEntry::new(addr, None));
        added += 1;
    }
    added > 0
}

/// Build the relay's full target list from configuration.
///
/// Auto-discovery (when enabled) supplies interface targets forced onto the
/// relay port; an empty intermediate list falls back to a single loopback
/// target so local-only hosts still work; operator entries are merged last
/// and the combined list deduplicated loudly.
pub fn relay_target_list(cfg: &RelayConfig) -> Vec<CatalogEntry> {
    let mut merged = Vec::new();

    if cfg.auto_addr_list {
        let mut discovered = discover_broadcast_targets(&MatchFilter::Any);
        force_port(&mut discovered, cfg.port);
        deduplicate(&mut merged, discovered, true);
    }
    if merged.is_empty() {
        log::info!(
            "[Catalog] no interface targets, using loopback:{} only",
            cfg.port
        );
        merged.push(CatalogEntry::new(AddressFamily::V4.loopback(cfg.port), None));
    }
    if !cfg.addr_list.is_empty() {
        add_configured_addresses(&mut merged, &cfg.addr_list, cfg.port, false);
    }

    let mut out = Vec::new();
    deduplicate(&mut out, merged, false);
    out
}

// =======================================================================
// Kernel interface list (getifaddrs)
// =======================================================================

#[cfg(target_os = "linux")]
fn peer_sockaddr(ifa: &libc::ifaddrs) -> *mut libc::sockaddr {
    // On Linux ifa_ifu overlays the broadcast and point-to-point peer
    // address; the flags say which one it holds.
    ifa.ifa_ifu
}

#[cfg(not(target_os = "linux"))]
fn peer_sockaddr(ifa: &libc::ifaddrs) -> *mut libc::sockaddr {
    ifa.ifa_dstaddr
}

/// Decode an `AF_INET`/`AF_INET6` sockaddr. Other families yield `None`.
///
/// # Safety
///
/// `sa` must be null or point to a sockaddr at least as large as its
/// `sa_family` claims (guaranteed for pointers handed out by getifaddrs).
unsafe fn sockaddr_to_ip(sa: *const libc::sockaddr) -> Option<IpAddr> {
    if sa.is_null() {
        return None;
    }
    match i32::from((*sa).sa_family) {
        libc::AF_INET => {
            let sin = &*(sa.cast::<libc::sockaddr_in>());
            Some(IpAddr::V4(u32::from_be(sin.sin_addr.s_addr).into()))
        }
        libc::AF_INET6 => {
            let sin6 = &*(sa.cast::<libc::sockaddr_in6>());
            Some(IpAddr::V6(sin6.sin6_addr.s6_addr.into()))
        }
        _ => None,
    }
}

/// Snapshot the kernel interface list as safe records.
fn enumerate_interfaces() -> io::Result<Vec<IfAddr>> {
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: getifaddrs either fills `head` with a valid list and returns
    // 0, or returns -1 and leaves errno set.
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut out = Vec::new();
    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: `cursor` walks the list getifaddrs returned; every node
        // stays valid until freeifaddrs below.
        let ifa = unsafe { &*cursor };
        cursor = ifa.ifa_next;

        // SAFETY: ifa_addr is null or a valid sockaddr per getifaddrs.
        let Some(addr) = (unsafe { sockaddr_to_ip(ifa.ifa_addr) }) else {
            continue;
        };
        // SAFETY: ifa_name is a NUL-terminated string owned by the list.
        let index = match unsafe { libc::if_nametoindex(ifa.ifa_name) } {
            0 => None,
            n => Some(n),
        };
        let flags = ifa.ifa_flags;
        let broadcast = flags & libc::IFF_BROADCAST as libc::c_uint != 0;
        let point_to_point = flags & libc::IFF_POINTOPOINT as libc::c_uint != 0;
        let peer = if broadcast || point_to_point {
            // SAFETY: same contract as ifa_addr.
            unsafe { sockaddr_to_ip(peer_sockaddr(ifa)) }
        } else {
            None
        };

        out.push(IfAddr {
            index,
            up: flags & libc::IFF_UP as libc::c_uint != 0,
            loopback: flags & libc::IFF_LOOPBACK as libc::c_uint != 0,
            broadcast,
            point_to_point,
            addr,
            peer,
        });
    }
    // SAFETY: `head` came from getifaddrs and is freed exactly once.
    unsafe { libc::freeifaddrs(head) };
    Ok(out)
}
