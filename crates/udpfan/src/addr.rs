// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Address families, identity comparison, probe binds.
//!
//! Three comparison levels are used by different algorithms and must not be
//! mixed up:
//!
//! - [`same_host`]: family + IP (+ scope id), port ignored. Interface
//!   identity, e.g. the catalog match filter.
//! - [`same_endpoint`]: family + IP + port. Exact-duplicate removal and the
//!   fan-out self filter.
//! - [`same_port`]: port alone, across families. Registration reuse: one
//!   local process is one port, whichever stack it registered over.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// All-nodes link-local multicast group, the IPv6 stand-in for broadcast.
pub const ALL_NODES_LINK_LOCAL: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// Address family tag for the dual-stack code paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Family of a concrete socket address.
    pub fn of(addr: &SocketAddr) -> AddressFamily {
        match addr {
            SocketAddr::V4(_) => AddressFamily::V4,
            SocketAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// Families this build serves. Registrations from outside the set are
    /// rejected; verification probes only the set.
    pub fn enabled() -> &'static [AddressFamily] {
        #[cfg(feature = "ipv6")]
        {
            &[AddressFamily::V4, AddressFamily::V6]
        }
        #[cfg(not(feature = "ipv6"))]
        {
            &[AddressFamily::V4]
        }
    }

    /// Whether this family is part of the capability set.
    pub fn is_enabled(self) -> bool {
        AddressFamily::enabled().contains(&self)
    }

    pub(crate) fn domain(self) -> Domain {
        match self {
            AddressFamily::V4 => Domain::IPV4,
            AddressFamily::V6 => Domain::IPV6,
        }
    }

    /// Wildcard bind target at `port`.
    pub fn wildcard(self, port: u16) -> SocketAddr {
        match self {
            AddressFamily::V4 => SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)),
            AddressFamily::V6 => {
                SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0))
            }
        }
    }

    /// Loopback address at `port`.
    pub fn loopback(self, port: u16) -> SocketAddr {
        match self {
            AddressFamily::V4 => SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)),
            AddressFamily::V6 => SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, port, 0, 0)),
        }
    }
}

/// Family + IP (+ scope id for IPv6); port ignored.
pub fn same_host(a: &SocketAddr, b: &SocketAddr) -> bool {
    match (a, b) {
        (SocketAddr::V4(a), SocketAddr::V4(b)) => a.ip() == b.ip(),
        (SocketAddr::V6(a), SocketAddr::V6(b)) => {
            a.ip() == b.ip() && a.scope_id() == b.scope_id()
        }
        _ => false,
    }
}

/// Family + IP + port (+ scope id for IPv6).
pub fn same_endpoint(a: &SocketAddr, b: &SocketAddr) -> bool {
    same_host(a, b) && a.port() == b.port()
}

/// Port alone, across families.
pub fn same_port(a: &SocketAddr, b: &SocketAddr) -> bool {
    a.port() == b.port()
}

/// All-nodes multicast target on one interface.
pub fn all_nodes_target(interface_index: u32, port: u16) -> SocketAddr {
    SocketAddr::V6(SocketAddrV6::new(
        ALL_NODES_LINK_LOCAL,
        port,
        0,
        interface_index,
    ))
}

/// Result of a liveness probe bind.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// Bind refused with "address in use": some local socket holds the port.
    InUse,
    /// Bind succeeded: nothing holds the port. The probe socket is already
    /// closed when this is returned.
    Free,
    /// Bind failed for an unrelated reason; the caller logs and moves on.
    Failed(io::Error),
}

/// Bind a throwaway socket to the wildcard address at `port` to learn
/// whether the port is held by a live process.
///
/// No address reuse is set on the probe: reuse would let the bind succeed
/// against a live holder and report every client dead.
pub fn probe_port(family: AddressFamily, port: u16) -> ProbeOutcome {
    let sock = match Socket::new(family.domain(), Type::DGRAM, Some(Protocol::UDP)) {
        Ok(s) => s,
        Err(e) => return ProbeOutcome::Failed(e),
    };
    match sock.bind(&family.wildcard(port).into()) {
        Ok(()) => ProbeOutcome::Free,
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => ProbeOutcome::InUse,
        Err(e) => ProbeOutcome::Failed(e),
    }
}

/// Shorthand used by catalog entries and log lines.
pub fn family_name(addr: &SocketAddr) -> &'static str {
    match addr {
        SocketAddr::V4(_) => "IPv4",
        SocketAddr::V6(_) => "IPv6",
    }
}

/// IPv4 multicast range check (`224.0.0.0/4`) for catalog group joins.
pub fn is_v4_multicast(ip: &IpAddr) -> bool {
    matches!(ip, IpAddr::V4(v4) if v4.is_multicast())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    fn v4(s: &str) -> SocketAddr {
        s.parse().expect("v4 literal")
    }

    fn v6(ip: &str, port: u16, scope: u32) -> SocketAddr {
        SocketAddr::V6(SocketAddrV6::new(ip.parse().expect("v6 literal"), port, 0, scope))
    }

    #[test]
    fn comparison_levels() {
        let a = v4("10.0.0.5:6001");
        let b = v4("10.0.0.5:6002");
        let c = v4("10.0.0.6:6001");

        assert!(same_host(&a, &b));
        assert!(!same_host(&a, &c));
        assert!(!same_endpoint(&a, &b));
        assert!(same_endpoint(&a, &v4("10.0.0.5:6001")));
        assert!(same_port(&a, &c));
    }

    #[test]
    fn scope_id_is_identity_for_v6() {
        let a = v6("fe80::1", 6001, 2);
        let b = v6("fe80::1", 6001, 3);
        assert!(!same_host(&a, &b));
        assert!(!same_endpoint(&a, &b));
        assert!(same_port(&a, &b));
    }

    #[test]
    fn port_identity_crosses_families() {
        let a = v4("127.0.0.1:6001");
        let b = v6("::1", 6001, 0);
        assert!(same_port(&a, &b));
        assert!(!same_host(&a, &b));
    }

    #[test]
    fn all_nodes_target_keeps_interface() {
        match all_nodes_target(7, 5065) {
            SocketAddr::V6(a) => {
                assert_eq!(*a.ip(), ALL_NODES_LINK_LOCAL);
                assert_eq!(a.scope_id(), 7);
                assert_eq!(a.port(), 5065);
            }
            SocketAddr::V4(_) => panic!("all-nodes target must be IPv6"),
        }
    }

    #[test]
    fn probe_sees_bound_port_as_in_use() {
        let holder = UdpSocket::bind("127.0.0.1:0").expect("bind ephemeral");
        let port = holder.local_addr().expect("local addr").port();
        assert!(matches!(
            probe_port(AddressFamily::V4, port),
            ProbeOutcome::InUse
        ));
    }

    #[test]
    fn probe_sees_released_port_as_free() {
        let holder = UdpSocket::bind("127.0.0.1:0").expect("bind ephemeral");
        let port = holder.local_addr().expect("local addr").port();
        drop(holder);
        assert!(matches!(
            probe_port(AddressFamily::V4, port),
            ProbeOutcome::Free
        ));
        // Free implies the probe socket was dropped: probing again must not
        // collide with a leaked probe.
        assert!(matches!(
            probe_port(AddressFamily::V4, port),
            ProbeOutcome::Free
        ));
    }
}
