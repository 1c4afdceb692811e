// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The relay itself: socket layer, registration protocol, fan-out,
//! dispatch loop.
//!
//! ```text
//! mio::poll() -> recv_from(buf) -> classify command
//!                                      v
//!                REGISTER/empty -> register_client -> CONFIRM + keep-alive
//!                BEACON         -> stamp sender address -> fan_out
//!                anything else  -> fan_out verbatim
//! ```
//!
//! Strictly single-threaded: one thread owns the poll, the registry and the
//! spoof guard, so registration, verification and fan-out serialize
//! naturally and no entry can be removed while another party iterates. The
//! loop has no periodic work of its own; polling blocks until a datagram
//! arrives. No shutdown protocol either — the process runs until terminated
//! externally.

use crate::addr::{is_v4_multicast, same_endpoint, AddressFamily};
use crate::catalog::{relay_target_list, CatalogEntry};
use crate::config::{RelayConfig, MAX_DATAGRAM};
use crate::error::{Error, Result};
use crate::proto::{
    command_of, rewrite_beacon_v4, stamp_beacon_v6, CMD_BEACON, CMD_REGISTER, HEADER_LEN,
};
use crate::registry::{ClientRegistry, RegisteredClient};
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

/// Anti-spoofing check for IPv4 registrations.
///
/// A registration's claimed source address must belong to a local
/// interface; binding a throwaway socket to it (port wildcard) proves that,
/// since the bind fails for any address this host does not own. Loopback
/// sources pass without a probe.
///
/// The probe socket is created once, on first use, and kept bound for the
/// life of the process. Known limitation, preserved for compatibility: if
/// the interface configuration changes after that first bind (DHCP renewal),
/// the guard keeps honoring the remembered address and rejects the new one.
struct SpoofGuard {
    probe: Option<(Socket, Ipv4Addr)>,
}

impl SpoofGuard {
    fn new() -> SpoofGuard {
        SpoofGuard { probe: None }
    }

    fn allows(&mut self, ip: Ipv4Addr) -> bool {
        if ip.is_loopback() {
            return true;
        }
        if let Some((_, verified)) = &self.probe {
            return *verified == ip;
        }
        let sock = match Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("[Relay] cannot create spoof-guard socket: {}", e);
                return false;
            }
        };
        match sock.bind(&SocketAddr::new(IpAddr::V4(ip), 0).into()) {
            Ok(()) => {
                self.probe = Some((sock, ip));
                true
            }
            Err(e) => {
                log::debug!(
                    "[Relay] registration source {} is not a local address ({}), dropped",
                    ip,
                    e
                );
                false
            }
        }
    }
}

/// All mutable relay state, owned by the dispatch loop and threaded through
/// every operation. No process-wide statics.
pub struct RelayState {
    registry: ClientRegistry,
    guard: SpoofGuard,
}

impl Default for RelayState {
    fn default() -> Self {
        RelayState::new()
    }
}

impl RelayState {
    pub fn new() -> RelayState {
        RelayState {
            registry: ClientRegistry::new(),
            guard: SpoofGuard::new(),
        }
    }

    /// Registered client count (diagnostic).
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Handle one registration datagram.
    ///
    /// Idempotent per peer port: a repeat registration creates no second
    /// entry but still gets a fresh confirmation. A repeat from a different
    /// address (or the other family) migrates the existing entry instead.
    pub fn register_client(&mut self, from: SocketAddr) {
        if !AddressFamily::of(&from).is_enabled() {
            log::warn!("[Relay] registration from {}: family not enabled", from);
            return;
        }
        if let SocketAddr::V4(v4) = from {
            if !self.guard.allows(*v4.ip()) {
                return;
            }
        }

        let (id, created) = match self.registry.find_by_port(&from) {
            Some(id) => {
                let moved = self
                    .registry
                    .get(id)
                    .is_some_and(|c| !same_endpoint(&c.addr(), &from));
                if moved {
                    // Same port, new address: the client re-registered over
                    // the other stack. Rebuild the connected socket.
                    match RegisteredClient::connect(from) {
                        Ok(client) => {
                            if let Some(slot) = self.registry.get_mut(id) {
                                *slot = client;
                            }
                        }
                        Err(e) => {
                            log::warn!("[Relay] cannot migrate client to {}: {}", from, e);
                            return;
                        }
                    }
                }
                (id, false)
            }
            None => {
                let client = match RegisteredClient::connect(from) {
                    Ok(client) => client,
                    Err(e) => {
                        log::warn!("[Relay] cannot connect to new client {}: {}", from, e);
                        return;
                    }
                };
                match self.registry.insert(client) {
                    Ok(id) => (id, true),
                    Err(e) => {
                        log::warn!("[Relay] registration from {} dropped: {}", from, e);
                        return;
                    }
                }
            }
        };

        // A brand-new registration triggers the bulk verify, so any dead
        // client is pruned before, not after, this one's confirmation.
        if created {
            self.registry.verify_all(Some(id));
        }

        match self.registry.get(id).map(RegisteredClient::send_confirm) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                log::warn!("[Relay] confirm to {} failed ({}), rolled back", from, e);
                self.registry.remove(id);
                return;
            }
            None => return,
        }
        if created {
            log::info!(
                "[Relay] registered client {} ({} total)",
                from,
                self.registry.len()
            );
        }

        self.registry.send_noop_to_others(Some(id));
    }

    /// Forward one datagram to every registered client except the sender.
    ///
    /// IPv4-only clients never see a datagram whose sender is not IPv4. A
    /// failed send triggers an immediate liveness probe; a dead client is
    /// removed on the spot.
    pub fn fan_out(&mut self, from: &SocketAddr, payload: &[u8]) {
        for id in self.registry.live_ids() {
            let (addr, outcome) = match self.registry.get(id) {
                Some(client) => {
                    if same_endpoint(&client.addr(), from) {
                        continue;
                    }
                    if client.family() == AddressFamily::V4
                        && AddressFamily::of(from) != AddressFamily::V4
                    {
                        continue;
                    }
                    (client.addr(), client.send(payload))
                }
                None => continue,
            };
            if let Err(e) = outcome {
                // Refused/reset is the normal peer-gone signal on a
                // connected UDP socket; either way the probe decides.
                log::debug!("[Relay] send to {} failed: {}", addr, e);
                let alive = self.registry.get(id).is_some_and(RegisteredClient::verify);
                if !alive {
                    self.registry.remove(id);
                    log::info!("[Relay] pruned dead client {}", addr);
                }
            }
        }
    }

    /// Classify and dispatch one inbound datagram.
    pub fn handle_datagram(&mut self, from: SocketAddr, buf: &mut [u8]) {
        if buf.is_empty() {
            // Legacy registration: a bare zero-length datagram.
            self.register_client(from);
            return;
        }
        match command_of(buf) {
            Some(CMD_REGISTER) if buf.len() >= HEADER_LEN => {
                self.register_client(from);
                // Payload piggybacked behind the registration header keeps
                // flowing to everyone else.
                if buf.len() > HEADER_LEN {
                    self.fan_out(&from, &buf[HEADER_LEN..]);
                }
            }
            Some(CMD_BEACON) if buf.len() >= HEADER_LEN => self.relay_beacon(from, buf),
            _ => self.fan_out(&from, buf),
        }
    }

    /// Stamp the sender's address into a server-up beacon, then fan out.
    ///
    /// IPv4: parameter 2 is overwritten with the address the datagram
    /// actually came from — unconditionally, whatever the server put there —
    /// and the variable trailer is dropped, so recipients always get the
    /// fixed legacy 16 bytes. IPv6: the extension is validated and stamped
    /// with the sender address and scope id; a beacon failing the
    /// magic/size check carries no usable origin and is dropped.
    fn relay_beacon(&mut self, from: SocketAddr, buf: &mut [u8]) {
        match from {
            SocketAddr::V4(v4) => {
                rewrite_beacon_v4(buf, *v4.ip());
                self.fan_out(&from, &buf[..HEADER_LEN]);
            }
            SocketAddr::V6(v6) => {
                if !stamp_beacon_v6(buf, *v6.ip(), v6.scope_id()) {
                    log::warn!(
                        "[Relay] dropping beacon from {}: invalid IPv6 extension",
                        from
                    );
                    return;
                }
                self.fan_out(&from, buf);
            }
        }
    }
}

/// The relay daemon: bound sockets, poller, and the state they feed.
pub struct Relay {
    poll: Poll,
    events: Events,
    sockets: Vec<mio::net::UdpSocket>,
    targets: Vec<CatalogEntry>,
    port: u16,
    recv_buf: Vec<u8>,
    state: RelayState,
}

impl Relay {
    /// Bind the relay's sockets and build the dispatch state.
    ///
    /// The primary IPv4 socket is the liveness token for the whole daemon:
    /// "address in use" on that bind means another relay already serves
    /// this host and maps to [`Error::AlreadyRunning`], which callers treat
    /// as a quiet, successful exit. Every other socket is optional; its
    /// failure is logged and skipped.
    pub fn bind(config: &RelayConfig) -> Result<Relay> {
        let targets = relay_target_list(config);
        for entry in &targets {
            log::info!("[Relay] target {}", entry.addr);
        }

        let mut sockets = Vec::new();
        sockets.push(bind_primary(config.port, &targets)?);

        #[cfg(feature = "ipv6")]
        {
            if let Some(sock) = bind_v6_loopback(config.port) {
                sockets.push(sock);
            }
            for entry in &targets {
                if let Some(sock) = bind_all_nodes(entry, config.port) {
                    sockets.push(sock);
                }
            }
        }

        let poll = Poll::new().map_err(Error::Socket)?;
        for (index, sock) in sockets.iter_mut().enumerate() {
            poll.registry()
                .register(sock, Token(index), Interest::READABLE)
                .map_err(Error::Socket)?;
        }

        log::info!(
            "[Relay] listening on port {} ({} sockets)",
            config.port,
            sockets.len()
        );
        Ok(Relay {
            poll,
            events: Events::with_capacity(16),
            sockets,
            targets,
            port: config.port,
            recv_buf: vec![0u8; MAX_DATAGRAM],
            state: RelayState::new(),
        })
    }

    /// The relay port this instance owns.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Broadcast/multicast targets resolved at startup.
    pub fn targets(&self) -> &[CatalogEntry] {
        &self.targets
    }

    /// Mutable dispatch state (diagnostics and tests).
    pub fn state_mut(&mut self) -> &mut RelayState {
        &mut self.state
    }

    /// Run the dispatch loop forever.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.poll_once(None)?;
        }
    }

    /// One poll-and-dispatch iteration.
    ///
    /// Blocks up to `timeout` (forever with `None`), then drains every
    /// readable socket. Split out of [`run`](Relay::run) so tests can step
    /// the loop deterministically.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<()> {
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(Error::Socket(e));
        }

        let ready: Vec<usize> = self.events.iter().map(|ev| ev.token().0).collect();
        for index in ready {
            let Some(sock) = self.sockets.get(index) else {
                continue;
            };
            // Drain until WouldBlock (edge-triggered style).
            loop {
                match sock.recv_from(&mut self.recv_buf) {
                    Ok((len, from)) => {
                        self.state.handle_datagram(from, &mut self.recv_buf[..len]);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e)
                        if e.kind() == io::ErrorKind::ConnectionRefused
                            || e.kind() == io::ErrorKind::ConnectionReset =>
                    {
                        // Disconnected-UDP kernel quirk, not an error:
                        // discard and keep reading.
                    }
                    Err(e) => {
                        log::warn!("[Relay] receive error: {}", e);
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Primary socket: wildcard IPv4 at the relay port.
///
/// Address reuse is enabled only *after* the bind succeeded, so a second
/// relay instance still observes "address in use".
fn bind_primary(port: u16, targets: &[CatalogEntry]) -> Result<mio::net::UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(Error::Socket)?;
    match sock.bind(&AddressFamily::V4.wildcard(port).into()) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            return Err(Error::AlreadyRunning(port));
        }
        Err(e) => return Err(Error::Socket(e)),
    }
    sock.set_reuse_address(true).map_err(Error::Socket)?;

    // Operator-configured IPv4 multicast targets are groups this relay must
    // hear; join them on the primary socket. Per-group failures are not
    // fatal.
    for entry in targets {
        if !is_v4_multicast(&entry.addr.ip()) {
            continue;
        }
        if let IpAddr::V4(group) = entry.addr.ip() {
            if let Err(e) = sock.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED) {
                log::warn!("[Relay] cannot join group {}: {}", group, e);
            }
        }
    }
    into_mio(sock).map_err(Error::Socket)
}

/// Optional `[::1]` socket for local IPv6 registrations.
#[cfg(feature = "ipv6")]
fn bind_v6_loopback(port: u16) -> Option<mio::net::UdpSocket> {
    let attempt = || -> io::Result<mio::net::UdpSocket> {
        let sock = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
        sock.set_only_v6(true)?;
        sock.bind(&AddressFamily::V6.loopback(port).into())?;
        into_mio(sock)
    };
    match attempt() {
        Ok(sock) => Some(sock),
        Err(e) => {
            log::warn!("[Relay] no IPv6 loopback socket at port {}: {}", port, e);
            None
        }
    }
}

/// Per-interface all-nodes socket, joined to `ff02::1` on that link.
#[cfg(feature = "ipv6")]
fn bind_all_nodes(entry: &CatalogEntry, port: u16) -> Option<mio::net::UdpSocket> {
    let interface = entry.interface_index?;
    if !entry.addr.is_ipv6() {
        return None;
    }
    let attempt = || -> io::Result<mio::net::UdpSocket> {
        let sock = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
        sock.set_only_v6(true)?;
        sock.set_reuse_address(true)?;
        sock.bind(&crate::addr::all_nodes_target(interface, port).into())?;
        sock.join_multicast_v6(&crate::addr::ALL_NODES_LINK_LOCAL, interface)?;
        sock.set_multicast_if_v6(interface)?;
        sock.set_multicast_hops_v6(1)?;
        sock.set_multicast_loop_v6(true)?;
        into_mio(sock)
    };
    match attempt() {
        Ok(sock) => Some(sock),
        Err(e) => {
            log::warn!(
                "[Relay] no all-nodes socket on interface {}: {}",
                interface,
                e
            );
            None
        }
    }
}

fn into_mio(sock: Socket) -> io::Result<mio::net::UdpSocket> {
    sock.set_nonblocking(true)?;
    let std_sock: UdpSocket = sock.into();
    Ok(mio::net::UdpSocket::from_std(std_sock))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{
        confirm_message, MsgHeader, BEACON6_LEN, CMD_CONFIRM, CMD_NOOP, EXT6_LEN, EXT6_MAGIC,
    };
    use std::net::{Ipv6Addr, SocketAddrV6};

    const RECV_WAIT: Duration = Duration::from_secs(2);
    const SILENCE_WAIT: Duration = Duration::from_millis(200);

    /// A fake local client: bound loopback socket plus its address.
    fn client(wait: Duration) -> (UdpSocket, SocketAddr) {
        let sock = UdpSocket::bind("127.0.0.1:0").expect("bind ephemeral");
        sock.set_read_timeout(Some(wait)).expect("timeout");
        let addr = sock.local_addr().expect("local addr");
        (sock, addr)
    }

    fn recv_command(sock: &UdpSocket) -> Option<(u16, Vec<u8>)> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let n = sock.recv(&mut buf).ok()?;
        Some((command_of(&buf[..n])?, buf[..n].to_vec()))
    }

    /// Drain until `cmd` arrives, skipping keep-alive noise.
    fn expect_command(sock: &UdpSocket, cmd: u16) -> Vec<u8> {
        loop {
            let (got, payload) = recv_command(sock).expect("datagram within timeout");
            if got == cmd {
                return payload;
            }
            assert_eq!(got, CMD_NOOP, "unexpected command {}", got);
        }
    }

    fn register_message() -> Vec<u8> {
        MsgHeader {
            command: CMD_REGISTER,
            ..MsgHeader::default()
        }
        .encode()
        .to_vec()
    }

    fn beacon_v4(advertised: u32) -> Vec<u8> {
        let mut buf = MsgHeader {
            command: CMD_BEACON,
            payload_size: 4,
            param1: 1,
            param2: advertised,
            ..MsgHeader::default()
        }
        .encode()
        .to_vec();
        buf.extend_from_slice(&[0xee; 4]); // variable trailer, must be cut
        buf
    }

    #[test]
    fn registration_is_idempotent_but_reconfirms() {
        let mut state = RelayState::new();
        let (sock, addr) = client(RECV_WAIT);

        state.register_client(addr);
        assert_eq!(state.client_count(), 1);
        expect_command(&sock, CMD_CONFIRM);

        state.register_client(addr);
        assert_eq!(state.client_count(), 1, "second registration adds nothing");
        let confirm = expect_command(&sock, CMD_CONFIRM);
        assert_eq!(confirm, confirm_message(Some(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn zero_length_datagram_registers() {
        let mut state = RelayState::new();
        let (sock, addr) = client(RECV_WAIT);

        let mut empty: [u8; 0] = [];
        state.handle_datagram(addr, &mut empty);
        assert_eq!(state.client_count(), 1);
        expect_command(&sock, CMD_CONFIRM);
    }

    #[test]
    fn fan_out_skips_the_sender() {
        let mut state = RelayState::new();
        let (a, addr_a) = client(SILENCE_WAIT);
        let (b, addr_b) = client(SILENCE_WAIT);
        state.register_client(addr_a);
        state.register_client(addr_b);
        // Drain registration traffic (confirms plus a's keep-alive).
        while recv_command(&a).is_some() {}
        while recv_command(&b).is_some() {}

        state.fan_out(&addr_a, b"probe");

        b.set_read_timeout(Some(RECV_WAIT)).expect("timeout");
        let mut buf = [0u8; 64];
        let n = b.recv(&mut buf).expect("b receives the probe");
        assert_eq!(&buf[..n], b"probe");
        assert!(a.recv(&mut buf).is_err(), "no echo to the sender");
    }

    #[test]
    fn v4_only_client_never_sees_v6_traffic() {
        let mut state = RelayState::new();
        let (sock, addr) = client(RECV_WAIT);
        state.register_client(addr);
        expect_command(&sock, CMD_CONFIRM);
        sock.set_read_timeout(Some(SILENCE_WAIT)).expect("timeout");

        let v6_sender = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 49_999, 0, 0));
        state.fan_out(&v6_sender, b"v6 only");

        let mut buf = [0u8; 64];
        assert!(sock.recv(&mut buf).is_err(), "family downgrade not relayed");
    }

    #[test]
    fn beacon_rewrite_reaches_both_clients_once() {
        let mut state = RelayState::new();
        let (a, addr_a) = client(RECV_WAIT);
        let (b, addr_b) = client(RECV_WAIT);
        state.register_client(addr_a);
        state.register_client(addr_b);
        expect_command(&a, CMD_CONFIRM);
        expect_command(&b, CMD_CONFIRM);

        // Unrelated sender that advertised a bogus address.
        let sender: SocketAddr = "10.0.0.5:5064".parse().expect("literal");
        let mut beacon = beacon_v4(0xdead_beef);
        state.handle_datagram(sender, &mut beacon);

        for sock in [&a, &b] {
            let payload = expect_command(sock, CMD_BEACON);
            assert_eq!(payload.len(), HEADER_LEN, "trailer must be cut");
            assert_eq!(payload[12..16], [10, 0, 0, 5], "sender address stamped");
            sock.set_read_timeout(Some(SILENCE_WAIT)).expect("timeout");
            let mut buf = [0u8; 64];
            assert!(sock.recv(&mut buf).is_err(), "exactly one copy each");
        }
    }

    fn client_v6(wait: Duration) -> (UdpSocket, SocketAddr) {
        let sock = UdpSocket::bind("[::1]:0").expect("bind v6 loopback");
        sock.set_read_timeout(Some(wait)).expect("timeout");
        let addr = sock.local_addr().expect("local addr");
        (sock, addr)
    }

    #[test]
    fn invalid_v6_beacon_is_dropped() {
        let mut state = RelayState::new();
        // A v6 recipient, so only the extension check can stop delivery.
        let (sock, addr) = client_v6(RECV_WAIT);
        state.register_client(addr);
        expect_command(&sock, CMD_CONFIRM);
        sock.set_read_timeout(Some(SILENCE_WAIT)).expect("timeout");

        let sender = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 49_998, 0, 0));
        let mut bad = MsgHeader {
            command: CMD_BEACON,
            payload_size: EXT6_LEN as u16,
            ..MsgHeader::default()
        }
        .encode()
        .to_vec();
        bad.extend_from_slice(b"nope"); // wrong magic
        bad.resize(BEACON6_LEN, 0);
        state.handle_datagram(sender, &mut bad);

        let mut buf = [0u8; 64];
        assert!(sock.recv(&mut buf).is_err(), "untrusted beacon not relayed");
    }

    #[test]
    fn valid_v6_beacon_is_stamped() {
        let mut state = RelayState::new();
        let (v6_listener, v6_addr) = client_v6(RECV_WAIT);
        state.register_client(v6_addr);
        expect_command(&v6_listener, CMD_CONFIRM);

        let sender_ip: Ipv6Addr = "fe80::42".parse().expect("literal");
        let sender = SocketAddr::V6(SocketAddrV6::new(sender_ip, 49_997, 0, 3));
        let mut beacon = MsgHeader {
            command: CMD_BEACON,
            payload_size: EXT6_LEN as u16,
            ..MsgHeader::default()
        }
        .encode()
        .to_vec();
        beacon.extend_from_slice(&EXT6_MAGIC);
        beacon.extend_from_slice(&(EXT6_LEN as u32).to_be_bytes());
        beacon.extend_from_slice(&[0u8; 20]);
        state.handle_datagram(sender, &mut beacon);

        let payload = expect_command(&v6_listener, CMD_BEACON);
        assert_eq!(payload.len(), BEACON6_LEN, "v6 beacon keeps full length");
        assert_eq!(payload[HEADER_LEN + 8..HEADER_LEN + 24], sender_ip.octets());
        assert_eq!(payload[HEADER_LEN + 24..], 3u32.to_be_bytes());
    }

    #[test]
    fn new_registration_prunes_dead_clients_first() {
        let mut state = RelayState::new();
        let (dead_sock, dead_addr) = client(RECV_WAIT);
        state.register_client(dead_addr);
        assert_eq!(state.client_count(), 1);

        // The client process "exits": its port is released.
        drop(dead_sock);

        let (live_sock, live_addr) = client(RECV_WAIT);
        state.register_client(live_addr);
        assert_eq!(state.client_count(), 1, "dead entry pruned, live one kept");
        expect_command(&live_sock, CMD_CONFIRM);
    }

    #[test]
    fn register_header_with_piggybacked_payload_fans_the_rest() {
        let mut state = RelayState::new();
        let (other, other_addr) = client(RECV_WAIT);
        state.register_client(other_addr);
        expect_command(&other, CMD_CONFIRM);

        let (newcomer, new_addr) = client(RECV_WAIT);
        let mut msg = register_message();
        msg.extend_from_slice(b"trailing");
        state.handle_datagram(new_addr, &mut msg);
        expect_command(&newcomer, CMD_CONFIRM);

        // The pre-existing client sees the keep-alive, then the remainder
        // with the registration header stripped.
        expect_command(&other, CMD_NOOP);
        let mut buf = [0u8; 64];
        let n = other.recv(&mut buf).expect("remainder arrives");
        assert_eq!(&buf[..n], b"trailing");
    }

    #[test]
    fn relay_bind_detects_existing_instance() {
        // Hold the port with a plain socket, exactly what a first relay
        // instance would look like.
        let holder = UdpSocket::bind("0.0.0.0:0").expect("bind ephemeral");
        let port = holder.local_addr().expect("local addr").port();

        let cfg = RelayConfig {
            port,
            auto_addr_list: false,
            addr_list: String::new(),
        };
        match Relay::bind(&cfg) {
            Err(Error::AlreadyRunning(p)) => assert_eq!(p, port),
            other => panic!(
                "expected AlreadyRunning, got {:?}",
                other.map(|relay| relay.port())
            ),
        }
    }
}
