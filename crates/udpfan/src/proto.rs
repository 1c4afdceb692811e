// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay wire format.
//!
//! Every message starts with one fixed 16-byte header, all multi-byte
//! fields big-endian:
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            command            |         payload size          |
//! +-------------------------------+-------------------------------+
//! |           data type           |         element count         |
//! +-------------------------------+-------------------------------+
//! |                          parameter 1                          |
//! +---------------------------------------------------------------+
//! |                          parameter 2                          |
//! +---------------------------------------------------------------+
//! ```
//!
//! In a [`CMD_BEACON`] announcement, data type carries the server's
//! protocol revision, element count its TCP port, parameter 1 a monotone
//! beacon sequence number, and parameter 2 the advertised server address.
//! Parameter 2 is the field the relay overwrites with the sender's real
//! IPv4 address before fan-out.
//!
//! IPv6 servers cannot fit their address in parameter 2; they append the
//! 28-byte extension decoded by [`BeaconExt6`] directly after the header.

use std::net::{Ipv4Addr, Ipv6Addr};

/// Fixed wire header length in bytes.
pub const HEADER_LEN: usize = 16;

/// Version no-op. Zero-payload keep-alive fanned to registered clients.
pub const CMD_NOOP: u16 = 0;
/// Server-is-up beacon; parameter 2 / the IPv6 extension carry the origin.
pub const CMD_BEACON: u16 = 13;
/// Registration acknowledgment sent by the relay to one client.
pub const CMD_CONFIRM: u16 = 17;
/// Registration request sent by a client to the relay.
pub const CMD_REGISTER: u16 = 24;

/// Magic tag opening the IPv6 beacon extension.
pub const EXT6_MAGIC: [u8; 4] = *b"IPv6";
/// IPv6 beacon extension length (magic + size + address + scope id).
pub const EXT6_LEN: usize = 28;
/// Full length of an IPv6 beacon: fixed header plus extension.
pub const BEACON6_LEN: usize = HEADER_LEN + EXT6_LEN;

/// Decoded fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgHeader {
    pub command: u16,
    pub payload_size: u16,
    pub data_type: u16,
    pub element_count: u16,
    pub param1: u32,
    pub param2: u32,
}

impl MsgHeader {
    /// Decode the fixed header from the front of `buf`.
    ///
    /// Returns `None` when `buf` is shorter than [`HEADER_LEN`].
    pub fn decode(buf: &[u8]) -> Option<MsgHeader> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(MsgHeader {
            command: u16::from_be_bytes([buf[0], buf[1]]),
            payload_size: u16::from_be_bytes([buf[2], buf[3]]),
            data_type: u16::from_be_bytes([buf[4], buf[5]]),
            element_count: u16::from_be_bytes([buf[6], buf[7]]),
            param1: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            param2: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }

    /// Encode into a fresh 16-byte array.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&self.command.to_be_bytes());
        buf[2..4].copy_from_slice(&self.payload_size.to_be_bytes());
        buf[4..6].copy_from_slice(&self.data_type.to_be_bytes());
        buf[6..8].copy_from_slice(&self.element_count.to_be_bytes());
        buf[8..12].copy_from_slice(&self.param1.to_be_bytes());
        buf[12..16].copy_from_slice(&self.param2.to_be_bytes());
        buf
    }
}

/// Peek the command field without decoding the whole header.
pub fn command_of(buf: &[u8]) -> Option<u16> {
    if buf.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Registration acknowledgment, ready to send.
///
/// An IPv4 peer finds its own address in parameter 2 so it can learn which
/// local interface the relay saw it on; IPv6 peers get zero there.
pub fn confirm_message(peer_v4: Option<Ipv4Addr>) -> [u8; HEADER_LEN] {
    MsgHeader {
        command: CMD_CONFIRM,
        param2: peer_v4.map_or(0, u32::from),
        ..MsgHeader::default()
    }
    .encode()
}

/// Zero-payload keep-alive fanned to all other clients on registration.
pub fn noop_message() -> [u8; HEADER_LEN] {
    MsgHeader {
        command: CMD_NOOP,
        ..MsgHeader::default()
    }
    .encode()
}

/// Rewrite an IPv4 beacon header in place: stamp the sender's address into
/// parameter 2 and zero the payload size.
///
/// The caller truncates the datagram to [`HEADER_LEN`] afterwards; the
/// variable trailer is not forwarded for IPv4 beacons.
pub fn rewrite_beacon_v4(buf: &mut [u8], sender: Ipv4Addr) {
    debug_assert!(buf.len() >= HEADER_LEN);
    buf[2..4].copy_from_slice(&0u16.to_be_bytes());
    buf[12..16].copy_from_slice(&sender.octets());
}

/// Validate the IPv6 beacon extension and stamp the sender's address and
/// scope id into it.
///
/// Returns `false` without touching `buf` when the datagram is too short
/// for the extension or the magic/declared-size check fails; such beacons
/// are untrusted and must not be forwarded.
pub fn stamp_beacon_v6(buf: &mut [u8], sender: Ipv6Addr, scope_id: u32) -> bool {
    if buf.len() < BEACON6_LEN {
        return false;
    }
    let ext = &buf[HEADER_LEN..];
    if ext[0..4] != EXT6_MAGIC {
        return false;
    }
    let declared = u32::from_be_bytes([ext[4], ext[5], ext[6], ext[7]]);
    if declared as usize != EXT6_LEN {
        return false;
    }
    buf[HEADER_LEN + 8..HEADER_LEN + 24].copy_from_slice(&sender.octets());
    buf[HEADER_LEN + 24..HEADER_LEN + 28].copy_from_slice(&scope_id.to_be_bytes());
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon6_bytes() -> Vec<u8> {
        let mut buf = MsgHeader {
            command: CMD_BEACON,
            payload_size: EXT6_LEN as u16,
            ..MsgHeader::default()
        }
        .encode()
        .to_vec();
        buf.extend_from_slice(&EXT6_MAGIC);
        buf.extend_from_slice(&(EXT6_LEN as u32).to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]); // address, filled by the relay
        buf.extend_from_slice(&[0u8; 4]); // scope id
        buf
    }

    #[test]
    fn command_values() {
        assert_eq!(CMD_NOOP, 0);
        assert_eq!(CMD_BEACON, 13);
        assert_eq!(CMD_CONFIRM, 17);
        assert_eq!(CMD_REGISTER, 24);
        assert_eq!(BEACON6_LEN, 44);
    }

    #[test]
    fn header_round_trip() {
        let hdr = MsgHeader {
            command: CMD_BEACON,
            payload_size: 0,
            data_type: 13, // protocol revision
            element_count: 5064,
            param1: 42,
            param2: 0xc0a8_0105,
        };
        let buf = hdr.encode();
        assert_eq!(buf[0..2], [0, 13]);
        assert_eq!(MsgHeader::decode(&buf), Some(hdr));
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert_eq!(MsgHeader::decode(&[0u8; 15]), None);
        assert_eq!(command_of(&[1u8]), None);
    }

    #[test]
    fn confirm_carries_peer_address() {
        let buf = confirm_message(Some(Ipv4Addr::new(10, 0, 0, 5)));
        let hdr = MsgHeader::decode(&buf).expect("16 bytes");
        assert_eq!(hdr.command, CMD_CONFIRM);
        assert_eq!(hdr.param2, u32::from(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(buf[12..16], [10, 0, 0, 5]);

        let hdr6 = MsgHeader::decode(&confirm_message(None)).expect("16 bytes");
        assert_eq!(hdr6.param2, 0);
    }

    #[test]
    fn beacon_v4_rewrite_is_unconditional() {
        // Server filled parameter 2 itself; the relay must still stamp the
        // address the datagram actually came from.
        let mut buf = MsgHeader {
            command: CMD_BEACON,
            payload_size: 8,
            param2: 0xdead_beef,
            ..MsgHeader::default()
        }
        .encode()
        .to_vec();
        buf.extend_from_slice(&[0xaa; 8]);

        rewrite_beacon_v4(&mut buf, Ipv4Addr::new(10, 0, 0, 5));
        let hdr = MsgHeader::decode(&buf).expect("header intact");
        assert_eq!(hdr.payload_size, 0);
        assert_eq!(buf[12..16], [10, 0, 0, 5]);
    }

    #[test]
    fn beacon_v6_stamp() {
        let mut buf = beacon6_bytes();
        let addr: Ipv6Addr = "fe80::1234".parse().expect("literal");
        assert!(stamp_beacon_v6(&mut buf, addr, 7));
        assert_eq!(buf[HEADER_LEN + 8..HEADER_LEN + 24], addr.octets());
        assert_eq!(buf[HEADER_LEN + 24..HEADER_LEN + 28], 7u32.to_be_bytes());
    }

    #[test]
    fn beacon_v6_rejects_bad_magic_and_size() {
        let addr = Ipv6Addr::LOCALHOST;

        let mut bad_magic = beacon6_bytes();
        bad_magic[HEADER_LEN] = b'X';
        assert!(!stamp_beacon_v6(&mut bad_magic, addr, 0));

        let mut bad_size = beacon6_bytes();
        bad_size[HEADER_LEN + 4..HEADER_LEN + 8].copy_from_slice(&27u32.to_be_bytes());
        assert!(!stamp_beacon_v6(&mut bad_size, addr, 0));

        let mut short = beacon6_bytes();
        short.truncate(BEACON6_LEN - 1);
        assert!(!stamp_beacon_v6(&mut short, addr, 0));
    }
}
