// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registered clients: slot arena, connected send sockets, liveness probes.
//!
//! # Verification mechanism
//!
//! Some kernels do not implement the UDP disconnect that an ICMP
//! port-unreachable would normally cause, so a send on a connected socket
//! can keep "succeeding" long after the peer exited. Liveness is therefore
//! probed directly: bind a throwaway socket to the client's port — if the
//! bind is refused with "address in use" the peer's real socket still holds
//! the port, otherwise nobody does and the entry is stale. The bulk pass
//! runs on every brand-new registration; the single-client probe runs after
//! any failed send.

use crate::addr::{probe_port, same_port, AddressFamily, ProbeOutcome};
use crate::config::CLIENT_POOL_CAPACITY;
use crate::error::{Error, Result};
use crate::proto::{confirm_message, noop_message};
use socket2::{Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};

/// Generation-tagged handle into the slot arena.
///
/// The generation catches stale handles: a released slot's index is
/// recycled with a bumped generation, so a handle taken before the release
/// stops resolving instead of aliasing the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId {
    index: usize,
    generation: u32,
}

struct Slot {
    generation: u32,
    client: Option<RegisteredClient>,
}

/// Fixed-capacity arena for registered clients.
///
/// Capacity never grows; exhaustion is reported to the caller, which drops
/// the registration. This bounds relay memory no matter how many stale
/// clients pile up between verify passes.
pub struct SlotArena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    exhausted_count: u64,
}

impl SlotArena {
    pub fn new(capacity: usize) -> SlotArena {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                client: None,
            })
            .collect();
        SlotArena {
            slots,
            // Pop from the back: lowest indices hand out first.
            free: (0..capacity).rev().collect(),
            exhausted_count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exhaustion events since startup (diagnostic).
    pub fn exhausted_count(&self) -> u64 {
        self.exhausted_count
    }

    pub fn insert(&mut self, client: RegisteredClient) -> Result<SlotId> {
        let Some(index) = self.free.pop() else {
            self.exhausted_count += 1;
            return Err(Error::PoolExhausted);
        };
        let slot = &mut self.slots[index];
        slot.client = Some(client);
        Ok(SlotId {
            index,
            generation: slot.generation,
        })
    }

    pub fn get(&self, id: SlotId) -> Option<&RegisteredClient> {
        let slot = self.slots.get(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.client.as_ref()
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut RegisteredClient> {
        let slot = self.slots.get_mut(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.client.as_mut()
    }

    /// Release a slot, returning its occupant. A stale or already-released
    /// id is a no-op returning `None`.
    pub fn remove(&mut self, id: SlotId) -> Option<RegisteredClient> {
        let slot = self.slots.get_mut(id.index)?;
        if slot.generation != id.generation || slot.client.is_none() {
            return None;
        }
        let client = slot.client.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        client
    }

    /// Snapshot of every live handle. Cloned up front so callers can mutate
    /// the arena while walking the ids; a removed entry simply stops
    /// resolving.
    pub fn live_ids(&self) -> Vec<SlotId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.client.is_some())
            .map(|(index, slot)| SlotId {
                index,
                generation: slot.generation,
            })
            .collect()
    }
}

/// One registered listener: its peer address and the connected socket the
/// relay delivers through.
pub struct RegisteredClient {
    addr: SocketAddr,
    sock: UdpSocket,
}

impl RegisteredClient {
    /// Build the dedicated send socket: `connect()` without bind or listen,
    /// so `send()` targets exactly this peer and surfaces refused/reset
    /// errors when the peer vanished.
    pub fn connect(addr: SocketAddr) -> io::Result<RegisteredClient> {
        let sock = Socket::new(
            AddressFamily::of(&addr).domain(),
            Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        sock.connect(&addr.into())?;
        Ok(RegisteredClient {
            addr,
            sock: sock.into(),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.addr)
    }

    /// Deliver one datagram. Connection-refused/reset is routine peer-gone
    /// noise on a connected UDP socket, reported like any other failure so
    /// the caller can verify, but never logged as an error.
    pub fn send(&self, payload: &[u8]) -> io::Result<()> {
        self.sock.send(payload).map(|_| ())
    }

    /// Send the registration acknowledgment. An IPv4 peer finds its own
    /// address in the message so it learns which interface the relay saw.
    pub fn send_confirm(&self) -> io::Result<()> {
        let peer_v4 = match self.addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        };
        self.send(&confirm_message(peer_v4))
    }

    /// Whether the peer's port is still bound by a live process.
    ///
    /// Probes every enabled family until one reports the port in use; a
    /// probe error is logged and the next family is tried. Only when no
    /// family holds the port is the client dead.
    pub fn verify(&self) -> bool {
        for &family in AddressFamily::enabled() {
            match probe_port(family, self.addr.port()) {
                ProbeOutcome::InUse => return true,
                ProbeOutcome::Free => {}
                ProbeOutcome::Failed(e) => {
                    log::warn!(
                        "[Registry] liveness probe for port {} failed: {}",
                        self.addr.port(),
                        e
                    );
                }
            }
        }
        false
    }
}

/// The set of registered listeners, backed by the slot arena.
pub struct ClientRegistry {
    arena: SlotArena,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        ClientRegistry::new()
    }
}

impl ClientRegistry {
    pub fn new() -> ClientRegistry {
        ClientRegistry {
            arena: SlotArena::new(CLIENT_POOL_CAPACITY),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_capacity(capacity: usize) -> ClientRegistry {
        ClientRegistry {
            arena: SlotArena::new(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// One local process is one port: the reuse lookup matches on port
    /// alone, whichever family the client registered over.
    pub fn find_by_port(&self, addr: &SocketAddr) -> Option<SlotId> {
        self.arena
            .live_ids()
            .into_iter()
            .find(|&id| match self.arena.get(id) {
                Some(client) => same_port(&client.addr, addr),
                None => false,
            })
    }

    pub fn insert(&mut self, client: RegisteredClient) -> Result<SlotId> {
        self.arena.insert(client)
    }

    pub fn get(&self, id: SlotId) -> Option<&RegisteredClient> {
        self.arena.get(id)
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut RegisteredClient> {
        self.arena.get_mut(id)
    }

    pub fn remove(&mut self, id: SlotId) -> Option<RegisteredClient> {
        self.arena.remove(id)
    }

    pub fn live_ids(&self) -> Vec<SlotId> {
        self.arena.live_ids()
    }

    /// Verify every entry except `skip` and release the dead ones.
    ///
    /// `skip` names the just-registered client, whose port is held by
    /// construction; everything else gets probed so a stale entry is gone
    /// before the newcomer's confirmation is sent.
    pub fn verify_all(&mut self, skip: Option<SlotId>) {
        for id in self.arena.live_ids() {
            if skip == Some(id) {
                continue;
            }
            let alive = match self.arena.get(id) {
                Some(client) => client.verify(),
                None => continue,
            };
            if !alive {
                if let Some(dead) = self.arena.remove(id) {
                    log::info!("[Registry] pruned dead client {}", dead.addr());
                }
            }
        }
    }

    /// Fan the zero-payload keep-alive to every client except `skip`.
    ///
    /// Sent on each registration so sockets do not accumulate for clients
    /// that only ever register and otherwise never receive traffic. Send
    /// failures here fall to the next verify pass; no pruning in-line.
    pub fn send_noop_to_others(&self, skip: Option<SlotId>) {
        let noop = noop_message();
        for id in self.arena.live_ids() {
            if skip == Some(id) {
                continue;
            }
            if let Some(client) = self.arena.get(id) {
                if let Err(e) = client.send(&noop) {
                    log::debug!("[Registry] keep-alive to {} failed: {}", client.addr(), e);
                }
            }
        }
    }
}
