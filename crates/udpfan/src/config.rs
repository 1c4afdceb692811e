// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay configuration - single source of truth.
//!
//! All compiled-in constants live here. **Never hardcode the port, buffer
//! bound, or pool capacity elsewhere!** Runtime configuration comes from
//! `RelayConfig`, assembled from the environment (`from_env`) and optionally
//! overridden by the daemon's command line.

use std::env;

// =======================================================================
// Compiled-in defaults
// =======================================================================

/// Well-known relay UDP port.
///
/// Clients register here; servers beacon here. Overridable via
/// [`ENV_PORT`] or the daemon's `--port` flag.
pub const DEFAULT_RELAY_PORT: u16 = 5065;

/// Largest datagram the dispatch loop will receive.
///
/// Maximum UDP payload plus one fixed wire header, so a full-size payload
/// prefixed by a registration header still fits in one read.
pub const MAX_DATAGRAM: usize = 0xffff + 16;

/// Fixed capacity of the client slot arena.
///
/// Registrations beyond this are rejected and logged; the arena never
/// grows. Bounds relay memory independent of how many stale clients exist
/// between verify passes.
pub const CLIENT_POOL_CAPACITY: usize = 64;

// =======================================================================
// Environment variables
// =======================================================================

/// Relay port override (u16).
pub const ENV_PORT: &str = "UDPFAN_PORT";
/// Interface auto-discovery toggle: `YES`/`NO` (also `1`/`0`, `true`/`false`).
pub const ENV_AUTO_ADDR_LIST: &str = "UDPFAN_AUTO_ADDR_LIST";
/// Operator address list: whitespace-separated `host[:port]` tokens.
pub const ENV_ADDR_LIST: &str = "UDPFAN_ADDR_LIST";

/// Startup configuration, read once; immutable afterwards.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// UDP port the relay listens on.
    pub port: u16,
    /// Discover interface broadcast/multicast targets automatically.
    pub auto_addr_list: bool,
    /// Operator-supplied `host[:port]` tokens, whitespace separated.
    pub addr_list: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            port: DEFAULT_RELAY_PORT,
            auto_addr_list: true,
            addr_list: String::new(),
        }
    }
}

impl RelayConfig {
    /// Build a config from the `UDPFAN_*` environment, falling back to the
    /// compiled-in defaults. Malformed values are logged and ignored.
    pub fn from_env() -> Self {
        let mut cfg = RelayConfig::default();

        if let Ok(raw) = env::var(ENV_PORT) {
            match raw.trim().parse::<u16>() {
                Ok(p) if p != 0 => cfg.port = p,
                _ => log::warn!(
                    "[Config] {}='{}' is not a valid port, using {}",
                    ENV_PORT,
                    raw,
                    cfg.port
                ),
            }
        }

        if let Ok(raw) = env::var(ENV_AUTO_ADDR_LIST) {
            match parse_yes_no(&raw) {
                Some(v) => cfg.auto_addr_list = v,
                None => log::warn!(
                    "[Config] {}='{}' is not YES/NO, using {}",
                    ENV_AUTO_ADDR_LIST,
                    raw,
                    cfg.auto_addr_list
                ),
            }
        }

        if let Ok(raw) = env::var(ENV_ADDR_LIST) {
            cfg.addr_list = raw;
        }

        cfg
    }
}

/// Parse a YES/NO style toggle. Returns `None` for unrecognized spellings.
pub fn parse_yes_no(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "1" | "on" => Some(true),
        "no" | "n" | "false" | "0" | "off" => Some(false),
        _ => None,
    }
}
