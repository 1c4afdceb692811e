// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # udpfan - single-host UDP broadcast fan-out relay
//!
//! The kernel delivers a broadcast or unicast datagram to at most one
//! socket bound to a given port, so independent client processes on one
//! host cannot all hear the discovery beacons sent to the well-known port.
//! udpfan binds that port once, lets local clients register their own
//! private ports, and copies every inbound datagram to every registered
//! client — filtering out the sender to avoid echo and pruning clients
//! whose processes have exited.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use udpfan::{Relay, RelayConfig, Result};
//!
//! fn main() -> Result<()> {
//!     let config = RelayConfig::from_env();
//!     let mut relay = Relay::bind(&config)?;
//!     relay.run()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------------------+
//! |  Dispatch Loop (relay) - mio poll over every bound socket        |
//! +------------------------------------------------------------------+
//! |  FanOut + beacon rewrite (relay)  |  Registration (relay)        |
//! +------------------------------------------------------------------+
//! |  ClientRegistry + Verifier (registry) - slot arena, bind probes  |
//! +------------------------------------------------------------------+
//! |  AddressCatalog (catalog) - interface targets, operator merge    |
//! +------------------------------------------------------------------+
//! |  proto (wire header) | addr (identity, probes) | config | error  |
//! +------------------------------------------------------------------+
//! ```
//!
//! Best-effort by design: at-most-once, unordered, no authentication, no
//! congestion control. The relay is strictly single-threaded; everything
//! happens on the dispatch thread.

pub mod addr;
pub mod catalog;
pub mod config;
pub mod error;
pub mod proto;
pub mod registry;
pub mod relay;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use relay::{Relay, RelayState};
