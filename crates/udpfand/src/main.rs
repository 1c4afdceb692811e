// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! udpfand - the udpfan relay daemon.
//!
//! Binds the well-known relay port, then fans every inbound datagram out to
//! the locally registered clients until the process is terminated. One
//! instance per host: if the port is already owned by another relay, this
//! process exits quietly with success.

use clap::Parser;
use std::process::ExitCode;
use udpfan::{Error, Relay, RelayConfig};

/// Single-host UDP broadcast fan-out relay
#[derive(Parser, Debug)]
#[command(name = "udpfand")]
#[command(version)]
#[command(about = "Fan discovery beacons out to locally registered clients")]
struct Args {
    /// Relay UDP port (overrides UDPFAN_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Extra targets, whitespace-separated host[:port] tokens
    /// (overrides UDPFAN_ADDR_LIST)
    #[arg(long, value_name = "LIST")]
    addr_list: Option<String>,

    /// Disable interface auto-discovery (overrides UDPFAN_AUTO_ADDR_LIST)
    #[arg(long)]
    no_auto_addr_list: bool,
}

impl Args {
    /// Environment first, command line on top.
    fn into_config(self) -> RelayConfig {
        let mut cfg = RelayConfig::from_env();
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(list) = self.addr_list {
            cfg.addr_list = list;
        }
        if self.no_auto_addr_list {
            cfg.auto_addr_list = false;
        }
        cfg
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let config = Args::parse().into_config();

    match local_ip_address::local_ip() {
        Ok(ip) => log::info!("[Daemon] starting on {} port {}", ip, config.port),
        Err(_) => log::info!("[Daemon] starting, port {}", config.port),
    }

    let mut relay = match Relay::bind(&config) {
        Ok(relay) => relay,
        Err(Error::AlreadyRunning(port)) => {
            // Normal condition: one relay per host. Nothing to report.
            log::debug!("[Daemon] another relay owns port {}, exiting", port);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            log::error!("[Daemon] startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    log::info!(
        "[Daemon] serving {} target(s) on port {}",
        relay.targets().len(),
        relay.port()
    );
    match relay.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("[Daemon] dispatch loop failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
