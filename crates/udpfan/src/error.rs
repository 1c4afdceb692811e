// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate error type.
//!
//! Startup failures are the only errors a caller ever sees: once the
//! dispatch loop runs, every per-datagram failure is contained and logged
//! (see `relay`), never propagated.

/// Errors surfaced by the public relay API.
#[derive(Debug)]
pub enum Error {
    /// The relay port is already bound by another relay instance.
    ///
    /// Not a failure: one relay per host is the normal condition. Callers
    /// are expected to exit quietly on this variant.
    AlreadyRunning(u16),
    /// Socket creation, bind, or registration with the poller failed.
    Socket(std::io::Error),
    /// Client slot arena is full; the registration was dropped.
    PoolExhausted,
    /// An operator-supplied address token did not resolve.
    InvalidAddress(String),
    /// Peer address family outside the configured capability set.
    UnsupportedFamily,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AlreadyRunning(port) => {
                write!(f, "another relay already owns port {}", port)
            }
            Error::Socket(e) => write!(f, "socket error: {}", e),
            Error::PoolExhausted => write!(f, "client pool exhausted"),
            Error::InvalidAddress(tok) => write!(f, "invalid address: {}", tok),
            Error::UnsupportedFamily => write!(f, "unsupported address family"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Socket(e) => Some(e),
            _ => None,
        }
    }
}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_port() {
        let msg = Error::AlreadyRunning(5065).to_string();
        assert!(msg.contains("5065"), "message was: {}", msg);
    }

    #[test]
    fn socket_error_keeps_source() {
        use std::error::Error as _;
        let e = Error::Socket(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(e.source().is_some());
        assert!(Error::PoolExhausted.source().is_none());
    }
}
