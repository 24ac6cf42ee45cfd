//! Peer network addresses.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use serde::{Deserialize, Serialize};

/// A known peer address as kept in the address book.
///
/// Two addresses denote the same peer when their [`authority`](Self::authority)
/// matches; `timestamp` and `services` are advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    /// Seconds since the unix epoch when the address was last seen.
    #[serde(default)]
    pub timestamp: u32,
    /// Advertised service bits.
    #[serde(default)]
    pub services: u64,
    pub ip: IpAddr,
    pub port: u16,
}

impl NetworkAddress {
    pub const fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            timestamp: 0,
            services: 0,
            ip,
            port,
        }
    }

    /// The unspecified address `0.0.0.0:0`.
    pub const fn unspecified() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    }

    pub const fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub const fn with_services(mut self, services: u64) -> Self {
        self.services = services;
        self
    }

    /// The socket address identifying the peer.
    pub const fn authority(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Whether the address can be dialed.
    pub fn is_valid(&self) -> bool {
        self.port != 0 && !self.ip.is_unspecified()
    }
}

impl From<SocketAddr> for NetworkAddress {
    fn from(authority: SocketAddr) -> Self {
        Self::new(authority.ip(), authority.port())
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.authority().fmt(f)
    }
}
