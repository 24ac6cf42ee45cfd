//! Network settings and the mainnet/testnet presets.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use serde::{Deserialize, Serialize};

// =============================================================================
// Network Identification
// =============================================================================

/// Magic prefix of the mainnet admission frame.
pub const MAINNET_IDENTIFIER: u32 = 0xd9b4_bef9;

/// Magic prefix of the testnet admission frame.
pub const TESTNET_IDENTIFIER: u32 = 0x0709_110b;

/// Default inbound port on mainnet.
pub const MAINNET_PORT: u16 = 8333;

/// Default inbound port on testnet.
pub const TESTNET_PORT: u16 = 18333;

const MAINNET_SEEDS: [&str; 4] = [
    "mainnet1.libbitcoin.net:8333",
    "mainnet2.libbitcoin.net:8333",
    "mainnet3.libbitcoin.net:8333",
    "mainnet4.libbitcoin.net:8333",
];

const TESTNET_SEEDS: [&str; 4] = [
    "testnet1.libbitcoin.net:18333",
    "testnet2.libbitcoin.net:18333",
    "testnet3.libbitcoin.net:18333",
    "testnet4.libbitcoin.net:18333",
];

// =============================================================================
// Connection Limits
// =============================================================================

pub const DEFAULT_THREADS: usize = 4;
pub const DEFAULT_CONNECTION_LIMIT: usize = 16;
pub const DEFAULT_OUTBOUND_CONNECTIONS: usize = 8;
pub const DEFAULT_CONNECT_BATCH_SIZE: usize = 5;
pub const DEFAULT_HOST_POOL_CAPACITY: usize = 1000;

// =============================================================================
// Timeouts
// =============================================================================

pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u32 = 5;
pub const DEFAULT_CHANNEL_HANDSHAKE_SECONDS: u32 = 30;
pub const DEFAULT_CHANNEL_HEARTBEAT_MINUTES: u32 = 5;
pub const DEFAULT_CHANNEL_INACTIVITY_MINUTES: u32 = 10;
pub const DEFAULT_CHANNEL_EXPIRATION_MINUTES: u32 = 1440;
pub const DEFAULT_CHANNEL_GERMINATION_SECONDS: u32 = 30;

// =============================================================================
// Files
// =============================================================================

pub const DEFAULT_HOSTS_FILE: &str = "hosts.cache";
pub const DEFAULT_DEBUG_FILE: &str = "debug.log";
pub const DEFAULT_ERROR_FILE: &str = "error.log";

/// Orchestrator settings (TOML-serializable).
///
/// Every field falls back to the mainnet preset when omitted, so a config file
/// only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Worker threads in the network pool.
    pub threads: usize,
    /// Network magic carried in every admission frame.
    pub identifier: u32,
    /// Port to accept connections on, 0 disables inbound.
    pub inbound_port: u16,
    /// Maximum number of established connections. 0 leaves the connections
    /// unbounded but disables inbound.
    pub connection_limit: usize,
    /// Outbound connections to maintain.
    pub outbound_connections: usize,
    /// Attempts per manual connection, 0 retries forever.
    pub manual_retry_limit: u32,
    /// Addresses raced per outbound attempt.
    pub connect_batch_size: usize,
    pub connect_timeout_seconds: u32,
    pub channel_handshake_seconds: u32,
    /// Carried for config compatibility; channels do not ping.
    pub channel_heartbeat_minutes: u32,
    pub channel_inactivity_minutes: u32,
    pub channel_expiration_minutes: u32,
    pub channel_germination_seconds: u32,
    /// Address book size, 0 disables the book and seeding.
    pub host_pool_capacity: usize,
    /// Advertised in the admission frame.
    pub relay_transactions: bool,
    pub hosts_file: PathBuf,
    pub debug_file: PathBuf,
    pub error_file: PathBuf,
    /// Our own public authority, never dialed.
    #[serde(rename = "self")]
    pub self_address: SocketAddr,
    /// Peers never dialed or accepted.
    pub blacklists: Vec<IpAddr>,
    /// `host:port` endpoints contacted when the address book is empty.
    pub seeds: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl Settings {
    pub fn mainnet() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            identifier: MAINNET_IDENTIFIER,
            inbound_port: MAINNET_PORT,
            connection_limit: DEFAULT_CONNECTION_LIMIT,
            outbound_connections: DEFAULT_OUTBOUND_CONNECTIONS,
            manual_retry_limit: 0,
            connect_batch_size: DEFAULT_CONNECT_BATCH_SIZE,
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT_SECONDS,
            channel_handshake_seconds: DEFAULT_CHANNEL_HANDSHAKE_SECONDS,
            channel_heartbeat_minutes: DEFAULT_CHANNEL_HEARTBEAT_MINUTES,
            channel_inactivity_minutes: DEFAULT_CHANNEL_INACTIVITY_MINUTES,
            channel_expiration_minutes: DEFAULT_CHANNEL_EXPIRATION_MINUTES,
            channel_germination_seconds: DEFAULT_CHANNEL_GERMINATION_SECONDS,
            host_pool_capacity: DEFAULT_HOST_POOL_CAPACITY,
            relay_transactions: true,
            hosts_file: PathBuf::from(DEFAULT_HOSTS_FILE),
            debug_file: PathBuf::from(DEFAULT_DEBUG_FILE),
            error_file: PathBuf::from(DEFAULT_ERROR_FILE),
            self_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            blacklists: Vec::new(),
            seeds: MAINNET_SEEDS.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn testnet() -> Self {
        Self {
            identifier: TESTNET_IDENTIFIER,
            inbound_port: TESTNET_PORT,
            seeds: TESTNET_SEEDS.iter().map(ToString::to_string).collect(),
            ..Self::mainnet()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds.into())
    }

    pub fn channel_handshake(&self) -> Duration {
        Duration::from_secs(self.channel_handshake_seconds.into())
    }

    pub fn channel_inactivity(&self) -> Duration {
        minutes(self.channel_inactivity_minutes)
    }

    pub fn channel_expiration(&self) -> Duration {
        minutes(self.channel_expiration_minutes)
    }

    pub fn channel_germination(&self) -> Duration {
        Duration::from_secs(self.channel_germination_seconds.into())
    }

    /// Whether `authority` is blacklisted or is our own address.
    pub fn is_blocked(&self, authority: &SocketAddr) -> bool {
        self.blacklists.contains(&authority.ip())
            || (self.self_address.port() != 0 && *authority == self.self_address)
    }
}

/// Splits a `host:port` endpoint. Bracketed IPv6 hosts lose their brackets.
pub fn split_endpoint(endpoint: &str) -> Option<(&str, u16)> {
    let (host, port) = endpoint.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some((host, port.parse().ok()?))
}

fn minutes(value: u32) -> Duration {
    Duration::from_secs(u64::from(value) * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_differ_only_in_network_identity() {
        let mainnet = Settings::mainnet();
        let testnet = Settings::testnet();
        assert_ne!(mainnet, testnet);

        let aligned = Settings {
            identifier: mainnet.identifier,
            inbound_port: mainnet.inbound_port,
            seeds: mainnet.seeds.clone(),
            ..testnet
        };
        assert_eq!(aligned, mainnet);
    }

    #[test]
    fn test_partial_toml_overlays_mainnet() {
        let settings: Settings = toml::from_str(
            r#"
            threads = 2
            inbound_port = 0
            blacklists = ["10.0.0.1"]
            self = "203.0.113.7:8333"
            "#,
        )
        .unwrap();

        assert_eq!(settings.threads, 2);
        assert_eq!(settings.inbound_port, 0);
        assert_eq!(settings.identifier, MAINNET_IDENTIFIER);
        assert_eq!(settings.connection_limit, DEFAULT_CONNECTION_LIMIT);
        assert!(settings.is_blocked(&"10.0.0.1:1".parse().unwrap()));
        assert!(settings.is_blocked(&"203.0.113.7:8333".parse().unwrap()));
        assert!(!settings.is_blocked(&"203.0.113.7:8334".parse().unwrap()));
    }

    #[test]
    fn test_unspecified_self_blocks_nothing() {
        let settings = Settings::mainnet();
        assert!(!settings.is_blocked(&"0.0.0.0:0".parse().unwrap()));
        assert!(!settings.is_blocked(&"127.0.0.1:8333".parse().unwrap()));
    }

    #[test]
    fn test_split_endpoint() {
        assert_eq!(split_endpoint("seed.example.org:8333"), Some(("seed.example.org", 8333)));
        assert_eq!(split_endpoint("[::1]:18333"), Some(("::1", 18333)));
        assert_eq!(split_endpoint("no-port"), None);
        assert_eq!(split_endpoint(":8333"), None);
        assert_eq!(split_endpoint("host:99999"), None);
    }

    #[test]
    fn test_durations() {
        let settings = Settings::mainnet();
        assert_eq!(settings.connect_timeout(), Duration::from_secs(5));
        assert_eq!(settings.channel_inactivity(), Duration::from_secs(600));
        assert_eq!(settings.channel_expiration(), Duration::from_secs(86_400));
    }
}
