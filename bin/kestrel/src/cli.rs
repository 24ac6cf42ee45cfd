//! Command-line interface for the kestrel node.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use clap::{Args, Parser};
use kestrel_net_p2p::{Settings, split_endpoint};
use kestrel_observability::LoggingConfig;

/// Kestrel - peer-to-peer network node
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) logs: LogArgs,

    #[command(flatten)]
    pub(crate) network: NetworkArgs,

    /// Serve Prometheus metrics on this address.
    #[arg(long, value_name = "ADDR", env = "KESTREL_METRICS")]
    pub(crate) metrics: Option<SocketAddr>,
}

/// Logging configuration
#[derive(Debug, Args, Clone)]
#[command(next_help_heading = "Logging")]
pub(crate) struct LogArgs {
    /// Silence all output except errors.
    #[arg(short, long)]
    pub(crate) quiet: bool,

    /// Verbose mode (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub(crate) verbosity: u8,

    /// Log filter directives (e.g. "kestrel_net_p2p=debug").
    #[arg(long = "log.filter", value_name = "DIRECTIVE")]
    pub(crate) filter: Option<String>,
}

impl LogArgs {
    /// Logging setup for a node writing its log files where `settings` says.
    pub(crate) fn logging_config(&self, settings: &Settings) -> LoggingConfig {
        LoggingConfig {
            quiet: self.quiet,
            verbosity: self.verbosity,
            filter: self.filter.clone(),
            debug_file: non_empty(&settings.debug_file),
            error_file: non_empty(&settings.error_file),
        }
    }
}

/// Network configuration
#[derive(Debug, Args, Clone)]
#[command(next_help_heading = "Network")]
pub(crate) struct NetworkArgs {
    /// TOML file whose `[network]` table overrides the preset.
    #[arg(long, value_name = "FILE", env = "KESTREL_CONFIG")]
    pub(crate) config: Option<PathBuf>,

    /// Use the testnet preset instead of mainnet.
    #[arg(long)]
    pub(crate) testnet: bool,

    /// Worker threads in the network pool.
    #[arg(long, value_name = "N")]
    pub(crate) threads: Option<usize>,

    /// Inbound port, 0 disables inbound connections.
    #[arg(long, value_name = "PORT")]
    pub(crate) port: Option<u16>,

    /// Address book file.
    #[arg(long, value_name = "PATH")]
    pub(crate) hosts_file: Option<PathBuf>,

    /// Peer to keep connected (host:port). May be repeated.
    #[arg(long = "peer", value_name = "HOST:PORT", value_parser = parse_peer)]
    pub(crate) peers: Vec<Peer>,
}

/// A manually configured peer endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Peer {
    pub(crate) host: String,
    pub(crate) port: u16,
}

fn parse_peer(value: &str) -> Result<Peer, String> {
    split_endpoint(value)
        .map(|(host, port)| Peer {
            host: host.to_owned(),
            port,
        })
        .ok_or_else(|| format!("expected HOST:PORT, got {value:?}"))
}

fn non_empty(path: &Path) -> Option<PathBuf> {
    (!path.as_os_str().is_empty()).then(|| path.to_path_buf())
}
