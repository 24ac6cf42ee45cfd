//! Peer-to-peer network orchestrator.
//!
//! [`P2p`] sequences the network lifecycle across four session policies:
//!
//! - manual: connections requested through [`P2p::connect`]
//! - seed: fills an empty address book from the configured seeds
//! - inbound: accepts peers on the configured port
//! - outbound: keeps a fixed number of connections dialed from the address book
//!
//! Channels are admitted with a short version exchange, tracked in the pending
//! and connection registries, and announced to [`P2p::subscribe`]rs.

mod handler;
mod handshake;
mod network;
mod p2p;
mod session;
pub mod settings;

pub use kestrel_net_peers::{Channel, Direction};
pub use kestrel_net_primitives::{Error, NetworkAddress, Result};
pub use p2p::P2p;
pub use settings::{Settings, split_endpoint};
