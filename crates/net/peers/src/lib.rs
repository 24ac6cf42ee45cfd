//! Connection tracking for the network orchestrator.
//!
//! - [`Channel`]: one peer connection with a handshake nonce, stop signal and
//!   outgoing queue
//! - [`PendingConnections`] / [`Connections`]: registries of channels mid-handshake
//!   and established
//! - [`ChannelSubscriber`]: one-shot multicast of channel events
//! - [`Hosts`]: bounded, file-backed address book
//!
//! Every registry serializes its own mutations and carries its own open/closed
//! flag, so a store racing a stop either lands before the stop drains it or is
//! rejected with [`Error::ServiceStopped`](kestrel_net_primitives::Error::ServiceStopped).

mod channel;
mod hosts;
mod registry;
mod subscriber;

pub use channel::{Channel, Direction, Outgoing, SendHandler, fail_outgoing};
pub use hosts::Hosts;
pub use registry::{Connections, PendingConnections};
pub use subscriber::{ChannelHandler, ChannelResult, ChannelSubscriber};
