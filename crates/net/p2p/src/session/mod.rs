//! Connection-acquisition policies.
//!
//! Every session shares a [`SessionContext`], which carries the network handle and
//! the plumbing a session needs to turn a socket into a registered [`Channel`]:
//! connect with timeout, resolution, the admission exchange and the channel monitor.

use std::{future::Future, net::SocketAddr, sync::Arc};

use kestrel_net_peers::{Channel, Direction, fail_outgoing};
use kestrel_net_primitives::{Error, Result};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, lookup_host},
    time::{sleep, timeout},
};
use tracing::{debug, trace};

use crate::{
    Settings,
    handler::Completion,
    handshake::{self, Version},
    network::Network,
};

mod inbound;
mod manual;
mod outbound;
mod seed;

pub(crate) use inbound::InboundSession;
pub(crate) use manual::ManualSession;
pub(crate) use outbound::OutboundSession;
pub(crate) use seed::SeedSession;

/// Bytes read per wakeup while monitoring an established channel.
const MONITOR_BUFFER_SIZE: usize = 1024;

/// The closed set of session policies.
#[derive(Clone)]
pub(crate) enum Session {
    Manual(ManualSession),
    Seed(SeedSession),
    Inbound(InboundSession),
    Outbound(OutboundSession),
}

impl Session {
    pub(crate) fn start(&self, completion: Completion<()>) {
        trace!(session = self.name(), "starting session");
        match self {
            Self::Manual(session) => session.start(completion),
            Self::Seed(session) => session.start(completion),
            Self::Inbound(session) => session.start(completion),
            Self::Outbound(session) => session.start(completion),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Manual(_) => "manual",
            Self::Seed(_) => "seed",
            Self::Inbound(_) => "inbound",
            Self::Outbound(_) => "outbound",
        }
    }
}

/// Network access shared by all sessions.
#[derive(Clone)]
pub(crate) struct SessionContext {
    network: Arc<Network>,
}

impl SessionContext {
    pub(crate) fn new(network: Arc<Network>) -> Self {
        Self { network }
    }

    pub(crate) fn network(&self) -> &Network {
        &self.network
    }

    pub(crate) fn settings(&self) -> &Settings {
        self.network.settings()
    }

    pub(crate) fn stopped(&self) -> bool {
        self.network.stopped()
    }

    /// Completes on the pool so the caller's stack unwinds first.
    pub(crate) fn complete<T: Send + 'static>(&self, completion: Completion<T>, result: Result<T>) {
        self.network
            .dispatch()
            .concurrent(move || completion.complete(result));
    }

    /// Runs `future` on the network pool. A refused future is dropped, which fires
    /// any completion it owns.
    pub(crate) fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) {
        if self.network.pool().spawn_future(future).is_err() {
            trace!("network pool refused session task");
        }
    }

    /// Races `future` against pool shutdown.
    pub(crate) async fn until_shutdown<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        let mut shutdown = self.network.pool().shutdown_signal();
        tokio::select! {
            result = future => result,
            () = shutdown.wait() => Err(Error::ServiceStopped),
        }
    }

    /// Sleeps for `duration`, or fails with [`Error::ServiceStopped`] on shutdown.
    pub(crate) async fn pause(&self, duration: std::time::Duration) -> Result<()> {
        self.until_shutdown(async {
            sleep(duration).await;
            Ok(())
        })
        .await
    }

    pub(crate) async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let resolved: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|_| Error::ResolveFailed(format!("{host}:{port}")))?
            .collect();
        if resolved.is_empty() {
            return Err(Error::ResolveFailed(format!("{host}:{port}")));
        }
        Ok(resolved)
    }

    /// Opens a socket to `authority` within the connect timeout.
    pub(crate) async fn connect(&self, authority: SocketAddr) -> Result<TcpStream> {
        if self.settings().is_blocked(&authority) {
            return Err(Error::AddressBlocked);
        }

        match timeout(self.settings().connect_timeout(), TcpStream::connect(authority)).await {
            Ok(stream) => Ok(stream?),
            Err(_) => Err(Error::ChannelTimeout),
        }
    }

    /// Runs the admission exchange for `channel`.
    ///
    /// Outbound channels are pending for the duration, so a peer that answers with
    /// one of our own nonces is identified as ourselves.
    pub(crate) async fn handshake(&self, stream: &mut TcpStream, channel: &Arc<Channel>) -> Result<Version> {
        let pending = self.network.pending();
        let outbound = !channel.is_inbound();
        if outbound {
            pending.store(Arc::clone(channel))?;
        }

        let local = Version {
            magic: self.settings().identifier,
            nonce: channel.nonce(),
            height: self.network.height(),
            relay: self.settings().relay_transactions,
        };
        let exchange = handshake::exchange(stream, &local, |peer| {
            if pending.exists(peer.nonce) {
                return Err(Error::SelfConnection);
            }
            Ok(())
        });

        let result = tokio::select! {
            result = timeout(self.settings().channel_handshake(), exchange) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::ChannelTimeout),
            },
            reason = channel.stopped() => Err(reason),
        };

        if outbound {
            pending.remove(channel);
        }
        result
    }

    /// Admits `stream` as a channel: handshake, store in connections, start the
    /// monitor and announce the channel to subscribers.
    pub(crate) async fn register(&self, mut stream: TcpStream, direction: Direction) -> Result<Arc<Channel>> {
        let authority = stream.peer_addr()?;
        let channel = Arc::new(Channel::new(authority, direction));

        let peer = match self.until_shutdown(self.handshake(&mut stream, &channel)).await {
            Ok(peer) => peer,
            Err(error) => {
                channel.stop(error.clone());
                debug!(%authority, ?direction, %error, "handshake failed");
                return Err(error);
            }
        };
        channel.set_peer_version(peer.height, peer.relay);

        if let Err(error) = self.network.connections().store(Arc::clone(&channel)) {
            channel.stop(error.clone());
            debug!(%authority, %error, "channel not admitted");
            return Err(error);
        }

        let monitor = self.clone().monitor(Arc::clone(&channel), stream);
        if self.network.pool().spawn_future(monitor).is_err() {
            channel.stop(Error::ServiceStopped);
            self.network.connections().remove(&channel);
            return Err(Error::ServiceStopped);
        }

        debug!(
            %authority,
            ?direction,
            nonce = channel.nonce(),
            peer_height = peer.height,
            "channel established"
        );
        self.network.relay(Ok(Arc::clone(&channel)));
        Ok(channel)
    }

    /// Owns the socket of an established channel until the channel ends, then
    /// removes it from the connections. Queued payloads are written in order.
    async fn monitor(self, channel: Arc<Channel>, mut stream: TcpStream) {
        let Some(mut outbox) = channel.take_outgoing() else {
            self.network.connections().remove(&channel);
            debug!(authority = %channel.authority(), "channel stopped before monitoring");
            return;
        };

        let inactivity = self.settings().channel_inactivity();
        let expiration = sleep(self.settings().channel_expiration());
        tokio::pin!(expiration);

        let mut shutdown = self.network.pool().shutdown_signal();
        let mut buffer = [0u8; MONITOR_BUFFER_SIZE];

        let reason = loop {
            tokio::select! {
                () = shutdown.wait() => break Error::ServiceStopped,
                reason = channel.stopped() => break reason,
                () = &mut expiration => break Error::ChannelTimeout,
                Some(outgoing) = outbox.recv() => {
                    let written = self
                        .until_shutdown(async {
                            match timeout(inactivity, stream.write_all(&outgoing.payload)).await {
                                Ok(written) => written.map_err(Error::from),
                                Err(_) => Err(Error::ChannelTimeout),
                            }
                        })
                        .await;
                    let failed = written.as_ref().err().cloned();
                    outgoing.complete(written);
                    if let Some(error) = failed {
                        break error;
                    }
                }
                read = timeout(inactivity, stream.read(&mut buffer)) => match read {
                    Ok(Ok(0)) => break Error::ChannelStopped,
                    // Traffic past the admission exchange is not interpreted.
                    Ok(Ok(_)) => continue,
                    Ok(Err(error)) => break error.into(),
                    Err(_) => break Error::ChannelTimeout,
                },
            }
        };

        channel.stop(reason.clone());
        fail_outgoing(&mut outbox, &reason);
        self.network.connections().remove(&channel);
        debug!(authority = %channel.authority(), %reason, "channel closed");
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::net::TcpListener;

    use super::*;
    use crate::handshake::VERSION_SIZE;

    async fn loopback() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dialed = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        (dialed, accepted)
    }

    fn context() -> SessionContext {
        let network = Arc::new(Network::new(Settings::testnet()));
        network.pending().start();
        SessionContext::new(network)
    }

    #[tokio::test]
    async fn test_pending_nonce_is_self_connection() {
        let context = context();
        let (mut dialed, mut accepted) = loopback().await;

        let ours = Arc::new(Channel::new(dialed.local_addr().unwrap(), Direction::Outbound));
        context.network().pending().store(Arc::clone(&ours)).unwrap();

        // The dialed end answers with the nonce we have pending.
        let echo = Version {
            magic: context.settings().identifier,
            nonce: ours.nonce(),
            height: 0,
            relay: false,
        };
        let peer = async move {
            dialed.write_all(&echo.encode()).await.unwrap();
            let mut frame = [0u8; VERSION_SIZE];
            dialed.read_exact(&mut frame).await.unwrap();
        };

        let inbound = Arc::new(Channel::new(accepted.peer_addr().unwrap(), Direction::Inbound));
        let (result, ()) = tokio::join!(context.handshake(&mut accepted, &inbound), peer);

        assert_matches!(result, Err(Error::SelfConnection));
        // Inbound channels are never pended; ours is still in flight.
        assert!(context.network().pending().exists(ours.nonce()));
        assert!(!context.network().pending().exists(inbound.nonce()));
    }

    #[tokio::test]
    async fn test_outbound_handshake_unpends() {
        let context = context();
        let (mut dialed, mut accepted) = loopback().await;
        let channel = Arc::new(Channel::new(dialed.peer_addr().unwrap(), Direction::Outbound));

        let remote = Version {
            magic: context.settings().identifier,
            nonce: channel.nonce().wrapping_add(1),
            height: 7,
            relay: true,
        };
        let peer = async move { handshake::exchange(&mut accepted, &remote, |_| Ok(())).await };

        let (ours, theirs) = tokio::join!(context.handshake(&mut dialed, &channel), peer);

        assert_eq!(ours.unwrap().height, 7);
        assert_eq!(theirs.unwrap().nonce, channel.nonce());
        assert_eq!(context.network().pending().count(), 0);
    }
}
