//! A peer socket connection as seen by the registries.

use std::{
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use bytes::Bytes;
use kestrel_net_primitives::{Error, NetworkAddress, Result};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

/// Which side initiated the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Invoked once with the outcome of writing a payload.
pub type SendHandler = Box<dyn FnOnce(Result<()>) + Send>;

/// A payload waiting on a channel's outgoing queue.
pub struct Outgoing {
    pub payload: Bytes,
    pub sent: SendHandler,
}

impl Outgoing {
    /// Reports the write outcome to the sender.
    pub fn complete(self, result: Result<()>) {
        (self.sent)(result);
    }
}

impl fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outgoing")
            .field("len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// One peer connection, before or after its handshake.
///
/// The channel does not own the socket. Whoever drives the socket watches
/// [`stopped`](Self::stopped), writes what [`take_outgoing`](Self::take_outgoing)
/// yields, and releases the socket once the channel is stopped.
#[derive(Debug)]
pub struct Channel {
    nonce: u64,
    authority: SocketAddr,
    direction: Direction,
    peer_height: AtomicU64,
    peer_relay: AtomicBool,
    stop: watch::Sender<Option<Error>>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    /// Receiving end of `outgoing` until the socket owner takes it.
    outbox: Mutex<Option<mpsc::UnboundedReceiver<Outgoing>>>,
}

impl Channel {
    /// Creates an open channel with a fresh random nonce.
    pub fn new(authority: SocketAddr, direction: Direction) -> Self {
        Self::with_nonce(rand::random(), authority, direction)
    }

    pub fn with_nonce(nonce: u64, authority: SocketAddr, direction: Direction) -> Self {
        let (stop, _) = watch::channel(None);
        let (outgoing, outbox) = mpsc::unbounded_channel();
        Self {
            nonce,
            authority,
            direction,
            peer_height: AtomicU64::new(0),
            peer_relay: AtomicBool::new(false),
            stop,
            outgoing,
            outbox: Mutex::new(Some(outbox)),
        }
    }

    /// The handshake nonce chosen for this channel.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn authority(&self) -> SocketAddr {
        self.authority
    }

    pub fn address(&self) -> NetworkAddress {
        NetworkAddress::from(self.authority)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }

    /// Height advertised by the peer during the handshake.
    pub fn peer_height(&self) -> u64 {
        self.peer_height.load(Ordering::Relaxed)
    }

    /// Whether the peer asked for transaction relay during the handshake.
    pub fn peer_relay(&self) -> bool {
        self.peer_relay.load(Ordering::Relaxed)
    }

    pub fn set_peer_version(&self, height: u64, relay: bool) {
        self.peer_height.store(height, Ordering::Relaxed);
        self.peer_relay.store(relay, Ordering::Relaxed);
    }

    /// Stops the channel. Only the first reason is kept; returns whether this call
    /// stopped it.
    ///
    /// Payloads still queued on a channel nobody drives fail with the stop reason.
    pub fn stop(&self, reason: Error) -> bool {
        let stopped = self.stop.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.clone());
            true
        });

        if stopped {
            let outbox = self.outbox.lock().take();
            if let Some(mut outbox) = outbox {
                fail_outgoing(&mut outbox, &reason);
            }
        }
        stopped
    }

    /// Queues `payload` for the socket owner. `sent` fires once, after the write or
    /// with the stop reason if the channel stops first.
    pub fn send(&self, payload: Bytes, sent: impl FnOnce(Result<()>) + Send + 'static) {
        if let Some(reason) = self.stop_reason() {
            return sent(Err(reason));
        }

        let outgoing = Outgoing {
            payload,
            sent: Box::new(sent),
        };
        if let Err(mpsc::error::SendError(outgoing)) = self.outgoing.send(outgoing) {
            let reason = self.stop_reason().unwrap_or(Error::ChannelStopped);
            outgoing.complete(Err(reason));
        }
    }

    /// Hands the outgoing queue to the task that owns the socket. Yields `None`
    /// once taken or once the channel has stopped.
    pub fn take_outgoing(&self) -> Option<mpsc::UnboundedReceiver<Outgoing>> {
        self.outbox.lock().take()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.borrow().is_some()
    }

    pub fn stop_reason(&self) -> Option<Error> {
        (*self.stop.borrow()).clone()
    }

    /// Resolves with the stop reason once the channel is stopped.
    pub async fn stopped(&self) -> Error {
        let mut receiver = self.stop.subscribe();
        match receiver.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).clone().unwrap_or(Error::ChannelStopped),
            Err(_) => Error::ChannelStopped,
        }
    }
}

/// Closes `outbox` and fails everything still queued on it with `reason`.
pub fn fail_outgoing(outbox: &mut mpsc::UnboundedReceiver<Outgoing>, reason: &Error) {
    outbox.close();
    while let Ok(outgoing) = outbox.try_recv() {
        outgoing.complete(Err(reason.clone()));
    }
}
