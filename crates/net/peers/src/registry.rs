//! Channel registries: handshakes in flight and established connections.

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::Bytes;
use kestrel_net_primitives::{Error, Result};
use metrics::Gauge;
use parking_lot::Mutex;
use tracing::debug;

use crate::Channel;

/// Map of channels keyed by an attribute of the channel, with an open/closed flag
/// held under the same lock as the map.
struct Registry<K> {
    name: &'static str,
    key: fn(&Channel) -> K,
    limit: Option<usize>,
    size: Gauge,
    state: Mutex<RegistryState<K>>,
}

struct RegistryState<K> {
    stopped: bool,
    channels: HashMap<K, Arc<Channel>>,
}

impl<K: Eq + Hash> Registry<K> {
    fn new(name: &'static str, key: fn(&Channel) -> K, limit: Option<usize>) -> Self {
        Self {
            name,
            key,
            limit,
            size: metrics::gauge!("p2p.registry.size", "registry" => name),
            state: Mutex::new(RegistryState {
                stopped: true,
                channels: HashMap::new(),
            }),
        }
    }

    fn start(&self) {
        self.state.lock().stopped = false;
    }

    fn stop(&self, reason: &Error) {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.stopped = true;
            state.channels.drain().map(|(_, channel)| channel).collect()
        };
        self.size.set(0.0);

        debug!(registry = self.name, count = drained.len(), %reason, "stopping registered channels");
        for channel in drained {
            channel.stop(reason.clone());
        }
    }

    fn exists(&self, key: &K) -> bool {
        self.state.lock().channels.contains_key(key)
    }

    fn store(&self, channel: Arc<Channel>) -> Result<()> {
        let key = (self.key)(&channel);
        let mut state = self.state.lock();
        if state.stopped {
            return Err(Error::ServiceStopped);
        }
        if state.channels.contains_key(&key) {
            return Err(Error::AddressInUse);
        }
        if self.limit.is_some_and(|limit| state.channels.len() >= limit) {
            return Err(Error::ConnectionLimit);
        }

        state.channels.insert(key, channel);
        self.size.set(state.channels.len() as f64);
        Ok(())
    }

    fn remove(&self, channel: &Channel) -> bool {
        let key = (self.key)(channel);
        let mut state = self.state.lock();
        let matches = state
            .channels
            .get(&key)
            .is_some_and(|stored| std::ptr::eq(Arc::as_ptr(stored), channel));
        if matches {
            state.channels.remove(&key);
            self.size.set(state.channels.len() as f64);
        }
        matches
    }

    fn count(&self) -> usize {
        self.state.lock().channels.len()
    }

    fn snapshot(&self) -> Result<Vec<Arc<Channel>>> {
        let state = self.state.lock();
        if state.stopped {
            return Err(Error::ServiceStopped);
        }
        Ok(state.channels.values().cloned().collect())
    }
}

impl<K> fmt::Debug for Registry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("stopped", &state.stopped)
            .field("count", &state.channels.len())
            .finish_non_exhaustive()
    }
}

/// Channels whose handshake is in flight, keyed by handshake nonce.
///
/// A nonce found here while answering a peer's handshake means we dialed ourselves.
#[derive(Debug)]
pub struct PendingConnections(Registry<u64>);

impl Default for PendingConnections {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingConnections {
    /// Creates a closed registry. Call [`start`](Self::start) before storing.
    pub fn new() -> Self {
        Self(Registry::new("pending", Channel::nonce, None))
    }

    pub fn start(&self) {
        self.0.start();
    }

    /// Closes the registry and stops every pending channel with `reason`.
    pub fn stop(&self, reason: &Error) {
        self.0.stop(reason);
    }

    pub fn exists(&self, nonce: u64) -> bool {
        self.0.exists(&nonce)
    }

    /// Fails with [`Error::AddressInUse`] if the nonce is already pending.
    pub fn store(&self, channel: Arc<Channel>) -> Result<()> {
        self.0.store(channel)
    }

    /// Removes this exact channel; unknown channels are ignored.
    pub fn remove(&self, channel: &Channel) -> bool {
        self.0.remove(channel)
    }

    pub fn count(&self) -> usize {
        self.0.count()
    }
}

/// Handshaken channels, keyed by remote authority.
#[derive(Debug)]
pub struct Connections(Registry<SocketAddr>);

impl Connections {
    /// Creates a closed registry holding at most `limit` channels (0 = unbounded).
    pub fn new(limit: usize) -> Self {
        let limit = (limit > 0).then_some(limit);
        Self(Registry::new("connections", Channel::authority, limit))
    }

    pub fn start(&self) {
        self.0.start();
    }

    /// Closes the registry and stops every connection with `reason`.
    pub fn stop(&self, reason: &Error) {
        self.0.stop(reason);
    }

    pub fn exists(&self, authority: &SocketAddr) -> bool {
        self.0.exists(authority)
    }

    /// Fails with [`Error::AddressInUse`] on a duplicate authority, keeping the
    /// first channel, or [`Error::ConnectionLimit`] when full.
    pub fn store(&self, channel: Arc<Channel>) -> Result<()> {
        self.0.store(channel)
    }

    /// Removes this exact channel; unknown channels are ignored.
    pub fn remove(&self, channel: &Channel) -> bool {
        self.0.remove(channel)
    }

    pub fn count(&self) -> usize {
        self.0.count()
    }

    /// Queues `payload` on every connection.
    ///
    /// `per_channel` fires once for each connection held at the call, after its
    /// write or its failure; `complete` fires after the last of them. A closed
    /// registry completes with [`Error::ServiceStopped`] and reaches no channel.
    pub fn broadcast(
        &self,
        payload: Bytes,
        per_channel: impl Fn(Result<()>, Arc<Channel>) + Send + Sync + 'static,
        complete: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        let channels = match self.0.snapshot() {
            Ok(channels) => channels,
            Err(error) => return complete(Err(error)),
        };
        if channels.is_empty() {
            return complete(Ok(()));
        }

        debug!(count = channels.len(), bytes = payload.len(), "broadcasting to connections");
        let fanout = Arc::new(Fanout {
            remaining: AtomicUsize::new(channels.len()),
            per_channel: Box::new(per_channel),
            complete: Mutex::new(Some(Box::new(complete))),
        });
        for channel in channels {
            let fanout = Arc::clone(&fanout);
            let target = Arc::clone(&channel);
            channel.send(payload.clone(), move |result| fanout.sent(result, target));
        }
    }
}

/// Outstanding sends of one broadcast.
struct Fanout {
    remaining: AtomicUsize,
    per_channel: Box<dyn Fn(Result<()>, Arc<Channel>) + Send + Sync>,
    complete: Mutex<Option<Box<dyn FnOnce(Result<()>) + Send>>>,
}

impl Fanout {
    fn sent(&self, result: Result<()>, channel: Arc<Channel>) {
        (self.per_channel)(result, channel);
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let complete = self.complete.lock().take();
            if let Some(complete) = complete {
                complete(Ok(()));
            }
        }
    }
}
