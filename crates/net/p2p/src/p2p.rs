//! Public orchestrator handle.

use std::sync::Arc;

use bytes::Bytes;
use kestrel_net_peers::Channel;
use kestrel_net_primitives::{Error, NetworkAddress, Result};

use crate::{Settings, handler::Completion, network::Network};

/// The peer-to-peer network orchestrator.
///
/// Lifecycle: [`start`](Self::start) brings up the pool, the manual session and the
/// address book (seeding it if empty); [`run`](Self::run) starts accepting and
/// dialing peers; [`stop`](Self::stop) tears everything down and persists the
/// address book; [`close`](Self::close) additionally waits for the pool to drain.
///
/// Every asynchronous operation reports through a handler invoked exactly once.
/// Once the network is stopped, handlers run on the caller's thread.
///
/// ```no_run
/// use kestrel_net_p2p::{P2p, Settings};
///
/// let network = P2p::new(Settings::testnet());
/// network.start(|result| println!("started: {result:?}"));
/// network.close();
/// ```
#[derive(Debug)]
pub struct P2p {
    network: Arc<Network>,
}

impl P2p {
    /// Creates a stopped network. No threads are started and no I/O happens here.
    pub fn new(settings: Settings) -> Self {
        Self {
            network: Arc::new(Network::new(settings)),
        }
    }

    pub fn settings(&self) -> &Settings {
        self.network.settings()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the network. Fails with [`Error::OperationFailed`] unless stopped.
    pub fn start(&self, handler: impl FnOnce(Result<()>) + Send + 'static) {
        self.network.start(Completion::new(handler));
    }

    /// Starts the inbound and outbound sessions.
    pub fn run(&self, handler: impl FnOnce(Result<()>) + Send + 'static) {
        self.network.run(Completion::new(handler));
    }

    /// Stops the network. Fails with [`Error::ServiceStopped`] if already stopped.
    /// `handler` receives the outcome of saving the address book.
    pub fn stop(&self, handler: impl FnOnce(Result<()>) + Send + 'static) {
        self.network.stop(Completion::new(handler));
    }

    /// Stops the network without observing the outcome.
    pub fn stop_detached(&self) {
        self.network.stop(Completion::discard());
    }

    /// Stops the network if running and blocks until its threads are released.
    pub fn close(&self) {
        self.network.close();
    }

    /// Whether the network is stopped. True before the first start.
    pub fn stopped(&self) -> bool {
        self.network.stopped()
    }

    /// Chain height announced to peers.
    pub fn height(&self) -> u64 {
        self.network.height()
    }

    pub fn set_height(&self, height: u64) {
        self.network.set_height(height);
    }

    // =========================================================================
    // Connections
    // =========================================================================

    pub fn connected(&self, address: &NetworkAddress, handler: impl FnOnce(bool) + Send + 'static) {
        let authority = address.authority();
        self.query(move |network| handler(network.connections().exists(&authority)));
    }

    pub fn store(&self, channel: Arc<Channel>, handler: impl FnOnce(Result<()>) + Send + 'static) {
        self.mutate(handler, move |network| network.connections().store(channel));
    }

    /// Removes `channel` from the connections. Unknown channels are ignored.
    pub fn remove(&self, channel: Arc<Channel>, handler: impl FnOnce(Result<()>) + Send + 'static) {
        self.mutate(handler, move |network| {
            network.connections().remove(&channel);
            Ok(())
        });
    }

    pub fn connected_count(&self, handler: impl FnOnce(usize) + Send + 'static) {
        self.query(move |network| handler(network.connections().count()));
    }

    // =========================================================================
    // Pending handshakes
    // =========================================================================

    /// Whether a handshake with `nonce` is in flight.
    pub fn pending(&self, nonce: u64, handler: impl FnOnce(bool) + Send + 'static) {
        self.query(move |network| handler(network.pending().exists(nonce)));
    }

    pub fn pend(&self, channel: Arc<Channel>, handler: impl FnOnce(Result<()>) + Send + 'static) {
        self.mutate(handler, move |network| network.pending().store(channel));
    }

    pub fn unpend(&self, channel: Arc<Channel>, handler: impl FnOnce(Result<()>) + Send + 'static) {
        self.mutate(handler, move |network| {
            network.pending().remove(&channel);
            Ok(())
        });
    }

    pub fn pending_count(&self, handler: impl FnOnce(usize) + Send + 'static) {
        self.query(move |network| handler(network.pending().count()));
    }

    // =========================================================================
    // Address book
    // =========================================================================

    pub fn fetch_address(&self, handler: impl FnOnce(Result<NetworkAddress>) + Send + 'static) {
        self.mutate(handler, |network| network.hosts().fetch());
    }

    pub fn store_address(&self, address: NetworkAddress, handler: impl FnOnce(Result<()>) + Send + 'static) {
        self.mutate(handler, move |network| network.hosts().store(address));
    }

    pub fn store_addresses(
        &self,
        addresses: Vec<NetworkAddress>,
        handler: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.mutate(handler, move |network| network.hosts().store_many(&addresses));
    }

    pub fn remove_address(&self, address: NetworkAddress, handler: impl FnOnce(Result<()>) + Send + 'static) {
        self.mutate(handler, move |network| network.hosts().remove(&address));
    }

    pub fn address_count(&self, handler: impl FnOnce(usize) + Send + 'static) {
        self.query(move |network| handler(network.hosts().count()));
    }

    // =========================================================================
    // Manual connections and channel events
    // =========================================================================

    /// Maintains a connection to `host:port` without observing the outcome.
    pub fn connect(&self, host: impl Into<String>, port: u16) {
        self.network.connect(host.into(), port, Completion::discard());
    }

    /// Maintains a connection to `host:port`. `handler` receives the first
    /// established channel or the error that ended the retries.
    pub fn connect_with(
        &self,
        host: impl Into<String>,
        port: u16,
        handler: impl FnOnce(Result<Arc<Channel>>) + Send + 'static,
    ) {
        self.network.connect(host.into(), port, Completion::new(handler));
    }

    /// Registers `handler` for the next channel event. Stopped networks invoke it
    /// immediately with [`Error::ServiceStopped`].
    pub fn subscribe(&self, handler: impl FnOnce(Result<Arc<Channel>>) + Send + 'static) {
        self.network.subscriber().subscribe(Box::new(handler));
    }

    /// Delivers `result` to every current subscriber.
    pub fn relay(&self, result: Result<Arc<Channel>>) {
        self.network.relay(result);
    }

    /// Sends `payload` to every established connection.
    ///
    /// `per_channel` fires once for each connection reached, with the outcome of
    /// writing to it. `complete` fires after the last of them, or immediately with
    /// [`Error::ServiceStopped`] when stopped.
    pub fn broadcast(
        &self,
        payload: Bytes,
        per_channel: impl Fn(Result<()>, Arc<Channel>) + Send + Sync + 'static,
        complete: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.network.broadcast(payload, per_channel, Completion::new(complete));
    }

    /// Answers on the pool, or inline once the pool is down.
    fn query(&self, job: impl FnOnce(&Network) + Send + 'static) {
        let network = Arc::clone(&self.network);
        self.network.dispatch().concurrent(move || job(&network));
    }

    /// Applies a registry mutation on the pool. Refused outright when stopped.
    fn mutate<T: Send + 'static>(
        &self,
        handler: impl FnOnce(Result<T>) + Send + 'static,
        job: impl FnOnce(&Network) -> Result<T> + Send + 'static,
    ) {
        if self.network.stopped() {
            return handler(Err(Error::ServiceStopped));
        }
        self.query(move |network| handler(job(network)));
    }
}

impl Drop for P2p {
    fn drop(&mut self) {
        self.close();
    }
}
