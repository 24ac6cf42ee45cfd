//! Orchestrator core: lifecycle sequencing and the shared registries.

use std::{
    mem,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use kestrel_net_peers::{Channel, ChannelResult, ChannelSubscriber, Connections, Hosts, PendingConnections};
use kestrel_net_primitives::{Error, Result};
use kestrel_tasks::{Dispatcher, ThreadPool};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::{
    Settings,
    handler::Completion,
    session::{InboundSession, ManualSession, OutboundSession, SeedSession, Session, SessionContext},
};

/// Shared state behind a [`P2p`](crate::P2p) handle.
///
/// Sessions hold an `Arc` back to the network. The network keeps its sessions
/// until `stop`, which releases them and so breaks the cycle.
pub(crate) struct Network {
    settings: Settings,
    stopped: AtomicBool,
    height: AtomicU64,
    pool: ThreadPool,
    dispatch: Dispatcher,
    pending: PendingConnections,
    connections: Connections,
    hosts: Hosts,
    subscriber: ChannelSubscriber,
    sessions: Mutex<Sessions>,
}

#[derive(Default)]
struct Sessions {
    manual: Option<ManualSession>,
    attached: Vec<Session>,
}

impl Network {
    pub(crate) fn new(settings: Settings) -> Self {
        let pool = ThreadPool::new("network");
        let dispatch = Dispatcher::new(pool.clone(), "network");
        let subscriber = ChannelSubscriber::new(Dispatcher::new(pool.clone(), "subscriber"));

        Self {
            stopped: AtomicBool::new(true),
            height: AtomicU64::new(0),
            pending: PendingConnections::new(),
            connections: Connections::new(settings.connection_limit),
            hosts: Hosts::new(settings.hosts_file.clone(), settings.host_pool_capacity),
            settings,
            pool,
            dispatch,
            subscriber,
            sessions: Mutex::default(),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub(crate) fn dispatch(&self) -> &Dispatcher {
        &self.dispatch
    }

    pub(crate) fn pending(&self) -> &PendingConnections {
        &self.pending
    }

    pub(crate) fn connections(&self) -> &Connections {
        &self.connections
    }

    pub(crate) fn hosts(&self) -> &Hosts {
        &self.hosts
    }

    pub(crate) fn subscriber(&self) -> &ChannelSubscriber {
        &self.subscriber
    }

    pub(crate) fn height(&self) -> u64 {
        self.height.load(Ordering::Acquire)
    }

    pub(crate) fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::Release);
    }

    pub(crate) fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn relay(&self, result: ChannelResult) {
        self.subscriber.relay(result);
    }

    fn context(self: &Arc<Self>) -> SessionContext {
        SessionContext::new(Arc::clone(self))
    }

    // =========================================================================
    // Start
    // =========================================================================

    pub(crate) fn start(self: &Arc<Self>, handler: Completion<()>) {
        if !self.stopped() {
            return handler.complete(Err(Error::OperationFailed));
        }

        // The previous generation must drain before the pool can be respawned.
        self.pool.join();

        // Registries are opened while still stopped, so no stop can interleave.
        self.pending.start();
        self.connections.start();
        self.subscriber.start();

        if self
            .stopped
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return handler.complete(Err(Error::OperationFailed));
        }

        if let Err(error) = self.pool.spawn(self.settings.threads) {
            error!(%error, "Error starting thread pool");
            self.halt();
            return handler.complete(Err(error.into()));
        }

        debug!(threads = self.settings.threads, "network starting");

        let manual = match self.attach(Session::Manual(ManualSession::new(self.context()))) {
            Ok(session) => session,
            Err(error) => return handler.complete(Err(error)),
        };

        let this = Arc::clone(self);
        manual.start(Completion::new(move |result| {
            this.handle_manual_started(result, handler);
        }));
    }

    fn handle_manual_started(self: &Arc<Self>, result: Result<()>, handler: Completion<()>) {
        if self.stopped() {
            return handler.complete(Err(Error::ServiceStopped));
        }
        if let Err(error) = result {
            error!(%error, "Error starting manual session");
            self.halt();
            return handler.complete(Err(error));
        }

        let this = Arc::clone(self);
        self.dispatch.ordered(move || {
            let result = this.hosts.load();
            this.handle_hosts_loaded(result, handler);
        });
    }

    fn handle_hosts_loaded(self: &Arc<Self>, result: Result<()>, handler: Completion<()>) {
        if self.stopped() {
            return handler.complete(Err(Error::ServiceStopped));
        }
        if let Err(error) = result {
            error!(%error, path = %self.hosts.path().display(), "Error loading host addresses");
            self.halt();
            return handler.complete(Err(error));
        }

        let seed = match self.attach(Session::Seed(SeedSession::new(self.context()))) {
            Ok(session) => session,
            Err(error) => return handler.complete(Err(error)),
        };

        let this = Arc::clone(self);
        seed.start(Completion::new(move |result| {
            this.handle_hosts_seeded(result, handler);
        }));
    }

    fn handle_hosts_seeded(&self, result: Result<()>, handler: Completion<()>) {
        if self.stopped() {
            return handler.complete(Err(Error::ServiceStopped));
        }
        if let Err(error) = result {
            error!(%error, "Error seeding host addresses");
            self.halt();
            return handler.complete(Err(error));
        }

        info!(hosts = self.hosts.count(), "network started");
        handler.complete(Ok(()));
    }

    // =========================================================================
    // Run
    // =========================================================================

    pub(crate) fn run(self: &Arc<Self>, handler: Completion<()>) {
        if self.stopped() {
            return handler.complete(Err(Error::ServiceStopped));
        }

        let inbound = match self.attach(Session::Inbound(InboundSession::new(self.context()))) {
            Ok(session) => session,
            Err(error) => return handler.complete(Err(error)),
        };

        let this = Arc::clone(self);
        inbound.start(Completion::new(move |result| {
            this.handle_inbound_started(result, handler);
        }));
    }

    fn handle_inbound_started(self: &Arc<Self>, result: Result<()>, handler: Completion<()>) {
        if self.stopped() {
            return handler.complete(Err(Error::ServiceStopped));
        }
        if let Err(error) = result {
            error!(%error, port = self.settings.inbound_port, "Error starting inbound session");
            return handler.complete(Err(error));
        }

        let outbound = match self.attach(Session::Outbound(OutboundSession::new(self.context()))) {
            Ok(session) => session,
            Err(error) => return handler.complete(Err(error)),
        };

        let this = Arc::clone(self);
        outbound.start(Completion::new(move |result| {
            this.handle_outbound_started(result, handler);
        }));
    }

    fn handle_outbound_started(&self, result: Result<()>, handler: Completion<()>) {
        if self.stopped() {
            return handler.complete(Err(Error::ServiceStopped));
        }
        if let Err(error) = result {
            error!(%error, "Error starting outbound session");
            return handler.complete(Err(error));
        }

        info!(
            inbound_port = self.settings.inbound_port,
            outbound = self.settings.outbound_connections,
            "network running"
        );
        handler.complete(Ok(()));
    }

    // =========================================================================
    // Stop
    // =========================================================================

    /// Tears down synchronously, then saves the address book on the ordered strand
    /// and signals the pool to shut down.
    pub(crate) fn stop(self: &Arc<Self>, handler: Completion<()>) {
        if !self.begin_stop() {
            return handler.complete(Err(Error::ServiceStopped));
        }

        let this = Arc::clone(self);
        self.dispatch.ordered(move || {
            let result = this.hosts.save();
            if let Err(error) = &result {
                error!(%error, path = %this.hosts.path().display(), "Error saving hosts file");
            }
            handler.complete(result);
        });

        self.pool.shutdown();
        info!("network stopping");
    }

    /// Stops and blocks until every worker has been released.
    pub(crate) fn close(self: &Arc<Self>) {
        self.stop(Completion::discard());
        self.pool.join();
    }

    /// Returns to stopped after a failed start, leaving the hosts file untouched.
    fn halt(&self) {
        if self.begin_stop() {
            self.pool.shutdown();
        }
    }

    /// Flips to stopped and releases everything the running network holds.
    /// Returns false when already stopped.
    fn begin_stop(&self) -> bool {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let released = mem::take(&mut *self.sessions.lock());
        debug!(sessions = released.attached.len(), "releasing sessions");
        drop(released);

        self.subscriber.stop();
        self.pending.stop(&Error::ServiceStopped);
        self.connections.stop(&Error::ServiceStopped);
        true
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Retains `session` until stop. Refused once stopped, under the same lock
    /// that stop uses to release sessions.
    pub(crate) fn attach(&self, session: Session) -> Result<Session> {
        let mut sessions = self.sessions.lock();
        if self.stopped() {
            return Err(Error::ServiceStopped);
        }

        if let Session::Manual(manual) = &session {
            sessions.manual = Some(manual.clone());
        }
        sessions.attached.push(session.clone());
        Ok(session)
    }

    /// Maintains a manual connection to `host:port`.
    pub(crate) fn connect(&self, host: String, port: u16, handler: Completion<Arc<Channel>>) {
        let manual = self.sessions.lock().manual.clone();
        match manual {
            Some(manual) if !self.stopped() => manual.connect(host, port, handler),
            _ => handler.complete(Err(Error::ServiceStopped)),
        }
    }

    // =========================================================================
    // Broadcast
    // =========================================================================

    /// Queues `payload` on every connection, behind any lifecycle work already on
    /// the ordered strand.
    pub(crate) fn broadcast(
        self: &Arc<Self>,
        payload: Bytes,
        per_channel: impl Fn(Result<()>, Arc<Channel>) + Send + Sync + 'static,
        complete: Completion<()>,
    ) {
        if self.stopped() {
            return complete.complete(Err(Error::ServiceStopped));
        }

        let this = Arc::clone(self);
        self.dispatch.ordered(move || {
            this.connections
                .broadcast(payload, per_channel, move |result| complete.complete(result));
        });
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("stopped", &self.stopped())
            .field("height", &self.height())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
