//! One-shot multicast of channel events.

use std::{fmt, mem, sync::Arc};

use kestrel_net_primitives::{Error, Result};
use kestrel_tasks::Dispatcher;
use parking_lot::Mutex;
use tracing::trace;

use crate::Channel;

/// Outcome delivered to channel subscribers.
pub type ChannelResult = Result<Arc<Channel>>;

/// Continuation notified about the next channel event.
pub type ChannelHandler = Box<dyn FnOnce(ChannelResult) + Send>;

/// Registry of continuations waiting for the next channel event.
///
/// Every relay drains the registry, so each continuation fires at most once and
/// interested parties resubscribe after each event.
pub struct ChannelSubscriber {
    dispatch: Dispatcher,
    state: Mutex<Subscriptions>,
}

struct Subscriptions {
    stopped: bool,
    handlers: Vec<ChannelHandler>,
}

impl ChannelSubscriber {
    /// Creates a stopped subscriber; [`start`](Self::start) opens it.
    pub fn new(dispatch: Dispatcher) -> Self {
        Self {
            dispatch,
            state: Mutex::new(Subscriptions {
                stopped: true,
                handlers: Vec::new(),
            }),
        }
    }

    pub fn start(&self) {
        self.state.lock().stopped = false;
    }

    /// Closes the subscriber and relays [`Error::ServiceStopped`] to every pending
    /// continuation.
    pub fn stop(&self) {
        let handlers = {
            let mut state = self.state.lock();
            state.stopped = true;
            mem::take(&mut state.handlers)
        };
        self.notify(handlers, Err(Error::ServiceStopped));
    }

    /// Registers `handler` for the next event. A stopped subscriber invokes it
    /// immediately with [`Error::ServiceStopped`].
    pub fn subscribe(&self, handler: ChannelHandler) {
        let mut state = self.state.lock();
        if state.stopped {
            drop(state);
            handler(Err(Error::ServiceStopped));
            return;
        }
        state.handlers.push(handler);
    }

    /// Delivers `result` to every registered continuation and clears the registry.
    pub fn relay(&self, result: ChannelResult) {
        let handlers = mem::take(&mut self.state.lock().handlers);
        self.notify(handlers, result);
    }

    pub fn len(&self) -> usize {
        self.state.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, handlers: Vec<ChannelHandler>, result: ChannelResult) {
        if handlers.is_empty() {
            return;
        }

        trace!(count = handlers.len(), ok = result.is_ok(), "relaying channel event");
        self.dispatch.ordered(move || {
            for handler in handlers {
                handler(result.clone());
            }
        });
    }
}

impl fmt::Debug for ChannelSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ChannelSubscriber")
            .field("stopped", &state.stopped)
            .field("subscriptions", &state.handlers.len())
            .finish()
    }
}
