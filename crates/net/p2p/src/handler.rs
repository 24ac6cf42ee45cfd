//! Single-shot completion handlers.

use std::fmt;

use kestrel_net_primitives::{Error, Result};

/// A handler that fires exactly once.
///
/// Dropping an unfired completion delivers [`Error::ServiceStopped`], so work that is
/// cancelled by shutdown or refused by the pool still reports back to its caller.
pub(crate) struct Completion<T> {
    handler: Option<Box<dyn FnOnce(Result<T>) + Send>>,
}

impl<T> Completion<T> {
    pub(crate) fn new(handler: impl FnOnce(Result<T>) + Send + 'static) -> Self {
        Self {
            handler: Some(Box::new(handler)),
        }
    }

    /// A completion whose outcome nobody observes.
    pub(crate) fn discard() -> Self {
        Self::new(|_| {})
    }

    pub(crate) fn complete(mut self, result: Result<T>) {
        if let Some(handler) = self.handler.take() {
            handler(result);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler(Err(Error::ServiceStopped));
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.handler.is_some())
            .finish()
    }
}
