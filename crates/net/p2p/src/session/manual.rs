//! Operator-requested connections, kept alive until shutdown.

use std::sync::Arc;

use kestrel_net_peers::{Channel, Direction};
use kestrel_net_primitives::{Error, Result};
use tracing::{debug, info, warn};

use super::SessionContext;
use crate::handler::Completion;

#[derive(Clone)]
pub(crate) struct ManualSession {
    context: SessionContext,
}

impl ManualSession {
    pub(crate) fn new(context: SessionContext) -> Self {
        Self { context }
    }

    pub(crate) fn start(&self, completion: Completion<()>) {
        self.context.complete(completion, Ok(()));
    }

    /// Connects to `host:port`, retrying per the manual retry limit.
    ///
    /// `completion` receives the first established channel or the final error. The
    /// connection is re-established whenever it drops, until shutdown.
    pub(crate) fn connect(&self, host: String, port: u16, completion: Completion<Arc<Channel>>) {
        self.context
            .spawn(maintain(self.context.clone(), host, port, completion));
    }
}

async fn maintain(context: SessionContext, host: String, port: u16, completion: Completion<Arc<Channel>>) {
    let limit = context.settings().manual_retry_limit;
    let backoff = context.settings().connect_timeout();
    let mut completion = Some(completion);
    let mut attempts = 0u32;

    while !context.stopped() {
        attempts = attempts.saturating_add(1);
        match context.until_shutdown(attempt(&context, &host, port)).await {
            Ok(channel) => {
                attempts = 0;
                info!(%host, port, authority = %channel.authority(), "manual connection established");
                if let Some(completion) = completion.take() {
                    completion.complete(Ok(Arc::clone(&channel)));
                }

                let reason = channel.stopped().await;
                if reason.is_stopped() {
                    break;
                }
                debug!(%host, port, %reason, "manual connection dropped, reconnecting");
            }
            Err(error) if error.is_stopped() => break,
            Err(error) => {
                warn!(%host, port, attempts, %error, "manual connection failed");
                if limit != 0 && attempts >= limit {
                    if let Some(completion) = completion.take() {
                        completion.complete(Err(error));
                    }
                    break;
                }
                if context.pause(backoff).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Tries each resolved address of `host` in turn.
async fn attempt(context: &SessionContext, host: &str, port: u16) -> Result<Arc<Channel>> {
    let mut last = Error::ResolveFailed(format!("{host}:{port}"));
    for authority in context.resolve(host, port).await? {
        match context.connect(authority).await {
            Ok(stream) => return context.register(stream, Direction::Outbound).await,
            Err(error) => last = error,
        }
    }
    Err(last)
}
