//! Keeps the configured number of outbound connections filled from the address book.

use std::{net::SocketAddr, sync::Arc};

use futures::future::select_ok;
use kestrel_net_peers::{Channel, Direction};
use kestrel_net_primitives::{Error, Result};
use tracing::{debug, trace};

use super::SessionContext;
use crate::handler::Completion;

#[derive(Clone)]
pub(crate) struct OutboundSession {
    context: SessionContext,
}

impl OutboundSession {
    pub(crate) fn new(context: SessionContext) -> Self {
        Self { context }
    }

    pub(crate) fn start(&self, completion: Completion<()>) {
        let slots = self.context.settings().outbound_connections;
        if slots == 0 {
            debug!("outbound connections disabled");
            return self.context.complete(completion, Ok(()));
        }

        for slot in 0..slots {
            self.context.spawn(maintain(self.context.clone(), slot));
        }
        self.context.complete(completion, Ok(()));
    }
}

/// Fills one outbound slot, refilling it whenever its channel drops.
async fn maintain(context: SessionContext, slot: usize) {
    let backoff = context.settings().connect_timeout();

    while !context.stopped() {
        match context.until_shutdown(connect_batch(&context)).await {
            Ok(channel) => {
                debug!(slot, authority = %channel.authority(), "outbound slot filled");
                let reason = channel.stopped().await;
                if reason.is_stopped() {
                    break;
                }
                debug!(slot, %reason, "outbound channel dropped");
            }
            Err(error) if error.is_stopped() => break,
            Err(error) => {
                trace!(slot, %error, "outbound attempt failed");
                if context.pause(backoff).await.is_err() {
                    break;
                }
            }
        }
    }

    trace!(slot, "outbound slot released");
}

/// Races connects to a batch of usable addresses and registers the first to answer.
async fn connect_batch(context: &SessionContext) -> Result<Arc<Channel>> {
    let candidates = candidates(context)?;
    if candidates.is_empty() {
        return Err(Error::NotFound);
    }

    let attempts = candidates
        .into_iter()
        .map(|authority| Box::pin(context.connect(authority)));
    let (stream, _) = select_ok(attempts).await?;
    context.register(stream, Direction::Outbound).await
}

/// Up to `connect_batch_size` distinct addresses that are neither blocked nor
/// already connected.
fn candidates(context: &SessionContext) -> Result<Vec<SocketAddr>> {
    let network = context.network();
    let batch = context.settings().connect_batch_size.max(1);

    let mut candidates = Vec::with_capacity(batch);
    for _ in 0..batch {
        let authority = network.hosts().fetch()?.authority();
        if context.settings().is_blocked(&authority)
            || network.connections().exists(&authority)
            || candidates.contains(&authority)
        {
            continue;
        }
        candidates.push(authority);
    }
    Ok(candidates)
}
