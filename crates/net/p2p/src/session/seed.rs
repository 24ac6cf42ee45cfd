//! Populates an empty address book from the configured seeds.

use std::sync::Arc;

use futures::future::join_all;
use kestrel_net_peers::{Channel, Direction};
use kestrel_net_primitives::{Error, Result};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::SessionContext;
use crate::{handler::Completion, settings::split_endpoint};

#[derive(Clone)]
pub(crate) struct SeedSession {
    context: SessionContext,
}

impl SeedSession {
    pub(crate) fn new(context: SessionContext) -> Self {
        Self { context }
    }

    pub(crate) fn start(&self, completion: Completion<()>) {
        let settings = self.context.settings();
        let hosts = self.context.network().hosts();

        if settings.host_pool_capacity == 0 || hosts.count() > 0 {
            debug!(hosts = hosts.count(), "seeding not required");
            return self.context.complete(completion, Ok(()));
        }
        if settings.seeds.is_empty() {
            warn!("address book is empty and no seeds are configured");
            return self.context.complete(completion, Ok(()));
        }

        self.context.spawn(seed(self.context.clone(), completion));
    }
}

async fn seed(context: SessionContext, completion: Completion<()>) {
    let hosts = context.network().hosts();
    let before = hosts.count();

    let contacts = context
        .settings()
        .seeds
        .iter()
        .map(|seed| contact(&context, seed));
    let contacted = context
        .until_shutdown(async move {
            join_all(contacts).await;
            Ok(())
        })
        .await;
    if let Err(error) = contacted {
        return completion.complete(Err(error));
    }

    let added = hosts.count().saturating_sub(before);
    if added == 0 {
        warn!(seeds = context.settings().seeds.len(), "seeding produced no host addresses");
        return completion.complete(Err(Error::OperationFailed));
    }

    info!(added, "seeded host addresses");
    completion.complete(Ok(()));
}

/// Contacts one seed within the germination window.
async fn contact(context: &SessionContext, seed: &str) {
    match timeout(context.settings().channel_germination(), germinate(context, seed)).await {
        Ok(Ok(())) => debug!(seed, "seed contacted"),
        Ok(Err(error)) => debug!(seed, %error, "seed contact failed"),
        Err(_) => debug!(seed, "seed contact timed out"),
    }
}

/// Completes the admission exchange with a seed and records its address.
async fn germinate(context: &SessionContext, seed: &str) -> Result<()> {
    let (host, port) = split_endpoint(seed).ok_or_else(|| Error::ResolveFailed(seed.to_owned()))?;

    let mut last = Error::ResolveFailed(seed.to_owned());
    for authority in context.resolve(host, port).await? {
        let mut stream = match context.connect(authority).await {
            Ok(stream) => stream,
            Err(error) => {
                last = error;
                continue;
            }
        };

        let channel = Arc::new(Channel::new(authority, Direction::Outbound));
        let result = context.handshake(&mut stream, &channel).await;
        channel.stop(Error::ChannelStopped);
        match result {
            Ok(_) => return context.network().hosts().store(channel.address()),
            Err(error) => last = error,
        }
    }
    Err(last)
}
