//! Accepts peers on the configured inbound port.

use std::net::{Ipv4Addr, SocketAddr};

use kestrel_net_peers::Direction;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::SessionContext;
use crate::handler::Completion;

#[derive(Clone)]
pub(crate) struct InboundSession {
    context: SessionContext,
}

impl InboundSession {
    pub(crate) fn new(context: SessionContext) -> Self {
        Self { context }
    }

    /// Completes once the listener is bound (or inbound is disabled).
    pub(crate) fn start(&self, completion: Completion<()>) {
        let settings = self.context.settings();
        if settings.inbound_port == 0 || settings.connection_limit == 0 {
            debug!("inbound connections disabled");
            return self.context.complete(completion, Ok(()));
        }

        self.context.spawn(listen(self.context.clone(), completion));
    }
}

async fn listen(context: SessionContext, completion: Completion<()>) {
    let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, context.settings().inbound_port));
    let listener = match TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(error) => return completion.complete(Err(error.into())),
    };
    info!(%bind, "accepting inbound connections");
    completion.complete(Ok(()));

    let limit = context.settings().connection_limit;
    let mut shutdown = context.network().pool().shutdown_signal();
    loop {
        let (stream, authority) = tokio::select! {
            () = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!(%error, "failed to accept inbound connection");
                    continue;
                }
            },
        };

        if context.settings().is_blocked(&authority) {
            debug!(%authority, "rejecting blocked inbound peer");
            continue;
        }
        if context.network().connections().count() >= limit {
            debug!(%authority, limit, "rejecting inbound peer at connection limit");
            continue;
        }

        let session = context.clone();
        context.spawn(async move {
            if let Err(error) = session.register(stream, Direction::Inbound).await {
                debug!(%authority, %error, "inbound channel rejected");
            }
        });
    }

    debug!(%bind, "inbound session stopped");
}
