//! Kestrel node binary.

mod cli;
mod config;

use clap::Parser;
use eyre::{Result, WrapErr};
use kestrel_net_p2p::P2p;
use tokio::sync::oneshot;
use tracing::info;

use crate::cli::Cli;

type Handler = Box<dyn FnOnce(kestrel_net_p2p::Result<()>) + Send>;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::load_settings(&cli.network)?;

    kestrel_observability::init_logging(&cli.logs.logging_config(&settings))?;
    if let Some(listen) = cli.metrics {
        kestrel_observability::install_prometheus_exporter(listen)?;
    }

    let node = P2p::new(settings);
    wait(|done| node.start(done)).wrap_err("failed to start network")?;
    wait(|done| node.run(done)).wrap_err("failed to run network")?;

    for peer in &cli.network.peers {
        info!(host = %peer.host, port = peer.port, "connecting to configured peer");
        node.connect(peer.host.clone(), peer.port);
    }

    info!("node running, press Ctrl-C to stop");
    wait_for_ctrl_c()?;

    info!("shutting down");
    node.close();
    Ok(())
}

/// Blocks until the network invokes the handler passed to `call`.
fn wait(call: impl FnOnce(Handler)) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    call(Box::new(move |result: kestrel_net_p2p::Result<()>| {
        let _ = tx.send(result);
    }));
    rx.blocking_recv().wrap_err("network dropped the handler")??;
    Ok(())
}

fn wait_for_ctrl_c() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("failed to build signal runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .wrap_err("failed to listen for Ctrl-C")
}
