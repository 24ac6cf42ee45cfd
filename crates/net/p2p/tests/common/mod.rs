#![allow(dead_code, unreachable_pub)]

use std::{path::Path, sync::mpsc, time::Duration};

use kestrel_net_p2p::Settings;

pub const TIMEOUT: Duration = Duration::from_secs(15);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Isolated settings: no seeds, no inbound, no outbound dialing.
pub fn settings(dir: &Path) -> Settings {
    Settings {
        threads: 2,
        inbound_port: 0,
        outbound_connections: 0,
        connect_timeout_seconds: 1,
        channel_handshake_seconds: 5,
        seeds: Vec::new(),
        hosts_file: dir.join("hosts.json"),
        ..Settings::testnet()
    }
}

/// Hands `call` a handler and waits for it to fire.
pub fn wait<T: Send + 'static>(call: impl FnOnce(Box<dyn FnOnce(T) + Send>)) -> T {
    let (tx, rx) = mpsc::channel();
    call(Box::new(move |value: T| {
        let _ = tx.send(value);
    }));
    rx.recv_timeout(TIMEOUT).expect("handler was not invoked")
}

/// A port nothing is listening on at the moment of the call.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|address| address.port())
        .expect("no free port")
}

/// Polls `check` until it holds or the timeout passes.
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + TIMEOUT;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}
