//! Lifecycle and registry behavior driven through the public handle.

mod common;

use std::{
    net::SocketAddr,
    sync::{Arc, mpsc},
};

use assert_matches::assert_matches;
use bytes::Bytes;
use common::{TIMEOUT, init_tracing, settings, wait};
use kestrel_net_p2p::{Channel, Direction, Error, NetworkAddress, P2p, Result};
use tempfile::tempdir;

fn peer(n: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, n], 18333))
}

fn channel(n: u8) -> Arc<Channel> {
    Arc::new(Channel::new(peer(n), Direction::Outbound))
}

fn started(network: &P2p) {
    let result: Result<()> = wait(|done| network.start(done));
    assert_matches!(result, Ok(()));
    assert!(!network.stopped());
}

#[test]
fn test_new_network_is_stopped() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));

    assert!(network.stopped());
    assert_eq!(network.height(), 0);
    network.set_height(840_000);
    assert_eq!(network.height(), 840_000);
}

#[test]
fn test_start_twice_fails_without_side_effects() {
    init_tracing();
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);

    let result: Result<()> = wait(|done| network.start(done));
    assert_matches!(result, Err(Error::OperationFailed));
    assert!(!network.stopped());

    let count: usize = wait(|done| network.connected_count(done));
    assert_eq!(count, 0);
    network.close();
}

#[test]
fn test_start_stop_start() {
    init_tracing();
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));

    started(&network);
    let stopped: Result<()> = wait(|done| network.stop(done));
    assert_matches!(stopped, Ok(()));
    assert!(network.stopped());

    started(&network);
    network.close();
    assert!(network.stopped());
}

#[test]
fn test_stop_twice_reports_stopped() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);

    let first: Result<()> = wait(|done| network.stop(done));
    let second: Result<()> = wait(|done| network.stop(done));
    assert_matches!(first, Ok(()));
    assert_matches!(second, Err(Error::ServiceStopped));
}

#[test]
fn test_stop_before_start_reports_stopped() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));

    let result: Result<()> = wait(|done| network.stop(done));
    assert_matches!(result, Err(Error::ServiceStopped));

    let run: Result<()> = wait(|done| network.run(done));
    assert_matches!(run, Err(Error::ServiceStopped));
}

#[test]
fn test_stopped_network_refuses_mutation() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);
    let _: Result<()> = wait(|done| network.stop(done));

    let stored: Result<()> = wait(|done| network.store(channel(1), done));
    assert_matches!(stored, Err(Error::ServiceStopped));
    let removed: Result<()> = wait(|done| network.remove(channel(1), done));
    assert_matches!(removed, Err(Error::ServiceStopped));
    let pended: Result<()> = wait(|done| network.pend(channel(1), done));
    assert_matches!(pended, Err(Error::ServiceStopped));
    let unpended: Result<()> = wait(|done| network.unpend(channel(1), done));
    assert_matches!(unpended, Err(Error::ServiceStopped));

    let address = NetworkAddress::from(peer(1));
    let stored: Result<()> = wait(|done| network.store_address(address, done));
    assert_matches!(stored, Err(Error::ServiceStopped));
    let stored: Result<()> = wait(|done| network.store_addresses(vec![address], done));
    assert_matches!(stored, Err(Error::ServiceStopped));
    let removed: Result<()> = wait(|done| network.remove_address(address, done));
    assert_matches!(removed, Err(Error::ServiceStopped));
    let fetched: Result<NetworkAddress> = wait(|done| network.fetch_address(done));
    assert_matches!(fetched, Err(Error::ServiceStopped));

    let connected: Result<Arc<Channel>> = wait(|done| network.connect_with("127.0.0.1", 18333, done));
    assert_matches!(connected, Err(Error::ServiceStopped));
    let event: Result<Arc<Channel>> = wait(|done| network.subscribe(done));
    assert_matches!(event, Err(Error::ServiceStopped));
}

#[test]
fn test_stopped_network_still_answers_queries() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);
    let _: Result<()> = wait(|done| network.stop(done));

    let count: usize = wait(|done| network.connected_count(done));
    assert_eq!(count, 0);
    let count: usize = wait(|done| network.pending_count(done));
    assert_eq!(count, 0);
    let pending: bool = wait(|done| network.pending(7, done));
    assert!(!pending);
    let connected: bool = wait(|done| network.connected(&NetworkAddress::from(peer(1)), done));
    assert!(!connected);
}

#[test]
fn test_subscribe_before_start_fires_immediately() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));

    let (tx, rx) = mpsc::channel();
    network.subscribe(move |result: Result<Arc<Channel>>| {
        let _ = tx.send(result.map(|channel| channel.nonce()));
    });

    // Fired on this thread, before subscribe returned.
    assert_matches!(rx.try_recv(), Ok(Err(Error::ServiceStopped)));
}

#[test]
fn test_close_without_stop() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);

    network.close();
    assert!(network.stopped());
    network.close();
    drop(network);
}

#[test]
fn test_connection_registry() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);

    let first = channel(1);
    let duplicate = channel(1);

    let stored: Result<()> = wait(|done| network.store(Arc::clone(&first), done));
    assert_matches!(stored, Ok(()));
    let stored: Result<()> = wait(|done| network.store(Arc::clone(&duplicate), done));
    assert_matches!(stored, Err(Error::AddressInUse));

    // Removing the rejected duplicate leaves the original in place.
    let removed: Result<()> = wait(|done| network.remove(Arc::clone(&duplicate), done));
    assert_matches!(removed, Ok(()));
    let connected: bool = wait(|done| network.connected(&first.address(), done));
    assert!(connected);
    let count: usize = wait(|done| network.connected_count(done));
    assert_eq!(count, 1);

    let removed: Result<()> = wait(|done| network.remove(Arc::clone(&first), done));
    assert_matches!(removed, Ok(()));
    let connected: bool = wait(|done| network.connected(&first.address(), done));
    assert!(!connected);

    network.close();
    assert!(!first.is_stopped());
}

#[test]
fn test_stop_closes_connections() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);

    let held = channel(3);
    let stored: Result<()> = wait(|done| network.store(Arc::clone(&held), done));
    assert_matches!(stored, Ok(()));

    network.close();
    assert_matches!(held.stop_reason(), Some(Error::ServiceStopped));
}

#[test]
fn test_pending_registry() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);

    let first = Arc::new(Channel::with_nonce(42, peer(1), Direction::Outbound));
    let same_nonce = Arc::new(Channel::with_nonce(42, peer(2), Direction::Outbound));

    let pended: Result<()> = wait(|done| network.pend(Arc::clone(&first), done));
    assert_matches!(pended, Ok(()));
    let pended: Result<()> = wait(|done| network.pend(same_nonce, done));
    assert_matches!(pended, Err(Error::AddressInUse));
    let pending: bool = wait(|done| network.pending(42, done));
    assert!(pending);

    let unpended: Result<()> = wait(|done| network.unpend(channel(9), done));
    assert_matches!(unpended, Ok(()));
    let count: usize = wait(|done| network.pending_count(done));
    assert_eq!(count, 1);

    let unpended: Result<()> = wait(|done| network.unpend(first, done));
    assert_matches!(unpended, Ok(()));
    let pending: bool = wait(|done| network.pending(42, done));
    assert!(!pending);
    network.close();
}

#[test]
fn test_relay_fires_each_subscriber_once() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);

    let (tx, rx) = mpsc::channel();
    for id in 0..3 {
        let tx = tx.clone();
        network.subscribe(move |result: Result<Arc<Channel>>| {
            let _ = tx.send((id, result.map(|channel| channel.nonce())));
        });
    }

    let event = channel(1);
    network.relay(Ok(Arc::clone(&event)));

    let mut fired: Vec<u32> = (0..3)
        .map(|_| {
            let (id, result) = rx.recv_timeout(TIMEOUT).unwrap();
            assert_eq!(result.unwrap(), event.nonce());
            id
        })
        .collect();
    fired.sort_unstable();
    assert_eq!(fired, vec![0, 1, 2]);

    // A later subscription only sees later events.
    let late = tx.clone();
    network.subscribe(move |result: Result<Arc<Channel>>| {
        let _ = late.send((3, result.map(|channel| channel.nonce())));
    });
    network.relay(Err(Error::ChannelTimeout));

    let (id, result) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(id, 3);
    assert_matches!(result, Err(Error::ChannelTimeout));
    assert!(rx.recv_timeout(std::time::Duration::from_millis(100)).is_err());
    network.close();
}

#[test]
fn test_stop_notifies_subscribers() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);

    let (tx, rx) = mpsc::channel();
    network.subscribe(move |result: Result<Arc<Channel>>| {
        let _ = tx.send(result.map(|channel| channel.nonce()));
    });

    network.close();
    assert_matches!(rx.recv_timeout(TIMEOUT).unwrap(), Err(Error::ServiceStopped));
}

#[test]
fn test_hosts_persist_across_restart() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);

    let addresses: Vec<NetworkAddress> = (1..=3).map(|n| NetworkAddress::from(peer(n))).collect();
    let stored: Result<()> = wait(|done| network.store_addresses(addresses.clone(), done));
    assert_matches!(stored, Ok(()));
    let removed: Result<()> = wait(|done| network.remove_address(addresses[0], done));
    assert_matches!(removed, Ok(()));
    let removed: Result<()> = wait(|done| network.remove_address(addresses[0], done));
    assert_matches!(removed, Err(Error::NotFound));

    let saved: Result<()> = wait(|done| network.stop(done));
    assert_matches!(saved, Ok(()));
    assert!(dir.path().join("hosts.json").exists());

    started(&network);
    let count: usize = wait(|done| network.address_count(done));
    assert_eq!(count, 2);
    let fetched: Result<NetworkAddress> = wait(|done| network.fetch_address(done));
    assert!(addresses[1..].contains(&fetched.unwrap()));
    network.close();
}

#[test]
fn test_run_with_sessions_disabled() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);

    let result: Result<()> = wait(|done| network.run(done));
    assert_matches!(result, Ok(()));
    network.close();
}

#[test]
fn test_unreachable_seeds_fail_start() {
    let dir = tempdir().unwrap();
    let mut config = settings(dir.path());
    config.seeds = vec![format!("127.0.0.1:{}", common::free_port())];
    config.channel_germination_seconds = 2;
    let network = P2p::new(config);

    let result: Result<()> = wait(|done| network.start(done));
    assert_matches!(result, Err(Error::OperationFailed));
    assert!(network.stopped());

    // Nothing is left running and the address book was not written.
    let stop: Result<()> = wait(|done| network.stop(done));
    assert_matches!(stop, Err(Error::ServiceStopped));
    assert!(!dir.path().join("hosts.json").exists());
}

#[test]
fn test_panicking_stop_handler_allows_restart() {
    init_tracing();
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);

    network.stop(|_| panic!("stop handler failed"));
    assert!(network.stopped());

    // The address book loads on the same ordered strand the handler ran on.
    started(&network);
    let stored: Result<()> = wait(|done| network.store_address(NetworkAddress::from(peer(1)), done));
    assert_matches!(stored, Ok(()));
    network.close();
}

#[test]
fn test_stop_detached() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);

    network.stop_detached();
    assert!(network.stopped());
    let again: Result<()> = wait(|done| network.stop(done));
    assert_matches!(again, Err(Error::ServiceStopped));

    network.close();
    assert!(dir.path().join("hosts.json").exists());
}

#[test]
fn test_broadcast_while_stopped() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));

    let (tx, rx) = mpsc::channel();
    network.broadcast(
        Bytes::from_static(b"inv"),
        |_, _| unreachable!("no connection to reach"),
        move |result| {
            let _ = tx.send(result);
        },
    );
    assert_matches!(rx.try_recv().unwrap(), Err(Error::ServiceStopped));
}

#[test]
fn test_broadcast_without_connections_completes() {
    let dir = tempdir().unwrap();
    let network = P2p::new(settings(dir.path()));
    started(&network);

    let completed: Result<()> = wait(|done| network.broadcast(Bytes::from_static(b"inv"), |_, _| {}, done));
    assert_matches!(completed, Ok(()));
    network.close();
}
