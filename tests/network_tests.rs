/// Network namespace configurator: the caller's namespace is always restored
use nsbox::namespace::thread_netns_id;
use nsbox::network::{configure_network, link_exists};
use nsbox::types::{NetworkParams, SetupError};
use serial_test::serial;
use std::net::Ipv4Addr;

fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

fn params(local: &str, peer: &str) -> NetworkParams {
    NetworkParams {
        local_name: local.to_string(),
        peer_name: peer.to_string(),
        address: Ipv4Addr::new(192, 168, 77, 2),
        gateway: Ipv4Addr::new(192, 168, 77, 1),
    }
}

#[test]
fn test_failure_without_privilege_keeps_namespace() {
    if is_root() {
        return;
    }
    let before = thread_netns_id().unwrap();

    let err = configure_network(&params("nsbtl0", "nsbtp0")).unwrap_err();
    assert!(matches!(
        err,
        SetupError::Namespace(_) | SetupError::NameCollision(_)
    ));
    assert_eq!(thread_netns_id().unwrap(), before);
}

#[test]
fn test_invalid_names_keep_namespace() {
    let before = thread_netns_id().unwrap();

    for (local, peer) in [("", "nsbtp1"), ("nsbtl1", "bad/name"), ("same0", "same0")] {
        let err = configure_network(&params(local, peer)).unwrap_err();
        assert!(matches!(err, SetupError::InvalidName { .. }), "{}/{}: {}", local, peer, err);
        assert_eq!(thread_netns_id().unwrap(), before);
    }
}

/// Each configuration runs on a dedicated thread so the test thread's
/// namespace can be compared against the worker's before and after.
#[test]
#[ignore] // Requires root and iproute2
#[serial]
fn test_configure_restores_namespace_and_moves_peer() {
    let worker = std::thread::spawn(|| {
        let before = thread_netns_id().unwrap();
        let handle = configure_network(&params("nsbtl2", "nsbtp2")).unwrap();
        let after = thread_netns_id().unwrap();

        let peer_here = link_exists("nsbtp2");
        let local_here = link_exists("nsbtl2");
        drop(handle);
        (before, after, peer_here, local_here)
    });

    let (before, after, peer_here, local_here) = worker.join().unwrap();
    assert_eq!(before, after);
    assert!(peer_here, "peer end should be in the caller's namespace");
    assert!(!local_here, "local end should stay in the new namespace");
}

#[test]
#[ignore] // Requires root and iproute2
#[serial]
fn test_second_identical_configuration_collides() {
    let worker = std::thread::spawn(|| {
        let before = thread_netns_id().unwrap();
        let first = configure_network(&params("nsbtl3", "nsbtp3")).unwrap();
        let second = configure_network(&params("nsbtl3", "nsbtp3"));
        let after = thread_netns_id().unwrap();
        drop(first);
        (before, after, second.map(|_| ()))
    });

    let (before, after, second) = worker.join().unwrap();
    assert_eq!(before, after);
    match second {
        Err(SetupError::NameCollision(name)) => assert_eq!(name, "nsbtp3"),
        other => panic!("expected collision, got {:?}", other),
    }
}

#[test]
#[ignore] // Requires root and iproute2
#[serial]
fn test_failure_inside_new_namespace_still_restores() {
    let worker = std::thread::spawn(|| {
        let before = thread_netns_id().unwrap();
        let mut unreachable = params("nsbtl4", "nsbtp4");
        unreachable.address = Ipv4Addr::new(10, 9, 9, 2);
        unreachable.gateway = Ipv4Addr::new(172, 31, 0, 1);

        let result = configure_network(&unreachable).map(|_| ());
        let after = thread_netns_id().unwrap();
        (before, after, result)
    });

    let (before, after, result) = worker.join().unwrap();
    assert_eq!(before, after);
    match result {
        Err(SetupError::Command { command, .. }) => assert!(command.starts_with("route add default")),
        other => panic!("expected route failure, got {:?}", other),
    }
}

/// `lo` always exists in a fresh namespace, so link creation itself collides
#[test]
#[ignore] // Requires root and iproute2
#[serial]
fn test_kernel_collision_inside_new_namespace() {
    let worker = std::thread::spawn(|| {
        let before = thread_netns_id().unwrap();
        let result = configure_network(&params("lo", "nsbtp5")).map(|_| ());
        let after = thread_netns_id().unwrap();
        (before, after, result)
    });

    let (before, after, result) = worker.join().unwrap();
    assert_eq!(before, after);
    match result {
        Err(SetupError::NameCollision(name)) => assert_eq!(name, "lo"),
        other => panic!("expected collision on lo, got {:?}", other),
    }
    assert!(!link_exists("nsbtp5"));
}
