//! DatagramTransport against the mock UDP server over loopback.
//!
//! These tests run real timers, so they are kept serial.

use crossbeam_channel::Receiver;
use serial_test::serial;
use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};
use volume_protocol::{
    Command, DatagramConfig, DatagramTransport, ErrorKind, Transport, TransportError,
    TransportEvent,
};
use volume_server::{Channel, Mixer, MockServerHandle, MockUdpServer, SharedMixer};

fn start_server() -> MockServerHandle {
    env_logger::try_init().ok();
    MockUdpServer::new(SharedMixer::new())
        .start_background("127.0.0.1:0")
        .expect("Failed to start mock UDP server")
}

/// Fast timers so liveness and retries play out in well under a second
fn fast_config() -> DatagramConfig {
    DatagramConfig {
        update_interval: Duration::from_millis(100),
        ping_misses_before_disconnect: 2,
        retransmit_delay: Duration::from_millis(30),
        max_retransmits: 2,
        connect_timeout: Duration::from_millis(500),
    }
}

fn transport(config: DatagramConfig) -> (DatagramTransport, Receiver<TransportEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let transport = DatagramTransport::bind(config, tx).expect("Failed to bind UDP socket");
    (transport, rx)
}

/// Drive the transport the way a client loop would, until `deadline` passes
/// or polling reports a dropped link
fn pump_for(transport: &mut DatagramTransport, duration: Duration) -> Result<(), TransportError> {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        transport.poll()?;
        thread::sleep(Duration::from_millis(5));
    }
    Ok(())
}

#[test]
#[serial]
fn test_connect_and_receive_status() {
    let server = start_server();
    server.mixer().lock().set_level("F", 12).unwrap();
    let (mut transport, events) = transport(fast_config());

    transport.connect("127.0.0.1", server.port).unwrap();

    assert!(transport.is_connected());
    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(events[0], TransportEvent::Connected);
    match &events[1] {
        TransportEvent::StatusUpdate(status) => assert_eq!(status.fl_level, 12),
        other => panic!("Expected status update, got {:?}", other),
    }
    assert_eq!(server.received(), vec!["1 status"]);
}

#[test]
#[serial]
fn test_acked_command_is_sent_once() {
    let server = start_server();
    let config = DatagramConfig {
        update_interval: Duration::from_secs(60),
        ..fast_config()
    };
    let (mut transport, _events) = transport(config);
    transport.connect("127.0.0.1", server.port).unwrap();

    transport.send_command(&Command::set("R", 40)).unwrap();
    pump_for(&mut transport, Duration::from_millis(300)).unwrap();

    assert_eq!(server.mixer().lock().level(Channel::Rr), 40);
    assert_eq!(transport.sequence().largest_acked(), 1);
    let sends = server.received().iter().filter(|l| *l == "1 set R 40").count();
    assert_eq!(sends, 1);
}

#[test]
#[serial]
fn test_unacked_command_is_retransmitted_then_abandoned() {
    let server = start_server();
    server.set_drop_acks(true);
    let config = DatagramConfig {
        update_interval: Duration::from_secs(60),
        ..fast_config()
    };
    let (mut transport, events) = transport(config);
    transport.connect("127.0.0.1", server.port).unwrap();
    events.try_iter().count();

    transport.send_command(&Command::mute(true)).unwrap();
    pump_for(&mut transport, Duration::from_millis(500)).unwrap();

    // Original send plus max_retransmits + 1 retries, no error reported
    let sends = server.received().iter().filter(|l| *l == "1 mute 1").count();
    assert_eq!(sends, 4);
    assert!(events.try_iter().next().is_none());
    assert!(transport.is_connected());
}

#[test]
#[serial]
fn test_newer_command_supersedes_retries() {
    let server = start_server();
    server.set_drop_acks(true);
    let config = DatagramConfig {
        update_interval: Duration::from_secs(60),
        ..fast_config()
    };
    let (mut transport, _events) = transport(config);
    transport.connect("127.0.0.1", server.port).unwrap();

    transport.send_command(&Command::set_master(10)).unwrap();
    transport.send_command(&Command::set_master(11)).unwrap();
    pump_for(&mut transport, Duration::from_millis(500)).unwrap();

    let received = server.received();
    assert_eq!(received.iter().filter(|l| *l == "1 setmaster 10").count(), 1);
    assert_eq!(received.iter().filter(|l| *l == "2 setmaster 11").count(), 4);
    assert_eq!(server.mixer().lock().master(), 11);
}

#[test]
#[serial]
fn test_silent_server_drops_the_link() {
    let server = start_server();
    let (mut transport, events) = transport(fast_config());
    transport.connect("127.0.0.1", server.port).unwrap();
    events.try_iter().count();

    // Answered keepalives keep the link up
    pump_for(&mut transport, Duration::from_millis(350)).unwrap();
    assert!(transport.is_connected());

    server.set_silent(true);
    let err = pump_for(&mut transport, Duration::from_secs(2)).unwrap_err();

    assert!(matches!(err, TransportError::ConnectionLost));
    assert!(!transport.is_connected());
    let events: Vec<_> = events.try_iter().collect();
    assert!(events.contains(&TransportEvent::Disconnected));
    assert!(events.iter().any(|e| matches!(
        e,
        TransportEvent::Error {
            kind: ErrorKind::ConnectionLost,
            ..
        }
    )));
}

#[test]
#[serial]
fn test_connect_to_silent_server_times_out() {
    let server = start_server();
    server.set_silent(true);
    let (mut transport, _events) = transport(DatagramConfig {
        connect_timeout: Duration::from_millis(100),
        ..fast_config()
    });

    let err = transport.connect("127.0.0.1", server.port).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(!transport.is_connected());
    assert_eq!(transport.peer(), None);
}

#[test]
#[serial]
fn test_late_reply_does_not_answer_next_connect() {
    env_logger::try_init().ok();
    let responder = UdpSocket::bind("127.0.0.1:0").unwrap();
    responder
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let port = responder.local_addr().unwrap().port();

    // Answers the first probe after the client gave up, then goes away
    let late_server = thread::spawn(move || {
        let mut buf = [0u8; 64];
        let (_, from) = responder.recv_from(&mut buf).unwrap();
        thread::sleep(Duration::from_millis(150));
        let reply = Mixer::new().status().to_wire();
        responder.send_to(format!("{}\0", reply).as_bytes(), from).unwrap();
    });

    let (mut transport, _events) = transport(DatagramConfig {
        connect_timeout: Duration::from_millis(50),
        ..fast_config()
    });

    let first = transport.connect("127.0.0.1", port).unwrap_err();
    assert_eq!(first.kind(), ErrorKind::Timeout);
    late_server.join().unwrap();

    // Only the stale reply is queued now
    assert!(transport.connect("127.0.0.1", port).is_err());
    assert!(!transport.is_connected());
}

#[test]
#[serial]
fn test_server_error_reply_is_reported() {
    let server = start_server();
    let (mut transport, events) = transport(fast_config());
    transport.connect("127.0.0.1", server.port).unwrap();
    events.try_iter().count();

    transport.send_command(&Command::set("NOPE", 3)).unwrap();
    pump_for(&mut transport, Duration::from_millis(50)).unwrap();

    let errors: Vec<_> = events
        .try_iter()
        .filter_map(|e| match e {
            TransportEvent::Error { kind, message } => Some((kind, message)),
            _ => None,
        })
        .collect();
    assert!(!errors.is_empty());
    assert_eq!(errors[0].0, ErrorKind::Protocol);
    assert!(errors[0].1.contains("unknown channel NOPE"), "{:?}", errors);
}
