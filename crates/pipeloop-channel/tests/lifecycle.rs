//! Open/close lifecycle over real endpoints: connect, accept, adoption and
//! the synchronous bypass paths.

#![cfg(unix)]

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use pipeloop_channel::{wait, Channel, ChannelConfig, ChannelError, Role};
use pipeloop_io::unix::UnixPipe;
use pipeloop_io::PipeError;

const POLL_CADENCE: Duration = Duration::from_millis(20);

fn make_sock_path(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/plp-{}-{}-{}",
        tag,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir.join("channel.sock")
}

/// Drive one channel until `done` or the budget runs out.
fn drive(channel: &mut Channel, mut done: impl FnMut(&mut Channel) -> bool) {
    let mut signals = Vec::new();
    for _ in 0..10_000 {
        signals.clear();
        let active = channel.advance(&mut signals);
        if done(channel) {
            return;
        }
        if !active {
            wait(&signals, Some(POLL_CADENCE)).unwrap();
        }
    }
    panic!("drive budget exhausted");
}

#[test]
fn accept_and_connect_exchange_bytes() {
    let sock_path = make_sock_path("exchange");

    let client_path = sock_path.clone();
    let client = thread::spawn(move || {
        let mut channel = Channel::new();
        // The server may still be binding; retry briefly.
        let mut attempts = 0;
        while let Err(err) = channel.connect_to_server(&client_path) {
            attempts += 1;
            assert!(attempts < 200, "client could not connect: {err}");
            thread::sleep(Duration::from_millis(10));
        }

        channel.write(b"ping");
        drive(&mut channel, |c| {
            c.bytes_to_send() == 0 && c.bytes_available() >= 4
        });
        assert_eq!(channel.read_all().as_ref(), b"pong");
    });

    let mut server = Channel::new();
    server
        .accept_as_server(&sock_path)
        .expect("accept should succeed");
    assert!(!server.is_closed());
    assert_eq!(server.name(), sock_path.display().to_string());

    drive(&mut server, |c| c.bytes_available() >= 4);
    assert_eq!(server.read_all().as_ref(), b"ping");

    server.write(b"pong");
    drive(&mut server, |c| c.bytes_to_send() == 0);

    client.join().expect("client thread should finish");
    if let Some(parent) = sock_path.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}

#[test]
fn accept_gives_up_after_timeout() {
    let sock_path = make_sock_path("accept-timeout");
    let config = ChannelConfig {
        accept_timeout: Duration::from_millis(50),
        ..ChannelConfig::default()
    };

    let mut server = Channel::with_config(config);
    let err = server.accept_as_server(&sock_path).unwrap_err();
    assert!(matches!(
        err,
        ChannelError::Open(PipeError::AcceptTimeout { .. })
    ));
    assert!(server.is_closed());
    assert!(
        !sock_path.exists(),
        "endpoint path is cleaned up after the failed accept"
    );

    if let Some(parent) = sock_path.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}

#[test]
fn adopted_fds_get_only_the_matching_worker() {
    let (tx, rx) = std::os::unix::net::UnixStream::pair().unwrap();

    let mut writer = Channel::new();
    writer
        .adopt_fd(tx.into(), Role::Write, "child-stdin")
        .unwrap();
    let mut reader = Channel::new();
    reader
        .adopt_fd(rx.into(), Role::Read, "child-stdout")
        .unwrap();

    writer.write(b"one-way");
    let mut signals = Vec::new();
    for _ in 0..10_000 {
        signals.clear();
        let active_w = writer.advance(&mut signals);
        let active_r = reader.advance(&mut signals);
        if reader.bytes_available() >= 7 {
            break;
        }
        if !active_w && !active_r {
            wait(&signals, Some(POLL_CADENCE)).unwrap();
        }
    }
    assert_eq!(reader.read_all().as_ref(), b"one-way");

    // The write-only channel never reads, so nothing accumulates inbound.
    assert_eq!(writer.bytes_available(), 0);
}

#[test]
fn write_immediately_delivers_out_of_band() {
    let (left, right) = UnixPipe::pair().unwrap();
    let mut a = Channel::new();
    a.adopt_io(Box::new(left), Role::Duplex, "a");
    let mut b = Channel::new();
    b.adopt_io(Box::new(right), Role::Duplex, "b");

    a.write_immediately(b"urgent").unwrap();
    assert!(!a.is_closed());

    drive(&mut b, |c| c.bytes_available() >= 6);
    assert_eq!(b.read_all().as_ref(), b"urgent");
}

#[test]
fn write_immediately_times_out_when_peer_stalls() {
    let (left, _right) = UnixPipe::pair().unwrap();
    let config = ChannelConfig {
        immediate_write_timeout: Duration::from_millis(100),
        ..ChannelConfig::default()
    };
    let mut a = Channel::with_config(config);
    a.adopt_io(Box::new(left), Role::Duplex, "stalled");

    // Far more than the kernel will buffer for a peer that never reads.
    let payload = vec![0u8; 8 * 1024 * 1024];
    let err = a.write_immediately(&payload).unwrap_err();
    assert!(matches!(err, ChannelError::ImmediateWriteTimeout { .. }));
    assert!(a.is_closed(), "bypass timeout is fatal to the channel");
}
