//! End-to-end relay tests: real sockets, a real worker pool.
//!
//! Each test installs its own listeners on ephemeral ports, runs the pool
//! on background threads, and talks to it with plain blocking sockets.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use rand::RngCore;

use tcpmux::config::RelayTuple;
use tcpmux::pool::{Pool, Registry};

const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Install the tuples, start the pool on background threads, and return the
/// bound listen addresses in tuple order.
fn start_mux(tuples: Vec<RelayTuple>, workers: usize) -> Vec<SocketAddr> {
    let registry = Registry::install(&tuples).expect("install listeners");
    let pool = Pool::build(workers, registry);
    let addrs = pool.listen_addrs().to_vec();
    thread::spawn(move || pool.run().expect("pool run"));
    addrs
}

/// A per-connection echo server on the given address; echoes until EOF,
/// then half-closes its write side.
fn spawn_echo(addr: &str) -> SocketAddr {
    let listener = TcpListener::bind(addr).expect("bind echo server");
    let local = listener.local_addr().unwrap();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(_) => break,
            };
            thread::spawn(move || {
                let mut buf = [0u8; 16 * 1024];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = stream.shutdown(Shutdown::Write);
            });
        }
    });

    local
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect to mux");
    stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
    stream
}

fn tuple(listen: &str, src: Option<&str>, dst: SocketAddr) -> RelayTuple {
    RelayTuple::new(
        listen.parse().unwrap(),
        src.map(|s| format!("{}:0", s).parse().unwrap()),
        dst,
    )
}

#[test]
fn tiny_payload_round_trip() {
    let echo = spawn_echo("127.0.0.1:0");
    let addrs = start_mux(vec![tuple("127.0.0.1:0", None, echo)], 2);

    let mut client = connect(addrs[0]);
    client.write_all(b"ping\n").unwrap();
    client.shutdown(Shutdown::Write).unwrap();

    let mut reply = Vec::new();
    client.read_to_end(&mut reply).unwrap();
    assert_eq!(reply, b"ping\n");
}

#[test]
fn empty_payload_propagates_eof() {
    let echo = spawn_echo("127.0.0.1:0");
    let addrs = start_mux(vec![tuple("127.0.0.1:0", None, echo)], 1);

    let mut client = connect(addrs[0]);
    client.shutdown(Shutdown::Write).unwrap();

    let mut reply = Vec::new();
    client.read_to_end(&mut reply).unwrap();
    assert!(reply.is_empty());
}

#[test]
fn large_payload_intact() {
    let echo = spawn_echo("127.0.0.1:0");
    let addrs = start_mux(vec![tuple("127.0.0.1:0", None, echo)], 3);

    let mut payload = vec![0u8; 4 * 1024 * 1024];
    rand::thread_rng().fill_bytes(&mut payload);

    let client = connect(addrs[0]);
    let mut reader = client.try_clone().unwrap();

    let expected = payload.clone();
    let writer = thread::spawn(move || {
        let mut client = client;
        client.write_all(&payload).unwrap();
        client.shutdown(Shutdown::Write).unwrap();
    });

    let mut reply = Vec::with_capacity(expected.len());
    reader.read_to_end(&mut reply).unwrap();
    writer.join().unwrap();

    assert_eq!(reply.len(), expected.len());
    assert_eq!(reply, expected);
}

/// A server that reads slowly and, at EOF, reports a checksum of what it
/// received: exercises the relay's buffer bound against a fast producer.
#[test]
fn slow_consumer_gets_every_byte() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let dst = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut sum = 0u64;
        let mut count = 0u64;
        let mut buf = [0u8; 8 * 1024];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    count += n as u64;
                    for &b in &buf[..n] {
                        sum = sum.wrapping_add(b as u64);
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
        let mut report = [0u8; 16];
        report[..8].copy_from_slice(&count.to_be_bytes());
        report[8..].copy_from_slice(&sum.to_be_bytes());
        let _ = stream.write_all(&report);
    });

    let addrs = start_mux(vec![tuple("127.0.0.1:0", None, dst)], 2);

    let mut payload = vec![0u8; 2 * 1024 * 1024];
    rand::thread_rng().fill_bytes(&mut payload);
    let expected_count = payload.len() as u64;
    let expected_sum = payload
        .iter()
        .fold(0u64, |acc, &b| acc.wrapping_add(b as u64));

    let mut client = connect(addrs[0]);
    client.set_read_timeout(Some(Duration::from_secs(60))).unwrap();
    client.write_all(&payload).unwrap();
    client.shutdown(Shutdown::Write).unwrap();

    let mut report = [0u8; 16];
    client.read_exact(&mut report).unwrap();
    assert_eq!(u64::from_be_bytes(report[..8].try_into().unwrap()), expected_count);
    assert_eq!(u64::from_be_bytes(report[8..].try_into().unwrap()), expected_sum);
}

#[test]
fn upstream_connect_failure_keeps_listener_alive() {
    // Grab an ephemeral port and release it: connecting there gets refused.
    let dead = TcpListener::bind("127.0.0.1:0").unwrap();
    let dst = dead.local_addr().unwrap();
    drop(dead);

    let addrs = start_mux(vec![tuple("127.0.0.1:0", None, dst)], 2);

    for _ in 0..2 {
        let mut client = connect(addrs[0]);
        let mut reply = Vec::new();
        // The mux closes the client when the upstream connect fails; either
        // a clean EOF or a reset is acceptable.
        let _ = client.read_to_end(&mut reply);
        assert!(reply.is_empty());
    }
}

#[test]
fn two_listeners_one_dst_interleaved() {
    let echo = spawn_echo("127.0.0.1:0");
    let addrs = start_mux(
        vec![
            tuple("127.0.0.1:0", None, echo),
            tuple("127.0.0.1:0", None, echo),
        ],
        2,
    );
    assert_eq!(addrs.len(), 2);

    let mut first = connect(addrs[0]);
    let mut second = connect(addrs[1]);

    first.write_all(b"one").unwrap();
    second.write_all(b"two").unwrap();
    first.shutdown(Shutdown::Write).unwrap();
    second.shutdown(Shutdown::Write).unwrap();

    let mut reply = Vec::new();
    second.read_to_end(&mut reply).unwrap();
    assert_eq!(reply, b"two");

    reply.clear();
    first.read_to_end(&mut reply).unwrap();
    assert_eq!(reply, b"one");
}

#[test]
fn ipv6_bracketed_listen_and_dst() {
    // Environments without a loopback v6 stack skip silently.
    if TcpListener::bind("[::1]:0").is_err() {
        eprintln!("skipping: no IPv6 loopback");
        return;
    }

    let echo = spawn_echo("[::1]:0");
    let addrs = start_mux(vec![tuple("[::1]:0", None, echo)], 2);

    let mut client = connect(addrs[0]);
    client.write_all(b"over six").unwrap();
    client.shutdown(Shutdown::Write).unwrap();

    let mut reply = Vec::new();
    client.read_to_end(&mut reply).unwrap();
    assert_eq!(reply, b"over six");
}

#[test]
fn source_bind_pins_outbound_address() {
    // The server reports the peer address it observed; binding the outbound
    // side to 127.0.0.2 must be visible there.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let dst = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut stream, peer) = listener.accept().unwrap();
        let _ = stream.write_all(peer.ip().to_string().as_bytes());
    });

    let addrs = start_mux(vec![tuple("127.0.0.1:0", Some("127.0.0.2"), dst)], 1);

    let mut client = connect(addrs[0]);
    let mut reply = String::new();
    client.read_to_string(&mut reply).unwrap();
    assert_eq!(reply, "127.0.0.2");
}
