use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use marlinkv::protocol::{encode_request, Value, MAX_FRAME_SIZE};
use marlinkv::{Config, Server};

/// A server on an ephemeral port, stopped when the fixture drops.
struct TestServer {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    fn start() -> Self {
        let config = Config {
            port: 0,
            poll_timeout_ms: 20,
            ..Default::default()
        };
        let server = Server::new(config).expect("bind test server");
        let addr = server.local_addr().expect("local addr");
        let shutdown = server.shutdown_handle();
        let handle = thread::spawn(move || {
            server.run().expect("server run");
        });
        Self {
            addr,
            shutdown,
            handle: Some(handle),
        }
    }

    fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).expect("connect to test server")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn request_frame(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_request(parts, &mut out).expect("encode request");
    out
}

fn send(stream: &mut TcpStream, parts: &[&[u8]]) {
    stream.write_all(&request_frame(parts)).expect("send request");
}

fn recv(stream: &mut TcpStream) -> Value {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).expect("read response prefix");
    let len = u32::from_le_bytes(prefix) as usize;
    assert!(4 + len <= MAX_FRAME_SIZE, "oversized response frame");
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).expect("read response payload");
    let (value, consumed) = Value::read(&payload).expect("decode response");
    assert_eq!(consumed, payload.len(), "trailing bytes in response frame");
    value
}

fn round_trip(stream: &mut TcpStream, parts: &[&[u8]]) -> Value {
    send(stream, parts);
    recv(stream)
}

#[test]
fn set_get_del_over_the_wire() {
    let server = TestServer::start();
    let mut client = server.connect();

    assert_eq!(round_trip(&mut client, &[b"SET", b"k", b"v"]), Value::Nil);
    assert_eq!(
        round_trip(&mut client, &[b"GET", b"k"]),
        Value::Str(Bytes::from_static(b"v"))
    );
    assert_eq!(round_trip(&mut client, &[b"GET", b"missing"]), Value::Nil);
    assert_eq!(round_trip(&mut client, &[b"DEL", b"k"]), Value::Int(1));
    assert_eq!(round_trip(&mut client, &[b"DEL", b"k"]), Value::Int(0));
}

#[test]
fn keys_lists_every_key() {
    let server = TestServer::start();
    let mut client = server.connect();

    round_trip(&mut client, &[b"SET", b"a", b"1"]);
    round_trip(&mut client, &[b"SET", b"b", b"2"]);
    round_trip(&mut client, &[b"SET", b"c", b"3"]);

    match round_trip(&mut client, &[b"KEYS"]) {
        Value::Arr(items) => {
            let mut keys: Vec<Bytes> = items
                .into_iter()
                .map(|v| match v {
                    Value::Str(s) => s,
                    other => panic!("expected a string key, got {other:?}"),
                })
                .collect();
            keys.sort();
            assert_eq!(
                keys,
                vec![
                    Bytes::from_static(b"a"),
                    Bytes::from_static(b"b"),
                    Bytes::from_static(b"c")
                ]
            );
        }
        other => panic!("expected an array, got {other:?}"),
    }
}

#[test]
fn pipelined_requests_are_answered_in_order() {
    let server = TestServer::start();
    let mut client = server.connect();

    // All three requests leave in one write, before any response is read.
    let mut batch = Vec::new();
    batch.extend_from_slice(&request_frame(&[b"SET", b"p", b"1"]));
    batch.extend_from_slice(&request_frame(&[b"GET", b"p"]));
    batch.extend_from_slice(&request_frame(&[b"DEL", b"p"]));
    client.write_all(&batch).expect("send pipeline");

    assert_eq!(recv(&mut client), Value::Nil);
    assert_eq!(recv(&mut client), Value::Str(Bytes::from_static(b"1")));
    assert_eq!(recv(&mut client), Value::Int(1));
}

#[test]
fn sorted_set_commands_over_the_wire() {
    let server = TestServer::start();
    let mut client = server.connect();

    assert_eq!(
        round_trip(&mut client, &[b"ZADD", b"board", b"10", b"alice"]),
        Value::Int(1)
    );
    assert_eq!(
        round_trip(&mut client, &[b"ZADD", b"board", b"5", b"bob"]),
        Value::Int(1)
    );
    assert_eq!(
        round_trip(&mut client, &[b"ZADD", b"board", b"7", b"alice"]),
        Value::Int(0)
    );
    assert_eq!(
        round_trip(&mut client, &[b"ZSCORE", b"board", b"alice"]),
        Value::Str(Bytes::from_static(b"7"))
    );
    assert_eq!(
        round_trip(
            &mut client,
            &[b"ZQUERY", b"board", b"0", b"", b"0", b"10"]
        ),
        Value::Arr(vec![
            Value::Str(Bytes::from_static(b"bob")),
            Value::Str(Bytes::from_static(b"5")),
            Value::Str(Bytes::from_static(b"alice")),
            Value::Str(Bytes::from_static(b"7")),
        ])
    );
    assert_eq!(
        round_trip(&mut client, &[b"ZREM", b"board", b"bob"]),
        Value::Int(1)
    );
}

#[test]
fn unknown_commands_do_not_close_the_connection() {
    let server = TestServer::start();
    let mut client = server.connect();

    match round_trip(&mut client, &[b"NOSUCH"]) {
        Value::Err { code, .. } => assert_eq!(code, 0),
        other => panic!("expected an error, got {other:?}"),
    }
    // Same connection still serves requests.
    assert_eq!(round_trip(&mut client, &[b"GET", b"x"]), Value::Nil);
}

#[test]
fn oversized_frame_closes_only_the_offending_connection() {
    let server = TestServer::start();
    let mut bad = server.connect();
    let mut good = server.connect();

    round_trip(&mut good, &[b"SET", b"shared", b"ok"]);

    // Header declares a frame beyond the limit; the server closes without
    // replying.
    bad.write_all(&8192u32.to_le_bytes()).expect("send bad header");
    let mut buf = [0u8; 1];
    match bad.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("expected EOF, got {n} bytes"),
        Err(e) => assert!(
            matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof),
            "unexpected error: {e}"
        ),
    }

    // The other client's session is untouched.
    assert_eq!(
        round_trip(&mut good, &[b"GET", b"shared"]),
        Value::Str(Bytes::from_static(b"ok"))
    );
}

#[test]
fn store_survives_enough_keys_to_force_migrations() {
    let server = TestServer::start();
    let mut client = server.connect();

    for i in 0..100u32 {
        let key = format!("bulk-{i}");
        assert_eq!(
            round_trip(&mut client, &[b"SET", key.as_bytes(), b"x"]),
            Value::Nil
        );
    }
    for i in 0..100u32 {
        let key = format!("bulk-{i}");
        assert_eq!(
            round_trip(&mut client, &[b"GET", key.as_bytes()]),
            Value::Str(Bytes::from_static(b"x")),
            "lost {key}"
        );
    }
    match round_trip(&mut client, &[b"KEYS"]) {
        Value::Arr(items) => assert_eq!(items.len(), 100),
        other => panic!("expected an array, got {other:?}"),
    }
}
