use std::collections::VecDeque;
use std::time::Duration;

use proptest::prelude::*;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::message::{MessageBuf, MessageBuilder, MessageKind, ReceivedMessage};
use crate::sasl::Auth;
use crate::signature::parse;
use crate::Value;

use super::{Connection, LineReader, RecvQueue, SERIAL_WRAP};

fn sample_messages() -> Vec<MessageBuf> {
    let string = parse("s").unwrap();
    let ints = parse("ai").unwrap();

    let mut messages = vec![
        MessageBuilder::method_call("/com/example/A", "First")
            .build(&[], &[])
            .unwrap(),
        MessageBuilder::method_call("/com/example/B", "Second")
            .build(&string, &[Value::Str("payload".into())])
            .unwrap(),
        MessageBuilder::signal("/com/example/C", "com.example.Iface", "Third")
            .build(
                &ints,
                &[Value::Array(vec![Value::Int32(1), Value::Int32(-2)])],
            )
            .unwrap(),
    ];

    for (n, message) in messages.iter_mut().enumerate() {
        message.stamp_serial(n as u32 + 1);
    }

    messages
}

#[test]
fn reassembly_at_every_single_split() {
    let messages = sample_messages();
    let messages = &messages[..2];
    let stream: Vec<u8> = messages
        .iter()
        .flat_map(|m| m.as_bytes().iter().copied())
        .collect();

    for cut in 0..=stream.len() {
        let mut queue = RecvQueue::new();
        let mut out = Vec::new();
        queue.feed(&stream[..cut], &mut out).unwrap();
        queue.feed(&stream[cut..], &mut out).unwrap();

        assert_eq!(out.len(), 2, "split at {cut}");

        for (received, sent) in out.iter().zip(messages) {
            assert_eq!(received.as_bytes(), sent.as_bytes(), "split at {cut}");
        }

        assert!(queue.is_drained(), "split at {cut}");
    }
}

#[test]
fn serial_wrap() {
    let mut conn = raw_connection(duplex(64).0);

    assert_eq!(conn.next_serial(), 1);
    assert_eq!(conn.next_serial(), 2);

    conn.serial = SERIAL_WRAP;
    assert_eq!(conn.next_serial(), SERIAL_WRAP);
    // Past the wrap point the counter restarts at 1, never 0.
    assert_eq!(conn.next_serial(), 1);
}

proptest! {
    #[test]
    fn prop_reassembly_is_chunking_independent(cuts in prop::collection::vec(0usize..4096, 0..8)) {
        let messages = sample_messages();
        let stream: Vec<u8> = messages
            .iter()
            .flat_map(|m| m.as_bytes().iter().copied())
            .collect();

        let mut points: Vec<usize> = cuts.into_iter().map(|c| c % (stream.len() + 1)).collect();
        points.sort_unstable();
        points.dedup();

        let mut queue = RecvQueue::new();
        let mut out = Vec::new();
        let mut prev = 0;

        for point in points {
            queue.feed(&stream[prev..point], &mut out).unwrap();
            prev = point;
        }

        queue.feed(&stream[prev..], &mut out).unwrap();

        prop_assert_eq!(out.len(), messages.len());

        for (received, sent) in out.iter().zip(&messages) {
            prop_assert_eq!(received.as_bytes(), sent.as_bytes());
        }

        prop_assert!(queue.is_drained());
    }
}

#[test]
fn reassembly_rejects_garbage() {
    let mut queue = RecvQueue::new();
    let mut out = Vec::new();

    let garbage = [b'x'; 16];
    assert!(queue.feed(&garbage, &mut out).is_err());
}

fn raw_connection<S>(stream: S) -> Connection<S> {
    let (commands_tx, commands) = tokio::sync::mpsc::channel(8);

    Connection {
        stream,
        state: super::ConnectionState::Ready,
        serial: 1,
        pending: Default::default(),
        recv: RecvQueue::new(),
        inbox: VecDeque::new(),
        commands,
        commands_tx,
        unique_name: None,
    }
}

/// The scripted far end of a duplex connection.
struct Peer {
    stream: DuplexStream,
    queue: RecvQueue,
    inbox: VecDeque<ReceivedMessage>,
}

impl Peer {
    /// Accept the handshake: NUL byte, one AUTH line answered per
    /// `responses`, then the BEGIN line.
    async fn accept(mut stream: DuplexStream, responses: &[&[u8]]) -> Self {
        let mut nul = [0u8; 1];
        stream.read_exact(&mut nul).await.unwrap();
        assert_eq!(nul[0], 0);

        let mut lines = LineReader::new();

        for response in responses {
            let line = lines.next_line(&mut stream).await.unwrap();
            assert!(line.starts_with(b"AUTH "), "unexpected line {line:?}");
            stream.write_all(response).await.unwrap();
        }

        let begin = lines.next_line(&mut stream).await.unwrap();
        assert_eq!(begin, b"BEGIN");

        let mut queue = RecvQueue::new();
        let mut out = Vec::new();
        queue.feed(&lines.into_residue(), &mut out).unwrap();

        Self {
            stream,
            queue,
            inbox: out.into(),
        }
    }

    async fn next_message(&mut self) -> ReceivedMessage {
        loop {
            if let Some(message) = self.inbox.pop_front() {
                return message;
            }

            let mut chunk = [0u8; 1024];
            let n = self.stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client hung up");

            let mut out = Vec::new();
            self.queue.feed(&chunk[..n], &mut out).unwrap();
            self.inbox.extend(out);
        }
    }

    async fn write(&mut self, message: &MessageBuf) {
        self.stream.write_all(message.as_bytes()).await.unwrap();
    }

    /// Answer the Hello call with the given unique name.
    async fn answer_hello(&mut self, name: &str) {
        let hello = self.next_message().await;
        let reader = hello.reader().unwrap();

        assert_eq!(reader.kind(), MessageKind::MethodCall);
        assert_eq!(reader.member().unwrap().as_deref(), Some("Hello"));
        assert_eq!(
            reader.path().unwrap().as_deref(),
            Some("/org/freedesktop/DBus")
        );
        assert_eq!(
            reader.destination().unwrap().as_deref(),
            Some("org.freedesktop.DBus")
        );
        assert_eq!(reader.body_length(), 0);
        assert_ne!(reader.serial(), 0);

        let serial = reader.serial();
        let string = parse("s").unwrap();

        let mut reply = MessageBuilder::method_return(serial)
            .build(&string, &[Value::Str(name.into())])
            .unwrap();
        reply.stamp_serial(1);
        self.write(&reply).await;
    }
}

#[tokio::test]
async fn connect_and_call() {
    let (client, server) = duplex(4096);

    let peer = tokio::spawn(async move {
        let mut peer = Peer::accept(server, &[b"OK 746573742d67756964\r\n"]).await;
        peer.answer_hello(":1.7").await;

        let call = peer.next_message().await;
        let reader = call.reader().unwrap();
        assert_eq!(reader.member().unwrap().as_deref(), Some("Frob"));
        let serial = reader.serial();

        // An unmatched reply first; the client must drop it silently.
        let mut stray = MessageBuilder::method_return(0x7fff_0000)
            .build(&[], &[])
            .unwrap();
        stray.stamp_serial(2);
        peer.write(&stray).await;

        let string = parse("s").unwrap();
        let mut reply = MessageBuilder::method_return(serial)
            .build(&string, &[Value::Str("frobbed".into())])
            .unwrap();
        reply.stamp_serial(3);
        peer.write(&reply).await;

        // Keep the socket open until the client is done.
        let mut park = [0u8; 1];
        let _ = peer.stream.read(&mut park).await;
    });

    let conn = Connection::connect(client, &[Auth::external_from_u32(1000)])
        .await
        .unwrap();
    assert_eq!(conn.unique_name(), Some(":1.7"));

    let handle = conn.handle();
    let driver = tokio::spawn(conn.run());

    let call = MessageBuilder::method_call("/com/example/Object", "Frob")
        .with_destination("com.example.Service")
        .build(&[], &[])
        .unwrap();

    let reply = handle.call(call).await.unwrap();
    let reader = reply.reader().unwrap();
    assert_eq!(reader.kind(), MessageKind::MethodReturn);
    assert_eq!(reader.body().get_string().unwrap(), "frobbed");

    driver.abort();
    peer.abort();
}

#[tokio::test]
async fn error_reply_resolves_the_waiter() {
    let (client, server) = duplex(4096);

    let peer = tokio::spawn(async move {
        let mut peer = Peer::accept(server, &[b"OK 00\r\n"]).await;
        peer.answer_hello(":1.8").await;

        let call = peer.next_message().await;
        let serial = call.reader().unwrap().serial();

        let string = parse("s").unwrap();
        let mut reply = MessageBuilder::error("com.example.Error.Failed", serial)
            .build(&string, &[Value::Str("nope".into())])
            .unwrap();
        reply.stamp_serial(2);
        peer.write(&reply).await;

        let mut park = [0u8; 1];
        let _ = peer.stream.read(&mut park).await;
    });

    let conn = Connection::connect(client, &[Auth::external_from_u32(0)])
        .await
        .unwrap();
    let handle = conn.handle();
    let driver = tokio::spawn(conn.run());

    let call = MessageBuilder::method_call("/com/example/Object", "Frob")
        .build(&[], &[])
        .unwrap();

    let error = handle.call(call).await.unwrap_err();
    assert_eq!(error.error_name(), Some("com.example.Error.Failed"));

    driver.abort();
    peer.abort();
}

#[tokio::test]
async fn auth_falls_back_to_the_next_method() {
    let (client, server) = duplex(4096);

    let peer = tokio::spawn(async move {
        let mut peer = Peer::accept(
            server,
            &[b"REJECTED ANONYMOUS\r\n", b"OK 746573742d67756964\r\n"],
        )
        .await;
        peer.answer_hello(":1.9").await;

        let mut park = [0u8; 1];
        let _ = peer.stream.read(&mut park).await;
    });

    let methods = [Auth::external_from_u32(1000), Auth::Anonymous];
    let conn = Connection::connect(client, &methods).await.unwrap();
    assert_eq!(conn.unique_name(), Some(":1.9"));

    peer.abort();
}

#[tokio::test]
async fn auth_exhaustion_fails_the_connect() {
    let (client, mut server) = duplex(4096);

    let peer = tokio::spawn(async move {
        let mut nul = [0u8; 1];
        server.read_exact(&mut nul).await.unwrap();

        let mut lines = LineReader::new();

        for _ in 0..2 {
            lines.next_line(&mut server).await.unwrap();
            server.write_all(b"REJECTED \r\n").await.unwrap();
        }

        let mut park = [0u8; 1];
        let _ = server.read(&mut park).await;
    });

    let methods = [Auth::external_from_u32(1000), Auth::Anonymous];
    let error = Connection::connect(client, &methods).await.unwrap_err();
    assert!(error.to_string().contains("No usable auth method"));

    peer.abort();
}

#[tokio::test(start_paused = true)]
async fn call_timeout_evicts_the_waiter() {
    let (client, server) = duplex(4096);

    let peer = tokio::spawn(async move {
        let mut peer = Peer::accept(server, &[b"OK 00\r\n"]).await;
        peer.answer_hello(":1.10").await;

        // Swallow the call and never answer.
        let _ = peer.next_message().await;

        let mut park = [0u8; 1];
        let _ = peer.stream.read(&mut park).await;
    });

    let conn = Connection::connect(client, &[Auth::external_from_u32(0)])
        .await
        .unwrap();
    let handle = conn.handle();
    let driver = tokio::spawn(conn.run());

    let call = MessageBuilder::method_call("/com/example/Object", "Slow")
        .build(&[], &[])
        .unwrap();

    let error = handle
        .call_with_timeout(call, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(error.is_timeout());

    driver.abort();
    peer.abort();
}

#[tokio::test]
async fn close_fails_pending_calls() {
    let (client, server) = duplex(4096);

    let peer = tokio::spawn(async move {
        let mut peer = Peer::accept(server, &[b"OK 00\r\n"]).await;
        peer.answer_hello(":1.11").await;

        // Take the call off the wire, then hang up.
        let _ = peer.next_message().await;
    });

    let conn = Connection::connect(client, &[Auth::external_from_u32(0)])
        .await
        .unwrap();
    let handle = conn.handle();
    let driver = tokio::spawn(conn.run());

    let call = MessageBuilder::method_call("/com/example/Object", "Frob")
        .build(&[], &[])
        .unwrap();

    let error = handle.call(call).await.unwrap_err();
    assert!(error.is_closed());

    let result = driver.await.unwrap();
    assert!(result.is_err());

    peer.abort();
}
