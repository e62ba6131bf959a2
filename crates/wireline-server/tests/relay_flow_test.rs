//! End-to-end relay tests over real TCP connections.
//!
//! Each test binds a server on an ephemeral port, connects plain TCP
//! clients speaking the JSON-lines protocol, and asserts on the frames that
//! actually cross the wire.

use std::time::Duration;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::{sleep, timeout},
};
use wireline_proto::{ErrorCode, ServerFrame};
use wireline_server::{Server, ServerRuntimeConfig, ShutdownHandle};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Start a server on an ephemeral port; returns its address, a shutdown
/// handle, and the join handle of the running server task.
async fn start_server() -> (std::net::SocketAddr, ShutdownHandle, tokio::task::JoinHandle<()>) {
    let config = ServerRuntimeConfig { bind_address: "127.0.0.1:0".to_owned() };
    let server = Server::bind(config).await.expect("bind");
    let addr = server.local_addr().expect("local addr");
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(async move {
        server.run().await.expect("server run");
    });
    (addr, shutdown, task)
}

struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read_half, writer) = stream.into_split();
        Self { lines: BufReader::new(read_half).lines(), writer }
    }

    async fn connect_as(addr: std::net::SocketAddr, id: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.send(&format!(r#"{{"type":"register","id":"{id}"}}"#)).await;
        assert_eq!(client.recv().await, ServerFrame::Registered { id: id.to_owned() });
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.expect("write");
        self.writer.write_all(b"\n").await.expect("write newline");
    }

    async fn recv(&mut self) -> ServerFrame {
        let line = timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for frame")
            .expect("read")
            .expect("connection closed while waiting for frame");
        ServerFrame::decode(&line).expect("decode server frame")
    }

    /// Wait for the server to close this connection.
    async fn recv_eof(&mut self) {
        let eof = timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for close");
        match eof {
            Ok(None) | Err(_) => {},
            Ok(Some(line)) => panic!("expected EOF, got line {line:?}"),
        }
    }
}

#[tokio::test]
async fn direct_send_and_nodeliver() {
    let (addr, shutdown, _task) = start_server().await;

    let mut alice = TestClient::connect_as(addr, "alice").await;
    let mut bob = TestClient::connect_as(addr, "bob").await;

    alice.send(r#"{"type":"send","to":"bob","payload":"hello"}"#).await;
    assert_eq!(alice.recv().await, ServerFrame::Sent { to: "bob".to_owned() });
    assert_eq!(bob.recv().await, ServerFrame::Deliver {
        from: "alice".to_owned(),
        payload: "hello".to_owned()
    });

    alice.send(r#"{"type":"send","to":"ghost","payload":"hello"}"#).await;
    assert_eq!(alice.recv().await, ServerFrame::Nodeliver { to: "ghost".to_owned() });

    shutdown.shutdown();
}

#[tokio::test]
async fn chat_negotiation_and_peer_disconnect() {
    let (addr, shutdown, _task) = start_server().await;

    let mut alice = TestClient::connect_as(addr, "alice").await;
    let mut bob = TestClient::connect_as(addr, "bob").await;

    alice.send(r#"{"type":"chat_request","to":"bob"}"#).await;
    assert_eq!(bob.recv().await, ServerFrame::ChatRequest { from: "alice".to_owned() });

    bob.send(r#"{"type":"chat_accept"}"#).await;
    assert_eq!(alice.recv().await, ServerFrame::ChatAccept { from: "bob".to_owned() });
    assert_eq!(bob.recv().await, ServerFrame::ChatAccept { from: "alice".to_owned() });

    alice.send(r#"{"type":"chat_message","to":"bob","payload":"hi"}"#).await;
    assert_eq!(bob.recv().await, ServerFrame::ChatMessage {
        from: "alice".to_owned(),
        payload: "hi".to_owned()
    });

    bob.send(r#"{"type":"chat_message","to":"alice","payload":"yo"}"#).await;
    assert_eq!(alice.recv().await, ServerFrame::ChatMessage {
        from: "bob".to_owned(),
        payload: "yo".to_owned()
    });

    // Alice drops the connection; bob is told and the session is gone.
    drop(alice);
    assert_eq!(bob.recv().await, ServerFrame::Info {
        message: "chat ended with alice".to_owned()
    });

    bob.send(r#"{"type":"chat_message","to":"alice","payload":"?"}"#).await;
    assert_eq!(bob.recv().await, ServerFrame::Error { error: ErrorCode::NotInChat });

    shutdown.shutdown();
}

#[tokio::test]
async fn reregistration_evicts_previous_connection() {
    let (addr, shutdown, _task) = start_server().await;

    let mut first = TestClient::connect_as(addr, "alice").await;
    let mut second = TestClient::connect_as(addr, "alice").await;

    assert_eq!(first.recv().await, ServerFrame::Info {
        message: "signed_in_elsewhere".to_owned()
    });
    first.recv_eof().await;

    // The new connection is the sole holder of the identifier.
    let mut bob = TestClient::connect_as(addr, "bob").await;
    bob.send(r#"{"type":"send","to":"alice","payload":"ping"}"#).await;
    assert_eq!(bob.recv().await, ServerFrame::Sent { to: "alice".to_owned() });
    assert_eq!(second.recv().await, ServerFrame::Deliver {
        from: "bob".to_owned(),
        payload: "ping".to_owned()
    });

    shutdown.shutdown();
}

#[tokio::test]
async fn malformed_line_keeps_connection_open() {
    let (addr, shutdown, _task) = start_server().await;

    let mut alice = TestClient::connect_as(addr, "alice").await;

    alice.send("this is not json").await;
    assert_eq!(alice.recv().await, ServerFrame::Error { error: ErrorCode::InvalidJson });

    alice.send(r#"{"type":"ping"}"#).await;
    assert_eq!(alice.recv().await, ServerFrame::Pong);

    shutdown.shutdown();
}

#[tokio::test]
async fn unregistered_first_frame_closes_connection() {
    let (addr, shutdown, _task) = start_server().await;

    let mut client = TestClient::connect(addr).await;
    client.send(r#"{"type":"ping"}"#).await;
    assert_eq!(client.recv().await, ServerFrame::Error {
        error: ErrorCode::MustRegisterFirst
    });
    client.recv_eof().await;

    shutdown.shutdown();
}

#[tokio::test]
async fn wire_frames_are_single_json_objects() {
    let (addr, shutdown, _task) = start_server().await;

    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read_half, mut writer) = stream.into_split();
    writer
        .write_all(b"{\"type\":\"register\",\"id\":\"alice\"}\n")
        .await
        .expect("write");

    let mut lines = BufReader::new(read_half).lines();
    let line = timeout(RECV_TIMEOUT, lines.next_line())
        .await
        .expect("timed out")
        .expect("read")
        .expect("closed");
    let value: serde_json::Value = serde_json::from_str(&line).expect("reply is JSON");
    assert_eq!(value["type"], "registered");
    assert_eq!(value["id"], "alice");

    shutdown.shutdown();
}

#[tokio::test]
async fn non_reading_peer_does_not_stall_other_connections() {
    let (addr, shutdown, _task) = start_server().await;

    // Bob registers, then never reads again; his socket buffers fill up.
    let _bob = TestClient::connect_as(addr, "bob").await;
    let mut flooder = TestClient::connect_as(addr, "flooder").await;

    // Flood bob through the relay until the delivering write blocks on his
    // full write half. The flooder's own writes block eventually too, so
    // this runs detached and is aborted at the end.
    let payload = "x".repeat(64 * 1024);
    let flood = tokio::spawn(async move {
        for _ in 0..200 {
            flooder
                .send(&format!(r#"{{"type":"send","to":"bob","payload":"{payload}"}}"#))
                .await;
        }
    });
    sleep(Duration::from_millis(200)).await;

    // An unrelated client must still register and be served promptly.
    let mut carol = TestClient::connect_as(addr, "carol").await;
    carol.send(r#"{"type":"ping"}"#).await;
    assert_eq!(carol.recv().await, ServerFrame::Pong);

    flood.abort();
    shutdown.shutdown();
}

#[tokio::test]
async fn graceful_shutdown_closes_connections_and_returns() {
    let (addr, shutdown, task) = start_server().await;

    let mut alice = TestClient::connect_as(addr, "alice").await;

    shutdown.shutdown();
    timeout(RECV_TIMEOUT, task).await.expect("server did not stop").expect("server task");

    alice.recv_eof().await;
}
