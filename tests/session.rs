//! End-to-end session tests over a scripted in-memory transport.
//!
//! The mock transport feeds the engine server bytes from a channel and
//! captures every byte the client writes. Entropy is pinned to a fixed
//! source, making the handshake key and all masking keys deterministic.

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use async_trait::async_trait;
use base64::prelude::*;
use tokio::sync::mpsc;

use portsock::{
    codec::write_frame,
    handshake::accept_token,
    Connect, EntropySource, ErrorCode, Event, EventStream, Frame, OpCode, Options, State,
    Transport, TransportReader, TransportWriter, WebSocketClient, WebSocketError,
};

/// Every random byte is `0x5A`: handshake key `WlpaWlpa…`, masking keys
/// `[0x5A; 4]`.
struct FixedEntropy;

impl EntropySource for FixedEntropy {
    fn fill(&self, buf: &mut [u8]) {
        buf.fill(0x5A);
    }
}

const MASK_KEY: [u8; 4] = [0x5A; 4];

struct MockReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    buffer: VecDeque<u8>,
}

impl MockReader {
    async fn fill(&mut self) -> io::Result<()> {
        match self.rx.recv().await {
            Some(chunk) => {
                self.buffer.extend(chunk);
                Ok(())
            }
            None => Err(io::ErrorKind::UnexpectedEof.into()),
        }
    }
}

#[async_trait]
impl TransportReader for MockReader {
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        while self.buffer.len() < buf.len() {
            self.fill().await?;
        }
        for byte in buf.iter_mut() {
            *byte = self.buffer.pop_front().expect("buffered byte");
        }
        Ok(())
    }

    async fn read_line(&mut self) -> io::Result<String> {
        let mut line = Vec::new();
        loop {
            match self.buffer.pop_front() {
                Some(b'\n') => break,
                Some(byte) => line.push(byte),
                None => self.fill().await?,
            }
        }
        while line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-utf8 header line"))
    }
}

struct MockWriter {
    written: Arc<StdMutex<Vec<u8>>>,
}

#[async_trait]
impl TransportWriter for MockWriter {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct MockTransport {
    reader: MockReader,
    writer: MockWriter,
}

impl Transport for MockTransport {
    fn is_secure(&self) -> bool {
        false
    }

    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        (Box::new(self.reader), Box::new(self.writer))
    }
}

/// Hands out one prepared transport, then refuses.
struct MockConnector {
    transport: StdMutex<Option<Box<dyn Transport>>>,
}

#[async_trait]
impl Connect for MockConnector {
    async fn connect(
        &self,
        _host: &str,
        _port: u16,
        _secure: bool,
    ) -> io::Result<Box<dyn Transport>> {
        self.transport
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| io::ErrorKind::ConnectionRefused.into())
    }
}

struct Session {
    client: WebSocketClient,
    events: EventStream,
    /// Feed server-side bytes here; dropping it ends the stream.
    server_tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Everything the client wrote.
    written: Arc<StdMutex<Vec<u8>>>,
}

fn handshake_response() -> Vec<u8> {
    let key = BASE64_STANDARD.encode([0x5A; 16]);
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_token(&key)
    )
    .into_bytes()
}

fn build_session(options: Options) -> Session {
    let (server_tx, rx) = mpsc::unbounded_channel();
    let written = Arc::new(StdMutex::new(Vec::new()));

    let transport = MockTransport {
        reader: MockReader {
            rx,
            buffer: VecDeque::new(),
        },
        writer: MockWriter {
            written: Arc::clone(&written),
        },
    };
    let connector = MockConnector {
        transport: StdMutex::new(Some(Box::new(transport))),
    };

    let client = WebSocketClient::with_connector(
        options.with_entropy(Arc::new(FixedEntropy)),
        Arc::new(connector),
    );
    let events = client.subscribe();

    Session {
        client,
        events,
        server_tx,
        written,
    }
}

/// Opens a session against a scripted 101 handshake and clears the captured
/// request bytes so tests see only frame traffic.
async fn open_session(options: Options) -> Session {
    let mut session = build_session(options);
    session.server_tx.send(handshake_response()).unwrap();
    session
        .client
        .open_with("ws://example.com/chat", None, false)
        .await
        .unwrap();

    match recv_event(&mut session.events).await {
        Event::Opened => {}
        other => panic!("expected Opened, got {other:?}"),
    }
    session.written.lock().unwrap().clear();
    session
}

async fn recv_event(events: &mut EventStream) -> Event {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Encodes a frame the way a server would send it (unmasked).
async fn server_frame(frame: Frame) -> Vec<u8> {
    struct Sink(Vec<u8>);

    #[async_trait]
    impl TransportWriter for Sink {
        async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.0.extend_from_slice(buf);
            Ok(())
        }
        async fn shutdown(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let mut sink = Sink(Vec::new());
    write_frame(&mut sink, &frame).await.unwrap();
    sink.0
}

/// Parses captured client frames (all masked, payloads < 126 bytes) into
/// `(first_header_byte, unmasked_payload)` pairs.
fn parse_client_frames(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        let head0 = bytes[0];
        let head1 = bytes[1];
        assert_eq!(head1 & 0x80, 0x80, "client frame must be masked");
        let len = (head1 & 0x7F) as usize;
        assert!(len < 126, "test parser only handles short payloads");
        let key = [bytes[2], bytes[3], bytes[4], bytes[5]];
        let mut payload = bytes[6..6 + len].to_vec();
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i & 3];
        }
        frames.push((head0, payload));
        bytes = &bytes[6 + len..];
    }
    frames
}

#[tokio::test]
async fn test_open_sends_valid_upgrade_request() {
    let mut session = build_session(Options::default());
    session.server_tx.send(handshake_response()).unwrap();
    session
        .client
        .open_with("ws://example.com/chat", None, false)
        .await
        .unwrap();

    assert_eq!(session.client.state(), State::Open);

    let written = session.written.lock().unwrap().clone();
    let request = String::from_utf8(written).unwrap();
    assert!(request.starts_with("GET /chat HTTP/1.1\r\n"));
    assert!(request.contains("Host: example.com\r\n"));
    assert!(request.contains("Upgrade: websocket\r\n"));
    assert!(request.contains("Connection: Upgrade\r\n"));
    assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
    assert!(request.contains(&format!(
        "Sec-WebSocket-Key: {}\r\n",
        BASE64_STANDARD.encode([0x5A; 16])
    )));
    assert!(request.ends_with("\r\n\r\n"));

    match recv_event(&mut session.events).await {
        Event::Opened => {}
        other => panic!("expected Opened, got {other:?}"),
    }
}

#[tokio::test]
async fn test_open_rejects_bad_status() {
    let mut session = build_session(Options::default());
    session
        .server_tx
        .send(b"HTTP/1.1 404 Not Found\r\n\r\n".to_vec())
        .unwrap();

    let err = session
        .client
        .open_with("ws://example.com/", None, false)
        .await
        .unwrap_err();
    assert_eq!(
        err.error_code(),
        Some(ErrorCode::HandshakeInvalidStatusCode)
    );
}

#[tokio::test]
async fn test_open_rejects_bad_accept_token() {
    let mut session = build_session(Options::default());
    session
        .server_tx
        .send(
            b"HTTP/1.1 101 Switching Protocols\r\n\
              Sec-WebSocket-Accept: c3VyZWx5IG5vdCByaWdodA==\r\n\
              \r\n"
                .to_vec(),
        )
        .unwrap();

    let err = session
        .client
        .open_with("ws://example.com/", None, false)
        .await
        .unwrap_err();
    assert_eq!(
        err.error_code(),
        Some(ErrorCode::HandshakeInvalidSecWebSocketAccept)
    );
}

#[tokio::test]
async fn test_second_open_fails() {
    let session = open_session(Options::default()).await;
    let err = session
        .client
        .open_with("ws://example.com/", None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, WebSocketError::AlreadyOpened));
}

#[tokio::test]
async fn test_send_text_writes_one_masked_frame() {
    let session = open_session(Options::default()).await;

    session.client.send_text("Hello World").await.unwrap();

    let written = session.written.lock().unwrap().clone();
    // exactly one frame: header(2) + key(4) + payload(11)
    assert_eq!(written.len(), 17);
    assert_eq!(written[0], 0x81); // FIN + Text
    assert_eq!(written[1], 0x80 | 11); // masked, length field 11
    assert_eq!(&written[2..6], &MASK_KEY);

    let frames = parse_client_frames(&written);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].1, b"Hello World");
}

#[tokio::test]
async fn test_send_fragments_above_frame_size() {
    let options = Options::default().with_max_frame_size(4).unwrap();
    let session = open_session(options).await;

    session.client.send_text("Hello World").await.unwrap();

    let written = session.written.lock().unwrap().clone();
    let frames = parse_client_frames(&written);
    assert_eq!(frames.len(), 3);

    // first frame: Text, FIN clear
    assert_eq!(frames[0].0, 0x01);
    assert_eq!(frames[0].1, b"Hell");
    // middle: Continuation, FIN clear
    assert_eq!(frames[1].0, 0x00);
    assert_eq!(frames[1].1, b"o Wo");
    // last: Continuation, FIN set
    assert_eq!(frames[2].0, 0x80);
    assert_eq!(frames[2].1, b"rld");
}

#[tokio::test]
async fn test_fragmented_message_delivered_once() {
    let mut session = open_session(Options::default()).await;

    let mut bytes = server_frame(Frame::text("He").with_fin(false)).await;
    bytes.extend(server_frame(Frame::continuation("llo").with_fin(false)).await);
    bytes.extend(server_frame(Frame::continuation(" World")).await);
    session.server_tx.send(bytes).unwrap();

    let mut frames = 0;
    loop {
        match recv_event(&mut session.events).await {
            Event::FrameReceived(_) => frames += 1,
            Event::MessageReceived(message) => {
                assert!(message.is_text());
                assert_eq!(message.frame_count(), 3);
                assert_eq!(message.text().unwrap(), "Hello World");
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(frames, 3);
}

#[tokio::test]
async fn test_ping_answered_with_identical_pong() {
    let mut session = open_session(Options::default()).await;

    let mut bytes = server_frame(Frame::ping("keepalive")).await;
    // a data frame after the ping: when its message arrives, the pong reply
    // must already be on the wire
    bytes.extend(server_frame(Frame::text("after")).await);
    session.server_tx.send(bytes).unwrap();

    loop {
        match recv_event(&mut session.events).await {
            Event::MessageReceived(message) => {
                assert_eq!(message.text().unwrap(), "after");
                break;
            }
            Event::FrameReceived(_) => {}
            other => panic!("unexpected event {other:?}"),
        }
    }

    let written = session.written.lock().unwrap().clone();
    let frames = parse_client_frames(&written);
    assert_eq!(frames.len(), 1, "exactly one outbound pong");
    assert_eq!(frames[0].0, 0x8A); // FIN + Pong
    assert_eq!(frames[0].1, b"keepalive");
}

#[tokio::test]
async fn test_ping_ignored_when_auto_pong_disabled() {
    let mut session = open_session(Options::default().with_auto_pong(false)).await;

    let mut bytes = server_frame(Frame::ping("keepalive")).await;
    bytes.extend(server_frame(Frame::text("after")).await);
    session.server_tx.send(bytes).unwrap();

    loop {
        match recv_event(&mut session.events).await {
            Event::MessageReceived(_) => break,
            Event::FrameReceived(_) => {}
            other => panic!("unexpected event {other:?}"),
        }
    }

    assert!(session.written.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_close_frame_closes_session() {
    let mut session = open_session(Options::default()).await;

    session
        .server_tx
        .send(server_frame(Frame::close(ErrorCode::CloseNormal, "bye")).await)
        .unwrap();

    loop {
        match recv_event(&mut session.events).await {
            Event::Closed => break,
            Event::FrameReceived(frame) => {
                assert_eq!(frame.opcode, OpCode::Close);
                assert_eq!(frame.close_code(), Some(ErrorCode::CloseNormal));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(session.client.state(), State::Closed);
}

#[tokio::test]
async fn test_protocol_error_reported_and_loop_stops() {
    let mut session = open_session(Options::default()).await;

    // a fragmented ping: control frames must have FIN set
    session.server_tx.send(vec![0x09, 0x00]).unwrap();

    match recv_event(&mut session.events).await {
        Event::Error(err) => {
            assert_eq!(err.error_code(), Some(ErrorCode::CloseInvalidData));
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_interleaved_data_frames_are_inconsistent() {
    let mut session = open_session(Options::default()).await;

    let mut bytes = server_frame(Frame::text("first").with_fin(false)).await;
    bytes.extend(server_frame(Frame::text("second").with_fin(false)).await);
    session.server_tx.send(bytes).unwrap();

    loop {
        match recv_event(&mut session.events).await {
            Event::Error(err) => {
                assert_eq!(err.error_code(), Some(ErrorCode::CloseInconsistentData));
                break;
            }
            Event::FrameReceived(_) => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_continuation_without_message_is_inconsistent() {
    let mut session = open_session(Options::default()).await;

    session
        .server_tx
        .send(server_frame(Frame::continuation("orphan")).await)
        .unwrap();

    loop {
        match recv_event(&mut session.events).await {
            Event::Error(err) => {
                assert_eq!(err.error_code(), Some(ErrorCode::CloseInconsistentData));
                break;
            }
            Event::FrameReceived(_) => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_eof_reports_no_close_received() {
    let mut session = open_session(Options::default()).await;

    // dropping the sender ends the stream between frames
    drop(session.server_tx);

    match recv_event(&mut session.events).await {
        Event::Error(err) => {
            assert_eq!(err.error_code(), Some(ErrorCode::CloseNoCloseReceived));
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_close_on_unopened_session_is_noop() {
    let session = build_session(Options::default());
    session.client.close().await.unwrap();
    assert_eq!(session.client.state(), State::Closed);
}

#[tokio::test]
async fn test_close_is_safe_to_repeat() {
    let mut session = open_session(Options::default()).await;

    session.client.close().await.unwrap();
    assert_eq!(session.client.state(), State::Closed);
    match recv_event(&mut session.events).await {
        Event::Closed => {}
        other => panic!("expected Closed, got {other:?}"),
    }

    // second close: no further events, still Ok
    session.client.close().await.unwrap();
    assert_eq!(session.client.state(), State::Closed);
}

#[tokio::test]
async fn test_multiple_subscribers_see_events() {
    let mut session = build_session(Options::default());
    let mut second = session.client.subscribe();

    session.server_tx.send(handshake_response()).unwrap();
    session
        .client
        .open_with("ws://example.com/", None, false)
        .await
        .unwrap();

    match recv_event(&mut session.events).await {
        Event::Opened => {}
        other => panic!("expected Opened, got {other:?}"),
    }
    match recv_event(&mut second).await {
        Event::Opened => {}
        other => panic!("expected Opened, got {other:?}"),
    }
}
