//! # Client session
//!
//! [`WebSocketClient`] turns the low-level [`Connection`] into an
//! event-driven session: open, send text/binary, close, plus frame, message
//! and error events delivered to every subscriber.
//!
//! Opening a session connects, performs the handshake and spawns the receive
//! loop as an independent tokio task. The loop runs until cancelled or a
//! terminal condition occurs: it reassembles fragmented messages, answers
//! pings when auto-pong is enabled, initiates the close sequence on a close
//! frame and reports any protocol or transport failure to the error
//! observers before exiting. It never reconnects on its own.
//!
//! Outbound payloads larger than the configured frame size are fragmented:
//! the first frame carries the real opcode, the rest are continuations, and
//! only the last sets `fin`. A send-side mutex is held across all frames of
//! one logical send, so concurrent senders cannot interleave fragments of
//! different messages on the wire.

use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    code::ErrorCode,
    connection::{Connection, State},
    frame::{Frame, OpCode},
    message::Message,
    options::Options,
    transport::Connect,
    Result, WebSocketError,
};

/// How long [`WebSocketClient::close`] waits for the receive loop to observe
/// cancellation before aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Notification published by a session to its subscribers.
#[derive(Debug, Clone)]
pub enum Event {
    /// The session finished its handshake and the receive loop is running.
    Opened,
    /// The session closed, either by the peer's close frame or by
    /// [`WebSocketClient::close`].
    Closed,
    /// A frame arrived, before any reassembly.
    FrameReceived(Frame),
    /// A complete logical message was reassembled.
    MessageReceived(Message),
    /// The receive loop terminated on an error.
    Error(Arc<WebSocketError>),
}

/// A subscription to session events; see [`WebSocketClient::subscribe`].
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Receives the next event, or `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl futures::Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

type Subscribers = Arc<StdMutex<Vec<mpsc::UnboundedSender<Event>>>>;

/// Delivers `event` to every live subscriber, pruning the closed ones.
fn publish(subscribers: &Subscribers, event: Event) {
    let mut subscribers = subscribers.lock().unwrap();
    subscribers.retain(|tx| tx.send(event.clone()).is_ok());
}

/// An event-driven WebSocket client session.
///
/// One session per instance: after a successful [`open`](Self::open) the
/// client cannot be reopened, matching the one-shot lifecycle of the
/// underlying connection.
pub struct WebSocketClient {
    connection: Arc<Connection>,
    options: Options,
    subscribers: Subscribers,
    cancel: CancellationToken,
    send_lock: tokio::sync::Mutex<()>,
    opened: AtomicBool,
    loop_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Default for WebSocketClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketClient {
    /// Creates a session with default options over the built-in TCP/TLS
    /// connector.
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    /// Creates a session with the given options.
    pub fn with_options(options: Options) -> Self {
        Self::from_connection(Connection::new(options.clone()), options)
    }

    /// Creates a session acquiring its transport from `connector`.
    pub fn with_connector(options: Options, connector: Arc<dyn Connect>) -> Self {
        Self::from_connection(
            Connection::with_connector(options.clone(), connector),
            options,
        )
    }

    fn from_connection(connection: Connection, options: Options) -> Self {
        Self {
            connection: Arc::new(connection),
            options,
            subscribers: Arc::new(StdMutex::new(Vec::new())),
            cancel: CancellationToken::new(),
            send_lock: tokio::sync::Mutex::new(()),
            opened: AtomicBool::new(false),
            loop_task: StdMutex::new(None),
        }
    }

    /// The state of the underlying connection.
    pub fn state(&self) -> State {
        self.connection.state()
    }

    /// Access to the underlying connection, e.g. to register extensions
    /// before opening.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Subscribes to session events. Every subscriber receives every event
    /// published after subscription.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        EventStream { rx }
    }

    /// Opens the session, inferring TLS and port from the URL scheme.
    pub async fn open(&self, url: &str) -> Result<()> {
        let use_tls = url.starts_with("wss");
        self.open_with(url, None, use_tls).await
    }

    /// Opens the session: connect, handshake, start the receive loop, then
    /// publish [`Event::Opened`]. Fails with
    /// [`WebSocketError::AlreadyOpened`] if the session was opened before.
    pub async fn open_with(&self, url: &str, port: Option<u16>, use_tls: bool) -> Result<()> {
        if self.opened.swap(true, Ordering::AcqRel) {
            return Err(WebSocketError::AlreadyOpened);
        }

        self.connection.connect(url, port, use_tls).await?;
        self.connection.send_handshake(None).await?;

        let handle = tokio::spawn(receive_loop(
            Arc::clone(&self.connection),
            Arc::clone(&self.subscribers),
            self.cancel.clone(),
            self.options.auto_pong,
        ));
        *self.loop_task.lock().unwrap() = Some(handle);

        publish(&self.subscribers, Event::Opened);
        Ok(())
    }

    /// Sends UTF-8 text, fragmenting above the configured frame size.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(Bytes::copy_from_slice(text.as_bytes()), false)
            .await
    }

    /// Sends binary data, fragmenting above the configured frame size.
    pub async fn send_binary(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send(payload.into(), true).await
    }

    async fn send(&self, payload: Bytes, is_binary: bool) -> Result<()> {
        // One logical message at a time on the wire; concurrent sends queue
        // here instead of interleaving their fragments.
        let _guard = self.send_lock.lock().await;

        let max = self.options.max_frame_size();
        let total = payload.len();
        let mut opcode = if is_binary {
            OpCode::Binary
        } else {
            OpCode::Text
        };
        let mut offset = 0;

        loop {
            let end = (offset + max).min(total);
            let fin = end == total;
            let frame = Frame::new(fin, opcode, payload.slice(offset..end));
            self.connection.send_frame(frame).await?;

            if fin {
                break;
            }
            offset = end;
            opcode = OpCode::Continuation;
        }

        Ok(())
    }

    /// Closes the session: signals the receive loop, waits briefly for it to
    /// wind down (aborting it past the grace period), closes the transport
    /// with [`ErrorCode::CloseNormal`] and publishes [`Event::Closed`].
    ///
    /// Safe to call on a session that is already closed or was never opened.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();

        let handle = self.loop_task.lock().unwrap().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                handle.abort();
                let _ = handle.await;
            }
        }

        if self.connection.state() != State::Closed {
            self.connection.close(ErrorCode::CloseNormal).await?;
            publish(&self.subscribers, Event::Closed);
        }

        Ok(())
    }
}

/// The receive loop: one frame per iteration until cancellation or a
/// terminal condition.
///
/// Cancellation is polled once per iteration, never mid-frame — a decode
/// that has begun is allowed to complete or fail even if the token fires
/// during the read.
async fn receive_loop(
    connection: Arc<Connection>,
    subscribers: Subscribers,
    cancel: CancellationToken,
    auto_pong: bool,
) {
    let mut current: Option<Message> = None;

    while !cancel.is_cancelled() {
        let frame = match connection.receive_frame().await {
            Ok(frame) => frame,
            Err(err) => {
                if cancel.is_cancelled() {
                    log::debug!("receive loop stopping after cancellation: {err}");
                } else {
                    log::error!("receive loop terminated: {err}");
                    publish(&subscribers, Event::Error(Arc::new(err)));
                }
                break;
            }
        };

        publish(&subscribers, Event::FrameReceived(frame.clone()));

        if frame.opcode == OpCode::Close {
            log::debug!(
                "close frame received (code {:?}); closing session",
                frame.close_code()
            );
            let _ = connection.close(ErrorCode::CloseNormal).await;
            publish(&subscribers, Event::Closed);
            break;
        }

        if frame.opcode.is_control() {
            if frame.opcode == OpCode::Ping && auto_pong {
                let pong = Frame::pong(frame.payload.clone());
                if let Err(err) = connection.send_frame(pong).await {
                    log::error!("failed to answer ping: {err}");
                    publish(&subscribers, Event::Error(Arc::new(err)));
                    break;
                }
            } else {
                log::debug!("ignoring {:?} frame", frame.opcode);
            }
        } else {
            let appended = if frame.opcode == OpCode::Continuation {
                match current.as_mut() {
                    Some(message) => message.add_frame(frame),
                    None => Err(WebSocketError::protocol_msg(
                        ErrorCode::CloseInconsistentData,
                        "continuation frame without a message in progress",
                    )),
                }
            } else if current.is_some() {
                Err(WebSocketError::protocol_msg(
                    ErrorCode::CloseInconsistentData,
                    "data frame while a fragmented message is in progress",
                ))
            } else {
                let mut message = Message::new();
                let res = message.add_frame(frame);
                current = Some(message);
                res
            };

            if let Err(err) = appended {
                log::error!("receive loop terminated: {err}");
                publish(&subscribers, Event::Error(Arc::new(err)));
                break;
            }
        }

        if let Some(message) = current.take_if(|message| message.is_complete()) {
            publish(&subscribers, Event::MessageReceived(message));
        }
    }

    log::debug!("receive loop finished");
}
