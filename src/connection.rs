//! # Connection
//!
//! The connection state machine: owner of the transport for the lifetime of
//! one WebSocket connection.
//!
//! The lifecycle is `Closed → Connecting → Connected → Opening → Open →
//! Closed`. The state lives in a single atomic and every transition is a
//! compare-exchange against the exact expected prior state; a caller racing
//! the machine observes [`WebSocketError::InvalidState`] carrying the state
//! actually found. That atomic is the only synchronization point guarding
//! connect/handshake/close races.
//!
//! Frame I/O is full-duplex: the reader and writer halves of the transport
//! sit behind separate async mutexes, so one task can block in
//! [`Connection::receive_frame`] while others call
//! [`Connection::send_frame`].

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc, Mutex as StdMutex,
};

use tokio::sync::Mutex;
use url::Url;

use crate::{
    code::ErrorCode,
    codec,
    frame::Frame,
    handshake::{self, Extension, RequestHandshake, ResponseHandshake},
    options::Options,
    transport::{Connect, TcpConnector, TransportReader, TransportWriter},
    Result, WebSocketError,
};

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// No transport; the machine is idle or was torn down.
    Closed = 0,
    /// A transport is being established.
    Connecting = 1,
    /// The transport is up; no handshake has been sent yet.
    Connected = 2,
    /// The opening handshake is in flight.
    Opening = 3,
    /// The handshake validated; frame traffic is possible.
    Open = 4,
    /// The closing sequence has begun.
    Closing = 5,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Closed,
            1 => State::Connecting,
            2 => State::Connected,
            3 => State::Opening,
            4 => State::Open,
            _ => State::Closing,
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Closed => "closed",
            State::Connecting => "connecting",
            State::Connected => "connected",
            State::Opening => "opening",
            State::Open => "open",
            State::Closing => "closing",
        };
        write!(f, "{name}")
    }
}

/// A single client WebSocket connection over a pluggable transport.
pub struct Connection {
    state: AtomicU8,
    options: Options,
    connector: Arc<dyn Connect>,
    url: StdMutex<Option<Url>>,
    extensions: StdMutex<Vec<Extension>>,
    reader: Mutex<Option<Box<dyn TransportReader>>>,
    writer: Mutex<Option<Box<dyn TransportWriter>>>,
}

impl Connection {
    /// Creates a connection using the built-in TCP/TLS connector.
    pub fn new(options: Options) -> Self {
        Self::with_connector(options, Arc::new(TcpConnector::default()))
    }

    /// Creates a connection acquiring its transport from `connector`.
    pub fn with_connector(options: Options, connector: Arc<dyn Connect>) -> Self {
        Self {
            state: AtomicU8::new(State::Closed as u8),
            options,
            connector,
            url: StdMutex::new(None),
            extensions: StdMutex::new(Vec::new()),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transitions `from → to`, failing with the observed state when the
    /// machine is not exactly in `from`.
    fn transition(&self, from: State, to: State) -> Result<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| WebSocketError::InvalidState(State::from_u8(actual)))
    }

    /// Registers an extension to offer in the handshake. Only legal while
    /// closed; duplicate names are rejected.
    pub fn register_extension(&self, extension: Extension) -> Result<()> {
        let state = self.state();
        if state != State::Closed {
            return Err(WebSocketError::InvalidState(state));
        }

        let mut extensions = self.extensions.lock().unwrap();
        if extensions.iter().any(|e| e.name() == extension.name()) {
            return Err(WebSocketError::ExtensionAlreadyRegistered(
                extension.name().to_string(),
            ));
        }
        extensions.push(extension);
        Ok(())
    }

    /// Establishes the transport for `url`.
    ///
    /// Only legal from `Closed`. The URL must be an absolute `ws`/`wss` URL
    /// without a fragment; `port` overrides the URL port (default 80/443).
    /// On failure the machine returns to `Closed` so the call can be retried.
    pub async fn connect(&self, url: &str, port: Option<u16>, use_tls: bool) -> Result<()> {
        self.transition(State::Closed, State::Connecting)?;

        match self.connect_inner(url, port, use_tls).await {
            Ok(()) => {
                self.state.store(State::Connected as u8, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                self.state.store(State::Closed as u8, Ordering::Release);
                Err(err)
            }
        }
    }

    async fn connect_inner(&self, url: &str, port: Option<u16>, use_tls: bool) -> Result<()> {
        let url = parse_ws_url(url)?;
        let host = url
            .host_str()
            .ok_or_else(|| WebSocketError::InvalidUrl("missing host".to_string()))?
            .to_string();
        let default_port = if url.scheme() == "wss" { 443 } else { 80 };
        let port = port
            .or(url.port())
            .unwrap_or(default_port);

        log::debug!("connecting to {host}:{port} (tls={use_tls})");
        let transport = self.connector.connect(&host, port, use_tls).await?;
        let (reader, writer) = transport.split();

        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        *self.url.lock().unwrap() = Some(url);

        Ok(())
    }

    /// Sends the opening handshake and validates the response.
    ///
    /// Only legal from `Connected`. When `request` is `None` a default
    /// request is built from the connect URL and the registered extensions
    /// are attached to it. Returns the validated response.
    pub async fn send_handshake(
        &self,
        request: Option<RequestHandshake>,
    ) -> Result<ResponseHandshake> {
        self.transition(State::Connected, State::Opening)?;

        let request = match request {
            Some(request) => request,
            None => {
                let url = self
                    .url
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or(WebSocketError::ConnectionClosed)?;
                let mut request = RequestHandshake::new(&url, self.options.entropy.as_ref());
                for extension in self.extensions.lock().unwrap().iter() {
                    request.add_extension(extension.clone());
                }
                request
            }
        };

        {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(WebSocketError::ConnectionClosed)?;
            writer.write_all(request.to_string().as_bytes()).await?;
        }

        let mut lines = Vec::new();
        {
            let mut guard = self.reader.lock().await;
            let reader = guard.as_mut().ok_or(WebSocketError::ConnectionClosed)?;
            loop {
                let line = reader.read_line().await?;
                if line.is_empty() {
                    break;
                }
                lines.push(line);
            }
        }

        let response = ResponseHandshake::parse(&lines)?;
        handshake::validate(&request, &response)?;

        self.transition(State::Opening, State::Open)?;
        log::debug!(
            "handshake complete: {} {}",
            response.status,
            response.reason
        );

        Ok(response)
    }

    /// Writes one frame to the transport.
    ///
    /// Client frames must be masked on the wire; a frame arriving here
    /// without a key gets one drawn from the configured entropy source.
    /// Callers are serialized per frame by the writer lock.
    pub async fn send_frame(&self, frame: Frame) -> Result<()> {
        let frame = if frame.is_masked() {
            frame
        } else {
            frame.with_mask(self.options.masking_key())
        };

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(WebSocketError::ConnectionClosed)?;
        codec::write_frame(writer.as_mut(), &frame).await
    }

    /// Reads exactly one frame from the transport.
    pub async fn receive_frame(&self) -> Result<Frame> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(WebSocketError::ConnectionClosed)?;
        codec::read_frame(reader.as_mut()).await
    }

    /// Tears the connection down: sets `Closed` and disposes the transport.
    ///
    /// Idempotent at the state level. Does not send a close frame — the
    /// frame-level closing handshake belongs to the session loop.
    pub async fn close(&self, code: ErrorCode) -> Result<()> {
        let prior = State::from_u8(self.state.swap(State::Closed as u8, Ordering::AcqRel));
        if prior != State::Closed {
            log::debug!("closing connection from state {prior} ({code:?})");
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        // The reader half may be pinned by an in-flight receive; shutting the
        // writer down ends that read, and the half is dropped with the guard.
        if let Ok(mut guard) = self.reader.try_lock() {
            *guard = None;
        }

        Ok(())
    }
}

/// Validates a WebSocket URL: absolute, `ws`/`wss` scheme, no fragment.
pub(crate) fn parse_ws_url(input: &str) -> Result<Url> {
    let url = Url::parse(input)?;

    match url.scheme() {
        "ws" | "wss" => {}
        scheme => {
            return Err(WebSocketError::InvalidUrl(format!(
                "unsupported scheme: {scheme}"
            )))
        }
    }
    if url.fragment().is_some() {
        return Err(WebSocketError::InvalidUrl(
            "url must not contain a fragment".to_string(),
        ));
    }
    if url.host_str().is_none() {
        return Err(WebSocketError::InvalidUrl("missing host".to_string()));
    }

    Ok(url)
}
