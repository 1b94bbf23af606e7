//! # portsock
//! Client-side implementation of the WebSocket protocol (RFC 6455) over an
//! abstract byte-stream transport: opening handshake, frame codec, message
//! fragmentation and reassembly, and connection lifecycle management.
//!
//! The crate is built for applications that need a portable WebSocket client
//! without depending on a platform's native WebSocket stack. The protocol
//! engine only consumes its transport through a minimal contract — write
//! bytes, read exactly N bytes, read a CRLF-terminated line, shut down — so
//! it runs unchanged over raw TCP, TLS or any test double implementing
//! [`Transport`].
//!
//! # Layers
//!
//! - [`frame`] / [`codec`]: the wire format — bit-exact binary framing with
//!   masking and extended lengths, strict RFC-mandated validation.
//! - [`message`]: reassembly of fragmented frames into logical messages.
//! - [`handshake`]: the HTTP/1.1 upgrade request/response and its
//!   cryptographic accept-token validation.
//! - [`connection`]: the state machine owning the transport,
//!   `Closed → Connecting → Connected → Opening → Open → Closed`, with
//!   compare-and-swap transitions.
//! - [`client`]: the event-driven session loop — receive loop, outbound
//!   fragmentation, auto-pong, observer surface.
//!
//! # Client example
//! ```no_run
//! use futures::StreamExt;
//! use portsock::{Event, WebSocketClient};
//!
//! #[tokio::main]
//! async fn main() -> portsock::Result<()> {
//!     let client = WebSocketClient::new();
//!     let mut events = client.subscribe();
//!
//!     client.open("wss://echo.websocket.org").await?;
//!     client.send_text("Hello World").await?;
//!
//!     while let Some(event) = events.next().await {
//!         match event {
//!             Event::MessageReceived(message) if message.is_text() => {
//!                 println!("{}", message.text()?);
//!                 break;
//!             }
//!             Event::Error(err) => eprintln!("session error: {err}"),
//!             _ => {}
//!         }
//!     }
//!
//!     client.close().await
//! }
//! ```
//!
//! # Concurrency
//! One receive loop per session suspends on inbound frame reads; any number
//! of callers may send concurrently. Sends of one logical message are held
//! under a session-level lock so fragments of different messages never
//! interleave on the wire, and the transport's writer half serializes
//! individual frames. The connection's state field is the only
//! compare-and-swap shared state in the engine.
//!
//! # Determinism
//! Handshake keys and masking keys are drawn from an [`EntropySource`]
//! injected through [`Options`]; substitute a fixed source in tests for
//! byte-exact expectations.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod code;
pub mod codec;
pub mod connection;
pub mod frame;
pub mod handshake;
mod mask;
pub mod message;
pub mod options;
pub mod transport;

use thiserror::Error;

pub use client::{Event, EventStream, WebSocketClient};
pub use code::ErrorCode;
pub use connection::{Connection, State};
pub use frame::{Frame, OpCode};
pub use handshake::{Extension, RequestHandshake, ResponseHandshake};
pub use message::Message;
pub use options::{
    EntropySource, Options, RandEntropy, DEFAULT_MAX_FRAME_SIZE, MAX_ALLOWED_FRAME_SIZE,
};
pub use transport::{
    Connect, TcpConnector, TcpTransport, Transport, TransportReader, TransportWriter,
};

/// A result type for WebSocket operations, using `WebSocketError` as the
/// error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Errors raised by the WebSocket engine.
///
/// Three families share this enum:
///
/// - **Local usage errors** — an operation attempted in the wrong state, an
///   invalid argument, a duplicate extension, a frame-size configuration out
///   of range. Reported to the caller immediately, never absorbed.
/// - **Protocol errors** — malformed frames, fragmentation violations,
///   handshake validation failures. All carried by the single
///   [`Protocol`](WebSocketError::Protocol) variant with an [`ErrorCode`]
///   from the taxonomy; they terminate the receive loop and are never
///   retried.
/// - **Transport errors** — connection refused, I/O failures — wrapped as
///   [`Io`](WebSocketError::Io) and surfaced the same way.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// A WebSocket protocol or handshake rule was violated.
    #[error("{code}: {reason}")]
    Protocol {
        /// Classification within the closed code taxonomy.
        code: ErrorCode,
        /// Human-readable context for the specific violation.
        reason: &'static str,
    },

    /// An operation was attempted while the connection was in the wrong
    /// state; carries the state actually observed.
    #[error("invalid operation in state {0}")]
    InvalidState(State),

    /// The client session was already opened once; sessions are one-shot.
    #[error("client has been opened before")]
    AlreadyOpened,

    /// An extension with the same name was already registered.
    #[error("extension already registered: {0}")]
    ExtensionAlreadyRegistered(String),

    /// The configured maximum frame size is outside the allowed range.
    #[error("frame size must be between 1 and {max}, got {given}")]
    FrameSizeOutOfRange {
        /// The rejected value.
        given: usize,
        /// The hard upper bound.
        max: usize,
    },

    /// A frame was appended to a message that is already complete.
    #[error("message already complete")]
    MessageComplete,

    /// A text payload was not valid UTF-8.
    #[error("invalid UTF-8")]
    InvalidUtf8,

    /// A frame header carried an opcode outside the RFC 6455 set.
    #[error("invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// The handshake response could not be parsed at all (missing or
    /// malformed status line).
    #[error("invalid handshake response: {0}")]
    InvalidHandshakeResponse(String),

    /// The URL is not an absolute `ws`/`wss` URL, or carries a fragment.
    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),

    /// An operation required a transport, but the connection has none.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Wraps URL parsing failures.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Wraps I/O errors of the underlying transport.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WebSocketError {
    /// A protocol error whose reason is the code's fixed description.
    pub(crate) fn protocol(code: ErrorCode) -> Self {
        Self::Protocol {
            code,
            reason: code.description(),
        }
    }

    /// A protocol error with a more specific reason.
    pub(crate) fn protocol_msg(code: ErrorCode, reason: &'static str) -> Self {
        Self::Protocol { code, reason }
    }

    /// The taxonomy code of a protocol error, `None` for other families.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}
