//! # Error codes
//!
//! The closed set of status codes used across the engine, spanning two ranges:
//!
//! - `10000..=10003`: local handshake failures, raised while validating the
//!   opening handshake before any frame traffic is possible.
//! - `1000..=1015`: the close-frame status codes defined in
//!   [RFC 6455 Section 7.4.1](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4.1),
//!   used both for close frames on the wire and for classifying protocol
//!   violations detected by the frame codec and session loop.
//!
//! Every code carries a fixed human-readable description, available through
//! [`ErrorCode::description`].

/// Status code attached to handshake failures, protocol violations and close
/// frames.
///
/// The numeric values are wire-meaningful for the `1000..=1015` range (they are
/// the close codes of RFC 6455); the `10000..=10003` range is local to this
/// library and never leaves the process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// No error occurred.
    None = 10000,
    /// The handshake response status was not 101 Switching Protocols.
    HandshakeInvalidStatusCode = 10001,
    /// The `Sec-WebSocket-Accept` token did not match the expected value.
    HandshakeInvalidSecWebSocketAccept = 10002,
    /// The server supports none of the protocol versions offered.
    HandshakeVersionNotSupported = 10003,

    /// Normal closure; the purpose for which the connection was established
    /// has been fulfilled.
    CloseNormal = 1000,
    /// The endpoint is going away (server shutdown, page navigation).
    CloseGoingAway = 1001,
    /// A protocol error terminated the connection.
    CloseProtocolError = 1002,
    /// A frame or data type that cannot be accepted was received.
    CloseInvalidData = 1003,
    /// Reserved; no meaning defined by RFC 6455.
    CloseReserved = 1004,
    /// No status code was present in the close frame.
    CloseNoCode = 1005,
    /// The connection closed without a close frame being received.
    CloseNoCloseReceived = 1006,
    /// Message data was inconsistent with its type, or fragmentation rules
    /// were violated.
    CloseInconsistentData = 1007,
    /// A message violated the endpoint's policy.
    ClosePolicyViolation = 1008,
    /// A message was too big to process.
    CloseMessageTooBig = 1009,
    /// The server did not negotiate an extension the client required.
    CloseExtensionsMissing = 1010,
    /// The server encountered an unexpected condition.
    CloseUnexpectedCondition = 1011,
    /// The TLS handshake failed.
    CloseTlsError = 1015,
}

impl ErrorCode {
    /// Returns the fixed human-readable description of the code.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::None => "no error",
            ErrorCode::HandshakeInvalidStatusCode => {
                "handshake response status is not 101 Switching Protocols"
            }
            ErrorCode::HandshakeInvalidSecWebSocketAccept => {
                "handshake response contains an invalid Sec-WebSocket-Accept token"
            }
            ErrorCode::HandshakeVersionNotSupported => {
                "server supports none of the offered websocket versions"
            }
            ErrorCode::CloseNormal => "normal closure",
            ErrorCode::CloseGoingAway => "endpoint is going away",
            ErrorCode::CloseProtocolError => "protocol error",
            ErrorCode::CloseInvalidData => "unacceptable data received",
            ErrorCode::CloseReserved => "reserved close code",
            ErrorCode::CloseNoCode => "no close code present",
            ErrorCode::CloseNoCloseReceived => "connection closed without a close frame",
            ErrorCode::CloseInconsistentData => "data inconsistent with message type",
            ErrorCode::ClosePolicyViolation => "message violates endpoint policy",
            ErrorCode::CloseMessageTooBig => "message too big to process",
            ErrorCode::CloseExtensionsMissing => "expected extension was not negotiated",
            ErrorCode::CloseUnexpectedCondition => "unexpected condition encountered",
            ErrorCode::CloseTlsError => "TLS handshake failure",
        }
    }

    /// Whether the code belongs to the RFC 6455 close-code space rather than
    /// the local handshake range.
    pub fn is_close_code(&self) -> bool {
        u16::from(*self) < 10000
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        code as u16
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = u16;

    /// Converts a wire value back into an `ErrorCode`, returning the raw value
    /// for anything outside the closed set.
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            10000 => ErrorCode::None,
            10001 => ErrorCode::HandshakeInvalidStatusCode,
            10002 => ErrorCode::HandshakeInvalidSecWebSocketAccept,
            10003 => ErrorCode::HandshakeVersionNotSupported,
            1000 => ErrorCode::CloseNormal,
            1001 => ErrorCode::CloseGoingAway,
            1002 => ErrorCode::CloseProtocolError,
            1003 => ErrorCode::CloseInvalidData,
            1004 => ErrorCode::CloseReserved,
            1005 => ErrorCode::CloseNoCode,
            1006 => ErrorCode::CloseNoCloseReceived,
            1007 => ErrorCode::CloseInconsistentData,
            1008 => ErrorCode::ClosePolicyViolation,
            1009 => ErrorCode::CloseMessageTooBig,
            1010 => ErrorCode::CloseExtensionsMissing,
            1011 => ErrorCode::CloseUnexpectedCondition,
            1015 => ErrorCode::CloseTlsError,
            other => return Err(other),
        })
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}
