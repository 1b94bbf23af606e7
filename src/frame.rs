//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2),
//! the atomic unit of data transmission. Each frame carries its payload plus
//! the protocol-level metadata of the frame header.
//!
//! ### Frame binary format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! Frames come in two categories:
//!
//! - **Data frames** carry application payload: [`OpCode::Text`] (UTF-8),
//!   [`OpCode::Binary`] (raw bytes), and [`OpCode::Continuation`] for
//!   fragments of a larger message.
//! - **Control frames** manage the connection: [`OpCode::Close`],
//!   [`OpCode::Ping`] and [`OpCode::Pong`]. Control frames can never be
//!   fragmented and their payload is limited to 125 bytes.
//!
//! The payload of a [`Frame`] is always held unmasked; the optional masking
//! key only records how the payload is (or was) represented on the wire. All
//! client-sent frames are masked before transmission, and frames received
//! from a compliant server are never masked.
use bytes::Bytes;

use crate::{code::ErrorCode, WebSocketError};

/// WebSocket operation code determining the semantic meaning of a frame.
///
/// The numeric values are defined in
/// [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// Continuation = 0x0, Text = 0x1, Binary = 0x2, Close = 0x8, Ping = 0x9,
/// Pong = 0xA. The ranges 0x3-0x7 and 0xB-0xF are reserved and rejected
/// during decoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` for the control opcodes (`Close`, `Ping`, `Pong`).
    ///
    /// Control frames manage connection state and have special constraints:
    /// they cannot be fragmented and their payload must not exceed 125 bytes.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Returns `true` for the opcodes that open a data message
    /// (`Text`, `Binary`). `Continuation` is neither a data opcode nor a
    /// control opcode: it can only extend a message opened by a data frame.
    pub fn is_data(&self) -> bool {
        matches!(*self, OpCode::Text | OpCode::Binary)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    /// Interprets the opcode field of a frame header. Reserved opcodes
    /// (0x3-0x7 and 0xB-0xF) yield [`WebSocketError::InvalidOpCode`].
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Largest possible frame header: 2 base bytes, 8 bytes of extended length
/// and a 4-byte masking key.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// A single WebSocket frame.
///
/// The payload is an immutable [`Bytes`] range — fragmenting a message into
/// frames slices the original buffer without copying. A frame is constructed
/// fresh per send or decoded fresh per receive and not modified afterwards;
/// the decoder unmasks in place before the frame is handed out.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Final fragment flag; `true` on the last frame of a message.
    pub fin: bool,
    /// First reserved bit; only a negotiated extension may set it.
    pub rsv1: bool,
    /// Second reserved bit; must be false.
    pub rsv2: bool,
    /// Third reserved bit; must be false.
    pub rsv3: bool,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// Masking key, present iff the frame is masked on the wire.
    mask: Option<[u8; 4]>,
    /// Frame payload, always unmasked.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new unmasked frame. Reserved bits are cleared; use the
    /// dedicated constructors for the common frame kinds.
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Creates a final text frame with the given UTF-8 payload.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, payload)
    }

    /// Creates a final binary frame with the given payload.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, payload)
    }

    /// Creates a final continuation frame; combine with [`Frame::with_fin`]
    /// for intermediate fragments.
    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Continuation, payload)
    }

    /// Creates a ping frame with an optional payload.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, payload)
    }

    /// Creates a pong frame, typically echoing the payload of a ping.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, payload)
    }

    /// Creates a close frame carrying a status code and a UTF-8 reason.
    pub fn close(code: ErrorCode, reason: impl AsRef<[u8]>) -> Self {
        let reason = reason.as_ref();
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&u16::from(code).to_be_bytes());
        payload.extend_from_slice(reason);
        Self::new(true, OpCode::Close, payload)
    }

    /// Creates a close frame with a raw payload, without enforcing the
    /// code/reason structure.
    pub fn close_raw(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Close, payload)
    }

    /// Overrides the final-fragment flag.
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Attaches a masking key. The payload itself stays unmasked; the codec
    /// applies the key while writing the frame to the transport.
    pub fn with_mask(mut self, key: [u8; 4]) -> Self {
        self.mask = Some(key);
        self
    }

    /// Whether the frame carries a masking key.
    #[inline(always)]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// The masking key, if any.
    #[inline(always)]
    pub fn mask_key(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Extracts the close code from a close frame's payload.
    ///
    /// Returns `None` if the payload is too short to contain a code or the
    /// code is outside the known set.
    pub fn close_code(&self) -> Option<ErrorCode> {
        let raw = u16::from_be_bytes(self.payload.get(0..2)?.try_into().ok()?);
        ErrorCode::try_from(raw).ok()
    }

    /// Extracts the UTF-8 reason following the close code, if present and
    /// valid.
    pub fn close_reason(&self) -> Option<&str> {
        std::str::from_utf8(self.payload.get(2..)?).ok()
    }

    /// Formats the frame header into `head` and returns the number of bytes
    /// written (2 to [`MAX_HEAD_SIZE`]).
    ///
    /// # Panics
    /// Panics if `head` is smaller than [`MAX_HEAD_SIZE`].
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7
            | (self.rsv1 as u8) << 6
            | (self.rsv2 as u8) << 5
            | (self.rsv3 as u8) << 4
            | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}
