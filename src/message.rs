//! # Message
//!
//! A logical WebSocket message assembled from one or more frames.
//!
//! The first frame fixes whether the message is text or binary; every later
//! frame arrives with [`OpCode::Continuation`](crate::frame::OpCode) and the
//! message is complete exactly when the most recently appended frame carries
//! `fin`. Completion is defined solely by that bit — the reassembler never
//! inspects opcodes beyond the first frame's type.

use bytes::{Bytes, BytesMut};

use crate::{
    frame::{Frame, OpCode},
    Result, WebSocketError,
};

/// An ordered, append-only sequence of frames forming one logical payload.
#[derive(Debug, Clone, Default)]
pub struct Message {
    frames: Vec<Frame>,
}

impl Message {
    /// Creates an empty message awaiting its first frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames appended so far.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// The frames of the message, in arrival order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Whether the message was opened by a text frame.
    pub fn is_text(&self) -> bool {
        self.frames
            .first()
            .is_some_and(|frame| frame.opcode == OpCode::Text)
    }

    /// Whether the message was opened by a binary frame.
    pub fn is_binary(&self) -> bool {
        self.frames
            .first()
            .is_some_and(|frame| frame.opcode == OpCode::Binary)
    }

    /// Whether the last appended frame closed the message.
    pub fn is_complete(&self) -> bool {
        self.frames.last().is_some_and(|frame| frame.fin)
    }

    /// Appends a frame. Fails with [`WebSocketError::MessageComplete`] once
    /// the message is complete.
    pub fn add_frame(&mut self, frame: Frame) -> Result<()> {
        if self.is_complete() {
            return Err(WebSocketError::MessageComplete);
        }
        self.frames.push(frame);
        Ok(())
    }

    /// The message payload: all frame payloads concatenated in frame order.
    /// A single-frame message is returned without copying.
    pub fn bytes(&self) -> Bytes {
        match self.frames.as_slice() {
            [] => Bytes::new(),
            [frame] => frame.payload.clone(),
            frames => {
                let total = frames.iter().map(|f| f.payload.len()).sum();
                let mut buf = BytesMut::with_capacity(total);
                for frame in frames {
                    buf.extend_from_slice(&frame.payload);
                }
                buf.freeze()
            }
        }
    }

    /// Decodes the concatenated payload as UTF-8 text.
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.bytes().to_vec()).map_err(|_| WebSocketError::InvalidUtf8)
    }
}
