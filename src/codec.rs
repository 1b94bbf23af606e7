//! # Frame codec
//!
//! Binary serialization of a single WebSocket frame to a transport and back.
//!
//! [`write_frame`] and [`read_frame`] implement the wire layout of
//! [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2):
//! 2-byte header, optional 2/8-byte extended length, optional 4-byte masking
//! key, payload. Masked payloads are XOR'd against the key while streaming in
//! bounded chunks, so encoding a large frame never allocates a copy of its
//! payload.
//!
//! Decoding validates as it goes and reports violations as protocol errors
//! carrying an [`ErrorCode`]: fragmented control frames and oversized control
//! payloads, reserved header bits without a negotiated extension, and payload
//! lengths the platform cannot represent. A transport that delivers fewer
//! bytes than a frame field requires is itself a contract violation and fails
//! the read.

use bytes::Bytes;

use crate::{
    code::ErrorCode,
    frame::{Frame, OpCode, MAX_HEAD_SIZE},
    mask::apply_mask,
    transport::{TransportReader, TransportWriter},
    Result, WebSocketError,
};

/// Masked payload bytes are streamed through a scratch buffer of this size.
/// A multiple of 4 keeps the masking-key phase aligned across chunks.
const MASK_CHUNK: usize = 4096;

/// Writes exactly one frame to the transport.
///
/// Control frames are validated first: a control frame with `fin` unset or a
/// payload over 125 bytes never reaches the wire.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: TransportWriter + ?Sized,
{
    if frame.opcode.is_control() {
        if !frame.fin {
            return Err(WebSocketError::protocol_msg(
                ErrorCode::CloseInvalidData,
                "fragmented control frame",
            ));
        }
        if frame.payload.len() > 125 {
            return Err(WebSocketError::protocol_msg(
                ErrorCode::CloseInconsistentData,
                "control frame payload exceeds 125 bytes",
            ));
        }
    }

    let mut head = [0u8; MAX_HEAD_SIZE];
    let size = frame.fmt_head(&mut head);
    writer.write_all(&head[..size]).await?;

    match frame.mask_key() {
        Some(key) => {
            // Mask while streaming so large payloads are never copied whole.
            let payload = &frame.payload;
            let mut chunk = [0u8; MASK_CHUNK];
            let mut offset = 0;
            while offset < payload.len() {
                let len = (payload.len() - offset).min(MASK_CHUNK);
                chunk[..len].copy_from_slice(&payload[offset..offset + len]);
                apply_mask(&mut chunk[..len], key);
                writer.write_all(&chunk[..len]).await?;
                offset += len;
            }
        }
        None if frame.payload.is_empty() => {}
        None => writer.write_all(&frame.payload).await?,
    }

    Ok(())
}

/// Reads exactly one frame from the transport.
///
/// The decoded frame's payload is already unmasked; the masking key, if one
/// was present on the wire, stays attached to the frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: TransportReader + ?Sized,
{
    let mut head = [0u8; 2];
    reader
        .read_exact(&mut head)
        .await
        .map_err(|err| map_read_error(err, true))?;

    let fin = head[0] & 0x80 != 0;
    let rsv1 = head[0] & 0x40 != 0;
    let rsv2 = head[0] & 0x20 != 0;
    let rsv3 = head[0] & 0x10 != 0;
    let opcode = OpCode::try_from(head[0] & 0x0F)?;

    if opcode.is_control() && !fin {
        return Err(WebSocketError::protocol_msg(
            ErrorCode::CloseInvalidData,
            "fragmented control frame",
        ));
    }
    if rsv1 && !opcode.is_data() {
        return Err(WebSocketError::protocol_msg(
            ErrorCode::CloseInvalidData,
            "compressed non-data frame",
        ));
    }
    // No extension is ever negotiated by this engine, so a reserved bit on
    // any frame is invalid.
    if rsv1 || rsv2 || rsv3 {
        return Err(WebSocketError::protocol_msg(
            ErrorCode::CloseProtocolError,
            "reserved bits set without a negotiated extension",
        ));
    }

    let masked = head[1] & 0x80 != 0;
    let length_code = head[1] & 0x7F;

    if opcode.is_control() && length_code > 125 {
        return Err(WebSocketError::protocol_msg(
            ErrorCode::CloseInconsistentData,
            "control frame payload exceeds 125 bytes",
        ));
    }

    let payload_len: usize = match length_code {
        126 => {
            let mut ext = [0u8; 2];
            reader
                .read_exact(&mut ext)
                .await
                .map_err(|err| map_read_error(err, false))?;
            u16::from_be_bytes(ext) as usize
        }
        127 => {
            let mut ext = [0u8; 8];
            reader
                .read_exact(&mut ext)
                .await
                .map_err(|err| map_read_error(err, false))?;
            usize::try_from(u64::from_be_bytes(ext))
                .map_err(|_| WebSocketError::protocol(ErrorCode::CloseMessageTooBig))?
        }
        value => usize::from(value),
    };

    let mask = if masked {
        let mut key = [0u8; 4];
        reader
            .read_exact(&mut key)
            .await
            .map_err(|err| map_read_error(err, false))?;
        Some(key)
    } else {
        None
    };

    let payload = if payload_len > 0 {
        let mut payload = vec![0u8; payload_len];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|err| map_read_error(err, false))?;
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }
        Bytes::from(payload)
    } else {
        Bytes::new()
    };

    let mut frame = Frame::new(fin, opcode, payload);
    if let Some(key) = mask {
        frame = frame.with_mask(key);
    }
    Ok(frame)
}

/// Classifies transport read failures. End-of-stream on the first header byte
/// means the peer vanished between frames; anywhere later the stream died
/// mid-frame, which is a framing contract violation.
fn map_read_error(err: std::io::Error, at_frame_boundary: bool) -> WebSocketError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        if at_frame_boundary {
            WebSocketError::protocol(ErrorCode::CloseNoCloseReceived)
        } else {
            WebSocketError::protocol_msg(ErrorCode::CloseInvalidData, "transport closed mid-frame")
        }
    } else {
        err.into()
    }
}
