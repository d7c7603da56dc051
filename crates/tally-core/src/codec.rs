//! Length-prefixed CBOR framing.
//!
//! Wire format: `[4-byte big-endian length][CBOR payload]`

use crate::error::{TallyError, TallyResult};
use std::io::Cursor;

/// Largest payload accepted from the wire (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Encode a serializable value into a length-prefixed CBOR frame.
pub fn frame_encode<T: serde::Serialize>(value: &T) -> TallyResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(TallyError::Codec(format!(
            "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
            payload.len()
        )));
    }

    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend(payload);
    Ok(frame)
}

/// Decode a CBOR payload (without length prefix) into a typed value.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> TallyResult<T> {
    let cursor = Cursor::new(data);
    let value: T = ciborium::from_reader(cursor)?;
    Ok(value)
}

/// Streaming frame decoder: accumulates bytes and yields complete messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed bytes into the decoder and return all complete decoded messages.
    ///
    /// A frame header announcing more than [`MAX_FRAME_SIZE`] bytes is an
    /// error; the stream cannot be resynchronised after it.
    pub fn feed<T: serde::de::DeserializeOwned>(&mut self, data: &[u8]) -> TallyResult<Vec<T>> {
        self.buffer.extend_from_slice(data);
        let mut messages = Vec::new();

        while let Some(len) = self.next_len()? {
            if self.buffer.len() < 4 + len {
                break;
            }
            let msg: T = cbor_decode(&self.buffer[4..4 + len])?;
            messages.push(msg);
            self.buffer.drain(..4 + len);
        }

        Ok(messages)
    }

    /// Reset internal buffer.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes remaining in the internal buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn next_len(&self) -> TallyResult<Option<usize>> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let len =
            u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                as usize;
        if len > MAX_FRAME_SIZE {
            return Err(TallyError::InvalidMessage(format!(
                "frame too large: {len} bytes (max {MAX_FRAME_SIZE})"
            )));
        }
        Ok(Some(len))
    }
}
