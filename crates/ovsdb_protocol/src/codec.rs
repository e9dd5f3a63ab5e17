//! Length-prefixed CBOR framing for stream transports.
//!
//! Each frame is a 4-byte big-endian payload length followed by the CBOR
//! encoding of one message.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Size of the frame length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default upper bound on a frame payload.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encodes one message as a complete frame.
pub fn encode_frame<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::ser::into_writer(message, &mut payload)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;

    let len = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::Encode(format!("payload of {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Incremental frame decoder.
///
/// Bytes are appended as they arrive; complete frames are decoded in order.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Creates a decoder that rejects frames above `max_frame_size`.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size,
        }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the number of buffered, not yet decoded bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if a complete frame is buffered.
    pub fn has_frame(&self) -> ProtocolResult<bool> {
        Ok(match self.payload_len()? {
            Some(len) => self.buffer.len() >= FRAME_HEADER_LEN + len,
            None => false,
        })
    }

    /// Decodes the next complete frame, if any.
    pub fn next_frame<T: DeserializeOwned>(&mut self) -> ProtocolResult<Option<T>> {
        let Some(len) = self.payload_len()? else {
            return Ok(None);
        };
        let end = FRAME_HEADER_LEN + len;
        if self.buffer.len() < end {
            return Ok(None);
        }

        let message = ciborium::de::from_reader(&self.buffer[FRAME_HEADER_LEN..end])
            .map_err(|e| ProtocolError::Decode(e.to_string()));
        self.buffer.drain(..end);
        message.map(Some)
    }

    fn payload_len(&self) -> ProtocolResult<Option<usize>> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&self.buffer[..FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        Ok(Some(len))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}
