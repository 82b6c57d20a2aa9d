//! Wire framing for the multiplexed audio channel.
//!
//! Audio frames are length-prefixed binary envelopes:
//!
//! ```text
//! [4-byte big-endian length][32-byte zero-padded session identity][chunk bytes]
//! ```
//!
//! The length field covers identity plus payload, so a reader can split the
//! two deterministically without a delimiter. Many sessions share one
//! channel; each frame carries the identity of the session that produced it,
//! and a receiver may discard frames for identities it no longer tracks
//! without corrupting any other session's stream.
//!
//! Status events travel on a separate plane as newline-delimited JSON
//! records (see [`crate::events::EngineEvent`]); helpers for that encoding
//! live here as well so both planes are defined in one place.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::events::EngineEvent;

/// Fixed width of the session identity field in every audio frame.
pub const SESSION_ID_WIDTH: usize = 32;

/// Size of the big-endian length prefix.
pub const LEN_PREFIX_WIDTH: usize = 4;

/// Upper bound on a single frame's declared length (identity + payload).
///
/// Frames are audio chunks of a few KiB; anything near this limit means a
/// corrupt or hostile stream and the connection should be dropped.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Framing errors
#[derive(Error, Debug)]
pub enum FrameError {
    /// Session identity longer than the fixed field width
    #[error("session identity too long: {0} bytes (max {SESSION_ID_WIDTH})")]
    IdentityTooLong(usize),

    /// Session identity contains a NUL byte (reserved for padding)
    #[error("session identity contains NUL byte")]
    IdentityHasNul,

    /// Declared frame length below the identity width
    #[error("frame length {0} shorter than identity field")]
    LengthTooShort(usize),

    /// Declared frame length above [`MAX_FRAME_LEN`]
    #[error("frame length {0} exceeds maximum {MAX_FRAME_LEN}")]
    FrameTooLarge(usize),

    /// Identity field is not valid UTF-8
    #[error("session identity is not valid UTF-8")]
    IdentityNotUtf8,

    /// Buffer ended mid-frame (whole-buffer decode only)
    #[error("truncated frame: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    /// Event record could not be serialized or parsed
    #[error("event record error: {0}")]
    EventRecord(#[from] serde_json::Error),
}

/// Encode one audio frame for `session_id` carrying `chunk`.
///
/// Returns a single contiguous buffer; writing it with one call is what
/// keeps frame writes atomic with respect to other sessions.
pub fn encode_frame(session_id: &str, chunk: &[u8]) -> Result<Bytes, FrameError> {
    let id = session_id.as_bytes();
    if id.len() > SESSION_ID_WIDTH {
        return Err(FrameError::IdentityTooLong(id.len()));
    }
    if id.contains(&0) {
        return Err(FrameError::IdentityHasNul);
    }
    let body_len = SESSION_ID_WIDTH + chunk.len();
    if body_len > MAX_FRAME_LEN {
        return Err(FrameError::FrameTooLarge(body_len));
    }

    let mut buf = BytesMut::with_capacity(LEN_PREFIX_WIDTH + body_len);
    buf.put_u32(body_len as u32);
    buf.put_slice(id);
    buf.put_bytes(0, SESSION_ID_WIDTH - id.len());
    buf.put_slice(chunk);
    Ok(buf.freeze())
}

/// Decode one complete frame from `buf`.
///
/// Convenience for tests and single-frame readers; streaming consumers
/// should use [`FrameDecoder`], which handles frames split across reads.
pub fn decode_frame(buf: &[u8]) -> Result<(String, Bytes), FrameError> {
    let mut decoder = FrameDecoder::new();
    decoder.feed(buf);
    match decoder.next_frame()? {
        Some(frame) => Ok(frame),
        None => Err(FrameError::Truncated {
            needed: decoder.needed().unwrap_or(LEN_PREFIX_WIDTH),
            have: buf.len(),
        }),
    }
}

/// Incremental audio-frame decoder.
///
/// Feed raw socket reads in with [`feed`](Self::feed), then drain complete
/// frames with [`next_frame`](Self::next_frame). Partial frames are retained
/// across calls.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the wire.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes still required to complete the frame currently being read,
    /// or None if even the length prefix is incomplete.
    pub fn needed(&self) -> Option<usize> {
        if self.buf.len() < LEN_PREFIX_WIDTH {
            return None;
        }
        let body_len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        let total = LEN_PREFIX_WIDTH + body_len;
        Some(total.saturating_sub(self.buf.len()))
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when more input is needed. A framing error is
    /// unrecoverable for the connection: the caller should drop it.
    pub fn next_frame(&mut self) -> Result<Option<(String, Bytes)>, FrameError> {
        if self.buf.len() < LEN_PREFIX_WIDTH {
            return Ok(None);
        }
        let body_len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if body_len < SESSION_ID_WIDTH {
            return Err(FrameError::LengthTooShort(body_len));
        }
        if body_len > MAX_FRAME_LEN {
            return Err(FrameError::FrameTooLarge(body_len));
        }
        if self.buf.len() < LEN_PREFIX_WIDTH + body_len {
            return Ok(None);
        }

        self.buf.advance(LEN_PREFIX_WIDTH);
        let mut body = self.buf.split_to(body_len);
        let id_field = body.split_to(SESSION_ID_WIDTH);

        // Identity is zero-padded on the right; trim the padding.
        let id_len = id_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SESSION_ID_WIDTH);
        let session_id = std::str::from_utf8(&id_field[..id_len])
            .map_err(|_| FrameError::IdentityNotUtf8)?
            .to_string();

        Ok(Some((session_id, body.freeze())))
    }
}

/// Encode a status event as one newline-terminated JSON record.
pub fn encode_event_record(event: &EngineEvent) -> Result<Vec<u8>, FrameError> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    Ok(line)
}

/// Parse one event record line (without or with its trailing newline).
pub fn decode_event_record(line: &str) -> Result<EngineEvent, FrameError> {
    Ok(serde_json::from_str(line.trim_end())?)
}

// ========================================
// Tests
// ========================================
