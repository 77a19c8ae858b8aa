// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-prefixed wire framing with optional compression and batching.
//!
//! Frame layout: `[1 byte flags][4 bytes big-endian length][payload]`.
//! Flag bit 0 = payload is deflate-compressed, bit 1 = payload is a batch
//! of `[4 bytes big-endian length][message]` entries.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::GatewayError;
use crate::protocol::Message;

/// Frames larger than this are rejected on both encode and decode.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Payloads below this size are never compressed.
pub const COMPRESS_THRESHOLD: usize = 1024;

pub const FLAG_COMPRESSED: u8 = 0b0000_0001;
pub const FLAG_BATCH: u8 = 0b0000_0010;

const HEADER_LEN: usize = 5;

/// Stateless frame codec.
///
/// Callers are expected to serialize writes on the underlying transport;
/// the codec itself holds no stream state.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a single message into a wire frame.
    pub fn encode(&self, msg: &Message) -> Result<Vec<u8>, GatewayError> {
        let payload =
            serde_json::to_vec(msg).map_err(|e| GatewayError::BadPayload(e.to_string()))?;
        self.wrap(payload, 0)
    }

    /// Encode a batch of messages into one frame.
    pub fn encode_batch(&self, msgs: &[Message]) -> Result<Vec<u8>, GatewayError> {
        let mut payload = Vec::new();
        for msg in msgs {
            let body =
                serde_json::to_vec(msg).map_err(|e| GatewayError::BadPayload(e.to_string()))?;
            payload.extend_from_slice(&(body.len() as u32).to_be_bytes());
            payload.extend_from_slice(&body);
        }
        self.wrap(payload, FLAG_BATCH)
    }

    /// Decode one frame into its messages (one, or many for a batch).
    pub fn decode(&self, frame: &[u8]) -> Result<Vec<Message>, GatewayError> {
        if frame.len() < HEADER_LEN {
            return Err(GatewayError::ShortRead { expected: HEADER_LEN, got: frame.len() });
        }
        let flags = frame[0];
        let declared =
            u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        if declared > MAX_FRAME_LEN {
            return Err(GatewayError::FrameTooLarge(declared));
        }
        let body = frame
            .get(HEADER_LEN..HEADER_LEN + declared)
            .ok_or(GatewayError::ShortRead { expected: declared, got: frame.len() - HEADER_LEN })?;

        let payload = if flags & FLAG_COMPRESSED != 0 {
            inflate(body)?
        } else {
            body.to_vec()
        };

        if flags & FLAG_BATCH != 0 {
            unpack_batch(&payload)
        } else {
            let msg = serde_json::from_slice(&payload)
                .map_err(|e| GatewayError::BadPayload(e.to_string()))?;
            Ok(vec![msg])
        }
    }

    /// Serialize, compress above the threshold when it pays, and frame.
    fn wrap(&self, payload: Vec<u8>, mut flags: u8) -> Result<Vec<u8>, GatewayError> {
        let body = if payload.len() >= COMPRESS_THRESHOLD {
            let compressed = deflate(&payload)?;
            // Keep the compressed form only when it saves at least 10%.
            if compressed.len() * 10 <= payload.len() * 9 {
                flags |= FLAG_COMPRESSED;
                compressed
            } else {
                payload
            }
        } else {
            payload
        };

        if body.len() > MAX_FRAME_LEN {
            return Err(GatewayError::FrameTooLarge(body.len()));
        }

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.push(flags);
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, GatewayError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data).map_err(GatewayError::Io)?;
    encoder.finish().map_err(GatewayError::Io)
}

/// Inflate with a hard output bound so a malicious frame cannot balloon
/// past the frame limit.
fn inflate(data: &[u8]) -> Result<Vec<u8>, GatewayError> {
    let mut out = Vec::new();
    let mut decoder = DeflateDecoder::new(data).take(MAX_FRAME_LEN as u64 + 1);
    decoder.read_to_end(&mut out).map_err(GatewayError::Io)?;
    if out.len() > MAX_FRAME_LEN {
        return Err(GatewayError::FrameTooLarge(out.len()));
    }
    Ok(out)
}

/// Split a batch payload into its messages.
///
/// Entries are JSON messages, never frames, so a nested batch cannot be
/// expressed; an entry that looks like a frame header instead of JSON is
/// reported as [`GatewayError::NestedBatch`].
fn unpack_batch(payload: &[u8]) -> Result<Vec<Message>, GatewayError> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < payload.len() {
        let len_bytes = payload
            .get(offset..offset + 4)
            .ok_or(GatewayError::ShortRead { expected: 4, got: payload.len() - offset })?;
        let len =
            u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        offset += 4;
        let entry = payload
            .get(offset..offset + len)
            .ok_or(GatewayError::ShortRead { expected: len, got: payload.len() - offset })?;
        offset += len;

        // JSON never starts with a control byte, so an entry whose first
        // byte is a valid flags field carrying the batch bit is a frame.
        if entry
            .first()
            .is_some_and(|b| *b & FLAG_BATCH != 0 && *b <= (FLAG_COMPRESSED | FLAG_BATCH))
        {
            return Err(GatewayError::NestedBatch);
        }
        let msg = serde_json::from_slice::<Message>(entry)
            .map_err(|e| GatewayError::BadPayload(e.to_string()))?;
        out.push(msg);
    }
    Ok(out)
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
