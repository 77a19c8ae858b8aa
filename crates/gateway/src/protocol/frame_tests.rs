// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::protocol::MessageKind;

fn msg(content: &str) -> Message {
    Message::new(MessageKind::ChatStream, serde_json::json!({ "content": content }))
}

#[test]
fn round_trip_single() -> anyhow::Result<()> {
    let codec = FrameCodec;
    let original = msg("hello");
    let frame = codec.encode(&original)?;

    assert_eq!(frame[0] & FLAG_BATCH, 0);
    let decoded = codec.decode(&frame)?;
    assert_eq!(decoded, vec![original]);
    Ok(())
}

#[test]
fn round_trip_batch() -> anyhow::Result<()> {
    let codec = FrameCodec;
    let msgs = vec![msg("one"), msg("two"), msg("three")];
    let frame = codec.encode_batch(&msgs)?;

    assert_eq!(frame[0] & FLAG_BATCH, FLAG_BATCH);
    let decoded = codec.decode(&frame)?;
    assert_eq!(decoded, msgs);
    Ok(())
}

#[test]
fn small_payloads_never_compressed() -> anyhow::Result<()> {
    let codec = FrameCodec;
    let frame = codec.encode(&msg("tiny"))?;
    assert_eq!(frame[0] & FLAG_COMPRESSED, 0);
    Ok(())
}

#[test]
fn large_compressible_payload_is_compressed() -> anyhow::Result<()> {
    let codec = FrameCodec;
    // Highly repetitive content well past the 1 KiB threshold.
    let original = msg(&"abcdefgh".repeat(1024));
    let frame = codec.encode(&original)?;

    assert_eq!(frame[0] & FLAG_COMPRESSED, FLAG_COMPRESSED);
    let json_len = serde_json::to_vec(&original)?.len();
    assert!(frame.len() < json_len, "frame {} vs raw {json_len}", frame.len());

    let decoded = codec.decode(&frame)?;
    assert_eq!(decoded, vec![original]);
    Ok(())
}

#[test]
fn incompressible_payload_stays_raw() -> anyhow::Result<()> {
    let codec = FrameCodec;
    // Full-entropy bytes defeat deflate's 10% saving rule.
    let mut state = 0x2545f4914f6cdd1du64;
    let noise: Vec<u8> = (0..4096)
        .flat_map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            state.to_le_bytes()
        })
        .collect();
    let frame = codec.wrap(noise, 0)?;
    assert_eq!(frame[0] & FLAG_COMPRESSED, 0);
    Ok(())
}

#[test]
fn oversized_declared_length_rejected() -> anyhow::Result<()> {
    let codec = FrameCodec;
    let mut frame = vec![0u8];
    frame.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
    match codec.decode(&frame) {
        Err(GatewayError::FrameTooLarge(_)) => Ok(()),
        other => anyhow::bail!("expected FrameTooLarge, got {other:?}"),
    }
}

#[test]
fn truncated_payload_is_short_read() -> anyhow::Result<()> {
    let codec = FrameCodec;
    let mut frame = codec.encode(&msg("truncate me"))?;
    frame.truncate(frame.len() - 4);
    match codec.decode(&frame) {
        Err(GatewayError::ShortRead { .. }) => Ok(()),
        other => {
            anyhow::bail!("expected ShortRead, got {other:?}");
        }
    }
}

#[test]
fn header_only_is_short_read() -> anyhow::Result<()> {
    let codec = FrameCodec;
    match codec.decode(&[0, 0]) {
        Err(GatewayError::ShortRead { .. }) => Ok(()),
        other => anyhow::bail!("expected ShortRead, got {other:?}"),
    }
}

#[test]
fn nested_batch_rejected() -> anyhow::Result<()> {
    let codec = FrameCodec;
    // Hand-build a batch whose single entry is itself a batch frame.
    let inner = codec.encode_batch(&[msg("x")])?;
    let mut payload = Vec::new();
    payload.extend_from_slice(&(inner.len() as u32).to_be_bytes());
    payload.extend_from_slice(&inner);

    let mut frame = vec![FLAG_BATCH];
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);

    match codec.decode(&frame) {
        Err(GatewayError::NestedBatch) => Ok(()),
        other => anyhow::bail!("expected NestedBatch, got {other:?}"),
    }
}
