// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use thiserror::Error;

/// Typed failures produced inside the gateway core.
///
/// Everything that crosses into user-visible territory is one of these;
/// `anyhow` carries them (and incidental I/O context) between modules.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("frame of {0} bytes exceeds the 1 MiB limit")]
    FrameTooLarge(usize),

    #[error("frame truncated: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("batch frames cannot nest")]
    NestedBatch,

    #[error("malformed payload: {0}")]
    BadPayload(String),

    #[error("PTY allocation failed: {0}")]
    PtyAllocFailed(String),

    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("terminal write timed out")]
    WriteTimeout,

    #[error("terminal is not running")]
    NotRunning,

    #[error("terminal not found: {0}")]
    NotFound(String),

    #[error("terminal cap reached ({0})")]
    CapReached(usize),

    #[error("assistant did not print a prompt within {0:?}")]
    InitTimeout(Duration),

    #[error("chat response timed out")]
    ChatTimeout,

    #[error("assistant process exited unexpectedly: {0}")]
    ProcessExited(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Wire-format error code carried in `terminal_error` / `chat_error`
    /// payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::FrameTooLarge(_) => "FRAME_TOO_LARGE",
            Self::ShortRead { .. } => "SHORT_READ",
            Self::NestedBatch => "NESTED_BATCH",
            Self::BadPayload(_) => "BAD_PAYLOAD",
            Self::PtyAllocFailed(_) => "PTY_ALLOC_FAILED",
            Self::SpawnFailed(_) => "SPAWN_FAILED",
            Self::WriteTimeout => "WRITE_TIMEOUT",
            Self::NotRunning => "NOT_RUNNING",
            Self::NotFound(_) => "NOT_FOUND",
            Self::CapReached(_) => "CAP_REACHED",
            Self::InitTimeout(_) => "INIT_TIMEOUT",
            Self::ChatTimeout => "CHAT_TIMEOUT",
            Self::ProcessExited(_) => "PROCESS_EXITED",
            Self::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
