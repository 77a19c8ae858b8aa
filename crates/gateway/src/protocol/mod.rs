// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical message model shared by both wire renderings.
//!
//! The gateway accepts JSON text frames and length-prefixed binary frames
//! (see [`frame`]); both carry this one abstract [`Message`] shape.

pub mod frame;

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Closed enumeration of wire message kinds.
///
/// `file_*` and `git_*` kinds are reserved for forward compatibility; the
/// core routes them to a structured unsupported-operation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    ChatReply,
    ChatStream,
    ChatError,
    TerminalCreate,
    TerminalCreated,
    TerminalInput,
    TerminalOutput,
    TerminalResize,
    TerminalClose,
    TerminalError,
    TerminalList,
    FileOpen,
    FileSave,
    FileClose,
    FileChanged,
    FileSync,
    GitStatus,
    GitDiff,
    Ping,
    Pong,
    Ack,
    Reconnect,
    SessionStart,
    SessionEnd,
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::ChatReply => "chat_reply",
            Self::ChatStream => "chat_stream",
            Self::ChatError => "chat_error",
            Self::TerminalCreate => "terminal_create",
            Self::TerminalCreated => "terminal_created",
            Self::TerminalInput => "terminal_input",
            Self::TerminalOutput => "terminal_output",
            Self::TerminalResize => "terminal_resize",
            Self::TerminalClose => "terminal_close",
            Self::TerminalError => "terminal_error",
            Self::TerminalList => "terminal_list",
            Self::FileOpen => "file_open",
            Self::FileSave => "file_save",
            Self::FileClose => "file_close",
            Self::FileChanged => "file_changed",
            Self::FileSync => "file_sync",
            Self::GitStatus => "git_status",
            Self::GitDiff => "git_diff",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Ack => "ack",
            Self::Reconnect => "reconnect",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::Unknown => "unknown",
        }
    }

    /// Whether outbound messages of this kind are held in-flight until the
    /// client acks them (and therefore retried and replayed).
    ///
    /// `pong` and `ack` are fire-and-forget: retrying a stale pong or an ack
    /// of an ack would only generate noise after reconnect. Session
    /// lifecycle announcements travel outside the sequenced stream
    /// entirely (seq 0), so the first sequenced reply on a fresh
    /// connection is seq 1.
    pub fn tracked(&self) -> bool {
        !matches!(self, Self::Pong | Self::Ack | Self::SessionStart | Self::SessionEnd)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transport unit.
///
/// `seq` is assigned by the sender's queue at enqueue time; sequence numbers
/// from one peer are strictly increasing and gap-free within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub seq: u64,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_ack: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Message {
    /// Mint a new message with a fresh id and the current timestamp.
    pub fn new(kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            seq: 0,
            timestamp_ms: now_ms(),
            payload,
            requires_ack: kind.tracked(),
            retry_count: 0,
            correlation_id: None,
        }
    }

    /// Mint a new message, serializing a typed payload.
    pub fn with_payload<T: Serialize>(kind: MessageKind, payload: &T) -> anyhow::Result<Self> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Deserialize the opaque payload into a typed struct.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, GatewayError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| GatewayError::BadPayload(format!("{}: {e}", self.kind)))
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// -- Chat payloads ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(default = "default_role")]
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_role() -> String {
    "user".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamPayload {
    pub content: String,
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_edits: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatErrorPayload {
    pub message: String,
    pub code: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

// -- Terminal payloads --------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalCreatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
}

fn default_rows() -> u16 {
    24
}

fn default_cols() -> u16 {
    80
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalCreatedPayload {
    pub terminal_id: String,
    pub rows: u16,
    pub cols: u16,
}

/// `terminal_input` / `terminal_output`: `data` is base64-encoded raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalIoPayload {
    pub terminal_id: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalResizePayload {
    pub terminal_id: String,
    pub rows: u16,
    pub cols: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_width: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_height: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalClosePayload {
    pub terminal_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalListPayload {
    pub terminal_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,
    pub message: String,
    pub code: String,
}

// -- Control payloads ---------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_time_ms: Option<u64>,
    #[serde(default)]
    pub metrics: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_time_ms: Option<u64>,
    pub server_time_ms: u64,
    #[serde(default)]
    pub metrics: HashMap<String, serde_json::Value>,
}

/// `seq_num` is carried for client symmetry; the gateway keys in-flight
/// entries by `message_id` only and never reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_num: Option<u64>,
    #[serde(default = "default_true")]
    pub success: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPayload {
    pub session_id: String,
    #[serde(default)]
    pub last_seq_num: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEndPayload {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
