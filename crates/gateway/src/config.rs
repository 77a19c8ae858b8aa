// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::assistant::AssistantConfig;
use crate::session::{BatchSettings, RuntimeSettings};
use crate::terminal::TerminalLimits;

/// Connection gateway multiplexing AI chat, PTY terminals, and control
/// over one WebSocket with a mobile client.
#[derive(Debug, Clone, Parser)]
#[command(name = "tether", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "TETHER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP/WebSocket port to listen on (0 picks an ephemeral port).
    #[arg(long, env = "TETHER_PORT", default_value = "8737")]
    pub port: u16,

    /// Token required as `?token=` on the WebSocket upgrade.
    #[arg(long, env = "TETHER_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Directory for per-session conversation snapshots.
    #[arg(long, env = "TETHER_DATA_DIR", default_value = ".tether")]
    pub data_dir: PathBuf,

    /// Project root watched for file changes; unset disables watching.
    #[arg(long, env = "TETHER_WATCH_ROOT")]
    pub watch_root: Option<PathBuf>,

    /// Shell spawned for new terminals.
    #[arg(long, env = "TETHER_SHELL", default_value = "/bin/bash")]
    pub shell: String,

    /// Maximum concurrent terminals per session.
    #[arg(long, env = "TETHER_MAX_TERMINALS", default_value = "12")]
    pub max_terminals: usize,

    /// Seconds of terminal inactivity before the idle reaper closes it.
    #[arg(long, env = "TETHER_TERMINAL_IDLE_SECS", default_value = "1800")]
    pub terminal_idle_secs: u64,

    /// Seconds between terminal cleanup sweeps.
    #[arg(long, env = "TETHER_SWEEP_SECS", default_value = "300")]
    pub sweep_secs: u64,

    /// Transport read deadline in seconds.
    #[arg(long, env = "TETHER_READ_TIMEOUT_SECS", default_value = "60")]
    pub read_timeout_secs: u64,

    /// Transport write deadline in seconds.
    #[arg(long, env = "TETHER_WRITE_TIMEOUT_SECS", default_value = "10")]
    pub write_timeout_secs: u64,

    /// Seconds between idle transport pings.
    #[arg(long, env = "TETHER_PING_SECS", default_value = "30")]
    pub ping_secs: u64,

    /// Seconds between retry scans of the in-flight map.
    #[arg(long, env = "TETHER_RETRY_SCAN_SECS", default_value = "5")]
    pub retry_scan_secs: u64,

    /// Seconds an unacked message waits before a resend.
    #[arg(long, env = "TETHER_RETRY_TIMEOUT_SECS", default_value = "30")]
    pub retry_timeout_secs: u64,

    /// Resend attempts before an unacked message is dropped.
    #[arg(long, env = "TETHER_RETRY_CAP", default_value = "3")]
    pub retry_cap: u32,

    /// Outbound queue capacity before oldest-eviction.
    #[arg(long, env = "TETHER_QUEUE_CAPACITY", default_value = "1000")]
    pub queue_capacity: usize,

    /// Batch outbound binary frames.
    #[arg(long, env = "TETHER_BATCH")]
    pub batch: bool,

    /// Messages per batch frame.
    #[arg(long, env = "TETHER_BATCH_SIZE", default_value = "16")]
    pub batch_size: usize,

    /// Milliseconds to wait for a batch to fill.
    #[arg(long, env = "TETHER_BATCH_WINDOW_MS", default_value = "50")]
    pub batch_window_ms: u64,

    /// Seconds a detached session is retained for reconnect replay.
    #[arg(long, env = "TETHER_SESSION_RETENTION_SECS", default_value = "300")]
    pub session_retention_secs: u64,

    /// Assistant binary.
    #[arg(long = "assistant", env = "TETHER_ASSISTANT", default_value = "aider")]
    pub assistant_command: String,

    /// Model name passed to the assistant.
    #[arg(long, env = "TETHER_ASSISTANT_MODEL")]
    pub assistant_model: Option<String>,

    /// Edit format passed to the assistant.
    #[arg(long, env = "TETHER_EDIT_FORMAT", default_value = "diff")]
    pub edit_format: String,

    /// Let the assistant commit its own edits.
    #[arg(long, env = "TETHER_AUTO_COMMIT")]
    pub auto_commit: bool,

    /// Repo-map token budget passed to the assistant.
    #[arg(long, env = "TETHER_MAP_TOKENS", default_value = "1024")]
    pub map_tokens: u32,

    /// Files attached to the assistant at launch (repeatable).
    #[arg(long = "assistant-file", env = "TETHER_ASSISTANT_FILES", value_delimiter = ',')]
    pub assistant_files: Vec<String>,

    /// Read-only files attached to the assistant (repeatable).
    #[arg(long = "assistant-read-only", env = "TETHER_ASSISTANT_READ_ONLY", value_delimiter = ',')]
    pub assistant_read_only: Vec<String>,

    /// Seconds to wait for the assistant's first prompt.
    #[arg(long, env = "TETHER_INIT_TIMEOUT_SECS", default_value = "30")]
    pub init_timeout_secs: u64,

    /// Seconds to wait for a complete chat reply.
    #[arg(long, env = "TETHER_CHAT_TIMEOUT_SECS", default_value = "120")]
    pub chat_timeout_secs: u64,

    /// Log format (json or text).
    #[arg(long, env = "TETHER_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TETHER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.shell.trim().is_empty() {
            anyhow::bail!("--shell must not be empty");
        }
        if self.max_terminals == 0 {
            anyhow::bail!("--max-terminals must be at least 1");
        }
        if self.batch && self.batch_size == 0 {
            anyhow::bail!("--batch-size must be at least 1");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("--queue-capacity must be at least 1");
        }
        if self.assistant_command.trim().is_empty() {
            anyhow::bail!("--assistant must not be empty");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    /// Resolve the per-session runtime settings.
    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            data_dir: self.data_dir.clone(),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            ping_interval: Duration::from_secs(self.ping_secs),
            retry_interval: Duration::from_secs(self.retry_scan_secs),
            batch: self.batch.then(|| BatchSettings {
                size: self.batch_size,
                window: Duration::from_millis(self.batch_window_ms),
            }),
            queue_capacity: self.queue_capacity,
            retry_timeout: Duration::from_secs(self.retry_timeout_secs),
            retry_cap: self.retry_cap,
            terminal: TerminalLimits {
                shell: vec![self.shell.clone()],
                max_terminals: self.max_terminals,
                idle_timeout: Duration::from_secs(self.terminal_idle_secs),
                sweep_interval: Duration::from_secs(self.sweep_secs),
            },
            assistant: AssistantConfig {
                command: self.assistant_command.clone(),
                model: self.assistant_model.clone(),
                edit_format: self.edit_format.clone(),
                auto_commit: self.auto_commit,
                map_tokens: self.map_tokens,
                files: self.assistant_files.clone(),
                read_only_files: self.assistant_read_only.clone(),
                workdir: self.watch_root.clone(),
                rows: 40,
                cols: 120,
                init_timeout: Duration::from_secs(self.init_timeout_secs),
                chat_timeout: Duration::from_secs(self.chat_timeout_secs),
            },
            watch_root: self.watch_root.clone(),
            session_retention: Duration::from_secs(self.session_retention_secs),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
