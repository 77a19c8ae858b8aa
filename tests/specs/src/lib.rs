// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `tether` binary as a subprocess and exercises it over
//! its WebSocket transport.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use tether::protocol::{Message, MessageKind};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve the path to the compiled `tether` binary.
pub fn tether_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("tether")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running gateway process plus its scratch directory.
pub struct TetherProcess {
    child: Child,
    port: u16,
    pub dir: tempfile::TempDir,
}

impl TetherProcess {
    /// Start the gateway with sensible test defaults plus `extra_args`.
    pub fn start(extra_args: &[&str]) -> anyhow::Result<Self> {
        let port = free_port()?;
        let dir = tempfile::tempdir()?;
        let data_dir = dir.path().join("data");

        let child = Command::new(tether_binary())
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .arg("--data-dir")
            .arg(&data_dir)
            .arg("--shell")
            .arg("/bin/sh")
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, port, dir })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Connect a WebSocket client, retrying until the server is up.
    pub async fn connect(&self) -> anyhow::Result<WsClient> {
        self.connect_with(None).await
    }

    /// Connect with extra query parameters (e.g. `format=binary`).
    pub async fn connect_with(&self, query: Option<&str>) -> anyhow::Result<WsClient> {
        let url = match query {
            Some(q) => format!("{}?{q}", self.ws_url()),
            None => self.ws_url(),
        };
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            match tokio_tungstenite::connect_async(&url).await {
                Ok((ws, _)) => return Ok(ws),
                Err(e) => {
                    if tokio::time::Instant::now() > deadline {
                        anyhow::bail!("gateway never came up: {e}");
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
}

impl Drop for TetherProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Send one message as a JSON text frame.
pub async fn send_json(ws: &mut WsClient, msg: &Message) -> anyhow::Result<()> {
    let text = serde_json::to_string(msg)?;
    ws.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

/// Receive the next JSON message, skipping transport control frames.
pub async fn recv_json(ws: &mut WsClient) -> anyhow::Result<Message> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .ok_or_else(|| anyhow::anyhow!("timed out waiting for a message"))?;
        let frame = tokio::time::timeout(remaining, ws.next())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for a message"))?
            .ok_or_else(|| anyhow::anyhow!("connection closed"))?;
        match frame? {
            WsMessage::Text(text) => return Ok(serde_json::from_str(&text)?),
            _ => continue,
        }
    }
}

/// Receive messages until one of the wanted kind arrives.
pub async fn recv_kind(ws: &mut WsClient, kind: MessageKind) -> anyhow::Result<Message> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("never received a {kind} message");
        }
        let msg = recv_json(ws).await?;
        if msg.kind == kind {
            return Ok(msg);
        }
    }
}

/// Write an executable stub assistant that replies to every input line
/// with three flushable tokens and a fresh prompt.
pub fn write_stub_assistant(dir: &Path) -> anyhow::Result<PathBuf> {
    let path = dir.join("stub-assistant");
    let script = r#"#!/bin/sh
printf '> '
while IFS= read -r line; do
  echo "Hello"
  echo ""
  echo " world"
  echo ""
  echo "."
  printf '> '
done
"#;
    std::fs::write(&path, script)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}
