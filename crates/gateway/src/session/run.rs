// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection runtime: read / write / retry / batch pumps and the
//! inbound message router.
//!
//! All outbound traffic funnels through one batch pump (which owns queue
//! sequencing) into one write pump (which owns the socket sink), so the
//! wire order always matches queue order. Producers (chat forwarders,
//! terminal fan-outs, the retry pump, replay) only ever touch the
//! outbound channel.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use base64::Engine;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::protocol::frame::FrameCodec;
use crate::protocol::{
    now_ms, AckPayload, ChatErrorPayload, ChatPayload, ChatStreamPayload, Message, MessageKind,
    PingPayload, PongPayload, ReconnectPayload, SessionEndPayload, SessionStartPayload,
    TerminalClosePayload, TerminalCreatePayload, TerminalCreatedPayload, TerminalIoPayload,
    TerminalListPayload, TerminalResizePayload,
};
use crate::recover::{classify, ClassifiedError};
use crate::session::{BatchSettings, RuntimeSettings, SessionCore, SessionRegistry};
use crate::terminal::TerminalSession;

const OUTBOUND_CAPACITY: usize = 256;
const WRITE_CHANNEL_CAPACITY: usize = 8;
const SHUTDOWN_DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Which rendering of the message model this client negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Json,
    Binary,
}

/// Outbound queue discipline: fresh messages need a sequence number,
/// retries and replays already carry theirs, and control announcements
/// (session lifecycle) bypass the queue with seq 0 so they never shift
/// the sequence of substantive replies.
enum Outbound {
    Fresh(Message),
    Resend(Message),
    Control(Message),
}

/// Handles shared by the router and every producer task.
#[derive(Clone)]
struct Conn {
    core: Arc<SessionCore>,
    outbound_tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

impl Conn {
    /// Enqueue a fresh outbound message. Blocks under backpressure while
    /// the connection lives; drops silently once it is cancelled.
    async fn send(&self, msg: Message) {
        let _ = self.outbound_tx.send(Outbound::Fresh(msg)).await;
    }

    async fn resend(&self, msg: Message) {
        let _ = self.outbound_tx.send(Outbound::Resend(msg)).await;
    }

    /// Send an unsequenced control announcement (seq stays 0).
    async fn send_control(&self, msg: Message) {
        let _ = self.outbound_tx.send(Outbound::Control(msg)).await;
    }
}

/// Drive one accepted WebSocket until it closes.
///
/// The first inbound message decides resumption: a `reconnect` naming a
/// retained session adopts that session's core; anything else runs on a
/// fresh core announced via `session_start`.
pub async fn run_connection(
    socket: WebSocket,
    format: WireFormat,
    registry: Arc<SessionRegistry>,
    settings: Arc<RuntimeSettings>,
    shutdown: CancellationToken,
) {
    let codec = FrameCodec;
    let (ws_tx, mut ws_rx) = socket.split();

    // First message (or silence until the read deadline) picks the core.
    let first = match tokio::time::timeout(settings.read_timeout, ws_rx.next()).await {
        Ok(Some(Ok(frame))) => decode_inbound(frame, &codec),
        Ok(Some(Err(e))) => {
            debug!("connection dropped before handshake: {e}");
            return;
        }
        Ok(None) => return,
        Err(_) => {
            debug!("no traffic before read deadline, closing");
            return;
        }
    };

    let mut leftover: Vec<Message> = Vec::new();
    let mut resume_from: Option<u64> = None;

    let core = match first.first().map(|m| m.kind) {
        Some(MessageKind::Reconnect) => {
            let payload = first
                .first()
                .and_then(|m| m.decode_payload::<ReconnectPayload>().ok());
            match payload {
                Some(p) => match registry.attach(&p.session_id).await {
                    Some(adopted) => {
                        info!(session = %adopted.id, last_seq = p.last_seq_num, "session resumed");
                        resume_from = Some(p.last_seq_num);
                        leftover.extend(first.into_iter().skip(1));
                        adopted
                    }
                    // Unknown id: ignore the reconnect, hand out a fresh
                    // session. The client must start over.
                    None => {
                        debug!(requested = %p.session_id, "reconnect to unknown session ignored");
                        new_core(&registry, &settings).await
                    }
                },
                None => new_core(&registry, &settings).await,
            }
        }
        _ => {
            leftover = first;
            new_core(&registry, &settings).await
        }
    };

    let cancel = shutdown.child_token();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (write_tx, write_rx) = mpsc::channel(WRITE_CHANNEL_CAPACITY);
    let conn = Conn { core: Arc::clone(&core), outbound_tx, cancel: cancel.clone() };

    tokio::spawn(batch_pump(
        Arc::clone(&core),
        outbound_rx,
        write_tx,
        settings.batch,
        cancel.clone(),
    ));
    tokio::spawn(write_pump(
        ws_tx,
        write_rx,
        format,
        settings.write_timeout,
        settings.ping_interval,
        cancel.clone(),
    ));
    tokio::spawn(retry_pump(
        Arc::clone(&core),
        conn.clone(),
        settings.retry_interval,
        cancel.clone(),
    ));

    match resume_from {
        // Fresh session: tell the client its id so it can resume later.
        // The announcement is unsequenced; the first substantive reply
        // still lands on seq 1.
        None => {
            let payload = SessionStartPayload { session_id: core.id.clone() };
            if let Ok(msg) = Message::with_payload(MessageKind::SessionStart, &payload) {
                conn.send_control(msg).await;
            }
        }
        // Adopted session: replay what the client missed and re-attach
        // output fan-outs for its surviving terminals.
        Some(last_seq) => {
            for msg in core.queue.messages_after(last_seq).await {
                conn.resend(msg).await;
            }
            for id in core.terminals.list().await {
                if let Ok(term) = core.terminals.get(&id).await {
                    spawn_terminal_fanout(&conn, term);
                }
            }
        }
    }

    for msg in leftover {
        core.touch();
        route(&conn, msg).await;
    }

    // Read pump: one message at a time under the read deadline. Pong
    // frames count as traffic, so they refresh the deadline for free.
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if shutdown.is_cancelled() {
                    let payload = SessionEndPayload {
                        session_id: core.id.clone(),
                        reason: Some("gateway shutdown".to_owned()),
                    };
                    if let Ok(msg) = Message::with_payload(MessageKind::SessionEnd, &payload) {
                        conn.send_control(msg).await;
                    }
                    tokio::time::sleep(SHUTDOWN_DRAIN_GRACE).await;
                }
                break;
            }
            next = tokio::time::timeout(settings.read_timeout, ws_rx.next()) => match next {
                Err(_) => {
                    debug!(session = %core.id, "read deadline expired");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    debug!(session = %core.id, "transport read error: {e}");
                    break;
                }
                Ok(Some(Ok(WsMessage::Close(_)))) => break,
                Ok(Some(Ok(frame))) => {
                    for msg in decode_inbound(frame, &codec) {
                        core.touch();
                        route(&conn, msg).await;
                    }
                }
            },
        }
    }

    cancel.cancel();
    registry.detach(&core.id).await;
    info!(session = %core.id, "connection closed");
}

async fn new_core(registry: &Arc<SessionRegistry>, settings: &Arc<RuntimeSettings>) -> Arc<SessionCore> {
    let core = SessionCore::new(settings);
    info!(session = %core.id, "session started");
    registry.register(Arc::clone(&core)).await;
    core
}

/// Decode one transport frame into messages.
///
/// Malformed frames are logged and dropped; a client that only ever sends
/// garbage eventually trips the read deadline instead.
fn decode_inbound(frame: WsMessage, codec: &FrameCodec) -> Vec<Message> {
    match frame {
        WsMessage::Text(text) => match serde_json::from_str::<Message>(&text) {
            Ok(msg) => vec![msg],
            Err(e) => {
                debug!("dropping undecodable text frame: {e}");
                Vec::new()
            }
        },
        WsMessage::Binary(bytes) => match codec.decode(&bytes) {
            Ok(msgs) => msgs,
            Err(e) => {
                debug!("dropping undecodable binary frame: {e}");
                Vec::new()
            }
        },
        // Transport pings are answered by the WebSocket layer itself.
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) => Vec::new(),
    }
}

/// Route one inbound message to chat, terminal, or control handling.
async fn route(conn: &Conn, msg: Message) {
    match msg.kind {
        MessageKind::Ping => {
            let ping: PingPayload = msg.decode_payload().unwrap_or_default();
            let payload = PongPayload {
                client_time_ms: ping.client_time_ms,
                server_time_ms: now_ms(),
                metrics: ping.metrics,
            };
            if let Ok(pong) = Message::with_payload(MessageKind::Pong, &payload) {
                conn.send(pong.with_correlation(msg.id)).await;
            }
        }

        MessageKind::Ack => {
            if let Ok(ack) = msg.decode_payload::<AckPayload>() {
                conn.core.queue.ack(&ack.message_id).await;
            }
        }

        MessageKind::Chat => spawn_chat(conn, msg),

        MessageKind::TerminalCreate => {
            let payload: TerminalCreatePayload = match msg.decode_payload() {
                Ok(p) => p,
                Err(e) => {
                    conn.send(terminal_error(None, &e, &msg.id)).await;
                    return;
                }
            };
            let env: Vec<(String, String)> = payload.env.into_iter().collect();
            let created = conn
                .core
                .terminals
                .create(payload.workdir.map(Into::into), env, payload.rows, payload.cols)
                .await;
            match created {
                Ok(term) => {
                    let reply = TerminalCreatedPayload {
                        terminal_id: term.id().to_owned(),
                        rows: payload.rows,
                        cols: payload.cols,
                    };
                    if let Ok(out) = Message::with_payload(MessageKind::TerminalCreated, &reply) {
                        conn.send(out.with_correlation(msg.id)).await;
                    }
                    spawn_terminal_fanout(conn, term);
                }
                Err(e) => conn.send(terminal_error(None, &e, &msg.id)).await,
            }
        }

        MessageKind::TerminalInput => {
            let payload: TerminalIoPayload = match msg.decode_payload() {
                Ok(p) => p,
                Err(e) => {
                    conn.send(terminal_error(None, &e, &msg.id)).await;
                    return;
                }
            };
            let data = match base64::engine::general_purpose::STANDARD.decode(&payload.data) {
                Ok(d) => d,
                Err(_) => {
                    let e = GatewayError::BadPayload("terminal_input data is not base64".into());
                    conn.send(terminal_error(Some(payload.terminal_id), &e, &msg.id)).await;
                    return;
                }
            };
            let result = async {
                let term = conn.core.terminals.get(&payload.terminal_id).await?;
                term.write(Bytes::from(data)).await
            }
            .await;
            match result {
                Ok(()) => conn.send(ack_for(&msg, true)).await,
                Err(e) => {
                    conn.send(terminal_error(Some(payload.terminal_id), &e, &msg.id)).await
                }
            }
        }

        MessageKind::TerminalResize => {
            let payload: TerminalResizePayload = match msg.decode_payload() {
                Ok(p) => p,
                Err(e) => {
                    conn.send(terminal_error(None, &e, &msg.id)).await;
                    return;
                }
            };
            let result = async {
                let term = conn.core.terminals.get(&payload.terminal_id).await?;
                term.resize(payload.rows, payload.cols)
            }
            .await;
            match result {
                Ok(()) => conn.send(ack_for(&msg, true)).await,
                Err(e) => {
                    conn.send(terminal_error(Some(payload.terminal_id), &e, &msg.id)).await
                }
            }
        }

        MessageKind::TerminalClose => {
            let payload: TerminalClosePayload = match msg.decode_payload() {
                Ok(p) => p,
                Err(e) => {
                    conn.send(terminal_error(None, &e, &msg.id)).await;
                    return;
                }
            };
            match conn.core.terminals.close(&payload.terminal_id).await {
                Ok(()) => conn.send(ack_for(&msg, true)).await,
                Err(e) => {
                    conn.send(terminal_error(Some(payload.terminal_id), &e, &msg.id)).await
                }
            }
        }

        MessageKind::TerminalList => {
            let payload = TerminalListPayload { terminal_ids: conn.core.terminals.list().await };
            if let Ok(out) = Message::with_payload(MessageKind::TerminalList, &payload) {
                conn.send(out.with_correlation(msg.id)).await;
            }
        }

        // A mid-connection reconnect only replays against the session this
        // connection already runs; anything else must reopen fresh.
        MessageKind::Reconnect => {
            if let Ok(payload) = msg.decode_payload::<ReconnectPayload>() {
                if payload.session_id == conn.core.id {
                    for missed in conn.core.queue.messages_after(payload.last_seq_num).await {
                        conn.resend(missed).await;
                    }
                } else {
                    debug!(requested = %payload.session_id, "ignoring reconnect for other session");
                }
            }
        }

        // Reserved operations: answer with a structured unsupported error.
        MessageKind::FileOpen
        | MessageKind::FileSave
        | MessageKind::FileClose
        | MessageKind::FileChanged
        | MessageKind::FileSync
        | MessageKind::GitStatus
        | MessageKind::GitDiff => {
            let payload = ChatErrorPayload {
                message: format!("operation {} is not supported", msg.kind),
                code: "UNSUPPORTED".to_owned(),
                retryable: false,
                details: None,
                retry_after_ms: None,
            };
            if let Ok(out) = Message::with_payload(MessageKind::ChatError, &payload) {
                conn.send(out.with_correlation(msg.id)).await;
            }
        }

        _ => {
            debug!(kind = %msg.kind, "ignoring unexpected inbound message");
        }
    }
}

/// Forward one chat request's reply stream onto the outbound channel.
fn spawn_chat(conn: &Conn, msg: Message) {
    let payload: ChatPayload = match msg.decode_payload() {
        Ok(p) => p,
        Err(e) => {
            let conn = conn.clone();
            let classified = classify(&anyhow::Error::new(e));
            tokio::spawn(async move {
                conn.send(chat_error(&classified, &msg.id)).await;
            });
            return;
        }
    };

    let conn = conn.clone();
    tokio::spawn(async move {
        let chat_id = msg.id.clone();

        for file in &payload.files {
            conn.core
                .context
                .update_file(std::path::Path::new(file), crate::context::FileRole::Active)
                .await;
        }

        // Lazy start: the child is only launched when the first chat
        // arrives.
        if let Err(e) = conn.core.assistant.initialize().await {
            let classified = classify(&anyhow::Error::new(e));
            warn!(session = %conn.core.id, "assistant init failed: {}", classified.detail);
            conn.send(chat_error(&classified, &chat_id)).await;
            let stream = ChatStreamPayload {
                content: classified.kind.user_message().to_owned(),
                finished: true,
                tokens: None,
                cost_usd: None,
                file_edits: None,
            };
            if let Ok(out) = Message::with_payload(MessageKind::ChatStream, &stream) {
                conn.send(out.with_correlation(chat_id.clone())).await;
            }
            conn.send(ack_payload(&chat_id, msg.seq, false)).await;
            return;
        }

        let mut replies = conn.core.assistant.handle_chat(payload.content);
        let mut clean = true;
        loop {
            let chunk = tokio::select! {
                _ = conn.cancel.cancelled() => return,
                chunk = replies.recv() => chunk,
            };
            let Some(chunk) = chunk else { break };

            if let Some(ref error) = chunk.error {
                clean = false;
                conn.send(chat_error(error, &chat_id)).await;
            }
            let finished = chunk.finished;
            let stream = ChatStreamPayload {
                content: chunk.content,
                finished,
                tokens: None,
                cost_usd: None,
                file_edits: if chunk.file_edits.is_empty() {
                    None
                } else {
                    Some(chunk.file_edits)
                },
            };
            if let Ok(out) = Message::with_payload(MessageKind::ChatStream, &stream) {
                conn.send(out.with_correlation(chat_id.clone())).await;
            }
            if finished {
                conn.send(ack_payload(&chat_id, msg.seq, clean)).await;
                return;
            }
        }
        // Stream ended without a final chunk (adapter task cancelled).
        conn.send(ack_payload(&chat_id, msg.seq, false)).await;
    });
}

/// Stream one terminal's output to the client, tagged with its id.
fn spawn_terminal_fanout(conn: &Conn, term: Arc<TerminalSession>) {
    let conn = conn.clone();
    let mut output = term.output();
    let terminal_id = term.id().to_owned();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = conn.cancel.cancelled() => break,
                chunk = output.recv() => match chunk {
                    Ok(bytes) => {
                        let payload = TerminalIoPayload {
                            terminal_id: terminal_id.clone(),
                            data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                        };
                        if let Ok(msg) =
                            Message::with_payload(MessageKind::TerminalOutput, &payload)
                        {
                            conn.send(msg).await;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!(terminal = %terminal_id, dropped = n, "fan-out lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}

/// Batch pump: the single place where fresh messages meet the queue.
///
/// Sequencing happens here, on one task, so wire order equals queue
/// order. With batching enabled, messages arriving within the window are
/// grouped up to the configured size.
async fn batch_pump(
    core: Arc<SessionCore>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    write_tx: mpsc::Sender<Vec<Message>>,
    batch: Option<BatchSettings>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = outbound_rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let mut msgs = resolve(&core, item).await;

        if let Some(batch) = batch {
            let window_end = tokio::time::Instant::now() + batch.window;
            while msgs.len() < batch.size {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep_until(window_end) => break,
                    item = outbound_rx.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                };
                msgs.extend(resolve(&core, next).await);
            }
        }

        if !msgs.is_empty() && write_tx.send(msgs).await.is_err() {
            break;
        }
    }

    // Shutdown drain: forward whatever is already queued.
    while let Ok(item) = outbound_rx.try_recv() {
        let msgs = resolve(&core, item).await;
        if !msgs.is_empty() && write_tx.send(msgs).await.is_err() {
            break;
        }
    }
}

/// Turn an outbound item into the wire-ready messages it stands for.
async fn resolve(core: &SessionCore, item: Outbound) -> Vec<Message> {
    match item {
        Outbound::Fresh(msg) => {
            core.queue.enqueue(msg).await;
            core.queue.drain_pending().await
        }
        Outbound::Resend(msg) | Outbound::Control(msg) => vec![msg],
    }
}

/// Write pump: sole owner of the socket sink.
///
/// Applies the write deadline per frame and sends a transport ping when a
/// full ping interval passes without outbound traffic.
async fn write_pump(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut write_rx: mpsc::Receiver<Vec<Message>>,
    format: WireFormat,
    write_timeout: Duration,
    ping_interval: Duration,
    cancel: CancellationToken,
) {
    let codec = FrameCodec;
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut idle = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Push out anything already batched before going away.
                while let Ok(msgs) = write_rx.try_recv() {
                    if write_frames(&mut sink, &msgs, format, &codec, write_timeout).await.is_err() {
                        break;
                    }
                }
                break;
            }
            msgs = write_rx.recv() => {
                let Some(msgs) = msgs else { break };
                if let Err(e) = write_frames(&mut sink, &msgs, format, &codec, write_timeout).await {
                    warn!("write pump failed: {e:#}");
                    cancel.cancel();
                    break;
                }
                idle = false;
            }
            _ = ticker.tick() => {
                if idle {
                    let ping = WsMessage::Ping(Bytes::new());
                    if tokio::time::timeout(write_timeout, sink.send(ping)).await.is_err() {
                        cancel.cancel();
                        break;
                    }
                }
                idle = true;
            }
        }
    }
}

async fn write_frames(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    msgs: &[Message],
    format: WireFormat,
    codec: &FrameCodec,
    write_timeout: Duration,
) -> anyhow::Result<()> {
    let frames: Vec<WsMessage> = match format {
        WireFormat::Json => msgs
            .iter()
            .filter_map(|m| match serde_json::to_string(m) {
                Ok(text) => Some(WsMessage::Text(text.into())),
                Err(e) => {
                    warn!("skipping unserializable message: {e}");
                    None
                }
            })
            .collect(),
        WireFormat::Binary => {
            let encoded = if msgs.len() > 1 {
                codec.encode_batch(msgs)
            } else {
                match msgs.first() {
                    Some(msg) => codec.encode(msg),
                    None => return Ok(()),
                }
            };
            match encoded {
                Ok(bytes) => vec![WsMessage::Binary(Bytes::from(bytes))],
                Err(e) => {
                    warn!("skipping unencodable frame: {e}");
                    Vec::new()
                }
            }
        }
    };

    for frame in frames {
        match tokio::time::timeout(write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => anyhow::bail!("transport write error: {e}"),
            Err(_) => anyhow::bail!("transport write timed out after {write_timeout:?}"),
        }
    }
    Ok(())
}

/// Retry pump: periodically rescan the in-flight map and resend what is
/// due.
async fn retry_pump(
    core: Arc<SessionCore>,
    conn: Conn,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for msg in core.queue.check_retries().await {
                    debug!(id = %msg.id, seq = msg.seq, retry = msg.retry_count, "resending");
                    conn.resend(msg).await;
                }
            }
        }
    }
}

// -- Reply constructors -------------------------------------------------------

fn ack_for(msg: &Message, success: bool) -> Message {
    ack_payload(&msg.id, msg.seq, success)
}

fn ack_payload(message_id: &str, seq: u64, success: bool) -> Message {
    let payload = AckPayload {
        message_id: message_id.to_owned(),
        seq_num: Some(seq),
        success,
    };
    Message::new(
        MessageKind::Ack,
        serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
    )
}

fn terminal_error(terminal_id: Option<String>, error: &GatewayError, correlation: &str) -> Message {
    let payload = crate::protocol::TerminalErrorPayload {
        terminal_id,
        message: error.to_string(),
        code: error.code().to_owned(),
    };
    Message::new(
        MessageKind::TerminalError,
        serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
    )
    .with_correlation(correlation)
}

fn chat_error(error: &ClassifiedError, correlation: &str) -> Message {
    let payload = ChatErrorPayload {
        message: error.kind.user_message().to_owned(),
        code: error.kind.as_str().to_owned(),
        retryable: error.kind.retryable(),
        details: Some(error.detail.clone()),
        retry_after_ms: error.retry_after.map(|d| d.as_millis() as u64),
    };
    Message::new(
        MessageKind::ChatError,
        serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
    )
    .with_correlation(correlation)
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
