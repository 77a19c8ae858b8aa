// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor for the AI coding assistant child process.
//!
//! The adapter owns the child and its PTY exclusively: an output-scanner
//! task turns raw PTY bytes into text flushes and prompt signals, a reaper
//! task watches for exit, and `handle_chat` drives one request at a time
//! against those channels. Failures go through the error classifier and
//! the recovery hooks this adapter implements for itself.

pub mod scan;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::context::ConversationContext;
use crate::error::GatewayError;
use crate::pty::{self, ChildExit, PtyMaster};
use crate::recover::{classify, ClassifiedError, ErrorKind, RecoveryHooks, RecoveryManager};
use scan::{parse_action, OutputScanner, ScanEvent};

const OUTPUT_CHANNEL_CAPACITY: usize = 100;
const REPLY_CHANNEL_CAPACITY: usize = 100;
const CLOSE_GRACE: Duration = Duration::from_secs(5);

pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything needed to launch and talk to the assistant child.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// The assistant binary.
    pub command: String,
    pub model: Option<String>,
    pub edit_format: String,
    pub auto_commit: bool,
    pub map_tokens: u32,
    /// Files attached to the conversation at launch.
    pub files: Vec<String>,
    pub read_only_files: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub rows: u16,
    pub cols: u16,
    pub init_timeout: Duration,
    pub chat_timeout: Duration,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            command: "aider".to_owned(),
            model: None,
            edit_format: "diff".to_owned(),
            auto_commit: false,
            map_tokens: 1024,
            files: Vec::new(),
            read_only_files: Vec::new(),
            workdir: None,
            rows: 40,
            cols: 120,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            chat_timeout: DEFAULT_CHAT_TIMEOUT,
        }
    }
}

impl AssistantConfig {
    /// Build the child's argument vector.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![self.command.clone()];
        if let Some(ref model) = self.model {
            args.push("--model".to_owned());
            args.push(model.clone());
        }
        args.push("--yes-always".to_owned());
        args.push("--no-pretty".to_owned());
        args.push("--no-stream".to_owned());
        args.push("--edit-format".to_owned());
        args.push(self.edit_format.clone());
        args.push("--map-tokens".to_owned());
        args.push(self.map_tokens.to_string());
        if self.auto_commit {
            args.push("--auto-commits".to_owned());
        } else {
            args.push("--no-auto-commits".to_owned());
        }
        for file in &self.read_only_files {
            args.push("--read".to_owned());
            args.push(file.clone());
        }
        args.extend(self.files.iter().cloned());
        args
    }
}

/// One streamed piece of an assistant reply.
#[derive(Debug, Clone)]
pub struct ReplyChunk {
    pub content: String,
    pub finished: bool,
    /// Files the assistant reported touching; populated on the final chunk.
    pub file_edits: Vec<String>,
    /// Set when the stream ends because of a failure.
    pub error: Option<ClassifiedError>,
}

impl ReplyChunk {
    fn text(content: String) -> Self {
        Self { content, finished: false, file_edits: Vec::new(), error: None }
    }

    fn done(file_edits: Vec<String>) -> Self {
        Self { content: String::new(), finished: true, file_edits, error: None }
    }

    fn failed(error: ClassifiedError) -> Self {
        Self {
            content: error.kind.user_message().to_owned(),
            finished: true,
            file_edits: Vec::new(),
            error: Some(error),
        }
    }
}

/// Receive ends of the scanner/reaper channels for the current child.
struct TurnChannels {
    output_rx: mpsc::Receiver<String>,
    prompt_rx: mpsc::Receiver<()>,
    error_rx: mpsc::Receiver<ClassifiedError>,
}

/// Live child process state.
#[derive(Clone)]
struct ChildHandle {
    master: Arc<PtyMaster>,
    pid: Pid,
    cancel: tokio_util::sync::CancellationToken,
    exit_rx: watch::Receiver<Option<ChildExit>>,
}

/// What the chat loop decided to do after one select round.
enum TurnStep {
    Output(String),
    Prompt,
    Failure(ClassifiedError),
    Timeout,
}

pub struct AssistantAdapter {
    config: AssistantConfig,
    context: Arc<ConversationContext>,
    snapshot_path: PathBuf,
    recovery: RecoveryManager,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
    /// Serializes the format-then-write to the child's stdin.
    write_lock: Mutex<()>,
    child: RwLock<Option<ChildHandle>>,
    /// Held for the duration of one chat turn; chats are serialized.
    turn: Arc<Mutex<Option<TurnChannels>>>,
    /// Fresh channels parked by `initialize` for the next turn to adopt.
    fresh_turn: std::sync::Mutex<Option<TurnChannels>>,
}

impl AssistantAdapter {
    pub fn new(
        config: AssistantConfig,
        context: Arc<ConversationContext>,
        snapshot_path: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            context,
            snapshot_path,
            recovery: RecoveryManager::new(),
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
            child: RwLock::new(None),
            turn: Arc::new(Mutex::new(None)),
            fresh_turn: std::sync::Mutex::new(None),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Launch the child and wait for its first prompt.
    ///
    /// Idempotent: a second call while initialized returns immediately.
    pub async fn initialize(&self) -> Result<(), GatewayError> {
        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let args = self.config.build_args();
        debug!(command = %args.join(" "), "starting assistant");
        let spawned = pty::spawn(
            &args,
            self.config.workdir.as_deref(),
            &[],
            self.config.rows,
            self.config.cols,
        )?;
        spawned.master.disable_echo()?;
        let master = Arc::new(spawned.master);
        let pid = spawned.pid;
        let cancel = tokio_util::sync::CancellationToken::new();

        let (output_tx, mut output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (prompt_tx, mut prompt_rx) = mpsc::channel(1);
        let (error_tx, mut error_rx) = mpsc::channel(4);
        let (exit_tx, exit_rx) = watch::channel(None);

        spawn_scanner(Arc::clone(&master), cancel.clone(), output_tx, prompt_tx);
        spawn_reaper(pid, exit_tx, error_tx, cancel.clone());

        // Block until the assistant is ready for input.
        tokio::select! {
            ready = prompt_rx.recv() => {
                if ready.is_none() {
                    cancel.cancel();
                    pty::signal_child(pid, Signal::SIGKILL);
                    return Err(GatewayError::ProcessExited("output scanner stopped".to_owned()));
                }
            }
            failure = error_rx.recv() => {
                cancel.cancel();
                let detail = failure.map(|e| e.detail).unwrap_or_else(|| "unknown".to_owned());
                return Err(GatewayError::ProcessExited(detail));
            }
            _ = tokio::time::sleep(self.config.init_timeout) => {
                cancel.cancel();
                pty::signal_child(pid, Signal::SIGKILL);
                return Err(GatewayError::InitTimeout(self.config.init_timeout));
            }
        }

        // Text that preceded the first prompt is startup banner, not part
        // of any reply; drop it so the first chat starts clean.
        while output_rx.try_recv().is_ok() {}

        *self.child.write().await = Some(ChildHandle { master, pid, cancel, exit_rx });
        if let Ok(mut fresh) = self.fresh_turn.lock() {
            *fresh = Some(TurnChannels { output_rx, prompt_rx, error_rx });
        }
        self.initialized.store(true, Ordering::Release);
        info!(pid = pid.as_raw(), "assistant ready");
        Ok(())
    }

    /// Stream a reply for one user message.
    ///
    /// Turns are serialized: a second chat waits until the first finishes.
    pub fn handle_chat(self: &Arc<Self>, content: String) -> mpsc::Receiver<ReplyChunk> {
        let (reply_tx, reply_rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            adapter.run_chat(content, reply_tx).await;
        });
        reply_rx
    }

    /// Tear the child down: SIGTERM, grace wait, SIGKILL. Idempotent.
    pub async fn close(&self) {
        let _guard = self.init_lock.lock().await;
        self.close_locked().await;
    }

    /// Full restart: the only safe recovery once the child's controlling
    /// terminal is suspect.
    pub async fn restart(&self) -> anyhow::Result<()> {
        self.close().await;
        self.initialize().await?;
        Ok(())
    }

    async fn close_locked(&self) {
        self.initialized.store(false, Ordering::Release);
        if let Ok(mut fresh) = self.fresh_turn.lock() {
            *fresh = None;
        }
        let Some(handle) = self.child.write().await.take() else {
            return;
        };

        handle.cancel.cancel();
        pty::signal_child(handle.pid, Signal::SIGTERM);

        let mut exit_rx = handle.exit_rx.clone();
        let exited = tokio::time::timeout(CLOSE_GRACE, async {
            loop {
                if exit_rx.borrow_and_update().is_some() {
                    return;
                }
                if exit_rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        if exited.is_err() {
            warn!("assistant did not exit in {CLOSE_GRACE:?}, sending SIGKILL");
            pty::signal_child(handle.pid, Signal::SIGKILL);
        }

        if let Err(e) = self.context.save(&self.snapshot_path).await {
            warn!("context persist on close failed: {e:#}");
        }
    }

    async fn run_chat(&self, content: String, reply_tx: mpsc::Sender<ReplyChunk>) {
        let mut turn = Arc::clone(&self.turn).lock_owned().await;
        self.adopt_fresh_channels(&mut turn);
        if turn.is_none() {
            let classified =
                ClassifiedError::new(ErrorKind::Process, "assistant is not initialized");
            let _ = reply_tx.send(ReplyChunk::failed(classified)).await;
            return;
        }

        self.context.add_user_message(content.clone(), Vec::new()).await;

        if let Err(e) = self.write_line(&content).await {
            let classified = classify(&anyhow::Error::new(e));
            if self.try_recover(&classified).await {
                self.adopt_fresh_channels(&mut turn);
                if let Err(e) = self.write_line(&content).await {
                    self.finish_failed(&reply_tx, classify(&anyhow::Error::new(e))).await;
                    return;
                }
            } else {
                self.finish_failed(&reply_tx, classified).await;
                return;
            }
        }

        let mut response = String::new();
        let mut files: Vec<String> = Vec::new();
        let mut actions: Vec<String> = Vec::new();
        let mut retried = false;
        let deadline = tokio::time::sleep(self.config.chat_timeout);
        tokio::pin!(deadline);

        loop {
            let step = {
                let Some(channels) = turn.as_mut() else {
                    return;
                };
                tokio::select! {
                    _ = &mut deadline => TurnStep::Timeout,
                    output = channels.output_rx.recv() => match output {
                        Some(text) => TurnStep::Output(text),
                        None => TurnStep::Failure(ClassifiedError::new(
                            ErrorKind::Process,
                            "assistant output channel closed",
                        )),
                    },
                    prompt = channels.prompt_rx.recv() => match prompt {
                        Some(()) => TurnStep::Prompt,
                        None => TurnStep::Failure(ClassifiedError::new(
                            ErrorKind::Process,
                            "assistant prompt channel closed",
                        )),
                    },
                    failure = channels.error_rx.recv() => TurnStep::Failure(
                        failure.unwrap_or_else(|| ClassifiedError::new(
                            ErrorKind::Process,
                            "assistant error channel closed",
                        )),
                    ),
                }
            };

            match step {
                TurnStep::Output(text) => {
                    for line in text.lines() {
                        if let Some(action) = parse_action(line) {
                            actions.push(action.action.to_owned());
                            if let Some(file) = action.file {
                                if !files.contains(&file) {
                                    files.push(file);
                                }
                            }
                        }
                    }
                    response.push_str(&text);
                    if reply_tx.send(ReplyChunk::text(text)).await.is_err() {
                        return;
                    }
                }
                TurnStep::Prompt => {
                    self.context
                        .add_assistant_response(response.clone(), files.clone(), actions.clone())
                        .await;
                    if let Err(e) = self.context.save(&self.snapshot_path).await {
                        warn!("context persist failed: {e:#}");
                    }
                    let _ = reply_tx.send(ReplyChunk::done(files)).await;
                    return;
                }
                TurnStep::Timeout => {
                    let classified =
                        classify(&anyhow::Error::new(GatewayError::ChatTimeout));
                    if !retried && self.try_recover(&classified).await {
                        retried = true;
                        self.adopt_fresh_channels(&mut turn);
                        if self.write_line(&content).await.is_ok() {
                            deadline
                                .as_mut()
                                .reset(tokio::time::Instant::now() + self.config.chat_timeout);
                            continue;
                        }
                    }
                    self.finish_failed(&reply_tx, classified).await;
                    return;
                }
                TurnStep::Failure(classified) => {
                    if !retried && self.try_recover(&classified).await {
                        retried = true;
                        self.adopt_fresh_channels(&mut turn);
                        if self.write_line(&content).await.is_ok() {
                            deadline
                                .as_mut()
                                .reset(tokio::time::Instant::now() + self.config.chat_timeout);
                            continue;
                        }
                    }
                    self.finish_failed(&reply_tx, classified).await;
                    return;
                }
            }
        }
    }

    /// Pick up receiver channels parked by a (re)initialize.
    fn adopt_fresh_channels(&self, turn: &mut Option<TurnChannels>) {
        if let Ok(mut fresh) = self.fresh_turn.lock() {
            if let Some(channels) = fresh.take() {
                *turn = Some(channels);
            }
        }
    }

    async fn try_recover(&self, classified: &ClassifiedError) -> bool {
        debug!(kind = %classified.kind, "attempting recovery: {}", classified.detail);
        self.recovery.recover(classified, self).await.is_ok()
    }

    async fn finish_failed(&self, reply_tx: &mpsc::Sender<ReplyChunk>, error: ClassifiedError) {
        self.context
            .add_system_message(format!("chat failed ({}): {}", error.kind, error.detail))
            .await;
        if let Err(e) = self.context.save(&self.snapshot_path).await {
            warn!("context persist failed: {e:#}");
        }
        let _ = reply_tx.send(ReplyChunk::failed(error)).await;
    }

    async fn write_line(&self, content: &str) -> Result<(), GatewayError> {
        let master = {
            let child = self.child.read().await;
            match child.as_ref() {
                Some(handle) => Arc::clone(&handle.master),
                None => return Err(GatewayError::NotRunning),
            }
        };
        let _guard = self.write_lock.lock().await;
        let line = format!("{content}\n");
        master.write_all(line.as_bytes()).await.map_err(GatewayError::Io)
    }
}

impl RecoveryHooks for AssistantAdapter {
    fn restart_process(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(self.restart())
    }

    /// The child cannot survive losing its controlling terminal, so a
    /// transport reset is a full restart too.
    fn reset_connection(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(self.restart())
    }

    fn cleanup_resources(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move { self.context.save(&self.snapshot_path).await })
    }
}

/// Output scanner task: PTY bytes → text flushes + prompt signals.
fn spawn_scanner(
    master: Arc<PtyMaster>,
    cancel: tokio_util::sync::CancellationToken,
    output_tx: mpsc::Sender<String>,
    prompt_tx: mpsc::Sender<()>,
) {
    tokio::spawn(async move {
        let mut scanner = OutputScanner::new();
        let mut buf = vec![0u8; 8192];
        loop {
            let n = tokio::select! {
                _ = cancel.cancelled() => break,
                read = master.read_chunk(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        debug!("assistant read stopped: {e}");
                        break;
                    }
                },
            };
            let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
            for event in scanner.push(&chunk) {
                match event {
                    ScanEvent::Text(text) => {
                        if output_tx.send(text).await.is_err() {
                            return;
                        }
                    }
                    // Capacity 1 + try_send: one signal per prompt, and a
                    // not-yet-consumed signal is not duplicated.
                    ScanEvent::Prompt => {
                        let _ = prompt_tx.try_send(());
                    }
                }
            }
        }
    });
}

/// Child-wait reaper: signal-kill is a normal exit, anything else is a
/// process failure handed to the chat loop.
fn spawn_reaper(
    pid: Pid,
    exit_tx: watch::Sender<Option<ChildExit>>,
    error_tx: mpsc::Sender<ClassifiedError>,
    cancel: tokio_util::sync::CancellationToken,
) {
    tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(move || pty::wait_for_exit(pid)).await;
        let exit = match result {
            Ok(Ok(exit)) => exit,
            Ok(Err(_)) | Err(_) => ChildExit { code: None, signal: None },
        };
        debug!(code = ?exit.code, signal = ?exit.signal, "assistant exited");
        if !exit.is_signal_kill() {
            let detail = match exit.code {
                Some(code) => format!("assistant exited with code {code}"),
                None => "assistant exited".to_owned(),
            };
            let _ = error_tx.send(ClassifiedError::new(ErrorKind::Process, detail)).await;
        }
        let _ = exit_tx.send(Some(exit));
        cancel.cancel();
    });
}

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;
