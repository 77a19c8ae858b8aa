// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One PTY-backed shell session: bidirectional pumps, resize, idle tracking.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::protocol::now_ms;
use crate::pty::{self, ChildExit, PtyMaster};

const INPUT_CHANNEL_CAPACITY: usize = 256;
const OUTPUT_CHANNEL_CAPACITY: usize = 256;
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Forward-only lifecycle: Init → Running → Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TerminalState {
    Init = 0,
    Running = 1,
    Closed = 2,
}

impl TerminalState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Init,
            1 => Self::Running,
            _ => Self::Closed,
        }
    }
}

/// Everything needed to spawn one terminal.
#[derive(Debug, Clone)]
pub struct TerminalSpec {
    pub shell: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub rows: u16,
    pub cols: u16,
}

/// One shell under a PTY the session owns exclusively.
#[derive(Debug)]
pub struct TerminalSession {
    id: String,
    state: AtomicU8,
    rows: AtomicU16,
    cols: AtomicU16,
    last_used_ms: AtomicU64,
    master: Arc<PtyMaster>,
    child_pid: Pid,
    input_tx: mpsc::Sender<Bytes>,
    output_tx: broadcast::Sender<Bytes>,
    cancel: CancellationToken,
    exit_rx: watch::Receiver<Option<ChildExit>>,
}

impl TerminalSession {
    /// Open a PTY, spawn the shell on it, and start the I/O pumps.
    pub fn spawn(id: String, spec: &TerminalSpec) -> Result<Arc<Self>, GatewayError> {
        let child = pty::spawn(
            &spec.shell,
            spec.workdir.as_deref(),
            &spec.env,
            spec.rows,
            spec.cols,
        )?;
        let master = Arc::new(child.master);

        let (input_tx, input_rx) = mpsc::channel::<Bytes>(INPUT_CHANNEL_CAPACITY);
        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let session = Arc::new(Self {
            id,
            state: AtomicU8::new(TerminalState::Running as u8),
            rows: AtomicU16::new(spec.rows),
            cols: AtomicU16::new(spec.cols),
            last_used_ms: AtomicU64::new(now_ms()),
            master,
            child_pid: child.pid,
            input_tx,
            output_tx: output_tx.clone(),
            cancel: cancel.clone(),
            exit_rx,
        });

        session.spawn_read_pump(output_tx);
        session.spawn_write_pump(input_rx);
        session.spawn_reaper(exit_tx);

        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TerminalState {
        TerminalState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == TerminalState::Running
    }

    pub fn dimensions(&self) -> (u16, u16) {
        (self.rows.load(Ordering::Relaxed), self.cols.load(Ordering::Relaxed))
    }

    /// Epoch-ms timestamp of the last read or write through this terminal.
    pub fn last_used_ms(&self) -> u64 {
        self.last_used_ms.load(Ordering::Relaxed)
    }

    /// Subscribe to the shell's raw output. Consume-or-lose: slow
    /// subscribers drop old chunks rather than stalling the read pump.
    pub fn output(&self) -> broadcast::Receiver<Bytes> {
        self.output_tx.subscribe()
    }

    /// Queue raw bytes for the shell's input.
    pub async fn write(&self, data: Bytes) -> Result<(), GatewayError> {
        if !self.is_running() {
            return Err(GatewayError::NotRunning);
        }
        match self.input_tx.send_timeout(data, WRITE_TIMEOUT).await {
            Ok(()) => {
                self.touch();
                Ok(())
            }
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(GatewayError::WriteTimeout),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(GatewayError::NotRunning),
        }
    }

    /// Apply a window-size change and remember the new dimensions.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), GatewayError> {
        if !self.is_running() {
            return Err(GatewayError::NotRunning);
        }
        self.master.set_winsize(rows, cols)?;
        self.rows.store(rows, Ordering::Relaxed);
        self.cols.store(cols, Ordering::Relaxed);
        Ok(())
    }

    /// Stop the pumps and terminate the child, escalating to SIGKILL after
    /// the close grace period. Idempotent; the session is always Closed
    /// afterwards.
    pub async fn close(&self) {
        if self.state.swap(TerminalState::Closed as u8, Ordering::AcqRel)
            == TerminalState::Closed as u8
        {
            return;
        }
        self.cancel.cancel();
        pty::signal_child(self.child_pid, Signal::SIGTERM);

        let mut exit_rx = self.exit_rx.clone();
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
            warn!(terminal = %self.id, "child did not exit in {CLOSE_GRACE:?}, sending SIGKILL");
            pty::signal_child(self.child_pid, Signal::SIGKILL);
        }
    }

    fn touch(&self) {
        self.last_used_ms.store(now_ms(), Ordering::Relaxed);
    }

    fn spawn_read_pump(self: &Arc<Self>, output_tx: broadcast::Sender<Bytes>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                tokio::select! {
                    _ = session.cancel.cancelled() => break,
                    read = session.master.read_chunk(&mut buf) => match read {
                        Ok(0) => break,
                        Ok(n) => {
                            session.touch();
                            let _ = output_tx.send(Bytes::copy_from_slice(&buf[..n]));
                        }
                        Err(e) => {
                            debug!(terminal = %session.id, "read pump stopped: {e}");
                            break;
                        }
                    },
                }
            }
        });
    }

    fn spawn_write_pump(self: &Arc<Self>, mut input_rx: mpsc::Receiver<Bytes>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = session.cancel.cancelled() => break,
                    data = input_rx.recv() => match data {
                        Some(data) => {
                            if let Err(e) = session.master.write_all(&data).await {
                                debug!(terminal = %session.id, "write pump stopped: {e}");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
    }

    /// Child-wait reaper: flips Running → Closed whatever the exit status
    /// was. Non-zero exits and shutdown signal-kills are both normal.
    fn spawn_reaper(self: &Arc<Self>, exit_tx: watch::Sender<Option<ChildExit>>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let pid = session.child_pid;
            let status = tokio::task::spawn_blocking(move || pty::wait_for_exit(pid)).await;
            let exit = match status {
                Ok(Ok(exit)) => exit,
                Ok(Err(e)) => {
                    warn!(terminal = %session.id, "wait failed: {e}");
                    ChildExit { code: None, signal: None }
                }
                Err(e) => {
                    warn!(terminal = %session.id, "reaper join failed: {e}");
                    ChildExit { code: None, signal: None }
                }
            };
            debug!(terminal = %session.id, code = ?exit.code, signal = ?exit.signal, "child exited");
            session.state.store(TerminalState::Closed as u8, Ordering::Release);
            session.cancel.cancel();
            let _ = exit_tx.send(Some(exit));
        });
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
