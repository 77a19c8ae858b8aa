// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal set: creation caps, lookup, and the idle reaper.

pub mod session;

pub use session::{TerminalSession, TerminalSpec, TerminalState};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::GatewayError;
use crate::protocol::now_ms;

pub const DEFAULT_MAX_TERMINALS: usize = 12;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Manager-level knobs, resolved from the gateway config.
#[derive(Debug, Clone)]
pub struct TerminalLimits {
    pub shell: Vec<String>,
    pub max_terminals: usize,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for TerminalLimits {
    fn default() -> Self {
        Self {
            shell: vec!["/bin/bash".to_owned()],
            max_terminals: DEFAULT_MAX_TERMINALS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Owns the map of terminal sessions for one connection session.
pub struct TerminalManager {
    sessions: RwLock<HashMap<String, Arc<TerminalSession>>>,
    limits: TerminalLimits,
}

impl TerminalManager {
    pub fn new(limits: TerminalLimits) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), limits }
    }

    /// Spawn a new terminal, enforcing the cap before anything forks.
    pub async fn create(
        &self,
        workdir: Option<PathBuf>,
        env: Vec<(String, String)>,
        rows: u16,
        cols: u16,
    ) -> Result<Arc<TerminalSession>, GatewayError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.limits.max_terminals {
            return Err(GatewayError::CapReached(self.limits.max_terminals));
        }

        let id = format!("term-{}", uuid::Uuid::new_v4());
        let spec = TerminalSpec {
            shell: self.limits.shell.clone(),
            workdir,
            env,
            rows,
            cols,
        };
        let session = TerminalSession::spawn(id.clone(), &spec)?;
        info!(terminal = %id, rows, cols, "terminal created");
        sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    /// Look up a running terminal.
    pub async fn get(&self, id: &str) -> Result<Arc<TerminalSession>, GatewayError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(id).ok_or_else(|| GatewayError::NotFound(id.to_owned()))?;
        if !session.is_running() {
            return Err(GatewayError::NotRunning);
        }
        Ok(Arc::clone(session))
    }

    /// Remove and close a terminal.
    pub async fn close(&self, id: &str) -> Result<(), GatewayError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(id).ok_or_else(|| GatewayError::NotFound(id.to_owned()))?
        };
        session.close().await;
        Ok(())
    }

    /// Ids of terminals that are currently running.
    pub async fn list(&self) -> Vec<String> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_running())
            .map(|s| s.id().to_owned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// One reaper pass: drop terminals that stopped running and terminals
    /// idle past the timeout. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let idle_cutoff = now_ms().saturating_sub(self.limits.idle_timeout.as_millis() as u64);
        let victims: Vec<Arc<TerminalSession>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| !s.is_running() || s.last_used_ms() < idle_cutoff)
                .map(|s| s.id().to_owned())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &victims {
            debug!(terminal = %session.id(), "reaping terminal");
            session.close().await;
        }
        victims.len()
    }

    /// Close every terminal (shutdown path).
    pub async fn close_all(&self) {
        let victims: Vec<Arc<TerminalSession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in victims {
            session.close().await;
        }
    }

    /// Background cleanup task; one sweep per interval until cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.limits.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The immediate first tick would sweep an empty map; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = manager.sweep().await;
                        if removed > 0 {
                            info!(removed, "idle terminal sweep");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
