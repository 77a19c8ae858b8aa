// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state: per-connection core resources and the registry that
//! retains them across transport reconnects.

pub mod run;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assistant::{AssistantAdapter, AssistantConfig};
use crate::context::watcher::FileWatcher;
use crate::context::ConversationContext;
use crate::protocol::now_ms;
use crate::queue::MessageQueue;
use crate::terminal::{TerminalLimits, TerminalManager};

pub const DEFAULT_SESSION_RETENTION: Duration = Duration::from_secs(300);

/// Settings shared by every session, resolved once from the CLI config.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub data_dir: PathBuf,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub ping_interval: Duration,
    pub retry_interval: Duration,
    /// `None` disables outbound frame batching.
    pub batch: Option<BatchSettings>,
    pub queue_capacity: usize,
    pub retry_timeout: Duration,
    pub retry_cap: u32,
    pub terminal: TerminalLimits,
    pub assistant: AssistantConfig,
    /// Project root handed to the file watcher; `None` disables watching.
    pub watch_root: Option<PathBuf>,
    pub session_retention: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".tether"),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            retry_interval: Duration::from_secs(5),
            batch: None,
            queue_capacity: crate::queue::DEFAULT_CAPACITY,
            retry_timeout: crate::queue::DEFAULT_RETRY_TIMEOUT,
            retry_cap: crate::queue::DEFAULT_RETRY_CAP,
            terminal: TerminalLimits::default(),
            assistant: AssistantConfig::default(),
            watch_root: None,
            session_retention: DEFAULT_SESSION_RETENTION,
        }
    }
}

/// Outbound frame batching knobs.
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub size: usize,
    pub window: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self { size: 16, window: Duration::from_millis(50) }
    }
}

/// The durable half of a session: everything that must survive a
/// transport reconnect.
///
/// The core exclusively owns its queue and conversation context; the
/// terminal manager owns the terminals; the adapter owns the assistant
/// child. Connection pumps only borrow the core through an `Arc`.
pub struct SessionCore {
    pub id: String,
    pub queue: MessageQueue,
    pub terminals: Arc<TerminalManager>,
    pub assistant: Arc<AssistantAdapter>,
    pub context: Arc<ConversationContext>,
    last_activity_ms: AtomicU64,
    /// Cancels the core's background tasks (terminal sweeper, watcher).
    closer: CancellationToken,
}

impl SessionCore {
    pub fn new(settings: &RuntimeSettings) -> Arc<Self> {
        let id = format!("sess-{}", uuid::Uuid::new_v4());
        let snapshot_path = settings.data_dir.join(format!("{id}.json"));
        let context = Arc::new(ConversationContext::load_or_new(&snapshot_path, &id));
        let terminals = Arc::new(TerminalManager::new(settings.terminal.clone()));
        let mut assistant_config = settings.assistant.clone();
        if assistant_config.workdir.is_none() {
            assistant_config.workdir = settings.watch_root.clone();
        }
        let assistant =
            AssistantAdapter::new(assistant_config, Arc::clone(&context), snapshot_path);
        let closer = CancellationToken::new();

        terminals.spawn_sweeper(closer.clone());

        if let Some(ref root) = settings.watch_root {
            match FileWatcher::spawn(root.clone(), Arc::clone(&context), closer.clone()) {
                Ok(watcher) => {
                    debug!(session = %id, root = %watcher.root().display(), "file watcher started");
                }
                Err(e) => warn!(session = %id, "file watcher unavailable: {e:#}"),
            }
        }

        Arc::new(Self {
            id,
            queue: MessageQueue::with_limits(
                settings.queue_capacity,
                settings.retry_timeout,
                settings.retry_cap,
            ),
            terminals,
            assistant,
            context,
            last_activity_ms: AtomicU64::new(now_ms()),
            closer,
        })
    }

    pub fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    /// Release everything the core owns: terminals, assistant child,
    /// background tasks. The context gets a final persist via the
    /// assistant's close path.
    pub async fn shutdown(&self) {
        self.closer.cancel();
        self.terminals.close_all().await;
        self.assistant.close().await;
    }
}

struct Registered {
    core: Arc<SessionCore>,
    /// Epoch ms when the connection went away; `None` while attached.
    detached_at_ms: Option<u64>,
}

/// Sessions retained for reconnect replay, keyed by session id.
///
/// Resume only works within this process: an id minted by another
/// gateway instance is never found here and the client must start fresh.
pub struct SessionRegistry {
    inner: RwLock<HashMap<String, Registered>>,
    retention: Duration,
}

impl SessionRegistry {
    pub fn new(retention: Duration) -> Arc<Self> {
        Arc::new(Self { inner: RwLock::new(HashMap::new()), retention })
    }

    pub async fn register(&self, core: Arc<SessionCore>) {
        let mut inner = self.inner.write().await;
        inner.insert(core.id.clone(), Registered { core, detached_at_ms: None });
    }

    /// Mark a session's connection as gone, starting the retention clock.
    pub async fn detach(&self, id: &str) {
        if let Some(entry) = self.inner.write().await.get_mut(id) {
            entry.detached_at_ms = Some(now_ms());
        }
    }

    /// Re-attach a detached session for a resuming connection.
    pub async fn attach(&self, id: &str) -> Option<Arc<SessionCore>> {
        let mut inner = self.inner.write().await;
        let entry = inner.get_mut(id)?;
        entry.detached_at_ms = None;
        entry.core.touch();
        Some(Arc::clone(&entry.core))
    }

    /// Drop a session outright (fresh cores discarded by adoption).
    pub async fn remove(&self, id: &str) -> Option<Arc<SessionCore>> {
        self.inner.write().await.remove(id).map(|e| e.core)
    }

    pub async fn live_count(&self) -> usize {
        self.inner.read().await.values().filter(|e| e.detached_at_ms.is_none()).count()
    }

    pub async fn total_count(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Shut down sessions detached longer than the retention window.
    pub async fn sweep(&self) -> usize {
        let cutoff = now_ms().saturating_sub(self.retention.as_millis() as u64);
        let victims: Vec<Arc<SessionCore>> = {
            let mut inner = self.inner.write().await;
            let ids: Vec<String> = inner
                .iter()
                .filter(|(_, e)| e.detached_at_ms.is_some_and(|at| at < cutoff))
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| inner.remove(id)).map(|e| e.core).collect()
        };

        for core in &victims {
            info!(session = %core.id, "reaping detached session");
            core.shutdown().await;
        }
        victims.len()
    }

    /// Shut down every retained session (gateway exit).
    pub async fn shutdown_all(&self) {
        let cores: Vec<Arc<SessionCore>> =
            self.inner.write().await.drain().map(|(_, e)| e.core).collect();
        for core in cores {
            core.shutdown().await;
        }
    }

    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = registry.retention.max(Duration::from_secs(30)) / 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.sweep().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
