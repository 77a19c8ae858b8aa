// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debounced filesystem watcher feeding the conversation context.
//!
//! Raw `notify` events are coalesced per path inside a debounce window;
//! the most recent change kind wins and fires once when the window ends.
//! Paths that cannot matter to the project (hidden files, build output,
//! editor droppings, logs) never reach the context.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ConversationContext, FileRole};

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Watching more directories than this is a sign something went wrong
/// (a generated tree slipped past the filters); stop growing the set.
pub const MAX_WATCHED_DIRS: usize = 256;

const FLUSH_TICK: Duration = Duration::from_millis(100);

/// Classified change for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// The file-role the context records for this change.
    pub fn file_role(&self) -> FileRole {
        match self {
            Self::Created => FileRole::Created,
            Self::Modified => FileRole::Active,
            Self::Deleted => FileRole::Deleted,
        }
    }
}

/// A debounced, filtered change ready for the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Should this path's changes reach the context at all?
pub fn is_relevant(path: &Path) -> bool {
    const IGNORED_DIRS: &[&str] = &[
        ".git",
        "target",
        "node_modules",
        "dist",
        "build",
        "__pycache__",
        ".cache",
        "vendor",
        ".venv",
        "venv",
    ];
    const IGNORED_SUFFIXES: &[&str] =
        &["~", ".swp", ".swo", ".swx", ".tmp", ".bak", ".orig", ".log"];
    const HIDDEN_ALLOWED: &[&str] = &[".env", ".gitignore"];

    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    for component in path.components() {
        let text = component.as_os_str().to_string_lossy();
        if IGNORED_DIRS.contains(&text.as_ref()) {
            return false;
        }
        // Hidden directories anywhere on the path hide their contents.
        if text.starts_with('.') && text != name && text != "." && text != ".." {
            return false;
        }
    }

    if name.starts_with('.') && !HIDDEN_ALLOWED.contains(&name) {
        return false;
    }
    if name.starts_with(".#") || (name.starts_with('#') && name.ends_with('#')) {
        return false;
    }
    if IGNORED_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        return false;
    }
    true
}

/// Map a raw notify event to our change kind. Access/metadata-only events
/// return `None`.
pub fn classify(kind: &notify::EventKind) -> Option<ChangeKind> {
    use notify::EventKind;
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(notify::event::ModifyKind::Data(_))
        | EventKind::Modify(notify::event::ModifyKind::Any)
        | EventKind::Modify(notify::event::ModifyKind::Name(_)) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}

/// Pure per-path coalescing: the latest kind within a window wins and
/// fires once when the window closes.
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, (ChangeKind, Instant)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, pending: HashMap::new() }
    }

    /// Record a raw change, restarting that path's window.
    pub fn observe(&mut self, path: PathBuf, kind: ChangeKind, now: Instant) {
        self.pending.insert(path, (kind, now));
    }

    /// Take every event whose window has closed, in path order.
    pub fn take_due(&mut self, now: Instant) -> Vec<FileEvent> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| now.duration_since(*at) >= self.window)
            .map(|(p, _)| p.clone())
            .collect();

        let mut out: Vec<FileEvent> = due
            .into_iter()
            .filter_map(|path| {
                self.pending.remove(&path).map(|(kind, _)| FileEvent { path, kind })
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Running watch task; dropping the handle does not stop it, cancel the
/// token it was spawned with.
pub struct FileWatcher {
    root: PathBuf,
}

impl FileWatcher {
    /// Watch `root` recursively and apply debounced changes to `context`.
    ///
    /// Create/write events auto-add their parent directory to the watch
    /// set (new directories under non-recursive platforms), bounded by
    /// [`MAX_WATCHED_DIRS`].
    pub fn spawn(
        root: PathBuf,
        context: Arc<ConversationContext>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<(PathBuf, ChangeKind)>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            let Some(kind) = classify(&event.kind) else { return };
            for path in event.paths {
                let _ = raw_tx.send((path, kind));
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        tokio::spawn(run_loop(watcher, raw_rx, context, cancel));
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

async fn run_loop(
    mut watcher: notify::RecommendedWatcher,
    mut raw_rx: mpsc::UnboundedReceiver<(PathBuf, ChangeKind)>,
    context: Arc<ConversationContext>,
    cancel: CancellationToken,
) {
    let mut debouncer = Debouncer::new(DEBOUNCE_WINDOW);
    let mut watched_dirs: Vec<PathBuf> = Vec::new();
    let mut ticker = tokio::time::interval(FLUSH_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            raw = raw_rx.recv() => {
                let Some((path, kind)) = raw else { break };
                if !is_relevant(&path) {
                    continue;
                }
                if kind != ChangeKind::Deleted {
                    grow_watch_set(&mut watcher, &mut watched_dirs, &path);
                }
                debouncer.observe(path, kind, Instant::now());
            }
            _ = ticker.tick() => {
                for event in debouncer.take_due(Instant::now()) {
                    debug!(path = %event.path.display(), kind = ?event.kind, "file change");
                    context.update_file(&event.path, event.kind.file_role()).await;
                }
            }
        }
    }
}

/// Add the path's parent directory to the watch set if it is new, up to
/// the sanity cap.
fn grow_watch_set(
    watcher: &mut notify::RecommendedWatcher,
    watched: &mut Vec<PathBuf>,
    path: &Path,
) {
    let Some(parent) = path.parent() else { return };
    if watched.iter().any(|d| d == parent) {
        return;
    }
    if watched.len() >= MAX_WATCHED_DIRS {
        return;
    }
    match watcher.watch(parent, RecursiveMode::NonRecursive) {
        Ok(()) => watched.push(parent.to_path_buf()),
        Err(e) => warn!(dir = %parent.display(), "could not extend watch set: {e}"),
    }
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
