// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session conversation record: message log, file-role map, token
//! accounting, and the on-disk snapshot.

pub mod watcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::protocol::now_ms;

/// Speaker role in the conversation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// How a file currently relates to the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    Active,
    Readonly,
    Created,
    Deleted,
}

/// One entry in the ordered conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

/// Stat-derived record for one referenced file.
///
/// The fingerprint is a cheap `size-mtime` pair, not a content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub role: FileRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Cumulative token counters for the session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub requests: u64,
}

/// The serialized shape of a context snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextData {
    pub session_id: String,
    pub started_at_ms: u64,
    pub last_activity_ms: u64,
    pub log: Vec<ContextMessage>,
    pub files: HashMap<String, FileRecord>,
    pub usage: TokenUsage,
}

/// Mutex-protected conversation context owned by the session runtime.
pub struct ConversationContext {
    inner: RwLock<ContextData>,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            inner: RwLock::new(ContextData {
                session_id: session_id.into(),
                started_at_ms: now,
                last_activity_ms: now,
                log: Vec::new(),
                files: HashMap::new(),
                usage: TokenUsage::default(),
            }),
        }
    }

    /// Restore a context from its snapshot file, or start fresh when no
    /// snapshot exists or it fails to parse.
    pub fn load_or_new(path: &Path, session_id: &str) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<ContextData>(&bytes) {
                Ok(data) => Self { inner: RwLock::new(data) },
                Err(e) => {
                    debug!("discarding unreadable context snapshot: {e}");
                    Self::new(session_id)
                }
            },
            Err(_) => Self::new(session_id),
        }
    }

    pub async fn add_user_message(&self, content: impl Into<String>, files: Vec<String>) {
        self.push(Role::User, content.into(), files, vec![]).await;
    }

    pub async fn add_assistant_response(
        &self,
        content: impl Into<String>,
        files_touched: Vec<String>,
        actions: Vec<String>,
    ) {
        self.push(Role::Assistant, content.into(), files_touched, actions).await;
    }

    pub async fn add_system_message(&self, content: impl Into<String>) {
        self.push(Role::System, content.into(), vec![], vec![]).await;
    }

    async fn push(&self, role: Role, content: String, files: Vec<String>, actions: Vec<String>) {
        let mut inner = self.inner.write().await;
        inner.last_activity_ms = now_ms();
        inner.log.push(ContextMessage {
            role,
            content,
            timestamp_ms: now_ms(),
            files,
            actions,
        });
    }

    /// Record or refresh a file's role.
    ///
    /// Deleted files keep their entry with the stat fields cleared; for
    /// everything else the file is stat'd for size/mtime/fingerprint.
    pub async fn update_file(&self, path: &Path, role: FileRole) {
        let record = match role {
            FileRole::Deleted => {
                FileRecord { role, size: None, mtime_ms: None, fingerprint: None }
            }
            _ => {
                let meta = std::fs::metadata(path).ok();
                let size = meta.as_ref().map(|m| m.len());
                let mtime_ms = meta
                    .as_ref()
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64);
                let fingerprint = match (size, mtime_ms) {
                    (Some(s), Some(t)) => Some(format!("{s}-{t}")),
                    _ => None,
                };
                FileRecord { role, size, mtime_ms, fingerprint }
            }
        };

        let mut inner = self.inner.write().await;
        inner.last_activity_ms = now_ms();
        inner.files.insert(path.to_string_lossy().into_owned(), record);
    }

    pub async fn record_usage(&self, prompt_tokens: u64, completion_tokens: u64) {
        let mut inner = self.inner.write().await;
        inner.usage.prompt_tokens += prompt_tokens;
        inner.usage.completion_tokens += completion_tokens;
        inner.usage.requests += 1;
    }

    /// The most recent `n` log entries, oldest first.
    pub async fn get_recent(&self, n: usize) -> Vec<ContextMessage> {
        let inner = self.inner.read().await;
        let skip = inner.log.len().saturating_sub(n);
        inner.log.iter().skip(skip).cloned().collect()
    }

    /// Paths currently marked active or created.
    pub async fn get_active_files(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut files: Vec<String> = inner
            .files
            .iter()
            .filter(|(_, r)| matches!(r.role, FileRole::Active | FileRole::Created))
            .map(|(p, _)| p.clone())
            .collect();
        files.sort();
        files
    }

    pub async fn snapshot(&self) -> ContextData {
        self.inner.read().await.clone()
    }

    /// Serialize the whole context to `path` atomically (write-then-rename).
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = {
            let inner = self.inner.read().await;
            serde_json::to_vec_pretty(&*inner)?
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
