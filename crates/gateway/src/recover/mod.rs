// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure taxonomy and backoff-and-retry recovery strategies.
//!
//! Errors are classified once, at the boundary where they become
//! user-visible; the recovery manager dispatches on the kind through a
//! small hook interface provided by whichever component owns the
//! resources being recovered.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::GatewayError;

pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_ATTEMPT_CAP: u32 = 3;

/// Taxonomy of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Timeout,
    Process,
    Api,
    Filesystem,
    Auth,
    RateLimit,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Process => "process",
            Self::Api => "api",
            Self::Filesystem => "filesystem",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Unknown => "unknown",
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection | Self::Timeout | Self::Process | Self::Api | Self::RateLimit
        )
    }

    /// User-facing template for the final error chunk.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Connection => "Connection to the assistant was lost. Reconnecting.",
            Self::Timeout => "Request timed out. Please try again.",
            Self::Process => "The assistant process stopped and is being restarted.",
            Self::Api => "The assistant's backing service returned an error. Please retry.",
            Self::Filesystem => "A file operation failed. Workspace state was preserved.",
            Self::Auth => "Authentication failed. Check the assistant's credentials.",
            Self::RateLimit => "Rate limited by the assistant's backing service. Please wait.",
            Self::Unknown => "Something went wrong. Please try again.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error after classification: kind, original detail, and an optional
/// explicit retry-after delay extracted from the message.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub detail: String,
    pub retry_after: Option<Duration>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into(), retry_after: None }
    }
}

/// Classify an error chain into the taxonomy.
pub fn classify(err: &anyhow::Error) -> ClassifiedError {
    let detail = format!("{err:#}");

    let kind = match err.downcast_ref::<GatewayError>() {
        Some(GatewayError::WriteTimeout)
        | Some(GatewayError::InitTimeout(_))
        | Some(GatewayError::ChatTimeout) => ErrorKind::Timeout,
        Some(GatewayError::SpawnFailed(_))
        | Some(GatewayError::ProcessExited(_))
        | Some(GatewayError::NotRunning)
        | Some(GatewayError::PtyAllocFailed(_)) => ErrorKind::Process,
        _ => classify_detail(&detail),
    };

    ClassifiedError { kind, detail: detail.clone(), retry_after: parse_retry_after(&detail) }
}

/// Substring-signal classification of an error message.
///
/// Ordering matters: the more specific signals (auth, rate limit) are
/// checked before the broad ones (api). Unmatched messages are `unknown`.
pub fn classify_detail(detail: &str) -> ErrorKind {
    let lower = detail.to_lowercase();
    let has = |signals: &[&str]| signals.iter().any(|s| lower.contains(s));

    if has(&["unauthorized", "forbidden", "invalid api key", "authentication", "credential"]) {
        return ErrorKind::Auth;
    }
    if has(&["rate limit", "rate_limit", "too many requests", "429", "quota"]) {
        return ErrorKind::RateLimit;
    }
    if has(&["timeout", "timed out", "deadline"]) {
        return ErrorKind::Timeout;
    }
    if has(&[
        "connection refused",
        "connection reset",
        "broken pipe",
        "network",
        "websocket",
        "econnrefused",
        "enotfound",
        "dns",
    ]) {
        return ErrorKind::Connection;
    }
    if has(&["no such file", "read-only file system", "permission denied", "enoent", "enospc", "disk"])
    {
        return ErrorKind::Filesystem;
    }
    if has(&["process", "exited", "killed", "spawn", "sigterm", "sigkill"]) {
        return ErrorKind::Process;
    }
    if has(&["api", "overloaded", "server error", "internal error", "500", "502", "503"]) {
        return ErrorKind::Api;
    }
    ErrorKind::Unknown
}

/// Extract an explicit `retry after <seconds>` hint from a message.
fn parse_retry_after(detail: &str) -> Option<Duration> {
    let lower = detail.to_lowercase();
    let idx = lower.find("retry after").map(|i| i + "retry after".len())?;
    let rest = lower.get(idx..)?.trim_start_matches([' ', ':']);
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let secs: u64 = digits.parse().ok()?;
    Some(Duration::from_secs(secs))
}

/// Recovery actions provided by the component that owns the resources.
///
/// Object-safe so owners can hand the manager a `&dyn RecoveryHooks`.
pub trait RecoveryHooks: Send + Sync {
    /// Tear down and restart the supervised process.
    fn restart_process(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Re-establish the transport to the supervised process.
    fn reset_connection(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Persist and release what can be released without a restart.
    fn cleanup_resources(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

/// Per-kind retry accounting with exponential backoff.
pub struct RecoveryManager {
    attempts: Mutex<HashMap<ErrorKind, u32>>,
    base_backoff: Duration,
    max_backoff: Duration,
    attempt_cap: u32,
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryManager {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_BASE_BACKOFF, DEFAULT_MAX_BACKOFF, DEFAULT_ATTEMPT_CAP)
    }

    pub fn with_limits(base_backoff: Duration, max_backoff: Duration, attempt_cap: u32) -> Self {
        Self { attempts: Mutex::new(HashMap::new()), base_backoff, max_backoff, attempt_cap }
    }

    /// Attempt recovery for a classified error.
    ///
    /// Waits out the backoff (or the error's explicit retry-after), then
    /// dispatches: process and timeout restart the process, connection
    /// resets the transport, filesystem runs cleanup, api and rate-limit
    /// take no local action. Auth and unknown errors are never retried.
    /// A successful recovery clears that kind's attempt counter.
    pub async fn recover(
        &self,
        error: &ClassifiedError,
        hooks: &dyn RecoveryHooks,
    ) -> anyhow::Result<()> {
        match error.kind {
            ErrorKind::Auth => anyhow::bail!("auth errors are not retryable: {}", error.detail),
            ErrorKind::Unknown => {
                anyhow::bail!("unclassified error, not retrying: {}", error.detail)
            }
            _ => {}
        }

        let attempt = {
            let mut attempts = self.attempts.lock().await;
            let n = attempts.entry(error.kind).or_insert(0);
            if *n >= self.attempt_cap {
                anyhow::bail!("retry cap reached for {} errors", error.kind);
            }
            *n += 1;
            *n - 1
        };

        let delay = error.retry_after.unwrap_or_else(|| self.backoff(attempt));
        debug!(kind = %error.kind, attempt, ?delay, "recovery backoff");
        tokio::time::sleep(delay).await;

        let result = match error.kind {
            ErrorKind::Process | ErrorKind::Timeout => hooks.restart_process().await,
            ErrorKind::Connection => hooks.reset_connection().await,
            ErrorKind::Filesystem => hooks.cleanup_resources().await,
            // The caller's natural retry path handles these after the delay.
            ErrorKind::Api | ErrorKind::RateLimit => Ok(()),
            ErrorKind::Auth | ErrorKind::Unknown => unreachable!("rejected above"),
        };

        match result {
            Ok(()) => {
                self.attempts.lock().await.insert(error.kind, 0);
                Ok(())
            }
            Err(e) => {
                warn!(kind = %error.kind, "recovery action failed: {e:#}");
                Err(e)
            }
        }
    }

    /// Exponential backoff: base doubling per attempt, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    pub async fn attempts_for(&self, kind: ErrorKind) -> u32 {
        *self.attempts.lock().await.get(&kind).unwrap_or(&0)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
