//! Working-state lock held for the duration of a harness command

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Locks left behind by a crashed test run expire after this many seconds
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 600;

/// Harness commands that touch the working state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Refresh,
    Plan,
    Apply,
    Import,
    Destroy,
    Taint,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Refresh => "refresh",
            Command::Plan => "plan",
            Command::Apply => "apply",
            Command::Import => "import",
            Command::Destroy => "destroy",
            Command::Taint => "taint",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information about a held lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: String,
    /// Command holding the lock
    pub operation: String,
    /// username@hostname
    pub who: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(command: Command) -> Self {
        Self::with_timeout(command, DEFAULT_LOCK_TIMEOUT_SECS)
    }

    pub fn with_timeout(command: Command, timeout_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: command.to_string(),
            who: lock_owner(),
            created: now,
            expires: now + Duration::seconds(timeout_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires
    }
}

fn lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}
