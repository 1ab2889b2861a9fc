/// Audit logging for firewall-mutating actions
///
/// Every start/stop/promote/demote is appended to a JSON-lines file next to
/// the state file, whether it succeeded or not. Failures to write the audit
/// log are logged and otherwise ignored; they never change an action's result.
use crate::core::role::Role;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Name of the audit file inside the state directory
pub const AUDIT_FILE_NAME: &str = "roleguard-audit.log";

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Start,
    Stop,
    Promote,
    Demote,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub event_type: EventType,

    /// Role reached, `None` after stop or on failure
    pub role: Option<Role>,

    /// Backend that executed the change
    pub backend: String,

    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        role: Option<Role>,
        backend: &str,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            role,
            backend: backend.to_string(),
            success: error.is_none(),
            details,
            error,
        }
    }
}

/// Audit log writer
#[derive(Debug, Clone)]
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    /// Audit log living beside `state_path`, if it has a parent directory.
    pub fn beside(state_path: &Path) -> Option<Self> {
        state_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|dir| Self::new(dir.join(AUDIT_FILE_NAME)))
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    pub async fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events from the log, newest first
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

/// Records an event, downgrading write failures to a warning.
pub async fn record(audit: Option<&AuditLog>, event: AuditEvent) {
    if let Some(audit) = audit
        && let Err(e) = audit.log(&event).await
    {
        tracing::warn!("Failed to write audit log {:?}: {}", audit.path(), e);
    }
}
