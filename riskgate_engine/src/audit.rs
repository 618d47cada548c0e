//! Append-only audit trail of stage attempts.
//!
//! One [`AuditRecord`] is written per stage attempt, including retries,
//! timeouts, cancelled attempts and non-blocking stages. Records are kept in
//! memory and, when an audit directory is configured, mirrored as JSON lines
//! to `{audit_dir}/{workflow_id}.jsonl`.
//!
//! Audit failures are reported to the caller but never fail a workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use riskgate_core::{StageId, StageResult, StageStatus, WorkflowId};

/// Error types for audit operations.
#[derive(Error, Debug)]
pub enum AuditError {
    /// Failed to serialize audit record
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Failed to write audit file
    #[error("Write failed: {0}")]
    WriteFailed(#[from] std::io::Error),

    /// Failed to create audit directory
    #[error("Directory creation failed: {0}")]
    DirectoryFailed(String),
}

/// Audit record for one stage attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
    /// Owning workflow (session id)
    pub workflow_id: WorkflowId,
    /// Stage that ran
    pub stage_id: StageId,
    /// 1-based attempt number
    pub attempt: u32,
    /// Attempt status
    pub status: StageStatus,
    /// Outcome label recorded for the attempt
    pub outcome_label: String,
    /// Attempt duration
    pub duration_ms: u64,
}

impl AuditRecord {
    /// Builds the record for a recorded stage result.
    pub fn from_result(workflow_id: WorkflowId, result: &StageResult) -> Self {
        Self {
            timestamp: result.finished_at,
            workflow_id,
            stage_id: result.stage_id.clone(),
            attempt: result.attempt,
            status: result.status,
            outcome_label: result.outcome_label.clone(),
            duration_ms: result.duration_ms(),
        }
    }
}

/// Shared, append-only audit log.
///
/// Cloning an audit log creates a new handle to the same records.
#[derive(Clone, Debug, Default)]
pub struct AuditLog {
    records: Arc<Mutex<Vec<AuditRecord>>>,
    audit_dir: Option<PathBuf>,
}

impl AuditLog {
    /// Creates an in-memory audit log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an audit log mirrored to JSON-lines files in `audit_dir`.
    ///
    /// The directory is created on first write.
    pub fn with_dir(audit_dir: impl Into<PathBuf>) -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            audit_dir: Some(audit_dir.into()),
        }
    }

    /// Audit directory, if records are mirrored to disk.
    pub fn audit_dir(&self) -> Option<&Path> {
        self.audit_dir.as_deref()
    }

    /// Appends a record and mirrors it to disk.
    ///
    /// The record is kept in memory even if the file write fails.
    pub async fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut records = self.records.lock().await;
        records.push(record.clone());

        // Lock held across the write so lines from concurrent stages never interleave
        if let Some(dir) = &self.audit_dir {
            Self::append_line(dir, &record).await?;
        }
        Ok(())
    }

    async fn append_line(dir: &Path, record: &AuditRecord) -> Result<(), AuditError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AuditError::DirectoryFailed(e.to_string()))?;

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let path = dir.join(format!("{}.jsonl", record.workflow_id));
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Returns every record, in append order.
    pub async fn replay(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }

    /// Returns the records of one workflow, in append order.
    pub async fn records_for(&self, workflow_id: WorkflowId) -> Vec<AuditRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    /// Reads the mirrored records of one workflow back from disk.
    pub async fn load_from_dir(dir: &Path, workflow_id: WorkflowId) -> Result<Vec<AuditRecord>, AuditError> {
        let content = tokio::fs::read_to_string(dir.join(format!("{}.jsonl", workflow_id))).await?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(AuditError::from))
            .collect()
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Returns true if nothing was recorded.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}
