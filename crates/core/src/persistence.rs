use crate::types::{Feedback, Turn};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What gets stored once an interview completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub user_id: String,
    pub candidate_name: String,
    pub role: String,
    pub conversation_log: Vec<Turn>,
    pub feedback: Feedback,
    pub completed_at: DateTime<Utc>,
}

/// A stored [`SessionSummary`] with the fields the store adds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub created_at: DateTime<Utc>,
}

/// Durable storage for finished interviews. Write-only from the engine's side.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Stores the summary and returns the id of the new record.
    async fn save(&self, summary: &SessionSummary) -> Result<String>;
}

/// Stores each session as `<dir>/<id>.json`.
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SessionSink for JsonDirSink {
    async fn save(&self, summary: &SessionSummary) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create sessions directory: {}", self.dir.display()))?;

        let record = SessionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            summary: summary.clone(),
            created_at: Utc::now(),
        };
        let path = self.dir.join(format!("{}.json", record.id));
        let body = serde_json::to_vec_pretty(&record).context("Failed to serialize session")?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write session file: {}", path.display()))?;

        tracing::debug!("Session written to {}", path.display());
        Ok(record.id)
    }
}
