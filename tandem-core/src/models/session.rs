use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Change;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSessionStatus {
    InProgress,
    Finished,
    Failed,
}

impl SyncSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSessionStatus::InProgress => "in_progress",
            SyncSessionStatus::Finished => "finished",
            SyncSessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncSessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(SyncSessionStatus::InProgress),
            "finished" => Ok(SyncSessionStatus::Finished),
            "failed" => Ok(SyncSessionStatus::Failed),
            _ => Err(format!("Invalid sync session status '{}'", s)),
        }
    }
}

/// One directed synchronization pass, as recorded by one of its two
/// providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SyncSessionStatus,
    pub source_provider_id: String,
    pub target_provider_id: String,
    /// Every change sent or received during the pass, in order.
    pub changes: Vec<Change>,
}

impl SyncSession {
    pub fn start(
        source_provider_id: impl Into<String>,
        target_provider_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: now,
            ended_at: None,
            status: SyncSessionStatus::InProgress,
            source_provider_id: source_provider_id.into(),
            target_provider_id: target_provider_id.into(),
            changes: Vec::new(),
        }
    }

    pub fn record(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.status = SyncSessionStatus::Finished;
        self.ended_at = Some(now);
    }

    pub fn fail(&mut self, now: DateTime<Utc>) {
        self.status = SyncSessionStatus::Failed;
        self.ended_at = Some(now);
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == SyncSessionStatus::InProgress
    }
}
