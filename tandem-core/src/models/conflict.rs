use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Change, Operation};

/// Lifecycle of a conflict record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    /// Not resolved yet; the loser is retried on the next session.
    Deferred,
    Resolved,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStatus::Deferred => "deferred",
            ConflictStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deferred" => Ok(ConflictStatus::Deferred),
            "resolved" => Ok(ConflictStatus::Resolved),
            _ => Err(format!("Invalid conflict status '{}'", s)),
        }
    }
}

/// Classification of a conflict by (local, remote) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    UpdateUpdate,
    UpdateDelete,
    DeleteUpdate,
    DeleteDelete,
    InsertUpdate,
    UpdateInsert,
    /// Applying a change failed; the record carries the failure trace.
    ExceptionOccurred,
}

impl ConflictType {
    /// Classifies a conflict between the change currently applied locally
    /// and an incoming remote change.
    ///
    /// Pairs outside the six named types treat an insert as an update of the
    /// same item.
    pub fn classify(local: Operation, remote: Operation) -> Self {
        use Operation::*;
        match (local, remote) {
            (Update, Update) => ConflictType::UpdateUpdate,
            (Update, Delete) => ConflictType::UpdateDelete,
            (Delete, Update) => ConflictType::DeleteUpdate,
            (Delete, Delete) => ConflictType::DeleteDelete,
            (Insert, Update) => ConflictType::InsertUpdate,
            (Update, Insert) => ConflictType::UpdateInsert,
            (Insert, Insert) => ConflictType::UpdateUpdate,
            (Insert, Delete) => ConflictType::UpdateDelete,
            (Delete, Insert) => ConflictType::DeleteUpdate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::UpdateUpdate => "update_update",
            ConflictType::UpdateDelete => "update_delete",
            ConflictType::DeleteUpdate => "delete_update",
            ConflictType::DeleteDelete => "delete_delete",
            ConflictType::InsertUpdate => "insert_update",
            ConflictType::UpdateInsert => "update_insert",
            ConflictType::ExceptionOccurred => "exception_occurred",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update_update" => Ok(ConflictType::UpdateUpdate),
            "update_delete" => Ok(ConflictType::UpdateDelete),
            "delete_update" => Ok(ConflictType::DeleteUpdate),
            "delete_delete" => Ok(ConflictType::DeleteDelete),
            "insert_update" => Ok(ConflictType::InsertUpdate),
            "update_insert" => Ok(ConflictType::UpdateInsert),
            "exception_occurred" => Ok(ConflictType::ExceptionOccurred),
            _ => Err(format!("Invalid conflict type '{}'", s)),
        }
    }
}

/// One detected conflict (or failed application) and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// `None` while the record is deferred.
    pub resolved_at: Option<DateTime<Utc>>,
    /// The losing change, or the change that failed to apply.
    pub loser: Change,
    /// `None` only for [`ConflictType::ExceptionOccurred`].
    pub winner: Option<Change>,
    pub status: ConflictStatus,
    pub conflict_type: ConflictType,
    /// Failure trace for exception records.
    pub description: Option<String>,
}

impl ConflictRecord {
    /// A conflict that was decided on the spot.
    pub fn resolved(
        conflict_type: ConflictType,
        winner: Change,
        loser: Change,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            resolved_at: Some(now),
            loser,
            winner: Some(winner),
            status: ConflictStatus::Resolved,
            conflict_type,
            description: None,
        }
    }

    /// A change that could not be applied and will be retried later.
    pub fn deferred_exception(
        change: Change,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            resolved_at: None,
            loser: change,
            winner: None,
            status: ConflictStatus::Deferred,
            conflict_type: ConflictType::ExceptionOccurred,
            description: Some(description.into()),
        }
    }

    pub fn is_deferred(&self) -> bool {
        self.status == ConflictStatus::Deferred
    }

    /// Transitions a deferred record to resolved.
    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.status = ConflictStatus::Resolved;
        self.resolved_at = Some(now);
    }
}
