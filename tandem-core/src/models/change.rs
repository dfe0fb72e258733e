use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::clock::{CausalClock, ClockEntry};

/// Mutation recorded by a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(Operation::Insert),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            _ => Err(format!(
                "Invalid operation '{}'. Valid options: insert, update, delete",
                s
            )),
        }
    }
}

/// The atomic unit of replication.
///
/// A change is created exactly once, either authored locally or received from
/// a remote provider, and is looked up by `id` on every later delivery. After
/// creation only `is_applied` and `should_ignore` ever change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Assigned at authoring time; the idempotency key.
    pub id: Uuid,
    /// Set on first local persistence, cleared before transmission.
    #[serde(with = "chrono::serde::ts_microseconds_option")]
    pub created_at: Option<DateTime<Utc>>,
    pub operation: Operation,
    pub item_id: String,
    /// Provider that authored this change.
    pub authoring_provider_id: String,
    /// This change's own position in its author's clock.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub authoring_timestamp: DateTime<Utc>,
    /// Provider that first created the item.
    pub origin_provider_id: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub origin_timestamp: DateTime<Utc>,
    /// Serialized item, never interpreted by the protocol.
    pub payload: String,
    /// Set forever once this change loses a conflict.
    pub should_ignore: bool,
    pub is_applied: bool,
    /// Causal context the author had when making the edit.
    pub vector_clock: CausalClock,
}

impl Change {
    /// Creates an unapplied change that has not been persisted anywhere yet.
    pub fn new(
        operation: Operation,
        item_id: impl Into<String>,
        authoring: ClockEntry,
        origin: ClockEntry,
        payload: impl Into<String>,
        vector_clock: CausalClock,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: None,
            operation,
            item_id: item_id.into(),
            authoring_provider_id: authoring.provider_id,
            authoring_timestamp: authoring.timestamp,
            origin_provider_id: origin.provider_id,
            origin_timestamp: origin.timestamp,
            payload: payload.into(),
            should_ignore: false,
            is_applied: false,
            vector_clock,
        }
    }

    pub fn authoring_entry(&self) -> ClockEntry {
        ClockEntry::new(self.authoring_provider_id.clone(), self.authoring_timestamp)
    }

    pub fn origin_entry(&self) -> ClockEntry {
        ClockEntry::new(self.origin_provider_id.clone(), self.origin_timestamp)
    }

    pub fn mark_applied(&mut self) {
        self.is_applied = true;
    }

    /// Marks the change as a conflict loser: applied without ever being
    /// executed.
    pub fn mark_ignored(&mut self) {
        self.is_applied = true;
        self.should_ignore = true;
    }

    /// Clears the fields that only make sense to the provider holding the
    /// change. Called before a change leaves its provider.
    pub fn reset_status(&mut self) {
        self.is_applied = false;
        self.should_ignore = false;
        self.created_at = None;
    }
}
