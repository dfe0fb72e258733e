use chrono::{DateTime, Utc};

use super::Change;
use crate::clock::CausalClock;

/// Current-state pointer of an item: the last change applied to it.
///
/// A version without a current change is a placeholder meaning "this
/// provider has never seen the item"; its clock is empty. When a current
/// change is set the version's clock is always that change's clock.
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    item_id: String,
    current_change: Option<Change>,
    vector_clock: CausalClock,
    created_at: DateTime<Utc>,
}

impl Version {
    /// Placeholder for an item this provider has never seen.
    pub fn placeholder(item_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            item_id: item_id.into(),
            current_change: None,
            vector_clock: CausalClock::empty(),
            created_at,
        }
    }

    /// Version pointing at `change`.
    pub fn for_change(change: Change, created_at: DateTime<Utc>) -> Self {
        Self {
            item_id: change.item_id.clone(),
            vector_clock: change.vector_clock.clone(),
            current_change: Some(change),
            created_at,
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn current_change(&self) -> Option<&Change> {
        self.current_change.as_ref()
    }

    pub fn vector_clock(&self) -> &CausalClock {
        &self.vector_clock
    }

    /// When the item was first added to this provider.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_placeholder(&self) -> bool {
        self.current_change.is_none()
    }
}
