use super::Change;
use crate::clock::CausalClock;

/// A page of changes exchanged between two providers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    pub changes: Vec<Change>,
    /// No more pages follow this one.
    pub is_last: bool,
}

impl Batch {
    pub fn new(changes: Vec<Change>, is_last: bool) -> Self {
        Self { changes, is_last }
    }

    /// Splits an ordered selection into its first page of `limit` changes.
    pub fn paginate(mut selected: Vec<Change>, limit: usize) -> Self {
        let total = selected.len();
        selected.truncate(limit);
        let is_last = selected.len() == total;
        Self::new(selected, is_last)
    }

    /// The clock a provider reaches after applying every change in this batch
    /// on top of `initial`.
    pub fn clock_after(&self, initial: &CausalClock) -> CausalClock {
        let mut clock = initial.clone();
        for change in &self.changes {
            clock.update(&change.authoring_provider_id, change.authoring_timestamp);
        }
        clock
    }

    /// Strips receiver-local fields before the batch leaves its provider.
    pub fn reset_status(&mut self) {
        for change in &mut self.changes {
            change.reset_status();
        }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{now_utc, ClockEntry};
    use crate::models::Operation;
    use chrono::Duration;

    fn change_at(provider: &str, offset_ms: i64) -> Change {
        let at = now_utc() + Duration::milliseconds(offset_ms);
        Change::new(
            Operation::Update,
            "item-1",
            ClockEntry::new(provider, at),
            ClockEntry::new(provider, at),
            "{}",
            CausalClock::empty().with(provider, at),
        )
    }

    #[test]
    fn test_clock_after_folds_authoring_entries() {
        let first = change_at("a", 0);
        let second = change_at("a", 10);
        let third = change_at("b", 5);
        let batch = Batch::new(vec![first, second.clone(), third.clone()], true);

        let clock = batch.clock_after(&CausalClock::empty());

        assert_eq!(clock.timestamp("a"), second.authoring_timestamp);
        assert_eq!(clock.timestamp("b"), third.authoring_timestamp);
    }

    #[test]
    fn test_clock_after_never_regresses() {
        let change = change_at("a", 0);
        let initial =
            CausalClock::empty().with("a", change.authoring_timestamp + Duration::seconds(1));
        let batch = Batch::new(vec![change], true);

        assert_eq!(batch.clock_after(&initial), initial);
    }

    #[test]
    fn test_empty_batch_keeps_clock() {
        let initial = CausalClock::empty().with("a", now_utc());
        assert_eq!(Batch::default().clock_after(&initial), initial);
    }

    #[test]
    fn test_paginate_marks_last_page() {
        let changes: Vec<Change> = (0..5).map(|i| change_at("a", i)).collect();

        let first = Batch::paginate(changes.clone(), 3);
        assert_eq!(first.len(), 3);
        assert!(!first.is_last);

        let whole = Batch::paginate(changes, 5);
        assert!(whole.is_last);
    }

    #[test]
    fn test_reset_status_applies_to_every_change() {
        let mut change = change_at("a", 0);
        change.mark_ignored();
        change.created_at = Some(now_utc());
        let mut batch = Batch::new(vec![change.clone(), change], true);

        batch.reset_status();

        assert!(batch
            .changes
            .iter()
            .all(|c| !c.is_applied && !c.should_ignore && c.created_at.is_none()));
    }
}
