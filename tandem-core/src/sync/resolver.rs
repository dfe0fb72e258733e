use crate::models::{Change, ConflictType, Operation};

/// Picks the winner of a classified conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Returns `(winner, loser)`, or `None` for conflicts that have no winner
    /// ([`ConflictType::ExceptionOccurred`]).
    ///
    /// Timestamp races go to the later authoring timestamp; exact ties go to
    /// the higher change id so both providers agree.
    pub fn resolve<'a>(
        &self,
        conflict_type: ConflictType,
        local: &'a Change,
        remote: &'a Change,
    ) -> Option<(&'a Change, &'a Change)> {
        match conflict_type {
            ConflictType::UpdateUpdate
            | ConflictType::DeleteDelete
            | ConflictType::InsertUpdate
            | ConflictType::UpdateInsert => Some(most_recent(local, remote)),
            ConflictType::UpdateDelete | ConflictType::DeleteUpdate => {
                Some(deletion_wins(local, remote))
            }
            ConflictType::ExceptionOccurred => None,
        }
    }
}

fn most_recent<'a>(local: &'a Change, remote: &'a Change) -> (&'a Change, &'a Change) {
    let local_key = (local.authoring_timestamp, local.id);
    let remote_key = (remote.authoring_timestamp, remote.id);
    if remote_key > local_key {
        (remote, local)
    } else {
        (local, remote)
    }
}

fn deletion_wins<'a>(local: &'a Change, remote: &'a Change) -> (&'a Change, &'a Change) {
    match (local.operation, remote.operation) {
        (Operation::Delete, Operation::Delete) => most_recent(local, remote),
        (Operation::Delete, _) => (local, remote),
        (_, Operation::Delete) => (remote, local),
        _ => most_recent(local, remote),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{CausalClock, ClockEntry};
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn change(provider: &str, operation: Operation, at: i64) -> Change {
        Change::new(
            operation,
            "item-1",
            ClockEntry::new(provider, t(at)),
            ClockEntry::new("a", t(0)),
            "{}",
            CausalClock::empty().with(provider, t(at)),
        )
    }

    #[test]
    fn test_most_recent_wins() {
        let resolver = ConflictResolver::new();
        let local = change("a", Operation::Update, 10);
        let remote = change("b", Operation::Update, 20);

        for conflict_type in [
            ConflictType::UpdateUpdate,
            ConflictType::DeleteDelete,
            ConflictType::InsertUpdate,
            ConflictType::UpdateInsert,
        ] {
            let (winner, loser) = resolver.resolve(conflict_type, &local, &remote).unwrap();
            assert_eq!(winner.id, remote.id);
            assert_eq!(loser.id, local.id);

            let (winner, _) = resolver.resolve(conflict_type, &remote, &local).unwrap();
            assert_eq!(winner.id, remote.id);
        }
    }

    #[test]
    fn test_deletion_wins_regardless_of_time() {
        let resolver = ConflictResolver::new();
        let delete = change("a", Operation::Delete, 1);
        let update = change("b", Operation::Update, 99);

        let (winner, loser) = resolver
            .resolve(ConflictType::DeleteUpdate, &delete, &update)
            .unwrap();
        assert_eq!(winner.id, delete.id);
        assert_eq!(loser.id, update.id);

        let (winner, loser) = resolver
            .resolve(ConflictType::UpdateDelete, &update, &delete)
            .unwrap();
        assert_eq!(winner.id, delete.id);
        assert_eq!(loser.id, update.id);
    }

    #[test]
    fn test_equal_timestamps_break_ties_on_id() {
        let resolver = ConflictResolver::new();
        let mut local = change("a", Operation::Update, 5);
        let mut remote = change("b", Operation::Update, 5);
        local.id = Uuid::from_u128(1);
        remote.id = Uuid::from_u128(2);

        let (winner, _) = resolver
            .resolve(ConflictType::UpdateUpdate, &local, &remote)
            .unwrap();
        assert_eq!(winner.id, remote.id);

        let (winner, _) = resolver
            .resolve(ConflictType::UpdateUpdate, &remote, &local)
            .unwrap();
        assert_eq!(winner.id, remote.id);
    }

    #[test]
    fn test_exception_has_no_winner() {
        let resolver = ConflictResolver::new();
        let local = change("a", Operation::Update, 1);
        let remote = change("b", Operation::Update, 2);
        assert!(resolver
            .resolve(ConflictType::ExceptionOccurred, &local, &remote)
            .is_none());
    }
}
