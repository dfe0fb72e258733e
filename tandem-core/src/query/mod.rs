//! Query model and query-scoped clock tracking.
//!
//! A [`Query`] selects a slice of one entity's items. Stores that support
//! queries can evaluate them against their change log, optionally as of an
//! earlier clock, and keep one [`TrackedQuery`] clock per query so a sync
//! pass can be scoped to that slice.

mod definition;
mod filter;
mod tracking;

use std::collections::HashSet;

pub use definition::{Query, QueryError, QueryId, SortOrder, TrackedQuery};
pub use filter::{Comparator, Comparison, Connector, Filter, FilterNode};
pub use tracking::QueryTracking;

use crate::clock::CausalClock;
use crate::item::{Item, ItemSerializer};
use crate::models::{Change, Operation};
use crate::store::StoreError;

/// Evaluates `query` over candidate changes given newest first.
///
/// The first applied, non-ignored candidate seen for an item decides its
/// state; with `as_of` set, candidates the clock has not seen are skipped
/// first. Deleted items are left out. Results are ordered by insertion, then
/// by the query's ordering, then paginated.
pub fn evaluate<'a>(
    query: &Query,
    candidates: impl IntoIterator<Item = &'a Change>,
    as_of: Option<&CausalClock>,
    serializer: &dyn ItemSerializer,
) -> Result<Vec<Item>, StoreError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut matched = Vec::new();

    for change in candidates {
        if !change.is_applied || change.should_ignore {
            continue;
        }
        if let Some(clock) = as_of {
            if change.authoring_timestamp > clock.timestamp(&change.authoring_provider_id) {
                continue;
            }
        }
        if !seen.insert(change.item_id.as_str()) {
            continue;
        }
        if change.operation == Operation::Delete {
            continue;
        }
        let item = serializer.deserialize(&change.payload)?;
        if item.entity_name == query.entity_name() && query.filter().matches(&item) {
            matched.push((change.origin_timestamp, item));
        }
    }

    matched.sort_by_key(|(inserted_at, _)| *inserted_at);
    let mut items: Vec<Item> = matched.into_iter().map(|(_, item)| item).collect();

    for order in query.ordering().iter().rev() {
        items.sort_by(|a, b| {
            let left = a.field(&order.field).unwrap_or_default();
            let right = b.field(&order.field).unwrap_or_default();
            let ordering = filter::sort_values(&left, &right);
            if order.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    let offset = query.offset().unwrap_or(0);
    let limit = query.limit().unwrap_or(usize::MAX);
    Ok(items.into_iter().skip(offset).take(limit).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockEntry;
    use crate::item::JsonItemSerializer;
    use chrono::{DateTime, TimeZone, Utc};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn applied(operation: Operation, item: &Item, inserted: i64, at: i64) -> Change {
        let payload = JsonItemSerializer.serialize(item).unwrap();
        let mut change = Change::new(
            operation,
            item.id.clone(),
            ClockEntry::new("a", t(at)),
            ClockEntry::new("a", t(inserted)),
            payload,
            CausalClock::empty().with("a", t(at)),
        );
        change.mark_applied();
        change
    }

    fn todo(id: &str, rank: i64, done: bool) -> Item {
        Item::new(id, "todo").with_field("rank", rank).with_field("done", done)
    }

    fn open() -> Query {
        Query::filtered("todo", Filter::compare("done", Comparator::Eq, false))
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_latest_change_decides() {
        let log = vec![
            applied(Operation::Insert, &todo("x", 1, false), 1, 1),
            applied(Operation::Insert, &todo("y", 2, false), 2, 2),
            applied(Operation::Update, &todo("x", 1, true), 1, 3),
        ];

        let items = evaluate(&open(), log.iter().rev(), None, &JsonItemSerializer).unwrap();

        assert_eq!(ids(&items), vec!["y"]);
    }

    #[test]
    fn test_as_of_travels_back() {
        let log = vec![
            applied(Operation::Insert, &todo("x", 1, false), 1, 1),
            applied(Operation::Update, &todo("x", 1, true), 1, 3),
        ];
        let clock = CausalClock::empty().with("a", t(2));

        let items = evaluate(&open(), log.iter().rev(), Some(&clock), &JsonItemSerializer).unwrap();

        assert_eq!(ids(&items), vec!["x"]);
        assert_eq!(items[0].field("done"), Some(serde_json::json!(false)));
    }

    #[test]
    fn test_deleted_and_ignored_items_are_skipped() {
        let mut ignored = applied(Operation::Update, &todo("y", 2, false), 2, 4);
        ignored.mark_ignored();
        let log = vec![
            applied(Operation::Insert, &todo("x", 1, false), 1, 1),
            applied(Operation::Insert, &todo("y", 2, true), 2, 2),
            applied(Operation::Delete, &todo("x", 1, false), 1, 3),
            ignored,
        ];

        let items = evaluate(&open(), log.iter().rev(), None, &JsonItemSerializer).unwrap();

        assert!(items.is_empty());
    }

    #[test]
    fn test_ordering_and_pagination() {
        let log = vec![
            applied(Operation::Insert, &todo("x", 3, false), 1, 1),
            applied(Operation::Insert, &todo("y", 1, false), 2, 2),
            applied(Operation::Insert, &todo("z", 2, false), 3, 3),
        ];
        let query = Query::new(
            "todo",
            Filter::all(),
            vec![SortOrder::desc("rank")],
            Some(2),
            Some(1),
        )
        .unwrap();

        let items = evaluate(&query, log.iter().rev(), None, &JsonItemSerializer).unwrap();

        assert_eq!(ids(&items), vec!["z", "y"]);
    }

    #[test]
    fn test_other_entities_are_ignored() {
        let note = Item::new("n", "note").with_field("done", false);
        let log = vec![applied(Operation::Insert, &note, 1, 1)];

        let items = evaluate(&open(), log.iter().rev(), None, &JsonItemSerializer).unwrap();

        assert!(items.is_empty());
    }
}
