use std::collections::HashSet;

use async_trait::async_trait;

use super::{Query, TrackedQuery};
use crate::clock::{CausalClock, ClockEntry};
use crate::item::Item;
use crate::models::Change;
use crate::store::{DataStore, StoreError};

/// Per-query clock bookkeeping, shared by every store that supports queries.
#[async_trait]
pub trait QueryTracking: DataStore {
    /// Starts tracking `query` from an empty clock, replacing any previous
    /// clock.
    async fn start_tracking_query(&self, query: &Query) -> Result<TrackedQuery, StoreError> {
        let tracked = TrackedQuery::new(query.clone());
        self.save_tracked_query(&tracked).await?;
        tracing::debug!(query_id = %tracked.id(), "Started tracking query");
        Ok(tracked)
    }

    /// Returns the tracked query, starting to track it if needed.
    async fn ensure_tracking_query(&self, query: &Query) -> Result<TrackedQuery, StoreError> {
        match self.get_tracked_query(&query.id()).await? {
            Some(tracked) => Ok(tracked),
            None => self.start_tracking_query(query).await,
        }
    }

    /// Advances the query's clock with `entry`.
    async fn update_query_clock(
        &self,
        query: &Query,
        entry: &ClockEntry,
    ) -> Result<(), StoreError> {
        let mut tracked = self.ensure_tracking_query(query).await?;
        if tracked.vector_clock.update(&entry.provider_id, entry.timestamp) {
            self.save_tracked_query(&tracked).await?;
        }
        Ok(())
    }

    /// Ids of items in the result set now or as of `as_of`. Including the
    /// latter is what delivers departures from the result set.
    async fn item_ids_for_query(
        &self,
        query: &Query,
        as_of: &CausalClock,
    ) -> Result<HashSet<String>, StoreError> {
        let before = self.query_items(query, Some(as_of)).await?;
        let now = self.query_items(query, None).await?;
        Ok(before.into_iter().chain(now).map(|item| item.id).collect())
    }

    /// Whether `item` matches the query's filter and is part of its result
    /// set (now, or as of `as_of`).
    async fn impacts_query(
        &self,
        item: &Item,
        query: &Query,
        as_of: Option<&CausalClock>,
    ) -> Result<bool, StoreError> {
        if item.entity_name != query.entity_name() || !query.filter().matches(item) {
            return Ok(false);
        }
        let items = self.query_items(query, as_of).await?;
        Ok(items.iter().any(|candidate| candidate.id == item.id))
    }

    /// Advances the clock of every tracked query that `change` enters, or that
    /// the item's previous state `previous` belonged to.
    async fn refresh_tracked_queries(
        &self,
        change: &Change,
        previous: Option<&Change>,
    ) -> Result<(), StoreError> {
        let tracked_queries = self.list_tracked_queries().await?;
        if tracked_queries.is_empty() {
            return Ok(());
        }

        let item = self.serializer().deserialize(&change.payload)?;
        let old_item = match previous {
            Some(previous) => Some(self.serializer().deserialize(&previous.payload)?),
            None => None,
        };

        for tracked in tracked_queries {
            let mut impacted = self.impacts_query(&item, &tracked.query, None).await?;
            if !impacted {
                if let Some(old_item) = &old_item {
                    impacted = self
                        .impacts_query(old_item, &tracked.query, Some(&tracked.vector_clock))
                        .await?;
                }
            }
            if impacted {
                self.update_query_clock(&tracked.query, &change.authoring_entry())
                    .await?;
            }
        }
        Ok(())
    }
}

impl<T: DataStore + ?Sized> QueryTracking for T {}
