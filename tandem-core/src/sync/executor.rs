use std::sync::Arc;

use futures::FutureExt;

use super::{ConflictResolver, SyncError};
use crate::clock::now_utc;
use crate::events::EventsManager;
use crate::models::{Change, ConflictRecord, ConflictType, SyncSession, Version};
use crate::query::{Query, QueryTracking};
use crate::store::{DataStore, DataStoreExt};

/// What a committed conflict check did.
enum Outcome {
    Applied {
        applied: Change,
        previous: Option<Change>,
    },
    Resolved {
        record: ConflictRecord,
        /// Set when the winner was executed by this check.
        applied: Option<Change>,
        previous: Option<Change>,
    },
}

/// Applies inbound changes to one provider's store.
pub struct ChangeExecutor {
    store: Arc<dyn DataStore>,
    events: Arc<dyn EventsManager>,
    resolver: ConflictResolver,
}

impl ChangeExecutor {
    pub fn new(store: Arc<dyn DataStore>, events: Arc<dyn EventsManager>) -> Self {
        Self {
            store,
            events,
            resolver: ConflictResolver::new(),
        }
    }

    /// Processes `changes` in order.
    pub async fn run(
        &self,
        session: &mut SyncSession,
        changes: &[Change],
        query: Option<&Query>,
    ) -> Result<(), SyncError> {
        for change in changes {
            self.process(session, change, query).await?;
        }
        Ok(())
    }

    /// Consumes one inbound change.
    ///
    /// Failures while applying are recorded as a deferred conflict and
    /// swallowed; only storage errors outside the item transaction, protocol
    /// misuse and escalations are returned.
    pub async fn process(
        &self,
        session: &mut SyncSession,
        remote: &Change,
        query: Option<&Query>,
    ) -> Result<(), SyncError> {
        let (mut change, created) = self.store.get_or_create_change(remote).await?;
        if created {
            if let Some(query) = query {
                self.store
                    .update_query_clock(query, &change.authoring_entry())
                    .await?;
            }
        }
        self.events.on_change_seen(session, &change).await?;

        if change.is_applied {
            tracing::debug!(change_id = %change.id, "Change already applied, skipping");
            return Ok(());
        }

        if change.should_ignore {
            change.mark_applied();
            self.store.save_change(&change).await?;
            tracing::debug!(change_id = %change.id, "Ignoring change that lost a conflict");
            return Ok(());
        }

        match self.check_and_apply(&change).await {
            Ok(outcome) => self.after_commit(session, outcome).await,
            Err(error) if error.is_protocol_misuse() => Err(error),
            Err(error) => self.defer(session, &change, error).await,
        }
    }

    /// Conflict check and application, atomic per item.
    async fn check_and_apply(&self, change: &Change) -> Result<Outcome, SyncError> {
        let store = self.store.as_ref();
        let mut outcome = None;

        let work = async {
            let version = store.get_local_version(&change.item_id).await?;
            let previous = version.current_change().cloned();

            let Some(local) = previous.clone() else {
                let applied = self.apply(change, &version).await?;
                outcome = Some(Outcome::Applied { applied, previous });
                return Ok(());
            };

            let remote_knowledge = change.vector_clock.get(&local.authoring_provider_id);
            if !local.authoring_entry().is_after(&remote_knowledge)? {
                let applied = self.apply(change, &version).await?;
                outcome = Some(Outcome::Applied { applied, previous });
                return Ok(());
            }

            let conflict_type = ConflictType::classify(local.operation, change.operation);
            let Some((winner, loser)) = self.resolver.resolve(conflict_type, &local, change) else {
                return Err(SyncError::Escalated(format!(
                    "conflict type {} has no winner",
                    conflict_type
                )));
            };
            tracing::debug!(
                item_id = %change.item_id,
                conflict_type = %conflict_type,
                winner = %winner.id,
                loser = %loser.id,
                "Conflict detected"
            );

            let mut loser = loser.clone();
            loser.mark_ignored();
            store.save_change(&loser).await?;

            let winner_was_applied = winner.is_applied;
            let winner = self.apply(winner, &version).await?;

            let record = ConflictRecord::resolved(conflict_type, winner.clone(), loser, now_utc());
            store.save_conflict(&record).await?;

            outcome = Some(Outcome::Resolved {
                record,
                applied: (!winner_was_applied).then_some(winner),
                previous,
            });
            Ok::<(), SyncError>(())
        }
        .boxed();

        store.run_in_transaction(&change.item_id, work).await?;

        outcome.ok_or_else(|| SyncError::Escalated("transaction produced no outcome".to_string()))
    }

    /// Executes `change` unless it already was, then points the item's
    /// version at it.
    async fn apply(&self, change: &Change, version: &Version) -> Result<Change, SyncError> {
        let mut applied = change.clone();
        if !applied.is_applied {
            self.store.execute(&applied).await?;
            applied.mark_applied();
            self.store.save_change(&applied).await?;
        }
        self.store
            .save_version(&Version::for_change(applied.clone(), version.created_at()))
            .await?;
        Ok(applied)
    }

    async fn after_commit(
        &self,
        session: &mut SyncSession,
        outcome: Outcome,
    ) -> Result<(), SyncError> {
        match outcome {
            Outcome::Applied { applied, previous } => {
                self.events.on_change_applied(session, &applied).await?;
                self.resolve_deferred(session, &applied).await?;
                self.refresh_queries(&applied, previous.as_ref()).await
            }
            Outcome::Resolved {
                record,
                applied,
                previous,
            } => {
                self.events.on_conflict_resolved(session, &record).await?;
                self.resolve_deferred(session, &record.loser).await?;
                if let Some(applied) = applied {
                    self.events.on_change_applied(session, &applied).await?;
                    self.resolve_deferred(session, &applied).await?;
                    self.refresh_queries(&applied, previous.as_ref()).await?;
                }
                Ok(())
            }
        }
    }

    /// Marks deferred records about `change` as resolved, now that it is
    /// applied.
    async fn resolve_deferred(
        &self,
        session: &mut SyncSession,
        change: &Change,
    ) -> Result<(), SyncError> {
        for mut record in self.store.get_deferred_conflicts(change.id).await? {
            record.resolve(now_utc());
            record.loser = change.clone();
            self.store.save_conflict(&record).await?;
            tracing::debug!(
                conflict_id = %record.id,
                change_id = %change.id,
                "Deferred change resolved"
            );
            self.events.on_conflict_resolved(session, &record).await?;
        }
        Ok(())
    }

    async fn refresh_queries(
        &self,
        applied: &Change,
        previous: Option<&Change>,
    ) -> Result<(), SyncError> {
        if self.store.supports_queries() {
            self.store.refresh_tracked_queries(applied, previous).await?;
        }
        Ok(())
    }

    /// Records a failed application for retry. Repeated failures of the
    /// same change keep a single deferred record.
    async fn defer(
        &self,
        session: &mut SyncSession,
        change: &Change,
        error: SyncError,
    ) -> Result<(), SyncError> {
        let existing = self.store.get_deferred_conflicts(change.id).await?;
        if existing.is_empty() {
            let record =
                ConflictRecord::deferred_exception(change.clone(), error.to_string(), now_utc());
            self.store.save_conflict(&record).await?;
        }
        self.events.on_exception(session, change, &error).await
    }
}
