//! Sync lifecycle notifications.
//!
//! The active [`SyncSession`] is owned by the caller and passed into every
//! hook; an events manager only does bookkeeping around it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clock::now_utc;
use crate::models::{Batch, Change, ConflictRecord, SyncSession};
use crate::store::DataStore;
use crate::sync::SyncError;

/// Receives the lifecycle events of sync sessions on one provider.
#[async_trait]
pub trait EventsManager: Send + Sync {
    /// Creates and persists a new in-progress session.
    async fn on_start_sync_session(
        &self,
        source_provider_id: &str,
        target_provider_id: &str,
    ) -> Result<SyncSession, SyncError>;

    /// A remote change was received, whatever happens to it next.
    async fn on_change_seen(&self, session: &mut SyncSession, change: &Change)
        -> Result<(), SyncError>;

    async fn on_change_applied(&self, session: &mut SyncSession, change: &Change)
        -> Result<(), SyncError>;

    /// A page of changes was handed to the other provider.
    async fn on_changes_sent(&self, session: &mut SyncSession, batch: &Batch)
        -> Result<(), SyncError>;

    async fn on_conflict_resolved(
        &self,
        session: &mut SyncSession,
        record: &ConflictRecord,
    ) -> Result<(), SyncError>;

    /// A change failed to apply and was deferred. Returning an error aborts
    /// the session.
    async fn on_exception(
        &self,
        session: &mut SyncSession,
        change: &Change,
        error: &SyncError,
    ) -> Result<(), SyncError>;

    async fn on_end_sync_session(&self, session: &mut SyncSession) -> Result<(), SyncError>;

    /// The session failed. Returning an error escalates it to the caller.
    async fn on_failed_sync_session(
        &self,
        session: &mut SyncSession,
        error: &SyncError,
    ) -> Result<(), SyncError>;
}

/// Persists sessions to the provider's store and logs every event.
///
/// With `escalate` on, exceptions and session failures are returned to the
/// caller instead of being absorbed.
pub struct SessionEventsManager {
    store: Arc<dyn DataStore>,
    escalate: bool,
}

impl SessionEventsManager {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            escalate: false,
        }
    }

    pub fn escalating(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            escalate: true,
        }
    }
}

#[async_trait]
impl EventsManager for SessionEventsManager {
    async fn on_start_sync_session(
        &self,
        source_provider_id: &str,
        target_provider_id: &str,
    ) -> Result<SyncSession, SyncError> {
        let session = SyncSession::start(source_provider_id, target_provider_id, now_utc());
        self.store.save_session(&session).await?;
        tracing::debug!(
            session_id = %session.id,
            provider_id = %self.store.local_provider_id(),
            source = %source_provider_id,
            target = %target_provider_id,
            "Sync session started"
        );
        Ok(session)
    }

    async fn on_change_seen(
        &self,
        session: &mut SyncSession,
        change: &Change,
    ) -> Result<(), SyncError> {
        session.record(change.clone());
        Ok(())
    }

    async fn on_change_applied(
        &self,
        session: &mut SyncSession,
        change: &Change,
    ) -> Result<(), SyncError> {
        tracing::debug!(
            session_id = %session.id,
            change_id = %change.id,
            item_id = %change.item_id,
            operation = %change.operation,
            "Change applied"
        );
        Ok(())
    }

    async fn on_changes_sent(
        &self,
        session: &mut SyncSession,
        batch: &Batch,
    ) -> Result<(), SyncError> {
        session.changes.extend(batch.changes.iter().cloned());
        Ok(())
    }

    async fn on_conflict_resolved(
        &self,
        session: &mut SyncSession,
        record: &ConflictRecord,
    ) -> Result<(), SyncError> {
        tracing::debug!(
            session_id = %session.id,
            conflict_id = %record.id,
            conflict_type = %record.conflict_type,
            loser = %record.loser.id,
            "Conflict resolved"
        );
        Ok(())
    }

    async fn on_exception(
        &self,
        session: &mut SyncSession,
        change: &Change,
        error: &SyncError,
    ) -> Result<(), SyncError> {
        tracing::warn!(
            session_id = %session.id,
            change_id = %change.id,
            item_id = %change.item_id,
            error = %error,
            "Change deferred after failure"
        );
        if self.escalate {
            return Err(SyncError::Escalated(error.to_string()));
        }
        Ok(())
    }

    async fn on_end_sync_session(&self, session: &mut SyncSession) -> Result<(), SyncError> {
        session.finish(now_utc());
        self.store.save_session(session).await?;
        tracing::info!(
            session_id = %session.id,
            provider_id = %self.store.local_provider_id(),
            changes = session.changes.len(),
            "Sync session finished"
        );
        Ok(())
    }

    async fn on_failed_sync_session(
        &self,
        session: &mut SyncSession,
        error: &SyncError,
    ) -> Result<(), SyncError> {
        session.fail(now_utc());
        self.store.save_session(session).await?;
        tracing::warn!(
            session_id = %session.id,
            provider_id = %self.store.local_provider_id(),
            error = %error,
            "Sync session failed"
        );
        if self.escalate {
            return Err(SyncError::Escalated(error.to_string()));
        }
        Ok(())
    }
}
