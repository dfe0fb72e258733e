use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::time::Instant;

use super::{SyncError, SyncLock, SyncProvider, SyncTimer};
use crate::clock::CausalClock;
use crate::models::{SyncSession, SyncSessionStatus};
use crate::query::{Query, QueryTracking};
use crate::store::StoreError;

/// Interval between lock checks while queued behind another run.
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Whether [`SyncOrchestrator::run`] did any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Another run held the lock.
    Skipped,
}

/// Drives sync sessions between registered providers.
pub struct SyncOrchestrator {
    providers: IndexMap<String, SyncProvider>,
    lock: Arc<dyn SyncLock>,
    max_duration: Duration,
    queue_timeout: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        lock: Arc<dyn SyncLock>,
        providers: Vec<SyncProvider>,
        max_duration: Duration,
    ) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|provider| (provider.id().to_string(), provider))
                .collect(),
            lock,
            max_duration,
            queue_timeout: Duration::ZERO,
        }
    }

    /// How long a run waits for a busy lock before giving up. Zero skips
    /// immediately.
    pub fn with_queue_timeout(mut self, queue_timeout: Duration) -> Self {
        self.queue_timeout = queue_timeout;
        self
    }

    pub fn provider(&self, provider_id: &str) -> Option<&SyncProvider> {
        self.providers.get(provider_id)
    }

    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    fn get_provider(&self, provider_id: &str) -> Result<&SyncProvider, SyncError> {
        self.providers
            .get(provider_id)
            .ok_or_else(|| SyncError::UnknownProvider(provider_id.to_string()))
    }

    /// One directed pass from `source_id` to `target_id`.
    ///
    /// Returns the final session status. A failed session is not an error
    /// unless it was caused by protocol misuse or an events manager
    /// escalated it.
    pub async fn synchronize_providers(
        &self,
        source_id: &str,
        target_id: &str,
        query: Option<&Query>,
    ) -> Result<SyncSessionStatus, SyncError> {
        let source = self.get_provider(source_id)?;
        let target = self.get_provider(target_id)?;
        let queries_supported =
            source.store().supports_queries() && target.store().supports_queries();
        if query.is_some() && !queries_supported {
            return Err(StoreError::QueriesUnsupported.into());
        }

        let mut target_session = target
            .events()
            .on_start_sync_session(source_id, target_id)
            .await?;
        let mut source_session = source
            .events()
            .on_start_sync_session(source_id, target_id)
            .await?;
        let timer = SyncTimer::start(self.max_duration);

        tracing::info!(source = %source_id, target = %target_id, "Synchronizing providers");

        let result = exchange(
            source,
            target,
            &mut source_session,
            &mut target_session,
            &timer,
            query,
        )
        .await;

        match result {
            Ok(()) => {
                target.events().on_end_sync_session(&mut target_session).await?;
                source.events().on_end_sync_session(&mut source_session).await?;
                Ok(SyncSessionStatus::Finished)
            }
            Err(error) => {
                tracing::warn!(
                    source = %source_id,
                    target = %target_id,
                    elapsed = ?timer.elapsed(),
                    error = %error,
                    "Synchronization failed"
                );
                let target_escalation = target
                    .events()
                    .on_failed_sync_session(&mut target_session, &error)
                    .await;
                let source_escalation = source
                    .events()
                    .on_failed_sync_session(&mut source_session, &error)
                    .await;
                if error.is_protocol_misuse() {
                    return Err(error);
                }
                target_escalation?;
                source_escalation?;
                Ok(SyncSessionStatus::Failed)
            }
        }
    }

    /// Synchronizes every provider pair, starting with pairs that involve
    /// `initial_source_id`.
    pub async fn run(&self, initial_source_id: &str) -> Result<RunOutcome, SyncError> {
        self.run_with_query(initial_source_id, None).await
    }

    /// [`run`](Self::run) restricted to the slice of items selected by
    /// `query`.
    pub async fn run_with_query(
        &self,
        initial_source_id: &str,
        query: Option<&Query>,
    ) -> Result<RunOutcome, SyncError> {
        self.get_provider(initial_source_id)?;

        if !self.wait_for_lock().await {
            tracing::info!(initial = %initial_source_id, "Sync already running, skipping");
            return Ok(RunOutcome::Skipped);
        }
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(SyncError::LockHeld) => return Ok(RunOutcome::Skipped),
            Err(e) => return Err(e),
        };

        for (source_id, target_id) in self.pairs(initial_source_id) {
            self.synchronize_providers(&source_id, &target_id, query)
                .await?;
        }
        Ok(RunOutcome::Completed)
    }

    /// Every ordered provider pair: first those sending from
    /// `initial_source_id`, then those sending to it, then the rest.
    fn pairs(&self, initial_source_id: &str) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .providers
            .keys()
            .flat_map(|source| {
                self.providers
                    .keys()
                    .filter(move |target| *target != source)
                    .map(move |target| (source.clone(), target.clone()))
            })
            .collect();
        pairs.sort_by_key(|(source, target)| {
            if source == initial_source_id {
                0
            } else if target == initial_source_id {
                1
            } else {
                2
            }
        });
        pairs
    }

    async fn wait_for_lock(&self) -> bool {
        if !self.lock.is_running() {
            return true;
        }
        if self.queue_timeout.is_zero() {
            return false;
        }
        let started = Instant::now();
        while self.lock.is_running() {
            if started.elapsed() > self.queue_timeout {
                return false;
            }
            tokio::time::sleep(QUEUE_POLL_INTERVAL).await;
        }
        true
    }
}

/// Deferred phase, then new-changes phase.
async fn exchange(
    source: &SyncProvider,
    target: &SyncProvider,
    source_session: &mut SyncSession,
    target_session: &mut SyncSession,
    timer: &SyncTimer,
    query: Option<&Query>,
) -> Result<(), SyncError> {
    let mut frontier = CausalClock::empty();
    loop {
        timer.tick()?;

        let batch = target.get_deferred_changes(&frontier, query).await?;
        tracing::debug!(target = %target.id(), changes = batch.len(), "Retrying deferred changes");
        target.upload_changes(target_session, &batch, query).await?;

        let next = batch.clock_after(&frontier);
        if next == frontier || batch.is_last {
            break;
        }
        frontier = next;
    }

    if let Some(query) = query {
        target.store().ensure_tracking_query(query).await?;
    }
    let mut frontier = target.get_clock(query).await?;
    loop {
        timer.tick()?;

        let batch = source.download_changes(&frontier, query).await?;
        tracing::debug!(
            source = %source.id(),
            target = %target.id(),
            changes = batch.len(),
            "Sending changes"
        );
        source.events().on_changes_sent(source_session, &batch).await?;
        target.upload_changes(target_session, &batch, query).await?;

        let next = batch.clock_after(&frontier);
        if next == frontier || batch.is_last {
            break;
        }
        frontier = next;
    }

    Ok(())
}
