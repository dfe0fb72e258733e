//! Synchronizes the configured providers with each other.

use std::sync::Arc;

use clap::Args;
use tandem_core::{
    Comparator, DataStore, Filter, Query, RunOutcome, SyncOrchestrator, SyncProvider,
    SyncSessionStatus,
};

use super::parse_assignment;
use crate::config::Config;
use crate::db::SqliteStore;
use crate::lock::FileSyncLock;

/// Synchronize providers
#[derive(Args)]
pub struct SyncCommand {
    /// Provider whose pairs are synchronized first (defaults to local_provider)
    #[arg(long)]
    from: Option<String>,

    /// Only send changes from --from to this provider
    #[arg(long)]
    to: Option<String>,

    /// Only synchronize items of this entity
    #[arg(long)]
    entity: Option<String>,

    /// Field condition for --entity (can be repeated)
    #[arg(long = "where", value_name = "FIELD=VALUE", requires = "entity")]
    conditions: Vec<String>,
}

impl SyncCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let initial = config.resolve_provider(self.from.as_deref())?.id.clone();
        let query = self.query()?;
        let orchestrator = build_orchestrator(config).await?;

        match &self.to {
            Some(target) => {
                config.provider(target)?;
                let status = orchestrator
                    .synchronize_providers(&initial, target, query.as_ref())
                    .await?;
                match status {
                    SyncSessionStatus::Finished => println!("✓ {} → {}", initial, target),
                    _ => println!("✗ {} → {} ({})", initial, target, status),
                }
            }
            None => match orchestrator.run_with_query(&initial, query.as_ref()).await? {
                RunOutcome::Completed => println!("Sync complete."),
                RunOutcome::Skipped => println!("Sync already running, skipped."),
            },
        }

        for provider_id in orchestrator.provider_ids() {
            if let Some(provider) = orchestrator.provider(provider_id) {
                let items = provider.store().list_items().await?;
                let conflicts = provider.store().list_conflicts().await?;
                let deferred = conflicts.iter().filter(|c| c.is_deferred()).count();
                println!(
                    "  {}: {} item{}, {} deferred",
                    provider_id,
                    items.len(),
                    if items.len() == 1 { "" } else { "s" },
                    deferred
                );
            }
        }

        Ok(())
    }

    fn query(&self) -> Result<Option<Query>, Box<dyn std::error::Error>> {
        let Some(entity) = &self.entity else {
            return Ok(None);
        };
        let mut filter = Filter::all();
        for condition in &self.conditions {
            let (field, value) = parse_assignment(condition)?;
            filter = filter.and(&Filter::compare(field, Comparator::Eq, value));
        }
        Ok(Some(Query::filtered(entity.clone(), filter)))
    }
}

/// One provider per configured database.
pub async fn build_orchestrator(
    config: &Config,
) -> Result<SyncOrchestrator, Box<dyn std::error::Error>> {
    if config.providers.len() < 2 {
        return Err("Synchronization needs at least two configured providers".into());
    }

    let mut providers = Vec::with_capacity(config.providers.len());
    for provider in &config.providers {
        let store: Arc<dyn DataStore> =
            Arc::new(SqliteStore::open(provider.id.clone(), &provider.database_path).await?);
        providers.push(SyncProvider::with_session_events(
            store,
            config.page_size.value,
        ));
    }

    Ok(SyncOrchestrator::new(
        Arc::new(sync_lock(config)),
        providers,
        config.max_duration(),
    )
    .with_queue_timeout(config.queue_timeout()))
}

/// Lock guarding every configured database against concurrent runs.
pub fn sync_lock(config: &Config) -> FileSyncLock {
    FileSyncLock::for_databases(
        config
            .providers
            .iter()
            .map(|provider| provider.database_path.as_path()),
    )
}
