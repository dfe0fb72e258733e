//! Read-only views of replication metadata.

use clap::Args;
use tandem_core::DataStore;

use super::OutputFormat;
use crate::db::SqliteStore;

/// List conflict records
#[derive(Args)]
pub struct ConflictsCommand {
    /// Only show deferred conflicts
    #[arg(long)]
    deferred: bool,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl ConflictsCommand {
    pub async fn run(&self, store: &SqliteStore) -> Result<(), Box<dyn std::error::Error>> {
        let records: Vec<_> = store
            .list_conflicts()
            .await?
            .into_iter()
            .filter(|record| !self.deferred || record.is_deferred())
            .collect();

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&records)?);
            }
            OutputFormat::Text => {
                if records.is_empty() {
                    println!("No conflicts.");
                }
                for record in &records {
                    println!(
                        "{}  {}  {}  item {}",
                        record.created_at.format("%Y-%m-%d %H:%M:%S"),
                        record.status,
                        record.conflict_type,
                        record.loser.item_id
                    );
                    println!("    loser:  {} ({})", record.loser.id, record.loser.operation);
                    if let Some(winner) = &record.winner {
                        println!("    winner: {} ({})", winner.id, winner.operation);
                    }
                    if let Some(description) = &record.description {
                        println!("    {}", description);
                    }
                }
            }
        }
        Ok(())
    }
}

/// List sync sessions
#[derive(Args)]
pub struct SessionsCommand {
    /// Show at most this many of the latest sessions
    #[arg(long, short = 'n', default_value = "20")]
    limit: usize,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl SessionsCommand {
    pub async fn run(&self, store: &SqliteStore) -> Result<(), Box<dyn std::error::Error>> {
        let sessions = store.list_sessions().await?;
        let skip = sessions.len().saturating_sub(self.limit);
        let sessions = &sessions[skip..];

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(sessions)?);
            }
            OutputFormat::Text => {
                if sessions.is_empty() {
                    println!("No sync sessions.");
                }
                for session in sessions {
                    let duration = session
                        .ended_at
                        .map(|ended| {
                            format!("{}ms", (ended - session.started_at).num_milliseconds())
                        })
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{}  {} → {}  {}  {} change{}  {}",
                        session.started_at.format("%Y-%m-%d %H:%M:%S"),
                        session.source_provider_id,
                        session.target_provider_id,
                        session.status,
                        session.changes.len(),
                        if session.changes.len() == 1 { "" } else { "s" },
                        duration
                    );
                }
            }
        }
        Ok(())
    }
}
