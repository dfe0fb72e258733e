mod config_cmd;
mod inspect;
mod item;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use inspect::{ConflictsCommand, SessionsCommand};
pub use item::ItemCommand;
pub use sync_cmd::SyncCommand;

use clap::ValueEnum;
use serde_json::Value;

use crate::config::Config;
use crate::db::SqliteStore;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Opens the store of `provider` (or the configured local provider).
pub async fn open_store(
    config: &Config,
    provider: Option<&str>,
) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    let provider = config.resolve_provider(provider)?;
    let store = SqliteStore::open(provider.id.clone(), &provider.database_path).await?;
    Ok(store)
}

/// Parses `FIELD=VALUE`. The value is read as JSON when it parses, and as
/// a plain string otherwise.
pub fn parse_assignment(input: &str) -> Result<(String, Value), String> {
    let (field, raw) = input
        .split_once('=')
        .ok_or_else(|| format!("Expected FIELD=VALUE, got '{}'", input))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("Missing field name in '{}'", input));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((field.to_string(), value))
}
