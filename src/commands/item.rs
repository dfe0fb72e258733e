use clap::{Args, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use tandem_core::{Change, DataStore, DataStoreExt, Item, Operation};

use super::{parse_assignment, OutputFormat};
use crate::db::SqliteStore;

#[derive(Args)]
pub struct ItemCommand {
    #[command(subcommand)]
    pub command: ItemSubcommand,
}

#[derive(Subcommand)]
pub enum ItemSubcommand {
    /// Create an item or update its fields
    Put {
        /// Entity the item belongs to
        entity: String,

        /// Item ID (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Field to set (can be repeated)
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        fields: Vec<String>,
    },

    /// Delete an item
    Delete {
        /// Item ID
        id: String,
    },

    /// Show an item and the change that produced it
    Show {
        /// Item ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List items
    List {
        /// Only list items of this entity
        #[arg(long)]
        entity: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ItemCommand {
    pub async fn run(&self, store: &SqliteStore) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ItemSubcommand::Put { entity, id, fields } => {
                let id = id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
                let fields = fields
                    .iter()
                    .map(|field| parse_assignment(field))
                    .collect::<Result<Vec<_>, _>>()?;
                let change = put_item(store, entity, &id, fields).await?;
                println!("{} {} ({})", change.operation, change.item_id, change.id);
                Ok(())
            }
            ItemSubcommand::Delete { id } => {
                let change = delete_item(store, id).await?;
                println!("Deleted {} ({})", change.item_id, change.id);
                Ok(())
            }
            ItemSubcommand::Show { id, format } => {
                let item = store
                    .get_item(id)
                    .await?
                    .ok_or_else(|| format!("Item not found: {}", id))?;
                let version = store.get_local_version(id).await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&item)?);
                    }
                    OutputFormat::Text => {
                        println!("{} ({})", item.id, item.entity_name);
                        println!("{}", "=".repeat(item.id.len() + item.entity_name.len() + 3));
                        for (field, value) in &item.fields {
                            println!("{}: {}", field, value);
                        }
                        if let Some(change) = version.current_change() {
                            println!();
                            println!(
                                "Last change: {} by {} at {}",
                                change.operation,
                                change.authoring_provider_id,
                                change.authoring_timestamp
                            );
                            println!(
                                "Origin: {} at {}",
                                change.origin_provider_id, change.origin_timestamp
                            );
                        }
                    }
                }
                Ok(())
            }
            ItemSubcommand::List { entity, format } => {
                let items: Vec<Item> = store
                    .list_items()
                    .await?
                    .into_iter()
                    .filter(|item| entity.as_ref().map_or(true, |e| &item.entity_name == e))
                    .collect();
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&items)?);
                    }
                    OutputFormat::Text => {
                        if items.is_empty() {
                            println!("No items found.");
                        }
                        for item in &items {
                            println!(
                                "{}  {}  {}",
                                item.id,
                                item.entity_name,
                                Value::Object(item.fields.clone())
                            );
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

/// Inserts the item, or updates the listed fields of an existing one.
pub async fn put_item(
    store: &SqliteStore,
    entity: &str,
    id: &str,
    fields: Vec<(String, Value)>,
) -> Result<Change, Box<dyn std::error::Error>> {
    let (operation, mut item) = match store.get_item(id).await? {
        Some(item) if item.entity_name == entity => (Operation::Update, item),
        Some(item) => {
            return Err(format!(
                "Item {} is a '{}', not a '{}'",
                id, item.entity_name, entity
            )
            .into())
        }
        None => (Operation::Insert, Item::new(id, entity)),
    };

    for (field, value) in fields {
        if field == "id" || field == "entity_name" {
            return Err(format!("Field '{}' is reserved", field).into());
        }
        item.fields.insert(field, value);
    }

    Ok(store.commit_item_change(operation, &item).await?)
}

pub async fn delete_item(
    store: &SqliteStore,
    id: &str,
) -> Result<Change, Box<dyn std::error::Error>> {
    let item = store
        .get_item(id)
        .await?
        .ok_or_else(|| format!("Item not found: {}", id))?;
    Ok(store.commit_item_change(Operation::Delete, &item).await?)
}
