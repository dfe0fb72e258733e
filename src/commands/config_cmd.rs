use clap::{Args, Subcommand};

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("providers:");
                        if config.providers.is_empty() {
                            println!("  (none)");
                        }
                        for provider in &config.providers {
                            println!("  {}: {}", provider.id, provider.database_path.display());
                        }
                        println!();

                        println!(
                            "local_provider: {}",
                            config.local_provider.value.as_deref().unwrap_or("(not set)")
                        );
                        println!("  source: {}", config.local_provider.source);
                        println!();

                        println!("page_size: {}", config.page_size.value);
                        println!("  source: {}", config.page_size.source);
                        println!();

                        println!("max_duration_seconds: {}", config.max_duration_seconds.value);
                        println!("  source: {}", config.max_duration_seconds.source);
                        println!();

                        println!(
                            "queue_timeout_seconds: {}",
                            config.queue_timeout_seconds.value
                        );
                        println!("  source: {}", config.queue_timeout_seconds.source);
                    }
                }
                Ok(())
            }
        }
    }
}
