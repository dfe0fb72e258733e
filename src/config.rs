use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// One storage provider taking part in synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider id
    pub id: String,
    /// Path to the provider's SQLite database
    pub database_path: PathBuf,
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Providers to synchronize
    pub providers: Vec<ProviderConfig>,
    /// Provider used when no provider is named
    pub local_provider: ConfigValue<Option<String>>,
    /// Maximum number of changes per page
    pub page_size: ConfigValue<usize>,
    /// Maximum duration of one sync session
    pub max_duration_seconds: ConfigValue<u64>,
    /// How long a sync waits for a running one; 0 skips immediately
    pub queue_timeout_seconds: ConfigValue<u64>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    providers: Vec<ProviderConfig>,
    local_provider: Option<String>,
    page_size: Option<usize>,
    max_duration_seconds: Option<u64>,
    queue_timeout_seconds: Option<u64>,
}

const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_MAX_DURATION_SECONDS: u64 = 300;

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut providers = Vec::new();
        let mut local_provider = ConfigValue::new(None, ConfigSource::Default);
        let mut page_size = ConfigValue::new(DEFAULT_PAGE_SIZE, ConfigSource::Default);
        let mut max_duration_seconds =
            ConfigValue::new(DEFAULT_MAX_DURATION_SECONDS, ConfigSource::Default);
        let mut queue_timeout_seconds = ConfigValue::new(0, ConfigSource::Default);
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            providers = file_config
                .providers
                .into_iter()
                .map(|provider| ProviderConfig {
                    database_path: resolve_relative(&path, provider.database_path),
                    id: provider.id,
                })
                .collect();
            if let Some(id) = file_config.local_provider {
                local_provider = ConfigValue::new(Some(id), ConfigSource::File);
            }
            if let Some(size) = file_config.page_size {
                page_size = ConfigValue::new(size, ConfigSource::File);
            }
            if let Some(seconds) = file_config.max_duration_seconds {
                max_duration_seconds = ConfigValue::new(seconds, ConfigSource::File);
            }
            if let Some(seconds) = file_config.queue_timeout_seconds {
                queue_timeout_seconds = ConfigValue::new(seconds, ConfigSource::File);
            }
        }

        // Apply environment variable overrides
        if let Ok(id) = std::env::var("TANDEM_LOCAL_PROVIDER") {
            local_provider = ConfigValue::new(Some(id), ConfigSource::Environment);
        }
        if let Some(size) = env_override("TANDEM_PAGE_SIZE")? {
            page_size = ConfigValue::new(size, ConfigSource::Environment);
        }
        if let Some(seconds) = env_override("TANDEM_MAX_DURATION_SECONDS")? {
            max_duration_seconds = ConfigValue::new(seconds, ConfigSource::Environment);
        }
        if let Some(seconds) = env_override("TANDEM_QUEUE_TIMEOUT_SECONDS")? {
            queue_timeout_seconds = ConfigValue::new(seconds, ConfigSource::Environment);
        }

        let config = Self {
            providers,
            local_provider,
            page_size,
            max_duration_seconds,
            queue_timeout_seconds,
            config_file,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size.value == 0 {
            return Err(ConfigError::InvalidValue(
                "page_size".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        for (index, provider) in self.providers.iter().enumerate() {
            if self.providers[..index].iter().any(|p| p.id == provider.id) {
                return Err(ConfigError::DuplicateProvider(provider.id.clone()));
            }
        }
        if let Some(id) = &self.local_provider.value {
            self.provider(id)?;
        }
        Ok(())
    }

    /// Looks up a configured provider by id.
    pub fn provider(&self, id: &str) -> Result<&ProviderConfig, ConfigError> {
        self.providers
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| ConfigError::UnknownProvider(id.to_string()))
    }

    /// The provider named on the command line, or the configured local one.
    pub fn resolve_provider(&self, id: Option<&str>) -> Result<&ProviderConfig, ConfigError> {
        match id.or(self.local_provider.value.as_deref()) {
            Some(id) => self.provider(id),
            None => Err(ConfigError::NoProvider),
        }
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_seconds.value)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_seconds.value)
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/tandem/
    /// - macOS: ~/Library/Application Support/tandem/
    /// - Windows: %APPDATA%/tandem/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tandem")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

/// Resolve relative paths against the config file's directory
fn resolve_relative(config_path: &Path, path: PathBuf) -> PathBuf {
    if path.is_relative() {
        config_path.parent().map(|p| p.join(&path)).unwrap_or(path)
    } else {
        path
    }
}

fn env_override<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(None),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(String, String),
    DuplicateProvider(String),
    UnknownProvider(String),
    NoProvider,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(name, value) => {
                write!(f, "Invalid value for {}: {}", name, value)
            }
            ConfigError::DuplicateProvider(id) => {
                write!(f, "Provider '{}' is configured more than once", id)
            }
            ConfigError::UnknownProvider(id) => write!(f, "Unknown provider '{}'", id),
            ConfigError::NoProvider => write!(
                f,
                "No provider given. Pass one or set local_provider in the config file"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
