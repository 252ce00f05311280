use crate::monitor::MonitorSettings;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub taostats: TaostatsConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaostatsConfig {
    /// Taostats API base URL
    #[serde(default = "default_taostats_url")]
    pub base_url: String,
    /// Chain network name
    #[serde(default = "default_network")]
    pub network: String,
    /// The tracked wallet address (ss58)
    #[serde(default)]
    pub address: String,
    /// Treasury address whose transfers are filtered out entirely
    #[serde(default)]
    pub treasury: String,
    /// Records per page when walking the transfer feed
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    /// API key - loaded from env TAOSTATS_API_KEY
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// X API v2 base URL
    #[serde(default = "default_notifier_url")]
    pub base_url: String,
    /// User-context bearer token - loaded from env X_ACCESS_TOKEN
    #[serde(default)]
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Start the polling monitor on boot.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between poll cycles (runtime minimum 30).
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Reported notification threshold in TAO.
    #[serde(default)]
    pub min_amount_tao: Decimal,
    /// Suppress real posts, recording them as suppressed instead.
    #[serde(default)]
    pub test_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_taostats_url() -> String {
    "https://api.taostats.io/api".to_string()
}
fn default_network() -> String {
    "finney".to_string()
}
fn default_page_limit() -> u32 {
    200
}
fn default_notifier_url() -> String {
    "https://api.x.com/2".to_string()
}
fn default_check_interval() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            base_url: default_notifier_url(),
            access_token: String::new(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: default_check_interval(),
            min_amount_tao: Decimal::ZERO,
            test_mode: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl MonitorConfig {
    pub fn initial_settings(&self) -> MonitorSettings {
        MonitorSettings {
            enabled: self.enabled,
            check_interval_secs: self.check_interval_secs.max(30),
            min_amount_tao: self.min_amount_tao.max(Decimal::ZERO),
            test_mode: self.test_mode,
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for
    /// secrets and addresses.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.overlay_env();
        Ok(config)
    }

    /// Env-only config (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config {
            taostats: TaostatsConfig {
                base_url: default_taostats_url(),
                network: default_network(),
                address: String::new(),
                treasury: String::new(),
                page_limit: default_page_limit(),
                api_key: String::new(),
            },
            notifier: NotifierConfig::default(),
            monitor: MonitorConfig::default(),
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
        };
        config.overlay_env();
        config
    }

    fn overlay_env(&mut self) {
        if let Ok(url) = std::env::var("TAOSTATS_BASE_URL") {
            self.taostats.base_url = url;
        }
        if let Ok(key) = std::env::var("TAOSTATS_API_KEY") {
            self.taostats.api_key = key;
        }
        if let Ok(network) = std::env::var("TAO_NETWORK") {
            self.taostats.network = network;
        }
        if let Ok(address) = std::env::var("TRACKED_ADDRESS") {
            self.taostats.address = address;
        }
        if let Ok(treasury) = std::env::var("TREASURY_ADDRESS") {
            self.taostats.treasury = treasury;
        }
        if let Ok(token) = std::env::var("X_ACCESS_TOKEN") {
            self.notifier.access_token = token;
        }
    }

    pub fn has_api_key(&self) -> bool {
        !self.taostats.api_key.is_empty()
    }

    pub fn has_notifier_token(&self) -> bool {
        !self.notifier.access_token.is_empty()
    }
}
