use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Builder(#[from] BuilderError),

    #[error("missing required configuration: {0}")]
    MissingRequired(String),

    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Process-wide configuration, parsed once at startup and passed
/// explicitly to every component that needs it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HomefluxConfig {
    pub store: StoreConfig,
    pub meter: MeterConfig,
    pub ups: UpsConfig,
    pub logging: LoggingConfig,

    /// Collect but never dispatch to the store.
    #[serde(default)]
    pub dry_run: bool,

    /// First date with data at the utility, used by the historical
    /// backfill driver.
    #[serde(default)]
    pub online_since: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub org: String,

    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub account_uuid: String,

    #[serde(default = "default_meter_interval")]
    pub interval_secs: u64,

    /// How many days back each scheduled cycle re-fetches. Bounded by the
    /// remote 30-day query window.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsConfig {
    #[serde(default = "default_nut_username")]
    pub username: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_nut_port")]
    pub port: u16,

    #[serde(default = "default_ups_name")]
    pub name: String,

    #[serde(default = "default_ups_interval")]
    pub interval_secs: u64,

    /// Host table: label -> "address" or "address@port".
    #[serde(default)]
    pub hosts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// One entry from the UPS host table, with the port resolved against the
/// configured default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsHost {
    pub label: String,
    pub address: String,
    pub port: u16,
}

fn default_meter_interval() -> u64 {
    8 * 60 * 60
}

fn default_lookback_days() -> u32 {
    5
}

fn default_nut_username() -> String {
    "monuser".to_string()
}

fn default_nut_port() -> u16 {
    3493
}

fn default_ups_name() -> String {
    "ups".to_string()
}

fn default_ups_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            account_uuid: String::new(),
            interval_secs: default_meter_interval(),
            lookback_days: default_lookback_days(),
        }
    }
}

impl Default for UpsConfig {
    fn default() -> Self {
        Self {
            username: default_nut_username(),
            password: None,
            port: default_nut_port(),
            name: default_ups_name(),
            interval_secs: default_ups_interval(),
            hosts: BTreeMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl UpsConfig {
    /// Parse the host table into explicit entries. Assumes the table has
    /// passed `validate`; a malformed port at this point is skipped with
    /// a warning rather than stopping the cycle.
    pub fn host_entries(&self) -> Vec<UpsHost> {
        let mut entries = Vec::new();
        for (label, value) in &self.hosts {
            match parse_host(value, self.port) {
                Some((address, port)) => entries.push(UpsHost {
                    label: label.clone(),
                    address,
                    port,
                }),
                None => warn!(host = %label, value = %value, "skipping malformed UPS host entry"),
            }
        }
        entries
    }
}

fn parse_host(value: &str, default_port: u16) -> Option<(String, u16)> {
    match value.split_once('@') {
        Some((address, port)) => {
            let port: u16 = port.parse().ok()?;
            Some((address.to_string(), port))
        }
        None => Some((value.to_string(), default_port)),
    }
}

impl HomefluxConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_paths(vec![PathBuf::from("homeflux.toml")])
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("HOMEFLUX")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        let mut homeflux_config: HomefluxConfig = config.try_deserialize().unwrap_or_default();
        homeflux_config.apply_legacy_env();
        homeflux_config.validate()?;

        Ok(homeflux_config)
    }

    /// Environment variable names carried over from earlier deployments.
    fn apply_legacy_env(&mut self) {
        if let Ok(url) = std::env::var("INFLUX_URL") {
            self.store.url = url;
        }
        if let Ok(org) = std::env::var("INFLUX_ORG") {
            self.store.org = org;
        }
        if let Ok(token) = std::env::var("INFLUX_TOKEN") {
            self.store.token = token;
        }

        if let Ok(user) = std::env::var("GWP_USER") {
            self.meter.username = user;
        }
        if let Ok(password) = std::env::var("GWP_PASSWORD") {
            self.meter.password = password;
        }
        if let Ok(uuid) = std::env::var("GWP_UUID") {
            self.meter.account_uuid = uuid;
        }

        if let Ok(user) = std::env::var("NUT_USERNAME") {
            self.ups.username = user;
        }
        if let Ok(password) = std::env::var("NUT_PASSWORD") {
            self.ups.password = Some(password);
        }
        if let Ok(port) = std::env::var("NUT_PORT") {
            match port.parse() {
                Ok(port) => self.ups.port = port,
                Err(_) => warn!(value = %port, "ignoring unparseable NUT_PORT"),
            }
        }
        if let Ok(name) = std::env::var("NUT_UPS_NAME") {
            self.ups.name = name;
        }
        if let Ok(hosts) = std::env::var("NUT_HOSTS") {
            match serde_json::from_str(&hosts) {
                Ok(hosts) => self.ups.hosts = hosts,
                Err(e) => warn!(error = %e, "ignoring unparseable NUT_HOSTS"),
            }
        }

        if let Ok(dry_run) = std::env::var("HOMEFLUX_DRY_RUN") {
            self.dry_run = matches!(dry_run.as_str(), "1" | "true" | "yes");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.dry_run {
            if self.store.url.is_empty() {
                return Err(ConfigError::MissingRequired("store.url".to_string()));
            }
            if !self.store.url.starts_with("http://") && !self.store.url.starts_with("https://") {
                return Err(ConfigError::InvalidValue {
                    key: "store.url".to_string(),
                    message: "must be an http:// or https:// URL".to_string(),
                });
            }
        }

        if self.meter.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "meter.interval_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.meter.lookback_days == 0 || self.meter.lookback_days > 30 {
            return Err(ConfigError::InvalidValue {
                key: "meter.lookback_days".to_string(),
                message: "must be between 1 and 30, the remote query window limit".to_string(),
            });
        }

        if self.ups.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ups.interval_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.ups.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ups.port".to_string(),
                message: "must be a valid TCP port".to_string(),
            });
        }

        for (label, value) in &self.ups.hosts {
            if parse_host(value, self.ups.port).is_none() {
                return Err(ConfigError::InvalidValue {
                    key: format!("ups.hosts.{}", label),
                    message: "expected \"address\" or \"address@port\"".to_string(),
                });
            }
        }

        Ok(())
    }
}
