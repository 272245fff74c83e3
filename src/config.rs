// Configuration module for the adapter daemon
//
// Options come from a JSON file (Home Assistant add-on style) with
// `BTADAPTERD__SECTION__KEY` environment variables layered on top.

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::AdapterHandle;

pub const CONFIG_PATH_VAR: &str = "BTADAPTERD_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/config/options.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub bluetooth: BluetoothConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Raw HCI sockets on the adapters BlueZ reports.
    #[default]
    Hci,
    /// In-process controllers, for running without Bluetooth hardware.
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Adapter names to serve (`hci0`, ...). Empty serves every adapter.
    #[serde(default)]
    pub adapters: Vec<String>,
    /// Addresses of the simulated controllers, one adapter each.
    #[serde(default)]
    pub simulated_addresses: Vec<String>,
    #[serde(default)]
    pub power_on: bool,
    #[serde(default = "default_discoverable_timeout")]
    pub discoverable_timeout: u32,
    #[serde(default = "default_oui_path")]
    pub oui_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: String,
}

fn default_port() -> u16 {
    1883
}

fn default_topic_prefix() -> String {
    "btadapterd".to_string()
}

fn default_client_id() -> String {
    "btadapterd".to_string()
}

fn default_discoverable_timeout() -> u32 {
    180
}

fn default_oui_path() -> String {
    "/usr/share/misc/oui.txt".to_string()
}

fn default_storage_dir() -> String {
    "/var/lib/bluetooth".to_string()
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            adapters: Vec::new(),
            simulated_addresses: Vec::new(),
            power_on: false,
            discoverable_timeout: default_discoverable_timeout(),
            oui_path: default_oui_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

impl BluetoothConfig {
    /// Whether `name` passes the adapter filter.
    pub fn serves(&self, name: &str) -> bool {
        self.adapters.is_empty() || self.adapters.iter().any(|wanted| wanted == name)
    }

    /// Handles for the simulated backend, numbered in configuration order.
    pub fn simulated_adapters(&self) -> Result<Vec<AdapterHandle>, ConfigError> {
        self.simulated_addresses
            .iter()
            .enumerate()
            .map(|(index, address)| {
                let address = address.parse().map_err(|_| {
                    ConfigError::Invalid(format!("bad simulated address {address:?}"))
                })?;
                let index = u16::try_from(index)
                    .map_err(|_| ConfigError::Invalid("too many simulated adapters".into()))?;
                Ok(AdapterHandle::new(index, address))
            })
            .filter(|handle| match handle {
                Ok(handle) => self.serves(&handle.name()),
                Err(_) => true,
            })
            .collect()
    }
}

/// Loads the options file named by `BTADAPTERD_CONFIG`, or the default path.
pub fn load_config() -> Result<Config, ConfigError> {
    let path =
        std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_from(&path)
}

pub fn load_from(path: &str) -> Result<Config, ConfigError> {
    let settings = config::Config::builder()
        .add_source(File::new(path, FileFormat::Json).required(false))
        .add_source(
            Environment::with_prefix("BTADAPTERD")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("bluetooth.adapters")
                .with_list_parse_key("bluetooth.simulated_addresses")
                .try_parsing(true),
        )
        .build()?;

    let config: Config = settings.try_deserialize()?;
    if config.bluetooth.backend == Backend::Simulated && config.bluetooth.simulated_addresses.is_empty()
    {
        return Err(ConfigError::Invalid(
            "the simulated backend needs at least one simulated address".into(),
        ));
    }
    Ok(config)
}
