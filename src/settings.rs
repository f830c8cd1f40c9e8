use std::time::Duration;

use config::{Config, ConfigError};
use serde::Deserialize;

use crate::networking::message_envelope::MAXIMUM_BODY_LENGTH;

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 14739;
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";

/// Tunables shared by every node a factory creates.
///
/// Read from a `config::Config` under the `node.` and `transport.` keys. A missing key
/// keeps its default; a key that is present but does not parse is an error.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeSettings {
    pub protocol_version: u32,
    pub default_port: u16,
    pub node_layer_thread_name: String,
    pub maximum_body_length: u32,
    pub connect_timeout: Duration,
    pub close_linger: Duration,
    pub transport_worker_threads: usize,
    /// Address a server listens on. Clients connect to the configured host name instead.
    pub listen_host: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        NodeSettings {
            protocol_version: PROTOCOL_VERSION,
            default_port: DEFAULT_PORT,
            node_layer_thread_name: String::from("tablenet-node-layer"),
            maximum_body_length: MAXIMUM_BODY_LENGTH,
            connect_timeout: Duration::from_millis(10_000),
            close_linger: Duration::from_millis(250),
            transport_worker_threads: 2,
            listen_host: String::from(DEFAULT_LISTEN_HOST),
        }
    }
}

// `None` for a missing key, an error for a value of the wrong type
fn optional<'de, T: Deserialize<'de>>(settings: &Config, key: &str) -> Result<Option<T>, ConfigError> {
    match settings.get::<T>(key) {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

impl NodeSettings {
    ///
    /// Loads settings from the named config file (optional) overlaid with
    /// `TABLENET_`-prefixed environment variables, e.g.
    /// `TABLENET_TRANSPORT__CONNECT_TIMEOUT_MS=500`.
    ///
    pub fn load(config_name: &str) -> Result<NodeSettings, ConfigError> {
        let mut settings = Config::default();
        settings.merge(config::File::with_name(config_name).required(false))?;
        settings.merge(config::Environment::with_prefix("TABLENET").separator("__"))?;
        NodeSettings::from_config(&settings)
    }

    pub fn from_config(settings: &Config) -> Result<NodeSettings, ConfigError> {
        let defaults = NodeSettings::default();
        let maximum_body_length = optional::<u32>(settings, "transport.maximum_body_length")?
            .unwrap_or(defaults.maximum_body_length)
            .min(MAXIMUM_BODY_LENGTH);
        let transport_worker_threads = match optional::<usize>(settings, "transport.worker_threads")? {
            Some(0) => {
                return Err(ConfigError::Message(String::from(
                    "transport.worker_threads must be at least 1",
                )))
            }
            Some(threads) => threads,
            None => defaults.transport_worker_threads,
        };
        Ok(NodeSettings {
            protocol_version: optional(settings, "node.protocol_version")?
                .unwrap_or(defaults.protocol_version),
            default_port: optional(settings, "node.default_port")?.unwrap_or(defaults.default_port),
            node_layer_thread_name: optional(settings, "node.layer_thread_name")?
                .unwrap_or(defaults.node_layer_thread_name),
            maximum_body_length,
            connect_timeout: optional(settings, "transport.connect_timeout_ms")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            close_linger: optional(settings, "transport.close_linger_ms")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.close_linger),
            transport_worker_threads,
            listen_host: optional(settings, "transport.listen_host")?.unwrap_or(defaults.listen_host),
        })
    }
}
