use std::fmt;
use std::sync::Arc;

use crate::error::{Result, TableNetworkError};
use crate::table::Table;

pub const DEFAULT_HOST_NAME: &str = "localhost";

/// What a node needs to join or host one session. Immutable once built.
///
/// `host_name`/`port` name the server to connect to in client mode. A server only uses
/// the port; it listens on `NodeSettings::listen_host`, every interface by default.
#[derive(Clone)]
pub struct TableNetworkConfiguration {
    local_table: Arc<dyn Table>,
    player_name: String,
    password: String,
    host_name: String,
    port: u16,
}

impl TableNetworkConfiguration {
    pub fn builder(local_table: Arc<dyn Table>) -> TableNetworkConfigurationBuilder {
        TableNetworkConfigurationBuilder {
            local_table,
            player_name: None,
            password: String::new(),
            host_name: String::from(DEFAULT_HOST_NAME),
            port: None,
        }
    }

    pub fn local_table(&self) -> &Arc<dyn Table> {
        &self.local_table
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Debug for TableNetworkConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableNetworkConfiguration")
            .field("player_name", &self.player_name)
            .field("password", &"<redacted>")
            .field("host_name", &self.host_name)
            .field("port", &self.port)
            .finish()
    }
}

pub struct TableNetworkConfigurationBuilder {
    local_table: Arc<dyn Table>,
    player_name: Option<String>,
    password: String,
    host_name: String,
    port: Option<u16>,
}

impl TableNetworkConfigurationBuilder {
    pub fn player_name(mut self, player_name: &str) -> Self {
        self.player_name = Some(player_name.to_string());
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn host_name(mut self, host_name: &str) -> Self {
        self.host_name = host_name.to_string();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builds the configuration. The player name is required; the port falls back to
    /// `default_port` when it was not set.
    pub fn build(self, default_port: u16) -> Result<TableNetworkConfiguration> {
        let player_name = match self.player_name {
            Some(name) if !name.trim().is_empty() => name,
            _ => {
                return Err(TableNetworkError::invalid_argument(
                    "player name must not be empty",
                ))
            }
        };
        if self.host_name.is_empty() {
            return Err(TableNetworkError::invalid_argument(
                "host name must not be empty",
            ));
        }
        Ok(TableNetworkConfiguration {
            local_table: self.local_table,
            player_name,
            password: self.password,
            host_name: self.host_name,
            port: self.port.unwrap_or(default_port),
        })
    }
}
