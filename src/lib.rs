/*!
# Welcome to tablenet

tablenet keeps a shared game table in sync between the players of one session. One
node hosts the session; every other node joins it as a client. The host is
authoritative for the list of players and for who is in control of the table, and
relays every change to the table to all other players.

# Usage

```no_run
use std::sync::Arc;
use tablenet::configuration::TableNetworkConfiguration;
use tablenet::node::NodeFactory;
use tablenet::table::InMemoryTable;

let factory = NodeFactory::default();
let node = factory.spawn_client_node()?;
let configuration = TableNetworkConfiguration::builder(Arc::new(InMemoryTable::new()))
    .player_name("alice")
    .password("secret")
    .host_name("game.example.org")
    .build(factory.settings().default_port)?;
let token = node.begin_connect(configuration)?;
node.end_connect(token)?;
# Ok::<(), tablenet::error::TableNetworkError>(())
```

Every node runs on its own node layer (see [`node_layer`]), a thread that owns the
node's state. The [`node::NodeController`] returned by the factory marshals calls
onto it.

*/
pub mod configuration;
pub mod error;
pub mod networking;
pub mod node;
pub mod node_layer;
pub mod player;
pub mod settings;
pub mod snapshot;
pub mod table;
pub mod table_proxy;

pub use error::{Result, TableNetworkError};

#[cfg(test)]
mod test_setup;
#[cfg(test)]
pub mod test_utilities;
