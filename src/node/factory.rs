use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::networking::tcp::{TcpClientTransportLayer, TcpServerTransportLayer, TcpTransportSettings};
use crate::node::client::ClientStrategy;
use crate::node::server::ServerStrategy;
use crate::node::{Node, NodeApi, NodeController, NodeLayerHandle};
use crate::settings::NodeSettings;

/// Creates client and server nodes wired to the TCP transports.
#[derive(Clone, Debug, Default)]
pub struct NodeFactory {
    settings: Arc<NodeSettings>,
}

impl NodeFactory {
    pub fn new(settings: NodeSettings) -> Self {
        NodeFactory {
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    /// A node that joins a session hosted elsewhere. Must be created on `layer`.
    pub fn create_client_node(&self, layer: NodeLayerHandle) -> Node<ClientStrategy> {
        let transport = TcpClientTransportLayer::new(TcpTransportSettings::from(&*self.settings));
        Node::new(
            layer,
            ClientStrategy::new(),
            Box::new(transport),
            Arc::clone(&self.settings),
        )
    }

    /// A node that hosts a session. Must be created on `layer`.
    pub fn create_server_node(&self, layer: NodeLayerHandle) -> Node<ServerStrategy> {
        let transport = TcpServerTransportLayer::new(TcpTransportSettings::from(&*self.settings));
        Node::new(
            layer,
            ServerStrategy::new(),
            Box::new(transport),
            Arc::clone(&self.settings),
        )
    }

    /// Starts a node layer with a fresh client node on it.
    pub fn spawn_client_node(&self) -> Result<NodeController> {
        let factory = self.clone();
        info!("spawning client node");
        NodeController::spawn(&self.settings.node_layer_thread_name, move |layer| {
            let node: Box<dyn NodeApi> = Box::new(factory.create_client_node(layer));
            node
        })
    }

    /// Starts a node layer with a fresh server node on it.
    pub fn spawn_server_node(&self) -> Result<NodeController> {
        let factory = self.clone();
        info!("spawning server node");
        NodeController::spawn(&self.settings.node_layer_thread_name, move |layer| {
            let node: Box<dyn NodeApi> = Box::new(factory.create_server_node(layer));
            node
        })
    }
}
