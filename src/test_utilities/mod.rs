pub mod mocks;
pub mod test_manager;

use std::sync::Arc;

use crate::configuration::TableNetworkConfiguration;
use crate::error::Result;
use crate::networking::message_envelope::MessageEnvelope;
use crate::networking::transport::{ServiceContext, SessionId, TransportEvent};
use crate::node::client::ClientStrategy;
use crate::node::server::ServerStrategy;
use crate::node::{Node, NodeApi, NodeLayerHandle, NodeState, NodeStrategy};
use crate::node_layer::NodeLayer;
use crate::player::Player;
use crate::settings::NodeSettings;
use crate::table::Table;
use mocks::FakeTransportLayer;

/// A client or server node on its own node layer, driven over a fake transport.
pub struct StrategyHarness {
    layer: NodeLayerHandle,
    transport: FakeTransportLayer,
    table: Arc<dyn Table>,
}

impl StrategyHarness {
    pub fn client(transport: FakeTransportLayer, table: Arc<dyn Table>) -> Self {
        StrategyHarness::spawn(ClientStrategy::new(), transport, table)
    }

    pub fn server(transport: FakeTransportLayer, table: Arc<dyn Table>) -> Self {
        StrategyHarness::spawn(ServerStrategy::new(), transport, table)
    }

    fn spawn<S: NodeStrategy>(
        strategy: S,
        transport: FakeTransportLayer,
        table: Arc<dyn Table>,
    ) -> Self {
        let node_transport = transport.clone();
        let layer = NodeLayer::spawn("test-node-layer", move |layer| {
            let node: Box<dyn NodeApi> = Box::new(Node::new(
                layer,
                strategy,
                Box::new(node_transport),
                Arc::new(NodeSettings::default()),
            ));
            node
        })
        .unwrap();
        StrategyHarness {
            layer,
            transport,
            table,
        }
    }

    pub fn layer(&self) -> &NodeLayerHandle {
        &self.layer
    }

    pub fn transport(&self) -> &FakeTransportLayer {
        &self.transport
    }

    pub fn connect(&self, player_name: &str, password: &str) -> Result<()> {
        let configuration = TableNetworkConfiguration::builder(Arc::clone(&self.table))
            .player_name(player_name)
            .password(password)
            .build(NodeSettings::default().default_port)?;
        self.layer.sync_exec(move |node| node.connect(configuration))?
    }

    pub fn disconnect(&self) {
        self.layer.sync_exec(|node| node.disconnect()).unwrap();
    }

    pub fn node_state(&self) -> NodeState {
        self.layer.sync_exec(|node| node.state()).unwrap()
    }

    pub fn player(&self) -> Option<Player> {
        self.layer.sync_exec(|node| node.player()).unwrap()
    }

    pub fn players(&self) -> Vec<Player> {
        self.layer
            .sync_exec(|node| node.players().to_owned_value())
            .unwrap()
    }

    /// Starts a session through the transport and waits until the node has seen it.
    pub fn start_session<C: ServiceContext + 'static>(&self, context: C) -> SessionId {
        let session = SessionId::new();
        self.transport.emit(TransportEvent::SessionStarted {
            session,
            context: Box::new(context),
        });
        self.layer.sync_exec(|_| ()).unwrap();
        session
    }

    /// Delivers `envelope` on `session` and waits until the node has handled it.
    pub fn deliver(&self, session: SessionId, envelope: MessageEnvelope) {
        self.transport
            .emit(TransportEvent::MessageReceived { session, envelope });
        self.layer.sync_exec(|_| ()).unwrap();
    }
}

impl Drop for StrategyHarness {
    fn drop(&mut self) {
        self.layer.shutdown();
    }
}
