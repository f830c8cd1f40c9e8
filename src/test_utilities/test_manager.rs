use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::configuration::TableNetworkConfiguration;
use crate::error::Result;
use crate::networking::transport::{ServiceContext, SessionId, TransportEvent};
use crate::node::{Node, NodeApi, NodeLayerHandle, NodeState};
use crate::node_layer::NodeLayer;
use crate::settings::NodeSettings;
use crate::table::{InMemoryTable, Table};
use crate::test_utilities::mocks::{FakeTransportLayer, Hook, HookLog, RecordingStrategy};

/// A recording node on its own node layer, driven over a fake transport.
pub struct TestManager {
    layer: NodeLayerHandle,
    transport: FakeTransportLayer,
    hooks: HookLog,
    table: Arc<dyn Table>,
}

impl TestManager {
    pub const PASSWORD: &'static str = "open sesame";

    pub fn succeeding() -> Self {
        TestManager::new(FakeTransportLayer::succeeding(), Arc::new(InMemoryTable::new()))
    }

    pub fn failing() -> Self {
        TestManager::new(FakeTransportLayer::failing(), Arc::new(InMemoryTable::new()))
    }

    pub fn with_table(table: Arc<dyn Table>) -> Self {
        TestManager::new(FakeTransportLayer::succeeding(), table)
    }

    fn new(transport: FakeTransportLayer, table: Arc<dyn Table>) -> Self {
        let hooks: HookLog = Arc::new(Mutex::new(vec![]));
        let node_transport = transport.clone();
        let node_hooks = Arc::clone(&hooks);
        let layer = NodeLayer::spawn("test-node-layer", move |layer| {
            let node: Box<dyn NodeApi> = Box::new(Node::new(
                layer,
                RecordingStrategy::new(node_hooks),
                Box::new(node_transport),
                Arc::new(NodeSettings::default()),
            ));
            node
        })
        .unwrap();
        TestManager {
            layer,
            transport,
            hooks,
            table,
        }
    }

    pub fn layer(&self) -> &NodeLayerHandle {
        &self.layer
    }

    pub fn transport(&self) -> &FakeTransportLayer {
        &self.transport
    }

    pub fn configuration(&self, player_name: &str) -> TableNetworkConfiguration {
        TableNetworkConfiguration::builder(Arc::clone(&self.table))
            .player_name(player_name)
            .password(TestManager::PASSWORD)
            .build(NodeSettings::default().default_port)
            .unwrap()
    }

    pub fn connect(&self, player_name: &str) -> Result<()> {
        let configuration = self.configuration(player_name);
        self.layer.sync_exec(move |node| node.connect(configuration))?
    }

    pub fn disconnect(&self) {
        self.layer.sync_exec(|node| node.disconnect()).unwrap();
    }

    pub fn node_state(&self) -> NodeState {
        self.layer.sync_exec(|node| node.state()).unwrap()
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

    pub fn hook_log(&self) -> HookLog {
        Arc::clone(&self.hooks)
    }

    pub fn hooks(&self) -> Vec<(Hook, bool)> {
        self.hooks.lock().unwrap().clone()
    }

    pub fn hook_count(&self, hook: Hook) -> usize {
        self.hooks()
            .iter()
            .filter(|(recorded, _)| *recorded == hook)
            .count()
    }

    pub fn clear_hooks(&self) {
        self.hooks.lock().unwrap().clear();
    }
}

impl Drop for TestManager {
    fn drop(&mut self) {
        self.layer.shutdown();
    }
}

/// Polls `condition` until it holds or `timeout` passes. Returns whether it held.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
