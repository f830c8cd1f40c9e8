use tracing::{event, Level};

use crate::configuration::TableNetworkConfiguration;
use crate::error::{Result, TableNetworkError};
use crate::node::{NodeApi, NodeLayerHandle, NodeState};
use crate::node_layer::{Completion, NodeLayer};
use crate::player::Player;
use crate::snapshot::Snapshot;
use crate::table::TableIncrement;

/// A connect attempt in flight. Hand it back to [`NodeController::end_connect`].
#[must_use = "the outcome of a connect attempt is only known at end_connect"]
#[derive(Debug)]
pub struct ConnectToken(Completion<Result<()>>);

/// A disconnect in flight. Hand it back to [`NodeController::end_disconnect`].
#[must_use = "a disconnect is only known to be finished at end_disconnect"]
#[derive(Debug)]
pub struct DisconnectToken(Completion<()>);

///
/// The application's handle to a node. Every call is marshaled onto the node's layer.
///
/// The blocking calls (`end_connect`, `end_disconnect` and the getters) fail with
/// `NodeLayerError::InsideRuntime` when made from inside an async runtime. Async callers
/// use `connect` and `disconnect`, or `layer().exec(..)` for anything else.
///
/// Dropping the controller shuts the node layer down, which disconnects the node.
///
pub struct NodeController {
    layer: NodeLayerHandle,
}

impl NodeController {
    /// Starts a node layer on a thread named `thread_name`; `build` creates the node on it.
    pub fn spawn<F>(thread_name: &str, build: F) -> Result<Self>
    where
        F: FnOnce(NodeLayerHandle) -> Box<dyn NodeApi> + Send + 'static,
    {
        let layer = NodeLayer::spawn(thread_name, build)?;
        Ok(NodeController { layer })
    }

    pub fn layer(&self) -> &NodeLayerHandle {
        &self.layer
    }

    pub fn begin_connect(&self, configuration: TableNetworkConfiguration) -> Result<ConnectToken> {
        event!(
            Level::DEBUG,
            "begin connect as '{}'",
            configuration.player_name()
        );
        let completion = self
            .layer
            .submit(move |node| node.connect(configuration))?;
        Ok(ConnectToken(completion))
    }

    /// Waits for the attempt and returns its error if it failed.
    pub fn end_connect(&self, token: ConnectToken) -> Result<()> {
        token.0.wait()?
    }

    pub async fn connect(&self, configuration: TableNetworkConfiguration) -> Result<()> {
        self.layer
            .exec(move |node| node.connect(configuration))
            .await?
    }

    pub fn begin_disconnect(&self) -> Result<DisconnectToken> {
        event!(Level::DEBUG, "begin disconnect");
        let completion = self.layer.submit(|node| node.disconnect())?;
        Ok(DisconnectToken(completion))
    }

    pub fn end_disconnect(&self, token: DisconnectToken) -> Result<()> {
        Ok(token.0.wait()?)
    }

    pub async fn disconnect(&self) -> Result<()> {
        Ok(self.layer.exec(|node| node.disconnect()).await?)
    }

    pub fn state(&self) -> Result<NodeState> {
        Ok(self.layer.sync_exec(|node| node.state())?)
    }

    pub fn is_connected(&self) -> Result<bool> {
        Ok(self.state()? == NodeState::Connected)
    }

    /// The local player, or `None` unless connected.
    pub fn player(&self) -> Result<Option<Player>> {
        Ok(self.layer.sync_exec(|node| node.player())?)
    }

    pub fn players(&self) -> Result<Snapshot<Vec<Player>>> {
        Ok(self.layer.sync_exec(|node| node.players())?)
    }

    pub fn give_control(&self, player_name: &str) -> Result<()> {
        if player_name.is_empty() {
            return Err(TableNetworkError::invalid_argument(
                "player name must not be empty",
            ));
        }
        let player_name = player_name.to_string();
        self.layer
            .sync_exec(move |node| node.give_control(&player_name))?
    }

    pub fn request_control(&self) -> Result<()> {
        self.layer.sync_exec(|node| node.request_control())?
    }

    pub fn cancel_control_request(&self) -> Result<()> {
        self.layer.sync_exec(|node| node.cancel_control_request())?
    }

    /// Publishes a change to the table. Only the player in control may do this.
    pub fn update_table(&self, increment: TableIncrement) -> Result<()> {
        self.layer
            .sync_exec(move |node| node.update_table(increment))?
    }
}

impl Drop for NodeController {
    fn drop(&mut self) {
        self.layer.shutdown();
    }
}
