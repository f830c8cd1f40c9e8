//!
//! The local participant in a table-network session.
//!
//! A [`Node`] owns the connection lifecycle, the remote nodes for every live session,
//! the players and the table proxies. It is only ever touched on its node layer: the
//! [`NodeController`] marshals local calls onto the layer and the transport's event
//! sink posts every session event there.
//!
//! What differs between hosting and joining lives in a [`NodeStrategy`]. The node calls
//! the strategy's hooks at fixed points of the lifecycle:
//!
//! ```text
//! connect:     connecting -> transport open -> local proxy bound -> connected
//! failed open: connecting -> transport open fails -> dispose
//! disconnect:  disconnecting -> goodbye, remote nodes closed -> local proxy unbound
//!              -> disconnected -> transport closed
//! ```
//!
pub mod client;
pub mod controller;
pub mod factory;
pub mod server;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, event, info, warn, Level};

use crate::configuration::TableNetworkConfiguration;
use crate::error::{Result, TableNetworkError};
use crate::networking::message::{ErrorCode, Message, MessageType};
use crate::networking::remote_node::{CloseReason, CorrelatedHandler, MessageContext, RemoteNode};
use crate::networking::transport::{
    ServiceContext, SessionId, TransportEvent, TransportEventSink, TransportLayer,
};
use crate::node_layer::NodeLayer;
use crate::player::{Player, PlayerRole};
use crate::settings::NodeSettings;
use crate::snapshot::Snapshot;
use crate::table::{Table, TableIncrement};
use crate::table_proxy::TableProxy;

pub use controller::{ConnectToken, DisconnectToken, NodeController};
pub use factory::NodeFactory;

/// The node layer every node runs on.
pub type NodeLayerHandle = NodeLayer<Box<dyn NodeApi>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

///
/// The client or server half of a node.
///
/// Hooks are associated functions that receive the whole node so they can reach both
/// their own state (`node.strategy`) and the node's. All of them run on the node layer.
///
pub trait NodeStrategy: Sized + Send + 'static {
    /// Roles the local player starts with, besides `Local`.
    fn local_player_roles() -> Vec<PlayerRole>;

    /// Runs before the transport is opened. An error aborts the connect attempt.
    fn connecting(_node: &mut Node<Self>) -> Result<()> {
        Ok(())
    }

    fn connected(_node: &mut Node<Self>) {}

    fn disconnecting(_node: &mut Node<Self>) {}

    fn disconnected(_node: &mut Node<Self>) {}

    /// Releases whatever a failed connect attempt acquired.
    fn dispose(_node: &mut Node<Self>) {}

    /// A remote node was started for a new session.
    fn remote_node_started(_node: &mut Node<Self>, _session: SessionId) {}

    /// A remote node went away while connected. `player_name` is the name it was bound
    /// to, if any; it has already been unbound.
    fn remote_node_stopped(
        _node: &mut Node<Self>,
        _session: SessionId,
        _player_name: Option<String>,
    ) {
    }

    fn give_control(node: &mut Node<Self>, player_name: &str) -> Result<()>;

    fn request_control(node: &mut Node<Self>) -> Result<()>;

    fn cancel_control_request(node: &mut Node<Self>) -> Result<()>;

    /// Whether a table increment received from `session` may be applied.
    fn accepts_table_increment_from(node: &Node<Self>, session: SessionId) -> bool;
}

/// The operations the node layer runs on a node, independent of its strategy.
pub trait NodeApi: Send {
    fn state(&self) -> NodeState;

    fn connect(&mut self, configuration: TableNetworkConfiguration) -> Result<()>;

    /// Does nothing when already disconnected.
    fn disconnect(&mut self);

    /// The local player, while connected.
    fn player(&self) -> Option<Player>;

    fn players(&self) -> Snapshot<Vec<Player>>;

    fn give_control(&mut self, player_name: &str) -> Result<()>;

    fn request_control(&mut self) -> Result<()>;

    fn cancel_control_request(&mut self) -> Result<()>;

    /// Applies a change made by the local player, who must be the editor, and sends it
    /// to every other player.
    fn update_table(&mut self, increment: TableIncrement) -> Result<()>;

    fn handle_transport_event(&mut self, event: TransportEvent);

    fn bind_remote_node(&mut self, session: SessionId, player_name: &str) -> Result<()>;

    fn unbind_remote_node(&mut self, session: SessionId) -> Result<()>;

    /// Sessions of the bound remote nodes, by player name.
    fn remote_nodes(&self) -> Snapshot<BTreeMap<String, SessionId>>;

    /// One proxy per bound player, the local player included.
    fn table_proxies(&self) -> Snapshot<BTreeMap<String, TableProxy>>;

    fn player_name(&self) -> Result<String>;

    fn password(&self) -> Result<String>;
}

pub struct Node<S: NodeStrategy> {
    layer: NodeLayerHandle,
    pub(crate) strategy: S,
    state: NodeState,
    transport: Box<dyn TransportLayer>,
    settings: Arc<NodeSettings>,
    configuration: Option<TableNetworkConfiguration>,
    remote_nodes: HashMap<SessionId, RemoteNode<Node<S>>>,
    bound_remote_nodes: Snapshot<BTreeMap<String, SessionId>>,
    table_proxies: Snapshot<BTreeMap<String, TableProxy>>,
    players: Snapshot<Vec<Player>>,
}

impl<S: NodeStrategy> Node<S> {
    pub fn new(
        layer: NodeLayerHandle,
        strategy: S,
        transport: Box<dyn TransportLayer>,
        settings: Arc<NodeSettings>,
    ) -> Self {
        Node {
            layer,
            strategy,
            state: NodeState::Disconnected,
            transport,
            settings,
            configuration: None,
            remote_nodes: HashMap::new(),
            bound_remote_nodes: Snapshot::default(),
            table_proxies: Snapshot::default(),
            players: Snapshot::default(),
        }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.state == NodeState::Connected
    }

    pub fn configuration(&self) -> Result<&TableNetworkConfiguration> {
        match self.state {
            NodeState::Connecting | NodeState::Connected => {}
            state => {
                return Err(TableNetworkError::illegal_state(format!(
                    "no configuration while {:?}",
                    state
                )))
            }
        }
        self.configuration
            .as_ref()
            .ok_or_else(|| TableNetworkError::illegal_state("node has no configuration"))
    }

    pub fn local_table(&self) -> Result<Arc<dyn Table>> {
        Ok(Arc::clone(self.configuration()?.local_table()))
    }

    pub fn remote_node(&self, session: SessionId) -> Option<&RemoteNode<Node<S>>> {
        self.remote_nodes.get(&session)
    }

    pub fn remote_node_mut(&mut self, session: SessionId) -> Result<&mut RemoteNode<Node<S>>> {
        self.remote_nodes.get_mut(&session).ok_or_else(|| {
            TableNetworkError::invalid_argument(format!("unknown remote node {}", session))
        })
    }

    pub fn send_message(&mut self, session: SessionId, message: Message) -> Result<u16> {
        self.remote_node_mut(session)?.send_message(message, None)
    }

    pub fn send_reply(
        &mut self,
        session: SessionId,
        message: Message,
        correlation_id: u16,
    ) -> Result<u16> {
        self.remote_node_mut(session)?
            .send_reply(message, correlation_id)
    }

    pub fn send_request<F>(&mut self, session: SessionId, message: Message, handler: F) -> Result<u16>
    where
        F: FnOnce(&mut Node<S>, MessageContext, Message) + Send + 'static,
    {
        let handler: CorrelatedHandler<Node<S>> = Box::new(handler);
        self.remote_node_mut(session)?
            .send_message(message, Some(handler))
    }

    /// Replies with an error, logging rather than returning a failure to send it.
    pub fn reply_with_error(&mut self, session: SessionId, code: ErrorCode, correlation_id: u16) {
        if let Err(err) = self.send_reply(session, Message::error(code), correlation_id) {
            warn!("failed to send {:?} to {}: {}", code, session, err);
        }
    }

    pub fn register_handler<F>(
        &mut self,
        session: SessionId,
        message_type: MessageType,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(&mut Node<S>, MessageContext, Message) + Send + Sync + 'static,
    {
        self.remote_node_mut(session)?
            .register_uncorrelated_message_handler(message_type, handler)
    }

    /// Closes the remote node for `session`, unbinds it and tells the strategy.
    pub fn close_remote_node(&mut self, session: SessionId, reason: CloseReason) {
        let mut remote_node = match self.remote_nodes.remove(&session) {
            Some(remote_node) => remote_node,
            None => {
                debug!("remote node {} is already gone", session);
                return;
            }
        };
        if !remote_node.is_closed() {
            if let Err(err) = remote_node.close(reason) {
                warn!("failed to close remote node {}: {}", session, err);
            }
        }
        let player_name = remote_node.player_name().map(String::from);
        if let Some(name) = &player_name {
            self.forget_binding(name);
        }
        S::remote_node_stopped(self, session, player_name);
    }

    pub(crate) fn players_mut(&mut self) -> &mut Vec<Player> {
        self.players.make_mut()
    }

    /// Name of the local player. Only meaningful while connecting or connected.
    pub(crate) fn local_player_name(&self) -> Option<&str> {
        self.configuration
            .as_ref()
            .map(|configuration| configuration.player_name())
    }

    pub(crate) fn local_player_is_editor(&self) -> bool {
        self.player().map_or(false, |player| player.is_editor())
    }

    ///
    /// Applies `increment` to the local table and sends it to every remote proxy except
    /// the one for `origin`, the session it came from.
    ///
    pub(crate) fn distribute_table_increment(
        &mut self,
        increment: &TableIncrement,
        origin: Option<SessionId>,
    ) {
        let proxies = self.table_proxies.clone();
        for (player_name, proxy) in proxies.iter() {
            match proxy {
                TableProxy::Local(table) => table.apply_increment(increment),
                TableProxy::Remote(session) if Some(*session) == origin => {}
                TableProxy::Remote(session) => {
                    let message = Message::TableIncrement {
                        increment: increment.clone(),
                    };
                    if let Err(err) = self.send_message(*session, message) {
                        warn!("failed to send table increment to '{}': {}", player_name, err);
                    }
                }
            }
        }
    }

    fn set_state(&mut self, state: NodeState) {
        event!(Level::DEBUG, "node state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn event_sink(&self) -> TransportEventSink {
        let layer = self.layer.clone();
        Arc::new(move |event: TransportEvent| {
            if layer
                .post(move |node: &mut Box<dyn NodeApi>| node.handle_transport_event(event))
                .is_err()
            {
                debug!("node layer is gone, dropping transport event");
            }
        })
    }

    fn bind_local_player(&mut self, configuration: &TableNetworkConfiguration) {
        let name = configuration.player_name();
        let mut player = Player::with_roles(name, &S::local_player_roles());
        player.add_role(PlayerRole::Local);
        *self.players.make_mut() = vec![player];
        self.table_proxies.make_mut().insert(
            name.to_string(),
            TableProxy::Local(Arc::clone(configuration.local_table())),
        );
    }

    fn forget_binding(&mut self, player_name: &str) {
        self.bound_remote_nodes.make_mut().remove(player_name);
        self.table_proxies.make_mut().remove(player_name);
    }

    // drops everything tied to the last session; the remote nodes must already be gone
    fn clear_session_state(&mut self) {
        self.remote_nodes.clear();
        self.bound_remote_nodes = Snapshot::default();
        self.table_proxies = Snapshot::default();
        self.players = Snapshot::default();
    }

    fn abort_connect(&mut self) {
        S::dispose(self);
        self.transport.close();
        self.clear_session_state();
        self.configuration = None;
        self.set_state(NodeState::Disconnected);
    }

    fn session_started(&mut self, session: SessionId, context: Box<dyn ServiceContext>) {
        if self.state != NodeState::Connected {
            warn!("refusing session {} while {:?}", session, self.state);
            context.stop();
            return;
        }
        let mut remote_node = RemoteNode::new(session);
        if let Err(err) = Node::start_remote_node(&mut remote_node, context) {
            warn!("failed to start remote node {}: {}", session, err);
            return;
        }
        info!("session {} started", session);
        self.remote_nodes.insert(session, remote_node);
        S::remote_node_started(self, session);
    }

    // handlers every remote node has, whatever the strategy
    fn start_remote_node(
        remote_node: &mut RemoteNode<Node<S>>,
        context: Box<dyn ServiceContext>,
    ) -> Result<()> {
        remote_node.start(context)?;
        remote_node.register_uncorrelated_message_handler(
            MessageType::Goodbye,
            |node: &mut Node<S>, context, _message| {
                info!("{} said goodbye", context.session);
                node.close_remote_node(context.session, CloseReason::Goodbye);
            },
        )?;
        remote_node.register_uncorrelated_message_handler(
            MessageType::TableIncrement,
            |node: &mut Node<S>, context, message| {
                if let Message::TableIncrement { increment } = message {
                    node.table_increment_received(context, increment);
                }
            },
        )
    }

    fn table_increment_received(&mut self, context: MessageContext, increment: TableIncrement) {
        if !S::accepts_table_increment_from(self, context.session) {
            warn!(
                "rejecting table increment for '{}' from {}",
                increment.component(),
                context.session
            );
            self.reply_with_error(context.session, ErrorCode::NotAuthorized, context.id);
            return;
        }
        self.distribute_table_increment(&increment, Some(context.session));
    }
}

impl<S: NodeStrategy> NodeApi for Node<S> {
    fn state(&self) -> NodeState {
        self.state
    }

    fn connect(&mut self, configuration: TableNetworkConfiguration) -> Result<()> {
        if self.state != NodeState::Disconnected {
            return Err(TableNetworkError::AlreadyConnected);
        }
        info!(
            "connecting as '{}' via {}:{}",
            configuration.player_name(),
            configuration.host_name(),
            configuration.port()
        );
        self.configuration = Some(configuration.clone());
        self.set_state(NodeState::Connecting);

        if let Err(err) = S::connecting(self) {
            warn!("connect aborted: {}", err);
            self.abort_connect();
            return Err(err);
        }
        let events = self.event_sink();
        if let Err(err) = self
            .transport
            .open(configuration.host_name(), configuration.port(), events)
        {
            warn!("failed to open transport: {}", err);
            self.abort_connect();
            return Err(err.into());
        }

        self.bind_local_player(&configuration);
        self.set_state(NodeState::Connected);
        S::connected(self);
        info!("connected as '{}'", configuration.player_name());
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.state == NodeState::Disconnected {
            debug!("already disconnected");
            return;
        }
        self.set_state(NodeState::Disconnecting);
        S::disconnecting(self);

        for (session, mut remote_node) in self.remote_nodes.drain() {
            if remote_node.is_closed() {
                continue;
            }
            if let Err(err) = remote_node.send_message(Message::Goodbye, None) {
                debug!("could not say goodbye to {}: {}", session, err);
            }
            if let Err(err) = remote_node.close(CloseReason::Disconnecting) {
                warn!("failed to close remote node {}: {}", session, err);
            }
        }
        self.clear_session_state();

        self.set_state(NodeState::Disconnected);
        S::disconnected(self);
        self.transport.close();
        self.configuration = None;
        info!("disconnected");
    }

    fn player(&self) -> Option<Player> {
        let name = self.local_player_name()?;
        self.players
            .iter()
            .find(|player| player.name() == name)
            .cloned()
    }

    fn players(&self) -> Snapshot<Vec<Player>> {
        self.players.clone()
    }

    fn give_control(&mut self, player_name: &str) -> Result<()> {
        if player_name.is_empty() {
            return Err(TableNetworkError::invalid_argument(
                "player name must not be empty",
            ));
        }
        if !self.is_connected() {
            return Err(TableNetworkError::illegal_state("node is not connected"));
        }
        S::give_control(self, player_name)
    }

    fn request_control(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Err(TableNetworkError::illegal_state("node is not connected"));
        }
        S::request_control(self)
    }

    fn cancel_control_request(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Err(TableNetworkError::illegal_state("node is not connected"));
        }
        S::cancel_control_request(self)
    }

    fn update_table(&mut self, increment: TableIncrement) -> Result<()> {
        if !self.is_connected() {
            return Err(TableNetworkError::illegal_state("node is not connected"));
        }
        if !self.local_player_is_editor() {
            return Err(TableNetworkError::illegal_state(
                "only the player in control can change the table",
            ));
        }
        self.distribute_table_increment(&increment, None);
        Ok(())
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::SessionStarted { session, context } => {
                self.session_started(session, context)
            }
            TransportEvent::MessageReceived { session, envelope } => {
                let dispatch = match self.remote_nodes.get_mut(&session) {
                    Some(remote_node) => remote_node.message_received(envelope),
                    None => {
                        debug!("envelope {} for unknown session {}", envelope.id(), session);
                        return;
                    }
                };
                dispatch.invoke(self);
            }
            TransportEvent::SessionStopped { session } => {
                if self.remote_nodes.contains_key(&session) {
                    info!("session {} stopped", session);
                    self.close_remote_node(session, CloseReason::SessionStopped);
                }
            }
        }
    }

    fn bind_remote_node(&mut self, session: SessionId, player_name: &str) -> Result<()> {
        if player_name.is_empty() {
            return Err(TableNetworkError::invalid_argument(
                "player name must not be empty",
            ));
        }
        if !self.is_connected() {
            return Err(TableNetworkError::illegal_state(format!(
                "cannot bind '{}' while {:?}",
                player_name, self.state
            )));
        }
        if !self.remote_nodes.contains_key(&session) {
            return Err(TableNetworkError::invalid_argument(format!(
                "unknown remote node {}",
                session
            )));
        }
        if self.table_proxies.contains_key(player_name) {
            return Err(TableNetworkError::illegal_state(format!(
                "player name '{}' is already bound",
                player_name
            )));
        }
        self.remote_node_mut(session)?.bind(player_name)?;
        self.bound_remote_nodes
            .make_mut()
            .insert(player_name.to_string(), session);
        self.table_proxies
            .make_mut()
            .insert(player_name.to_string(), TableProxy::Remote(session));
        info!("bound {} to '{}'", session, player_name);
        Ok(())
    }

    fn unbind_remote_node(&mut self, session: SessionId) -> Result<()> {
        if !self.is_connected() {
            return Err(TableNetworkError::illegal_state(format!(
                "cannot unbind {} while {:?}",
                session, self.state
            )));
        }
        if !self.remote_nodes.contains_key(&session) {
            return Err(TableNetworkError::invalid_argument(format!(
                "unknown remote node {}",
                session
            )));
        }
        let player_name = self.remote_node_mut(session)?.unbind()?;
        self.forget_binding(&player_name);
        info!("unbound {} from '{}'", session, player_name);
        Ok(())
    }

    fn remote_nodes(&self) -> Snapshot<BTreeMap<String, SessionId>> {
        self.bound_remote_nodes.clone()
    }

    fn table_proxies(&self) -> Snapshot<BTreeMap<String, TableProxy>> {
        self.table_proxies.clone()
    }

    fn player_name(&self) -> Result<String> {
        Ok(self.configuration()?.player_name().to_string())
    }

    fn password(&self) -> Result<String> {
        Ok(self.configuration()?.password().to_string())
    }
}

impl<S: NodeStrategy> Drop for Node<S> {
    fn drop(&mut self) {
        if self.state != NodeState::Disconnected {
            self.disconnect();
        }
    }
}

impl<S: NodeStrategy> fmt::Debug for Node<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("state", &self.state)
            .field("remote_nodes", &self.remote_nodes.len())
            .field("bound_remote_nodes", &self.bound_remote_nodes)
            .field("players", &self.players)
            .finish()
    }
}
