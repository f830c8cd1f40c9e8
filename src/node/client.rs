use tracing::{info, warn};

use crate::error::{Result, TableNetworkError};
use crate::networking::message::{ErrorCode, Message, MessageType};
use crate::networking::message_types::authentication::AuthenticationResponse;
use crate::networking::remote_node::{CloseReason, MessageContext};
use crate::networking::transport::SessionId;
use crate::node::{Node, NodeApi, NodeStrategy};
use crate::player::{Player, PlayerRole};
use crate::table::Table;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientPhase {
    Idle,
    Hello,
    Authenticating,
    Authenticated,
}

///
/// Joins a session hosted by a server node.
///
/// The client talks to exactly one remote node, the server. Once the session starts it
/// runs the handshake:
///
/// ```text
/// Hello                       -> HelloResponse
/// BeginAuthenticationRequest  -> BeginAuthenticationResponse(challenge)
/// EndAuthenticationRequest    -> EndAuthenticationResponse
/// ```
///
/// and then mirrors the player list and table the server sends. If the handshake fails
/// or the server goes away, the client disconnects.
///
pub struct ClientStrategy {
    phase: ClientPhase,
    server: Option<SessionId>,
}

impl ClientStrategy {
    pub fn new() -> Self {
        ClientStrategy {
            phase: ClientPhase::Idle,
            server: None,
        }
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn server(&self) -> Option<SessionId> {
        self.server
    }

    fn reset(&mut self) {
        self.phase = ClientPhase::Idle;
        self.server = None;
    }

    fn authenticated_server(node: &Node<Self>) -> Result<SessionId> {
        match (node.strategy.phase, node.strategy.server) {
            (ClientPhase::Authenticated, Some(server)) => Ok(server),
            (phase, _) => Err(TableNetworkError::illegal_state(format!(
                "client is not authenticated ({:?})",
                phase
            ))),
        }
    }

    fn register_handlers(node: &mut Node<Self>, server: SessionId) -> Result<()> {
        node.register_handler(server, MessageType::Players, |node, context, message| {
            if let Message::Players { players } = message {
                ClientStrategy::players_received(node, context, players);
            }
        })?;
        node.register_handler(server, MessageType::SetTableMemento, |node, _context, message| {
            if let Message::SetTableMemento { memento } = message {
                match node.local_table() {
                    Ok(table) => {
                        table.set_memento(&memento);
                        info!("table replaced by the host's copy");
                    }
                    Err(err) => warn!("dropping table memento: {}", err),
                }
            }
        })?;
        node.register_handler(server, MessageType::Error, |_node, context, message| {
            if let Some(code) = message.error_code() {
                warn!(
                    "server reported {:?} for message {}",
                    code, context.correlation_id
                );
            }
        })
    }

    fn begin_handshake(node: &mut Node<Self>, server: SessionId) -> Result<()> {
        ClientStrategy::register_handlers(node, server)?;
        node.strategy.phase = ClientPhase::Hello;
        let supported_version = node.settings().protocol_version;
        node.send_request(
            server,
            Message::Hello { supported_version },
            ClientStrategy::hello_answered,
        )?;
        Ok(())
    }

    fn hello_answered(node: &mut Node<Self>, context: MessageContext, message: Message) {
        let expected = node.settings().protocol_version;
        match message {
            Message::HelloResponse { chosen_version } if chosen_version == expected => {
                node.strategy.phase = ClientPhase::Authenticating;
                let sent = node.send_request(
                    context.session,
                    Message::BeginAuthenticationRequest,
                    ClientStrategy::challenge_received,
                );
                if let Err(err) = sent {
                    warn!("failed to begin authentication: {}", err);
                    ClientStrategy::fail(node, context.session, ErrorCode::UnspecifiedError);
                }
            }
            Message::HelloResponse { chosen_version } => {
                warn!(
                    "server chose protocol version {}, expected {}",
                    chosen_version, expected
                );
                ClientStrategy::fail(node, context.session, ErrorCode::IncompatibleVersion);
            }
            other => ClientStrategy::unexpected_reply(node, context, other),
        }
    }

    fn challenge_received(node: &mut Node<Self>, context: MessageContext, message: Message) {
        let challenge = match message {
            Message::BeginAuthenticationResponse(challenge) => challenge,
            other => return ClientStrategy::unexpected_reply(node, context, other),
        };
        let response = match node.configuration() {
            Ok(configuration) => AuthenticationResponse::new(
                configuration.player_name(),
                &challenge,
                configuration.password(),
            ),
            Err(err) => {
                warn!("cannot answer the challenge: {}", err);
                return;
            }
        };
        let sent = node.send_request(
            context.session,
            Message::EndAuthenticationRequest(response),
            ClientStrategy::authentication_answered,
        );
        if let Err(err) = sent {
            warn!("failed to finish authentication: {}", err);
            ClientStrategy::fail(node, context.session, ErrorCode::UnspecifiedError);
        }
    }

    fn authentication_answered(node: &mut Node<Self>, context: MessageContext, message: Message) {
        let host_player_name = match message {
            Message::EndAuthenticationResponse { host_player_name } => host_player_name,
            other => return ClientStrategy::unexpected_reply(node, context, other),
        };
        match node.bind_remote_node(context.session, &host_player_name) {
            Ok(()) => {
                node.strategy.phase = ClientPhase::Authenticated;
                info!("authenticated with host '{}'", host_player_name);
            }
            Err(err) => {
                warn!("cannot bind host '{}': {}", host_player_name, err);
                ClientStrategy::fail(node, context.session, ErrorCode::DuplicatePlayerName);
            }
        }
    }

    fn unexpected_reply(node: &mut Node<Self>, context: MessageContext, message: Message) {
        match message.error_code() {
            Some(code) => {
                warn!("server rejected the handshake: {:?}", code);
                ClientStrategy::fail(node, context.session, code);
            }
            None => {
                warn!(
                    "unexpected {} during the handshake",
                    message.message_type()
                );
                node.reply_with_error(context.session, ErrorCode::UnexpectedMessage, context.id);
                ClientStrategy::fail(node, context.session, ErrorCode::UnexpectedMessage);
            }
        }
    }

    // closing the server's remote node disconnects the client
    fn fail(node: &mut Node<Self>, server: SessionId, code: ErrorCode) {
        node.close_remote_node(server, CloseReason::ProtocolError(code));
    }

    fn players_received(node: &mut Node<Self>, context: MessageContext, players: Vec<Player>) {
        if node.strategy.server != Some(context.session) {
            warn!("ignoring player list from {}", context.session);
            return;
        }
        let local_name = node.local_player_name().map(String::from);
        let mirrored: Vec<Player> = players
            .into_iter()
            .map(|mut player| {
                if Some(player.name()) == local_name.as_deref() {
                    player.add_role(PlayerRole::Local);
                }
                player
            })
            .collect();
        info!("{} players in the session", mirrored.len());
        *node.players_mut() = mirrored;
    }

    fn send_to_server(node: &mut Node<Self>, message: Message) -> Result<()> {
        let server = ClientStrategy::authenticated_server(node)?;
        node.send_message(server, message)?;
        Ok(())
    }
}

impl Default for ClientStrategy {
    fn default() -> Self {
        ClientStrategy::new()
    }
}

impl NodeStrategy for ClientStrategy {
    fn local_player_roles() -> Vec<PlayerRole> {
        vec![]
    }

    fn connecting(node: &mut Node<Self>) -> Result<()> {
        node.strategy.reset();
        Ok(())
    }

    fn disconnected(node: &mut Node<Self>) {
        node.strategy.reset();
    }

    fn dispose(node: &mut Node<Self>) {
        node.strategy.reset();
    }

    fn remote_node_started(node: &mut Node<Self>, session: SessionId) {
        if node.strategy.server.is_some() {
            warn!("client already has a server, closing session {}", session);
            node.close_remote_node(session, CloseReason::ProtocolError(ErrorCode::UnexpectedMessage));
            return;
        }
        node.strategy.server = Some(session);
        if let Err(err) = ClientStrategy::begin_handshake(node, session) {
            warn!("failed to start the handshake: {}", err);
            ClientStrategy::fail(node, session, ErrorCode::UnspecifiedError);
        }
    }

    fn remote_node_stopped(node: &mut Node<Self>, session: SessionId, _player_name: Option<String>) {
        if node.strategy.server == Some(session) {
            info!("lost the server session, disconnecting");
            node.disconnect();
        }
    }

    fn give_control(node: &mut Node<Self>, player_name: &str) -> Result<()> {
        if !node.local_player_is_editor() {
            return Err(TableNetworkError::illegal_state(
                "only the player in control can give it away",
            ));
        }
        if !node.players().iter().any(|player| player.name() == player_name) {
            return Err(TableNetworkError::invalid_argument(format!(
                "unknown player '{}'",
                player_name
            )));
        }
        ClientStrategy::send_to_server(
            node,
            Message::GiveControl {
                player_name: player_name.to_string(),
            },
        )
    }

    fn request_control(node: &mut Node<Self>) -> Result<()> {
        ClientStrategy::send_to_server(node, Message::RequestControl)
    }

    fn cancel_control_request(node: &mut Node<Self>) -> Result<()> {
        ClientStrategy::send_to_server(node, Message::CancelControlRequest)
    }

    fn accepts_table_increment_from(node: &Node<Self>, session: SessionId) -> bool {
        node.strategy.phase == ClientPhase::Authenticated && node.strategy.server == Some(session)
    }
}
