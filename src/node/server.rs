use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::error::{Result, TableNetworkError};
use crate::networking::message::{ErrorCode, Message, MessageType};
use crate::networking::message_types::authentication::{
    AuthenticationChallenge, AuthenticationResponse,
};
use crate::networking::remote_node::{CloseReason, MessageContext};
use crate::networking::transport::SessionId;
use crate::node::{Node, NodeApi, NodeStrategy};
use crate::player::{self, Player, PlayerRole};
use crate::table::Table;

/// Where one client is in the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerPhase {
    AwaitingHello,
    AwaitingBeginAuthentication,
    AwaitingEndAuthentication(AuthenticationChallenge),
    Authenticated,
}

///
/// Hosts a session. The local player is the host and starts out in control.
///
/// The server is authoritative for the player list: every change to it, whether made
/// locally or asked for by a client, is applied here and broadcast to every
/// authenticated client.
///
pub struct ServerStrategy {
    sessions: HashMap<SessionId, ServerPhase>,
}

impl ServerStrategy {
    pub fn new() -> Self {
        ServerStrategy {
            sessions: HashMap::new(),
        }
    }

    pub fn phase(&self, session: SessionId) -> Option<&ServerPhase> {
        self.sessions.get(&session)
    }

    fn register_handlers(node: &mut Node<Self>, session: SessionId) -> Result<()> {
        node.register_handler(session, MessageType::Hello, |node, context, message| {
            if let Message::Hello { supported_version } = message {
                ServerStrategy::hello_received(node, context, supported_version);
            }
        })?;
        node.register_handler(
            session,
            MessageType::BeginAuthenticationRequest,
            |node, context, _message| ServerStrategy::begin_authentication_received(node, context),
        )?;
        node.register_handler(
            session,
            MessageType::EndAuthenticationRequest,
            |node, context, message| {
                if let Message::EndAuthenticationRequest(response) = message {
                    ServerStrategy::end_authentication_received(node, context, response);
                }
            },
        )?;
        node.register_handler(session, MessageType::GiveControl, |node, context, message| {
            if let Message::GiveControl { player_name } = message {
                ServerStrategy::control_message_received(node, context, |players, requester| {
                    player::give_control(players, requester, &player_name).map(|_| true)
                });
            }
        })?;
        node.register_handler(session, MessageType::RequestControl, |node, context, _message| {
            ServerStrategy::control_message_received(node, context, |players, requester| {
                player::set_control_request(players, requester, true)
            });
        })?;
        node.register_handler(
            session,
            MessageType::CancelControlRequest,
            |node, context, _message| {
                ServerStrategy::control_message_received(node, context, |players, requester| {
                    player::set_control_request(players, requester, false)
                });
            },
        )
    }

    // replies UnexpectedMessage unless the session is in a phase `expected` accepts
    fn in_phase(
        node: &mut Node<Self>,
        context: MessageContext,
        expected: fn(&ServerPhase) -> bool,
    ) -> bool {
        let phase = node.strategy.sessions.get(&context.session);
        if phase.map_or(false, expected) {
            return true;
        }
        warn!(
            "unexpected message from {} in phase {:?}",
            context.session, phase
        );
        node.reply_with_error(context.session, ErrorCode::UnexpectedMessage, context.id);
        false
    }

    fn reject(node: &mut Node<Self>, context: MessageContext, code: ErrorCode) {
        node.reply_with_error(context.session, code, context.id);
        node.close_remote_node(context.session, CloseReason::ProtocolError(code));
    }

    fn hello_received(node: &mut Node<Self>, context: MessageContext, supported_version: u32) {
        if !ServerStrategy::in_phase(node, context, |phase| {
            *phase == ServerPhase::AwaitingHello
        }) {
            return;
        }
        let version = node.settings().protocol_version;
        if supported_version != version {
            warn!(
                "{} speaks protocol version {}, this server {}",
                context.session, supported_version, version
            );
            return ServerStrategy::reject(node, context, ErrorCode::IncompatibleVersion);
        }
        let reply = Message::HelloResponse {
            chosen_version: version,
        };
        match node.send_reply(context.session, reply, context.id) {
            Ok(_) => {
                node.strategy
                    .sessions
                    .insert(context.session, ServerPhase::AwaitingBeginAuthentication);
            }
            Err(err) => warn!("failed to answer hello from {}: {}", context.session, err),
        }
    }

    fn begin_authentication_received(node: &mut Node<Self>, context: MessageContext) {
        if !ServerStrategy::in_phase(node, context, |phase| {
            *phase == ServerPhase::AwaitingBeginAuthentication
        }) {
            return;
        }
        let challenge = AuthenticationChallenge::new();
        let reply = Message::BeginAuthenticationResponse(challenge.clone());
        match node.send_reply(context.session, reply, context.id) {
            Ok(_) => {
                node.strategy.sessions.insert(
                    context.session,
                    ServerPhase::AwaitingEndAuthentication(challenge),
                );
            }
            Err(err) => warn!("failed to send challenge to {}: {}", context.session, err),
        }
    }

    fn end_authentication_received(
        node: &mut Node<Self>,
        context: MessageContext,
        response: AuthenticationResponse,
    ) {
        let challenge = match node.strategy.sessions.get(&context.session) {
            Some(ServerPhase::AwaitingEndAuthentication(challenge)) => challenge.clone(),
            _ => {
                ServerStrategy::in_phase(node, context, |phase| {
                    matches!(phase, ServerPhase::AwaitingEndAuthentication(_))
                });
                return;
            }
        };
        let password = match node.password() {
            Ok(password) => password,
            Err(err) => return warn!("cannot verify {}: {}", context.session, err),
        };
        if !challenge.verify(&password, response.response()) {
            warn!(
                "{} failed to authenticate as '{}'",
                context.session,
                response.player_name()
            );
            return ServerStrategy::reject(node, context, ErrorCode::AuthenticationFailed);
        }
        let player_name = response.player_name().to_string();
        match node.bind_remote_node(context.session, &player_name) {
            Ok(()) => {}
            Err(TableNetworkError::IllegalState(reason)) => {
                warn!("{}: {}", context.session, reason);
                return ServerStrategy::reject(node, context, ErrorCode::DuplicatePlayerName);
            }
            Err(err) => {
                warn!("{}: {}", context.session, err);
                return ServerStrategy::reject(node, context, ErrorCode::AuthenticationFailed);
            }
        }
        node.strategy
            .sessions
            .insert(context.session, ServerPhase::Authenticated);
        if let Err(err) = ServerStrategy::welcome(node, context) {
            warn!("failed to welcome '{}': {}", player_name, err);
            return node.close_remote_node(
                context.session,
                CloseReason::ProtocolError(ErrorCode::UnspecifiedError),
            );
        }
        node.players_mut().push(Player::new(&player_name));
        info!("'{}' joined the session", player_name);
        ServerStrategy::broadcast_players(node);
    }

    // the reply, then the current table
    fn welcome(node: &mut Node<Self>, context: MessageContext) -> Result<()> {
        let host_player_name = node.player_name()?;
        let memento = node.local_table()?.memento();
        node.send_reply(
            context.session,
            Message::EndAuthenticationResponse { host_player_name },
            context.id,
        )?;
        node.send_message(context.session, Message::SetTableMemento { memento })?;
        Ok(())
    }

    ///
    /// Applies a control change asked for by the client on `context.session` and
    /// broadcasts the result. `change` returns whether the player list changed.
    ///
    fn control_message_received<F>(node: &mut Node<Self>, context: MessageContext, change: F)
    where
        F: FnOnce(&mut Vec<Player>, &str) -> Result<bool>,
    {
        if !ServerStrategy::in_phase(node, context, |phase| {
            *phase == ServerPhase::Authenticated
        }) {
            return;
        }
        let requester = match node
            .remote_node(context.session)
            .and_then(|remote_node| remote_node.player_name())
        {
            Some(name) => name.to_string(),
            None => return,
        };
        match ServerStrategy::change_players(node, |players| change(players, &requester)) {
            Ok(true) => ServerStrategy::broadcast_players(node),
            Ok(false) => debug!("control request from '{}' changed nothing", requester),
            Err(err) => {
                warn!("rejected control change from '{}': {}", requester, err);
                node.reply_with_error(context.session, ErrorCode::NotAuthorized, context.id);
            }
        }
    }

    // runs `change` on a copy so a failed change leaves the player list untouched
    fn change_players<F>(node: &mut Node<Self>, change: F) -> Result<bool>
    where
        F: FnOnce(&mut Vec<Player>) -> Result<bool>,
    {
        let mut players = node.players().to_owned_value();
        let changed = change(&mut players)?;
        if changed {
            *node.players_mut() = players;
        }
        Ok(changed)
    }

    /// Sends the player list, without anybody's `Local` role, to every bound client.
    pub(crate) fn broadcast_players(node: &mut Node<Self>) {
        let players: Vec<Player> = node
            .players()
            .iter()
            .map(Player::without_local_role)
            .collect();
        let sessions: Vec<SessionId> = node.remote_nodes().values().copied().collect();
        for session in sessions {
            let message = Message::Players {
                players: players.clone(),
            };
            if let Err(err) = node.send_message(session, message) {
                warn!("failed to send the player list to {}: {}", session, err);
            }
        }
    }

    fn local_control_change<F>(node: &mut Node<Self>, change: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Player>, &str) -> Result<bool>,
    {
        let host = node.player_name()?;
        if ServerStrategy::change_players(node, |players| change(players, &host))? {
            ServerStrategy::broadcast_players(node);
        }
        Ok(())
    }
}

impl Default for ServerStrategy {
    fn default() -> Self {
        ServerStrategy::new()
    }
}

impl NodeStrategy for ServerStrategy {
    fn local_player_roles() -> Vec<PlayerRole> {
        vec![PlayerRole::Host, PlayerRole::Editor]
    }

    fn connecting(node: &mut Node<Self>) -> Result<()> {
        node.strategy.sessions.clear();
        Ok(())
    }

    fn disconnected(node: &mut Node<Self>) {
        node.strategy.sessions.clear();
    }

    fn dispose(node: &mut Node<Self>) {
        node.strategy.sessions.clear();
    }

    fn remote_node_started(node: &mut Node<Self>, session: SessionId) {
        node.strategy
            .sessions
            .insert(session, ServerPhase::AwaitingHello);
        if let Err(err) = ServerStrategy::register_handlers(node, session) {
            warn!("failed to register handlers for {}: {}", session, err);
            node.close_remote_node(
                session,
                CloseReason::ProtocolError(ErrorCode::UnspecifiedError),
            );
        }
    }

    fn remote_node_stopped(node: &mut Node<Self>, session: SessionId, player_name: Option<String>) {
        node.strategy.sessions.remove(&session);
        if let Some(name) = player_name {
            if player::remove_player(node.players_mut(), &name) {
                info!("'{}' left the session", name);
                ServerStrategy::broadcast_players(node);
            }
        }
    }

    fn give_control(node: &mut Node<Self>, player_name: &str) -> Result<()> {
        let target = player_name.to_string();
        ServerStrategy::local_control_change(node, move |players, host| {
            player::give_control(players, host, &target).map(|_| true)
        })
    }

    fn request_control(node: &mut Node<Self>) -> Result<()> {
        ServerStrategy::local_control_change(node, |players, host| {
            player::set_control_request(players, host, true)
        })
    }

    fn cancel_control_request(node: &mut Node<Self>) -> Result<()> {
        ServerStrategy::local_control_change(node, |players, host| {
            player::set_control_request(players, host, false)
        })
    }

    fn accepts_table_increment_from(node: &Node<Self>, session: SessionId) -> bool {
        let sender = match node.remote_node(session).and_then(|remote_node| remote_node.player_name()) {
            Some(name) => name,
            None => return false,
        };
        node.players()
            .iter()
            .any(|player| player.name() == sender && player.is_editor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networking::message_envelope::{MessageEnvelope, NULL_CORRELATION_ID};
    use crate::networking::transport::TransportEvent;
    use crate::settings::PROTOCOL_VERSION;
    use crate::table::{InMemoryTable, TableIncrement};
    use crate::test_utilities::mocks::{FakeTransportLayer, RecordingServiceContext};
    use crate::test_utilities::StrategyHarness;
    use std::sync::Arc;

    const PASSWORD: &str = "secret";

    struct Client {
        session: SessionId,
        context: RecordingServiceContext,
        next_id: u16,
    }

    impl Client {
        fn send(&mut self, harness: &StrategyHarness, message: Message) -> u16 {
            self.next_id += 1;
            let envelope = MessageEnvelope::from_message(&message, self.next_id, NULL_CORRELATION_ID).unwrap();
            harness.deliver(self.session, envelope);
            self.next_id
        }

        // the last message the server sent in reply to request `id`
        fn reply_to(&self, id: u16) -> Message {
            self.context
                .sent_envelopes()
                .iter()
                .rev()
                .find(|envelope| envelope.correlation_id() == id)
                .unwrap()
                .decode_message()
                .unwrap()
        }
    }

    fn hosting() -> (StrategyHarness, Arc<InMemoryTable>) {
        let table = Arc::new(InMemoryTable::new());
        let shared: Arc<dyn Table> = table.clone();
        let harness = StrategyHarness::server(FakeTransportLayer::succeeding(), shared);
        harness.connect("host", PASSWORD).unwrap();
        (harness, table)
    }

    fn join(harness: &StrategyHarness, name: &str, password: &str) -> Client {
        let context = RecordingServiceContext::new();
        let session = harness.start_session(context.clone());
        let mut client = Client {
            session,
            context,
            next_id: 0,
        };
        let hello = client.send(
            harness,
            Message::Hello {
                supported_version: PROTOCOL_VERSION,
            },
        );
        assert_eq!(
            client.reply_to(hello),
            Message::HelloResponse {
                chosen_version: PROTOCOL_VERSION
            }
        );
        let begin = client.send(harness, Message::BeginAuthenticationRequest);
        let challenge = match client.reply_to(begin) {
            Message::BeginAuthenticationResponse(challenge) => challenge,
            other => panic!("unexpected {:?}", other),
        };
        let response = AuthenticationResponse::new(name, &challenge, password);
        client.send(harness, Message::EndAuthenticationRequest(response));
        client
    }

    fn last_players(client: &Client) -> Vec<Player> {
        client
            .context
            .sent_messages()
            .into_iter()
            .rev()
            .find_map(|message| match message {
                Message::Players { players } => Some(players),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn host_starts_in_control_test() {
        let (harness, _table) = hosting();
        let host = harness.player().unwrap();
        assert!(host.has_role(PlayerRole::Host));
        assert!(host.is_editor());
        assert!(host.has_role(PlayerRole::Local));
    }

    #[test]
    fn authenticated_client_joins_the_session_test() {
        let (harness, table) = hosting();
        table.apply_increment(&TableIncrement::set("board", vec![9]));
        let client = join(&harness, "alice", PASSWORD);

        assert_eq!(
            client.reply_to(3),
            Message::EndAuthenticationResponse {
                host_player_name: String::from("host")
            }
        );
        let sent = client.context.sent_messages();
        assert!(sent.contains(&Message::SetTableMemento {
            memento: table.memento()
        }));
        let players = last_players(&client);
        assert_eq!(players.len(), 2);
        assert!(players.iter().all(|player| !player.has_role(PlayerRole::Local)));
        assert_eq!(harness.players().len(), 2);
        let remote_nodes = harness.layer().sync_exec(|node| node.remote_nodes()).unwrap();
        assert_eq!(remote_nodes.get("alice"), Some(&client.session));
    }

    #[test]
    fn failed_welcome_closes_the_session_test() {
        let (harness, _table) = hosting();
        let context = RecordingServiceContext::new();
        let session = harness.start_session(context.clone());
        let mut client = Client {
            session,
            context,
            next_id: 0,
        };
        client.send(
            &harness,
            Message::Hello {
                supported_version: PROTOCOL_VERSION,
            },
        );
        let begin = client.send(&harness, Message::BeginAuthenticationRequest);
        let challenge = match client.reply_to(begin) {
            Message::BeginAuthenticationResponse(challenge) => challenge,
            other => panic!("unexpected {:?}", other),
        };

        // the connection drops before the welcome goes out
        client.context.refuse_sends();
        let response = AuthenticationResponse::new("alice", &challenge, PASSWORD);
        client.send(&harness, Message::EndAuthenticationRequest(response));

        assert!(client.context.is_stopped());
        let remote_nodes = harness.layer().sync_exec(|node| node.remote_nodes()).unwrap();
        assert!(remote_nodes.get("alice").is_none());
        assert_eq!(harness.players().len(), 1);

        // the name is free again
        let retry = join(&harness, "alice", PASSWORD);
        assert_eq!(harness.players().len(), 2);
        assert!(!retry.context.is_stopped());
    }

    #[test]
    fn wrong_password_is_rejected_test() {
        let (harness, _table) = hosting();
        let client = join(&harness, "alice", "guess");
        assert_eq!(client.reply_to(3), Message::error(ErrorCode::AuthenticationFailed));
        assert!(client.context.is_stopped());
        assert_eq!(harness.players().len(), 1);
    }

    #[test]
    fn duplicate_names_are_rejected_test() {
        let (harness, _table) = hosting();
        let client = join(&harness, "host", PASSWORD);
        assert_eq!(client.reply_to(3), Message::error(ErrorCode::DuplicatePlayerName));
        assert!(client.context.is_stopped());
    }

    #[test]
    fn incompatible_version_is_rejected_test() {
        let (harness, _table) = hosting();
        let context = RecordingServiceContext::new();
        let session = harness.start_session(context.clone());
        let envelope = MessageEnvelope::from_message(
            &Message::Hello {
                supported_version: PROTOCOL_VERSION + 1,
            },
            1,
            NULL_CORRELATION_ID,
        )
        .unwrap();
        harness.deliver(session, envelope);
        assert_eq!(
            context.sent_messages(),
            vec![Message::error(ErrorCode::IncompatibleVersion)]
        );
        assert!(context.is_stopped());
    }

    #[test]
    fn out_of_phase_messages_are_unexpected_test() {
        let (harness, _table) = hosting();
        let context = RecordingServiceContext::new();
        let session = harness.start_session(context.clone());
        let mut client = Client {
            session,
            context,
            next_id: 0,
        };
        let id = client.send(&harness, Message::BeginAuthenticationRequest);
        assert_eq!(client.reply_to(id), Message::error(ErrorCode::UnexpectedMessage));
        let id = client.send(&harness, Message::RequestControl);
        assert_eq!(client.reply_to(id), Message::error(ErrorCode::UnexpectedMessage));
        assert!(!client.context.is_stopped());
    }

    #[test]
    fn control_moves_between_host_and_client_test() {
        let (harness, _table) = hosting();
        let mut client = join(&harness, "alice", PASSWORD);

        client.send(&harness, Message::RequestControl);
        let players = last_players(&client);
        assert!(players[1].has_role(PlayerRole::EditorRequester));

        harness.layer().sync_exec(|node| node.give_control("alice")).unwrap().unwrap();
        let players = last_players(&client);
        assert!(players[1].is_editor());
        assert!(!players[0].is_editor());

        // the host no longer has control to give
        let result = harness.layer().sync_exec(|node| node.give_control("alice")).unwrap();
        assert!(matches!(result, Err(TableNetworkError::IllegalState(_))));

        client.send(
            &harness,
            Message::GiveControl {
                player_name: String::from("host"),
            },
        );
        assert!(harness.player().unwrap().is_editor());
    }

    #[test]
    fn control_from_a_non_editor_is_not_authorized_test() {
        let (harness, _table) = hosting();
        let mut client = join(&harness, "alice", PASSWORD);
        let id = client.send(
            &harness,
            Message::GiveControl {
                player_name: String::from("alice"),
            },
        );
        assert_eq!(client.reply_to(id), Message::error(ErrorCode::NotAuthorized));
        assert!(harness.player().unwrap().is_editor());
    }

    #[test]
    fn table_increments_need_control_test() {
        let (harness, table) = hosting();
        let mut client = join(&harness, "alice", PASSWORD);
        let increment = TableIncrement::set("die", vec![2]);
        let id = client.send(
            &harness,
            Message::TableIncrement {
                increment: increment.clone(),
            },
        );
        assert_eq!(client.reply_to(id), Message::error(ErrorCode::NotAuthorized));
        assert_eq!(table.component("die"), None);

        harness.layer().sync_exec(|node| node.give_control("alice")).unwrap().unwrap();
        client.send(&harness, Message::TableIncrement { increment });
        assert_eq!(table.component("die"), Some(vec![2]));
    }

    #[test]
    fn host_updates_reach_clients_test() {
        let (harness, table) = hosting();
        let client = join(&harness, "alice", PASSWORD);
        let increment = TableIncrement::set("card", vec![5]);
        let update = increment.clone();
        harness
            .layer()
            .sync_exec(move |node| node.update_table(update))
            .unwrap()
            .unwrap();
        assert_eq!(table.component("card"), Some(vec![5]));
        assert_eq!(
            client.context.sent_messages().last(),
            Some(&Message::TableIncrement { increment })
        );
    }

    #[test]
    fn departing_editor_returns_control_to_host_test() {
        let (harness, _table) = hosting();
        let client = join(&harness, "alice", PASSWORD);
        let other = join(&harness, "bob", PASSWORD);
        harness.layer().sync_exec(|node| node.give_control("alice")).unwrap().unwrap();
        harness
            .transport()
            .emit(TransportEvent::SessionStopped {
                session: client.session,
            });
        assert_eq!(harness.players().len(), 2);
        assert!(harness.player().unwrap().is_editor());
        let players = last_players(&other);
        assert_eq!(players.len(), 2);
        assert!(players[0].is_editor());
    }
}
