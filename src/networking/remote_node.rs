use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, event, warn, Level};

use crate::error::{Result, TableNetworkError};
use crate::networking::message::{ErrorCode, Message, MessageType};
use crate::networking::message_envelope::{
    MessageEnvelope, MAXIMUM_ID, MINIMUM_ID, NULL_CORRELATION_ID,
};
use crate::networking::transport::{ServiceContext, SessionId};

/// Where an inbound message came from, passed to every handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageContext {
    pub session: SessionId,
    /// id of the inbound envelope, the correlation id to reply with
    pub id: u16,
    pub correlation_id: u16,
}

pub type UncorrelatedHandler<C> = Arc<dyn Fn(&mut C, MessageContext, Message) + Send + Sync>;
pub type CorrelatedHandler<C> = Box<dyn FnOnce(&mut C, MessageContext, Message) + Send>;

/// Why a remote node was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// the local node is disconnecting
    Disconnecting,
    /// the peer said goodbye
    Goodbye,
    /// the transport session ended
    SessionStopped,
    /// the local protocol rejected the peer
    ProtocolError(ErrorCode),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteNodeState {
    New,
    Started,
    Closed,
}

/// The handler an inbound message resolved to. The owner of the remote node invokes it
/// once it no longer borrows the remote node.
pub enum Dispatch<C> {
    Correlated {
        handler: CorrelatedHandler<C>,
        context: MessageContext,
        message: Message,
    },
    Uncorrelated {
        handler: UncorrelatedHandler<C>,
        context: MessageContext,
        message: Message,
    },
    Complete,
}

impl<C> Dispatch<C> {
    pub fn invoke(self, target: &mut C) {
        match self {
            Dispatch::Correlated {
                handler,
                context,
                message,
            } => handler(target, context, message),
            Dispatch::Uncorrelated {
                handler,
                context,
                message,
            } => handler(target, context, message),
            Dispatch::Complete => {}
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Dispatch::Complete)
    }
}

///
/// One peer of a node: its session, its player name once bound, and the handlers its
/// messages dispatch to.
///
/// Lives inside the node on the node layer; `C` is the type handlers get mutable
/// access to when invoked.
///
pub struct RemoteNode<C> {
    session: SessionId,
    player_name: Option<String>,
    state: RemoteNodeState,
    close_reason: Option<CloseReason>,
    service_context: Option<Box<dyn ServiceContext>>,
    next_id: u16,
    uncorrelated_handlers: HashMap<MessageType, UncorrelatedHandler<C>>,
    correlated_handlers: HashMap<u16, CorrelatedHandler<C>>,
}

impl<C> RemoteNode<C> {
    pub fn new(session: SessionId) -> Self {
        RemoteNode {
            session,
            player_name: None,
            state: RemoteNodeState::New,
            close_reason: None,
            service_context: None,
            next_id: MINIMUM_ID,
            uncorrelated_handlers: HashMap::new(),
            correlated_handlers: HashMap::new(),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn player_name(&self) -> Option<&str> {
        self.player_name.as_deref()
    }

    pub fn is_bound(&self) -> bool {
        self.player_name.is_some()
    }

    pub fn state(&self) -> RemoteNodeState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == RemoteNodeState::Closed
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn pending_request_count(&self) -> usize {
        self.correlated_handlers.len()
    }

    /// Attaches the session context envelopes are sent through.
    pub fn start(&mut self, service_context: Box<dyn ServiceContext>) -> Result<()> {
        if self.state != RemoteNodeState::New {
            return Err(TableNetworkError::illegal_state(format!(
                "remote node {} was already started",
                self.session
            )));
        }
        self.service_context = Some(service_context);
        self.state = RemoteNodeState::Started;
        debug!("remote node {} started", self.session);
        Ok(())
    }

    pub fn register_uncorrelated_message_handler<F>(
        &mut self,
        message_type: MessageType,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(&mut C, MessageContext, Message) + Send + Sync + 'static,
    {
        if self.uncorrelated_handlers.contains_key(&message_type) {
            return Err(TableNetworkError::invalid_argument(format!(
                "a handler for {} is already registered",
                message_type
            )));
        }
        self.uncorrelated_handlers
            .insert(message_type, Arc::new(handler));
        Ok(())
    }

    pub fn unregister_uncorrelated_message_handler(&mut self, message_type: MessageType) -> bool {
        self.uncorrelated_handlers.remove(&message_type).is_some()
    }

    ///
    /// Sends an unsolicited message. When `handler` is given it receives the reply that
    /// correlates to the returned id, at most once.
    ///
    pub fn send_message(
        &mut self,
        message: Message,
        handler: Option<CorrelatedHandler<C>>,
    ) -> Result<u16> {
        self.send(message, NULL_CORRELATION_ID, handler)
    }

    /// Sends `message` as the reply to the inbound envelope with id `correlation_id`.
    pub fn send_reply(&mut self, message: Message, correlation_id: u16) -> Result<u16> {
        self.send(message, correlation_id, None)
    }

    /// Like `send_message` with a handler, for closures that have not been boxed yet.
    pub fn send_request<F>(&mut self, message: Message, handler: F) -> Result<u16>
    where
        F: FnOnce(&mut C, MessageContext, Message) + Send + 'static,
    {
        self.send_message(message, Some(Box::new(handler)))
    }

    fn send(
        &mut self,
        message: Message,
        correlation_id: u16,
        handler: Option<CorrelatedHandler<C>>,
    ) -> Result<u16> {
        match self.state {
            RemoteNodeState::New => {
                return Err(TableNetworkError::illegal_state(format!(
                    "remote node {} has not been started",
                    self.session
                )))
            }
            RemoteNodeState::Closed => {
                return Err(TableNetworkError::illegal_state(format!(
                    "remote node {} is closed",
                    self.session
                )))
            }
            RemoteNodeState::Started => {}
        }
        let id = self.allocate_id()?;
        let envelope = MessageEnvelope::from_message(&message, id, correlation_id)?;
        let context = self.service_context.as_ref().ok_or_else(|| {
            TableNetworkError::illegal_state(format!(
                "remote node {} has no session context",
                self.session
            ))
        })?;
        context.send(envelope)?;
        if let Some(handler) = handler {
            self.correlated_handlers.insert(id, handler);
        }
        event!(
            Level::TRACE,
            "sent {} to {} (id {}, correlation id {})",
            message.message_type(),
            self.session,
            id,
            correlation_id
        );
        Ok(id)
    }

    // ids wrap around within [MINIMUM_ID, MAXIMUM_ID], skipping ids still awaiting a reply
    fn allocate_id(&mut self) -> Result<u16> {
        for _ in MINIMUM_ID..=MAXIMUM_ID {
            let id = self.next_id;
            self.next_id = if id == MAXIMUM_ID { MINIMUM_ID } else { id + 1 };
            if !self.correlated_handlers.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(TableNetworkError::illegal_state(format!(
            "remote node {} has no free message ids",
            self.session
        )))
    }

    ///
    /// Resolves an inbound envelope to its handler.
    ///
    /// Replies to correlated requests are routed to the handler registered when the
    /// request was sent and that registration is then dropped. Everything else goes to
    /// the handler registered for its message type. Messages that do not decode are
    /// answered with `UnknownMessage`, messages nobody handles with `UnhandledMessage`,
    /// both correlated to the inbound id. Error messages are never answered.
    ///
    pub fn message_received(&mut self, envelope: MessageEnvelope) -> Dispatch<C> {
        if self.state != RemoteNodeState::Started {
            debug!(
                "dropping envelope {} for remote node {} in state {:?}",
                envelope.id(),
                self.session,
                self.state
            );
            return Dispatch::Complete;
        }
        let context = MessageContext {
            session: self.session,
            id: envelope.id(),
            correlation_id: envelope.correlation_id(),
        };
        let message = match envelope.decode_message() {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    "undecodable envelope {} from {}: {}",
                    context.id, self.session, err
                );
                self.reply_with_error(ErrorCode::UnknownMessage, context.id);
                return Dispatch::Complete;
            }
        };

        if context.correlation_id != NULL_CORRELATION_ID {
            if let Some(handler) = self.correlated_handlers.remove(&context.correlation_id) {
                return Dispatch::Correlated {
                    handler,
                    context,
                    message,
                };
            }
        }

        if let Some(handler) = self.uncorrelated_handlers.get(&message.message_type()) {
            return Dispatch::Uncorrelated {
                handler: Arc::clone(handler),
                context,
                message,
            };
        }

        if let Some(code) = message.error_code() {
            debug!(
                "unhandled error {:?} from {} (correlation id {})",
                code, self.session, context.correlation_id
            );
        } else {
            warn!(
                "no handler for {} from {} (correlation id {})",
                message.message_type(),
                self.session,
                context.correlation_id
            );
            self.reply_with_error(ErrorCode::UnhandledMessage, context.id);
        }
        Dispatch::Complete
    }

    fn reply_with_error(&mut self, code: ErrorCode, correlation_id: u16) {
        if let Err(err) = self.send_reply(Message::error(code), correlation_id) {
            warn!(
                "failed to send {:?} to {}: {}",
                code, self.session, err
            );
        }
    }

    /// Associates this remote node with the player on the other end.
    pub fn bind(&mut self, player_name: &str) -> Result<()> {
        if player_name.is_empty() {
            return Err(TableNetworkError::invalid_argument(
                "player name must not be empty",
            ));
        }
        if self.is_closed() {
            return Err(TableNetworkError::illegal_state(format!(
                "remote node {} is closed",
                self.session
            )));
        }
        if let Some(bound) = &self.player_name {
            return Err(TableNetworkError::illegal_state(format!(
                "remote node {} is already bound to '{}'",
                self.session, bound
            )));
        }
        self.player_name = Some(player_name.to_string());
        Ok(())
    }

    pub fn unbind(&mut self) -> Result<String> {
        self.player_name.take().ok_or_else(|| {
            TableNetworkError::illegal_state(format!(
                "remote node {} is not bound",
                self.session
            ))
        })
    }

    /// Stops the session and drops every handler, pending replies included.
    pub fn close(&mut self, reason: CloseReason) -> Result<()> {
        if self.is_closed() {
            return Err(TableNetworkError::illegal_state(format!(
                "remote node {} is already closed",
                self.session
            )));
        }
        self.state = RemoteNodeState::Closed;
        self.close_reason = Some(reason);
        if !self.correlated_handlers.is_empty() {
            debug!(
                "abandoning {} pending requests to {}",
                self.correlated_handlers.len(),
                self.session
            );
        }
        self.correlated_handlers.clear();
        self.uncorrelated_handlers.clear();
        if let Some(context) = self.service_context.take() {
            context.stop();
        }
        event!(
            Level::INFO,
            "remote node {} closed: {:?}",
            self.session,
            reason
        );
        Ok(())
    }
}

impl<C> fmt::Debug for RemoteNode<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteNode")
            .field("session", &self.session)
            .field("player_name", &self.player_name)
            .field("state", &self.state)
            .field("pending_requests", &self.correlated_handlers.len())
            .finish()
    }
}
