use std::fmt;
use std::io;
use std::sync::Arc;

use uuid::Uuid;

use crate::networking::message_envelope::MessageEnvelope;

/// Identifies one transport session (one connected peer) for the lifetime of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        SessionId::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open transport on {host}:{port}: {source}")]
    Open {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("timed out opening transport on {host}:{port}")]
    Timeout { host: String, port: u16 },
    #[error("transport is already open")]
    AlreadyOpen,
    #[error("session {0} is closed")]
    SessionClosed(SessionId),
    #[error("failed to start the transport runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("{0}")]
    Other(String),
}

/// The sending half of one session, handed to the node when the session starts.
pub trait ServiceContext: Send {
    /// Queues an envelope for the peer.
    fn send(&self, envelope: MessageEnvelope) -> Result<(), TransportError>;
    /// Ends the session. Envelopes already queued are still flushed.
    fn stop(&self);
}

/// What a transport reports about its sessions. Delivered from transport threads.
pub enum TransportEvent {
    SessionStarted {
        session: SessionId,
        context: Box<dyn ServiceContext>,
    },
    MessageReceived {
        session: SessionId,
        envelope: MessageEnvelope,
    },
    SessionStopped {
        session: SessionId,
    },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::SessionStarted { session, .. } => {
                f.debug_struct("SessionStarted").field("session", session).finish()
            }
            TransportEvent::MessageReceived { session, envelope } => f
                .debug_struct("MessageReceived")
                .field("session", session)
                .field("id", &envelope.id())
                .field("correlation_id", &envelope.correlation_id())
                .finish(),
            TransportEvent::SessionStopped { session } => {
                f.debug_struct("SessionStopped").field("session", session).finish()
            }
        }
    }
}

pub type TransportEventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

///
/// The byte transport a node runs on.
///
/// A server transport listens on `host_name:port` and reports a session per accepted
/// peer; a client transport connects to `host_name:port` and reports exactly one
/// session. `open` may block for as long as the transport needs; `close` must be
/// idempotent.
///
pub trait TransportLayer: Send {
    fn open(
        &mut self,
        host_name: &str,
        port: u16,
        events: TransportEventSink,
    ) -> Result<(), TransportError>;

    fn close(&mut self);
}
