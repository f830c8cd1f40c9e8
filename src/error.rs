use crate::networking::message_envelope::MessageEnvelopeError;
use crate::networking::transport::TransportError;
use crate::node_layer::NodeLayerError;

/// Errors surfaced to callers of the node and its controller.
///
/// `IllegalState`, `InvalidArgument` and `AlreadyConnected` are local misuse and are
/// reported synchronously at the call site. `Transport` is what a failed connect
/// attempt turns into once the node has disposed of its resources.
#[derive(Debug, thiserror::Error)]
pub enum TableNetworkError {
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("the node is already connected")]
    AlreadyConnected,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("envelope error: {0}")]
    Envelope(#[from] MessageEnvelopeError),
    #[error("node layer error: {0}")]
    NodeLayer(#[from] NodeLayerError),
}

impl TableNetworkError {
    pub(crate) fn illegal_state(message: impl Into<String>) -> Self {
        TableNetworkError::IllegalState(message.into())
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        TableNetworkError::InvalidArgument(message.into())
    }
}

pub type Result<T> = std::result::Result<T, TableNetworkError>;
