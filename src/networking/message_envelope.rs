use std::convert::TryInto;

use crate::networking::message::Message;

pub const MINIMUM_ID: u16 = 1;
pub const MAXIMUM_ID: u16 = u16::MAX;
pub const NULL_CORRELATION_ID: u16 = 0;
pub const HEADER_SIZE: usize = 8;
pub const MAXIMUM_BODY_LENGTH: u32 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageEnvelopeError {
    #[error("message id must be in [{}, {}], got {0}", MINIMUM_ID, MAXIMUM_ID)]
    IdOutOfRange(u16),
    #[error("message id was not set")]
    MissingId,
    #[error("envelope of {0} bytes is shorter than its header")]
    Truncated(usize),
    #[error("header declares a {declared} byte body but {actual} bytes follow it")]
    BodyLengthMismatch { declared: u32, actual: usize },
    #[error("body length {length} exceeds the maximum of {maximum}")]
    BodyTooLarge { length: u32, maximum: u32 },
    #[error("failed to encode message body: {0}")]
    Encode(String),
    #[error("failed to decode message body: {0}")]
    Decode(String),
}

/// The fixed-size header in front of every envelope body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageEnvelopeHeader {
    id: u16,
    correlation_id: u16,
    body_length: u32,
}

impl MessageEnvelopeHeader {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn correlation_id(&self) -> u16 {
        self.correlation_id
    }

    pub fn body_length(&self) -> u32 {
        self.body_length
    }

    pub fn is_correlated(&self) -> bool {
        self.correlation_id != NULL_CORRELATION_ID
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<MessageEnvelopeHeader, MessageEnvelopeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(MessageEnvelopeError::Truncated(bytes.len()));
        }
        let id = u16::from_be_bytes([bytes[0], bytes[1]]);
        let correlation_id = u16::from_be_bytes([bytes[2], bytes[3]]);
        let body_length = u32::from_be_bytes(
            bytes[4..HEADER_SIZE]
                .try_into()
                .map_err(|_| MessageEnvelopeError::Truncated(bytes.len()))?,
        );
        HeaderBuilder::new()
            .id(id)
            .correlation_id(correlation_id)
            .body_length(body_length)
            .build()
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..2].copy_from_slice(&self.id.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.correlation_id.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.body_length.to_be_bytes());
        bytes
    }
}

/// Builds and validates a header. The correlation id defaults to
/// `NULL_CORRELATION_ID` and the body length to zero; the id is required.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeaderBuilder {
    id: Option<u16>,
    correlation_id: u16,
    body_length: u32,
}

impl HeaderBuilder {
    pub fn new() -> Self {
        HeaderBuilder::default()
    }

    pub fn id(mut self, id: u16) -> Self {
        self.id = Some(id);
        self
    }

    pub fn correlation_id(mut self, correlation_id: u16) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn body_length(mut self, body_length: u32) -> Self {
        self.body_length = body_length;
        self
    }

    pub fn build(self) -> Result<MessageEnvelopeHeader, MessageEnvelopeError> {
        let id = self.id.ok_or(MessageEnvelopeError::MissingId)?;
        if id < MINIMUM_ID {
            return Err(MessageEnvelopeError::IdOutOfRange(id));
        }
        if self.body_length > MAXIMUM_BODY_LENGTH {
            return Err(MessageEnvelopeError::BodyTooLarge {
                length: self.body_length,
                maximum: MAXIMUM_BODY_LENGTH,
            });
        }
        Ok(MessageEnvelopeHeader {
            id,
            correlation_id: self.correlation_id,
            body_length: self.body_length,
        })
    }

    pub fn to_byte_array(self) -> Result<[u8; HEADER_SIZE], MessageEnvelopeError> {
        Ok(self.build()?.to_bytes())
    }
}

///
/// The unit of exchange between two nodes.
///
/// ```bytes
/// 0-1     id               (big-endian u16)
/// 2-3     correlation id   (big-endian u16, 0 when unsolicited)
/// 4-7     body length      (big-endian u32)
/// 8..     body             (bincode-encoded Message)
/// ```
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEnvelope {
    header: MessageEnvelopeHeader,
    body: Vec<u8>,
}

impl MessageEnvelope {
    /// Pairs an already validated header with its body.
    pub fn new(header: MessageEnvelopeHeader, body: Vec<u8>) -> Result<Self, MessageEnvelopeError> {
        if header.body_length() as usize != body.len() {
            return Err(MessageEnvelopeError::BodyLengthMismatch {
                declared: header.body_length(),
                actual: body.len(),
            });
        }
        Ok(MessageEnvelope { header, body })
    }

    pub fn from_byte_array(bytes: &[u8]) -> Result<Self, MessageEnvelopeError> {
        let header = MessageEnvelopeHeader::from_bytes(bytes)?;
        MessageEnvelope::new(header, bytes[HEADER_SIZE..].to_vec())
    }

    pub fn from_message(
        message: &Message,
        id: u16,
        correlation_id: u16,
    ) -> Result<Self, MessageEnvelopeError> {
        let body = bincode::serialize(message)
            .map_err(|err| MessageEnvelopeError::Encode(err.to_string()))?;
        let body_length: u32 = body.len().try_into().map_err(|_| {
            MessageEnvelopeError::BodyTooLarge {
                length: u32::MAX,
                maximum: MAXIMUM_BODY_LENGTH,
            }
        })?;
        let header = HeaderBuilder::new()
            .id(id)
            .correlation_id(correlation_id)
            .body_length(body_length)
            .build()?;
        Ok(MessageEnvelope { header, body })
    }

    pub fn header(&self) -> &MessageEnvelopeHeader {
        &self.header
    }

    pub fn id(&self) -> u16 {
        self.header.id()
    }

    pub fn correlation_id(&self) -> u16 {
        self.header.correlation_id()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Decodes the body. Failure means the body is not any message type this node
    /// knows about.
    pub fn decode_message(&self) -> Result<Message, MessageEnvelopeError> {
        bincode::deserialize(&self.body).map_err(|err| MessageEnvelopeError::Decode(err.to_string()))
    }

    pub fn to_byte_array(&self) -> Vec<u8> {
        let mut vbytes: Vec<u8> = Vec::with_capacity(HEADER_SIZE + self.body.len());
        vbytes.extend(&self.header.to_bytes());
        vbytes.extend(&self.body);
        vbytes
    }
}
