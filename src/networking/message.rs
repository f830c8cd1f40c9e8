use macros::MessageKind;
use serde::{Deserialize, Serialize};

use crate::networking::message_types::authentication::{
    AuthenticationChallenge, AuthenticationResponse,
};
use crate::player::Player;
use crate::table::{TableIncrement, TableMemento};

/// Codes carried by `Message::Error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    UnspecifiedError,
    /// recognized message that is not valid in the current protocol phase
    UnexpectedMessage,
    /// recognized message nobody registered a handler for
    UnhandledMessage,
    /// body that does not decode to any known message
    UnknownMessage,
    IncompatibleVersion,
    AuthenticationFailed,
    DuplicatePlayerName,
    NotAuthorized,
}

///
/// Every message two nodes exchange. `MessageType` is the payload-free tag used to key
/// uncorrelated handlers.
///
/// Requests and their replies are matched by envelope correlation id, not by anything in
/// the message itself.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, MessageKind)]
pub enum Message {
    Error { code: ErrorCode },
    Hello { supported_version: u32 },
    HelloResponse { chosen_version: u32 },
    BeginAuthenticationRequest,
    BeginAuthenticationResponse(AuthenticationChallenge),
    EndAuthenticationRequest(AuthenticationResponse),
    EndAuthenticationResponse { host_player_name: String },
    Players { players: Vec<Player> },
    GiveControl { player_name: String },
    RequestControl,
    CancelControlRequest,
    SetTableMemento { memento: TableMemento },
    TableIncrement { increment: TableIncrement },
    Goodbye,
}

impl Message {
    pub fn error(code: ErrorCode) -> Message {
        Message::Error { code }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Message::Error { .. })
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Message::Error { code } => Some(*code),
            _ => None,
        }
    }
}
