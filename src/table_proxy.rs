use std::fmt;
use std::sync::Arc;

use crate::networking::transport::SessionId;
use crate::table::Table;

/// A player's access to the shared table, as seen from this node.
///
/// The local player's proxy is the local table itself. Every other bound player is
/// reached through the remote node for their session.
#[derive(Clone)]
pub enum TableProxy {
    Local(Arc<dyn Table>),
    Remote(SessionId),
}

impl TableProxy {
    pub fn is_local(&self) -> bool {
        matches!(self, TableProxy::Local(_))
    }

    pub fn session(&self) -> Option<SessionId> {
        match self {
            TableProxy::Local(_) => None,
            TableProxy::Remote(session) => Some(*session),
        }
    }
}

impl fmt::Debug for TableProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableProxy::Local(_) => f.write_str("Local"),
            TableProxy::Remote(session) => write!(f, "Remote({})", session),
        }
    }
}

impl PartialEq for TableProxy {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TableProxy::Local(left), TableProxy::Local(right)) => Arc::ptr_eq(left, right),
            (TableProxy::Remote(left), TableProxy::Remote(right)) => left == right,
            _ => false,
        }
    }
}
