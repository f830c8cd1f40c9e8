use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Result, TableNetworkError};

/// Roles a player can hold in a table-network session.
///
/// `Local` is never sent over the wire: each node marks its own entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlayerRole {
    /// the player hosting the session
    Host,
    /// the player on this node
    Local,
    /// the player currently in control of the table
    Editor,
    /// a player asking for control
    EditorRequester,
}

/// A player in a table-network session, identified by name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    name: String,
    roles: BTreeSet<PlayerRole>,
}

impl Player {
    pub fn new(name: &str) -> Self {
        Player {
            name: name.to_string(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_roles(name: &str, roles: &[PlayerRole]) -> Self {
        Player {
            name: name.to_string(),
            roles: roles.iter().copied().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &BTreeSet<PlayerRole> {
        &self.roles
    }

    pub fn has_role(&self, role: PlayerRole) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_editor(&self) -> bool {
        self.has_role(PlayerRole::Editor)
    }

    pub fn add_role(&mut self, role: PlayerRole) {
        self.roles.insert(role);
    }

    pub fn remove_role(&mut self, role: PlayerRole) {
        self.roles.remove(&role);
    }

    /// The copy of this player that is sent to peers.
    pub(crate) fn without_local_role(&self) -> Player {
        let mut player = self.clone();
        player.remove_role(PlayerRole::Local);
        player
    }
}

//
// Control (the editor role) is passed around by mutating the authoritative player
// list kept by the host. Exactly one player holds `Editor` while anyone is connected.
//

pub(crate) fn find_player_mut<'a>(players: &'a mut [Player], name: &str) -> Option<&'a mut Player> {
    players.iter_mut().find(|player| player.name() == name)
}

/// Moves the editor role from `from` to `to`. Only the current editor may give control.
pub(crate) fn give_control(players: &mut [Player], from: &str, to: &str) -> Result<()> {
    let is_editor = players
        .iter()
        .any(|player| player.name() == from && player.is_editor());
    if !is_editor {
        return Err(TableNetworkError::illegal_state(format!(
            "player '{}' does not have control",
            from
        )));
    }
    if !players.iter().any(|player| player.name() == to) {
        return Err(TableNetworkError::invalid_argument(format!(
            "unknown player '{}'",
            to
        )));
    }
    for player in players.iter_mut() {
        if player.name() == to {
            player.add_role(PlayerRole::Editor);
            player.remove_role(PlayerRole::EditorRequester);
        } else {
            player.remove_role(PlayerRole::Editor);
        }
    }
    Ok(())
}

/// Marks `name` as requesting control, or clears the request. Requests from the
/// current editor are ignored. Returns whether anything changed.
pub(crate) fn set_control_request(players: &mut [Player], name: &str, requesting: bool) -> Result<bool> {
    let player = find_player_mut(players, name)
        .ok_or_else(|| TableNetworkError::invalid_argument(format!("unknown player '{}'", name)))?;
    if requesting {
        if player.is_editor() || player.has_role(PlayerRole::EditorRequester) {
            return Ok(false);
        }
        player.add_role(PlayerRole::EditorRequester);
    } else {
        if !player.has_role(PlayerRole::EditorRequester) {
            return Ok(false);
        }
        player.remove_role(PlayerRole::EditorRequester);
    }
    Ok(true)
}

/// Removes a departed player. If they held control it falls back to the host.
/// Returns whether the player was present.
pub(crate) fn remove_player(players: &mut Vec<Player>, name: &str) -> bool {
    let position = match players.iter().position(|player| player.name() == name) {
        Some(position) => position,
        None => return false,
    };
    let departed = players.remove(position);
    if departed.is_editor() {
        if let Some(host) = players
            .iter_mut()
            .find(|player| player.has_role(PlayerRole::Host))
        {
            host.add_role(PlayerRole::Editor);
            host.remove_role(PlayerRole::EditorRequester);
        }
    }
    true
}
