//! Lobby hand-off: the ordered list of players a session starts with.

use contracts::{ControlKind, PlayerColor, PlayerState, Role, START_CELL};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    #[error("a player name is required")]
    NameRequired,
    #[error("role {0} is already taken")]
    RoleTaken(Role),
    #[error("player id {0} is already on the roster")]
    DuplicatePlayer(String),
}

/// Ordered roster; order is turn order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    players: Vec<PlayerState>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// The single-client layout: one human followed by `BOT-01`.
    pub fn local(name: &str, role: Role) -> Result<Self, RosterError> {
        let mut roster = Self::new();
        roster.join_as("human", name, role)?;
        roster.add_autonomous_as("bot", "BOT-01")?;
        Ok(roster)
    }

    /// Join with an id derived from the seat number.
    pub fn join(&mut self, name: &str, role: Role) -> Result<&PlayerState, RosterError> {
        let player_id = format!("player_{:02}", self.players.len() + 1);
        self.join_as(&player_id, name, role)
    }

    pub fn join_as(
        &mut self,
        player_id: &str,
        name: &str,
        role: Role,
    ) -> Result<&PlayerState, RosterError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RosterError::NameRequired);
        }
        if role != Role::Bot && self.players.iter().any(|player| player.role == role) {
            return Err(RosterError::RoleTaken(role));
        }
        self.push(player_id, name, role, ControlKind::Human)
    }

    pub fn add_autonomous(&mut self, name: &str) -> Result<&PlayerState, RosterError> {
        let player_id = format!("bot_{:02}", self.players.len() + 1);
        self.add_autonomous_as(&player_id, name)
    }

    pub fn add_autonomous_as(
        &mut self,
        player_id: &str,
        name: &str,
    ) -> Result<&PlayerState, RosterError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RosterError::NameRequired);
        }
        self.push(player_id, name, Role::Bot, ControlKind::Autonomous)
    }

    pub fn players(&self) -> &[PlayerState] {
        &self.players
    }

    pub fn into_players(self) -> Vec<PlayerState> {
        self.players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    fn push(
        &mut self,
        player_id: &str,
        name: &str,
        role: Role,
        control: ControlKind,
    ) -> Result<&PlayerState, RosterError> {
        if self.players.iter().any(|player| player.player_id == player_id) {
            return Err(RosterError::DuplicatePlayer(player_id.to_string()));
        }
        let color = PlayerColor::from_seed(name)
            .unwrap_or_else(|| PlayerColor::from_index(self.players.len()));
        self.players.push(PlayerState {
            player_id: player_id.to_string(),
            name: name.to_string(),
            role,
            color,
            position: START_CELL,
            pending_position: None,
            control,
        });
        Ok(&self.players[self.players.len() - 1])
    }
}
