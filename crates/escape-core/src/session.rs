//! Session aggregate: the single owner of mutable game state.

use std::collections::{BTreeSet, VecDeque};

use contracts::{
    ActiveChallenge, EngineState, GameEvent, GameEventKind, PlayerState, SessionConfig,
    FINISH_CELL, SCHEMA_VERSION_V1, START_CELL,
};
use serde_json::Value;
use thiserror::Error;

use crate::integrity::ShipIntegrity;
use crate::roster::Roster;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("a session needs at least one player")]
    EmptyRoster,
    #[error("player id {0} appears more than once")]
    DuplicatePlayer(String),
    #[error("player {player_id} is at cell {position}, outside 1..=60")]
    PositionOutOfRange { player_id: String, position: u8 },
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
}

/// What changed since the last `take_changes`; the sync adapter mirrors exactly this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub players: BTreeSet<String>,
    pub session: bool,
    pub ship: bool,
    pub events: Vec<GameEvent>,
    /// The session was reset; every row is written in full, countdown included.
    pub restarted: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
            && !self.session
            && !self.ship
            && !self.restarted
            && self.events.is_empty()
    }

    /// Fold `later` into `self`, keeping event order.
    pub fn merge(&mut self, later: ChangeSet) {
        self.players.extend(later.players);
        self.session |= later.session;
        self.ship |= later.ship;
        self.restarted |= later.restarted;
        self.events.extend(later.events);
    }
}

#[derive(Debug, Clone)]
pub struct GameSession {
    pub(crate) config: SessionConfig,
    pub(crate) players: Vec<PlayerState>,
    pub(crate) turn_index: usize,
    pub(crate) integrity: ShipIntegrity,
    pub(crate) countdown_seconds: u32,
    /// Newest first, at most `config.event_log_capacity` entries.
    pub(crate) events: VecDeque<GameEvent>,
    pub(crate) active_challenge: Option<ActiveChallenge>,
    pub(crate) state: EngineState,
    next_event_sequence: u64,
    changes: ChangeSet,
}

impl GameSession {
    pub fn new(config: SessionConfig, roster: Roster) -> Result<Self, SessionError> {
        Self::from_players(config, roster.into_players())
    }

    pub fn from_players(
        config: SessionConfig,
        players: Vec<PlayerState>,
    ) -> Result<Self, SessionError> {
        validate_config(&config)?;
        if players.is_empty() {
            return Err(SessionError::EmptyRoster);
        }

        let mut seen = BTreeSet::new();
        for player in &players {
            if !seen.insert(player.player_id.as_str()) {
                return Err(SessionError::DuplicatePlayer(player.player_id.clone()));
            }
            if !(START_CELL..=FINISH_CELL).contains(&player.position) {
                return Err(SessionError::PositionOutOfRange {
                    player_id: player.player_id.clone(),
                    position: player.position,
                });
            }
        }

        let countdown_seconds = config.countdown_seconds;
        Ok(Self {
            config,
            players,
            turn_index: 0,
            integrity: ShipIntegrity::default(),
            countdown_seconds,
            events: VecDeque::new(),
            active_challenge: None,
            state: EngineState::Idle,
            next_event_sequence: 0,
            changes: ChangeSet::default(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn players(&self) -> &[PlayerState] {
        &self.players
    }

    pub fn player(&self, player_id: &str) -> Option<&PlayerState> {
        self.players
            .iter()
            .find(|player| player.player_id == player_id)
    }

    pub fn player_index(&self, player_id: &str) -> Option<usize> {
        self.players
            .iter()
            .position(|player| player.player_id == player_id)
    }

    pub fn current_player(&self) -> Option<&PlayerState> {
        self.players.get(self.turn_index)
    }

    pub fn turn_index(&self) -> usize {
        self.turn_index
    }

    pub fn integrity(&self) -> &ShipIntegrity {
        &self.integrity
    }

    pub fn countdown_seconds(&self) -> u32 {
        self.countdown_seconds
    }

    pub fn events(&self) -> impl Iterator<Item = &GameEvent> {
        self.events.iter()
    }

    pub fn active_challenge(&self) -> Option<&ActiveChallenge> {
        self.active_challenge.as_ref()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    pub(crate) fn log(
        &mut self,
        at_ms: u64,
        kind: GameEventKind,
        player_id: Option<&str>,
        message: String,
        details: Option<Value>,
    ) {
        let event = GameEvent {
            sequence: self.next_event_sequence,
            at_ms,
            kind,
            player_id: player_id.map(str::to_string),
            message,
            details,
        };
        self.next_event_sequence += 1;
        self.changes.events.push(event.clone());
        self.events.push_front(event);
        self.events.truncate(self.config.event_log_capacity.max(1));
    }

    /// Append an event written by another client without marking it as a local change.
    pub(crate) fn record_remote_event(&mut self, event: GameEvent) {
        if self.events.iter().any(|known| known == &event) {
            return;
        }
        self.next_event_sequence = self.next_event_sequence.max(event.sequence + 1);
        self.events.push_front(event);
        self.events.truncate(self.config.event_log_capacity.max(1));
    }

    /// Mutable access to a roster entry, recorded as a player change.
    pub(crate) fn player_at_mut(&mut self, index: usize) -> Option<&mut PlayerState> {
        let player = self.players.get_mut(index)?;
        self.changes.players.insert(player.player_id.clone());
        Some(player)
    }

    pub(crate) fn touch_session(&mut self) {
        self.changes.session = true;
    }

    pub(crate) fn touch_ship(&mut self) {
        self.changes.ship = true;
    }

    pub(crate) fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            self.state = state;
            self.changes.session = true;
        }
    }

    /// Back to the opening position: everyone on cell 1, full integrity, empty log.
    pub(crate) fn reset(&mut self) {
        for player in &mut self.players {
            player.position = START_CELL;
            player.pending_position = None;
            self.changes.players.insert(player.player_id.clone());
        }
        self.turn_index = 0;
        self.integrity.reset();
        self.countdown_seconds = self.config.countdown_seconds;
        self.events.clear();
        self.active_challenge = None;
        self.state = EngineState::Idle;
        self.changes.session = true;
        self.changes.ship = true;
        self.changes.restarted = true;
    }
}

pub fn validate_config(config: &SessionConfig) -> Result<(), SessionError> {
    let invalid = |message: &str| Err(SessionError::InvalidConfig(message.to_string()));

    if config.schema_version != SCHEMA_VERSION_V1 {
        return Err(SessionError::InvalidConfig(format!(
            "schema_version={} expected={}",
            config.schema_version, SCHEMA_VERSION_V1
        )));
    }
    if config.session_id.trim().is_empty() {
        return invalid("session_id must not be empty");
    }
    if config.decay_tick_ms == 0 || config.repair_tick_ms == 0 {
        return invalid("decay_tick_ms and repair_tick_ms must be positive");
    }
    if !config.repair_per_tick.is_finite() || config.repair_per_tick <= 0.0 {
        return invalid("repair_per_tick must be a positive number");
    }
    if !config.decay_per_tick.is_finite() || config.decay_per_tick < 0.0 {
        return invalid("decay_per_tick must be a non-negative number");
    }
    if !(0.0..=1.0).contains(&config.autonomous_answer_probability) {
        return invalid("autonomous_answer_probability must be within [0, 1]");
    }
    if config.event_log_capacity == 0 {
        return invalid("event_log_capacity must be positive");
    }
    for range in [
        config.autonomous_roll_delay_ms,
        config.autonomous_answer_delay_ms,
    ] {
        if range.min_ms > range.max_ms {
            return invalid("delay ranges need min_ms <= max_ms");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::Role;

    fn session() -> GameSession {
        let roster = Roster::local("Ana", Role::Pilot).expect("roster");
        GameSession::new(SessionConfig::default(), roster).expect("session")
    }

    #[test]
    fn empty_roster_cannot_start() {
        assert_eq!(
            GameSession::new(SessionConfig::default(), Roster::new()).map(|_| ()),
            Err(SessionError::EmptyRoster)
        );
    }

    #[test]
    fn log_is_newest_first_and_bounded() {
        let mut config = SessionConfig::default();
        config.event_log_capacity = 3;
        let roster = Roster::local("Ana", Role::Pilot).expect("roster");
        let mut session = GameSession::new(config, roster).expect("session");

        for index in 0..5 {
            session.log(
                index,
                GameEventKind::DiceRolled,
                Some("human"),
                format!("roll {index}"),
                None,
            );
        }

        let sequences: Vec<u64> = session.events().map(|event| event.sequence).collect();
        assert_eq!(sequences, vec![4, 3, 2]);
        assert_eq!(session.take_changes().events.len(), 5);
        assert!(session.take_changes().is_empty());
    }

    #[test]
    fn reset_restores_opening_state() {
        let mut session = session();
        if let Some(player) = session.player_at_mut(0) {
            player.position = 40;
            player.pending_position = Some(42);
        }
        session.turn_index = 1;
        session.integrity.set_level(12.0);
        session.countdown_seconds = 5;
        session.set_state(EngineState::Complete);
        session.log(0, GameEventKind::DiceRolled, None, "x".to_string(), None);

        session.reset();

        assert!(session
            .players()
            .iter()
            .all(|player| player.position == START_CELL && player.pending_position.is_none()));
        assert_eq!(session.turn_index(), 0);
        assert_eq!(session.integrity().level(), 100.0);
        assert_eq!(session.countdown_seconds(), 300);
        assert_eq!(session.events().count(), 0);
        assert_eq!(session.state(), EngineState::Idle);
    }

    #[test]
    fn config_validation_rejects_zero_repair_tick() {
        let mut config = SessionConfig::default();
        config.repair_tick_ms = 0;
        assert!(matches!(
            validate_config(&config),
            Err(SessionError::InvalidConfig(_))
        ));
        assert!(validate_config(&SessionConfig::default()).is_ok());
    }
}
