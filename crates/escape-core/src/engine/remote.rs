//! Merging state written by other clients. Nothing here is recorded as a local
//! change, so a merged value is never echoed back to the store.

use contracts::{
    ActiveChallenge, EngineState, GameEvent, GameEventKind, PlayerState, FINISH_CELL, START_CELL,
};
use tracing::{debug, info};

use super::TurnEngine;
use crate::integrity::ShipIntegrity;

/// Canonical session row as another client last wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSession {
    pub turn_index: usize,
    pub engine_state: EngineState,
    pub countdown_seconds: u32,
    pub active_challenge: Option<ActiveChallenge>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteUpdate {
    Players(Vec<PlayerState>),
    Ship { level: f64, repairing: bool },
    Session(RemoteSession),
    Events(Vec<GameEvent>),
}

impl TurnEngine {
    pub fn apply_remote(&mut self, update: RemoteUpdate) {
        match update {
            RemoteUpdate::Players(players) => self.merge_remote_players(players),
            RemoteUpdate::Ship { level, repairing } => {
                self.session.integrity = ShipIntegrity::new(level, repairing);
                if !repairing {
                    self.timers.cancel_slot(&mut self.slots.repair);
                }
            }
            RemoteUpdate::Session(remote) => self.merge_remote_session(remote),
            RemoteUpdate::Events(events) => self.merge_remote_events(events),
        }
        self.run_due();
    }

    /// Overwrite integrity directly, e.g. to resume a damaged ship.
    pub fn set_integrity(&mut self, level: f64) {
        self.session.integrity.set_level(level);
        self.session.touch_ship();
    }

    fn merge_remote_players(&mut self, players: Vec<PlayerState>) {
        let rolling = self.in_flight.as_ref().map(|roll| roll.player_id.clone());
        for remote in players {
            if rolling.as_deref() == Some(remote.player_id.as_str()) {
                continue;
            }
            let Some(index) = self.session.player_index(&remote.player_id) else {
                debug!(player_id = %remote.player_id, "remote player not in local roster");
                continue;
            };
            let local = &mut self.session.players[index];
            local.position = remote.position.clamp(START_CELL, FINISH_CELL);
            local.pending_position = remote.pending_position;
        }
    }

    /// A restart written by another client clears the log from that point on and
    /// restarts the local clock; positions, integrity and countdown arrive with their rows.
    fn merge_remote_events(&mut self, events: Vec<GameEvent>) {
        let mut restarted = false;
        for event in events {
            if event.kind == GameEventKind::SessionRestarted
                && !self.session.events().any(|known| known == &event)
            {
                self.session.events.clear();
                restarted = true;
            }
            self.session.record_remote_event(event);
        }
        if !restarted {
            return;
        }
        self.timers.cancel_slot(&mut self.slots.movement);
        self.timers.cancel_slot(&mut self.slots.challenge_answer);
        self.timers.cancel_slot(&mut self.slots.challenge_timeout);
        self.timers.cancel_slot(&mut self.slots.repair);
        self.in_flight = None;
        self.arm_clock();
        self.schedule_autonomous_roll();
        info!(session_id = %self.session.session_id(), "remote restart adopted");
    }

    fn merge_remote_session(&mut self, remote: RemoteSession) {
        let roster_size = self.session.players().len();
        let turn_changed = remote.turn_index != self.session.turn_index;
        if remote.turn_index < roster_size {
            self.session.turn_index = remote.turn_index;
        }
        self.session.countdown_seconds = remote.countdown_seconds;

        let local_id = self
            .session
            .active_challenge()
            .map(|challenge| challenge.challenge_id);
        let remote_id = remote
            .active_challenge
            .as_ref()
            .map(|challenge| challenge.challenge_id);
        if local_id != remote_id {
            if let Some(challenge) = &remote.active_challenge {
                self.next_challenge_id = self.next_challenge_id.max(challenge.challenge_id + 1);
            }
            self.session.active_challenge = remote.active_challenge;
            self.arm_challenge_timers();
        }

        let state_changed = remote.engine_state != self.session.state;
        if self.in_flight.is_none() {
            self.session.state = remote.engine_state;
        }
        if remote.engine_state == EngineState::Complete {
            self.timers.cancel_slot(&mut self.slots.autonomous_roll);
        }
        if turn_changed || state_changed {
            debug!(
                session_id = %self.session.session_id(),
                turn_index = self.session.turn_index,
                state = %self.session.state,
                "remote session merged"
            );
            self.schedule_autonomous_roll();
        }
    }
}
