use contracts::{CellKind, EngineState, GameEventKind, FINISH_CELL, START_CELL};
use serde_json::json;
use tracing::debug;

use super::{EngineError, InFlightRoll, TurnEngine, TurnRejection};
use crate::timers::Timer;

/// An accepted roll. Movement and cell effects play out on the engine's timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollAccepted {
    pub player_id: String,
    pub die: u8,
    pub origin: u8,
    pub target: u8,
}

impl TurnEngine {
    /// Roll for a human player this engine controls.
    pub fn roll(&mut self, player_id: &str) -> Result<RollAccepted, EngineError> {
        let index = self.check_roll(player_id)?;
        let accepted = self.start_roll(index);
        self.run_due();
        Ok(accepted)
    }

    /// Whether `roll(player_id)` would be accepted right now; changes nothing.
    pub fn check_roll(&self, player_id: &str) -> Result<usize, EngineError> {
        match self.session.state() {
            EngineState::Idle => {}
            EngineState::AwaitingChallengeResponse => {
                return Err(TurnRejection::ChallengePending.into())
            }
            busy => return Err(TurnRejection::EngineBusy(busy).into()),
        }
        if self.session.active_challenge().is_some() {
            return Err(TurnRejection::ChallengePending.into());
        }

        let index = self.player_index(player_id)?;
        if index != self.session.turn_index() {
            let expected = self
                .session
                .current_player()
                .map(|player| player.player_id.clone())
                .unwrap_or_default();
            return Err(TurnRejection::NotPlayersTurn {
                expected,
                actual: player_id.to_string(),
            }
            .into());
        }
        if self.session.players()[index].is_autonomous() {
            return Err(TurnRejection::AutonomousPlayer(player_id.to_string()).into());
        }
        if !self.authority.drives_player(player_id) {
            return Err(TurnRejection::NotControlled(player_id.to_string()).into());
        }
        Ok(index)
    }

    /// Resume the turn order at `index` instead of the next seat. Only between turns.
    pub fn resume_turn(&mut self, index: usize) -> Result<(), EngineError> {
        let roster_size = self.session.players().len();
        if index >= roster_size {
            return Err(EngineError::TurnOutOfRange { index, roster_size });
        }
        let state = self.session.state();
        if state != EngineState::Idle {
            return Err(TurnRejection::EngineBusy(state).into());
        }
        if self.session.active_challenge().is_some() {
            return Err(TurnRejection::EngineBusy(EngineState::AwaitingChallengeResponse).into());
        }
        self.advance_turn(Some(index));
        self.run_due();
        Ok(())
    }

    pub(super) fn on_autonomous_roll(&mut self, player_id: &str) {
        let due = self.session.state() == EngineState::Idle
            && self
                .session
                .current_player()
                .is_some_and(|player| player.player_id == player_id && player.is_autonomous())
            && self.authority.drives_player(player_id);
        if !due {
            debug!(player_id, "stale autonomous roll ignored");
            return;
        }
        let index = self.session.turn_index();
        self.start_roll(index);
    }

    fn start_roll(&mut self, index: usize) -> RollAccepted {
        self.timers.cancel_slot(&mut self.slots.autonomous_roll);

        let die = self.dice.roll().clamp(1, 6);
        let player = &self.session.players()[index];
        let player_id = player.player_id.clone();
        let origin = player.position;
        let target = origin.saturating_add(die).min(FINISH_CELL);
        let message = format!("{} rolled a {die}", player.name);

        self.session.set_state(EngineState::Resolving);
        self.session.log(
            self.clock_ms,
            GameEventKind::DiceRolled,
            Some(&player_id),
            message,
            Some(json!({ "die": die, "origin": origin, "target": target })),
        );
        debug!(
            session_id = %self.session.session_id(),
            player_id = %player_id,
            die,
            origin,
            target,
            "roll accepted"
        );

        self.in_flight = Some(InFlightRoll {
            player_id: player_id.clone(),
            origin,
            target,
        });
        if origin >= target {
            self.land();
        } else {
            self.schedule_step(player_id.clone(), origin + 1);
        }

        RollAccepted {
            player_id,
            die,
            origin,
            target,
        }
    }

    fn schedule_step(&mut self, player_id: String, position: u8) {
        let delay = self.session.config().step_delay_ms;
        let handle = self.schedule_in(
            delay,
            Timer::MovementStep {
                player_id,
                position,
            },
        );
        self.slots.movement = Some(handle);
    }

    pub(super) fn on_movement_step(&mut self, player_id: &str, position: u8) {
        let Some(roll) = self.in_flight.as_ref() else {
            return;
        };
        if roll.player_id != player_id {
            return;
        }
        let target = roll.target;
        let Some(index) = self.session.player_index(player_id) else {
            self.in_flight = None;
            return;
        };
        if let Some(player) = self.session.player_at_mut(index) {
            player.position = position;
        }
        if position >= target {
            self.land();
        } else {
            self.schedule_step(player_id.to_string(), position + 1);
        }
    }

    /// Cell-effect dispatch once the token reaches its target.
    fn land(&mut self) {
        let Some(roll) = self.in_flight.take() else {
            return;
        };
        let Some(index) = self.session.player_index(&roll.player_id) else {
            self.session.set_state(EngineState::Idle);
            return;
        };

        match self.board.classify(roll.target) {
            CellKind::Finish => self.reach_finish(index),
            CellKind::Hazard => {
                let recoil = self.session.config().hazard_recoil;
                let landed = roll
                    .target
                    .saturating_sub(recoil)
                    .max(START_CELL);
                let name = self.player_name(index);
                if let Some(player) = self.session.player_at_mut(index) {
                    player.position = landed;
                }
                self.session.log(
                    self.clock_ms,
                    GameEventKind::HazardRecoil,
                    Some(&roll.player_id),
                    format!(
                        "{name} hit a hazard on cell {} and fell back to {landed}",
                        roll.target
                    ),
                    Some(json!({ "cell": roll.target, "position": landed })),
                );
                self.session.set_state(EngineState::Idle);
                self.advance_turn(None);
            }
            CellKind::Challenge => self.open_challenge(index, roll.origin, roll.target),
            CellKind::Neutral => {
                if let Some(player) = self.session.player_at_mut(index) {
                    player.position = roll.target;
                }
                self.session.set_state(EngineState::Idle);
                self.advance_turn(None);
            }
        }
    }

    /// Snap to the finish cell, start the repair loop if it is not already running
    /// and pass the turn on.
    pub(super) fn reach_finish(&mut self, index: usize) {
        let name = self.player_name(index);
        let player_id = match self.session.player_at_mut(index) {
            Some(player) => {
                player.position = FINISH_CELL;
                player.pending_position = None;
                player.player_id.clone()
            }
            None => return,
        };
        self.session.log(
            self.clock_ms,
            GameEventKind::FinishReached,
            Some(&player_id),
            format!("{name} reached the escape pod! Repairing the ship..."),
            None,
        );
        if !self.session.integrity().is_repairing() {
            self.session.integrity.begin_repair();
            self.session.touch_ship();
        }
        if self.slots.repair.is_none() {
            let delay = self.session.config().repair_tick_ms;
            self.slots.repair = Some(self.schedule_in(delay, Timer::RepairTick));
        }
        // Repair runs on the integrity loop; everyone else keeps taking turns.
        self.session.set_state(EngineState::Idle);
        debug!(session_id = %self.session.session_id(), player_id = %player_id, "finish reached");
        self.advance_turn(None);
    }

    pub(super) fn advance_turn(&mut self, next_index: Option<usize>) {
        let roster_size = self.session.players().len();
        if roster_size == 0 {
            return;
        }
        self.session.turn_index =
            next_index.unwrap_or((self.session.turn_index + 1) % roster_size);
        self.session.touch_session();
        self.schedule_autonomous_roll();
    }

    /// Arm the autonomous roll for the current player, if it is ours to drive.
    pub(super) fn schedule_autonomous_roll(&mut self) {
        self.timers.cancel_slot(&mut self.slots.autonomous_roll);
        if self.session.state() != EngineState::Idle {
            return;
        }
        let Some(player) = self.session.current_player() else {
            return;
        };
        if !player.is_autonomous() || !self.authority.drives_player(&player.player_id) {
            return;
        }
        let player_id = player.player_id.clone();
        let delay = self.policy.roll_delay_ms();
        self.slots.autonomous_roll =
            Some(self.schedule_in(delay, Timer::AutonomousRoll { player_id }));
    }
}
