use contracts::{EngineState, GameEventKind};
use tracing::info;

use super::{TurnEngine, COUNTDOWN_TICK_MS};
use crate::integrity::RepairProgress;
use crate::timers::Timer;

impl TurnEngine {
    /// Arm decay and countdown ticks if this client drives the session clock.
    pub(super) fn arm_clock(&mut self) {
        self.timers.cancel_slot(&mut self.slots.decay);
        self.timers.cancel_slot(&mut self.slots.countdown);
        if !self.authority.drives_clock() || self.session.state() == EngineState::Complete {
            return;
        }
        let decay_delay = self.session.config().decay_tick_ms;
        self.slots.decay = Some(self.schedule_in(decay_delay, Timer::DecayTick));
        if self.session.countdown_seconds() > 0 {
            self.slots.countdown = Some(self.schedule_in(COUNTDOWN_TICK_MS, Timer::CountdownTick));
        }
        if self.session.integrity().is_repairing() && self.slots.repair.is_none() {
            let repair_delay = self.session.config().repair_tick_ms;
            self.slots.repair = Some(self.schedule_in(repair_delay, Timer::RepairTick));
        }
    }

    pub(super) fn on_decay_tick(&mut self) {
        if self.session.state() == EngineState::Complete {
            return;
        }
        let amount = self.session.config().decay_per_tick;
        if self.session.integrity.decay(amount) {
            self.session.touch_ship();
        }
        let delay = self.session.config().decay_tick_ms;
        self.slots.decay = Some(self.schedule_in(delay, Timer::DecayTick));
    }

    pub(super) fn on_countdown_tick(&mut self) {
        if self.session.state() == EngineState::Complete || self.session.countdown_seconds == 0 {
            return;
        }
        self.session.countdown_seconds -= 1;
        self.session.touch_session();
        if self.session.countdown_seconds == 0 {
            self.expire_countdown();
        } else {
            self.slots.countdown = Some(self.schedule_in(COUNTDOWN_TICK_MS, Timer::CountdownTick));
        }
    }

    /// Time is up: the game ends where it stands unless a repair is already running.
    fn expire_countdown(&mut self) {
        if self.session.integrity().is_repairing() || self.session.state() == EngineState::Complete
        {
            return;
        }
        self.halt_turns();
        self.session.log(
            self.clock_ms,
            GameEventKind::CountdownExpired,
            None,
            "Time is up! The ship was lost.".to_string(),
            None,
        );
        self.session.set_state(EngineState::Complete);
        info!(session_id = %self.session.session_id(), "countdown expired");
    }

    pub(super) fn on_repair_tick(&mut self) {
        let amount = self.session.config().repair_per_tick;
        let progress = self.session.integrity.repair(amount);
        self.session.touch_ship();
        match progress {
            RepairProgress::InProgress => {
                let delay = self.session.config().repair_tick_ms;
                self.slots.repair = Some(self.schedule_in(delay, Timer::RepairTick));
            }
            RepairProgress::Completed => {
                self.session.log(
                    self.clock_ms,
                    GameEventKind::RepairCompleted,
                    None,
                    "Ship repaired. Escape complete!".to_string(),
                    None,
                );
                self.halt_turns();
                self.session.set_state(EngineState::Complete);
                info!(session_id = %self.session.session_id(), "session complete");
            }
        }
    }

    /// Drop whatever turn is in progress: a roll still moving or an open challenge.
    fn halt_turns(&mut self) {
        self.timers.cancel_slot(&mut self.slots.movement);
        self.timers.cancel_slot(&mut self.slots.challenge_answer);
        self.timers.cancel_slot(&mut self.slots.challenge_timeout);
        self.timers.cancel_slot(&mut self.slots.autonomous_roll);
        self.in_flight = None;
        if let Some(challenge) = self.session.active_challenge.take() {
            self.session.touch_session();
            if let Some(index) = self.session.player_index(&challenge.player_id) {
                if let Some(player) = self.session.player_at_mut(index) {
                    player.pending_position = None;
                }
            }
        }
    }
}
