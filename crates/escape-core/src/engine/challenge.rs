use contracts::{ActiveChallenge, EngineState, GameEventKind, FINISH_CELL, START_CELL};
use serde_json::json;
use tracing::debug;

use super::{EngineError, TurnEngine, TurnRejection};
use crate::riddles::answer_matches;
use crate::timers::Timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Correct,
    Incorrect,
    TimedOut,
    Forfeited,
}

impl Resolution {
    fn event_kind(self) -> GameEventKind {
        match self {
            Self::Correct => GameEventKind::ChallengeAnswered,
            Self::Incorrect => GameEventKind::ChallengeFailed,
            Self::TimedOut => GameEventKind::ChallengeTimedOut,
            Self::Forfeited => GameEventKind::ChallengeForfeited,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeOutcome {
    pub challenge_id: u64,
    pub player_id: String,
    pub resolution: Resolution,
    pub position: u8,
}

impl TurnEngine {
    pub fn submit_answer(
        &mut self,
        player_id: &str,
        answer: &str,
    ) -> Result<ChallengeOutcome, EngineError> {
        let challenge = self.challenge_for(player_id)?;
        let resolution = if answer_matches(&challenge.riddle.answer, answer) {
            Resolution::Correct
        } else {
            Resolution::Incorrect
        };
        let outcome = self
            .resolve_challenge(resolution)
            .ok_or(TurnRejection::NoActiveChallenge)?;
        self.run_due();
        Ok(outcome)
    }

    pub fn forfeit(&mut self, player_id: &str) -> Result<ChallengeOutcome, EngineError> {
        self.challenge_for(player_id)?;
        let outcome = self
            .resolve_challenge(Resolution::Forfeited)
            .ok_or(TurnRejection::NoActiveChallenge)?;
        self.run_due();
        Ok(outcome)
    }

    /// The open challenge, if `player_id` is the one who must answer it from this client.
    fn challenge_for(&self, player_id: &str) -> Result<ActiveChallenge, EngineError> {
        let index = self.player_index(player_id)?;
        let challenge = self
            .session
            .active_challenge()
            .ok_or(TurnRejection::NoActiveChallenge)?;
        if challenge.player_id != player_id {
            return Err(TurnRejection::NotChallengedPlayer(challenge.player_id.clone()).into());
        }
        if self.session.players()[index].is_autonomous() {
            return Err(TurnRejection::AutonomousPlayer(player_id.to_string()).into());
        }
        if !self.authority.drives_player(player_id) {
            return Err(TurnRejection::NotControlled(player_id.to_string()).into());
        }
        Ok(challenge.clone())
    }

    pub(super) fn open_challenge(&mut self, index: usize, origin: u8, target: u8) {
        let Some(riddle) = self.board.riddle_at(target).cloned() else {
            self.session.set_state(EngineState::Idle);
            self.advance_turn(None);
            return;
        };
        let name = self.player_name(index);
        let player_id = match self.session.player_at_mut(index) {
            Some(player) => {
                player.position = target;
                player.pending_position = Some(target);
                player.player_id.clone()
            }
            None => return,
        };

        let challenge_id = self.next_challenge_id;
        self.next_challenge_id += 1;
        let timeout_ms = self.session.config().challenge_timeout_ms;
        self.session.log(
            self.clock_ms,
            GameEventKind::ChallengeOpened,
            Some(&player_id),
            format!("{name} must answer: {}", riddle.question),
            Some(json!({ "cell": target, "challenge_id": challenge_id })),
        );
        self.session.active_challenge = Some(ActiveChallenge {
            challenge_id,
            player_id: player_id.clone(),
            riddle,
            pre_challenge_position: origin,
            pending_position: target,
            opened_at_ms: self.clock_ms,
            deadline_ms: self.clock_ms.saturating_add(timeout_ms),
        });
        self.session.touch_session();
        self.session.set_state(EngineState::AwaitingChallengeResponse);
        debug!(
            session_id = %self.session.session_id(),
            player_id = %player_id,
            challenge_id,
            cell = target,
            "challenge opened"
        );
        self.arm_challenge_timers();
    }

    /// Schedule the auto-answer (autonomous players) and the timeout for the open
    /// challenge, relative to its deadline. Only the client driving the player does this.
    pub(super) fn arm_challenge_timers(&mut self) {
        self.timers.cancel_slot(&mut self.slots.challenge_answer);
        self.timers.cancel_slot(&mut self.slots.challenge_timeout);
        let Some(challenge) = self.session.active_challenge() else {
            return;
        };
        if !self.authority.drives_player(&challenge.player_id) {
            return;
        }
        let challenge_id = challenge.challenge_id;
        let deadline_ms = challenge.deadline_ms.max(self.clock_ms);
        let autonomous = self
            .session
            .player(&challenge.player_id)
            .is_some_and(|player| player.is_autonomous());

        // The auto-answer is scheduled first so it wins a tie with the timeout.
        if autonomous {
            let window = deadline_ms - self.clock_ms;
            let delay = self.policy.answer_delay_ms(window).min(window);
            self.slots.challenge_answer =
                Some(self.schedule_in(delay, Timer::ChallengeAutoAnswer { challenge_id }));
        }
        self.slots.challenge_timeout = Some(
            self.timers
                .schedule_at(deadline_ms, Timer::ChallengeTimeout { challenge_id }),
        );
    }

    pub(super) fn on_challenge_timeout(&mut self, challenge_id: u64) {
        if self.open_challenge_id() == Some(challenge_id) {
            self.resolve_challenge(Resolution::TimedOut);
        }
    }

    pub(super) fn on_challenge_auto_answer(&mut self, challenge_id: u64) {
        if self.open_challenge_id() != Some(challenge_id) {
            return;
        }
        let correct = match self.session.active_challenge() {
            Some(challenge) => {
                let riddle = challenge.riddle.clone();
                self.policy.answers_correctly(&riddle)
            }
            None => return,
        };
        let resolution = if correct {
            Resolution::Correct
        } else {
            Resolution::Incorrect
        };
        self.resolve_challenge(resolution);
    }

    fn open_challenge_id(&self) -> Option<u64> {
        self.session
            .active_challenge()
            .map(|challenge| challenge.challenge_id)
    }

    /// First resolution wins; later ones find no open challenge and return `None`.
    pub(super) fn resolve_challenge(&mut self, resolution: Resolution) -> Option<ChallengeOutcome> {
        let challenge = self.session.active_challenge.take()?;
        self.timers.cancel_slot(&mut self.slots.challenge_answer);
        self.timers.cancel_slot(&mut self.slots.challenge_timeout);
        self.session.touch_session();

        let Some(index) = self.session.player_index(&challenge.player_id) else {
            self.session.set_state(EngineState::Idle);
            return None;
        };
        let config = self.session.config();
        let position = match resolution {
            Resolution::Correct => challenge
                .pending_position
                .saturating_add(config.challenge_jump)
                .min(FINISH_CELL),
            Resolution::Incorrect | Resolution::TimedOut | Resolution::Forfeited => challenge
                .pre_challenge_position
                .saturating_sub(config.hazard_recoil)
                .max(START_CELL),
        };

        let name = self.player_name(index);
        if let Some(player) = self.session.player_at_mut(index) {
            player.position = position;
            player.pending_position = None;
        }
        let message = match resolution {
            Resolution::Correct => format!("{name} answered correctly and advances to {position}"),
            Resolution::Incorrect => format!("{name} answered wrong and falls back to {position}"),
            Resolution::TimedOut => format!("{name} ran out of time and falls back to {position}"),
            Resolution::Forfeited => format!("{name} gave up and falls back to {position}"),
        };
        self.session.log(
            self.clock_ms,
            resolution.event_kind(),
            Some(&challenge.player_id),
            message,
            Some(json!({
                "challenge_id": challenge.challenge_id,
                "cell": challenge.riddle.cell,
                "position": position,
            })),
        );
        debug!(
            session_id = %self.session.session_id(),
            player_id = %challenge.player_id,
            ?resolution,
            position,
            "challenge resolved"
        );

        if resolution == Resolution::Correct && position == FINISH_CELL {
            self.reach_finish(index);
        } else {
            self.session.set_state(EngineState::Idle);
            self.advance_turn(None);
        }

        Some(ChallengeOutcome {
            challenge_id: challenge.challenge_id,
            player_id: challenge.player_id,
            resolution,
            position,
        })
    }
}
