//! Turn resolution state machine.
//!
//! `TurnEngine` owns the session aggregate, the board, a `TimerQueue` and a virtual
//! clock. Intents (`roll`, `submit_answer`, `forfeit`, `restart`) and the external
//! clock (`advance`) are the only entry points; each one runs every timer that is
//! due before returning, so a configuration with zero delays resolves in-line.

use std::collections::BTreeSet;

use contracts::{ChallengeView, EngineState, SessionConfig, SessionSnapshot, SCHEMA_VERSION_V1};
use thiserror::Error;
use tracing::{debug, warn};

use crate::board::Board;
use crate::dice::{Dice, RngDice};
use crate::policy::{AutonomousPolicy, RandomPolicy};
use crate::roster::Roster;
use crate::session::{ChangeSet, GameSession, SessionError};
use crate::timers::{FiredTimer, Timer, TimerHandle, TimerQueue};

mod challenge;
mod clock;
mod remote;
mod turn;

pub use challenge::{ChallengeOutcome, Resolution};
pub use remote::{RemoteSession, RemoteUpdate};
pub use turn::RollAccepted;

pub const COUNTDOWN_TICK_MS: u64 = 1_000;

/// Upper bound on timers fired by one drain; the rest wait for the next drain.
pub const MAX_TIMERS_PER_DRAIN: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnRejection {
    #[error("it is {expected}'s turn, not {actual}'s")]
    NotPlayersTurn { expected: String, actual: String },
    #[error("engine is {0}")]
    EngineBusy(EngineState),
    #[error("a challenge is awaiting a response")]
    ChallengePending,
    #[error("no challenge is open")]
    NoActiveChallenge,
    #[error("the open challenge belongs to {0}")]
    NotChallengedPlayer(String),
    #[error("{0} is played by the autonomous policy")]
    AutonomousPlayer(String),
    #[error("{0} is not controlled by this client")]
    NotControlled(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid turn: {0}")]
    InvalidTurn(#[from] TurnRejection),
    #[error("unknown player {0}")]
    UnknownPlayer(String),
    #[error("turn index {index} is outside a roster of {roster_size}")]
    TurnOutOfRange { index: usize, roster_size: usize },
}

/// Which players (and whether the session clock) this engine drives with its own timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authority {
    All,
    Partial {
        players: BTreeSet<String>,
        clock: bool,
    },
}

impl Authority {
    pub fn drives_player(&self, player_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Partial { players, .. } => players.contains(player_id),
        }
    }

    pub fn drives_clock(&self) -> bool {
        match self {
            Self::All => true,
            Self::Partial { clock, .. } => *clock,
        }
    }
}

#[derive(Debug, Default)]
struct TimerSlots {
    decay: Option<TimerHandle>,
    countdown: Option<TimerHandle>,
    repair: Option<TimerHandle>,
    movement: Option<TimerHandle>,
    challenge_timeout: Option<TimerHandle>,
    challenge_answer: Option<TimerHandle>,
    autonomous_roll: Option<TimerHandle>,
}

impl TimerSlots {
    /// Forget a fired timer, unless its slot has since been re-armed with a newer handle.
    fn release(&mut self, fired: &FiredTimer) {
        let slot = match fired.timer {
            Timer::DecayTick => &mut self.decay,
            Timer::CountdownTick => &mut self.countdown,
            Timer::RepairTick => &mut self.repair,
            Timer::MovementStep { .. } => &mut self.movement,
            Timer::ChallengeTimeout { .. } => &mut self.challenge_timeout,
            Timer::ChallengeAutoAnswer { .. } => &mut self.challenge_answer,
            Timer::AutonomousRoll { .. } => &mut self.autonomous_roll,
        };
        if *slot == Some(fired.handle) {
            *slot = None;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InFlightRoll {
    player_id: String,
    origin: u8,
    target: u8,
}

pub struct TurnEngine {
    session: GameSession,
    board: Board,
    timers: TimerQueue,
    slots: TimerSlots,
    clock_ms: u64,
    policy: Box<dyn AutonomousPolicy>,
    dice: Box<dyn Dice>,
    authority: Authority,
    in_flight: Option<InFlightRoll>,
    next_challenge_id: u64,
    started: bool,
}

impl std::fmt::Debug for TurnEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnEngine")
            .field("session_id", &self.session.session_id())
            .field("state", &self.session.state())
            .field("clock_ms", &self.clock_ms)
            .field("pending_timers", &self.timers.pending_len())
            .field("authority", &self.authority)
            .finish()
    }
}

impl TurnEngine {
    pub fn new(
        session: GameSession,
        board: Board,
        policy: Box<dyn AutonomousPolicy>,
        dice: Box<dyn Dice>,
    ) -> Self {
        Self {
            session,
            board,
            timers: TimerQueue::new(),
            slots: TimerSlots::default(),
            clock_ms: 0,
            policy,
            dice,
            authority: Authority::All,
            in_flight: None,
            next_challenge_id: 1,
            started: false,
        }
    }

    /// Single-client game on the standard board with seeded dice and the random policy.
    pub fn local(config: SessionConfig, roster: Roster) -> Result<Self, SessionError> {
        let policy = RandomPolicy::from_config(&config);
        let dice = RngDice::seeded(config.seed);
        let session = GameSession::new(config, roster)?;
        let mut engine = Self::new(session, Board::standard(), Box::new(policy), Box::new(dice));
        engine.start();
        Ok(engine)
    }

    pub fn with_authority(mut self, authority: Authority) -> Self {
        self.authority = authority;
        self
    }

    /// Start the clock at `clock_ms` instead of zero; used when rebuilding from a store.
    pub fn with_clock(mut self, clock_ms: u64) -> Self {
        self.clock_ms = clock_ms;
        self
    }

    /// Arm the clocks, log the opening event and hand the first turn over.
    /// Calling it twice has no effect.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.session.log(
            self.clock_ms,
            contracts::GameEventKind::SessionStarted,
            None,
            "The game begins!".to_string(),
            None,
        );
        self.session.touch_session();
        self.session.touch_ship();
        self.arm_clock();
        self.schedule_autonomous_roll();
        self.run_due();
    }

    /// Pick up a session that is already running, e.g. one rebuilt from a store:
    /// arm whatever timers this client is responsible for without logging a start.
    pub fn resume(&mut self) {
        self.started = true;
        self.arm_clock();
        self.arm_challenge_timers();
        self.schedule_autonomous_roll();
        self.run_due();
    }

    /// Cancel every pending timer and return to the opening position.
    pub fn restart(&mut self) {
        self.timers.cancel_all();
        self.slots = TimerSlots::default();
        self.in_flight = None;
        self.session.reset();
        self.session.log(
            self.clock_ms,
            contracts::GameEventKind::SessionRestarted,
            None,
            "Game restarted".to_string(),
            None,
        );
        debug!(session_id = %self.session.session_id(), "session restarted");
        self.started = true;
        self.arm_clock();
        self.schedule_autonomous_roll();
        self.run_due();
    }

    /// Cancel every pending timer; the engine stops changing on its own.
    pub fn shutdown(&mut self) {
        self.timers.cancel_all();
        self.slots = TimerSlots::default();
    }

    /// Move the clock forward by `elapsed_ms`, firing every timer due in that window.
    /// Returns the number of timers fired.
    pub fn advance(&mut self, elapsed_ms: u64) -> usize {
        let target = self.clock_ms.saturating_add(elapsed_ms);
        let mut fired_count = 0;
        while let Some(fired) = self.timers.pop_due(target) {
            self.clock_ms = self.clock_ms.max(fired.due_ms);
            self.on_timer(fired);
            fired_count += 1;
            if fired_count >= MAX_TIMERS_PER_DRAIN {
                warn!(
                    session_id = %self.session.session_id(),
                    fired_count, "timer drain limit reached; deferring the rest"
                );
                return fired_count;
            }
        }
        self.clock_ms = target;
        fired_count
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn state(&self) -> EngineState {
        self.session.state()
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    /// True from an accepted roll until its cell effect has been applied.
    pub fn is_rolling(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending_len()
    }

    /// Virtual time of the next live timer, if any.
    pub fn next_due_ms(&mut self) -> Option<u64> {
        self.timers.next_due()
    }

    pub fn take_changes(&mut self) -> ChangeSet {
        self.session.take_changes()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = &self.session;
        SessionSnapshot {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            session_id: session.session_id().to_string(),
            clock_ms: self.clock_ms,
            engine_state: session.state(),
            turn_index: session.turn_index(),
            current_player_id: session
                .current_player()
                .map(|player| player.player_id.clone()),
            players: session.players().to_vec(),
            integrity: session.integrity().level(),
            repairing: session.integrity().is_repairing(),
            countdown_seconds: session.countdown_seconds(),
            hazard_cells: self.board.hazard_cells(),
            challenge_cells: self.board.challenge_cells(),
            active_challenge: session
                .active_challenge()
                .map(|challenge| ChallengeView::at(challenge, self.clock_ms)),
            events: session.events().cloned().collect(),
        }
    }

    fn run_due(&mut self) {
        self.advance(0);
    }

    fn on_timer(&mut self, fired: FiredTimer) {
        self.slots.release(&fired);
        debug!(
            session_id = %self.session.session_id(),
            timer = fired.timer.label(),
            at_ms = fired.due_ms,
            "timer fired"
        );
        match fired.timer {
            Timer::DecayTick => self.on_decay_tick(),
            Timer::CountdownTick => self.on_countdown_tick(),
            Timer::RepairTick => self.on_repair_tick(),
            Timer::MovementStep {
                player_id,
                position,
            } => self.on_movement_step(&player_id, position),
            Timer::ChallengeTimeout { challenge_id } => self.on_challenge_timeout(challenge_id),
            Timer::ChallengeAutoAnswer { challenge_id } => {
                self.on_challenge_auto_answer(challenge_id)
            }
            Timer::AutonomousRoll { player_id } => self.on_autonomous_roll(&player_id),
        }
    }

    fn schedule_in(&mut self, delay_ms: u64, timer: Timer) -> TimerHandle {
        self.timers
            .schedule_at(self.clock_ms.saturating_add(delay_ms), timer)
    }

    fn player_index(&self, player_id: &str) -> Result<usize, EngineError> {
        self.session
            .player_index(player_id)
            .ok_or_else(|| EngineError::UnknownPlayer(player_id.to_string()))
    }

    fn player_name(&self, index: usize) -> String {
        self.session
            .players()
            .get(index)
            .map(|player| player.name.clone())
            .unwrap_or_default()
    }
}
