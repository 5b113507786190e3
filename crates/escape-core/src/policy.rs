//! Decision policy for autonomous players.

use std::collections::VecDeque;

use contracts::{DelayRange, Riddle, SessionConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Everything the engine asks of an autonomous player.
///
/// Delays are cosmetic; the engine treats a zero delay as "act at the current instant".
pub trait AutonomousPolicy: Send {
    /// Milliseconds to wait after the turn passes to the player before rolling.
    fn roll_delay_ms(&mut self) -> u64;

    /// Milliseconds to wait before answering a riddle. The engine keeps the answer
    /// strictly inside `timeout_ms`.
    fn answer_delay_ms(&mut self, timeout_ms: u64) -> u64;

    /// Whether the player answers `riddle` correctly.
    fn answers_correctly(&mut self, riddle: &Riddle) -> bool;
}

/// Seeded random policy: correct with a fixed probability regardless of the riddle.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    rng: StdRng,
    roll_delay: DelayRange,
    answer_delay: DelayRange,
    correct_probability: f64,
}

impl RandomPolicy {
    pub fn new(
        seed: u64,
        roll_delay: DelayRange,
        answer_delay: DelayRange,
        correct_probability: f64,
    ) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            roll_delay,
            answer_delay,
            correct_probability: correct_probability.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.seed ^ 0x5eed_b07,
            config.autonomous_roll_delay_ms,
            config.autonomous_answer_delay_ms,
            config.autonomous_answer_probability,
        )
    }

    fn draw(&mut self, range: DelayRange) -> u64 {
        if range.max_ms <= range.min_ms {
            return range.min_ms;
        }
        self.rng.random_range(range.min_ms..=range.max_ms)
    }
}

impl AutonomousPolicy for RandomPolicy {
    fn roll_delay_ms(&mut self) -> u64 {
        self.draw(self.roll_delay)
    }

    fn answer_delay_ms(&mut self, timeout_ms: u64) -> u64 {
        let range = DelayRange {
            min_ms: self.answer_delay.min_ms.min(timeout_ms),
            max_ms: self.answer_delay.max_ms.min(timeout_ms),
        };
        self.draw(range)
    }

    fn answers_correctly(&mut self, _riddle: &Riddle) -> bool {
        self.rng.random_bool(self.correct_probability)
    }
}

/// Deterministic policy for tests and replays: fixed delays and a queue of verdicts.
#[derive(Debug, Clone)]
pub struct ScriptedPolicy {
    pub roll_delay_ms: u64,
    pub answer_delay_ms: u64,
    verdicts: VecDeque<bool>,
    fallback: bool,
}

impl ScriptedPolicy {
    pub fn new(roll_delay_ms: u64, answer_delay_ms: u64) -> Self {
        Self {
            roll_delay_ms,
            answer_delay_ms,
            verdicts: VecDeque::new(),
            fallback: false,
        }
    }

    pub fn instant() -> Self {
        Self::new(0, 0)
    }

    /// Verdicts consumed in order; `fallback` applies once they run out.
    pub fn with_verdicts(mut self, verdicts: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        self.verdicts = verdicts.into_iter().collect();
        self.fallback = fallback;
        self
    }
}

impl AutonomousPolicy for ScriptedPolicy {
    fn roll_delay_ms(&mut self) -> u64 {
        self.roll_delay_ms
    }

    fn answer_delay_ms(&mut self, timeout_ms: u64) -> u64 {
        self.answer_delay_ms.min(timeout_ms)
    }

    fn answers_correctly(&mut self, _riddle: &Riddle) -> bool {
        self.verdicts.pop_front().unwrap_or(self.fallback)
    }
}
