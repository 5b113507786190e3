//! Rules engine for Galactic Escape: a 60-cell race with hazards, riddles and a
//! decaying ship, driven by a virtual millisecond clock.

pub mod board;
pub mod dice;
pub mod engine;
pub mod integrity;
pub mod policy;
pub mod riddles;
pub mod roster;
pub mod session;
pub mod timers;

pub use board::{Board, BoardError};
pub use dice::{Dice, RngDice, ScriptedDice};
pub use engine::{
    Authority, ChallengeOutcome, EngineError, RemoteSession, RemoteUpdate, Resolution,
    RollAccepted, TurnEngine, TurnRejection,
};
pub use integrity::ShipIntegrity;
pub use policy::{AutonomousPolicy, RandomPolicy, ScriptedPolicy};
pub use riddles::{answer_matches, RiddleCatalog};
pub use roster::{Roster, RosterError};
pub use session::{ChangeSet, GameSession, SessionError};
pub use timers::{Timer, TimerHandle, TimerQueue};
