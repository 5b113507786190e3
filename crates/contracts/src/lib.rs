//! v1 cross-boundary contracts for the engine, the API facade, the session store and clients.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SCHEMA_VERSION_V1: &str = "1.0";
pub const START_CELL: u8 = 1;
pub const FINISH_CELL: u8 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Pilot,
    Engineer,
    Medic,
    Scientist,
    Navigator,
    Commander,
    Observer,
    Bot,
}

impl Role {
    /// Roles a human can pick in the lobby.
    pub const SELECTABLE: [Role; 7] = [
        Role::Pilot,
        Role::Engineer,
        Role::Medic,
        Role::Scientist,
        Role::Navigator,
        Role::Commander,
        Role::Observer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pilot => "pilot",
            Self::Engineer => "engineer",
            Self::Medic => "medic",
            Self::Scientist => "scientist",
            Self::Navigator => "navigator",
            Self::Commander => "commander",
            Self::Observer => "observer",
            Self::Bot => "bot",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        Self::SELECTABLE
            .into_iter()
            .chain(std::iter::once(Self::Bot))
            .find(|role| role.as_str() == normalized)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlayerColor {
    Cyan,
    Lime,
    Yellow,
    Magenta,
    Orange,
    Pink,
    Red,
    Blue,
}

impl PlayerColor {
    pub const PALETTE: [PlayerColor; 8] = [
        PlayerColor::Cyan,
        PlayerColor::Lime,
        PlayerColor::Yellow,
        PlayerColor::Magenta,
        PlayerColor::Orange,
        PlayerColor::Pink,
        PlayerColor::Red,
        PlayerColor::Blue,
    ];

    /// Deterministic color from the first character of `seed`; `None` for an empty seed.
    pub fn from_seed(seed: &str) -> Option<Self> {
        let first = seed.chars().next()?;
        let index = (first as usize) % Self::PALETTE.len();
        Some(Self::PALETTE[index])
    }

    pub fn from_index(index: usize) -> Self {
        Self::PALETTE[index % Self::PALETTE.len()]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Human,
    Autonomous,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerState {
    pub player_id: String,
    pub name: String,
    pub role: Role,
    pub color: PlayerColor,
    pub position: u8,
    #[serde(default)]
    pub pending_position: Option<u8>,
    pub control: ControlKind,
}

impl PlayerState {
    pub fn is_autonomous(&self) -> bool {
        self.control == ControlKind::Autonomous
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Neutral,
    Hazard,
    Challenge,
    Finish,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Riddle {
    pub cell: u8,
    pub question: String,
    pub answer: String,
}

impl Riddle {
    pub fn new(cell: u8, question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            cell,
            question: question.into(),
            answer: answer.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange {
        min_ms: 0,
        max_ms: 0,
    };

    pub fn fixed(ms: u64) -> Self {
        Self {
            min_ms: ms,
            max_ms: ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub schema_version: String,
    pub session_id: String,
    pub seed: u64,
    pub countdown_seconds: u32,
    pub challenge_timeout_ms: u64,
    pub challenge_jump: u8,
    pub hazard_recoil: u8,
    pub decay_tick_ms: u64,
    pub decay_per_tick: f64,
    pub repair_tick_ms: u64,
    pub repair_per_tick: f64,
    pub event_log_capacity: usize,
    pub step_delay_ms: u64,
    pub autonomous_roll_delay_ms: DelayRange,
    pub autonomous_answer_delay_ms: DelayRange,
    pub autonomous_answer_probability: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            session_id: "session_local_001".to_string(),
            seed: 1337,
            countdown_seconds: 300,
            challenge_timeout_ms: 10_000,
            challenge_jump: 2,
            hazard_recoil: 2,
            decay_tick_ms: 1_000,
            decay_per_tick: 0.05,
            repair_tick_ms: 120,
            repair_per_tick: 2.0,
            event_log_capacity: 100,
            step_delay_ms: 300,
            autonomous_roll_delay_ms: DelayRange {
                min_ms: 1_700,
                max_ms: 3_200,
            },
            autonomous_answer_delay_ms: DelayRange {
                min_ms: 1_000,
                max_ms: 9_500,
            },
            autonomous_answer_probability: 0.6,
        }
    }
}

impl SessionConfig {
    /// Same rules with every cosmetic delay removed; intents resolve synchronously.
    pub fn instant(mut self) -> Self {
        self.step_delay_ms = 0;
        self.autonomous_roll_delay_ms = DelayRange::ZERO;
        self.autonomous_answer_delay_ms = DelayRange::ZERO;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Resolving,
    AwaitingChallengeResponse,
    Complete,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::AwaitingChallengeResponse => "awaiting_challenge_response",
            Self::Complete => "complete",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "idle" => Some(Self::Idle),
            "resolving" => Some(Self::Resolving),
            "awaiting_challenge_response" => Some(Self::AwaitingChallengeResponse),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveChallenge {
    pub challenge_id: u64,
    pub player_id: String,
    pub riddle: Riddle,
    pub pre_challenge_position: u8,
    pub pending_position: u8,
    pub opened_at_ms: u64,
    pub deadline_ms: u64,
}

/// What a client may see of an open challenge: no expected answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChallengeView {
    pub challenge_id: u64,
    pub player_id: String,
    pub cell: u8,
    pub question: String,
    pub remaining_ms: u64,
}

impl ChallengeView {
    pub fn at(challenge: &ActiveChallenge, clock_ms: u64) -> Self {
        Self {
            challenge_id: challenge.challenge_id,
            player_id: challenge.player_id.clone(),
            cell: challenge.riddle.cell,
            question: challenge.riddle.question.clone(),
            remaining_ms: challenge.deadline_ms.saturating_sub(clock_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameEventKind {
    SessionStarted,
    SessionRestarted,
    DiceRolled,
    FinishReached,
    HazardRecoil,
    ChallengeOpened,
    ChallengeAnswered,
    ChallengeFailed,
    ChallengeTimedOut,
    ChallengeForfeited,
    RepairCompleted,
    CountdownExpired,
}

impl GameEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::SessionRestarted => "session_restarted",
            Self::DiceRolled => "dice_rolled",
            Self::FinishReached => "finish_reached",
            Self::HazardRecoil => "hazard_recoil",
            Self::ChallengeOpened => "challenge_opened",
            Self::ChallengeAnswered => "challenge_answered",
            Self::ChallengeFailed => "challenge_failed",
            Self::ChallengeTimedOut => "challenge_timed_out",
            Self::ChallengeForfeited => "challenge_forfeited",
            Self::RepairCompleted => "repair_completed",
            Self::CountdownExpired => "countdown_expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameEvent {
    pub sequence: u64,
    pub at_ms: u64,
    pub kind: GameEventKind,
    pub player_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub schema_version: String,
    pub session_id: String,
    pub clock_ms: u64,
    pub engine_state: EngineState,
    pub turn_index: usize,
    pub current_player_id: Option<String>,
    pub players: Vec<PlayerState>,
    pub integrity: f64,
    pub repairing: bool,
    pub countdown_seconds: u32,
    pub hazard_cells: Vec<u8>,
    pub challenge_cells: Vec<u8>,
    pub active_challenge: Option<ChallengeView>,
    pub events: Vec<GameEvent>,
}

impl fmt::Display for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session_id={} state={} turn={} integrity={:.2} countdown={}s",
            self.session_id,
            self.engine_state,
            self.current_player_id.as_deref().unwrap_or("-"),
            self.integrity,
            self.countdown_seconds
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentPayload {
    RollDice,
    SubmitAnswer { answer: String },
    Forfeit,
    Restart,
    DeleteAllData,
}

impl IntentPayload {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RollDice => "roll_dice",
            Self::SubmitAnswer { .. } => "submit_answer",
            Self::Forfeit => "forfeit",
            Self::Restart => "restart",
            Self::DeleteAllData => "delete_all_data",
        }
    }

    pub fn requires_player(&self) -> bool {
        matches!(
            self,
            Self::RollDice | Self::SubmitAnswer { .. } | Self::Forfeit
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Intent {
    pub schema_version: String,
    pub intent_id: String,
    pub session_id: String,
    #[serde(default)]
    pub player_id: Option<String>,
    pub payload: IntentPayload,
}

impl Intent {
    pub fn new(
        intent_id: impl Into<String>,
        session_id: impl Into<String>,
        player_id: Option<String>,
        payload: IntentPayload,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            intent_id: intent_id.into(),
            session_id: session_id.into(),
            player_id,
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidTurn,
    SessionNotFound,
    StoreUnavailable,
    InvalidIntent,
    ContractVersionUnsupported,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntentResult {
    pub schema_version: String,
    pub intent_id: String,
    pub session_id: String,
    pub accepted: bool,
    pub error: Option<ApiError>,
}

impl IntentResult {
    pub fn accepted(intent: &Intent) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            intent_id: intent.intent_id.clone(),
            session_id: intent.session_id.clone(),
            accepted: true,
            error: None,
        }
    }

    pub fn rejected(intent: &Intent, error: ApiError) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            intent_id: intent.intent_id.clone(),
            session_id: intent.session_id.clone(),
            accepted: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StoreTable {
    Session,
    Player,
    ShipSystem,
    Riddle,
    TurnHistory,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// Change notification published by the session store. Carries no payload; consumers re-fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreChange {
    pub session_id: String,
    pub table: StoreTable,
    pub operation: ChangeOperation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_follows_first_character() {
        // 'A' = 65, 65 % 8 = 1
        assert_eq!(PlayerColor::from_seed("Ana"), Some(PlayerColor::Lime));
        // 'b' = 98, 98 % 8 = 2
        assert_eq!(PlayerColor::from_seed("bot"), Some(PlayerColor::Yellow));
        assert_eq!(PlayerColor::from_seed(""), None);
    }

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse(" Pilot "), Some(Role::Pilot));
        assert_eq!(Role::parse("bot"), Some(Role::Bot));
        assert_eq!(Role::parse("captain"), None);
    }

    #[test]
    fn intent_payload_uses_tagged_json() {
        let payload: IntentPayload =
            serde_json::from_str(r#"{"type":"submit_answer","answer":"Marte"}"#)
                .expect("tagged payload");
        assert_eq!(
            payload,
            IntentPayload::SubmitAnswer {
                answer: "Marte".to_string()
            }
        );
        assert!(payload.requires_player());
        assert!(!IntentPayload::Restart.requires_player());
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"session_id":"s1","countdown_seconds":60}"#)
                .expect("partial config");
        assert_eq!(config.session_id, "s1");
        assert_eq!(config.countdown_seconds, 60);
        assert_eq!(config.challenge_timeout_ms, 10_000);
        assert_eq!(config.challenge_jump, 2);
    }

    #[test]
    fn challenge_view_hides_answer_and_counts_down() {
        let challenge = ActiveChallenge {
            challenge_id: 3,
            player_id: "human".to_string(),
            riddle: Riddle::new(15, "Red planet?", "Marte"),
            pre_challenge_position: 11,
            pending_position: 15,
            opened_at_ms: 1_000,
            deadline_ms: 11_000,
        };
        let view = ChallengeView::at(&challenge, 4_000);
        assert_eq!(view.remaining_ms, 7_000);
        assert_eq!(view.cell, 15);
        assert_eq!(ChallengeView::at(&challenge, 20_000).remaining_ms, 0);
    }
}
