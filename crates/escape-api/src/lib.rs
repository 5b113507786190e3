//! In-process game facade with intent validation, an audit log, and optional
//! SQLite-backed multiplayer synchronization.

mod persistence;
mod server;
mod sync;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use contracts::{
    ApiError, ErrorCode, Intent, IntentPayload, IntentResult, SessionConfig, SessionSnapshot,
    StoreChange, SCHEMA_VERSION_V1,
};
use escape_core::board::STANDARD_HAZARD_CELLS;
use escape_core::{
    Authority, Board, BoardError, EngineError, GameSession, RandomPolicy, RemoteSession,
    RemoteUpdate, RiddleCatalog, RngDice, Roster, SessionError, TurnEngine, TurnRejection,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub use persistence::{
    HistoryEntry, PersistenceError, SessionDelta, SessionRecord, ShipRecord, SqliteSessionStore,
};
pub use server::{serve, ServerError};
pub use sync::SyncState;

/// One store shared by every client in the process.
pub type SharedStore = Arc<Mutex<SqliteSessionStore>>;

pub fn shared_store(store: SqliteSessionStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

#[derive(Debug, Error)]
pub enum ApiFailure {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("session store lock is poisoned")]
    StoreLockPoisoned,
}

impl ApiFailure {
    pub fn to_api_error(&self) -> ApiError {
        let code = match self {
            Self::Session(_) | Self::Board(_) => ErrorCode::InvalidIntent,
            Self::SessionNotFound(_) | Self::Persistence(PersistenceError::SessionNotFound(_)) => {
                ErrorCode::SessionNotFound
            }
            Self::Persistence(PersistenceError::StaleTurn { .. }) => ErrorCode::InvalidTurn,
            Self::Persistence(_) | Self::StoreLockPoisoned => ErrorCode::StoreUnavailable,
        };
        ApiError::new(code, self.to_string(), None)
    }
}

#[derive(Debug)]
struct SyncLink {
    store: SharedStore,
    feed: broadcast::Receiver<StoreChange>,
    state: SyncState,
}

impl SyncLink {
    fn lock(store: &SharedStore) -> Result<MutexGuard<'_, SqliteSessionStore>, ApiFailure> {
        store.lock().map_err(|_| ApiFailure::StoreLockPoisoned)
    }
}

#[derive(Debug)]
pub struct GameApi {
    engine: TurnEngine,
    audit: Vec<IntentResult>,
    sync: Option<SyncLink>,
    detached: bool,
    last_store_error: Option<ApiError>,
}

impl GameApi {
    /// Single-client game: one human and `BOT-01`, no store.
    pub fn local(config: SessionConfig, roster: Roster) -> Result<Self, ApiFailure> {
        let engine = TurnEngine::local(config, roster)?;
        info!(session_id = %engine.session().session_id(), "local session started");
        Ok(Self::with_engine(engine, None))
    }

    /// Create a session in `store` and drive it with `authority`.
    pub fn host(
        store: SharedStore,
        config: SessionConfig,
        roster: Roster,
        authority: Authority,
    ) -> Result<Self, ApiFailure> {
        let policy = RandomPolicy::from_config(&config);
        let dice = RngDice::seeded(config.seed);
        let session = GameSession::new(config, roster)?;
        let board = Board::standard();
        let session_id = session.session_id().to_string();

        let feed = {
            let mut guard = SyncLink::lock(&store)?;
            let feed = guard.subscribe();
            let record = SessionRecord {
                session_id: session_id.clone(),
                config: session.config().clone(),
                turn_index: session.turn_index(),
                turn_version: 0,
                engine_state: session.state(),
                countdown_seconds: session.countdown_seconds(),
                active_challenge: None,
                clock_ms: 0,
            };
            let riddles: Vec<_> = board.riddles().riddles().cloned().collect();
            guard.create_session(
                &record,
                session.players(),
                ShipRecord {
                    integrity: session.integrity().level(),
                    repairing: session.integrity().is_repairing(),
                },
                &riddles,
            )?;
            feed
        };

        let mut engine = TurnEngine::new(session, board, Box::new(policy), Box::new(dice))
            .with_authority(authority);
        engine.start();
        info!(session_id = %session_id, "hosted session created");

        let sync = SyncLink {
            store,
            feed,
            state: SyncState::new(session_id, 0, 0),
        };
        let mut api = Self::with_engine(engine, Some(sync));
        api.sync_after();
        Ok(api)
    }

    /// Attach to a session another client created, driving only `controlled` players.
    pub fn join(
        store: SharedStore,
        session_id: &str,
        controlled: BTreeSet<String>,
    ) -> Result<Self, ApiFailure> {
        let (feed, record, players, ship, riddles, history) = {
            let guard = SyncLink::lock(&store)?;
            let feed = guard.subscribe();
            let record = guard
                .load_session(session_id)?
                .ok_or_else(|| ApiFailure::SessionNotFound(session_id.to_string()))?;
            (
                feed,
                record,
                guard.load_players(session_id)?,
                guard.load_ship(session_id)?,
                guard.load_riddles(session_id)?,
                guard.load_history(session_id, 0)?,
            )
        };

        let board = Board::new(STANDARD_HAZARD_CELLS, RiddleCatalog::new(riddles)?)?;
        let policy = RandomPolicy::from_config(&record.config);
        let dice = RngDice::seeded(record.config.seed ^ record.turn_version);
        let session = GameSession::from_players(record.config.clone(), players)?;
        let mut engine = TurnEngine::new(session, board, Box::new(policy), Box::new(dice))
            .with_authority(Authority::Partial {
                players: controlled,
                clock: false,
            })
            .with_clock(record.clock_ms);

        if let Some(ship) = ship {
            engine.apply_remote(RemoteUpdate::Ship {
                level: ship.integrity,
                repairing: ship.repairing,
            });
        }
        let cursor = history.last().map_or(0, |entry| entry.history_id);
        engine.apply_remote(RemoteUpdate::Events(
            history.into_iter().map(|entry| entry.event).collect(),
        ));
        engine.apply_remote(RemoteUpdate::Session(RemoteSession {
            turn_index: record.turn_index,
            engine_state: record.engine_state,
            countdown_seconds: record.countdown_seconds,
            active_challenge: record.active_challenge,
        }));
        engine.resume();
        info!(session_id, "joined session");

        let sync = SyncLink {
            store,
            feed,
            state: SyncState::new(session_id, record.turn_version, cursor),
        };
        let mut api = Self::with_engine(engine, Some(sync));
        api.sync_after();
        Ok(api)
    }

    fn with_engine(engine: TurnEngine, sync: Option<SyncLink>) -> Self {
        Self {
            engine,
            audit: Vec::new(),
            sync,
            detached: false,
            last_store_error: None,
        }
    }

    pub fn session_id(&self) -> &str {
        self.engine.session().session_id()
    }

    pub fn engine(&self) -> &TurnEngine {
        &self.engine
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.engine.snapshot()
    }

    pub fn audit(&self) -> &[IntentResult] {
        &self.audit
    }

    pub fn is_multiplayer(&self) -> bool {
        self.sync.is_some()
    }

    /// True once the session's records were deleted, by this client or another.
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// The most recent failed store write, cleared by the next successful flush.
    pub fn last_store_error(&self) -> Option<&ApiError> {
        self.last_store_error.as_ref()
    }

    pub fn has_pending_writes(&self) -> bool {
        self.sync
            .as_ref()
            .is_some_and(|sync| sync.state.has_pending_writes())
    }

    pub fn submit_intent(&mut self, intent: Intent) -> IntentResult {
        if let Err(err) = self.pump_notifications() {
            warn!(session_id = %self.session_id(), error = %err, "pre-intent merge failed");
        }

        let result = match self.validate_intent(&intent) {
            Some(error) => IntentResult::rejected(&intent, error),
            None => match self.dispatch(&intent) {
                Ok(()) => IntentResult::accepted(&intent),
                Err(error) => IntentResult::rejected(&intent, error),
            },
        };

        if let Some(error) = &result.error {
            warn!(
                session_id = %intent.session_id,
                intent = intent.payload.as_str(),
                code = ?error.error_code,
                message = %error.message,
                "intent rejected"
            );
        } else {
            debug!(session_id = %intent.session_id, intent = intent.payload.as_str(), "intent accepted");
        }

        self.audit.push(result.clone());
        self.sync_after();
        result
    }

    /// Advance the engine clock. Remote changes are merged first so local writes build on them.
    pub fn advance(&mut self, elapsed_ms: u64) -> usize {
        if let Err(err) = self.pump_notifications() {
            warn!(session_id = %self.session_id(), error = %err, "pre-advance merge failed");
        }
        if self.detached {
            return 0;
        }
        let fired = self.engine.advance(elapsed_ms);
        self.sync_after();
        fired
    }

    /// Drain the change feed and merge whatever other clients wrote. Returns the number
    /// of tables merged.
    pub fn pump_notifications(&mut self) -> Result<usize, ApiFailure> {
        let Some(sync) = self.sync.as_mut() else {
            return Ok(0);
        };
        loop {
            match sync.feed.try_recv() {
                Ok(change) => {
                    sync.state.note_change(&change);
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "change feed lagged; re-fetching everything");
                    sync.state.note_all();
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }

        let merged = {
            let guard = SyncLink::lock(&sync.store)?;
            sync.state.reconcile(&guard, &mut self.engine)?
        };
        if sync.state.session_deleted() && !self.detached {
            info!(session_id = %self.engine.session().session_id(), "session deleted remotely");
            self.detach();
        }
        // Merges can fire timers (e.g. our bot's turn arrived); mirror what they changed.
        self.sync_after();
        Ok(merged)
    }

    /// Retry pending writes now.
    pub fn flush(&mut self) -> Result<(), ApiFailure> {
        let Some(sync) = self.sync.as_mut() else {
            return Ok(());
        };
        sync.state.record(self.engine.take_changes());
        if self.detached {
            return Ok(());
        }
        let result = SyncLink::lock(&sync.store)
            .and_then(|mut guard| Ok(sync.state.flush(&mut guard, &self.engine)?));
        match result {
            Ok(()) => {
                self.last_store_error = None;
                Ok(())
            }
            Err(err) => {
                warn!(session_id = %self.engine.session().session_id(), error = %err, "store write failed; kept for retry");
                self.last_store_error = Some(err.to_api_error());
                Err(err)
            }
        }
    }

    fn sync_after(&mut self) {
        if self.sync.is_none() {
            // Nothing to mirror; drop the change log so it does not grow.
            self.engine.take_changes();
            return;
        }
        let _ = self.flush();
    }

    fn detach(&mut self) {
        self.detached = true;
        self.engine.shutdown();
        self.engine.take_changes();
    }

    fn validate_intent(&self, intent: &Intent) -> Option<ApiError> {
        if intent.schema_version != SCHEMA_VERSION_V1 {
            return Some(ApiError::new(
                ErrorCode::ContractVersionUnsupported,
                "Unsupported schema_version",
                Some(format!(
                    "got={} expected={}",
                    intent.schema_version, SCHEMA_VERSION_V1
                )),
            ));
        }

        if intent.session_id != self.session_id() || self.detached {
            return Some(ApiError::new(
                ErrorCode::SessionNotFound,
                "intent.session_id does not match an active session",
                Some(format!(
                    "requested={} active={}",
                    intent.session_id,
                    self.session_id()
                )),
            ));
        }

        if intent.payload.requires_player() && intent.player_id.is_none() {
            return Some(ApiError::new(
                ErrorCode::InvalidIntent,
                format!("{} requires player_id", intent.payload.as_str()),
                None,
            ));
        }

        if intent.payload == IntentPayload::DeleteAllData && self.sync.is_none() {
            return Some(ApiError::new(
                ErrorCode::InvalidIntent,
                "delete_all_data is only available for stored sessions",
                None,
            ));
        }

        None
    }

    fn dispatch(&mut self, intent: &Intent) -> Result<(), ApiError> {
        let player_id = intent.player_id.as_deref().unwrap_or_default();
        match &intent.payload {
            IntentPayload::RollDice => {
                self.engine.check_roll(player_id).map_err(engine_error)?;
                self.claim_turn()?;
                self.engine.roll(player_id).map_err(engine_error)?;
            }
            IntentPayload::SubmitAnswer { answer } => {
                self.engine
                    .submit_answer(player_id, answer)
                    .map_err(engine_error)?;
            }
            IntentPayload::Forfeit => {
                self.engine.forfeit(player_id).map_err(engine_error)?;
            }
            IntentPayload::Restart => self.engine.restart(),
            IntentPayload::DeleteAllData => self.delete_all_data()?,
        }
        Ok(())
    }

    /// Store-side arbitration: only one client can take a given turn.
    fn claim_turn(&mut self) -> Result<(), ApiError> {
        let Some(sync) = self.sync.as_mut() else {
            return Ok(());
        };
        let turn_index = self.engine.session().turn_index();
        let claimed = SyncLink::lock(&sync.store).and_then(|mut guard| {
            Ok(guard.claim_turn(
                self.engine.session().session_id(),
                turn_index,
                sync.state.turn_version(),
            )?)
        });
        match claimed {
            Ok(version) => {
                sync.state.set_turn_version(version);
                Ok(())
            }
            Err(err) => Err(err.to_api_error()),
        }
    }

    fn delete_all_data(&mut self) -> Result<(), ApiError> {
        let Some(sync) = self.sync.as_mut() else {
            return Ok(());
        };
        let removed = SyncLink::lock(&sync.store)
            .and_then(|mut guard| Ok(guard.delete_session_data(self.engine.session().session_id())?))
            .map_err(|err| err.to_api_error())?;
        info!(session_id = %self.engine.session().session_id(), removed, "session data deleted");
        self.detach();
        Ok(())
    }
}

fn engine_error(err: EngineError) -> ApiError {
    match err {
        EngineError::InvalidTurn(reason) => {
            let details = match &reason {
                TurnRejection::NotPlayersTurn { expected, .. } => Some(format!("expected={expected}")),
                _ => None,
            };
            ApiError::new(ErrorCode::InvalidTurn, reason.to_string(), details)
        }
        EngineError::UnknownPlayer(player_id) => ApiError::new(
            ErrorCode::InvalidIntent,
            "unknown player",
            Some(format!("player_id={player_id}")),
        ),
        other => ApiError::new(ErrorCode::InvalidIntent, other.to_string(), None),
    }
}

#[cfg(test)]
mod tests;
