use std::path::Path;

use contracts::{
    ActiveChallenge, ChangeOperation, EngineState, GameEvent, PlayerState, Riddle, SessionConfig,
    StoreChange, StoreTable,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

const CHANGE_FEED_CAPACITY: usize = 1_024;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("session {0} already exists")]
    SessionExists(String),
    #[error("turn {turn_index} (version {turn_version}) of session {session_id} is no longer open")]
    StaleTurn {
        session_id: String,
        turn_index: usize,
        turn_version: u64,
    },
    #[error("stored value is invalid: {0}")]
    Corrupt(String),
}

/// Canonical session row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub config: SessionConfig,
    pub turn_index: usize,
    /// Bumped only by `claim_turn`.
    pub turn_version: u64,
    pub engine_state: EngineState,
    pub countdown_seconds: u32,
    pub active_challenge: Option<ActiveChallenge>,
    pub clock_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShipRecord {
    pub integrity: f64,
    pub repairing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub history_id: i64,
    pub event: GameEvent,
}

/// Everything one client changed since its last flush, written in one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDelta {
    pub session: Option<SessionRecord>,
    pub players: Vec<PlayerState>,
    pub ship: Option<ShipRecord>,
    pub events: Vec<GameEvent>,
}

impl SessionDelta {
    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.players.is_empty() && self.ship.is_none() && self.events.is_empty()
    }
}

#[derive(Debug)]
pub struct SqliteSessionStore {
    conn: Connection,
    feed: broadcast::Sender<StoreChange>,
}

impl SqliteSessionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        let (feed, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let mut store = Self { conn, feed };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    /// Change notifications for every committed mutation, across all sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.feed.subscribe()
    }

    pub fn session_exists(&self, session_id: &str) -> Result<bool, PersistenceError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_sessions(&self) -> Result<Vec<String>, PersistenceError> {
        let mut stmt = self
            .conn
            .prepare("SELECT session_id FROM sessions ORDER BY session_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Insert the full opening projection of a new session.
    pub fn create_session(
        &mut self,
        session: &SessionRecord,
        players: &[PlayerState],
        ship: ShipRecord,
        riddles: &[Riddle],
    ) -> Result<(), PersistenceError> {
        if self.session_exists(&session.session_id)? {
            return Err(PersistenceError::SessionExists(session.session_id.clone()));
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO sessions (
                session_id,
                schema_version,
                config_json,
                turn_index,
                turn_version,
                engine_state,
                countdown_seconds,
                active_challenge_json,
                clock_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.session_id.as_str(),
                session.config.schema_version.as_str(),
                serde_json::to_string(&session.config)?,
                to_sql_int(session.turn_index as u64),
                to_sql_int(session.turn_version),
                session.engine_state.as_str(),
                i64::from(session.countdown_seconds),
                challenge_json(session.active_challenge.as_ref())?,
                to_sql_int(session.clock_ms),
            ],
        )?;
        for (seat, player) in players.iter().enumerate() {
            tx.execute(
                "INSERT INTO players (session_id, player_id, seat, position, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.session_id.as_str(),
                    player.player_id.as_str(),
                    to_sql_int(seat as u64),
                    i64::from(player.position),
                    serde_json::to_string(player)?,
                ],
            )?;
        }
        tx.execute(
            "INSERT INTO ship_systems (session_id, integrity, repairing) VALUES (?1, ?2, ?3)",
            params![session.session_id.as_str(), ship.integrity, ship.repairing],
        )?;
        for riddle in riddles {
            tx.execute(
                "INSERT INTO riddles (session_id, cell, question, answer) VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.session_id.as_str(),
                    i64::from(riddle.cell),
                    riddle.question.as_str(),
                    riddle.answer.as_str(),
                ],
            )?;
        }
        tx.commit()?;

        for table in [
            StoreTable::Session,
            StoreTable::Player,
            StoreTable::ShipSystem,
            StoreTable::Riddle,
        ] {
            self.publish(&session.session_id, table, ChangeOperation::Insert);
        }
        Ok(())
    }

    pub fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>, PersistenceError> {
        let row = self
            .conn
            .query_row(
                "SELECT config_json, turn_index, turn_version, engine_state,
                        countdown_seconds, active_challenge_json, clock_ms
                 FROM sessions
                 WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((config_json, turn_index, turn_version, state, countdown, challenge, clock_ms)) = row
        else {
            return Ok(None);
        };
        let engine_state = EngineState::parse(&state)
            .ok_or_else(|| PersistenceError::Corrupt(format!("engine_state={state}")))?;
        let active_challenge = match challenge {
            Some(raw) => Some(serde_json::from_str::<ActiveChallenge>(&raw)?),
            None => None,
        };

        Ok(Some(SessionRecord {
            session_id: session_id.to_string(),
            config: serde_json::from_str(&config_json)?,
            turn_index: from_sql_int(turn_index)? as usize,
            turn_version: from_sql_int(turn_version)?,
            engine_state,
            countdown_seconds: u32::try_from(countdown)
                .map_err(|_| PersistenceError::Corrupt(format!("countdown_seconds={countdown}")))?,
            active_challenge,
            clock_ms: from_sql_int(clock_ms)?,
        }))
    }

    pub fn load_players(&self, session_id: &str) -> Result<Vec<PlayerState>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload_json FROM players WHERE session_id = ?1 ORDER BY seat ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| row.get::<_, String>(0))?;
        let mut players = Vec::new();
        for row in rows {
            players.push(serde_json::from_str::<PlayerState>(&row?)?);
        }
        Ok(players)
    }

    pub fn load_ship(&self, session_id: &str) -> Result<Option<ShipRecord>, PersistenceError> {
        let ship = self
            .conn
            .query_row(
                "SELECT integrity, repairing FROM ship_systems WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(ShipRecord {
                        integrity: row.get(0)?,
                        repairing: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(ship)
    }

    pub fn load_riddles(&self, session_id: &str) -> Result<Vec<Riddle>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT cell, question, answer FROM riddles WHERE session_id = ?1 ORDER BY cell ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut riddles = Vec::new();
        for row in rows {
            let (cell, question, answer) = row?;
            let cell = u8::try_from(cell)
                .map_err(|_| PersistenceError::Corrupt(format!("riddle cell={cell}")))?;
            riddles.push(Riddle::new(cell, question, answer));
        }
        Ok(riddles)
    }

    /// History rows written after `after_id`, oldest first.
    pub fn load_history(
        &self,
        session_id: &str,
        after_id: i64,
    ) -> Result<Vec<HistoryEntry>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT history_id, payload_json
             FROM turn_history
             WHERE session_id = ?1 AND history_id > ?2
             ORDER BY history_id ASC",
        )?;
        let rows = stmt.query_map(params![session_id, after_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (history_id, payload) = row?;
            entries.push(HistoryEntry {
                history_id,
                event: serde_json::from_str(&payload)?,
            });
        }
        Ok(entries)
    }

    /// Write one client's changes for `session_id` and notify subscribers per table touched.
    pub fn persist_delta(
        &mut self,
        session_id: &str,
        delta: &SessionDelta,
    ) -> Result<(), PersistenceError> {
        if delta.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        if let Some(session) = &delta.session {
            update_session(&tx, session_id, session)?;
        }
        for player in &delta.players {
            let updated = tx.execute(
                "UPDATE players SET position = ?3, payload_json = ?4
                 WHERE session_id = ?1 AND player_id = ?2",
                params![
                    session_id,
                    player.player_id.as_str(),
                    i64::from(player.position),
                    serde_json::to_string(player)?,
                ],
            )?;
            if updated == 0 {
                return Err(PersistenceError::SessionNotFound(session_id.to_string()));
            }
        }
        if let Some(ship) = delta.ship {
            let updated = tx.execute(
                "UPDATE ship_systems SET integrity = ?2, repairing = ?3 WHERE session_id = ?1",
                params![session_id, ship.integrity, ship.repairing],
            )?;
            if updated == 0 {
                return Err(PersistenceError::SessionNotFound(session_id.to_string()));
            }
        }
        for event in &delta.events {
            tx.execute(
                "INSERT INTO turn_history (session_id, sequence, at_ms, kind, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session_id,
                    to_sql_int(event.sequence),
                    to_sql_int(event.at_ms),
                    event.kind.as_str(),
                    serde_json::to_string(event)?,
                ],
            )?;
        }
        tx.commit()?;

        if delta.session.is_some() {
            self.publish(session_id, StoreTable::Session, ChangeOperation::Update);
        }
        if !delta.players.is_empty() {
            self.publish(session_id, StoreTable::Player, ChangeOperation::Update);
        }
        if delta.ship.is_some() {
            self.publish(session_id, StoreTable::ShipSystem, ChangeOperation::Update);
        }
        if !delta.events.is_empty() {
            self.publish(session_id, StoreTable::TurnHistory, ChangeOperation::Insert);
        }
        Ok(())
    }

    /// Atomically take the turn at `turn_index` if nobody has claimed it since `turn_version`
    /// and no roll is in progress. Returns the new version.
    pub fn claim_turn(
        &mut self,
        session_id: &str,
        turn_index: usize,
        turn_version: u64,
    ) -> Result<u64, PersistenceError> {
        let claimed = self.conn.execute(
            "UPDATE sessions
             SET turn_version = turn_version + 1
             WHERE session_id = ?1 AND turn_index = ?2 AND turn_version = ?3 AND engine_state = ?4",
            params![
                session_id,
                to_sql_int(turn_index as u64),
                to_sql_int(turn_version),
                EngineState::Idle.as_str(),
            ],
        )?;
        if claimed == 0 {
            if !self.session_exists(session_id)? {
                return Err(PersistenceError::SessionNotFound(session_id.to_string()));
            }
            return Err(PersistenceError::StaleTurn {
                session_id: session_id.to_string(),
                turn_index,
                turn_version,
            });
        }
        self.publish(session_id, StoreTable::Session, ChangeOperation::Update);
        Ok(turn_version + 1)
    }

    /// Delete every record of `session_id` across all tables. Returns the number of rows removed.
    pub fn delete_session_data(&mut self, session_id: &str) -> Result<usize, PersistenceError> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        for table in ["turn_history", "riddles", "ship_systems", "players", "sessions"] {
            removed += tx.execute(
                &format!("DELETE FROM {table} WHERE session_id = ?1"),
                params![session_id],
            )?;
        }
        tx.commit()?;

        for table in [
            StoreTable::TurnHistory,
            StoreTable::Riddle,
            StoreTable::ShipSystem,
            StoreTable::Player,
            StoreTable::Session,
        ] {
            self.publish(session_id, table, ChangeOperation::Delete);
        }
        Ok(removed)
    }

    fn publish(&self, session_id: &str, table: StoreTable, operation: ChangeOperation) {
        // No subscribers is not an error.
        let _ = self.feed.send(StoreChange {
            session_id: session_id.to_string(),
            table,
            operation,
        });
    }

    #[cfg(test)]
    pub(crate) fn drop_table(&self, table: &str) -> Result<(), PersistenceError> {
        self.conn.execute_batch(&format!("DROP TABLE {table}"))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn remigrate(&mut self) -> Result<(), PersistenceError> {
        self.migrate()
    }

    fn configure(&mut self) -> Result<(), PersistenceError> {
        // In-memory databases answer "memory" here; either reply is fine.
        self.conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                schema_version TEXT NOT NULL,
                config_json TEXT NOT NULL,
                turn_index INTEGER NOT NULL,
                turn_version INTEGER NOT NULL,
                engine_state TEXT NOT NULL,
                countdown_seconds INTEGER NOT NULL,
                active_challenge_json TEXT,
                clock_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS players (
                session_id TEXT NOT NULL,
                player_id TEXT NOT NULL,
                seat INTEGER NOT NULL,
                position INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (session_id, player_id),
                UNIQUE (session_id, seat)
            );

            CREATE TABLE IF NOT EXISTS ship_systems (
                session_id TEXT PRIMARY KEY,
                integrity REAL NOT NULL,
                repairing INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS riddles (
                session_id TEXT NOT NULL,
                cell INTEGER NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                PRIMARY KEY (session_id, cell)
            );

            CREATE TABLE IF NOT EXISTS turn_history (
                history_id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                at_ms INTEGER NOT NULL,
                kind TEXT NOT NULL,
                payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_turn_history_session ON turn_history(session_id, history_id);
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name) VALUES(1, 'initial_v1')",
            [],
        )?;

        Ok(())
    }
}

fn update_session(
    tx: &Transaction<'_>,
    session_id: &str,
    session: &SessionRecord,
) -> Result<(), PersistenceError> {
    let updated = tx.execute(
        "UPDATE sessions SET
            turn_index = ?2,
            engine_state = ?3,
            countdown_seconds = ?4,
            active_challenge_json = ?5,
            clock_ms = ?6
         WHERE session_id = ?1",
        params![
            session_id,
            to_sql_int(session.turn_index as u64),
            session.engine_state.as_str(),
            i64::from(session.countdown_seconds),
            challenge_json(session.active_challenge.as_ref())?,
            to_sql_int(session.clock_ms),
        ],
    )?;
    if updated == 0 {
        return Err(PersistenceError::SessionNotFound(session_id.to_string()));
    }
    Ok(())
}

fn challenge_json(challenge: Option<&ActiveChallenge>) -> Result<Option<String>, PersistenceError> {
    Ok(match challenge {
        Some(challenge) => Some(serde_json::to_string(challenge)?),
        None => None,
    })
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> Result<u64, PersistenceError> {
    u64::try_from(value).map_err(|_| PersistenceError::Corrupt(format!("negative integer {value}")))
}
