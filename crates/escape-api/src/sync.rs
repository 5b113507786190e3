//! Mirrors one client's engine to the shared store and merges what other clients wrote.

use std::collections::BTreeSet;

use contracts::{ChangeOperation, StoreChange, StoreTable};
use escape_core::{ChangeSet, RemoteSession, RemoteUpdate, TurnEngine};
use tracing::{debug, warn};

use crate::persistence::{
    PersistenceError, SessionDelta, SessionRecord, ShipRecord, SqliteSessionStore,
};

#[derive(Debug)]
pub struct SyncState {
    session_id: String,
    /// Local changes not yet committed; retried on every flush until one succeeds.
    outbox: ChangeSet,
    /// Tables that changed remotely and still need a re-fetch.
    deferred: BTreeSet<StoreTable>,
    history_cursor: i64,
    turn_version: u64,
    session_deleted: bool,
}

impl SyncState {
    pub fn new(session_id: impl Into<String>, turn_version: u64, history_cursor: i64) -> Self {
        Self {
            session_id: session_id.into(),
            outbox: ChangeSet::default(),
            deferred: BTreeSet::new(),
            history_cursor,
            turn_version,
            session_deleted: false,
        }
    }

    pub fn turn_version(&self) -> u64 {
        self.turn_version
    }

    pub fn set_turn_version(&mut self, turn_version: u64) {
        self.turn_version = turn_version;
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub fn deferred_tables(&self) -> &BTreeSet<StoreTable> {
        &self.deferred
    }

    pub fn session_deleted(&self) -> bool {
        self.session_deleted
    }

    pub fn record(&mut self, changes: ChangeSet) {
        self.outbox.merge(changes);
    }

    /// Write the outbox using the engine's current values. On failure the outbox is kept.
    pub fn flush(
        &mut self,
        store: &mut SqliteSessionStore,
        engine: &TurnEngine,
    ) -> Result<(), PersistenceError> {
        if self.outbox.is_empty() {
            return Ok(());
        }
        let mut delta = self.delta(engine);
        if let Some(row) = delta.session.as_mut() {
            // Only the clock-driving client writes the countdown, except to reset it.
            if !engine.authority().drives_clock() {
                if let Some(stored) = store.load_session(&self.session_id)? {
                    row.clock_ms = stored.clock_ms;
                    if !self.outbox.restarted {
                        row.countdown_seconds = stored.countdown_seconds;
                    }
                }
            }
        }
        store.persist_delta(&self.session_id, &delta)?;
        debug!(
            session_id = %self.session_id,
            players = delta.players.len(),
            events = delta.events.len(),
            restarted = self.outbox.restarted,
            "local changes flushed"
        );
        self.outbox = ChangeSet::default();
        Ok(())
    }

    fn delta(&self, engine: &TurnEngine) -> SessionDelta {
        let session = engine.session();
        let players = self
            .outbox
            .players
            .iter()
            .filter_map(|player_id| session.player(player_id).cloned())
            .collect();
        let session_row = self.outbox.session.then(|| SessionRecord {
            session_id: self.session_id.clone(),
            config: session.config().clone(),
            turn_index: session.turn_index(),
            turn_version: self.turn_version,
            engine_state: session.state(),
            countdown_seconds: session.countdown_seconds(),
            active_challenge: session.active_challenge().cloned(),
            clock_ms: engine.clock_ms(),
        });
        let ship = self.outbox.ship.then(|| ShipRecord {
            integrity: session.integrity().level(),
            repairing: session.integrity().is_repairing(),
        });
        SessionDelta {
            session: session_row,
            players,
            ship,
            events: self.outbox.events.clone(),
        }
    }

    /// Note a change notification. Returns `false` for other sessions' traffic.
    pub fn note_change(&mut self, change: &StoreChange) -> bool {
        if change.session_id != self.session_id {
            return false;
        }
        if change.table == StoreTable::Session && change.operation == ChangeOperation::Delete {
            self.session_deleted = true;
        }
        self.deferred.insert(change.table);
        true
    }

    /// Re-fetch everything, e.g. after the feed lagged.
    pub fn note_all(&mut self) {
        self.deferred.extend([
            StoreTable::Session,
            StoreTable::Player,
            StoreTable::ShipSystem,
            StoreTable::TurnHistory,
        ]);
    }

    /// Re-fetch deferred tables and merge them into `engine`. While a local roll is in
    /// flight nothing is merged; the tables stay deferred until the roll resolves.
    pub fn reconcile(
        &mut self,
        store: &SqliteSessionStore,
        engine: &mut TurnEngine,
    ) -> Result<usize, PersistenceError> {
        if self.deferred.is_empty() {
            return Ok(0);
        }
        if engine.is_rolling() {
            debug!(session_id = %self.session_id, "roll in flight; remote merge deferred");
            return Ok(0);
        }

        let tables = std::mem::take(&mut self.deferred);
        let mut merged = 0;
        for table in &tables {
            match self.refetch(store, engine, *table) {
                Ok(applied) => merged += usize::from(applied),
                Err(err) => {
                    // Put back what was not merged so the next pump retries it.
                    self.deferred.extend(tables.iter().filter(|t| *t >= table));
                    warn!(session_id = %self.session_id, ?table, error = %err, "remote re-fetch failed");
                    return Err(err);
                }
            }
        }
        Ok(merged)
    }

    fn refetch(
        &mut self,
        store: &SqliteSessionStore,
        engine: &mut TurnEngine,
        table: StoreTable,
    ) -> Result<bool, PersistenceError> {
        match table {
            StoreTable::Session => {
                let Some(record) = store.load_session(&self.session_id)? else {
                    self.session_deleted = true;
                    return Ok(false);
                };
                self.turn_version = record.turn_version;
                engine.apply_remote(RemoteUpdate::Session(RemoteSession {
                    turn_index: record.turn_index,
                    engine_state: record.engine_state,
                    countdown_seconds: record.countdown_seconds,
                    active_challenge: record.active_challenge,
                }));
            }
            StoreTable::Player => {
                let players = store.load_players(&self.session_id)?;
                if players.is_empty() {
                    return Ok(false);
                }
                engine.apply_remote(RemoteUpdate::Players(players));
            }
            StoreTable::ShipSystem => {
                let Some(ship) = store.load_ship(&self.session_id)? else {
                    return Ok(false);
                };
                engine.apply_remote(RemoteUpdate::Ship {
                    level: ship.integrity,
                    repairing: ship.repairing,
                });
            }
            StoreTable::TurnHistory => {
                let entries = store.load_history(&self.session_id, self.history_cursor)?;
                let Some(last) = entries.last() else {
                    return Ok(false);
                };
                self.history_cursor = last.history_id;
                engine.apply_remote(RemoteUpdate::Events(
                    entries.into_iter().map(|entry| entry.event).collect(),
                ));
            }
            // Riddles never change after creation.
            StoreTable::Riddle => return Ok(false),
        }
        Ok(true)
    }
}
