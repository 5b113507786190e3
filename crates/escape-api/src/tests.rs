use super::*;
use contracts::{EngineState, GameEventKind, Role};

fn config(session_id: &str) -> SessionConfig {
    let mut config = SessionConfig::default().instant();
    config.session_id = session_id.to_string();
    config
}

fn crew() -> Roster {
    let mut roster = Roster::new();
    roster.join("Ana", Role::Pilot).expect("join");
    roster.join("Bea", Role::Engineer).expect("join");
    roster
}

fn controls(player_id: &str) -> BTreeSet<String> {
    BTreeSet::from([player_id.to_string()])
}

fn store() -> SharedStore {
    shared_store(SqliteSessionStore::open_in_memory().expect("store"))
}

fn intent(api: &GameApi, player_id: Option<&str>, payload: IntentPayload) -> Intent {
    Intent::new(
        format!("intent_{}", api.audit().len() + 1),
        api.session_id(),
        player_id.map(str::to_string),
        payload,
    )
}

/// Roll for `player_id` and forfeit any challenge it lands on.
fn take_turn(api: &mut GameApi, player_id: &str) -> IntentResult {
    let result = api.submit_intent(intent(api, Some(player_id), IntentPayload::RollDice));
    if api.engine().state() == EngineState::AwaitingChallengeResponse {
        let forfeit = api.submit_intent(intent(api, Some(player_id), IntentPayload::Forfeit));
        assert!(forfeit.accepted, "{forfeit:?}");
    }
    result
}

fn host_and_joiner(session_id: &str, session_config: SessionConfig) -> (SharedStore, GameApi, GameApi) {
    let store = store();
    let host = GameApi::host(
        store.clone(),
        session_config,
        crew(),
        Authority::Partial {
            players: controls("player_01"),
            clock: true,
        },
    )
    .expect("host");
    let joiner = GameApi::join(store.clone(), session_id, controls("player_02")).expect("join");
    (store, host, joiner)
}

fn error_code(result: &IntentResult) -> Option<ErrorCode> {
    result.error.as_ref().map(|error| error.error_code)
}

#[test]
fn local_roll_is_accepted_and_audited() {
    let mut api = GameApi::local(config("local_1"), Roster::local("Ana", Role::Pilot).expect("roster"))
        .expect("api");

    let result = take_turn(&mut api, "human");

    assert!(result.accepted);
    assert_eq!(result.session_id, "local_1");
    assert!(!api.is_multiplayer());
    assert!(!api.audit().is_empty());
    assert!(api
        .snapshot()
        .events
        .iter()
        .any(|event| event.kind == GameEventKind::DiceRolled
            && event.player_id.as_deref() == Some("human")));
}

#[test]
fn malformed_intents_are_rejected_with_error_codes() {
    let mut api = GameApi::local(config("local_2"), Roster::local("Ana", Role::Pilot).expect("roster"))
        .expect("api");

    let wrong_session = api.submit_intent(Intent::new(
        "i1",
        "elsewhere",
        Some("human".to_string()),
        IntentPayload::RollDice,
    ));
    assert_eq!(error_code(&wrong_session), Some(ErrorCode::SessionNotFound));

    let mut future = intent(&api, Some("human"), IntentPayload::RollDice);
    future.schema_version = "2.0".to_string();
    let future = api.submit_intent(future);
    assert_eq!(error_code(&future), Some(ErrorCode::ContractVersionUnsupported));

    let anonymous = api.submit_intent(intent(&api, None, IntentPayload::RollDice));
    assert_eq!(error_code(&anonymous), Some(ErrorCode::InvalidIntent));

    let ghost = api.submit_intent(intent(&api, Some("ghost"), IntentPayload::RollDice));
    assert_eq!(error_code(&ghost), Some(ErrorCode::InvalidIntent));

    let out_of_turn = api.submit_intent(intent(&api, Some("bot"), IntentPayload::RollDice));
    assert_eq!(error_code(&out_of_turn), Some(ErrorCode::InvalidTurn));

    let no_challenge = api.submit_intent(intent(&api, Some("human"), IntentPayload::Forfeit));
    assert_eq!(error_code(&no_challenge), Some(ErrorCode::InvalidTurn));

    let delete = api.submit_intent(intent(&api, None, IntentPayload::DeleteAllData));
    assert_eq!(error_code(&delete), Some(ErrorCode::InvalidIntent));

    assert_eq!(api.audit().len(), 7);
    assert!(api.audit().iter().all(|result| !result.accepted));
    assert_eq!(api.engine().session().turn_index(), 0);
}

#[test]
fn restart_needs_no_player() {
    let mut api = GameApi::local(config("local_3"), Roster::local("Ana", Role::Pilot).expect("roster"))
        .expect("api");
    take_turn(&mut api, "human");

    let result = api.submit_intent(intent(&api, None, IntentPayload::Restart));

    assert!(result.accepted);
    let snapshot = api.snapshot();
    assert!(snapshot.players.iter().all(|player| player.position == 1));
    assert_eq!(snapshot.events[0].kind, GameEventKind::SessionRestarted);
}

#[test]
fn joiner_sees_host_moves_and_host_sees_joiner_moves() {
    let (_store, mut host, mut joiner) = host_and_joiner("sync_1", config("sync_1"));

    assert!(take_turn(&mut host, "player_01").accepted);
    joiner.pump_notifications().expect("pump");
    assert_eq!(joiner.snapshot().players, host.snapshot().players);
    assert_eq!(joiner.engine().session().turn_index(), 1);

    let rejected = joiner.submit_intent(intent(&joiner, Some("player_01"), IntentPayload::RollDice));
    assert_eq!(error_code(&rejected), Some(ErrorCode::InvalidTurn));

    assert!(take_turn(&mut joiner, "player_02").accepted);
    host.pump_notifications().expect("pump");

    assert_eq!(host.snapshot().players, joiner.snapshot().players);
    assert_eq!(host.engine().session().turn_index(), 0);
    assert!(host.snapshot().events.iter().any(|event| {
        event.kind == GameEventKind::DiceRolled && event.player_id.as_deref() == Some("player_02")
    }));
}

#[test]
fn merged_changes_are_not_written_back() {
    let (store, mut host, mut joiner) = host_and_joiner("sync_2", config("sync_2"));
    take_turn(&mut host, "player_01");
    let history_len = store
        .lock()
        .expect("lock")
        .load_history("sync_2", 0)
        .expect("history")
        .len();

    joiner.pump_notifications().expect("pump");
    joiner.flush().expect("flush");

    assert!(!joiner.has_pending_writes());
    let after = store
        .lock()
        .expect("lock")
        .load_history("sync_2", 0)
        .expect("history")
        .len();
    assert_eq!(after, history_len);
}

#[test]
fn remote_merge_waits_for_the_local_roll() {
    let mut slow = config("sync_3");
    slow.step_delay_ms = 300;
    let (_store, mut host, mut joiner) = host_and_joiner("sync_3", slow);

    host.submit_intent(intent(&host, Some("player_01"), IntentPayload::RollDice));
    host.advance(2_000);
    if host.engine().state() == EngineState::AwaitingChallengeResponse {
        host.submit_intent(intent(&host, Some("player_01"), IntentPayload::Forfeit));
    }
    joiner.pump_notifications().expect("pump");
    assert_eq!(joiner.snapshot().countdown_seconds, 298);

    let roll = joiner.submit_intent(intent(&joiner, Some("player_02"), IntentPayload::RollDice));
    assert!(roll.accepted, "{roll:?}");
    assert!(joiner.engine().is_rolling());

    host.advance(1_000);
    assert_eq!(host.snapshot().countdown_seconds, 297);

    assert_eq!(joiner.pump_notifications().expect("pump"), 0);
    assert_eq!(joiner.snapshot().countdown_seconds, 298);

    joiner.advance(2_000);
    assert!(!joiner.engine().is_rolling());
    assert!(joiner.pump_notifications().expect("pump") > 0);
    assert_eq!(joiner.snapshot().countdown_seconds, 297);
}

#[test]
fn failed_writes_stay_queued_until_the_store_recovers() {
    let store = store();
    let mut roster = Roster::new();
    roster.join("Ana", Role::Pilot).expect("join");
    let mut host = GameApi::host(store.clone(), config("retry_1"), roster, Authority::All)
        .expect("host");
    store
        .lock()
        .expect("lock")
        .drop_table("turn_history")
        .expect("drop");

    let result = host.submit_intent(intent(&host, Some("player_01"), IntentPayload::RollDice));

    assert!(result.accepted);
    assert!(host.has_pending_writes());
    assert_eq!(
        host.last_store_error().map(|error| error.error_code),
        Some(ErrorCode::StoreUnavailable)
    );

    store.lock().expect("lock").remigrate().expect("remigrate");
    host.flush().expect("flush");

    assert!(!host.has_pending_writes());
    assert!(host.last_store_error().is_none());
    let history = store
        .lock()
        .expect("lock")
        .load_history("retry_1", 0)
        .expect("history");
    assert!(history
        .iter()
        .any(|entry| entry.event.kind == GameEventKind::DiceRolled));
}

#[test]
fn delete_all_data_detaches_every_client() {
    let (store, mut host, mut joiner) = host_and_joiner("delete_1", config("delete_1"));

    let result = host.submit_intent(intent(&host, None, IntentPayload::DeleteAllData));

    assert!(result.accepted, "{result:?}");
    assert!(host.is_detached());
    assert!(!store
        .lock()
        .expect("lock")
        .session_exists("delete_1")
        .expect("exists"));
    assert_eq!(host.advance(5_000), 0);

    joiner.pump_notifications().expect("pump");
    assert!(joiner.is_detached());
    let late = joiner.submit_intent(intent(&joiner, Some("player_02"), IntentPayload::RollDice));
    assert_eq!(error_code(&late), Some(ErrorCode::SessionNotFound));
}

#[test]
fn joining_an_unknown_session_fails() {
    let err = GameApi::join(store(), "nowhere", controls("player_01")).expect_err("missing");

    assert!(matches!(err, ApiFailure::SessionNotFound(_)));
    assert_eq!(err.to_api_error().error_code, ErrorCode::SessionNotFound);
}

#[test]
fn stale_claims_map_to_invalid_turn() {
    let err = ApiFailure::from(PersistenceError::StaleTurn {
        session_id: "s".to_string(),
        turn_index: 0,
        turn_version: 3,
    });

    assert_eq!(err.to_api_error().error_code, ErrorCode::InvalidTurn);
}

#[test]
fn restart_from_a_joiner_resets_the_shared_clock_and_log() {
    let (store, mut host, mut joiner) = host_and_joiner("restart_1", config("restart_1"));
    take_turn(&mut host, "player_01");
    host.advance(10_000);
    joiner.pump_notifications().expect("pump");
    assert_eq!(joiner.snapshot().countdown_seconds, 290);

    let result = joiner.submit_intent(intent(&joiner, None, IntentPayload::Restart));

    assert!(result.accepted, "{result:?}");
    let stored = store
        .lock()
        .expect("lock")
        .load_session("restart_1")
        .expect("load")
        .expect("session");
    assert_eq!(stored.countdown_seconds, 300);
    assert_eq!(stored.turn_index, 0);

    host.pump_notifications().expect("pump");
    let snapshot = host.snapshot();
    assert_eq!(snapshot.countdown_seconds, 300);
    assert!(snapshot.players.iter().all(|player| player.position == 1));
    let kinds: Vec<GameEventKind> = snapshot.events.iter().map(|event| event.kind).collect();
    assert_eq!(kinds, vec![GameEventKind::SessionRestarted]);

    host.advance(1_000);
    assert_eq!(host.snapshot().countdown_seconds, 299);
    joiner.pump_notifications().expect("pump");
    assert_eq!(joiner.snapshot().countdown_seconds, 299);
}

#[test]
fn only_one_client_claims_a_contested_turn() {
    let (store, mut host, _joiner) = host_and_joiner("claim_1", config("claim_1"));
    let mut twin = GameApi::join(store.clone(), "claim_1", controls("player_01")).expect("join");
    let before = store
        .lock()
        .expect("lock")
        .load_session("claim_1")
        .expect("load")
        .expect("session")
        .turn_version;

    host.engine.check_roll("player_01").expect("host may roll");
    twin.engine.check_roll("player_01").expect("twin may roll");

    host.claim_turn().expect("first claim wins");
    let lost = twin.claim_turn().expect_err("second claim is stale");

    assert_eq!(lost.error_code, ErrorCode::InvalidTurn);
    assert_eq!(twin.engine().state(), EngineState::Idle);
    assert_eq!(twin.engine().session().turn_index(), 0);
    assert!(twin
        .engine()
        .session()
        .players()
        .iter()
        .all(|player| player.position == 1));
    assert!(!twin.has_pending_writes());

    let guard = store.lock().expect("lock");
    let stored = guard
        .load_session("claim_1")
        .expect("load")
        .expect("session");
    assert_eq!(stored.turn_version, before + 1);
    assert_eq!(stored.turn_index, 0);
    assert!(guard
        .load_players("claim_1")
        .expect("players")
        .iter()
        .all(|player| player.position == 1));
}
