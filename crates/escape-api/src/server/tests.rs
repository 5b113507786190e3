use super::*;

fn app_state() -> AppState {
    AppState::new(shared_store(
        SqliteSessionStore::open_in_memory().expect("store"),
    ))
}

fn create_request(session_id: &str) -> CreateSessionRequest {
    let mut config = SessionConfig::default().instant();
    config.session_id = session_id.to_string();
    serde_json::from_value(json!({
        "config": config,
        "players": [
            { "name": "Ana", "role": "pilot" },
            { "name": "Bea", "role": "engineer" },
        ],
    }))
    .expect("request")
}

fn roll(session_id: &str, player_id: &str) -> Intent {
    Intent::new(
        format!("roll_{player_id}"),
        session_id,
        Some(player_id.to_string()),
        IntentPayload::RollDice,
    )
}

#[tokio::test]
async fn created_session_accepts_intents_for_the_current_player() {
    let state = app_state();
    let Json(created) = create_session(State(state.clone()), Json(create_request("srv_1")))
        .await
        .expect("create");
    assert_eq!(created.session_id, "srv_1");
    assert_eq!(created.snapshot.current_player_id.as_deref(), Some("player_01"));

    let (status, Json(rejected)) = submit_intent(
        Path("srv_1".to_string()),
        State(state.clone()),
        Json(roll("srv_1", "player_02")),
    )
    .await
    .expect("submit");
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(!rejected.accepted);

    let (status, Json(accepted)) = submit_intent(
        Path("srv_1".to_string()),
        State(state.clone()),
        Json(roll("srv_1", "player_01")),
    )
    .await
    .expect("submit");
    assert_eq!(status, StatusCode::OK);
    assert!(accepted.accepted);
}

#[tokio::test]
async fn intent_path_and_body_must_agree() {
    let state = app_state();
    create_session(State(state.clone()), Json(create_request("srv_2")))
        .await
        .expect("create");

    let err = submit_intent(
        Path("srv_2".to_string()),
        State(state),
        Json(roll("other", "player_01")),
    )
    .await
    .expect_err("mismatch");

    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.error.error_code, ErrorCode::InvalidIntent);
}

#[tokio::test]
async fn duplicate_session_ids_conflict() {
    let state = app_state();
    create_session(State(state.clone()), Json(create_request("srv_3")))
        .await
        .expect("create");

    let err = create_session(State(state), Json(create_request("srv_3")))
        .await
        .expect_err("duplicate");

    assert_eq!(err.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn deleted_sessions_are_no_longer_hosted() {
    let state = app_state();
    create_session(State(state.clone()), Json(create_request("srv_4")))
        .await
        .expect("create");

    let Json(deleted) = delete_session(Path("srv_4".to_string()), State(state.clone()))
        .await
        .expect("delete");
    assert!(deleted.result.accepted);

    let err = get_snapshot(Path("srv_4".to_string()), State(state.clone()))
        .await
        .expect_err("gone");
    assert_eq!(err.status, StatusCode::NOT_FOUND);

    let Json(listed) = list_sessions(State(state)).await.expect("list");
    assert!(listed.hosted.is_empty());
    assert!(listed.stored.is_empty());
}

#[tokio::test]
async fn generated_ids_are_used_without_a_config() {
    let state = app_state();
    let request: CreateSessionRequest = serde_json::from_value(json!({
        "players": [{ "name": "Ana", "role": "pilot" }],
        "bots": 1,
    }))
    .expect("request");

    let Json(created) = create_session(State(state), Json(request))
        .await
        .expect("create");

    assert_eq!(created.session_id, "session_000001");
    assert_eq!(created.snapshot.players.len(), 2);
    assert!(created.snapshot.players[1].is_autonomous());
}

#[test]
fn rosters_reject_taken_roles() {
    let request: CreateSessionRequest = serde_json::from_value(json!({
        "players": [
            { "name": "Ana", "role": "pilot" },
            { "name": "Bea", "role": "pilot" },
        ],
    }))
    .expect("request");

    assert_eq!(request.roster(), Err(RosterError::RoleTaken(Role::Pilot)));
}

#[test]
fn ticks_publish_snapshots_only_when_something_fired() {
    let mut inner = ServerInner::default();
    let store = shared_store(SqliteSessionStore::open_in_memory().expect("store"));
    let mut roster = Roster::new();
    roster.join("Ana", Role::Pilot).expect("join");
    let mut config = SessionConfig::default();
    config.session_id = "srv_tick".to_string();
    let api = GameApi::host(store, config, roster, Authority::All).expect("host");
    inner.sessions.insert("srv_tick".to_string(), api);

    // The first tick merges the host's own opening writes back from the feed.
    inner.tick(0);
    assert!(inner.tick(0).is_empty());

    let messages = inner.tick(1_000);
    assert!(messages
        .iter()
        .any(|message| message.message_type == "session.snapshot"
            && message.session_id == "srv_tick"));
}

#[test]
fn error_codes_map_to_http_statuses() {
    assert_eq!(status_for(ErrorCode::InvalidTurn), StatusCode::CONFLICT);
    assert_eq!(status_for(ErrorCode::SessionNotFound), StatusCode::NOT_FOUND);
    assert_eq!(
        status_for(ErrorCode::StoreUnavailable),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
        status_for(ErrorCode::ContractVersionUnsupported),
        StatusCode::BAD_REQUEST
    );
}

#[test]
fn stream_relay_filters_by_session_and_reports_lag() {
    let change = StreamMessage::warning("srv_a", "store unavailable".to_string());

    assert!(matches!(
        Relay::for_session("srv_a", Ok(change.clone())),
        Relay::Send(message) if message.message_type == "warning"
    ));
    assert!(matches!(Relay::for_session("srv_b", Ok(change)), Relay::Skip));
    assert!(matches!(
        Relay::for_session("srv_a", Err(broadcast::error::RecvError::Closed)),
        Relay::Close
    ));

    let Relay::Send(lagged) =
        Relay::for_session("srv_a", Err(broadcast::error::RecvError::Lagged(7)))
    else {
        panic!("lag is reported to the client");
    };
    assert_eq!(lagged.session_id, "srv_a");
    assert_eq!(lagged.payload["skipped"], 7);
}
