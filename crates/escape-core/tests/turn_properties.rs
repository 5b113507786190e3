use contracts::{CellKind, EngineState, GameEventKind, PlayerState, Role, SessionConfig};
use escape_core::{
    Board, EngineError, GameSession, Resolution, Roster, ScriptedDice, ScriptedPolicy,
    TurnEngine, TurnRejection,
};
use proptest::prelude::*;

fn instant_config() -> SessionConfig {
    SessionConfig::default().instant()
}

fn humans(count: usize) -> Vec<PlayerState> {
    let mut roster = Roster::new();
    for (seat, role) in Role::SELECTABLE.iter().take(count).enumerate() {
        roster
            .join(&format!("Crew {seat}"), *role)
            .expect("join");
    }
    roster.into_players()
}

fn engine(players: Vec<PlayerState>, faces: Vec<u8>) -> TurnEngine {
    let session = GameSession::from_players(instant_config(), players).expect("session");
    let mut engine = TurnEngine::new(
        session,
        Board::standard(),
        Box::new(ScriptedPolicy::new(1_000, 0)),
        Box::new(ScriptedDice::new(faces)),
    );
    engine.start();
    engine
}

fn solo_at(position: u8, die: u8) -> TurnEngine {
    let mut players = humans(1);
    players[0].position = position;
    engine(players, vec![die])
}

#[test]
fn scenario_full_local_game_with_random_policy_terminates() {
    let roster = Roster::local("Ana", Role::Pilot).expect("roster");
    let mut config = instant_config();
    config.seed = 7;
    let mut engine = TurnEngine::local(config, roster).expect("engine");

    for _ in 0..2_000 {
        match engine.state() {
            EngineState::Complete => break,
            EngineState::Idle if engine.session().turn_index() == 0 => {
                engine.roll("human").expect("human roll");
            }
            EngineState::AwaitingChallengeResponse
                if engine
                    .session()
                    .active_challenge()
                    .is_some_and(|challenge| challenge.player_id == "human") =>
            {
                engine.forfeit("human").expect("forfeit");
            }
            _ => {
                engine.advance(500);
            }
        }
    }

    assert_eq!(engine.state(), EngineState::Complete);
    let kinds: Vec<GameEventKind> = engine.session().events().map(|event| event.kind).collect();
    assert!(
        kinds.contains(&GameEventKind::RepairCompleted)
            || kinds.contains(&GameEventKind::CountdownExpired)
    );
}

#[test]
fn scenario_snapshot_hides_the_expected_answer() {
    let mut engine = solo_at(13, 2);
    engine.roll("player_01").expect("roll");

    let snapshot = serde_json::to_string(&engine.snapshot()).expect("json");

    assert!(snapshot.contains("Planeta Rojo"));
    assert!(!snapshot.contains("Marte"));
}

proptest! {
    #[test]
    fn property_roll_resolves_by_exactly_one_cell_rule(position in 1_u8..60, die in 1_u8..=6) {
        let mut engine = solo_at(position, die);
        let board = Board::standard();

        let accepted = engine.roll("player_01").expect("roll");
        let target = (position + die).min(60);
        prop_assert_eq!(accepted.target, target);

        let player = engine.session().player("player_01").expect("player").clone();
        match board.classify(target) {
            CellKind::Finish => {
                prop_assert_eq!(player.position, 60);
                prop_assert_eq!(engine.state(), EngineState::Idle);
                prop_assert!(engine.session().integrity().is_repairing());
            }
            CellKind::Hazard => {
                prop_assert_eq!(player.position, target.saturating_sub(2).max(1));
                prop_assert_eq!(engine.state(), EngineState::Idle);
            }
            CellKind::Challenge => {
                prop_assert_eq!(player.pending_position, Some(target));
                prop_assert_eq!(engine.state(), EngineState::AwaitingChallengeResponse);
            }
            CellKind::Neutral => {
                prop_assert_eq!(player.position, target);
                prop_assert_eq!(engine.state(), EngineState::Idle);
            }
        }
        prop_assert!((1..=60).contains(&player.position));
    }

    #[test]
    fn property_challenge_penalty_ignores_the_pending_cell(
        cell in prop::sample::select(vec![4_u8, 7, 10, 15, 19, 24, 28, 33, 38, 42, 47, 53, 57]),
        die in 1_u8..=6,
        forfeit in any::<bool>(),
    ) {
        prop_assume!(cell > die);
        let origin = cell - die;
        let mut engine = solo_at(origin, die);
        engine.roll("player_01").expect("roll");
        prop_assume!(engine.state() == EngineState::AwaitingChallengeResponse);

        let outcome = if forfeit {
            engine.forfeit("player_01").expect("forfeit")
        } else {
            engine.submit_answer("player_01", "no sé").expect("answer")
        };

        prop_assert_eq!(outcome.position, origin.saturating_sub(2).max(1));
        prop_assert!(matches!(outcome.resolution, Resolution::Forfeited | Resolution::Incorrect));
        prop_assert_eq!(
            engine.forfeit("player_01"),
            Err(EngineError::InvalidTurn(TurnRejection::NoActiveChallenge))
        );
    }

    #[test]
    fn property_correct_answer_jumps_from_the_pending_cell(
        cell in prop::sample::select(vec![4_u8, 7, 10, 15, 19, 24, 28, 33, 38, 42, 47, 53, 57]),
    ) {
        let mut engine = solo_at(cell - 1, 1);
        engine.roll("player_01").expect("roll");
        let answer = engine
            .board()
            .riddle_at(cell)
            .map(|riddle| riddle.answer.to_uppercase())
            .expect("riddle");

        let outcome = engine.submit_answer("player_01", &answer).expect("answer");

        prop_assert_eq!(outcome.resolution, Resolution::Correct);
        prop_assert_eq!(outcome.position, (cell + 2).min(60));
    }

    #[test]
    fn property_turn_pointer_visits_every_seat_in_order(
        seats in 1_usize..=6,
        faces in prop::collection::vec(1_u8..=6, 1..8),
        rounds in 1_usize..4,
    ) {
        let mut engine = engine(humans(seats), faces);
        let ids: Vec<String> = engine
            .session()
            .players()
            .iter()
            .map(|player| player.player_id.clone())
            .collect();

        for resolution in 0..seats * rounds {
            if engine.state() != EngineState::Idle {
                break;
            }
            prop_assert_eq!(engine.session().turn_index(), resolution % seats);
            let player_id = &ids[resolution % seats];
            engine.roll(player_id).expect("roll");
            if engine.state() == EngineState::AwaitingChallengeResponse {
                engine.forfeit(player_id).expect("forfeit");
            }
            prop_assert_eq!(engine.session().turn_index(), (resolution + 1) % seats);
        }
    }

    #[test]
    fn property_integrity_stays_clamped_over_time(elapsed in prop::collection::vec(0_u64..5_000, 1..40)) {
        let mut engine = solo_at(1, 1);
        for step in elapsed {
            engine.advance(step);
            let level = engine.session().integrity().level();
            prop_assert!((0.0..=100.0).contains(&level));
        }
    }
}
