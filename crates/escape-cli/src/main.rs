use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use contracts::{
    EngineState, GameEventKind, Intent, IntentPayload, Role, SessionConfig, SessionSnapshot,
};
use escape_api::{serve, GameApi};
use escape_core::{Roster, TurnEngine};
use rayon::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::prelude::*;

const PLAY_TICK_MS: u64 = 50;
/// Hard stop for one simulated game, in virtual milliseconds.
const SIMULATION_LIMIT_MS: u64 = 3_600_000;

/// Galactic Escape: race across the board and repair the ship before time runs out
#[derive(Parser, Debug)]
#[command(name = "escape", about = "Galactic Escape board game", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a local game against BOT-01 in the terminal
    Play {
        #[arg(long, default_value = "Player")]
        name: String,
        /// One of pilot, engineer, medic, scientist, navigator, commander, observer
        #[arg(long, default_value = "pilot")]
        role: String,
        /// JSON file with session settings
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run bot-only games in parallel and report how often the crew escapes
    Simulate {
        #[arg(long, default_value_t = 100)]
        games: usize,
        #[arg(long, default_value_t = 2)]
        bots: usize,
        #[arg(long, default_value_t = 1337)]
        seed: u64,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Serve the multiplayer HTTP and websocket API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
        /// SQLite file; defaults to ESCAPE_SQLITE_PATH
        #[arg(long)]
        sqlite: Option<String>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<SessionConfig, String> {
    let Some(path) = path else {
        return Ok(SessionConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| format!("invalid config {}: {err}", path.display()))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,escape_api=info,escape_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Play { name, role, config } => play(&name, &role, config.as_ref()).await,
        Command::Simulate {
            games,
            bots,
            seed,
            config,
        } => simulate(games, bots, seed, config.as_ref()),
        Command::Serve { addr, sqlite } => {
            println!("serving api on http://{addr}");
            tracing::info!(%addr, sqlite = sqlite.as_deref().unwrap_or("(default)"), "starting server");
            serve(addr, sqlite).await.map_err(|err| {
                tracing::error!(%addr, error = %err, "server stopped");
                format!("server error: {err}")
            })
        }
    };

    if let Err(err) = outcome {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn play(name: &str, role: &str, config: Option<&PathBuf>) -> Result<(), String> {
    let role = Role::parse(role)
        .filter(|role| *role != Role::Bot)
        .ok_or_else(|| format!("unknown role: {role}"))?;
    let config = load_config(config)?;
    let roster = Roster::local(name, role).map_err(|err| err.to_string())?;
    let mut api = GameApi::local(config, roster).map_err(|err| err.to_string())?;

    print_help();
    let mut printed = 0;
    printed = print_new_events(&api.snapshot(), printed);
    print_status(&api.snapshot());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(PLAY_TICK_MS));
    let mut intents = 0_u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if api.advance(PLAY_TICK_MS) > 0 {
                    let snapshot = api.snapshot();
                    let before = printed;
                    printed = print_new_events(&snapshot, printed);
                    if printed != before {
                        print_status(&snapshot);
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.map_err(|err| err.to_string())? else {
                    return Ok(());
                };
                let Some(payload) = parse_command(&line, api.engine().state()) else {
                    if matches!(line.trim(), "q" | "quit") {
                        return Ok(());
                    }
                    print_help();
                    continue;
                };
                intents += 1;
                let intent = Intent::new(
                    format!("cli_{intents}"),
                    api.session_id(),
                    Some("human".to_string()),
                    payload,
                );
                let result = api.submit_intent(intent);
                if let Some(error) = result.error {
                    println!("  ! {}", error.message);
                }
                let snapshot = api.snapshot();
                printed = print_new_events(&snapshot, printed);
                print_status(&snapshot);
            }
        }
    }
}

/// Map one input line to an intent. While a challenge is open, free text is an answer.
fn parse_command(line: &str, state: EngineState) -> Option<IntentPayload> {
    let line = line.trim();
    match line {
        "" | "q" | "quit" | "h" | "help" => None,
        "r" | "roll" => Some(IntentPayload::RollDice),
        "f" | "forfeit" => Some(IntentPayload::Forfeit),
        "restart" => Some(IntentPayload::Restart),
        answer if state == EngineState::AwaitingChallengeResponse => {
            Some(IntentPayload::SubmitAnswer {
                answer: answer.trim_start_matches("a ").to_string(),
            })
        }
        _ => None,
    }
}

fn print_help() {
    println!("commands: r(oll), f(orfeit), restart, q(uit); type your answer when a riddle is open");
}

/// Print events newer than the `printed` count (by sequence) oldest first; returns the new count.
fn print_new_events(snapshot: &SessionSnapshot, printed: u64) -> u64 {
    let mut fresh: Vec<_> = snapshot
        .events
        .iter()
        .filter(|event| event.sequence >= printed)
        .collect();
    fresh.sort_by_key(|event| event.sequence);
    for event in &fresh {
        println!("  [{:>6.1}s] {}", event.at_ms as f64 / 1000.0, event.message);
    }
    fresh.last().map_or(printed, |event| event.sequence + 1)
}

fn print_status(snapshot: &SessionSnapshot) {
    let players = snapshot
        .players
        .iter()
        .map(|player| format!("{}@{}", player.name, player.position))
        .collect::<Vec<_>>()
        .join("  ");
    println!(
        "{} | ship {:.1}%{} | {}s left | {}",
        players,
        snapshot.integrity,
        if snapshot.repairing { " (repairing)" } else { "" },
        snapshot.countdown_seconds,
        snapshot.engine_state,
    );
    if let Some(challenge) = &snapshot.active_challenge {
        println!(
            "  riddle on cell {} ({:.1}s): {}",
            challenge.cell,
            challenge.remaining_ms as f64 / 1000.0,
            challenge.question
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SimulationTotals {
    games: usize,
    escaped: usize,
    rolls: usize,
    virtual_ms: u64,
}

impl SimulationTotals {
    fn merge(self, other: Self) -> Self {
        Self {
            games: self.games + other.games,
            escaped: self.escaped + other.escaped,
            rolls: self.rolls + other.rolls,
            virtual_ms: self.virtual_ms + other.virtual_ms,
        }
    }
}

fn simulate(
    games: usize,
    bots: usize,
    seed: u64,
    config: Option<&PathBuf>,
) -> Result<(), String> {
    let base = load_config(config)
        .inspect_err(|err| tracing::warn!(error = %err, "simulation config rejected"))?;
    let bots = bots.max(1);

    let totals = (0..games)
        .into_par_iter()
        .map(|game| {
            let mut config = base.clone();
            config.seed = seed.wrapping_add(game as u64);
            config.session_id = format!("sim_{game:05}");
            simulate_game(config, bots)
        })
        .try_reduce(SimulationTotals::default, |left, right| Ok(left.merge(right)))
        .inspect_err(|err| tracing::warn!(games, seed, error = %err, "simulation aborted"))?;
    tracing::info!(
        games = totals.games,
        escaped = totals.escaped,
        rolls = totals.rolls,
        "simulation finished"
    );

    let played = totals.games.max(1) as f64;
    println!(
        "games={} escaped={} lost={} avg_rolls={:.1} avg_seconds={:.1}",
        totals.games,
        totals.escaped,
        totals.games - totals.escaped,
        totals.rolls as f64 / played,
        totals.virtual_ms as f64 / played / 1000.0,
    );
    Ok(())
}

fn simulate_game(config: SessionConfig, bots: usize) -> Result<SimulationTotals, String> {
    let mut roster = Roster::new();
    for bot in 0..bots {
        roster
            .add_autonomous(&format!("BOT-{:02}", bot + 1))
            .map_err(|err| err.to_string())?;
    }
    let mut engine = TurnEngine::local(config, roster).map_err(|err| err.to_string())?;

    let mut totals = SimulationTotals {
        games: 1,
        ..SimulationTotals::default()
    };
    loop {
        let changes = engine.take_changes();
        for event in &changes.events {
            match event.kind {
                GameEventKind::DiceRolled => totals.rolls += 1,
                GameEventKind::RepairCompleted => totals.escaped = 1,
                _ => {}
            }
        }
        if engine.state() == EngineState::Complete || engine.clock_ms() >= SIMULATION_LIMIT_MS {
            break;
        }
        let Some(due) = engine.next_due_ms() else {
            break;
        };
        engine.advance(due.saturating_sub(engine.clock_ms()));
    }
    totals.virtual_ms = engine.clock_ms();
    Ok(totals)
}
