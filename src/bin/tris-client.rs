use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use tris::configuration::Configuration;
use tris::game::Difficulty;
use tris::move_source::TerminalInput;
use tris::player_agent::{AgentOutcome, PlayerAgent};
use tris::shared_state::JoinMode;
use tris::{logger, terminal};

/// Player agent of a two-player tris game.
///
/// Moves are typed as `<row> <col>`, both between 1 and 3. Interrupt twice to quit.
#[derive(Parser, Debug)]
#[command(name = "tris-client", version)]
struct Cli {
    /// Name shown to the other participants
    username: String,

    /// Play against the computer: '*' (hard), 'easy', 'medium' or 'hard'
    difficulty: Option<Difficulty>,

    /// Set by the server when it starts the computer opponent
    #[arg(long = "autoplay-peer", hide = true)]
    autoplay_peer: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(outcome) if outcome.is_failure() => {
            eprintln!("tris-client: {outcome}");
            ExitCode::from(2)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tris-client: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<AgentOutcome> {
    let config = Configuration::from_env()?;
    if config.log() {
        logger::init_logger(if cli.autoplay_peer { "computer" } else { "client" })?;
    }
    terminal::setup_panic_hook();

    if cli.autoplay_peer {
        return PlayerAgent::autoplay_peer(config)?.run();
    }

    let mode = match cli.difficulty {
        Some(difficulty) => JoinMode::RequestAutoplay {
            difficulty,
            agent_path: std::env::current_exe().context("could not locate this executable")?,
        },
        None => JoinMode::Human,
    };
    let input = TerminalInput::stdin().with_idle_timeout(config.poll_interval());
    let outcome = PlayerAgent::new(config, cli.username, mode, input)?.run()?;
    if outcome.player.is_some() {
        println!();
        print!("{}", outcome.board.display(outcome.symbols));
        println!("{outcome}");
    }
    Ok(outcome)
}
