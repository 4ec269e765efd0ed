use std::process::ExitCode;

use clap::Parser;

use tris::configuration::{Configuration, SessionSettings};
use tris::coordinator::Coordinator;
use tris::game::Player;
use tris::{logger, terminal};

/// Session coordinator of a two-player tris game.
///
/// Environment: TRIS_VERBOSE, TRIS_LOG, TRIS_IPC_KEY, TRIS_POLL_MS, TRIS_TEARDOWN_GRACE_MS.
#[derive(Parser, Debug)]
#[command(name = "tris-server", version)]
struct Cli {
    /// Seconds allowed for each move, 0 for no limit
    timeout_seconds: u32,

    /// Symbol of player one
    symbol_one: char,

    /// Symbol of player two
    symbol_two: char,

    /// Let player two move first
    #[arg(long)]
    second_starts: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tris-server: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Configuration::from_env()?;
    if config.log() {
        logger::init_logger("server")?;
    }
    terminal::setup_panic_hook();

    let starting = if cli.second_starts {
        Player::Two
    } else {
        Player::One
    };
    let settings = SessionSettings::new(cli.timeout_seconds, [cli.symbol_one, cli.symbol_two])
        .with_starting_player(starting);

    let outcome = Coordinator::new(config, settings)?.run()?;
    println!();
    print!("{}", outcome.board.display(outcome.symbols));
    println!("Result: {outcome}");
    Ok(())
}
