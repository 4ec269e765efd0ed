//! # Tris
//!
//! A two-player tic-tac-toe session played across independent processes on one machine, with
//! no network stack.
//!
//! It provides:
//! - A session coordinator (`tris-server`) that admits two players, relays turns and
//!   decides the result ([`Coordinator`](crate::coordinator::Coordinator))
//! - Player agents (`tris-client`) driven by a human at a terminal or by the built-in
//!   move selector ([`PlayerAgent`](crate::player_agent::PlayerAgent))
//! - A minimax opponent that never loses ([`move_selector`])
//!
//! Processes share the game state through a System V shared memory segment
//! ([`shared_state`]) and hand off turns through a set of six System V semaphores
//! ([`semaphores`]). Quits, move timeouts and the end of the game travel as signals
//! ([`notifier`]), outside of the turn cycle.
//!
//! # Documentation Overview
//!
//! - For the turn protocol seen from the server, see the [`coordinator`] module.
//! - For the agent state machine, quit confirmation and move deadline, see [`player_agent`].
//! - For the environment variables and session settings, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - To plug another move source into an agent, implement
//!   [`MoveSource`](crate::move_source::MoveSource).
//!
//! # Usage Example
//!
//! ```no_run
//! use tris::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     // 30s per move, player one plays 'X', player two 'O'
//!     let settings = SessionSettings::new(30, ['X', 'O']);
//!     let config = Configuration::from_env()?;
//!
//!     let outcome = Coordinator::new(config, settings)?.run()?;
//!     print!("{}", outcome.board.display(outcome.symbols));
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```
//!
//! An agent joining the same session from another process:
//!
//! ```no_run
//! use tris::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::from_env()?;
//!     let agent = PlayerAgent::new(config, "alice", JoinMode::Human, TerminalInput::stdin())?;
//!     let outcome = agent.run()?;
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

#[cfg(not(target_os = "linux"))]
compile_error!("tris relies on System V IPC and Linux signals, only Linux is supported");

pub use anyhow;
pub mod ai_process;
pub mod configuration;
pub mod coordinator;
pub mod error;
pub mod game;
pub mod logger;
pub mod move_selector;
pub mod move_source;
pub mod notifier;
pub mod player_agent;
pub mod semaphores;
pub mod session;
pub mod shared_state;
pub mod terminal;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use tris::prelude::*;
/// ```
pub mod prelude {
    pub use crate::configuration::{Configuration, SessionSettings};
    pub use crate::coordinator::{Coordinator, Outcome};
    pub use crate::game::{Board, Difficulty, GameResult, Player, Position};
    pub use crate::move_source::{AutoplayInput, MoveSource, TerminalInput};
    pub use crate::player_agent::{AgentEnd, AgentOutcome, PlayerAgent};
    pub use crate::shared_state::JoinMode;
}
