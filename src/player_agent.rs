//! Player Agent: joins a session and plays its turns.
//!
//! `Joining -> WaitingOpponent -> WaitingTurn <-> Moving -> Ended`. Every blocking point
//! (the ready gate, the turn-gate, move input) also returns on lifecycle events, so quits,
//! timeouts and the end of the game are handled wherever the agent happens to be.

use std::fmt;

use anyhow::Context;
use tracing::{debug, info, instrument, warn};

use crate::configuration::Configuration;
use crate::error::{JoinRejection, SyncError};
use crate::game::{Board, GameResult, Player};
use crate::move_source::{AutoplayInput, MoveInput, MoveSource};
use crate::notifier::{self, Debounce, LifecycleEvent, MoveDeadline, QuitDebounce};
use crate::semaphores::{Semaphore, Wake};
use crate::session::{process_alive, Session};
use crate::shared_state::{JoinMode, JoinRequest, AI_USERNAME};

/// Agent states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    /// Claiming a slot.
    Joining,
    /// Joined, waiting for the ready broadcast.
    WaitingOpponent,
    /// Blocked on the own turn-gate.
    WaitingTurn,
    /// Owning the turn, reading a move.
    Moving,
    /// Done.
    Ended,
}

/// How the agent's participation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEnd {
    /// The join request was refused; nothing was recorded.
    Rejected(JoinRejection),
    /// The coordinator wrote a result.
    GameOver {
        /// Stored result
        result: GameResult,
        /// Who forfeited, for `Quit`
        forfeited_by: Option<Player>,
    },
    /// This agent quit (interrupt, termination request or end of input).
    Quit,
    /// The move deadline expired; counted as quitting.
    TimedOut,
    /// The coordinator stopped the session.
    ServerQuit,
    /// The session vanished without an end-of-session notification.
    TornDown,
}

/// Report returned by [`PlayerAgent::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutcome {
    /// Slot held, `None` if the agent never joined
    pub player: Option<Player>,
    /// How it ended
    pub end: AgentEnd,
    /// Board as last seen
    pub board: Board,
    /// Symbols of player one and player two
    pub symbols: [char; 2],
}

impl AgentOutcome {
    /// Whether the binary should exit with a failure code.
    pub fn is_failure(&self) -> bool {
        matches!(self.end, AgentEnd::Rejected(_))
    }
}

impl fmt::Display for AgentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.end, self.player) {
            (AgentEnd::Rejected(reason), _) => write!(f, "Could not join: {reason}."),
            (AgentEnd::GameOver { result, forfeited_by }, Some(me)) => match result {
                GameResult::Draw => write!(f, "Draw."),
                GameResult::Quit => match forfeited_by {
                    Some(quitter) if *quitter == me => write!(f, "You quit, you lose."),
                    Some(_) => write!(f, "Your opponent quit, you win by forfeit!"),
                    None => write!(f, "The server stopped the game."),
                },
                result if result.winner() == Some(me) => write!(f, "You win!"),
                result => write!(f, "You lose ({result})."),
            },
            (AgentEnd::GameOver { result, .. }, None) => write!(f, "Game over: {result}."),
            (AgentEnd::Quit, _) => write!(f, "You quit, you lose."),
            (AgentEnd::TimedOut, _) => write!(f, "Time is up, you lose."),
            (AgentEnd::ServerQuit, _) => write!(f, "The server quit."),
            (AgentEnd::TornDown, _) => write!(f, "The session was closed."),
        }
    }
}

/// One participant of the session.
#[derive(Debug)]
pub struct PlayerAgent<S: MoveSource> {
    session: Session,
    source: S,
    username: String,
    mode: JoinMode,
    player: Option<Player>,
    phase: AgentPhase,
    debounce: QuitDebounce,
    moves: u32,
}

impl<S: MoveSource> PlayerAgent<S> {
    /// Attaches to the running session. The slot is claimed by [`PlayerAgent::run`].
    pub fn new(
        config: Configuration,
        username: impl Into<String>,
        mode: JoinMode,
        source: S,
    ) -> anyhow::Result<PlayerAgent<S>> {
        let session = Session::join_agent(config)?;
        Ok(Self::from_session(session, username.into(), mode, source))
    }

    fn from_session(session: Session, username: String, mode: JoinMode, source: S) -> Self {
        PlayerAgent {
            session,
            source,
            username,
            mode,
            player: None,
            phase: AgentPhase::Joining,
            debounce: QuitDebounce::default(),
            moves: 0,
        }
    }

    /// Current state.
    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    /// Joins, plays until the session ends for this agent, and reports how.
    pub fn run(mut self) -> anyhow::Result<AgentOutcome> {
        let end = self.play()?;
        self.phase = AgentPhase::Ended;
        info!(?end, "agent done");
        Ok(AgentOutcome {
            player: self.player,
            end,
            board: self.session.store.board(),
            symbols: self.session.store.symbols(),
        })
    }

    fn verbose(&self) -> bool {
        self.session.config.verbose && self.source.is_interactive()
    }

    fn say(&self, message: impl fmt::Display) {
        if self.verbose() {
            println!("{message}");
        }
    }

    fn play(&mut self) -> anyhow::Result<AgentEnd> {
        let player = match self.join()? {
            Ok(player) => player,
            Err(rejection) => return Ok(AgentEnd::Rejected(rejection)),
        };

        self.phase = AgentPhase::WaitingOpponent;
        self.say("Waiting for the opponent...");
        if let Some(end) = self.wait_gate(Semaphore::WaitForOpponentReady)? {
            return Ok(end);
        }
        self.say("Game started.");

        self.phase = AgentPhase::WaitingTurn;
        loop {
            if let Some(end) = self.wait_gate(Semaphore::turn_gate(player))? {
                return Ok(end);
            }
            if self.session.store.result().is_terminal() {
                return Ok(self.game_over());
            }
            self.phase = AgentPhase::Moving;
            if let Some(end) = self.play_turn(player)? {
                return Ok(end);
            }
            self.phase = AgentPhase::WaitingTurn;
        }
    }

    #[instrument(level = "debug", skip(self), fields(username = %self.username))]
    fn join(&mut self) -> anyhow::Result<Result<Player, JoinRejection>> {
        let request = JoinRequest {
            username: self.username.clone(),
            pid: self.session.pid,
            mode: self.mode.clone(),
        };
        let joined = {
            let guard = self.session.sems.lock()?;
            self.session.store.record_join(&guard, &request)
        };
        let player = match joined {
            Ok(player) => player,
            Err(rejection) => {
                info!(%rejection, "join refused");
                return Ok(Err(rejection));
            }
        };
        self.player = Some(player);
        self.session
            .sems
            .signal(Semaphore::WaitForPlayers, 1)
            .context("could not ring the server")?;

        let symbol = self.session.store.symbols()[player.symbol_index()];
        info!(?player, "joined");
        self.say(format_args!("Joined as {player} with symbol '{symbol}'."));
        if let JoinMode::RequestAutoplay { difficulty, .. } = &self.mode {
            self.say(format_args!("Playing against the computer ({difficulty})."));
        }
        Ok(Ok(player))
    }

    /// Blocks on `gate`. `Some` when the agent's participation ended instead.
    fn wait_gate(&mut self, gate: Semaphore) -> anyhow::Result<Option<AgentEnd>> {
        loop {
            let wake = self
                .session
                .sems
                .wait_or_event(gate, 1, &self.session.notifier)?;
            match wake {
                Wake::Acquired => return Ok(None),
                Wake::Events(events) => {
                    if let Some(end) = self.handle_events(events)? {
                        return Ok(Some(end));
                    }
                }
                Wake::Removed => return Ok(Some(self.torn_down())),
                Wake::Idle if self.coordinator_gone() => return Ok(Some(self.torn_down())),
                Wake::Idle => {}
            }
        }
    }

    fn play_turn(&mut self, player: Player) -> anyhow::Result<Option<AgentEnd>> {
        let board = self.session.store.board();
        if self.verbose() {
            println!();
            print!("{}", board.display(self.session.store.symbols()));
            println!("Your turn.");
        }
        self.source.begin_turn()?;
        let deadline = MoveDeadline::arm(self.session.store.timeout_seconds());
        debug!(armed = deadline.is_armed(), "turn started");

        loop {
            match self
                .source
                .next_move(&board, player, &self.session.notifier)?
            {
                MoveInput::Move(position) => {
                    if let Err(e) = self.session.store.place(position, player) {
                        warn!("source produced an invalid move: {e}");
                        continue;
                    }
                    drop(deadline);
                    self.moves += 1;
                    self.source.end_turn()?;
                    debug!(%position, moves = self.moves, "move written");
                    if self.verbose() {
                        print!(
                            "{}",
                            self.session.store.board().display(self.session.store.symbols())
                        );
                        println!("Waiting for the opponent's move...");
                    }
                    return match self.session.sems.signal(Semaphore::WaitForMove, 1) {
                        Ok(()) => Ok(None),
                        Err(SyncError::Removed) => Ok(Some(self.torn_down())),
                        Err(e) => Err(e.into()),
                    };
                }
                MoveInput::Events(events) => {
                    if let Some(end) = self.handle_events(events)? {
                        return Ok(Some(end));
                    }
                }
                MoveInput::EndOfInput => {
                    info!("input closed");
                    return Ok(Some(self.quit(AgentEnd::Quit)));
                }
                MoveInput::Idle if self.coordinator_gone() => return Ok(Some(self.torn_down())),
                MoveInput::Idle => {}
            }
        }
    }

    fn handle_events(&mut self, events: Vec<LifecycleEvent>) -> anyhow::Result<Option<AgentEnd>> {
        for event in events {
            debug!(?event, phase = ?self.phase, "lifecycle event");
            let end = match event {
                LifecycleEvent::GameEnded => Some(self.game_over()),
                LifecycleEvent::ServerQuit => Some(AgentEnd::ServerQuit),
                LifecycleEvent::MoveTimeout if self.phase == AgentPhase::Moving => {
                    Some(self.quit(AgentEnd::TimedOut))
                }
                LifecycleEvent::Terminate => Some(self.quit(AgentEnd::Quit)),
                LifecycleEvent::Interrupt => match self.debounce.on_interrupt() {
                    Debounce::Armed => {
                        if self.source.is_interactive() {
                            println!();
                            println!("Interrupt again to quit (you will lose).");
                        }
                        None
                    }
                    Debounce::Confirmed => Some(self.quit(AgentEnd::Quit)),
                },
                _ => None,
            };
            if end.is_some() {
                return Ok(end);
            }
        }
        Ok(None)
    }

    /// Frees the slot and tells the coordinator.
    fn quit(&mut self, end: AgentEnd) -> AgentEnd {
        let Some(player) = self.player else {
            return end;
        };
        let coordinator = self.session.store.coordinator_pid();
        match self.session.sems.lock() {
            Ok(guard) => {
                self.session
                    .store
                    .record_quit(&guard, player, self.session.pid);
            }
            Err(SyncError::Removed) => {
                debug!("session already gone, nothing to clear");
                return end;
            }
            Err(e) => warn!("could not clear the slot: {e}"),
        }
        if let Err(e) = notifier::send(coordinator, LifecycleEvent::PlayerQuit(player)) {
            warn!(coordinator, "could not notify the server: {e}");
        }
        info!(?player, ?end, "quit");
        end
    }

    /// A coordinator killed without a chance to clean up leaves the set in place, so its
    /// death is only seen by looking.
    fn coordinator_gone(&self) -> bool {
        let coordinator = self.session.store.coordinator_pid();
        let gone = !process_alive(coordinator);
        if gone {
            warn!(coordinator, "the server is no longer running");
        }
        gone
    }

    fn game_over(&self) -> AgentEnd {
        AgentEnd::GameOver {
            result: self.session.store.result(),
            forfeited_by: self.session.store.forfeited_by(),
        }
    }

    /// The semaphore set is gone: wait briefly for the notification explaining why.
    fn torn_down(&mut self) -> AgentEnd {
        let events = self
            .session
            .notifier
            .wait_event(self.session.config.teardown_grace);
        if events.contains(&LifecycleEvent::GameEnded) {
            return self.game_over();
        }
        if events.contains(&LifecycleEvent::ServerQuit) {
            return AgentEnd::ServerQuit;
        }
        if self.session.store.result().is_terminal() {
            return self.game_over();
        }
        warn!(?events, "session removed without notice");
        AgentEnd::TornDown
    }
}

impl PlayerAgent<AutoplayInput> {
    /// The computer opponent, playing at the strength recorded by the human who asked for it.
    pub fn autoplay_peer(config: Configuration) -> anyhow::Result<Self> {
        let session = Session::join_agent(config)?;
        let difficulty = session
            .store
            .autoplay()
            .context("no computer opponent was requested in this session")?;
        Ok(Self::from_session(
            session,
            AI_USERNAME.to_owned(),
            JoinMode::AutoplayPeer,
            AutoplayInput::new(difficulty),
        ))
    }
}
