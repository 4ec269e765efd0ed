//! Session Coordinator: admits players, relays turns and writes the result.
//!
//! The decisions live in [`Referee`], a plain state machine fed with what the process loop
//! observes. [`Coordinator`] drives it from semaphore wake-ups and lifecycle events:
//!
//! 1. `AwaitingPlayers`: every ring of `WaitForPlayers` re-reads the slots under `PidLock`.
//!    If autoplay was requested and slot 2 is free, the peer process is started (once).
//! 2. `Ready`: both slots are filled, `WaitForOpponentReady` is released with count 2 while
//!    `PidLock` confirms they still are.
//! 3. `InProgress`: each ring of `WaitForMove` is checked and the other turn-gate opened,
//!    until the board is decided or a player forfeits.
//! 4. `Ended`: the agents are notified under `PidLock`, then the store and the semaphore set
//!    are removed.
//!
//! Whenever a wait stays quiet for a poll interval, the recorded agents are checked for
//! liveness: an agent killed outright never sends its quit signal, so its slot is cleared
//! here and the departure handled like a quit.

use std::fmt;
use std::time::Duration;

use anyhow::bail;
use tracing::{debug, info, instrument, warn};

use crate::ai_process::AutoplayPeer;
use crate::configuration::{Configuration, SessionSettings};
use crate::game::{is_game_ended, Board, Cell, GameResult, Player};
use crate::notifier::{self, Debounce, LifecycleEvent, QuitDebounce};
use crate::semaphores::{Semaphore, Wake};
use crate::session::{process_alive, Session};
use crate::shared_state::Participants;

/// Coordinator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Fewer than two players joined.
    AwaitingPlayers,
    /// Both slots filled, ready broadcast pending.
    Ready,
    /// Turns are being relayed.
    InProgress,
    /// A result is known or the session was stopped.
    Ended,
}

/// What a checked move leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveVerdict {
    /// Open the turn-gate of `next`.
    Continue {
        /// Owner of the following turn
        next: Player,
    },
    /// The board is decided.
    Finished(GameResult),
}

/// What a quit notification leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitOutcome {
    /// The game had not started; the slot is simply free again.
    SlotFreed,
    /// The game was running; the other player wins.
    Forfeit {
        /// The player who did not quit
        winner: Player,
    },
    /// The game is already over.
    Ignored,
}

/// Turn and result bookkeeping of the coordinator.
#[derive(Debug, Clone)]
pub struct Referee {
    phase: Phase,
    turn: Player,
    board: Board,
    moves: u32,
    violations: u32,
    result: GameResult,
    forfeited_by: Option<Player>,
}

impl Referee {
    /// A referee waiting for players, `starting` owning the first turn.
    pub fn new(starting: Player) -> Referee {
        Referee {
            phase: Phase::AwaitingPlayers,
            turn: starting,
            board: Board::new(),
            moves: 0,
            violations: 0,
            result: GameResult::NotFinished,
            forfeited_by: None,
        }
    }

    /// Current state.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Owner of the current turn.
    pub fn turn(&self) -> Player {
        self.turn
    }

    /// Last checked board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Moves relayed so far.
    pub fn moves(&self) -> u32 {
        self.moves
    }

    /// Moves that did not add exactly one cell for the turn owner.
    pub fn violations(&self) -> u32 {
        self.violations
    }

    /// Result decided so far.
    pub fn result(&self) -> GameResult {
        self.result
    }

    /// Who forfeited, if anyone.
    pub fn forfeited_by(&self) -> Option<Player> {
        self.forfeited_by
    }

    /// Both slots are filled.
    pub fn players_joined(&mut self) {
        if self.phase == Phase::AwaitingPlayers {
            self.phase = Phase::Ready;
        }
    }

    /// The ready broadcast went out.
    pub fn start(&mut self) {
        if self.phase == Phase::Ready {
            self.phase = Phase::InProgress;
        }
    }

    /// Checks the board written by the turn owner and decides who moves next.
    pub fn on_move(&mut self, board: Board) -> MoveVerdict {
        if self.phase != Phase::InProgress {
            warn!(phase = ?self.phase, "move outside of a running game");
            return match self.phase {
                Phase::Ended => MoveVerdict::Finished(self.result),
                _ => MoveVerdict::Continue { next: self.turn },
            };
        }

        let mut added = Vec::new();
        let mut overwritten = 0;
        for (index, (before, after)) in self.board.cells().iter().zip(board.cells()).enumerate() {
            if before == after {
                continue;
            }
            if *before == Cell::Empty {
                added.push((index, *after));
            } else {
                overwritten += 1;
            }
        }
        let expected = Cell::of(self.turn);
        if overwritten > 0 || added.len() != 1 || added[0].1 != expected {
            self.violations += 1;
            warn!(turn = ?self.turn, ?added, overwritten, "unexpected board change");
        }

        self.board = board;
        self.moves += 1;
        let result = is_game_ended(&self.board);
        if result.is_terminal() {
            self.result = result;
            self.phase = Phase::Ended;
            info!(%result, moves = self.moves, "game decided");
            return MoveVerdict::Finished(result);
        }
        self.turn = self.turn.other();
        MoveVerdict::Continue { next: self.turn }
    }

    /// A player left.
    pub fn on_player_quit(&mut self, quitter: Player) -> QuitOutcome {
        match self.phase {
            Phase::AwaitingPlayers => QuitOutcome::SlotFreed,
            Phase::Ready => {
                self.phase = Phase::AwaitingPlayers;
                QuitOutcome::SlotFreed
            }
            Phase::InProgress => {
                self.result = GameResult::Quit;
                self.forfeited_by = Some(quitter);
                self.phase = Phase::Ended;
                QuitOutcome::Forfeit {
                    winner: quitter.other(),
                }
            }
            Phase::Ended => QuitOutcome::Ignored,
        }
    }

    /// The operator stops the session. A running game ends as `Quit` with no winner.
    pub fn shutdown(&mut self) -> GameResult {
        if self.phase == Phase::InProgress {
            self.result = GameResult::Quit;
        }
        self.phase = Phase::Ended;
        self.result
    }
}

/// Final state reported by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Result stored in the session
    pub result: GameResult,
    /// Who forfeited, for `Quit`
    pub forfeited_by: Option<Player>,
    /// Final board
    pub board: Board,
    /// Symbols of player one and player two
    pub symbols: [char; 2],
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.result, self.forfeited_by) {
            (GameResult::Quit, Some(quitter)) => {
                write!(f, "{} wins by forfeit ({quitter} quit)", quitter.other())
            }
            (GameResult::Quit, None) => write!(f, "server stopped, game abandoned"),
            (GameResult::NotFinished, _) => write!(f, "server stopped before the game started"),
            (result, _) => write!(f, "{result}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// The coordinator process.
#[derive(Debug)]
pub struct Coordinator {
    session: Session,
    referee: Referee,
    debounce: QuitDebounce,
    peer: Option<AutoplayPeer>,
    peer_requested: bool,
    joined: [Option<String>; 2],
}

impl Coordinator {
    /// Creates the session. Fails if another coordinator is running.
    pub fn new(config: Configuration, settings: SessionSettings) -> anyhow::Result<Coordinator> {
        let session = Session::open_coordinator(config, settings)?;
        Ok(Coordinator {
            session,
            referee: Referee::new(settings.starting_player),
            debounce: QuitDebounce::default(),
            peer: None,
            peer_requested: false,
            joined: [None, None],
        })
    }

    /// Runs the session to its end, then removes the store and the semaphore set.
    pub fn run(mut self) -> anyhow::Result<Outcome> {
        let played = self.play();
        if played.is_err() && self.referee.phase() != Phase::Ended {
            if let Err(e) = self.shutdown() {
                warn!("could not notify agents: {e:#}");
            }
        }

        let store = &self.session.store;
        let outcome = Outcome {
            result: store.result(),
            forfeited_by: store.forfeited_by(),
            board: store.board(),
            symbols: store.symbols(),
        };
        self.session.teardown()?;
        if let Some(mut peer) = self.peer.take() {
            peer.try_reap(self.session.config.teardown_grace)?;
        }
        played?;
        info!(result = %outcome.result, "session over");
        Ok(outcome)
    }

    fn say(&self, message: impl fmt::Display) {
        if self.session.config.verbose {
            println!("{message}");
        }
    }

    fn play(&mut self) -> anyhow::Result<()> {
        loop {
            if self.await_players()? == Flow::Stop {
                return Ok(());
            }
            if self.start_game()? == Flow::Stop {
                return Ok(());
            }
            if self.referee.phase() == Phase::InProgress {
                break;
            }
        }
        self.turn_loop()
    }

    #[instrument(level = "debug", skip(self))]
    fn await_players(&mut self) -> anyhow::Result<Flow> {
        self.say(format_args!(
            "Waiting for players (session key {:#x})...",
            self.session.config.ipc_key
        ));
        loop {
            let wake = self.session.sems.wait_or_event(
                Semaphore::WaitForPlayers,
                1,
                &self.session.notifier,
            )?;
            match wake {
                Wake::Acquired => {
                    let participants = self.participants()?;
                    self.announce(&participants);
                    if participants.both_joined() {
                        self.referee.players_joined();
                        return Ok(Flow::Continue);
                    }
                    self.spawn_peer_if_requested(&participants)?;
                }
                Wake::Events(events) => {
                    if self.handle_events(events)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                Wake::Removed => bail!("semaphore set removed while waiting for players"),
                Wake::Idle => {
                    if self.reap_departed()? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
            }
        }
    }

    fn start_game(&mut self) -> anyhow::Result<Flow> {
        // a quit that raced the last join is handled before anyone is released
        let events = self.session.notifier.take();
        if !events.is_empty() {
            if self.handle_events(events)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
            if self.referee.phase() != Phase::Ready {
                return Ok(Flow::Continue);
            }
        }

        // nobody leaves between this check and the release
        let guard = self.session.sems.lock()?;
        let participants = self.session.store.participants(&guard);
        if let Some(missing) = Player::ALL.into_iter().find(|p| participants.pid(*p).is_none()) {
            drop(guard);
            debug!(?missing, "slot emptied before the start");
            return self.on_player_quit(missing);
        }
        self.session.sems.signal(Semaphore::WaitForOpponentReady, 2)?;
        self.referee.start();
        drop(guard);

        let symbols = self.session.store.symbols();
        let name = |p: Player| self.joined[p.symbol_index()].clone().unwrap_or_default();
        self.say(format_args!(
            "Game started: {} ({}) vs {} ({})",
            name(Player::One),
            symbols[0],
            name(Player::Two),
            symbols[1]
        ));
        info!(starting = ?self.referee.turn(), "game started");
        Ok(Flow::Continue)
    }

    fn turn_loop(&mut self) -> anyhow::Result<()> {
        loop {
            let wake =
                self.session
                    .sems
                    .wait_or_event(Semaphore::WaitForMove, 1, &self.session.notifier)?;
            match wake {
                Wake::Acquired => {
                    let board = self.session.store.board();
                    match self.referee.on_move(board) {
                        MoveVerdict::Continue { next } => {
                            debug!(?next, "handing over the turn");
                            self.session.sems.signal(Semaphore::turn_gate(next), 1)?;
                        }
                        MoveVerdict::Finished(result) => {
                            self.session.store.set_result(result);
                            self.broadcast(LifecycleEvent::GameEnded)?;
                            return Ok(());
                        }
                    }
                }
                Wake::Events(events) => {
                    if self.handle_events(events)? == Flow::Stop {
                        return Ok(());
                    }
                }
                Wake::Removed => bail!("semaphore set removed during the game"),
                Wake::Idle => {
                    if self.reap_departed()? == Flow::Stop {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn handle_events(&mut self, events: Vec<LifecycleEvent>) -> anyhow::Result<Flow> {
        for event in events {
            let flow = match event {
                LifecycleEvent::PlayerQuit(player) => self.on_player_quit(player)?,
                LifecycleEvent::Terminate => {
                    self.shutdown()?;
                    Flow::Stop
                }
                LifecycleEvent::Interrupt => match self.debounce.on_interrupt() {
                    Debounce::Armed => {
                        self.say("Interrupt again to stop the server.");
                        Flow::Continue
                    }
                    Debounce::Confirmed => {
                        self.shutdown()?;
                        Flow::Stop
                    }
                },
                other => {
                    debug!(?other, "event ignored by the coordinator");
                    Flow::Continue
                }
            };
            if flow == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    fn on_player_quit(&mut self, quitter: Player) -> anyhow::Result<Flow> {
        match self.referee.on_player_quit(quitter) {
            QuitOutcome::SlotFreed => {
                info!(?quitter, "player left before the game started");
                if let Some(name) = self.joined[quitter.symbol_index()].take() {
                    self.say(format_args!("{name} left, waiting for another player."));
                }
                if quitter == Player::One {
                    self.dismiss_peer()?;
                }
                Ok(Flow::Continue)
            }
            QuitOutcome::Forfeit { winner } => {
                info!(?quitter, ?winner, "forfeit");
                self.session.store.set_forfeit(quitter);
                self.broadcast(LifecycleEvent::GameEnded)?;
                Ok(Flow::Stop)
            }
            QuitOutcome::Ignored => Ok(Flow::Continue),
        }
    }

    /// Clears the slots of agents whose process died, then handles each like a quit.
    fn reap_departed(&mut self) -> anyhow::Result<Flow> {
        let departed: Vec<Player> = {
            let guard = self.session.sems.lock()?;
            let participants = self.session.store.participants(&guard);
            participants
                .connected()
                .filter(|(_, pid)| !process_alive(*pid))
                .filter(|(player, pid)| self.session.store.record_quit(&guard, *player, *pid))
                .map(|(player, _)| player)
                .collect()
        };
        for player in departed {
            warn!(?player, "agent died without quitting");
            if self.on_player_quit(player)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// The human who asked for a computer opponent left before the start: the opponent
    /// goes too, and the next request starts a new one.
    fn dismiss_peer(&mut self) -> anyhow::Result<()> {
        self.peer_requested = false;
        let Some(mut peer) = self.peer.take() else {
            return Ok(());
        };
        let pid = peer.id() as i32;
        info!(pid, "stopping the computer opponent");
        peer.try_reap(Duration::ZERO)?;
        {
            let guard = self.session.sems.lock()?;
            self.session.store.record_quit(&guard, Player::Two, pid);
        }
        if let Some(name) = self.joined[Player::Two.symbol_index()].take() {
            self.say(format_args!("{name} left, waiting for another player."));
        }
        Ok(())
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        let result = self.referee.shutdown();
        if result == GameResult::Quit {
            self.session.store.set_result(result);
        }
        info!(%result, "server shutting down");
        self.broadcast(LifecycleEvent::ServerQuit)
    }

    fn participants(&self) -> anyhow::Result<Participants> {
        let guard = self.session.sems.lock()?;
        Ok(self.session.store.participants(&guard))
    }

    /// Sends `event` to every connected agent, reading the slots under `PidLock`.
    fn broadcast(&self, event: LifecycleEvent) -> anyhow::Result<()> {
        let guard = self.session.sems.lock()?;
        let participants = self.session.store.participants(&guard);
        for (player, pid) in participants.connected() {
            if let Err(e) = notifier::send(pid, event) {
                warn!(?player, pid, "could not notify agent: {e}");
            }
        }
        Ok(())
    }

    fn announce(&mut self, participants: &Participants) {
        for player in Player::ALL {
            let current = participants.username(player).map(str::to_owned);
            let known = &mut self.joined[player.symbol_index()];
            if *known == current {
                continue;
            }
            match &current {
                Some(name) => {
                    info!(?player, name, "player joined");
                    if self.session.config.verbose {
                        println!("{name} joined as {player}");
                    }
                }
                None => info!(?player, "slot freed"),
            }
            *known = current;
        }
    }

    fn spawn_peer_if_requested(&mut self, participants: &Participants) -> anyhow::Result<()> {
        if self.peer_requested || participants.pid(Player::Two).is_some() {
            return Ok(());
        }
        let Some(difficulty) = self.session.store.autoplay() else {
            return Ok(());
        };
        let Some(path) = self.session.store.ai_agent_path() else {
            bail!("autoplay requested without an agent executable");
        };
        self.peer_requested = true;
        self.say(format_args!("Starting a {difficulty} computer opponent..."));
        self.peer = Some(AutoplayPeer::launch(&path, self.session.config.ipc_key)?);
        Ok(())
    }
}
