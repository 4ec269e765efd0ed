//! Traits and sources an agent draws its moves from.
//!
//! A [`MoveSource`] is consulted only while its agent owns the turn. It must come back as
//! soon as a lifecycle event is pending, so a quit, a timeout or the end of the game is
//! never stuck behind a read.

use std::io::{self, Write};
use std::os::fd::RawFd;
use std::time::Duration;

use anyhow::{bail, Context};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, trace};

use crate::game::{Board, Difficulty, Player, Position};
use crate::move_selector::select_move;
use crate::notifier::{LifecycleEvent, Notifier};
use crate::terminal::TerminalGuard;

/// What a source produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveInput {
    /// A valid move on a free cell.
    Move(Position),
    /// Lifecycle events arrived before a move.
    Events(Vec<LifecycleEvent>),
    /// The source has no more input; the agent quits.
    EndOfInput,
    /// Nothing happened for a while. The agent checks its session, then asks again.
    Idle,
}

/// What the agent should implement to provide moves.
pub trait MoveSource {
    /// Called when the turn-gate is acquired, before the first [`MoveSource::next_move`].
    fn begin_turn(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Returns the next move for `player`, or the events that interrupted the wait.
    ///
    /// A returned move always targets a free cell of `board`.
    fn next_move(
        &mut self,
        board: &Board,
        player: Player,
        notifier: &Notifier,
    ) -> anyhow::Result<MoveInput>;

    /// Called once the move is written, before the turn is handed back.
    fn end_turn(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whether a person is reading the output.
    fn is_interactive(&self) -> bool {
        false
    }
}

/// Moves typed by a human as `<row> <col>`, 1-based.
#[derive(Debug)]
pub struct TerminalInput {
    fd: RawFd,
    pending: Vec<u8>,
    eof: bool,
    idle_timeout: Duration,
    terminal: Option<TerminalGuard>,
}

impl TerminalInput {
    const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(200);

    /// Reads from stdin, managing its terminal settings.
    pub fn stdin() -> TerminalInput {
        let terminal = TerminalGuard::acquire();
        if let Err(e) = terminal.set_echo(false) {
            debug!("could not disable echo: {e}");
        }
        TerminalInput {
            fd: libc::STDIN_FILENO,
            pending: Vec::new(),
            eof: false,
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
            terminal: Some(terminal),
        }
    }

    /// Reads from an arbitrary descriptor, leaving terminal settings alone.
    pub fn from_fd(fd: RawFd) -> TerminalInput {
        TerminalInput {
            fd,
            pending: Vec::new(),
            eof: false,
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
            terminal: None,
        }
    }

    /// How long [`MoveSource::next_move`] waits for a keystroke before reporting
    /// [`MoveInput::Idle`].
    pub fn with_idle_timeout(mut self, timeout: Duration) -> TerminalInput {
        self.idle_timeout = timeout;
        self
    }

    fn prompt(&self) {
        print!("Your move (row col): ");
        let _ = io::stdout().flush();
    }

    fn next_line(&mut self) -> Option<String> {
        let end = match self.pending.iter().position(|b| *b == b'\n') {
            Some(newline) => newline + 1,
            None if self.eof && !self.pending.is_empty() => self.pending.len(),
            None => return None,
        };
        let line: Vec<u8> = self.pending.drain(..end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_owned())
    }

    fn fill(&mut self) -> anyhow::Result<()> {
        let mut buf = [0u8; 256];
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        match n {
            0 => self.eof = true,
            n if n > 0 => self.pending.extend_from_slice(&buf[..n as usize]),
            _ => {
                let err = io::Error::last_os_error();
                if !matches!(err.raw_os_error(), Some(libc::EINTR) | Some(libc::EAGAIN)) {
                    return Err(err).context("could not read move input");
                }
            }
        }
        Ok(())
    }
}

impl MoveSource for TerminalInput {
    fn begin_turn(&mut self) -> anyhow::Result<()> {
        if let Some(terminal) = &self.terminal {
            if terminal.is_tty() {
                // keys typed during the opponent's turn are stale
                self.pending.clear();
                terminal.discard_pending_input()?;
            }
            terminal.set_echo(true)?;
        }
        self.prompt();
        Ok(())
    }

    fn next_move(
        &mut self,
        board: &Board,
        _player: Player,
        notifier: &Notifier,
    ) -> anyhow::Result<MoveInput> {
        loop {
            while let Some(line) = self.next_line() {
                if line.is_empty() {
                    self.prompt();
                    continue;
                }
                let parsed = line
                    .parse::<Position>()
                    .and_then(|position| board.check_free(position).map(|_| position));
                match parsed {
                    Ok(position) => return Ok(MoveInput::Move(position)),
                    Err(e) => {
                        trace!(%line, "rejected input");
                        println!("{e}, try again.");
                        self.prompt();
                    }
                }
            }
            if self.eof {
                return Ok(MoveInput::EndOfInput);
            }

            let mut fds = [
                libc::pollfd {
                    fd: self.fd,
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: notifier.wake_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            let timeout = self.idle_timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
            let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EINTR) {
                    return Err(err).context("could not wait for move input");
                }
            }

            let events = notifier.take();
            if !events.is_empty() {
                return Ok(MoveInput::Events(events));
            }
            if ready == 0 {
                return Ok(MoveInput::Idle);
            }
            if fds[0].revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                self.fill()?;
            }
        }
    }

    fn end_turn(&mut self) -> anyhow::Result<()> {
        if let Some(terminal) = &self.terminal {
            terminal.set_echo(false)?;
        }
        Ok(())
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

/// Moves picked by the Move Selector.
#[derive(Debug)]
pub struct AutoplayInput {
    difficulty: Difficulty,
    rng: StdRng,
    moves: u32,
}

impl AutoplayInput {
    /// An autoplay source seeded from the OS.
    pub fn new(difficulty: Difficulty) -> AutoplayInput {
        AutoplayInput::with_rng(difficulty, StdRng::from_entropy())
    }

    /// An autoplay source with a chosen random generator.
    pub fn with_rng(difficulty: Difficulty, rng: StdRng) -> AutoplayInput {
        AutoplayInput {
            difficulty,
            rng,
            moves: 0,
        }
    }
}

impl MoveSource for AutoplayInput {
    fn next_move(
        &mut self,
        board: &Board,
        player: Player,
        notifier: &Notifier,
    ) -> anyhow::Result<MoveInput> {
        let events = notifier.take();
        if !events.is_empty() {
            return Ok(MoveInput::Events(events));
        }
        let Some(position) = select_move(board, player, self.difficulty, self.moves, &mut self.rng)
        else {
            bail!("asked to move on a full board");
        };
        self.moves += 1;
        debug!(%position, difficulty = %self.difficulty, "autoplay move");
        Ok(MoveInput::Move(position))
    }
}
