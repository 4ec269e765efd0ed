//! Scoped terminal settings for human agents.
//!
//! Echo is turned off while the agent waits for its turn so keys typed early do not garble
//! the board, and turned back on for move input. The original settings are restored when
//! the [`TerminalGuard`] drops, and by the panic hook if the process panics first.

use std::io;
use std::os::fd::RawFd;
use std::sync::Mutex;

use tracing::{debug, warn};

static SAVED: Mutex<Option<libc::termios>> = Mutex::new(None);

fn saved() -> std::sync::MutexGuard<'static, Option<libc::termios>> {
    SAVED.lock().unwrap_or_else(|e| e.into_inner())
}

/// Whether `fd` is a terminal.
pub fn is_tty(fd: RawFd) -> bool {
    unsafe { libc::isatty(fd) == 1 }
}

/// Holds the settings found on stdin and puts them back on drop.
#[derive(Debug)]
pub struct TerminalGuard {
    fd: RawFd,
    original: Option<libc::termios>,
}

impl TerminalGuard {
    /// Saves the current settings of stdin. Does nothing when stdin is not a terminal.
    pub fn acquire() -> TerminalGuard {
        let fd = libc::STDIN_FILENO;
        let original = is_tty(fd)
            .then(|| {
                let mut termios: libc::termios = unsafe { std::mem::zeroed() };
                (unsafe { libc::tcgetattr(fd, &mut termios) } == 0).then_some(termios)
            })
            .flatten();
        if original.is_some() {
            *saved() = original;
        }
        debug!(tty = original.is_some(), "terminal acquired");
        TerminalGuard { fd, original }
    }

    /// Whether stdin is an interactive terminal.
    pub fn is_tty(&self) -> bool {
        self.original.is_some()
    }

    /// Shows or hides typed characters.
    pub fn set_echo(&self, on: bool) -> io::Result<()> {
        let Some(original) = self.original else {
            return Ok(());
        };
        let mut termios = original;
        if on {
            termios.c_lflag |= libc::ECHO | libc::ECHOCTL;
        } else {
            termios.c_lflag &= !(libc::ECHO | libc::ECHOCTL);
        }
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &termios) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Drops whatever was typed but not read yet.
    pub fn discard_pending_input(&self) -> io::Result<()> {
        if self.original.is_none() {
            return Ok(());
        }
        if unsafe { libc::tcflush(self.fd, libc::TCIFLUSH) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Some(original) = self.original {
            if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &original) } < 0 {
                warn!("could not restore terminal: {}", io::Error::last_os_error());
            }
            *saved() = None;
        }
    }
}

/// Restores the terminal, then runs the previous hook and exits.
pub fn setup_panic_hook() {
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        if let Some(original) = *saved() {
            unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &original) };
        }
        orig_hook(panic_info);
        std::process::exit(1);
    }));
}
