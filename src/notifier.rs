//! Lifecycle Notifier: asynchronous quit/timeout/end-of-game events carried by signals.
//!
//! Handlers only record which signal arrived (a bit in [`PENDING`]) and write one byte to a
//! non-blocking wake pipe. Everything else happens on the main flow, which drains the
//! recorded signals with [`Notifier::take`] whenever a blocking call returns: semaphore waits
//! come back on `EINTR` (handlers are installed without `SA_RESTART`) or on their poll
//! interval, and input waits poll the wake pipe alongside stdin.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use libc::c_int;
use tracing::{debug, trace, warn};

use crate::game::Player;

static PENDING: AtomicU64 = AtomicU64::new(0);
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// An event delivered outside of the turn-gate cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Coordinator side: a player left (its slot was already cleared).
    PlayerQuit(Player),
    /// Agent side: the coordinator is shutting the session down.
    ServerQuit,
    /// Agent side: the per-move deadline fired.
    MoveTimeout,
    /// Agent side: the coordinator wrote a terminal result, read it from the store.
    GameEnded,
    /// Interrupt request from the terminal, honored on the second occurrence.
    Interrupt,
    /// Termination or hang-up request, honored immediately.
    Terminate,
}

impl LifecycleEvent {
    /// Signal carrying this event.
    pub fn signal(self) -> c_int {
        match self {
            LifecycleEvent::PlayerQuit(Player::One) => libc::SIGUSR1,
            LifecycleEvent::PlayerQuit(Player::Two) => libc::SIGUSR2,
            LifecycleEvent::GameEnded => libc::SIGUSR1,
            LifecycleEvent::ServerQuit => libc::SIGUSR2,
            LifecycleEvent::MoveTimeout => libc::SIGALRM,
            LifecycleEvent::Interrupt => libc::SIGINT,
            LifecycleEvent::Terminate => libc::SIGTERM,
        }
    }
}

/// Which process is listening. The same signal means different things on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Session coordinator
    Coordinator,
    /// Player agent (human or autoplay)
    Agent,
}

impl Role {
    /// Signals handled by this role, in the order their events are reported.
    pub fn signals(self) -> &'static [c_int] {
        match self {
            Role::Coordinator => &[
                libc::SIGUSR1,
                libc::SIGUSR2,
                libc::SIGTERM,
                libc::SIGHUP,
                libc::SIGINT,
            ],
            Role::Agent => &[
                libc::SIGUSR1,
                libc::SIGUSR2,
                libc::SIGTERM,
                libc::SIGHUP,
                libc::SIGALRM,
                libc::SIGINT,
            ],
        }
    }

    /// Maps a received signal to its event.
    pub fn decode(self, signal: c_int) -> Option<LifecycleEvent> {
        match (self, signal) {
            (Role::Coordinator, libc::SIGUSR1) => Some(LifecycleEvent::PlayerQuit(Player::One)),
            (Role::Coordinator, libc::SIGUSR2) => Some(LifecycleEvent::PlayerQuit(Player::Two)),
            (Role::Agent, libc::SIGUSR1) => Some(LifecycleEvent::GameEnded),
            (Role::Agent, libc::SIGUSR2) => Some(LifecycleEvent::ServerQuit),
            (Role::Agent, libc::SIGALRM) => Some(LifecycleEvent::MoveTimeout),
            (_, libc::SIGINT) => Some(LifecycleEvent::Interrupt),
            (_, libc::SIGTERM) | (_, libc::SIGHUP) => Some(LifecycleEvent::Terminate),
            _ => None,
        }
    }
}

extern "C" fn record_signal(signal: c_int) {
    // only async-signal-safe work here
    let errno = unsafe { *libc::__errno_location() };
    if (0..64).contains(&signal) {
        PENDING.fetch_or(1 << signal, Ordering::SeqCst);
    }
    let fd = WAKE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let byte = 1u8;
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
    unsafe { *libc::__errno_location() = errno };
}

/// The process-wide event source. At most one exists at a time.
#[derive(Debug)]
pub struct Notifier {
    role: Role,
    read_end: OwnedFd,
    // kept open so the handler can write into it
    _write_end: OwnedFd,
    previous: Vec<(c_int, libc::sigaction)>,
}

impl Notifier {
    /// Installs the handlers for `role`.
    pub fn install(role: Role) -> io::Result<Notifier> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a notifier is already installed in this process",
            ));
        }

        let mut fds = [0 as c_int; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) } < 0 {
            INSTALLED.store(false, Ordering::SeqCst);
            return Err(io::Error::last_os_error());
        }
        let (read_end, write_end) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        PENDING.store(0, Ordering::SeqCst);
        WAKE_FD.store(write_end.as_raw_fd(), Ordering::SeqCst);

        let mut notifier = Notifier {
            role,
            read_end,
            _write_end: write_end,
            previous: Vec::with_capacity(role.signals().len()),
        };
        for &signal in role.signals() {
            let previous = install_handler(signal)?;
            notifier.previous.push((signal, previous));
        }
        debug!(?role, "lifecycle handlers installed");
        Ok(notifier)
    }

    /// The role this notifier decodes for.
    pub fn role(&self) -> Role {
        self.role
    }

    /// File descriptor that becomes readable when a signal arrives.
    pub fn wake_fd(&self) -> RawFd {
        self.read_end.as_raw_fd()
    }

    /// Drains every event recorded since the last call, without blocking.
    pub fn take(&self) -> Vec<LifecycleEvent> {
        self.drain_pipe();
        let bits = PENDING.swap(0, Ordering::SeqCst);
        if bits == 0 {
            return Vec::new();
        }
        let events: Vec<_> = self
            .role
            .signals()
            .iter()
            .filter(|&&signal| bits & (1 << signal) != 0)
            .filter_map(|&signal| self.role.decode(signal))
            .collect();
        trace!(?events, "lifecycle events");
        events
    }

    /// Blocks until at least one event arrives or `grace` elapses (empty result).
    pub fn wait_event(&self, grace: Duration) -> Vec<LifecycleEvent> {
        let deadline = Instant::now() + grace;
        loop {
            let events = self.take();
            if !events.is_empty() {
                return events;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return events;
            }
            let mut pollfd = libc::pollfd {
                fd: self.wake_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let timeout = remaining.as_millis().min(c_int::MAX as u128) as c_int;
            // EINTR simply loops back to `take`
            unsafe { libc::poll(&mut pollfd, 1, timeout) };
        }
    }

    fn drain_pipe(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(
                    self.read_end.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        for (signal, previous) in self.previous.drain(..) {
            if unsafe { libc::sigaction(signal, &previous, std::ptr::null_mut()) } < 0 {
                warn!(signal, "could not restore signal disposition");
            }
        }
        WAKE_FD.store(-1, Ordering::SeqCst);
        PENDING.store(0, Ordering::SeqCst);
        INSTALLED.store(false, Ordering::SeqCst);
    }
}

fn install_handler(signal: c_int) -> io::Result<libc::sigaction> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = record_signal as extern "C" fn(c_int) as libc::sighandler_t;
        // no SA_RESTART: blocking calls must come back with EINTR
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        let mut previous: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(signal, &action, &mut previous) < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(previous)
    }
}

/// Delivers `event` to `pid`. A pid of 0 (empty slot) is ignored.
pub fn send(pid: i32, event: LifecycleEvent) -> io::Result<()> {
    if pid <= 0 {
        return Ok(());
    }
    debug!(pid, ?event, "sending lifecycle event");
    if unsafe { libc::kill(pid, event.signal()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// One-shot per-move deadline: armed on creation, disarmed on drop.
///
/// Expiry raises `SIGALRM`, reported to agents as [`LifecycleEvent::MoveTimeout`].
#[derive(Debug)]
pub struct MoveDeadline {
    armed: bool,
}

impl MoveDeadline {
    /// `seconds == 0` arms nothing.
    pub fn arm(seconds: u32) -> MoveDeadline {
        if seconds > 0 {
            unsafe { libc::alarm(seconds) };
        }
        MoveDeadline { armed: seconds > 0 }
    }

    /// Whether a deadline is running.
    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

impl Drop for MoveDeadline {
    fn drop(&mut self) {
        if self.armed {
            unsafe { libc::alarm(0) };
        }
    }
}

/// What an interrupt request amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debounce {
    /// First request: ask for confirmation.
    Armed,
    /// Second request: quit.
    Confirmed,
}

/// Two interrupts within the same process lifetime are needed to quit.
#[derive(Debug, Default)]
pub struct QuitDebounce {
    armed: bool,
}

impl QuitDebounce {
    /// Registers one interrupt request.
    pub fn on_interrupt(&mut self) -> Debounce {
        if self.armed {
            Debounce::Confirmed
        } else {
            self.armed = true;
            Debounce::Armed
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard};

    static NOTIFIER_LOCK: Mutex<()> = Mutex::new(());

    /// Serializes tests that install the process-wide notifier.
    pub(crate) fn exclusive() -> MutexGuard<'static, ()> {
        NOTIFIER_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
