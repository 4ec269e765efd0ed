//! Synchronization Set: the six System V semaphores that drive joins, readiness and turns.

use std::fmt;
use std::io;
use std::sync::atomic::{fence, Ordering};
use std::time::Duration;

use libc::c_int;
use tracing::{error, instrument, trace};

use crate::error::SyncError;
use crate::game::Player;
use crate::notifier::{LifecycleEvent, Notifier};

/// Index of each semaphore in the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semaphore {
    /// Doorbell rung once by every joining agent.
    WaitForPlayers = 0,
    /// Released with count 2 once both slots are filled.
    WaitForOpponentReady = 1,
    /// Binary mutex guarding slot assignment and clearing.
    PidLock = 2,
    /// Turn-gate of player one.
    PlayerOneTurn = 3,
    /// Turn-gate of player two.
    PlayerTwoTurn = 4,
    /// Doorbell rung by the agent that just moved.
    WaitForMove = 5,
}

impl Semaphore {
    /// Size of the set.
    pub const COUNT: usize = 6;

    /// Every semaphore, in index order.
    pub const ALL: [Semaphore; Semaphore::COUNT] = [
        Semaphore::WaitForPlayers,
        Semaphore::WaitForOpponentReady,
        Semaphore::PidLock,
        Semaphore::PlayerOneTurn,
        Semaphore::PlayerTwoTurn,
        Semaphore::WaitForMove,
    ];

    /// The gate `player` waits on before moving.
    pub fn turn_gate(player: Player) -> Semaphore {
        match player {
            Player::One => Semaphore::PlayerOneTurn,
            Player::Two => Semaphore::PlayerTwoTurn,
        }
    }

    /// `0, 0, 1, <1 iff one starts>, <1 iff two starts>, 0`.
    pub fn initial_values(starting: Player) -> [u16; Semaphore::COUNT] {
        [
            0,
            0,
            1,
            u16::from(starting == Player::One),
            u16::from(starting == Player::Two),
            0,
        ]
    }

    fn index(self) -> u16 {
        self as u16
    }
}

/// How an event-aware wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake {
    /// The units were taken.
    Acquired,
    /// Lifecycle events arrived first; nothing was taken.
    Events(Vec<LifecycleEvent>),
    /// The set was destroyed; an end-of-session event should follow.
    Removed,
    /// A poll interval went by with nothing to report. Callers use it to check that the
    /// processes they depend on are still alive, then wait again.
    Idle,
}

/// Handle on the semaphore set. Only the creator may destroy it.
pub struct SynchronizationSet {
    id: c_int,
    key: libc::key_t,
    creator: bool,
    destroyed: bool,
    poll_interval: Duration,
}

impl fmt::Debug for SynchronizationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizationSet")
            .field("id", &self.id)
            .field("key", &format_args!("{:#x}", self.key))
            .field("creator", &self.creator)
            .finish()
    }
}

impl SynchronizationSet {
    /// Creates the set for `key` and loads the initial values. Fails with
    /// [`SyncError::AlreadyExists`] if a set already uses the key.
    #[instrument(level = "debug")]
    pub fn create(
        key: libc::key_t,
        starting: Player,
        poll_interval: Duration,
    ) -> Result<SynchronizationSet, SyncError> {
        let id = unsafe {
            libc::semget(
                key,
                Semaphore::COUNT as c_int,
                libc::IPC_CREAT | libc::IPC_EXCL | 0o640,
            )
        };
        if id < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EEXIST) => SyncError::AlreadyExists { key },
                _ => SyncError::Allocation { key, source: err },
            });
        }
        let set = SynchronizationSet {
            id,
            key,
            creator: true,
            destroyed: false,
            poll_interval,
        };
        for (sem, value) in Semaphore::ALL.into_iter().zip(Semaphore::initial_values(starting)) {
            set.set_value(sem, value).map_err(|e| match e {
                SyncError::Os(source) => SyncError::Allocation { key, source },
                other => other,
            })?;
        }
        Ok(set)
    }

    /// Attaches to the set created by the coordinator.
    pub fn attach_existing(
        key: libc::key_t,
        poll_interval: Duration,
    ) -> Result<SynchronizationSet, SyncError> {
        let id = unsafe { libc::semget(key, 0, 0o640) };
        if id < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::ENOENT) => SyncError::NotFound { key },
                _ => SyncError::Os(err),
            });
        }
        Ok(SynchronizationSet {
            id,
            key,
            creator: false,
            destroyed: false,
            poll_interval,
        })
    }

    /// Removes the set from the system. Idempotent; a no-op for attached handles.
    pub fn destroy(&mut self) -> Result<(), SyncError> {
        if !self.creator || self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        if unsafe { libc::semctl(self.id, 0, libc::IPC_RMID) } < 0 {
            let err = io::Error::last_os_error();
            return match classify(err) {
                SyncError::Removed => Ok(()),
                other => Err(other),
            };
        }
        trace!(key = self.key, "semaphore set removed");
        Ok(())
    }

    /// Takes over removal of a set whose creator is gone.
    pub fn claim(&mut self) {
        self.creator = true;
    }

    /// Whether this handle created the set.
    pub fn is_creator(&self) -> bool {
        self.creator
    }

    /// Current value of `sem`.
    pub fn value(&self, sem: Semaphore) -> Result<i32, SyncError> {
        let value = unsafe { libc::semctl(self.id, sem.index() as c_int, libc::GETVAL) };
        if value < 0 {
            return Err(classify(io::Error::last_os_error()));
        }
        Ok(value)
    }

    fn set_value(&self, sem: Semaphore, value: u16) -> Result<(), SyncError> {
        if unsafe { libc::semctl(self.id, sem.index() as c_int, libc::SETVAL, c_int::from(value)) } < 0
        {
            return Err(classify(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Releases `n` units. Never blocks.
    pub fn signal(&self, sem: Semaphore, n: u16) -> Result<(), SyncError> {
        trace!(?sem, n, "signal");
        fence(Ordering::SeqCst);
        loop {
            match self.semop(sem, n as i16, None) {
                Ok(()) => return Ok(()),
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(e) => return Err(classify(e)),
            }
        }
    }

    /// Takes `n` units, blocking as long as needed.
    ///
    /// Interruptions by signals are retried; lifecycle events stay recorded in the notifier
    /// for the next [`SynchronizationSet::wait_or_event`].
    pub fn wait(&self, sem: Semaphore, n: u16) -> Result<(), SyncError> {
        trace!(?sem, n, "wait");
        loop {
            match self.semop(sem, -(n as i16), None) {
                Ok(()) => {
                    fence(Ordering::SeqCst);
                    return Ok(());
                }
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(e) => return Err(classify(e)),
            }
        }
    }

    /// Takes `n` units unless a lifecycle event shows up first, giving up after one poll
    /// interval with [`Wake::Idle`].
    ///
    /// Pending events are checked before blocking, so an event arriving just before the
    /// call is not missed. A destroyed set is reported as [`Wake::Removed`], not as an error.
    pub fn wait_or_event(
        &self,
        sem: Semaphore,
        n: u16,
        notifier: &Notifier,
    ) -> Result<Wake, SyncError> {
        trace!(?sem, n, "wait_or_event");
        loop {
            let events = notifier.take();
            if !events.is_empty() {
                return Ok(Wake::Events(events));
            }
            match self.semop(sem, -(n as i16), Some(self.poll_interval)) {
                Ok(()) => {
                    fence(Ordering::SeqCst);
                    return Ok(Wake::Acquired);
                }
                // a handler ran: its event is picked up on the next turn of the loop
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => {
                    let events = notifier.take();
                    return Ok(if events.is_empty() {
                        Wake::Idle
                    } else {
                        Wake::Events(events)
                    });
                }
                Err(e) => {
                    return match classify(e) {
                        SyncError::Removed => Ok(Wake::Removed),
                        other => Err(other),
                    }
                }
            }
        }
    }

    /// Acquires `PidLock`; released when the guard drops.
    pub fn lock(&self) -> Result<PidLockGuard<'_>, SyncError> {
        self.wait(Semaphore::PidLock, 1)?;
        Ok(PidLockGuard { set: self })
    }

    fn semop(&self, sem: Semaphore, delta: i16, timeout: Option<Duration>) -> io::Result<()> {
        // the kernel gives the lock back if its holder dies
        let flags = if sem == Semaphore::PidLock {
            libc::SEM_UNDO
        } else {
            0
        };
        let mut op = libc::sembuf {
            sem_num: sem.index(),
            sem_op: delta,
            sem_flg: flags as libc::c_short,
        };
        let rc = match timeout {
            None => unsafe { libc::semop(self.id, &mut op, 1) },
            Some(timeout) => {
                let ts = libc::timespec {
                    tv_sec: timeout.as_secs() as libc::time_t,
                    tv_nsec: timeout.subsec_nanos() as libc::c_long,
                };
                unsafe {
                    libc::syscall(
                        libc::SYS_semtimedop,
                        self.id,
                        &mut op as *mut libc::sembuf,
                        1 as libc::size_t,
                        &ts as *const libc::timespec,
                    ) as c_int
                }
            }
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

fn classify(err: io::Error) -> SyncError {
    match err.raw_os_error() {
        Some(libc::EIDRM) | Some(libc::EINVAL) => SyncError::Removed,
        _ => SyncError::Os(err),
    }
}

/// Proof that `PidLock` is held. Slot bookkeeping in the store requires one.
#[derive(Debug)]
pub struct PidLockGuard<'a> {
    set: &'a SynchronizationSet,
}

impl Drop for PidLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.set.signal(Semaphore::PidLock, 1) {
            error!("could not release pid lock: {e}");
        }
    }
}
