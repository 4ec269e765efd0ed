//! Error taxonomy for the IPC seams.
//!
//! Orchestration code (coordinator and agent loops, binaries) works with `anyhow::Result`;
//! the types here are the ones callers need to match on.

use std::io;

use thiserror::Error;

/// Failures of the Shared State Store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The shared memory segment could not be created.
    #[error("could not allocate shared state (key {key:#x}): {source}")]
    Allocation {
        /// System V key of the segment
        key: i32,
        /// underlying OS error
        source: io::Error,
    },
    /// No session exists for this key.
    #[error("no session found (key {key:#x}), is the server running?")]
    NotFound {
        /// System V key of the segment
        key: i32,
    },
    /// Another coordinator created the segment first.
    #[error("a session already exists (key {key:#x})")]
    AlreadyExists {
        /// System V key of the segment
        key: i32,
    },
    /// A live coordinator already owns the session.
    #[error("a session is already active (coordinator pid {pid})")]
    SessionAlreadyActive {
        /// pid recorded in the coordinator slot
        pid: i32,
    },
    /// The segment exists but could not be mapped into this process.
    #[error("could not attach shared state: {0}")]
    Attach(#[source] io::Error),
    /// The segment exists but was created with another layout.
    #[error("shared state has size {found}, expected {expected}")]
    LayoutMismatch {
        /// size reported by the kernel
        found: usize,
        /// size of the record this build maps
        expected: usize,
    },
}

/// Failures of the Synchronization Set.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The semaphore set could not be created or initialized.
    #[error("could not allocate semaphore set (key {key:#x}): {source}")]
    Allocation {
        /// System V key of the set
        key: i32,
        /// underlying OS error
        source: io::Error,
    },
    /// Another coordinator created the set first.
    #[error("a semaphore set already exists (key {key:#x})")]
    AlreadyExists {
        /// System V key of the set
        key: i32,
    },
    /// No semaphore set exists for this key.
    #[error("no semaphore set found (key {key:#x})")]
    NotFound {
        /// System V key of the set
        key: i32,
    },
    /// The set was destroyed, before or during the call.
    #[error("semaphore set was removed")]
    Removed,
    /// Any other OS failure.
    #[error("semaphore operation failed: {0}")]
    Os(#[source] io::Error),
}

/// Reasons a join request is refused. The requester exits without having joined.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JoinRejection {
    /// Both player slots are taken (or slot 2 is reserved for the autoplay peer).
    #[error("the game already has two players")]
    TooManyPlayers,
    /// The other player already uses this name.
    #[error("username '{0}' is already taken")]
    DuplicateUsername(String),
    /// Empty, too long, or not representable in the shared layout.
    #[error("invalid username '{0}'")]
    InvalidUsername(String),
    /// The name is kept for the autoplay peer.
    #[error("username '{0}' is reserved")]
    ReservedUsername(String),
    /// Autoplay was requested while another player is connected.
    #[error("cannot play against the computer: another player is already connected")]
    AutoplayUnavailable,
}

/// Rejected move input. Recoverable: the agent re-prompts without consuming its turn.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoveError {
    /// Not of the form `<row> <col>`.
    #[error("expected '<row> <col>', got '{0}'")]
    Malformed(String),
    /// Row or column outside the 3x3 grid.
    #[error("({row}, {col}) is outside the grid")]
    OutOfGrid {
        /// 1-based row as typed
        row: i64,
        /// 1-based column as typed
        col: i64,
    },
    /// The target cell is already taken.
    #[error("cell ({row}, {col}) is already occupied")]
    Occupied {
        /// 1-based row
        row: u8,
        /// 1-based column
        col: u8,
    },
}
