//! Shared State Store: the `GameState` record in a System V shared memory segment.
//!
//! The record is `#[repr(C)]` and every process maps the same layout. Fields are read and
//! written with volatile accesses; ordering between processes comes from the semaphore
//! operations around them (see [`crate::semaphores`]). The board is only written by the
//! agent holding its turn-gate, slots only under `PidLock` (enforced here by requiring a
//! [`PidLockGuard`]), and `result` only by the coordinator.

use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::mem::size_of;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::ptr::{addr_of_mut, NonNull};

use libc::c_int;
use tracing::{debug, instrument, trace, warn};

use crate::configuration::SessionSettings;
use crate::error::{JoinRejection, MoveError, StoreError};
use crate::game::{Board, Cell, Difficulty, GameResult, Player, Position, BOARD_CELLS};
use crate::semaphores::PidLockGuard;

/// Longest username, in bytes.
pub const USERNAME_MAX: usize = 32;
/// Longest autoplay executable path, in bytes.
pub const PATH_MAX: usize = 4095;
/// Username reserved to the autoplay peer.
pub const AI_USERNAME: &str = "Computer";

const COORDINATOR_SLOT: usize = 0;

#[repr(C)]
struct RawGameState {
    board: [u8; BOARD_CELLS],
    result: u8,
    forfeited_by: u8,
    autoplay_difficulty: u8,
    starting_player: u8,
    symbols: [u32; 2],
    timeout_seconds: u32,
    participant_pids: [i32; 3],
    usernames: [[u8; USERNAME_MAX + 1]; 3],
    ai_agent_path: [u8; PATH_MAX + 1],
}

/// Pointer to one field of the mapped record.
macro_rules! field {
    ($store:expr, $name:ident) => {
        // SAFETY: `ptr` points to a live mapping of a full `RawGameState`
        unsafe { addr_of_mut!((*$store.ptr.as_ptr()).$name) }
    };
}

fn read<T: Copy>(ptr: *mut T) -> T {
    // SAFETY: only called with pointers produced by `field!`
    unsafe { ptr.read_volatile() }
}

fn write<T: Copy>(ptr: *mut T, value: T) {
    // SAFETY: only called with pointers produced by `field!`
    unsafe { ptr.write_volatile(value) }
}

fn encode_str<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut raw = [0u8; N];
    let len = bytes.len().min(N - 1);
    raw[..len].copy_from_slice(&bytes[..len]);
    raw
}

fn decode_bytes(raw: &[u8]) -> &[u8] {
    let len = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    &raw[..len]
}

/// How an agent asks to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinMode {
    /// A human taking the first free slot.
    Human,
    /// A human asking the coordinator to start an autoplay opponent.
    RequestAutoplay {
        /// Strength of the opponent
        difficulty: Difficulty,
        /// Executable the coordinator launches as the opponent
        agent_path: PathBuf,
    },
    /// The autoplay opponent itself, started by the coordinator.
    AutoplayPeer,
}

/// Everything recorded in the store when an agent joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Name shown to the other participants
    pub username: String,
    /// Process id of the joining agent
    pub pid: i32,
    /// Human, autoplay request or autoplay peer
    pub mode: JoinMode,
}

impl JoinRequest {
    /// Checks the name alone, before the store is consulted.
    pub fn validate(&self) -> Result<(), JoinRejection> {
        let name = self.username.as_str();
        if name.is_empty()
            || name.len() > USERNAME_MAX
            || name.chars().any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(JoinRejection::InvalidUsername(name.to_owned()));
        }
        if name == AI_USERNAME && self.mode != JoinMode::AutoplayPeer {
            return Err(JoinRejection::ReservedUsername(name.to_owned()));
        }
        Ok(())
    }
}

/// Snapshot of the three slots, taken under `PidLock`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Participants {
    pids: [i32; 3],
    usernames: [String; 3],
}

impl Participants {
    /// Pid of `player`, `None` for an empty slot.
    pub fn pid(&self, player: Player) -> Option<i32> {
        Some(self.pids[player.slot()]).filter(|pid| *pid != 0)
    }

    /// Name of `player`, `None` for an empty slot.
    pub fn username(&self, player: Player) -> Option<&str> {
        self.pid(player).map(|_| self.usernames[player.slot()].as_str())
    }

    /// Both player slots are filled.
    pub fn both_joined(&self) -> bool {
        Player::ALL.iter().all(|p| self.pid(*p).is_some())
    }

    /// Players currently holding a slot, with their pid.
    pub fn connected(&self) -> impl Iterator<Item = (Player, i32)> + '_ {
        Player::ALL
            .into_iter()
            .filter_map(|p| self.pid(p).map(|pid| (p, pid)))
    }
}

/// Handle on the mapped store. Detaches on drop; only the creator may destroy it.
pub struct SharedState {
    id: c_int,
    key: libc::key_t,
    ptr: NonNull<RawGameState>,
    creator: bool,
    destroyed: bool,
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedState")
            .field("id", &self.id)
            .field("key", &format_args!("{:#x}", self.key))
            .field("creator", &self.creator)
            .finish()
    }
}

impl SharedState {
    /// Size of the segment every process agrees on.
    pub const SIZE: usize = size_of::<RawGameState>();

    /// Creates the segment for `key` and maps it. Fails with [`StoreError::AlreadyExists`]
    /// if any segment already uses the key, so two coordinators never share one.
    #[instrument(level = "debug")]
    pub fn create(key: libc::key_t) -> Result<SharedState, StoreError> {
        let id = unsafe { libc::shmget(key, Self::SIZE, libc::IPC_CREAT | libc::IPC_EXCL | 0o640) };
        if id < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EEXIST) => StoreError::AlreadyExists { key },
                _ => StoreError::Allocation { key, source: err },
            });
        }
        let mut store = Self::map(id, key)?;
        store.creator = true;
        Ok(store)
    }

    /// Pid of the process that created the segment for `key`, read without mapping it.
    pub fn segment_creator(key: libc::key_t) -> Result<i32, StoreError> {
        let (_, stat) = Self::stat(key)?;
        Ok(stat.shm_cpid)
    }

    /// Removes the segment for `key` whatever its layout. Only for leftovers of a dead
    /// coordinator.
    pub fn remove_segment(key: libc::key_t) -> Result<(), StoreError> {
        let (id, _) = Self::stat(key)?;
        if unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) } < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EINVAL) | Some(libc::EIDRM) => Ok(()),
                _ => Err(StoreError::Attach(err)),
            };
        }
        debug!(key, "leftover segment removed");
        Ok(())
    }

    fn stat(key: libc::key_t) -> Result<(c_int, libc::shmid_ds), StoreError> {
        let id = unsafe { libc::shmget(key, 0, 0o640) };
        if id < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::ENOENT) => StoreError::NotFound { key },
                _ => StoreError::Attach(err),
            });
        }
        let mut stat: libc::shmid_ds = unsafe { std::mem::zeroed() };
        if unsafe { libc::shmctl(id, libc::IPC_STAT, &mut stat) } < 0 {
            return Err(StoreError::Attach(io::Error::last_os_error()));
        }
        Ok((id, stat))
    }

    /// Maps the segment created by the coordinator.
    pub fn attach_existing(key: libc::key_t) -> Result<SharedState, StoreError> {
        let (id, stat) = Self::stat(key)?;
        if stat.shm_segsz != Self::SIZE {
            return Err(StoreError::LayoutMismatch {
                found: stat.shm_segsz,
                expected: Self::SIZE,
            });
        }
        Self::map(id, key)
    }

    fn map(id: c_int, key: libc::key_t) -> Result<SharedState, StoreError> {
        let raw = unsafe { libc::shmat(id, std::ptr::null(), 0) };
        if raw as isize == -1 {
            return Err(StoreError::Attach(io::Error::last_os_error()));
        }
        let ptr = NonNull::new(raw as *mut RawGameState)
            .ok_or_else(|| StoreError::Attach(io::Error::from(io::ErrorKind::InvalidData)))?;
        trace!(id, "store mapped");
        Ok(SharedState {
            id,
            key,
            ptr,
            creator: false,
            destroyed: false,
        })
    }

    /// Takes over removal of a store whose creator is gone.
    pub fn claim(&mut self) {
        self.creator = true;
    }

    /// Whether this handle will remove the segment.
    pub fn is_creator(&self) -> bool {
        self.creator
    }

    /// Marks the segment for removal. Processes still attached keep their mapping until
    /// they detach. Idempotent; a no-op for attached handles.
    pub fn destroy(&mut self) -> Result<(), StoreError> {
        if !self.creator || self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        if unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) } < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EINVAL) | Some(libc::EIDRM) => Ok(()),
                _ => Err(StoreError::Attach(err)),
            };
        }
        debug!(key = self.key, "store removed");
        Ok(())
    }

    /// Writes the session settings and empties every other field. The coordinator pid is
    /// written last, once everything else is in place.
    pub fn initialize(&self, settings: &SessionSettings, coordinator_pid: i32) {
        write(field!(self, board), [Cell::Empty.to_raw(); BOARD_CELLS]);
        write(field!(self, result), GameResult::NotFinished.to_raw());
        write(field!(self, forfeited_by), 0);
        write(field!(self, autoplay_difficulty), Difficulty::to_raw(None));
        write(field!(self, starting_player), settings.starting_player.slot() as u8);
        write(field!(self, symbols), settings.symbols.map(u32::from));
        write(field!(self, timeout_seconds), settings.timeout_seconds);
        write(field!(self, usernames), [[0; USERNAME_MAX + 1]; 3]);
        write(field!(self, ai_agent_path), [0; PATH_MAX + 1]);
        write(field!(self, participant_pids), [0; 3]);
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
        write(field!(self, participant_pids), [coordinator_pid, 0, 0]);
    }

    /// Pid in slot 0, `0` when no coordinator ever initialized the store.
    pub fn coordinator_pid(&self) -> i32 {
        read(field!(self, participant_pids))[COORDINATOR_SLOT]
    }

    /// Current board.
    pub fn board(&self) -> Board {
        Board::from_cells(read(field!(self, board)).map(Cell::from_raw))
    }

    /// Marks `position` for `player`. Only the turn-gate owner calls this.
    pub fn place(&self, position: Position, player: Player) -> Result<(), MoveError> {
        self.board().check_free(position)?;
        let mut cells = read(field!(self, board));
        cells[position.index()] = Cell::of(player).to_raw();
        write(field!(self, board), cells);
        trace!(%position, ?player, "cell written");
        Ok(())
    }

    /// Current result.
    pub fn result(&self) -> GameResult {
        GameResult::from_raw(read(field!(self, result)))
    }

    /// Moves `result` out of `NotFinished`. Returns `false` (and writes nothing) if a
    /// terminal value is already recorded or `result` is not terminal.
    pub fn set_result(&self, result: GameResult) -> bool {
        if !result.is_terminal() || self.result().is_terminal() {
            warn!(current = %self.result(), refused = %result, "result left unchanged");
            return false;
        }
        write(field!(self, result), result.to_raw());
        true
    }

    /// Records `quitter` as forfeiting, then sets `result` to `Quit`.
    pub fn set_forfeit(&self, quitter: Player) -> bool {
        if self.result().is_terminal() {
            return false;
        }
        write(field!(self, forfeited_by), quitter.slot() as u8);
        self.set_result(GameResult::Quit)
    }

    /// The player who forfeited, if the game ended that way.
    pub fn forfeited_by(&self) -> Option<Player> {
        Player::from_slot(read(field!(self, forfeited_by)) as usize)
    }

    /// Symbols of player one and player two.
    pub fn symbols(&self) -> [char; 2] {
        read(field!(self, symbols)).map(|raw| char::from_u32(raw).unwrap_or('?'))
    }

    /// Per-move deadline, `0` when disabled.
    pub fn timeout_seconds(&self) -> u32 {
        read(field!(self, timeout_seconds))
    }

    /// Who owns the first turn.
    pub fn starting_player(&self) -> Player {
        Player::from_slot(read(field!(self, starting_player)) as usize).unwrap_or(Player::One)
    }

    /// Requested autoplay strength, if any.
    pub fn autoplay(&self) -> Option<Difficulty> {
        Difficulty::from_raw(read(field!(self, autoplay_difficulty)))
    }

    /// Executable the coordinator launches as the autoplay peer.
    pub fn ai_agent_path(&self) -> Option<PathBuf> {
        let raw = read(field!(self, ai_agent_path));
        let bytes = decode_bytes(&raw);
        (!bytes.is_empty()).then(|| PathBuf::from(OsStr::from_bytes(bytes)))
    }

    /// Reads the three slots.
    pub fn participants(&self, _lock: &PidLockGuard<'_>) -> Participants {
        let pids = read(field!(self, participant_pids));
        let usernames = read(field!(self, usernames))
            .map(|raw| String::from_utf8_lossy(decode_bytes(&raw)).into_owned());
        Participants { pids, usernames }
    }

    /// Assigns a slot to `request`.
    ///
    /// Humans take the first free slot, except slot 2 once an autoplay opponent was
    /// requested; the autoplay peer only ever takes slot 2.
    #[instrument(level = "debug", skip(self, lock))]
    pub fn record_join(
        &self,
        lock: &PidLockGuard<'_>,
        request: &JoinRequest,
    ) -> Result<Player, JoinRejection> {
        request.validate()?;
        let participants = self.participants(lock);
        let autoplay = self.autoplay();

        if matches!(request.mode, JoinMode::RequestAutoplay { .. })
            && participants.connected().next().is_some()
        {
            return Err(JoinRejection::AutoplayUnavailable);
        }

        let slot = match request.mode {
            JoinMode::AutoplayPeer => {
                Some(Player::Two).filter(|p| autoplay.is_some() && participants.pid(*p).is_none())
            }
            _ => Player::ALL.into_iter().find(|p| {
                participants.pid(*p).is_none() && !(autoplay.is_some() && *p == Player::Two)
            }),
        };
        let Some(player) = slot else {
            return Err(JoinRejection::TooManyPlayers);
        };

        if participants
            .connected()
            .any(|(p, _)| participants.username(p) == Some(request.username.as_str()))
        {
            return Err(JoinRejection::DuplicateUsername(request.username.clone()));
        }

        if let JoinMode::RequestAutoplay {
            difficulty,
            agent_path,
        } = &request.mode
        {
            let path = agent_path.as_os_str().as_bytes();
            if path.is_empty() || path.len() > PATH_MAX {
                return Err(JoinRejection::AutoplayUnavailable);
            }
            write(field!(self, ai_agent_path), encode_str(path));
            write(field!(self, autoplay_difficulty), Difficulty::to_raw(Some(*difficulty)));
        }

        let mut usernames = read(field!(self, usernames));
        usernames[player.slot()] = encode_str(request.username.as_bytes());
        write(field!(self, usernames), usernames);
        let mut pids = read(field!(self, participant_pids));
        pids[player.slot()] = request.pid;
        write(field!(self, participant_pids), pids);

        debug!(?player, "slot assigned");
        Ok(player)
    }

    /// Frees the slot of `player` if it still belongs to `pid`.
    ///
    /// An autoplay request leaves with the human who made it (always player one), so the
    /// next human is not paired with a computer they never asked for.
    pub fn record_quit(&self, _lock: &PidLockGuard<'_>, player: Player, pid: i32) -> bool {
        let mut pids = read(field!(self, participant_pids));
        if pids[player.slot()] != pid {
            return false;
        }
        pids[player.slot()] = 0;
        write(field!(self, participant_pids), pids);
        let mut usernames = read(field!(self, usernames));
        usernames[player.slot()] = [0; USERNAME_MAX + 1];
        write(field!(self, usernames), usernames);
        if player == Player::One && self.autoplay().is_some() {
            write(field!(self, autoplay_difficulty), Difficulty::to_raw(None));
            write(field!(self, ai_agent_path), [0; PATH_MAX + 1]);
            debug!("autoplay request withdrawn");
        }
        debug!(?player, pid, "slot cleared");
        true
    }
}

impl Drop for SharedState {
    fn drop(&mut self) {
        if unsafe { libc::shmdt(self.ptr.as_ptr() as *const libc::c_void) } < 0 {
            warn!("could not detach store: {}", io::Error::last_os_error());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::configuration::test_support::unique_key;
    use crate::semaphores::SynchronizationSet;

    struct Fixture {
        store: SharedState,
        sems: SynchronizationSet,
    }

    impl Fixture {
        fn new() -> Fixture {
            let key = unique_key();
            let store = SharedState::create(key).unwrap();
            store.initialize(&SessionSettings::new(5, ['X', 'O']), 4242);
            let sems =
                SynchronizationSet::create(key, Player::One, Duration::from_millis(20)).unwrap();
            Fixture { store, sems }
        }

        fn join(&self, name: &str, pid: i32, mode: JoinMode) -> Result<Player, JoinRejection> {
            let guard = self.sems.lock().unwrap();
            self.store.record_join(
                &guard,
                &JoinRequest {
                    username: name.to_owned(),
                    pid,
                    mode,
                },
            )
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.store.destroy().unwrap();
            self.sems.destroy().unwrap();
        }
    }

    fn autoplay(difficulty: Difficulty) -> JoinMode {
        JoinMode::RequestAutoplay {
            difficulty,
            agent_path: PathBuf::from("/usr/local/bin/tris-client"),
        }
    }

    #[test]
    fn initialized_store_reads_back() {
        let f = Fixture::new();
        assert_eq!(f.store.coordinator_pid(), 4242);
        assert_eq!(f.store.board(), Board::new());
        assert_eq!(f.store.result(), GameResult::NotFinished);
        assert_eq!(f.store.symbols(), ['X', 'O']);
        assert_eq!(f.store.timeout_seconds(), 5);
        assert_eq!(f.store.starting_player(), Player::One);
        assert_eq!(f.store.autoplay(), None);
        assert_eq!(f.store.ai_agent_path(), None);
    }

    #[test]
    fn second_mapping_sees_the_same_record() {
        let f = Fixture::new();
        let other = SharedState::attach_existing(f.store.key).unwrap();
        assert!(!other.is_creator());
        other
            .place(Position::new(0, 1).unwrap(), Player::Two)
            .unwrap();
        assert_eq!(f.store.board().cells()[3], Cell::PlayerTwo);
        assert!(matches!(
            f.store.place(Position::new(0, 1).unwrap(), Player::One),
            Err(MoveError::Occupied { row: 1, col: 2 })
        ));
    }

    #[test]
    fn missing_store_is_not_found() {
        assert!(matches!(
            SharedState::attach_existing(unique_key()),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn second_creation_on_a_key_fails() {
        let f = Fixture::new();
        assert!(matches!(
            SharedState::create(f.store.key),
            Err(StoreError::AlreadyExists { .. })
        ));
        // the first record is untouched
        assert_eq!(f.store.coordinator_pid(), 4242);
        assert_eq!(
            SharedState::segment_creator(f.store.key).unwrap(),
            std::process::id() as i32
        );
    }

    #[test]
    fn segment_of_another_layout_can_be_removed() {
        let key = unique_key();
        let id = unsafe { libc::shmget(key, 16, libc::IPC_CREAT | 0o640) };
        assert!(id >= 0);
        assert!(matches!(
            SharedState::attach_existing(key),
            Err(StoreError::LayoutMismatch { found: 16, .. })
        ));
        SharedState::remove_segment(key).unwrap();
        assert!(matches!(
            SharedState::attach_existing(key),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn result_is_written_once() {
        let f = Fixture::new();
        assert!(!f.store.set_result(GameResult::NotFinished));
        assert!(f.store.set_result(GameResult::Draw));
        assert!(!f.store.set_result(GameResult::PlayerOneWins));
        assert!(!f.store.set_forfeit(Player::One));
        assert_eq!(f.store.result(), GameResult::Draw);
        assert_eq!(f.store.forfeited_by(), None);
    }

    #[test]
    fn forfeit_records_the_quitter() {
        let f = Fixture::new();
        assert!(f.store.set_forfeit(Player::Two));
        assert_eq!(f.store.result(), GameResult::Quit);
        assert_eq!(f.store.forfeited_by(), Some(Player::Two));
    }

    #[test]
    fn third_joiner_is_rejected() {
        let f = Fixture::new();
        assert_eq!(f.join("alice", 10, JoinMode::Human), Ok(Player::One));
        assert_eq!(f.join("bob", 11, JoinMode::Human), Ok(Player::Two));
        assert_eq!(
            f.join("carol", 12, JoinMode::Human),
            Err(JoinRejection::TooManyPlayers)
        );
    }

    #[test]
    fn usernames_are_unique() {
        let f = Fixture::new();
        f.join("alice", 10, JoinMode::Human).unwrap();
        assert_eq!(
            f.join("alice", 11, JoinMode::Human),
            Err(JoinRejection::DuplicateUsername("alice".to_owned()))
        );
        assert!(matches!(
            f.join("", 11, JoinMode::Human),
            Err(JoinRejection::InvalidUsername(_))
        ));
        assert!(matches!(
            f.join(AI_USERNAME, 11, JoinMode::Human),
            Err(JoinRejection::ReservedUsername(_))
        ));
    }

    #[test]
    fn quit_frees_the_slot() {
        let f = Fixture::new();
        f.join("alice", 10, JoinMode::Human).unwrap();
        f.join("bob", 11, JoinMode::Human).unwrap();
        {
            let guard = f.sems.lock().unwrap();
            assert!(!f.store.record_quit(&guard, Player::One, 99));
            assert!(f.store.record_quit(&guard, Player::One, 10));
            let participants = f.store.participants(&guard);
            assert_eq!(participants.pid(Player::One), None);
            assert_eq!(participants.username(Player::Two), Some("bob"));
        }
        assert_eq!(f.join("carol", 12, JoinMode::Human), Ok(Player::One));
    }

    #[test]
    fn autoplay_reserves_slot_two_for_the_peer() {
        let f = Fixture::new();
        assert_eq!(f.join("alice", 10, autoplay(Difficulty::Medium)), Ok(Player::One));
        assert_eq!(f.store.autoplay(), Some(Difficulty::Medium));
        assert_eq!(
            f.store.ai_agent_path(),
            Some(PathBuf::from("/usr/local/bin/tris-client"))
        );
        assert_eq!(
            f.join("bob", 11, JoinMode::Human),
            Err(JoinRejection::TooManyPlayers)
        );
        assert_eq!(f.join(AI_USERNAME, 12, JoinMode::AutoplayPeer), Ok(Player::Two));
        assert_eq!(
            f.join(AI_USERNAME, 13, JoinMode::AutoplayPeer),
            Err(JoinRejection::TooManyPlayers)
        );
    }

    #[test]
    fn autoplay_request_leaves_with_its_requester() {
        let f = Fixture::new();
        f.join("alice", 10, autoplay(Difficulty::Easy)).unwrap();
        f.join(AI_USERNAME, 12, JoinMode::AutoplayPeer).unwrap();
        {
            let guard = f.sems.lock().unwrap();
            assert!(f.store.record_quit(&guard, Player::One, 10));
            assert!(f.store.record_quit(&guard, Player::Two, 12));
        }
        assert_eq!(f.store.autoplay(), None);
        assert_eq!(f.store.ai_agent_path(), None);

        assert_eq!(f.join("bob", 20, JoinMode::Human), Ok(Player::One));
        assert_eq!(f.join("carol", 21, JoinMode::Human), Ok(Player::Two));
    }

    #[test]
    fn autoplay_needs_an_empty_session() {
        let f = Fixture::new();
        f.join("alice", 10, JoinMode::Human).unwrap();
        assert_eq!(
            f.join("bob", 11, autoplay(Difficulty::Hard)),
            Err(JoinRejection::AutoplayUnavailable)
        );
        assert_eq!(f.store.autoplay(), None);
        // without a request the peer has nowhere to go
        assert_eq!(
            f.join(AI_USERNAME, 12, JoinMode::AutoplayPeer),
            Err(JoinRejection::TooManyPlayers)
        );
    }
}
