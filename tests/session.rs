//! End-to-end sessions: a real `tris-server` and real `tris-client` processes per test, each
//! test on its own IPC key.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const SERVER: &str = env!("CARGO_BIN_EXE_tris-server");
const CLIENT: &str = env!("CARGO_BIN_EXE_tris-client");
const PATIENCE: Duration = Duration::from_secs(20);

fn unique_key() -> i32 {
    static NEXT: AtomicI32 = AtomicI32::new(0);
    let pid = (std::process::id() & 0x7fff) as i32;
    0x5500_0000 | (pid << 8) | (NEXT.fetch_add(1, Ordering::Relaxed) & 0xff)
}

struct Proc {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
    seen: Vec<String>,
}

impl Proc {
    fn spawn(program: &str, args: &[&str], key: i32, input: &str) -> Proc {
        let mut child = Command::new(program)
            .args(args)
            .env("TRIS_IPC_KEY", key.to_string())
            .env("TRIS_VERBOSE", "true")
            .env("TRIS_LOG", "false")
            .env("TRIS_POLL_MS", "20")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let mut stdin = child.stdin.take().unwrap();
        stdin.write_all(input.as_bytes()).unwrap();
        stdin.flush().unwrap();

        let stdout = child.stdout.take().unwrap();
        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Proc {
            child,
            stdin: Some(stdin),
            lines,
            seen: Vec::new(),
        }
    }

    fn server(args: &[&str], key: i32) -> Proc {
        let mut server = Proc::spawn(SERVER, args, key, "");
        assert!(server.wait_for("Waiting for players"), "{:?}", server.seen);
        server
    }

    fn client(args: &[&str], key: i32, input: &str) -> Proc {
        Proc::spawn(CLIENT, args, key, input)
    }

    fn pid(&self) -> i32 {
        self.child.id() as i32
    }

    /// Reads output until a line contains `needle`.
    fn wait_for(&mut self, needle: &str) -> bool {
        let deadline = Instant::now() + PATIENCE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    let found = line.contains(needle);
                    self.seen.push(line);
                    if found {
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false
                }
            }
        }
    }

    /// Waits for the process to exit and returns its status and whole output.
    fn finish(mut self) -> (ExitStatus, String) {
        let deadline = Instant::now() + PATIENCE;
        let status = loop {
            if let Some(status) = self.child.try_wait().unwrap() {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = self.child.kill();
                panic!("process did not exit, output so far: {:?}", self.seen);
            }
            thread::sleep(Duration::from_millis(20));
        };
        while let Ok(line) = self.lines.recv_timeout(Duration::from_secs(5)) {
            self.seen.push(line);
        }
        (status, self.seen.join("\n"))
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        self.stdin.take();
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn terminate(proc: &Proc) {
    send_signal(proc, libc::SIGTERM);
}

fn send_signal(proc: &Proc, signal: libc::c_int) {
    assert_eq!(unsafe { libc::kill(proc.pid(), signal) }, 0);
}

/// Kills without giving the process a chance to clean up.
fn kill_outright(proc: &mut Proc) {
    proc.child.kill().unwrap();
    proc.child.wait().unwrap();
}

fn remove_semaphores(key: i32) {
    let id = unsafe { libc::semget(key, 0, 0) };
    assert!(id >= 0, "no semaphore set for {key:#x}");
    assert_eq!(unsafe { libc::semctl(id, 0, libc::IPC_RMID) }, 0);
}

/// Removes what a killed server left behind.
fn remove_leftovers(key: i32) {
    unsafe {
        let shm = libc::shmget(key, 0, 0);
        if shm >= 0 {
            libc::shmctl(shm, libc::IPC_RMID, std::ptr::null_mut());
        }
        let sem = libc::semget(key, 0, 0);
        if sem >= 0 {
            libc::semctl(sem, 0, libc::IPC_RMID);
        }
    }
}

#[test]
fn diagonal_win_between_two_humans() {
    let key = unique_key();
    let server = Proc::server(&["0", "X", "O"], key);
    let mut alice = Proc::client(&["alice"], key, "1 1\n2 2\n3 3\n");
    assert!(alice.wait_for("Joined as player one"), "{:?}", alice.seen);
    let bob = Proc::client(&["bob"], key, "1 2\n1 3\n");

    let (status, out) = server.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("alice joined as player one"), "{out}");
    assert!(out.contains("bob joined as player two"), "{out}");
    assert!(out.contains("Result: player one wins"), "{out}");

    let (status, out) = alice.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("You win!"), "{out}");
    let (status, out) = bob.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("You lose"), "{out}");
}

#[test]
fn invalid_moves_are_asked_again() {
    let key = unique_key();
    let server = Proc::server(&["0", "X", "O"], key);
    let mut alice = Proc::client(&["alice"], key, "0 0\n1 1\n2 1\n3 1\n");
    assert!(alice.wait_for("Joined as player one"), "{:?}", alice.seen);
    // bob tries alice's cell first
    let bob = Proc::client(&["bob"], key, "1 1\n1 2\n1 3\n");

    let (status, out) = server.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("Result: player one wins"), "{out}");
    let (_, out) = alice.finish();
    assert!(out.contains("outside the grid"), "{out}");
    let (_, out) = bob.finish();
    assert!(out.contains("already occupied"), "{out}");
}

#[test]
fn extra_players_are_turned_away() {
    let key = unique_key();
    let server = Proc::server(&["0", "X", "O"], key);
    let mut alice = Proc::client(&["alice"], key, "");
    assert!(alice.wait_for("Joined as player one"), "{:?}", alice.seen);

    let (status, _) = Proc::client(&["alice"], key, "").finish();
    assert_eq!(status.code(), Some(2));
    let (status, _) = Proc::client(&["Computer"], key, "").finish();
    assert_eq!(status.code(), Some(2));

    let mut bob = Proc::client(&["bob"], key, "");
    assert!(bob.wait_for("Joined as player two"), "{:?}", bob.seen);
    let (status, _) = Proc::client(&["carol"], key, "").finish();
    assert_eq!(status.code(), Some(2));

    // the operator stops the game: both agents hear about it
    assert!(bob.wait_for("Game started"), "{:?}", bob.seen);
    terminate(&server);
    let (status, out) = server.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("server stopped, game abandoned"), "{out}");
    let (_, out) = alice.finish();
    assert!(out.contains("The server"), "{out}");
    let (_, out) = bob.finish();
    assert!(out.contains("The server"), "{out}");
}

#[test]
fn quitting_player_forfeits() {
    let key = unique_key();
    let server = Proc::server(&["0", "X", "O"], key);
    let mut alice = Proc::client(&["alice"], key, "");
    assert!(alice.wait_for("Joined as player one"), "{:?}", alice.seen);
    let mut bob = Proc::client(&["bob"], key, "");
    assert!(bob.wait_for("Game started"), "{:?}", bob.seen);

    terminate(&bob);
    let (status, out) = bob.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("You quit"), "{out}");

    let (status, out) = server.finish();
    assert!(status.success(), "{out}");
    assert!(
        out.contains("player one wins by forfeit (player two quit)"),
        "{out}"
    );
    let (_, out) = alice.finish();
    assert!(out.contains("you win by forfeit"), "{out}");
}

#[test]
fn quitting_before_the_start_frees_the_slot() {
    let key = unique_key();
    let server = Proc::server(&["0", "X", "O"], key);
    let mut alice = Proc::client(&["alice"], key, "");
    assert!(alice.wait_for("Joined as player one"), "{:?}", alice.seen);
    terminate(&alice);
    let (status, _) = alice.finish();
    assert!(status.success());

    let mut carol = Proc::client(&["carol"], key, "1 1\n2 1\n3 1\n");
    assert!(carol.wait_for("Joined as player one"), "{:?}", carol.seen);
    let dave = Proc::client(&["dave"], key, "1 2\n2 2\n");

    let (status, out) = server.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("alice left"), "{out}");
    assert!(out.contains("Result: player one wins"), "{out}");
    drop(carol);
    drop(dave);
}

#[test]
fn silent_player_times_out() {
    let key = unique_key();
    let server = Proc::server(&["1", "X", "O"], key);
    let mut alice = Proc::client(&["alice"], key, "");
    assert!(alice.wait_for("Joined as player one"), "{:?}", alice.seen);
    let bob = Proc::client(&["bob"], key, "");

    let (status, out) = alice.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("Time is up"), "{out}");
    let (_, out) = server.finish();
    assert!(
        out.contains("player two wins by forfeit (player one quit)"),
        "{out}"
    );
    let (_, out) = bob.finish();
    assert!(out.contains("you win by forfeit"), "{out}");
}

#[test]
fn computer_opponent_never_loses() {
    let key = unique_key();
    let server = Proc::server(&["0", "X", "O"], key);
    let every_cell = "1 1\n1 2\n1 3\n2 1\n2 2\n2 3\n3 1\n3 2\n3 3\n";
    let alice = Proc::client(&["alice", "hard"], key, every_cell);

    let (status, out) = server.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("Computer joined as player two"), "{out}");
    assert!(!out.contains("Result: player one wins"), "{out}");
    assert!(
        out.contains("Result: player two wins") || out.contains("Result: draw"),
        "{out}"
    );
    let (status, _) = alice.finish();
    assert!(status.success());
}

#[test]
fn client_without_server_fails() {
    let (status, _) = Proc::client(&["alice"], unique_key(), "").finish();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn second_server_is_refused() {
    let key = unique_key();
    let server = Proc::server(&["0", "X", "O"], key);
    let (status, _) = Proc::spawn(SERVER, &["0", "X", "O"], key, "").finish();
    assert_eq!(status.code(), Some(1));
    terminate(&server);
    assert!(server.finish().0.success());
}

#[test]
fn killed_server_releases_its_agents() {
    let key = unique_key();
    let mut server = Proc::server(&["0", "X", "O"], key);
    let mut alice = Proc::client(&["alice"], key, "");
    assert!(alice.wait_for("Joined as player one"), "{:?}", alice.seen);
    let mut bob = Proc::client(&["bob"], key, "");
    assert!(bob.wait_for("Game started"), "{:?}", bob.seen);
    assert!(alice.wait_for("Your turn"), "{:?}", alice.seen);

    // alice is reading her move, bob is blocked on his turn-gate
    kill_outright(&mut server);
    let (status, out) = alice.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("The session was closed."), "{out}");
    let (status, out) = bob.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("The session was closed."), "{out}");
    remove_leftovers(key);
}

#[test]
fn killed_player_forfeits() {
    let key = unique_key();
    let server = Proc::server(&["0", "X", "O"], key);
    let mut alice = Proc::client(&["alice"], key, "1 1\n");
    assert!(alice.wait_for("Joined as player one"), "{:?}", alice.seen);
    let mut bob = Proc::client(&["bob"], key, "");
    assert!(bob.wait_for("Your turn"), "{:?}", bob.seen);

    kill_outright(&mut bob);
    let (status, out) = server.finish();
    assert!(status.success(), "{out}");
    assert!(
        out.contains("player one wins by forfeit (player two quit)"),
        "{out}"
    );
    let (status, out) = alice.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("you win by forfeit"), "{out}");
}

#[test]
fn second_interrupt_quits() {
    let key = unique_key();
    let server = Proc::server(&["0", "X", "O"], key);
    let mut alice = Proc::client(&["alice"], key, "");
    assert!(alice.wait_for("Joined as player one"), "{:?}", alice.seen);
    let mut bob = Proc::client(&["bob"], key, "");
    assert!(bob.wait_for("Game started"), "{:?}", bob.seen);

    send_signal(&bob, libc::SIGINT);
    assert!(bob.wait_for("Interrupt again to quit"), "{:?}", bob.seen);
    thread::sleep(Duration::from_millis(100));
    assert!(bob.child.try_wait().unwrap().is_none(), "one interrupt ended the agent");

    send_signal(&bob, libc::SIGINT);
    let (status, out) = bob.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("You quit"), "{out}");
    let (status, out) = server.finish();
    assert!(status.success(), "{out}");
    assert!(
        out.contains("player one wins by forfeit (player two quit)"),
        "{out}"
    );
    let (_, out) = alice.finish();
    assert!(out.contains("you win by forfeit"), "{out}");
}

#[test]
fn removed_semaphores_end_every_process() {
    let key = unique_key();
    let server = Proc::server(&["0", "X", "O"], key);
    let mut alice = Proc::client(&["alice"], key, "");
    assert!(alice.wait_for("Joined as player one"), "{:?}", alice.seen);
    let mut bob = Proc::client(&["bob"], key, "");
    assert!(bob.wait_for("Game started"), "{:?}", bob.seen);

    // bob is blocked on his turn-gate: it vanishes, then the explanation arrives
    remove_semaphores(key);
    send_signal(&bob, libc::SIGUSR2);
    let (status, out) = bob.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("The server quit."), "{out}");

    let (status, _) = server.finish();
    assert_eq!(status.code(), Some(1));
    // no notice reaches alice, she finds the server gone
    let (status, out) = alice.finish();
    assert!(status.success(), "{out}");
    assert!(out.contains("The session was closed."), "{out}");
    remove_leftovers(key);
}
