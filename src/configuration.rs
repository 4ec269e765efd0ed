//! Config for the session processes
//!
//! Process-level options are read by [`Configuration::from_env()`] or built programmatically
//! with [`Configuration::new()`] and the `with_*` methods. Per-session settings (timeout,
//! symbols, initial player) come from the coordinator command line and live in
//! [`SessionSettings`].
//!
//! # Environment Variables
//!
//! All values are optional. Flags are case-insensitive; set them to `"true"` to enable.
//!
//! - `TRIS_VERBOSE` — Print progress messages (default: `true`)
//! - `TRIS_LOG` — Enable logging to a file (default: `false`)
//! - `TRIS_IPC_KEY` — System V key of the session, decimal or `0x` hexadecimal (default: `0x74726973`)
//! - `TRIS_POLL_MS` — Longest sleep of an event-aware semaphore wait (default: `200`)
//! - `TRIS_TEARDOWN_GRACE_MS` — How long an agent waits for the end-of-session signal after
//!   the semaphore set disappeared (default: `2000`)

use std::time::Duration;

use anyhow::{bail, Context};

use crate::game::Player;

/// Key used when `TRIS_IPC_KEY` is unset ("tris" in ASCII).
pub const DEFAULT_IPC_KEY: i32 = 0x7472_6973;

/// Process-level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) ipc_key: i32,
    pub(crate) poll_interval: Duration,
    pub(crate) teardown_grace: Duration,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Progress messages are printed to stdout.
    /// - Logging to file is disabled.
    /// - The session key is [`DEFAULT_IPC_KEY`].
    /// - Event-aware waits recheck the notifier every 200ms.
    /// - Agents wait 2s for the end-of-session signal after a teardown.
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            ipc_key: DEFAULT_IPC_KEY,
            poll_interval: Duration::from_millis(200),
            teardown_grace: Duration::from_millis(2000),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Unset variables keep their default value. Malformed numeric values are errors.
    pub fn from_env() -> anyhow::Result<Self> {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_millis(var: &str, default: Duration) -> anyhow::Result<Duration> {
            match std::env::var(var) {
                Ok(val) => Ok(Duration::from_millis(
                    val.trim()
                        .parse()
                        .with_context(|| format!("{var}: '{val}' is not a number of milliseconds"))?,
                )),
                Err(_) => Ok(default),
            }
        }

        let defaults = Self::new();
        let ipc_key = match std::env::var("TRIS_IPC_KEY") {
            Ok(val) => parse_key(&val).with_context(|| format!("TRIS_IPC_KEY: '{val}'"))?,
            Err(_) => defaults.ipc_key,
        };

        Ok(Self {
            verbose: get_env_flag("TRIS_VERBOSE", defaults.verbose),
            log: get_env_flag("TRIS_LOG", defaults.log),
            ipc_key,
            poll_interval: get_env_millis("TRIS_POLL_MS", defaults.poll_interval)?,
            teardown_grace: get_env_millis("TRIS_TEARDOWN_GRACE_MS", defaults.teardown_grace)?,
        })
    }

    /// Enable or disable progress messages.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Use another System V key, to run independent sessions side by side.
    pub fn with_ipc_key(mut self, key: i32) -> Self {
        self.ipc_key = key;
        self
    }

    /// Longest sleep of an event-aware semaphore wait.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long an agent waits for the end-of-session signal after a teardown.
    pub fn with_teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = grace;
        self
    }

    /// System V key of the session.
    pub fn ipc_key(&self) -> i32 {
        self.ipc_key
    }

    /// Whether progress messages are printed.
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Whether logs go to a file.
    pub fn log(&self) -> bool {
        self.log
    }

    /// Longest a blocked wait goes without rechecking its surroundings.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_key(s: &str) -> anyhow::Result<i32> {
    let s = s.trim();
    let key = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16)? as i32,
        None => s.parse::<i32>()?,
    };
    // IPC_PRIVATE would create a fresh, undiscoverable object
    if key == libc::IPC_PRIVATE {
        bail!("key 0 is reserved");
    }
    Ok(key)
}

/// Settings the coordinator writes once into the store before agents join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Per-move deadline in seconds, `0` disables it.
    pub timeout_seconds: u32,
    /// Symbols of player one and player two.
    pub symbols: [char; 2],
    /// Who owns the first turn.
    pub starting_player: Player,
}

impl SessionSettings {
    /// Settings with player one starting.
    pub fn new(timeout_seconds: u32, symbols: [char; 2]) -> Self {
        Self {
            timeout_seconds,
            symbols,
            starting_player: Player::One,
        }
    }

    /// Let `player` own the first turn.
    pub fn with_starting_player(mut self, player: Player) -> Self {
        self.starting_player = player;
        self
    }

    /// Symbols must be distinct and visible.
    pub fn validate(&self) -> anyhow::Result<()> {
        let [one, two] = self.symbols;
        for symbol in self.symbols {
            if symbol.is_whitespace() || symbol.is_control() {
                bail!("symbol {symbol:?} is not printable");
            }
        }
        if one == two {
            bail!("both players cannot use the symbol '{one}'");
        }
        Ok(())
    }
}
