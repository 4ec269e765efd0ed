//! The autoplay peer: a second agent process started by the coordinator.
//!
//! The child runs the agent executable recorded at join time with the reserved username
//! and finds the session through `TRIS_IPC_KEY`. It is killed and reaped if still running
//! when its handle drops.

use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::shared_state::AI_USERNAME;

/// Hidden flag telling the agent binary it is the autoplay peer.
pub const AUTOPLAY_PEER_FLAG: &str = "--autoplay-peer";

fn create_process(command: &Path, args: &[&str], ipc_key: i32) -> anyhow::Result<Child> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .env("TRIS_IPC_KEY", format!("{ipc_key:#x}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        // terminal interrupts are meant for the humans' processes
        .process_group(0);
    cmd.spawn()
        .with_context(|| format!("command '{}' not found", command.display()))
}

/// Handle on the running peer.
#[derive(Debug)]
pub struct AutoplayPeer {
    child: Child,
    reaped: bool,
}

impl AutoplayPeer {
    /// Starts `agent_path` as the autoplay peer of session `ipc_key`.
    pub fn launch(agent_path: &Path, ipc_key: i32) -> anyhow::Result<AutoplayPeer> {
        let child = create_process(agent_path, &[AI_USERNAME, AUTOPLAY_PEER_FLAG], ipc_key)
            .context("could not start the autoplay peer")?;
        info!(pid = child.id(), path = %agent_path.display(), "autoplay peer started");
        Ok(AutoplayPeer {
            child,
            reaped: false,
        })
    }

    /// Pid of the peer.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Waits up to `grace` for the peer to exit on its own, then kills it.
    pub fn try_reap(&mut self, grace: Duration) -> anyhow::Result<()> {
        if self.reaped {
            return Ok(());
        }
        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.child.try_wait().context("could not poll the peer")? {
                debug!(%status, "autoplay peer exited");
                self.reaped = true;
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        warn!(pid = self.child.id(), "autoplay peer still running, killing it");
        self.child.kill().context("could not kill the peer")?;
        self.child.wait().context("could not reap the peer")?;
        self.reaped = true;
        Ok(())
    }
}

impl Drop for AutoplayPeer {
    fn drop(&mut self) {
        if let Err(e) = self.try_reap(Duration::ZERO) {
            warn!("autoplay peer cleanup failed: {e:#}");
        }
    }
}
