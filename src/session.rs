//! Per-process session context.
//!
//! Each process owns exactly one [`Session`]: its configuration, its handles on the store
//! and the semaphore set, and the lifecycle notifier. Every protocol operation receives it
//! explicitly.

use anyhow::Context;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tracing::{info, instrument, warn};

use crate::configuration::{Configuration, SessionSettings};
use crate::error::{StoreError, SyncError};
use crate::notifier::{Notifier, Role};
use crate::semaphores::SynchronizationSet;
use crate::shared_state::SharedState;

/// Whether `pid` names a running (non-zombie) process.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let pid = Pid::from_u32(pid as u32);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid)
        .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
}

/// Everything one process holds for the session it takes part in.
#[derive(Debug)]
pub struct Session {
    pub(crate) config: Configuration,
    pub(crate) store: SharedState,
    pub(crate) sems: SynchronizationSet,
    pub(crate) notifier: Notifier,
    pub(crate) pid: i32,
}

impl Session {
    /// Creates a fresh session as its coordinator.
    ///
    /// Fails with [`StoreError::SessionAlreadyActive`] if another coordinator is alive, and
    /// with [`StoreError::AlreadyExists`] if one claims the key concurrently. The leftovers
    /// of a coordinator that died without cleaning up are removed first.
    #[instrument(level = "debug", skip(config))]
    pub fn open_coordinator(
        config: Configuration,
        settings: SessionSettings,
    ) -> anyhow::Result<Session> {
        settings.validate()?;
        let pid = std::process::id() as i32;
        let key = config.ipc_key;
        let notifier = Notifier::install(Role::Coordinator).context("could not install handlers")?;

        remove_stale_session(&config, pid)?;

        // the exclusive segment is the claim on the key
        let mut store = SharedState::create(key)?;
        store.initialize(&settings, pid);
        let sems =
            match SynchronizationSet::create(key, settings.starting_player, config.poll_interval) {
                Ok(sems) => sems,
                Err(e) => {
                    let _ = store.destroy();
                    return Err(e.into());
                }
            };
        info!(key, pid, "session created");

        Ok(Session {
            config,
            store,
            sems,
            notifier,
            pid,
        })
    }

    /// Attaches to the running session as a player agent (not joined yet).
    #[instrument(level = "debug", skip(config))]
    pub fn join_agent(config: Configuration) -> anyhow::Result<Session> {
        let pid = std::process::id() as i32;
        let key = config.ipc_key;
        // handlers first: the coordinator may signal as soon as we hold a slot
        let notifier = Notifier::install(Role::Agent).context("could not install handlers")?;

        let store = SharedState::attach_existing(key)?;
        let coordinator = store.coordinator_pid();
        if !process_alive(coordinator) {
            return Err(StoreError::NotFound { key }).context("the session has no live server");
        }
        let sems = SynchronizationSet::attach_existing(key, config.poll_interval)?;
        info!(key, coordinator, "attached to session");

        Ok(Session {
            config,
            store,
            sems,
            notifier,
            pid,
        })
    }

    /// Configuration this session was opened with.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Store handle.
    pub fn store(&self) -> &SharedState {
        &self.store
    }

    /// Semaphore handle.
    pub fn sems(&self) -> &SynchronizationSet {
        &self.sems
    }

    /// Event source of this process.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Pid of this process.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Removes the store and the semaphore set. A no-op for agents and on repeated calls.
    pub fn teardown(&mut self) -> anyhow::Result<()> {
        self.sems.destroy().context("could not remove semaphore set")?;
        self.store.destroy().context("could not remove shared state")?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("session teardown failed: {e:#}");
        }
    }
}

fn remove_stale_session(config: &Configuration, own_pid: i32) -> anyhow::Result<()> {
    let key = config.ipc_key;
    match SharedState::attach_existing(key) {
        Ok(mut stale) => {
            let mut owner = stale.coordinator_pid();
            if owner == 0 {
                // created but not initialized yet
                owner = SharedState::segment_creator(key)?;
            }
            if owner != own_pid && process_alive(owner) {
                return Err(StoreError::SessionAlreadyActive { pid: owner }.into());
            }
            warn!(key, owner, "removing the session left by a dead server");
            stale.claim();
            stale.destroy()?;
        }
        Err(StoreError::LayoutMismatch { found, expected }) => {
            let owner = SharedState::segment_creator(key)?;
            if owner != own_pid && process_alive(owner) {
                return Err(StoreError::SessionAlreadyActive { pid: owner }.into());
            }
            warn!(key, owner, found, expected, "removing a foreign segment left on the key");
            SharedState::remove_segment(key)?;
        }
        Err(StoreError::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }
    match SynchronizationSet::attach_existing(key, config.poll_interval) {
        Ok(mut stale) => {
            stale.claim();
            stale.destroy()?;
        }
        Err(SyncError::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
