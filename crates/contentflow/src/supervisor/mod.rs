//! Keeps one live worker per pipeline step and restarts workers that exit.

pub mod launcher;
pub mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::error::SupervisorError;

pub use launcher::{
    ProcessLauncher, ThreadLauncher, WorkerExitStatus, WorkerFn, WorkerHandle, WorkerLauncher,
};
pub use shutdown::{Shutdown, ShutdownToken};

/// A worker the supervisor noticed had exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub name: String,
    pub status: WorkerExitStatus,
    /// Whether a replacement was started.
    pub restarted: bool,
}

/// Registry view of one supervised worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub name: String,
    pub args: Vec<String>,
    pub restarts: u32,
    pub running: bool,
}

struct WorkerEntry {
    name: String,
    launcher: Arc<dyn WorkerLauncher>,
    args: Vec<String>,
    handle: Option<Box<dyn WorkerHandle>>,
    restarts: u32,
}

impl WorkerEntry {
    fn launch(&mut self, shutdown: &Shutdown) -> Result<(), SupervisorError> {
        let handle = self.launcher.launch(&self.name, &self.args, shutdown.token())?;
        info!("Worker {} started as {}", self.name, handle.id());
        self.handle = Some(handle);
        Ok(())
    }
}

pub struct Supervisor {
    entries: Vec<WorkerEntry>,
    shutdown: Shutdown,
    poll_interval: Duration,
    started: bool,
}

impl Supervisor {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            entries: Vec::new(),
            shutdown: Shutdown::new(),
            poll_interval,
            started: false,
        }
    }

    /// Registers a worker to be started by [`Supervisor::start`].
    pub fn add_worker(
        &mut self,
        name: &str,
        launcher: Arc<dyn WorkerLauncher>,
        args: Vec<String>,
    ) -> &mut Self {
        self.entries.push(WorkerEntry {
            name: name.to_string(),
            launcher,
            args,
            handle: None,
            restarts: 0,
        });
        self
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.entries
            .iter()
            .map(|e| WorkerInfo {
                name: e.name.clone(),
                args: e.args.clone(),
                restarts: e.restarts,
                running: e.handle.is_some(),
            })
            .collect()
    }

    /// Token that observes this supervisor's shutdown.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.token()
    }

    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if self.started {
            return Err(SupervisorError::AlreadyStarted);
        }
        if self.entries.is_empty() {
            return Err(SupervisorError::NoWorkers);
        }

        for entry in &mut self.entries {
            entry.launch(&self.shutdown)?;
        }
        self.started = true;
        info!("Supervisor started {} workers", self.entries.len());
        Ok(())
    }

    /// Checks every worker once and replaces the ones that exited. A worker
    /// whose replacement failed to start is retried on the next poll.
    pub fn poll_once(&mut self) -> Vec<WorkerExit> {
        let mut exits = Vec::new();
        let relaunch = self.started && !self.shutdown.is_signalled();

        for entry in &mut self.entries {
            let status = entry.handle.as_mut().and_then(|h| h.try_exit());
            if let Some(status) = &status {
                entry.handle = None;
                if status.is_crash() {
                    error!("Worker {} {}", entry.name, status);
                } else {
                    warn!("Worker {} returned", entry.name);
                }
            }

            let restarted = relaunch
                && entry.handle.is_none()
                && match entry.launch(&self.shutdown) {
                    Ok(()) => {
                        entry.restarts += 1;
                        true
                    }
                    Err(e) => {
                        error!("Failed to restart worker {}: {}", entry.name, e);
                        false
                    }
                };

            if let Some(status) = status {
                exits.push(WorkerExit {
                    name: entry.name.clone(),
                    status,
                    restarted,
                });
            }
        }

        exits
    }

    /// Polls until `stop` is signalled, then shuts the workers down.
    pub fn run(&mut self, stop: &ShutdownToken) -> Vec<WorkerExit> {
        while !stop.wait_timeout(self.poll_interval) {
            self.poll_once();
        }
        info!("Supervisor stopping");
        self.shutdown()
    }

    /// Signals every worker to stop and waits for all of them.
    pub fn shutdown(&mut self) -> Vec<WorkerExit> {
        self.shutdown.signal();
        for entry in &mut self.entries {
            if let Some(handle) = entry.handle.as_mut() {
                handle.request_stop();
            }
        }

        let mut exits = Vec::new();
        for entry in &mut self.entries {
            if let Some(handle) = entry.handle.take() {
                let status = handle.join();
                info!("Worker {} stopped: {}", entry.name, status);
                exits.push(WorkerExit {
                    name: entry.name.clone(),
                    status,
                    restarted: false,
                });
            }
        }
        exits
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.entries.iter().any(|e| e.handle.is_some()) {
            self.shutdown();
        }
    }
}
