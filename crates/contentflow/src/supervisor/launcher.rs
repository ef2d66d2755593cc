//! Ways to start a worker and observe when it exits.

use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{ContentflowError, SupervisorError};

use super::shutdown::ShutdownToken;

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExitStatus {
    /// Returned normally.
    Finished,
    /// Returned an error.
    Failed(String),
    /// Thread panicked.
    Panicked(String),
    /// Child process exited with a non-zero code, or was killed (`None`).
    Exited(Option<i32>),
}

impl WorkerExitStatus {
    pub fn is_crash(&self) -> bool {
        !matches!(self, WorkerExitStatus::Finished)
    }
}

impl std::fmt::Display for WorkerExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerExitStatus::Finished => write!(f, "finished"),
            WorkerExitStatus::Failed(e) => write!(f, "failed: {}", e),
            WorkerExitStatus::Panicked(e) => write!(f, "panicked: {}", e),
            WorkerExitStatus::Exited(Some(code)) => write!(f, "exited with code {}", code),
            WorkerExitStatus::Exited(None) => write!(f, "killed by signal"),
        }
    }
}

/// A running worker.
pub trait WorkerHandle: Send {
    /// Thread name or process id, for logs.
    fn id(&self) -> String;

    /// `Some` once the worker has exited. Does not block.
    fn try_exit(&mut self) -> Option<WorkerExitStatus>;

    /// Asks the worker to stop without waiting for it.
    fn request_stop(&mut self);

    /// Blocks until the worker has exited.
    fn join(self: Box<Self>) -> WorkerExitStatus;
}

/// The "start function" of a supervised worker.
pub trait WorkerLauncher: Send + Sync {
    fn launch(
        &self,
        name: &str,
        args: &[String],
        shutdown: ShutdownToken,
    ) -> Result<Box<dyn WorkerHandle>, SupervisorError>;
}

pub type WorkerFn =
    Arc<dyn Fn(&str, &[String], ShutdownToken) -> Result<(), ContentflowError> + Send + Sync>;

/// Runs each worker on its own named OS thread. Panics and `Err` returns
/// count as crashes.
#[derive(Clone)]
pub struct ThreadLauncher {
    run: WorkerFn,
}

impl ThreadLauncher {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&str, &[String], ShutdownToken) -> Result<(), ContentflowError>
            + Send
            + Sync
            + 'static,
    {
        Self { run: Arc::new(run) }
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(
        &self,
        name: &str,
        args: &[String],
        shutdown: ShutdownToken,
    ) -> Result<Box<dyn WorkerHandle>, SupervisorError> {
        let run = Arc::clone(&self.run);
        let worker_name = name.to_string();
        let worker_args = args.to_vec();
        let thread_name = format!("worker-{}", name);

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run(&worker_name, &worker_args, shutdown))
            .map_err(|e| SupervisorError::SpawnFailed {
                name: name.to_string(),
                source: e,
            })?;

        Ok(Box::new(ThreadWorker {
            name: thread_name,
            handle: Some(handle),
        }))
    }
}

struct ThreadWorker {
    name: String,
    handle: Option<JoinHandle<Result<(), ContentflowError>>>,
}

fn thread_exit(joined: thread::Result<Result<(), ContentflowError>>) -> WorkerExitStatus {
    match joined {
        Ok(Ok(())) => WorkerExitStatus::Finished,
        Ok(Err(e)) => WorkerExitStatus::Failed(e.to_string()),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            WorkerExitStatus::Panicked(message)
        }
    }
}

impl WorkerHandle for ThreadWorker {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn try_exit(&mut self) -> Option<WorkerExitStatus> {
        if !self.handle.as_ref()?.is_finished() {
            return None;
        }
        self.handle.take().map(|h| thread_exit(h.join()))
    }

    fn request_stop(&mut self) {
        // Threads observe the shared shutdown token.
    }

    fn join(mut self: Box<Self>) -> WorkerExitStatus {
        match self.handle.take() {
            Some(handle) => thread_exit(handle.join()),
            None => WorkerExitStatus::Finished,
        }
    }
}

/// Runs each worker as a child process: `<program> <base args> worker --step
/// <name> <args>`. The child's stdin stays open while it should run; closing
/// it is the stop signal.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    base_args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    /// Re-launches the current executable.
    pub fn current_exe(base_args: Vec<String>) -> Result<Self, SupervisorError> {
        let program = std::env::current_exe().map_err(|e| SupervisorError::SpawnFailed {
            name: "current executable".to_string(),
            source: e,
        })?;
        Ok(Self::new(program, base_args))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        name: &str,
        args: &[String],
        _shutdown: ShutdownToken,
    ) -> Result<Box<dyn WorkerHandle>, SupervisorError> {
        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .args(["worker", "--step", name])
            .args(args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed {
                name: name.to_string(),
                source: e,
            })?;

        let stdin = child.stdin.take();
        log::debug!("Spawned worker {} as pid {}", name, child.id());

        Ok(Box::new(ProcessWorker {
            name: name.to_string(),
            child,
            stdin,
        }))
    }
}

struct ProcessWorker {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
}

fn process_exit(status: std::process::ExitStatus) -> WorkerExitStatus {
    if status.success() {
        WorkerExitStatus::Finished
    } else {
        WorkerExitStatus::Exited(status.code())
    }
}

impl WorkerHandle for ProcessWorker {
    fn id(&self) -> String {
        format!("{} (pid {})", self.name, self.child.id())
    }

    fn try_exit(&mut self) -> Option<WorkerExitStatus> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(process_exit(status)),
            Ok(None) => None,
            Err(e) => Some(WorkerExitStatus::Failed(e.to_string())),
        }
    }

    fn request_stop(&mut self) {
        self.stdin.take();
    }

    fn join(mut self: Box<Self>) -> WorkerExitStatus {
        self.stdin.take();
        match self.child.wait() {
            Ok(status) => process_exit(status),
            Err(e) => WorkerExitStatus::Failed(e.to_string()),
        }
    }
}
