//! contentflow-host: runs the document pipeline.
//!
//! `run` supervises one dispatch loop per configured step, either as threads
//! in this process or as `worker` child processes. `submit` enqueues a file on
//! the first step and `status` prints what the database knows about a process.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use contentflow::config::loader::{apply_overrides, validate_config};
use contentflow::config::SupervisorMode;
use contentflow::db::process_repo;
use contentflow::supervisor::WorkerLauncher;
use contentflow::{
    init_logging, load_config, AppContext, Config, HandlerRegistry, ProcessLauncher,
    QueueDispatchLoop, Shutdown, ShutdownToken, StepProgressBroadcaster, SubmitOptions, Supervisor,
    ThreadLauncher,
};

#[derive(Parser)]
#[command(name = "contentflow-host")]
#[command(about = "Queue-driven document pipeline host")]
#[command(version)]
struct Args {
    /// Configuration file (JSON). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start and supervise one worker per pipeline step
    Run,

    /// Run the dispatch loop for a single step until stdin closes
    Worker {
        #[arg(long)]
        step: String,
    },

    /// Submit a file to the first pipeline step
    Submit {
        file: PathBuf,

        #[arg(long)]
        schema_id: Option<String>,

        #[arg(long)]
        metadata_id: Option<String>,
    },

    /// Print the stored record of a process as JSON
    Status { process_id: String },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = read_config(args.config.as_deref())?;

    init_logging(&config.logging).context("Failed to initialize logging")?;

    match args.command {
        Command::Run => run(config, args.config.as_deref()),
        Command::Worker { step } => worker(config, &step),
        Command::Submit {
            file,
            schema_id,
            metadata_id,
        } => submit(config, &file, SubmitOptions { schema_id, metadata_id }),
        Command::Status { process_id } => status(config, &process_id),
    }
}

fn read_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let mut config = Config::default();
            apply_overrides(&mut config, |key| std::env::var(key).ok());
            validate_config(&config).context("Invalid default configuration")?;
            Ok(config)
        }
    }
}

/// Signals `shutdown` on Ctrl-C.
fn install_signal_handler(shutdown: &Shutdown) -> Result<()> {
    let shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("Interrupt received, shutting down");
        shutdown.signal();
    })
    .context("Failed to install Ctrl-C handler")
}

fn open_pipeline(config: Config) -> Result<(AppContext, HandlerRegistry)> {
    let registry = HandlerRegistry::with_builtins(&config);
    registry
        .validate(&config.process_steps)
        .context("Pipeline steps do not match the available handlers")?;
    let app = AppContext::from_config(config).context("Failed to open pipeline storage")?;
    Ok((app, registry))
}

/// Attaches a progress broadcaster whose events go to the log.
fn with_progress_log(app: AppContext) -> Result<AppContext> {
    let broadcaster = StepProgressBroadcaster::default();
    broadcaster
        .spawn_log_forwarder()
        .context("Failed to start progress logger")?;
    Ok(app.with_progress(broadcaster))
}

fn run(config: Config, config_path: Option<&Path>) -> Result<()> {
    let mode = config.supervisor.mode;
    let poll_interval = config.supervisor.poll_interval();
    let steps = config.process_steps.clone();
    let (app, registry) = open_pipeline(config)?;

    let launcher: Arc<dyn WorkerLauncher> = match mode {
        SupervisorMode::Thread => {
            let app = with_progress_log(app)?;
            let registry = Arc::new(registry);
            Arc::new(ThreadLauncher::new(move |step, _args, token| {
                let dispatcher = QueueDispatchLoop::from_registry(step, app.clone(), &registry)?;
                dispatcher.run(&token)?;
                Ok(())
            }))
        }
        SupervisorMode::Process => {
            let base_args = match config_path {
                Some(path) => vec!["--config".to_string(), path.display().to_string()],
                None => Vec::new(),
            };
            Arc::new(ProcessLauncher::current_exe(base_args)?)
        }
    };

    let mut supervisor = Supervisor::new(poll_interval);
    for step in &steps {
        supervisor.add_worker(step, Arc::clone(&launcher), Vec::new());
    }

    let stop = Shutdown::new();
    install_signal_handler(&stop)?;

    supervisor.start().context("Failed to start workers")?;
    log::info!("Supervising {} workers in {:?} mode", steps.len(), mode);

    let exits = supervisor.run(&stop.token());
    for exit in exits.iter().filter(|e| e.status.is_crash()) {
        log::warn!("Worker {} ended with {}", exit.name, exit.status);
    }
    log::info!("Host stopped");
    Ok(())
}

/// Signals `shutdown` once stdin reaches end of file. The supervising host
/// closes a child's stdin to stop it.
fn watch_stdin(shutdown: &Shutdown) -> Result<()> {
    let shutdown = shutdown.clone();
    std::thread::Builder::new()
        .name("stdin-watch".to_string())
        .spawn(move || {
            let mut sink = [0u8; 256];
            let mut stdin = std::io::stdin();
            loop {
                match stdin.read(&mut sink) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            log::debug!("Stdin closed, stopping worker");
            shutdown.signal();
        })
        .context("Failed to start stdin watcher")?;
    Ok(())
}

fn worker(config: Config, step: &str) -> Result<()> {
    let (app, registry) = open_pipeline(config)?;
    let app = with_progress_log(app)?;
    let dispatcher = QueueDispatchLoop::from_registry(step, app, &registry)
        .with_context(|| format!("No handler for step {}", step))?;

    let shutdown = Shutdown::new();
    install_signal_handler(&shutdown)?;
    watch_stdin(&shutdown)?;

    run_worker(&dispatcher, &shutdown.token())
}

fn run_worker(dispatcher: &QueueDispatchLoop, token: &ShutdownToken) -> Result<()> {
    log::info!(
        "Worker for {} listening on {}",
        dispatcher.step(),
        dispatcher.queue_name()
    );
    dispatcher
        .run(token)
        .with_context(|| format!("Worker for {} stopped with an error", dispatcher.step()))
}

fn submit(config: Config, file: &Path, options: SubmitOptions) -> Result<()> {
    let content =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", file.display()))?;

    let app = AppContext::from_config(config).context("Failed to open pipeline storage")?;
    let process_id = app.submit(&file_name, &content, &options)?;
    println!("{}", process_id);
    Ok(())
}

fn status(config: Config, process_id: &str) -> Result<()> {
    let app = AppContext::from_config(config).context("Failed to open pipeline storage")?;
    let record = process_repo::find_by_id(&app.db, process_id)?
        .with_context(|| format!("Unknown process {}", process_id))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
