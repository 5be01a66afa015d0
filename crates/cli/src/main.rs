//! `mathformer`: command-line front end of the calculator supervisor.
//!
//! Logs go to stderr; stdout carries results and, in `session` mode, the
//! JSON-lines protocol.

mod session;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result, WrapErr};
use colored::Colorize;
use mf_core::config::{load_config, AppConfig};
use mf_core::Supervisor;
use mf_protocol::calc_models::Operation;
use mf_protocol::ipc::Event;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

/// Directory name under the platform's local data directory.
const HOME_DIR_NAME: &str = "mathformer-calculator";

#[derive(Parser, Debug)]
#[command(author, version, about = "Install, run and query the MathFormer computation service", long_about = None)]
struct Cli {
    /// Supervisor home directory holding config.toml and the runtime environment
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show whether the runtime environment is installed
    Status,

    /// Create the runtime environment, install the engine and start it once
    Install,

    /// Start the installed service and wait until it answers
    Start,

    /// Run a single calculation
    Calc {
        /// add, sub, mul or div
        operation: Operation,

        /// First operand, passed to the engine verbatim
        #[arg(allow_hyphen_values = true)]
        a: String,

        /// Second operand, passed to the engine verbatim
        #[arg(allow_hyphen_values = true)]
        b: String,
    },

    /// Serve JSON-line requests on stdin and write replies and events to stdout
    Session,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let home = match cli.home {
        Some(home) => home,
        None => default_home()?,
    };
    let config = load_config(&home)
        .await
        .wrap_err_with(|| format!("Failed to load configuration from {}", home.display()))?;

    match cli.command {
        Commands::Session => session::run(config).await,
        Commands::Status => supervised(config, Task::Status).await,
        Commands::Install => supervised(config, Task::Install).await,
        Commands::Start => supervised(config, Task::Start).await,
        Commands::Calc { operation, a, b } => {
            supervised(config, Task::Calc { operation, a, b }).await
        }
    }
}

/// One-shot commands run against a supervisor owned by this process.
enum Task {
    Status,
    Install,
    Start,
    Calc {
        operation: Operation,
        a: String,
        b: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn default_home() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join(HOME_DIR_NAME))
        .ok_or_else(|| eyre!("No local data directory on this platform; pass --home"))
}

async fn supervised(config: AppConfig, task: Task) -> Result<()> {
    let startup_timeout = config.startup_timeout();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let supervisor = Supervisor::new(config, events_tx)?;
    let (done_tx, done_rx) = oneshot::channel();
    let printer = tokio::spawn(print_events(events_rx, done_rx));

    let outcome = match task {
        Task::Status => {
            let config = supervisor.config();
            let installed = supervisor.check_installed().await;
            println!("home:        {}", config.home.display());
            println!("environment: {}", config.env_dir().display());
            println!(
                "installed:   {}",
                if installed { "yes".green() } else { "no".yellow() }
            );
            Ok(())
        }

        Task::Install => match supervisor.install().await {
            Ok(()) => {
                println!("{}", "MathFormer is installed and ready".green());
                Ok(())
            }
            Err(e) => Err(eyre!(e)),
        },

        Task::Start => start_and_wait(&supervisor, startup_timeout).await.map(|()| {
            println!("{}", "MathFormer is ready".green());
        }),

        Task::Calc { operation, a, b } => calculate(&supervisor, startup_timeout, operation, &a, &b)
            .await
            .map(|result| println!("{result}")),
    };

    supervisor.shutdown().await;
    let _ = done_tx.send(());
    let _ = printer.await;
    outcome
}

async fn start_and_wait(supervisor: &Supervisor, timeout: Duration) -> Result<()> {
    supervisor.start().await?;
    if supervisor.wait_ready(timeout).await {
        Ok(())
    } else {
        Err(eyre!(
            "Service did not become ready within {}s",
            timeout.as_secs()
        ))
    }
}

async fn calculate(
    supervisor: &Supervisor,
    timeout: Duration,
    operation: Operation,
    a: &str,
    b: &str,
) -> Result<String> {
    if !supervisor.check_installed().await {
        return Err(eyre!(
            "MathFormer is not installed; run `mathformer install` first"
        ));
    }
    start_and_wait(supervisor, timeout).await?;
    Ok(supervisor.calculate(operation, a, b).await?)
}

/// Mirror installation progress on stderr until `done`, then flush what is
/// already queued.
async fn print_events(mut events: mpsc::UnboundedReceiver<Event>, mut done: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => print_event(event),
                None => break,
            },
            _ = &mut done => {
                while let Ok(event) = events.try_recv() {
                    print_event(event);
                }
                break;
            }
        }
    }
}

fn print_event(event: Event) {
    match event {
        Event::InstallStarted { started_at, .. } => {
            eprintln!("{} {}", "==>".blue().bold(), format!("Installation started at {started_at}").bold());
        }
        Event::InstallLog { line, .. } => eprintln!("    {}", line.dimmed()),
        Event::InstallFailed { message, .. } => eprintln!("{} {}", "error:".red().bold(), message),
        Event::InstallComplete { .. } => eprintln!("{} {}", "==>".blue().bold(), "Installation complete".bold()),
        Event::ReadinessChanged { ready } => {
            tracing::debug!(ready, "readiness changed");
        }
        Event::ServiceOutput { .. } => {}
    }
}
