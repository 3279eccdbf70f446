//! DebIDE CLI - list and run Debian packaging tasks for a workspace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use debide::debide_core::{Diagnostic, RunEvent, RunResult, RunStatus, Severity};
use debide::debide_runner::EventSink;
use debide::{Workbench, WorkbenchOptions};

/// DebIDE - Debian packaging task runner
#[derive(Parser)]
#[command(name = "debide")]
#[command(about = "Run Debian packaging tasks for a source tree", long_about = None)]
struct Cli {
    /// Package source tree
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file to use instead of .debide.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available tasks
    List,

    /// Show one task
    Show {
        /// Task name
        task: String,
    },

    /// Run a task (the default task when omitted)
    Run {
        /// Task name
        task: Option<String>,
    },

    /// List loaded plugins
    Plugins,

    /// Show workspace settings
    Info,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let fallback = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut options = WorkbenchOptions::new(&cli.workspace);
    if let Some(config) = cli.config {
        options = options.with_config_path(absolute_from(&std::env::current_dir()?, config));
    }
    let mut workbench = Workbench::open(options)?;
    for diagnostic in workbench.take_diagnostics() {
        print_diagnostic(&diagnostic);
    }

    match cli.command {
        Commands::List => list_tasks(&workbench),
        Commands::Show { task } => show_task(&workbench, &task)?,
        Commands::Run { task } => {
            let code = run_task(&mut workbench, task.as_deref()).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Plugins => list_plugins(&workbench),
        Commands::Info => print_info(&workbench),
    }

    Ok(())
}

fn list_tasks(workbench: &Workbench) {
    let default = workbench.default_selection().map(|t| t.name().to_string());

    println!("Tasks ({}):", workbench.tasks().len());
    println!("  {:<24}  {:<16}  {}", "NAME", "SOURCE", "COMMAND");
    println!("{}", "-".repeat(80));

    for task in workbench.tasks().iter() {
        let marker = if default.as_deref() == Some(task.name()) { "*" } else { " " };
        println!(
            "{} {:<24}  {:<16}  {}",
            marker,
            task.name(),
            task.source().to_string(),
            task.command()
        );
    }
}

fn show_task(workbench: &Workbench, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let task = workbench.select(Some(name))?;

    println!("  Name:        {}", task.name());
    println!("  Source:      {}", task.source());
    println!("  Command:     {}", task.command());
    if !task.description().is_empty() {
        println!("  Description: {}", task.description());
    }
    println!(
        "  Directory:   {}",
        task.resolve_working_dir(workbench.workspace()).display()
    );
    for (key, value) in task.env() {
        println!("  Env:         {}={}", key, value);
    }

    Ok(())
}

fn list_plugins(workbench: &Workbench) {
    let plugins = workbench.loaded_plugins();
    println!("Plugins ({}):", plugins.len());
    for id in plugins {
        println!("  {}", id);
    }
}

fn print_info(workbench: &Workbench) {
    println!("  Workspace:   {}", workbench.workspace().display());
    match workbench.config_path() {
        Some(path) => println!("  Config:      {}", path.display()),
        None => println!("  Config:      (none)"),
    }
    println!("  Autosave:    {}", workbench.autosave());
    println!(
        "  Default:     {}",
        workbench
            .default_selection()
            .map(|t| t.name())
            .unwrap_or("-")
    );
    println!("  Maintainer:  {}", workbench.maintainer());
}

async fn run_task(
    workbench: &mut Workbench,
    name: Option<&str>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let result = workbench
        .run_until_cancelled(name, &ConsoleSink, cancel)
        .await?;
    Ok(exit_code(&result))
}

/// A relative `--config` names a file under the caller's directory, not the workspace.
fn absolute_from(cwd: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}

/// Process exit code mirroring a run's outcome.
fn exit_code(result: &RunResult) -> i32 {
    match result.status {
        RunStatus::Succeeded => 0,
        RunStatus::Cancelled => 130,
        _ => result.exit_code.filter(|c| *c != 0).unwrap_or(1),
    }
}

fn print_diagnostic(diagnostic: &Diagnostic) {
    if diagnostic.severity != Severity::Info {
        eprintln!("{}", diagnostic);
    }
}

/// Writes run output to the terminal.
struct ConsoleSink;

#[async_trait]
impl EventSink for ConsoleSink {
    async fn on_event(&self, event: RunEvent) {
        if event.is_stderr() {
            eprintln!("{}", event.line);
        } else {
            println!("{}", event.line);
        }
    }

    async fn on_finished(&self, result: RunResult) {
        eprintln!("{}", result.summary());
        if result.status == RunStatus::Failed && !result.stderr_tail.is_empty() {
            eprintln!("Last stderr lines:");
            for line in &result.stderr_tail {
                eprintln!("  {}", line);
            }
        }
    }

    async fn on_diagnostic(&self, diagnostic: Diagnostic) {
        print_diagnostic(&diagnostic);
    }
}
