//! Command-line interface: headless runs, registry, setup and cache commands

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use volpanel::config::Config;
use volpanel::core::{ProcessSupervisor, RunRequest, ToolLocator};
use volpanel::plugins::TargetOs;
use volpanel::semantic::{LogCategory, LogEvent};
use volpanel::session::{RunOutcome, SessionController, SessionEvent, StartOutcome};
use volpanel::setup::{purge_symbol_cache, symbol_cache_dir, PurgeOutcome, SetupFlow, ShellRunner};

/// Exit code of a run stopped with Ctrl-C
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Parser)]
#[command(
    name = "volpanel",
    version,
    about = "Control panel for Volatility 3 memory analysis"
)]
pub struct Cli {
    /// Config file (default: <config dir>/volpanel/config.yml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive control panel (default)
    Tui {
        /// Memory image to preselect
        #[arg(short = 'f', long)]
        image: Option<String>,

        /// Target OS whose plugins are offered first
        #[arg(long)]
        os: Option<TargetOs>,
    },

    /// Run one plugin without the panel and stream its output
    Run {
        /// Memory image to analyse
        #[arg(short = 'f', long)]
        image: PathBuf,

        /// Plugin identifier, e.g. windows.pslist.PsList
        plugin: String,

        /// Verbosity 0-3 (default from config)
        #[arg(short = 'v', long, value_parser = clap::value_parser!(u8).range(0..=3))]
        verbosity: Option<u8>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List known plugin identifiers
    Plugins {
        /// Only this OS
        #[arg(long)]
        os: Option<TargetOs>,
    },

    /// Run an environment setup flow (lime, deploy, repair)
    Setup {
        flow: SetupFlow,

        /// Run a single step by label, e.g. BUILD
        #[arg(long)]
        step: Option<String>,

        /// Print the commands without running them
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete the tool's symbol cache
    PurgeCache {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        // Lock per line: the logger writes to stderr from other threads
        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let mut out = std::io::stdout().lock();
                    let _ = writeln!(out, "{}", msg);
                    let _ = out.flush();
                }
                OutputLine::Stderr(msg) => {
                    let mut err = std::io::stderr().lock();
                    let _ = writeln!(err, "{}", msg);
                    let _ = err.flush();
                }
            }
        }
    });
    (tx, handle)
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path).context("failed to load configuration")
}

pub fn base_dir() -> Result<PathBuf> {
    std::env::current_dir().context("failed to determine working directory")
}

/// Process exit code for a finished run
pub fn exit_code_for(outcome: RunOutcome, exit_code: Option<i32>) -> i32 {
    match outcome {
        RunOutcome::Completed => exit_code.unwrap_or(1),
        RunOutcome::Cancelled => EXIT_CANCELLED,
        RunOutcome::Faulted => 1,
    }
}

fn format_event(event: &SessionEvent) -> OutputLine {
    match event {
        SessionEvent::Started {
            pid, command_line, ..
        } => OutputLine::Stderr(format!(
            "--- ANALYSIS SESSION INITIATED --- [pid {}] {}",
            pid, command_line
        )),
        SessionEvent::Log(event) => OutputLine::Stdout(event.render()),
        SessionEvent::Status(status) => OutputLine::Stderr(format!(">> {}", status.text)),
        SessionEvent::Summary(summary) => OutputLine::Stderr(format!(
            ">> {} lines routed ({} result, {} diagnostic)",
            summary.total(),
            summary.result_header,
            summary.diagnostic
        )),
        SessionEvent::Finished {
            exit_code,
            outcome,
            summary,
            elapsed_ms,
        } => OutputLine::Stderr(format!(
            ">> {:?} after {:.1}s, exit {}, {} lines, results found: {}",
            outcome,
            *elapsed_ms as f64 / 1000.0,
            exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            summary.total(),
            if summary.results_found { "yes" } else { "no" }
        )),
    }
}

fn emit(out: &mpsc::UnboundedSender<OutputLine>, event: &SessionEvent, json: bool) {
    let line = if json {
        OutputLine::Stdout(event.to_json_line())
    } else {
        format_event(event)
    };
    let _ = out.send(line);
}

/// Headless analysis run. Returns the process exit code.
pub async fn run_analysis(
    config: &Config,
    image: PathBuf,
    plugin: String,
    verbosity: Option<u8>,
    json: bool,
) -> Result<i32> {
    let level = verbosity.unwrap_or(config.ui.default_verbosity.level());
    let request = RunRequest::new(image, plugin, level).context("invalid run request")?;

    let locator = ToolLocator::new(config.tool.clone(), base_dir()?);
    let (controller, mut rx) = SessionController::new(ProcessSupervisor::new(locator));
    let (out, writer) = spawn_output_writer();

    let mut exit = 1;
    match controller.start(request) {
        StartOutcome::Started { pid } => {
            log::debug!("Headless run started, pid {}", pid);
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            let mut stopping = false;

            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        emit(&out, &event, json);
                        if let SessionEvent::Finished { exit_code, outcome, .. } = event {
                            exit = exit_code_for(outcome, exit_code);
                            break;
                        }
                    }
                    _ = &mut ctrl_c, if !stopping => {
                        stopping = true;
                        controller.stop();
                    }
                }
            }
        }
        StartOutcome::SpawnFailed | StartOutcome::AlreadyRunning => {
            // The controller already queued its diagnostic and status
            while let Ok(event) = rx.try_recv() {
                emit(&out, &event, json);
            }
        }
    }

    drop(out);
    let _ = writer.await;
    Ok(exit)
}

pub fn print_plugins(os: Option<TargetOs>) {
    let systems = match os {
        Some(os) => vec![os],
        None => vec![TargetOs::Windows, TargetOs::Linux],
    };
    for os in systems {
        for plugin in os.plugins() {
            println!("{}", plugin);
        }
    }
}

/// Run a setup flow in the foreground. Returns the process exit code.
pub async fn run_setup(
    config: &Config,
    flow: SetupFlow,
    step: Option<String>,
    dry_run: bool,
) -> Result<i32> {
    let mut steps = flow.steps(&config.tool);
    let mut title = flow.title().to_string();
    if let Some(label) = step {
        steps.retain(|s| s.label.eq_ignore_ascii_case(&label));
        if steps.is_empty() {
            bail!("flow '{}' has no step named '{}'", flow, label);
        }
        title = format!("{}: {}", title, steps[0].label);
    }

    if dry_run {
        for s in &steps {
            println!("{}: {}", s.label, s.command);
        }
        return Ok(0);
    }

    let cwd = base_dir()?;
    let report = tokio::task::spawn_blocking(move || {
        ShellRunner::run_titled(&cwd, &title, &steps, |event| print_log_event(&event))
    })
    .await
    .context("setup worker crashed")?;

    Ok(if report.failed > 0 { 1 } else { 0 })
}

fn print_log_event(event: &LogEvent) {
    if event.category == LogCategory::Diagnostic {
        eprintln!("{}", event.render());
    } else {
        println!("{}", event.render());
    }
}

pub fn purge_cache(config: &Config, yes: bool) -> Result<i32> {
    let dir = symbol_cache_dir(&base_dir()?, config.tool.symbol_cache.as_deref());
    if !yes {
        bail!("refusing to delete {} without --yes", dir.display());
    }

    match purge_symbol_cache(&dir)? {
        PurgeOutcome::Purged(path) => println!("Symbol cache purged: {}", path.display()),
        PurgeOutcome::NotFound(path) => println!("No symbol cache at {}", path.display()),
    }
    Ok(0)
}
