//! volpanel CLI entry point

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use volpanel::session::SessionPhase;
use volpanel::ui::TUI;
use volpanel::App;

fn log_file_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("volpanel").join("volpanel.log"))
}

/// Log to a file while the alternate screen is up, to stderr otherwise
fn init_logging(tui: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if tui {
        let file = log_file_path().and_then(|path| {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).ok()?;
            }
            OpenOptions::new().create(true).append(true).open(path).ok()
        });
        match file {
            Some(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            // Nowhere safe to write
            None => {
                builder.filter_level(log::LevelFilter::Off);
            }
        }
    }

    builder.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let command = args.command.unwrap_or(Command::Tui {
        image: None,
        os: None,
    });
    init_logging(matches!(command, Command::Tui { .. }));

    log::info!("volpanel v{}", env!("CARGO_PKG_VERSION"));
    let mut config = cli::load_config(args.config.as_deref())?;

    let code = match command {
        Command::Tui { image, os } => {
            if let Some(os) = os {
                config.ui.default_os = os;
            }
            let mut app = App::new(config, cli::base_dir()?);
            if let Some(image) = image {
                app = app.with_image(image);
            }

            let mut tui = TUI::new().context("failed to initialise terminal")?;
            tokio::task::block_in_place(|| tui.run(&mut app))?;
            drop(tui);

            // Give a stopped run time to be reaped before exiting
            let deadline = Instant::now() + Duration::from_secs(2);
            while app.phase() != SessionPhase::Idle && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            log::info!("Panel closed");
            0
        }
        Command::Run {
            image,
            plugin,
            verbosity,
            json,
        } => cli::run_analysis(&config, image, plugin, verbosity, json).await?,
        Command::Plugins { os } => {
            cli::print_plugins(os);
            0
        }
        Command::Setup {
            flow,
            step,
            dry_run,
        } => cli::run_setup(&config, flow, step, dry_run).await?,
        Command::PurgeCache { yes } => cli::purge_cache(&config, yes)?,
    };

    // Setup steps on the blocking pool cannot be interrupted; don't wait on them
    std::process::exit(code);
}
