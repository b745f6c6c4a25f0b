//! Environment setup - installer flows, shell runner, symbol cache

mod cache;
mod flows;
mod runner;

pub use cache::{purge_symbol_cache, symbol_cache_dir, PurgeOutcome, SetupError};
pub use flows::{deploy_steps, lime_steps, repair_steps, SetupFlow, ShellStep};
pub use runner::{ShellRunner, StepReport};

/// Whether this process runs with root/administrator rights.
///
/// `None` where the platform gives no cheap answer.
#[cfg(unix)]
pub fn is_elevated() -> Option<bool> {
    Some(nix::unistd::geteuid().is_root())
}

#[cfg(not(unix))]
pub fn is_elevated() -> Option<bool> {
    None
}
