//! volpanel - control panel for memory-forensics analysis runs
//!
//! Launches the analysis tool against a memory image, streams its merged
//! output through a classifier, and keeps at most one run active at a time.

pub mod app;
pub mod config;
pub mod core;
pub mod plugins;
pub mod semantic;
pub mod session;
pub mod setup;
pub mod ui;

// Re-exports
pub use app::App;
pub use config::{Config, ConfigError, ToolConfig, UiConfig};
pub use core::{ProcessSupervisor, RunHandle, RunRequest, SupervisorError, ToolLocator, Verbosity};
pub use plugins::{PluginPicker, TargetOs};
pub use semantic::{LogCategory, LogEvent, LogRouter, StatusTone, StatusUpdate};
pub use session::{RunOutcome, SessionController, SessionEvent, SessionPhase, StartOutcome};

/// Result type alias
pub type Result<T> = anyhow::Result<T>;
