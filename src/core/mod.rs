//! Core engine - tool location, process spawning, output streaming

mod locator;
mod request;
mod supervisor;

pub use locator::{CommandLine, ToolLocation, ToolLocator};
pub use request::{RequestError, RunRequest, Verbosity, MAX_VERBOSITY};
pub use supervisor::{ChildProcess, OutputLines, ProcessSupervisor, RunHandle, SupervisorError};
