//! Run requests - the immutable description of one analysis run

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Highest verbosity accepted by the analysis tool (`-vvv`)
pub const MAX_VERBOSITY: u8 = 3;

/// Why a run request was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("no memory image selected")]
    EmptyImagePath,
    #[error("no analysis plugin selected")]
    EmptyCommand,
    #[error("verbosity {0} is out of range (0-{max})", max = MAX_VERBOSITY)]
    VerbosityOutOfRange(u8),
}

/// Verbosity level in `0..=3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Verbosity(u8);

impl Verbosity {
    pub fn new(level: u8) -> Result<Self, RequestError> {
        if level > MAX_VERBOSITY {
            return Err(RequestError::VerbosityOutOfRange(level));
        }
        Ok(Self(level))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// Flag passed to the tool: `-v`, `-vv`, `-vvv`, or nothing at level 0
    pub fn flag(self) -> Option<String> {
        if self.0 == 0 {
            None
        } else {
            Some(format!("-{}", "v".repeat(self.0 as usize)))
        }
    }

    /// Phase markers are also written to the log at this level and above
    pub fn shows_phase_markers(self) -> bool {
        self.0 >= 2
    }

    /// Next level, wrapping back to 0 after the maximum
    pub fn cycle(self) -> Self {
        Self((self.0 + 1) % (MAX_VERBOSITY + 1))
    }
}

impl TryFrom<u8> for Verbosity {
    type Error = RequestError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Self::new(level)
    }
}

impl From<Verbosity> for u8 {
    fn from(v: Verbosity) -> Self {
        v.0
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One analysis run: image, plugin and verbosity. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRequest {
    image_path: PathBuf,
    command: String,
    verbosity: Verbosity,
}

impl RunRequest {
    /// Validate and build a request
    pub fn new(
        image_path: impl Into<PathBuf>,
        command: impl Into<String>,
        verbosity: u8,
    ) -> Result<Self, RequestError> {
        let image_path = image_path.into();
        let command = command.into().trim().to_string();

        if image_path.as_os_str().is_empty() {
            return Err(RequestError::EmptyImagePath);
        }
        if command.is_empty() {
            return Err(RequestError::EmptyCommand);
        }

        Ok(Self {
            image_path,
            command,
            verbosity: Verbosity::new(verbosity)?,
        })
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    /// Plugin identifier, e.g. `windows.pslist.PsList`
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }
}
