//! Tool location and argument-vector construction

use super::request::RunRequest;
use super::supervisor::SupervisorError;
use crate::config::ToolConfig;
use std::env;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

/// A fully resolved program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// A shell invocation of `command` (`sh -c` / `cmd /C`)
    pub fn shell(command: &str) -> Self {
        if cfg!(windows) {
            Self::new("cmd").arg("/C").arg(command)
        } else {
            Self::new("sh").arg("-c").arg(command)
        }
    }

    /// Arguments as lossy strings, for display and assertions
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Where the analysis tool was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolLocation {
    /// Local checkout, run through the interpreter
    LocalScript { python: String, script: PathBuf },
    /// Installed executable
    Installed(PathBuf),
}

/// Finds the analysis tool: a local copy under `base_dir` wins over PATH
#[derive(Debug, Clone)]
pub struct ToolLocator {
    config: ToolConfig,
    base_dir: PathBuf,
    /// Overrides `PATH` for bare executable names
    search_path: Option<OsString>,
}

impl ToolLocator {
    pub fn new(config: ToolConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            base_dir: base_dir.into(),
            search_path: None,
        }
    }

    pub fn with_search_path(mut self, paths: impl Into<OsString>) -> Self {
        self.search_path = Some(paths.into());
        self
    }

    /// Locator rooted at the current working directory
    pub fn from_current_dir(config: ToolConfig) -> Self {
        let base_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(config, base_dir)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn locate(&self) -> Result<ToolLocation, SupervisorError> {
        let script = self.base_dir.join(&self.config.local_script);
        if script.is_file() {
            return Ok(ToolLocation::LocalScript {
                python: self.config.python.clone(),
                script,
            });
        }

        let executable = Path::new(&self.config.executable);
        if executable.components().count() > 1 || executable.is_absolute() {
            let candidate = if executable.is_absolute() {
                executable.to_path_buf()
            } else {
                self.base_dir.join(executable)
            };
            return if candidate.is_file() {
                Ok(ToolLocation::Installed(candidate))
            } else {
                Err(SupervisorError::ToolNotFound(self.config.executable.clone()))
            };
        }

        let paths = self.search_path.clone().or_else(|| env::var_os("PATH"));
        which::which_in(&self.config.executable, paths, &self.base_dir)
            .map(ToolLocation::Installed)
            .map_err(|e| {
                log::debug!("{} not on PATH: {}", self.config.executable, e);
                SupervisorError::ToolNotFound(self.config.executable.clone())
            })
    }

    /// `[python -u script | vol] -f <image> [-v…] <plugin>`
    pub fn command_line(&self, request: &RunRequest) -> Result<CommandLine, SupervisorError> {
        let mut cmd = match self.locate()? {
            ToolLocation::LocalScript { python, script } => {
                CommandLine::new(python).arg("-u").arg(script)
            }
            ToolLocation::Installed(path) => {
                CommandLine::new(path).env("PYTHONUNBUFFERED", "1")
            }
        };

        cmd = cmd.arg("-f").arg(request.image_path());
        if let Some(flag) = request.verbosity().flag() {
            cmd = cmd.arg(flag);
        }
        Ok(cmd.arg(request.command()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn request(verbosity: u8) -> RunRequest {
        RunRequest::new("/tmp/dump.mem", "linux.pslist.PsList", verbosity).unwrap()
    }

    #[test]
    fn test_local_script_preferred() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("volatility3")).unwrap();
        fs::write(dir.path().join("volatility3/vol.py"), "").unwrap();

        let locator = ToolLocator::new(ToolConfig::default(), dir.path());
        let cmd = locator.command_line(&request(2)).unwrap();

        assert_eq!(cmd.program, PathBuf::from(ToolConfig::default().python));
        let script = dir.path().join("volatility3").join("vol.py");
        assert_eq!(
            cmd.args_lossy(),
            vec![
                "-u".to_string(),
                script.to_string_lossy().into_owned(),
                "-f".to_string(),
                "/tmp/dump.mem".to_string(),
                "-vv".to_string(),
                "linux.pslist.PsList".to_string(),
            ]
        );
        assert!(cmd.env.is_empty());
    }

    #[test]
    fn test_verbosity_zero_omits_flag() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("volatility3")).unwrap();
        fs::write(dir.path().join("volatility3/vol.py"), "").unwrap();

        let locator = ToolLocator::new(ToolConfig::default(), dir.path());
        let args = locator.command_line(&request(0)).unwrap().args_lossy();
        assert!(!args.iter().any(|a| a.starts_with("-v")));
        assert_eq!(args.last().map(String::as_str), Some("linux.pslist.PsList"));
    }

    #[test]
    fn test_explicit_executable_path() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("fake-vol");
        fs::write(&tool, "").unwrap();

        let config = ToolConfig {
            executable: tool.to_string_lossy().into_owned(),
            ..ToolConfig::default()
        };
        let locator = ToolLocator::new(config, dir.path());
        let cmd = locator.command_line(&request(1)).unwrap();

        assert_eq!(cmd.program, tool);
        assert_eq!(cmd.args_lossy()[..2], ["-f".to_string(), "/tmp/dump.mem".to_string()]);
        assert_eq!(cmd.env, vec![("PYTHONUNBUFFERED".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolConfig {
            executable: "volpanel-definitely-not-installed".to_string(),
            ..ToolConfig::default()
        };
        let locator = ToolLocator::new(config, dir.path());
        assert!(matches!(
            locator.command_line(&request(1)),
            Err(SupervisorError::ToolNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_bare_name_resolved_on_search_path() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let tool = bin.path().join("vol");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        let not_executable = bin.path().join("vol-data");
        fs::write(&not_executable, "").unwrap();

        let cwd = tempfile::tempdir().unwrap();
        let locator = ToolLocator::new(ToolConfig::default(), cwd.path()).with_search_path(bin.path());
        assert_eq!(locator.locate().unwrap(), ToolLocation::Installed(tool));

        let config = ToolConfig {
            executable: "vol-data".to_string(),
            ..ToolConfig::default()
        };
        let locator = ToolLocator::new(config, cwd.path()).with_search_path(bin.path());
        assert!(matches!(locator.locate(), Err(SupervisorError::ToolNotFound(_))));
    }

    #[test]
    fn test_display_quotes_spaces() {
        let cmd = CommandLine::new("vol").arg("-f").arg("/tmp/my dump.mem");
        assert_eq!(cmd.to_string(), "vol -f \"/tmp/my dump.mem\"");
    }
}
