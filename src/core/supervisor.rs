//! Process supervision - spawn the analysis tool and stream its output
//!
//! stdout and stderr share one OS pipe so the reader sees a single stream in
//! the order the child wrote it. On Unix the child leads its own process
//! group, which lets a stop request reach anything it spawned.

use super::locator::{CommandLine, ToolLocator};
use super::request::RunRequest;
use chrono::{DateTime, Local};
use std::io::{self, BufRead, BufReader, PipeReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while supervising a child process
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("analysis tool '{0}' not found (no local copy and not on PATH)")]
    ToolNotFound(String),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read process output: {0}")]
    StreamRead(#[source] io::Error),
    #[error("failed to terminate process {pid}: {reason}")]
    Termination { pid: u32, reason: String },
    #[error("failed to wait for process {pid}: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

impl SupervisorError {
    /// True when no process was ever created
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, Self::ToolNotFound(_) | Self::Spawn { .. })
    }
}

/// Shared view of one in-flight child process.
///
/// Cloned into the session state; the cancel and exited flags are the only
/// mutable parts. Once exited is set the pid may be reused and must not be
/// signalled.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pid: u32,
    started_at: DateTime<Local>,
    cancel: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
}

impl RunHandle {
    fn new(pid: u32) -> Self {
        Self {
            pid,
            started_at: Local::now(),
            cancel: Arc::new(AtomicBool::new(false)),
            exited: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Record that the process has been reaped
    pub fn mark_exited(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

/// Owned side of a spawned process: the child and its output pipe
pub struct ChildProcess {
    child: Child,
    output: Option<PipeReader>,
}

impl ChildProcess {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Output lines in process order. Yields once; later calls return `None`.
    pub fn take_lines(&mut self) -> Option<OutputLines<PipeReader>> {
        self.output.take().map(OutputLines::new)
    }

    /// Reap the process if it has exited. `Some(None)` means it died from a signal.
    pub fn try_wait(&mut self) -> Result<Option<Option<i32>>, SupervisorError> {
        let pid = self.child.id();
        match self.child.try_wait() {
            Ok(Some(status)) => {
                log::info!("Process {} exited: {}", pid, status);
                Ok(Some(status.code()))
            }
            Ok(None) => Ok(None),
            Err(source) => Err(SupervisorError::Wait { pid, source }),
        }
    }

    /// Force-kill the direct child
    pub fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            log::debug!("kill {} ignored: {}", self.child.id(), e);
        }
    }

    /// Block until the process exits. `None` means it died from a signal.
    ///
    /// Drops any undrained output first so a full pipe cannot stall the child.
    pub fn wait(mut self) -> Result<Option<i32>, SupervisorError> {
        self.output.take();
        let pid = self.child.id();
        let status = self
            .child
            .wait()
            .map_err(|source| SupervisorError::Wait { pid, source })?;
        log::info!("Process {} exited: {}", pid, status);
        Ok(status.code())
    }
}

/// Lazy, finite sequence of output lines with terminators stripped.
///
/// `\n`, `\r\n` and a lone `\r` all end a line, so carriage-return progress
/// redraws arrive as separate lines. Bytes are decoded lossily.
pub struct OutputLines<R> {
    reader: BufReader<R>,
    skip_lf: bool,
    finished: bool,
}

impl<R: Read> OutputLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            skip_lf: false,
            finished: false,
        }
    }
}

impl<R: Read> Iterator for OutputLines<R> {
    type Item = Result<String, SupervisorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut line = Vec::new();
        loop {
            let available = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(SupervisorError::StreamRead(e)));
                }
            };

            if available.is_empty() {
                self.finished = true;
                return if line.is_empty() {
                    None
                } else {
                    Some(Ok(decode(&line)))
                };
            }

            let mut start = 0;
            if self.skip_lf {
                self.skip_lf = false;
                if available[0] == b'\n' {
                    start = 1;
                }
            }

            match available[start..]
                .iter()
                .position(|b| *b == b'\n' || *b == b'\r')
            {
                Some(pos) => {
                    let end = start + pos;
                    let ended_by_cr = available[end] == b'\r';
                    line.extend_from_slice(&available[start..end]);
                    self.reader.consume(end + 1);
                    self.skip_lf = ended_by_cr;
                    return Some(Ok(decode(&line)));
                }
                None => {
                    line.extend_from_slice(&available[start..]);
                    let consumed = available.len();
                    self.reader.consume(consumed);
                }
            }
        }
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Starts the analysis tool and other commands with merged, line-oriented output
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    locator: ToolLocator,
}

impl ProcessSupervisor {
    pub fn new(locator: ToolLocator) -> Self {
        Self { locator }
    }

    pub fn locator(&self) -> &ToolLocator {
        &self.locator
    }

    /// Resolve the tool and launch it for `request`
    pub fn start(
        &self,
        request: &RunRequest,
    ) -> Result<(RunHandle, ChildProcess, CommandLine), SupervisorError> {
        let cmd = self.locator.command_line(request)?;
        let (handle, child) = Self::spawn(&cmd, Some(self.locator.base_dir()))?;
        Ok((handle, child, cmd))
    }

    /// Spawn any command with stdout+stderr merged into one pipe
    pub fn spawn(
        cmd: &CommandLine,
        cwd: Option<&Path>,
    ) -> Result<(RunHandle, ChildProcess), SupervisorError> {
        let spawn_err = |source: io::Error| SupervisorError::Spawn {
            program: cmd.program.display().to_string(),
            source,
        };

        let (reader, writer) = io::pipe().map_err(spawn_err)?;
        let writer_err = writer.try_clone().map_err(spawn_err)?;

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(writer_err);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(spawn_err)?;
        // Close the parent's write ends so EOF arrives when the child exits
        drop(command);

        let handle = RunHandle::new(child.id());
        log::info!("Spawned pid {}: {}", handle.pid(), cmd);

        Ok((
            handle,
            ChildProcess {
                child,
                output: Some(reader),
            },
        ))
    }

    /// Best-effort termination of the process and its descendants.
    ///
    /// Never fails: an already-exited process is fine, other errors are logged.
    pub fn request_stop(handle: &RunHandle) {
        if handle.has_exited() {
            log::debug!("pid {} already reaped, not signalling", handle.pid());
            return;
        }
        match terminate_tree(handle.pid()) {
            Ok(()) => log::info!("Sent termination to process tree {}", handle.pid()),
            Err(e) => log::warn!("{}", e),
        }
    }

    /// Kill whatever is left of the process tree. Never fails.
    pub fn force_stop(handle: &RunHandle) {
        if handle.has_exited() {
            return;
        }
        match kill_tree(handle.pid()) {
            Ok(()) => log::warn!("Killed process tree {}", handle.pid()),
            Err(e) => log::warn!("{}", e),
        }
    }
}

#[cfg(unix)]
fn signal_tree(pid: u32, signal: nix::sys::signal::Signal) -> Result<(), SupervisorError> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid).map_err(|_| SupervisorError::Termination {
        pid,
        reason: "pid out of range".to_string(),
    })?;

    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(SupervisorError::Termination {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(unix)]
fn terminate_tree(pid: u32) -> Result<(), SupervisorError> {
    signal_tree(pid, nix::sys::signal::Signal::SIGTERM)
}

#[cfg(unix)]
fn kill_tree(pid: u32) -> Result<(), SupervisorError> {
    signal_tree(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(not(unix))]
fn terminate_tree(pid: u32) -> Result<(), SupervisorError> {
    let output = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .output()
        .map_err(|e| SupervisorError::Termination {
            pid,
            reason: e.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(SupervisorError::Termination {
            pid,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

// taskkill /F is already forceful
#[cfg(not(unix))]
fn kill_tree(pid: u32) -> Result<(), SupervisorError> {
    terminate_tree(pid)
}
