//! Sequential shell runner for setup flows

use super::flows::ShellStep;
use crate::core::{CommandLine, ProcessSupervisor};
use crate::semantic::LogEvent;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outcome counts of one flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Runs one step list at a time, streaming merged output as log events
#[derive(Debug, Clone)]
pub struct ShellRunner {
    cwd: PathBuf,
    busy: Arc<AtomicBool>,
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ShellRunner {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Run `steps` on the blocking pool. Returns false if a flow is already running.
    pub fn start(
        &self,
        title: impl Into<String>,
        steps: Vec<ShellStep>,
        tx: mpsc::UnboundedSender<LogEvent>,
    ) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("Setup flow already running, ignoring start");
            return false;
        }

        let guard = BusyGuard(self.busy.clone());
        let cwd = self.cwd.clone();
        let title = title.into();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            Self::run_titled(&cwd, &title, &steps, |event| {
                let _ = tx.send(event);
            });
        });
        true
    }

    /// Blocking: header line, every step, then a completion line
    pub fn run_titled(
        cwd: &Path,
        title: &str,
        steps: &[ShellStep],
        mut sink: impl FnMut(LogEvent),
    ) -> StepReport {
        sink(LogEvent::classified(format!("[!] {}", title)));
        let report = Self::run_steps(cwd, steps, &mut sink);
        sink(LogEvent::classified(format!(
            "[+] {} finished: {}/{} steps succeeded",
            title,
            report.succeeded,
            steps.len()
        )));
        report
    }

    /// Blocking: run each step in order. A failing step does not stop the rest.
    pub fn run_steps(cwd: &Path, steps: &[ShellStep], mut sink: impl FnMut(LogEvent)) -> StepReport {
        let mut report = StepReport::default();

        for step in steps {
            log::info!("Setup step {}: {}", step.label, step.command);
            sink(LogEvent::classified(format!("EXECUTING: {}", step.command)));

            let cmd = CommandLine::shell(&step.command);
            let (_handle, mut child) = match ProcessSupervisor::spawn(&cmd, Some(cwd)) {
                Ok(spawned) => spawned,
                Err(e) => {
                    log::warn!("Setup step {} failed to start: {}", step.label, e);
                    sink(LogEvent::diagnostic(format!("FATAL: {}", e)));
                    report.failed += 1;
                    continue;
                }
            };

            let mut read_failed = false;
            if let Some(lines) = child.take_lines() {
                for line in lines {
                    match line {
                        Ok(line) => {
                            let line = line.trim();
                            if !line.is_empty() {
                                sink(LogEvent::classified(format!("  {}", line)));
                            }
                        }
                        Err(e) => {
                            sink(LogEvent::diagnostic(format!("FATAL: {}", e)));
                            read_failed = true;
                            break;
                        }
                    }
                }
            }

            match child.wait() {
                Ok(Some(0)) if !read_failed => report.succeeded += 1,
                Ok(code) => {
                    let code = code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
                    sink(LogEvent::diagnostic(format!("{} exited with {}", step.label, code)));
                    report.failed += 1;
                }
                Err(e) => {
                    sink(LogEvent::diagnostic(format!("FATAL: {}", e)));
                    report.failed += 1;
                }
            }
        }

        report
    }
}
