//! Session control - single-flight analysis runs
//!
//! `SessionController` owns the only `SessionState`. A run moves
//! Idle → Running → (Stopping →) Idle; the worker always clears the active
//! handle on the way out, whether the tool finished, faulted, or was stopped.

use crate::core::{ChildProcess, ProcessSupervisor, RunHandle, RunRequest, SupervisorError};
use crate::semantic::{LogEvent, LogRouter, RunSummary, StatusUpdate};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Time a stopped child gets to exit after SIGTERM before it is killed
const STOP_GRACE: Duration = Duration::from_millis(1500);
const STOP_POLL: Duration = Duration::from_millis(50);

pub const TERMINATED_BY_USER: &str = "--- SESSION TERMINATED BY USER ---";

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Faulted,
}

/// Events delivered to the view, in the order the worker produced them
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Started {
        pid: u32,
        command_line: String,
        started_at: DateTime<Local>,
    },
    Log(LogEvent),
    Status(StatusUpdate),
    Summary(RunSummary),
    Finished {
        exit_code: Option<i32>,
        outcome: RunOutcome,
        summary: RunSummary,
        elapsed_ms: u64,
    },
}

impl SessionEvent {
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Running,
    Stopping,
}

/// Result of a start action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    /// A run is already active; nothing happened
    AlreadyRunning,
    /// The tool could not be launched; a diagnostic was emitted
    SpawnFailed,
}

/// Process-wide run state. Running exactly when a handle is present.
#[derive(Debug, Default)]
pub struct SessionState {
    active: Option<RunHandle>,
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_handle(&self) -> Option<&RunHandle> {
        self.active.as_ref()
    }

    pub fn phase(&self) -> SessionPhase {
        match &self.active {
            None => SessionPhase::Idle,
            Some(handle) if handle.cancel_requested() => SessionPhase::Stopping,
            Some(_) => SessionPhase::Running,
        }
    }
}

type SharedState = Arc<Mutex<SessionState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ties start/stop actions to the supervisor and the log router
pub struct SessionController {
    supervisor: ProcessSupervisor,
    state: SharedState,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionController {
    /// Create a controller and the receiving end of its event stream
    pub fn new(supervisor: ProcessSupervisor) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                supervisor,
                state: Arc::new(Mutex::new(SessionState::default())),
                event_tx: tx,
            },
            rx,
        )
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.state).phase()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).is_running()
    }

    pub fn active_handle(&self) -> Option<RunHandle> {
        lock(&self.state).active_handle().cloned()
    }

    /// Start a run. No-op while another run is active.
    ///
    /// Must be called from within a Tokio runtime; the output is consumed on
    /// the blocking pool.
    pub fn start(&self, request: RunRequest) -> StartOutcome {
        let mut state = lock(&self.state);
        if let Some(active) = state.active_handle() {
            log::debug!("Start ignored, pid {} still active", active.pid());
            return StartOutcome::AlreadyRunning;
        }

        let (handle, child, cmd) = match self.supervisor.start(&request) {
            Ok(spawned) => spawned,
            Err(e) => {
                log::error!("Failed to start analysis: {}", e);
                self.emit(SessionEvent::Log(LogEvent::diagnostic(format!(
                    "SPAWN ERROR: {}",
                    e
                ))));
                self.emit(SessionEvent::Status(StatusUpdate::fault()));
                return StartOutcome::SpawnFailed;
            }
        };

        state.active = Some(handle.clone());
        drop(state);

        let pid = handle.pid();
        log::info!(
            "Analysis started: {} on {} (pid {})",
            request.command(),
            request.image_path().display(),
            pid
        );
        self.emit(SessionEvent::Started {
            pid,
            command_line: cmd.to_string(),
            started_at: handle.started_at(),
        });
        self.emit(SessionEvent::Status(StatusUpdate::initiated()));

        let worker = Worker {
            handle,
            child,
            router: LogRouter::new(request.verbosity()),
            state: self.state.clone(),
            event_tx: self.event_tx.clone(),
        };
        self.spawn_worker(worker);

        StartOutcome::Started { pid }
    }

    /// Request cancellation of the active run.
    ///
    /// Returns false, and does nothing, when no run is active.
    pub fn stop(&self) -> bool {
        let state = lock(&self.state);
        let Some(handle) = state.active_handle() else {
            return false;
        };

        let first = !handle.cancel_requested();
        if first {
            log::info!("Stop requested for pid {}", handle.pid());
            handle.request_cancel();
        }
        ProcessSupervisor::request_stop(handle);

        if first {
            self.spawn_escalation(handle.pid());
        }
        true
    }

    /// A tool that ignores SIGTERM keeps its pipe open and the worker blocked
    /// in a read; kill the tree once the grace period is over.
    fn spawn_escalation(&self, pid: u32) {
        let state = self.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STOP_GRACE).await;
            // Signal under the lock; the worker marks the handle exited under it too
            let guard = lock(&state);
            if let Some(handle) = guard.active_handle().filter(|h| h.pid() == pid) {
                if !handle.has_exited() {
                    log::warn!("pid {} ignored termination for {:?}", pid, STOP_GRACE);
                    ProcessSupervisor::force_stop(handle);
                }
            }
        });
    }

    fn spawn_worker(&self, worker: Worker) {
        let state = self.state.clone();
        let event_tx = self.event_tx.clone();
        let pid = worker.handle.pid();
        let join = tokio::task::spawn_blocking(move || worker.run());

        // A panicking worker still has to leave the session Idle
        tokio::spawn(async move {
            if let Err(e) = join.await {
                log::error!("Session worker for pid {} crashed: {}", pid, e);
                clear_active(&state, pid);
                let _ = event_tx.send(SessionEvent::Log(LogEvent::diagnostic(format!(
                    "CRITICAL FAULT: {}",
                    e
                ))));
                let _ = event_tx.send(SessionEvent::Status(StatusUpdate::fault()));
                let _ = event_tx.send(SessionEvent::Finished {
                    exit_code: None,
                    outcome: RunOutcome::Faulted,
                    summary: RunSummary::default(),
                    elapsed_ms: 0,
                });
            }
        });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

fn clear_active(state: &SharedState, pid: u32) {
    let mut state = lock(state);
    if state.active.as_ref().map(RunHandle::pid) == Some(pid) {
        state.active = None;
    }
}

/// Clears the active handle when dropped, including during unwinding
struct ActiveGuard {
    state: SharedState,
    pid: u32,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        clear_active(&self.state, self.pid);
    }
}

/// Background consumer for one run
struct Worker {
    handle: RunHandle,
    child: ChildProcess,
    router: LogRouter,
    state: SharedState,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Worker {
    fn run(mut self) {
        let started = Instant::now();
        let guard = ActiveGuard {
            state: self.state.clone(),
            pid: self.handle.pid(),
        };

        let mut faulted = self.consume();
        let exit_code = match self.reap() {
            Ok(code) => code,
            Err(e) => {
                log::error!("{}", e);
                if !self.handle.cancel_requested() && !faulted {
                    faulted = true;
                    let event = self
                        .router
                        .record(LogEvent::diagnostic(format!("CRITICAL FAULT: {}", e)));
                    self.emit(SessionEvent::Log(event));
                }
                None
            }
        };

        // Read after the reap: a stop can land while the tool runs with its output closed
        let cancelled = self.handle.cancel_requested();
        if cancelled {
            let event = self.router.record(LogEvent::diagnostic(TERMINATED_BY_USER));
            self.emit(SessionEvent::Log(event));
        }

        let (outcome, status) = if cancelled {
            (RunOutcome::Cancelled, StatusUpdate::terminated())
        } else if faulted {
            (RunOutcome::Faulted, StatusUpdate::fault())
        } else {
            (RunOutcome::Completed, StatusUpdate::completed(exit_code))
        };
        let pid = self.handle.pid();
        log::info!("Run {} finished: {:?} (exit {:?})", pid, outcome, exit_code);

        drop(guard);
        let _ = self.event_tx.send(SessionEvent::Status(status));
        let _ = self.event_tx.send(SessionEvent::Finished {
            exit_code,
            outcome,
            summary: self.router.summary().clone(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }

    /// Stream lines until EOF, a read failure, or a stop request.
    /// Returns true on a read failure.
    fn consume(&mut self) -> bool {
        let Some(lines) = self.child.take_lines() else {
            return false;
        };

        for line in lines {
            if self.handle.cancel_requested() {
                break;
            }
            match line {
                Ok(raw) => {
                    let routed = self.router.route(&raw);
                    if let Some(status) = routed.status {
                        self.emit(SessionEvent::Status(status));
                    }
                    if let Some(event) = routed.log {
                        self.emit(SessionEvent::Log(event));
                    }
                    if let Some(summary) = routed.summary {
                        self.emit(SessionEvent::Summary(summary));
                    }
                }
                Err(e) => {
                    if self.handle.cancel_requested() {
                        break;
                    }
                    log::error!("Output stream of pid {} failed: {}", self.handle.pid(), e);
                    let event = self
                        .router
                        .record(LogEvent::diagnostic(format!("CRITICAL FAULT: {}", e)));
                    self.emit(SessionEvent::Log(event));
                    return true;
                }
            }
        }
        false
    }

    /// Wait for the tool to exit, killing it once a stop has outlasted the
    /// grace period.
    ///
    /// The handle is marked exited under the state lock, so `stop` and the
    /// escalation task never signal a pid that has already been reaped.
    fn reap(&mut self) -> Result<Option<i32>, SupervisorError> {
        let mut stop_seen: Option<Instant> = None;
        let mut killed = false;
        loop {
            {
                let _state = lock(&self.state);
                if let Some(code) = self.child.try_wait()? {
                    self.handle.mark_exited();
                    return Ok(code);
                }
            }

            if self.handle.cancel_requested() && !killed {
                let since = *stop_seen.get_or_insert_with(Instant::now);
                if since.elapsed() >= STOP_GRACE {
                    log::warn!(
                        "pid {} ignored termination for {:?}, killing",
                        self.handle.pid(),
                        STOP_GRACE
                    );
                    self.child.kill();
                    killed = true;
                }
            }
            thread::sleep(STOP_POLL);
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolConfig;
    use crate::core::ToolLocator;

    fn missing_tool_controller() -> (SessionController, mpsc::UnboundedReceiver<SessionEvent>) {
        let dir = std::env::temp_dir();
        let config = ToolConfig {
            local_script: "volpanel-no-such-dir/vol.py".into(),
            executable: "volpanel-no-such-tool".to_string(),
            ..ToolConfig::default()
        };
        SessionController::new(ProcessSupervisor::new(ToolLocator::new(config, dir)))
    }

    #[test]
    fn test_state_phase() {
        let state = SessionState::default();
        assert_eq!(state.phase(), SessionPhase::Idle);
        assert!(!state.is_running());
    }

    #[test]
    fn test_stop_when_idle_is_silent() {
        let (controller, mut rx) = missing_tool_controller();
        assert!(!controller.stop());
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_spawn_failure_stays_idle() {
        let (controller, mut rx) = missing_tool_controller();
        let request = RunRequest::new("/tmp/dump.mem", "linux.pslist.PsList", 1).unwrap();

        assert_eq!(controller.start(request), StartOutcome::SpawnFailed);
        assert!(!controller.is_running());

        match rx.try_recv().unwrap() {
            SessionEvent::Log(event) => {
                assert_eq!(event.category, crate::semantic::LogCategory::Diagnostic);
                assert!(event.text.starts_with("SPAWN ERROR"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Status(_)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_json() {
        let event = SessionEvent::Log(LogEvent::diagnostic("CRITICAL FAULT: boom"));
        let json = event.to_json_line();
        assert!(json.contains("\"type\":\"log\""));
        assert!(json.contains("diagnostic"));
    }
}
