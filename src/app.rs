//! Application state and key handling for the control panel

use crate::config::Config;
use crate::core::{ProcessSupervisor, RunRequest, ToolLocator, Verbosity};
use crate::plugins::PluginPicker;
use crate::semantic::{LogCategory, LogEvent, RunSummary, StatusTone, StatusUpdate};
use crate::session::{RunOutcome, SessionController, SessionEvent, SessionPhase, StartOutcome};
use crate::setup::{
    self, lime_steps, purge_symbol_cache, symbol_cache_dir, PurgeOutcome, SetupFlow, ShellRunner,
    ShellStep,
};
use crate::ui::LogView;
use chrono::{DateTime, Local};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

pub const SESSION_BANNER: &str = "--- ANALYSIS SESSION INITIATED ---";

/// Lines moved by PgUp/PgDn
const PAGE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    EditImage,
    Search,
    ConfirmPurge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Analyst,
    Setup,
}

/// One runnable entry of the setup menu
#[derive(Debug, Clone)]
pub struct SetupEntry {
    pub label: String,
    pub title: String,
    pub steps: Vec<ShellStep>,
}

/// LiME steps one by one, the whole LiME sequence, then deploy and repair
pub fn setup_entries(config: &Config) -> Vec<SetupEntry> {
    let mut entries: Vec<SetupEntry> = lime_steps()
        .into_iter()
        .map(|step| SetupEntry {
            label: format!("LiME: {}", step.label),
            title: format!("{}: {}", SetupFlow::Lime.title(), step.label),
            steps: vec![step],
        })
        .collect();

    for flow in SetupFlow::ALL {
        let label = match flow {
            SetupFlow::Lime => "LiME: FULL SEQUENCE".to_string(),
            other => other.title().to_string(),
        };
        entries.push(SetupEntry {
            label,
            title: flow.title().to_string(),
            steps: flow.steps(&config.tool),
        });
    }
    entries
}

/// Active run as seen by the view
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub pid: u32,
    pub command_line: String,
    pub started_at: DateTime<Local>,
}

/// Application state
pub struct App {
    pub config: Config,
    pub base_dir: PathBuf,
    pub controller: SessionController,
    pub event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    pub setup_runner: ShellRunner,
    setup_tx: mpsc::UnboundedSender<LogEvent>,
    pub setup_rx: mpsc::UnboundedReceiver<LogEvent>,
    pub log: LogView,
    pub status: StatusUpdate,
    pub image_path: String,
    pub plugins: PluginPicker,
    pub verbosity: Verbosity,
    pub search_query: String,
    pub input: String,
    pub mode: InputMode,
    pub screen: Screen,
    pub setup_entries: Vec<SetupEntry>,
    pub setup_selected: usize,
    pub active: Option<ActiveRun>,
    pub last_summary: Option<RunSummary>,
    pub notice: Option<String>,
    pub privileges: Option<bool>,
    pub should_quit: bool,
}

impl App {
    /// Create the app; relative tool and cache paths resolve against `base_dir`
    pub fn new(config: Config, base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let locator = ToolLocator::new(config.tool.clone(), base_dir.clone());
        let (controller, event_rx) = SessionController::new(ProcessSupervisor::new(locator));
        let (setup_tx, setup_rx) = mpsc::unbounded_channel();

        Self {
            controller,
            event_rx,
            setup_runner: ShellRunner::new(base_dir.clone()),
            setup_tx,
            setup_rx,
            log: LogView::new(config.ui.max_log_lines, config.ui.auto_scroll),
            status: StatusUpdate::standby(),
            image_path: String::new(),
            plugins: PluginPicker::new(config.ui.default_os),
            verbosity: config.ui.default_verbosity,
            search_query: String::new(),
            input: String::new(),
            mode: InputMode::Normal,
            screen: Screen::Analyst,
            setup_entries: setup_entries(&config),
            setup_selected: 0,
            active: None,
            last_summary: None,
            notice: None,
            privileges: setup::is_elevated(),
            should_quit: false,
            config,
            base_dir,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image_path = image.into();
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.controller.phase()
    }

    /// Drain session and setup events (non-blocking)
    pub fn process_events(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.apply_event(event);
        }
        while let Ok(event) = self.setup_rx.try_recv() {
            self.log.append(event);
        }
    }

    pub fn apply_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Started {
                pid,
                command_line,
                started_at,
            } => {
                self.log.clear();
                self.log.append(LogEvent::new(LogCategory::ResultHeader, SESSION_BANNER));
                self.log
                    .append(LogEvent::new(LogCategory::Info, format!("[pid {}] {}", pid, command_line)));
                self.last_summary = None;
                self.active = Some(ActiveRun {
                    pid,
                    command_line,
                    started_at,
                });
            }
            SessionEvent::Log(event) => self.log.append(event),
            SessionEvent::Status(status) => self.status = status,
            SessionEvent::Summary(summary) => self.last_summary = Some(summary),
            SessionEvent::Finished {
                exit_code,
                outcome,
                summary,
                elapsed_ms,
            } => {
                self.active = None;
                self.last_summary = Some(summary);
                self.notice = Some(match outcome {
                    RunOutcome::Completed => format!(
                        "Run finished in {:.1}s (exit {})",
                        elapsed_ms as f64 / 1000.0,
                        exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string())
                    ),
                    RunOutcome::Cancelled => "Run stopped".to_string(),
                    RunOutcome::Faulted => "Run faulted".to_string(),
                });
            }
        }
    }

    /// Start an analysis from the current panel inputs
    pub fn start_analysis(&mut self) {
        let request = match RunRequest::new(
            self.image_path.trim(),
            self.plugins.selected(),
            self.verbosity.level(),
        ) {
            Ok(request) => request,
            Err(e) => {
                self.status = StatusUpdate::new(
                    format!("STATUS: {}", e.to_string().to_uppercase()),
                    StatusTone::Error,
                );
                return;
            }
        };

        match self.controller.start(request) {
            StartOutcome::Started { pid } => log::debug!("Panel started pid {}", pid),
            StartOutcome::AlreadyRunning => {
                self.notice = Some("An analysis is already running".to_string())
            }
            StartOutcome::SpawnFailed => {}
        }
    }

    pub fn stop_analysis(&mut self) {
        if self.controller.stop() {
            self.notice = Some("Stopping analysis...".to_string());
        }
    }

    pub fn quit(&mut self) {
        self.controller.stop();
        self.should_quit = true;
    }

    /// Handle keyboard input
    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.quit();
            return;
        }

        match self.mode {
            InputMode::EditImage | InputMode::Search => self.handle_input_key(key),
            InputMode::ConfirmPurge => self.handle_confirm_key(key),
            InputMode::Normal => match self.screen {
                Screen::Analyst => self.handle_analyst_key(key),
                Screen::Setup => self.handle_setup_key(key),
            },
        }
    }

    fn handle_analyst_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.quit(),
            KeyCode::Char('i') => {
                self.input = self.image_path.clone();
                self.mode = InputMode::EditImage;
            }
            KeyCode::Char('/') => {
                self.input = self.search_query.clone();
                self.mode = InputMode::Search;
            }
            KeyCode::Char('n') => {
                self.search_query.clear();
                self.log.clear_search();
            }
            KeyCode::Left => self.plugins.previous(),
            KeyCode::Right => self.plugins.next(),
            KeyCode::Char('o') => self.plugins.switch_os(),
            KeyCode::Char('v') => self.verbosity = self.verbosity.cycle(),
            KeyCode::Char(c @ '0'..='3') => {
                if let Ok(v) = Verbosity::new(c as u8 - b'0') {
                    self.verbosity = v;
                }
            }
            KeyCode::Char('r') | KeyCode::F(5) => self.start_analysis(),
            KeyCode::Char('s') => self.stop_analysis(),
            KeyCode::Char('c') => self.log.clear(),
            KeyCode::Char('a') => self.log.toggle_auto_scroll(),
            KeyCode::Char('p') => self.mode = InputMode::ConfirmPurge,
            KeyCode::Char('g') => self.screen = Screen::Setup,
            _ => self.handle_scroll_key(key),
        }
    }

    fn handle_setup_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.quit(),
            KeyCode::Esc | KeyCode::Char('g') => self.screen = Screen::Analyst,
            KeyCode::Up => self.setup_selected = self.setup_selected.saturating_sub(1),
            KeyCode::Down => {
                if self.setup_selected + 1 < self.setup_entries.len() {
                    self.setup_selected += 1;
                }
            }
            KeyCode::Enter => self.run_selected_setup(),
            KeyCode::Char('c') => self.log.clear(),
            _ => self.handle_scroll_key(key),
        }
    }

    fn handle_scroll_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Up => self.log.scroll_up(1),
            KeyCode::Down => self.log.scroll_down(1),
            KeyCode::PageUp => self.log.scroll_up(PAGE),
            KeyCode::PageDown => self.log.scroll_down(PAGE),
            KeyCode::End => self.log.scroll_to_end(),
            _ => {}
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.input.clear();
                self.mode = InputMode::Normal;
            }
            KeyCode::Enter => {
                let value = std::mem::take(&mut self.input);
                match self.mode {
                    InputMode::EditImage => self.image_path = value.trim().to_string(),
                    InputMode::Search => {
                        let matches = self.log.set_search(&value);
                        if !value.is_empty() {
                            self.notice = Some(format!("{} matches for '{}'", matches, value));
                        }
                        self.search_query = value;
                    }
                    _ => {}
                }
                self.mode = InputMode::Normal;
            }
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char(c) => self.input.push(c),
            _ => {}
        }
    }

    fn handle_confirm_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                self.mode = InputMode::Normal;
                self.purge_cache();
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.mode = InputMode::Normal;
            }
            _ => {}
        }
    }

    fn run_selected_setup(&mut self) {
        let Some(entry) = self.setup_entries.get(self.setup_selected) else {
            return;
        };
        if !self
            .setup_runner
            .start(entry.title.clone(), entry.steps.clone(), self.setup_tx.clone())
        {
            self.notice = Some("A setup flow is already running".to_string());
        }
    }

    fn purge_cache(&mut self) {
        let dir = symbol_cache_dir(&self.base_dir, self.config.tool.symbol_cache.as_deref());
        let event = match purge_symbol_cache(&dir) {
            Ok(PurgeOutcome::Purged(path)) => {
                LogEvent::new(LogCategory::Info, format!("[+] Symbol cache purged: {}", path.display()))
            }
            Ok(PurgeOutcome::NotFound(path)) => {
                LogEvent::new(LogCategory::Info, format!("[!] No symbol cache at {}", path.display()))
            }
            Err(e) => LogEvent::diagnostic(format!("FATAL: {}", e)),
        };
        self.log.append(event);
    }

    /// Check if we should poll for input
    pub fn should_poll_input() -> crate::Result<bool> {
        Ok(event::poll(Duration::from_millis(100))?)
    }

    /// Get keyboard event
    pub fn read_event() -> crate::Result<Event> {
        Ok(event::read()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::TargetOs;

    fn app() -> App {
        let dir = std::env::temp_dir();
        App::new(Config::default(), dir)
    }

    fn press(app: &mut App, code: KeyCode) {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE));
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            press(app, KeyCode::Char(c));
        }
    }

    #[test]
    fn test_edit_image_path() {
        let mut app = app();
        press(&mut app, KeyCode::Char('i'));
        assert_eq!(app.mode, InputMode::EditImage);
        type_text(&mut app, "/tmp/dump.memx");
        press(&mut app, KeyCode::Backspace);
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.image_path, "/tmp/dump.mem");
        assert_eq!(app.mode, InputMode::Normal);

        // Esc abandons the edit
        press(&mut app, KeyCode::Char('i'));
        type_text(&mut app, "zzz");
        press(&mut app, KeyCode::Esc);
        assert_eq!(app.image_path, "/tmp/dump.mem");
    }

    #[test]
    fn test_plugin_and_verbosity_keys() {
        let mut app = app();
        assert_eq!(app.plugins.os(), TargetOs::Windows);
        press(&mut app, KeyCode::Char('o'));
        assert_eq!(app.plugins.os(), TargetOs::Linux);
        let first = app.plugins.selected();
        press(&mut app, KeyCode::Right);
        assert_ne!(app.plugins.selected(), first);
        press(&mut app, KeyCode::Left);
        assert_eq!(app.plugins.selected(), first);

        press(&mut app, KeyCode::Char('3'));
        assert_eq!(app.verbosity.level(), 3);
        press(&mut app, KeyCode::Char('v'));
        assert_eq!(app.verbosity.level(), 0);
    }

    #[test]
    fn test_start_without_image_shows_error() {
        let mut app = app();
        press(&mut app, KeyCode::Char('r'));
        assert_eq!(app.status.tone, StatusTone::Error);
        assert_eq!(app.status.text, "STATUS: NO MEMORY IMAGE SELECTED");
        assert_eq!(app.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_started_event_resets_log() {
        let mut app = app();
        app.log.append(LogEvent::classified("stale line"));
        app.apply_event(SessionEvent::Started {
            pid: 42,
            command_line: "vol -f /tmp/dump.mem windows.info.Info".to_string(),
            started_at: Local::now(),
        });

        let texts: Vec<&str> = app.log.lines().map(|l| l.text.as_str()).collect();
        assert_eq!(texts[0], SESSION_BANNER);
        assert!(texts[1].starts_with("[pid 42]"));
        assert_eq!(app.active.as_ref().map(|a| a.pid), Some(42));

        app.apply_event(SessionEvent::Finished {
            exit_code: Some(0),
            outcome: RunOutcome::Completed,
            summary: RunSummary::default(),
            elapsed_ms: 1500,
        });
        assert!(app.active.is_none());
        assert_eq!(app.notice.as_deref(), Some("Run finished in 1.5s (exit 0)"));
    }

    #[test]
    fn test_search_mode() {
        let mut app = app();
        app.log.append(LogEvent::classified("explorer.exe 1234"));
        press(&mut app, KeyCode::Char('/'));
        type_text(&mut app, "EXPLORER");
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.search_query, "EXPLORER");
        assert_eq!(app.log.match_count(), 1);

        press(&mut app, KeyCode::Char('n'));
        assert!(!app.log.is_searching());
    }

    #[test]
    fn test_setup_menu_navigation() {
        let mut app = app();
        press(&mut app, KeyCode::Char('g'));
        assert_eq!(app.screen, Screen::Setup);
        assert_eq!(app.setup_entries.len(), 8);
        assert_eq!(app.setup_entries[0].label, "LiME: UPDATE APT");

        press(&mut app, KeyCode::Up);
        assert_eq!(app.setup_selected, 0);
        for _ in 0..20 {
            press(&mut app, KeyCode::Down);
        }
        assert_eq!(app.setup_selected, 7);
        press(&mut app, KeyCode::Esc);
        assert_eq!(app.screen, Screen::Analyst);
    }

    #[test]
    fn test_purge_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("symbols");
        std::fs::create_dir_all(&cache).unwrap();

        let mut config = Config::default();
        config.tool.symbol_cache = Some(cache.clone());
        let mut app = App::new(config, dir.path());

        press(&mut app, KeyCode::Char('p'));
        assert_eq!(app.mode, InputMode::ConfirmPurge);
        press(&mut app, KeyCode::Char('n'));
        assert!(cache.exists());

        press(&mut app, KeyCode::Char('p'));
        press(&mut app, KeyCode::Char('y'));
        assert!(!cache.exists());
        assert!(app.log.lines().any(|l| l.text.starts_with("[+] Symbol cache purged")));
    }

    #[test]
    fn test_quit() {
        let mut app = app();
        app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(app.should_quit);
    }
}
