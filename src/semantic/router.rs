//! Log routing - keyword classification of tool output lines
//!
//! The tool's output has no schema, so classification is plain
//! case-sensitive substring matching. Two tiers:
//!
//! 1. Phase markers (`Progress:`, `Scanning`, `Stacking`) feed the status
//!    indicator and only reach the log at verbosity 2 and above.
//! 2. Everything else is classified by [`classify`], first match wins.

use super::status::StatusUpdate;
use crate::core::Verbosity;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

const ERROR_KEYWORDS: &[&str] = &["ERROR", "Exception", "CRITICAL"];
const HEADER_KEYWORDS: &[&str] = &["Offset", "PID", "PPID", "Name", "Property", "Value", "---"];
const INFO_KEYWORDS: &[&str] = &["Symbols", "Volatility", "Framework", "pdb"];
const PHASE_KEYWORDS: &[&str] = &["Progress:", "Scanning", "Stacking"];
const RESULT_KEYWORDS: &[&str] = &["Offset", "PID", "PPID", "Name", "---"];

/// Routed lines between two periodic summaries
pub const SUMMARY_INTERVAL: usize = 500;

/// Semantic category of one log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Progress,
    ResultHeader,
    Diagnostic,
    Info,
    Plain,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogCategory::Progress => "progress",
            LogCategory::ResultHeader => "header",
            LogCategory::Diagnostic => "diagnostic",
            LogCategory::Info => "info",
            LogCategory::Plain => "plain",
        };
        f.write_str(name)
    }
}

fn contains_any(line: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| line.contains(k))
}

/// Classify a trimmed, non-empty line. Pure.
///
/// Any line mentioning `Exception` is a diagnostic, even when it is ordinary
/// tool output such as a plugin column value.
pub fn classify(line: &str) -> LogCategory {
    classify_tagged(line, false)
}

/// [`classify`], with `is_error` forcing [`LogCategory::Diagnostic`]
pub fn classify_tagged(line: &str, is_error: bool) -> LogCategory {
    if is_error || contains_any(line, ERROR_KEYWORDS) {
        LogCategory::Diagnostic
    } else if contains_any(line, HEADER_KEYWORDS) {
        LogCategory::ResultHeader
    } else if contains_any(line, INFO_KEYWORDS) {
        LogCategory::Info
    } else {
        LogCategory::Plain
    }
}

/// Transient progress chatter rather than a log entry
pub fn is_phase_marker(raw: &str) -> bool {
    contains_any(raw, PHASE_KEYWORDS)
}

/// Line that signals tabular results are being emitted
pub fn is_result_marker(line: &str) -> bool {
    contains_any(line, RESULT_KEYWORDS)
}

/// One line destined for the log view. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Local>,
    pub category: LogCategory,
    pub text: String,
}

impl LogEvent {
    pub fn new(category: LogCategory, text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            category,
            text: text.into(),
        }
    }

    /// Category chosen by [`classify`]
    pub fn classified(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(classify(&text), text)
    }

    /// Caller-tagged error
    pub fn diagnostic(text: impl Into<String>) -> Self {
        Self::new(LogCategory::Diagnostic, text)
    }

    /// `[HH:MM:SS] text`
    pub fn render(&self) -> String {
        format!("{} {}", self.timestamp.format("[%H:%M:%S]"), self.text)
    }
}

/// Per-category line counts for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub progress: usize,
    pub result_header: usize,
    pub diagnostic: usize,
    pub info: usize,
    pub plain: usize,
    pub results_found: bool,
}

impl RunSummary {
    fn count(&mut self, category: LogCategory) {
        match category {
            LogCategory::Progress => self.progress += 1,
            LogCategory::ResultHeader => self.result_header += 1,
            LogCategory::Diagnostic => self.diagnostic += 1,
            LogCategory::Info => self.info += 1,
            LogCategory::Plain => self.plain += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.progress + self.result_header + self.diagnostic + self.info + self.plain
    }
}

/// What one raw line turned into. Apply `status` before `log`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Routed {
    pub status: Option<StatusUpdate>,
    pub log: Option<LogEvent>,
    pub summary: Option<RunSummary>,
}

impl Routed {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.log.is_none() && self.summary.is_none()
    }
}

/// Run-scoped router: two-tier phase handling plus the one-shot results flag
#[derive(Debug, Clone)]
pub struct LogRouter {
    verbosity: Verbosity,
    summary: RunSummary,
    routed: usize,
}

impl LogRouter {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            summary: RunSummary::default(),
            routed: 0,
        }
    }

    /// True once the first result line of this run has been seen
    pub fn results_found(&self) -> bool {
        self.summary.results_found
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Route one raw output line. Blank lines produce nothing.
    pub fn route(&mut self, raw: &str) -> Routed {
        let clean = raw.trim();
        if clean.is_empty() {
            return Routed::default();
        }

        let mut routed = Routed::default();

        if is_phase_marker(raw) {
            routed.status = Some(StatusUpdate::scanning(clean));
            if self.verbosity.shows_phase_markers() {
                routed.log = Some(self.record(LogEvent::new(LogCategory::Progress, clean)));
            }
        } else {
            if !self.summary.results_found && is_result_marker(clean) {
                self.summary.results_found = true;
                routed.status = Some(StatusUpdate::data_active());
            }
            routed.log = Some(self.record(LogEvent::classified(clean)));
        }

        self.routed += 1;
        if self.routed % SUMMARY_INTERVAL == 0 {
            routed.summary = Some(self.summary.clone());
        }
        routed
    }

    /// Count an event produced outside [`route`](Self::route), e.g. a fault line
    pub fn record(&mut self, event: LogEvent) -> LogEvent {
        self.summary.count(event.category);
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::StatusTone;

    fn router(level: u8) -> LogRouter {
        LogRouter::new(Verbosity::new(level).unwrap())
    }

    #[test]
    fn test_classify_rules() {
        assert_eq!(classify("ERROR volatility3.framework: bad layer"), LogCategory::Diagnostic);
        assert_eq!(classify("Offset\tPID\tPPID\tImageFileName"), LogCategory::ResultHeader);
        assert_eq!(classify("Property\tValue"), LogCategory::ResultHeader);
        assert_eq!(classify("Volatility 3 Framework 2.7.0"), LogCategory::Info);
        assert_eq!(classify("0x1000\t1\t0\tinit"), LogCategory::Plain);
    }

    #[test]
    fn test_error_beats_header() {
        assert_eq!(classify("CRITICAL: PID table unreadable"), LogCategory::Diagnostic);
        assert_eq!(classify("--- ERROR ---"), LogCategory::Diagnostic);
    }

    #[test]
    fn test_exception_word_is_known_false_positive() {
        // Ordinary output mentioning "Exception" still lands in Diagnostic
        assert_eq!(
            classify("0x4a0\tKiUserExceptionDispatcher\tntdll.dll"),
            LogCategory::Diagnostic
        );
    }

    #[test]
    fn test_classify_is_case_sensitive_and_pure() {
        assert_eq!(classify("error in lowercase"), LogCategory::Plain);
        let first = classify("Symbols loaded");
        classify("ERROR");
        assert_eq!(classify("Symbols loaded"), first);
    }

    #[test]
    fn test_explicit_error_tag() {
        assert_eq!(classify_tagged("plain words", true), LogCategory::Diagnostic);
        assert_eq!(LogEvent::diagnostic("x").category, LogCategory::Diagnostic);
    }

    #[test]
    fn test_phase_marker_suppressed_at_low_verbosity() {
        let mut r = router(1);
        let out = r.route("Progress:  45.00\t\tScanning primary layer");
        assert_eq!(out.status.as_ref().unwrap().tone, StatusTone::ActiveScan);
        assert!(out.log.is_none());
    }

    #[test]
    fn test_phase_marker_logged_at_high_verbosity() {
        let mut r = router(2);
        let out = r.route("Stacking attempts finished");
        assert_eq!(out.status.unwrap().text, "KERNEL: Stacking attempts finished");
        assert_eq!(out.log.unwrap().category, LogCategory::Progress);
    }

    #[test]
    fn test_phase_marker_never_header() {
        // "Scanning" wins even though "PID" is present
        let mut r = router(3);
        let out = r.route("Scanning PID list");
        assert_eq!(out.log.unwrap().category, LogCategory::Progress);
        assert!(!r.results_found());
    }

    #[test]
    fn test_results_flag_flips_once() {
        let mut r = router(1);
        assert!(r.route("Volatility 3 Framework 2.7.0").status.is_none());

        let first = r.route("Offset\tPID\tPPID\tName");
        assert_eq!(first.status.unwrap().tone, StatusTone::DataActive);
        assert!(r.results_found());

        let second = r.route("--- ---");
        assert!(second.status.is_none());
        assert_eq!(second.log.unwrap().category, LogCategory::ResultHeader);
        assert!(r.results_found());
    }

    #[test]
    fn test_value_header_does_not_flip_results() {
        let mut r = router(1);
        let out = r.route("Property\tValue");
        assert_eq!(out.log.unwrap().category, LogCategory::ResultHeader);
        assert!(out.status.is_none());
        assert!(!r.results_found());
    }

    #[test]
    fn test_blank_lines_dropped() {
        let mut r = router(3);
        assert!(r.route("   \t").is_empty());
        assert_eq!(r.summary().total(), 0);
    }

    #[test]
    fn test_periodic_summary() {
        let mut r = router(1);
        let summaries = (0..SUMMARY_INTERVAL * 2)
            .filter_map(|i| r.route(&format!("0x{:x} row", i)).summary)
            .collect::<Vec<_>>();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].plain, SUMMARY_INTERVAL * 2);
    }

    #[test]
    fn test_render_prefix() {
        let event = LogEvent::classified("hello");
        let rendered = event.render();
        assert!(rendered.starts_with('['));
        assert!(rendered.ends_with("] hello"));
        assert_eq!(rendered.len(), "[00:00:00] hello".len());
    }
}
