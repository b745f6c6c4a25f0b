//! Log view - bounded, searchable, scrollable log sink

use crate::semantic::{LogCategory, LogEvent};
use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use regex::{Regex, RegexBuilder};
use std::collections::VecDeque;

/// Log sink state: append, clear, search/highlight, conditional auto-scroll
#[derive(Debug)]
pub struct LogView {
    lines: VecDeque<LogEvent>,
    max_lines: usize,
    auto_scroll: bool,
    /// Lines between the bottom of the view and the newest line
    offset: usize,
    search: Option<Regex>,
}

impl LogView {
    pub fn new(max_lines: usize, auto_scroll: bool) -> Self {
        Self {
            lines: VecDeque::new(),
            max_lines: max_lines.max(1),
            auto_scroll,
            offset: 0,
            search: None,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &LogEvent> {
        self.lines.iter()
    }

    pub fn auto_scroll(&self) -> bool {
        self.auto_scroll
    }

    pub fn toggle_auto_scroll(&mut self) {
        self.auto_scroll = !self.auto_scroll;
        if self.auto_scroll {
            self.offset = 0;
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn append(&mut self, event: LogEvent) {
        self.lines.push_back(event);
        if self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }

        if self.auto_scroll {
            self.offset = 0;
        } else {
            // Keep the same lines in view while new ones arrive below
            self.offset = (self.offset + 1).min(self.lines.len());
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.offset = 0;
    }

    pub fn scroll_up(&mut self, n: usize) {
        self.offset = (self.offset + n).min(self.lines.len());
    }

    pub fn scroll_down(&mut self, n: usize) {
        self.offset = self.offset.saturating_sub(n);
    }

    pub fn scroll_to_end(&mut self) {
        self.offset = 0;
    }

    /// Highlight `query` case-insensitively. Empty clears the search.
    /// Returns the number of matches in the current log.
    pub fn set_search(&mut self, query: &str) -> usize {
        if query.is_empty() {
            self.search = None;
            return 0;
        }

        self.search = RegexBuilder::new(&regex::escape(query))
            .case_insensitive(true)
            .build()
            .ok();
        self.match_count()
    }

    pub fn clear_search(&mut self) {
        self.search = None;
    }

    pub fn is_searching(&self) -> bool {
        self.search.is_some()
    }

    pub fn match_count(&self) -> usize {
        match &self.search {
            Some(re) => self.lines.iter().map(|l| re.find_iter(&l.text).count()).sum(),
            None => 0,
        }
    }

    /// Byte ranges of search hits in `text`
    pub fn matches(&self, text: &str) -> Vec<(usize, usize)> {
        match &self.search {
            Some(re) => re.find_iter(text).map(|m| (m.start(), m.end())).collect(),
            None => Vec::new(),
        }
    }

    /// Index range of the lines visible in a window `height` lines tall
    pub fn visible_range(&self, height: usize) -> std::ops::Range<usize> {
        let len = self.lines.len();
        let offset = self.offset.min(len.saturating_sub(height));
        let end = len - offset;
        end.saturating_sub(height)..end
    }

    pub fn render(&self, f: &mut Frame, area: Rect, title: &str) {
        let height = area.height.saturating_sub(2) as usize;
        let range = self.visible_range(height);

        let lines: Vec<Line> = self
            .lines
            .range(range)
            .map(|event| self.render_line(event))
            .collect();

        let mut title = format!("{} ({} lines", title, self.lines.len());
        if self.is_searching() {
            title.push_str(&format!(", {} matches", self.match_count()));
        }
        if !self.auto_scroll {
            title.push_str(", scroll locked");
        }
        title.push(')');

        let body = if lines.is_empty() {
            Paragraph::new("(waiting for output...)").style(Style::default().fg(Color::DarkGray))
        } else {
            Paragraph::new(lines)
        };
        f.render_widget(body.block(Block::default().borders(Borders::ALL).title(title)), area);
    }

    fn render_line<'a>(&self, event: &'a LogEvent) -> Line<'a> {
        let style = category_style(event.category);
        let mut spans = vec![Span::styled(
            event.timestamp.format("[%H:%M:%S] ").to_string(),
            Style::default().fg(Color::DarkGray),
        )];

        let text = event.text.as_str();
        let mut cursor = 0;
        for (start, end) in self.matches(text) {
            if start > cursor {
                spans.push(Span::styled(&text[cursor..start], style));
            }
            spans.push(Span::styled(
                &text[start..end],
                Style::default().fg(Color::Black).bg(Color::LightBlue),
            ));
            cursor = end;
        }
        if cursor < text.len() {
            spans.push(Span::styled(&text[cursor..], style));
        }

        Line::from(spans)
    }
}

pub fn category_style(category: LogCategory) -> Style {
    match category {
        LogCategory::Diagnostic => Style::default().fg(Color::Red),
        LogCategory::ResultHeader => Style::default()
            .fg(Color::LightBlue)
            .add_modifier(Modifier::BOLD),
        LogCategory::Info => Style::default().fg(Color::Cyan),
        LogCategory::Progress => Style::default().fg(Color::Magenta),
        LogCategory::Plain => Style::default().fg(Color::White),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_with(n: usize, auto_scroll: bool) -> LogView {
        let mut view = LogView::new(100, auto_scroll);
        for i in 0..n {
            view.append(LogEvent::classified(format!("line {}", i)));
        }
        view
    }

    #[test]
    fn test_bounded_history() {
        let mut view = LogView::new(3, true);
        for i in 0..5 {
            view.append(LogEvent::classified(format!("row {}", i)));
        }
        let texts: Vec<&str> = view.lines().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["row 2", "row 3", "row 4"]);
    }

    #[test]
    fn test_auto_scroll_pins_to_end() {
        let mut view = view_with(20, true);
        view.scroll_up(5);
        assert_eq!(view.visible_range(10), 5..15);
        view.append(LogEvent::classified("new"));
        assert_eq!(view.visible_range(10), 11..21);
    }

    #[test]
    fn test_scroll_lock_keeps_position() {
        let mut view = view_with(20, false);
        view.scroll_to_end();
        let before = view.visible_range(10);
        view.append(LogEvent::classified("new"));
        assert_eq!(view.visible_range(10), before);

        view.toggle_auto_scroll();
        assert_eq!(view.visible_range(10), 11..21);
    }

    #[test]
    fn test_short_log_visible_range() {
        let mut view = view_with(3, true);
        view.scroll_up(50);
        assert_eq!(view.visible_range(10), 0..3);
    }

    #[test]
    fn test_search_case_insensitive_literal() {
        let mut view = LogView::new(10, true);
        view.append(LogEvent::classified("svchost.exe  PID 640"));
        view.append(LogEvent::classified("SVCHOST.EXE  PID 712"));
        view.append(LogEvent::classified("lsass.exe"));

        assert_eq!(view.set_search("svchost.exe"), 2);
        assert_eq!(view.matches("a svchost.exe b"), vec![(2, 13)]);
        // '.' is literal, not a wildcard
        assert!(view.matches("svchostXexe").is_empty());

        assert_eq!(view.set_search(""), 0);
        assert!(!view.is_searching());
    }

    #[test]
    fn test_clear() {
        let mut view = view_with(5, true);
        view.clear();
        assert!(view.is_empty());
        assert_eq!(view.visible_range(10), 0..0);
    }
}
