use crate::controller::Controller;
use crate::limit::{PRESETS, Rate, ShapingLimit, parse_rate};
use crate::session::SessionState;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, Paragraph},
};

const STEP_KBPS: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitField {
    Download,
    Upload,
}

/// What the main loop should do after a key press
#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    None,
    /// Turn limiting on (with this limit) or off
    Toggle(ShapingLimit),
    /// Push this limit to the running session
    Apply(ShapingLimit),
    Quit,
}

pub struct AppState {
    pub download: Rate,
    pub upload: Rate,
    pub split_mode: bool,
    pub selected_field: LimitField,
    pub rate_entry: Option<String>, // Some while typing a rate
    pub show_help: bool,
    pub status_message: String,
    // Mirrored from the controller once per tick
    pub session_state: SessionState,
    pub active_limit: Option<ShapingLimit>,
    pub last_error: Option<String>,
    pub helper_pid: Option<u32>,
    pub backend_name: &'static str,
    pub elevator_name: &'static str,
}

impl AppState {
    pub fn new(initial: ShapingLimit) -> Self {
        Self {
            download: initial.download(),
            upload: initial.upload(),
            split_mode: initial.is_split(),
            selected_field: LimitField::Download,
            rate_entry: None,
            show_help: false,
            status_message: "Ready".to_string(),
            session_state: SessionState::Disabled,
            active_limit: None,
            last_error: None,
            helper_pid: None,
            backend_name: "",
            elevator_name: "",
        }
    }

    /// Limit as currently edited (always within the valid range)
    pub fn edited_limit(&self) -> ShapingLimit {
        if self.split_mode {
            ShapingLimit::Split {
                download: self.download,
                upload: self.upload,
            }
        } else {
            ShapingLimit::Single(self.download)
        }
    }

    /// Edits not yet pushed to the running session
    pub fn has_pending_changes(&self) -> bool {
        self.session_state == SessionState::Active
            && self.active_limit != Some(self.edited_limit())
    }

    pub fn sync_from(&mut self, controller: &Controller) {
        self.session_state = controller.state();
        self.active_limit = controller.active_limit();
        self.last_error = controller.last_error().map(str::to_string);
        self.helper_pid = if controller.is_enabled() {
            controller.helper_pid()
        } else {
            None
        };
        self.backend_name = controller.backend_name();
        self.elevator_name = controller.elevator_name();
    }

    fn selected_rate_mut(&mut self) -> &mut Rate {
        match (self.split_mode, self.selected_field) {
            (true, LimitField::Upload) => &mut self.upload,
            _ => &mut self.download,
        }
    }

    pub fn adjust_selected(&mut self, delta_kbps: i64) {
        let rate = self.selected_rate_mut();
        *rate = rate.adjusted(delta_kbps);
    }

    /// Adjust by a tenth of the current value (at least one step of 1 Kbps)
    pub fn adjust_selected_percent(&mut self, up: bool) {
        let step = (i64::from(self.selected_rate_mut().kbps()) / 10).max(1);
        self.adjust_selected(if up { step } else { -step });
    }

    pub fn set_selected(&mut self, kbps: u64) {
        *self.selected_rate_mut() = Rate::clamped(kbps);
    }

    pub fn apply_preset(&mut self, index: usize) {
        if let Some((label, kbps)) = PRESETS.get(index) {
            self.set_selected(u64::from(*kbps));
            self.status_message = format!("Preset {}", label);
        }
    }

    pub fn toggle_split(&mut self) {
        self.split_mode = !self.split_mode;
        if !self.split_mode {
            self.selected_field = LimitField::Download;
        }
    }

    pub fn toggle_field(&mut self) {
        if !self.split_mode {
            return;
        }
        self.selected_field = match self.selected_field {
            LimitField::Download => LimitField::Upload,
            LimitField::Upload => LimitField::Download,
        };
    }

    fn commit_rate_entry(&mut self) {
        let Some(entry) = self.rate_entry.take() else {
            return;
        };
        if entry.trim().is_empty() {
            return;
        }
        match parse_rate(&entry) {
            Ok(kbps) => {
                self.set_selected(kbps);
                self.status_message = format!("Set to {}", Rate::clamped(kbps));
            }
            Err(e) => self.status_message = format!("{}", e),
        }
    }

    /// Translate a key press into state edits and an action for the main loop
    pub fn handle_key(&mut self, key: KeyEvent) -> UiAction {
        // ALWAYS check Ctrl+C first - force quit regardless of modal state
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return UiAction::Quit;
        }

        // If help is shown, any key closes it
        if self.show_help {
            self.show_help = false;
            return UiAction::None;
        }

        if let Some(entry) = self.rate_entry.as_mut() {
            match key.code {
                KeyCode::Esc => self.rate_entry = None,
                KeyCode::Enter => self.commit_rate_entry(),
                KeyCode::Backspace => {
                    entry.pop();
                }
                KeyCode::Char(c) if c.is_ascii_alphanumeric() || c == '.' => entry.push(c),
                _ => {}
            }
            return UiAction::None;
        }

        let shift = key.modifiers.contains(KeyModifiers::SHIFT);
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return UiAction::Quit,
            KeyCode::Char('h') | KeyCode::Char('?') => self.show_help = true,
            KeyCode::Char(' ') => return UiAction::Toggle(self.edited_limit()),
            KeyCode::Enter => {
                if self.session_state == SessionState::Active {
                    return UiAction::Apply(self.edited_limit());
                }
                self.status_message = "Limiting is off; press Space to turn it on".to_string();
            }
            KeyCode::Char('s') => self.toggle_split(),
            KeyCode::Tab | KeyCode::Up | KeyCode::Down => self.toggle_field(),
            KeyCode::Left if shift => self.adjust_selected_percent(false),
            KeyCode::Right if shift => self.adjust_selected_percent(true),
            KeyCode::Left => self.adjust_selected(-STEP_KBPS),
            KeyCode::Right => self.adjust_selected(STEP_KBPS),
            KeyCode::Char(c @ '1'..='6') => self.apply_preset(c as usize - '1' as usize),
            KeyCode::Char('n') => self.rate_entry = Some(String::new()),
            _ => {}
        }
        UiAction::None
    }
}

pub fn draw_ui(f: &mut Frame, app: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(12),   // Limits
            Constraint::Length(3), // Status bar
        ])
        .split(f.area());

    draw_header(f, chunks[0], app);
    draw_limits(f, chunks[1], app);
    draw_status_bar(f, chunks[2], app);

    if app.rate_entry.is_some() {
        draw_rate_entry(f, f.area(), app);
    }

    if app.show_help {
        draw_help_overlay(f, f.area());
    }
}

fn draw_header(f: &mut Frame, area: Rect, app: &AppState) {
    let (label, color) = match app.session_state {
        SessionState::Active => ("ON", Color::Green),
        SessionState::Starting => ("STARTING", Color::Yellow),
        SessionState::Stopping => ("STOPPING", Color::Yellow),
        SessionState::Disabled => ("OFF", Color::DarkGray),
    };

    let mut spans = vec![
        Span::styled(
            "NetLimit - Bandwidth Limiter  ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("[{}]", label),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
    ];
    if let Some(pid) = app.helper_pid {
        spans.push(Span::styled(
            format!("  helper pid {}", pid),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(header, area);
}

fn rate_ratio(rate: Rate) -> f64 {
    // Log scale so 512K and 1G are both visible on the same bar
    let min = f64::from(Rate::MIN_KBPS).ln();
    let max = f64::from(Rate::MAX_KBPS).ln();
    ((f64::from(rate.kbps()).ln() - min) / (max - min)).clamp(0.0, 1.0)
}

fn rate_gauge<'a>(title: &'a str, rate: Rate, selected: bool) -> Gauge<'a> {
    let style = if selected {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    };
    Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(title))
        .gauge_style(style)
        .ratio(rate_ratio(rate))
        .label(rate.to_string())
}

fn draw_limits(f: &mut Frame, area: Rect, app: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Download / single gauge
            Constraint::Length(3), // Upload gauge
            Constraint::Min(4),    // Details
        ])
        .split(area);

    if app.split_mode {
        let download_selected = app.selected_field == LimitField::Download;
        f.render_widget(rate_gauge("Download", app.download, download_selected), chunks[0]);
        f.render_widget(rate_gauge("Upload", app.upload, !download_selected), chunks[1]);
    } else {
        f.render_widget(rate_gauge("Limit (both directions)", app.download, true), chunks[0]);
    }

    let mut lines = vec![
        Line::from(vec![
            Span::styled("Mode:     ", Style::default().fg(Color::Gray)),
            Span::raw(if app.split_mode {
                "Split download/upload"
            } else {
                "Single limit"
            }),
        ]),
        Line::from(vec![
            Span::styled("Applied:  ", Style::default().fg(Color::Gray)),
            match app.active_limit {
                Some(limit) if app.session_state == SessionState::Active => {
                    Span::styled(limit.to_string(), Style::default().fg(Color::Green))
                }
                _ => Span::styled("none", Style::default().fg(Color::DarkGray)),
            },
        ]),
        Line::from(vec![
            Span::styled("Backend:  ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{} via {}", app.backend_name, app.elevator_name)),
        ]),
    ];

    if app.has_pending_changes() {
        lines.push(Line::from(Span::styled(
            "Edited limit differs from applied one; press Enter to apply",
            Style::default().fg(Color::Yellow),
        )));
    }

    if let Some(error) = &app.last_error {
        lines.push(Line::from(Span::styled(
            format!("Error: {}", error),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )));
    }

    let presets: Vec<Span> = PRESETS
        .iter()
        .enumerate()
        .flat_map(|(i, (label, _))| {
            [
                Span::styled(format!("[{}]", i + 1), Style::default().fg(Color::Yellow)),
                Span::raw(format!(" {}  ", label)),
            ]
        })
        .collect();
    lines.push(Line::from(""));
    lines.push(Line::from(presets));

    let details = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Session"));
    f.render_widget(details, chunks[2]);
}

fn draw_status_bar(f: &mut Frame, area: Rect, app: &AppState) {
    // Auto-generate status bar from centralized keybindings
    let mut spans = vec![];

    for (i, (key, description)) in crate::keybindings::get_status_bar_keybindings()
        .iter()
        .enumerate()
    {
        if i > 0 {
            spans.push(Span::raw(" "));
        }
        spans.push(Span::styled(
            format!("[{}]", key),
            Style::default().fg(Color::Yellow),
        ));
        spans.push(Span::raw(format!(" {} ", description)));
    }

    spans.push(Span::raw("| "));
    spans.push(Span::styled(
        &app.status_message,
        Style::default().fg(Color::Gray),
    ));

    let status = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(status, area);
}

fn draw_rate_entry(f: &mut Frame, area: Rect, app: &AppState) {
    let entry = app.rate_entry.as_deref().unwrap_or_default();
    let target = match (app.split_mode, app.selected_field) {
        (true, LimitField::Upload) => "Upload",
        (true, LimitField::Download) => "Download",
        _ => "Limit",
    };

    let text = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled(format!("{}: ", target), Style::default().fg(Color::White)),
            Span::styled(
                format!("{}_", entry),
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            "K/M/G suffix, bare numbers are Kbps  [Enter] Set  [Esc] Cancel",
            Style::default().fg(Color::DarkGray),
        )),
    ];

    let dialog = Paragraph::new(text)
        .style(Style::default().bg(Color::Black).fg(Color::White))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Enter Rate")
                .style(Style::default().fg(Color::Cyan)),
        );

    let dialog_area = centered_rect(50, 25, area);
    f.render_widget(Clear, dialog_area);
    f.render_widget(dialog, dialog_area);
}

fn draw_help_overlay(f: &mut Frame, area: Rect) {
    // Auto-generate help text from centralized keybindings
    let mut help_text = vec![
        Line::from(""),
        Line::from(Span::styled(
            "NetLimit - Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
    ];

    let mut category = None;
    for binding in crate::keybindings::get_all_keybindings() {
        if category != Some(binding.category) {
            category = Some(binding.category);
            help_text.push(Line::from(""));
            help_text.push(Line::from(Span::styled(
                binding.category.title(),
                Style::default().fg(Color::Cyan),
            )));
        }
        help_text.push(Line::from(format!(
            "  {:12} - {}",
            binding.key, binding.description
        )));
    }

    help_text.push(Line::from(""));
    help_text.push(Line::from("Press any key to close"));

    let help = Paragraph::new(help_text)
        .style(Style::default().bg(Color::Black).fg(Color::White))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Help")
                .style(Style::default().fg(Color::Cyan)),
        );

    let help_area = centered_rect(60, 70, area);
    f.render_widget(Clear, help_area);
    f.render_widget(help, help_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::{Terminal, backend::TestBackend};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn shift(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::SHIFT)
    }

    fn app(kbps: u64) -> AppState {
        AppState::new(ShapingLimit::Single(Rate::new(kbps).unwrap()))
    }

    #[test]
    fn test_step_adjust_is_clamped() {
        let mut app = app(150);
        app.handle_key(key(KeyCode::Left));
        assert_eq!(app.download.kbps(), 100);
        app.handle_key(key(KeyCode::Left));
        assert_eq!(app.download.kbps(), 100);

        app.set_selected(999_950);
        app.handle_key(key(KeyCode::Right));
        assert_eq!(app.download.kbps(), Rate::MAX_KBPS);
    }

    #[test]
    fn test_shift_adjusts_by_ten_percent() {
        let mut app = app(10_000);
        app.handle_key(shift(KeyCode::Right));
        assert_eq!(app.download.kbps(), 11_000);
        app.handle_key(shift(KeyCode::Left));
        assert_eq!(app.download.kbps(), 9_900);
    }

    #[test]
    fn test_presets_set_selected_field() {
        let mut app = app(1000);
        app.handle_key(key(KeyCode::Char('s')));
        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::Char('3')));

        assert_eq!(app.upload.kbps(), 10_000);
        assert_eq!(app.download.kbps(), 1000);
        assert_eq!(
            app.edited_limit(),
            ShapingLimit::from_kbps(1000, Some(10_000)).unwrap()
        );
    }

    #[test]
    fn test_field_switch_ignored_in_single_mode() {
        let mut app = app(1000);
        app.handle_key(key(KeyCode::Tab));
        assert_eq!(app.selected_field, LimitField::Download);
        app.handle_key(key(KeyCode::Char('6')));
        assert_eq!(app.edited_limit(), ShapingLimit::Single(Rate::new(1_000_000).unwrap()));
    }

    #[test]
    fn test_rate_entry_parses_and_clamps() {
        let mut app = app(1000);
        app.handle_key(key(KeyCode::Char('n')));
        for c in "2.5M".chars() {
            app.handle_key(key(KeyCode::Char(c)));
        }
        // Digits go to the entry, not the presets
        assert_eq!(app.download.kbps(), 1000);
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.download.kbps(), 2500);
        assert_eq!(app.rate_entry, None);

        app.handle_key(key(KeyCode::Char('n')));
        for c in "5G".chars() {
            app.handle_key(key(KeyCode::Char(c)));
        }
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.download.kbps(), Rate::MAX_KBPS);
    }

    #[test]
    fn test_rate_entry_cancel_keeps_value() {
        let mut app = app(1000);
        app.handle_key(key(KeyCode::Char('n')));
        app.handle_key(key(KeyCode::Char('9')));
        app.handle_key(key(KeyCode::Esc));
        assert_eq!(app.rate_entry, None);
        assert_eq!(app.download.kbps(), 1000);
    }

    #[test]
    fn test_toggle_and_apply_actions() {
        let mut app = app(1000);
        assert_eq!(
            app.handle_key(key(KeyCode::Char(' '))),
            UiAction::Toggle(ShapingLimit::Single(Rate::new(1000).unwrap()))
        );

        // Nothing to apply while off
        assert_eq!(app.handle_key(key(KeyCode::Enter)), UiAction::None);

        app.session_state = SessionState::Active;
        app.active_limit = Some(app.edited_limit());
        assert!(!app.has_pending_changes());
        app.handle_key(key(KeyCode::Right));
        assert!(app.has_pending_changes());
        assert_eq!(
            app.handle_key(key(KeyCode::Enter)),
            UiAction::Apply(ShapingLimit::Single(Rate::new(1100).unwrap()))
        );
    }

    #[test]
    fn test_quit_keys() {
        let mut app = app(1000);
        assert_eq!(app.handle_key(key(KeyCode::Char('q'))), UiAction::Quit);
        app.handle_key(key(KeyCode::Char('n')));
        assert_eq!(
            app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            UiAction::Quit
        );
    }

    #[test]
    fn test_draw_shows_state_and_error() {
        let mut app = app(10_000);
        app.last_error = Some("Authentication cancelled".to_string());
        app.show_help = false;

        let mut terminal = Terminal::new(TestBackend::new(100, 24)).unwrap();
        terminal.draw(|f| draw_ui(f, &app)).unwrap();

        let buffer = terminal.backend().buffer();
        let text: String = buffer.content().iter().map(|c| c.symbol()).collect();
        assert!(text.contains("[OFF]"));
        assert!(text.contains("10.0 Mbps"));
        assert!(text.contains("Authentication cancelled"));
    }
}
