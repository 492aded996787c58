//! TUI and interactive components
//!
//! Features:
//! - Sidebar with level / subject / mode / model choices and model hints
//! - Chat pane with streamed answers (cursor while generating)
//! - Fuzzy model picker
//! - Log tab

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Tabs, Wrap},
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::client::{ClientError, GenerationStats, InferenceBackend, StreamEvent};
use crate::models::{model_hint, ModelCatalog, ModelHint};
use crate::prompt::Choice;
use crate::responder::Turn;
use crate::session::{Role, Session};

// ═══════════════════════════════════════════════════════════════
// MODEL PICKER
// ═══════════════════════════════════════════════════════════════

/// Pick a model with fuzzy search; `None` if cancelled
fn run_picker(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    models: &[String],
    current: Option<&str>,
) -> Result<Option<String>> {
    let matcher = SkimMatcherV2::default();
    let mut filter = String::new();
    let mut list_state = ListState::default();
    list_state.select(Some(
        current
            .and_then(|c| models.iter().position(|m| m == c))
            .unwrap_or(0),
    ));

    loop {
        // Filter models
        let filtered = filter_models(&matcher, models, &filter);

        // Clamp selection
        if let Some(selected) = list_state.selected() {
            if selected >= filtered.len() {
                list_state.select(Some(filtered.len().saturating_sub(1)));
            }
        }

        // Render
        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(3),
                    Constraint::Min(5),
                    Constraint::Length(1),
                ])
                .split(f.size());

            let input = Paragraph::new(filter.as_str())
                .block(Block::default().borders(Borders::ALL).title("Search models"));
            f.render_widget(input, chunks[0]);

            let items: Vec<ListItem> = filtered
                .iter()
                .map(|m| {
                    let mark = if Some(m.as_str()) == current { " (current)" } else { "" };
                    ListItem::new(format!("{}{}", m, mark))
                })
                .collect();

            let list = List::new(items)
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .title(format!("Models ({}/{})", filtered.len(), models.len())),
                )
                .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
                .highlight_symbol("> ");
            f.render_stateful_widget(list, chunks[1], &mut list_state);

            let help = Paragraph::new("Enter: select | Esc: cancel | Type to filter")
                .style(Style::default().fg(Color::DarkGray));
            f.render_widget(help, chunks[2]);
        })?;

        // Handle input
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                match key.code {
                    KeyCode::Esc => return Ok(None),
                    KeyCode::Enter => {
                        if let Some(model) = list_state.selected().and_then(|i| filtered.get(i)) {
                            return Ok(Some((*model).clone()));
                        }
                    }
                    KeyCode::Up => {
                        let i = list_state.selected().unwrap_or(0);
                        list_state.select(Some(i.saturating_sub(1)));
                    }
                    KeyCode::Down => {
                        let i = list_state.selected().unwrap_or(0);
                        list_state.select(Some((i + 1).min(filtered.len().saturating_sub(1))));
                    }
                    KeyCode::Char(c) => {
                        filter.push(c);
                        list_state.select(Some(0));
                    }
                    KeyCode::Backspace => {
                        filter.pop();
                        list_state.select(Some(0));
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Fuzzy filter, best match first; empty filter keeps catalog order
fn filter_models<'a>(matcher: &SkimMatcherV2, models: &'a [String], filter: &str) -> Vec<&'a String> {
    if filter.is_empty() {
        return models.iter().collect();
    }
    let mut scored: Vec<_> = models
        .iter()
        .filter_map(|m| matcher.fuzzy_match(m, filter).map(|score| (m, score)))
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().map(|(m, _)| m).collect()
}

// ═══════════════════════════════════════════════════════════════
// MAIN TUI
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Chat,
    Log,
}

impl Tab {
    fn all() -> &'static [Tab] {
        &[Tab::Chat, Tab::Log]
    }

    fn name(&self) -> &'static str {
        match self {
            Tab::Chat => "Chat",
            Tab::Log => "Log",
        }
    }
}

/// Main TUI state
struct TuiState {
    tab: Tab,
    input: String,
    session: Session,
    turn: Option<Turn>,
    models: Vec<String>,
    models_error: Option<String>,
    preferred_model: Option<String>,
    notice: Option<String>,
    log: Vec<String>,
    tick: usize,
    scroll_back: u16,
    last_stats: Option<GenerationStats>,
}

impl TuiState {
    fn new(session: Session, preferred_model: Option<String>) -> Self {
        Self {
            tab: Tab::Chat,
            input: String::new(),
            session,
            turn: None,
            models: Vec::new(),
            models_error: None,
            preferred_model,
            notice: None,
            log: Vec::new(),
            tick: 0,
            scroll_back: 0,
            last_stats: None,
        }
    }

    fn log(&mut self, msg: impl Into<String>) {
        let now = chrono::Local::now().format("%H:%M:%S");
        self.log.push(format!("[{}] {}", now, msg.into()));
    }

    fn is_generating(&self) -> bool {
        self.turn.as_ref().is_some_and(|t| t.state().is_active())
    }

    /// Install a fresh model list, keeping the current choice when possible
    fn set_models(&mut self, models: Vec<String>, error: Option<String>) {
        let selection = &mut self.session.selection;
        let keep = selection.model.as_ref().filter(|m| models.contains(m)).cloned();
        let preferred = self.preferred_model.as_ref().filter(|m| models.contains(m)).cloned();
        selection.model = keep.or(preferred).or_else(|| models.first().cloned());

        match &error {
            Some(e) => self.log(format!("Model list unavailable: {}", e)),
            None => self.log(format!("{} models installed", models.len())),
        }
        self.models = models;
        self.models_error = error;
    }

    fn hint(&self) -> Option<ModelHint> {
        model_hint(
            self.session.selection.model.as_deref(),
            &self.models,
            self.models_error.is_some(),
        )
    }

    /// Start a turn; returns (model, prompt) to send
    fn submit_input(&mut self) -> Option<(String, String)> {
        if self.is_generating() || self.input.trim().is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.input);
        match self.session.submit(&text) {
            Ok((model, prompt)) => {
                let mut turn = Turn::new();
                if let Err(e) = turn.begin() {
                    // The question is already recorded; answer it
                    self.session.complete(&format!("❌ Error: {}", e));
                    self.log(format!("Turn error: {}", e));
                    return None;
                }
                self.turn = Some(turn);
                self.notice = None;
                self.last_stats = None;
                self.scroll_back = 0;
                self.log(format!("Asking {}: {}", model, text.chars().take(50).collect::<String>()));
                Some((model, prompt))
            }
            Err(e) => {
                self.input = text;
                self.notice = Some(e.to_string());
                self.log(e.to_string());
                None
            }
        }
    }

    /// Apply one stream event to the open turn
    fn apply_event(&mut self, ev: StreamEvent) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        let committed = match ev {
            StreamEvent::Fragment(f) => {
                if let Err(e) = turn.push_fragment(&f) {
                    tracing::warn!(error = %e, "fragment after turn ended");
                }
                None
            }
            StreamEvent::Done(stats) => turn.finish().ok().map(|text| (text, Some(stats))),
            StreamEvent::Error(e) => turn.fail(&e).ok().map(|text| (text, None)),
        };

        if let Some((text, stats)) = committed {
            self.session.complete(&text);
            self.turn = None;
            match &stats {
                Some(stats) => self.log(format!(
                    "Completed: {} + {} tokens in {:.1}s",
                    stats.prompt_tokens,
                    stats.completion_tokens,
                    stats.total_duration.as_secs_f64()
                )),
                None => self.log(text),
            }
            self.last_stats = stats;
        }
    }

    fn chat_lines(&self) -> Vec<Line<'static>> {
        let mut lines: Vec<Line<'static>> = Vec::new();

        if self.session.transcript().is_empty() && self.turn.is_none() {
            lines.push(Line::styled(
                "Welcome to Study Buddy. Pick your preferences on the left and ask away.",
                Style::default().fg(Color::DarkGray),
            ));
        }

        for msg in self.session.transcript().messages() {
            push_message(&mut lines, msg.role(), msg.content());
            lines.push(Line::default());
        }

        if let Some(turn) = &self.turn {
            push_message(&mut lines, Role::Assistant, &turn.display_text());
        } else if let Some(stats) = &self.last_stats {
            lines.push(Line::styled(
                format!(
                    "[{} + {} tokens, {:.1}s]",
                    stats.prompt_tokens,
                    stats.completion_tokens,
                    stats.total_duration.as_secs_f64()
                ),
                Style::default().fg(Color::DarkGray),
            ));
        }

        lines
    }
}

fn push_message(lines: &mut Vec<Line<'static>>, role: Role, content: &str) {
    let (label, color) = match role {
        Role::User => ("You", Color::Cyan),
        Role::Assistant => ("Tutor", Color::Magenta),
    };
    lines.push(Line::styled(
        format!("{}:", label),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    ));
    for text in content.lines() {
        lines.push(Line::raw(format!("  {}", text)));
    }
}

/// Rough wrapped height in display columns, used to keep the newest text in view
fn wrapped_height(lines: &[Line], width: u16) -> u16 {
    let width = width.max(1) as usize;
    lines
        .iter()
        .map(|l| l.width().max(1).div_ceil(width))
        .sum::<usize>()
        .min(u16::MAX as usize) as u16
}

/// Run the main TUI
pub async fn run_tui(
    backend: Arc<dyn InferenceBackend>,
    catalog: &mut ModelCatalog,
    session: Session,
    preferred_model: Option<String>,
) -> Result<()> {
    let mut terminal = setup_terminal()?;
    let result = run_tui_loop(&mut terminal, backend, catalog, session, preferred_model).await;
    restore_terminal(terminal)?;
    result
}

async fn refresh_models(state: &mut TuiState, catalog: &mut ModelCatalog) {
    let models = catalog.list_models().await;
    let error = catalog.last_error().map(str::to_string);
    state.set_models(models, error);
}

async fn run_tui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    backend: Arc<dyn InferenceBackend>,
    catalog: &mut ModelCatalog,
    session: Session,
    preferred_model: Option<String>,
) -> Result<()> {
    let mut state = TuiState::new(session, preferred_model);
    state.log(format!("Session {}", state.session.id()));
    refresh_models(&mut state, catalog).await;

    let (tx, mut rx) = mpsc::channel::<StreamEvent>(256);

    loop {
        state.tick += 1;

        // Drain generation events
        while let Ok(ev) = rx.try_recv() {
            state.apply_event(ev);
        }

        // Render
        terminal.draw(|f| render_tui(f, &state))?;

        // Handle input
        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key.code {
            KeyCode::Esc => break,
            KeyCode::Tab => {
                let tabs = Tab::all();
                let idx = tabs.iter().position(|t| *t == state.tab).unwrap_or(0);
                state.tab = tabs[(idx + 1) % tabs.len()];
            }
            // Sidebar choices
            KeyCode::F(2) => {
                let s = &mut state.session.selection;
                s.level = s.level.next();
            }
            KeyCode::F(3) => {
                let s = &mut state.session.selection;
                s.subject = s.subject.next();
            }
            KeyCode::F(4) => {
                let s = &mut state.session.selection;
                s.mode = s.mode.next();
            }
            // Model list
            KeyCode::F(5) => {
                refresh_models(&mut state, catalog).await;
                if !state.models.is_empty() {
                    let current = state.session.selection.model.clone();
                    if let Some(model) = run_picker(terminal, &state.models, current.as_deref())? {
                        state.log(format!("Model: {}", model));
                        state.session.selection.model = Some(model);
                    }
                }
            }
            KeyCode::F(6) => {
                // Force a fresh listing
                catalog.invalidate();
                refresh_models(&mut state, catalog).await;
            }
            KeyCode::PageUp => state.scroll_back = state.scroll_back.saturating_add(5),
            KeyCode::PageDown => state.scroll_back = state.scroll_back.saturating_sub(5),
            KeyCode::Enter if state.tab == Tab::Chat => {
                if let Some((model, prompt)) = state.submit_input() {
                    spawn_generation(Arc::clone(&backend), model, prompt, tx.clone());
                }
            }
            KeyCode::Char(c) if state.tab == Tab::Chat && !state.is_generating() => {
                state.input.push(c);
            }
            KeyCode::Backspace if state.tab == Tab::Chat && !state.is_generating() => {
                state.input.pop();
            }
            _ => {}
        }
    }

    Ok(())
}

/// Forward one generation's events into the UI channel.
///
/// Always ends with exactly one `Done` or `Error`.
fn spawn_generation(
    backend: Arc<dyn InferenceBackend>,
    model: String,
    prompt: String,
    tx: mpsc::Sender<StreamEvent>,
) {
    tokio::spawn(async move {
        let mut rx = match backend.generate(&model, &prompt).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "generation request failed");
                let _ = tx.send(StreamEvent::Error(e)).await;
                return;
            }
        };

        while let Some(ev) = rx.recv().await {
            let terminal = matches!(ev, StreamEvent::Done(_) | StreamEvent::Error(_));
            if tx.send(ev).await.is_err() || terminal {
                return;
            }
        }

        let _ = tx
            .send(StreamEvent::Error(ClientError::Stream(
                "stream ended without completion".into(),
            )))
            .await;
    });
}

fn render_tui(f: &mut Frame, state: &TuiState) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(34), Constraint::Min(30)])
        .split(f.size());

    render_sidebar(f, state, columns[0]);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header + tabs
            Constraint::Min(5),    // Main content
            Constraint::Length(3), // Input
            Constraint::Length(1), // Status
        ])
        .split(columns[1]);

    let tabs = Tabs::new(Tab::all().iter().map(|t| t.name()).collect::<Vec<_>>())
        .select(Tab::all().iter().position(|t| *t == state.tab).unwrap_or(0))
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL).title("Local AI Study Buddy"));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        Tab::Chat => render_chat(f, state, chunks[1]),
        Tab::Log => render_log(f, state, chunks[1]),
    }

    let generating = state.is_generating();
    let input_style = if generating {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default()
    };
    let input_title = if generating {
        "Generating...".to_string()
    } else {
        state.session.selection.input_placeholder()
    };
    let input = Paragraph::new(state.input.as_str())
        .style(input_style)
        .block(Block::default().borders(Borders::ALL).title(input_title));
    f.render_widget(input, chunks[2]);

    let (status, status_style) = match &state.notice {
        Some(notice) => (format!(" {}", notice), Style::default().fg(Color::Red)),
        None => (
            format!(
                " {} | F2 level F3 subject F4 mode F5 model F6 refresh | Tab:switch Esc:quit",
                if generating { spinner_char(state.tick) } else { ' ' },
            ),
            Style::default().fg(Color::DarkGray),
        ),
    };
    f.render_widget(Paragraph::new(status).style(status_style), chunks[3]);
}

fn render_sidebar(f: &mut Frame, state: &TuiState, area: Rect) {
    let selection = &state.session.selection;
    let heading = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);

    let mut lines = vec![
        Line::styled("Learning Preferences", heading),
        Line::default(),
        Line::raw(format!("[F2] Level:   {}", selection.level)),
        Line::raw(format!("[F3] Subject: {}", selection.subject)),
        Line::raw(format!("[F4] Mode:    {}", selection.mode)),
        Line::raw(format!(
            "[F5] Model:   {}",
            selection.model.as_deref().unwrap_or("(none)")
        )),
        Line::default(),
    ];

    if let Some(hint) = state.hint() {
        let style = match hint {
            ModelHint::Recommended(_) => Style::default().fg(Color::Green),
            ModelHint::Suggest(_) => Style::default().fg(Color::Cyan),
            ModelHint::NoneInstalled { .. } => Style::default().fg(Color::Red),
        };
        lines.extend(hint.lines().into_iter().map(|l| Line::styled(l, style)));
        lines.push(Line::default());
    }

    lines.push(Line::styled(
        "100% Private - No data leaves your device.",
        Style::default().fg(Color::DarkGray),
    ));

    let para = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Settings"));
    f.render_widget(para, area);
}

fn render_chat(f: &mut Frame, state: &TuiState, area: Rect) {
    let lines = state.chat_lines();
    let inner_height = area.height.saturating_sub(2);
    let total = wrapped_height(&lines, area.width.saturating_sub(2));
    let bottom = total.saturating_sub(inner_height);
    let offset = bottom.saturating_sub(state.scroll_back);

    let para = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .scroll((offset, 0))
        .block(Block::default().borders(Borders::ALL).title("Chat"));
    f.render_widget(para, area);
}

fn render_log(f: &mut Frame, state: &TuiState, area: Rect) {
    let text: String = state.log.iter().rev().take(50).cloned().collect::<Vec<_>>().join("\n");
    let para = Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Log"));
    f.render_widget(para, area);
}

fn spinner_char(tick: usize) -> char {
    const SPINNER: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
    SPINNER[tick % SPINNER.len()]
}

// ═══════════════════════════════════════════════════════════════
// TERMINAL SETUP
// ═══════════════════════════════════════════════════════════════

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
