use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    Frame, Terminal,
    backend::Backend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;
use crate::store::TodoStore;
use crate::view::{TodoView, WriteFailure};

const INPUT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Text,
    Date,
    List,
}

impl Focus {
    fn next(self) -> Self {
        match self {
            Focus::Text => Focus::Date,
            Focus::Date => Focus::List,
            Focus::List => Focus::Text,
        }
    }

    fn prev(self) -> Self {
        match self {
            Focus::Text => Focus::List,
            Focus::Date => Focus::Text,
            Focus::List => Focus::Date,
        }
    }
}

/// Presentation-only state; the todo data lives in the `TodoView`.
#[derive(Debug, Default)]
pub struct UiState {
    pub focus: Focus,
    pub selected: usize,
    pub status: Option<String>,
}

impl UiState {
    /// Keep the selection inside a list of `len` rows.
    pub fn clamp(&mut self, len: usize) {
        self.selected = self.selected.min(len.saturating_sub(1));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    Nothing,
    Quit,
    Add,
    Toggle(String),
    Delete(String),
    DeleteCompleted,
}

/// Map a key press to an action. Typing edits the pending fields in place.
pub fn handle_key<S: TodoStore + 'static>(
    ui: &mut UiState,
    view: &mut TodoView<S>,
    key: KeyEvent,
) -> UiAction {
    if key.code == KeyCode::Esc
        || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
    {
        return UiAction::Quit;
    }

    match key.code {
        KeyCode::Tab => {
            ui.focus = ui.focus.next();
            return UiAction::Nothing;
        }
        KeyCode::BackTab => {
            ui.focus = ui.focus.prev();
            return UiAction::Nothing;
        }
        _ => {}
    }

    match ui.focus {
        Focus::Text | Focus::Date => {
            let field = if ui.focus == Focus::Text {
                view.pending_text_mut()
            } else {
                view.pending_date_mut()
            };
            match key.code {
                KeyCode::Char(c) => {
                    field.push(c);
                    UiAction::Nothing
                }
                KeyCode::Backspace => {
                    field.pop();
                    UiAction::Nothing
                }
                KeyCode::Enter => UiAction::Add,
                _ => UiAction::Nothing,
            }
        }
        Focus::List => {
            let len = view.tasks().len();
            let selected_id = view.tasks().get(ui.selected).map(|t| t.id.clone());
            match key.code {
                KeyCode::Char('q') => UiAction::Quit,
                KeyCode::Up | KeyCode::Char('k') => {
                    ui.selected = ui.selected.saturating_sub(1);
                    UiAction::Nothing
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    if ui.selected + 1 < len {
                        ui.selected += 1;
                    }
                    UiAction::Nothing
                }
                KeyCode::Enter | KeyCode::Char(' ') => {
                    selected_id.map_or(UiAction::Nothing, UiAction::Toggle)
                }
                KeyCode::Char('d') | KeyCode::Delete => {
                    selected_id.map_or(UiAction::Nothing, UiAction::Delete)
                }
                KeyCode::Char('D') if view.shows_delete_completed() => UiAction::DeleteCompleted,
                _ => UiAction::Nothing,
            }
        }
    }
}

/// Send the write an action asks for. Writes are not awaited; failures come
/// back on the view's failure channel.
pub fn dispatch<S: TodoStore + 'static>(view: &mut TodoView<S>, action: &UiAction) {
    match action {
        UiAction::Add => {
            view.add();
        }
        UiAction::Toggle(id) => {
            view.toggle(id);
        }
        UiAction::Delete(id) => {
            view.delete(id);
        }
        UiAction::DeleteCompleted => {
            view.delete_completed();
        }
        UiAction::Nothing | UiAction::Quit => {}
    }
}

fn input<'a>(title: &'a str, value: &'a str, focused: bool) -> Paragraph<'a> {
    Paragraph::new(value).block(
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(if focused {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default()
            }),
    )
}

pub fn draw<S: TodoStore + 'static>(f: &mut Frame, view: &TodoView<S>, ui: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(f.area());

    let title = Paragraph::new(Line::from(Span::styled(
        "Todo App",
        Style::default().add_modifier(Modifier::BOLD),
    )));
    f.render_widget(title, chunks[0]);

    let state = view.state();
    f.render_widget(
        input("Add New Todo", &state.pending_text, ui.focus == Focus::Text),
        chunks[1],
    );
    f.render_widget(
        input("Date", &state.pending_date, ui.focus == Focus::Date),
        chunks[2],
    );

    let items: Vec<ListItem> = view
        .tasks()
        .iter()
        .map(|t| {
            let text_style = if t.completed {
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::CROSSED_OUT)
            } else {
                Style::default().fg(Color::White)
            };
            let mut spans = vec![Span::styled(t.text.as_str(), text_style)];
            if !t.date.is_empty() {
                spans.push(Span::styled(
                    format!(" ({})", t.date),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .title("Todos")
                .borders(Borders::ALL)
                .border_style(if ui.focus == Focus::List {
                    Style::default().fg(Color::Cyan)
                } else {
                    Style::default()
                }),
        )
        .highlight_style(Style::default().add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");
    let mut list_state = ListState::default();
    if ui.focus == Focus::List && !view.tasks().is_empty() {
        list_state.select(Some(ui.selected));
    }
    f.render_stateful_widget(list, chunks[3], &mut list_state);

    let mut footer = vec![Span::raw(
        "Tab focus  Enter add/toggle  d delete  q quit",
    )];
    if view.shows_delete_completed() {
        footer.push(Span::styled(
            "  [D] Delete Completed Tasks",
            Style::default().fg(Color::Magenta),
        ));
    }
    f.render_widget(Paragraph::new(Line::from(footer)), chunks[4]);

    let status = match view.state().sync_error {
        Some(ref error) => Some(format!("sync failed: {error}")),
        None => ui.status.clone(),
    };
    if let Some(status) = status {
        f.render_widget(
            Paragraph::new(Span::styled(status, Style::default().fg(Color::Red))),
            chunks[5],
        );
    }
}

/// Drive the interactive list until the user quits. The view must already
/// be active.
pub fn run_app<B: Backend, S: TodoStore + 'static>(
    terminal: &mut Terminal<B>,
    view: &mut TodoView<S>,
    failures: &mut mpsc::UnboundedReceiver<WriteFailure>,
) -> Result<()> {
    let mut ui = UiState::default();
    loop {
        view.poll_snapshot();
        while let Ok(failure) = failures.try_recv() {
            ui.status = Some(failure.to_string());
        }
        ui.clamp(view.tasks().len());

        terminal.draw(|f| draw(f, view, &ui))?;

        if !event::poll(INPUT_POLL)? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let action = handle_key(&mut ui, view, key);
            debug!(?action, "key handled");
            if action == UiAction::Quit {
                return Ok(());
            }
            dispatch(view, &action);
        }
    }
}
