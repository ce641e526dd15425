use crate::catalog;
use crate::controller::Controller;
use crate::models::{Message, MessageBody, Position};
use crate::photo;
use chrono::{DateTime, Local, Utc};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, Paragraph, Wrap},
};
use tui_textarea::TextArea;

/// Desk pixels per terminal column.
pub const PX_PER_COL: f64 = 8.0;
/// Desk pixels per terminal row.
pub const PX_PER_ROW: f64 = 16.0;
/// How long a fresh print takes to slide out of the slot.
pub const FEED_DURATION_MS: i64 = 1800;

const NOTE_WIDTH: u16 = 28;
const MAX_NOTE_ROWS: usize = 10;
const PHOTO_WIDTH: u16 = 24;
const PHOTO_ROWS: u16 = 5;
const DEVICE_WIDTH: u16 = 56;
const DEVICE_HEIGHT: u16 = 12;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum UIMode {
    Browsing,
    Composing,
    ImagePath,
    Moving,
    ConfirmDelete,
}

/// A card picked up with the keyboard, offset in cells from where it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragState {
    pub id: String,
    pub cols: i32,
    pub rows: i32,
}

impl DragState {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            cols: 0,
            rows: 0,
        }
    }

    pub fn nudge(&mut self, cols: i32, rows: i32) {
        self.cols += cols;
        self.rows += rows;
    }

    /// Drag distance in desk pixels.
    pub fn offset_px(&self) -> (f64, f64) {
        (self.cols as f64 * PX_PER_COL, self.rows as f64 * PX_PER_ROW)
    }
}

/// Which input a print in flight came from, so it can be cleared on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintSource {
    Note,
    Photo,
}

pub struct UIState<'a> {
    pub mode: UIMode,
    pub compose: TextArea<'a>,
    pub image_path: TextArea<'a>,
    pub draft_reminder: bool,
    pub selected: Option<String>,
    pub drag: Option<DragState>,
    pub pending_print: Option<PrintSource>,
    pub status_message: Option<String>,
}

fn new_textarea<'a>(placeholder: &str) -> TextArea<'a> {
    let mut textarea = TextArea::default();
    textarea.set_cursor_line_style(Style::default());
    textarea.set_placeholder_text(placeholder);
    textarea
}

impl<'a> Default for UIState<'a> {
    fn default() -> Self {
        Self {
            mode: UIMode::Browsing,
            compose: new_textarea("Type a message..."),
            image_path: new_textarea("/path/to/photo.png"),
            draft_reminder: false,
            selected: None,
            drag: None,
            pending_print: None,
            status_message: None,
        }
    }
}

impl<'a> UIState<'a> {
    pub fn compose_text(&self) -> String {
        self.compose.lines().join("\n")
    }

    pub fn image_path_text(&self) -> String {
        self.image_path.lines().join("\n").trim().to_string()
    }

    /// Clears the device after a successful print.
    pub fn reset_compose(&mut self) {
        self.compose = new_textarea("Type a message...");
        self.draft_reminder = false;
    }

    pub fn reset_image_path(&mut self) {
        self.image_path = new_textarea("/path/to/photo.png");
    }

    pub fn select_next(&mut self, messages: &[Message]) -> Option<String> {
        self.step_selection(messages, 1)
    }

    pub fn select_prev(&mut self, messages: &[Message]) -> Option<String> {
        self.step_selection(messages, messages.len().saturating_sub(1))
    }

    fn step_selection(&mut self, messages: &[Message], step: usize) -> Option<String> {
        if messages.is_empty() {
            self.selected = None;
            return None;
        }
        let current = self
            .selected
            .as_deref()
            .and_then(|id| messages.iter().position(|m| m.id == id));
        let next = match current {
            Some(idx) => (idx + step) % messages.len(),
            None => 0,
        };
        self.selected = Some(messages[next].id.clone());
        self.selected.clone()
    }

    /// Drops a selection whose card no longer exists.
    pub fn prune_selection(&mut self, messages: &[Message]) {
        if let Some(id) = &self.selected {
            if !messages.iter().any(|m| &m.id == id) {
                self.selected = None;
            }
        }
    }
}

pub fn render(f: &mut Frame, state: &mut UIState<'_>, controller: &Controller) {
    let settings = controller.settings();
    let theme = catalog::theme(&settings.theme_id);
    let now = Utc::now();

    let screen = f.area();
    f.render_widget(
        Block::default().style(Style::default().bg(theme.bg).fg(theme.fg)),
        screen,
    );

    let banner_height = if controller.error().is_some() { 1 } else { 0 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(banner_height),
            Constraint::Length(1),
        ])
        .split(screen);
    let desk = chunks[0];
    let anchor = desk_anchor(desk);

    render_device(f, state, controller, desk, anchor);

    let messages = controller.messages();
    // Oldest first so that, among equal stacking indices, newer cards land on top.
    let mut cards: Vec<&Message> = messages.iter().rev().collect();
    cards.sort_by_key(|m| match &state.drag {
        Some(drag) if drag.id == m.id => u32::MAX,
        _ => controller.stacking_index(&m.id),
    });
    for message in cards {
        render_card(f, state, message, desk, anchor, now);
    }

    if let Some(error) = controller.error() {
        let banner = Paragraph::new(format!(" ⚠ {}  [x] dismiss ", error))
            .style(
                Style::default()
                    .bg(Color::Red)
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )
            .alignment(Alignment::Center);
        f.render_widget(banner, chunks[1]);
    }

    render_status_bar(f, state, controller, chunks[2]);

    match state.mode {
        UIMode::ImagePath => render_image_prompt(f, state),
        UIMode::ConfirmDelete => render_confirm_delete(f, state, controller),
        _ => {}
    }
}

/// Origin that card positions are measured from. Sits left of centre so the
/// print slot on the right has room.
fn desk_anchor(desk: Rect) -> (i32, i32) {
    (
        desk.x as i32 + (desk.width as i32 * 2) / 5,
        desk.y as i32 + desk.height as i32 / 2,
    )
}

/// Screen rectangle for a card whose top-left corner sits at `position`
/// relative to `anchor`, clipped to `area`. `None` when fully off screen.
pub fn card_rect(
    area: Rect,
    anchor: (i32, i32),
    position: Position,
    width: u16,
    height: u16,
) -> Option<Rect> {
    // Float-to-int casts saturate, so wild coordinates stay finite; i64 leaves
    // room for the anchor and size on top of them.
    let x = (anchor.0 as i64).saturating_add((position.x / PX_PER_COL).round() as i64);
    let y = (anchor.1 as i64).saturating_add((position.y / PX_PER_ROW).round() as i64);

    let left = x.max(area.x as i64);
    let top = y.max(area.y as i64);
    let right = x.saturating_add(width as i64).min(area.right() as i64);
    let bottom = y.saturating_add(height as i64).min(area.bottom() as i64);
    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect::new(
        left as u16,
        top as u16,
        (right - left) as u16,
        (bottom - top) as u16,
    ))
}

/// Fraction of the card already out of the slot. Cards from the future
/// (clock skew) count as fully printed.
pub fn feed_progress(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age = (now - created_at).num_milliseconds();
    if !(0..FEED_DURATION_MS).contains(&age) {
        return 1.0;
    }
    age as f64 / FEED_DURATION_MS as f64
}

fn fed_width(full: u16, progress: f64) -> u16 {
    let min = full.min(4);
    ((full as f64 * progress).ceil() as u16).clamp(min, full)
}

fn wrapped_rows(text: &str, width: usize) -> usize {
    let width = width.max(1);
    text.lines()
        .map(|line| Line::from(line).width().div_ceil(width).max(1))
        .sum::<usize>()
        .clamp(1, MAX_NOTE_ROWS)
}

fn card_size(message: &Message) -> (u16, u16) {
    match &message.body {
        MessageBody::Text { content, .. } => {
            let rows = wrapped_rows(content, NOTE_WIDTH as usize - 2);
            (NOTE_WIDTH, rows as u16 + 2)
        }
        MessageBody::Image { .. } => (PHOTO_WIDTH, PHOTO_ROWS + 4),
    }
}

fn markers(message: &Message) -> String {
    let mut out = String::new();
    if message.is_pinned {
        out.push_str(" ◆");
    }
    if message.has_reminder {
        out.push_str(" ⏰");
    }
    if !out.is_empty() {
        out.push(' ');
    }
    out
}

fn render_card(
    f: &mut Frame,
    state: &UIState<'_>,
    message: &Message,
    desk: Rect,
    anchor: (i32, i32),
    now: DateTime<Utc>,
) {
    let mut position = message.position.unwrap_or_default();
    let dragging = matches!(&state.drag, Some(drag) if drag.id == message.id);
    if let Some(drag) = state.drag.as_ref().filter(|_| dragging) {
        let (dx, dy) = drag.offset_px();
        position = position.offset_by(dx, dy);
    }

    let (full_width, height) = card_size(message);
    let width = fed_width(full_width, feed_progress(message.created_at, now));
    let Some(rect) = card_rect(desk, anchor, position, width, height) else {
        return;
    };

    let selected = state.selected.as_deref() == Some(message.id.as_str());
    let highlight = if dragging {
        Some(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    } else if selected {
        Some(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    } else {
        None
    };

    let time = message
        .created_at
        .with_timezone(&Local)
        .format("%H:%M")
        .to_string();
    let footer = Line::from(format!(" #{} ", message.short_id())).right_aligned();

    f.render_widget(Clear, rect);
    match &message.body {
        MessageBody::Text {
            content,
            note_color_id,
        } => {
            let paper = catalog::note_color(note_color_id);
            let mut block = Block::default()
                .borders(Borders::ALL)
                .style(Style::default().bg(paper.bg).fg(paper.fg))
                .title(Line::from(" MESSAGE ").left_aligned())
                .title(Line::from(format!("{}{} ", markers(message), time)).right_aligned())
                .title_bottom(footer);
            if let Some(style) = highlight {
                block = block.border_style(style);
            }
            let body = Paragraph::new(content.as_str())
                .block(block)
                .wrap(Wrap { trim: false });
            f.render_widget(body, rect);
        }
        MessageBody::Image {
            image_url,
            caption,
            style_id,
        } => {
            let frame = catalog::polaroid_style(style_id);
            let mut block = Block::default()
                .borders(Borders::ALL)
                .border_type(frame.border)
                .style(Style::default().bg(frame.frame).fg(Color::Black))
                .title(Line::from(format!("{}{} ", markers(message), time)).right_aligned())
                .title_bottom(footer);
            if let Some(style) = highlight {
                block = block.border_style(style);
            }
            let inner = block.inner(rect);
            f.render_widget(block, rect);

            let rows = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(PHOTO_ROWS),
                    Constraint::Length(1),
                    Constraint::Length(1),
                ])
                .split(inner);

            let picture = vec![Line::from("░".repeat(inner.width as usize)); PHOTO_ROWS as usize];
            f.render_widget(
                Paragraph::new(picture).style(Style::default().fg(Color::Gray).bg(Color::DarkGray)),
                rows[0],
            );
            f.render_widget(
                Paragraph::new(caption.as_deref().unwrap_or("Photo"))
                    .alignment(Alignment::Center)
                    .style(Style::default().add_modifier(Modifier::ITALIC)),
                rows[1],
            );
            f.render_widget(
                Paragraph::new(photo::describe(image_url))
                    .alignment(Alignment::Center)
                    .style(Style::default().fg(Color::DarkGray)),
                rows[2],
            );
        }
    }
}

fn render_device(
    f: &mut Frame,
    state: &mut UIState<'_>,
    controller: &Controller,
    desk: Rect,
    anchor: (i32, i32),
) {
    let skin = catalog::printer_style(&controller.settings().printer_style);
    let origin = Position::new(
        -(DEVICE_WIDTH as f64 / 2.0) * PX_PER_COL,
        -(DEVICE_HEIGHT as f64 / 2.0) * PX_PER_ROW,
    );
    let Some(area) = card_rect(desk, anchor, origin, DEVICE_WIDTH, DEVICE_HEIGHT) else {
        return;
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Thick)
        .style(Style::default().bg(skin.bg).fg(skin.fg))
        .title(Line::from(" RETRO-PRINT 9000 ").centered())
        .title_bottom(Line::from(format!(" {} ", skin.display_name())).right_aligned());
    let inner = block.inner(area);
    f.render_widget(Clear, area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // LED + clock
            Constraint::Min(3),    // Input
            Constraint::Length(1), // Reminder flag
            Constraint::Length(1), // Paper slot
        ])
        .split(inner);

    let led = if controller.is_printing() {
        Span::styled(
            "● PRINTING",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled("● READY", Style::default().fg(Color::Green))
    };
    let clock = Local::now().format("%H:%M:%S").to_string();
    let header = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(clock.len() as u16)])
        .split(rows[0]);
    f.render_widget(Paragraph::new(Line::from(led)), header[0]);
    f.render_widget(Paragraph::new(clock), header[1]);

    let composing = state.mode == UIMode::Composing;
    let input_style = if composing {
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(skin.fg)
    };
    let input_title = if composing {
        " Enter print · Alt-Enter newline · Esc done "
    } else {
        " [n] write · [i] photo "
    };
    state.compose.set_block(
        Block::default()
            .borders(Borders::ALL)
            .title(input_title)
            .border_style(input_style),
    );
    f.render_widget(&state.compose, rows[1]);

    let reminder = if state.draft_reminder {
        Span::styled(
            "⏰ REMIND ON",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )
    } else {
        Span::raw("⏰ remind off")
    };
    f.render_widget(
        Paragraph::new(Line::from(vec![reminder, Span::raw("  (ctrl-r)")])),
        rows[2],
    );
    f.render_widget(
        Paragraph::new("▔".repeat(rows[3].width.saturating_sub(2) as usize))
            .alignment(Alignment::Right),
        rows[3],
    );

    if composing {
        let (row, col) = state.compose.cursor();
        f.set_cursor_position((rows[1].x + 1 + col as u16, rows[1].y + 1 + row as u16));
    }
}

fn render_status_bar(f: &mut Frame, state: &UIState<'_>, controller: &Controller, area: Rect) {
    let settings = controller.settings();
    let left = match &state.status_message {
        Some(status) => format!(" {} ", status),
        None => format!(
            " SYSTEM: {} | {} | THEME: {} | CARDS: {} ",
            match controller.pending() {
                0 => "ONLINE".to_string(),
                n => format!("SYNCING {}", n),
            },
            controller.backend_name(),
            catalog::theme(&settings.theme_id).display_name(),
            controller.message_count(),
        ),
    };
    let hint = match state.mode {
        UIMode::Browsing => {
            "tab select · m move · p pin · r remind · c color · d shred · t/s/C style · q quit "
        }
        UIMode::Composing => "enter print · alt-enter newline · ctrl-r remind · esc done ",
        UIMode::ImagePath => "enter print photo · esc cancel ",
        UIMode::Moving => "arrows move · enter drop · esc cancel ",
        UIMode::ConfirmDelete => "y shred · n keep ",
    };

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(hint.chars().count() as u16)])
        .split(area);
    let bar = Style::default().bg(Color::DarkGray).fg(Color::White);
    f.render_widget(Paragraph::new(left).style(bar), chunks[0]);
    f.render_widget(Paragraph::new(hint).style(bar), chunks[1]);
}

fn render_image_prompt(f: &mut Frame, state: &mut UIState<'_>) {
    let popup = centered_rect(60, 20, f.area());
    let area = Rect {
        height: popup.height.min(3),
        ..popup
    };
    f.render_widget(Clear, area);
    state.image_path.set_block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Photo file [Enter to Print, Esc to Cancel] ")
            .border_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
    );
    f.render_widget(&state.image_path, area);

    let (row, col) = state.image_path.cursor();
    f.set_cursor_position((area.x + 1 + col as u16, area.y + 1 + row as u16));
}

fn render_confirm_delete(f: &mut Frame, state: &UIState<'_>, controller: &Controller) {
    let area = centered_rect(40, 20, f.area());
    f.render_widget(Clear, area);

    let label = state
        .selected
        .as_deref()
        .and_then(|id| controller.message(id))
        .map(|m| m.label().to_string())
        .unwrap_or_default();
    let preview: String = label.chars().take(60).collect();

    let text = vec![
        Line::from(Span::styled(
            "Shred this message?",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(preview),
        Line::from(""),
        Line::from("[y] shred   [n] keep"),
    ];
    let popup = Paragraph::new(text)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Shredder ")
                .border_style(Style::default().fg(Color::Red)),
        );
    f.render_widget(popup, area);
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
