mod catalog;
mod config;
mod controller;
mod db;
mod models;
mod photo;
mod remote;
mod storage;
mod store;
mod ui;

use crate::config::{Config, StorageMode, matches_key};
use crate::controller::{Controller, Settled};
use crate::models::{MessageDraft, MessageKind, StyleUpdate};
use crate::storage::{LocalStorage, MessageStorage};
use crate::ui::{DragState, PrintSource, UIMode, UIState};
use anyhow::Context;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
};
use ratatui::Terminal;
use ratatui::backend::{Backend, CrosstermBackend};
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LOG_FILE: &str = "retroprint.log";
/// How long quitting waits for storage writes still in flight.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let debug_logging = std::env::args().any(|arg| arg == "--debug");
    let force_remote = std::env::args().any(|arg| arg == "--remote");

    init_logging(debug_logging)?;
    let config = Config::load();

    // Handle store reset
    if std::env::args().any(|arg| arg == "--reset") {
        let db = db::Database::new(&config.storage.database_url).await?;
        db.run_migrations().await?;
        let removed = db.clear().await?;
        tracing::info!(removed, "local store wiped");
        println!("Removed {} stored entries. The desk starts fresh next launch.", removed);
        return Ok(());
    }

    let storage = open_storage(&config, force_remote).await?;
    tracing::info!(backend = storage.backend_name(), "storage ready");

    let mut controller = Controller::new(storage, config.behavior.rollback);
    controller.load();

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &config, &mut controller).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        crossterm::terminal::LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;

    if tokio::time::timeout(SETTLE_TIMEOUT, controller.settle())
        .await
        .is_err()
    {
        tracing::warn!(pending = controller.pending(), "quit before storage caught up");
    }

    result
}

/// Logs go to a file so they never scribble over the terminal UI.
fn init_logging(debug: bool) -> anyhow::Result<()> {
    let file = File::create(LOG_FILE).context("Failed to create log file")?;
    tracing::subscriber::set_global_default(file_subscriber(file, debug))
        .context("Failed to install logger")?;
    Ok(())
}

fn file_subscriber(file: File, debug: bool) -> impl tracing::Subscriber + Send + Sync {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_max_level(level)
        .finish()
}

async fn open_storage(
    config: &Config,
    force_remote: bool,
) -> anyhow::Result<Arc<dyn MessageStorage>> {
    let mode = if force_remote {
        StorageMode::Remote
    } else {
        config.storage.mode
    };
    match mode {
        StorageMode::Local => {
            let db = db::Database::new(&config.storage.database_url)
                .await
                .with_context(|| format!("Failed to open {}", config.storage.database_url))?;
            db.run_migrations().await?;
            Ok(Arc::new(LocalStorage::new(db)))
        }
        StorageMode::Remote => Ok(Arc::new(remote::RemoteStorage::new(
            &config.storage.api_base_url,
        )?)),
    }
}

/// Sends a draft to the printer; its input is cleared once the card lands.
fn start_print(
    ui_state: &mut UIState<'_>,
    controller: &mut Controller,
    draft: MessageDraft,
    source: PrintSource,
) {
    if controller.print(draft) {
        ui_state.pending_print = Some(source);
    } else {
        ui_state.status_message = Some("Printer busy".to_string());
    }
}

/// Reacts to storage calls that finished since the last frame.
fn apply_settled(ui_state: &mut UIState<'_>, controller: &mut Controller) {
    for settled in controller.drain() {
        match settled {
            Settled::Printed(id) => {
                match ui_state.pending_print.take() {
                    Some(PrintSource::Note) => ui_state.reset_compose(),
                    Some(PrintSource::Photo) => ui_state.draft_reminder = false,
                    None => {}
                }
                ui_state.selected = Some(id);
            }
            Settled::PrintFailed => ui_state.pending_print = None,
        }
    }
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    config: &Config,
    controller: &mut Controller,
) -> anyhow::Result<()> {
    let keys = &config.keybindings;
    let mut ui_state = UIState::default();

    loop {
        apply_settled(&mut ui_state, controller);
        terminal.draw(|f| ui::render(f, &mut ui_state, controller))?;

        if !event::poll(std::time::Duration::from_millis(100))? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match ui_state.mode {
            UIMode::Browsing => {
                ui_state.status_message = None;

                if matches_key(key, &keys.quit) {
                    break;
                } else if matches_key(key, &keys.dismiss_error) {
                    controller.clear_error();
                } else if matches_key(key, &keys.compose) {
                    ui_state.mode = UIMode::Composing;
                } else if matches_key(key, &keys.print_photo) {
                    ui_state.mode = UIMode::ImagePath;
                } else if matches_key(key, &keys.next_card) {
                    let messages = controller.messages();
                    if let Some(id) = ui_state.select_next(&messages) {
                        controller.bring_to_front(&id);
                    }
                } else if matches_key(key, &keys.prev_card) {
                    let messages = controller.messages();
                    if let Some(id) = ui_state.select_prev(&messages) {
                        controller.bring_to_front(&id);
                    }
                } else if matches_key(key, &keys.pin) {
                    if let Some(id) = ui_state.selected.clone() {
                        ui_state.status_message = controller
                            .toggle_pin(&id)
                            .map(|pinned| String::from(if pinned { "Pinned" } else { "Unpinned" }));
                    }
                } else if matches_key(key, &keys.reminder) {
                    if let Some(id) = ui_state.selected.clone() {
                        if let Some(on) = controller.toggle_reminder(&id) {
                            let status = if on { "Reminder set" } else { "Reminder cleared" };
                            ui_state.status_message = Some(status.to_string());
                        }
                    }
                } else if matches_key(key, &keys.delete) {
                    if ui_state.selected.is_some() {
                        ui_state.mode = UIMode::ConfirmDelete;
                    }
                } else if matches_key(key, &keys.cycle_style) {
                    if let Some(message) = ui_state
                        .selected
                        .as_deref()
                        .and_then(|id| controller.message(id))
                    {
                        let id = message.id.clone();
                        let update = match message.kind() {
                            MessageKind::Text => StyleUpdate {
                                style_id: None,
                                note_color_id: Some(
                                    catalog::next_id(
                                        catalog::NOTE_COLORS,
                                        message.style_key(),
                                        |s| s.id,
                                    )
                                    .to_string(),
                                ),
                            },
                            MessageKind::Image => StyleUpdate {
                                style_id: Some(
                                    catalog::next_id(
                                        catalog::POLAROID_STYLES,
                                        message.style_key(),
                                        |s| s.id,
                                    )
                                    .to_string(),
                                ),
                                note_color_id: None,
                            },
                        };
                        controller.update_style(&id, update);
                    }
                } else if matches_key(key, &keys.grab) {
                    if let Some(message) = ui_state
                        .selected
                        .as_deref()
                        .and_then(|id| controller.message(id))
                    {
                        if message.is_pinned {
                            ui_state.status_message =
                                Some("Pinned cards stay put".to_string());
                        } else {
                            let id = message.id.clone();
                            controller.bring_to_front(&id);
                            ui_state.drag = Some(DragState::new(&id));
                            ui_state.mode = UIMode::Moving;
                        }
                    }
                } else if matches_key(key, &keys.cycle_theme) {
                    let mut next = controller.settings().clone();
                    next.theme_id = catalog::next_id(catalog::THEMES, &next.theme_id, |s| s.id)
                        .to_string();
                    controller.update_settings(next);
                } else if matches_key(key, &keys.cycle_printer) {
                    let mut next = controller.settings().clone();
                    next.printer_style =
                        catalog::next_id(catalog::PRINTER_STYLES, &next.printer_style, |s| s.id)
                            .to_string();
                    controller.update_settings(next);
                } else if matches_key(key, &keys.cycle_default_color) {
                    let mut next = controller.settings().clone();
                    next.note_color_id =
                        catalog::next_id(catalog::NOTE_COLORS, &next.note_color_id, |s| s.id)
                            .to_string();
                    ui_state.status_message = Some(format!(
                        "New notes print on {}",
                        catalog::note_color(&next.note_color_id).display_name()
                    ));
                    controller.update_settings(next);
                } else if matches_key(key, &keys.cycle_default_photo) {
                    let mut next = controller.settings().clone();
                    next.polaroid_style =
                        catalog::next_id(catalog::POLAROID_STYLES, &next.polaroid_style, |s| s.id)
                            .to_string();
                    ui_state.status_message = Some(format!(
                        "New photos print in {} frames",
                        catalog::polaroid_style(&next.polaroid_style).display_name()
                    ));
                    controller.update_settings(next);
                }
            }
            UIMode::Composing => {
                // Newline before print: alt-Enter would otherwise also match a bare Enter.
                if matches_key(key, &keys.cancel) {
                    ui_state.mode = UIMode::Browsing;
                } else if matches_key(key, &keys.draft_reminder) {
                    ui_state.draft_reminder = !ui_state.draft_reminder;
                } else if matches_key(key, &keys.newline) {
                    ui_state.compose.insert_newline();
                } else if matches_key(key, &keys.print) {
                    let draft = MessageDraft::text(ui_state.compose_text())
                        .with_reminder(ui_state.draft_reminder);
                    if !draft.is_printable() {
                        continue;
                    }
                    start_print(&mut ui_state, controller, draft, PrintSource::Note);
                } else {
                    ui_state.compose.input(key);
                }
            }
            UIMode::ImagePath => {
                if matches_key(key, &keys.cancel) {
                    ui_state.reset_image_path();
                    ui_state.mode = UIMode::Browsing;
                } else if matches_key(key, &keys.print) {
                    let path = ui_state.image_path_text();
                    match photo::encode_file(Path::new(&path)) {
                        Ok(image_url) => {
                            let draft = MessageDraft::image(image_url)
                                .with_reminder(ui_state.draft_reminder);
                            ui_state.reset_image_path();
                            ui_state.mode = UIMode::Browsing;
                            start_print(&mut ui_state, controller, draft, PrintSource::Photo);
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "photo not printed");
                            ui_state.status_message = Some(err.to_string());
                            ui_state.reset_image_path();
                            ui_state.mode = UIMode::Browsing;
                        }
                    }
                } else {
                    ui_state.image_path.input(key);
                }
            }
            UIMode::Moving => {
                if matches_key(key, &keys.cancel) {
                    ui_state.drag = None;
                    ui_state.mode = UIMode::Browsing;
                } else if matches_key(key, &keys.drop) {
                    ui_state.mode = UIMode::Browsing;
                    if let Some(drag) = ui_state.drag.take() {
                        if drag.cols != 0 || drag.rows != 0 {
                            let (dx, dy) = drag.offset_px();
                            controller.finish_drag(&drag.id, dx, dy);
                        }
                    }
                } else if let Some(drag) = ui_state.drag.as_mut() {
                    if matches_key(key, &keys.move_left) {
                        drag.nudge(-1, 0);
                    } else if matches_key(key, &keys.move_right) {
                        drag.nudge(1, 0);
                    } else if matches_key(key, &keys.move_up) {
                        drag.nudge(0, -1);
                    } else if matches_key(key, &keys.move_down) {
                        drag.nudge(0, 1);
                    }
                }
            }
            UIMode::ConfirmDelete => match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    if let Some(id) = ui_state.selected.take() {
                        controller.delete(&id);
                    }
                    ui_state.mode = UIMode::Browsing;
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    ui_state.mode = UIMode::Browsing;
                }
                _ => {}
            },
        }

        ui_state.prune_selection(&controller.messages());
    }

    Ok(())
}
