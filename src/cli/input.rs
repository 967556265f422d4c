//! Keyboard handling: single-key commands, the two option prompts and the
//! help view.

use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::cli::config::DashboardConfig;
use crate::cli::sort::SortKey;

/// How long a rejected sort key stays on screen.
pub const DWELL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InputMode {
    #[default]
    Normal,
    AwaitingSortKey,
    AwaitingLimit,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ViewMode {
    #[default]
    Dashboard,
    Help,
}

/// Result of feeding one event to [`Controls`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Nothing visible changed.
    None,
    /// Prompt or view changed; redraw.
    Redraw,
    /// The dashboard config changed; re-format, republish and redraw.
    Reconfigure,
    Quit,
}

#[derive(Debug, Default)]
pub struct Controls {
    mode: InputMode,
    view: ViewMode,
    buffer: String,
    rejected_until: Option<Instant>,
}

fn is_quit(key: &KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        KeyCode::Char('q') => !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT),
        _ => false,
    }
}

impl Controls {
    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// When the pending sort-key rejection should be cleared, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.rejected_until
    }

    /// Status line for the active prompt.
    pub fn prompt(&self, config: &DashboardConfig) -> Option<String> {
        match self.mode {
            InputMode::Normal => None,
            InputMode::AwaitingSortKey if self.rejected_until.is_some() => {
                Some(format!("invalid order: {}", self.buffer))
            }
            InputMode::AwaitingSortKey => Some(format!("sort by [{}]: {}", config.sort_key, self.buffer)),
            InputMode::AwaitingLimit => Some(format!("limit   [{}]: {}", config.sample_limit, self.buffer)),
        }
    }

    pub fn is_rejecting(&self) -> bool {
        self.rejected_until.is_some()
    }

    pub fn handle_key(&mut self, key: KeyEvent, config: &mut DashboardConfig, now: Instant) -> Action {
        if key.kind != KeyEventKind::Press {
            return Action::None;
        }
        if is_quit(&key) {
            return Action::Quit;
        }

        // A key during the rejection dwell ends it and is then handled normally.
        let mut action = Action::None;
        if self.rejected_until.is_some() {
            self.reset();
            action = Action::Redraw;
        }

        if self.view == ViewMode::Help {
            self.view = ViewMode::Dashboard;
            return Action::Redraw;
        }

        let next = match self.mode {
            InputMode::Normal => self.command(key, config),
            InputMode::AwaitingSortKey | InputMode::AwaitingLimit => self.capture(key, config, now),
        };
        if next == Action::None { action } else { next }
    }

    /// Clears an expired rejection. Returns `Redraw` when something was cleared.
    pub fn expire(&mut self, now: Instant) -> Action {
        match self.rejected_until {
            Some(at) if at <= now => {
                self.reset();
                Action::Redraw
            }
            _ => Action::None,
        }
    }

    /// Switch to the help view, dropping any pending prompt.
    pub fn show_help(&mut self) {
        self.reset();
        self.view = ViewMode::Help;
    }

    fn enter(&mut self, mode: InputMode) {
        self.buffer.clear();
        self.rejected_until = None;
        self.mode = mode;
    }

    fn reset(&mut self) {
        self.enter(InputMode::Normal);
    }

    fn command(&mut self, key: KeyEvent, config: &mut DashboardConfig) -> Action {
        match key.code {
            KeyCode::Char('o') => {
                self.enter(InputMode::AwaitingSortKey);
                Action::Redraw
            }
            KeyCode::Char('n') => {
                self.enter(InputMode::AwaitingLimit);
                Action::Redraw
            }
            KeyCode::Char('s') => {
                config.display_subs = !config.display_subs;
                log::debug!("subscriptions column {}", if config.display_subs { "on" } else { "off" });
                Action::Reconfigure
            }
            KeyCode::Char('h') | KeyCode::Char('?') => {
                self.show_help();
                Action::Redraw
            }
            _ => Action::None,
        }
    }

    fn capture(&mut self, key: KeyEvent, config: &mut DashboardConfig, now: Instant) -> Action {
        match key.code {
            KeyCode::Enter => self.commit(config, now),
            KeyCode::Esc => {
                self.reset();
                Action::Redraw
            }
            KeyCode::Backspace => {
                if self.buffer.pop().is_some() { Action::Redraw } else { Action::None }
            }
            KeyCode::Char(c) if !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
                self.buffer.push(c);
                Action::Redraw
            }
            _ => Action::None,
        }
    }

    fn commit(&mut self, config: &mut DashboardConfig, now: Instant) -> Action {
        match self.mode {
            InputMode::AwaitingSortKey => match self.buffer.trim().parse::<SortKey>() {
                Ok(key) => {
                    log::info!("sort key {} -> {}", config.sort_key, key);
                    config.sort_key = key;
                    self.reset();
                    Action::Reconfigure
                }
                Err(e) => {
                    log::debug!("{e}");
                    self.rejected_until = Some(now + DWELL);
                    Action::Redraw
                }
            },
            InputMode::AwaitingLimit => {
                let parsed = self.buffer.trim().parse::<u32>();
                self.reset();
                match parsed {
                    Ok(limit) => {
                        log::info!("connection limit {} -> {}", config.sample_limit, limit);
                        config.sample_limit = limit;
                        Action::Reconfigure
                    }
                    Err(_) => Action::Redraw,
                }
            }
            InputMode::Normal => Action::None,
        }
    }
}
