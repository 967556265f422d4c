use std::io::Stdout;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use crossterm::event::{self, Event};
use crossterm::{cursor, execute, terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen}};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::Rect;
use ratatui::style::{Color, Style};
use ratatui::widgets::{Clear, Paragraph};
use ratatui::{Frame, Terminal};
use tokio::sync::{broadcast, mpsc, watch};

use crate::cli::config::DashboardConfig;
use crate::cli::fetch::{PollRequest, PollStatus};
use crate::cli::format::{self, HELP_TEXT};
use crate::cli::input::{Action, Controls, ViewMode};
use crate::cli::types::Snapshot;

/// Row of the dashboard text that prompts and notices overwrite. It is the
/// blank line between the server block and the connection count.
pub const PROMPT_ROW: u16 = 5;

const INPUT_POLL: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tone {
    Prompt,
    Error,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusLine {
    pub text: String,
    pub tone: Tone,
}

/// Everything one draw needs.
#[derive(Clone, Copy, Debug)]
pub struct Screen<'a> {
    pub body: &'a str,
    pub status: Option<&'a StatusLine>,
}

/// Where screens get drawn. Only the render loop calls this.
pub trait Surface {
    fn render(&mut self, screen: &Screen<'_>) -> anyhow::Result<()>;
}

impl<B: Backend> Surface for Terminal<B> {
    fn render(&mut self, screen: &Screen<'_>) -> anyhow::Result<()> {
        self.draw(|f| draw_screen(f, screen))?;
        Ok(())
    }
}

pub fn draw_screen(f: &mut Frame, screen: &Screen<'_>) {
    let area = f.area();
    f.render_widget(Paragraph::new(screen.body), area);

    if let Some(status) = screen.status {
        if area.height > PROMPT_ROW {
            let row = Rect::new(area.x, area.y + PROMPT_ROW, area.width, 1);
            let color = match status.tone {
                Tone::Prompt => Color::Yellow,
                Tone::Error => Color::Red,
                Tone::Warning => Color::Magenta,
            };
            f.render_widget(Clear, row);
            f.render_widget(Paragraph::new(status.text.as_str()).style(Style::default().fg(color)), row);
        }
    }
}

/// When failed polls start being called out on screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StalePolicy {
    pub after: u32,
}

impl StalePolicy {
    pub fn notice(&self, status: &PollStatus, now: SystemTime) -> Option<String> {
        if self.after == 0 || status.consecutive_failures < self.after {
            return None;
        }
        let age = status
            .snapshot
            .as_ref()
            .and_then(|s| s.taken_at)
            .and_then(|t| now.duration_since(t).ok())
            .map(|d| format!("data is {}s old", d.as_secs()))
            .unwrap_or_else(|| "no data yet".to_string());
        Some(format!(
            "stale: {} polls failed, {}: {}",
            status.consecutive_failures,
            age,
            status.last_error.as_deref().unwrap_or("unknown error")
        ))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Idle,
    Redraw,
    Quit,
}

/// Single owner of the dashboard's mutable state. Every mutation happens on
/// the render loop's task.
pub struct Dashboard {
    config: DashboardConfig,
    controls: Controls,
    latest: Arc<Snapshot>,
    text: String,
    status: Option<StatusLine>,
    feed_notice: Option<String>,
    stale: StalePolicy,
    requests: watch::Sender<PollRequest>,
}

impl Dashboard {
    pub fn new(config: DashboardConfig, stale: StalePolicy, requests: watch::Sender<PollRequest>) -> Self {
        let latest = Arc::new(Snapshot::default());
        let text = format::format(&latest, &config);
        let mut dashboard = Self {
            config,
            controls: Controls::default(),
            latest,
            text,
            status: None,
            feed_notice: None,
            stale,
            requests,
        };
        dashboard.publish();
        dashboard
    }

    #[cfg(test)]
    pub(crate) fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    #[cfg(test)]
    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    pub fn screen(&self) -> Screen<'_> {
        match self.controls.view() {
            ViewMode::Help => Screen {
                body: HELP_TEXT,
                status: None,
            },
            ViewMode::Dashboard => Screen {
                body: &self.text,
                status: self.status.as_ref(),
            },
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.controls.deadline()
    }

    pub fn on_event(&mut self, event: Event, now: Instant) -> Step {
        match event {
            Event::Key(key) => {
                let action = self.controls.handle_key(key, &mut self.config, now);
                self.apply(action)
            }
            Event::Resize(width, height) => {
                log::debug!("resized to {width}x{height}");
                Step::Redraw
            }
            _ => Step::Idle,
        }
    }

    pub fn on_feed(&mut self, status: &PollStatus, now: SystemTime) -> Step {
        let mut step = Step::Idle;
        if let Some(snapshot) = &status.snapshot {
            if !Arc::ptr_eq(snapshot, &self.latest) {
                self.latest = Arc::clone(snapshot);
                self.reformat();
                step = Step::Redraw;
            }
        }
        let notice = self.stale.notice(status, now);
        if notice != self.feed_notice {
            self.feed_notice = notice;
            self.refresh_status();
            step = Step::Redraw;
        }
        step
    }

    pub fn on_deadline(&mut self, now: Instant) -> Step {
        let action = self.controls.expire(now);
        self.apply(action)
    }

    fn apply(&mut self, action: Action) -> Step {
        match action {
            Action::None => Step::Idle,
            Action::Redraw => {
                self.refresh_status();
                Step::Redraw
            }
            Action::Reconfigure => {
                self.reformat();
                self.publish();
                self.refresh_status();
                Step::Redraw
            }
            Action::Quit => Step::Quit,
        }
    }

    fn reformat(&mut self) {
        self.text = format::format(&self.latest, &self.config);
    }

    fn publish(&self) {
        let next = PollRequest::from(&self.config);
        self.requests.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn refresh_status(&mut self) {
        self.status = match self.controls.prompt(&self.config) {
            Some(text) => Some(StatusLine {
                text,
                tone: if self.controls.is_rejecting() { Tone::Error } else { Tone::Prompt },
            }),
            None => self.feed_notice.clone().map(|text| StatusLine { text, tone: Tone::Warning }),
        };
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}

/// Drain input events, feed updates and the prompt timer on one task and
/// draw whenever something visible changed. Returns after a quit request;
/// the poller is told to stop on the way out.
pub async fn run_tui<S: Surface>(
    surface: &mut S,
    dashboard: &mut Dashboard,
    mut input: mpsc::Receiver<Event>,
    mut feed: watch::Receiver<PollStatus>,
    shutdown: &broadcast::Sender<()>,
) -> anyhow::Result<()> {
    surface.render(&dashboard.screen())?;

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut feed_open = true;

    loop {
        let step = tokio::select! {
            biased;
            _ = &mut interrupt => Step::Quit,
            event = input.recv() => match event {
                Some(event) => dashboard.on_event(event, Instant::now()),
                None => Step::Quit,
            },
            _ = wait_until(dashboard.deadline()) => dashboard.on_deadline(Instant::now()),
            changed = feed.changed(), if feed_open => match changed {
                Ok(()) => {
                    let status = feed.borrow_and_update().clone();
                    dashboard.on_feed(&status, SystemTime::now())
                }
                Err(_) => {
                    log::warn!("poller went away");
                    feed_open = false;
                    Step::Idle
                }
            },
        };

        match step {
            Step::Quit => break,
            Step::Redraw => surface.render(&dashboard.screen())?,
            Step::Idle => {}
        }
    }

    let _ = shutdown.send(());
    Ok(())
}

/// Forward crossterm events from a dedicated thread. The thread ends once
/// the receiving side is dropped.
pub fn spawn_input_reader(tx: mpsc::Sender<Event>) -> anyhow::Result<std::thread::JoinHandle<()>> {
    let handle = std::thread::Builder::new().name("input".into()).spawn(move || {
        while !tx.is_closed() {
            match event::poll(INPUT_POLL) {
                Ok(true) => match event::read() {
                    Ok(ev) => {
                        if tx.blocking_send(ev).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("reading terminal event: {e}");
                        break;
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    log::error!("polling terminal events: {e}");
                    break;
                }
            }
        }
    })?;
    Ok(handle)
}

/// Events buffered between the terminal reader thread and the render loop.
pub const INPUT_QUEUE: usize = 64;

static TERMINAL_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Put the terminal back the way we found it. Safe to call from any exit
/// path; only the first call after setup does anything.
pub fn restore_terminal() -> bool {
    if !TERMINAL_ACTIVE.swap(false, Ordering::SeqCst) {
        return false;
    }
    let _ = disable_raw_mode();
    let _ = execute!(std::io::stdout(), LeaveAlternateScreen, cursor::Show);
    true
}

/// Raw mode and alternate screen for as long as the guard lives.
pub struct TerminalGuard {
    _private: (),
}

impl TerminalGuard {
    pub fn enter() -> anyhow::Result<(Self, Terminal<CrosstermBackend<Stdout>>)> {
        TERMINAL_ACTIVE.store(true, Ordering::SeqCst);
        let guard = Self { _private: () };

        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            restore_terminal();
            previous(info);
        }));

        enable_raw_mode()?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen, cursor::Hide)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;
        Ok((guard, terminal))
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::sort::SortKey;
    use crate::cli::types::{ConnectionRecord, Connz, Varz};
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use ratatui::backend::TestBackend;

    fn key(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn chars(s: &str) -> Vec<Event> {
        s.chars().map(|c| key(KeyCode::Char(c))).collect()
    }

    fn screen_lines(terminal: &Terminal<TestBackend>) -> Vec<String> {
        let buffer = terminal.backend().buffer();
        let width = buffer.area.width as usize;
        buffer
            .content
            .chunks(width)
            .map(|row| row.iter().map(|c| c.symbol()).collect::<String>().trim_end().to_string())
            .collect()
    }

    fn snapshot(pending: &[u64]) -> Arc<Snapshot> {
        let connections: Vec<ConnectionRecord> = pending
            .iter()
            .enumerate()
            .map(|(i, p)| ConnectionRecord {
                cid: i as u64 + 1,
                ip: "10.0.0.1".into(),
                port: 5000 + i as u16,
                name: format!("conn-{}", i + 1),
                pending_bytes: *p,
                subs: vec![format!("orders.{}", i + 1)],
                ..Default::default()
            })
            .collect();
        Arc::new(Snapshot {
            varz: Varz {
                version: "2.10.4".into(),
                ..Default::default()
            },
            connz: Connz {
                num_conns: connections.len() as u64,
                connections,
            },
            taken_at: Some(SystemTime::now()),
            ..Default::default()
        })
    }

    struct Harness {
        terminal: Terminal<TestBackend>,
        dashboard: Dashboard,
        requests: watch::Receiver<PollRequest>,
        feed: watch::Sender<PollStatus>,
        shutdown: broadcast::Sender<()>,
    }

    fn harness(config: DashboardConfig, stale_after: u32) -> Harness {
        let (requests_tx, requests) = watch::channel(PollRequest::from(&config));
        let (feed, _) = watch::channel(PollStatus::default());
        let (shutdown, _) = broadcast::channel(1);
        Harness {
            terminal: Terminal::new(TestBackend::new(220, 20)).unwrap(),
            dashboard: Dashboard::new(config, StalePolicy { after: stale_after }, requests_tx),
            requests,
            feed,
            shutdown,
        }
    }

    impl Harness {
        async fn run(&mut self, events: Vec<Event>) {
            let (tx, rx) = mpsc::channel(events.len() + 1);
            for ev in events {
                tx.send(ev).await.unwrap();
            }
            tx.send(key(KeyCode::Char('q'))).await.unwrap();
            run_tui(&mut self.terminal, &mut self.dashboard, rx, self.feed.subscribe(), &self.shutdown)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn first_paint_shows_placeholder() {
        let mut h = harness(DashboardConfig::default(), 3);
        h.run(vec![]).await;
        let lines = screen_lines(&h.terminal);
        assert_eq!(lines[0], "gnatsd version  (uptime: )");
        assert_eq!(lines[6], "Connections: 0");
        assert!(lines[7].contains("HOST") && !lines[7].contains("SUBSCRIPTIONS"));
    }

    #[tokio::test]
    async fn snapshot_arrival_reformats_and_redraws() {
        let mut h = harness(DashboardConfig { sort_key: SortKey::Pending, ..Default::default() }, 3);
        let status = PollStatus {
            snapshot: Some(snapshot(&[500, 1500])),
            ..Default::default()
        };
        assert_eq!(h.dashboard.on_feed(&status, SystemTime::now()), Step::Redraw);
        assert_eq!(h.dashboard.on_feed(&status, SystemTime::now()), Step::Idle);
        h.run(vec![]).await;
        let lines = screen_lines(&h.terminal);
        assert_eq!(lines[6], "Connections: 2");
        assert!(lines[8].contains("conn-2"));
        assert!(lines[9].contains("conn-1"));
    }

    #[tokio::test]
    async fn sort_prompt_is_drawn_on_the_status_row() {
        let mut h = harness(DashboardConfig::default(), 3);
        let mut events = vec![key(KeyCode::Char('o'))];
        events.extend(chars("pend"));
        let (tx, rx) = mpsc::channel(16);
        for ev in events {
            tx.send(ev).await.unwrap();
        }
        drop(tx);
        run_tui(&mut h.terminal, &mut h.dashboard, rx, h.feed.subscribe(), &h.shutdown)
            .await
            .unwrap();
        let lines = screen_lines(&h.terminal);
        assert_eq!(lines[PROMPT_ROW as usize], "sort by [cid]: pend");
        assert_eq!(lines[6], "Connections: 0");
    }

    #[tokio::test]
    async fn typed_options_reach_the_poller() {
        let mut h = harness(DashboardConfig::default(), 3);
        let mut events = vec![key(KeyCode::Char('o'))];
        events.extend(chars("bytes_to"));
        events.push(key(KeyCode::Enter));
        events.push(key(KeyCode::Char('n')));
        events.push(key(KeyCode::Char('5')));
        events.push(key(KeyCode::Enter));
        events.push(key(KeyCode::Char('s')));
        h.run(events).await;

        let config = h.dashboard.config();
        assert_eq!(config.sort_key, SortKey::BytesTo);
        assert_eq!(config.sample_limit, 5);
        assert!(config.display_subs);
        let request = h.requests.borrow().clone();
        assert_eq!(request.sort, SortKey::BytesTo);
        assert_eq!(request.limit, 5);
        assert!(request.subs);
        assert!(screen_lines(&h.terminal)[7].ends_with("SUBSCRIPTIONS"));
    }

    #[tokio::test]
    async fn help_view_replaces_and_restores_dashboard() {
        let mut h = harness(DashboardConfig::default(), 3);
        h.run(vec![key(KeyCode::Char('h'))]).await;
        assert!(screen_lines(&h.terminal).iter().any(|l| l.starts_with("Command")));

        let mut h = harness(DashboardConfig::default(), 3);
        h.run(vec![key(KeyCode::Char('?')), key(KeyCode::Char('x'))]).await;
        assert_eq!(screen_lines(&h.terminal)[0], "gnatsd version  (uptime: )");
    }

    #[tokio::test]
    async fn quit_signals_the_poller_once() {
        let combos: Vec<Vec<Event>> = vec![
            vec![],
            vec![key(KeyCode::Char('o')), key(KeyCode::Char('b'))],
            vec![key(KeyCode::Char('n'))],
            vec![key(KeyCode::Char('h'))],
        ];
        for events in combos {
            let mut h = harness(DashboardConfig::default(), 3);
            let mut stop = h.shutdown.subscribe();
            h.run(events).await;
            assert_eq!(stop.try_recv(), Ok(()));
            assert!(stop.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn rejected_sort_key_clears_after_dwell() {
        let mut h = harness(DashboardConfig::default(), 3);
        let now = Instant::now();
        let mut events = vec![key(KeyCode::Char('o'))];
        events.extend(chars("nope"));
        events.push(key(KeyCode::Enter));
        for ev in events {
            h.dashboard.on_event(ev, now);
        }
        Surface::render(&mut h.terminal, &h.dashboard.screen()).unwrap();
        assert_eq!(screen_lines(&h.terminal)[PROMPT_ROW as usize], "invalid order: nope");
        assert_eq!(h.dashboard.config().sort_key, SortKey::Cid);

        // Quit only arrives after the dwell, so the loop has to clear it itself.
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            let _ = tx.send(key(KeyCode::Char('q'))).await;
        });
        run_tui(&mut h.terminal, &mut h.dashboard, rx, h.feed.subscribe(), &h.shutdown)
            .await
            .unwrap();
        assert_eq!(screen_lines(&h.terminal)[PROMPT_ROW as usize], "");
        assert_eq!(h.dashboard.controls().buffer(), "");
        assert_eq!(h.dashboard.config().sort_key, SortKey::Cid);
    }

    #[test]
    fn stale_notice_follows_policy() {
        let policy = StalePolicy { after: 2 };
        let mut status = PollStatus {
            snapshot: Some(snapshot(&[])),
            consecutive_failures: 1,
            last_error: Some("connection refused".into()),
        };
        assert_eq!(policy.notice(&status, SystemTime::now()), None);
        status.consecutive_failures = 2;
        let notice = policy.notice(&status, SystemTime::now()).unwrap();
        assert!(notice.starts_with("stale: 2 polls failed"));
        assert!(notice.ends_with("connection refused"));
        assert_eq!(StalePolicy { after: 0 }.notice(&status, SystemTime::now()), None);
    }

    #[test]
    fn failed_polls_keep_last_good_data() {
        let mut h = harness(DashboardConfig::default(), 1);
        let good = snapshot(&[10]);
        let mut status = PollStatus {
            snapshot: Some(good.clone()),
            ..Default::default()
        };
        h.dashboard.on_feed(&status, SystemTime::now());
        let text = h.dashboard.text().to_string();

        status.consecutive_failures = 1;
        status.last_error = Some("timeout".into());
        assert_eq!(h.dashboard.on_feed(&status, SystemTime::now()), Step::Redraw);
        assert_eq!(h.dashboard.text(), text);
        let shown = h.dashboard.screen().status.cloned().unwrap();
        assert_eq!(shown.tone, Tone::Warning);
        assert!(shown.text.contains("timeout"));

        status.consecutive_failures = 0;
        status.last_error = None;
        assert_eq!(h.dashboard.on_feed(&status, SystemTime::now()), Step::Redraw);
        assert!(h.dashboard.screen().status.is_none());
    }

    #[test]
    fn terminal_is_restored_once() {
        TERMINAL_ACTIVE.store(true, Ordering::SeqCst);
        assert!(restore_terminal());
        assert!(!restore_terminal());

        // A guard dropped after an explicit restore must not restore again.
        TERMINAL_ACTIVE.store(true, Ordering::SeqCst);
        let guard = TerminalGuard { _private: () };
        assert!(restore_terminal());
        drop(guard);
        assert!(!TERMINAL_ACTIVE.load(Ordering::SeqCst));
        assert!(!restore_terminal());

        TERMINAL_ACTIVE.store(true, Ordering::SeqCst);
        drop(TerminalGuard { _private: () });
        assert!(!restore_terminal());
    }

    #[test]
    fn resize_redraws_without_changing_view() {
        let mut h = harness(DashboardConfig::default(), 3);
        assert_eq!(h.dashboard.on_event(Event::Resize(80, 24), Instant::now()), Step::Redraw);
        assert_eq!(h.dashboard.controls().view(), ViewMode::Dashboard);
        h.dashboard.on_event(key(KeyCode::Char('h')), Instant::now());
        assert_eq!(h.dashboard.on_event(Event::Resize(100, 30), Instant::now()), Step::Redraw);
        assert_eq!(h.dashboard.controls().view(), ViewMode::Help);
    }
}
