/// Terminal inbox: live conversation list, unread badge and toasts
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use hirewire_core::api::ApiClient;
use hirewire_core::cli_app::token_provider;
use hirewire_core::conversation_store::{unread_badge, Snapshot};
use hirewire_core::messenger_types::conversation_route;
use hirewire_core::notify::{
    preview, ChannelToaster, MemoryNavigator, Navigator, NotificationDispatcher, Toast,
};
use hirewire_core::transport::SocketIoTransport;
use hirewire_core::{Config, ConnectionManager, ConnectionStatus, ConversationStore};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Terminal,
};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

const LIST_ROUTE: &str = "/messages";
/// How long a toast stays on screen
const TOAST_TTL: Duration = Duration::from_secs(6);

struct Inbox {
    snapshots: watch::Receiver<Snapshot>,
    status: watch::Receiver<ConnectionStatus>,
    toasts: mpsc::UnboundedReceiver<Toast>,
    navigator: Arc<MemoryNavigator>,
    toast: Option<(Toast, Instant)>,
    selected: usize,
}

impl Inbox {
    fn drain_toasts(&mut self) {
        while let Ok(toast) = self.toasts.try_recv() {
            self.toast = Some((toast, Instant::now()));
        }
        if let Some((_, shown)) = &self.toast {
            if shown.elapsed() > TOAST_TTL {
                self.toast = None;
            }
        }
    }

    /// Returns `false` when the user asked to quit
    fn handle_key(&mut self, code: KeyCode) -> bool {
        let len = self.snapshots.borrow().len();
        match code {
            KeyCode::Char('q') => return false,
            KeyCode::Up => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down => {
                if self.selected + 1 < len {
                    self.selected += 1;
                }
            }
            KeyCode::Enter => {
                // A visible toast wins over the list selection
                if let Some((toast, _)) = self.toast.take() {
                    toast.activate(self.navigator.as_ref());
                } else if let Some(item) = self.snapshots.borrow().get(self.selected) {
                    self.navigator.push(&conversation_route(&item.conversation_id));
                }
            }
            KeyCode::Esc => self.navigator.push(LIST_ROUTE),
            _ => {}
        }
        true
    }

    fn draw(&self, f: &mut ratatui::Frame) {
        let items = self.snapshots.borrow().clone();
        let location = self.navigator.location();
        let total: u64 = items.iter().map(|i| u64::from(i.unread_count)).sum();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(5), Constraint::Length(4)].as_ref())
            .split(f.size());

        let (status_text, status_color) = match &*self.status.borrow() {
            ConnectionStatus::Connected => ("connected".to_string(), Color::Green),
            ConnectionStatus::Connecting => ("connecting".to_string(), Color::Yellow),
            ConnectionStatus::Disconnected { reason } => (format!("disconnected: {}", reason), Color::Red),
            ConnectionStatus::Idle => ("offline (no token)".to_string(), Color::DarkGray),
            ConnectionStatus::Closed => ("closed".to_string(), Color::DarkGray),
        };
        let mut header = vec![
            Span::styled("● ", Style::default().fg(status_color)),
            Span::raw(status_text),
            Span::raw("   "),
            Span::styled(location.clone(), Style::default().fg(Color::Gray)),
        ];
        // No badge at all when nothing is unread
        if let Some(badge) = unread_badge(total) {
            header.push(Span::raw("   "));
            header.push(Span::styled(
                format!(" {} ", badge),
                Style::default().fg(Color::Black).bg(Color::Yellow).add_modifier(Modifier::BOLD),
            ));
        }
        f.render_widget(
            Paragraph::new(Line::from(header))
                .block(Block::default().title("HireWire").borders(Borders::ALL)),
            chunks[0],
        );

        let lines: Vec<Line> = items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                let open = location == conversation_route(&item.conversation_id);
                let mut style = Style::default();
                if idx == self.selected {
                    style = style.add_modifier(Modifier::REVERSED);
                }
                if open {
                    style = style.fg(Color::Cyan);
                }
                let unread = if item.unread_count > 0 {
                    format!("({}) ", item.unread_count)
                } else {
                    String::new()
                };
                let last = item
                    .last_message
                    .as_ref()
                    .map(|m| preview(&m.content))
                    .unwrap_or_default();
                Line::from(vec![
                    Span::styled(format!("{}{}", unread, item.other_participant.name), style),
                    Span::styled(format!("  {}", last), Style::default().fg(Color::Gray)),
                ])
            })
            .collect();
        f.render_widget(
            Paragraph::new(lines).block(
                Block::default()
                    .title("Conversations (↑/↓, Enter open, Esc back, q quit)")
                    .borders(Borders::ALL),
            ),
            chunks[1],
        );

        let toast_lines = match &self.toast {
            Some((toast, _)) => vec![
                Line::from(Span::styled(
                    toast.title.clone(),
                    Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
                )),
                Line::from(vec![
                    Span::raw(toast.preview.clone()),
                    Span::styled(
                        format!("  [Enter: {}]", toast.action.label()),
                        Style::default().fg(Color::Yellow),
                    ),
                ]),
            ],
            None => vec![],
        };
        f.render_widget(
            Paragraph::new(toast_lines).block(Block::default().title("Notifications").borders(Borders::ALL)),
            chunks[2],
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they do not fight the TUI
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_args(&args)?;

    let store = ConversationStore::new(config.ordering);
    if let Err(e) = ApiClient::new(&config, token_provider(&config)).hydrate(&store).await {
        tracing::warn!("Initial load failed, live updates only: {}", e);
    }

    let navigator = Arc::new(MemoryNavigator::new(LIST_ROUTE));
    let (toaster, toasts) = ChannelToaster::new();
    let dispatcher = Arc::new(NotificationDispatcher::new(navigator.clone(), Arc::new(toaster)));
    let manager = ConnectionManager::new(
        &config,
        Arc::new(SocketIoTransport::from_config(&config)),
        token_provider(&config),
        store.clone(),
        dispatcher,
    );
    let session = manager.mount()?;

    let mut inbox = Inbox {
        snapshots: store.subscribe(),
        status: session.watch_status(),
        toasts,
        navigator,
        toast: None,
        selected: 0,
    };

    // TUI setup
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let res = run_app(&mut terminal, &mut inbox);
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    session.unmount().await;
    if let Err(e) = res {
        eprintln!("TUI error: {e}");
    }
    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    inbox: &mut Inbox,
) -> std::io::Result<()> {
    let mut last_redraw = Instant::now() - Duration::from_secs(1);

    loop {
        inbox.drain_toasts();

        if crossterm::event::poll(Duration::from_millis(5))? {
            if let Event::Key(key) = event::read()? {
                if !inbox.handle_key(key.code) {
                    return Ok(());
                }
            }
        }

        if last_redraw.elapsed() >= Duration::from_millis(50) {
            terminal.draw(|f| inbox.draw(f))?;
            last_redraw = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(8));
    }
}
