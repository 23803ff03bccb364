//! Live terminal view of one (account, symbol) bucket: open orders and
//! queued pending orders, redrawn on a fixed tick by re-reading the bucket
//! from Postgres (spec.md §4.5). Not a replacement for `/metrics` — this is
//! for watching one bucket rebalance in real time while reproducing a bug.
//!
//! ## Usage
//!
//! ```bash
//! queue-tui --account-id <uuid> --symbol BTCUSDT
//! ```
//!
//! ## Keyboard Controls
//!
//! - `q` or `Ctrl-C` - Quit
//! - `p` - Pause/Resume polling

use std::io;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use loom_core::config::Settings;
use loom_core::domain::{OpenOrder, PendingOrder};
use loom_core::repository::OrderRepository;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame, Terminal,
};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

#[derive(Parser)]
#[command(about = "Watch one bucket's open + pending orders redraw in real time")]
struct Args {
    #[arg(long)]
    account_id: Uuid,
    #[arg(long)]
    symbol: String,
    /// Poll interval in milliseconds.
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,
}

enum Row {
    Open(OpenOrder),
    Pending(PendingOrder),
}

impl Row {
    fn sort_key(&self) -> (i32, rust_decimal::Decimal, chrono::DateTime<chrono::Utc>, Uuid) {
        match self {
            Row::Open(o) => (o.priority, o.sort_price, o.webhook_received_at, o.id),
            Row::Pending(p) => (p.priority, p.sort_price, p.webhook_received_at, p.id),
        }
    }
}

struct App {
    account_id: Uuid,
    symbol: String,
    rows: Vec<Row>,
    paused: bool,
    polls: u64,
    last_error: Option<String>,
}

impl App {
    async fn refresh(&mut self, repository: &OrderRepository) {
        if self.paused {
            return;
        }
        let result: Result<(Vec<OpenOrder>, Vec<PendingOrder>), anyhow::Error> = async {
            let mut tx = repository.begin().await?;
            let open = repository.open_orders_for_bucket(&mut tx, self.account_id, &self.symbol).await?;
            let pending = repository.pending_orders_for_bucket(&mut tx, self.account_id, &self.symbol).await?;
            tx.rollback().await?;
            Ok((open, pending))
        }
        .await;

        match result {
            Ok((open, pending)) => {
                let mut rows: Vec<Row> =
                    open.into_iter().map(Row::Open).chain(pending.into_iter().map(Row::Pending)).collect();
                rows.sort_by_key(Row::sort_key);
                self.rows = rows;
                self.last_error = None;
            }
            Err(err) => self.last_error = Some(err.to_string()),
        }
        self.polls += 1;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&settings.database_url)
        .await?;
    let repository = OrderRepository::new(pool);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App {
        account_id: args.account_id,
        symbol: args.symbol.clone(),
        rows: Vec::new(),
        paused: false,
        polls: 0,
        last_error: None,
    };

    let res = run_app(&mut terminal, &mut app, &repository, Duration::from_millis(args.poll_ms)).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    res
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    repository: &OrderRepository,
    poll_interval: Duration,
) -> Result<()> {
    let mut last_poll = Instant::now() - poll_interval;

    loop {
        if last_poll.elapsed() >= poll_interval {
            app.refresh(repository).await;
            last_poll = Instant::now();
        }

        terminal.draw(|f| ui(f, app))?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    KeyCode::Char('p') => app.paused = !app.paused,
                    _ => {}
                }
            }
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(5), Constraint::Length(3)])
        .split(f.area());

    let status = if app.paused { "PAUSED" } else { "LIVE" };
    let status_color = if app.paused { Color::Yellow } else { Color::Green };
    let title = Line::from(vec![
        Span::styled("QUEUE VIEW", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(format!(" | account {} | {} | ", app.account_id, app.symbol)),
        Span::styled(status, Style::default().fg(status_color).add_modifier(Modifier::BOLD)),
        Span::raw(format!(" | polls: {}", app.polls)),
    ]);
    let header = Paragraph::new(title).block(Block::default().borders(Borders::ALL)).alignment(Alignment::Center);
    f.render_widget(header, chunks[0]);

    render_rows(f, chunks[1], app);

    render_footer(f, chunks[2], app);
}

fn render_rows(f: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .rows
        .iter()
        .map(|row| match row {
            Row::Open(o) => ListItem::new(Line::from(vec![
                Span::styled("OPEN    ", Style::default().fg(Color::Green)),
                Span::raw(format!(
                    "{} side={:?} status={:?} price={:?} qty={} filled={}",
                    o.id, o.side, o.status, o.price, o.quantity, o.filled_quantity
                )),
            ])),
            Row::Pending(p) => ListItem::new(Line::from(vec![
                Span::styled("PENDING ", Style::default().fg(Color::Yellow)),
                Span::raw(format!(
                    "{} side={:?} priority={} sort_price={} qty={} retry={}",
                    p.id, p.side, p.priority, p.sort_price, p.quantity, p.retry_count
                )),
            ])),
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .title(format!("{} row(s), sorted priority/sort_price/time/id", app.rows.len()))
            .borders(Borders::ALL),
    );
    f.render_widget(list, area);
}

fn render_footer(f: &mut Frame, area: Rect, app: &App) {
    let text = if let Some(err) = &app.last_error {
        Line::from(Span::styled(format!("error: {err}"), Style::default().fg(Color::Red)))
    } else {
        Line::from(vec![
            Span::styled("Controls: ", Style::default().fg(Color::Cyan)),
            Span::raw("[Q]uit  [P]ause"),
        ])
    };
    let footer = Paragraph::new(text).block(Block::default().borders(Borders::ALL)).alignment(Alignment::Center);
    f.render_widget(footer, area);
}
