//! feedwatch: polls RSS feeds, detects new items, matches them against
//! keyword rules and fans announcements out to chat webhooks.
//!
//! ## Architecture overview
//!
//! ```text
//!  config.json ──► reload.rs ── ConfigChanged ──┐
//!                                               ▼
//!  ┌──────────┐  fetch   ┌──────────┐  put  ┌──────────┐  list_feeds  ┌────────┐
//!  │ source/  │ ◄─────── │ poll.rs  │ ────► │ cache.rs │ ───────────► │ app/ui │
//!  └──────────┘          └──────────┘       └──────────┘   (--tui)    └────────┘
//!                         │  │     │
//!             matches()   │  │     │ dispatch()
//!          ┌──────────────┘  │     └──────────────┐
//!          ▼                 ▼ has / mark_seen    ▼
//!    ┌────────────┐    ┌──────────┐        ┌────────────┐
//!    │ matcher.rs │    │ seen.rs  │        │ notifier/  │
//!    └────────────┘    └──────────┘        └────────────┘
//! ```
//!
//! * **`source/`**: the `FeedFetcher` trait and the RSS implementation.
//! * **`poll`**: the scheduler; one task per source per tick.
//! * **`cache`**: last snapshot per source, used for change detection.
//! * **`seen`**: append-only log of announced links.
//! * **`matcher`**: keyword rules applied to item titles.
//! * **`notifier/`**: Feishu and Telegram transports and the fan-out.
//! * **`config`** / **`reload`**: `config.json` and its hot reload.
//! * **`app`**, **`ui`**, **`input`**: the optional `--tui` status view.

mod app;
mod cache;
mod config;
mod error;
mod input;
mod matcher;
mod notifier;
mod poll;
mod reload;
mod seen;
mod source;
mod ui;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::{mpsc, oneshot, watch};
use tracing_subscriber::EnvFilter;

use app::App;
use cache::ItemCache;
use config::{Config, Settings};
use poll::{PollScheduler, PollState};
use seen::SeenStore;
use source::RssFetcher;

#[derive(Debug, Parser)]
#[command(version, about = "Watch RSS feeds and announce new matching items")]
struct Cli {
    /// Path of the JSON config file; it is watched for changes.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Poll every source once, then exit.
    #[arg(long, conflicts_with = "tui")]
    once: bool,

    /// Show a live status view of the cached feeds.
    #[arg(long)]
    tui: bool,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    debug: bool,
}

const DEFAULT_TUI_LOG: &str = "feedwatch.log";
const EVENT_CHANNEL_SIZE: usize = 8;

fn init_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Terminal lifetime
// ---------------------------------------------------------------------------

/// Raw mode and the alternate screen, restored on drop.
struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl TerminalGuard {
    fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self { terminal })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Restore the terminal before the default panic output is printed.
fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(info);
    }));
}

/// Blocking UI loop: refresh from the cache, draw, handle one key.
fn run_tui(
    cache: Arc<ItemCache>,
    seen: Arc<SeenStore>,
    settings: watch::Receiver<Arc<Settings>>,
) -> Result<()> {
    install_panic_hook();
    let mut guard = TerminalGuard::new()?;
    let mut app = App::new();
    let tick_rate = Duration::from_millis(250);

    loop {
        {
            let settings = settings.borrow();
            app.set_feeds(cache.list_feeds(&settings.sources));
            app.status = format!(
                "{}/{} sources cached, {} seen, every {} min",
                app.feeds.len(),
                settings.sources.len(),
                seen.len(),
                settings.interval.as_secs() / 60,
            );
        }

        guard.terminal.draw(|f| ui::draw(&mut app, f))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                input::handle_key_event(&mut app, key);
            }
        }

        if app.quit {
            return Ok(());
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_file = cli
        .log_file
        .clone()
        .or_else(|| cli.tui.then(|| PathBuf::from(DEFAULT_TUI_LOG)));
    init_logging(cli.debug, log_file.as_deref())?;

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let client = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;

    // Replay the seen log before anything is polled.
    let seen = Arc::new(
        SeenStore::open(&config.archives)
            .with_context(|| format!("opening seen log {}", config.archives.display()))?,
    );
    let settings = Arc::new(Settings::build(config, client.clone())?);
    tracing::info!(
        sources = settings.sources.len(),
        keywords = settings.matcher.len(),
        routes = ?settings.notifier.enabled_routes(),
        seen = seen.len(),
        archives = %seen.path().display(),
        "starting"
    );

    let cache = Arc::new(ItemCache::new());
    let scheduler = PollScheduler::new(
        Arc::clone(&cache),
        Arc::clone(&seen),
        Arc::new(RssFetcher::new(client.clone())),
        settings,
    );

    if cli.once {
        let outcomes = scheduler.poll_all().await;
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o.state, PollState::Failed(_)))
            .count();
        let notified: usize = outcomes
            .iter()
            .map(|o| match o.state {
                PollState::Changed { notified, .. } => notified,
                _ => 0,
            })
            .sum();
        tracing::info!(
            polled = outcomes.len(),
            cached = cache.len(),
            failed,
            notified,
            "single pass done"
        );
        return Ok(());
    }

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let _watcher = reload::spawn(cli.config.clone(), client, events_tx)
        .with_context(|| format!("watching {}", cli.config.display()))?;

    if cli.tui {
        let settings_rx = scheduler.settings_watch();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let poller = tokio::spawn(scheduler.run(events_rx, async move {
            let _ = stop_rx.await;
        }));

        let ui_result = tokio::task::spawn_blocking(move || run_tui(cache, seen, settings_rx))
            .await
            .context("UI thread panicked")?;

        let _ = stop_tx.send(());
        poller.await.context("scheduler task panicked")?;
        ui_result
    } else {
        scheduler
            .run(events_rx, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
                tracing::info!("ctrl-c received, shutting down");
            })
            .await;
        Ok(())
    }
}
