/// Chainwatch - live option chain in the terminal
///
/// Subscribes to an option-chain feed and shows the reconciled chain for the
/// selected expiry, per-expiry summaries and an open interest chart over the
/// trading session.
///
/// Configuration comes from `CHAINWATCH_*` environment variables, see
/// [`config::AppConfig`]. Logs go to a file because the terminal is taken.
mod app;
mod config;
mod ui;

use std::{
    error::Error,
    fs::File,
    io,
    sync::Mutex,
    time::{Duration, Instant},
};

use app::App;
use chainwatch_engine::{Session, buckets::empty_grid};
use config::AppConfig;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing::{info, warn};
use ui::Screen;

/// Initialize file logging
fn init_logging(config: &AppConfig) -> Result<(), Box<dyn Error>> {
    let file = File::create(&config.log_path)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = AppConfig::from_env();
    init_logging(&config)?;
    info!(url = %config.stream.url, transport = ?config.stream.transport, "starting chainwatch");

    let session = Session::start(config.stream.clone(), config.engine.clone())?;

    // Setup panic hook to restore terminal on crash
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, &session).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    session.shutdown().await;
    result
}

async fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    session: &Session,
) -> Result<(), Box<dyn Error>> {
    let mut app = App::new();
    let mut revision = session.subscribe();

    let tick_rate = Duration::from_millis(250);
    let mut last_draw = Instant::now() - tick_rate;
    let mut dirty = true;

    loop {
        if revision.has_changed().unwrap_or(false) {
            revision.borrow_and_update();
            dirty = true;
        }

        let expiries = session.read(|state| state.expiries_by_date());
        app.sync_expiry(&expiries);

        let strikes = app
            .expiry()
            .map(|expiry| session.strikes(expiry))
            .unwrap_or_default();
        let default_strike = app.expiry().and_then(|expiry| session.default_strike(expiry));
        app.sync_strike(&strikes, default_strike);

        if app.rebuild_requested {
            app.rebuild_requested = false;
            session.rebuild();
            dirty = true;
        }

        if dirty && last_draw.elapsed() >= tick_rate {
            let slots = match (app.expiry(), app.strike()) {
                (Some(expiry), Some(strike)) => session.bucket(expiry, strike),
                _ => session.read(|state| empty_grid(&state.config().session)),
            };
            let mut view = session.view(&app.filter());
            app.order(&mut view.records);
            let screen = Screen {
                view,
                expiry: app.expiry().cloned(),
                strike: app.strike(),
                slots,
                latest_only: app.latest_only,
                sort_by_pcr: app.sort_by_pcr,
            };
            terminal.draw(|f| ui::render(f, &screen))?;
            last_draw = Instant::now();
            dirty = false;
        }

        let timeout = tick_rate
            .checked_sub(last_draw.elapsed())
            .unwrap_or(Duration::from_millis(10));
        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    app.handle_key(key.code, &expiries, &strikes);
                    dirty = true;
                }
                Event::Resize(_, _) => dirty = true,
                _ => {}
            }
        }

        if app.should_quit {
            break;
        }

        // let the session tasks run between frames
        tokio::task::yield_now().await;
    }

    if session.read(|state| state.notice().is_some_and(|notice| notice.is_terminal())) {
        warn!("exiting after terminal stream failure");
    }
    Ok(())
}
