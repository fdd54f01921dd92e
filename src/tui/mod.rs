mod app;
mod follow;
mod status_colors;
mod ui;

pub use app::App;
pub use follow::LogFollower;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::fs::{self, OpenOptions};
use std::io;
use std::time::Duration;

pub fn run_tui(mut app: App, mut follower: Option<LogFollower>) -> io::Result<()> {
    // Initialize logging to file only if RUST_LOG is set
    if std::env::var("RUST_LOG").is_ok() {
        // Get the cache directory (or state directory on Linux)
        let log_dir = dirs::cache_dir()
            .or_else(dirs::state_dir)
            .unwrap_or_else(std::env::temp_dir);

        let log_dir = log_dir.join("runlog-tui");

        // Create the directory if it doesn't exist
        fs::create_dir_all(&log_dir).expect("Failed to create log directory");

        let log_path = log_dir.join("runlog-tui.log");

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .expect("Failed to open log file");

        env_logger::Builder::new()
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .parse_default_env()
            .init();

        log::info!("Starting runlog-tui - log file: {}", log_path.display());
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the main loop
    let res = run_app(&mut terminal, &mut app, &mut follower);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend + io::Write>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    follower: &mut Option<LogFollower>,
) -> Result<(), B::Error>
where
    B::Error: From<std::io::Error>,
{
    loop {
        let app_ref = &mut *app;
        terminal.draw(move |f| ui::draw(f, app_ref))?;

        if let Some(event) = get_event()? {
            app.handle_event(event);
        }

        if app.should_quit {
            return Ok(());
        }

        // In follow mode, drain whatever the run appended since last time.
        if let Some(follower) = follower.as_mut() {
            match follower.poll() {
                Ok(Some(chunk)) => {
                    app.builder.append_contents(chunk);
                    app.builder.on_appended_contents();
                    app.refresh_after_append();
                }
                Ok(None) => {}
                Err(err) => log::warn!("failed to read appended log contents: {}", err),
            }
        }
    }
}

pub fn get_event() -> io::Result<Option<KeyEvent>> {
    if event::poll(Duration::from_millis(100))?
        && let Event::Key(key) = event::read()?
    {
        // Only process key press events, not release
        if key.kind == KeyEventKind::Press {
            return Ok(Some(key));
        }
    }
    Ok(None)
}
