use {
    crate::sink::SharedView,
    ratatui::{
        backend::CrosstermBackend,
        Terminal,
    },
    std::io::Write,
    std::time::{Duration, Instant},
};

/// Raw mode and the alternate screen, undone on drop so an early `?` in the
/// event loop still hands back a usable terminal
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> std::io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        let guard = TerminalGuard;
        // Alternate screen keeps the grid apart from stderr logs
        crossterm::execute!(
            std::io::stdout(),
            crossterm::terminal::EnterAlternateScreen,
            crossterm::cursor::Hide
        )?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Err(e) = restore_screen(&mut std::io::stdout()) {
            log::error!("Failed to leave alternate screen: {}", e);
        }
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            log::error!("Failed to disable raw mode: {}", e);
        }
    }
}

fn restore_screen<W: Write>(out: &mut W) -> std::io::Result<()> {
    crossterm::execute!(
        out,
        crossterm::terminal::LeaveAlternateScreen,
        crossterm::cursor::Show
    )
}

/// Run the TUI event loop
///
/// Handles keyboard input, terminal resize, and adaptive refresh throttling
pub async fn run_ui(view: SharedView) -> Result<(), Box<dyn std::error::Error>> {
    let stdout = std::io::stdout();
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let _guard = TerminalGuard::enter()?;

    terminal.clear()?;

    // Track change rate for adaptive refresh
    let mut last_revision = 0;
    let mut last_refresh = Instant::now();
    let mut change_rate_samples = Vec::new();
    let mut scroll: usize = 0;

    loop {
        let current_revision = view.read().revision;

        let changes_since_last = current_revision.saturating_sub(last_revision);
        let time_since_last = last_refresh.elapsed();

        if time_since_last.as_secs_f64() > 0.0 {
            let changes_per_sec = changes_since_last as f64 / time_since_last.as_secs_f64();
            change_rate_samples.push(changes_per_sec);

            if change_rate_samples.len() > 10 {
                change_rate_samples.remove(0);
            }
        }

        let avg_changes_per_sec = if change_rate_samples.is_empty() {
            0.0
        } else {
            change_rate_samples.iter().sum::<f64>() / change_rate_samples.len() as f64
        };

        // Adaptive throttle: min(1s, 250ms × (avg_changes_per_sec / 50))
        let base_interval = Duration::from_millis(250);
        let throttle_factor = (avg_changes_per_sec / 50.0).max(1.0);
        let refresh_interval = base_interval.mul_f64(throttle_factor).min(Duration::from_secs(1));

        if crossterm::event::poll(refresh_interval)? {
            if let crossterm::event::Event::Key(key) = crossterm::event::read()? {
                match key.code {
                    crossterm::event::KeyCode::Char('q') | crossterm::event::KeyCode::Esc => {
                        break;
                    }
                    crossterm::event::KeyCode::Down | crossterm::event::KeyCode::Char('j') => {
                        scroll = scroll.saturating_add(1);
                    }
                    crossterm::event::KeyCode::Up | crossterm::event::KeyCode::Char('k') => {
                        scroll = scroll.saturating_sub(1);
                    }
                    _ => {}
                }
            }
        }

        {
            let view = view.read();
            scroll = scroll.min(view.rows.len().saturating_sub(1));
            let area = terminal.size()?;
            terminal.draw(|f| {
                if let Err(e) = crate::ui::layout::render_layout(f, area, &view, scroll) {
                    log::error!("Layout render error: {}", e);
                }
            })?;
        }

        last_revision = current_revision;
        last_refresh = Instant::now();
    }

    Ok(())
}
