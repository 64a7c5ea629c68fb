//! Alternate-screen setup for the live display.

use std::io::{self, Stdout};

use crossterm::{
    cursor::{Hide, Show},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

pub type CrosstermTerminal = Terminal<CrosstermBackend<Stdout>>;

/// Restores the normal screen when dropped.
///
/// The display never reads input, so raw mode stays off and Ctrl-C still
/// reaches the process as a signal.
#[derive(Debug)]
pub struct ScreenGuard {
    active: bool,
}

impl ScreenGuard {
    /// Switches to the alternate screen and returns a terminal drawing on it.
    pub fn enter() -> io::Result<(Self, CrosstermTerminal)> {
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, Hide)?;
        let guard = Self { active: true };
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        terminal.clear()?;
        Ok((guard, terminal))
    }

    pub fn restore(&mut self) -> io::Result<()> {
        if self.active {
            self.active = false;
            execute!(io::stdout(), LeaveAlternateScreen, Show)?;
        }
        Ok(())
    }
}

impl Drop for ScreenGuard {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}
