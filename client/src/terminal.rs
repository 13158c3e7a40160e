//! Local terminal handling: raw mode for the duration of an interactive
//! session and size queries for window-change propagation.

use crossterm::tty::IsTty;
use launch_protocol::WindowChange;

/// Puts the terminal into raw mode and restores it on drop, so an early
/// return or error cannot leave the user's shell unusable.
#[derive(Debug)]
pub(crate) struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub(crate) fn enable() -> std::io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self { active: true })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

pub(crate) fn window_size() -> std::io::Result<WindowChange> {
    let (columns, rows) = crossterm::terminal::size()?;
    Ok(WindowChange::new(u32::from(columns), u32::from(rows)))
}

pub(crate) fn stdin_is_tty() -> bool {
    std::io::stdin().is_tty()
}
