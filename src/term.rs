//! Symbol/terminal primitives: ANSI styling helpers, terminal size query,
//! and the raw-mode guard used by the control plane and renderer.
//!
//! Grounded on the raw-mode lifecycle shown in `color-ssh`'s TUI layer
//! (enter on start, always restore on exit, including panics).

use std::io::Write;

/// State glyph shown in a worker row, per spec.md §4.6.
pub fn state_glyph(state: crate::job::JobState) -> &'static str {
    use crate::job::JobState::*;
    match state {
        Queued => "\u{00B7}",   // ·
        Running => "\u{25B6}",  // ▶
        Success => "\u{2713}",  // ✓
        Failed => "\u{2717}",   // ✗
        Timeout => "\u{23F1}",  // ⏱
        Killed => "\u{2620}",   // ☠
        Aborted => "\u{2014}",  // —
    }
}

pub fn style_for(state: crate::job::JobState) -> &'static str {
    use crate::job::JobState::*;
    match state {
        Queued => "\x1b[90m",   // bright black
        Running => "\x1b[33m",  // yellow
        Success => "\x1b[32m",  // green
        Failed => "\x1b[31m",   // red
        Timeout => "\x1b[35m",  // magenta
        Killed => "\x1b[31m",   // red
        Aborted => "\x1b[90m",  // bright black
    }
}

pub const RESET: &str = "\x1b[0m";

/// Query the current terminal size, falling back to a sane default when
/// stdout isn't a TTY (e.g. piped output in `--no-tui` mode).
pub fn terminal_size() -> (u16, u16) {
    crossterm::terminal::size().unwrap_or((80, 24))
}

/// Scoped raw-mode acquisition. Entering raw mode is requested once by the
/// control plane; `Drop` guarantees restoration on every exit path,
/// including a panicking control-plane thread, per spec.md §5's scoped-
/// resource discipline.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn enter() -> anyhow::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(RawModeGuard { active: true })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

/// Move the cursor to the top-left and clear from there to the end of the
/// screen, the minimal primitive the renderer needs to redraw a frame
/// without flicker-inducing full clears.
pub fn clear_and_home(out: &mut impl Write) -> std::io::Result<()> {
    write!(out, "\x1b[H\x1b[J")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;

    #[test]
    fn glyphs_are_distinct() {
        let states = [
            JobState::Queued,
            JobState::Running,
            JobState::Success,
            JobState::Failed,
            JobState::Timeout,
            JobState::Killed,
            JobState::Aborted,
        ];
        let glyphs: std::collections::HashSet<&str> =
            states.iter().map(|s| state_glyph(*s)).collect();
        assert_eq!(glyphs.len(), states.len());
    }
}
