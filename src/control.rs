//! Interactive control plane: keyboard shortcuts plus OS signal handling.
//!
//! Disabled outright when stdin isn't a TTY (spec.md §5: "no control plane
//! without an interactive terminal"), which is also why this never runs
//! under `cargo test` — tests exercise `Pool`'s pause/resume/kill methods
//! directly instead (see `tests/integration.rs`).

use std::io::IsTerminal;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent};

use crate::pool::Pool;
use crate::term::RawModeGuard;

/// Recognized keys (spec.md §5): `p` pause, `r` resume, `a` abort (stop
/// scheduling + kill everything running), `k<digits><Enter>` kill one slot.
pub fn stdin_is_tty() -> bool {
    std::io::stdin().is_terminal()
}

/// Register SIGINT/SIGTERM (abort the pool and request kill-all) and
/// SIGWINCH (bump a resize counter the renderer polls) using `signal-hook`,
/// mirroring the teacher's single encapsulated registration point rather
/// than hand-rolled `libc::signal` calls scattered through the codebase.
pub fn install_signal_handlers(pool: Arc<Pool>) -> anyhow::Result<Arc<std::sync::atomic::AtomicBool>> {
    let resized = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let term_pool = Arc::clone(&pool);
    let mut term_signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])?;
    std::thread::spawn(move || {
        for _ in term_signals.forever() {
            term_pool.signaled_stop.store(true, Ordering::SeqCst);
            term_pool.abort();
            term_pool.request_kill_all();
        }
    });

    #[cfg(unix)]
    {
        let resized_flag = Arc::clone(&resized);
        let mut winch_signals = signal_hook::iterator::Signals::new([signal_hook::consts::SIGWINCH])?;
        std::thread::spawn(move || {
            for _ in winch_signals.forever() {
                resized_flag.store(true, Ordering::SeqCst);
            }
        });
    }

    Ok(resized)
}

/// Run the keyboard control loop until the pool has nothing left to drain.
/// Intended to run on its own thread, started only when [`stdin_is_tty`].
pub fn run_control_loop(pool: Arc<Pool>, done: Arc<std::sync::atomic::AtomicBool>) -> anyhow::Result<()> {
    let _raw_guard = RawModeGuard::enter()?;
    let mut pending_kill_digits = String::new();
    let mut in_kill_entry = false;

    while !done.load(Ordering::SeqCst) {
        if !event::poll(Duration::from_millis(150))? {
            continue;
        }
        let Event::Key(KeyEvent { code, .. }) = event::read()? else {
            continue;
        };

        if in_kill_entry {
            match code {
                KeyCode::Char(c) if c.is_ascii_digit() => pending_kill_digits.push(c),
                KeyCode::Enter => {
                    if let Ok(slot_id) = pending_kill_digits.parse::<usize>() {
                        pool.request_kill(slot_id);
                    }
                    pending_kill_digits.clear();
                    in_kill_entry = false;
                }
                KeyCode::Esc => {
                    pending_kill_digits.clear();
                    in_kill_entry = false;
                }
                _ => {}
            }
            continue;
        }

        match code {
            KeyCode::Char('p') => pool.pause(),
            KeyCode::Char('r') => pool.resume(),
            KeyCode::Char('a') => pool.abort(),
            KeyCode::Char('k') => in_kill_entry = true,
            _ => {}
        }
    }

    Ok(())
}
