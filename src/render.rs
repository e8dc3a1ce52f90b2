//! Terminal dashboard: one row per worker slot, redrawn at a fixed cadence.
//!
//! The renderer only ever reads the pool's state through a snapshot taken
//! under the lock and released before any drawing happens (spec.md §4.6),
//! so a slow terminal write never holds up a worker.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::pool::{Counts, Pool};
use crate::term::{self, RESET};

const FRAME_INTERVAL: Duration = Duration::from_millis(100);

pub struct RenderContext {
    pub pool: Arc<Pool>,
    pub slot_count: usize,
    pub resized: Arc<AtomicBool>,
    pub glyphs: crate::config::Glyphs,
}

/// Render loop body, run on its own thread until `done` is set. Split out
/// from the thread spawn so tests can drive a single frame synchronously.
pub fn run_render_loop(ctx: RenderContext, done: Arc<AtomicBool>) {
    let started = std::time::Instant::now();
    let mut out = std::io::stdout();
    let (mut cols, _) = term::terminal_size();

    loop {
        if ctx.resized.swap(false, Ordering::SeqCst) {
            let (new_cols, _) = term::terminal_size();
            cols = new_cols;
        }

        let frame = render_frame(&ctx, started.elapsed(), cols);
        let _ = term::clear_and_home(&mut out);
        let _ = out.write_all(frame.as_bytes());
        let _ = out.flush();

        if done.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep(FRAME_INTERVAL);
    }
}

/// Build one frame as a string: header, progress bar, then one row per
/// slot. Pure function of a snapshot, easy to unit test without a terminal.
pub fn render_frame(ctx: &RenderContext, elapsed: Duration, cols: u16) -> String {
    let counts = ctx.pool.counts();
    let mut out = String::new();

    out.push_str(&header_line(&counts, elapsed));
    out.push('\n');
    out.push_str(&progress_bar(&counts, &ctx.glyphs, cols));
    out.push('\n');

    for slot_id in 0..ctx.slot_count {
        let job_idx = ctx.pool.slot_job_idx(slot_id);
        let snap = ctx.pool.snapshot_slot(slot_id, job_idx);
        out.push_str(&slot_row(&snap, cols));
        out.push('\n');
    }

    out
}

fn header_line(counts: &Counts, elapsed: Duration) -> String {
    format!(
        "total={} queued={} running={} done={}/{} elapsed={}",
        counts.total,
        counts.queued,
        counts.running,
        counts.done(),
        counts.total,
        format_duration(elapsed)
    )
}

fn progress_bar(counts: &Counts, glyphs: &crate::config::Glyphs, cols: u16) -> String {
    let width = (cols as usize).saturating_sub(2).max(10).min(60);
    let done = counts.done();
    let filled = if counts.total == 0 {
        0
    } else {
        (done * width) / counts.total
    };
    let mut bar = String::with_capacity(width + 2);
    bar.push_str(&glyphs.bar_begin);
    for i in 0..width {
        bar.push(if i < filled {
            glyphs.bar_progress
        } else {
            glyphs.bar_rest
        });
    }
    bar.push_str(&glyphs.bar_end);
    bar
}

fn slot_row(snap: &crate::pool::SlotSnapshot, cols: u16) -> String {
    let row = match &snap.job {
        None => format!("[{:>3}] {}", snap.slot_id, term::state_glyph(crate::job::JobState::Queued)),
        Some(job) => {
            let style = term::style_for(job.state);
            let glyph = term::state_glyph(job.state);
            format!(
                "[{:>3}] {:<24} {} {:>6} {}{}{}",
                snap.slot_id,
                job.display_host,
                glyph,
                format_duration(job.elapsed),
                style,
                job.last_line,
                RESET
            )
        }
    };
    truncate_to_width(&row, cols as usize)
}

fn truncate_to_width(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        s.chars().take(width.saturating_sub(1)).collect::<String>() + "\u{2026}"
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use crate::pool::Pool;

    #[test]
    fn header_line_counts_total_and_done() {
        let counts = Counts {
            total: 4,
            queued: 1,
            running: 1,
            success: 2,
            ..Default::default()
        };
        let line = header_line(&counts, Duration::from_secs(65));
        assert!(line.contains("total=4"));
        assert!(line.contains("done=2/4"));
        assert!(line.contains("elapsed=01:05"));
    }

    #[test]
    fn progress_bar_is_empty_at_zero_done() {
        let counts = Counts {
            total: 4,
            ..Default::default()
        };
        let glyphs = crate::config::Glyphs::default();
        let bar = progress_bar(&counts, &glyphs, 80);
        assert!(bar.starts_with('['));
        assert!(!bar.contains('#'));
    }

    #[test]
    fn render_frame_has_one_row_per_slot() {
        let jobs = vec![Job::new("h1".into(), vec!["true".into()], None, 1)];
        let pool = Pool::new(jobs, 2);
        let ctx = RenderContext {
            pool,
            slot_count: 2,
            resized: Arc::new(AtomicBool::new(false)),
            glyphs: crate::config::Glyphs::default(),
        };
        let frame = render_frame(&ctx, Duration::from_secs(0), 80);
        assert_eq!(frame.lines().count(), 2 + 2);
    }
}
