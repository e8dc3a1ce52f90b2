//! Wires the pool, workers, control plane, and renderer into one run and
//! owns the top-level lifecycle: create the run directory, drain all jobs,
//! write status files, restore the terminal, print the summary, and pick
//! the process exit code (spec.md §3, §8).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::config::Config;
use crate::job::Job;
use crate::logstore::RunDir;
use crate::pool::{self, Pool};
use crate::{control, render, worker};

pub struct RunRequest {
    pub hosts: Vec<String>,
    pub command: Vec<String>,
    pub script: Option<Vec<u8>>,
    pub script_path: Option<std::path::PathBuf>,
    pub parallel: usize,
    pub timeout: Option<Duration>,
    pub delay: Duration,
    pub log_root: std::path::PathBuf,
    pub job_name: Option<String>,
    pub max_dots: i64,
    pub extra_ssh_opts: Vec<String>,
    pub no_tui: bool,
}

pub struct RunOutcome {
    pub exit_code: i32,
    pub run_dir: std::path::PathBuf,
}

pub fn execute(req: RunRequest, config: &Config) -> anyhow::Result<RunOutcome> {
    let jobs: Vec<Job> = req
        .hosts
        .iter()
        .map(|h| {
            Job::new(
                h.clone(),
                req.command.clone(),
                req.script_path.clone(),
                req.max_dots,
            )
        })
        .collect();

    let worker_count = req.parallel.max(1).min(jobs.len().max(1));
    let pool = Pool::new(jobs, worker_count);

    let run_dir = Arc::new(
        RunDir::create(&req.log_root, req.job_name.as_deref()).context("create run directory")?,
    );
    run_dir.write_hosts_list(&req.hosts)?;

    tracing::info!(run_dir = %run_dir.path().display(), hosts = req.hosts.len(), "starting run");

    let (fault_tx, fault_rx) = mpsc::channel();
    let script = req.script.map(Arc::new);

    let mut worker_handles = Vec::with_capacity(worker_count);
    for slot_id in 0..worker_count {
        let ctx = worker::WorkerContext {
            slot_id,
            pool: Arc::clone(&pool),
            run_dir: Arc::clone(&run_dir),
            default_ssh_opts: config.default_ssh_opts.clone(),
            extra_ssh_opts: req.extra_ssh_opts.clone(),
            timeout: req.timeout,
            startup_delay: pool::startup_delay(slot_id, req.delay),
            script: script.clone(),
            fault_tx: fault_tx.clone(),
        };
        worker_handles.push(std::thread::spawn(move || worker::run_worker(ctx)));
    }
    drop(fault_tx);

    let render_done = Arc::new(AtomicBool::new(false));
    // Signal handling (SIGINT/SIGTERM abort, SIGWINCH resize) is installed
    // unconditionally: Ctrl-C must abort cleanly whether or not the
    // dashboard is showing.
    let resized = control::install_signal_handlers(Arc::clone(&pool)).context("install signal handlers")?;

    let render_handle = if !req.no_tui {
        let ctx = render::RenderContext {
            pool: Arc::clone(&pool),
            slot_count: worker_count,
            resized: Arc::clone(&resized),
            glyphs: config.glyphs.clone(),
        };
        let done = Arc::clone(&render_done);
        Some(std::thread::spawn(move || render::run_render_loop(ctx, done)))
    } else {
        None
    };

    let control_handle = if !req.no_tui && control::stdin_is_tty() {
        let pool = Arc::clone(&pool);
        let done = Arc::clone(&render_done);
        Some(std::thread::spawn(move || control::run_control_loop(pool, done)))
    } else {
        None
    };

    // Drive fatal-fault handling: any worker reporting an I/O fault forces
    // an abort, same as SIGINT/SIGTERM would (spec.md §8).
    let fault_watcher = {
        let pool = Arc::clone(&pool);
        std::thread::spawn(move || {
            for err in fault_rx.iter() {
                tracing::error!(error = %err, "fatal worker fault, aborting run");
                pool.abort();
                pool.request_kill_all();
            }
        })
    };

    for h in worker_handles {
        let _ = h.join();
    }
    // All worker-held `fault_tx` clones are now dropped, so the fault
    // watcher's receive loop ends on its own; join it so any in-flight
    // `abort()` it triggered has settled before status files are written.
    let _ = fault_watcher.join();

    render_done.store(true, Ordering::SeqCst);
    if let Some(h) = render_handle {
        let _ = h.join();
    }
    if let Some(h) = control_handle {
        let _ = h.join();
    }

    let jobs = pool.all_jobs();
    run_dir.write_status_files(&jobs)?;

    let exit_code = summarize(&jobs);
    Ok(RunOutcome {
        exit_code,
        run_dir: run_dir.path().to_path_buf(),
    })
}

/// Print the one-line summary and compute the process exit code: `0` if
/// every host succeeded, otherwise the count of non-success hosts, capped
/// at 255 (spec.md §8).
fn summarize(jobs: &[Job]) -> i32 {
    let counts = jobs.iter().fold((0usize, 0usize), |(total, bad), j| {
        (
            total + 1,
            bad + usize::from(j.state != crate::job::JobState::Success),
        )
    });
    let (total, bad) = counts;
    eprintln!(
        "{} host(s), {} succeeded, {} failed",
        total,
        total - bad,
        bad
    );
    bad.min(255) as i32
}
