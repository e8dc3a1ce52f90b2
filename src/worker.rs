//! Worker thread: claim a job, run it over SSH, and classify its outcome.
//!
//! One thread per pool slot, started once at pool launch and run to
//! completion (spec.md §4: "one OS thread per worker"). Grounded on the
//! teacher's `supervise()` in `run.rs` for the spawn/watch/stream-to-log
//! shape, generalized from a single always-local command to an SSH child
//! per claimed host.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::job::{Job, JobState, TerminationReason};
use crate::logstore::RunDir;
use crate::pool::{self, Pool};

/// Fixed arguments always forced onto the ssh invocation, ahead of any
/// configured or pass-through options (spec.md §4.2: "BatchMode is
/// mandatory, not configurable").
const FORCED_SSH_ARGS: &[&str] = &["-o", "BatchMode=yes"];

const WATCH_POLL: Duration = Duration::from_millis(100);
/// Grace period between SIGTERM and SIGKILL escalation (spec.md §4.5).
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Everything a worker needs that doesn't change across the jobs it claims.
pub struct WorkerContext {
    pub slot_id: usize,
    pub pool: Arc<Pool>,
    pub run_dir: Arc<RunDir>,
    pub default_ssh_opts: Vec<String>,
    pub extra_ssh_opts: Vec<String>,
    pub timeout: Option<Duration>,
    pub startup_delay: Duration,
    /// Script bytes to feed on stdin instead of a remote command string,
    /// when `--script` was given (spec.md §4.2).
    pub script: Option<Arc<Vec<u8>>>,
    /// Fatal I/O errors (e.g. failing to create a host log) are reported
    /// here; the driver treats any send as cause to abort the whole run
    /// (spec.md §8).
    pub fault_tx: Sender<anyhow::Error>,
}

pub fn run_worker(ctx: WorkerContext) {
    if ctx.startup_delay > Duration::ZERO {
        let deadline = Instant::now() + ctx.startup_delay;
        let pool = Arc::clone(&ctx.pool);
        pool::sleep_until_or(deadline, || pool.is_stopping());
    }

    while let Some(job_idx) = ctx.pool.claim_next(ctx.slot_id) {
        if let Err(err) = run_one(&ctx, job_idx) {
            let _ = ctx.fault_tx.send(err);
        }
    }
}

fn run_one(ctx: &WorkerContext, job_idx: usize) -> anyhow::Result<()> {
    let job = ctx.pool.snapshot_job(job_idx);
    let command_display = display_command(&job);

    let log = ctx.run_dir.open_host_log(&job.host, &command_display)?;

    let mut cmd = build_command(ctx, &job);
    cmd.stdin(if ctx.script.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            finish_job(ctx, job_idx, JobState::Failed, Some(-1));
            ctx.pool.release_slot(ctx.slot_id);
            log.write_line(&format!("# spawn failed: {e}"))?;
            log.finish(None, JobState::Failed)?;
            return Ok(());
        }
    };
    let spawned_at = Instant::now();

    if let (Some(bytes), Some(mut stdin)) = (ctx.script.as_ref(), child.stdin.take()) {
        let bytes = Arc::clone(bytes);
        std::thread::spawn(move || {
            use std::io::Write;
            let _ = stdin.write_all(&bytes);
        });
    }

    let last_line = Arc::new(std::sync::Mutex::new(String::new()));
    let stdout_handle = spawn_stream_reader(
        child.stdout.take().expect("piped stdout"),
        log.writer_handle(),
        Arc::clone(&last_line),
    );
    let stderr_handle = spawn_stream_reader(
        child.stderr.take().expect("piped stderr"),
        log.writer_handle(),
        Arc::clone(&last_line),
    );

    let child_done = Arc::new(AtomicBool::new(false));
    let termination = Arc::new(std::sync::Mutex::new(None::<TerminationReason>));
    let watcher = spawn_watcher(
        ctx,
        child.id(),
        spawned_at,
        Arc::clone(&child_done),
        Arc::clone(&termination),
    );

    let wait_result = child.wait();
    child_done.store(true, Ordering::SeqCst);
    let _ = stdout_handle.join();
    let _ = stderr_handle.join();
    let _ = watcher.join();

    let final_last_line = last_line.lock().unwrap().clone();
    ctx.pool.with_job_mut(job_idx, |j| j.last_line = final_last_line);

    let termination = *termination.lock().unwrap();
    let (state, exit_code) = classify(wait_result, termination);

    finish_job(ctx, job_idx, state, exit_code);
    ctx.pool.release_slot(ctx.slot_id);
    log.finish(exit_code, state)?;
    Ok(())
}

fn display_command(job: &Job) -> String {
    if job.script_path.is_some() {
        "<script>".to_string()
    } else {
        job.command.join(" ")
    }
}

fn build_command(ctx: &WorkerContext, job: &Job) -> Command {
    let mut cmd = Command::new("ssh");
    for opt in &ctx.default_ssh_opts {
        cmd.arg(opt);
    }
    for opt in &ctx.extra_ssh_opts {
        cmd.arg(opt);
    }
    for arg in FORCED_SSH_ARGS {
        cmd.arg(arg);
    }
    cmd.arg(&job.host);
    if ctx.script.is_none() {
        for part in &job.command {
            cmd.arg(part);
        }
    }
    cmd
}

fn spawn_stream_reader(
    stream: impl Read + Send + 'static,
    sink: Arc<std::sync::Mutex<std::fs::File>>,
    last_line: Arc<std::sync::Mutex<String>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if let Ok(mut f) = sink.lock() {
                use std::io::Write;
                let _ = writeln!(f, "{line}");
            }
            if let Ok(mut last) = last_line.lock() {
                *last = line;
            }
        }
    })
}

fn spawn_watcher(
    ctx: &WorkerContext,
    child_pid: u32,
    spawned_at: Instant,
    child_done: Arc<AtomicBool>,
    termination: Arc<std::sync::Mutex<Option<TerminationReason>>>,
) -> std::thread::JoinHandle<()> {
    let pool = Arc::clone(&ctx.pool);
    let slot_id = ctx.slot_id;
    let timeout = ctx.timeout;

    std::thread::spawn(move || {
        let mut sigterm_sent_at: Option<Instant> = None;
        loop {
            if child_done.load(Ordering::SeqCst) {
                return;
            }

            let timed_out = timeout.is_some_and(|t| spawned_at.elapsed() >= t);
            // Abort alone must never kill an already-running job (spec.md
            // §5); only an explicit per-slot kill request does.
            let killed = pool.kill_requested(slot_id);

            if (timed_out || killed) && sigterm_sent_at.is_none() {
                {
                    let mut guard = termination.lock().unwrap();
                    if guard.is_none() {
                        *guard = Some(if killed {
                            TerminationReason::Killed
                        } else {
                            TerminationReason::Timeout
                        });
                    } else if killed {
                        // Killed always dominates a prior Timeout record.
                        *guard = Some(TerminationReason::Killed);
                    }
                }
                send_signal(child_pid, libc::SIGTERM);
                sigterm_sent_at = Some(Instant::now());
            } else if killed {
                // A later kill request after a timeout already fired must
                // still win the classification, even without resending
                // SIGTERM.
                let mut guard = termination.lock().unwrap();
                *guard = Some(TerminationReason::Killed);
            }

            if let Some(sent) = sigterm_sent_at {
                if sent.elapsed() >= KILL_GRACE && !child_done.load(Ordering::SeqCst) {
                    send_signal(child_pid, libc::SIGKILL);
                }
            }

            // Poll the job's state the full span of spec.md §4.3's tick;
            // `child_done` set by the parent wait() call is what actually
            // ends the loop, so this sleep length only bounds reaction
            // latency to new kill/timeout conditions.
            std::thread::sleep(WATCH_POLL);
        }
    })
}

fn send_signal(pid: u32, sig: i32) {
    unsafe {
        libc::kill(pid as libc::pid_t, sig);
    }
}

fn finish_job(ctx: &WorkerContext, job_idx: usize, state: JobState, exit_code: Option<i32>) {
    ctx.pool.with_job_mut(job_idx, |j| j.finish(state, exit_code));
}

/// Map a completed `wait()` plus whatever termination reason the watcher
/// recorded into the job's final state, honoring the Killed-dominates-
/// Timeout precedence rule (spec.md §4.1).
fn classify(
    wait_result: std::io::Result<std::process::ExitStatus>,
    termination: Option<TerminationReason>,
) -> (JobState, Option<i32>) {
    if let Some(reason) = termination {
        let state = match reason {
            TerminationReason::Killed => JobState::Killed,
            TerminationReason::Timeout => JobState::Timeout,
        };
        let exit_code = wait_result.ok().and_then(|s| s.code());
        return (state, exit_code);
    }

    match wait_result {
        Ok(status) if status.success() => (JobState::Success, status.code()),
        Ok(status) => (JobState::Failed, status.code()),
        Err(_) => (JobState::Failed, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prefers_killed_over_timeout_regardless_of_order() {
        let status = std::process::Command::new("true").status().unwrap();
        let (state, _) = classify(Ok(status), Some(TerminationReason::Killed));
        assert_eq!(state, JobState::Killed);
        let (state, _) = classify(Ok(status), Some(TerminationReason::Timeout));
        assert_eq!(state, JobState::Timeout);
    }

    #[test]
    fn classify_success_and_failure_without_termination() {
        let ok = std::process::Command::new("true").status().unwrap();
        let (state, code) = classify(Ok(ok), None);
        assert_eq!(state, JobState::Success);
        assert_eq!(code, Some(0));

        let fail = std::process::Command::new("false").status().unwrap();
        let (state, code) = classify(Ok(fail), None);
        assert_eq!(state, JobState::Failed);
        assert_eq!(code, Some(1));
    }
}
