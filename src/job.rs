//! The job record and its state machine.
//!
//! A `Job` pairs one host with the command (or script) it will run. Its
//! state forms a DAG with a single terminal state per spec.md §4.1:
//! `queued -> running -> {success|failed|timeout|killed}`, or
//! `queued -> aborted` when the pool drains without spawning.

use std::path::PathBuf;
use std::time::{Instant, SystemTime};

/// One host's position in the job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Success,
    Failed,
    Timeout,
    Killed,
    Aborted,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Success => "success",
            JobState::Failed => "failed",
            JobState::Timeout => "timeout",
            JobState::Killed => "killed",
            JobState::Aborted => "aborted",
        }
    }

    /// A terminal state is one from which no further transition occurs.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Queued | JobState::Running)
    }

    /// The `.status` file this state's host belongs in, once terminal.
    pub fn status_file_stem(&self) -> Option<&'static str> {
        match self {
            JobState::Success => Some("success"),
            JobState::Failed => Some("failed"),
            JobState::Timeout => Some("timeout"),
            JobState::Killed => Some("killed"),
            JobState::Aborted => Some("aborted"),
            JobState::Queued | JobState::Running => None,
        }
    }
}

/// Reason a running child was torn down before exiting on its own.
///
/// Precedence per spec.md §4.1: `Killed` dominates `Timeout`. A worker
/// tracks whichever was *requested*, independent of arrival order, and
/// classifies `Killed` whenever a kill was ever requested for the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Timeout,
    Killed,
}

/// One host paired with the command to run on it.
#[derive(Debug, Clone)]
pub struct Job {
    pub host: String,
    pub display_host: String,
    pub command: Vec<String>,
    pub script_path: Option<PathBuf>,
    pub state: JobState,
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    /// Wall-clock start, used only for the on-disk header; `Instant` above
    /// drives all elapsed-time math (timeout, renderer).
    pub started_at_wall: Option<SystemTime>,
    pub exit_code: Option<i32>,
    pub last_line: String,
}

impl Job {
    pub fn new(host: String, command: Vec<String>, script_path: Option<PathBuf>, max_dots: i64) -> Self {
        let display_host = display_host(&host, max_dots);
        Job {
            host,
            display_host,
            command,
            script_path,
            state: JobState::Queued,
            start_time: None,
            end_time: None,
            started_at_wall: None,
            exit_code: None,
            last_line: String::new(),
        }
    }

    pub fn mark_running(&mut self) {
        self.state = JobState::Running;
        self.start_time = Some(Instant::now());
        self.started_at_wall = Some(SystemTime::now());
    }

    pub fn mark_aborted(&mut self) {
        self.state = JobState::Aborted;
    }

    /// Finish the job with an explicit state, classified by the caller.
    pub fn finish(&mut self, state: JobState, exit_code: Option<i32>) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.exit_code = exit_code;
        self.end_time = Some(Instant::now());
    }

    pub fn elapsed(&self) -> std::time::Duration {
        match (self.start_time, self.end_time) {
            (Some(s), Some(e)) => e.saturating_duration_since(s),
            (Some(s), None) => s.elapsed(),
            _ => std::time::Duration::ZERO,
        }
    }
}

/// Derive the presentation form of a host per spec.md §3.
///
/// `max_dots == 1` keeps the short name (up to the first dot); `-1` keeps
/// the host unchanged; `k > 0` keeps the first `k` dot-separated labels.
/// A `user@host` prefix is preserved and the rule applied to the host part.
pub fn display_host(host: &str, max_dots: i64) -> String {
    let (prefix, rest) = match host.split_once('@') {
        Some((user, h)) => (format!("{user}@"), h),
        None => (String::new(), host),
    };

    if max_dots < 0 {
        return format!("{prefix}{rest}");
    }

    let labels: Vec<&str> = rest.split('.').collect();
    if max_dots == 0 {
        return format!("{prefix}{rest}");
    }
    let keep = (max_dots as usize).min(labels.len()).max(1);
    format!("{prefix}{}", labels[..keep].join("."))
}

/// One parallelism unit owned by a single worker thread.
pub struct WorkerSlot {
    pub slot_id: usize,
    /// Index into the pool's job vector, while a job is claimed.
    pub job_idx: Option<usize>,
    pub kill_requested: bool,
    pub started_at: Option<Instant>,
}

impl WorkerSlot {
    pub fn new(slot_id: usize) -> Self {
        WorkerSlot {
            slot_id,
            job_idx: None,
            kill_requested: false,
            started_at: None,
        }
    }
}
