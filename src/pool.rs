//! Shared pool state and the mutual-exclusion region guarding it.
//!
//! A single `parking_lot::Mutex<PoolState>` plus one `Condvar` is the only
//! synchronization primitive in the whole program (spec.md §4.3). Workers,
//! the control plane, the signal handler, and the renderer all go through
//! `Pool`'s methods; none of them touch `PoolState` directly.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::job::{Job, JobState, WorkerSlot};

/// Snapshot of one slot for the renderer, taken under the lock and then
/// released before drawing (spec.md §4.6: never hold the lock while
/// painting).
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub slot_id: usize,
    pub job: Option<JobSnapshot>,
}

#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub display_host: String,
    pub state: JobState,
    pub elapsed: Duration,
    pub last_line: String,
}

/// Aggregate counts the renderer's header and the final summary line both
/// need.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counts {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub timeout: usize,
    pub killed: usize,
    pub aborted: usize,
}

impl Counts {
    pub fn done(&self) -> usize {
        self.success + self.failed + self.timeout + self.killed + self.aborted
    }
}

struct PoolState {
    jobs: Vec<Job>,
    next_queue_idx: usize,
    paused: bool,
    /// Set once the pool must drain with no further spawning (abort, or a
    /// fatal I/O error). Distinct from `paused`: stopped workers never
    /// resume.
    stopping: bool,
    /// One record per parallelism unit: which job it currently owns (if
    /// any), its kill flag, and when it was claimed. Indexed by slot id.
    slots: Vec<WorkerSlot>,
}

/// Shared handle to the pool's state. Cheap to clone (`Arc` inside).
pub struct Pool {
    state: Mutex<PoolState>,
    condvar: Condvar,
    /// Flipped by the signal handler; polled by the driver independently of
    /// the lock so SIGINT/SIGTERM delivery never has to contend with it.
    pub signaled_stop: Arc<AtomicBool>,
}

impl Pool {
    pub fn new(jobs: Vec<Job>, worker_count: usize) -> Arc<Self> {
        let worker_count = worker_count.max(1);
        Arc::new(Pool {
            state: Mutex::new(PoolState {
                jobs,
                next_queue_idx: 0,
                paused: false,
                stopping: false,
                slots: (0..worker_count).map(WorkerSlot::new).collect(),
            }),
            condvar: Condvar::new(),
            signaled_stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Claim the next queued job for `slot_id`, blocking on the condvar
    /// while paused. Returns `None` once there is nothing left to claim,
    /// meaning this worker thread should exit.
    ///
    /// While `stopping`, any job still `Queued` is drained straight to
    /// `Aborted` without ever being handed to a worker (spec.md §8
    /// invariant 1: every host ends in exactly one status file).
    pub fn claim_next(&self, slot_id: usize) -> Option<usize> {
        let mut guard = self.state.lock();
        loop {
            if guard.stopping {
                // Drain remaining queued jobs into Aborted so every host
                // still gets a terminal state, then signal "nothing to do".
                while guard.next_queue_idx < guard.jobs.len() {
                    let idx = guard.next_queue_idx;
                    guard.next_queue_idx += 1;
                    if guard.jobs[idx].state == JobState::Queued {
                        guard.jobs[idx].mark_aborted();
                    }
                }
                return None;
            }

            if guard.paused {
                self.condvar.wait(&mut guard);
                continue;
            }

            if guard.next_queue_idx >= guard.jobs.len() {
                return None;
            }

            let idx = guard.next_queue_idx;
            guard.next_queue_idx += 1;
            if let Some(slot) = guard.slots.get_mut(slot_id) {
                slot.kill_requested = false;
                slot.job_idx = Some(idx);
                slot.started_at = Some(Instant::now());
            }
            guard.jobs[idx].mark_running();
            return Some(idx);
        }
    }

    /// Release `slot_id`'s claim on its current job once the worker has
    /// finished it, so the renderer no longer attributes that slot to a
    /// job that has already moved to a terminal state.
    pub fn release_slot(&self, slot_id: usize) {
        let mut guard = self.state.lock();
        if let Some(slot) = guard.slots.get_mut(slot_id) {
            slot.job_idx = None;
            slot.started_at = None;
        }
    }

    /// Which job index `slot_id` currently owns, if any. Used by the
    /// renderer to draw the right host/state/last-line on each row.
    pub fn slot_job_idx(&self, slot_id: usize) -> Option<usize> {
        self.state
            .lock()
            .slots
            .get(slot_id)
            .and_then(|s| s.job_idx)
    }

    pub fn pause(&self) {
        let mut guard = self.state.lock();
        guard.paused = true;
    }

    pub fn resume(&self) {
        let mut guard = self.state.lock();
        guard.paused = false;
        drop(guard);
        self.condvar.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Stop handing out new work. Already-running jobs are left to finish
    /// or be killed explicitly; queued jobs are drained to `Aborted` the
    /// next time a worker calls `claim_next`, or immediately here for any
    /// worker currently parked on the condvar.
    pub fn abort(&self) {
        let mut guard = self.state.lock();
        guard.stopping = true;
        guard.paused = false;
        drop(guard);
        self.condvar.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.state.lock().stopping
    }

    /// Request that the child owned by `slot_id` be killed. The owning
    /// worker's watcher thread observes this on its next poll tick.
    pub fn request_kill(&self, slot_id: usize) {
        let mut guard = self.state.lock();
        if let Some(slot) = guard.slots.get_mut(slot_id) {
            slot.kill_requested = true;
        }
    }

    /// Request kill for every slot, used by the SIGINT/SIGTERM path.
    pub fn request_kill_all(&self) {
        let mut guard = self.state.lock();
        for slot in guard.slots.iter_mut() {
            slot.kill_requested = true;
        }
    }

    pub fn kill_requested(&self, slot_id: usize) -> bool {
        self.state
            .lock()
            .slots
            .get(slot_id)
            .map(|s| s.kill_requested)
            .unwrap_or(false)
    }

    pub fn with_job_mut<R>(&self, idx: usize, f: impl FnOnce(&mut Job) -> R) -> R {
        let mut guard = self.state.lock();
        f(&mut guard.jobs[idx])
    }

    pub fn snapshot_job(&self, idx: usize) -> Job {
        self.state.lock().jobs[idx].clone()
    }

    pub fn counts(&self) -> Counts {
        let guard = self.state.lock();
        let mut c = Counts {
            total: guard.jobs.len(),
            ..Default::default()
        };
        for job in &guard.jobs {
            match job.state {
                JobState::Queued => c.queued += 1,
                JobState::Running => c.running += 1,
                JobState::Success => c.success += 1,
                JobState::Failed => c.failed += 1,
                JobState::Timeout => c.timeout += 1,
                JobState::Killed => c.killed += 1,
                JobState::Aborted => c.aborted += 1,
            }
        }
        c
    }

    pub fn all_jobs(&self) -> Vec<Job> {
        self.state.lock().jobs.clone()
    }

    /// Renderer-facing snapshot for one slot, keyed by which job index it
    /// currently owns (if any).
    pub fn snapshot_slot(&self, slot_id: usize, job_idx: Option<usize>) -> SlotSnapshot {
        let guard = self.state.lock();
        let job = job_idx.map(|idx| {
            let j = &guard.jobs[idx];
            JobSnapshot {
                display_host: j.display_host.clone(),
                state: j.state,
                elapsed: j.elapsed(),
                last_line: j.last_line.clone(),
            }
        });
        SlotSnapshot { slot_id, job }
    }
}

/// Compute the per-worker startup stagger: the `k`-th worker (0-indexed)
/// delays its first claim by `k * delay` relative to pool start, so the
/// first burst of SSH connections is smoothed rather than simultaneous
/// (spec.md §4.4).
pub fn startup_delay(slot_id: usize, delay: Duration) -> Duration {
    delay.saturating_mul(slot_id as u32)
}

/// Block the calling thread until `deadline`, waking early and returning if
/// `should_wake` starts returning true (used by workers waiting out their
/// startup stagger so an abort during ramp-up doesn't block needlessly).
pub fn sleep_until_or(deadline: Instant, mut should_wake: impl FnMut() -> bool) {
    while Instant::now() < deadline {
        if should_wake() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20).min(deadline.saturating_duration_since(Instant::now())));
    }
}
