//! Run-directory layout and the per-host log writer.
//!
//! Contract (spec.md §3, §4.2, §6): one directory per invocation, named
//! `<timestamp>-<pid>`, optionally nested under a job sub-directory,
//! containing `hosts.list`, one `<host>.out` per host that entered
//! `running`, and `<status>.status` files written at drain. A `latest`
//! symlink always points at the most recent run directory in its scope.
//!
//! Modeled on the teacher's `JobDir` (`jobstore.rs`): a thin handle over a
//! directory plus explicit read/write helpers, no implicit caching.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::job::{Job, JobState};

/// Error returned when a `-L` pattern cannot be resolved (spec.md §7,
/// `log_query_error`). A plain `Display + Error` marker, the same shape
/// as the teacher's `UnknownSourceScheme` in `skills.rs`.
#[derive(Debug)]
pub struct LogQueryError(pub String);

impl std::fmt::Display for LogQueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "log_query_error: {}", self.0)
    }
}

impl std::error::Error for LogQueryError {}

/// Handle to one run's directory.
pub struct RunDir {
    path: PathBuf,
    /// First-occurrence counts, used to disambiguate duplicate hosts with a
    /// `~N` suffix (spec.md §9 open question: duplicates are preserved,
    /// not rejected or silently overwritten).
    seen_hosts: Mutex<std::collections::HashMap<String, u32>>,
}

fn run_dir_name(pid: u32) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}-{}", now.as_secs(), pid)
}

impl RunDir {
    /// Create a fresh run directory (eagerly, per spec.md §3 lifecycle) and
    /// repoint the `latest` symlink at it.
    pub fn create(log_root: &Path, job_name: Option<&str>) -> Result<Self> {
        let scope = match job_name {
            Some(name) => log_root.join(name),
            None => log_root.to_path_buf(),
        };
        std::fs::create_dir_all(&scope)
            .with_context(|| format!("create log scope {}", scope.display()))?;

        let name = run_dir_name(std::process::id());
        let path = scope.join(&name);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("create run directory {}", path.display()))?;

        let latest = scope.join("latest");
        let _ = std::fs::remove_file(&latest);
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&name, &latest)
                .with_context(|| format!("symlink {} -> {}", latest.display(), name))?;
        }
        #[cfg(not(unix))]
        {
            std::fs::write(&latest, &name).context("write latest pointer")?;
        }

        Ok(RunDir {
            path,
            seen_hosts: Mutex::new(std::collections::HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `hosts.list`, one resolved host per line, before the first job
    /// starts (spec.md §3 lifecycle).
    pub fn write_hosts_list(&self, hosts: &[String]) -> Result<()> {
        let mut body = String::new();
        for h in hosts {
            body.push_str(h);
            body.push('\n');
        }
        std::fs::write(self.path.join("hosts.list"), body).context("write hosts.list")
    }

    /// Resolve the (possibly duplicate-disambiguated) log file path for a
    /// host, assigning a `~N` suffix on the second and later occurrence.
    fn host_log_path(&self, host: &str) -> PathBuf {
        let mut seen = self.seen_hosts.lock().unwrap();
        let count = seen.entry(host.to_string()).or_insert(0);
        *count += 1;
        let file_name = if *count == 1 {
            format!("{host}.out")
        } else {
            format!("{host}~{}.out", *count)
        };
        self.path.join(file_name)
    }

    /// Open (creating) a host's combined-output log and write its header
    /// line: `# host=<h> cmd=<c> start=<iso8601>` per spec.md §6.
    pub fn open_host_log(&self, host: &str, command_display: &str) -> Result<HostLog> {
        let path = self.host_log_path(host);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("create host log {}", path.display()))?;

        let start = now_rfc3339();
        writeln!(file, "# host={host} cmd={command_display} start={start}")
            .with_context(|| format!("write header to {}", path.display()))?;

        Ok(HostLog {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Write every terminal `.status` file, one newline-terminated host
    /// list per state that has at least one member represented, and the
    /// remaining status files with empty bodies (spec.md §6: "possibly
    /// empty"). Called once at drain; nothing in the run directory is ever
    /// rewritten after this per spec.md §3.
    pub fn write_status_files(&self, jobs: &[Job]) -> Result<()> {
        let stems = ["success", "failed", "timeout", "killed", "aborted"];
        let mut bodies: std::collections::HashMap<&str, String> =
            stems.iter().map(|s| (*s, String::new())).collect();

        for job in jobs {
            if let Some(stem) = job.state.status_file_stem() {
                let body = bodies.get_mut(stem).expect("known stem");
                body.push_str(&job.host);
                body.push('\n');
            }
        }

        for stem in stems {
            let path = self.path.join(format!("{stem}.status"));
            std::fs::write(&path, &bodies[stem])
                .with_context(|| format!("write {}", path.display()))?;
        }
        Ok(())
    }
}

/// A single host's append-only combined-output log, guarded so both the
/// stdout and stderr reader threads can write through it (spec.md §4.2:
/// "a single writer").
pub struct HostLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl HostLog {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one already-formatted line (no timestamp is required at line
    /// granularity per spec.md §4.2) to the combined log.
    pub fn write_line(&self, line: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "{line}");
        }
    }

    pub fn writer_handle(&self) -> Arc<Mutex<File>> {
        Arc::clone(&self.file)
    }

    /// Write the footer line and flush. Must be called exactly once, after
    /// both stream threads have joined, so the footer is always the last
    /// line (spec.md §8 invariant 4: no write after terminal state
    /// publication).
    pub fn finish(&self, exit_code: Option<i32>, state: JobState) -> Result<()> {
        let end = now_rfc3339();
        let exit = exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-1".to_string());
        let mut f = self.file.lock().unwrap();
        writeln!(f, "# end={end} exit={exit} state={}", state.as_str())
            .with_context(|| format!("write footer to {}", self.path.display()))?;
        f.flush().ok();
        Ok(())
    }
}

/// Read the last `tail_lines` lines (or all, if `tail_lines == 0`) of a
/// file, lossily decoded. Used by the renderer's idle slots is not needed;
/// this exists for `-L`-adjacent tooling and tests.
pub fn tail_file(path: &Path, tail_lines: usize) -> String {
    let Ok(mut f) = File::open(path) else {
        return String::new();
    };
    let mut buf = String::new();
    if f.read_to_string(&mut buf).is_err() {
        return String::new();
    }
    if tail_lines == 0 {
        return buf;
    }
    let lines: Vec<&str> = buf.lines().collect();
    let skip = lines.len().saturating_sub(tail_lines);
    lines[skip..].join("\n")
}

/// Resolve a `-L` query: a pure function from `(run_root, run_id_or_latest,
/// patterns)` to the list of files to print (spec.md §4.2, §6).
///
/// `run_root` is the log root, already narrowed to the job sub-scope by the
/// caller when `-j` is in play. Wildcard patterns `*.out` and `*.status`
/// are expanded with `glob`; `<status>.status`, `<host>.out`, and
/// `hosts.list` are honored literally. Anything else is a
/// [`LogQueryError`].
pub fn resolve_log_query(
    run_root: &Path,
    run_id_or_latest: &str,
    patterns: &[String],
) -> Result<Vec<PathBuf>, LogQueryError> {
    let run_dir = run_root.join(run_id_or_latest);
    if !run_dir.is_dir() {
        return Err(LogQueryError(format!(
            "no such run: {}",
            run_dir.display()
        )));
    }

    const KNOWN_STATUSES: [&str; 5] = ["success", "failed", "timeout", "killed", "aborted"];

    let mut out = Vec::new();
    for pattern in patterns {
        if pattern == "hosts.list" {
            out.push(run_dir.join("hosts.list"));
            continue;
        }
        if pattern == "*.out" || pattern == "*.status" {
            let glob_pattern = run_dir.join(pattern);
            let matches: Vec<PathBuf> = glob::glob(&glob_pattern.to_string_lossy())
                .map_err(|e| LogQueryError(format!("bad pattern {pattern}: {e}")))?
                .filter_map(|r| r.ok())
                .collect();
            if matches.is_empty() {
                return Err(LogQueryError(format!(
                    "pattern {pattern} matched no files in {}",
                    run_dir.display()
                )));
            }
            out.extend(matches);
            continue;
        }
        if let Some(stem) = pattern.strip_suffix(".status") {
            if KNOWN_STATUSES.contains(&stem) {
                let p = run_dir.join(pattern);
                if !p.is_file() {
                    return Err(LogQueryError(format!("missing status file: {pattern}")));
                }
                out.push(p);
                continue;
            }
        }
        if let Some(_host) = pattern.strip_suffix(".out") {
            let p = run_dir.join(pattern);
            if !p.is_file() {
                return Err(LogQueryError(format!("no such host log: {pattern}")));
            }
            out.push(p);
            continue;
        }
        return Err(LogQueryError(format!("unknown log query pattern: {pattern}")));
    }
    Ok(out)
}

pub fn now_rfc3339() -> String {
    let d = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_rfc3339(d.as_secs())
}

fn format_rfc3339(secs: u64) -> String {
    let mut s = secs;
    let seconds = s % 60;
    s /= 60;
    let minutes = s % 60;
    s /= 60;
    let hours = s % 24;
    s /= 24;

    let mut days = s;
    let mut year = 1970u64;
    loop {
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let leap = is_leap(year);
    let month_days: [u64; 12] = [
        31,
        if leap { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ];
    let mut month = 0usize;
    for (i, &d) in month_days.iter().enumerate() {
        if days < d {
            month = i;
            break;
        }
        days -= d;
    }
    let day = days + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month + 1,
        day,
        hours,
        minutes,
        seconds
    )
}

fn is_leap(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;

    #[test]
    fn rfc3339_epoch() {
        assert_eq!(format_rfc3339(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn rfc3339_known_date() {
        assert_eq!(format_rfc3339(1_704_067_200), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn run_dir_layout_and_hosts_list() {
        let tmp = tempfile::tempdir().unwrap();
        let run = RunDir::create(tmp.path(), None).unwrap();
        run.write_hosts_list(&["h1".to_string(), "h2".to_string()])
            .unwrap();
        let body = std::fs::read_to_string(run.path().join("hosts.list")).unwrap();
        assert_eq!(body, "h1\nh2\n");

        let latest = tmp.path().join("latest");
        assert!(latest.exists());
    }

    #[test]
    fn duplicate_hosts_get_disambiguated_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let run = RunDir::create(tmp.path(), None).unwrap();
        let a = run.open_host_log("h1", "echo ok").unwrap();
        let b = run.open_host_log("h1", "echo ok").unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().ends_with("h1.out"));
        assert!(b.path().ends_with("h1~2.out"));
    }

    #[test]
    fn status_files_partition_hosts() {
        let tmp = tempfile::tempdir().unwrap();
        let run = RunDir::create(tmp.path(), None).unwrap();
        let mut j1 = Job::new("h1".into(), vec!["true".into()], None, 1);
        j1.mark_running();
        j1.finish(JobState::Success, Some(0));
        let mut j2 = Job::new("h2".into(), vec!["false".into()], None, 1);
        j2.mark_running();
        j2.finish(JobState::Failed, Some(1));
        run.write_status_files(&[j1, j2]).unwrap();

        assert_eq!(
            std::fs::read_to_string(run.path().join("success.status")).unwrap(),
            "h1\n"
        );
        assert_eq!(
            std::fs::read_to_string(run.path().join("failed.status")).unwrap(),
            "h2\n"
        );
        assert_eq!(
            std::fs::read_to_string(run.path().join("timeout.status")).unwrap(),
            ""
        );
    }

    #[test]
    fn log_query_resolves_literal_and_glob_patterns() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let run_dir = root.join("20240101-1");
        std::fs::create_dir_all(&run_dir).unwrap();
        std::fs::write(run_dir.join("hosts.list"), "h1\n").unwrap();
        std::fs::write(run_dir.join("h1.out"), "hi\n").unwrap();
        std::fs::write(run_dir.join("success.status"), "h1\n").unwrap();

        let files = resolve_log_query(root, "20240101-1", &["hosts.list".to_string()]).unwrap();
        assert_eq!(files, vec![run_dir.join("hosts.list")]);

        let files = resolve_log_query(root, "20240101-1", &["*.out".to_string()]).unwrap();
        assert_eq!(files, vec![run_dir.join("h1.out")]);

        let err = resolve_log_query(root, "20240101-1", &["nonsense".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unknown log query pattern"));
    }
}
