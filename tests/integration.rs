//! End-to-end and API-level tests for `sshp`.
//!
//! End-to-end scenarios run the compiled binary against a fake `ssh` put
//! first on `PATH`, the same binary-spawn harness shape as the teacher's
//! `tests/integration.rs`. The control plane is compiled out whenever
//! stdin isn't a TTY (true for every spawned test process), so the
//! keyboard-driven scenarios (kill-by-slot, pause/resume) exercise
//! `sshp::pool::Pool` directly instead of going through a pty.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Path to the compiled `sshp` binary, resolved the same way the teacher's
/// harness finds its own binary.
fn binary() -> PathBuf {
    let mut p = std::env::current_exe().expect("current exe");
    p.pop();
    if p.ends_with("deps") {
        p.pop();
    }
    p.push("sshp");
    if cfg!(windows) {
        p.set_extension("exe");
    }
    p
}

/// Write a fake `ssh` into `dir` that strips leading `-o KEY=VAL` / other
/// flag pairs and the host argument, then execs whatever is left as a
/// local command. `FAKE_SSH_FAIL_HOSTS` (comma-separated) makes the given
/// hosts exit 1 instead of running the command.
fn write_fake_ssh(dir: &Path) {
    let script = r#"#!/usr/bin/env bash
set -u
host=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    -o) shift 2 ;;
    -*) shift ;;
    *) host="$1"; shift; break ;;
  esac
done

if [ -n "${FAKE_SSH_FAIL_HOSTS:-}" ]; then
  IFS=',' read -ra bad <<< "$FAKE_SSH_FAIL_HOSTS"
  for b in "${bad[@]}"; do
    if [ "$b" = "$host" ]; then
      echo "simulated failure on $host" >&2
      exit 1
    fi
  done
fi

exec "$@"
"#;
    let path = dir.join("ssh");
    std::fs::write(&path, script).expect("write fake ssh");
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
    }
    std::fs::set_permissions(&path, perms).unwrap();
}

struct Harness {
    _fake_ssh_dir: tempfile::TempDir,
    log_root: tempfile::TempDir,
    path_env: std::ffi::OsString,
}

impl Harness {
    fn new() -> Self {
        let fake_ssh_dir = tempfile::tempdir().expect("fake ssh dir");
        write_fake_ssh(fake_ssh_dir.path());
        let log_root = tempfile::tempdir().expect("log root");

        let existing = std::env::var_os("PATH").unwrap_or_default();
        let mut path_env = std::ffi::OsString::from(fake_ssh_dir.path());
        path_env.push(":");
        path_env.push(existing);

        Harness {
            _fake_ssh_dir: fake_ssh_dir,
            log_root,
            path_env,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(binary());
        cmd.env("PATH", &self.path_env);
        cmd.env_remove("SSHP_OPTS");
        cmd.env_remove("SSHP_DOMAINS");
        cmd.arg("-o").arg(self.log_root.path());
        cmd
    }

    fn latest_run_dir(&self) -> PathBuf {
        std::fs::canonicalize(self.log_root.path().join("latest")).expect("latest symlink")
    }

    fn status(&self, name: &str) -> String {
        std::fs::read_to_string(self.latest_run_dir().join(format!("{name}.status")))
            .unwrap_or_default()
    }
}

#[test]
fn s1_all_hosts_succeed() {
    let h = Harness::new();
    let output = h
        .command()
        .args(["h1", "h2", "h3", "--", "echo", "ok"])
        .output()
        .expect("run sshp");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(h.status("success").lines().count(), 3);
    assert_eq!(h.status("failed"), "");

    let h1_log = std::fs::read_to_string(h.latest_run_dir().join("h1.out")).unwrap();
    assert!(h1_log.contains("ok"));
    assert!(h1_log.contains("# host=h1"));
    assert!(h1_log.contains("state=success"));
}

#[test]
fn s2_mixed_success_and_failure() {
    let h = Harness::new();
    let output = h
        .command()
        .env("FAKE_SSH_FAIL_HOSTS", "h2")
        .args(["h1", "h2", "h3", "--", "echo", "ok"])
        .output()
        .expect("run sshp");

    assert!(!output.status.success());
    assert_eq!(h.status("success").lines().count(), 2);
    assert_eq!(h.status("failed").lines().collect::<Vec<_>>(), vec!["h2"]);
}

#[test]
fn s3_timeout_kills_slow_host() {
    let h = Harness::new();
    let output = h
        .command()
        .args(["-t", "1", "h1", "--", "sleep", "5"])
        .output()
        .expect("run sshp");

    assert!(!output.status.success());
    assert_eq!(h.status("timeout").lines().collect::<Vec<_>>(), vec!["h1"]);
}

#[test]
fn s6_sigint_aborts_remaining_queue() {
    let h = Harness::new();
    let mut child = h
        .command()
        .args([
            "-p", "1", "-d", "0", "h1", "h2", "h3", "h4", "h5", "--", "sleep", "3",
        ])
        .spawn()
        .expect("spawn sshp");

    std::thread::sleep(Duration::from_millis(300));
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGINT);
    }
    let status = child.wait().expect("wait sshp");
    assert!(!status.success());

    let aborted = h.status("aborted");
    assert!(!aborted.is_empty(), "expected at least one aborted host");
}

#[test]
fn log_query_reads_hosts_list() {
    let h = Harness::new();
    h.command()
        .args(["h1", "h2", "--", "echo", "ok"])
        .output()
        .expect("run sshp");

    let output = h
        .command()
        .args(["-L", "hosts.list"])
        .output()
        .expect("run sshp -L");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("h1"));
    assert!(stdout.contains("h2"));
}

#[test]
fn hosts_file_is_merged_with_positional_hosts() {
    let h = Harness::new();
    let mut hosts_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(hosts_file, "h2\n# comment\n\nh3").unwrap();

    let output = h
        .command()
        .args(["h1", "--hosts-file"])
        .arg(hosts_file.path())
        .args(["--", "echo", "ok"])
        .output()
        .expect("run sshp");

    assert!(output.status.success());
    assert_eq!(h.status("success").lines().count(), 3);
}

/// Direct `Pool` API tests for the keyboard-driven scenarios that the
/// control plane only reaches over a real TTY.
mod pool_api {
    use sshp::job::{Job, JobState};
    use sshp::pool::Pool;
    use std::time::Duration;

    #[test]
    fn s4_kill_request_is_observed_by_owning_slot() {
        let jobs = vec![Job::new("h1".into(), vec!["sleep".into(), "5".into()], None, 1)];
        let pool = Pool::new(jobs, 1);
        let idx = pool.claim_next(0).expect("claim job");
        assert!(!pool.kill_requested(0));
        pool.request_kill(0);
        assert!(pool.kill_requested(0));
        pool.with_job_mut(idx, |j| j.finish(JobState::Killed, None));
        assert_eq!(pool.snapshot_job(idx).state, JobState::Killed);
    }

    #[test]
    fn s5_pause_blocks_claims_until_resume() {
        let jobs = vec![
            Job::new("h1".into(), vec!["true".into()], None, 1),
            Job::new("h2".into(), vec!["true".into()], None, 1),
        ];
        let pool = Pool::new(jobs, 1);
        pool.pause();
        assert!(pool.is_paused());

        let blocked_pool = std::sync::Arc::clone(&pool);
        let handle = std::thread::spawn(move || blocked_pool.claim_next(0));

        std::thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished(), "claim_next should block while paused");

        pool.resume();
        let claimed = handle.join().unwrap();
        assert!(claimed.is_some());
    }

    #[test]
    fn abort_drains_queue_to_aborted_without_spawning() {
        let jobs = vec![
            Job::new("h1".into(), vec!["true".into()], None, 1),
            Job::new("h2".into(), vec!["true".into()], None, 1),
        ];
        let pool = Pool::new(jobs, 1);
        pool.abort();
        assert!(pool.claim_next(0).is_none());

        let jobs = pool.all_jobs();
        assert!(jobs.iter().all(|j| j.state == JobState::Aborted));
    }
}
