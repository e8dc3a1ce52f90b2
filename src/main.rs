use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sshp::{config::Config, driver, resolve};

/// Run a command in parallel across many SSH hosts with a live terminal
/// dashboard, or query the durable logs of a past run.
#[derive(Parser, Debug)]
#[command(name = "sshp", version, about)]
struct Cli {
    /// Hosts to run the command on.
    hosts: Vec<String>,

    /// Command and arguments to run on each host, after `--`.
    #[arg(last = true)]
    command: Vec<String>,

    /// Read additional hosts from this file, one per line.
    #[arg(long)]
    hosts_file: Option<PathBuf>,

    /// Run this local script on each host instead of an inline command.
    #[arg(long, conflicts_with = "command")]
    script: Option<PathBuf>,

    /// Maximum number of hosts to run against concurrently.
    #[arg(short = 'p', long, default_value_t = 32)]
    parallel: usize,

    /// Per-host timeout in seconds; unset means no timeout.
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Seconds to stagger each additional worker's first connection by.
    #[arg(short = 'd', long, default_value_t = 0.3)]
    delay: f64,

    /// Root directory for durable per-run logs.
    #[arg(short = 'o', long)]
    log_root: Option<PathBuf>,

    /// Group this run's logs under a named job sub-directory.
    #[arg(short = 'j', long)]
    job: Option<String>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// How many dot-separated labels to keep when displaying a host name;
    /// -1 keeps the host unchanged.
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    max_dots: i64,

    /// Extra options passed straight through to ssh, after the defaults
    /// from SSHP_OPTS and before the mandatory BatchMode flag. Repeatable.
    #[arg(long = "ssh-opt")]
    ssh_opt: Vec<String>,

    /// Disable the terminal dashboard and interactive control plane;
    /// stream plain log lines to stderr instead.
    #[arg(long)]
    no_tui: bool,

    /// Query a past run's logs instead of starting a new one. Takes one or
    /// more patterns: hosts.list, <host>.out, <status>.status, *.out,
    /// *.status.
    #[arg(short = 'L', long = "logs", num_args = 1.., value_name = "PATTERN")]
    logs: Option<Vec<String>>,

    /// Which run to query with -L; defaults to the most recent.
    #[arg(long, default_value = "latest")]
    run: String,
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    // Suppressed to warn-and-above whenever the TUI owns the terminal, so
    // tracing output never interleaves with the dashboard; full verbosity
    // applies under --no-tui.
    let effective_filter = if cli.no_tui || cli.verbose > 0 {
        filter.to_string()
    } else {
        "warn".to_string()
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_new(&effective_filter).unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    if let Err(err) = run(cli) {
        tracing::error!(error = %err, "sshp failed");
        eprintln!("sshp: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env().context("reading SSHP_* environment")?;
    let log_root = cli
        .log_root
        .clone()
        .unwrap_or_else(default_log_root);

    if let Some(patterns) = cli.logs {
        let scope = match &cli.job {
            Some(job) => log_root.join(job),
            None => log_root.clone(),
        };
        let files = sshp::logstore::resolve_log_query(&scope, &cli.run, &patterns)
            .map_err(|e| anyhow::anyhow!(e))?;
        for f in files {
            let body = std::fs::read_to_string(&f)
                .with_context(|| format!("reading {}", f.display()))?;
            print!("{body}");
        }
        return Ok(());
    }

    if cli.command.is_empty() && cli.script.is_none() {
        anyhow::bail!("either a command after `--` or --script is required");
    }

    let hosts = resolve::resolve_hosts(&cli.hosts, cli.hosts_file.as_deref(), &config.domains)?;
    let script = match &cli.script {
        Some(path) => Some(
            std::fs::read(path)
                .with_context(|| format!("reading script {}", path.display()))?,
        ),
        None => None,
    };

    let req = driver::RunRequest {
        hosts,
        command: cli.command,
        script,
        script_path: cli.script.clone(),
        parallel: cli.parallel,
        timeout: cli.timeout.map(Duration::from_secs),
        delay: Duration::from_secs_f64(cli.delay.max(0.0)),
        log_root,
        job_name: cli.job,
        max_dots: cli.max_dots,
        extra_ssh_opts: cli.ssh_opt,
        no_tui: cli.no_tui || !std::io::IsTerminal::is_terminal(&std::io::stdout()),
    };

    let outcome = driver::execute(req, &config)?;
    tracing::info!(run_dir = %outcome.run_dir.display(), "run complete");
    std::process::exit(outcome.exit_code);
}

fn default_log_root() -> PathBuf {
    let tmp = std::env::var_os("TMPDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    tmp.join("sshp")
}
