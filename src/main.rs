//! forkq - run jobs across a pool of reusable worker processes

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use forkq::logging::{self, LogConfig, LogFormat};
use forkq::{ForkPool, Handler, PoolConfig, WorkerEntry, register_handler};
use owo_colors::{OwoColorize, Stream::Stderr};
use serde_json::{Value, json};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

use cli::{Cli, Commands, DemoWorkerArgs, RunArgs};

/// Exit code when at least one job failed permanently.
const EXIT_JOBS_FAILED: i32 = 2;
/// Exit code after Ctrl+C.
const EXIT_INTERRUPTED: i32 = 130;
/// Exit code the demo worker uses to simulate a crash.
const DEMO_CRASH_CODE: i32 = 3;

fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args),
        Commands::DemoWorker(args) => cmd_demo_worker(args),
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!(
                "{}: {}",
                "error"
                    .if_supports_color(Stderr, |text| text.red())
                    .if_supports_color(Stderr, |text| text.bold()),
                e
            );
            // Print the error chain if there are causes
            for cause in e.chain().skip(1) {
                eprintln!(
                    "  {}: {}",
                    "caused by".if_supports_color(Stderr, |text| text.yellow()),
                    cause
                );
            }
            std::process::exit(1);
        }
    }
}

/// Set up supervisor logging. `-v`/`-q` win over environment variables.
fn init_logging(cli: &Cli) {
    let level = cli.verbosity().level();
    let mut config = LogConfig::default()
        .with_level(level)
        .with_format(LogFormat::Compact);
    if cli.verbose > 0 || cli.quiet {
        config = config.with_filter(level.to_string().to_lowercase());
    }
    logging::init(config.with_env_overrides());
}

/// Run every payload through the pool, printing events as JSON lines.
///
/// Returns the process exit code: 0 when all jobs completed, 2 when any job
/// failed, 130 when interrupted.
fn cmd_run(cli: &Cli, args: &RunArgs) -> Result<i32> {
    init_logging(cli);

    let payloads = match &args.jobs {
        Some(path) => read_payloads_from_file(path)?,
        None => read_payloads(io::stdin().lock()).context("Failed to read jobs from stdin")?,
    };
    if payloads.is_empty() {
        if !cli.quiet {
            eprintln!("No jobs to run");
        }
        return Ok(0);
    }

    let config = pool_config(args);
    let (program, rest) = args
        .command
        .split_first()
        .context("No worker command given")?;
    let entry = WorkerEntry::new(program).args(rest);

    let pool = ForkPool::new(entry, config).context("Failed to create pool")?;
    for payload in &payloads {
        pool.add_job(payload)?;
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, stopping workers...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    pool.start()
        .with_context(|| format!("Failed to start workers for '{}'", program))?;
    info!(jobs = payloads.len(), "Pool started");

    let mut stdout = io::stdout().lock();
    let mut failed = 0usize;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            pool.stop();
            return Ok(EXIT_INTERRUPTED);
        }
        match pool.events().recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                writeln!(stdout, "{}", event.to_line())?;
                stdout.flush()?;
                if event.job_outcome() == Some(false) {
                    failed += 1;
                }
                if event.is_drained() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                anyhow::bail!("Supervisor exited before all jobs ended")
            }
        }
    }

    let stats = pool.stats()?;
    pool.stop();
    info!(
        done = stats.done_count,
        failed = stats.failed_count,
        restarts = stats.restarts,
        "All jobs ended"
    );

    Ok(if failed > 0 { EXIT_JOBS_FAILED } else { 0 })
}

/// Environment overrides first, then command-line flags.
fn pool_config(args: &RunArgs) -> PoolConfig {
    let mut config = PoolConfig::default().with_env_overrides();
    if let Some(workers) = args.workers {
        config = config.with_pool_size(workers);
    }
    if let Some(threshold) = args.failure_threshold {
        config = config.with_failure_threshold(threshold);
    }
    if let Some(policy) = args.idle_policy {
        config = config.with_idle_policy(policy.into());
    }
    match args.job_timeout_ms {
        Some(0) => config.job_timeout = None,
        Some(ms) => config = config.with_job_timeout(Duration::from_millis(ms)),
        None => {}
    }
    config
}

fn read_payloads_from_file(path: &Path) -> Result<Vec<Value>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open jobs file: {}", path.display()))?;
    read_payloads(BufReader::new(file))
        .with_context(|| format!("Failed to read jobs file: {}", path.display()))
}

/// One payload per line: JSON when it parses, otherwise the raw string.
fn read_payloads(reader: impl BufRead) -> io::Result<Vec<Value>> {
    let mut payloads = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        payloads.push(
            serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())),
        );
    }
    Ok(payloads)
}

/// Decides which payloads make the demo worker crash.
#[derive(Debug, Clone)]
struct CrashPlan {
    crash_on: Vec<String>,
    /// Marker directory; when set, each payload crashes only once.
    once_dir: Option<PathBuf>,
}

impl CrashPlan {
    fn should_crash(&self, payload: &Value) -> bool {
        let key = payload_key(payload);
        if !self.crash_on.contains(&key) {
            return false;
        }
        let Some(dir) = &self.once_dir else {
            return true;
        };

        let marker = dir.join(format!("{}.attempted", sanitize(&key)));
        if marker.exists() {
            return false;
        }
        if let Err(e) = std::fs::write(&marker, b"") {
            tracing::warn!(path = %marker.display(), error = %e, "Failed to write crash marker");
        }
        true
    }
}

fn payload_key(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Reference worker: replies `{"echo": payload}` for every job.
fn cmd_demo_worker(args: &DemoWorkerArgs) -> Result<i32> {
    logging::init(LogConfig::for_worker().with_env_overrides());

    let plan = CrashPlan {
        crash_on: args.crash_on.clone(),
        once_dir: args.crash_once_dir.clone(),
    };
    let delay = Duration::from_millis(args.sleep_ms);

    let handler = if args.async_handler {
        Handler::asynchronous(move |payload, completion| {
            let crash = plan.should_crash(&payload);
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                if crash {
                    std::process::exit(DEMO_CRASH_CODE);
                }
                if let Err(e) = completion.outbox().send(&json!({ "echo": payload })) {
                    eprintln!("demo-worker: failed to send reply: {}", e);
                }
                completion.done();
            });
        })
    } else {
        Handler::sync(move |payload, outbox| {
            std::thread::sleep(delay);
            if plan.should_crash(&payload) {
                std::process::exit(DEMO_CRASH_CODE);
            }
            outbox.send(&json!({ "echo": payload }))?;
            Ok(())
        })
    };

    register_handler(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_payloads_mixes_json_and_strings() {
        let input = "1\n\n{\"n\": 2}\nhello world\n  \n\"quoted\"\n";
        let payloads = read_payloads(input.as_bytes()).unwrap();
        assert_eq!(
            payloads,
            vec![json!(1), json!({"n": 2}), json!("hello world"), json!("quoted")]
        );
    }

    #[test]
    fn test_crash_plan_always() {
        let plan = CrashPlan {
            crash_on: vec!["2".into(), "boom".into()],
            once_dir: None,
        };
        assert!(plan.should_crash(&json!(2)));
        assert!(plan.should_crash(&json!(2)));
        assert!(plan.should_crash(&json!("boom")));
        assert!(!plan.should_crash(&json!(3)));
    }

    #[test]
    fn test_crash_plan_once() {
        let dir = TempDir::new().unwrap();
        let plan = CrashPlan {
            crash_on: vec!["a/b".into()],
            once_dir: Some(dir.path().to_path_buf()),
        };
        assert!(plan.should_crash(&json!("a/b")));
        assert!(!plan.should_crash(&json!("a/b")));
        assert!(dir.path().join("a_b.attempted").exists());
    }

    #[test]
    fn test_pool_config_flags_override() {
        let args = RunArgs {
            workers: Some(2),
            failure_threshold: Some(1),
            idle_policy: Some(cli::IdlePolicyArg::Kill),
            job_timeout_ms: Some(250),
            jobs: None,
            command: vec!["worker".into()],
        };
        let config = pool_config(&args);
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.failure_threshold, 1);
        assert_eq!(config.idle_policy, forkq::IdlePolicy::Kill);
        assert_eq!(config.job_timeout, Some(Duration::from_millis(250)));
    }
}
