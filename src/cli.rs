//! Command-line interface definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use forkq::IdlePolicy;
use std::path::PathBuf;
use tracing::Level;

/// Run job payloads across a pool of reusable worker processes.
#[derive(Parser, Debug)]
#[command(name = "forkq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run jobs through a pool of worker processes.
    Run(RunArgs),

    /// Reference worker that echoes each payload back (used by tests).
    #[command(hide = true)]
    DemoWorker(DemoWorkerArgs),
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Number of worker processes (default: available CPUs).
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Attempts per job before it is reported failed.
    #[arg(long)]
    pub failure_threshold: Option<u32>,

    /// What idle workers do when the queue is empty.
    #[arg(long, value_enum)]
    pub idle_policy: Option<IdlePolicyArg>,

    /// Kill a worker whose job runs longer than this many milliseconds.
    #[arg(long)]
    pub job_timeout_ms: Option<u64>,

    /// File with one payload per line (default: stdin).
    #[arg(short, long)]
    pub jobs: Option<PathBuf>,

    /// Worker program and its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Arguments for the demo worker.
#[derive(Parser, Debug)]
pub struct DemoWorkerArgs {
    /// Crash (exit 3) when given this payload. May be repeated.
    #[arg(long = "crash-on")]
    pub crash_on: Vec<String>,

    /// Crash only on the first attempt, recording attempts in this directory.
    #[arg(long)]
    pub crash_once_dir: Option<PathBuf>,

    /// Sleep this long before replying.
    #[arg(long, default_value_t = 0)]
    pub sleep_ms: u64,

    /// Complete jobs from a background thread.
    #[arg(long)]
    pub async_handler: bool,
}

/// Idle policy for CLI arguments.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum IdlePolicyArg {
    /// Keep idle workers alive until more work arrives.
    Park,
    /// Let idle workers exit.
    Kill,
}

impl From<IdlePolicyArg> for IdlePolicy {
    fn from(arg: IdlePolicyArg) -> Self {
        match arg {
            IdlePolicyArg::Park => IdlePolicy::Park,
            IdlePolicyArg::Kill => IdlePolicy::Kill,
        }
    }
}

/// Verbosity level for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// -q: errors only.
    Quiet,
    /// Default: warnings and errors.
    Normal,
    /// -v: include pool lifecycle info.
    Info,
    /// -vv: include per-worker debug info.
    Debug,
}

impl From<u8> for Verbosity {
    fn from(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Info,
            _ => Verbosity::Debug,
        }
    }
}

impl Verbosity {
    pub fn level(self) -> Level {
        match self {
            Verbosity::Quiet => Level::ERROR,
            Verbosity::Normal => Level::WARN,
            Verbosity::Info => Level::INFO,
            Verbosity::Debug => Level::DEBUG,
        }
    }
}

impl Cli {
    /// Get the verbosity level based on -v and -q flags.
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::from(self.verbose)
        }
    }
}
