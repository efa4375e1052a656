//! Worker subprocess spawning and exit watching.

use super::ipc::{LineReader, LineWriter};
use super::proc::Proc;
use super::protocol::WorkerMessage;
use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{PoolError, Result};
use crate::waiting::WorkerId;
use crossbeam_channel::Sender;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Stack size for watcher threads. They only shuttle lines.
const WATCHER_STACK_SIZE: usize = 512 * 1024;

/// The program a pool launches for each worker.
///
/// The worker role is explicit: include whatever argument or subcommand
/// makes the program call [`super::register_handler`].
#[derive(Debug, Clone)]
pub struct WorkerEntry {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub envs: Vec<(OsString, OsString)>,
}

impl WorkerEntry {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Relaunch the running executable, typically with a worker subcommand.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| PoolError::Worker(format!("Failed to get current executable: {}", e)))?;
        Ok(Self::new(exe))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.envs.iter().map(|(k, v)| (k, v)));
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit()); // Worker logs go to parent's stderr
        // Terminal signals such as Ctrl-C reach the supervisor only
        cmd.process_group(0);
        cmd
    }
}

/// What a watcher thread reports about its worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerSignal {
    Message(WorkerMessage),
    Exited(TerminationReason),
}

/// A signal tagged with the worker it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEvent {
    pub worker: WorkerId,
    pub signal: WorkerSignal,
}

/// Spawn a worker subprocess and the thread that watches it.
///
/// Every line the worker writes is forwarded on `signals` before its exit,
/// because one thread reads stdout to EOF and only then waits for the exit.
pub fn spawn_worker(
    entry: &WorkerEntry,
    id: WorkerId,
    signals: Sender<WorkerEvent>,
) -> Result<Proc> {
    let mut child = entry.command().spawn().map_err(|source| PoolError::Spawn {
        program: entry.program.clone(),
        source,
    })?;
    let pid = Pid::from_raw(child.id() as i32);

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| PoolError::Worker("Child stdin not captured".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PoolError::Worker("Child stdout not captured".into()))?;

    let reader = LineReader::new(stdout);
    let proc = Proc::new(id, pid, LineWriter::new(stdin));

    std::thread::Builder::new()
        .name(format!("forkq-watch-{}", id))
        .stack_size(WATCHER_STACK_SIZE)
        .spawn(move || watch_worker(id, pid, reader, signals))
        .map_err(|e| PoolError::Worker(format!("Failed to spawn watcher for {}: {}", id, e)))?;

    tracing::debug!(worker_id = %id, pid = pid.as_raw(), "Spawned worker");
    Ok(proc)
}

/// Forward stdout lines until EOF, then wait for and report the exit.
fn watch_worker(id: WorkerId, pid: Pid, mut reader: LineReader, signals: Sender<WorkerEvent>) {
    loop {
        let message = match reader.read_line() {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => WorkerMessage::from_line(&line),
            Ok(None) => break,
            Err(e) => {
                // Without its stdout the worker is unusable
                tracing::warn!(worker_id = %id, error = %e, "Failed to read from worker, killing it");
                let _ = signal::kill(pid, Signal::SIGKILL);
                break;
            }
        };
        let event = WorkerEvent {
            worker: id,
            signal: WorkerSignal::Message(message),
        };
        if signals.send(event).is_err() {
            break;
        }
    }

    let reason = match wait_for_exit(pid) {
        Ok(status) => analyze_wait_status(status),
        Err(e) => {
            tracing::warn!(worker_id = %id, error = %e, "Waiting for worker exit failed");
            TerminationReason::Unknown
        }
    };
    tracing::trace!(worker_id = %id, reason = %reason, "Worker exited");

    let _ = signals.send(WorkerEvent {
        worker: id,
        signal: WorkerSignal::Exited(reason),
    });
}

/// Whether [`wait_for_exit`] leaves the child unreaped for [`Proc::reap`].
pub(crate) const WATCHER_KEEPS_ZOMBIE: bool = cfg!(any(target_os = "linux", target_os = "android"));

/// Block until the child exits. On Linux the zombie is kept so its pid stays
/// reserved until the supervisor has released the handle.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn wait_for_exit(pid: Pid) -> nix::Result<WaitStatus> {
    use nix::sys::wait::{Id, WaitPidFlag, waitid};
    loop {
        match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Err(nix::errno::Errno::EINTR) => continue,
            result => return result,
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn wait_for_exit(pid: Pid) -> nix::Result<WaitStatus> {
    use nix::sys::wait::waitpid;
    loop {
        match waitpid(pid, None) {
            Err(nix::errno::Errno::EINTR) => continue,
            result => return result,
        }
    }
}
