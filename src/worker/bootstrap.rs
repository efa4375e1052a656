//! Worker-side request/execute/report loop.
//!
//! A worker process calls [`register_handler`] as its first action. From
//! then on stdin and stdout belong to the protocol. Handlers must log to
//! stderr; anything printed to stdout would reach the supervisor as a job
//! message.

use super::ipc::{LineReader, LineWriter};
use super::protocol::{SupervisorMessage, WorkerControl};
use crossbeam_channel::{Sender, bounded};
use serde::Serialize;
use std::io;
use std::os::fd::AsFd;
use std::sync::{Arc, Mutex};

/// Error type handlers may return. Any error fails the job.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type SyncFn = Box<dyn FnMut(serde_json::Value, &Outbox) -> Result<(), HandlerError>>;
type AsyncFn = Box<dyn FnMut(serde_json::Value, Completion)>;

/// Write side of the protocol channel, shareable across threads.
#[derive(Clone)]
pub struct Outbox {
    writer: Arc<Mutex<LineWriter>>,
}

impl Outbox {
    pub fn new(writer: LineWriter) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Send an application message. The supervisor reports it as a
    /// `JobMessage` event without interpreting it.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> io::Result<()> {
        let line = serde_json::to_string(message)?;
        self.write_line(&line)
    }

    fn control(&self, control: WorkerControl) -> io::Result<()> {
        self.write_line(&control.to_line())
    }

    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::other("outbox writer poisoned"))?;
        writer.write_line(line)
    }
}

/// Completion token handed to asynchronous handlers.
///
/// The worker asks for its next job only after [`Completion::done`]. Dropping
/// the token without calling it fails the job.
pub struct Completion {
    outbox: Outbox,
    done: Sender<()>,
}

impl Completion {
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn done(self) {
        let _ = self.done.send(());
    }
}

/// A job handler and its completion mode.
pub enum Handler {
    /// The job is finished when the closure returns `Ok`.
    Sync(SyncFn),
    /// The job is finished when the closure's [`Completion`] is signalled.
    Async(AsyncFn),
}

impl Handler {
    pub fn sync<F>(handler: F) -> Self
    where
        F: FnMut(serde_json::Value, &Outbox) -> Result<(), HandlerError> + 'static,
    {
        Self::Sync(Box::new(handler))
    }

    pub fn asynchronous<F>(handler: F) -> Self
    where
        F: FnMut(serde_json::Value, Completion) + 'static,
    {
        Self::Async(Box::new(handler))
    }
}

/// Run the worker protocol until the supervisor says exit or closes stdin.
///
/// Returns an error when a job fails, so the process can exit non-zero and
/// the supervisor retries the job.
pub fn serve(reader: &mut LineReader, outbox: &Outbox, handler: &mut Handler) -> io::Result<()> {
    outbox.control(WorkerControl::RequestingWork)?;

    loop {
        let line = match reader.read_line()? {
            Some(line) => line.into_owned(),
            None => return Ok(()),
        };
        if line.trim().is_empty() {
            continue;
        }

        let (job_id, payload) = match SupervisorMessage::from_line(&line) {
            Ok(SupervisorMessage::AssignWork { job_id, payload }) => (job_id, payload),
            Ok(SupervisorMessage::Exit) => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unparseable supervisor message");
                continue;
            }
        };
        tracing::trace!(job_id = %job_id, "Received job");

        match handler {
            Handler::Sync(run) => {
                run(payload, outbox)
                    .map_err(|e| io::Error::other(format!("job {} failed: {}", job_id, e)))?;
            }
            Handler::Async(run) => {
                let (done_tx, done_rx) = bounded(1);
                run(
                    payload,
                    Completion {
                        outbox: outbox.clone(),
                        done: done_tx,
                    },
                );
                done_rx.recv().map_err(|_| {
                    io::Error::other(format!("job {} dropped its completion", job_id))
                })?;
            }
        }

        outbox.control(WorkerControl::RequestingMoreWork)?;
    }
}

/// Take over stdin/stdout and serve jobs with `handler`, then exit.
///
/// Exits 0 when the supervisor retires the worker or goes away, and 1 when a
/// job fails.
pub fn register_handler(mut handler: Handler) -> ! {
    // Pipe errors are handled as io::Error
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    let (stdin_fd, stdout_fd) = match (
        io::stdin().as_fd().try_clone_to_owned(),
        io::stdout().as_fd().try_clone_to_owned(),
    ) {
        (Ok(stdin_fd), Ok(stdout_fd)) => (stdin_fd, stdout_fd),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Worker error: cannot take over stdio: {}", e);
            std::process::exit(1);
        }
    };

    let mut reader = LineReader::new(stdin_fd);
    let outbox = Outbox::new(LineWriter::new(stdout_fd));

    match serve(&mut reader, &outbox, &mut handler) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "Worker exiting after failure");
            eprintln!("Worker error: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Job, JobId};
    use crate::worker::protocol::WorkerMessage;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Supervisor end of a worker running `serve` on a background thread.
    struct Harness {
        to_worker: LineWriter,
        from_worker: LineReader,
        worker: thread::JoinHandle<io::Result<()>>,
    }

    impl Harness {
        fn start(mut handler_factory: impl FnMut() -> Handler + Send + 'static) -> Self {
            let (down_r, down_w) = io::pipe().unwrap();
            let (up_r, up_w) = io::pipe().unwrap();
            let worker = thread::spawn(move || {
                let mut reader = LineReader::new(down_r);
                let outbox = Outbox::new(LineWriter::new(up_w));
                let mut handler = handler_factory();
                serve(&mut reader, &outbox, &mut handler)
            });
            Self {
                to_worker: LineWriter::new(down_w),
                from_worker: LineReader::new(up_r),
                worker,
            }
        }

        fn assign(&mut self, id: u64, payload: serde_json::Value) {
            let job = Job::new(JobId(id), payload);
            self.to_worker
                .write_line(&SupervisorMessage::assign(&job).to_line())
                .unwrap();
        }

        fn next(&mut self) -> Option<WorkerMessage> {
            self.from_worker
                .read_line()
                .unwrap()
                .map(|line| WorkerMessage::from_line(&line))
        }
    }

    fn control(c: WorkerControl) -> Option<WorkerMessage> {
        Some(WorkerMessage::Control(c))
    }

    #[test]
    fn test_sync_handler_protocol() {
        let mut h = Harness::start(|| {
            Handler::sync(|payload, outbox| {
                outbox.send(&json!({"echo": payload}))?;
                Ok(())
            })
        });

        assert_eq!(h.next(), control(WorkerControl::RequestingWork));
        h.assign(1, json!(41));
        assert_eq!(h.next(), Some(WorkerMessage::Other(json!({"echo": 41}))));
        assert_eq!(h.next(), control(WorkerControl::RequestingMoreWork));

        h.to_worker
            .write_line(&SupervisorMessage::Exit.to_line())
            .unwrap();
        assert!(h.worker.join().unwrap().is_ok());
    }

    #[test]
    fn test_eof_ends_worker_cleanly() {
        let h = Harness::start(|| Handler::sync(|_, _| Ok(())));
        let Harness {
            to_worker,
            mut from_worker,
            worker,
        } = h;
        assert_eq!(
            from_worker
                .read_line()
                .unwrap()
                .map(|line| WorkerMessage::from_line(&line)),
            control(WorkerControl::RequestingWork)
        );
        drop(to_worker);
        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn test_handler_error_fails_worker() {
        let mut h = Harness::start(|| Handler::sync(|_, _| Err("boom".into())));
        assert_eq!(h.next(), control(WorkerControl::RequestingWork));
        h.assign(7, json!(null));

        let err = h.worker.join().unwrap().unwrap_err();
        assert!(err.to_string().contains("job 7 failed: boom"));
    }

    #[test]
    fn test_async_handler_keeps_one_job_in_flight() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (flight, max) = (in_flight.clone(), max_seen.clone());

        let mut h = Harness::start(move || {
            let (flight, max) = (flight.clone(), max.clone());
            Handler::asynchronous(move |_payload, completion| {
                let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                let flight = flight.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(20));
                    flight.fetch_sub(1, Ordering::SeqCst);
                    completion.done();
                });
            })
        });

        assert_eq!(h.next(), control(WorkerControl::RequestingWork));
        // Both assignments are queued in the pipe before the first completes
        h.assign(1, json!(1));
        h.assign(2, json!(2));
        assert_eq!(h.next(), control(WorkerControl::RequestingMoreWork));
        assert_eq!(h.next(), control(WorkerControl::RequestingMoreWork));
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);

        drop(h.to_worker);
        assert!(h.worker.join().unwrap().is_ok());
    }

    #[test]
    fn test_dropped_completion_fails_job() {
        let mut h = Harness::start(|| Handler::asynchronous(|_, completion| drop(completion)));
        assert_eq!(h.next(), control(WorkerControl::RequestingWork));
        h.assign(3, json!("x"));

        let err = h.worker.join().unwrap().unwrap_err();
        assert!(err.to_string().contains("dropped its completion"));
    }

    #[test]
    fn test_garbage_input_is_ignored() {
        let mut h = Harness::start(|| Handler::sync(|_, _| Ok(())));
        assert_eq!(h.next(), control(WorkerControl::RequestingWork));
        h.to_worker.write_line("not a message").unwrap();
        h.assign(1, json!(1));
        assert_eq!(h.next(), control(WorkerControl::RequestingMoreWork));
        drop(h.to_worker);
        assert!(h.worker.join().unwrap().is_ok());
    }
}
