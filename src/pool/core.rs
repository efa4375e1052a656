//! Scheduling state machine for a pool of workers.
//!
//! `PoolCore` owns the queue, the waiting list and every worker handle. It
//! is driven one input at a time by the supervisor thread and reaches
//! processes only through a [`Transport`].

use super::PoolStats;
use super::transport::Transport;
use crate::config::{IdlePolicy, PoolConfig};
use crate::error::{PoolError, Result};
use crate::events::{EventSink, PoolEvent};
use crate::queue::{Job, JobQueue};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::waiting::{WaitingList, WorkerId};
use crate::worker::protocol::{WorkerControl, WorkerMessage};
use crate::worker::signals::TerminationReason;
use crate::worker::spawn::{WorkerEvent, WorkerSignal};
use crate::worker::watchdog::JobWatchdog;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error, trace, warn};

/// Supervisor bookkeeping for one live worker.
#[derive(Debug, Default)]
struct WorkerHandle {
    /// The job in flight, kept for crash attribution.
    job: Option<Job>,
    /// Told to exit; its exit is not a crash.
    retiring: bool,
    jobs_completed: u64,
}

/// A worker terminated by `stop()` that has not exited yet.
#[derive(Debug)]
struct Stopping {
    kill_at: Instant,
    killed: bool,
}

pub(crate) struct PoolCore<T: Transport> {
    config: PoolConfig,
    retry: RetryPolicy,
    transport: T,
    events: EventSink,
    queue: JobQueue,
    waiting: WaitingList,
    workers: BTreeMap<WorkerId, WorkerHandle>,
    /// Still holding a pool slot until their exit is seen.
    stopping: BTreeMap<WorkerId, Stopping>,
    watchdog: Option<JobWatchdog>,
    next_worker_id: u64,
    running: bool,
    done_count: u64,
    failed_count: u64,
    abandoned_count: u64,
    restarts: u64,
    /// A job completed or failed since the last drain event.
    settled_since_drain: bool,
}

impl<T: Transport> PoolCore<T> {
    pub fn new(config: PoolConfig, transport: T, events: EventSink) -> Self {
        Self {
            retry: RetryPolicy::new(config.failure_threshold),
            watchdog: config.job_timeout.map(JobWatchdog::new),
            config,
            transport,
            events,
            queue: JobQueue::new(),
            waiting: WaitingList::new(),
            workers: BTreeMap::new(),
            stopping: BTreeMap::new(),
            next_worker_id: 1,
            running: false,
            done_count: 0,
            failed_count: 0,
            abandoned_count: 0,
            restarts: 0,
            settled_since_drain: false,
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(PoolError::AlreadyRunning);
        }
        self.running = true;
        self.done_count = 0;
        self.failed_count = 0;
        self.settled_since_drain = false;

        let target = match self.config.idle_policy {
            IdlePolicy::Park => self.free_slots(),
            IdlePolicy::Kill => self.free_slots().min(self.queue.len()),
        };

        let mut launched = 0;
        let mut last_error = None;
        for _ in 0..target {
            match self.launch_worker() {
                Ok(_) => launched += 1,
                Err(e) => {
                    error!(error = %e, "Failed to launch worker");
                    last_error = Some(e);
                }
            }
        }

        if launched == 0
            && let Some(e) = last_error
        {
            self.running = false;
            return Err(e);
        }

        debug!(
            workers = launched,
            stopping = self.stopping.len(),
            queued = self.queue.len(),
            policy = %self.config.idle_policy,
            "Pool started"
        );
        Ok(())
    }

    pub fn add_job(&mut self, job: Job) {
        if self.running
            && let Some(worker) = self.waiting.pop_longest_waiting()
        {
            self.dispatch(worker, job);
            return;
        }

        trace!(job_id = %job.id, "Queued job");
        self.queue.enqueue(job);

        if self.running
            && self.free_slots() > 0
            && let Err(e) = self.launch_worker()
        {
            error!(error = %e, "Failed to launch worker for new job");
        }
    }

    /// Stop the pool. Jobs in flight are abandoned, queued jobs are kept.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        let kill_at = Instant::now() + self.config.stop_grace;
        for (id, handle) in &self.workers {
            if let Some(job) = &handle.job {
                self.abandoned_count += 1;
                warn!(worker_id = %id, job_id = %job.id, "Abandoning in-flight job");
            }
            self.transport.terminate(*id);
            self.stopping.insert(
                *id,
                Stopping {
                    kill_at,
                    killed: false,
                },
            );
        }

        debug!(
            workers = self.workers.len(),
            queued = self.queue.len(),
            "Pool stopped"
        );
        self.workers.clear();
        self.waiting.clear();
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.clear();
        }
    }

    pub fn on_worker_event(&mut self, event: WorkerEvent) {
        match event.signal {
            WorkerSignal::Message(message) => self.on_message(event.worker, message),
            WorkerSignal::Exited(reason) => self.on_exit(event.worker, reason),
        }
    }

    fn on_message(&mut self, id: WorkerId, message: WorkerMessage) {
        let Some(handle) = self.workers.get_mut(&id) else {
            trace!(worker_id = %id, "Ignoring message from unknown worker");
            return;
        };

        match message {
            WorkerMessage::Control(_) if handle.retiring => {
                trace!(worker_id = %id, "Ignoring request from retiring worker");
            }
            WorkerMessage::Control(WorkerControl::RequestingWork) => {
                if let Some(job) = handle.job.take() {
                    warn!(
                        worker_id = %id,
                        job_id = %job.id,
                        "Worker asked for work while holding a job; requeueing it"
                    );
                    if let Some(watchdog) = self.watchdog.as_mut() {
                        watchdog.disarm(id);
                    }
                    self.queue.enqueue(job);
                }
                self.assign(id);
            }
            WorkerMessage::Control(WorkerControl::RequestingMoreWork) => {
                match handle.job.take() {
                    Some(job) => {
                        handle.jobs_completed += 1;
                        self.done_count += 1;
                        self.settled_since_drain = true;
                        if let Some(watchdog) = self.watchdog.as_mut() {
                            watchdog.disarm(id);
                        }
                        debug!(worker_id = %id, job_id = %job.id, "Job completed");
                        self.events.emit(PoolEvent::JobEnded {
                            done_count: self.done_count,
                            failed_count: self.failed_count,
                            job,
                            success: true,
                        });
                    }
                    None => {
                        warn!(worker_id = %id, "Worker reported a completion without a job");
                    }
                }
                self.assign(id);
            }
            WorkerMessage::Other(message) => {
                self.events.emit(PoolEvent::JobMessage {
                    worker: id,
                    message,
                    done_count: self.done_count,
                });
            }
        }
    }

    fn on_exit(&mut self, id: WorkerId, reason: TerminationReason) {
        self.transport.release(id);
        if self.stopping.remove(&id).is_some() {
            debug!(worker_id = %id, reason = %reason, "Stopped worker exited");
            if self.running {
                self.top_up();
            }
            return;
        }
        if !self.running {
            return;
        }
        let Some(handle) = self.workers.remove(&id) else {
            return;
        };
        self.waiting.remove(id);
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.disarm(id);
        }

        if handle.retiring && handle.job.is_none() {
            debug!(worker_id = %id, reason = %reason, "Retired worker exited");
        } else {
            warn!(
                worker_id = %id,
                reason = %reason,
                job_id = ?handle.job.as_ref().map(|j| j.id.0),
                jobs_completed = handle.jobs_completed,
                "Worker died"
            );
            self.events.emit(PoolEvent::WorkerDied {
                worker: id,
                reason,
                exit_code: reason.exit_code(),
                done_count: self.done_count,
                job: handle.job.clone(),
            });
        }

        if let Some(mut job) = handle.job {
            match self.retry.on_crash(&mut job) {
                RetryDecision::Requeue => {
                    warn!(
                        job_id = %job.id,
                        failure_count = job.failure_count,
                        "Requeueing crashed job"
                    );
                    self.queue.enqueue(job);
                    self.feed_parked();
                }
                RetryDecision::GiveUp => {
                    self.failed_count += 1;
                    self.settled_since_drain = true;
                    warn!(
                        job_id = %job.id,
                        failure_count = job.failure_count,
                        "Job failed permanently"
                    );
                    self.events.emit(PoolEvent::JobEnded {
                        done_count: self.done_count,
                        failed_count: self.failed_count,
                        job,
                        success: false,
                    });
                }
            }
        }

        if let Some(new_id) = self.top_up() {
            self.restarts += 1;
            debug!(worker_id = %new_id, replaces = %id, "Launched replacement worker");
        }

        self.check_drained();
    }

    /// Kill stopped workers past their grace period and workers whose job
    /// has overrun its deadline.
    pub fn on_tick(&mut self, now: Instant) {
        for (id, stopping) in self.stopping.iter_mut() {
            if stopping.killed || now < stopping.kill_at {
                continue;
            }
            stopping.killed = true;
            warn!(
                worker_id = %id,
                grace_ms = self.config.stop_grace.as_millis() as u64,
                "Stopped worker still running, killing it"
            );
            self.transport.kill(*id);
        }

        let Some(watchdog) = self.watchdog.as_mut() else {
            return;
        };
        for (id, job_id) in watchdog.expired(now) {
            warn!(
                worker_id = %id,
                job_id = %job_id,
                timeout_ms = watchdog.timeout().as_millis() as u64,
                "Job timed out, killing worker"
            );
            self.transport.kill(id);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            running: self.running,
            live_workers: self.workers.len(),
            stopping_workers: self.stopping.len(),
            parked_workers: self.waiting.len(),
            queued_jobs: self.queue.len(),
            in_flight_jobs: self.workers.values().filter(|h| h.job.is_some()).count(),
            done_count: self.done_count,
            failed_count: self.failed_count,
            abandoned_count: self.abandoned_count,
            restarts: self.restarts,
        }
    }

    /// Give `id` the next queued job, or apply the idle policy.
    fn assign(&mut self, id: WorkerId) {
        self.waiting.remove(id);
        if let Some(job) = self.queue.dequeue() {
            self.dispatch(id, job);
            return;
        }

        match self.config.idle_policy {
            IdlePolicy::Park => {
                trace!(worker_id = %id, "Parking idle worker");
                self.waiting.push(id);
            }
            IdlePolicy::Kill => {
                if let Some(handle) = self.workers.get_mut(&id) {
                    handle.retiring = true;
                }
                debug!(worker_id = %id, "Retiring idle worker");
                if let Err(e) = self.transport.retire(id) {
                    warn!(worker_id = %id, error = %e, "Failed to retire worker");
                }
            }
        }
        self.check_drained();
    }

    fn dispatch(&mut self, id: WorkerId, job: Job) {
        let Some(handle) = self.workers.get_mut(&id) else {
            self.queue.enqueue(job);
            return;
        };
        trace!(worker_id = %id, job_id = %job.id, failure_count = job.failure_count, "Dispatching job");
        // On failure the job stays recorded; the worker's exit attributes it
        if let Err(e) = self.transport.assign(id, &job) {
            warn!(worker_id = %id, job_id = %job.id, error = %e, "Failed to send job");
        }
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.arm(id, job.id, Instant::now());
        }
        handle.job = Some(job);
    }

    /// Hand queued jobs to parked workers.
    fn feed_parked(&mut self) {
        while !self.queue.is_empty() {
            let Some(worker) = self.waiting.pop_longest_waiting() else {
                break;
            };
            if let Some(job) = self.queue.dequeue() {
                self.dispatch(worker, job);
            }
        }
    }

    fn check_drained(&mut self) {
        if !self.running || !self.settled_since_drain || !self.queue.is_empty() {
            return;
        }
        if self.workers.values().any(|h| h.job.is_some()) {
            return;
        }
        if self.config.idle_policy == IdlePolicy::Kill && !self.workers.is_empty() {
            return;
        }
        self.settled_since_drain = false;
        debug!(done = self.done_count, failed = self.failed_count, "All jobs ended");
        self.events.emit(PoolEvent::AllJobsEnded {
            done_count: self.done_count,
        });
    }

    /// Pool slots not held by a live or stopping worker.
    fn free_slots(&self) -> usize {
        self.config
            .pool_size
            .saturating_sub(self.workers.len() + self.stopping.len())
    }

    /// Launch one worker into a free slot if the idle policy has use for it.
    fn top_up(&mut self) -> Option<WorkerId> {
        let wanted = self.config.idle_policy == IdlePolicy::Park || !self.queue.is_empty();
        if !wanted || self.free_slots() == 0 {
            return None;
        }
        match self.launch_worker() {
            Ok(id) => Some(id),
            Err(e) => {
                error!(error = %e, "Failed to launch worker");
                None
            }
        }
    }

    fn launch_worker(&mut self) -> Result<WorkerId> {
        let id = WorkerId(self.next_worker_id);
        self.next_worker_id += 1;
        self.transport.launch(id)?;
        self.workers.insert(id, WorkerHandle::default());
        debug!(worker_id = %id, live = self.workers.len(), "Launched worker");
        Ok(id)
    }
}
