//! WorkerPool (§4.5): a fixed-size pool of workers sharing a task queue,
//! pull-based dispatch after an initial fan-out. Grounded on
//! `continuum-core/src/concurrent/message_processor.rs`'s
//! `ConcurrentProcessor` (N tokio tasks pulling a shared
//! `Arc<Mutex<Receiver>>`) crossed with `inference-grpc/src/worker_pool.rs`'s
//! oneshot-per-request response channel and worker readiness barrier.

use crate::events::EventEmitter;
use crate::events::Sink;
use crate::models::{ShareResult, Task};
use crate::remote_client::RemoteClient;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{error, warn};

/// Per-worker state machine (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninit,
    Idle,
    Working,
    Error,
}

/// A worker claiming or releasing a task, reported to the coordinator so
/// its `ProgressCounters::active_workers` (§4.7) reflects real dispatch
/// transitions rather than tracking a parallel count of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerTransition {
    Started,
    Finished,
}

/// Decrements `active_workers` on drop, including during an unwind, so a
/// worker that panics mid-task (§7 "Worker crashes") never leaves the
/// counter stuck high.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct WorkerPool {
    task_tx: mpsc::UnboundedSender<Task>,
    outcome_rx: Mutex<mpsc::UnboundedReceiver<ShareResult>>,
    transition_rx: Mutex<mpsc::UnboundedReceiver<WorkerTransition>>,
    active_workers: Arc<AtomicUsize>,
    ready_workers: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
    worker_states: Arc<Vec<std::sync::Mutex<WorkerState>>>,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawns `worker_count` workers, each initializing the client and
    /// signaling readiness. Waits up to `init_timeout` for all workers to
    /// come up; workers that don't are excluded from dispatch (§4.5).
    pub async fn start<C, S>(
        worker_count: usize,
        client: Arc<C>,
        rate_limit: Duration,
        init_timeout: Duration,
        emitter: Arc<EventEmitter<S>>,
    ) -> Self
    where
        C: RemoteClient + 'static,
        S: Sink + 'static,
    {
        let (task_tx, task_rx) = mpsc::unbounded_channel::<Task>();
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel::<ShareResult>();
        let (transition_tx, transition_rx) = mpsc::unbounded_channel::<WorkerTransition>();

        let active_workers = Arc::new(AtomicUsize::new(0));
        let ready_workers = Arc::new(AtomicUsize::new(0));
        let queued = Arc::new(AtomicUsize::new(0));
        let worker_states: Arc<Vec<std::sync::Mutex<WorkerState>>> = Arc::new(
            (0..worker_count)
                .map(|_| std::sync::Mutex::new(WorkerState::Uninit))
                .collect(),
        );

        for worker_id in 0..worker_count {
            let task_rx = task_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let transition_tx = transition_tx.clone();
            let client = client.clone();
            let active_workers = active_workers.clone();
            let ready_workers = ready_workers.clone();
            let queued = queued.clone();
            let emitter = emitter.clone();
            let worker_states = worker_states.clone();
            // Separate clones for the supervisor task below: the worker
            // task itself takes ownership of the ones above via `async move`.
            let worker_states_sup = worker_states.clone();
            let emitter_sup = emitter.clone();

            let handle = tokio::spawn(async move {
                // Each worker's "init" is trivial here (the client is
                // already constructed); signaling readiness still matters
                // for the pool's startup barrier.
                ready_workers.fetch_add(1, Ordering::SeqCst);
                *worker_states[worker_id].lock().unwrap() = WorkerState::Idle;

                loop {
                    let task = {
                        let mut rx = task_rx.lock().await;
                        rx.recv().await
                    };

                    let task = match task {
                        Some(t) => t,
                        None => break, // channel closed: pool is shutting down
                    };

                    queued.fetch_sub(1, Ordering::SeqCst);
                    active_workers.fetch_add(1, Ordering::SeqCst);
                    let _active_guard = ActiveGuard(active_workers.clone());
                    let _ = transition_tx.send(WorkerTransition::Started);
                    *worker_states[worker_id].lock().unwrap() = WorkerState::Working;
                    emitter.worker_status_working(worker_id, &task.recipient.name);
                    tracing::debug!(task_id = %task.task_id, worker_id, "dispatching task");

                    let outcome = run_task(client.as_ref(), &task, rate_limit).await;

                    drop(_active_guard);
                    let _ = transition_tx.send(WorkerTransition::Finished);
                    *worker_states[worker_id].lock().unwrap() = WorkerState::Idle;
                    emitter.worker_status_idle(worker_id);

                    if outcome_tx.send(outcome).is_err() {
                        // Coordinator dropped its receiver: nothing left to report to.
                        break;
                    }
                }
            });

            // Supervises the worker task: an unhandled panic (§7 "Worker
            // crashes") transitions it to `Error` and excludes it from
            // further dispatch. `ActiveGuard`'s `Drop` has already
            // corrected `active_workers` by the time this resolves, even
            // on unwind; tasks not yet claimed remain in the shared queue
            // for the other workers.
            tokio::spawn(async move {
                if let Err(join_err) = handle.await {
                    if join_err.is_panic() {
                        *worker_states_sup[worker_id].lock().unwrap() = WorkerState::Error;
                        error!(worker_id, "worker task panicked, excluding from dispatch");
                        emitter_sup.worker_status_error(worker_id);
                    }
                }
            });
        }

        let pool = Self {
            task_tx,
            outcome_rx: Mutex::new(outcome_rx),
            transition_rx: Mutex::new(transition_rx),
            active_workers,
            ready_workers,
            queued,
            worker_states,
            worker_count,
        };

        pool.await_ready(init_timeout, emitter).await;
        pool
    }

    async fn await_ready<S: Sink>(&self, init_timeout: Duration, emitter: Arc<EventEmitter<S>>) {
        let ready = self.ready_workers.clone();
        let worker_count = self.worker_count;

        let wait = async {
            while ready.load(Ordering::SeqCst) < worker_count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };

        if timeout(init_timeout, wait).await.is_err() {
            let ready_count = ready.load(Ordering::SeqCst);
            warn!(
                "worker pool init timed out: {}/{} workers ready, excluding the rest from dispatch",
                ready_count, worker_count
            );
            for worker_id in ready_count..worker_count {
                *self.worker_states[worker_id].lock().unwrap() = WorkerState::Error;
                emitter.worker_status_error(worker_id);
            }
        }
    }

    /// Current state of a worker, per the §4.5 state machine.
    pub fn worker_state(&self, worker_id: usize) -> WorkerState {
        *self.worker_states[worker_id].lock().unwrap()
    }

    /// Places a task on the shared queue (§4.5 `Submit`).
    pub fn submit(&self, task: Task) {
        if self.task_tx.send(task).is_err() {
            error!("worker pool task channel closed, dropping task");
            return;
        }
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    /// Receives the next reported outcome. Returns `None` once all
    /// workers have exited and the channel is drained.
    pub async fn next_outcome(&self) -> Option<ShareResult> {
        let mut rx = self.outcome_rx.lock().await;
        rx.recv().await
    }

    /// Receives the next worker start/finish transition, so the coordinator
    /// can mirror it into its own `ProgressCounters` (§4.7).
    pub async fn next_transition(&self) -> Option<WorkerTransition> {
        let mut rx = self.transition_rx.lock().await;
        rx.recv().await
    }

    /// Non-blocking drain used once quiescence is reached, so any
    /// transition still buffered in the channel is applied before the
    /// coordinator reads a final `active_workers` value.
    pub fn try_next_transition(&self) -> Option<WorkerTransition> {
        let mut rx = self.transition_rx.try_lock().ok()?;
        rx.try_recv().ok()
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Tasks submitted but not yet picked up by a worker (§4.4 `WORKERS`
    /// payload's "Q in queue").
    pub fn queued_len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Signals all workers to exit by closing the task channel. In-flight
    /// tasks still complete and report their outcome (§4.5 `Terminate`).
    pub fn terminate(self) {
        drop(self.task_tx);
    }
}

async fn run_task<C: RemoteClient + ?Sized>(
    client: &C,
    task: &Task,
    rate_limit: Duration,
) -> ShareResult {
    let result = client.grant_read(&task.folder_id, &task.email).await;
    tokio::time::sleep(rate_limit).await;

    match result {
        Ok(permission_id) => ShareResult {
            recipient: task.recipient.clone(),
            folder_id: Some(task.folder_id.clone()),
            success: true,
            permission_id: Some(permission_id),
            error: None,
            error_code: None,
            issue_type: None,
            timestamp: String::new(), // stamped by the Engine on receipt (§3)
        },
        Err(e) => ShareResult {
            recipient: task.recipient.clone(),
            folder_id: Some(task.folder_id.clone()),
            success: false,
            permission_id: None,
            error: Some(e.to_string()),
            error_code: Some(e.code()),
            issue_type: None,
            timestamp: String::new(),
        },
    }
}
