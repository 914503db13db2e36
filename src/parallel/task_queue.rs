use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use crossbeam::channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::parallel::task::{Job, PendingTask, Task, TaskHandle};

/// Bounded FIFO of tasks drained by one dispatcher thread into a fixed-size
/// worker pool.
///
/// The dispatcher is the only consumer, so dispatch order is submit order;
/// completion order across workers is unordered. It takes a task off the
/// queue only when a worker is free, so a saturated pool fills the queue and
/// `submit` starts failing with `QueueFull` instead of growing memory.
pub struct TaskQueue {
    sender: Sender<Box<dyn Job>>,
    shutdown_tx: Sender<()>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<QueueStats>,
    /// Held shared across every send; shutdown flips it under the write lock
    /// so no send can land after the dispatcher starts draining.
    closed: RwLock<bool>,
    capacity: usize,
}

impl TaskQueue {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_limits(config.worker_threads, config.queue_capacity)
    }

    pub fn with_limits(workers: usize, capacity: usize) -> Result<Self> {
        if workers == 0 || capacity == 0 {
            return Err(Error::new(ErrorKind::InvalidConfig, "task queue needs at least one worker and one slot"));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("snack-worker-{}", i))
            .panic_handler(|_| error!("worker thread panicked"))
            .build()
            .map_err(|e| Error::internal(format!("worker pool: {}", e)))?;

        let (sender, receiver) = bounded::<Box<dyn Job>>(capacity);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (permit_tx, permit_rx) = bounded::<()>(workers);
        for _ in 0..workers {
            let _ = permit_tx.send(());
        }

        let stats = Arc::new(QueueStats::default());
        let dispatcher = Dispatcher {
            receiver,
            shutdown_rx,
            permit_tx,
            permit_rx,
            pool,
        };
        let handle = thread::Builder::new()
            .name("snack-dispatcher".to_string())
            .spawn(move || dispatcher.run())?;

        info!(workers, capacity, "task queue started");
        Ok(TaskQueue {
            sender,
            shutdown_tx,
            dispatcher: Mutex::new(Some(handle)),
            stats,
            closed: RwLock::new(false),
            capacity,
        })
    }

    /// Enqueue without blocking. Fails with `QueueFull` at capacity and with
    /// `Cancelled` after shutdown; a rejected task's callback sees the same error.
    pub fn submit<T: Send + 'static>(&self, task: Task<T>) -> Result<TaskHandle<T>> {
        let closed = self.closed.read();
        if *closed {
            return Err(Error::new(ErrorKind::Cancelled, "task queue is shut down"));
        }

        let (pending, handle) = PendingTask::new(task, self.stats.clone());
        let sent = self.sender.try_send(Box::new(pending));
        // Rejection callbacks run unlocked
        drop(closed);

        match sent {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(handle)
            }
            Err(TrySendError::Full(job)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                job.fail(Error::new(ErrorKind::QueueFull, "task queue at capacity"));
                Err(Error::new(
                    ErrorKind::QueueFull,
                    format!("task queue at capacity ({})", self.capacity),
                ))
            }
            Err(TrySendError::Disconnected(job)) => {
                job.fail(Error::new(ErrorKind::Cancelled, "task queue is shut down"));
                Err(Error::new(ErrorKind::Cancelled, "task queue is shut down"))
            }
        }
    }

    /// Tasks waiting for dispatch
    pub fn pending(&self) -> usize {
        self.sender.len()
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> Arc<QueueStats> {
        self.stats.clone()
    }

    /// Stop the dispatcher. Running tasks finish; queued ones complete as
    /// `Cancelled`.
    pub fn shutdown(&self) {
        {
            let mut closed = self.closed.write();
            if *closed {
                return;
            }
            *closed = true;
        }
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.dispatcher.lock().take() {
            if handle.join().is_err() {
                error!("dispatcher thread panicked");
            }
        }
        info!("task queue stopped");
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Dispatcher {
    receiver: Receiver<Box<dyn Job>>,
    shutdown_rx: Receiver<()>,
    permit_tx: Sender<()>,
    permit_rx: Receiver<()>,
    pool: rayon::ThreadPool,
}

impl Dispatcher {
    fn run(self) {
        loop {
            // Hold a free worker before taking a task; a busy pool leaves tasks queued
            let worker_free = select! {
                recv(self.permit_rx) -> _ => true,
                recv(self.shutdown_rx) -> _ => false,
            };
            if !worker_free {
                break;
            }

            let next = select! {
                recv(self.receiver) -> msg => msg.ok(),
                recv(self.shutdown_rx) -> _ => None,
            };
            let Some(job) = next else {
                break;
            };

            let permit = self.permit_tx.clone();
            self.pool.spawn(move || {
                job.run();
                let _ = permit.send(());
            });
        }

        let mut cancelled = 0usize;
        for job in self.receiver.try_iter() {
            job.fail(Error::new(ErrorKind::Cancelled, "task queue shut down"));
            cancelled += 1;
        }
        debug!(cancelled, "dispatcher exited");
    }
}

#[derive(Debug, Default)]
pub struct QueueStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub rejected: AtomicU64,
    pub cancelled: AtomicU64,
}

impl QueueStats {
    pub(crate) fn record_outcome(&self, ok: bool) {
        if ok {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_failure(&self, kind: ErrorKind) {
        if kind == ErrorKind::Cancelled {
            self.cancelled.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub cancelled: u64,
}
