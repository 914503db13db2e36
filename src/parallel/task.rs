use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use crate::core::error::{Error, ErrorKind, Result};
use crate::parallel::task_queue::QueueStats;

pub type Callback<T> = Box<dyn FnOnce(&Result<T>) + Send>;

/// Deferred unit of work plus an optional completion callback
pub struct Task<T> {
    work: Box<dyn FnOnce() -> Result<T> + Send>,
    callback: Option<Callback<T>>,
}

impl<T: Send + 'static> Task<T> {
    pub fn new(work: impl FnOnce() -> Result<T> + Send + 'static) -> Self {
        Task {
            work: Box::new(work),
            callback: None,
        }
    }

    /// Called with the outcome on the worker, before the handle resolves
    pub fn on_complete(mut self, callback: impl FnOnce(&Result<T>) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// Type-erased task as seen by the dispatcher
pub(crate) trait Job: Send {
    fn run(self: Box<Self>);
    fn fail(self: Box<Self>, error: Error);
}

/// A submitted task and the channel its outcome goes to. Dropping it before
/// it runs completes it as cancelled.
pub(crate) struct PendingTask<T> {
    inner: Option<(Task<T>, oneshot::Sender<Result<T>>)>,
    stats: Arc<QueueStats>,
}

impl<T: Send + 'static> PendingTask<T> {
    pub(crate) fn new(task: Task<T>, stats: Arc<QueueStats>) -> (Self, TaskHandle<T>) {
        let (tx, rx) = oneshot::channel();
        let pending = PendingTask {
            inner: Some((task, tx)),
            stats,
        };
        (pending, TaskHandle { rx })
    }

    fn complete(callback: Option<Callback<T>>, tx: oneshot::Sender<Result<T>>, result: Result<T>) {
        if let Some(callback) = callback {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&result))).is_err() {
                tracing::error!("task completion callback panicked");
            }
        }
        // Receiver may be gone; the outcome is then discarded
        let _ = tx.send(result);
    }
}

impl<T: Send + 'static> Job for PendingTask<T> {
    fn run(mut self: Box<Self>) {
        let Some((task, tx)) = self.inner.take() else {
            return;
        };
        let result = match panic::catch_unwind(AssertUnwindSafe(task.work)) {
            Ok(result) => result,
            Err(_) => Err(Error::internal("task panicked")),
        };
        self.stats.record_outcome(result.is_ok());
        Self::complete(task.callback, tx, result);
    }

    fn fail(mut self: Box<Self>, error: Error) {
        if let Some((task, tx)) = self.inner.take() {
            self.stats.record_failure(error.kind);
            Self::complete(task.callback, tx, Err(error));
        }
    }
}

impl<T> Drop for PendingTask<T> {
    fn drop(&mut self) {
        if let Some((task, tx)) = self.inner.take() {
            self.stats.record_failure(ErrorKind::Cancelled);
            let result = Err(Error::new(ErrorKind::Cancelled, "task dropped before it ran"));
            if let Some(callback) = task.callback {
                let _ = panic::catch_unwind(AssertUnwindSafe(|| callback(&result)));
            }
            let _ = tx.send(result);
        }
    }
}

/// Resolves to the task's outcome. Blocking via `join`, or `.await`.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

fn lost() -> Error {
    Error::new(ErrorKind::Cancelled, "task outcome lost")
}

impl<T> TaskHandle<T> {
    /// Block the current thread until the task completes.
    /// Must not be called from inside an async runtime.
    pub fn join(self) -> Result<T> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(lost()))
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(lost())))
    }
}
