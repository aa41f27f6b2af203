//! Per-side workers.
//!
//! Each logical side processes messages on exactly one designated worker
//! (its main loop). Messages arrive on I/O threads; handlers move the
//! rest of their work onto the worker with
//! [`NetworkContext::enqueue_work`](crate::NetworkContext::enqueue_work).
//!
//! Two [`Executor`] implementations are provided:
//! - [`WorkQueue`] owns a dedicated thread that drains tasks as they come.
//! - [`TickQueue`] is bound to an existing thread that drains it from its
//!   own loop via [`TickQueue::run_pending`].
//!
//! Tasks submitted to one executor run in FIFO order. There is no
//! cancellation: dropping a [`WorkFuture`] does not stop its task.

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::{mpsc, oneshot};

use crate::direction::LogicalSide;
use crate::error::{panic_message, Error, Result};

/// A unit of work handed to a worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

type Job = (Task, oneshot::Sender<Result<()>>);

/// A single-threaded task queue bound to one logical side.
pub trait Executor: Send + Sync {
    /// Whether the caller is running on this executor's thread.
    fn is_on_thread(&self) -> bool;

    /// Queue `task` for execution on the executor's thread.
    ///
    /// Never runs the task inline and never blocks the caller.
    fn execute(&self, task: Task) -> WorkFuture;
}

/// Run a task, converting a panic into [`Error::TaskPanicked`].
pub(crate) fn run_captured(task: Task) -> Result<()> {
    catch_unwind(AssertUnwindSafe(task)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::warn!("Enqueued task panicked: {}", message);
        Error::TaskPanicked(message)
    })
}

// =============================================================================
// WorkFuture
// =============================================================================

enum FutureState {
    Ready(Option<Result<()>>),
    Pending(oneshot::Receiver<Result<()>>),
}

/// Completion of an enqueued task.
///
/// Resolves to `Ok(())` when the task ran, [`Error::TaskPanicked`] when it
/// panicked and [`Error::WorkerShutdown`] when the worker went away first.
pub struct WorkFuture {
    state: FutureState,
}

impl WorkFuture {
    /// A future that is already complete.
    pub fn completed(result: Result<()>) -> Self {
        Self {
            state: FutureState::Ready(Some(result)),
        }
    }

    fn pending(rx: oneshot::Receiver<Result<()>>) -> Self {
        Self {
            state: FutureState::Pending(rx),
        }
    }

    /// Whether the future was complete at construction (the task ran inline
    /// or was rejected).
    pub fn is_ready(&self) -> bool {
        matches!(self.state, FutureState::Ready(Some(_)))
    }

    /// Block the current thread until the task has finished.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context;
    /// `.await` the future there instead.
    pub fn wait(self) -> Result<()> {
        match self.state {
            FutureState::Ready(result) => result.unwrap_or(Ok(())),
            FutureState::Pending(rx) => rx.blocking_recv().unwrap_or(Err(Error::WorkerShutdown)),
        }
    }
}

impl Future for WorkFuture {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            FutureState::Ready(result) => Poll::Ready(result.take().unwrap_or(Ok(()))),
            FutureState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|r| r.unwrap_or(Err(Error::WorkerShutdown))),
        }
    }
}

impl fmt::Debug for WorkFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}

// =============================================================================
// WorkQueue - dedicated thread
// =============================================================================

/// Executor backed by a dedicated, named OS thread.
pub struct WorkQueue {
    name: String,
    thread_id: ThreadId,
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkQueue {
    /// Spawn the worker thread.
    pub fn spawn(name: impl Into<String>) -> Result<Arc<Self>> {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(thread_name, rx))?;

        tracing::debug!("Spawned work queue {}", name);

        Ok(Arc::new(Self {
            name,
            thread_id: handle.thread().id(),
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting tasks, let queued tasks finish, and join the thread.
    ///
    /// Called from the worker itself this only stops intake.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();

        if self.is_on_thread() {
            return;
        }
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Work queue {} thread panicked", self.name);
            }
        }
    }
}

fn worker_loop(name: String, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some((task, reply)) = rx.blocking_recv() {
        let _ = reply.send(run_captured(task));
    }
    tracing::debug!("Work queue {} stopped", name);
}

impl Executor for WorkQueue {
    fn is_on_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn execute(&self, task: Task) -> WorkFuture {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = match guard.as_ref() {
            Some(tx) => tx,
            None => return WorkFuture::completed(Err(Error::WorkerShutdown)),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if tx.send((task, reply_tx)).is_err() {
            return WorkFuture::completed(Err(Error::WorkerShutdown));
        }
        WorkFuture::pending(reply_rx)
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

// =============================================================================
// TickQueue - drained by an existing loop
// =============================================================================

/// Executor drained by its owning thread, once per tick.
pub struct TickQueue {
    thread_id: ThreadId,
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<mpsc::UnboundedReceiver<Job>>,
}

impl TickQueue {
    /// Create a queue owned by the calling thread.
    pub fn for_current_thread() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            thread_id: thread::current().id(),
            tx,
            rx: Mutex::new(rx),
        })
    }

    /// Run every task queued so far. Returns how many ran.
    ///
    /// Only the owning thread drains the queue; other callers get 0.
    pub fn run_pending(&self) -> usize {
        if !self.is_on_thread() {
            tracing::warn!("TickQueue drained from a foreign thread; ignoring");
            return 0;
        }

        let mut ran = 0;
        loop {
            let job = self
                .rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_recv();
            match job {
                Ok((task, reply)) => {
                    let _ = reply.send(run_captured(task));
                    ran += 1;
                }
                Err(_) => return ran,
            }
        }
    }
}

impl Executor for TickQueue {
    fn is_on_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn execute(&self, task: Task) -> WorkFuture {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send((task, reply_tx)).is_err() {
            return WorkFuture::completed(Err(Error::WorkerShutdown));
        }
        WorkFuture::pending(reply_rx)
    }
}

impl fmt::Debug for TickQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickQueue")
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

// =============================================================================
// WorkQueues - lookup by side
// =============================================================================

/// The designated executor of each logical side.
///
/// Either side may be absent (a dedicated server has no client worker).
#[derive(Clone, Default)]
pub struct WorkQueues {
    server: Option<Arc<dyn Executor>>,
    client: Option<Arc<dyn Executor>>,
}

impl WorkQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, executor: Arc<dyn Executor>) -> Self {
        self.server = Some(executor);
        self
    }

    pub fn with_client(mut self, executor: Arc<dyn Executor>) -> Self {
        self.client = Some(executor);
        self
    }

    pub fn get(&self, side: LogicalSide) -> Option<&Arc<dyn Executor>> {
        match side {
            LogicalSide::Server => self.server.as_ref(),
            LogicalSide::Client => self.client.as_ref(),
        }
    }
}

impl fmt::Debug for WorkQueues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueues")
            .field("server", &self.server.is_some())
            .field("client", &self.client.is_some())
            .finish()
    }
}
