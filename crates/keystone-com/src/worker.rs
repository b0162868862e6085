//! Single-thread task executor.
//!
//! A [`Worker`] owns one dedicated thread running a FIFO task loop. Code
//! bound to a worker always executes on that thread and never migrates,
//! which makes a worker the "apartment" that slots are dispatched onto.
//!
//! # Guarantees
//!
//! - Tasks posted from the same thread run in posting order.
//! - A panic escaping a task is caught and logged; the loop keeps running.
//! - [`Worker::stop`] is non-preemptive: the running task finishes and every
//!   task queued before the stop request still runs. Posts after the request
//!   fail with [`WorkerError::WorkerStopped`].
//! - Timers created with [`Worker::create_timer`] never call their callback
//!   directly. Each expiry is posted as a regular task.
//!
//! # Example
//!
//! ```
//! use keystone_com::Worker;
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//!
//! let worker = Worker::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! for i in 1..=3 {
//!     let seen = seen.clone();
//!     worker.post(move || seen.lock().push(i)).unwrap();
//! }
//!
//! // Drains the queue, then joins the thread
//! worker.stop();
//! assert_eq!(*seen.lock(), vec![1, 2, 3]);
//! assert!(worker.post(|| {}).is_err());
//! ```
//!
//! # Hosting a Process
//!
//! A headless process keeps itself alive by blocking on the worker's exit
//! future:
//!
//! ```no_run
//! use keystone_com::Worker;
//!
//! let worker = Worker::new();
//! let handle = worker.clone();
//! worker.post(move || {
//!     // ... initialize components, later call handle.request_stop() ...
//!     handle.request_stop();
//! }).unwrap();
//! let exit_code = worker.get_future().get_cloned().unwrap_or(1);
//! std::process::exit(exit_code);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{TaskError, WorkerError};
use crate::future::{Promise, TaskFuture, completion_pair, panic_message};
use crate::logging::span_names;
use crate::timer::{Timer, TimerTable};

/// Default name for worker threads.
pub const DEFAULT_WORKER_NAME: &str = "keystone-worker";

/// A boxed task closure.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for creating a Worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for the worker thread.
    pub name: String,
    /// Stack size for the worker thread in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_WORKER_NAME.to_string(),
            stack_size: None,
        }
    }
}

impl WorkerConfig {
    /// Create a new configuration with the given thread name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Builder for creating Workers with custom configuration.
#[derive(Debug, Default)]
pub struct WorkerBuilder {
    config: WorkerConfig,
}

impl WorkerBuilder {
    /// Create a new WorkerBuilder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the stack size for the worker thread.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Build and start the worker.
    pub fn build(self) -> Worker {
        Worker::with_config(self.config)
    }
}

/// Lifecycle of a worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerState {
    /// The thread has been spawned but has not entered its loop yet.
    Created,
    /// The loop is processing tasks.
    Running,
    /// Stop was requested; the loop is draining queued tasks.
    StopRequested,
    /// The loop has exited.
    Stopped,
}

impl WorkerState {
    /// Whether a worker in this state accepts new tasks.
    pub fn accepts_tasks(self) -> bool {
        matches!(self, Self::Created | Self::Running)
    }
}

/// State guarded by the worker's queue mutex.
pub(crate) struct QueueState {
    pub(crate) tasks: VecDeque<Task>,
    pub(crate) state: WorkerState,
    pub(crate) timers: TimerTable,
}

/// State shared between the worker handles, its timers and its thread.
pub(crate) struct WorkerShared {
    pub(crate) name: String,
    pub(crate) queue: Mutex<QueueState>,
    /// Wakes the loop on post, stop and timer changes.
    pub(crate) wakeup: Condvar,
    thread_id: OnceLock<ThreadId>,
    exit: TaskFuture<i32>,
    exit_promise: Mutex<Option<Promise<i32>>>,
}

impl WorkerShared {
    /// Enqueue a task unless stop has been requested.
    pub(crate) fn push(&self, task: Task) -> Result<(), WorkerError> {
        let mut queue = self.queue.lock();
        if !queue.state.accepts_tasks() {
            return Err(WorkerError::WorkerStopped {
                name: self.name.clone(),
            });
        }
        queue.tasks.push_back(task);
        self.wakeup.notify_one();
        Ok(())
    }

    fn request_stop(&self) {
        let mut queue = self.queue.lock();
        if queue.state.accepts_tasks() {
            tracing::debug!(target: "keystone_com::worker", worker = %self.name, "stop requested");
            queue.state = WorkerState::StopRequested;
            queue.timers.cancel_all();
            self.wakeup.notify_all();
        }
    }
}

/// Owner of the worker thread. Dropping the last [`Worker`] handle requests
/// a stop without blocking.
struct WorkerInner {
    shared: Arc<WorkerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for WorkerInner {
    fn drop(&mut self) {
        self.shared.request_stop();
    }
}

/// A dedicated thread with its own FIFO task queue and timers.
///
/// `Worker` is a cheap, cloneable handle; all clones drive the same thread.
/// The thread keeps running until [`stop`](Self::stop) is called or the
/// last handle is dropped.
///
/// # Thread Safety
///
/// `Worker` is `Send + Sync`. Any thread may post tasks concurrently.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    /// Create a new worker with default configuration.
    ///
    /// The worker thread starts immediately.
    pub fn new() -> Self {
        Self::with_config(WorkerConfig::default())
    }

    /// Create a new worker with custom configuration.
    pub fn with_config(config: WorkerConfig) -> Self {
        let (exit_promise, exit) = completion_pair();
        let shared = Arc::new(WorkerShared {
            name: config.name.clone(),
            queue: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                state: WorkerState::Created,
                timers: TimerTable::new(),
            }),
            wakeup: Condvar::new(),
            thread_id: OnceLock::new(),
            exit,
            exit_promise: Mutex::new(Some(exit_promise)),
        });

        let thread_shared = shared.clone();

        let mut builder = thread::Builder::new().name(config.name);
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let handle = builder
            .spawn(move || {
                let _ = thread_shared.thread_id.set(thread::current().id());
                worker_loop(&thread_shared);
            })
            .expect("Failed to spawn worker thread");

        let _ = shared.thread_id.set(handle.thread().id());

        Self {
            inner: Arc::new(WorkerInner {
                shared,
                handle: Mutex::new(Some(handle)),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<WorkerShared> {
        &self.inner.shared
    }

    /// Name of the worker thread.
    pub fn name(&self) -> &str {
        &self.inner.shared.name
    }

    /// Identifier of the worker thread.
    pub fn thread_id(&self) -> ThreadId {
        *self
            .inner
            .shared
            .thread_id
            .get_or_init(|| thread::current().id())
    }

    /// Check whether the caller is running on this worker's thread.
    pub fn is_current(&self) -> bool {
        self.inner.shared.thread_id.get() == Some(&thread::current().id())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.inner.shared.queue.lock().state
    }

    /// Check if the worker still accepts tasks.
    pub fn is_running(&self) -> bool {
        self.state().accepts_tasks()
    }

    /// Number of tasks waiting in the queue.
    pub fn pending_tasks(&self) -> usize {
        self.inner.shared.queue.lock().tasks.len()
    }

    /// Post a task for execution on the worker thread.
    ///
    /// Returns immediately. Fails with [`WorkerError::WorkerStopped`] once a
    /// stop has been requested.
    pub fn post<F>(&self, task: F) -> Result<(), WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.shared.push(Box::new(task))
    }

    /// Post a task and get a future for its result.
    ///
    /// A panic inside `task` is captured and surfaces as
    /// [`TaskError::Panicked`] from the future instead of being logged.
    pub fn post_task<F, R>(&self, task: F) -> Result<TaskFuture<R>, WorkerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (promise, future) = completion_pair();
        self.post(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(task))
                .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())));
            promise.resolve(result);
        })?;
        Ok(future)
    }

    /// Create a timer driven by this worker.
    ///
    /// The timer starts idle; call [`Timer::start`] to arm it. A zero
    /// `period` is only valid for one-shot timers.
    pub fn create_timer<F>(&self, period: Duration, one_shot: bool, callback: F) -> Timer
    where
        F: Fn() + Send + Sync + 'static,
    {
        Timer::create(&self.inner.shared, period, one_shot, Arc::new(callback))
    }

    /// Future resolving with the loop's exit code once it has terminated.
    ///
    /// Every call observes the same completion.
    pub fn get_future(&self) -> TaskFuture<i32> {
        self.inner.shared.exit.clone()
    }

    /// Request the worker to stop after draining queued tasks.
    ///
    /// Non-blocking. Use [`join`](Self::join) to wait for the thread.
    pub fn request_stop(&self) {
        self.inner.shared.request_stop();
    }

    /// Wait for the worker thread to finish.
    ///
    /// Returns `true` if the thread was joined by this call. Joining from the
    /// worker's own thread is refused and returns `false`.
    pub fn join(&self) -> bool {
        if self.is_current() {
            return false;
        }
        let handle = self.inner.handle.lock().take();
        match handle {
            Some(h) => h.join().is_ok(),
            None => false,
        }
    }

    /// Stop the worker.
    ///
    /// Requests a stop, then waits for the loop to drain and exit unless
    /// called from the worker's own thread.
    pub fn stop(&self) {
        self.request_stop();
        if !self.is_current() {
            self.join();
            self.get_future().wait();
        }
    }

    /// Wait for the loop to exit with a timeout.
    ///
    /// Returns `true` if the loop exited within the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.inner.shared.exit.wait_timeout(timeout)
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Worker {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Worker {}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("pending_tasks", &self.pending_tasks())
            .field("active_timers", &self.inner.shared.queue.lock().timers.active_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(Worker: Send, Sync);

/// The main worker loop.
fn worker_loop(shared: &WorkerShared) {
    {
        let mut queue = shared.queue.lock();
        if queue.state == WorkerState::Created {
            queue.state = WorkerState::Running;
        }
    }
    tracing::debug!(target: "keystone_com::worker", worker = %shared.name, "worker loop started");

    while let Some(task) = next_task(shared) {
        run_task(&shared.name, task);
    }

    shared.queue.lock().state = WorkerState::Stopped;
    tracing::debug!(target: "keystone_com::worker", worker = %shared.name, "worker loop exited");

    if let Some(promise) = shared.exit_promise.lock().take() {
        promise.resolve(Ok(0));
    }
}

/// Block until a task is available, firing due timers on the way.
///
/// Returns `None` once stop was requested and the queue is empty.
fn next_task(shared: &WorkerShared) -> Option<Task> {
    let mut queue = shared.queue.lock();
    loop {
        if queue.state.accepts_tasks() {
            let QueueState { tasks, timers, .. } = &mut *queue;
            for callback in timers.take_expired(Instant::now()) {
                tasks.push_back(Box::new(move || callback()));
            }
        }

        if let Some(task) = queue.tasks.pop_front() {
            return Some(task);
        }

        if !queue.state.accepts_tasks() {
            return None;
        }

        match queue.timers.next_deadline() {
            Some(deadline) => {
                let _ = shared.wakeup.wait_until(&mut queue, deadline);
            }
            None => shared.wakeup.wait(&mut queue),
        }
    }
}

/// Run one task, containing any panic at the loop boundary.
fn run_task(worker: &str, task: Task) {
    let _span = tracing::trace_span!(target: "keystone_com::worker", span_names::TASK, worker).entered();
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        tracing::error!(
            target: "keystone_com::worker",
            worker,
            panic = %panic_message(payload.as_ref()),
            "task panicked"
        );
    }
}
