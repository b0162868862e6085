//! Completion handles for work dispatched onto a [`Worker`](crate::Worker).
//!
//! A [`TaskFuture`] is the receiving half of a one-shot completion. It can be
//! waited on from a plain thread (`wait`, `wait_timeout`, `get`) or awaited
//! from async code, since it implements [`std::future::Future`].
//!
//! Handles are cheap to clone and all clones observe the same completion.
//! [`TaskFuture::get`] moves the result out, so only one clone may take it;
//! [`TaskFuture::get_cloned`] reads it without consuming when `T: Clone`.
//!
//! # Example
//!
//! ```
//! use keystone_com::Worker;
//!
//! let worker = Worker::new();
//! let future = worker.post_task(|| 6 * 7).unwrap();
//! assert_eq!(future.get(), Ok(42));
//! worker.stop();
//! ```

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::TaskError;

struct Completion<T> {
    done: bool,
    result: Option<Result<T, TaskError>>,
    wakers: Vec<Waker>,
}

struct CompletionState<T> {
    slot: Mutex<Completion<T>>,
    condvar: Condvar,
}

impl<T> CompletionState<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Completion {
                done: false,
                result: None,
                wakers: Vec::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    fn resolve(&self, result: Result<T, TaskError>) {
        let wakers = {
            let mut slot = self.slot.lock();
            if slot.done {
                return;
            }
            slot.done = true;
            slot.result = Some(result);
            self.condvar.notify_all();
            std::mem::take(&mut slot.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }
}

/// The sending half of a completion. Resolving consumes it.
///
/// A promise dropped without being resolved completes its future with
/// [`TaskError::WorkerDropped`], so waiters never hang on lost work.
pub(crate) struct Promise<T> {
    state: Arc<CompletionState<T>>,
    resolved: bool,
}

impl<T> Promise<T> {
    /// Resolve the paired future.
    pub(crate) fn resolve(mut self, result: Result<T, TaskError>) {
        self.resolved = true;
        self.state.resolve(result);
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if !self.resolved {
            self.state.resolve(Err(TaskError::WorkerDropped));
        }
    }
}

/// Create a linked promise/future pair.
pub(crate) fn completion_pair<T>() -> (Promise<T>, TaskFuture<T>) {
    let state = Arc::new(CompletionState::new());
    (
        Promise {
            state: state.clone(),
            resolved: false,
        },
        TaskFuture { state },
    )
}

/// A handle on the eventual result of a dispatched task.
pub struct TaskFuture<T> {
    state: Arc<CompletionState<T>>,
}

impl<T> TaskFuture<T> {
    /// Create a future that is already resolved.
    pub fn ready(result: Result<T, TaskError>) -> Self {
        let (promise, future) = completion_pair();
        promise.resolve(result);
        future
    }

    /// Check whether the task has completed.
    pub fn is_finished(&self) -> bool {
        self.state.slot.lock().done
    }

    /// Block the current thread until the task completes.
    ///
    /// # Warning
    ///
    /// Waiting on the worker's own thread for a task queued behind the
    /// current one deadlocks.
    pub fn wait(&self) {
        let mut slot = self.state.slot.lock();
        while !slot.done {
            self.state.condvar.wait(&mut slot);
        }
    }

    /// Wait for completion with a timeout.
    ///
    /// Returns `true` if the task completed within the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut slot = self.state.slot.lock();
        if slot.done {
            return true;
        }
        let _ = self.state.condvar.wait_for(&mut slot, timeout);
        slot.done
    }

    /// Wait for the task and take its result.
    pub fn get(self) -> Result<T, TaskError> {
        self.wait();
        self.state
            .slot
            .lock()
            .result
            .take()
            .unwrap_or(Err(TaskError::AlreadyRetrieved))
    }
}

impl<T: Clone> TaskFuture<T> {
    /// Wait for the task and return a copy of its result.
    ///
    /// Unlike [`get`](Self::get), the result stays available to other clones.
    pub fn get_cloned(&self) -> Result<T, TaskError> {
        self.wait();
        self.state
            .slot
            .lock()
            .result
            .clone()
            .unwrap_or(Err(TaskError::AlreadyRetrieved))
    }
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl<T> Future for TaskFuture<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.state.slot.lock();
        if slot.done {
            return Poll::Ready(slot.result.take().unwrap_or(Err(TaskError::AlreadyRetrieved)));
        }
        if !slot.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            slot.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Render a panic payload as text for logs and [`TaskError::Panicked`].
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

static_assertions::assert_impl_all!(TaskFuture<i32>: Send, Sync, Unpin);
