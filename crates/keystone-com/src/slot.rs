//! Slots: type-erased callable endpoints.
//!
//! A [`Slot<Args, R>`] wraps one `Fn(&Args) -> R` closure. It may be bound to
//! a [`Worker`], in which case asynchronous invocations are posted onto that
//! worker's thread. Slots are cheap cloneable handles; the callable lives as
//! long as at least one handle does.
//!
//! # Argument Types
//!
//! `Args` is a single type. Use `()` for slots taking nothing, a bare type for
//! one argument, or a tuple like `(String, i32)` for several. The argument
//! type is captured statically and exposed through [`SlotBase`] so that
//! connecting a slot to a signal with a different argument type fails at
//! connect time with [`SignalError::ArgumentMismatch`](crate::SignalError).
//!
//! # Example
//!
//! ```
//! use keystone_com::{Slot, Worker};
//!
//! let square = Slot::new(|x: &i32| x * x);
//! assert_eq!(square.call(7), 49);
//!
//! let worker = Worker::new();
//! square.set_worker(&worker).unwrap();
//! let future = square.async_call(8).unwrap();
//! assert_eq!(future.get(), Ok(64));
//! worker.stop();
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::error::{SlotError, TaskError, WorkerError};
use crate::future::{TaskFuture, completion_pair, panic_message};
use crate::liveness::{Liveness, LivenessWatch};
use crate::signal::Connection;
use crate::worker::Worker;

/// Invocation interface a signal holds on each connected slot.
///
/// Signals only keep `Weak<dyn Invocable<Args>>`, so a connection never
/// keeps its slot alive.
pub(crate) trait Invocable<Args>: Send + Sync {
    /// Run synchronously on the caller's thread, discarding the result.
    fn invoke(&self, args: &Args);

    /// Run on the bound worker, or inline when unbound.
    fn dispatch(self: Arc<Self>, args: Args) -> Result<TaskFuture<()>, WorkerError>;

    /// Whether the slot currently suppresses emissions.
    fn is_blocked(&self) -> bool;

    /// Identity of the slot, shared by all of its handles.
    fn endpoint_id(&self) -> usize;

    /// Observer on the slot's liveness token.
    fn liveness(&self) -> LivenessWatch;

    /// Record a connection made to this slot.
    fn attach(&self, connection: Connection);
}

/// Type-erased view of a slot, used by registries and keyed wiring.
pub trait SlotBase: Send + Sync {
    /// `TypeId` of the argument type.
    fn args_type_id(&self) -> TypeId;

    /// Name of the argument type, for diagnostics.
    fn args_type_name(&self) -> &'static str;

    /// Name of the return type, for diagnostics.
    fn result_type_name(&self) -> &'static str;

    /// Worker the slot is bound to, if any.
    fn worker(&self) -> Option<Worker>;

    /// Bind the slot to a worker.
    fn set_worker(&self, worker: &Worker) -> Result<(), SlotError>;

    /// Whether the slot currently suppresses emissions.
    fn is_blocked(&self) -> bool;

    /// Suppress emissions to this slot.
    fn block(&self);

    /// Resume emissions to this slot.
    fn unblock(&self);

    /// Block the slot until the returned guard is dropped.
    fn blocker(&self) -> SlotBlocker;

    /// Number of live connections to this slot.
    fn connection_count(&self) -> usize;

    /// Identity of the slot, shared by all of its handles.
    fn endpoint_id(&self) -> usize;

    /// Get this slot as `Any` for downcasting to a concrete [`Slot`].
    fn as_any(&self) -> &dyn Any;

    /// Boxed `Arc<dyn Invocable<Args>>` consumed by `Signal::connect_erased`.
    #[doc(hidden)]
    fn erased_invocable(&self) -> Box<dyn Any>;
}

type SlotFn<Args, R> = dyn Fn(&Args) -> R + Send + Sync;

struct SlotInner<Args, R> {
    func: Box<SlotFn<Args, R>>,
    worker: RwLock<Option<Worker>>,
    blocked: AtomicBool,
    liveness: Liveness,
    connections: Mutex<Vec<Connection>>,
}

impl<Args, R> SlotInner<Args, R> {
    fn live_connections(&self) -> usize {
        let mut connections = self.connections.lock();
        connections.retain(Connection::is_connected);
        connections.len()
    }

    fn call_caught(&self, args: &Args) -> Result<R, TaskError> {
        panic::catch_unwind(AssertUnwindSafe(|| (self.func)(args)))
            .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())))
    }
}

/// The flag a [`SlotBlocker`] toggles, reachable without the slot's types.
trait BlockFlag: Send + Sync {
    fn flag(&self) -> &AtomicBool;
}

impl<Args, R> BlockFlag for SlotInner<Args, R> {
    fn flag(&self) -> &AtomicBool {
        &self.blocked
    }
}

impl<Args, R> Drop for SlotInner<Args, R> {
    fn drop(&mut self) {
        self.liveness.kill();
        let connections = std::mem::take(&mut *self.connections.lock());
        if !connections.is_empty() {
            tracing::trace!(
                target: "keystone_com::slot",
                connections = connections.len(),
                "slot destroyed, disconnecting"
            );
        }
        for connection in connections {
            connection.disconnect();
        }
    }
}

/// Post `args` to the slot's worker, or run inline when unbound.
///
/// The queued task holds only a weak reference: a slot destroyed before the
/// task runs resolves the future with [`TaskError::SlotExpired`].
fn dispatch_with<Args, R, T>(
    inner: &Arc<SlotInner<Args, R>>,
    args: Args,
    map: fn(R) -> T,
) -> Result<TaskFuture<T>, WorkerError>
where
    Args: Send + 'static,
    R: 'static,
    T: Send + 'static,
{
    let worker = inner.worker.read().clone();
    let Some(worker) = worker else {
        return Ok(TaskFuture::ready(inner.call_caught(&args).map(map)));
    };

    let weak: Weak<SlotInner<Args, R>> = Arc::downgrade(inner);
    let (promise, future) = completion_pair();
    worker.post(move || {
        let result = match weak.upgrade() {
            Some(inner) => inner.call_caught(&args).map(map),
            None => Err(TaskError::SlotExpired),
        };
        promise.resolve(result);
    })?;
    Ok(future)
}

impl<Args, R> Invocable<Args> for SlotInner<Args, R>
where
    Args: Send + 'static,
    R: 'static,
{
    fn invoke(&self, args: &Args) {
        let _ = (self.func)(args);
    }

    fn dispatch(self: Arc<Self>, args: Args) -> Result<TaskFuture<()>, WorkerError> {
        dispatch_with(&self, args, drop)
    }

    fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    fn endpoint_id(&self) -> usize {
        self as *const Self as *const () as usize
    }

    fn liveness(&self) -> LivenessWatch {
        self.liveness.watch()
    }

    fn attach(&self, connection: Connection) {
        let mut connections = self.connections.lock();
        connections.retain(Connection::is_connected);
        connections.push(connection);
    }
}

/// A callable endpoint, optionally bound to a [`Worker`].
///
/// # Type Parameters
///
/// - `Args`: argument type passed by reference to the closure.
/// - `R`: return type, `()` by default. Signals discard it; [`call`](Self::call)
///   and [`async_call`](Self::async_call) return it.
///
/// # Thread Safety
///
/// `Slot` is `Send + Sync`. [`run`](Self::run) and [`call`](Self::call)
/// execute on the calling thread regardless of binding; only the `async_*`
/// methods hop to the bound worker.
pub struct Slot<Args, R = ()> {
    inner: Arc<SlotInner<Args, R>>,
}

impl<Args, R> Clone for Slot<Args, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Args, R> Slot<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Create an unbound slot from a closure.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Args) -> R + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SlotInner {
                func: Box::new(func),
                worker: RwLock::new(None),
                blocked: AtomicBool::new(false),
                liveness: Liveness::new(),
                connections: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a slot already bound to `worker`.
    pub fn with_worker<F>(func: F, worker: &Worker) -> Self
    where
        F: Fn(&Args) -> R + Send + Sync + 'static,
    {
        let slot = Self::new(func);
        *slot.inner.worker.write() = Some(worker.clone());
        slot
    }

    /// Invoke synchronously on the calling thread, discarding the result.
    pub fn run(&self, args: Args) {
        let _ = (self.inner.func)(&args);
    }

    /// Invoke synchronously on the calling thread.
    pub fn call(&self, args: Args) -> R {
        (self.inner.func)(&args)
    }

    /// Invoke on the bound worker.
    ///
    /// An unbound slot runs inline and returns an already resolved future.
    pub fn async_run(&self, args: Args) -> Result<TaskFuture<()>, WorkerError> {
        dispatch_with(&self.inner, args, drop)
    }

    /// Invoke on the bound worker and get a future for the result.
    pub fn async_call(&self, args: Args) -> Result<TaskFuture<R>, WorkerError> {
        dispatch_with(&self.inner, args, std::convert::identity)
    }

    /// Worker the slot is bound to, if any.
    pub fn worker(&self) -> Option<Worker> {
        self.inner.worker.read().clone()
    }

    /// Bind the slot to `worker`.
    ///
    /// Binding to the current worker again is a no-op. Moving a slot that
    /// has live connections to a different worker fails with
    /// [`SlotError::RebindWhileConnected`].
    pub fn set_worker(&self, worker: &Worker) -> Result<(), SlotError> {
        self.rebind(Some(worker.clone()))
    }

    /// Remove the worker binding. Follows the same rule as
    /// [`set_worker`](Self::set_worker).
    pub fn clear_worker(&self) -> Result<(), SlotError> {
        self.rebind(None)
    }

    fn rebind(&self, worker: Option<Worker>) -> Result<(), SlotError> {
        let mut current = self.inner.worker.write();
        if *current == worker {
            return Ok(());
        }
        let connections = self.inner.live_connections();
        if connections > 0 {
            tracing::warn!(
                target: "keystone_com::slot",
                connections,
                "refusing to rebind a connected slot"
            );
            return Err(SlotError::RebindWhileConnected { connections });
        }
        *current = worker;
        Ok(())
    }

    /// Suppress emissions to this slot. Direct calls still run.
    pub fn block(&self) {
        self.inner.blocked.store(true, Ordering::Release);
    }

    /// Resume emissions to this slot.
    pub fn unblock(&self) {
        self.inner.blocked.store(false, Ordering::Release);
    }

    /// Whether emissions to this slot are suppressed.
    pub fn is_blocked(&self) -> bool {
        self.inner.blocked.load(Ordering::Acquire)
    }

    /// Block the slot until the returned guard is dropped.
    ///
    /// The guard restores the previous blocked state. It does not keep the
    /// slot alive.
    pub fn blocker(&self) -> SlotBlocker {
        let was_blocked = self.inner.blocked.swap(true, Ordering::AcqRel);
        let slot: Weak<dyn BlockFlag> = Arc::downgrade(&self.inner) as Weak<SlotInner<Args, R>>;
        SlotBlocker { slot, was_blocked }
    }

    /// Number of live connections to this slot.
    pub fn connection_count(&self) -> usize {
        self.inner.live_connections()
    }

    pub(crate) fn invocable(&self) -> Arc<dyn Invocable<Args>> {
        self.inner.clone()
    }
}

impl<Args, R> SlotBase for Slot<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    fn args_type_id(&self) -> TypeId {
        TypeId::of::<Args>()
    }

    fn args_type_name(&self) -> &'static str {
        std::any::type_name::<Args>()
    }

    fn result_type_name(&self) -> &'static str {
        std::any::type_name::<R>()
    }

    fn worker(&self) -> Option<Worker> {
        self.inner.worker.read().clone()
    }

    fn set_worker(&self, worker: &Worker) -> Result<(), SlotError> {
        self.rebind(Some(worker.clone()))
    }

    fn is_blocked(&self) -> bool {
        self.inner.blocked.load(Ordering::Acquire)
    }

    fn block(&self) {
        self.inner.blocked.store(true, Ordering::Release);
    }

    fn unblock(&self) {
        self.inner.blocked.store(false, Ordering::Release);
    }

    fn blocker(&self) -> SlotBlocker {
        Slot::blocker(self)
    }

    fn connection_count(&self) -> usize {
        self.inner.live_connections()
    }

    fn endpoint_id(&self) -> usize {
        Invocable::endpoint_id(&*self.inner)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn erased_invocable(&self) -> Box<dyn Any> {
        Box::new(self.invocable())
    }
}

impl<Args, R> fmt::Debug for Slot<Args, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("args", &std::any::type_name::<Args>())
            .field("worker", &self.inner.worker.read().as_ref().map(Worker::name))
            .field("blocked", &self.inner.blocked.load(Ordering::Relaxed))
            .finish()
    }
}

/// RAII guard that keeps a slot blocked.
///
/// Created by [`Slot::blocker`] or [`SlotBase::blocker`]. Typical use is
/// suppressing an echo while a component mutates state it also listens to.
/// The guard holds the slot weakly; a slot destroyed under it still
/// disconnects as usual.
#[must_use = "the slot is unblocked as soon as the guard is dropped"]
pub struct SlotBlocker {
    slot: Weak<dyn BlockFlag>,
    was_blocked: bool,
}

impl Drop for SlotBlocker {
    fn drop(&mut self) {
        if self.was_blocked {
            return;
        }
        if let Some(slot) = self.slot.upgrade() {
            slot.flag().store(false, Ordering::Release);
        }
    }
}

impl fmt::Debug for SlotBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotBlocker")
            .field("was_blocked", &self.was_blocked)
            .finish()
    }
}

static_assertions::assert_impl_all!(Slot<(i32, String), u64>: Send, Sync, Clone);
static_assertions::assert_impl_all!(SlotBlocker: Send, Sync);
