//! Signals and connections.
//!
//! A [`Signal<Args>`] is a typed broadcast point holding an ordered list of
//! connections to [`Slot`]s. Connecting returns a [`Connection`] handle that
//! can disconnect or block that one link.
//!
//! # Key Types
//!
//! - [`Signal<Args>`] - the broadcast point
//! - [`Connection`] - handle on one signal-to-slot link
//! - [`ConnectionBlocker`] - RAII guard that blocks a connection
//! - [`EmitHandle`] - aggregate of the invocations started by `async_emit`
//! - [`SignalBase`] - type-erased view used by registries
//!
//! # Emission
//!
//! - [`Signal::emit`] runs every eligible slot on the calling thread, in
//!   registration order. It never hops threads, even for worker-bound slots.
//! - [`Signal::async_emit`] posts every eligible slot onto its bound worker
//!   (unbound slots run inline) and returns an [`EmitHandle`] to wait on.
//!
//! A connection is eligible when it is connected, not blocked, and its slot is
//! alive and not blocked.
//!
//! # Lifetimes
//!
//! Neither side owns the other. A signal holds weak references to its slots
//! and a connection holds only weak references and liveness watchers.
//! Dropping either endpoint disconnects every connection between them.
//!
//! # Example
//!
//! ```
//! use keystone_com::{Signal, Slot};
//! use parking_lot::Mutex;
//! use std::sync::Arc;
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let log_clone = log.clone();
//! let append = Slot::new(move |x: &i32| log_clone.lock().push(*x));
//!
//! let value_changed = Signal::<i32>::new();
//! let connection = value_changed.connect(&append);
//!
//! value_changed.emit(7);
//! assert_eq!(*log.lock(), vec![7]);
//!
//! connection.disconnect();
//! value_changed.emit(8);
//! assert_eq!(*log.lock(), vec![7]);
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::args::ArgumentPrefixes;
use crate::error::{SignalError, TaskError};
use crate::future::{TaskFuture, panic_message};
use crate::liveness::{Liveness, LivenessWatch};
use crate::logging::span_names;
use crate::slot::{Invocable, Slot, SlotBase};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a signal-slot connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// State shared by a signal entry and every handle on the same connection.
struct ConnectionState {
    id: ConnectionId,
    signal_id: usize,
    connected: AtomicBool,
    blocked: AtomicBool,
}

/// The part of a signal a connection needs to remove itself.
trait ConnectionOwner: Send + Sync {
    fn release(&self, id: ConnectionId);
}

#[derive(Clone)]
struct ConnectionLink {
    state: Arc<ConnectionState>,
    signal: Weak<dyn ConnectionOwner>,
    signal_alive: LivenessWatch,
    slot_alive: LivenessWatch,
}

/// Handle on one signal-to-slot link.
///
/// Connections are cheap to clone; all clones control the same link. A
/// connection never keeps its signal or slot alive. A default connection is
/// already disconnected.
///
/// Dropping a `Connection` does **not** disconnect it. Keep it in a
/// [`SigSlotConnection`](crate::SigSlotConnection) for scoped wiring.
#[derive(Clone, Default)]
pub struct Connection {
    link: Option<ConnectionLink>,
}

impl Connection {
    /// Identifier of the link, `None` for a default connection.
    pub fn id(&self) -> Option<ConnectionId> {
        self.link.as_ref().map(|link| link.state.id)
    }

    /// Check whether the link is still live.
    ///
    /// Turns `false` after an explicit disconnect or once either endpoint
    /// has been destroyed.
    pub fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|link| {
            link.state.connected.load(Ordering::Acquire)
                && link.signal_alive.is_alive()
                && link.slot_alive.is_alive()
        })
    }

    /// Disconnect the link. Idempotent and safe to call from inside a slot
    /// while the signal is emitting.
    pub fn disconnect(&self) {
        let Some(link) = &self.link else {
            return;
        };
        if link.state.connected.swap(false, Ordering::AcqRel) {
            if let Some(signal) = link.signal.upgrade() {
                signal.release(link.state.id);
            }
            tracing::trace!(target: "keystone_com::signal", connection = ?link.state.id, "disconnected");
        }
    }

    /// Skip this link on emission without removing it.
    pub fn block(&self) {
        if let Some(link) = &self.link {
            link.state.blocked.store(true, Ordering::Release);
        }
    }

    /// Resume delivery on this link.
    pub fn unblock(&self) {
        if let Some(link) = &self.link {
            link.state.blocked.store(false, Ordering::Release);
        }
    }

    /// Whether the link is blocked.
    pub fn is_blocked(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.state.blocked.load(Ordering::Acquire))
    }

    /// Block the link until the returned guard is dropped.
    pub fn blocker(&self) -> ConnectionBlocker {
        ConnectionBlocker::new(self.clone())
    }

    fn signal_id(&self) -> Option<usize> {
        self.link.as_ref().map(|link| link.state.signal_id)
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("connected", &self.is_connected())
            .field("blocked", &self.is_blocked())
            .finish()
    }
}

/// RAII guard that keeps a connection blocked.
///
/// The previous blocked state is restored on drop.
#[must_use = "the connection is unblocked as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ConnectionBlocker {
    connection: Connection,
    was_blocked: bool,
}

impl ConnectionBlocker {
    /// Block `connection` until the guard is dropped.
    pub fn new(connection: Connection) -> Self {
        let was_blocked = connection.is_blocked();
        connection.block();
        Self {
            connection,
            was_blocked,
        }
    }
}

impl Drop for ConnectionBlocker {
    fn drop(&mut self) {
        if !self.was_blocked {
            self.connection.unblock();
        }
    }
}

/// How an entry reaches its slot.
enum SlotRef<Args> {
    /// The slot itself, held weakly.
    Direct(Weak<dyn Invocable<Args>>),
    /// An argument-dropping adapter owned by the entry. The adapter holds
    /// the slot weakly.
    Projected(Arc<dyn Invocable<Args>>),
}

impl<Args> SlotRef<Args> {
    fn get(&self) -> Option<Arc<dyn Invocable<Args>>> {
        match self {
            Self::Direct(slot) => slot.upgrade(),
            Self::Projected(projection) => Some(projection.clone()),
        }
    }
}

impl<Args> Clone for SlotRef<Args> {
    fn clone(&self) -> Self {
        match self {
            Self::Direct(slot) => Self::Direct(slot.clone()),
            Self::Projected(projection) => Self::Projected(projection.clone()),
        }
    }
}

/// One link as seen from the signal.
struct ConnectionEntry<Args> {
    state: Arc<ConnectionState>,
    slot: SlotRef<Args>,
    slot_id: usize,
    slot_alive: LivenessWatch,
}

impl<Args> Clone for ConnectionEntry<Args> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            slot: self.slot.clone(),
            slot_id: self.slot_id,
            slot_alive: self.slot_alive.clone(),
        }
    }
}

impl<Args> ConnectionEntry<Args> {
    /// The slot to invoke, if this entry should receive an emission now.
    fn eligible(&self) -> Option<Arc<dyn Invocable<Args>>> {
        if !self.state.connected.load(Ordering::Acquire) || self.state.blocked.load(Ordering::Acquire) {
            return None;
        }
        let slot = self.slot.get()?;
        if !self.slot_alive.is_alive() || slot.is_blocked() {
            return None;
        }
        Some(slot)
    }

    fn is_live(&self) -> bool {
        self.state.connected.load(Ordering::Acquire) && self.slot_alive.is_alive()
    }
}

/// Builds an argument-dropping adapter for an erased slot.
type Projector = fn(&dyn SlotBase) -> Option<Box<dyn Any>>;

struct SignalInner<Args> {
    this: Weak<SignalInner<Args>>,
    connections: Mutex<Vec<ConnectionEntry<Args>>>,
    liveness: Liveness,
    /// Set when erased connects may drop trailing arguments.
    projector: Option<Projector>,
}

impl<Args: 'static> ConnectionOwner for SignalInner<Args> {
    fn release(&self, id: ConnectionId) {
        self.connections.lock().retain(|entry| entry.state.id != id);
    }
}

impl<Args> Drop for SignalInner<Args> {
    fn drop(&mut self) {
        self.liveness.kill();
        for entry in self.connections.get_mut().drain(..) {
            entry.state.connected.store(false, Ordering::Release);
        }
    }
}

/// A typed broadcast point with an ordered list of connected slots.
///
/// # Type Parameter
///
/// - `Args`: the argument type passed to connected slots. Use `()` for
///   signals with no arguments, or a tuple like `(String, i32)` for several.
///
/// # Thread Safety
///
/// `Signal<Args>` is a cheap, cloneable, `Send + Sync` handle; all clones
/// refer to the same connection list. Connect, disconnect and emit may run
/// concurrently from any thread. The connection list lock is never held while
/// a slot runs, so slots may connect or disconnect on the emitting signal.
pub struct Signal<Args> {
    inner: Arc<SignalInner<Args>>,
}

impl<Args> Clone for Signal<Args> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Args: Send + 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: Send + 'static> Signal<Args> {
    /// Create a new signal with no connections.
    pub fn new() -> Self {
        Self::with_projector(None)
    }

    /// Create a signal whose erased connects accept slots taking a prefix of
    /// `Args`.
    ///
    /// Registries and [`SigSlotConnection`](crate::SigSlotConnection) connect
    /// through [`connect_erased`](Self::connect_erased), so keyed wiring of
    /// such a signal drops trailing arguments as needed.
    pub fn with_argument_loss() -> Self
    where
        Args: ArgumentPrefixes,
    {
        Self::with_projector(Some(Args::project_slot as Projector))
    }

    fn with_projector(projector: Option<Projector>) -> Self {
        Self {
            inner: Arc::new_cyclic(|this| SignalInner {
                this: this.clone(),
                connections: Mutex::new(Vec::new()),
                liveness: Liveness::new(),
                projector,
            }),
        }
    }

    /// Identity of the signal, shared by all of its handles.
    pub fn endpoint_id(&self) -> usize {
        self.id()
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Connect a slot.
    ///
    /// Connecting the same slot twice creates two independent connections.
    pub fn connect<R>(&self, slot: &Slot<Args, R>) -> Connection
    where
        R: Send + 'static,
    {
        self.attach(slot.invocable())
    }

    /// Connect a type-erased slot.
    ///
    /// Fails with [`SignalError::ArgumentMismatch`] when the slot does not
    /// accept `Args`. A signal created with
    /// [`with_argument_loss`](Self::with_argument_loss) also accepts slots
    /// taking a prefix of `Args`.
    pub fn connect_erased(&self, slot: &dyn SlotBase) -> Result<Connection, SignalError> {
        self.connect_with(slot, self.inner.projector)
    }

    /// Connect a slot taking `Args` or a prefix of it.
    ///
    /// Trailing arguments are dropped for the slot. See
    /// [`ArgumentPrefixes`] for the accepted shapes.
    ///
    /// # Example
    ///
    /// ```
    /// use keystone_com::{Signal, Slot};
    ///
    /// let moved = Signal::<(f32, f64, String)>::new();
    /// let first = Slot::new(|x: &f32| println!("x = {x}"));
    /// let ping = Slot::new(|_: &()| println!("moved"));
    ///
    /// moved.connect_lossy(&first).unwrap();
    /// moved.connect_lossy(&ping).unwrap();
    /// moved.emit((1.0, 2.0, "label".to_string()));
    /// ```
    pub fn connect_lossy(&self, slot: &dyn SlotBase) -> Result<Connection, SignalError>
    where
        Args: ArgumentPrefixes,
    {
        self.connect_with(slot, Some(Args::project_slot as Projector))
    }

    fn connect_with(
        &self,
        slot: &dyn SlotBase,
        projector: Option<Projector>,
    ) -> Result<Connection, SignalError> {
        let mismatch = || {
            tracing::warn!(
                target: "keystone_com::signal",
                expected = std::any::type_name::<Args>(),
                found = slot.args_type_name(),
                "argument mismatch on connect"
            );
            SignalError::ArgumentMismatch {
                expected: std::any::type_name::<Args>(),
                found: slot.args_type_name(),
            }
        };

        if slot.args_type_id() == TypeId::of::<Args>() {
            let invocable = slot
                .erased_invocable()
                .downcast::<Arc<dyn Invocable<Args>>>()
                .map_err(|_| mismatch())?;
            return Ok(self.attach(*invocable));
        }

        let projection = projector
            .and_then(|project| project(slot))
            .and_then(|boxed| boxed.downcast::<Arc<dyn Invocable<Args>>>().ok())
            .ok_or_else(mismatch)?;
        tracing::trace!(
            target: "keystone_com::signal",
            signal = std::any::type_name::<Args>(),
            slot = slot.args_type_name(),
            "dropping trailing arguments"
        );
        Ok(self.attach_projected(*projection))
    }

    fn attach(&self, slot: Arc<dyn Invocable<Args>>) -> Connection {
        let reference = SlotRef::Direct(Arc::downgrade(&slot));
        self.attach_ref(&*slot, reference)
    }

    fn attach_projected(&self, projection: Arc<dyn Invocable<Args>>) -> Connection {
        let reference = SlotRef::Projected(projection.clone());
        self.attach_ref(&*projection, reference)
    }

    fn attach_ref(&self, slot: &dyn Invocable<Args>, reference: SlotRef<Args>) -> Connection {
        let entry = ConnectionEntry {
            state: Arc::new(ConnectionState {
                id: ConnectionId::next(),
                signal_id: self.id(),
                connected: AtomicBool::new(true),
                blocked: AtomicBool::new(false),
            }),
            slot: reference,
            slot_id: slot.endpoint_id(),
            slot_alive: slot.liveness(),
        };
        let connection = self.handle_for(&entry);
        self.inner.connections.lock().push(entry);

        slot.attach(connection.clone());
        tracing::trace!(target: "keystone_com::signal", connection = ?connection.id(), "connected");
        connection
    }

    fn handle_for(&self, entry: &ConnectionEntry<Args>) -> Connection {
        let signal: Weak<dyn ConnectionOwner> = self.inner.this.clone();
        Connection {
            link: Some(ConnectionLink {
                state: entry.state.clone(),
                signal,
                signal_alive: self.inner.liveness.watch(),
                slot_alive: entry.slot_alive.clone(),
            }),
        }
    }

    /// Disconnect a connection made on this signal.
    ///
    /// Connections belonging to another signal are left untouched.
    pub fn disconnect(&self, connection: &Connection) {
        if connection.signal_id() == Some(self.id()) {
            connection.disconnect();
        }
    }

    /// Disconnect every connection to `slot`.
    ///
    /// Fails with [`SignalError::NotConnected`] when the slot has no
    /// connection on this signal.
    pub fn disconnect_slot(&self, slot: &dyn SlotBase) -> Result<(), SignalError> {
        self.remove_slot(slot.endpoint_id())
    }

    fn remove_slot(&self, slot_id: usize) -> Result<(), SignalError> {
        let removed: Vec<_> = {
            let mut connections = self.inner.connections.lock();
            let (removed, kept) = std::mem::take(&mut *connections)
                .into_iter()
                .partition(|entry| entry.slot_id == slot_id);
            *connections = kept;
            removed
        };

        let mut any_live = false;
        for entry in removed {
            any_live |= entry.state.connected.swap(false, Ordering::AcqRel);
        }
        if any_live {
            Ok(())
        } else {
            Err(SignalError::NotConnected)
        }
    }

    /// The first live connection to `slot`, if any.
    pub fn get_connection(&self, slot: &dyn SlotBase) -> Option<Connection> {
        self.find_connection(slot.endpoint_id())
    }

    fn find_connection(&self, slot_id: usize) -> Option<Connection> {
        let connections = self.inner.connections.lock();
        connections
            .iter()
            .find(|entry| entry.slot_id == slot_id && entry.is_live())
            .map(|entry| self.handle_for(entry))
    }

    /// Disconnect all slots from this signal.
    pub fn disconnect_all(&self) {
        self.clear_connections();
    }

    fn clear_connections(&self) {
        let removed = std::mem::take(&mut *self.inner.connections.lock());
        for entry in removed {
            entry.state.connected.store(false, Ordering::Release);
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.live_count()
    }

    fn live_count(&self) -> usize {
        self.inner
            .connections
            .lock()
            .iter()
            .filter(|entry| entry.is_live())
            .count()
    }

    /// Block a connection made on this signal.
    pub fn block(&self, connection: &Connection) {
        if connection.signal_id() == Some(self.id()) {
            connection.block();
        }
    }

    /// Unblock a connection made on this signal.
    pub fn unblock(&self, connection: &Connection) {
        if connection.signal_id() == Some(self.id()) {
            connection.unblock();
        }
    }

    fn snapshot(&self) -> Vec<ConnectionEntry<Args>> {
        self.inner.connections.lock().clone()
    }

    /// Emit the signal on the calling thread.
    ///
    /// Every eligible slot runs once, in registration order. A panicking
    /// slot is logged and the remaining slots still run. An empty signal
    /// does nothing.
    pub fn emit(&self, args: Args) {
        let _span = tracing::trace_span!(target: "keystone_com::signal", span_names::EMIT).entered();
        let snapshot = self.snapshot();
        tracing::trace!(target: "keystone_com::signal", connections = snapshot.len(), "emitting signal");

        for entry in &snapshot {
            let Some(slot) = entry.eligible() else {
                continue;
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| slot.invoke(&args))) {
                tracing::error!(
                    target: "keystone_com::signal",
                    connection = ?entry.state.id,
                    panic = %panic_message(payload.as_ref()),
                    "slot panicked during emit"
                );
            }
        }
    }

    /// Dispatch the signal to every eligible slot's worker.
    ///
    /// Each slot receives its own clone of `args`. Unbound slots run inline.
    /// Slots whose worker no longer accepts tasks are skipped with a warning.
    pub fn async_emit(&self, args: Args) -> EmitHandle
    where
        Args: Clone,
    {
        let _span = tracing::trace_span!(target: "keystone_com::signal", span_names::ASYNC_EMIT).entered();
        let snapshot = self.snapshot();
        tracing::trace!(target: "keystone_com::signal", connections = snapshot.len(), "dispatching signal");

        let mut futures = Vec::with_capacity(snapshot.len());
        for entry in &snapshot {
            let Some(slot) = entry.eligible() else {
                continue;
            };
            match slot.dispatch(args.clone()) {
                Ok(future) => futures.push(future),
                Err(err) => tracing::warn!(
                    target: "keystone_com::signal",
                    connection = ?entry.state.id,
                    error = %err,
                    "skipping slot"
                ),
            }
        }
        EmitHandle { futures }
    }
}

impl<Args> fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("args", &std::any::type_name::<Args>())
            .field("connections", &self.inner.connections.lock().len())
            .field("argument_loss", &self.inner.projector.is_some())
            .finish()
    }
}

/// Type-erased view of a signal, used by registries and keyed wiring.
pub trait SignalBase: Send + Sync {
    /// `TypeId` of the argument type.
    fn args_type_id(&self) -> TypeId;

    /// Name of the argument type, for diagnostics.
    fn args_type_name(&self) -> &'static str;

    /// Connect a type-erased slot.
    fn connect_slot(&self, slot: &dyn SlotBase) -> Result<Connection, SignalError>;

    /// Disconnect every connection to `slot`.
    fn disconnect_slot(&self, slot: &dyn SlotBase) -> Result<(), SignalError>;

    /// The first live connection to `slot`, if any.
    fn get_connection(&self, slot: &dyn SlotBase) -> Option<Connection>;

    /// Disconnect all slots.
    fn disconnect_all(&self);

    /// Number of live connections.
    fn connection_count(&self) -> usize;

    /// Identity of the signal, shared by all of its handles.
    fn endpoint_id(&self) -> usize;

    /// Get this signal as `Any` for downcasting to a concrete [`Signal`].
    fn as_any(&self) -> &dyn Any;
}

impl<Args: Send + 'static> SignalBase for Signal<Args> {
    fn args_type_id(&self) -> TypeId {
        TypeId::of::<Args>()
    }

    fn args_type_name(&self) -> &'static str {
        std::any::type_name::<Args>()
    }

    fn connect_slot(&self, slot: &dyn SlotBase) -> Result<Connection, SignalError> {
        self.connect_erased(slot)
    }

    fn disconnect_slot(&self, slot: &dyn SlotBase) -> Result<(), SignalError> {
        self.remove_slot(slot.endpoint_id())
    }

    fn get_connection(&self, slot: &dyn SlotBase) -> Option<Connection> {
        self.find_connection(slot.endpoint_id())
    }

    fn disconnect_all(&self) {
        self.clear_connections();
    }

    fn connection_count(&self) -> usize {
        self.live_count()
    }

    fn endpoint_id(&self) -> usize {
        self.id()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The invocations started by one [`Signal::async_emit`].
#[must_use = "dropping the handle does not cancel the invocations"]
#[derive(Debug)]
pub struct EmitHandle {
    futures: Vec<TaskFuture<()>>,
}

impl EmitHandle {
    /// Number of dispatched invocations.
    pub fn len(&self) -> usize {
        self.futures.len()
    }

    /// Whether nothing was dispatched.
    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    /// Check whether every invocation has finished.
    pub fn is_finished(&self) -> bool {
        self.futures.iter().all(TaskFuture::is_finished)
    }

    /// Block until every invocation has finished.
    pub fn wait(&self) {
        for future in &self.futures {
            future.wait();
        }
    }

    /// Wait with a timeout shared by all invocations.
    ///
    /// Returns `true` if every invocation finished in time.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.futures.iter().all(|future| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            future.wait_timeout(remaining)
        })
    }

    /// Wait for every invocation and collect the results in dispatch order.
    pub fn join(self) -> Vec<Result<(), TaskError>> {
        self.futures.into_iter().map(TaskFuture::get).collect()
    }
}

static_assertions::assert_impl_all!(Signal<(i32, String)>: Send, Sync, Clone);
static_assertions::assert_impl_all!(Connection: Send, Sync, Clone);
static_assertions::assert_impl_all!(EmitHandle: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Worker;
    use crate::error::SlotError;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn recorder<Args: Clone + Send + 'static>() -> (Slot<Args>, Arc<Mutex<Vec<Args>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let slot = Slot::new(move |args: &Args| log_clone.lock().push(args.clone()));
        (slot, log)
    }

    #[test]
    fn test_signal_connect_emit() {
        let signal = Signal::<i32>::new();
        let (slot, log) = recorder();

        let connection = signal.connect(&slot);
        assert!(connection.is_connected());
        assert_eq!(signal.connection_count(), 1);

        signal.emit(7);
        assert_eq!(*log.lock(), vec![7]);
    }

    #[test]
    fn test_emit_runs_on_calling_thread() {
        let worker = Worker::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let slot = Slot::with_worker(
            move |_: &()| *seen_clone.lock() = Some(thread::current().id()),
            &worker,
        );

        let signal = Signal::<()>::new();
        signal.connect(&slot);
        signal.emit(());
        assert_eq!(*seen.lock(), Some(thread::current().id()));
        worker.stop();
    }

    #[test]
    fn test_emit_preserves_registration_order() {
        let signal = Signal::<()>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let slots: Vec<_> = (0..5)
            .map(|i| {
                let order = order.clone();
                Slot::new(move |_: &()| order.lock().push(i))
            })
            .collect();
        for slot in &slots {
            signal.connect(slot);
        }

        signal.emit(());
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_emit_without_connections() {
        let signal = Signal::<String>::new();
        signal.emit("nobody listens".to_string());
        assert!(signal.async_emit("nobody".to_string()).is_empty());
    }

    #[test]
    fn test_disconnect() {
        let signal = Signal::<i32>::new();
        let (slot, log) = recorder();

        let connection = signal.connect(&slot);
        signal.emit(1);
        signal.disconnect(&connection);
        assert!(!connection.is_connected());
        signal.emit(2);

        // Idempotent
        connection.disconnect();
        signal.disconnect(&connection);

        assert_eq!(*log.lock(), vec![1]);
        assert_eq!(signal.connection_count(), 0);
        assert_eq!(slot.connection_count(), 0);
    }

    #[test]
    fn test_disconnect_foreign_connection_is_ignored() {
        let first = Signal::<i32>::new();
        let second = Signal::<i32>::new();
        let (slot, _) = recorder();

        let connection = first.connect(&slot);
        second.disconnect(&connection);
        assert!(connection.is_connected());
    }

    #[test]
    fn test_default_connection_is_expired() {
        let connection = Connection::default();
        assert!(!connection.is_connected());
        assert_eq!(connection.id(), None);
        connection.disconnect();
        connection.block();
        assert!(!connection.is_blocked());
    }

    #[test]
    fn test_duplicate_connections_are_independent() {
        let signal = Signal::<i32>::new();
        let (slot, log) = recorder();

        let first = signal.connect(&slot);
        let second = signal.connect(&slot);
        assert_ne!(first, second);
        assert_eq!(signal.connection_count(), 2);

        signal.emit(1);
        first.disconnect();
        signal.emit(2);

        assert_eq!(*log.lock(), vec![1, 1, 2]);
        assert!(second.is_connected());
    }

    #[test]
    fn test_disconnect_slot() {
        let signal = Signal::<i32>::new();
        let (slot, log) = recorder();
        let (other, _) = recorder::<i32>();

        signal.connect(&slot);
        signal.connect(&slot);
        assert_eq!(signal.disconnect_slot(&slot), Ok(()));
        assert_eq!(signal.disconnect_slot(&slot), Err(SignalError::NotConnected));
        assert_eq!(signal.disconnect_slot(&other), Err(SignalError::NotConnected));

        signal.emit(3);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_get_connection() {
        let signal = Signal::<i32>::new();
        let (slot, _) = recorder();
        let (other, _) = recorder::<i32>();

        let connection = signal.connect(&slot);
        assert_eq!(signal.get_connection(&slot), Some(connection.clone()));
        assert_eq!(signal.get_connection(&other), None);

        connection.disconnect();
        assert_eq!(signal.get_connection(&slot), None);
    }

    #[test]
    fn test_disconnect_all() {
        let signal = Signal::<i32>::new();
        let (a, log_a) = recorder();
        let (b, log_b) = recorder();

        let ca = signal.connect(&a);
        let cb = signal.connect(&b);
        signal.disconnect_all();

        assert!(!ca.is_connected());
        assert!(!cb.is_connected());
        assert_eq!(signal.connection_count(), 0);

        signal.emit(5);
        assert!(log_a.lock().is_empty());
        assert!(log_b.lock().is_empty());
    }

    #[test]
    fn test_block_connection() {
        let signal = Signal::<i32>::new();
        let (a, log_a) = recorder();
        let (b, log_b) = recorder();

        let ca = signal.connect(&a);
        signal.connect(&b);

        signal.block(&ca);
        assert!(ca.is_blocked());
        signal.emit(1);
        assert!(log_a.lock().is_empty());
        assert_eq!(*log_b.lock(), vec![1]);

        signal.unblock(&ca);
        signal.emit(2);
        assert_eq!(*log_a.lock(), vec![2]);
        assert_eq!(*log_b.lock(), vec![1, 2]);
    }

    #[test]
    fn test_block_slot() {
        let signal = Signal::<i32>::new();
        let (a, log_a) = recorder();
        let (b, log_b) = recorder();
        signal.connect(&a);
        signal.connect(&b);

        a.block();
        signal.emit(1);
        a.unblock();
        signal.emit(2);

        assert_eq!(*log_a.lock(), vec![2]);
        assert_eq!(*log_b.lock(), vec![1, 2]);
    }

    #[test]
    fn test_connection_blocker() {
        let signal = Signal::<i32>::new();
        let (slot, log) = recorder();
        let connection = signal.connect(&slot);

        {
            let _blocker = connection.blocker();
            signal.emit(1);
        }
        signal.emit(2);

        assert_eq!(*log.lock(), vec![2]);
        assert!(!connection.is_blocked());
    }

    #[test]
    fn test_dropping_slot_disconnects() {
        let signal = Signal::<i32>::new();
        let (slot, log) = recorder();
        let connection = signal.connect(&slot);

        drop(slot);
        assert!(!connection.is_connected());
        assert_eq!(signal.connection_count(), 0);

        signal.emit(1);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_dropping_signal_disconnects() {
        let signal = Signal::<i32>::new();
        let (slot, _) = recorder();
        let connection = signal.connect(&slot);
        assert_eq!(slot.connection_count(), 1);

        drop(signal);
        assert!(!connection.is_connected());
        assert_eq!(slot.connection_count(), 0);
        connection.disconnect();
    }

    #[test]
    fn test_disconnect_inside_slot_during_emit() {
        let signal = Signal::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let own_connection = Arc::new(Mutex::new(Connection::default()));

        let count_clone = count.clone();
        let own_clone = own_connection.clone();
        let slot = Slot::new(move |_: &()| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            own_clone.lock().disconnect();
        });
        *own_connection.lock() = signal.connect(&slot);

        signal.emit(());
        signal.emit(());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connect_inside_slot_during_emit() {
        let signal = Signal::<()>::new();
        let (late, late_log) = recorder::<()>();

        let signal_clone = signal.clone();
        let connector = Slot::new(move |_: &()| {
            signal_clone.connect(&late);
        });
        signal.connect(&connector);

        // The new connection is not part of the running emission
        signal.emit(());
        assert!(late_log.lock().is_empty());
        signal.emit(());
        assert_eq!(late_log.lock().len(), 1);
    }

    #[test]
    fn test_panicking_slot_is_isolated() {
        let signal = Signal::<i32>::new();
        let failing = Slot::new(|_: &i32| -> u8 { panic!("slot failure") });
        let (slot, log) = recorder();
        signal.connect(&failing);
        signal.connect(&slot);

        signal.emit(4);
        assert_eq!(*log.lock(), vec![4]);
    }

    #[test]
    fn test_connect_erased_mismatch() {
        let signal = Signal::<i32>::new();
        let wrong = Slot::new(|_: &String| {});

        let err = signal.connect_erased(&wrong).unwrap_err();
        assert_eq!(
            err,
            SignalError::ArgumentMismatch {
                expected: "i32",
                found: std::any::type_name::<String>(),
            }
        );
        assert_eq!(signal.connection_count(), 0);
    }

    #[test]
    fn test_connect_erased_with_return_value() {
        let signal = Signal::<i32>::new();
        let doubled = Arc::new(AtomicUsize::new(0));
        let doubled_clone = doubled.clone();
        let slot = Slot::new(move |x: &i32| {
            doubled_clone.store((*x * 2) as usize, Ordering::SeqCst);
            *x * 2
        });

        let erased: &dyn SignalBase = &signal;
        erased.connect_slot(&slot).unwrap();
        signal.emit(21);
        assert_eq!(doubled.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_async_emit_runs_on_worker() {
        let worker = Worker::new();
        let count = Arc::new(AtomicUsize::new(0));
        let thread_seen = Arc::new(Mutex::new(None));

        let count_clone = count.clone();
        let thread_clone = thread_seen.clone();
        let slot = Slot::with_worker(
            move |x: &usize| {
                count_clone.fetch_add(*x, Ordering::SeqCst);
                *thread_clone.lock() = Some(thread::current().id());
            },
            &worker,
        );

        let signal = Signal::<usize>::new();
        signal.connect(&slot);

        let handle = signal.async_emit(1);
        assert_eq!(handle.len(), 1);
        handle.wait();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*thread_seen.lock(), Some(worker.thread_id()));
        worker.stop();
    }

    #[test]
    fn test_async_emit_join_reports_panics() {
        let worker = Worker::new();
        let signal = Signal::<()>::new();
        let ok = Slot::with_worker(|_: &()| {}, &worker);
        let failing = Slot::with_worker(|_: &()| -> u8 { panic!("async failure") }, &worker);
        signal.connect(&ok);
        signal.connect(&failing);

        let results = signal.async_emit(()).join();
        assert_eq!(
            results,
            vec![Ok(()), Err(TaskError::Panicked("async failure".to_string()))]
        );
        worker.stop();
    }

    #[test]
    fn test_async_emit_skips_stopped_worker() {
        let stopped = Worker::new();
        let running = Worker::new();
        let signal = Signal::<()>::new();

        let (unbound, unbound_log) = recorder::<()>();
        let dead = Slot::with_worker(|_: &()| {}, &stopped);
        let live = Slot::with_worker(|_: &()| {}, &running);
        signal.connect(&unbound);
        signal.connect(&dead);
        signal.connect(&live);
        stopped.stop();

        let handle = signal.async_emit(());
        assert_eq!(handle.len(), 2);
        assert!(handle.wait_timeout(Duration::from_secs(5)));
        assert_eq!(unbound_log.lock().len(), 1);
        running.stop();
    }

    #[test]
    fn test_drop_signal_while_slot_running() {
        let worker = Worker::new();
        let signal = Signal::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Mutex::new(()));
        let guard = gate.lock();

        let count_clone = count.clone();
        let gate_clone = gate.clone();
        let slot = Slot::with_worker(
            move |_: &()| {
                drop(gate_clone.lock());
                count_clone.fetch_add(1, Ordering::SeqCst);
            },
            &worker,
        );
        let connection = signal.connect(&slot);

        let handle = signal.async_emit(());
        drop(signal);
        assert!(!connection.is_connected());
        drop(guard);

        handle.wait();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        worker.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rebind_connected_slot_fails() {
        let first = Worker::new();
        let second = Worker::new();
        let signal = Signal::<()>::new();
        let slot = Slot::with_worker(|_: &()| {}, &first);

        let connection = signal.connect(&slot);
        assert_eq!(slot.set_worker(&first), Ok(()));
        assert_eq!(
            slot.set_worker(&second),
            Err(SlotError::RebindWhileConnected { connections: 1 })
        );
        assert_eq!(slot.clear_worker(), Err(SlotError::RebindWhileConnected { connections: 1 }));

        connection.disconnect();
        assert_eq!(slot.set_worker(&second), Ok(()));
        first.stop();
        second.stop();
    }

    #[test]
    fn test_emit_from_multiple_threads() {
        let signal = Signal::<usize>::new();
        let total = Arc::new(AtomicUsize::new(0));
        let total_clone = total.clone();
        let slot = Slot::new(move |x: &usize| {
            total_clone.fetch_add(*x, Ordering::SeqCst);
        });
        signal.connect(&slot);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        signal.emit(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(total.load(Ordering::SeqCst), 400);
    }

    #[test]
    fn test_concurrent_connect_and_disconnect() {
        let signal = Signal::<()>::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let slot = Slot::new(|_: &()| {});
                        let connection = signal.connect(&slot);
                        signal.emit(());
                        connection.disconnect();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(signal.connection_count(), 0);
    }

    #[test]
    fn test_erased_connect_needs_argument_loss_opt_in() {
        let first = Slot::new(|_: &u32| {});
        let erased: &dyn SlotBase = &first;

        let strict = Signal::<(u32, String)>::new();
        assert!(matches!(
            strict.connect_erased(erased),
            Err(SignalError::ArgumentMismatch { .. })
        ));

        let lossy = Signal::<(u32, String)>::with_argument_loss();
        let connection = lossy.connect_erased(erased).unwrap();
        assert!(connection.is_connected());
        assert_eq!(lossy.get_connection(erased), Some(connection));

        // Prefixes only, never reordering
        let reordered = Slot::new(|_: &String| {});
        assert!(lossy.connect_erased(&reordered).is_err());
    }

    #[test]
    fn test_emit_spans_use_shared_names() {
        use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};

        struct SpanNames(Arc<Mutex<Vec<&'static str>>>);

        impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanNames {
            fn on_new_span(
                &self,
                attrs: &tracing::span::Attributes<'_>,
                _id: &tracing::span::Id,
                _ctx: LayerContext<'_, S>,
            ) {
                self.0.lock().push(attrs.metadata().name());
            }
        }

        let names = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(SpanNames(names.clone()));
        tracing::subscriber::with_default(subscriber, || {
            let signal = Signal::<u8>::new();
            signal.emit(1);
            signal.async_emit(2).wait();
        });

        assert_eq!(*names.lock(), vec![span_names::EMIT, span_names::ASYNC_EMIT]);
    }
}
