//! Core communication layer for Keystone.
//!
//! This crate provides the in-process messaging core every Keystone
//! component is built on:
//!
//! - **Workers**: dedicated threads running a FIFO task loop with timers
//! - **Slots**: type-erased callable endpoints, optionally bound to a worker
//! - **Signals**: typed broadcast points with ordered, auto-invalidating
//!   connections, emitted synchronously or dispatched to workers; slots
//!   may take a prefix of a signal's arguments ([`ArgumentPrefixes`])
//! - **Registries**: string-keyed endpoint maps for configuration-driven
//!   wiring, plus the [`SigSlotConnection`] helper and [`Proxy`] channels
//! - **Context**: the process-scoped set of named workers
//!
//! # Signal/Slot Example
//!
//! ```
//! use keystone_com::{Signal, Slot};
//!
//! // A signal that notifies when a value changes
//! let value_changed = Signal::<i32>::new();
//!
//! // A slot handling the notification
//! let on_change = Slot::new(|value: &i32| {
//!     println!("Value changed to: {}", value);
//! });
//!
//! let connection = value_changed.connect(&on_change);
//! value_changed.emit(42);
//!
//! // Disconnect when done
//! connection.disconnect();
//! ```
//!
//! # Worker Example
//!
//! ```
//! use keystone_com::{Signal, Slot, Worker};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let worker = Worker::new();
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! let counter_clone = counter.clone();
//! let increment = Slot::with_worker(
//!     move |step: &usize| {
//!         counter_clone.fetch_add(*step, Ordering::SeqCst);
//!     },
//!     &worker,
//! );
//!
//! let tick = Signal::<usize>::new();
//! tick.connect(&increment);
//!
//! // Runs the slot on the worker thread and waits for it
//! tick.async_emit(1).wait();
//! assert_eq!(counter.load(Ordering::SeqCst), 1);
//!
//! worker.stop();
//! ```
//!
//! # Hosting Example
//!
//! ```no_run
//! use keystone_com::Context;
//!
//! let context = Context::new();
//! let main = context.default_worker();
//!
//! let handle = main.clone();
//! main.post(move || {
//!     // ... start components, later:
//!     handle.request_stop();
//! })
//! .unwrap();
//!
//! let exit_code = main.get_future().get_cloned().unwrap_or(1);
//! context.shutdown();
//! std::process::exit(exit_code);
//! ```

mod args;
mod context;
mod error;
mod future;
mod helper;
mod liveness;
pub mod logging;
mod proxy;
mod registry;
pub mod signal;
pub mod slot;
mod timer;
pub mod worker;

pub use args::ArgumentPrefixes;
pub use context::{Context, ContextConfig, DEFAULT_WORKER_KEY};
pub use error::{
    KeystoneError, RegistryError, Result, SignalError, SlotError, TaskError, TimerError, WorkerError,
};
pub use future::TaskFuture;
pub use helper::SigSlotConnection;
pub use liveness::{Liveness, LivenessWatch};
pub use logging::{EndpointDebug, PerfSpan};
pub use proxy::Proxy;
pub use registry::{HasSignals, HasSlots, Signals, Slots};
pub use signal::{Connection, ConnectionBlocker, ConnectionId, EmitHandle, Signal, SignalBase};
pub use slot::{Slot, SlotBase, SlotBlocker};
pub use timer::{Timer, TimerId, TimerState};
pub use worker::{DEFAULT_WORKER_NAME, Worker, WorkerBuilder, WorkerConfig, WorkerState};
