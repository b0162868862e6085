//! String-keyed endpoint registries.
//!
//! A component owns one [`Slots`] and one [`Signals`] map and exposes them
//! through [`HasSlots`] / [`HasSignals`]. Configuration-driven wiring then
//! looks endpoints up by key without knowing their types at the call site;
//! type compatibility is checked when the looked-up handles are connected.
//!
//! Registries own endpoint handles, never connections.
//!
//! # Example
//!
//! ```
//! use keystone_com::{HasSignals, HasSlots, Signal, Signals, Slot, Slots};
//!
//! struct Camera {
//!     signals: Signals,
//! }
//!
//! struct Viewer {
//!     slots: Slots,
//! }
//!
//! impl HasSignals for Camera {
//!     fn signals(&self) -> &Signals {
//!         &self.signals
//!     }
//! }
//!
//! impl HasSlots for Viewer {
//!     fn slots(&self) -> &Slots {
//!         &self.slots
//!     }
//! }
//!
//! let mut camera = Camera { signals: Signals::new() };
//! camera.signals.declare("frame_ready", Signal::<u64>::new());
//!
//! let mut viewer = Viewer { slots: Slots::new() };
//! viewer.slots.declare("show", Slot::new(|frame: &u64| println!("frame {frame}")));
//!
//! let signal = camera.signal("frame_ready").unwrap();
//! let slot = viewer.slot("show").unwrap();
//! signal.connect_slot(slot.as_ref()).unwrap();
//!
//! camera.signals.get::<u64>("frame_ready").unwrap().emit(1);
//! ```

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{RegistryError, SlotError};
use crate::signal::{Signal, SignalBase};
use crate::slot::{Slot, SlotBase};
use crate::worker::Worker;

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<&str> {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

/// Named slots of one component.
#[derive(Default)]
pub struct Slots {
    entries: HashMap<String, Arc<dyn SlotBase>>,
}

impl Slots {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `slot` under `key`, returning the slot it replaces.
    pub fn declare<S>(&mut self, key: impl Into<String>, slot: S) -> Option<Arc<dyn SlotBase>>
    where
        S: SlotBase + 'static,
    {
        self.declare_erased(key, Arc::new(slot))
    }

    /// Register an already erased slot under `key`.
    pub fn declare_erased(
        &mut self,
        key: impl Into<String>,
        slot: Arc<dyn SlotBase>,
    ) -> Option<Arc<dyn SlotBase>> {
        let key = key.into();
        tracing::trace!(
            target: "keystone_com::registry",
            key = %key,
            args = slot.args_type_name(),
            "slot declared"
        );
        self.entries.insert(key, slot)
    }

    /// Look up a slot by key.
    pub fn lookup(&self, key: &str) -> Option<Arc<dyn SlotBase>> {
        self.entries.get(key).cloned()
    }

    /// Look up a slot and recover its concrete type.
    pub fn get<Args, R>(&self, key: &str) -> Result<Slot<Args, R>, RegistryError>
    where
        Args: Send + 'static,
        R: Send + 'static,
    {
        let slot = self
            .entries
            .get(key)
            .ok_or_else(|| RegistryError::unknown_key(key))?;

        if let Some(typed) = slot.as_any().downcast_ref::<Slot<Args, R>>() {
            return Ok(typed.clone());
        }

        let (expected, found) = if slot.args_type_id() == TypeId::of::<Args>() {
            (type_name::<R>(), slot.result_type_name())
        } else {
            (type_name::<Args>(), slot.args_type_name())
        };
        Err(RegistryError::TypeMismatch {
            key: key.to_string(),
            expected,
            found,
        })
    }

    /// Remove a slot. Its connections stay in place until the last handle
    /// on the slot is dropped.
    pub fn remove(&mut self, key: &str) -> Option<Arc<dyn SlotBase>> {
        self.entries.remove(key)
    }

    /// Check whether a key is declared.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Declared keys in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        sorted_keys(&self.entries)
    }

    /// Number of declared slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no slot is declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, slot)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn SlotBase>)> {
        self.entries.iter().map(|(key, slot)| (key.as_str(), slot))
    }

    /// Bind every declared slot to `worker`.
    ///
    /// Stops at the first slot that refuses the new binding; slots visited
    /// before it keep the new worker.
    pub fn set_worker(&self, worker: &Worker) -> Result<(), SlotError> {
        for key in sorted_keys(&self.entries) {
            if let Some(slot) = self.entries.get(key) {
                slot.set_worker(worker)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Slots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

/// Named signals of one component.
#[derive(Default)]
pub struct Signals {
    entries: HashMap<String, Arc<dyn SignalBase>>,
}

impl Signals {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `signal` under `key`, returning the signal it replaces.
    pub fn declare<S>(&mut self, key: impl Into<String>, signal: S) -> Option<Arc<dyn SignalBase>>
    where
        S: SignalBase + 'static,
    {
        self.declare_erased(key, Arc::new(signal))
    }

    /// Register an already erased signal under `key`.
    pub fn declare_erased(
        &mut self,
        key: impl Into<String>,
        signal: Arc<dyn SignalBase>,
    ) -> Option<Arc<dyn SignalBase>> {
        let key = key.into();
        tracing::trace!(
            target: "keystone_com::registry",
            key = %key,
            args = signal.args_type_name(),
            "signal declared"
        );
        self.entries.insert(key, signal)
    }

    /// Look up a signal by key.
    pub fn lookup(&self, key: &str) -> Option<Arc<dyn SignalBase>> {
        self.entries.get(key).cloned()
    }

    /// Look up a signal and recover its concrete type.
    pub fn get<Args>(&self, key: &str) -> Result<Signal<Args>, RegistryError>
    where
        Args: Send + 'static,
    {
        let signal = self
            .entries
            .get(key)
            .ok_or_else(|| RegistryError::unknown_key(key))?;

        signal
            .as_any()
            .downcast_ref::<Signal<Args>>()
            .cloned()
            .ok_or_else(|| RegistryError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<Args>(),
                found: signal.args_type_name(),
            })
    }

    /// Remove a signal.
    pub fn remove(&mut self, key: &str) -> Option<Arc<dyn SignalBase>> {
        self.entries.remove(key)
    }

    /// Check whether a key is declared.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Declared keys in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        sorted_keys(&self.entries)
    }

    /// Number of declared signals.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no signal is declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, signal)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn SignalBase>)> {
        self.entries.iter().map(|(key, signal)| (key.as_str(), signal))
    }

    /// Disconnect every declared signal from all of its slots.
    pub fn disconnect_all(&self) {
        for signal in self.entries.values() {
            signal.disconnect_all();
        }
    }
}

impl fmt::Debug for Signals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

/// A component exposing named slots.
pub trait HasSlots {
    /// The component's slot registry.
    fn slots(&self) -> &Slots;

    /// Look up one slot by key.
    fn slot(&self, key: &str) -> Option<Arc<dyn SlotBase>> {
        self.slots().lookup(key)
    }
}

/// A component exposing named signals.
pub trait HasSignals {
    /// The component's signal registry.
    fn signals(&self) -> &Signals;

    /// Look up one signal by key.
    fn signal(&self, key: &str) -> Option<Arc<dyn SignalBase>> {
        self.signals().lookup(key)
    }
}

impl HasSlots for Slots {
    fn slots(&self) -> &Slots {
        self
    }
}

impl HasSignals for Signals {
    fn signals(&self) -> &Signals {
        self
    }
}

static_assertions::assert_impl_all!(Slots: Send, Sync);
static_assertions::assert_impl_all!(Signals: Send, Sync);
