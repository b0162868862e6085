//! Named channels connecting signals and slots that never see each other.
//!
//! A channel collects signals and slots registered under one name. Every
//! signal on a channel is connected to every slot on it, whichever side
//! arrives first. All endpoints of one channel share an argument type; the
//! first endpoint fixes it and later mismatches fail with
//! [`SignalError::ArgumentMismatch`].

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SignalError;
use crate::signal::{Connection, SignalBase};
use crate::slot::SlotBase;

struct Link {
    signal_id: usize,
    slot_id: usize,
    connection: Connection,
}

struct Channel {
    args: (TypeId, &'static str),
    signals: Vec<Arc<dyn SignalBase>>,
    slots: Vec<Arc<dyn SlotBase>>,
    links: Vec<Link>,
}

impl Channel {
    fn new(args: (TypeId, &'static str)) -> Self {
        Self {
            args,
            signals: Vec::new(),
            slots: Vec::new(),
            links: Vec::new(),
        }
    }

    fn check(&self, args: TypeId, name: &'static str) -> Result<(), SignalError> {
        if self.args.0 == args {
            Ok(())
        } else {
            Err(SignalError::ArgumentMismatch {
                expected: self.args.1,
                found: name,
            })
        }
    }

    fn is_empty(&self) -> bool {
        self.signals.is_empty() && self.slots.is_empty()
    }

    fn unlink(&mut self, matches: impl Fn(&Link) -> bool) {
        self.links.retain(|link| {
            if matches(link) {
                link.connection.disconnect();
                false
            } else {
                true
            }
        });
    }
}

/// Registry of named channels.
///
/// The proxy keeps the registered endpoints alive until they are removed.
///
/// # Example
///
/// ```
/// use keystone_com::{Proxy, Signal, Slot};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let proxy = Proxy::new();
/// let hits = Arc::new(AtomicUsize::new(0));
///
/// let hits_clone = hits.clone();
/// proxy
///     .connect_slot("refresh", Slot::new(move |_: &()| {
///         hits_clone.fetch_add(1, Ordering::SeqCst);
///     }))
///     .unwrap();
///
/// let refresh = Signal::<()>::new();
/// proxy.connect_signal("refresh", refresh.clone()).unwrap();
///
/// refresh.emit(());
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Default)]
pub struct Proxy {
    channels: Mutex<HashMap<String, Channel>>,
}

impl Proxy {
    /// Create a proxy with no channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signal to `channel`, connecting it to every slot already there.
    pub fn connect_signal<S>(&self, channel: &str, signal: S) -> Result<(), SignalError>
    where
        S: SignalBase + 'static,
    {
        self.connect_signal_erased(channel, Arc::new(signal))
    }

    /// Add an already erased signal to `channel`.
    pub fn connect_signal_erased(
        &self,
        channel: &str,
        signal: Arc<dyn SignalBase>,
    ) -> Result<(), SignalError> {
        let mut channels = self.channels.lock();
        let entry = channels
            .entry(channel.to_string())
            .or_insert_with(|| Channel::new((signal.args_type_id(), signal.args_type_name())));
        entry.check(signal.args_type_id(), signal.args_type_name())?;

        for slot in &entry.slots {
            let connection = signal.connect_slot(slot.as_ref())?;
            entry.links.push(Link {
                signal_id: signal.endpoint_id(),
                slot_id: slot.endpoint_id(),
                connection,
            });
        }
        tracing::debug!(
            target: "keystone_com::registry",
            channel,
            slots = entry.slots.len(),
            "signal joined channel"
        );
        entry.signals.push(signal);
        Ok(())
    }

    /// Add a slot to `channel`, connecting every signal already there to it.
    pub fn connect_slot<S>(&self, channel: &str, slot: S) -> Result<(), SignalError>
    where
        S: SlotBase + 'static,
    {
        self.connect_slot_erased(channel, Arc::new(slot))
    }

    /// Add an already erased slot to `channel`.
    pub fn connect_slot_erased(
        &self,
        channel: &str,
        slot: Arc<dyn SlotBase>,
    ) -> Result<(), SignalError> {
        let mut channels = self.channels.lock();
        let entry = channels
            .entry(channel.to_string())
            .or_insert_with(|| Channel::new((slot.args_type_id(), slot.args_type_name())));
        entry.check(slot.args_type_id(), slot.args_type_name())?;

        for signal in &entry.signals {
            let connection = signal.connect_slot(slot.as_ref())?;
            entry.links.push(Link {
                signal_id: signal.endpoint_id(),
                slot_id: slot.endpoint_id(),
                connection,
            });
        }
        tracing::debug!(
            target: "keystone_com::registry",
            channel,
            signals = entry.signals.len(),
            "slot joined channel"
        );
        entry.slots.push(slot);
        Ok(())
    }

    /// Remove a signal from `channel`, disconnecting it from the channel's
    /// slots. Returns `false` when the signal was not on the channel.
    pub fn disconnect_signal(&self, channel: &str, signal: &dyn SignalBase) -> bool {
        let id = signal.endpoint_id();
        self.remove(channel, |entry| {
            let before = entry.signals.len();
            entry.signals.retain(|s| s.endpoint_id() != id);
            entry.unlink(|link| link.signal_id == id);
            entry.signals.len() != before
        })
    }

    /// Remove a slot from `channel`, disconnecting it from the channel's
    /// signals. Returns `false` when the slot was not on the channel.
    pub fn disconnect_slot(&self, channel: &str, slot: &dyn SlotBase) -> bool {
        let id = slot.endpoint_id();
        self.remove(channel, |entry| {
            let before = entry.slots.len();
            entry.slots.retain(|s| s.endpoint_id() != id);
            entry.unlink(|link| link.slot_id == id);
            entry.slots.len() != before
        })
    }

    fn remove(&self, channel: &str, f: impl FnOnce(&mut Channel) -> bool) -> bool {
        let mut channels = self.channels.lock();
        let Some(entry) = channels.get_mut(channel) else {
            return false;
        };
        let removed = f(entry);
        if entry.is_empty() {
            channels.remove(channel);
        }
        removed
    }

    /// Number of channels with at least one endpoint.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Names of all channels, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Disconnect and drop every channel.
    pub fn clear(&self) {
        let channels = std::mem::take(&mut *self.channels.lock());
        for (_, channel) in channels {
            for link in channel.links {
                link.connection.disconnect();
            }
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("channels", &self.channel_names())
            .finish()
    }
}

static_assertions::assert_impl_all!(Proxy: Send, Sync);
