//! Scoped keyed wiring between components.

use crate::error::{RegistryError, Result};
use crate::registry::{HasSignals, HasSlots};
use crate::signal::Connection;

/// A set of connections made together and torn down together.
///
/// A component driving cross-component wiring connects during its start
/// phase and calls [`disconnect`](Self::disconnect) during its stop phase.
/// Dropping the helper disconnects everything it still holds.
///
/// # Example
///
/// ```
/// use keystone_com::{SigSlotConnection, Signal, Signals, Slot, Slots};
///
/// let mut signals = Signals::new();
/// let ticked = Signal::<u32>::new();
/// signals.declare("ticked", ticked.clone());
///
/// let mut slots = Slots::new();
/// slots.declare("on_tick", Slot::new(|n: &u32| println!("tick {n}")));
///
/// let mut wiring = SigSlotConnection::new();
/// wiring.connect(&signals, "ticked", &slots, "on_tick").unwrap();
/// assert_eq!(ticked.connection_count(), 1);
///
/// wiring.disconnect();
/// assert_eq!(ticked.connection_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct SigSlotConnection {
    connections: Vec<Connection>,
}

impl SigSlotConnection {
    /// Create an empty helper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect `signal_key` of `source` to `slot_key` of `target`.
    ///
    /// Fails with [`RegistryError::UnknownKey`] when either key is missing
    /// and with [`SignalError::ArgumentMismatch`](crate::SignalError) when the
    /// endpoints disagree on the argument type.
    pub fn connect(
        &mut self,
        source: &dyn HasSignals,
        signal_key: &str,
        target: &dyn HasSlots,
        slot_key: &str,
    ) -> Result<()> {
        let signal = source
            .signal(signal_key)
            .ok_or_else(|| RegistryError::unknown_key(signal_key))?;
        let slot = target
            .slot(slot_key)
            .ok_or_else(|| RegistryError::unknown_key(slot_key))?;

        let connection = signal.connect_slot(slot.as_ref())?;
        tracing::debug!(
            target: "keystone_com::registry",
            signal = signal_key,
            slot = slot_key,
            "wired"
        );
        self.connections.push(connection);
        Ok(())
    }

    /// Take ownership of a connection made elsewhere.
    pub fn add(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    /// Disconnect every held connection.
    pub fn disconnect(&mut self) {
        for connection in self.connections.drain(..) {
            connection.disconnect();
        }
    }

    /// Number of held connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check whether no connection is held.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Drop for SigSlotConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
