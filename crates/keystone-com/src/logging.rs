//! Logging and debugging facilities for Keystone.
//!
//! This module provides:
//! - Target and span names for filtering `tracing` output by subsystem
//! - Debug rendering of a component's declared endpoints
//! - Performance tracing hooks for profiling
//!
//! # Tracing Integration
//!
//! Keystone uses the `tracing` crate for instrumentation. To see logs,
//! install a subscriber in the hosting process:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("keystone_com=debug")
//!         .init();
//!
//!     // ...
//! }
//! ```
//!
//! # Endpoint Dump
//!
//! ```
//! use keystone_com::logging::EndpointDebug;
//! use keystone_com::{Signal, Signals, Slot, Slots};
//!
//! let mut signals = Signals::new();
//! signals.declare("changed", Signal::<i32>::new());
//! let mut slots = Slots::new();
//! slots.declare("update", Slot::new(|_: &i32| {}));
//!
//! let dump = EndpointDebug::new("counter")
//!     .signals(&signals)
//!     .slots(&slots)
//!     .format();
//! assert!(dump.contains("signal changed"));
//! ```

use std::fmt::{self, Write as FmtWrite};

use crate::registry::{Signals, Slots};

/// Span names used throughout Keystone for tracing.
pub mod span_names {
    /// One task executed by a worker loop.
    pub const TASK: &str = "keystone::task";
    /// Synchronous signal emission.
    pub const EMIT: &str = "keystone::emit";
    /// Asynchronous signal dispatch.
    pub const ASYNC_EMIT: &str = "keystone::async_emit";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Crate-wide target used by the `keystone_*` macros.
    pub const CORE: &str = "keystone_com";
    /// Worker loop target.
    pub const WORKER: &str = "keystone_com::worker";
    /// Timer target.
    pub const TIMER: &str = "keystone_com::timer";
    /// Signal emission and connection target.
    pub const SIGNAL: &str = "keystone_com::signal";
    /// Slot target.
    pub const SLOT: &str = "keystone_com::slot";
    /// Registry, keyed wiring and proxy target.
    pub const REGISTRY: &str = "keystone_com::registry";
    /// Context target.
    pub const CONTEXT: &str = "keystone_com::context";
}

/// Renders the declared endpoints of one component.
#[derive(Debug, Clone)]
pub struct EndpointDebug<'a> {
    component: &'a str,
    signals: Option<&'a Signals>,
    slots: Option<&'a Slots>,
}

impl<'a> EndpointDebug<'a> {
    /// Start a dump for the named component.
    pub fn new(component: &'a str) -> Self {
        Self {
            component,
            signals: None,
            slots: None,
        }
    }

    /// Include the component's signals.
    pub fn signals(mut self, signals: &'a Signals) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Include the component's slots.
    pub fn slots(mut self, slots: &'a Slots) -> Self {
        self.slots = Some(slots);
        self
    }

    /// Format the dump, one endpoint per line in key order.
    pub fn format(&self) -> String {
        let mut output = String::new();
        let _ = self.write_into(&mut output);
        output
    }

    fn write_into(&self, output: &mut String) -> fmt::Result {
        writeln!(output, "Component '{}':", self.component)?;

        if let Some(signals) = self.signals {
            for key in signals.keys() {
                if let Some(signal) = signals.lookup(key) {
                    writeln!(
                        output,
                        "  signal {key}: {} [{} connection(s)]",
                        short_type(signal.args_type_name()),
                        signal.connection_count()
                    )?;
                }
            }
        }

        if let Some(slots) = self.slots {
            for key in slots.keys() {
                if let Some(slot) = slots.lookup(key) {
                    write!(
                        output,
                        "  slot {key}: {} -> {} [{} connection(s)",
                        short_type(slot.args_type_name()),
                        short_type(slot.result_type_name()),
                        slot.connection_count()
                    )?;
                    if let Some(worker) = slot.worker() {
                        write!(output, ", worker {}", worker.name())?;
                    }
                    if slot.is_blocked() {
                        output.push_str(", blocked");
                    }
                    output.push_str("]\n");
                }
            }
        }

        if self.signals.is_none_or(Signals::is_empty) && self.slots.is_none_or(Slots::is_empty) {
            writeln!(output, "  (no endpoints)")?;
        }
        Ok(())
    }
}

impl fmt::Display for EndpointDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// Strip module paths from a type name for readability.
fn short_type(name: &str) -> String {
    let mut short = String::with_capacity(name.len());
    let mut segment = String::new();
    for c in name.chars() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            segment.push(c);
        } else {
            short.push_str(segment.rsplit("::").next().unwrap_or(&segment));
            segment.clear();
            short.push(c);
        }
    }
    short.push_str(segment.rsplit("::").next().unwrap_or(&segment));
    short
}

/// A guard that emits a tracing span when dropped.
///
/// This is useful for tracking the duration of operations.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    ///
    /// The span will be active until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "keystone_com::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

/// Macros for common tracing patterns.
///
/// These are thin wrappers around the `tracing` macros with the crate-wide
/// target.
#[macro_export]
macro_rules! keystone_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "keystone_com", $($arg)*)
    };
}

#[macro_export]
macro_rules! keystone_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "keystone_com", $($arg)*)
    };
}

#[macro_export]
macro_rules! keystone_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "keystone_com", $($arg)*)
    };
}

#[macro_export]
macro_rules! keystone_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "keystone_com", $($arg)*)
    };
}

#[macro_export]
macro_rules! keystone_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "keystone_com", $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Signal, Slot, Worker};

    #[test]
    fn test_short_type() {
        assert_eq!(short_type("i32"), "i32");
        assert_eq!(short_type("alloc::string::String"), "String");
        assert_eq!(
            short_type("(alloc::string::String, core::option::Option<u8>)"),
            "(String, Option<u8>)"
        );
    }

    #[test]
    fn test_endpoint_dump() {
        let worker = Worker::with_config(crate::WorkerConfig::with_name("io"));
        let signal = Signal::<String>::new();
        let mut signals = Signals::new();
        signals.declare("renamed", signal.clone());

        let mut slots = Slots::new();
        let slot = Slot::with_worker(|name: &String| name.len(), &worker);
        slot.block();
        slots.declare("rename", slot.clone());
        signal.connect(&slot);

        let dump = EndpointDebug::new("file").signals(&signals).slots(&slots).format();
        assert!(dump.starts_with("Component 'file':"));
        assert!(dump.contains("  signal renamed: String [1 connection(s)]"));
        assert!(dump.contains("  slot rename: String -> usize [1 connection(s), worker io, blocked]"));
        worker.stop();
    }

    #[test]
    fn test_empty_dump() {
        let dump = EndpointDebug::new("idle").to_string();
        assert!(dump.contains("(no endpoints)"));
    }

    #[test]
    fn test_macros_and_perf_span() {
        let _span = PerfSpan::new("test_operation");
        crate::keystone_debug!(value = 1, "debug message");
        crate::keystone_trace!("trace message");
    }
}
