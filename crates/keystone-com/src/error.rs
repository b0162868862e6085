//! Error types for Keystone.

use thiserror::Error;

/// The main error type for Keystone operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeystoneError {
    /// Signal-related error.
    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),
    /// Slot-related error.
    #[error("Slot error: {0}")]
    Slot(#[from] SlotError),
    /// Worker-related error.
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
    /// Error raised by a task after it was dispatched.
    #[error("Task error: {0}")]
    Task(#[from] TaskError),
    /// Timer-related error.
    #[error("Timer error: {0}")]
    Timer(#[from] TimerError),
    /// Registry lookup error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Signal-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// The slot's argument type does not match the signal's.
    ///
    /// Raised at connect time so a mis-wired configuration fails before any
    /// event is emitted.
    #[error("Argument mismatch: signal carries `{expected}` but slot accepts `{found}`")]
    ArgumentMismatch {
        /// Argument type of the signal.
        expected: &'static str,
        /// Argument type of the slot.
        found: &'static str,
    },
    /// The slot is not connected to this signal.
    #[error("Slot is not connected to this signal")]
    NotConnected,
}

/// Slot-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    /// A connected slot cannot move to another worker.
    #[error("Cannot change the worker of a slot with {connections} live connection(s)")]
    RebindWhileConnected {
        /// Number of live connections at the time of the request.
        connections: usize,
    },
}

/// Worker-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// The worker no longer accepts tasks.
    #[error("Worker '{name}' has been stopped")]
    WorkerStopped {
        /// Name of the worker thread.
        name: String,
    },
}

/// Errors surfaced through a [`crate::TaskFuture`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task panicked while running on its worker.
    #[error("Task panicked: {0}")]
    Panicked(String),
    /// The slot was destroyed before the queued invocation ran.
    #[error("Slot was destroyed before the invocation ran")]
    SlotExpired,
    /// The worker dropped the task without running it.
    #[error("Worker dropped the task before running it")]
    WorkerDropped,
    /// The result was already taken through another handle.
    #[error("Task result was already retrieved")]
    AlreadyRetrieved,
}

/// Timer-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    /// A repeating timer needs a non-zero period.
    #[error("Repeating timers require a non-zero period")]
    ZeroPeriodRepeating,
    /// The owning worker has been stopped.
    #[error("The timer's worker has been stopped")]
    WorkerStopped,
}

/// Registry lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No endpoint is declared under this key.
    #[error("No endpoint declared under key '{key}'")]
    UnknownKey {
        /// The missing key.
        key: String,
    },
    /// An endpoint exists but has a different type.
    #[error("Endpoint '{key}' has type `{found}`, expected `{expected}`")]
    TypeMismatch {
        /// The looked-up key.
        key: String,
        /// Requested type.
        expected: &'static str,
        /// Declared type.
        found: &'static str,
    },
}

impl RegistryError {
    /// Create an unknown-key error.
    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }
}

/// A specialized Result type for Keystone operations.
pub type Result<T> = std::result::Result<T, KeystoneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: KeystoneError = WorkerError::WorkerStopped {
            name: "io".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Worker error: Worker 'io' has been stopped");
    }

    #[test]
    fn test_argument_mismatch_message() {
        let err = SignalError::ArgumentMismatch {
            expected: "i32",
            found: "alloc::string::String",
        };
        assert!(err.to_string().contains("`i32`"));
        assert!(err.to_string().contains("alloc::string::String"));
    }
}
