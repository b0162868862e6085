//! Liveness tokens shared between an endpoint and the connections watching it.
//!
//! The owner keeps a [`Liveness`] and flips it to dead when it is destroyed.
//! Observers hold a [`LivenessWatch`], which only shares the flag and never
//! extends the owner's lifetime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Owner side of a liveness token. Marks the token dead when dropped.
#[derive(Debug)]
pub struct Liveness {
    alive: Arc<AtomicBool>,
}

impl Liveness {
    /// Create a new live token.
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create an observer for this token.
    pub fn watch(&self) -> LivenessWatch {
        LivenessWatch {
            alive: Some(self.alive.clone()),
        }
    }

    /// Check whether the token is still live.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the token dead ahead of the owner's destruction.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Liveness {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Observer side of a liveness token.
///
/// A default watch observes nothing and always reports dead.
#[derive(Debug, Clone, Default)]
pub struct LivenessWatch {
    alive: Option<Arc<AtomicBool>>,
}

impl LivenessWatch {
    /// Check whether the watched owner is still live.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive
            .as_ref()
            .is_some_and(|alive| alive.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_follows_owner() {
        let owner = Liveness::new();
        let watch = owner.watch();
        assert!(watch.is_alive());
        drop(owner);
        assert!(!watch.is_alive());
    }

    #[test]
    fn test_kill_before_drop() {
        let owner = Liveness::new();
        let watch = owner.watch();
        owner.kill();
        assert!(!owner.is_alive());
        assert!(!watch.is_alive());
    }

    #[test]
    fn test_default_watch_is_dead() {
        assert!(!LivenessWatch::default().is_alive());
    }
}
