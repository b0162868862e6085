//! Process-scoped registry of named workers.
//!
//! A [`Context`] is created by the hosting process and handed to components
//! by reference. It owns the named workers components dispatch onto and the
//! [`Proxy`] they use for loosely coupled channels. Nothing here is global:
//! tests create as many independent contexts as they need.
//!
//! # Example
//!
//! ```
//! use keystone_com::{Context, Worker};
//!
//! let context = Context::new();
//! let main = context.default_worker();
//! context.add_worker("io", Worker::new());
//!
//! assert_eq!(context.get_worker("default"), Some(main));
//! assert!(context.get_worker("io").is_some());
//!
//! context.shutdown();
//! assert!(context.get_worker("io").is_none());
//! ```

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use crate::proxy::Proxy;
use crate::worker::{Worker, WorkerConfig};

/// Key under which the default worker is registered.
pub const DEFAULT_WORKER_KEY: &str = "default";

/// Configuration for a [`Context`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Configuration of the lazily created default worker.
    pub default_worker: WorkerConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_worker: WorkerConfig::with_name("keystone-main"),
        }
    }
}

/// Named workers and the channel proxy shared by a process's components.
pub struct Context {
    config: ContextConfig,
    workers: RwLock<HashMap<String, Worker>>,
    proxy: Proxy,
}

impl Context {
    /// Create a context with default configuration.
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Create a context with custom configuration.
    pub fn with_config(config: ContextConfig) -> Self {
        Self {
            config,
            workers: RwLock::new(HashMap::new()),
            proxy: Proxy::new(),
        }
    }

    /// Register `worker` under `key`, returning the worker it replaces.
    pub fn add_worker(&self, key: impl Into<String>, worker: Worker) -> Option<Worker> {
        let key = key.into();
        tracing::debug!(target: "keystone_com::context", key = %key, worker = worker.name(), "worker added");
        self.workers.write().insert(key, worker)
    }

    /// Look up a worker by key.
    pub fn get_worker(&self, key: &str) -> Option<Worker> {
        self.workers.read().get(key).cloned()
    }

    /// Unregister a worker. The worker keeps running while handles exist.
    pub fn remove_worker(&self, key: &str) -> Option<Worker> {
        self.workers.write().remove(key)
    }

    /// Keys of all registered workers, sorted.
    pub fn worker_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.workers.read().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// The default worker, created on first use.
    pub fn default_worker(&self) -> Worker {
        if let Some(worker) = self.get_worker(DEFAULT_WORKER_KEY) {
            return worker;
        }
        self.workers
            .write()
            .entry(DEFAULT_WORKER_KEY.to_string())
            .or_insert_with(|| {
                tracing::debug!(target: "keystone_com::context", "creating default worker");
                Worker::with_config(self.config.default_worker.clone())
            })
            .clone()
    }

    /// Replace the default worker, returning the previous one.
    pub fn set_default_worker(&self, worker: Worker) -> Option<Worker> {
        self.add_worker(DEFAULT_WORKER_KEY, worker)
    }

    /// The channel proxy of this context.
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// Clear the proxy, then stop and unregister every worker.
    ///
    /// Workers are stopped one after another; each drains its queue first.
    /// A worker stopping itself from its own thread is not joined.
    pub fn shutdown(&self) {
        self.proxy.clear();
        let workers: Vec<(String, Worker)> = self.workers.write().drain().collect();
        for (key, worker) in workers {
            tracing::debug!(target: "keystone_com::context", key = %key, "stopping worker");
            worker.stop();
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("workers", &self.worker_keys())
            .field("proxy", &self.proxy)
            .finish()
    }
}

static_assertions::assert_impl_all!(Context: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerState;

    #[test]
    fn test_default_worker_is_lazy_and_shared() {
        let context = Context::new();
        assert!(context.worker_keys().is_empty());

        let first = context.default_worker();
        let second = context.default_worker();
        assert_eq!(first, second);
        assert_eq!(first.name(), "keystone-main");
        assert_eq!(context.worker_keys(), vec![DEFAULT_WORKER_KEY.to_string()]);
        context.shutdown();
    }

    #[test]
    fn test_custom_default_config() {
        let context = Context::with_config(ContextConfig {
            default_worker: WorkerConfig::with_name("host"),
        });
        assert_eq!(context.default_worker().name(), "host");
        context.shutdown();
    }

    #[test]
    fn test_set_default_worker() {
        let context = Context::new();
        let custom = Worker::new();
        assert!(context.set_default_worker(custom.clone()).is_none());
        assert_eq!(context.default_worker(), custom);
        context.shutdown();
    }

    #[test]
    fn test_add_get_remove() {
        let context = Context::new();
        let io = Worker::new();
        assert!(context.add_worker("io", io.clone()).is_none());
        assert_eq!(context.get_worker("io"), Some(io.clone()));

        assert_eq!(context.remove_worker("io"), Some(io.clone()));
        assert!(context.get_worker("io").is_none());
        assert!(io.is_running());
        io.stop();
    }

    #[test]
    fn test_shutdown_stops_workers() {
        let context = Context::new();
        let io = Worker::new();
        context.add_worker("io", io.clone());
        let main = context.default_worker();

        context.shutdown();
        assert_eq!(io.state(), WorkerState::Stopped);
        assert_eq!(main.state(), WorkerState::Stopped);
        assert!(context.worker_keys().is_empty());
    }

    #[test]
    fn test_independent_contexts() {
        let a = Context::new();
        let b = Context::new();
        assert_ne!(a.default_worker(), b.default_worker());
        a.shutdown();
        b.shutdown();
    }
}
