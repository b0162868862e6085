//! Worker-driven timers.
//!
//! A [`Timer`] belongs to exactly one [`Worker`](crate::Worker). The worker
//! loop sleeps until the earliest armed deadline; on expiry the timer's
//! callback is posted onto the worker queue like any other task, so it always
//! runs on the worker thread and in FIFO order with posted work.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use slotmap::{SlotMap, new_key_type};

use crate::error::TimerError;
use crate::worker::WorkerShared;

new_key_type! {
    /// A unique identifier for a timer within its worker.
    pub struct TimerId;
}

/// Lifecycle of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Created but never started.
    Idle,
    /// Waiting for its next deadline.
    Armed,
    /// A one-shot timer that has expired.
    Fired,
    /// Stopped explicitly or by its worker shutting down.
    Cancelled,
}

/// Callback shared between the timer table and posted expiry tasks.
pub(crate) type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Internal timer data.
struct TimerData {
    period: Duration,
    one_shot: bool,
    callback: TimerCallback,
    state: TimerState,
    /// When this timer should next fire.
    next_fire: Instant,
}

/// An entry in the timer queue (min-heap by fire time).
#[derive(Debug, Clone, Copy)]
struct TimerQueueEntry {
    id: TimerId,
    fire_time: Instant,
}

impl PartialEq for TimerQueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_time == other.fire_time
    }
}

impl Eq for TimerQueueEntry {}

impl PartialOrd for TimerQueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerQueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap (BinaryHeap is max-heap by default).
        other.fire_time.cmp(&self.fire_time)
    }
}

/// All timers of one worker. Lives under the worker's queue mutex.
pub(crate) struct TimerTable {
    timers: SlotMap<TimerId, TimerData>,
    /// Pending fires. Entries whose time no longer matches their timer's
    /// `next_fire` are stale and skipped.
    queue: BinaryHeap<TimerQueueEntry>,
}

impl TimerTable {
    pub(crate) fn new() -> Self {
        Self {
            timers: SlotMap::with_key(),
            queue: BinaryHeap::new(),
        }
    }

    fn insert(&mut self, period: Duration, one_shot: bool, callback: TimerCallback) -> TimerId {
        self.timers.insert(TimerData {
            period,
            one_shot,
            callback,
            state: TimerState::Idle,
            next_fire: Instant::now(),
        })
    }

    /// Remove a timer, handing its data back so the caller can drop the
    /// callback after releasing the queue lock.
    fn remove(&mut self, id: TimerId) -> Option<TimerData> {
        self.timers.remove(id)
    }

    fn arm(&mut self, id: TimerId, now: Instant) -> Result<(), TimerError> {
        let Some(timer) = self.timers.get_mut(id) else {
            return Err(TimerError::WorkerStopped);
        };
        if !timer.one_shot && timer.period.is_zero() {
            return Err(TimerError::ZeroPeriodRepeating);
        }
        timer.state = TimerState::Armed;
        timer.next_fire = now + timer.period;
        self.queue.push(TimerQueueEntry {
            id,
            fire_time: timer.next_fire,
        });
        Ok(())
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.get_mut(id) {
            if timer.state == TimerState::Armed {
                timer.state = TimerState::Cancelled;
            }
        }
    }

    /// Cancel every armed timer. Used when the worker stops.
    pub(crate) fn cancel_all(&mut self) {
        for (_, timer) in self.timers.iter_mut() {
            if timer.state == TimerState::Armed {
                timer.state = TimerState::Cancelled;
            }
        }
        self.queue.clear();
    }

    fn get(&self, id: TimerId) -> Option<&TimerData> {
        self.timers.get(id)
    }

    fn get_mut(&mut self, id: TimerId) -> Option<&mut TimerData> {
        self.timers.get_mut(id)
    }

    fn is_live(&self, entry: &TimerQueueEntry) -> bool {
        self.timers
            .get(entry.id)
            .is_some_and(|t| t.state == TimerState::Armed && t.next_fire == entry.fire_time)
    }

    /// The earliest armed deadline, if any.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(entry) = self.queue.peek() {
            if self.is_live(entry) {
                return Some(entry.fire_time);
            }
            self.queue.pop();
        }
        None
    }

    /// Pop every timer due at `now` and return the callbacks to post.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<TimerCallback> {
        let mut fired = Vec::new();

        while let Some(&entry) = self.queue.peek() {
            if entry.fire_time > now {
                break;
            }
            self.queue.pop();

            if !self.is_live(&entry) {
                continue;
            }
            let Some(timer) = self.timers.get_mut(entry.id) else {
                continue;
            };

            tracing::trace!(target: "keystone_com::timer", id = ?entry.id, "timer fired");
            fired.push(timer.callback.clone());

            if timer.one_shot {
                timer.state = TimerState::Fired;
            } else {
                // Keep the cadence anchored to the schedule unless we fell behind.
                let mut next = entry.fire_time + timer.period;
                if next <= now {
                    next = now + timer.period;
                }
                timer.next_fire = next;
                self.queue.push(TimerQueueEntry {
                    id: entry.id,
                    fire_time: next,
                });
            }
        }

        fired
    }

    /// Number of armed timers.
    pub(crate) fn active_count(&self) -> usize {
        self.timers
            .iter()
            .filter(|(_, t)| t.state == TimerState::Armed)
            .count()
    }
}

/// Handle on a timer owned by a worker.
///
/// Dropping the handle removes the timer from its worker.
///
/// # Example
///
/// ```
/// use keystone_com::{TimerState, Worker};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let worker = Worker::new();
/// let ticks = Arc::new(AtomicUsize::new(0));
///
/// let ticks_clone = ticks.clone();
/// let timer = worker.create_timer(Duration::from_millis(5), true, move || {
///     ticks_clone.fetch_add(1, Ordering::SeqCst);
/// });
/// timer.start().unwrap();
///
/// std::thread::sleep(Duration::from_millis(100));
/// assert_eq!(ticks.load(Ordering::SeqCst), 1);
/// assert_eq!(timer.state(), TimerState::Fired);
/// worker.stop();
/// ```
pub struct Timer {
    id: TimerId,
    worker: Weak<WorkerShared>,
}

impl Timer {
    pub(crate) fn create(
        shared: &Arc<WorkerShared>,
        period: Duration,
        one_shot: bool,
        callback: TimerCallback,
    ) -> Self {
        let id = shared.queue.lock().timers.insert(period, one_shot, callback);
        Self {
            id,
            worker: Arc::downgrade(shared),
        }
    }

    /// Identifier of the timer within its worker.
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Arm the timer. Restarting an armed timer reschedules it from now.
    pub fn start(&self) -> Result<(), TimerError> {
        let shared = self.worker.upgrade().ok_or(TimerError::WorkerStopped)?;
        let mut queue = shared.queue.lock();
        if !queue.state.accepts_tasks() {
            return Err(TimerError::WorkerStopped);
        }
        queue.timers.arm(self.id, Instant::now())?;
        shared.wakeup.notify_all();
        Ok(())
    }

    /// Cancel the timer. An already queued expiry still runs.
    pub fn stop(&self) {
        if let Some(shared) = self.worker.upgrade() {
            shared.queue.lock().timers.cancel(self.id);
            shared.wakeup.notify_all();
        }
    }

    /// Current state. A timer whose worker is gone reports `Cancelled`.
    pub fn state(&self) -> TimerState {
        self.worker
            .upgrade()
            .and_then(|shared| shared.queue.lock().timers.get(self.id).map(|t| t.state))
            .unwrap_or(TimerState::Cancelled)
    }

    /// Check if the timer is armed.
    pub fn is_running(&self) -> bool {
        self.state() == TimerState::Armed
    }

    /// The timer period.
    pub fn period(&self) -> Duration {
        self.worker
            .upgrade()
            .and_then(|shared| shared.queue.lock().timers.get(self.id).map(|t| t.period))
            .unwrap_or_default()
    }

    /// Change the period. Takes effect at the next [`start`](Self::start).
    pub fn set_period(&self, period: Duration) {
        self.update(|timer| timer.period = period);
    }

    /// Check if the timer fires only once.
    pub fn is_one_shot(&self) -> bool {
        self.worker
            .upgrade()
            .and_then(|shared| shared.queue.lock().timers.get(self.id).map(|t| t.one_shot))
            .unwrap_or(true)
    }

    /// Switch between one-shot and repeating. Takes effect at the next start.
    pub fn set_one_shot(&self, one_shot: bool) {
        self.update(|timer| timer.one_shot = one_shot);
    }

    /// Replace the callback.
    ///
    /// The previous callback is dropped outside the worker's queue lock, so it
    /// may own the last handle to its worker.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback: TimerCallback = Arc::new(callback);
        let previous = self.update(move |timer| std::mem::replace(&mut timer.callback, callback));
        drop(previous);
    }

    fn update<T>(&self, f: impl FnOnce(&mut TimerData) -> T) -> Option<T> {
        let shared = self.worker.upgrade()?;
        let mut queue = shared.queue.lock();
        queue.timers.get_mut(self.id).map(f)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(shared) = self.worker.upgrade() {
            let removed = shared.queue.lock().timers.remove(self.id);
            // The callback may hold the last worker handle, whose drop locks the queue.
            drop(removed);
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

static_assertions::assert_impl_all!(Timer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Worker;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn counter_timer(worker: &Worker, period: Duration, one_shot: bool) -> (Timer, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let timer = worker.create_timer(period, one_shot, move || {
            count_clone.fetch_add(1, AtomicOrdering::SeqCst);
        });
        (timer, count)
    }

    #[test]
    fn test_timer_starts_idle() {
        let worker = Worker::new();
        let (timer, count) = counter_timer(&worker, Duration::from_millis(1), true);
        assert_eq!(timer.state(), TimerState::Idle);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);
        worker.stop();
    }

    #[test]
    fn test_one_shot_fires_once_on_worker_thread() {
        let worker = Worker::new();
        let fired_on = Arc::new(Mutex::new(Vec::new()));

        let fired_clone = fired_on.clone();
        let timer = worker.create_timer(Duration::from_millis(5), true, move || {
            fired_clone.lock().push(std::thread::current().id());
        });
        timer.start().unwrap();
        assert!(timer.is_running());

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(*fired_on.lock(), vec![worker.thread_id()]);
        assert_eq!(timer.state(), TimerState::Fired);
        worker.stop();
    }

    #[test]
    fn test_zero_period_one_shot() {
        let worker = Worker::new();
        let (timer, count) = counter_timer(&worker, Duration::ZERO, true);
        timer.start().unwrap();

        // A task posted afterwards runs after the expiry task
        worker.post_task(|| ()).unwrap().get().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
        worker.stop();
    }

    #[test]
    fn test_repeating_timer() {
        let worker = Worker::new();
        let (timer, count) = counter_timer(&worker, Duration::from_millis(5), false);
        timer.start().unwrap();

        std::thread::sleep(Duration::from_millis(100));
        timer.stop();
        assert_eq!(timer.state(), TimerState::Cancelled);

        let fired = count.load(AtomicOrdering::SeqCst);
        assert!(fired >= 3, "fired only {fired} times");

        std::thread::sleep(Duration::from_millis(30));
        // One expiry may have been queued before the stop
        assert!(count.load(AtomicOrdering::SeqCst) <= fired + 1);
        worker.stop();
    }

    #[test]
    fn test_zero_period_repeating_rejected() {
        let worker = Worker::new();
        let (timer, _) = counter_timer(&worker, Duration::ZERO, false);
        assert_eq!(timer.start(), Err(TimerError::ZeroPeriodRepeating));
        assert_eq!(timer.state(), TimerState::Idle);
        worker.stop();
    }

    #[test]
    fn test_restart_after_fired() {
        let worker = Worker::new();
        let (timer, count) = counter_timer(&worker, Duration::from_millis(2), true);

        timer.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        timer.set_period(Duration::from_millis(1));
        timer.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(count.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(timer.period(), Duration::from_millis(1));
        worker.stop();
    }

    #[test]
    fn test_worker_stop_cancels_timers() {
        let worker = Worker::new();
        let (timer, count) = counter_timer(&worker, Duration::from_secs(60), false);
        timer.start().unwrap();

        worker.stop();
        assert_eq!(timer.state(), TimerState::Cancelled);
        assert_eq!(timer.start(), Err(TimerError::WorkerStopped));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn test_drop_removes_timer() {
        let worker = Worker::new();
        let (timer, count) = counter_timer(&worker, Duration::from_millis(10), true);
        timer.start().unwrap();
        assert_eq!(worker.shared().queue.lock().timers.active_count(), 1);

        drop(timer);
        assert_eq!(worker.shared().queue.lock().timers.active_count(), 0);

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);
        worker.stop();
    }

    #[test]
    fn test_set_callback() {
        let worker = Worker::new();
        let (timer, old_count) = counter_timer(&worker, Duration::from_millis(1), true);
        let new_count = Arc::new(AtomicUsize::new(0));

        let new_clone = new_count.clone();
        timer.set_callback(move || {
            new_clone.fetch_add(1, AtomicOrdering::SeqCst);
        });
        timer.set_one_shot(true);
        assert!(timer.is_one_shot());
        timer.start().unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(old_count.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(new_count.load(AtomicOrdering::SeqCst), 1);
        worker.stop();
    }

    /// A timer whose callback owns the only remaining handle to its worker.
    fn self_owning_timer() -> (Timer, crate::TaskFuture<i32>) {
        let worker = Worker::new();
        let exit = worker.get_future();
        let inner = worker.clone();
        let timer = worker.create_timer(Duration::from_secs(60), true, move || {
            let _ = inner.post(|| {});
        });
        drop(worker);
        (timer, exit)
    }

    #[test]
    fn test_drop_timer_owning_last_worker_handle() {
        let (timer, exit) = self_owning_timer();

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(timer);
            let _ = tx.send(());
        });
        assert!(rx.recv_timeout(Duration::from_secs(3)).is_ok());

        // Releasing the callback released the worker, which then shut down
        assert!(exit.wait_timeout(Duration::from_secs(3)));
    }

    #[test]
    fn test_replace_callback_owning_last_worker_handle() {
        let (timer, exit) = self_owning_timer();

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            timer.set_callback(|| {});
            let _ = tx.send(timer);
        });
        let timer = rx.recv_timeout(Duration::from_secs(3)).unwrap();

        assert!(exit.wait_timeout(Duration::from_secs(3)));
        assert!(timer.start().is_err());
    }
}
