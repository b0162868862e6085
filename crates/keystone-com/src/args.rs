//! Argument loss: slots taking a leading subset of a signal's arguments.
//!
//! A signal carrying `(f32, f64, String)` can drive a slot taking
//! `(f32, f64)`, `f32`, `(f32,)` or `()`. The trailing arguments are dropped
//! and the kept ones are cloned for the slot. Prefixes are tried longest
//! first, so the slot's argument type decides which one applies.
//!
//! Only tuple argument types take part. A single-argument signal that should
//! also feed argument-less slots is declared with the one-element tuple form,
//! `Signal<(T,)>`.

use std::any::{Any, TypeId};
use std::sync::{Arc, Weak};

use crate::error::{TaskError, WorkerError};
use crate::future::TaskFuture;
use crate::liveness::LivenessWatch;
use crate::signal::Connection;
use crate::slot::{Invocable, SlotBase};

/// Argument tuples whose leading elements can feed a shorter slot.
///
/// Implemented for tuples of one to four elements. Every element except the
/// last must be `Clone`, since kept arguments are copied out of the emitted
/// value.
pub trait ArgumentPrefixes: Send + Sized + 'static {
    /// Boxed `Arc<dyn Invocable<Self>>` adapting `slot`, or `None` when the
    /// slot's argument type is not a prefix of `Self`.
    #[doc(hidden)]
    fn project_slot(slot: &dyn SlotBase) -> Option<Box<dyn Any>>;
}

/// Connection-owned adapter from `Args` to the slot's `Sub`.
///
/// Holds the slot weakly, like every other connection.
struct Projection<Args, Sub> {
    slot: Weak<dyn Invocable<Sub>>,
    slot_id: usize,
    alive: LivenessWatch,
    project: fn(&Args) -> Sub,
}

impl<Args, Sub> Invocable<Args> for Projection<Args, Sub>
where
    Args: Send + 'static,
    Sub: Send + 'static,
{
    fn invoke(&self, args: &Args) {
        if let Some(slot) = self.slot.upgrade() {
            slot.invoke(&(self.project)(args));
        }
    }

    fn dispatch(self: Arc<Self>, args: Args) -> Result<TaskFuture<()>, WorkerError> {
        match self.slot.upgrade() {
            Some(slot) => slot.dispatch((self.project)(&args)),
            None => Ok(TaskFuture::ready(Err(TaskError::SlotExpired))),
        }
    }

    fn is_blocked(&self) -> bool {
        self.slot.upgrade().is_none_or(|slot| slot.is_blocked())
    }

    fn endpoint_id(&self) -> usize {
        self.slot_id
    }

    fn liveness(&self) -> LivenessWatch {
        self.alive.clone()
    }

    fn attach(&self, connection: Connection) {
        if let Some(slot) = self.slot.upgrade() {
            slot.attach(connection);
        }
    }
}

/// Adapt `slot` if it takes exactly `Sub`.
fn try_project<Args, Sub>(slot: &dyn SlotBase, project: fn(&Args) -> Sub) -> Option<Box<dyn Any>>
where
    Args: Send + 'static,
    Sub: Send + 'static,
{
    if slot.args_type_id() != TypeId::of::<Sub>() {
        return None;
    }
    let invocable = slot
        .erased_invocable()
        .downcast::<Arc<dyn Invocable<Sub>>>()
        .ok()?;
    let projection: Arc<dyn Invocable<Args>> = Arc::new(Projection {
        slot: Arc::downgrade(&*invocable),
        slot_id: invocable.endpoint_id(),
        alive: invocable.liveness(),
        project,
    });
    Some(Box::new(projection))
}

impl<A> ArgumentPrefixes for (A,)
where
    A: Send + 'static,
{
    fn project_slot(slot: &dyn SlotBase) -> Option<Box<dyn Any>> {
        try_project::<Self, ()>(slot, |_| ())
    }
}

impl<A, B> ArgumentPrefixes for (A, B)
where
    A: Clone + Send + 'static,
    B: Send + 'static,
{
    fn project_slot(slot: &dyn SlotBase) -> Option<Box<dyn Any>> {
        try_project::<Self, A>(slot, |(a, _)| a.clone())
            .or_else(|| try_project::<Self, (A,)>(slot, |(a, _)| (a.clone(),)))
            .or_else(|| try_project::<Self, ()>(slot, |_| ()))
    }
}

impl<A, B, C> ArgumentPrefixes for (A, B, C)
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Send + 'static,
{
    fn project_slot(slot: &dyn SlotBase) -> Option<Box<dyn Any>> {
        try_project::<Self, (A, B)>(slot, |(a, b, _)| (a.clone(), b.clone()))
            .or_else(|| try_project::<Self, A>(slot, |(a, _, _)| a.clone()))
            .or_else(|| try_project::<Self, (A,)>(slot, |(a, _, _)| (a.clone(),)))
            .or_else(|| try_project::<Self, ()>(slot, |_| ()))
    }
}

impl<A, B, C, D> ArgumentPrefixes for (A, B, C, D)
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    D: Send + 'static,
{
    fn project_slot(slot: &dyn SlotBase) -> Option<Box<dyn Any>> {
        try_project::<Self, (A, B, C)>(slot, |(a, b, c, _)| (a.clone(), b.clone(), c.clone()))
            .or_else(|| try_project::<Self, (A, B)>(slot, |(a, b, _, _)| (a.clone(), b.clone())))
            .or_else(|| try_project::<Self, A>(slot, |(a, _, _, _)| a.clone()))
            .or_else(|| try_project::<Self, (A,)>(slot, |(a, _, _, _)| (a.clone(),)))
            .or_else(|| try_project::<Self, ()>(slot, |_| ()))
    }
}
