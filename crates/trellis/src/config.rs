//! Build-time machine configuration.
//!
//! A machine is parameterized by a single [`Config`] type that fixes the
//! context handed to every hook, the event type `react` dispatches, the
//! PRNG behind `RandomUtil` selection, and the engine's bounds. The
//! defaults match the common case; implement the trait directly to change
//! the RNG or the bounds.

use std::marker::PhantomData;

use crate::random::{DefaultRng, UtilityRng};

/// Build-time configuration of a machine.
///
/// `SUBSTITUTION_LIMIT` bounds the number of guard/request rounds a single
/// tick may run; requests still pending after the limit are dropped.
/// `TASK_CAPACITY` sizes the plan store; `None` defaults to twice the
/// total number of composite prongs in the tree.
pub trait Config: 'static {
    /// User data passed by `&mut` into every hook.
    type Context;

    /// Event type dispatched by `react`.
    type Event;

    /// PRNG used by `RandomUtil` selection.
    type Rng: UtilityRng;

    const SUBSTITUTION_LIMIT: usize = 4;

    const TASK_CAPACITY: Option<usize> = None;
}

/// A [`Config`] with default RNG and bounds over the given context and
/// event types.
pub struct BasicConfig<Ctx = (), Ev = ()> {
    _marker: PhantomData<(Ctx, Ev)>,
}

impl<Ctx: 'static, Ev: 'static> Config for BasicConfig<Ctx, Ev> {
    type Context = Ctx;
    type Event = Ev;
    type Rng = DefaultRng;
}
