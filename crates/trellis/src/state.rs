//! User state bodies and their storage.
//!
//! A [`StateBody`] is the injected behavior of one state: lifecycle hooks,
//! reaction to events, and the rank/utility signals driving selection.
//! Every hook has a no-op default, so a state implements only what it
//! uses.
//!
//! Bodies are held in [`StateSlot`]s and are always resident: entry
//! guards and utility/rank reports run on states that are not (yet)
//! constructed. A static slot keeps one body for the machine lifetime; a
//! dynamic slot swaps in a fresh body from its factory on construct and
//! again on destruct — the used body drops at the commit, and the state
//! comes back with `Default`-derived fields reset.

use trellis_types::{Rank, StateId, Utility};

use crate::config::Config;
use crate::control::{Control, FullControl, GuardControl, PlanControl};

/// Behavior of one state. All hooks default to no-ops.
#[allow(unused_variables)]
pub trait StateBody<C: Config>: 'static {
    /// Runs before the state is entered; may cancel or redirect the
    /// pending transition.
    fn entry_guard(&mut self, ctl: &mut GuardControl<'_, C>) {}

    /// Runs when the state becomes active.
    fn enter(&mut self, ctl: &mut PlanControl<'_, C>) {}

    /// Runs instead of exit/enter when the state is re-entered in place.
    fn reenter(&mut self, ctl: &mut PlanControl<'_, C>) {}

    /// Runs every tick while active.
    fn update(&mut self, ctl: &mut FullControl<'_, C>) {}

    /// Runs for every dispatched event while active.
    fn react(&mut self, event: &C::Event, ctl: &mut FullControl<'_, C>) {}

    /// Runs before the state is exited; may cancel the pending transition.
    fn exit_guard(&mut self, ctl: &mut GuardControl<'_, C>) {}

    /// Runs when the state stops being active.
    fn exit(&mut self, ctl: &mut PlanControl<'_, C>) {}

    /// Rank for `RandomUtil` selection; only top-rank siblings sample.
    fn rank(&mut self, ctl: &mut Control<'_, C>) -> Rank {
        Rank::default()
    }

    /// Utility for `Utilitarian` and `RandomUtil` selection.
    fn utility(&mut self, ctl: &mut Control<'_, C>) -> Utility {
        Utility::ONE
    }

    /// Runs on a region head when its plan completes.
    fn plan_succeeded(&mut self, ctl: &mut FullControl<'_, C>) {}

    /// Runs on a region head when its plan fails.
    fn plan_failed(&mut self, ctl: &mut FullControl<'_, C>) {}
}

pub(crate) type BodyFactory<C> = Box<dyn Fn() -> Box<dyn StateBody<C>>>;

/// Storage for one state's body. Always holds a body, so guards and
/// selection queries dispatched before construct have something to run
/// on.
pub(crate) struct StateSlot<C: Config> {
    factory: BodyFactory<C>,
    body: Box<dyn StateBody<C>>,
    dynamic: bool,
}

impl<C: Config> StateSlot<C> {
    pub fn new(factory: BodyFactory<C>, dynamic: bool) -> Self {
        let body = factory();
        Self {
            factory,
            body,
            dynamic,
        }
    }

    /// Construct-time hook: a dynamic body enters fresh, discarding
    /// anything pre-entry dispatch (guards, reports) did to the slot.
    pub fn construct(&mut self) {
        if self.dynamic {
            self.body = (self.factory)();
        }
    }

    /// Destruct-time hook: the used dynamic body drops here; its
    /// replacement keeps the slot resident for later guards and
    /// selection queries.
    pub fn destruct(&mut self) {
        if self.dynamic {
            self.body = (self.factory)();
        }
    }

    pub fn body_mut(&mut self) -> &mut dyn StateBody<C> {
        &mut *self.body
    }
}

/// All state bodies of a machine, indexed by [`StateId`].
pub(crate) struct BodyArena<C: Config> {
    slots: Vec<StateSlot<C>>,
}

impl<C: Config> BodyArena<C> {
    pub fn new(slots: Vec<StateSlot<C>>) -> Self {
        Self { slots }
    }

    pub fn slot_mut(&mut self, state: StateId) -> &mut StateSlot<C> {
        &mut self.slots[state.index()]
    }

    pub fn body_mut(&mut self, state: StateId) -> &mut dyn StateBody<C> {
        self.slots[state.index()].body_mut()
    }
}
