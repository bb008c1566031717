//! The event sink observing a machine's internals.
//!
//! A [`Logger`] receives every lifecycle hook invocation, every transition
//! request, task and plan completion events, guard cancellations, and the
//! outcome of utility and random selection. It is the only observable
//! signal of internal failure (`PlanFailed`, cancelled transitions); the
//! engine itself never surfaces recoverable errors.
//!
//! All methods default to no-ops, so a sink implements only what it needs.

use trellis_types::{Method, Prong, RegionId, StateId, StatusEvent, TransitionType, Utility};

use crate::config::Config;

/// Receives machine events. Attach with
/// [`Machine::attach_logger`](crate::Machine::attach_logger).
#[allow(unused_variables)]
pub trait Logger<C: Config> {
    /// A lifecycle hook ran on a state.
    fn record_method(&mut self, context: &mut C::Context, origin: StateId, method: Method) {}

    /// A transition request was submitted.
    fn record_transition(
        &mut self,
        context: &mut C::Context,
        origin: StateId,
        transition_type: TransitionType,
        target: StateId,
    ) {
    }

    /// A state reported success or failure of its plan task.
    fn record_task_status(
        &mut self,
        context: &mut C::Context,
        region: RegionId,
        origin: StateId,
        event: StatusEvent,
    ) {
    }

    /// A region's plan completed or failed.
    fn record_plan_status(&mut self, context: &mut C::Context, region: RegionId, event: StatusEvent) {
    }

    /// A guard cancelled the pending transitions.
    fn record_cancelled_pending(&mut self, context: &mut C::Context, origin: StateId) {}

    /// Utilitarian selection resolved to a prong.
    fn record_utility_resolution(
        &mut self,
        context: &mut C::Context,
        head: StateId,
        prong: Prong,
        utility: Utility,
    ) {
    }

    /// RandomUtil selection resolved to a prong.
    fn record_random_resolution(
        &mut self,
        context: &mut C::Context,
        head: StateId,
        prong: Prong,
        utility: Utility,
    ) {
    }
}
