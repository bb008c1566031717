//! Hook contexts.
//!
//! Hooks receive one of four controls, each widening the last:
//!
//! - [`Control`]: queries — context, RNG, id lookup, activation, plan view
//! - [`PlanControl`]: adds plan mutation, scoped to the current region
//! - [`FullControl`]: adds transition requests and `succeed`/`fail`
//! - [`GuardControl`]: adds pending-transition inspection and cancellation
//!
//! The tower is composition plus `Deref`, so a `FullControl` answers every
//! `Control` query. Scoped origin/region frames are closure-based: the
//! previous value is restored on every exit path of the closure.

use std::any::TypeId;
use std::ops::{Deref, DerefMut};

use trellis_types::{
    Method, Prong, RegionId, StateId, StatusEvent, TransitionType, Utility,
};

use crate::config::Config;
use crate::logger::Logger;
use crate::plan::{PlanData, Task};
use crate::registry::Registry;
use crate::tree::{RegionInfo, Tree};

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum StatusResult {
    #[default]
    None,
    Success,
    Failure,
}

/// Outcome of one dispatch over a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Status {
    pub result: StatusResult,
    /// A hook requested a transition outside its region; plan handling is
    /// skipped on the way up.
    pub outer_transition: bool,
}

impl Status {
    pub fn notable(self) -> bool {
        self.result != StatusResult::None || self.outer_transition
    }

    /// Orthogonal aggregation: success dominates failure dominates none;
    /// the outer flag is OR'd.
    pub fn combine(self, other: Status) -> Status {
        let result = match (self.result, other.result) {
            (StatusResult::Success, _) | (_, StatusResult::Success) => StatusResult::Success,
            (StatusResult::Failure, _) | (_, StatusResult::Failure) => StatusResult::Failure,
            _ => StatusResult::None,
        };
        Status {
            result,
            outer_transition: self.outer_transition || other.outer_transition,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// One queued transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Request {
    pub kind: TransitionType,
    pub state_id: StateId,
    /// Hook the request was raised from, for history attribution.
    pub method: Method,
}

/// The root engine's request queue. Capacity is fixed at build time;
/// overflow means hooks are requesting faster than the tree can commit.
#[derive(Debug)]
pub(crate) struct RequestQueue {
    items: Vec<Request>,
    capacity: usize,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, request: Request) {
        assert!(
            self.items.len() < self.capacity,
            "request queue overflow (capacity {})",
            self.capacity
        );
        self.items.push(request);
    }

    pub fn take(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.items)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// The region a hook currently runs in, for plan targeting and
/// outer-transition detection.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegionScope {
    pub id: RegionId,
    pub head: StateId,
    pub size: u16,
}

impl RegionScope {
    pub fn of(region: &RegionInfo) -> Self {
        Self {
            id: region.id,
            head: region.head,
            size: region.size,
        }
    }

    fn contains(self, state: StateId) -> bool {
        let start = u16::from(self.head);
        let id = u16::from(state);
        id >= start && id < start + self.size
    }
}

// ============================================================================
// Control (queries)
// ============================================================================

/// Read-mostly hook context: user context, RNG, id lookup, activation
/// queries, and a view of the current region's plan.
pub struct Control<'a, C: Config> {
    pub(crate) tree: &'a Tree,
    pub(crate) registry: &'a mut Registry,
    pub(crate) plan_data: &'a mut PlanData,
    pub(crate) context: &'a mut C::Context,
    pub(crate) rng: &'a mut C::Rng,
    pub(crate) logger: Option<&'a mut dyn Logger<C>>,
    pub(crate) origin: StateId,
    pub(crate) region: RegionScope,
    pub(crate) method: Method,
}

impl<'a, C: Config> Control<'a, C> {
    pub fn context(&mut self) -> &mut C::Context {
        self.context
    }

    pub fn rng(&mut self) -> &mut C::Rng {
        self.rng
    }

    /// Id of the hook's own state.
    pub fn origin(&self) -> StateId {
        self.origin
    }

    /// Id of the region the hook runs in.
    pub fn region_id(&self) -> RegionId {
        self.region.id
    }

    /// Dense id of a state by its body type. The type must be in the
    /// tree.
    pub fn state_id<T: 'static>(&self) -> StateId {
        self.tree
            .state_of_type(TypeId::of::<T>())
            .expect("state type not part of this machine's tree")
    }

    /// Region headed by the given state type.
    pub fn region_of<T: 'static>(&self) -> RegionId {
        let head = self.state_id::<T>();
        self.tree
            .region_of_head(head)
            .expect("state type does not head a region")
            .id
    }

    pub fn is_active(&self, state: StateId) -> bool {
        debug_assert!(self.tree.contains_id(state), "state id out of tree");
        self.registry.is_active(state)
    }

    pub fn is_resumable(&self, state: StateId) -> bool {
        debug_assert!(self.tree.contains_id(state), "state id out of tree");
        self.registry.is_resumable(state)
    }

    /// Scheduled is resumable: a `schedule` request parks its target as
    /// the parent region's resumable child.
    pub fn is_scheduled(&self, state: StateId) -> bool {
        self.is_resumable(state)
    }

    /// Whether the state has reported success since it last constructed.
    pub fn task_succeeded(&self, state: StateId) -> bool {
        self.plan_data.succeeded(state)
    }

    /// Whether the state has reported failure since it last constructed.
    pub fn task_failed(&self, state: StateId) -> bool {
        self.plan_data.failed(state)
    }

    /// Whether the current region has a plan.
    pub fn plan_exists(&self) -> bool {
        self.plan_data.plan_exists(self.region.id)
    }

    /// Tasks of the current region's plan, in order.
    pub fn plan_tasks(&self) -> Vec<Task> {
        let mut tasks = Vec::new();
        let mut index = self.plan_data.first_task(self.region.id);
        while index != crate::plan::INVALID_TASK {
            tasks.push(self.plan_data.task(index));
            index = self.plan_data.next_task(index);
        }
        tasks
    }

    pub fn plan_task_count(&self) -> usize {
        self.plan_data.task_count(self.region.id)
    }

    // ------------------------------------------------------------------
    // Logging plumbing
    // ------------------------------------------------------------------

    pub(crate) fn log_method(&mut self, origin: StateId, method: Method) {
        if let Some(logger) = self.logger.as_deref_mut() {
            logger.record_method(self.context, origin, method);
        }
    }

    pub(crate) fn log_transition(
        &mut self,
        origin: StateId,
        transition_type: TransitionType,
        target: StateId,
    ) {
        if let Some(logger) = self.logger.as_deref_mut() {
            logger.record_transition(self.context, origin, transition_type, target);
        }
    }

    pub(crate) fn log_task_status(
        &mut self,
        region: RegionId,
        origin: StateId,
        event: StatusEvent,
    ) {
        if let Some(logger) = self.logger.as_deref_mut() {
            logger.record_task_status(self.context, region, origin, event);
        }
    }

    pub(crate) fn log_plan_status(&mut self, region: RegionId, event: StatusEvent) {
        if let Some(logger) = self.logger.as_deref_mut() {
            logger.record_plan_status(self.context, region, event);
        }
    }

    pub(crate) fn log_cancelled_pending(&mut self, origin: StateId) {
        if let Some(logger) = self.logger.as_deref_mut() {
            logger.record_cancelled_pending(self.context, origin);
        }
    }

    pub(crate) fn log_utility_resolution(
        &mut self,
        head: StateId,
        prong: Prong,
        utility: Utility,
    ) {
        if let Some(logger) = self.logger.as_deref_mut() {
            logger.record_utility_resolution(self.context, head, prong, utility);
        }
    }

    pub(crate) fn log_random_resolution(&mut self, head: StateId, prong: Prong, utility: Utility) {
        if let Some(logger) = self.logger.as_deref_mut() {
            logger.record_random_resolution(self.context, head, prong, utility);
        }
    }
}

// ============================================================================
// PlanControl
// ============================================================================

/// [`Control`] plus mutation of the current region's plan.
pub struct PlanControl<'a, C: Config> {
    pub(crate) base: Control<'a, C>,
}

impl<'a, C: Config> Deref for PlanControl<'a, C> {
    type Target = Control<'a, C>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl<C: Config> DerefMut for PlanControl<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl<C: Config> PlanControl<'_, C> {
    /// Appends a task to the current region's plan.
    pub fn add_task(
        &mut self,
        transition_type: TransitionType,
        origin: StateId,
        destination: StateId,
    ) {
        let region = self.base.region.id;
        self.base
            .plan_data
            .append(region, transition_type, origin, destination);
    }

    /// Appends a change task: when `origin` succeeds, change to
    /// `destination`.
    pub fn plan_change(&mut self, origin: StateId, destination: StateId) {
        self.add_task(TransitionType::Change, origin, destination);
    }

    pub fn plan_restart(&mut self, origin: StateId, destination: StateId) {
        self.add_task(TransitionType::Restart, origin, destination);
    }

    pub fn plan_resume(&mut self, origin: StateId, destination: StateId) {
        self.add_task(TransitionType::Resume, origin, destination);
    }

    pub fn plan_utilize(&mut self, origin: StateId, destination: StateId) {
        self.add_task(TransitionType::Utilize, origin, destination);
    }

    pub fn plan_randomize(&mut self, origin: StateId, destination: StateId) {
        self.add_task(TransitionType::Randomize, origin, destination);
    }

    /// Drops the current region's plan.
    pub fn clear_plan(&mut self) {
        let region = self.base.region.id;
        self.base.plan_data.clear_region(region);
    }
}

// ============================================================================
// FullControl
// ============================================================================

/// [`PlanControl`] plus transition requests and task status reporting.
pub struct FullControl<'a, C: Config> {
    pub(crate) base: PlanControl<'a, C>,
    pub(crate) requests: &'a mut RequestQueue,
    pub(crate) status: Status,
    pub(crate) locked: bool,
}

impl<'a, C: Config> Deref for FullControl<'a, C> {
    type Target = PlanControl<'a, C>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl<C: Config> DerefMut for FullControl<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl<C: Config> FullControl<'_, C> {
    pub(crate) fn change_with(&mut self, kind: TransitionType, target: StateId) {
        debug_assert!(
            self.base.base.tree.contains_id(target),
            "transition target out of tree"
        );

        // A parent hook that already produced a status locks its children
        // out of transitions. Schedule slips through: it only parks a
        // resumable child and cannot fight the parent's transition.
        if self.locked && kind != TransitionType::Schedule {
            tracing::trace!(kind = %kind, state = %target, "request ignored: control locked");
            return;
        }

        let origin = self.base.base.origin;
        let method = self.base.base.method;
        if kind != TransitionType::Schedule && !self.base.base.region.contains(target) {
            self.status.outer_transition = true;
        }
        self.requests.push(Request {
            kind,
            state_id: target,
            method,
        });
        self.base.base.log_transition(origin, kind, target);
    }

    /// Requests a transition to the state, selecting per each entered
    /// region's own strategy.
    pub fn change_to(&mut self, target: StateId) {
        self.change_with(TransitionType::Change, target);
    }

    /// Requests a transition forcing first-child selection below the
    /// target.
    pub fn restart(&mut self, target: StateId) {
        self.change_with(TransitionType::Restart, target);
    }

    /// Requests a transition preferring each region's last active child.
    pub fn resume(&mut self, target: StateId) {
        self.change_with(TransitionType::Resume, target);
    }

    /// Requests a transition selecting by reported utility.
    pub fn utilize(&mut self, target: StateId) {
        self.change_with(TransitionType::Utilize, target);
    }

    /// Requests a transition selecting by weighted random over ranks.
    pub fn randomize(&mut self, target: StateId) {
        self.change_with(TransitionType::Randomize, target);
    }

    /// Parks the target as its region's resumable child without entering
    /// it.
    pub fn schedule(&mut self, target: StateId) {
        self.change_with(TransitionType::Schedule, target);
    }

    /// Marks the current state's plan task as succeeded.
    pub fn succeed(&mut self) {
        let origin = self.base.base.origin;
        debug_assert!(origin.is_valid(), "succeed outside a state hook");
        self.status.result = StatusResult::Success;
        self.base.base.plan_data.mark_success(origin);
        let region = self.base.base.region.id;
        self.base
            .base
            .log_task_status(region, origin, StatusEvent::Succeeded);
    }

    /// Marks the current state's plan task as failed.
    pub fn fail(&mut self) {
        let origin = self.base.base.origin;
        debug_assert!(origin.is_valid(), "fail outside a state hook");
        self.status.result = StatusResult::Failure;
        self.base.base.plan_data.mark_failure(origin);
        let region = self.base.base.region.id;
        self.base
            .base
            .log_task_status(region, origin, StatusEvent::Failed);
    }

    /// Takes and resets the accumulated status; the dispatch wrapper
    /// calls this after each hook.
    pub(crate) fn take_status(&mut self) -> Status {
        std::mem::take(&mut self.status)
    }
}

// ============================================================================
// GuardControl
// ============================================================================

/// [`FullControl`] plus inspection and cancellation of the transitions
/// being guarded.
pub struct GuardControl<'a, C: Config> {
    pub(crate) base: FullControl<'a, C>,
    pub(crate) pending: &'a [Request],
    pub(crate) cancelled: bool,
}

impl<'a, C: Config> Deref for GuardControl<'a, C> {
    type Target = FullControl<'a, C>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl<C: Config> DerefMut for GuardControl<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl<C: Config> GuardControl<'_, C> {
    /// The requests this guard round is vetting.
    pub fn pending_transitions(&self) -> impl Iterator<Item = (TransitionType, StateId)> + '_ {
        self.pending
            .iter()
            .map(|request| (request.kind, request.state_id))
    }

    /// Whether the state's activation changes if the round commits.
    pub fn is_pending_change(&self, state: StateId) -> bool {
        self.is_pending_enter(state) || self.is_pending_exit(state)
    }

    /// Whether the state becomes active if the round commits.
    pub fn is_pending_enter(&self, state: StateId) -> bool {
        let registry = &self.base.base.base.registry;
        !registry.is_active(state) && registry.will_be_active(state)
    }

    /// Whether the state stops being active if the round commits.
    pub fn is_pending_exit(&self, state: StateId) -> bool {
        let registry = &self.base.base.base.registry;
        registry.is_active(state) && !registry.will_be_active(state)
    }

    /// Cancels the round: the registry rolls back to its pre-round state
    /// and the vetted requests are discarded.
    pub fn cancel_pending_transitions(&mut self) {
        self.cancelled = true;
        let origin = self.base.base.base.origin;
        self.base.base.base.log_cancelled_pending(origin);
    }
}

// ============================================================================
// Scoped frames
// ============================================================================

/// Access to the base [`Control`] from any point of the tower, for the
/// scoped-frame helpers.
pub(crate) trait CoreAccess<'a, C: Config> {
    fn core(&mut self) -> &mut Control<'a, C>;
}

impl<'a, C: Config> CoreAccess<'a, C> for Control<'a, C> {
    fn core(&mut self) -> &mut Control<'a, C> {
        self
    }
}

impl<'a, C: Config> CoreAccess<'a, C> for PlanControl<'a, C> {
    fn core(&mut self) -> &mut Control<'a, C> {
        &mut self.base
    }
}

impl<'a, C: Config> CoreAccess<'a, C> for FullControl<'a, C> {
    fn core(&mut self) -> &mut Control<'a, C> {
        &mut self.base.base
    }
}

impl<'a, C: Config> CoreAccess<'a, C> for GuardControl<'a, C> {
    fn core(&mut self) -> &mut Control<'a, C> {
        &mut self.base.base.base
    }
}

/// Runs `f` with the origin and method frame set to the given state; the
/// previous frame is restored on every exit path.
pub(crate) fn with_origin<'a, C, T, R>(
    ctl: &mut T,
    origin: StateId,
    method: Method,
    f: impl FnOnce(&mut T) -> R,
) -> R
where
    C: Config,
    T: CoreAccess<'a, C>,
{
    let (prev_origin, prev_method) = {
        let core = ctl.core();
        let prev = (core.origin, core.method);
        core.origin = origin;
        core.method = method;
        prev
    };
    let out = f(ctl);
    let core = ctl.core();
    core.origin = prev_origin;
    core.method = prev_method;
    out
}

/// Runs `f` with the region frame set; the previous frame is restored on
/// every exit path.
pub(crate) fn with_region<'a, C, T, R>(
    ctl: &mut T,
    region: RegionScope,
    f: impl FnOnce(&mut T) -> R,
) -> R
where
    C: Config,
    T: CoreAccess<'a, C>,
{
    let prev = {
        let core = ctl.core();
        let prev = core.region;
        core.region = region;
        prev
    };
    let out = f(ctl);
    ctl.core().region = prev;
    out
}

/// Access to the [`FullControl`] layer, for the lock frame.
pub(crate) trait FullAccess<'a, C: Config> {
    fn full(&mut self) -> &mut FullControl<'a, C>;
}

impl<'a, C: Config> FullAccess<'a, C> for FullControl<'a, C> {
    fn full(&mut self) -> &mut FullControl<'a, C> {
        self
    }
}

impl<'a, C: Config> FullAccess<'a, C> for GuardControl<'a, C> {
    fn full(&mut self) -> &mut FullControl<'a, C> {
        &mut self.base
    }
}

/// Runs `f` with the transition lock held; children run for side effects
/// only.
pub(crate) fn with_lock<'a, C, T, R>(ctl: &mut T, f: impl FnOnce(&mut T) -> R) -> R
where
    C: Config,
    T: FullAccess<'a, C>,
{
    let prev = {
        let full = ctl.full();
        let prev = full.locked;
        full.locked = true;
        prev
    };
    let out = f(ctl);
    ctl.full().locked = prev;
    out
}
