//! The root engine.
//!
//! A [`Machine`] owns the tree, the state bodies, the registry, the plan
//! store, the request queue, the user context, and the PRNG. Hooks run
//! synchronously inside `update`/`react`; requests they raise are drained
//! in substitution rounds — snapshot the registry, apply the round's
//! requests, run the guards, restore on cancellation — bounded by
//! `Config::SUBSTITUTION_LIMIT`, then committed in one pass of
//! exits/constructs/enters/re-enters.
//!
//! The machine also serializes its active/resumable configuration to a
//! bit stream, records committed transitions into a bounded history, and
//! replays recorded transitions without running guards.

use std::collections::VecDeque;

use trellis_types::{Method, Prong, RegionId, StateId, TransitionRecord, TransitionType};
use trellis_wire::{BitReader, BitWriter, SerialBuffer, WireError, bit_width};

use crate::config::Config;
use crate::control::{
    Control, FullControl, GuardControl, PlanControl, RegionScope, Request, RequestQueue, Status,
};
use crate::dispatch::{self, RequestKind};
use crate::logger::Logger;
use crate::plan::PlanData;
use crate::registry::Registry;
use crate::state::BodyArena;
use crate::structure::{self, StructureEntry};
use crate::tree::{self, BuildError, Node, NodeId, RegionDef, RegionSlot, Tree};

/// A hierarchical state machine instance.
///
/// Built from a [`RegionDef`] tree; the tree is fixed for the machine's
/// lifetime. All dispatch is synchronous and single-threaded.
pub struct Machine<C: Config> {
    tree: Tree,
    bodies: BodyArena<C>,
    registry: Registry,
    plan_data: PlanData,
    requests: RequestQueue,
    context: C::Context,
    rng: C::Rng,
    logger: Option<Box<dyn Logger<C>>>,
    history: VecDeque<TransitionRecord>,
    history_capacity: usize,
}

impl<C: Config> std::fmt::Debug for Machine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine").finish_non_exhaustive()
    }
}

impl<C: Config> Machine<C> {
    /// Builds the machine and enters the initial configuration.
    pub fn new(def: RegionDef<C>, context: C::Context, rng: C::Rng) -> Result<Self, BuildError> {
        Self::build(def, context, rng, None)
    }

    /// Builds the machine with a logger attached from the first
    /// construct/enter onward.
    pub fn with_logger(
        def: RegionDef<C>,
        context: C::Context,
        rng: C::Rng,
        logger: Box<dyn Logger<C>>,
    ) -> Result<Self, BuildError> {
        Self::build(def, context, rng, Some(logger))
    }

    fn build(
        def: RegionDef<C>,
        context: C::Context,
        rng: C::Rng,
        logger: Option<Box<dyn Logger<C>>>,
    ) -> Result<Self, BuildError> {
        if C::SUBSTITUTION_LIMIT < 1 {
            return Err(BuildError::InvalidSubstitutionLimit {
                limit: C::SUBSTITUTION_LIMIT,
            });
        }

        let (tree, slots) = tree::build(def)?;
        let task_capacity = C::TASK_CAPACITY.unwrap_or(tree.compo_prongs() * 2);
        let (state_parents, compo_parents, ortho_parents, ortho_widths) = tree.parent_tables();
        let registry = Registry::new(state_parents, compo_parents, ortho_parents, ortho_widths);
        let plan_data = PlanData::new(task_capacity, tree.region_count(), tree.state_count());
        let requests = RequestQueue::new(tree.compo_count().max(1));
        let history_capacity = (tree.compo_count() * 4).max(4);

        let mut machine = Self {
            bodies: BodyArena::new(slots),
            registry,
            plan_data,
            requests,
            context,
            rng,
            logger,
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
            tree,
        };
        machine.initial_enter();
        Ok(machine)
    }

    // ==================================================================
    // Ticking
    // ==================================================================

    /// Runs one update tick over the active configuration, then resolves
    /// any transitions it raised.
    pub fn update(&mut self) {
        {
            let (tree, bodies, mut ctl) = self.full_control(Method::Update);
            let root = tree.root();
            let _ = dispatch::deep_update(tree, bodies, &mut ctl, root);
        }
        self.process_transitions();
    }

    /// Dispatches one event over the active configuration, then resolves
    /// any transitions it raised.
    pub fn react(&mut self, event: &C::Event) {
        {
            let (tree, bodies, mut ctl) = self.full_control(Method::React);
            let root = tree.root();
            let _ = dispatch::deep_react(tree, bodies, &mut ctl, event, root);
        }
        self.process_transitions();
    }

    // ==================================================================
    // External transition requests
    // ==================================================================

    /// Queues a change to the state; each freshly entered region selects
    /// by its own strategy. Resolved on the next `update`/`react`.
    pub fn change_to(&mut self, target: StateId) {
        self.queue_request(TransitionType::Change, target);
    }

    /// Queues a change forcing first-child selection below the target.
    pub fn restart(&mut self, target: StateId) {
        self.queue_request(TransitionType::Restart, target);
    }

    /// Queues a change preferring each region's last active child.
    pub fn resume(&mut self, target: StateId) {
        self.queue_request(TransitionType::Resume, target);
    }

    /// Queues a change selecting by reported utility below the target.
    pub fn utilize(&mut self, target: StateId) {
        self.queue_request(TransitionType::Utilize, target);
    }

    /// Queues a change sampling by rank and utility below the target.
    pub fn randomize(&mut self, target: StateId) {
        self.queue_request(TransitionType::Randomize, target);
    }

    /// Parks the target as its region's resumable child without entering
    /// it.
    pub fn schedule(&mut self, target: StateId) {
        self.queue_request(TransitionType::Schedule, target);
    }

    pub fn change_to_t<T: 'static>(&mut self) {
        let target = self.state_id::<T>();
        self.change_to(target);
    }

    pub fn restart_t<T: 'static>(&mut self) {
        let target = self.state_id::<T>();
        self.restart(target);
    }

    pub fn resume_t<T: 'static>(&mut self) {
        let target = self.state_id::<T>();
        self.resume(target);
    }

    pub fn utilize_t<T: 'static>(&mut self) {
        let target = self.state_id::<T>();
        self.utilize(target);
    }

    pub fn randomize_t<T: 'static>(&mut self) {
        let target = self.state_id::<T>();
        self.randomize(target);
    }

    pub fn schedule_t<T: 'static>(&mut self) {
        let target = self.state_id::<T>();
        self.schedule(target);
    }

    fn queue_request(&mut self, kind: TransitionType, target: StateId) {
        debug_assert!(self.tree.contains_id(target), "request target out of tree");
        self.requests.push(Request {
            kind,
            state_id: target,
            method: Method::Update,
        });
        if let Some(logger) = self.logger.as_deref_mut() {
            logger.record_transition(&mut self.context, StateId::INVALID, kind, target);
        }
    }

    // ==================================================================
    // Queries
    // ==================================================================

    /// Dense id of a state by its body type.
    pub fn state_id<T: 'static>(&self) -> StateId {
        self.try_state_id::<T>()
            .expect("state type not part of this machine's tree")
    }

    pub fn try_state_id<T: 'static>(&self) -> Option<StateId> {
        self.tree.state_of_type(std::any::TypeId::of::<T>())
    }

    /// Id of the region headed by the given state type.
    pub fn region_id<T: 'static>(&self) -> RegionId {
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

    /// Scheduled is resumable: a scheduled state is parked as its
    /// region's resumable child.
    pub fn is_scheduled(&self, state: StateId) -> bool {
        self.is_resumable(state)
    }

    pub fn is_active_t<T: 'static>(&self) -> bool {
        self.is_active(self.state_id::<T>())
    }

    pub fn is_resumable_t<T: 'static>(&self) -> bool {
        self.is_resumable(self.state_id::<T>())
    }

    pub fn is_scheduled_t<T: 'static>(&self) -> bool {
        self.is_scheduled(self.state_id::<T>())
    }

    pub fn context(&self) -> &C::Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C::Context {
        &mut self.context
    }

    /// Currently active states, heads first, in depth-first order.
    pub fn active_states(&self) -> Vec<StateId> {
        let mut out = Vec::new();
        self.collect_active(self.tree.root(), &mut out);
        out
    }

    fn collect_active(&self, node: NodeId, out: &mut Vec<StateId>) {
        match self.tree.node(node) {
            Node::Leaf(state) => out.push(state),
            Node::Region(region_id) => {
                let region = self.tree.region(region_id);
                out.push(region.head);
                match region.slot {
                    RegionSlot::Compo(compo) => {
                        let active = self.registry.compo_active[compo];
                        if active.is_valid() {
                            self.collect_active(region.children[active.index()], out);
                        }
                    }
                    RegionSlot::Ortho(_) => {
                        for &child in &region.children {
                            self.collect_active(child, out);
                        }
                    }
                }
            }
        }
    }

    /// One entry per state in depth-first order, for external printers.
    pub fn structure(&self) -> Vec<StructureEntry> {
        structure::report(&self.tree, &self.registry)
    }

    /// The bounded record of committed transitions, oldest first.
    pub fn transition_history(&self) -> Vec<TransitionRecord> {
        self.history.iter().copied().collect()
    }

    /// Attaches an event sink, returning the previous one.
    pub fn attach_logger(&mut self, logger: Box<dyn Logger<C>>) -> Option<Box<dyn Logger<C>>> {
        self.logger.replace(logger)
    }

    pub fn detach_logger(&mut self) -> Option<Box<dyn Logger<C>>> {
        self.logger.take()
    }

    // ==================================================================
    // Reset, serialization, replay
    // ==================================================================

    /// Exits everything, clears all machine state, and re-enters the
    /// initial configuration. Guards do not run.
    pub fn reset(&mut self) {
        {
            let (tree, bodies, mut ctl) = self.plan_control(Method::Exit);
            let root = tree.root();
            dispatch::deep_exit(tree, bodies, &mut ctl, root);
            dispatch::deep_destruct(tree, bodies, &mut ctl, root);
        }
        self.plan_data.clear_all();
        self.registry.reset();
        self.requests.clear();
        self.history.clear();

        {
            let (tree, bodies, mut ctl) = self.plan_control(Method::Construct);
            let root = tree.root();
            dispatch::deep_request(tree, bodies, &mut ctl, root, RequestKind::Change);
            dispatch::deep_construct(tree, bodies, &mut ctl, root);
            dispatch::deep_enter(tree, bodies, &mut ctl, root);
        }
        self.registry.clear_requests();
        self.requests.clear();
    }

    /// Writes the active and resumable configuration as a bit stream.
    pub fn save(&self, buffer: &mut SerialBuffer) {
        buffer.clear();
        let mut writer = BitWriter::new(buffer);
        save_active(&self.tree, &self.registry, &mut writer, self.tree.root());
    }

    /// Restores a configuration written by [`Machine::save`]. The current
    /// configuration exits, the loaded one constructs and enters. On a
    /// malformed buffer the machine is left untouched.
    pub fn load(&mut self, buffer: &SerialBuffer) -> Result<(), WireError> {
        let mut staging = Staging {
            requested: vec![Prong::INVALID; self.registry.compo_count()],
            resumable: vec![Prong::INVALID; self.registry.compo_count()],
        };
        let mut reader = BitReader::new(buffer);
        load_active(&self.tree, &mut reader, self.tree.root(), &mut staging)?;

        {
            let (tree, bodies, mut ctl) = self.plan_control(Method::Exit);
            let root = tree.root();
            dispatch::deep_exit(tree, bodies, &mut ctl, root);
            dispatch::deep_destruct(tree, bodies, &mut ctl, root);
        }
        self.plan_data.clear_all();
        self.requests.clear();
        self.registry.reset();
        self.registry.compo_requested.clone_from(&staging.requested);
        self.registry.compo_resumable.clone_from(&staging.resumable);

        {
            let (tree, bodies, mut ctl) = self.plan_control(Method::Construct);
            let root = tree.root();
            dispatch::deep_construct(tree, bodies, &mut ctl, root);
            dispatch::deep_enter(tree, bodies, &mut ctl, root);
        }
        self.registry.clear_requests();
        Ok(())
    }

    /// Applies recorded transitions without running guards, committing
    /// after each record so the active and resumable vectors retrace the
    /// recorded run step by step.
    pub fn replay_transitions(&mut self, records: &[TransitionRecord]) {
        for record in records {
            self.replay_transition(*record);
        }
    }

    /// Applies one recorded transition without running guards: the
    /// registry walk and subtree marking, then an immediate commit.
    pub fn replay_transition(&mut self, record: TransitionRecord) {
        let changes_made;
        {
            let (tree, bodies, mut ctl) = self.plan_control(Method::Update);
            let request = Request {
                kind: record.transition_type,
                state_id: record.state_id,
                method: record.method,
            };
            changes_made = apply_request(tree, bodies, &mut ctl, request);
        }
        if changes_made {
            let (tree, bodies, mut ctl) = self.plan_control(Method::Update);
            let root = tree.root();
            dispatch::deep_change_to_requested(tree, bodies, &mut ctl, root);
        }
        self.registry.clear_requests();
        self.push_history(record);
    }

    // ==================================================================
    // Engine internals
    // ==================================================================

    fn initial_enter(&mut self) {
        {
            let (tree, bodies, mut ctl) = self.plan_control(Method::Construct);
            let root = tree.root();
            dispatch::deep_request(tree, bodies, &mut ctl, root, RequestKind::Change);
        }

        for _round in 0..C::SUBSTITUTION_LIMIT {
            let snapshot = self.registry.snapshot();
            let pending = self.requests.take();
            {
                let (tree, bodies, mut ctl) = self.plan_control(Method::Construct);
                for request in &pending {
                    let _ = apply_request(tree, bodies, &mut ctl, *request);
                }
            }
            if self.cancelled_by_entry_guards(&pending) {
                self.registry.restore(&snapshot);
                if self.requests.is_empty() {
                    // Cancelled without a substitute: the seeded
                    // configuration stands.
                    break;
                }
            } else {
                break;
            }
        }
        self.requests.clear();

        {
            let (tree, bodies, mut ctl) = self.plan_control(Method::Construct);
            let root = tree.root();
            dispatch::deep_construct(tree, bodies, &mut ctl, root);
            dispatch::deep_enter(tree, bodies, &mut ctl, root);
        }
        self.registry.clear_requests();
    }

    fn process_transitions(&mut self) {
        if self.requests.is_empty() {
            return;
        }

        let mut changes_made = false;
        for _round in 0..C::SUBSTITUTION_LIMIT {
            if self.requests.is_empty() {
                break;
            }
            let snapshot = self.registry.snapshot();
            let pending = self.requests.take();
            let mut round_changes = false;
            {
                let (tree, bodies, mut ctl) = self.plan_control(Method::Update);
                for request in &pending {
                    round_changes |= apply_request(tree, bodies, &mut ctl, *request);
                }
            }
            if !round_changes {
                continue;
            }
            if self.cancelled_by_guards(&pending) {
                self.registry.restore(&snapshot);
            } else {
                changes_made = true;
                for request in &pending {
                    self.push_history(TransitionRecord::new(
                        request.state_id,
                        request.method,
                        request.kind,
                    ));
                }
            }
        }

        if !self.requests.is_empty() {
            tracing::warn!(
                dropped = self.requests.len(),
                limit = C::SUBSTITUTION_LIMIT,
                "substitution limit reached; dropping remaining requests"
            );
            self.requests.clear();
        }

        if changes_made {
            let (tree, bodies, mut ctl) = self.plan_control(Method::Update);
            let root = tree.root();
            dispatch::deep_change_to_requested(tree, bodies, &mut ctl, root);
        }
        self.registry.clear_requests();
    }

    fn cancelled_by_guards(&mut self, pending: &[Request]) -> bool {
        let (tree, bodies, mut ctl) = self.guard_control(pending, Method::ExitGuard);
        let root = tree.root();
        dispatch::deep_forward_exit_guard(tree, bodies, &mut ctl, root);
        if ctl.cancelled {
            return true;
        }
        dispatch::deep_forward_entry_guard(tree, bodies, &mut ctl, root);
        ctl.cancelled
    }

    fn cancelled_by_entry_guards(&mut self, pending: &[Request]) -> bool {
        let (tree, bodies, mut ctl) = self.guard_control(pending, Method::EntryGuard);
        let root = tree.root();
        dispatch::deep_entry_guard(tree, bodies, &mut ctl, root);
        ctl.cancelled
    }

    fn push_history(&mut self, record: TransitionRecord) {
        while self.history.len() >= self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    // ------------------------------------------------------------------
    // Control builders
    // ------------------------------------------------------------------

    fn plan_control(&mut self, method: Method) -> (&Tree, &mut BodyArena<C>, PlanControl<'_, C>) {
        let Machine {
            tree,
            bodies,
            registry,
            plan_data,
            context,
            rng,
            logger,
            ..
        } = self;
        let tree: &Tree = tree;
        let region = RegionScope::of(tree.region(tree.root_region()));
        let logger: Option<&mut dyn Logger<C>> = match logger {
            Some(l) => Some(&mut **l),
            None => None,
        };
        let ctl = PlanControl {
            base: Control {
                tree,
                registry,
                plan_data,
                context,
                rng,
                logger,
                origin: StateId::INVALID,
                region,
                method,
            },
        };
        (tree, bodies, ctl)
    }

    fn full_control(&mut self, method: Method) -> (&Tree, &mut BodyArena<C>, FullControl<'_, C>) {
        let Machine {
            tree,
            bodies,
            registry,
            plan_data,
            requests,
            context,
            rng,
            logger,
            ..
        } = self;
        let tree: &Tree = tree;
        let region = RegionScope::of(tree.region(tree.root_region()));
        let logger: Option<&mut dyn Logger<C>> = match logger {
            Some(l) => Some(&mut **l),
            None => None,
        };
        let ctl = FullControl {
            base: PlanControl {
                base: Control {
                    tree,
                    registry,
                    plan_data,
                    context,
                    rng,
                    logger,
                    origin: StateId::INVALID,
                    region,
                    method,
                },
            },
            requests,
            status: Status::default(),
            locked: false,
        };
        (tree, bodies, ctl)
    }

    fn guard_control<'s>(
        &'s mut self,
        pending: &'s [Request],
        method: Method,
    ) -> (&'s Tree, &'s mut BodyArena<C>, GuardControl<'s, C>) {
        let Machine {
            tree,
            bodies,
            registry,
            plan_data,
            requests,
            context,
            rng,
            logger,
            ..
        } = self;
        let tree: &Tree = tree;
        let region = RegionScope::of(tree.region(tree.root_region()));
        let logger: Option<&mut dyn Logger<C>> = match logger {
            Some(l) => Some(&mut **l),
            None => None,
        };
        let ctl = GuardControl {
            base: FullControl {
                base: PlanControl {
                    base: Control {
                        tree,
                        registry,
                        plan_data,
                        context,
                        rng,
                        logger,
                        origin: StateId::INVALID,
                        region,
                        method,
                    },
                },
                requests,
                status: Status::default(),
                locked: false,
            },
            pending,
            cancelled: false,
        };
        (tree, bodies, ctl)
    }
}

// ============================================================================
// Request application
// ============================================================================

fn to_request_kind(kind: TransitionType) -> RequestKind {
    match kind {
        TransitionType::Change => RequestKind::Change,
        TransitionType::Restart => RequestKind::Restart,
        TransitionType::Resume => RequestKind::Resume,
        TransitionType::Utilize => RequestKind::Utilize,
        TransitionType::Randomize => RequestKind::Randomize,
        TransitionType::Schedule => unreachable!("schedule never descends a subtree"),
    }
}

/// Applies one request to the registry (and, below an inactive target,
/// the subtree's selection marks). Returns whether the registry's fork
/// state may have changed.
fn apply_request<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    request: Request,
) -> bool {
    debug_assert!(
        tree.contains_id(request.state_id),
        "request target out of tree"
    );

    if request.kind == TransitionType::Schedule {
        ctl.registry.request_scheduled(request.state_id);
        return false;
    }

    let kind = to_request_kind(request.kind);
    let target = request.state_id;

    if let Some(region) = tree.region_of_head(target) {
        let entered = match region.slot {
            RegionSlot::Compo(compo) => ctl.registry.compo_active[compo].is_valid(),
            RegionSlot::Ortho(_) => true,
        };
        // A plain change to an active region does not re-select; the
        // active branch re-enters in place.
        if request.kind == TransitionType::Change && entered && ctl.registry.is_active(target) {
            match region.slot {
                RegionSlot::Compo(compo) => ctl.registry.mark_reenter(compo),
                RegionSlot::Ortho(_) => mark_reenter_above(ctl, region.parent),
            }
            let parent = region.parent;
            ctl.registry.walk_remains(parent);
            return true;
        }

        let parent = region.parent;
        ctl.registry.walk_change(parent);
        dispatch::deep_request(tree, bodies, ctl, region.node, kind);
        dispatch::deep_forward_fill(tree, bodies, ctl, tree.root());
        true
    } else {
        let parent = ctl.registry.state_parent(target);
        ctl.registry.walk_change(parent);
        dispatch::deep_forward_fill(tree, bodies, ctl, tree.root());
        true
    }
}

/// Re-entering an active orthogonal region is anchored at its nearest
/// composite ancestor; an apex orthogonal region has none, and the
/// request is a no-op.
fn mark_reenter_above<C: Config>(ctl: &mut PlanControl<'_, C>, start: crate::registry::Parent) {
    let mut parent = start;
    while !parent.fork.is_none() {
        if parent.fork.is_composite() {
            ctl.registry.mark_reenter(parent.fork.compo_index());
            return;
        }
        let ortho = parent.fork.ortho_index();
        ctl.registry.set_ortho_requested(ortho, parent.prong);
        parent = ctl.registry.ortho_parent(ortho);
    }
    tracing::trace!("change to an apex orthogonal head is a no-op");
}

// ============================================================================
// Serialization recursion
// ============================================================================

struct Staging {
    requested: Vec<Prong>,
    resumable: Vec<Prong>,
}

fn save_active(tree: &Tree, registry: &Registry, writer: &mut BitWriter<'_>, node: NodeId) {
    match tree.node(node) {
        Node::Leaf(_) => {}
        Node::Region(region_id) => {
            let region = tree.region(region_id);
            match region.slot {
                RegionSlot::Compo(compo) => {
                    let width = bit_width(region.width());
                    let active = registry.compo_active[compo];
                    debug_assert!(active.is_valid(), "saving an inactive composite region");
                    writer.write(width, active.index() as u32);

                    let resumable = registry.compo_resumable[compo];
                    if resumable.is_valid() {
                        writer.write(1, 1);
                        writer.write(width, resumable.index() as u32);
                    } else {
                        writer.write(1, 0);
                    }

                    save_active(tree, registry, writer, region.children[active.index()]);
                    for (index, &child) in region.children.iter().enumerate() {
                        if index != active.index() {
                            save_resumable(tree, registry, writer, child);
                        }
                    }
                }
                RegionSlot::Ortho(_) => {
                    for &child in &region.children {
                        save_active(tree, registry, writer, child);
                    }
                }
            }
        }
    }
}

fn save_resumable(tree: &Tree, registry: &Registry, writer: &mut BitWriter<'_>, node: NodeId) {
    match tree.node(node) {
        Node::Leaf(_) => {}
        Node::Region(region_id) => {
            let region = tree.region(region_id);
            if let RegionSlot::Compo(compo) = region.slot {
                let width = bit_width(region.width());
                let resumable = registry.compo_resumable[compo];
                if resumable.is_valid() {
                    writer.write(1, 1);
                    writer.write(width, resumable.index() as u32);
                } else {
                    writer.write(1, 0);
                }
            }
            for &child in &region.children {
                save_resumable(tree, registry, writer, child);
            }
        }
    }
}

fn load_active(
    tree: &Tree,
    reader: &mut BitReader<'_>,
    node: NodeId,
    staging: &mut Staging,
) -> Result<(), WireError> {
    match tree.node(node) {
        Node::Leaf(_) => Ok(()),
        Node::Region(region_id) => {
            let region = tree.region(region_id);
            match region.slot {
                RegionSlot::Compo(compo) => {
                    let width = bit_width(region.width());
                    let active = reader.read(width)?;
                    if active as usize >= region.width() {
                        return Err(WireError::IndexOutOfRange {
                            index: active,
                            width,
                        });
                    }
                    staging.requested[compo] = Prong::new(active as u8);
                    staging.resumable[compo] = read_resumable(reader, width, region.width())?;

                    load_active(tree, reader, region.children[active as usize], staging)?;
                    for (index, &child) in region.children.iter().enumerate() {
                        if index != active as usize {
                            load_resumable(tree, reader, child, staging)?;
                        }
                    }
                    Ok(())
                }
                RegionSlot::Ortho(_) => {
                    for &child in &region.children {
                        load_active(tree, reader, child, staging)?;
                    }
                    Ok(())
                }
            }
        }
    }
}

fn load_resumable(
    tree: &Tree,
    reader: &mut BitReader<'_>,
    node: NodeId,
    staging: &mut Staging,
) -> Result<(), WireError> {
    match tree.node(node) {
        Node::Leaf(_) => Ok(()),
        Node::Region(region_id) => {
            let region = tree.region(region_id);
            if let RegionSlot::Compo(compo) = region.slot {
                let width = bit_width(region.width());
                staging.resumable[compo] = read_resumable(reader, width, region.width())?;
            }
            for &child in &region.children {
                load_resumable(tree, reader, child, staging)?;
            }
            Ok(())
        }
    }
}

fn read_resumable(
    reader: &mut BitReader<'_>,
    width: u32,
    child_count: usize,
) -> Result<Prong, WireError> {
    if reader.read(1)? == 0 {
        return Ok(Prong::INVALID);
    }
    let resumable = reader.read(width)?;
    if resumable as usize >= child_count {
        return Err(WireError::IndexOutOfRange {
            index: resumable,
            width,
        });
    }
    Ok(Prong::new(resumable as u8))
}
