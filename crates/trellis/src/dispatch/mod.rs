//! Depth-first dispatch over the state tree.
//!
//! Every operation of the dispatch protocol exists in a `deep_*` form
//! that matches on the node kind and routes to the leaf wrappers here or
//! to the region logic in [`composite`] and [`orthogonal`]. Downward
//! operations (guards, construct, enter, update, react) run head first,
//! then children; upward operations (exit, destruct) run children first.
//!
//! Leaf wrappers run the user hook inside an origin frame so transitions
//! and succeed/fail calls inside the hook are attributed to the right
//! state, and report every invocation to the attached logger.

pub(crate) mod composite;
pub(crate) mod orthogonal;

use trellis_types::{Method, Rank, RegionKind, StateId, StatusEvent, Utility};

use crate::config::Config;
use crate::control::{
    FullControl, GuardControl, PlanControl, Status, StatusResult, with_origin,
};
use crate::plan::INVALID_TASK;
use crate::state::BodyArena;
use crate::tree::{Node, NodeId, RegionInfo, Tree};

/// Selection mode of a report pass. `Change` respects each region's own
/// strategy; `Utilize` and `Randomize` override every composite on the
/// way down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReportMode {
    Change,
    Utilize,
    Randomize,
}

/// Request kinds that descend a subtree, marking each region's requested
/// prong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Change,
    Restart,
    Resume,
    Utilize,
    Randomize,
}

// ============================================================================
// Leaf wrappers
// ============================================================================

pub(crate) fn leaf_entry_guard<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut GuardControl<'_, C>,
    state: StateId,
) {
    ctl.log_method(state, Method::EntryGuard);
    with_origin(ctl, state, Method::EntryGuard, |ctl| {
        bodies.body_mut(state).entry_guard(ctl);
    });
}

pub(crate) fn leaf_exit_guard<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut GuardControl<'_, C>,
    state: StateId,
) {
    ctl.log_method(state, Method::ExitGuard);
    with_origin(ctl, state, Method::ExitGuard, |ctl| {
        bodies.body_mut(state).exit_guard(ctl);
    });
}

pub(crate) fn leaf_construct<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    state: StateId,
) {
    ctl.log_method(state, Method::Construct);
    bodies.slot_mut(state).construct();
}

pub(crate) fn leaf_destruct<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    state: StateId,
) {
    ctl.log_method(state, Method::Destruct);
    bodies.slot_mut(state).destruct();
    ctl.plan_data.clear_marks(state);
}

pub(crate) fn leaf_enter<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    state: StateId,
) {
    ctl.log_method(state, Method::Enter);
    with_origin(ctl, state, Method::Enter, |ctl| {
        bodies.body_mut(state).enter(ctl);
    });
}

pub(crate) fn leaf_reenter<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    state: StateId,
) {
    ctl.log_method(state, Method::Reenter);
    with_origin(ctl, state, Method::Reenter, |ctl| {
        bodies.body_mut(state).reenter(ctl);
    });
}

pub(crate) fn leaf_exit<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    state: StateId,
) {
    ctl.log_method(state, Method::Exit);
    with_origin(ctl, state, Method::Exit, |ctl| {
        bodies.body_mut(state).exit(ctl);
    });
}

pub(crate) fn leaf_update<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut FullControl<'_, C>,
    state: StateId,
) -> Status {
    ctl.log_method(state, Method::Update);
    with_origin(ctl, state, Method::Update, |ctl| {
        bodies.body_mut(state).update(ctl);
    });
    ctl.take_status()
}

pub(crate) fn leaf_react<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut FullControl<'_, C>,
    event: &C::Event,
    state: StateId,
) -> Status {
    ctl.log_method(state, Method::React);
    with_origin(ctl, state, Method::React, |ctl| {
        bodies.body_mut(state).react(event, ctl);
    });
    ctl.take_status()
}

pub(crate) fn leaf_rank<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    state: StateId,
) -> Rank {
    ctl.log_method(state, Method::Rank);
    with_origin(ctl, state, Method::Rank, |ctl| {
        bodies.body_mut(state).rank(ctl)
    })
}

pub(crate) fn leaf_utility<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    state: StateId,
) -> Utility {
    ctl.log_method(state, Method::Utility);
    with_origin(ctl, state, Method::Utility, |ctl| {
        bodies.body_mut(state).utility(ctl)
    })
}

fn leaf_plan_succeeded<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut FullControl<'_, C>,
    state: StateId,
) {
    ctl.log_method(state, Method::PlanSucceeded);
    with_origin(ctl, state, Method::PlanSucceeded, |ctl| {
        bodies.body_mut(state).plan_succeeded(ctl);
    });
    let _ = ctl.take_status();
}

fn leaf_plan_failed<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut FullControl<'_, C>,
    state: StateId,
) {
    ctl.log_method(state, Method::PlanFailed);
    with_origin(ctl, state, Method::PlanFailed, |ctl| {
        bodies.body_mut(state).plan_failed(ctl);
    });
    let _ = ctl.take_status();
}

// ============================================================================
// Node dispatch
// ============================================================================

pub(crate) fn deep_entry_guard<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut GuardControl<'_, C>,
    node: NodeId,
) {
    match tree.node(node) {
        Node::Leaf(state) => leaf_entry_guard(bodies, ctl, state),
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::entry_guard(tree, bodies, ctl, region_id),
            RegionKind::Orthogonal => orthogonal::entry_guard(tree, bodies, ctl, region_id),
        },
    }
}

pub(crate) fn deep_forward_entry_guard<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut GuardControl<'_, C>,
    node: NodeId,
) {
    match tree.node(node) {
        Node::Leaf(_) => {}
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::forward_entry_guard(tree, bodies, ctl, region_id),
            RegionKind::Orthogonal => orthogonal::forward_entry_guard(tree, bodies, ctl, region_id),
        },
    }
}

pub(crate) fn deep_exit_guard<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut GuardControl<'_, C>,
    node: NodeId,
) {
    match tree.node(node) {
        Node::Leaf(state) => leaf_exit_guard(bodies, ctl, state),
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::exit_guard(tree, bodies, ctl, region_id),
            RegionKind::Orthogonal => orthogonal::exit_guard(tree, bodies, ctl, region_id),
        },
    }
}

pub(crate) fn deep_forward_exit_guard<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut GuardControl<'_, C>,
    node: NodeId,
) {
    match tree.node(node) {
        Node::Leaf(_) => {}
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::forward_exit_guard(tree, bodies, ctl, region_id),
            RegionKind::Orthogonal => orthogonal::forward_exit_guard(tree, bodies, ctl, region_id),
        },
    }
}

pub(crate) fn deep_construct<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    node: NodeId,
) {
    match tree.node(node) {
        Node::Leaf(state) => leaf_construct(bodies, ctl, state),
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::construct(tree, bodies, ctl, region_id),
            RegionKind::Orthogonal => orthogonal::construct(tree, bodies, ctl, region_id),
        },
    }
}

pub(crate) fn deep_enter<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    node: NodeId,
) {
    match tree.node(node) {
        Node::Leaf(state) => leaf_enter(bodies, ctl, state),
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::enter(tree, bodies, ctl, region_id),
            RegionKind::Orthogonal => orthogonal::enter(tree, bodies, ctl, region_id),
        },
    }
}

pub(crate) fn deep_reenter<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    node: NodeId,
) {
    match tree.node(node) {
        Node::Leaf(state) => leaf_reenter(bodies, ctl, state),
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::reenter(tree, bodies, ctl, region_id),
            RegionKind::Orthogonal => orthogonal::reenter(tree, bodies, ctl, region_id),
        },
    }
}

pub(crate) fn deep_exit<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    node: NodeId,
) {
    match tree.node(node) {
        Node::Leaf(state) => leaf_exit(bodies, ctl, state),
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::exit(tree, bodies, ctl, region_id),
            RegionKind::Orthogonal => orthogonal::exit(tree, bodies, ctl, region_id),
        },
    }
}

pub(crate) fn deep_destruct<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    node: NodeId,
) {
    match tree.node(node) {
        Node::Leaf(state) => leaf_destruct(bodies, ctl, state),
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::destruct(tree, bodies, ctl, region_id),
            RegionKind::Orthogonal => orthogonal::destruct(tree, bodies, ctl, region_id),
        },
    }
}

pub(crate) fn deep_update<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut FullControl<'_, C>,
    node: NodeId,
) -> Status {
    match tree.node(node) {
        Node::Leaf(state) => leaf_update(bodies, ctl, state),
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::update(tree, bodies, ctl, region_id),
            RegionKind::Orthogonal => orthogonal::update(tree, bodies, ctl, region_id),
        },
    }
}

pub(crate) fn deep_react<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut FullControl<'_, C>,
    event: &C::Event,
    node: NodeId,
) -> Status {
    match tree.node(node) {
        Node::Leaf(state) => leaf_react(bodies, ctl, event, state),
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::react(tree, bodies, ctl, event, region_id),
            RegionKind::Orthogonal => orthogonal::react(tree, bodies, ctl, event, region_id),
        },
    }
}

/// Marks the requested prong of every region in the subtree per the
/// request kind.
pub(crate) fn deep_request<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    node: NodeId,
    kind: RequestKind,
) {
    match tree.node(node) {
        Node::Leaf(_) => {}
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::request(tree, bodies, ctl, region_id, kind),
            RegionKind::Orthogonal => orthogonal::request(tree, bodies, ctl, region_id, kind),
        },
    }
}

/// Commits pending requests: exits, constructs, enters, and re-enters per
/// each composite region's requested/remains marks.
pub(crate) fn deep_change_to_requested<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    node: NodeId,
) {
    match tree.node(node) {
        Node::Leaf(_) => {}
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::change_to_requested(tree, bodies, ctl, region_id),
            RegionKind::Orthogonal => orthogonal::change_to_requested(tree, bodies, ctl, region_id),
        },
    }
}

/// Fills the requested prong of regions about to be entered fresh on the
/// newly requested path (orthogonal siblings of a deep target, most
/// notably). Regions already marked forward the walk; active unmarked
/// regions are traversed; inactive unmarked regions select by their own
/// strategy.
pub(crate) fn deep_forward_fill<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    node: NodeId,
) {
    match tree.node(node) {
        Node::Leaf(_) => {}
        Node::Region(region_id) => {
            let region = tree.region(region_id);
            match region.kind {
                RegionKind::Composite => {
                    let compo = composite::compo_index(region);
                    let requested = ctl.registry.compo_requested[compo];
                    let active = ctl.registry.compo_active[compo];
                    if requested.is_valid() {
                        let child = region.children[requested.index()];
                        deep_forward_fill(tree, bodies, ctl, child);
                    } else if active.is_valid() {
                        let child = region.children[active.index()];
                        deep_forward_fill(tree, bodies, ctl, child);
                    } else {
                        composite::request(tree, bodies, ctl, region_id, RequestKind::Change);
                    }
                }
                RegionKind::Orthogonal => {
                    for &child in &region.children {
                        deep_forward_fill(tree, bodies, ctl, child);
                    }
                }
            }
        }
    }
}

// ============================================================================
// Reports (utility / rank resolution)
// ============================================================================

/// Reports the utility of the configuration the subtree would enter,
/// marking each region's requested prong along the way.
pub(crate) fn deep_report<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    node: NodeId,
    mode: ReportMode,
) -> Utility {
    match tree.node(node) {
        Node::Leaf(state) => leaf_utility(bodies, ctl, state),
        Node::Region(region_id) => match tree.region(region_id).kind {
            RegionKind::Composite => composite::report(tree, bodies, ctl, region_id, mode),
            RegionKind::Orthogonal => orthogonal::report(tree, bodies, ctl, region_id, mode),
        },
    }
}

/// The rank a subtree competes with: a leaf's own rank, a region's head
/// rank.
pub(crate) fn deep_report_rank<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    node: NodeId,
) -> Rank {
    match tree.node(node) {
        Node::Leaf(state) => leaf_rank(bodies, ctl, state),
        Node::Region(region_id) => {
            let head = tree.region(region_id).head;
            leaf_rank(bodies, ctl, head)
        }
    }
}

// ============================================================================
// Plan executor
// ============================================================================

/// Advances a region's plan from the sub-status of its active children.
///
/// Failure clears the plan and notifies the head. Success consumes the
/// leading run of tasks whose origins are active and marked successful,
/// requesting each destination with the task's transition type; an
/// emptied plan notifies the head and reports success upward.
pub(crate) fn update_plan<C: Config>(
    bodies: &mut BodyArena<C>,
    ctl: &mut FullControl<'_, C>,
    region: &RegionInfo,
    sub_status: Status,
) -> Status {
    debug_assert!(sub_status.result != StatusResult::None);
    debug_assert!(!sub_status.outer_transition);

    // A locked control means an ancestor is already transitioning away;
    // consuming tasks now would lose them if the region survives.
    if ctl.locked {
        return Status::default();
    }

    match sub_status.result {
        StatusResult::Failure => {
            ctl.plan_data.clear_region(region.id);
            ctl.log_plan_status(region.id, StatusEvent::Failed);
            leaf_plan_failed(bodies, ctl, region.head);
            Status {
                result: StatusResult::Failure,
                outer_transition: false,
            }
        }
        StatusResult::Success => {
            let region_id = region.id;
            let mut index = ctl.plan_data.first_task(region_id);
            while index != INVALID_TASK {
                let task = ctl.plan_data.task(index);
                if !ctl.registry.is_active(task.origin) || !ctl.plan_data.succeeded(task.origin) {
                    break;
                }
                let method = ctl.method;
                with_origin(ctl, task.origin, method, |ctl| {
                    ctl.change_with(task.transition_type, task.destination);
                });
                let next = ctl.plan_data.next_task(index);
                ctl.plan_data.remove(region_id, index);
                index = next;
            }

            if ctl.plan_data.plan_exists(region_id) {
                Status::default()
            } else {
                ctl.log_plan_status(region_id, StatusEvent::Succeeded);
                leaf_plan_succeeded(bodies, ctl, region.head);
                Status {
                    result: StatusResult::Success,
                    outer_transition: false,
                }
            }
        }
        StatusResult::None => unreachable!("plan executor requires a notable sub-status"),
    }
}
