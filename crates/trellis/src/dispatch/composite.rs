//! Composite region dispatch: one active child, five selection
//! strategies, and the requested/remains commit branches.

use trellis_types::{Prong, RegionId, Strategy, Utility};

use crate::config::Config;
use crate::control::{
    FullControl, GuardControl, PlanControl, RegionScope, Status, StatusResult, with_lock,
    with_region,
};
use crate::random::resolve_random;
use crate::state::BodyArena;
use crate::tree::{RegionInfo, RegionSlot, Tree};

use super::{ReportMode, RequestKind};

pub(crate) fn compo_index(region: &RegionInfo) -> usize {
    match region.slot {
        RegionSlot::Compo(index) => index,
        RegionSlot::Ortho(_) => unreachable!("composite dispatch on an orthogonal region"),
    }
}

fn resumable_or_first<C: Config>(ctl: &PlanControl<'_, C>, compo: usize) -> Prong {
    let resumable = ctl.registry.compo_resumable[compo];
    if resumable.is_valid() {
        resumable
    } else {
        Prong::new(0)
    }
}

// ============================================================================
// Guards
// ============================================================================

pub(super) fn entry_guard<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut GuardControl<'_, C>,
    region_id: RegionId,
) {
    let region = tree.region(region_id);
    let compo = compo_index(region);
    with_region(ctl, RegionScope::of(region), |ctl| {
        super::leaf_entry_guard(bodies, ctl, region.head);
        if ctl.cancelled {
            return;
        }
        let requested = ctl.registry.compo_requested[compo];
        let target = if requested.is_valid() {
            requested
        } else {
            ctl.registry.compo_active[compo]
        };
        if target.is_valid() {
            super::deep_entry_guard(tree, bodies, ctl, region.children[target.index()]);
        }
    });
}

pub(super) fn forward_entry_guard<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut GuardControl<'_, C>,
    region_id: RegionId,
) {
    let region = tree.region(region_id);
    let compo = compo_index(region);
    with_region(ctl, RegionScope::of(region), |ctl| {
        let requested = ctl.registry.compo_requested[compo];
        let active = ctl.registry.compo_active[compo];
        if requested.is_valid() {
            super::deep_entry_guard(tree, bodies, ctl, region.children[requested.index()]);
        } else if active.is_valid() {
            super::deep_forward_entry_guard(tree, bodies, ctl, region.children[active.index()]);
        }
    });
}

pub(super) fn exit_guard<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut GuardControl<'_, C>,
    region_id: RegionId,
) {
    let region = tree.region(region_id);
    let compo = compo_index(region);
    with_region(ctl, RegionScope::of(region), |ctl| {
        super::leaf_exit_guard(bodies, ctl, region.head);
        if ctl.cancelled {
            return;
        }
        let active = ctl.registry.compo_active[compo];
        if active.is_valid() {
            super::deep_exit_guard(tree, bodies, ctl, region.children[active.index()]);
        }
    });
}

pub(super) fn forward_exit_guard<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut GuardControl<'_, C>,
    region_id: RegionId,
) {
    let region = tree.region(region_id);
    let compo = compo_index(region);
    with_region(ctl, RegionScope::of(region), |ctl| {
        let requested = ctl.registry.compo_requested[compo];
        let active = ctl.registry.compo_active[compo];
        if !active.is_valid() {
            return;
        }
        if requested.is_valid() {
            super::deep_exit_guard(tree, bodies, ctl, region.children[active.index()]);
        } else {
            super::deep_forward_exit_guard(tree, bodies, ctl, region.children[active.index()]);
        }
    });
}

// ============================================================================
// Construction lifecycle
// ============================================================================

pub(super) fn construct<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region_id: RegionId,
) {
    let region = tree.region(region_id);
    let compo = compo_index(region);
    with_region(ctl, RegionScope::of(region), |ctl| {
        // A region reconstructed without an explicit mark (a sibling
        // prong caught in a wider restart, say) selects by its own
        // strategy.
        if !ctl.registry.compo_requested[compo].is_valid() {
            request(tree, bodies, ctl, region_id, RequestKind::Change);
        }
        let requested = ctl.registry.compo_requested[compo];
        debug_assert!(requested.is_valid());
        ctl.registry.compo_active[compo] = requested;
        ctl.registry.compo_requested[compo] = Prong::INVALID;
        // A resume that landed on its own remembered child consumed it.
        if ctl.registry.compo_resumable[compo] == requested {
            ctl.registry.compo_resumable[compo] = Prong::INVALID;
        }

        super::leaf_construct(bodies, ctl, region.head);
        super::deep_construct(tree, bodies, ctl, region.children[requested.index()]);
    });
}

pub(super) fn enter<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region_id: RegionId,
) {
    let region = tree.region(region_id);
    let compo = compo_index(region);
    with_region(ctl, RegionScope::of(region), |ctl| {
        let active = ctl.registry.compo_active[compo];
        debug_assert!(active.is_valid());
        super::leaf_enter(bodies, ctl, region.head);
        super::deep_enter(tree, bodies, ctl, region.children[active.index()]);
    });
}

pub(super) fn reenter<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region_id: RegionId,
) {
    let region = tree.region(region_id);
    let compo = compo_index(region);
    with_region(ctl, RegionScope::of(region), |ctl| {
        super::leaf_reenter(bodies, ctl, region.head);

        let active = ctl.registry.compo_active[compo];
        let requested = ctl.registry.compo_requested[compo];
        debug_assert!(active.is_valid());
        ctl.registry.compo_requested[compo] = Prong::INVALID;

        if !requested.is_valid() || requested == active {
            super::deep_reenter(tree, bodies, ctl, region.children[active.index()]);
        } else {
            // A pending switch below a re-entering ancestor: the old child
            // leaves for real.
            super::deep_exit(tree, bodies, ctl, region.children[active.index()]);
            super::deep_destruct(tree, bodies, ctl, region.children[active.index()]);
            ctl.registry.compo_resumable[compo] = active;
            ctl.registry.compo_active[compo] = requested;
            super::deep_construct(tree, bodies, ctl, region.children[requested.index()]);
            super::deep_enter(tree, bodies, ctl, region.children[requested.index()]);
        }
    });
}

pub(super) fn exit<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region_id: RegionId,
) {
    let region = tree.region(region_id);
    let compo = compo_index(region);
    with_region(ctl, RegionScope::of(region), |ctl| {
        let active = ctl.registry.compo_active[compo];
        debug_assert!(active.is_valid());
        super::deep_exit(tree, bodies, ctl, region.children[active.index()]);
        super::leaf_exit(bodies, ctl, region.head);
    });
}

pub(super) fn destruct<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region_id: RegionId,
) {
    let region = tree.region(region_id);
    let compo = compo_index(region);
    with_region(ctl, RegionScope::of(region), |ctl| {
        let active = ctl.registry.compo_active[compo];
        debug_assert!(active.is_valid());
        super::deep_destruct(tree, bodies, ctl, region.children[active.index()]);
        super::leaf_destruct(bodies, ctl, region.head);

        ctl.registry.compo_resumable[compo] = active;
        ctl.registry.compo_active[compo] = Prong::INVALID;
        ctl.plan_data.clear_region(region_id);
    });
}

// ============================================================================
// Update / react
// ============================================================================

pub(super) fn update<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut FullControl<'_, C>,
    region_id: RegionId,
) -> Status {
    let region = tree.region(region_id);
    let compo = compo_index(region);
    let active = ctl.registry.compo_active[compo];
    debug_assert!(active.is_valid(), "update of an inactive composite region");

    with_region(ctl, RegionScope::of(region), |ctl| {
        let head_status = super::leaf_update(bodies, ctl, region.head);
        if head_status.notable() {
            with_lock(ctl, |ctl| {
                let _ = super::deep_update(tree, bodies, ctl, region.children[active.index()]);
            });
            return head_status;
        }

        let sub_status = super::deep_update(tree, bodies, ctl, region.children[active.index()]);
        if sub_status.outer_transition {
            sub_status
        } else if sub_status.result != StatusResult::None && ctl.plan_data.plan_exists(region_id) {
            super::update_plan(bodies, ctl, region, sub_status)
        } else {
            sub_status
        }
    })
}

pub(super) fn react<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut FullControl<'_, C>,
    event: &C::Event,
    region_id: RegionId,
) -> Status {
    let region = tree.region(region_id);
    let compo = compo_index(region);
    let active = ctl.registry.compo_active[compo];
    debug_assert!(active.is_valid(), "react on an inactive composite region");

    with_region(ctl, RegionScope::of(region), |ctl| {
        let head_status = super::leaf_react(bodies, ctl, event, region.head);
        if head_status.notable() {
            with_lock(ctl, |ctl| {
                let _ =
                    super::deep_react(tree, bodies, ctl, event, region.children[active.index()]);
            });
            return head_status;
        }

        let sub_status =
            super::deep_react(tree, bodies, ctl, event, region.children[active.index()]);
        if sub_status.outer_transition {
            sub_status
        } else if sub_status.result != StatusResult::None && ctl.plan_data.plan_exists(region_id) {
            super::update_plan(bodies, ctl, region, sub_status)
        } else {
            sub_status
        }
    })
}

// ============================================================================
// Requests & selection
// ============================================================================

pub(super) fn request<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region_id: RegionId,
    kind: RequestKind,
) {
    let region = tree.region(region_id);
    let compo = compo_index(region);

    match kind {
        RequestKind::Restart => {
            let chosen = Prong::new(0);
            ctl.registry.compo_requested[compo] = chosen;
            super::deep_request(tree, bodies, ctl, region.children[chosen.index()], kind);
        }
        RequestKind::Resume => {
            let chosen = resumable_or_first(ctl, compo);
            ctl.registry.compo_requested[compo] = chosen;
            super::deep_request(tree, bodies, ctl, region.children[chosen.index()], kind);
        }
        RequestKind::Utilize => {
            select_utilitarian(tree, bodies, ctl, region, compo, ReportMode::Utilize);
        }
        RequestKind::Randomize => {
            select_random(tree, bodies, ctl, region, compo, ReportMode::Randomize);
        }
        RequestKind::Change => match region.strategy {
            Strategy::Composite => {
                let chosen = Prong::new(0);
                ctl.registry.compo_requested[compo] = chosen;
                super::deep_request(tree, bodies, ctl, region.children[chosen.index()], kind);
            }
            Strategy::Resumable => {
                let chosen = resumable_or_first(ctl, compo);
                ctl.registry.compo_requested[compo] = chosen;
                super::deep_request(tree, bodies, ctl, region.children[chosen.index()], kind);
            }
            Strategy::Utilitarian => {
                select_utilitarian(tree, bodies, ctl, region, compo, ReportMode::Change);
            }
            Strategy::RandomUtil => {
                select_random(tree, bodies, ctl, region, compo, ReportMode::Change);
            }
        },
    }
}

/// Argmax over child utilities; ties resolve to the lowest index. Marks
/// the region's requested prong and returns the winner's utility.
pub(super) fn select_utilitarian<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region: &RegionInfo,
    compo: usize,
    mode: ReportMode,
) -> Utility {
    let mut best_prong = Prong::new(0);
    let mut best = Utility::ZERO;
    for (index, &child) in region.children.iter().enumerate() {
        let utility = super::deep_report(tree, bodies, ctl, child, mode);
        if index == 0 || utility.value() > best.value() {
            best_prong = Prong::new(index as u8);
            best = utility;
        }
    }

    ctl.registry.compo_requested[compo] = best_prong;
    ctl.log_utility_resolution(region.head, best_prong, best);
    best
}

/// Weighted random over the top rank tier. Marks the region's requested
/// prong and returns the sampled child's utility.
pub(super) fn select_random<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region: &RegionInfo,
    compo: usize,
    mode: ReportMode,
) -> Utility {
    let width = region.width();
    let mut ranks = Vec::with_capacity(width);
    for &child in &region.children {
        ranks.push(super::deep_report_rank(tree, bodies, ctl, child));
    }
    let top = ranks
        .iter()
        .copied()
        .max()
        .expect("regions have at least one child");

    let mut utilities = vec![Utility::ZERO; width];
    let mut sum = Utility::ZERO;
    for (index, &child) in region.children.iter().enumerate() {
        if ranks[index] == top {
            let utility = super::deep_report(tree, bodies, ctl, child, mode);
            utilities[index] = utility;
            sum = sum + utility;
        }
    }

    let chosen = resolve_random(ctl.rng, &ranks, &utilities, sum, top);

    ctl.registry.compo_requested[compo] = chosen;
    let utility = utilities[chosen.index()];
    ctl.log_random_resolution(region.head, chosen, utility);
    utility
}

/// Report pass: the utility this region's selection would produce, times
/// the head's own utility. Marks requested prongs on the way.
pub(super) fn report<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region_id: RegionId,
    mode: ReportMode,
) -> Utility {
    let region = tree.region(region_id);
    let compo = compo_index(region);

    let sub_utility = match mode {
        ReportMode::Utilize => select_utilitarian(tree, bodies, ctl, region, compo, mode),
        ReportMode::Randomize => select_random(tree, bodies, ctl, region, compo, mode),
        ReportMode::Change => match region.strategy {
            Strategy::Composite => {
                let chosen = Prong::new(0);
                ctl.registry.compo_requested[compo] = chosen;
                super::deep_report(tree, bodies, ctl, region.children[chosen.index()], mode)
            }
            Strategy::Resumable => {
                let chosen = resumable_or_first(ctl, compo);
                ctl.registry.compo_requested[compo] = chosen;
                super::deep_report(tree, bodies, ctl, region.children[chosen.index()], mode)
            }
            Strategy::Utilitarian => select_utilitarian(tree, bodies, ctl, region, compo, mode),
            Strategy::RandomUtil => select_random(tree, bodies, ctl, region, compo, mode),
        },
    };

    let head_utility = super::leaf_utility(bodies, ctl, region.head);
    head_utility * sub_utility
}

// ============================================================================
// Commit
// ============================================================================

pub(super) fn change_to_requested<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region_id: RegionId,
) {
    let region = tree.region(region_id);
    let compo = compo_index(region);
    let active = ctl.registry.compo_active[compo];
    let requested = ctl.registry.compo_requested[compo];
    debug_assert!(active.is_valid(), "commit on an inactive composite region");

    if !requested.is_valid() {
        super::deep_change_to_requested(tree, bodies, ctl, region.children[active.index()]);
    } else if requested == active && !ctl.registry.compo_remains.get(compo) {
        // Restart in place: the child leaves and comes back fresh.
        let child = region.children[active.index()];
        super::deep_exit(tree, bodies, ctl, child);
        super::deep_destruct(tree, bodies, ctl, child);
        ctl.registry.compo_requested[compo] = Prong::INVALID;
        super::deep_construct(tree, bodies, ctl, child);
        super::deep_enter(tree, bodies, ctl, child);
    } else if requested == active {
        // A request reached this region without changing its child: the
        // active branch re-enters without leaving.
        ctl.registry.compo_requested[compo] = Prong::INVALID;
        super::deep_reenter(tree, bodies, ctl, region.children[active.index()]);
    } else {
        let old_child = region.children[active.index()];
        super::deep_exit(tree, bodies, ctl, old_child);
        super::deep_destruct(tree, bodies, ctl, old_child);

        let new_child = region.children[requested.index()];
        ctl.registry.compo_active[compo] = requested;
        ctl.registry.compo_resumable[compo] = active;
        ctl.registry.compo_requested[compo] = Prong::INVALID;
        super::deep_construct(tree, bodies, ctl, new_child);
        super::deep_enter(tree, bodies, ctl, new_child);
    }
}
