//! Orthogonal region dispatch: every child active, statuses combined,
//! forwarding masked by the per-prong request bits.

use trellis_types::{Prong, RegionId, Utility};

use crate::config::Config;
use crate::control::{
    FullControl, GuardControl, PlanControl, RegionScope, Status, StatusResult, with_lock,
    with_region,
};
use crate::state::BodyArena;
use crate::tree::{RegionInfo, RegionSlot, Tree};

use super::{ReportMode, RequestKind};

pub(crate) fn ortho_index(region: &RegionInfo) -> usize {
    match region.slot {
        RegionSlot::Ortho(index) => index,
        RegionSlot::Compo(_) => unreachable!("orthogonal dispatch on a composite region"),
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
    with_region(ctl, RegionScope::of(region), |ctl| {
        super::leaf_entry_guard(bodies, ctl, region.head);
        if ctl.cancelled {
            return;
        }
        for &child in &region.children {
            super::deep_entry_guard(tree, bodies, ctl, child);
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
    let ortho = ortho_index(region);
    if !ctl.registry.ortho_any_requested(ortho) {
        return;
    }
    with_region(ctl, RegionScope::of(region), |ctl| {
        // A prong without its request bit set has nothing pending; it is
        // treated as remaining and skipped.
        for (index, &child) in region.children.iter().enumerate() {
            if ctl.registry.ortho_requested(ortho, Prong::new(index as u8)) {
                super::deep_forward_entry_guard(tree, bodies, ctl, child);
            }
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
    with_region(ctl, RegionScope::of(region), |ctl| {
        super::leaf_exit_guard(bodies, ctl, region.head);
        if ctl.cancelled {
            return;
        }
        for &child in &region.children {
            super::deep_exit_guard(tree, bodies, ctl, child);
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
    let ortho = ortho_index(region);
    if !ctl.registry.ortho_any_requested(ortho) {
        return;
    }
    with_region(ctl, RegionScope::of(region), |ctl| {
        for (index, &child) in region.children.iter().enumerate() {
            if ctl.registry.ortho_requested(ortho, Prong::new(index as u8)) {
                super::deep_forward_exit_guard(tree, bodies, ctl, child);
            }
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
    with_region(ctl, RegionScope::of(region), |ctl| {
        super::leaf_construct(bodies, ctl, region.head);
        for &child in &region.children {
            super::deep_construct(tree, bodies, ctl, child);
        }
    });
}

pub(super) fn enter<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region_id: RegionId,
) {
    let region = tree.region(region_id);
    with_region(ctl, RegionScope::of(region), |ctl| {
        super::leaf_enter(bodies, ctl, region.head);
        for &child in &region.children {
            super::deep_enter(tree, bodies, ctl, child);
        }
    });
}

pub(super) fn reenter<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region_id: RegionId,
) {
    let region = tree.region(region_id);
    with_region(ctl, RegionScope::of(region), |ctl| {
        super::leaf_reenter(bodies, ctl, region.head);
        for &child in &region.children {
            super::deep_reenter(tree, bodies, ctl, child);
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
    with_region(ctl, RegionScope::of(region), |ctl| {
        for &child in &region.children {
            super::deep_exit(tree, bodies, ctl, child);
        }
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
    with_region(ctl, RegionScope::of(region), |ctl| {
        for &child in &region.children {
            super::deep_destruct(tree, bodies, ctl, child);
        }
        super::leaf_destruct(bodies, ctl, region.head);
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
    with_region(ctl, RegionScope::of(region), |ctl| {
        let head_status = super::leaf_update(bodies, ctl, region.head);
        if head_status.notable() {
            with_lock(ctl, |ctl| {
                for &child in &region.children {
                    let _ = super::deep_update(tree, bodies, ctl, child);
                }
            });
            return head_status;
        }

        let mut sub_status = Status::default();
        for &child in &region.children {
            sub_status = sub_status.combine(super::deep_update(tree, bodies, ctl, child));
        }
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
    with_region(ctl, RegionScope::of(region), |ctl| {
        let head_status = super::leaf_react(bodies, ctl, event, region.head);
        if head_status.notable() {
            with_lock(ctl, |ctl| {
                for &child in &region.children {
                    let _ = super::deep_react(tree, bodies, ctl, event, child);
                }
            });
            return head_status;
        }

        let mut sub_status = Status::default();
        for &child in &region.children {
            sub_status = sub_status.combine(super::deep_react(tree, bodies, ctl, event, child));
        }
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
// Requests, reports, commit
// ============================================================================

pub(super) fn request<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region_id: RegionId,
    kind: RequestKind,
) {
    let region = tree.region(region_id);
    for &child in &region.children {
        super::deep_request(tree, bodies, ctl, child, kind);
    }
}

/// Orthogonal utility: the head's utility times the mean over children.
pub(super) fn report<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region_id: RegionId,
    mode: ReportMode,
) -> Utility {
    let region = tree.region(region_id);
    let mut sum = Utility::ZERO;
    for &child in &region.children {
        sum = sum + super::deep_report(tree, bodies, ctl, child, mode);
    }
    let mean = sum / region.width() as f32;
    let head_utility = super::leaf_utility(bodies, ctl, region.head);
    head_utility * mean
}

pub(super) fn change_to_requested<C: Config>(
    tree: &Tree,
    bodies: &mut BodyArena<C>,
    ctl: &mut PlanControl<'_, C>,
    region_id: RegionId,
) {
    let region = tree.region(region_id);
    for &child in &region.children {
        super::deep_change_to_requested(tree, bodies, ctl, child);
    }
}
