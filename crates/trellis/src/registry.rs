//! The registry: per-region fork state and the request walk.
//!
//! For every composite region the registry tracks three prongs — the
//! currently active child, the child a pending transition requested, and
//! the last active child (resumable) — plus a `remains` bit marking that a
//! request reached the region without changing its active child.
//! Orthogonal regions get one requested bit per prong, laid out in a
//! single bit array via precomputed `{unit, width}` entries.
//!
//! A state is active iff every composite ancestor's active prong names the
//! path to it. Transition application mutates only the requested side; the
//! commit in `change_to_requested` rotates requested into active.
//!
//! Guard rollback is an explicit [`Registry::snapshot`] /
//! [`Registry::restore`] pair over the mutable half of the registry.

use serde::{Deserialize, Serialize};
use trellis_types::{ForkId, Prong, StateId};

use crate::bits::BitArray;

/// Link from a state (or region) to the fork above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Parent {
    pub fork: ForkId,
    pub prong: Prong,
}

impl Parent {
    pub const NONE: Parent = Parent {
        fork: ForkId::NONE,
        prong: Prong::INVALID,
    };

    pub fn new(fork: ForkId, prong: Prong) -> Self {
        Self { fork, prong }
    }
}

/// Bit-array placement of one orthogonal region's requested prongs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OrthoUnit {
    pub offset: usize,
    pub width: usize,
}

/// The mutable half of the registry, cloned for guard rollback.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RegistrySnapshot {
    compo_active: Vec<Prong>,
    compo_requested: Vec<Prong>,
    compo_resumable: Vec<Prong>,
    compo_remains: BitArray,
    ortho_requested: BitArray,
}

#[derive(Debug)]
pub(crate) struct Registry {
    state_parents: Vec<Parent>,
    compo_parents: Vec<Parent>,
    ortho_parents: Vec<Parent>,
    ortho_units: Vec<OrthoUnit>,

    pub(crate) compo_active: Vec<Prong>,
    pub(crate) compo_requested: Vec<Prong>,
    pub(crate) compo_resumable: Vec<Prong>,
    pub(crate) compo_remains: BitArray,
    ortho_requested: BitArray,
}

impl Registry {
    pub fn new(
        state_parents: Vec<Parent>,
        compo_parents: Vec<Parent>,
        ortho_parents: Vec<Parent>,
        ortho_widths: &[usize],
    ) -> Self {
        let compo_count = compo_parents.len();

        let mut ortho_units = Vec::with_capacity(ortho_widths.len());
        let mut offset = 0;
        for &width in ortho_widths {
            ortho_units.push(OrthoUnit { offset, width });
            offset += width;
        }

        Self {
            state_parents,
            compo_parents,
            ortho_parents,
            ortho_units,
            compo_active: vec![Prong::INVALID; compo_count],
            compo_requested: vec![Prong::INVALID; compo_count],
            compo_resumable: vec![Prong::INVALID; compo_count],
            compo_remains: BitArray::new(compo_count),
            ortho_requested: BitArray::new(offset),
        }
    }

    pub fn compo_count(&self) -> usize {
        self.compo_parents.len()
    }

    pub fn state_parent(&self, state: StateId) -> Parent {
        self.state_parents[state.index()]
    }

    pub fn ortho_parent(&self, ortho: usize) -> Parent {
        self.ortho_parents[ortho]
    }

    /// Parent link of the region named by `fork`.
    fn fork_parent(&self, fork: ForkId) -> Parent {
        if fork.is_composite() {
            self.compo_parents[fork.compo_index()]
        } else {
            self.ortho_parents[fork.ortho_index()]
        }
    }

    // ------------------------------------------------------------------
    // Activation queries
    // ------------------------------------------------------------------

    /// A state is active iff every composite ancestor's active prong names
    /// the path to it. Orthogonal ancestors are active with their parent.
    pub fn is_active(&self, state: StateId) -> bool {
        let mut parent = self.state_parent(state);
        while !parent.fork.is_none() {
            if parent.fork.is_composite() {
                let compo = parent.fork.compo_index();
                if self.compo_active[compo] != parent.prong {
                    return false;
                }
            }
            parent = self.fork_parent(parent.fork);
        }
        true
    }

    /// A state is resumable iff its nearest composite ancestor remembers
    /// it as the last active child.
    pub fn is_resumable(&self, state: StateId) -> bool {
        let mut parent = self.state_parent(state);
        while !parent.fork.is_none() {
            if parent.fork.is_composite() {
                let compo = parent.fork.compo_index();
                return self.compo_resumable[compo] == parent.prong;
            }
            parent = self.fork_parent(parent.fork);
        }
        false
    }

    /// Whether the state will be active once the pending requests commit.
    pub fn will_be_active(&self, state: StateId) -> bool {
        let mut parent = self.state_parent(state);
        while !parent.fork.is_none() {
            if parent.fork.is_composite() {
                let compo = parent.fork.compo_index();
                let effective = if self.compo_requested[compo].is_valid() {
                    self.compo_requested[compo]
                } else {
                    self.compo_active[compo]
                };
                if effective != parent.prong {
                    return false;
                }
            }
            parent = self.fork_parent(parent.fork);
        }
        true
    }

    // ------------------------------------------------------------------
    // Request application
    // ------------------------------------------------------------------

    /// The ancestor walk of a change-class request targeting a state whose
    /// activation should switch (or restart in place).
    ///
    /// The first composite ancestor gets `requested = prong`
    /// unconditionally. Ancestors above get `remains` set, and `requested`
    /// too while the walk is still switching branches; once an ancestor is
    /// already on the active path only `remains` propagates further up.
    /// Orthogonal ancestors get their prong bit set throughout.
    pub fn walk_change(&mut self, start: Parent) {
        let mut parent = start;
        let mut first = true;
        let mut switching = true;
        while !parent.fork.is_none() {
            if parent.fork.is_composite() {
                let compo = parent.fork.compo_index();
                if first {
                    self.compo_requested[compo] = parent.prong;
                    first = false;
                } else {
                    self.compo_remains.set(compo);
                    if switching {
                        if self.compo_active[compo] == parent.prong {
                            switching = false;
                        } else {
                            self.compo_requested[compo] = parent.prong;
                        }
                    }
                }
            } else {
                self.set_ortho_requested(parent.fork.ortho_index(), parent.prong);
            }
            parent = self.fork_parent(parent.fork);
        }
    }

    /// The ancestor walk of a change targeting an already-active region:
    /// nothing switches, so only `remains` (and orthogonal bits) propagate.
    pub fn walk_remains(&mut self, start: Parent) {
        let mut parent = start;
        while !parent.fork.is_none() {
            if parent.fork.is_composite() {
                self.compo_remains.set(parent.fork.compo_index());
            } else {
                self.set_ortho_requested(parent.fork.ortho_index(), parent.prong);
            }
            parent = self.fork_parent(parent.fork);
        }
    }

    /// Marks a composite region for the reenter chain: the requested child
    /// is the active child and `remains` is set, so the commit re-enters
    /// instead of replacing.
    pub fn mark_reenter(&mut self, compo: usize) {
        debug_assert!(self.compo_active[compo].is_valid());
        self.compo_requested[compo] = self.compo_active[compo];
        self.compo_remains.set(compo);
    }

    /// A `Schedule` request: remember the target as its parent composite's
    /// resumable child without entering it. Scheduling the already-active
    /// child is a no-op; active and resumable never alias.
    pub fn request_scheduled(&mut self, state: StateId) {
        let mut parent = self.state_parent(state);
        while !parent.fork.is_none() {
            if parent.fork.is_composite() {
                let compo = parent.fork.compo_index();
                if self.compo_active[compo] != parent.prong {
                    self.compo_resumable[compo] = parent.prong;
                }
                return;
            }
            parent = self.fork_parent(parent.fork);
        }
    }

    // ------------------------------------------------------------------
    // Orthogonal requested bits
    // ------------------------------------------------------------------

    pub fn set_ortho_requested(&mut self, ortho: usize, prong: Prong) {
        let unit = self.ortho_units[ortho];
        debug_assert!(prong.index() < unit.width);
        self.ortho_requested.set(unit.offset + prong.index());
    }

    pub fn ortho_requested(&self, ortho: usize, prong: Prong) -> bool {
        let unit = self.ortho_units[ortho];
        debug_assert!(prong.index() < unit.width);
        self.ortho_requested.get(unit.offset + prong.index())
    }

    /// Whether any prong of the orthogonal region has a pending request.
    pub fn ortho_any_requested(&self, ortho: usize) -> bool {
        let unit = self.ortho_units[ortho];
        (0..unit.width).any(|prong| self.ortho_requested.get(unit.offset + prong))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Clears the request side after a commit: requested prongs, remains
    /// bits, and orthogonal bits. Active and resumable survive.
    pub fn clear_requests(&mut self) {
        self.compo_requested.fill(Prong::INVALID);
        self.compo_remains.clear_all();
        self.ortho_requested.clear_all();
    }

    /// Full reset for `Machine::reset` and `load`.
    pub fn reset(&mut self) {
        self.compo_active.fill(Prong::INVALID);
        self.compo_resumable.fill(Prong::INVALID);
        self.clear_requests();
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            compo_active: self.compo_active.clone(),
            compo_requested: self.compo_requested.clone(),
            compo_resumable: self.compo_resumable.clone(),
            compo_remains: self.compo_remains.clone(),
            ortho_requested: self.ortho_requested.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: &RegistrySnapshot) {
        self.compo_active.clone_from(&snapshot.compo_active);
        self.compo_requested.clone_from(&snapshot.compo_requested);
        self.compo_resumable.clone_from(&snapshot.compo_resumable);
        self.compo_remains.clone_from(&snapshot.compo_remains);
        self.ortho_requested.clone_from(&snapshot.ortho_requested);
    }
}
