//! # trellis-types: Core types for `trellis`
//!
//! This crate contains shared types used across the `trellis` workspace:
//! - Identity types ([`StateId`], [`RegionId`], [`Prong`], [`ForkId`])
//! - Selection signals ([`Rank`], [`Utility`])
//! - Lifecycle and transition enums ([`Method`], [`TransitionType`],
//!   [`StatusEvent`], [`Strategy`], [`RegionKind`])
//! - Replay records ([`TransitionRecord`])
//!
//! Identity types are dense indices assigned by a depth-first numbering of
//! the state tree, so they are cheap `Copy` values and stable for the
//! lifetime of a machine.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

// ============================================================================
// Identity - All Copy (cheap 1-2 byte values)
// ============================================================================

/// Unique identifier for a state, assigned depth-first over the tree.
///
/// The apex region's head state is always id 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct StateId(u16);

impl StateId {
    /// Sentinel for "no state".
    pub const INVALID: StateId = StateId(u16::MAX);

    /// The apex region's head state.
    pub const APEX: StateId = StateId(0);

    pub fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the dense index for array addressing.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "s{}", self.0)
        } else {
            write!(f, "s-")
        }
    }
}

impl From<u16> for StateId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<StateId> for u16 {
    fn from(id: StateId) -> Self {
        id.0
    }
}

/// Unique identifier for a region, assigned depth-first over the tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RegionId(u8);

impl RegionId {
    /// Sentinel for "no region".
    pub const INVALID: RegionId = RegionId(u8::MAX);

    pub fn new(id: u8) -> Self {
        Self(id)
    }

    /// Returns the dense index for array addressing.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "r{}", self.0)
        } else {
            write!(f, "r-")
        }
    }
}

impl From<u8> for RegionId {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<RegionId> for u8 {
    fn from(id: RegionId) -> Self {
        id.0
    }
}

/// A child slot within a region (0-indexed).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Prong(u8);

impl Prong {
    /// Sentinel for "no prong selected".
    pub const INVALID: Prong = Prong(u8::MAX);

    pub fn new(prong: u8) -> Self {
        Self(prong)
    }

    /// Returns the dense index for array addressing.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Display for Prong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "p{}", self.0)
        } else {
            write!(f, "p-")
        }
    }
}

impl From<u8> for Prong {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// The choice point at a region.
///
/// Positive values name a composite region (`index + 1`), negative values an
/// orthogonal region (`-index - 1`). Zero is the "no fork" sentinel, so the
/// parent chain of the apex head terminates naturally.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ForkId(i8);

impl ForkId {
    /// Sentinel for "no fork" (the apex has no parent).
    pub const NONE: ForkId = ForkId(0);

    /// Fork naming the composite region with the given dense index.
    pub fn composite(index: usize) -> Self {
        Self(i8::try_from(index + 1).expect("composite index fits fork id"))
    }

    /// Fork naming the orthogonal region with the given dense index.
    pub fn orthogonal(index: usize) -> Self {
        Self(-i8::try_from(index + 1).expect("orthogonal index fits fork id"))
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn is_composite(self) -> bool {
        self.0 > 0
    }

    pub fn is_orthogonal(self) -> bool {
        self.0 < 0
    }

    /// Dense composite index; only meaningful when [`Self::is_composite`].
    pub fn compo_index(self) -> usize {
        debug_assert!(self.is_composite());
        (self.0 - 1) as usize
    }

    /// Dense orthogonal index; only meaningful when [`Self::is_orthogonal`].
    pub fn ortho_index(self) -> usize {
        debug_assert!(self.is_orthogonal());
        (-self.0 - 1) as usize
    }
}

impl Display for ForkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_composite() {
            write!(f, "c{}", self.compo_index())
        } else if self.is_orthogonal() {
            write!(f, "o{}", self.ortho_index())
        } else {
            write!(f, "f-")
        }
    }
}

// ============================================================================
// Selection Signals
// ============================================================================

/// A state's rank for `RandomUtil` selection. Higher ranks form the top
/// tier; only top-tier prongs participate in weighted sampling.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Rank(i8);

impl Rank {
    pub const MIN: Rank = Rank(i8::MIN);

    pub fn new(rank: i8) -> Self {
        Self(rank)
    }

    pub fn value(self) -> i8 {
        self.0
    }
}

impl Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i8> for Rank {
    fn from(value: i8) -> Self {
        Self(value)
    }
}

/// A state's utility for `Utilitarian` and `RandomUtil` selection.
///
/// Utilities multiply along the tree: a composite subtree reports its
/// head's utility times the winning child's, an orthogonal region its
/// head's times the average of its children's.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Utility(f32);

impl Utility {
    pub const ZERO: Utility = Utility(0.0);
    pub const ONE: Utility = Utility(1.0);

    pub fn new(utility: f32) -> Self {
        Self(utility)
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for Utility {
    fn default() -> Self {
        Self::ONE
    }
}

impl Display for Utility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<f32> for Utility {
    fn from(value: f32) -> Self {
        Self(value)
    }
}

impl std::ops::Mul for Utility {
    type Output = Utility;

    fn mul(self, rhs: Utility) -> Utility {
        Utility(self.0 * rhs.0)
    }
}

impl std::ops::Add for Utility {
    type Output = Utility;

    fn add(self, rhs: Utility) -> Utility {
        Utility(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Utility {
    type Output = Utility;

    fn sub(self, rhs: Utility) -> Utility {
        Utility(self.0 - rhs.0)
    }
}

impl std::ops::Div<f32> for Utility {
    type Output = Utility;

    fn div(self, rhs: f32) -> Utility {
        Utility(self.0 / rhs)
    }
}

// ============================================================================
// Lifecycle & Transition Enums
// ============================================================================

/// The lifecycle hook a logger event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Rank,
    Utility,
    EntryGuard,
    Construct,
    Enter,
    Reenter,
    Update,
    React,
    ExitGuard,
    Exit,
    Destruct,
    PlanSucceeded,
    PlanFailed,
}

impl Method {
    /// Stable lowercase name, for logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            Method::Rank => "rank",
            Method::Utility => "utility",
            Method::EntryGuard => "entry_guard",
            Method::Construct => "construct",
            Method::Enter => "enter",
            Method::Reenter => "reenter",
            Method::Update => "update",
            Method::React => "react",
            Method::ExitGuard => "exit_guard",
            Method::Exit => "exit",
            Method::Destruct => "destruct",
            Method::PlanSucceeded => "plan_succeeded",
            Method::PlanFailed => "plan_failed",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The kind of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionType {
    Change,
    Restart,
    Resume,
    Utilize,
    Randomize,
    Schedule,
}

impl TransitionType {
    /// Stable lowercase name, for logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            TransitionType::Change => "change",
            TransitionType::Restart => "restart",
            TransitionType::Resume => "resume",
            TransitionType::Utilize => "utilize",
            TransitionType::Randomize => "randomize",
            TransitionType::Schedule => "schedule",
        }
    }
}

impl Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Task and plan completion events reported to the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusEvent {
    Succeeded,
    Failed,
}

/// How a composite region selects a child on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Strategy {
    /// Always pick the first child.
    #[default]
    Composite,
    /// Pick the previously active child if any, else the first.
    Resumable,
    /// Pick the child reporting the highest utility (ties to lowest index).
    Utilitarian,
    /// Weighted random over the children at the highest reported rank.
    RandomUtil,
}

/// Whether a region activates one child or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionKind {
    Composite,
    Orthogonal,
}

// ============================================================================
// Replay Records
// ============================================================================

/// One committed transition, as recorded by the transition history.
///
/// A sequence of these records, fed back through replay, reproduces the
/// active and resumable vectors of the run that recorded them without
/// re-running guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Target state of the request.
    pub state_id: StateId,
    /// Hook the request was raised from.
    pub method: Method,
    /// Kind of the request.
    pub transition_type: TransitionType,
}

impl TransitionRecord {
    pub fn new(state_id: StateId, method: Method, transition_type: TransitionType) -> Self {
        Self {
            state_id,
            method,
            transition_type,
        }
    }
}
