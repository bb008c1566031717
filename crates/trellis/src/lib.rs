//! # trellis: Deterministic hierarchical state machines
//!
//! An application describes a hierarchical finite state machine as a
//! static tree of regions and states, then executes it deterministically
//! each tick. A region groups child states under a selection strategy:
//!
//! - **Composite**: always pick the first child on entry
//! - **Resumable**: pick the previously active child if any
//! - **Utilitarian**: pick the child reporting the highest utility
//! - **RandomUtil**: weighted random over the highest-ranked children
//! - **Orthogonal**: all children active in parallel
//!
//! ## Key principles
//!
//! - **Fixed trees**: the hierarchy is validated once at construction and
//!   never changes
//! - **Deterministic ticks**: all hooks run synchronously inside
//!   `update`/`react`; no threads, no suspension points
//! - **Bounded work**: request queue, plan store, and transition history
//!   are sized at build time; substitution rounds are capped
//! - **Explicit rollback**: guard cancellation restores a registry
//!   snapshot, never a partial mutation
//!
//! ## Architecture
//!
//! - `tree`: definition values, validation, dense id assignment
//! - `registry`: per-region fork state and the request walk
//! - `plan`: per-region transition plans advanced by task success
//! - `control`: the four hook contexts
//! - `dispatch`: depth-first propagation over regions and states
//! - `machine`: the root engine — ticking, transition resolution,
//!   serialization, history replay
//!
//! ## Example
//!
//! ```
//! use trellis::prelude::*;
//!
//! #[derive(Default)]
//! struct Root;
//! #[derive(Default)]
//! struct Off;
//! #[derive(Default)]
//! struct On;
//!
//! struct Toggle;
//!
//! type Cfg = BasicConfig<(), Toggle>;
//!
//! impl StateBody<Cfg> for Root {}
//! impl StateBody<Cfg> for On {}
//!
//! impl StateBody<Cfg> for Off {
//!     fn react(&mut self, _event: &Toggle, ctl: &mut FullControl<'_, Cfg>) {
//!         let on = ctl.state_id::<On>();
//!         ctl.change_to(on);
//!     }
//! }
//!
//! let def = RegionDef::<Cfg>::composite::<Root>(Strategy::Composite)
//!     .leaf::<Off>()
//!     .leaf::<On>();
//! let mut machine = Machine::new(def, (), DefaultRng::seeded(7)).unwrap();
//!
//! assert!(machine.is_active_t::<Off>());
//! machine.react(&Toggle);
//! assert!(machine.is_active_t::<On>());
//! ```

mod bits;
mod config;
mod control;
mod dispatch;
mod logger;
mod machine;
mod plan;
mod random;
mod registry;
mod state;
mod structure;
mod tree;


pub use config::{BasicConfig, Config};
pub use control::{Control, FullControl, GuardControl, PlanControl};
pub use logger::Logger;
pub use machine::Machine;
pub use plan::Task;
pub use random::{DefaultRng, UtilityRng};
pub use state::StateBody;
pub use structure::StructureEntry;
pub use tree::{BuildError, RegionDef, StateDef};

// Re-export the shared types and the wire buffer so downstream code only
// needs this crate.
pub use trellis_types::{
    ForkId, Method, Prong, Rank, RegionId, RegionKind, StateId, StatusEvent, Strategy,
    TransitionRecord, TransitionType, Utility,
};
pub use trellis_wire::{SerialBuffer, WireError};

/// Everything a state machine definition usually needs.
pub mod prelude {
    pub use crate::{
        BasicConfig, Config, Control, DefaultRng, FullControl, GuardControl, Logger, Machine,
        Method, PlanControl, Rank, RegionDef, RegionId, SerialBuffer, StateBody, StateId,
        StatusEvent, Strategy, TransitionRecord, TransitionType, Utility, UtilityRng,
    };
}
