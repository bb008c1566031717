//! The static state tree: definition values, validation, and the built
//! form the engine dispatches over.
//!
//! A tree is declared as nested [`RegionDef`] values and built once at
//! machine construction. Building assigns every state a dense [`StateId`]
//! in depth-first order (a region's head first, then its children), every
//! region a dense [`RegionId`], and every composite/orthogonal region a
//! fork index. A region's head shares the region's parent link, so the
//! ancestor walk from any state traverses regions all the way to the apex.
//!
//! The tree is immutable after build; all mutable machine state lives in
//! the registry and plan store.

use std::any::TypeId;
use std::collections::HashMap;

use trellis_types::{ForkId, Prong, RegionId, RegionKind, StateId, Strategy};

use crate::config::Config;
use crate::registry::Parent;
use crate::state::{BodyFactory, StateBody, StateSlot};

/// Hard ceilings from the id types: `u16` state ids, `u8` region ids and
/// prongs (each reserving a sentinel), `i8` fork ids.
const MAX_STATES: usize = u16::MAX as usize - 1;
const MAX_REGIONS: usize = u8::MAX as usize - 1;
const MAX_FORKS_PER_KIND: usize = 126;
const MAX_REGION_WIDTH: usize = u8::MAX as usize - 1;

/// Errors from validating a tree definition.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A region with no children cannot select anything.
    #[error("region headed by `{head}` has no children")]
    EmptyRegion { head: &'static str },

    /// Two states share a type; typed lookup would be ambiguous.
    #[error("state type `{name}` appears twice in the tree")]
    DuplicateStateType { name: &'static str },

    #[error("tree has more than {MAX_STATES} states")]
    TooManyStates,

    #[error("tree has more than {MAX_REGIONS} regions")]
    TooManyRegions,

    #[error("tree has more than {MAX_FORKS_PER_KIND} regions of one kind")]
    TooManyForks,

    #[error("region headed by `{head}` has {width} children (limit {MAX_REGION_WIDTH})")]
    RegionTooWide { head: &'static str, width: usize },

    /// `Config::SUBSTITUTION_LIMIT` must be at least 1.
    #[error("substitution limit {limit} is below 1")]
    InvalidSubstitutionLimit { limit: usize },
}

// ============================================================================
// Definition values
// ============================================================================

/// Definition of one state: its body factory and storage mode.
pub struct StateDef<C: Config> {
    name: &'static str,
    type_id: TypeId,
    factory: BodyFactory<C>,
    dynamic: bool,
}

impl<C: Config> StateDef<C> {
    fn of<T: StateBody<C> + Default>(dynamic: bool) -> Self {
        Self {
            name: short_type_name::<T>(),
            type_id: TypeId::of::<T>(),
            factory: Box::new(|| Box::new(T::default())),
            dynamic,
        }
    }

    fn with_factory<T, F>(factory: F, dynamic: bool) -> Self
    where
        T: StateBody<C>,
        F: Fn() -> T + 'static,
    {
        Self {
            name: short_type_name::<T>(),
            type_id: TypeId::of::<T>(),
            factory: Box::new(move || Box::new(factory())),
            dynamic,
        }
    }
}

enum ChildDef<C: Config> {
    Leaf(StateDef<C>),
    Region(RegionDef<C>),
}

/// Definition of a region: a head state, a selection strategy, and
/// children added with the builder methods.
///
/// ```
/// use trellis::{BasicConfig, RegionDef, StateBody, Strategy};
///
/// #[derive(Default)]
/// struct Root;
/// #[derive(Default)]
/// struct Idle;
/// #[derive(Default)]
/// struct Busy;
///
/// type Cfg = BasicConfig;
/// impl StateBody<Cfg> for Root {}
/// impl StateBody<Cfg> for Idle {}
/// impl StateBody<Cfg> for Busy {}
///
/// let def = RegionDef::<Cfg>::composite::<Root>(Strategy::Resumable)
///     .leaf::<Idle>()
///     .leaf::<Busy>();
/// ```
pub struct RegionDef<C: Config> {
    kind: RegionKind,
    strategy: Strategy,
    head: StateDef<C>,
    children: Vec<ChildDef<C>>,
}

impl<C: Config> RegionDef<C> {
    /// A composite region: exactly one child active, picked by `strategy`.
    pub fn composite<H: StateBody<C> + Default>(strategy: Strategy) -> Self {
        Self {
            kind: RegionKind::Composite,
            strategy,
            head: StateDef::of::<H>(false),
            children: Vec::new(),
        }
    }

    /// An orthogonal region: all children active in parallel.
    pub fn orthogonal<H: StateBody<C> + Default>() -> Self {
        Self {
            kind: RegionKind::Orthogonal,
            // Unused by orthogonal dispatch; kept for uniformity.
            strategy: Strategy::Composite,
            head: StateDef::of::<H>(false),
            children: Vec::new(),
        }
    }

    /// Adds a leaf state with a statically stored body.
    pub fn leaf<T: StateBody<C> + Default>(mut self) -> Self {
        self.children.push(ChildDef::Leaf(StateDef::of::<T>(false)));
        self
    }

    /// Adds a leaf state whose body is rebuilt on every enter and dropped
    /// on every exit.
    pub fn dynamic_leaf<T: StateBody<C> + Default>(mut self) -> Self {
        self.children.push(ChildDef::Leaf(StateDef::of::<T>(true)));
        self
    }

    /// Adds a leaf state built by a custom factory instead of `Default`.
    pub fn leaf_with<T, F>(mut self, factory: F) -> Self
    where
        T: StateBody<C>,
        F: Fn() -> T + 'static,
    {
        self.children
            .push(ChildDef::Leaf(StateDef::with_factory(factory, false)));
        self
    }

    /// Adds a sub-region.
    pub fn region(mut self, def: RegionDef<C>) -> Self {
        self.children.push(ChildDef::Region(def));
        self
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

// ============================================================================
// Built form
// ============================================================================

pub(crate) type NodeId = usize;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Node {
    Leaf(StateId),
    Region(RegionId),
}

/// Which fork array a region indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegionSlot {
    Compo(usize),
    Ortho(usize),
}

#[derive(Debug)]
pub(crate) struct RegionInfo {
    pub id: RegionId,
    pub kind: RegionKind,
    pub strategy: Strategy,
    pub slot: RegionSlot,
    pub head: StateId,
    pub children: Vec<NodeId>,
    pub parent: Parent,
    /// The node wrapping this region in the tree.
    pub node: NodeId,
    /// Number of states in the region, head included; the region's states
    /// are the contiguous id range `head .. head + size`.
    pub size: u16,
}

impl RegionInfo {
    pub fn width(&self) -> usize {
        self.children.len()
    }
}

#[derive(Debug)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
    regions: Vec<RegionInfo>,
    root: NodeId,
    names: Vec<&'static str>,
    /// Per state: the region it heads, or `RegionId::INVALID`.
    head_region: Vec<RegionId>,
    state_parents: Vec<Parent>,
    compo_parents: Vec<Parent>,
    ortho_parents: Vec<Parent>,
    ortho_widths: Vec<usize>,
    /// Total children across composite regions; sizes the default plan
    /// store.
    compo_prongs: usize,
    type_index: HashMap<TypeId, StateId>,
}

impl Tree {
    pub fn node(&self, id: NodeId) -> Node {
        self.nodes[id]
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The apex region.
    pub fn root_region(&self) -> RegionId {
        match self.node(self.root) {
            Node::Region(region) => region,
            Node::Leaf(_) => unreachable!("the apex is always a region"),
        }
    }

    pub fn region(&self, id: RegionId) -> &RegionInfo {
        &self.regions[id.index()]
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn state_count(&self) -> usize {
        self.names.len()
    }

    pub fn compo_count(&self) -> usize {
        self.compo_parents.len()
    }

    pub fn compo_prongs(&self) -> usize {
        self.compo_prongs
    }

    pub fn name(&self, state: StateId) -> &'static str {
        self.names[state.index()]
    }

    /// The region a state heads, if any.
    pub fn region_of_head(&self, state: StateId) -> Option<&RegionInfo> {
        let region = self.head_region[state.index()];
        region.is_valid().then(|| self.region(region))
    }

    pub fn state_of_type(&self, type_id: TypeId) -> Option<StateId> {
        self.type_index.get(&type_id).copied()
    }

    pub fn contains_id(&self, state: StateId) -> bool {
        state.index() < self.state_count()
    }

    /// Copies of the parent tables for registry construction.
    pub fn parent_tables(&self) -> (Vec<Parent>, Vec<Parent>, Vec<Parent>, &[usize]) {
        (
            self.state_parents.clone(),
            self.compo_parents.clone(),
            self.ortho_parents.clone(),
            &self.ortho_widths,
        )
    }
}

// ============================================================================
// Build
// ============================================================================

struct TreeBuilder<C: Config> {
    nodes: Vec<Node>,
    regions: Vec<RegionInfo>,
    names: Vec<&'static str>,
    head_region: Vec<RegionId>,
    state_parents: Vec<Parent>,
    compo_parents: Vec<Parent>,
    ortho_parents: Vec<Parent>,
    ortho_widths: Vec<usize>,
    compo_prongs: usize,
    type_index: HashMap<TypeId, StateId>,
    slots: Vec<StateSlot<C>>,
}

impl<C: Config> TreeBuilder<C> {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            regions: Vec::new(),
            names: Vec::new(),
            head_region: Vec::new(),
            state_parents: Vec::new(),
            compo_parents: Vec::new(),
            ortho_parents: Vec::new(),
            ortho_widths: Vec::new(),
            compo_prongs: 0,
            type_index: HashMap::new(),
            slots: Vec::new(),
        }
    }

    fn alloc_state(&mut self, def: StateDef<C>, parent: Parent) -> Result<StateId, BuildError> {
        if self.names.len() >= MAX_STATES {
            return Err(BuildError::TooManyStates);
        }
        let id = StateId::new(self.names.len() as u16);
        if self.type_index.insert(def.type_id, id).is_some() {
            return Err(BuildError::DuplicateStateType { name: def.name });
        }
        self.names.push(def.name);
        self.head_region.push(RegionId::INVALID);
        self.state_parents.push(parent);
        self.slots.push(StateSlot::new(def.factory, def.dynamic));
        Ok(id)
    }

    fn build_region(&mut self, def: RegionDef<C>, parent: Parent) -> Result<NodeId, BuildError> {
        if def.children.is_empty() {
            return Err(BuildError::EmptyRegion { head: def.head.name });
        }
        if def.children.len() > MAX_REGION_WIDTH {
            return Err(BuildError::RegionTooWide {
                head: def.head.name,
                width: def.children.len(),
            });
        }
        if self.regions.len() >= MAX_REGIONS {
            return Err(BuildError::TooManyRegions);
        }

        let region_id = RegionId::new(self.regions.len() as u8);
        let slot = match def.kind {
            RegionKind::Composite => {
                if self.compo_parents.len() >= MAX_FORKS_PER_KIND {
                    return Err(BuildError::TooManyForks);
                }
                self.compo_parents.push(parent);
                self.compo_prongs += def.children.len();
                RegionSlot::Compo(self.compo_parents.len() - 1)
            }
            RegionKind::Orthogonal => {
                if self.ortho_parents.len() >= MAX_FORKS_PER_KIND {
                    return Err(BuildError::TooManyForks);
                }
                self.ortho_parents.push(parent);
                self.ortho_widths.push(def.children.len());
                RegionSlot::Ortho(self.ortho_parents.len() - 1)
            }
        };
        let fork = match slot {
            RegionSlot::Compo(index) => ForkId::composite(index),
            RegionSlot::Ortho(index) => ForkId::orthogonal(index),
        };

        // Reserve the region's entry before recursing so region ids are
        // assigned in pre-order.
        let region_index = self.regions.len();
        self.regions.push(RegionInfo {
            id: region_id,
            kind: def.kind,
            strategy: def.strategy,
            slot,
            head: StateId::INVALID,
            children: Vec::new(),
            parent,
            node: 0,
            size: 0,
        });

        let head = self.alloc_state(def.head, parent)?;
        self.head_region[head.index()] = region_id;

        let mut children = Vec::with_capacity(def.children.len());
        for (index, child) in def.children.into_iter().enumerate() {
            let child_parent = Parent::new(fork, Prong::new(index as u8));
            let node = match child {
                ChildDef::Leaf(state) => {
                    let id = self.alloc_state(state, child_parent)?;
                    self.nodes.push(Node::Leaf(id));
                    self.nodes.len() - 1
                }
                ChildDef::Region(region) => self.build_region(region, child_parent)?,
            };
            children.push(node);
        }

        let size = self.names.len() as u16 - u16::from(head);
        self.nodes.push(Node::Region(region_id));
        let node = self.nodes.len() - 1;

        let info = &mut self.regions[region_index];
        info.head = head;
        info.children = children;
        info.node = node;
        info.size = size;

        Ok(node)
    }
}

/// Builds the tree and the body arena from a definition.
pub(crate) fn build<C: Config>(
    def: RegionDef<C>,
) -> Result<(Tree, Vec<StateSlot<C>>), BuildError> {
    let mut builder = TreeBuilder::new();
    let root = builder.build_region(def, Parent::NONE)?;
    let tree = Tree {
        nodes: builder.nodes,
        regions: builder.regions,
        root,
        names: builder.names,
        head_region: builder.head_region,
        state_parents: builder.state_parents,
        compo_parents: builder.compo_parents,
        ortho_parents: builder.ortho_parents,
        ortho_widths: builder.ortho_widths,
        compo_prongs: builder.compo_prongs,
        type_index: builder.type_index,
    };
    Ok((tree, builder.slots))
}
