//! Flat structure report of a machine's tree.
//!
//! One entry per state in depth-first order, carrying enough for an
//! external pretty-printer to draw the hierarchy: depth, whether the
//! state heads a region (and of which kind), its name, and whether it is
//! currently active.

use trellis_types::{RegionKind, StateId};

use crate::registry::Registry;
use crate::tree::{Node, NodeId, Tree};

/// One state's row in the structure report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureEntry {
    pub state_id: StateId,
    /// Nesting depth; the apex head is 0.
    pub depth: usize,
    /// `Some` when the state heads a region.
    pub region: Option<RegionKind>,
    pub name: &'static str,
    pub is_active: bool,
}

pub(crate) fn report(tree: &Tree, registry: &Registry) -> Vec<StructureEntry> {
    let mut entries = Vec::with_capacity(tree.state_count());
    walk(tree, registry, tree.root(), 0, &mut entries);
    entries
}

fn walk(
    tree: &Tree,
    registry: &Registry,
    node: NodeId,
    depth: usize,
    entries: &mut Vec<StructureEntry>,
) {
    match tree.node(node) {
        Node::Leaf(state) => entries.push(StructureEntry {
            state_id: state,
            depth,
            region: None,
            name: tree.name(state),
            is_active: registry.is_active(state),
        }),
        Node::Region(region_id) => {
            let region = tree.region(region_id);
            entries.push(StructureEntry {
                state_id: region.head,
                depth,
                region: Some(region.kind),
                name: tree.name(region.head),
                is_active: registry.is_active(region.head),
            });
            for &child in &region.children {
                walk(tree, registry, child, depth + 1, entries);
            }
        }
    }
}
