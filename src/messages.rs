//! Payloads exchanged between nodes.
//!
//! Every payload is owned data. Nodes never share grid memory.

use crate::{
    constants::{G_BW, INX, NF},
    geometry::{get_boundary_size, BoundaryKind, Direction},
    moments::{Expansion, Multipole, SpaceVector},
};

/// Volume averaged child data followed by the `NF` outflow accumulators of the child.
pub type HydroRestrict = Vec<f64>;

/// Boundary flux plane of a niece, restricted to the resolution of its aunt.
pub type FluxRestrict = Vec<f64>;

/// Hydro ghost data for one direction of the receiving node.
#[derive(Clone, Debug, PartialEq)]
pub struct SiblingHydro {
    /// Direction of the ghost region on the receiving node.
    pub direction: Direction,
    /// Field major data of the region, `NF` blocks in region iteration order.
    pub data: Vec<f64>,
}

impl SiblingHydro {
    /// Number of values per field.
    pub fn cells(&self) -> usize {
        self.data.len() / NF
    }
}

/// Coarsened moments of a node, one entry per cell of a child sized `(INX/2)^3` block
/// at the resolution of the parent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MultipolePass {
    /// Moments about the centres.
    pub moments: Vec<Multipole>,
    /// Centre of mass of each entry.
    pub centres: Vec<SpaceVector>,
}

/// Expansion block for one child, at the resolution of the parent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExpansionPass {
    /// Expansions about the parent cell centres.
    pub expansions: Vec<Expansion>,
    /// Angular momentum corrections. Empty unless the pass solves with density corrections.
    pub angular_corrections: Vec<SpaceVector>,
}

/// Gravity boundary data received from a same level neighbour.
///
/// Cell indices are interior indices in the frame of the sending node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NeighborGravity {
    /// Direction from the receiving node to the sender. `None` for the self slot.
    pub direction: Option<Direction>,
    /// True if the sender is a leaf and only masses at cell centres are sent.
    pub is_monopole: bool,
    /// Interior indices of the boundary cells on the sender.
    pub cells: Vec<[usize; 3]>,
    /// Moments of the boundary cells.
    pub moments: Vec<Multipole>,
    /// Centres of the boundary cells.
    pub centres: Vec<SpaceVector>,
}

impl NeighborGravity {
    /// A zero filled payload covering the boundary cells a neighbour in `dir` would send.
    pub fn empty(dir: Direction) -> Self {
        let region = get_boundary_size(dir.flip(), BoundaryKind::Inner, INX, 0, G_BW);
        let cells: Vec<[usize; 3]> = region.iter().collect();
        let len = cells.len();
        Self {
            direction: Some(dir),
            is_monopole: true,
            cells,
            moments: vec![Multipole::default(); len],
            centres: vec![[0.0; 3]; len],
        }
    }

    /// Placeholder for the centre of the 27 slot stencil.
    pub fn self_slot() -> Self {
        Self::default()
    }

    /// True if no boundary cell carries mass.
    pub fn is_empty(&self) -> bool {
        self.moments.iter().all(|m| m.mass == 0.0)
    }
}
