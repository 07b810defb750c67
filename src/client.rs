//! Inbound mailboxes of a node and send handles to its relatives.

use std::sync::Arc;

use tracing::trace;

use crate::{
    channel::CycleChannel,
    constants::{NCHILD, NDIR, NFACE, NQUADRANT},
    error::Result,
    geometry::{Direction, Face, Octant, Quadrant},
    messages::{
        ExpansionPass, FluxRestrict, HydroRestrict, MultipolePass, NeighborGravity, SiblingHydro,
    },
    morton::MortonKey,
};

/// All inbound channels of one node.
pub struct Mailboxes {
    /// Restriction data from each child, tagged with `hcycle`.
    pub child_hydro: [CycleChannel<HydroRestrict>; NCHILD],
    /// Ghost data per direction, from a sibling or a prolonging parent, tagged with `hcycle`.
    pub sibling_hydro: [CycleChannel<SiblingHydro>; NDIR],
    /// Restricted niece fluxes per face and quadrant, tagged with `hcycle`.
    pub niece_flux: [[CycleChannel<FluxRestrict>; NQUADRANT]; NFACE],
    /// Coarsened moments from each child, tagged with `gcycle`.
    pub child_gravity: [CycleChannel<MultipolePass>; NCHILD],
    /// Gravity boundaries from each neighbour, tagged with `gcycle`.
    pub neighbor_gravity: [CycleChannel<NeighborGravity>; NDIR],
    /// Expansion block from the parent, tagged with `gcycle`.
    pub parent_gravity: CycleChannel<ExpansionPass>,
}

impl Default for Mailboxes {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailboxes {
    /// Fresh, open mailboxes.
    pub fn new() -> Self {
        Self {
            child_hydro: std::array::from_fn(|_| CycleChannel::new()),
            sibling_hydro: std::array::from_fn(|_| CycleChannel::new()),
            niece_flux: std::array::from_fn(|_| std::array::from_fn(|_| CycleChannel::new())),
            child_gravity: std::array::from_fn(|_| CycleChannel::new()),
            neighbor_gravity: std::array::from_fn(|_| CycleChannel::new()),
            parent_gravity: CycleChannel::new(),
        }
    }

    /// Close every channel. Used when the relations of the node are rebound.
    pub fn close(&self) {
        self.child_hydro.iter().for_each(CycleChannel::close);
        self.sibling_hydro.iter().for_each(CycleChannel::close);
        self.niece_flux
            .iter()
            .flatten()
            .for_each(CycleChannel::close);
        self.child_gravity.iter().for_each(CycleChannel::close);
        self.neighbor_gravity.iter().for_each(CycleChannel::close);
        self.parent_gravity.close();
    }

    /// True if the mailboxes were closed.
    pub fn is_closed(&self) -> bool {
        self.parent_gravity.is_closed()
    }
}

/// Handle to send messages to a relative.
#[derive(Clone)]
pub struct NodeClient {
    location: MortonKey,
    mailboxes: Arc<Mailboxes>,
}

impl std::fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient")
            .field("location", &self.location)
            .finish()
    }
}

impl PartialEq for NodeClient {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location && Arc::ptr_eq(&self.mailboxes, &other.mailboxes)
    }
}

impl NodeClient {
    /// Handle to the node at `location` with the given inbound mailboxes.
    pub fn new(location: MortonKey, mailboxes: Arc<Mailboxes>) -> Self {
        Self {
            location,
            mailboxes,
        }
    }

    /// Location of the relative.
    pub fn location(&self) -> MortonKey {
        self.location
    }

    /// True if the handle delivers into `mailboxes`.
    pub fn is_bound_to(&self, mailboxes: &Arc<Mailboxes>) -> bool {
        Arc::ptr_eq(&self.mailboxes, mailboxes)
    }

    /// Send restriction data from child `ci` to this parent.
    pub fn send_hydro_children(&self, data: HydroRestrict, ci: Octant, cycle: u64) -> Result<()> {
        trace!(to = %self.location, ci = ci.index(), cycle, "send_hydro_children");
        self.mailboxes.child_hydro[ci.index()].send(cycle, data)
    }

    /// Send ghost data for the ghost region of this node in `data.direction`.
    pub fn send_hydro_boundary(&self, data: SiblingHydro, cycle: u64) -> Result<()> {
        trace!(to = %self.location, dir = %data.direction, cycle, "send_hydro_boundary");
        self.mailboxes.sibling_hydro[data.direction.index()].send(cycle, data)
    }

    /// Send a restricted niece flux for `quadrant` of `face` of this aunt.
    pub fn send_hydro_flux_correct(
        &self,
        data: FluxRestrict,
        face: Face,
        quadrant: Quadrant,
        cycle: u64,
    ) -> Result<()> {
        trace!(to = %self.location, face = face.index(), quadrant = quadrant.index(), cycle, "send_hydro_flux_correct");
        self.mailboxes.niece_flux[face.index()][quadrant.index()].send(cycle, data)
    }

    /// Send the coarsened moments of child `ci` to this parent.
    pub fn send_gravity_multipoles(&self, data: MultipolePass, ci: Octant, cycle: u64) -> Result<()> {
        trace!(to = %self.location, ci = ci.index(), cycle, "send_gravity_multipoles");
        self.mailboxes.child_gravity[ci.index()].send(cycle, data)
    }

    /// Send gravity boundary data arriving at this node from direction `dir`.
    pub fn send_gravity_boundary(&self, data: NeighborGravity, dir: Direction, cycle: u64) -> Result<()> {
        trace!(to = %self.location, dir = %dir, cycle, "send_gravity_boundary");
        self.mailboxes.neighbor_gravity[dir.index()].send(cycle, data)
    }

    /// Send the expansion block of this child.
    pub fn send_gravity_expansions(&self, data: ExpansionPass, cycle: u64) -> Result<()> {
        trace!(to = %self.location, cycle, "send_gravity_expansions");
        self.mailboxes.parent_gravity.send(cycle, data)
    }
}
