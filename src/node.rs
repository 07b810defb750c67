//! The node actor.
//!
//! An [OctreeNode] owns one grid patch and talks to its relatives only through their
//! [NodeClient] handles. Each cycle operation is an `async fn` that suspends at channel
//! receives. The [crate::scheduler] drives the futures of all nodes together.

use std::sync::Arc;

use tracing::debug;

use crate::{
    client::{Mailboxes, NodeClient},
    constants::{H_BW, INX, NCHILD, NDIR, NDIR27, NF, NFACE},
    error::Result,
    geometry::{
        child_index_to_quadrant_index, face_flux_bounds, get_boundary_size,
        quadrant_flux_bounds, BoundaryKind, Direction, Face, IndexBox, Octant, PhysicalBox,
        Quadrant,
    },
    grid::GridPatch,
    kernel::{GsolveType, InteractionKernel},
    messages::{MultipolePass, NeighborGravity, SiblingHydro},
    morton::MortonKey,
};

/// Relation handles of a node, rebound in bulk by a regrid.
pub(crate) struct Relations {
    pub(crate) mailboxes: Arc<Mailboxes>,
    pub(crate) parent: Option<NodeClient>,
    pub(crate) children: Option<[NodeClient; NCHILD]>,
    pub(crate) neighbors: [Option<NodeClient>; NDIR],
    pub(crate) aunts: [Option<NodeClient>; NFACE],
    pub(crate) nieces: [bool; NFACE],
    pub(crate) amr_flags: [[bool; NDIR]; NCHILD],
    pub(crate) amr_inbound: [bool; NDIR],
}

/// A tree node owning one grid patch.
pub struct OctreeNode<G> {
    location: MortonKey,
    grid: G,
    is_refined: bool,
    mailboxes: Arc<Mailboxes>,
    parent: Option<NodeClient>,
    children: Option<[NodeClient; NCHILD]>,
    neighbors: [Option<NodeClient>; NDIR],
    aunts: [Option<NodeClient>; NFACE],
    nieces: [bool; NFACE],
    amr_flags: [[bool; NDIR]; NCHILD],
    amr_inbound: [bool; NDIR],
    hcycle: u64,
    gcycle: u64,
    step_num: u64,
    current_time: f64,
}

impl<G: GridPatch> OctreeNode<G> {
    /// An unbound leaf at `location` owning `grid`.
    pub fn new(location: MortonKey, grid: G) -> Self {
        Self {
            location,
            grid,
            is_refined: false,
            mailboxes: Arc::new(Mailboxes::new()),
            parent: None,
            children: None,
            neighbors: std::array::from_fn(|_| None),
            aunts: std::array::from_fn(|_| None),
            nieces: [false; NFACE],
            amr_flags: [[false; NDIR]; NCHILD],
            amr_inbound: [false; NDIR],
            hcycle: 0,
            gcycle: 0,
            step_num: 0,
            current_time: 0.0,
        }
    }

    /// The child in `octant`, prolonged from this node. Counters are inherited.
    pub(crate) fn new_child(&self, octant: Octant, domain: &PhysicalBox) -> Self {
        let location = self.location.child(octant);
        let mut child = Self::new(location, self.grid.new_child(octant, location, domain));
        child.hcycle = self.hcycle;
        child.gcycle = self.gcycle;
        child.step_num = self.step_num;
        child.current_time = self.current_time;
        child
    }

    pub(crate) fn set_refined(&mut self, is_refined: bool) {
        self.is_refined = is_refined;
    }

    pub(crate) fn bind(&mut self, relations: Relations) {
        self.mailboxes = relations.mailboxes;
        self.parent = relations.parent;
        self.children = relations.children;
        self.neighbors = relations.neighbors;
        self.aunts = relations.aunts;
        self.nieces = relations.nieces;
        self.amr_flags = relations.amr_flags;
        self.amr_inbound = relations.amr_inbound;
    }

    /// Location of the node.
    pub fn location(&self) -> MortonKey {
        self.location
    }

    /// The grid patch.
    pub fn grid(&self) -> &G {
        &self.grid
    }

    /// Mutable access to the grid patch.
    pub fn grid_mut(&mut self) -> &mut G {
        &mut self.grid
    }

    /// True if the node has children.
    pub fn is_refined(&self) -> bool {
        self.is_refined
    }

    /// The inbound mailboxes.
    pub fn mailboxes(&self) -> &Arc<Mailboxes> {
        &self.mailboxes
    }

    /// Handle to the parent. `None` for the root.
    pub fn parent(&self) -> Option<&NodeClient> {
        self.parent.as_ref()
    }

    /// Handles to the children in octant order.
    pub fn children(&self) -> Option<&[NodeClient; NCHILD]> {
        self.children.as_ref()
    }

    /// Handle to the same level neighbour in `dir`.
    pub fn neighbor(&self, dir: Direction) -> Option<&NodeClient> {
        self.neighbors[dir.index()].as_ref()
    }

    /// Handle to the coarser node across `face`.
    pub fn aunt(&self, face: Face) -> Option<&NodeClient> {
        self.aunts[face.index()].as_ref()
    }

    /// True if finer nodes touch `face`.
    pub fn has_nieces(&self, face: Face) -> bool {
        self.nieces[face.index()]
    }

    /// True if the child in `octant` expects prolonged ghost data from this node in `dir`.
    pub fn amr_flag(&self, octant: Octant, dir: Direction) -> bool {
        self.amr_flags[octant.index()][dir.index()]
    }

    /// True if this node expects prolonged ghost data from its parent in `dir`.
    pub fn amr_inbound(&self, dir: Direction) -> bool {
        self.amr_inbound[dir.index()]
    }

    /// Hydro cycle counter.
    pub fn hcycle(&self) -> u64 {
        self.hcycle
    }

    /// Gravity cycle counter.
    pub fn gcycle(&self) -> u64 {
        self.gcycle
    }

    /// Number of completed time steps.
    pub fn step_num(&self) -> u64 {
        self.step_num
    }

    /// Simulation time of the node.
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Advance the clock by `dt` and count the step.
    pub fn advance_time(&mut self, dt: f64) {
        self.current_time += dt;
        self.step_num += 1;
    }

    /// Restriction, sibling exchange and AMR prolongation for one hydro cycle.
    pub async fn run_hydro_exchange_cycle(&mut self) -> Result<()> {
        debug!(location = %self.location, hcycle = self.hcycle, "Hydro exchange");
        self.exchange_interlevel_hydro_data().await?;
        self.collect_hydro_boundaries().await?;
        self.send_hydro_amr_boundaries()?;
        self.hcycle += 1;
        Ok(())
    }

    async fn exchange_interlevel_hydro_data(&mut self) -> Result<()> {
        if self.is_refined {
            let mut outflows = [0.0; NF];
            for ci in Octant::full_set() {
                let data = self.mailboxes.child_hydro[ci.index()]
                    .recv(self.hcycle)
                    .await?;
                self.grid.set_restrict(&data, ci);
                let (_, child_outflows) = data.split_at(data.len().saturating_sub(NF));
                for (o, v) in outflows.iter_mut().zip(child_outflows) {
                    *o += v;
                }
            }
            self.grid.set_outflows(outflows);
        }
        if let Some(parent) = &self.parent {
            parent.send_hydro_children(
                self.grid.get_restrict(),
                self.location.child_index(),
                self.hcycle,
            )?;
        }
        Ok(())
    }

    async fn collect_hydro_boundaries(&mut self) -> Result<()> {
        for (dir, neighbor) in Direction::full_set().into_iter().zip(&self.neighbors) {
            if let Some(neighbor) = neighbor {
                let data = self.grid.get_hydro_boundary(dir, H_BW);
                neighbor.send_hydro_boundary(
                    SiblingHydro {
                        direction: dir.flip(),
                        data,
                    },
                    self.hcycle,
                )?;
            }
        }

        for dir in Direction::full_set() {
            if self.neighbors[dir.index()].is_some() || self.amr_inbound[dir.index()] {
                let payload = self.mailboxes.sibling_hydro[dir.index()]
                    .recv(self.hcycle)
                    .await?;
                self.grid.set_hydro_boundary(&payload.data, dir, H_BW);
            }
        }

        for face in Face::full_set() {
            if self.location.is_physical_boundary(face) {
                self.grid.set_physical_boundaries(face, self.current_time);
            }
        }
        Ok(())
    }

    fn send_hydro_amr_boundaries(&self) -> Result<()> {
        let Some(children) = &self.children else {
            return Ok(());
        };
        for (ci, child) in Octant::full_set().into_iter().zip(children) {
            let corner = ci.corner();
            for dir in Direction::full_set() {
                if !self.amr_flags[ci.index()][dir.index()] {
                    continue;
                }
                // Child ghost region in the doubled padded frame of this node.
                let outer = get_boundary_size(dir, BoundaryKind::Outer, INX, H_BW, H_BW);
                let shift = |v: usize, d: usize| v + H_BW + corner[d] * INX;
                let bounds = IndexBox::new(
                    std::array::from_fn(|d| shift(outer.lb[d], d)),
                    std::array::from_fn(|d| shift(outer.ub[d], d)),
                );
                let data = self.grid.get_prolong(bounds);
                child.send_hydro_boundary(
                    SiblingHydro {
                        direction: dir,
                        data,
                    },
                    self.hcycle,
                )?;
            }
        }
        Ok(())
    }

    /// Replace coarse fluxes on faces with finer nieces by the restricted niece fluxes.
    pub async fn exchange_flux_corrections(&mut self) -> Result<()> {
        let ci = self.location.child_index();
        for (face, aunt) in Face::full_set().into_iter().zip(&self.aunts) {
            if let Some(aunt) = aunt {
                let dim = face.get_dimension();
                let data = self.grid.get_flux_restrict(face_flux_bounds(face), dim);
                aunt.send_hydro_flux_correct(
                    data,
                    face.flip(),
                    child_index_to_quadrant_index(ci, dim),
                    self.hcycle,
                )?;
            }
        }

        for face in Face::full_set() {
            if !self.nieces[face.index()] {
                continue;
            }
            for quadrant in Quadrant::full_set() {
                let data = self.mailboxes.niece_flux[face.index()][quadrant.index()]
                    .recv(self.hcycle)
                    .await?;
                self.grid.set_flux_restrict(
                    &data,
                    quadrant_flux_bounds(face, quadrant),
                    face.get_dimension(),
                );
            }
        }
        Ok(())
    }

    /// One FMM pass: moments up, boundaries across, expansions down.
    pub async fn run_gravity_pass(
        &mut self,
        kind: GsolveType,
        do_energy_accounting: bool,
        kernel: &dyn InteractionKernel,
    ) -> Result<()> {
        debug!(location = %self.location, gcycle = self.gcycle, "Gravity pass");
        if do_energy_accounting {
            self.grid.egas_to_etot();
        }

        // Moments up.
        let child_moments = if self.is_refined {
            let mut blocks = Vec::<MultipolePass>::with_capacity(NCHILD);
            for channel in &self.mailboxes.child_gravity {
                blocks.push(channel.recv(self.gcycle).await?);
            }
            Some(blocks)
        } else {
            None
        };
        let pass = self.grid.compute_multipoles(kind, child_moments.as_deref());
        if let Some(parent) = &self.parent {
            parent.send_gravity_multipoles(pass, self.location.child_index(), self.gcycle)?;
        }

        // Boundaries across.
        for (dir, neighbor) in Direction::full_set().into_iter().zip(&self.neighbors) {
            if let Some(neighbor) = neighbor {
                let data = self.grid.get_gravity_boundary(dir);
                neighbor.send_gravity_boundary(data, dir.flip(), self.gcycle)?;
            }
        }
        let mut slots: [NeighborGravity; NDIR27] =
            std::array::from_fn(|_| NeighborGravity::self_slot());
        for dir in Direction::full_set() {
            slots[dir.index27()] = if self.neighbors[dir.index()].is_some() {
                self.mailboxes.neighbor_gravity[dir.index()]
                    .recv(self.gcycle)
                    .await?
            } else {
                NeighborGravity::empty(dir)
            };
        }

        // Interactions.
        if self.is_refined {
            self.grid.compute_all_interactions(kind, kernel, &slots)?;
        } else {
            self.grid.compute_interactions(kind, kernel)?;
            for dir in Direction::full_set() {
                if self.neighbors[dir.index()].is_some() {
                    let slot = &slots[dir.index27()];
                    self.grid
                        .compute_boundary_interactions(kind, kernel, dir, slot.is_monopole, slot)?;
                }
            }
        }

        // Expansions down.
        let parent_block = if self.parent.is_some() {
            Some(self.mailboxes.parent_gravity.recv(self.gcycle).await?)
        } else {
            None
        };
        self.grid.compute_expansions(kind, parent_block.as_ref());
        if let Some(children) = &self.children {
            for (ci, child) in Octant::full_set().into_iter().zip(children) {
                child.send_gravity_expansions(self.grid.get_expansion_block(kind, ci), self.gcycle)?;
            }
        }

        if do_energy_accounting {
            self.grid.etot_to_egas();
        }
        self.gcycle += 1;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use futures::executor::block_on;

    use super::OctreeNode;
    use crate::{
        constants::{H_BW, INX, NF, RHO_I},
        geometry::PhysicalBox,
        grid::{Grid, GridPatch},
        kernel::{GsolveType, NullKernel},
        morton::MortonKey,
    };

    fn root() -> OctreeNode<Grid> {
        let mut grid = Grid::new(MortonKey::root(), &PhysicalBox::cube(1.0));
        grid.set_problem(&|x| {
            let mut values = [0.0; NF];
            values[RHO_I] = 1.0 + x[0];
            values
        });
        OctreeNode::new(MortonKey::root(), grid)
    }

    #[test]
    fn test_lone_root_uses_physical_boundaries() {
        let mut node = root();
        block_on(node.run_hydro_exchange_cycle()).unwrap();
        assert_eq!(node.hcycle(), 1);
        // Outflow copy of the first interior cell.
        let edge = node.grid().hydro(RHO_I, [H_BW, H_BW, H_BW]);
        assert_eq!(node.grid().hydro(RHO_I, [0, H_BW, H_BW]), edge);
        let edge = node.grid().hydro(RHO_I, [H_BW + INX - 1, H_BW, H_BW]);
        assert_eq!(node.grid().hydro(RHO_I, [H_BW + INX + 2, H_BW, H_BW]), edge);
        block_on(node.run_hydro_exchange_cycle()).unwrap();
        assert_eq!(node.hcycle(), 2);
    }

    #[test]
    fn test_lone_root_gravity_pass() {
        let mut node = root();
        block_on(node.run_gravity_pass(GsolveType::NonRho, true, &NullKernel)).unwrap();
        assert_eq!(node.gcycle(), 1);
        assert!(node.grid().expansions().iter().all(|e| e.phi == 0.0));
        assert!(node.grid().angular_corrections().is_empty());
        block_on(node.exchange_flux_corrections()).unwrap();
    }
}
