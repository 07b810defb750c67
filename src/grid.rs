//! Grid patches owned by the nodes.
//!
//! [GridPatch] is the contract between the coordination protocol and the numerics of a
//! patch. [Grid] is a cell centred reference patch with `INX^3` interior cells padded by
//! `H_BW` hydro ghost cells, face centred fluxes and per cell gravity moments.

use itertools::iproduct;

use crate::{
    constants::{
        EGAS_I, G_BW, H_BW, H_N3, H_NX, INX, INX3, INX3_CHILD, INX_HALF, NDIM, NDIR27, NF, POT_I,
        RHO_I,
    },
    error::Result,
    geometry::{
        flat_index, get_boundary_size, octant_merge_into, octant_split, BoundaryKind, Direction,
        Face, IndexBox, Octant, PhysicalBox, Side,
    },
    kernel::{GsolveType, InteractionKernel, Interactions, LocalMoments},
    messages::{ExpansionPass, FluxRestrict, HydroRestrict, MultipolePass, NeighborGravity},
    moments::{merge_moments, sub, Expansion, Multipole, SpaceVector},
    morton::MortonKey,
};

/// Operations the node protocol needs from the patch it owns.
pub trait GridPatch: Sized {
    /// An empty patch for the box at `location` of `domain`.
    fn new(location: MortonKey, domain: &PhysicalBox) -> Self;

    /// Fill the conserved fields from a function of the cell centre.
    fn set_problem(&mut self, init: &dyn Fn(SpaceVector) -> [f64; NF]);

    /// Patch of the child in `octant`, prolonged from this patch.
    fn new_child(&self, octant: Octant, location: MortonKey, domain: &PhysicalBox) -> Self;

    /// Mark the patch as the root of the tree.
    fn set_root(&mut self);

    /// Volume averaged interior as a child sized block, followed by the `NF` outflows.
    fn get_restrict(&self) -> HydroRestrict;

    /// Write the restriction data of child `octant` into the interior.
    fn set_restrict(&mut self, data: &[f64], octant: Octant);

    /// Replace the outflow accumulators.
    fn set_outflows(&mut self, outflows: [f64; NF]);

    /// What left the domain through the physical boundaries of this patch and its descendants.
    fn outflows(&self) -> [f64; NF];

    /// Interior cells of width `width` next to the boundary in `dir`.
    fn get_hydro_boundary(&self, dir: Direction, width: usize) -> Vec<f64>;

    /// Fill the ghost cells of width `width` in `dir`.
    fn set_hydro_boundary(&mut self, data: &[f64], dir: Direction, width: usize);

    /// Prolonged values on `bounds`, given in the doubled padded index space of this patch.
    fn get_prolong(&self, bounds: IndexBox) -> Vec<f64>;

    /// Flux plane `bounds` normal to `dim`, averaged over 2x2 faces.
    fn get_flux_restrict(&self, bounds: IndexBox, dim: usize) -> FluxRestrict;

    /// Overwrite the fluxes on `bounds` normal to `dim`.
    fn set_flux_restrict(&mut self, data: &[f64], bounds: IndexBox, dim: usize);

    /// Apply physical boundary conditions on `face`.
    fn set_physical_boundaries(&mut self, face: Face, time: f64);

    /// Compute moments, from the density for a leaf or from the child blocks otherwise.
    ///
    /// Returns the moments coarsened to a child sized block.
    fn compute_multipoles(
        &mut self,
        kind: GsolveType,
        children: Option<&[MultipolePass]>,
    ) -> MultipolePass;

    /// Gravity boundary data for the neighbour in `dir`.
    fn get_gravity_boundary(&self, dir: Direction) -> NeighborGravity;

    /// Interactions among the cells of this patch. Resets previous interactions.
    fn compute_interactions(
        &mut self,
        kind: GsolveType,
        kernel: &dyn InteractionKernel,
    ) -> Result<()>;

    /// Add interactions with the boundary data of the neighbour in `dir`.
    fn compute_boundary_interactions(
        &mut self,
        kind: GsolveType,
        kernel: &dyn InteractionKernel,
        dir: Direction,
        is_monopole: bool,
        data: &NeighborGravity,
    ) -> Result<()>;

    /// Interactions with the uniform 27 slot neighbour array. Resets previous interactions.
    fn compute_all_interactions(
        &mut self,
        kind: GsolveType,
        kernel: &dyn InteractionKernel,
        neighbors: &[NeighborGravity; NDIR27],
    ) -> Result<()>;

    /// Combine the interactions with the parent block into the final expansions.
    fn compute_expansions(&mut self, kind: GsolveType, parent: Option<&ExpansionPass>);

    /// The expansion block for the child in `octant`.
    fn get_expansion_block(&self, kind: GsolveType, octant: Octant) -> ExpansionPass;

    /// Add half the gravitational energy density to the gas energy.
    fn egas_to_etot(&mut self);

    /// Remove half the gravitational energy density from the gas energy.
    fn etot_to_egas(&mut self);

    /// Largest interior density. Drives the refinement criterion.
    fn max_density(&self) -> f64;

    /// Volume integral of conserved `field` over the interior.
    fn conserved_total(&self, field: usize) -> f64;
}

/// Flat index of a padded hydro cell.
#[inline]
fn h_index(index: [usize; 3]) -> usize {
    flat_index(index, H_NX)
}

/// Shape of the face array normal to `dim`.
fn flux_shape(dim: usize) -> [usize; 3] {
    let mut shape = [INX; 3];
    shape[dim] += 1;
    shape
}

#[inline]
fn flux_index(dim: usize, index: [usize; 3]) -> usize {
    let shape = flux_shape(dim);
    (index[0] * shape[1] + index[1]) * shape[2] + index[2]
}

fn minmod(a: f64, b: f64) -> f64 {
    if a * b <= 0.0 {
        0.0
    } else if a.abs() < b.abs() {
        a
    } else {
        b
    }
}

/// Reference cell centred patch.
#[derive(Clone, Debug)]
pub struct Grid {
    location: MortonKey,
    x0: SpaceVector,
    dx: f64,
    is_root: bool,
    is_leaf: bool,
    u: Vec<Vec<f64>>,
    fluxes: [Vec<Vec<f64>>; NDIM],
    outflows: [f64; NF],
    multipoles: Vec<Multipole>,
    centres: Vec<SpaceVector>,
    interactions: Interactions,
    expansions: Vec<Expansion>,
    angular_corrections: Vec<SpaceVector>,
}

impl Grid {
    /// Location of the patch.
    pub fn location(&self) -> MortonKey {
        self.location
    }

    /// Cell width.
    pub fn dx(&self) -> f64 {
        self.dx
    }

    /// Physical position of the lower interior corner.
    pub fn x0(&self) -> SpaceVector {
        self.x0
    }

    /// True for the root patch.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Centre of interior cell `index`.
    pub fn cell_centre(&self, index: [usize; 3]) -> SpaceVector {
        std::array::from_fn(|dim| self.x0[dim] + (index[dim] as f64 + 0.5) * self.dx)
    }

    /// Value of `field` at padded index `index`.
    pub fn hydro(&self, field: usize, index: [usize; 3]) -> f64 {
        self.u[field][h_index(index)]
    }

    /// Mutable value of `field` at padded index `index`.
    pub fn hydro_mut(&mut self, field: usize, index: [usize; 3]) -> &mut f64 {
        &mut self.u[field][h_index(index)]
    }

    /// Flux of `field` through face `index` normal to `dim`.
    pub fn flux(&self, dim: usize, field: usize, index: [usize; 3]) -> f64 {
        self.fluxes[dim][field][flux_index(dim, index)]
    }

    /// Mutable flux of `field` through face `index` normal to `dim`.
    pub fn flux_mut(&mut self, dim: usize, field: usize, index: [usize; 3]) -> &mut f64 {
        &mut self.fluxes[dim][field][flux_index(dim, index)]
    }

    /// Volume integral of `field` over the interior.
    pub fn interior_total(&self, field: usize) -> f64 {
        let volume = self.dx * self.dx * self.dx;
        iproduct!(0..INX, 0..INX, 0..INX)
            .map(|(i, j, k)| self.hydro(field, [i + H_BW, j + H_BW, k + H_BW]))
            .sum::<f64>()
            * volume
    }

    /// Add to the outflow accumulators.
    pub fn add_outflows(&mut self, values: [f64; NF]) {
        for (o, v) in self.outflows.iter_mut().zip(values) {
            *o += v;
        }
    }

    /// Moments of the interior cells from the last gravity pass.
    pub fn multipoles(&self) -> &[Multipole] {
        &self.multipoles
    }

    /// Centres of mass of the interior cells from the last gravity pass.
    pub fn centres(&self) -> &[SpaceVector] {
        &self.centres
    }

    /// Final expansions of the interior cells from the last gravity pass.
    pub fn expansions(&self) -> &[Expansion] {
        &self.expansions
    }

    /// Angular momentum corrections from the last gravity pass.
    pub fn angular_corrections(&self) -> &[SpaceVector] {
        &self.angular_corrections
    }

    fn local_moments(&self) -> LocalMoments<'_> {
        LocalMoments {
            origin: self.location.cell_origin(),
            level: self.location.level(),
            is_leaf: self.is_leaf,
            x0: self.x0,
            dx: self.dx,
            moments: &self.multipoles,
            centres: &self.centres,
        }
    }

    fn prolong_at(&self, field: usize, fine: [usize; 3]) -> f64 {
        let u = &self.u[field];
        let coarse = fine.map(|f| f / 2);
        let centre = u[h_index(coarse)];
        let mut value = centre;
        for dim in 0..NDIM {
            let mut lower = coarse;
            let mut upper = coarse;
            lower[dim] -= 1;
            upper[dim] += 1;
            let slope = minmod(u[h_index(upper)] - centre, centre - u[h_index(lower)]);
            let sign = if fine[dim] % 2 == 0 { -0.25 } else { 0.25 };
            value += sign * slope;
        }
        value
    }
}

impl GridPatch for Grid {
    fn new(location: MortonKey, domain: &PhysicalBox) -> Self {
        let corner = std::array::from_fn(|dim| location.x_location(dim));
        let x0 = domain.reference_to_physical(corner);
        let dx = domain.diameter()[0] * location.reference_diameter() / INX as f64;
        Self {
            location,
            x0,
            dx,
            is_root: false,
            is_leaf: true,
            u: vec![vec![0.0; H_N3]; NF],
            fluxes: std::array::from_fn(|dim| {
                let [nx, ny, nz] = flux_shape(dim);
                vec![vec![0.0; nx * ny * nz]; NF]
            }),
            outflows: [0.0; NF],
            multipoles: vec![Multipole::default(); INX3],
            centres: vec![[0.0; 3]; INX3],
            interactions: Interactions::default(),
            expansions: vec![Expansion::default(); INX3],
            angular_corrections: Vec::new(),
        }
    }

    fn set_problem(&mut self, init: &dyn Fn(SpaceVector) -> [f64; NF]) {
        for (i, j, k) in iproduct!(0..INX, 0..INX, 0..INX) {
            let values = init(self.cell_centre([i, j, k]));
            for (field, value) in values.into_iter().enumerate() {
                *self.hydro_mut(field, [i + H_BW, j + H_BW, k + H_BW]) = value;
            }
        }
    }

    fn new_child(&self, octant: Octant, location: MortonKey, domain: &PhysicalBox) -> Self {
        let mut child = Grid::new(location, domain);
        let lb = octant.corner().map(|side| 2 * H_BW + side * INX);
        let bounds = IndexBox::new(lb, lb.map(|l| l + INX));
        let data = self.get_prolong(bounds);
        let interior = IndexBox::new([H_BW; 3], [H_BW + INX; 3]);
        for field in 0..NF {
            for (n, index) in interior.iter().enumerate() {
                *child.hydro_mut(field, index) = data[field * INX3 + n];
            }
        }
        child
    }

    fn set_root(&mut self) {
        self.is_root = true;
    }

    fn get_restrict(&self) -> HydroRestrict {
        let mut data = Vec::with_capacity(NF * INX3_CHILD + NF);
        for field in 0..NF {
            for (i, j, k) in iproduct!(0..INX_HALF, 0..INX_HALF, 0..INX_HALF) {
                let sum: f64 = iproduct!(0..2, 0..2, 0..2)
                    .map(|(a, b, c)| {
                        self.hydro(
                            field,
                            [2 * i + a + H_BW, 2 * j + b + H_BW, 2 * k + c + H_BW],
                        )
                    })
                    .sum();
                data.push(sum / 8.0);
            }
        }
        data.extend_from_slice(&self.outflows);
        data
    }

    fn set_restrict(&mut self, data: &[f64], octant: Octant) {
        assert!(data.len() >= NF * INX3_CHILD);
        let [x0, y0, z0] = octant.offset();
        for field in 0..NF {
            for (i, j, k) in iproduct!(0..INX_HALF, 0..INX_HALF, 0..INX_HALF) {
                let value = data[field * INX3_CHILD + flat_index([i, j, k], INX_HALF)];
                *self.hydro_mut(field, [i + x0 + H_BW, j + y0 + H_BW, k + z0 + H_BW]) = value;
            }
        }
    }

    fn set_outflows(&mut self, outflows: [f64; NF]) {
        self.outflows = outflows;
    }

    fn outflows(&self) -> [f64; NF] {
        self.outflows
    }

    fn get_hydro_boundary(&self, dir: Direction, width: usize) -> Vec<f64> {
        let region = get_boundary_size(dir, BoundaryKind::Inner, INX, H_BW, width);
        let mut data = Vec::with_capacity(NF * region.len());
        for field in 0..NF {
            data.extend(region.iter().map(|index| self.hydro(field, index)));
        }
        data
    }

    fn set_hydro_boundary(&mut self, data: &[f64], dir: Direction, width: usize) {
        let region = get_boundary_size(dir, BoundaryKind::Outer, INX, H_BW, width);
        let len = region.len();
        assert_eq!(data.len(), NF * len);
        for field in 0..NF {
            for (n, index) in region.iter().enumerate() {
                *self.hydro_mut(field, index) = data[field * len + n];
            }
        }
    }

    fn get_prolong(&self, bounds: IndexBox) -> Vec<f64> {
        let mut data = Vec::with_capacity(NF * bounds.len());
        for field in 0..NF {
            data.extend(bounds.iter().map(|fine| self.prolong_at(field, fine)));
        }
        data
    }

    fn get_flux_restrict(&self, bounds: IndexBox, dim: usize) -> FluxRestrict {
        let [t0, t1] = Face::new(dim, Side::Minus).tangential_dimensions();
        let shape = bounds.shape();
        let normal = bounds.lb[dim];
        let mut data = Vec::with_capacity(NF * shape[t0] * shape[t1] / 4);
        for field in 0..NF {
            for (a, b) in iproduct!(0..shape[t0] / 2, 0..shape[t1] / 2) {
                let mut sum = 0.0;
                for (da, db) in iproduct!(0..2, 0..2) {
                    let mut index = [0; 3];
                    index[dim] = normal;
                    index[t0] = bounds.lb[t0] + 2 * a + da;
                    index[t1] = bounds.lb[t1] + 2 * b + db;
                    sum += self.flux(dim, field, index);
                }
                data.push(sum / 4.0);
            }
        }
        data
    }

    fn set_flux_restrict(&mut self, data: &[f64], bounds: IndexBox, dim: usize) {
        let len = bounds.len();
        assert_eq!(data.len(), NF * len);
        for field in 0..NF {
            for (n, index) in bounds.iter().enumerate() {
                *self.flux_mut(dim, field, index) = data[field * len + n];
            }
        }
    }

    fn set_physical_boundaries(&mut self, face: Face, _time: f64) {
        let dim = face.get_dimension();
        let mut lb = [0; 3];
        let mut ub = [H_NX; 3];
        let edge = match face.get_side() {
            Side::Minus => {
                ub[dim] = H_BW;
                H_BW
            }
            Side::Plus => {
                lb[dim] = H_BW + INX;
                H_BW + INX - 1
            }
        };
        for index in IndexBox::new(lb, ub).iter() {
            let mut source = index;
            source[dim] = edge;
            for field in 0..NF {
                let value = self.hydro(field, source);
                *self.hydro_mut(field, index) = value;
            }
        }
    }

    fn compute_multipoles(
        &mut self,
        _kind: GsolveType,
        children: Option<&[MultipolePass]>,
    ) -> MultipolePass {
        match children {
            None => {
                self.is_leaf = true;
                let volume = self.dx * self.dx * self.dx;
                for (i, j, k) in iproduct!(0..INX, 0..INX, 0..INX) {
                    let n = flat_index([i, j, k], INX);
                    let mass = self.hydro(RHO_I, [i + H_BW, j + H_BW, k + H_BW]) * volume;
                    self.multipoles[n] = Multipole::cube(mass, self.dx);
                    self.centres[n] = self.cell_centre([i, j, k]);
                }
            }
            Some(blocks) => {
                assert_eq!(blocks.len(), Octant::count());
                self.is_leaf = false;
                for (octant, block) in Octant::full_set().into_iter().zip(blocks) {
                    octant_merge_into(&mut self.multipoles, &block.moments, octant);
                    octant_merge_into(&mut self.centres, &block.centres, octant);
                }
            }
        }

        let mut pass = MultipolePass {
            moments: Vec::with_capacity(INX3_CHILD),
            centres: Vec::with_capacity(INX3_CHILD),
        };
        for (i, j, k) in iproduct!(0..INX_HALF, 0..INX_HALF, 0..INX_HALF) {
            let parts = iproduct!(0..2, 0..2, 0..2)
                .map(|(a, b, c)| {
                    let n = flat_index([2 * i + a, 2 * j + b, 2 * k + c], INX);
                    (self.multipoles[n], self.centres[n])
                })
                .collect::<Vec<_>>();
            let (moment, centre) = merge_moments(&parts);
            pass.moments.push(moment);
            pass.centres.push(centre);
        }
        pass
    }

    fn get_gravity_boundary(&self, dir: Direction) -> NeighborGravity {
        let region = get_boundary_size(dir, BoundaryKind::Inner, INX, 0, G_BW);
        let cells: Vec<[usize; 3]> = region.iter().collect();
        let moments = cells
            .iter()
            .map(|&cell| {
                let moment = self.multipoles[flat_index(cell, INX)];
                if self.is_leaf {
                    Multipole::monopole(moment.mass)
                } else {
                    moment
                }
            })
            .collect();
        let centres = cells
            .iter()
            .map(|&cell| self.centres[flat_index(cell, INX)])
            .collect();
        NeighborGravity {
            direction: Some(dir.flip()),
            is_monopole: self.is_leaf,
            cells,
            moments,
            centres,
        }
    }

    fn compute_interactions(
        &mut self,
        kind: GsolveType,
        kernel: &dyn InteractionKernel,
    ) -> Result<()> {
        self.interactions = kernel.interact_local(kind, &self.local_moments())?;
        Ok(())
    }

    fn compute_boundary_interactions(
        &mut self,
        kind: GsolveType,
        kernel: &dyn InteractionKernel,
        dir: Direction,
        is_monopole: bool,
        data: &NeighborGravity,
    ) -> Result<()> {
        debug_assert_eq!(is_monopole, data.is_monopole);
        let boundary = kernel.interact_boundary(kind, &self.local_moments(), dir, data)?;
        self.interactions.accumulate(&boundary);
        Ok(())
    }

    fn compute_all_interactions(
        &mut self,
        kind: GsolveType,
        kernel: &dyn InteractionKernel,
        neighbors: &[NeighborGravity; NDIR27],
    ) -> Result<()> {
        self.interactions = kernel.interact(kind, &self.local_moments(), neighbors)?;
        Ok(())
    }

    fn compute_expansions(&mut self, kind: GsolveType, parent: Option<&ExpansionPass>) {
        let mut interactions = std::mem::take(&mut self.interactions);
        if interactions.expansions.len() != INX3 {
            interactions = Interactions::zero(kind);
        }
        self.expansions = interactions.expansions;
        self.angular_corrections = match kind {
            GsolveType::Rho if interactions.angular_corrections.len() == INX3 => {
                interactions.angular_corrections
            }
            GsolveType::Rho => vec![[0.0; 3]; INX3],
            GsolveType::NonRho => Vec::new(),
        };

        if let Some(parent) = parent {
            for (i, j, k) in iproduct!(0..INX, 0..INX, 0..INX) {
                let n = flat_index([i, j, k], INX);
                let c = flat_index([i / 2, j / 2, k / 2], INX_HALF);
                let coarse = [i / 2, j / 2, k / 2];
                let parent_centre: SpaceVector = std::array::from_fn(|dim| {
                    self.x0[dim] + (2 * coarse[dim] + 1) as f64 * self.dx
                });
                let d = sub(self.cell_centre([i, j, k]), parent_centre);
                self.expansions[n] += parent.expansions[c].shift(d);
                if let (Some(angular), Some(incoming)) = (
                    self.angular_corrections.get_mut(n),
                    parent.angular_corrections.get(c),
                ) {
                    for dim in 0..NDIM {
                        angular[dim] += incoming[dim];
                    }
                }
            }
        }

        for (i, j, k) in iproduct!(0..INX, 0..INX, 0..INX) {
            let index = [i + H_BW, j + H_BW, k + H_BW];
            let phi = self.expansions[flat_index([i, j, k], INX)].phi;
            let rho = self.hydro(RHO_I, index);
            *self.hydro_mut(POT_I, index) = rho * phi;
        }
    }

    fn get_expansion_block(&self, kind: GsolveType, octant: Octant) -> ExpansionPass {
        ExpansionPass {
            expansions: octant_split(&self.expansions, octant),
            angular_corrections: match kind {
                GsolveType::Rho if self.angular_corrections.len() == INX3 => {
                    octant_split(&self.angular_corrections, octant)
                }
                _ => Vec::new(),
            },
        }
    }

    fn egas_to_etot(&mut self) {
        for (i, j, k) in iproduct!(0..INX, 0..INX, 0..INX) {
            let index = [i + H_BW, j + H_BW, k + H_BW];
            let pot = self.hydro(POT_I, index);
            *self.hydro_mut(EGAS_I, index) += 0.5 * pot;
        }
    }

    fn etot_to_egas(&mut self) {
        for (i, j, k) in iproduct!(0..INX, 0..INX, 0..INX) {
            let index = [i + H_BW, j + H_BW, k + H_BW];
            let pot = self.hydro(POT_I, index);
            *self.hydro_mut(EGAS_I, index) -= 0.5 * pot;
        }
    }

    fn max_density(&self) -> f64 {
        iproduct!(0..INX, 0..INX, 0..INX)
            .map(|(i, j, k)| self.hydro(RHO_I, [i + H_BW, j + H_BW, k + H_BW]))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    fn conserved_total(&self, field: usize) -> f64 {
        self.interior_total(field)
    }
}

#[cfg(test)]
mod test {
    use itertools::iproduct;
    use rand::Rng;

    use super::{Grid, GridPatch};
    use crate::{
        constants::{H_BW, INX, INX_HALF, NF, RHO_I, SX_I},
        geometry::{
            face_flux_bounds, get_boundary_size, quadrant_flux_bounds, BoundaryKind, Direction,
            Face, IndexBox, Octant, PhysicalBox, Quadrant,
        },
        kernel::GsolveType,
        messages::MultipolePass,
        morton::MortonKey,
        tools::seeded_rng,
    };

    fn random_grid(location: MortonKey, seed: usize) -> Grid {
        let mut grid = Grid::new(location, &PhysicalBox::cube(1.0));
        let mut rng = seeded_rng(seed);
        for field in 0..NF {
            for index in IndexBox::new([0; 3], [INX + 2 * H_BW; 3]).iter() {
                *grid.hydro_mut(field, index) = rng.gen_range(0.5..2.0);
            }
        }
        grid
    }

    #[test]
    fn test_restriction_conserves_totals() {
        let parent_key = MortonKey::root();
        let mut parent = Grid::new(parent_key, &PhysicalBox::cube(1.0));
        let mut child_totals = [0.0; NF];
        let mut outflows = [0.0; NF];
        for octant in Octant::full_set() {
            let mut child = random_grid(parent_key.child(octant), octant.index());
            child.set_outflows([1.0; NF]);
            for (field, total) in child_totals.iter_mut().enumerate() {
                *total += child.interior_total(field);
            }
            let data = child.get_restrict();
            parent.set_restrict(&data, octant);
            for (o, d) in outflows.iter_mut().zip(&data[data.len() - NF..]) {
                *o += d;
            }
        }
        for (field, total) in child_totals.iter().enumerate() {
            assert!((parent.interior_total(field) - total).abs() < 1E-12 * total.abs());
        }
        assert_eq!(outflows, [8.0; NF]);
    }

    #[test]
    fn test_prolongation_conserves_totals() {
        let parent = random_grid(MortonKey::root(), 7);
        let domain = PhysicalBox::cube(1.0);
        let mut total = 0.0;
        for octant in Octant::full_set() {
            let child = parent.new_child(octant, MortonKey::root().child(octant), &domain);
            total += child.interior_total(RHO_I);
        }
        let expected = parent.interior_total(RHO_I);
        assert!((total - expected).abs() < 1E-12 * expected);
    }

    #[test]
    fn test_sibling_slab_lands_in_mirrored_ghosts() {
        let domain = PhysicalBox::cube(1.0);
        let a_key = MortonKey::from_index_and_level([0, 0, 0], 1);
        let b_key = MortonKey::from_index_and_level([1, 0, 0], 1);
        let mut a = Grid::new(a_key, &domain);
        let mut b = Grid::new(b_key, &domain);
        // Synthetic pattern encoding the interior index.
        for index in IndexBox::new([H_BW; 3], [H_BW + INX; 3]).iter() {
            *a.hydro_mut(SX_I, index) = (100 * index[0] + 10 * index[1] + index[2]) as f64;
        }
        let dir = Direction::from_offset([1, 0, 0]).unwrap();
        let data = a.get_hydro_boundary(dir, H_BW);
        b.set_hydro_boundary(&data, dir.flip(), H_BW);
        let outer = get_boundary_size(dir.flip(), BoundaryKind::Outer, INX, H_BW, H_BW);
        for index in outer.iter() {
            let source = [index[0] + INX, index[1], index[2]];
            let expected = (100 * source[0] + 10 * source[1] + source[2]) as f64;
            assert_eq!(b.hydro(SX_I, index), expected);
        }

        // And back again.
        let back = b.get_hydro_boundary(dir.flip(), H_BW);
        a.set_hydro_boundary(&back, dir, H_BW);
        let outer = get_boundary_size(dir, BoundaryKind::Outer, INX, H_BW, H_BW);
        assert_eq!(outer.lb[0], H_BW + INX);
    }

    #[test]
    fn test_flux_restrict_matches_quadrant() {
        let domain = PhysicalBox::cube(1.0);
        let niece_key = MortonKey::from_index_and_level([2, 1, 0], 2);
        let mut niece = Grid::new(niece_key, &domain);
        let face = Face::new(0, crate::geometry::Side::Minus);
        for index in face_flux_bounds(face).iter() {
            *niece.flux_mut(0, RHO_I, index) = (index[1] + index[2]) as f64;
        }
        let data = niece.get_flux_restrict(face_flux_bounds(face), 0);
        assert_eq!(data.len(), NF * INX_HALF * INX_HALF);

        let mut aunt = Grid::new(MortonKey::from_index_and_level([0, 0, 0], 1), &domain);
        let quadrant = Quadrant::from_index(1);
        let bounds = quadrant_flux_bounds(face.flip(), quadrant);
        aunt.set_flux_restrict(&data, bounds, 0);
        for (a, b) in iproduct!(0..INX_HALF, 0..INX_HALF) {
            let coarse = [INX, INX_HALF * quadrant.get_side(0) + a, INX_HALF * quadrant.get_side(1) + b];
            // Average of 2a+{0,1} + 2b+{0,1}.
            let expected = (2 * a + 2 * b + 1) as f64;
            assert_eq!(aunt.flux(0, RHO_I, coarse), expected);
        }
    }

    #[test]
    fn test_physical_boundary_copies_edge_cells() {
        let mut grid = random_grid(MortonKey::root(), 3);
        for face in Face::full_set() {
            grid.set_physical_boundaries(face, 0.0);
        }
        for (i, j) in iproduct!(0..INX + 2 * H_BW, 0..INX + 2 * H_BW) {
            for ghost in 0..H_BW {
                let clamp = |v: usize| v.clamp(H_BW, H_BW + INX - 1);
                let edge = grid.hydro(RHO_I, [clamp(i), clamp(j), H_BW]);
                assert_eq!(grid.hydro(RHO_I, [clamp(i), clamp(j), ghost]), edge);
            }
        }
    }

    #[test]
    fn test_leaf_moments_hold_the_mass() {
        let mut grid = Grid::new(MortonKey::root(), &PhysicalBox::cube(1.0));
        grid.set_problem(&|_| {
            let mut values = [0.0; NF];
            values[RHO_I] = 1.0;
            values
        });
        let pass = grid.compute_multipoles(GsolveType::Rho, None);
        let mass: f64 = pass.moments.iter().map(|m| m.mass).sum();
        assert!((mass - 8.0).abs() < 1E-12);

        // A refined patch assembles the blocks of its children.
        let mut parent = Grid::new(MortonKey::root(), &PhysicalBox::cube(1.0));
        let blocks: Vec<MultipolePass> = (0..8).map(|_| pass.clone()).collect();
        let coarse = parent.compute_multipoles(GsolveType::Rho, Some(&blocks));
        let total: f64 = coarse.moments.iter().map(|m| m.mass).sum();
        assert!((total - 64.0).abs() < 1E-10);
        assert!(!parent.get_gravity_boundary(Direction::full_set()[0]).is_monopole);
        assert!(grid.get_gravity_boundary(Direction::full_set()[0]).is_monopole);
    }
}
