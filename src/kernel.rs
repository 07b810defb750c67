//! Interaction kernels of the gravity pass.
//!
//! The node only decides *which* moments meet. The numbers come from an
//! [InteractionKernel]. [MonopoleKernel] is a direct reference implementation,
//! [NullKernel] produces a vanishing field.

use serde::Deserialize;

use crate::{
    constants::{INX, INX3, NDIM, NDIR27},
    error::{Error, Result},
    geometry::{flat_index, Direction, IndexBox},
    messages::NeighborGravity,
    moments::{sub, Expansion, Multipole, SpaceVector},
};

/// Which quantities the gravity pass solves for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GsolveType {
    /// Potential and forces together with angular momentum corrections.
    #[default]
    Rho,
    /// Potential and forces only.
    NonRho,
}

/// Moments of the cells of one node together with their placement in the tree.
#[derive(Copy, Clone, Debug)]
pub struct LocalMoments<'a> {
    /// Global index of the first interior cell on the level of the node.
    pub origin: [i64; 3],
    /// Level of the node.
    pub level: usize,
    /// True if the node has no children.
    pub is_leaf: bool,
    /// Physical position of the lower interior corner.
    pub x0: SpaceVector,
    /// Cell width.
    pub dx: f64,
    /// Moments of the `INX^3` cells.
    pub moments: &'a [Multipole],
    /// Centres of mass of the `INX^3` cells.
    pub centres: &'a [SpaceVector],
}

impl LocalMoments<'_> {
    /// Geometric centre of interior cell `index`.
    pub fn cell_centre(&self, index: [usize; 3]) -> SpaceVector {
        std::array::from_fn(|dim| self.x0[dim] + (index[dim] as f64 + 0.5) * self.dx)
    }

    fn global(&self, index: [usize; 3]) -> [i64; 3] {
        std::array::from_fn(|dim| self.origin[dim] + index[dim] as i64)
    }
}

/// Output of a kernel, one entry per interior cell.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Interactions {
    /// Expansions about the cell centres.
    pub expansions: Vec<Expansion>,
    /// Angular momentum corrections. Empty for [GsolveType::NonRho].
    pub angular_corrections: Vec<SpaceVector>,
}

impl Interactions {
    /// Vanishing interactions of the right shape for `kind`.
    pub fn zero(kind: GsolveType) -> Self {
        Self {
            expansions: vec![Expansion::default(); INX3],
            angular_corrections: match kind {
                GsolveType::Rho => vec![[0.0; 3]; INX3],
                GsolveType::NonRho => Vec::new(),
            },
        }
    }

    /// Add `other` cell by cell.
    pub fn accumulate(&mut self, other: &Interactions) {
        for (e, o) in self.expansions.iter_mut().zip(&other.expansions) {
            *e += *o;
        }
        for (a, o) in self
            .angular_corrections
            .iter_mut()
            .zip(&other.angular_corrections)
        {
            for dim in 0..NDIM {
                a[dim] += o[dim];
            }
        }
    }

    /// Fail with [Error::Kernel] if any entry is not finite.
    pub fn check_finite(&self) -> Result<()> {
        if let Some(index) = self.expansions.iter().position(|e| !e.is_finite()) {
            return Err(Error::Kernel(format!(
                "non-finite expansion at cell {}",
                index
            )));
        }
        if self
            .angular_corrections
            .iter()
            .flatten()
            .any(|v| !v.is_finite())
        {
            return Err(Error::Kernel("non-finite angular correction".to_string()));
        }
        Ok(())
    }
}

/// Numeric collaborator evaluating cell to cell interactions.
pub trait InteractionKernel {
    /// Interactions among the cells of the node itself.
    fn interact_local(&self, kind: GsolveType, local: &LocalMoments<'_>) -> Result<Interactions>;

    /// Interactions of the node cells with the boundary cells of the neighbour in `dir`.
    fn interact_boundary(
        &self,
        kind: GsolveType,
        local: &LocalMoments<'_>,
        dir: Direction,
        source: &NeighborGravity,
    ) -> Result<Interactions>;

    /// All interactions of a node given the uniform 27 slot neighbour array.
    ///
    /// Slot 13 is the node itself. Every other slot is evaluated, empty or not.
    fn interact(
        &self,
        kind: GsolveType,
        local: &LocalMoments<'_>,
        neighbors: &[NeighborGravity; NDIR27],
    ) -> Result<Interactions> {
        let mut result = self.interact_local(kind, local)?;
        for dir in Direction::full_set() {
            let boundary = self.interact_boundary(kind, local, dir, &neighbors[dir.index27()])?;
            result.accumulate(&boundary);
        }
        Ok(result)
    }
}

/// A kernel that produces no field.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullKernel;

impl InteractionKernel for NullKernel {
    fn interact_local(&self, kind: GsolveType, _local: &LocalMoments<'_>) -> Result<Interactions> {
        Ok(Interactions::zero(kind))
    }

    fn interact_boundary(
        &self,
        kind: GsolveType,
        _local: &LocalMoments<'_>,
        _dir: Direction,
        _source: &NeighborGravity,
    ) -> Result<Interactions> {
        Ok(Interactions::zero(kind))
    }
}

/// Direct evaluation of monopole and quadrupole interactions on the cell lists of a node.
///
/// A pair of cells on the same level is evaluated here if the cells are separated but
/// their parents are adjacent. Adjacent pairs are evaluated if one side is a leaf, since
/// no finer level will see them. Everything else is left to the parent expansion.
#[derive(Copy, Clone, Debug)]
pub struct MonopoleKernel {
    g: f64,
}

impl MonopoleKernel {
    /// Kernel with gravitational constant `g`.
    pub fn new(g: f64) -> Self {
        Self { g }
    }

    /// The gravitational constant.
    pub fn g(&self) -> f64 {
        self.g
    }

    fn chebyshev(a: [i64; 3], b: [i64; 3]) -> i64 {
        (0..NDIM).map(|d| (a[d] - b[d]).abs()).max().unwrap_or(0)
    }

    fn admissible(target: [i64; 3], source: [i64; 3], level: usize, near_ok: bool) -> bool {
        let d = Self::chebyshev(target, source);
        if d == 0 {
            return false;
        }
        if d <= 1 {
            return near_ok;
        }
        if level == 0 {
            return true;
        }
        let parent = |g: [i64; 3]| g.map(|v| v.div_euclid(2));
        Self::chebyshev(parent(target), parent(source)) <= 1
    }

    fn evaluate(&self, multipole: &Multipole, r: SpaceVector, is_monopole: bool) -> Option<Expansion> {
        let r2 = r[0] * r[0] + r[1] * r[1] + r[2] * r[2];
        if r2 == 0.0 || multipole.mass == 0.0 {
            return None;
        }
        let phi = if is_monopole {
            Multipole::monopole(multipole.mass).potential(r)
        } else {
            multipole.potential(r)
        };
        let grad = multipole.gradient(r);
        Some(Expansion {
            phi: self.g * phi,
            grad: grad.map(|g| self.g * g),
        })
    }

    fn interior() -> IndexBox {
        IndexBox::new([0; 3], [INX; 3])
    }
}

impl InteractionKernel for MonopoleKernel {
    fn interact_local(&self, kind: GsolveType, local: &LocalMoments<'_>) -> Result<Interactions> {
        let mut result = Interactions::zero(kind);
        for target in Self::interior().iter() {
            let t = flat_index(target, INX);
            let x = local.cell_centre(target);
            let global = local.global(target);
            for source in Self::interior().iter() {
                if !Self::admissible(global, local.global(source), local.level, local.is_leaf) {
                    continue;
                }
                let s = flat_index(source, INX);
                let r = sub(x, local.centres[s]);
                if let Some(e) = self.evaluate(&local.moments[s], r, local.is_leaf) {
                    result.expansions[t] += e;
                }
            }
        }
        result.check_finite()?;
        Ok(result)
    }

    fn interact_boundary(
        &self,
        kind: GsolveType,
        local: &LocalMoments<'_>,
        dir: Direction,
        source: &NeighborGravity,
    ) -> Result<Interactions> {
        let mut result = Interactions::zero(kind);
        let offset = dir.offset();
        let near_ok = local.is_leaf || source.is_monopole;
        for target in Self::interior().iter() {
            let t = flat_index(target, INX);
            let x = local.cell_centre(target);
            let global = local.global(target);
            for ((cell, moment), centre) in source.cells.iter().zip(&source.moments).zip(&source.centres) {
                let source_global: [i64; 3] = std::array::from_fn(|dim| {
                    local.origin[dim] + offset[dim] * INX as i64 + cell[dim] as i64
                });
                if !Self::admissible(global, source_global, local.level, near_ok) {
                    continue;
                }
                if let Some(e) = self.evaluate(moment, sub(x, *centre), source.is_monopole) {
                    result.expansions[t] += e;
                }
            }
        }
        result.check_finite()?;
        Ok(result)
    }
}
