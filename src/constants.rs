//! Crate wide constants.

/// Number of spatial dimensions.
pub const NDIM: usize = 3;

/// Index of the x dimension.
pub const XDIM: usize = 0;

/// Index of the y dimension.
pub const YDIM: usize = 1;

/// Index of the z dimension.
pub const ZDIM: usize = 2;

/// Number of interior cells of a grid patch along each dimension.
///
/// Must be even, since a child covers exactly half of its parent along every axis.
pub const INX: usize = 8;

/// Interior cells of a child block along each dimension, measured at parent resolution.
pub const INX_HALF: usize = INX / 2;

/// Number of interior cells of a grid patch.
pub const INX3: usize = INX * INX * INX;

/// Number of cells of a child sized block at parent resolution.
pub const INX3_CHILD: usize = INX3 / NCHILD;

/// Width of the hydro ghost layer.
pub const H_BW: usize = 3;

/// Padded hydro extent along each dimension.
pub const H_NX: usize = INX + 2 * H_BW;

/// Number of padded hydro cells.
pub const H_N3: usize = H_NX * H_NX * H_NX;

/// Width of the slab of cells exchanged with same level neighbours during the gravity pass.
///
/// Two cells cover every pair that is near at the parent level but separated at the own level.
pub const G_BW: usize = 2;

/// Number of hydro fields.
pub const NF: usize = 7;

/// Mass density.
pub const RHO_I: usize = 0;

/// Total gas energy density.
pub const EGAS_I: usize = 1;

/// Entropy tracer.
pub const TAU_I: usize = 2;

/// Gravitational energy density.
pub const POT_I: usize = 3;

/// Momentum density in x.
pub const SX_I: usize = 4;

/// Momentum density in y.
pub const SY_I: usize = 5;

/// Momentum density in z.
pub const SZ_I: usize = 6;

/// Number of children of a refined node.
pub const NCHILD: usize = 8;

/// Number of neighbour directions (the 3x3x3 stencil without its centre).
pub const NDIR: usize = 26;

/// Number of slots of the uniform gravity neighbour array (includes the centre).
pub const NDIR27: usize = 27;

/// Number of faces of a cube.
pub const NFACE: usize = 6;

/// Number of quadrants of a face.
pub const NQUADRANT: usize = 4;

/// Deepest possible level of the tree.
pub const DEEPEST_LEVEL: u64 = 16;

/// Number of boxes along each dimension on the deepest level.
pub const LEVEL_SIZE: u64 = 1 << DEEPEST_LEVEL;

/// Number of low bits of a Morton key that store the level.
pub const LEVEL_DISPLACEMENT: u64 = 15;

/// Mask to extract the level from a Morton key.
pub const LEVEL_MASK: u64 = (1 << LEVEL_DISPLACEMENT) - 1;
