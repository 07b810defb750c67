//! Geometry information
//!
//! Enumerations of the 26 neighbour directions, 8 child octants, 6 faces and
//! 4 face quadrants, together with the index regions they address on a grid patch.

use itertools::iproduct;

use crate::constants::{INX, INX_HALF, NDIM, NDIR, NFACE, NQUADRANT, XDIM, YDIM, ZDIM};

/// A bounding box describes the physical domain in which the octree lives.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhysicalBox {
    coords: [f64; 6],
}

impl PhysicalBox {
    /// Create a new bounding box.
    ///
    /// The coordinates are given by `[xmin, ymin, zmin, xmax, ymax, zmax]`.
    pub fn new(coords: [f64; 6]) -> Self {
        Self { coords }
    }

    /// The cube `[-xscale, xscale]^3`.
    pub fn cube(xscale: f64) -> Self {
        assert!(xscale > 0.0);
        Self::new([-xscale, -xscale, -xscale, xscale, xscale, xscale])
    }

    /// Return coordinates
    pub fn coordinates(&self) -> [f64; 6] {
        self.coords
    }

    /// Edge lengths of the box.
    pub fn diameter(&self) -> [f64; 3] {
        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.coords;
        [xmax - xmin, ymax - ymin, zmax - zmin]
    }

    /// Map a point from the reference box [0, 1]^3 to the bounding box.
    pub fn reference_to_physical(&self, point: [f64; 3]) -> [f64; 3] {
        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.coords;

        [
            xmin + (xmax - xmin) * point[0],
            ymin + (ymax - ymin) * point[1],
            zmin + (zmax - zmin) * point[2],
        ]
    }

    /// Map a point from the physical domain to the reference box.
    pub fn physical_to_reference(&self, point: [f64; 3]) -> [f64; 3] {
        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.coords;

        [
            (point[0] - xmin) / (xmax - xmin),
            (point[1] - ymin) / (ymax - ymin),
            (point[2] - zmin) / (zmax - zmin),
        ]
    }
}

impl std::fmt::Display for PhysicalBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.coords;

        write!(
            f,
            "(xmin: {}, ymin: {}, zmin: {}, xmax: {}, ymax: {}, zmax: {})",
            xmin, ymin, zmin, xmax, ymax, zmax
        )
    }
}

/// Lower or upper side along a dimension.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Side {
    /// The lower side.
    Minus,
    /// The upper side.
    Plus,
}

impl Side {
    /// 0 for [Side::Minus], 1 for [Side::Plus].
    pub fn index(self) -> usize {
        match self {
            Side::Minus => 0,
            Side::Plus => 1,
        }
    }

    /// The opposite side.
    pub fn flip(self) -> Self {
        match self {
            Side::Minus => Side::Plus,
            Side::Plus => Side::Minus,
        }
    }
}

/// One of the 26 directions pointing from a box to its same level neighbours.
///
/// A direction is stored by its position in the 3x3x3 stencil with the x offset
/// varying fastest. The centre of the stencil is not a direction.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Direction(u8);

impl Direction {
    /// Number of directions.
    pub const fn count() -> usize {
        NDIR
    }

    /// All directions in index order.
    pub fn full_set() -> [Direction; NDIR] {
        std::array::from_fn(|index| Direction(index as u8))
    }

    /// Direction from its index in `0..26`.
    pub fn from_index(index: usize) -> Self {
        assert!(index < NDIR);
        Direction(index as u8)
    }

    /// Direction from an offset with entries in `{-1, 0, 1}`. Returns `None` for the zero offset.
    pub fn from_offset(offset: [i64; 3]) -> Option<Self> {
        if offset.iter().any(|o| !(-1..=1).contains(o)) {
            return None;
        }
        let index27 = (offset[0] + 1) + 3 * (offset[1] + 1) + 9 * (offset[2] + 1);
        if index27 == 13 {
            None
        } else {
            Some(Direction::from_index27(index27 as usize))
        }
    }

    fn from_index27(index27: usize) -> Self {
        assert!(index27 < 27 && index27 != 13);
        if index27 < 13 {
            Direction(index27 as u8)
        } else {
            Direction((index27 - 1) as u8)
        }
    }

    /// Index in `0..26`.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Position in the 3x3x3 stencil, `0..27`, where 13 is the centre.
    pub fn index27(self) -> usize {
        let index = self.0 as usize;
        if index < 13 {
            index
        } else {
            index + 1
        }
    }

    /// Offset of the neighbour in units of boxes.
    pub fn offset(self) -> [i64; 3] {
        let index27 = self.index27() as i64;
        [index27 % 3 - 1, (index27 / 3) % 3 - 1, index27 / 9 - 1]
    }

    /// The mirrored direction, pointing back from the neighbour.
    pub fn flip(self) -> Self {
        Direction::from_index27(26 - self.index27())
    }

    /// Number of non-zero offset components (1 for faces, 2 for edges, 3 for vertices).
    pub fn order(self) -> usize {
        self.offset().iter().filter(|&&o| o != 0).count()
    }

    /// True if the direction crosses a face.
    pub fn is_face(self) -> bool {
        self.order() == 1
    }

    /// True if the direction points to a vertex.
    pub fn is_vertex(self) -> bool {
        self.order() == 3
    }

    /// The face crossed by a face direction.
    pub fn to_face(self) -> Option<Face> {
        if !self.is_face() {
            return None;
        }
        let offset = self.offset();
        let dim = offset.iter().position(|&o| o != 0)?;
        let side = if offset[dim] < 0 {
            Side::Minus
        } else {
            Side::Plus
        };
        Some(Face::new(dim, side))
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [x, y, z] = self.offset();
        write!(f, "({:+}, {:+}, {:+})", x, y, z)
    }
}

/// One of the 8 children of a box.
///
/// Bit `d` of the index is the side of the child along dimension `d`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Octant(u8);

impl Octant {
    /// Number of octants.
    pub const fn count() -> usize {
        8
    }

    /// All octants in index order.
    pub fn full_set() -> [Octant; 8] {
        std::array::from_fn(|index| Octant(index as u8))
    }

    /// Octant from its index in `0..8`.
    pub fn from_index(index: usize) -> Self {
        assert!(index < 8);
        Octant(index as u8)
    }

    /// Octant from the sides along each dimension.
    pub fn from_sides(sides: [Side; 3]) -> Self {
        Octant((sides[0].index() | sides[1].index() << 1 | sides[2].index() << 2) as u8)
    }

    /// Index in `0..8`.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Side of the octant along `dim`, as 0 or 1.
    pub fn get_side(self, dim: usize) -> usize {
        assert!(dim < NDIM);
        ((self.0 >> dim) & 1) as usize
    }

    /// Corner of the unit cube this octant is anchored at.
    pub fn corner(self) -> [usize; 3] {
        [self.get_side(XDIM), self.get_side(YDIM), self.get_side(ZDIM)]
    }

    /// Offset of this octant's block inside a parent sized `INX^3` array.
    pub fn offset(self) -> [usize; 3] {
        let [x, y, z] = self.corner();
        [x * INX_HALF, y * INX_HALF, z * INX_HALF]
    }
}

/// One of the 6 faces of a box.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Face(u8);

impl Face {
    /// Number of faces.
    pub const fn count() -> usize {
        NFACE
    }

    /// All faces in index order: x-, x+, y-, y+, z-, z+.
    pub fn full_set() -> [Face; NFACE] {
        std::array::from_fn(|index| Face(index as u8))
    }

    /// Face normal to `dim` on `side`.
    pub fn new(dim: usize, side: Side) -> Self {
        assert!(dim < NDIM);
        Face((2 * dim + side.index()) as u8)
    }

    /// Index in `0..6`.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The dimension normal to the face.
    pub fn get_dimension(self) -> usize {
        (self.0 / 2) as usize
    }

    /// The side of the face.
    pub fn get_side(self) -> Side {
        if self.0 % 2 == 0 {
            Side::Minus
        } else {
            Side::Plus
        }
    }

    /// The opposite face.
    pub fn flip(self) -> Self {
        Face(self.0 ^ 1)
    }

    /// The direction crossing this face.
    pub fn to_direction(self) -> Direction {
        let stride = [1, 3, 9][self.get_dimension()];
        match self.get_side() {
            Side::Minus => Direction::from_index27(13 - stride),
            Side::Plus => Direction::from_index27(13 + stride),
        }
    }

    /// The two dimensions tangential to the face, in increasing order.
    pub fn tangential_dimensions(self) -> [usize; 2] {
        match self.get_dimension() {
            XDIM => [YDIM, ZDIM],
            YDIM => [XDIM, ZDIM],
            _ => [XDIM, YDIM],
        }
    }
}

/// One of the 4 quadrants of a face.
///
/// Bit `t` of the index is the side along the `t`-th tangential dimension of the face.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Quadrant(u8);

impl Quadrant {
    /// Number of quadrants.
    pub const fn count() -> usize {
        NQUADRANT
    }

    /// All quadrants in index order.
    pub fn full_set() -> [Quadrant; NQUADRANT] {
        std::array::from_fn(|index| Quadrant(index as u8))
    }

    /// Quadrant from its index in `0..4`.
    pub fn from_index(index: usize) -> Self {
        assert!(index < NQUADRANT);
        Quadrant(index as u8)
    }

    /// Index in `0..4`.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Side along the `t`-th tangential dimension, as 0 or 1.
    pub fn get_side(self, t: usize) -> usize {
        assert!(t < 2);
        ((self.0 >> t) & 1) as usize
    }
}

/// Quadrant of a face normal to `dim` that is covered by child `ci`.
pub fn child_index_to_quadrant_index(ci: Octant, dim: usize) -> Quadrant {
    let ci = ci.index();
    let index = match dim {
        XDIM => ci >> 1,
        ZDIM => ci & 0x3,
        _ => (ci & 1) | ((ci >> 1) & 0x2),
    };
    Quadrant::from_index(index)
}

/// Half open index region `[lb, ub)` on a grid.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct IndexBox {
    /// Lower bounds (inclusive).
    pub lb: [usize; 3],
    /// Upper bounds (exclusive).
    pub ub: [usize; 3],
}

impl IndexBox {
    /// New region.
    pub fn new(lb: [usize; 3], ub: [usize; 3]) -> Self {
        debug_assert!((0..NDIM).all(|d| lb[d] <= ub[d]));
        Self { lb, ub }
    }

    /// Extent along each dimension.
    pub fn shape(&self) -> [usize; 3] {
        [
            self.ub[0] - self.lb[0],
            self.ub[1] - self.lb[1],
            self.ub[2] - self.lb[2],
        ]
    }

    /// Number of cells in the region.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    /// True if the region holds no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate the region with x outermost and z innermost.
    pub fn iter(&self) -> impl Iterator<Item = [usize; 3]> {
        let [lx, ly, lz] = self.lb;
        let [ux, uy, uz] = self.ub;
        iproduct!(lx..ux, ly..uy, lz..uz).map(|(i, j, k)| [i, j, k])
    }

    /// Shift the region by a signed offset.
    pub fn shifted(&self, offset: [i64; 3]) -> Self {
        let shift = |v: usize, d: usize| (v as i64 + offset[d]) as usize;
        Self::new(
            [shift(self.lb[0], 0), shift(self.lb[1], 1), shift(self.lb[2], 2)],
            [shift(self.ub[0], 0), shift(self.ub[1], 1), shift(self.ub[2], 2)],
        )
    }
}

/// Whether a boundary region lies inside the interior or in the ghost layer.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BoundaryKind {
    /// Interior cells next to the boundary, the data a neighbour needs.
    Inner,
    /// Ghost cells beyond the boundary, filled from a neighbour.
    Outer,
}

/// Region addressed by a direction on a grid with `nx` interior cells padded by `bw` ghost cells.
///
/// Indices are padded, so the interior is `[bw, bw + nx)` along each dimension.
/// For [BoundaryKind::Outer] the ghost width `bw` must be at least `width`.
pub fn get_boundary_size(
    dir: Direction,
    kind: BoundaryKind,
    nx: usize,
    bw: usize,
    width: usize,
) -> IndexBox {
    assert!(width <= nx);
    assert!(kind == BoundaryKind::Inner || width <= bw);
    let mut lb = [0; 3];
    let mut ub = [0; 3];
    for (dim, &o) in dir.offset().iter().enumerate() {
        (lb[dim], ub[dim]) = match (o, kind) {
            (-1, BoundaryKind::Outer) => (bw - width, bw),
            (-1, BoundaryKind::Inner) => (bw, bw + width),
            (1, BoundaryKind::Outer) => (bw + nx, bw + nx + width),
            (1, BoundaryKind::Inner) => (bw + nx - width, bw + nx),
            _ => (bw, bw + nx),
        };
    }
    IndexBox::new(lb, ub)
}

/// Flux plane of a face at full resolution, in the face index space of dimension `face.get_dimension()`.
pub fn face_flux_bounds(face: Face) -> IndexBox {
    let dim = face.get_dimension();
    let mut lb = [0; 3];
    let mut ub = [INX; 3];
    lb[dim] = match face.get_side() {
        Side::Minus => 0,
        Side::Plus => INX,
    };
    ub[dim] = lb[dim] + 1;
    IndexBox::new(lb, ub)
}

/// Quarter of a face flux plane covered by the niece in `quadrant`.
pub fn quadrant_flux_bounds(face: Face, quadrant: Quadrant) -> IndexBox {
    let mut bounds = face_flux_bounds(face);
    for (t, dim) in face.tangential_dimensions().into_iter().enumerate() {
        bounds.lb[dim] = quadrant.get_side(t) * INX_HALF;
        bounds.ub[dim] = bounds.lb[dim] + INX_HALF;
    }
    bounds
}

/// Flat index of `(i, j, k)` in a C ordered array of extent `n` along each dimension.
#[inline]
pub fn flat_index(index: [usize; 3], n: usize) -> usize {
    (index[0] * n + index[1]) * n + index[2]
}

/// Copy a child sized `(INX/2)^3` block into a parent sized `INX^3` array at the octant offset.
pub fn octant_merge_into<T: Copy>(full: &mut [T], block: &[T], octant: Octant) {
    assert_eq!(full.len(), INX * INX * INX);
    assert_eq!(block.len(), INX_HALF * INX_HALF * INX_HALF);
    let [x0, y0, z0] = octant.offset();
    for (i, j, k) in iproduct!(0..INX_HALF, 0..INX_HALF, 0..INX_HALF) {
        full[flat_index([i + x0, j + y0, k + z0], INX)] = block[flat_index([i, j, k], INX_HALF)];
    }
}

/// Extract the child sized block at the octant offset of a parent sized array.
pub fn octant_split<T: Copy + Default>(full: &[T], octant: Octant) -> Vec<T> {
    assert_eq!(full.len(), INX * INX * INX);
    let [x0, y0, z0] = octant.offset();
    let mut block = vec![T::default(); INX_HALF * INX_HALF * INX_HALF];
    for (i, j, k) in iproduct!(0..INX_HALF, 0..INX_HALF, 0..INX_HALF) {
        block[flat_index([i, j, k], INX_HALF)] = full[flat_index([i + x0, j + y0, k + z0], INX)];
    }
    block
}
