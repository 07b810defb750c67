//! Routines for working with Morton indices.
//!
//! A [MortonKey] is the tree location of a node: its level and the anchor of its box
//! on that level, interleaved into a single integer so that sorting keys gives a
//! pre-order traversal of the tree.

use crate::constants::{
    DEEPEST_LEVEL, INX, LEVEL_DISPLACEMENT, LEVEL_MASK, LEVEL_SIZE, NDIM,
};
use crate::geometry::{Direction, Face, Octant, Side};

/// Interleave the bits of an anchor given on `level` into a Morton key.
pub fn encode_morton(index: [u64; 3], level: u64) -> u64 {
    assert!(level <= DEEPEST_LEVEL);

    // If we are not on the deepest level we need to shift the box.
    // The box with x-index one on DEEPEST_LEVEL-1 has index two on
    // DEEPEST_LEVEL.

    let level_diff = DEEPEST_LEVEL - level;

    let x = index[0] << level_diff;
    let y = index[1] << level_diff;
    let z = index[2] << level_diff;

    let mut key: u64 = 0;
    for bit in 0..DEEPEST_LEVEL {
        key |= ((x >> bit) & 1) << (3 * bit);
        key |= ((y >> bit) & 1) << (3 * bit + 1);
        key |= ((z >> bit) & 1) << (3 * bit + 2);
    }

    let key = key << LEVEL_DISPLACEMENT;
    key | level
}

/// Return the anchor of a Morton key on the deepest level.
pub fn decode_key(morton: u64) -> [u64; 3] {
    let key = morton >> LEVEL_DISPLACEMENT;

    let mut coords = [0_u64; 3];
    for bit in 0..DEEPEST_LEVEL {
        for (dim, coord) in coords.iter_mut().enumerate() {
            *coord |= ((key >> (3 * bit + dim as u64)) & 1) << bit;
        }
    }

    coords
}

/// Location of a box in the tree.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MortonKey {
    key: u64,
}

impl MortonKey {
    /// The root of the tree.
    pub fn root() -> Self {
        Self { key: 0 }
    }

    /// Key of the box with the given anchor on `level`.
    pub fn from_index_and_level(index: [u64; 3], level: usize) -> Self {
        let level = level as u64;
        assert!(level <= DEEPEST_LEVEL);
        let boxes = 1 << level;
        assert!(index.iter().all(|&i| i < boxes));
        Self {
            key: encode_morton(index, level),
        }
    }

    /// The raw key value.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Level of the box. The root is on level 0.
    pub fn level(&self) -> usize {
        (self.key & LEVEL_MASK) as usize
    }

    /// Anchor of the box on its own level.
    pub fn anchor(&self) -> [u64; 3] {
        let level_diff = DEEPEST_LEVEL - self.level() as u64;
        decode_key(self.key).map(|coord| coord >> level_diff)
    }

    /// Global index of the first interior cell of the box on the box's level.
    pub fn cell_origin(&self) -> [i64; 3] {
        self.anchor().map(|a| (a as usize * INX) as i64)
    }

    /// The parent of the box. The root is its own parent.
    pub fn parent(&self) -> Self {
        let level = self.level();
        if level == 0 {
            return *self;
        }
        let anchor = self.anchor().map(|a| a >> 1);
        Self::from_index_and_level(anchor, level - 1)
    }

    /// The child of the box in `octant`.
    pub fn child(&self, octant: Octant) -> Self {
        let level = self.level();
        assert!((level as u64) < DEEPEST_LEVEL);
        let anchor = self.anchor();
        let mut child = [0; 3];
        for dim in 0..NDIM {
            child[dim] = 2 * anchor[dim] + octant.get_side(dim) as u64;
        }
        Self::from_index_and_level(child, level + 1)
    }

    /// All eight children in octant order.
    pub fn children(&self) -> [MortonKey; 8] {
        Octant::full_set().map(|octant| self.child(octant))
    }

    /// Position of the box inside its parent.
    pub fn child_index(&self) -> Octant {
        let anchor = self.anchor();
        let side = |dim: usize| {
            if anchor[dim] & 1 == 0 {
                Side::Minus
            } else {
                Side::Plus
            }
        };
        Octant::from_sides([side(0), side(1), side(2)])
    }

    /// True if `self` is a strict ancestor of `other`.
    pub fn is_ancestor(&self, other: MortonKey) -> bool {
        let mut key = other;
        while key.level() > self.level() {
            key = key.parent();
        }
        key == *self && other.level() > self.level()
    }

    /// Same level neighbour in `dir`, or `None` if it lies outside of the domain.
    pub fn neighbor(&self, dir: Direction) -> Option<Self> {
        let level = self.level();
        let boxes = 1_i64 << level;
        let anchor = self.anchor();
        let offset = dir.offset();
        let mut index = [0; 3];
        for dim in 0..NDIM {
            let value = anchor[dim] as i64 + offset[dim];
            if !(0..boxes).contains(&value) {
                return None;
            }
            index[dim] = value as u64;
        }
        Some(Self::from_index_and_level(index, level))
    }

    /// All valid same level neighbours in direction order.
    pub fn neighbors(&self) -> Vec<(Direction, MortonKey)> {
        Direction::full_set()
            .into_iter()
            .filter_map(|dir| self.neighbor(dir).map(|key| (dir, key)))
            .collect()
    }

    /// True if `face` of the box lies on the boundary of the domain.
    pub fn is_physical_boundary(&self, face: Face) -> bool {
        let anchor = self.anchor()[face.get_dimension()];
        match face.get_side() {
            Side::Minus => anchor == 0,
            Side::Plus => anchor + 1 == 1 << self.level(),
        }
    }

    /// Lower corner of the box along `dim` in the reference cube `[0, 1]^3`.
    pub fn x_location(&self, dim: usize) -> f64 {
        let level_diff = DEEPEST_LEVEL - self.level() as u64;
        ((self.anchor()[dim] << level_diff) as f64) / LEVEL_SIZE as f64
    }

    /// Edge length of the box in the reference cube.
    pub fn reference_diameter(&self) -> f64 {
        1.0 / (1_u64 << self.level()) as f64
    }
}

impl std::fmt::Display for MortonKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [x, y, z] = self.anchor();
        write!(f, "(level: {}, anchor: [{}, {}, {}])", self.level(), x, y, z)
    }
}
