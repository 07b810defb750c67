//! Multipole moments and local Taylor expansions of the gravitational potential.

use std::ops::{Add, AddAssign};

use num::traits::Zero;

/// A point or displacement in physical space.
pub type SpaceVector = [f64; 3];

/// Componentwise difference `a - b`.
#[inline]
pub fn sub(a: SpaceVector, b: SpaceVector) -> SpaceVector {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Dot product.
#[inline]
pub fn dot(a: SpaceVector, b: SpaceVector) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Index of the symmetric `(i, j)` entry in a packed `[xx, xy, xz, yy, yz, zz]` tensor.
#[inline]
pub fn sym_index(i: usize, j: usize) -> usize {
    const MAP: [[usize; 3]; 3] = [[0, 1, 2], [1, 3, 4], [2, 4, 5]];
    MAP[i][j]
}

/// Mass and second moment of a mass distribution about its centre of mass.
///
/// The dipole vanishes about the centre of mass, so it is not stored.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Multipole {
    /// Total mass.
    pub mass: f64,
    /// Packed symmetric second moment `sum m (x_i - c_i)(x_j - c_j)`.
    pub quadrupole: [f64; 6],
}

impl Multipole {
    /// A point mass.
    pub fn monopole(mass: f64) -> Self {
        Self {
            mass,
            quadrupole: [0.0; 6],
        }
    }

    /// A uniformly filled cube of edge `dx` and total `mass`.
    pub fn cube(mass: f64, dx: f64) -> Self {
        let diag = mass * dx * dx / 12.0;
        Self {
            mass,
            quadrupole: [diag, 0.0, 0.0, diag, 0.0, diag],
        }
    }

    /// The same moment expressed about a centre displaced by `-d`, i.e. `d` is the
    /// vector from the new centre to the old one.
    pub fn translate(&self, d: SpaceVector) -> Self {
        let mut quadrupole = self.quadrupole;
        for i in 0..3 {
            for j in i..3 {
                quadrupole[sym_index(i, j)] += self.mass * d[i] * d[j];
            }
        }
        Self {
            mass: self.mass,
            quadrupole,
        }
    }

    /// Potential per unit `G` at displacement `r` from the centre, truncated after the quadrupole.
    pub fn potential(&self, r: SpaceVector) -> f64 {
        let r2 = dot(r, r);
        let rinv = 1.0 / r2.sqrt();
        let r3inv = rinv / r2;
        let q = &self.quadrupole;
        let mut rqr = 0.0;
        for i in 0..3 {
            for j in 0..3 {
                rqr += r[i] * q[sym_index(i, j)] * r[j];
            }
        }
        let trace = q[0] + q[3] + q[5];
        -(self.mass * rinv + 0.5 * r3inv * (3.0 * rqr / r2 - trace))
    }

    /// Monopole part of the potential gradient per unit `G`.
    pub fn gradient(&self, r: SpaceVector) -> SpaceVector {
        let r2 = dot(r, r);
        let factor = self.mass / (r2 * r2.sqrt());
        [factor * r[0], factor * r[1], factor * r[2]]
    }
}

impl Add for Multipole {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        let mut quadrupole = self.quadrupole;
        for (q, r) in quadrupole.iter_mut().zip(rhs.quadrupole) {
            *q += r;
        }
        Self {
            mass: self.mass + rhs.mass,
            quadrupole,
        }
    }
}

impl Zero for Multipole {
    fn zero() -> Self {
        Self::default()
    }

    fn is_zero(&self) -> bool {
        self.mass == 0.0 && self.quadrupole.iter().all(|q| *q == 0.0)
    }
}

/// Merge moments with their centres into a single moment about the common centre of mass.
///
/// If the total mass vanishes the geometric mean of `centres` is used.
pub fn merge_moments(parts: &[(Multipole, SpaceVector)]) -> (Multipole, SpaceVector) {
    let mass: f64 = parts.iter().map(|(m, _)| m.mass).sum();
    let mut centre = [0.0; 3];
    for (m, c) in parts {
        let weight = if mass != 0.0 {
            m.mass / mass
        } else {
            1.0 / parts.len() as f64
        };
        for dim in 0..3 {
            centre[dim] += weight * c[dim];
        }
    }
    let merged = parts
        .iter()
        .fold(Multipole::zero(), |acc, (m, c)| acc + m.translate(sub(*c, centre)));
    (merged, centre)
}

/// First order Taylor expansion of the potential about a cell centre.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Expansion {
    /// Potential per unit mass.
    pub phi: f64,
    /// Gradient of the potential.
    pub grad: SpaceVector,
}

impl Expansion {
    /// Re-centre the expansion at displacement `d` from its current centre.
    pub fn shift(&self, d: SpaceVector) -> Self {
        Self {
            phi: self.phi + dot(self.grad, d),
            grad: self.grad,
        }
    }

    /// True if all entries are finite.
    pub fn is_finite(&self) -> bool {
        self.phi.is_finite() && self.grad.iter().all(|g| g.is_finite())
    }
}

impl Add for Expansion {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            phi: self.phi + rhs.phi,
            grad: [
                self.grad[0] + rhs.grad[0],
                self.grad[1] + rhs.grad[1],
                self.grad[2] + rhs.grad[2],
            ],
        }
    }
}

impl AddAssign for Expansion {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Zero for Expansion {
    fn zero() -> Self {
        Self::default()
    }

    fn is_zero(&self) -> bool {
        self.phi == 0.0 && self.grad.iter().all(|g| *g == 0.0)
    }
}

#[cfg(test)]
mod test {
    use super::{merge_moments, Expansion, Multipole};

    #[test]
    fn test_merge_two_point_masses() {
        let parts = [
            (Multipole::monopole(1.0), [-1.0, 0.0, 0.0]),
            (Multipole::monopole(3.0), [1.0, 0.0, 0.0]),
        ];
        let (merged, centre) = merge_moments(&parts);
        assert_eq!(merged.mass, 4.0);
        assert!((centre[0] - 0.5).abs() < 1E-14);
        // 1 * 1.5^2 + 3 * 0.5^2
        assert!((merged.quadrupole[0] - 3.0).abs() < 1E-14);
        assert_eq!(merged.quadrupole[3], 0.0);
    }

    #[test]
    fn test_far_field_matches_point_sum() {
        let parts = [
            (Multipole::monopole(2.0), [0.1, 0.0, 0.0]),
            (Multipole::monopole(1.0), [0.0, -0.2, 0.1]),
        ];
        let (merged, centre) = merge_moments(&parts);
        let target = [100.0, 50.0, -30.0];
        let direct: f64 = parts
            .iter()
            .map(|(m, c)| m.potential(super::sub(target, *c)))
            .sum();
        let approx = merged.potential(super::sub(target, centre));
        assert!((direct - approx).abs() < 1E-6 * direct.abs());
    }

    #[test]
    fn test_massless_merge_uses_geometric_centre() {
        let parts = [
            (Multipole::default(), [0.0, 0.0, 0.0]),
            (Multipole::default(), [2.0, 2.0, 2.0]),
        ];
        let (merged, centre) = merge_moments(&parts);
        assert_eq!(centre, [1.0, 1.0, 1.0]);
        assert_eq!(merged, Multipole::default());
    }

    #[test]
    fn test_expansion_shift() {
        let e = Expansion {
            phi: 1.0,
            grad: [1.0, 2.0, 3.0],
        };
        let shifted = e.shift([1.0, 1.0, -1.0]);
        assert_eq!(shifted.phi, 1.0);
        assert_eq!(shifted.grad, e.grad);
    }
}
