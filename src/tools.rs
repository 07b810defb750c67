//! Utility routines.

use itertools::izip;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    constants::{EGAS_I, NF, RHO_I, TAU_I},
    moments::SpaceVector,
    morton::MortonKey,
    simulation::InitialConditions,
};

/// Generate distinct random keys on `level` for testing.
///
/// Each coordinate is sampled without replacement, so `nkeys` may not exceed `2^level`.
pub fn generate_random_keys<R: Rng>(nkeys: usize, level: usize, rng: &mut R) -> Vec<MortonKey> {
    let size = 1usize << level;
    assert!(nkeys <= size);

    let xindices = rand::seq::index::sample(rng, size, nkeys);
    let yindices = rand::seq::index::sample(rng, size, nkeys);
    let zindices = rand::seq::index::sample(rng, size, nkeys);

    izip!(xindices.iter(), yindices.iter(), zindices.iter())
        .map(|(x, y, z)| MortonKey::from_index_and_level([x as u64, y as u64, z as u64], level))
        .collect()
}

/// A Gaussian density peak on a uniform background at rest.
///
/// Gas energy and entropy tracer are set proportional to the density.
pub fn gaussian_blob(centre: SpaceVector, width: f64, peak: f64, floor: f64) -> InitialConditions {
    assert!(width > 0.0);
    Box::new(move |x: SpaceVector| {
        let r2: f64 = x.iter().zip(&centre).map(|(a, b)| (a - b) * (a - b)).sum();
        let rho = floor + peak * (-r2 / (width * width)).exp();
        let mut values = [0.0; NF];
        values[RHO_I] = rho;
        values[EGAS_I] = rho;
        values[TAU_I] = rho.powf(0.6);
        values
    })
}

/// Superposition of `nblobs` Gaussian peaks with random centres inside `[-xscale, xscale]^3`.
pub fn random_blobs<R: Rng>(nblobs: usize, xscale: f64, rng: &mut R) -> InitialConditions {
    let blobs: Vec<InitialConditions> = (0..nblobs)
        .map(|_| {
            let centre = [0.0; 3].map(|_: f64| rng.gen_range(-0.5 * xscale..0.5 * xscale));
            let width = rng.gen_range(0.05..0.2) * xscale;
            let peak = rng.gen_range(0.5..2.0);
            gaussian_blob(centre, width, peak, 0.0)
        })
        .collect();
    Box::new(move |x: SpaceVector| {
        let mut values = [0.0; NF];
        values[RHO_I] = 1.0E-6;
        for blob in &blobs {
            values[RHO_I] += blob(x)[RHO_I];
        }
        values[EGAS_I] = values[RHO_I];
        values[TAU_I] = values[RHO_I].powf(0.6);
        values
    })
}

/// Get a seeded rng
pub fn seeded_rng(seed: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed as u64)
}
