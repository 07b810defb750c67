//! End to end checks of the exchange protocol on small trees.

use futures::FutureExt;
use octree_amr::{
    constants::{H_BW, INX, INX_HALF, NF, RHO_I},
    geometry::{flat_index, Direction, Face, IndexBox, Octant, PhysicalBox, Side},
    kernel::{Interactions, LocalMoments},
    messages::NeighborGravity,
    moments::{merge_moments, Expansion, Multipole, SpaceVector},
    scheduler::{drive, Phase},
    tools::seeded_rng,
    Error, Grid, GsolveType, InteractionKernel, MonopoleKernel, MortonKey, NullKernel,
    Octree,
};
use rand::Rng;
use rand_distr::{Distribution, LogNormal};

fn density(rho: f64) -> impl Fn([f64; 3]) -> [f64; NF] {
    move |_| {
        let mut values = [0.0; NF];
        values[RHO_I] = rho;
        values
    }
}

fn refined_root<K: InteractionKernel>(kernel: K) -> Octree<Grid, K> {
    let mut tree = Octree::new(PhysicalBox::cube(1.0), 3, kernel, &density(1.0));
    tree.regrid(|node| node.location().level() == 0).unwrap();
    tree
}

fn child(index: usize) -> MortonKey {
    MortonKey::root().child(Octant::from_index(index))
}

fn interior() -> IndexBox {
    IndexBox::new([H_BW; 3], [H_BW + INX; 3])
}

#[test]
fn test_single_root_hydro_cycles() {
    let mut tree: Octree<Grid, _> = Octree::new(
        PhysicalBox::cube(1.0),
        0,
        MonopoleKernel::new(1.0),
        &density(2.0),
    );
    for cycle in 1..=3 {
        tree.run_hydro_exchange_cycle().unwrap();
        let root = tree.node(MortonKey::root()).unwrap();
        assert_eq!(root.hcycle(), cycle);
        // Ghosts are outflow copies of a uniform interior.
        assert_eq!(root.grid().hydro(RHO_I, [0, 0, 0]), 2.0);
    }
}

#[test]
fn test_siblings_fill_each_others_ghosts() {
    let mut tree = refined_root(NullKernel);
    for octant in Octant::full_set() {
        let node = tree.node_mut(child(octant.index())).unwrap();
        for index in interior().iter() {
            let [i, j, k] = index;
            *node.grid_mut().hydro_mut(RHO_I, index) =
                100.0 * octant.index() as f64 + i as f64 + 0.1 * j as f64 + 0.01 * k as f64;
        }
    }
    tree.run_hydro_exchange_cycle().unwrap();

    // c1 lies in +x of c0.
    let c0 = tree.node(child(0)).unwrap().grid();
    let c1 = tree.node(child(1)).unwrap().grid();
    for (g, j, k) in itertools::iproduct!(0..H_BW, H_BW..H_BW + INX, H_BW..H_BW + INX) {
        assert_eq!(
            c0.hydro(RHO_I, [H_BW + INX + g, j, k]),
            c1.hydro(RHO_I, [H_BW + g, j, k])
        );
        assert_eq!(
            c1.hydro(RHO_I, [g, j, k]),
            c0.hydro(RHO_I, [INX + g, j, k])
        );
    }
    // The parent holds the restriction of its children.
    let root = tree.node(MortonKey::root()).unwrap().grid();
    let total: f64 = Octant::full_set()
        .iter()
        .map(|o| tree.node(child(o.index())).unwrap().grid().interior_total(RHO_I))
        .sum();
    assert!((root.interior_total(RHO_I) - total).abs() < 1E-12 * total);
}

#[test]
fn test_finer_leaves_receive_prolonged_ghosts() {
    let mut tree = refined_root(NullKernel);
    tree.regrid(|node| node.location() == child(0) || node.location().level() == 0)
        .unwrap();
    tree.run_hydro_exchange_cycle().unwrap();

    // Uniform data prolongs to uniform ghosts across the refinement boundary.
    let grandchild = MortonKey::from_index_and_level([1, 0, 0], 2);
    let node = tree.node(grandchild).unwrap();
    assert!(node.amr_inbound(Face::new(0, Side::Plus).to_direction()));
    for (g, j, k) in itertools::iproduct!(0..H_BW, H_BW..H_BW + INX, H_BW..H_BW + INX) {
        assert!((node.grid().hydro(RHO_I, [H_BW + INX + g, j, k]) - 1.0).abs() < 1E-14);
    }
}

#[test]
fn test_aunt_receives_averaged_niece_fluxes() {
    let mut tree = refined_root(NullKernel);
    tree.regrid(|node| node.location() == child(0) || node.location().level() == 0)
        .unwrap();

    let value = |field: usize, y: usize, z: usize, j: usize, k: usize| {
        field as f64 + 100.0 * y as f64 + 10.0 * z as f64 + j as f64 + 0.5 * k as f64
    };
    for (y, z) in itertools::iproduct!(0..2, 0..2) {
        let niece = MortonKey::from_index_and_level([1, y as u64, z as u64], 2);
        let grid = tree.node_mut(niece).unwrap().grid_mut();
        for (field, j, k) in itertools::iproduct!(0..NF, 0..INX, 0..INX) {
            *grid.flux_mut(0, field, [INX, j, k]) = value(field, y, z, j, k);
        }
    }
    tree.exchange_flux_corrections().unwrap();

    let aunt = tree.node(child(1)).unwrap();
    assert!(aunt.has_nieces(Face::new(0, Side::Minus)));
    for (y, z, a, b) in itertools::iproduct!(0..2, 0..2, 0..INX_HALF, 0..INX_HALF) {
        for field in 0..NF {
            let expected = field as f64
                + 100.0 * y as f64
                + 10.0 * z as f64
                + (2 * a) as f64
                + 0.5
                + 0.5 * ((2 * b) as f64 + 0.5);
            let actual = aunt
                .grid()
                .flux(0, field, [0, y * INX_HALF + a, z * INX_HALF + b]);
            assert!((actual - expected).abs() < 1E-12);
        }
    }
}

#[test]
fn test_null_kernel_gravity_moves_mass_up() {
    let mut tree = refined_root(NullKernel);
    tree.run_gravity_pass(GsolveType::Rho, true).unwrap();

    let children_mass: f64 = Octant::full_set()
        .iter()
        .flat_map(|o| tree.node(child(o.index())).unwrap().grid().multipoles().to_vec())
        .map(|m| m.mass)
        .sum();
    let root = tree.node(MortonKey::root()).unwrap().grid();
    let root_mass: f64 = root.multipoles().iter().map(|m| m.mass).sum();
    assert!((root_mass - 8.0).abs() < 1E-12);
    assert!((children_mass - 8.0).abs() < 1E-12);
    for node in tree.nodes().values() {
        assert_eq!(node.gcycle(), 1);
        assert!(node.grid().expansions().iter().all(|e| e.phi == 0.0));
        assert!(node.grid().angular_corrections().iter().flatten().all(|&a| a == 0.0));
    }
}

fn cell_moments(grid: &Grid) -> Vec<(Multipole, SpaceVector)> {
    grid.multipoles()
        .iter()
        .copied()
        .zip(grid.centres().iter().copied())
        .collect()
}

fn assert_same_moment(a: &(Multipole, SpaceVector), b: &(Multipole, SpaceVector)) {
    let scale = a.0.mass.abs();
    assert!((a.0.mass - b.0.mass).abs() < 1E-12 * scale);
    for dim in 0..3 {
        assert!((a.1[dim] - b.1[dim]).abs() < 1E-12);
    }
    for (qa, qb) in a.0.quadrupole.iter().zip(&b.0.quadrupole) {
        assert!((qa - qb).abs() < 1E-10 * scale);
    }
}

#[test]
fn test_null_kernel_gravity_merges_translated_child_moments() {
    let ramp = |x: [f64; 3]| {
        let mut values = [0.0; NF];
        values[RHO_I] = 1.0 + 0.5 * x[0] + 0.25 * x[1] * x[1] - 0.1 * x[2];
        values
    };
    let mut tree: Octree<Grid, _> = Octree::new(PhysicalBox::cube(1.0), 3, NullKernel, &ramp);
    tree.regrid(|node| node.location().level() == 0).unwrap();
    tree.run_gravity_pass(GsolveType::Rho, false).unwrap();

    let root = tree.node(MortonKey::root()).unwrap().grid();
    let fine = tree.node(child(0)).unwrap().grid();

    // The lowest root cell holds the lowest 2x2x2 cells of the first child.
    let parts = itertools::iproduct!(0..2, 0..2, 0..2)
        .map(|(a, b, c)| {
            let n = flat_index([a, b, c], INX);
            (fine.multipoles()[n], fine.centres()[n])
        })
        .collect::<Vec<_>>();
    let n = flat_index([0; 3], INX);
    assert_same_moment(&merge_moments(&parts), &(root.multipoles()[n], root.centres()[n]));

    // Summed over the whole tree the moment about the common centre is the same on both levels.
    let children = Octant::full_set()
        .iter()
        .flat_map(|o| cell_moments(tree.node(child(o.index())).unwrap().grid()))
        .collect::<Vec<_>>();
    let fine_total = merge_moments(&children);
    let coarse_total = merge_moments(&cell_moments(root));
    assert_same_moment(&fine_total, &coarse_total);
    assert!(coarse_total.0.quadrupole.iter().any(|q| q.abs() > 1E-3));
}

#[test]
fn test_far_field_potential_of_a_single_cell() {
    let mut tree: Octree<Grid, _> = Octree::new(
        PhysicalBox::cube(1.0),
        1,
        MonopoleKernel::new(1.0),
        &density(0.0),
    );
    tree.regrid(|node| node.location().level() == 0).unwrap();
    let source = [3 + H_BW; 3];
    *tree
        .node_mut(child(0))
        .unwrap()
        .grid_mut()
        .hydro_mut(RHO_I, source) = 1.0;
    tree.run_gravity_pass(GsolveType::NonRho, false).unwrap();

    let source_grid = tree.node(child(0)).unwrap().grid();
    let mass = source_grid.dx().powi(3);
    let source_centre = source_grid.cell_centre([3; 3]);
    let target_grid = tree.node(child(7)).unwrap().grid();
    let target = [4; 3];
    let x = target_grid.cell_centre(target);
    let r = (0..3)
        .map(|d| (x[d] - source_centre[d]).powi(2))
        .sum::<f64>()
        .sqrt();
    let phi = target_grid.expansions()[flat_index(target, INX)].phi;
    assert!(phi < 0.0);
    assert!(((phi + mass / r) / (mass / r)).abs() < 1E-2);
}

#[test]
fn test_random_regrids_keep_the_tree_consistent() {
    let mut rng = seeded_rng(17);
    let mut tree: Octree<Grid, _> = Octree::new(
        PhysicalBox::cube(1.0),
        3,
        NullKernel,
        &|x: [f64; 3]| {
            let mut values = [0.0; NF];
            values[RHO_I] = 1.0 + x[0] * x[0] + 0.5 * x[1];
            values
        },
    );
    let noise = LogNormal::new(0.0, 0.25).unwrap();
    for _ in 0..6 {
        // Rough up the leaves so that prolongation sees real slopes.
        for key in tree.leaf_keys() {
            let grid = tree.node_mut(key).unwrap().grid_mut();
            for index in interior().iter() {
                *grid.hydro_mut(RHO_I, index) *= noise.sample(&mut rng);
            }
        }
        let mass: f64 = tree
            .leaf_keys()
            .iter()
            .map(|&key| tree.node(key).unwrap().grid().interior_total(RHO_I))
            .sum();

        let chosen = tree
            .nodes()
            .keys()
            .filter(|_| rng.gen_bool(0.4))
            .copied()
            .collect::<Vec<_>>();
        tree.regrid(|node| chosen.contains(&node.location())).unwrap();
        tree.check_topology().unwrap();

        for (&key, node) in tree.nodes() {
            // Same level neighbours see each other.
            for dir in Direction::full_set() {
                if let Some(neighbor) = node.neighbor(dir) {
                    let back = tree.node(neighbor.location()).unwrap().neighbor(dir.flip());
                    assert_eq!(back.unwrap().location(), key);
                } else if let Some(location) = key.neighbor(dir) {
                    // Neighbouring leaves differ by at most one level.
                    assert!(tree.node(location.parent()).is_some());
                }
            }
        }

        let leaves: f64 = tree
            .leaf_keys()
            .iter()
            .map(|&key| tree.node(key).unwrap().grid().interior_total(RHO_I))
            .sum();
        assert!((leaves - mass).abs() < 1E-10 * mass);

        tree.run_hydro_exchange_cycle().unwrap();
        tree.exchange_flux_corrections().unwrap();
        tree.run_gravity_pass(GsolveType::NonRho, false).unwrap();
    }
}

#[test]
fn test_cycles_advance_in_lockstep() {
    let mut tree = refined_root(NullKernel);
    for _ in 0..3 {
        tree.run_hydro_exchange_cycle().unwrap();
        tree.exchange_flux_corrections().unwrap();
    }
    tree.run_gravity_pass(GsolveType::NonRho, false).unwrap();
    tree.regrid(|node| node.location().level() <= 1).unwrap();
    tree.run_hydro_exchange_cycle().unwrap();
    for node in tree.nodes().values() {
        assert_eq!(node.hcycle(), 4);
        assert_eq!(node.gcycle(), 1);
    }
}

#[test]
fn test_lone_participant_stalls() {
    let mut tree = refined_root(NullKernel);
    let key = child(0);
    let node = tree.node_mut(key).unwrap();
    match drive(
        Phase::Hydro,
        [(key, node.run_hydro_exchange_cycle().boxed_local())],
    ) {
        Err(Error::Stalled { phase, blocked }) => {
            assert_eq!(phase, Phase::Hydro);
            assert_eq!(blocked, vec![key]);
        }
        _ => panic!("expected a stall"),
    }
    // The messages sent before the stall are superseded by the full cycle.
    tree.run_hydro_exchange_cycle().unwrap();
    assert_eq!(tree.node(key).unwrap().hcycle(), 1);
}

struct PoisonKernel;

impl InteractionKernel for PoisonKernel {
    fn interact_local(&self, kind: GsolveType, _local: &LocalMoments<'_>) -> octree_amr::Result<Interactions> {
        let mut result = Interactions::zero(kind);
        result.expansions[0] = Expansion {
            phi: f64::NAN,
            grad: [0.0; 3],
        };
        result.check_finite()?;
        Ok(result)
    }

    fn interact_boundary(
        &self,
        kind: GsolveType,
        _local: &LocalMoments<'_>,
        _dir: Direction,
        _source: &NeighborGravity,
    ) -> octree_amr::Result<Interactions> {
        Ok(Interactions::zero(kind))
    }
}

#[test]
fn test_failed_cycle_aborts_the_tree() {
    let mut tree = refined_root(PoisonKernel);
    assert!(matches!(
        tree.run_gravity_pass(GsolveType::NonRho, false),
        Err(Error::Kernel(_))
    ));
    assert!(tree.is_aborted());
    assert!(matches!(tree.run_hydro_exchange_cycle(), Err(Error::Aborted)));
    assert!(matches!(tree.regrid(|_| false), Err(Error::Aborted)));
}
