//! Driver of the cycles of an [Octree].
//!
//! A [Simulation] builds the initial tree and advances it step by step. After every
//! cycle the localities meet at a [Rendezvous], so a failure on any locality aborts
//! all of them at the same cycle.

use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::{
    config::SimulationConfig,
    constants::{H_BW, INX, NDIM, NF},
    error::{Error, Result},
    geometry::{face_flux_bounds, Face, IndexBox, PhysicalBox, Side},
    grid::{Grid, GridPatch},
    kernel::{GsolveType, InteractionKernel, MonopoleKernel},
    moments::SpaceVector,
    morton::MortonKey,
    octree::Octree,
    rendezvous::{LocalRendezvous, Rendezvous},
};

/// Initial conditions as a function of the cell centre.
pub type InitialConditions = Box<dyn Fn(SpaceVector) -> [f64; NF]>;

/// The numerical scheme advancing the conserved fields of one patch.
///
/// Fluxes are computed before the flux correction exchange and the update is applied
/// after it, so coarse fluxes at refinement boundaries are replaced by restricted
/// fine fluxes in between.
pub trait FluxIntegrator<G> {
    /// Compute the face fluxes of `grid` from the current state.
    fn compute_fluxes(&mut self, location: MortonKey, grid: &mut G) -> Result<()>;

    /// Advance the interior of `grid` by `dt` using its face fluxes.
    fn update(&mut self, location: MortonKey, grid: &mut G, dt: f64) -> Result<()>;
}

/// First order upwind advection of every field with a constant velocity.
#[derive(Copy, Clone, Debug)]
pub struct UpwindAdvection {
    velocity: SpaceVector,
}

impl UpwindAdvection {
    /// Advection with `velocity`.
    pub fn new(velocity: SpaceVector) -> Self {
        Self { velocity }
    }
}

impl FluxIntegrator<Grid> for UpwindAdvection {
    fn compute_fluxes(&mut self, _location: MortonKey, grid: &mut Grid) -> Result<()> {
        for dim in 0..NDIM {
            let v = self.velocity[dim];
            let mut shape = [INX; 3];
            shape[dim] += 1;
            for face in IndexBox::new([0; 3], shape).iter() {
                // Face `i` separates the padded cells `H_BW + i - 1` and `H_BW + i`.
                let mut upwind = face.map(|i| i + H_BW);
                if v > 0.0 {
                    upwind[dim] -= 1;
                }
                for field in 0..NF {
                    *grid.flux_mut(dim, field, face) = v * grid.hydro(field, upwind);
                }
            }
        }
        Ok(())
    }

    fn update(&mut self, location: MortonKey, grid: &mut Grid, dt: f64) -> Result<()> {
        let dx = grid.dx();
        let ratio = dt / dx;
        for index in IndexBox::new([0; 3], [INX; 3]).iter() {
            let padded = index.map(|i| i + H_BW);
            for field in 0..NF {
                let divergence: f64 = (0..NDIM)
                    .map(|dim| {
                        let mut upper = index;
                        upper[dim] += 1;
                        grid.flux(dim, field, upper) - grid.flux(dim, field, index)
                    })
                    .sum();
                let value = grid.hydro(field, padded) - ratio * divergence;
                if !value.is_finite() {
                    return Err(Error::Kernel(format!(
                        "non finite state in {} at {:?}",
                        location, index
                    )));
                }
                *grid.hydro_mut(field, padded) = value;
            }
        }

        // Whatever crosses a physical boundary leaves the domain.
        let area_dt = dx * dx * dt;
        let mut outflows = [0.0; NF];
        for face in Face::full_set() {
            if !location.is_physical_boundary(face) {
                continue;
            }
            let dim = face.get_dimension();
            let sign = match face.get_side() {
                Side::Minus => -1.0,
                Side::Plus => 1.0,
            };
            for plane in face_flux_bounds(face).iter() {
                for (field, outflow) in outflows.iter_mut().enumerate() {
                    *outflow += sign * grid.flux(dim, field, plane) * area_dt;
                }
            }
        }
        grid.add_outflows(outflows);
        Ok(())
    }
}

/// Integrator that leaves the state untouched.
#[derive(Copy, Clone, Debug, Default)]
pub struct FrozenState;

impl<G> FluxIntegrator<G> for FrozenState {
    fn compute_fluxes(&mut self, _location: MortonKey, _grid: &mut G) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, _location: MortonKey, _grid: &mut G, _dt: f64) -> Result<()> {
        Ok(())
    }
}

/// Wall clock time spent per phase.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Timings {
    /// Tree construction and regrids.
    pub regrid: Duration,
    /// Hydro exchange cycles.
    pub hydro: Duration,
    /// Flux computation, correction and update.
    pub fluxes: Duration,
    /// Gravity passes.
    pub gravity: Duration,
    /// Completed steps.
    pub steps: u64,
}

/// A simulation run on one locality.
pub struct Simulation<G = Grid, K = MonopoleKernel, R = LocalRendezvous> {
    config: SimulationConfig,
    tree: Octree<G, K>,
    rendezvous: R,
    init: InitialConditions,
    timings: Timings,
}

impl Simulation {
    /// Run with the reference patch and the direct kernel of the configuration on a
    /// single locality.
    pub fn from_config(config: SimulationConfig, init: InitialConditions) -> Result<Self> {
        let kernel = MonopoleKernel::new(config.kernel.g);
        Simulation::new(config, kernel, LocalRendezvous, init)
    }
}

impl<G: GridPatch, K: InteractionKernel, R: Rendezvous> Simulation<G, K, R> {
    /// A root only tree filled by `init`.
    pub fn new(
        config: SimulationConfig,
        kernel: K,
        rendezvous: R,
        init: InitialConditions,
    ) -> Result<Self> {
        config.validate()?;
        let domain = PhysicalBox::cube(config.xscale);
        let tree = Octree::new(domain, config.max_level, kernel, &*init);
        Ok(Self {
            config,
            tree,
            rendezvous,
            init,
            timings: Timings::default(),
        })
    }

    /// The tree.
    pub fn tree(&self) -> &Octree<G, K> {
        &self.tree
    }

    /// Mutable access to the tree.
    pub fn tree_mut(&mut self) -> &mut Octree<G, K> {
        &mut self.tree
    }

    /// The configuration of the run.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Accumulated timings.
    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Number of completed steps.
    pub fn step_num(&self) -> u64 {
        self.tree
            .node(MortonKey::root())
            .map_or(0, |root| root.step_num())
    }

    /// Simulation time.
    pub fn current_time(&self) -> f64 {
        self.tree
            .node(MortonKey::root())
            .map_or(0.0, |root| root.current_time())
    }

    /// Agree with all localities on the outcome of a cycle.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        let ok = self.rendezvous.agree(result.is_ok());
        match result {
            Ok(_) if !ok => {
                error!("Remote locality failed");
                self.tree.abort();
                Err(Error::RemoteAbort)
            }
            result => result,
        }
    }

    /// Refine the tree level by level from the initial conditions.
    ///
    /// Regrids `max_level` times and once more, refilling every patch from the
    /// initial conditions after each regrid so refined patches hold exact data.
    pub fn build(&mut self) -> Result<()> {
        let start = Instant::now();
        for level in 0..=self.config.max_level {
            info!(level, "Adding a level");
            self.regrid()?;
            self.tree.set_problem(&*self.init);
            info!(level, nodes = self.tree.len(), depth = self.tree.depth(), "Level added");
        }
        self.timings.regrid += start.elapsed();
        Ok(())
    }

    /// Regrid with the density criterion of the configuration.
    pub fn regrid(&mut self) -> Result<()> {
        let threshold = self.config.refine.density;
        let result = self
            .tree
            .regrid(|node| node.grid().max_density() > threshold);
        self.settle(result)
    }

    /// One gravity pass.
    pub fn solve_gravity(&mut self, kind: GsolveType, energy_accounting: bool) -> Result<()> {
        let start = Instant::now();
        let result = self.tree.run_gravity_pass(kind, energy_accounting);
        self.timings.gravity += start.elapsed();
        self.settle(result)
    }

    /// Advance the tree by one step of `config.dt`.
    pub fn step<I: FluxIntegrator<G>>(&mut self, integrator: &mut I) -> Result<()> {
        let dt = self.config.dt;
        if self.config.hydro {
            let start = Instant::now();
            let result = self.tree.run_hydro_exchange_cycle();
            self.timings.hydro += start.elapsed();
            self.settle(result)?;

            let start = Instant::now();
            // Refined patches are overwritten by restriction, so only leaves are integrated.
            let result = self.tree.for_each_node(|node| {
                if node.is_refined() {
                    return Ok(());
                }
                let location = node.location();
                integrator.compute_fluxes(location, node.grid_mut())
            });
            self.settle(result)?;
            let result = self.tree.exchange_flux_corrections();
            self.settle(result)?;
            let result = self.tree.for_each_node(|node| {
                if node.is_refined() {
                    return Ok(());
                }
                let location = node.location();
                integrator.update(location, node.grid_mut(), dt)
            });
            self.timings.fluxes += start.elapsed();
            self.settle(result)?;
        }
        if self.config.gravity {
            self.solve_gravity(self.config.solve_type, self.config.energy_accounting)?;
        }
        self.tree.for_each_node(|node| {
            node.advance_time(dt);
            Ok(())
        })?;
        self.timings.steps += 1;
        debug!(step = self.step_num(), time = self.current_time(), "Step finished");
        Ok(())
    }

    /// Step until `config.stop_step` steps are completed.
    pub fn run<I: FluxIntegrator<G>>(&mut self, integrator: &mut I) -> Result<()> {
        while self.step_num() < self.config.stop_step {
            self.step(integrator)?;
            info!(
                step = self.step_num(),
                time = self.current_time(),
                "Step completed"
            );
        }
        Ok(())
    }

    /// Leaf totals of every conserved field plus the outflows accumulated by the leaves,
    /// summed over all localities.
    ///
    /// Outflows follow the patches through regrids, so the totals only change through
    /// sources, not through transport or refinement.
    pub fn conserved_totals(&self) -> [f64; NF] {
        let mut totals = [0.0; NF];
        for node in self.tree.nodes().values() {
            if node.is_refined() {
                continue;
            }
            let outflows = node.grid().outflows();
            for (field, total) in totals.iter_mut().enumerate() {
                *total += node.grid().conserved_total(field) + outflows[field];
            }
        }
        self.rendezvous.sum(&mut totals);
        totals
    }

    /// Log the accumulated timings.
    pub fn report_timing(&self) {
        let t = &self.timings;
        info!(
            steps = t.steps,
            regrid_s = t.regrid.as_secs_f64(),
            hydro_s = t.hydro.as_secs_f64(),
            fluxes_s = t.fluxes.as_secs_f64(),
            gravity_s = t.gravity.as_secs_f64(),
            "Timings"
        );
    }
}
