//! Run identical trees on every rank and stop all ranks together if one fails.

use mpi::traits::Communicator;
use octree_amr::{
    constants::RHO_I,
    rendezvous::MpiRendezvous,
    simulation::FrozenState,
    tools::{gaussian_blob, seeded_rng},
    Grid, MonopoleKernel, Simulation, SimulationConfig,
};
use rand::Rng;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

pub fn main() -> octree_amr::Result<()> {
    // Initialise MPI
    let universe = mpi::initialize().unwrap();

    // Get the world communicator
    let comm = universe.world();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .init();

    let config = SimulationConfig {
        max_level: 2,
        stop_step: 3,
        ..SimulationConfig::default()
    };

    // The same seed on every rank gives every rank the same tree.
    let mut rng = seeded_rng(0);
    let centre = [0.0; 3].map(|_: f64| rng.gen_range(-0.5..0.5));
    let init = gaussian_blob(centre, 0.2, 1.0, 1.0E-6);

    let kernel = MonopoleKernel::new(config.kernel.g);
    let mut sim: Simulation<Grid, _, _> =
        Simulation::new(config, kernel, MpiRendezvous::new(&comm), init)?;
    sim.build()?;
    sim.run(&mut FrozenState)?;

    // Summed over identical replicas, so divide by the number of ranks.
    let totals = sim.conserved_totals();
    if comm.rank() == 0 {
        let ranks = comm.size();
        info!(ranks, mass = totals[RHO_I] / ranks as f64, "Finished");
    }
    sim.report_timing();
    Ok(())
}
