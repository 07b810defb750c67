//! Build an adaptive tree around a few density peaks and advance it.
//!
//! Usage: `cargo run --example driver [config.toml]`

use octree_amr::{
    simulation::UpwindAdvection,
    tools::{random_blobs, seeded_rng},
    GsolveType, Simulation, SimulationConfig,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

pub fn main() -> octree_amr::Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SimulationConfig::from_file(path)?,
        None => SimulationConfig::default(),
    };
    info!(?config, "Configuration");

    let mut rng = seeded_rng(0);
    let init = random_blobs(3, config.xscale, &mut rng);
    let mut sim = Simulation::from_config(config, init)?;

    sim.build()?;
    let solve_type = sim.config().solve_type;
    sim.solve_gravity(solve_type, false)?;

    let before = sim.conserved_totals();
    let mut integrator = UpwindAdvection::new([0.1, 0.05, 0.0]);
    sim.run(&mut integrator)?;
    let after = sim.conserved_totals();

    info!(
        nodes = sim.tree().len(),
        leaves = sim.tree().leaf_keys().len(),
        mass_before = before[0],
        mass_after = after[0],
        "Finished"
    );
    sim.report_timing();

    // A final pass without angular corrections, as used for diagnostics.
    sim.solve_gravity(GsolveType::NonRho, false)?;
    Ok(())
}
