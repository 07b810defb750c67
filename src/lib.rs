//! Coordination protocol of an adaptive octree for coupled hydro and FMM gravity solvers.
//!
//! Every node of the [Octree] owns one grid patch and exchanges data with its
//! parent, children, same level neighbours and coarser aunts through cycle tagged
//! channels. A hydro exchange cycle restricts, exchanges ghost layers and prolongs to
//! finer neighbours. A flux correction replaces coarse fluxes at refinement
//! boundaries by restricted fine fluxes. A gravity pass moves moments up the tree,
//! exchanges gravity boundaries and moves expansions back down.
#![cfg_attr(feature = "strict", deny(warnings), deny(unused_crate_dependencies))]
#![warn(missing_docs)]

pub mod channel;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod kernel;
pub mod messages;
pub mod moments;
pub mod morton;
pub mod node;
pub mod octree;
pub mod rendezvous;
pub mod scheduler;
pub mod simulation;
pub mod tools;

pub use config::SimulationConfig;
pub use error::{Error, Result};
pub use grid::{Grid, GridPatch};
pub use kernel::{GsolveType, InteractionKernel, MonopoleKernel, NullKernel};
pub use morton::MortonKey;
pub use node::OctreeNode;
pub use octree::Octree;
pub use simulation::{FluxIntegrator, Simulation};
