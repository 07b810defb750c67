//! Run configuration.
//!
//! Loaded from TOML. Missing keys take their defaults.

use std::path::Path;

use serde::Deserialize;

use crate::{
    constants::DEEPEST_LEVEL,
    error::{Error, Result},
    kernel::GsolveType,
};

/// Configuration of a simulation run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Maximum refinement level.
    pub max_level: usize,

    /// Half width of the cubic domain `[-xscale, xscale]^3`.
    pub xscale: f64,

    /// Run the hydro exchange and flux correction in every step.
    pub hydro: bool,

    /// Run a gravity pass in every step.
    pub gravity: bool,

    /// Convert between gas and total energy around gravity passes.
    pub energy_accounting: bool,

    /// Quantities solved for by the gravity pass.
    pub solve_type: GsolveType,

    /// Number of steps after which the driver stops.
    pub stop_step: u64,

    /// Time step.
    pub dt: f64,

    /// Refinement criterion.
    pub refine: RefineConfig,

    /// Interaction kernel.
    pub kernel: KernelConfig,
}

/// Density based refinement criterion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefineConfig {
    /// A node refines if the density of one of its cells exceeds this value.
    pub density: f64,
}

/// Parameters of the interaction kernel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    /// Gravitational constant.
    pub g: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_level: 2,
            xscale: 1.0,
            hydro: true,
            gravity: true,
            energy_accounting: true,
            solve_type: GsolveType::Rho,
            stop_step: 10,
            dt: 1.0E-3,
            refine: RefineConfig::default(),
            kernel: KernelConfig::default(),
        }
    }
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self { density: 1.0E-3 }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { g: 1.0 }
    }
}

impl SimulationConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check the ranges of all values.
    pub fn validate(&self) -> Result<()> {
        if self.max_level as u64 > DEEPEST_LEVEL {
            return Err(Error::Config(format!(
                "max_level {} exceeds the deepest level {}",
                self.max_level, DEEPEST_LEVEL
            )));
        }
        if !(self.xscale.is_finite() && self.xscale > 0.0) {
            return Err(Error::Config(format!("xscale must be positive, got {}", self.xscale)));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(Error::Config(format!("dt must be positive, got {}", self.dt)));
        }
        if !self.kernel.g.is_finite() {
            return Err(Error::Config("kernel.g must be finite".to_string()));
        }
        if self.refine.density.is_nan() {
            return Err(Error::Config("refine.density must not be NaN".to_string()));
        }
        Ok(())
    }
}
