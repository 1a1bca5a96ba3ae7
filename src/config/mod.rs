//! Configuration module.

pub mod parameters;

pub use parameters::{DemeParameters, EnvironmentParameters, Parameters, SpeciesParameters};
