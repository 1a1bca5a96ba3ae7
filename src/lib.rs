//! Individual-based simulation of pathogen transmission coupled with
//! antigenic evolution.
//!
//! Hosts are partitioned into susceptible, infected and recovered
//! compartments across demes and species; infections carry an evolving
//! antigenic phenotype and hosts accumulate immune histories that
//! determine future infection risk. Every lineage ever created is kept in
//! an ancestry arena, which is pruned and reconstructed into a rooted,
//! time-ordered phylogeny with population-genetic statistics at the end
//! of a run.

pub mod ancestry;
pub mod args;
pub mod config;
pub mod deme;
pub mod environment;
pub mod errors;
pub mod host;
pub mod phenotype;
pub mod random;
pub mod readwrite;
pub mod runner;
pub mod simulation;
pub mod species;
pub mod stats;
pub mod tree;
