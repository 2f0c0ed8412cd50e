// src/lib.rs — Library root for cadloop

pub mod adapters;
pub mod cli;
pub mod core;
pub mod evaluator;
pub mod infra;
pub mod memory;
pub mod provider;
