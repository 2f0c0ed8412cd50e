// src/core/mod.rs — Core iteration engine

pub mod classifier;
pub mod collaborators;
pub mod orchestrator;
pub mod repair;
pub mod replay;
pub mod types;
