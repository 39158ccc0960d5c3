//! Application layer: filters, collaborator contracts and the simulator.

pub mod error;
pub mod filters;
pub mod remote;
pub mod simulation;
