//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod simulated;
pub mod telemetry;
