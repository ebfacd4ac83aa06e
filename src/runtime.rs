//! Runtime glue that wires configuration, the processor contract, fatal error
//! propagation, telemetry, and runner orchestration.

pub mod config;
pub mod fatal;
pub mod protocol;
pub mod runner;
pub mod telemetry;
