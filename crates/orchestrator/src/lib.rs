//! SIREN orchestration layer
//!
//! Everything around the compute core: parameter-file parsing and
//! validation, initial-condition generation, snapshot I/O, and the driver
//! that owns the main loop.
//!
//! # Modules
//! - [`config`] -- Parameter file schema, token enums, validation.
//! - [`ic`] -- Initial-condition generators.
//! - [`snapshot`] -- Column and binary `SRN1` snapshot formats.
//! - [`driver`] -- The simulation driver and its main loop.

#![warn(missing_docs)]

pub mod config;
pub mod driver;
pub mod ic;
pub mod snapshot;

pub use config::SimConfig;
pub use driver::Simulation;
pub use snapshot::Snapshot;
