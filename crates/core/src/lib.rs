//! climatecore — environmental-sensor bounds evaluation and the
//! alert-to-action pipeline behind it.
//!
//! The monitor side consumes sensor readings and bounds configuration from
//! a message bus, keeps a bounded per-sensor history, and emits an alert on
//! the first out-of-bounds reading. The actuator side consumes alerts,
//! correlates them with a rolling memory of past suggestions, asks a
//! language model for a remedial action, and republishes the result.

pub mod actuator;
pub mod config;
pub mod monitor;
pub mod shutdown;
pub mod types;
