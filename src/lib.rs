//! # Nodal Core
//!
//! The numerical core of a SPICE-style circuit simulator.
//!
//! This library provides:
//! - A linked sparse matrix with in-place fill-ins and cheap row/column swaps
//! - Sparse LU factorization with Markowitz reordering and partial
//!   decomposition
//! - A Newton-Raphson operating point controller with gmin stepping,
//!   diagonal gmin stepping, source stepping and nodesets
//! - A stamping contract for components, with reference resistors,
//!   capacitors, inductors, sources and diodes
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`sparse`] - Sparse matrix and vector storage
//! - [`solver`] - LU solver, Newton-Raphson controller, subsystems
//! - [`circuit`] - Variables and the circuit container
//! - [`components`] - Reference stamp providers
//! - [`error`] - The crate-wide error type
//!
//! ## Usage
//!
//! ```no_run
//! use nodal_core::components::{Resistor, VoltageSource};
//! use nodal_core::{BiasingConfig, Circuit, Simulator};
//!
//! let mut circuit = Circuit::new();
//! circuit
//!     .add(VoltageSource::new("V1", "in", "0", 1.0))
//!     .add(Resistor::new("R1", "in", "out", 1e3))
//!     .add(Resistor::new("R2", "out", "0", 1e3));
//!
//! let mut sim = Simulator::new(circuit, BiasingConfig::default())?;
//! sim.operating_point()?;
//! assert!((sim.voltage("out").unwrap_or_default() - 0.5).abs() < 1e-9);
//! # Ok::<(), nodal_core::NodalError>(())
//! ```
//!
//! ## Solution Method
//!
//! Every Newton-Raphson iteration:
//!
//! 1. Resets the matrix and lets every behavior add its contributions
//! 2. Factors, reusing the previous pivot order while its pivots hold up
//! 3. Solves for node voltages and branch currents
//! 4. Compares the new solution with the previous one
//!
//! Reactive elements (C, L) are discretized using the trapezoidal rule for
//! fixed-step transient analysis.

pub mod circuit;
pub mod components;
pub mod error;
pub mod solver;
pub mod sparse;

// Re-exports for convenience
pub use circuit::Circuit;
pub use error::{NodalError, Result};
pub use solver::{BiasingConfig, Simulator};

/// Thermal voltage at room temperature (~25°C) in volts.
pub const THERMAL_VOLTAGE: f64 = 0.0258;
