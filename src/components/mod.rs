//! Component models for circuit simulation.
//!
//! This module provides the reference stamp providers:
//! - Linear: Resistor, Capacitor, Inductor
//! - Sources: Voltage Source, Current Source
//! - Nonlinear: Diode
//!
//! Each component implements [`Behavior`](crate::solver::Behavior): it
//! resolves its matrix elements once when bound and adds its contributions
//! on every load.

mod diode;
mod linear;
mod sources;

pub use diode::{Diode, DiodeParams};
pub use linear::{Capacitor, Inductor, Resistor};
pub use sources::{CurrentSource, VoltageSource};
