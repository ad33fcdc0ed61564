//! MNA (Modified Nodal Analysis) solver.
//!
//! This module provides the numerical engine: a sparse LU solver with
//! Markowitz reordering, the Newton-Raphson controller that drives it, and
//! the contract through which components stamp the system.
//!
//! ## Modified Nodal Analysis
//!
//! MNA assembles a system of equations Ax = z where:
//! - x contains node voltages and branch currents
//! - A is the conductance/coefficient matrix
//! - z is the source vector
//!
//! The matrix structure is:
//! ```text
//! [ G   B ] [ v ]   [ i ]
//! [ C   D ] [ j ] = [ e ]
//! ```
//!
//! where:
//! - G is the conductance matrix (node equations)
//! - B, C connect voltage sources to nodes
//! - D is usually 0 (for ideal voltage sources)
//! - v is the vector of node voltages
//! - j is the vector of voltage source currents
//! - i is the sum of current sources into each node
//! - e is the vector of voltage source values
//!
//! The zero blocks of D are why [`preorder_mna`] runs before the first
//! pivot search.

mod lu;
mod markowitz;
mod newton;
mod preorder;
mod simulator;
mod stamp;
mod subsystem;
mod translation;

pub use lu::{PreconditionContext, SparseSolver};
pub use markowitz::{Markowitz, Pivot, PivotConfig, PivotQuality, PivotStrategy};
pub use newton::{
    BiasingStatistics, ConvergenceStrategy, IterationMode, IterationState, NewtonRaphson,
};
pub use preorder::{apply_diagonal_gmin, preorder_mna};
pub use simulator::{BiasingConfig, OperatingPoint, ParallelConfig, Simulator, TransientPoint};
pub use stamp::{
    Analysis, Behavior, BindContext, ConvergenceContext, ElementSet, LoadContext, MatrixLocation,
    TimeStep,
};
pub use subsystem::{Subsystem, SubsystemGroup};
pub use translation::Translation;

/// Default iteration limit of an operating point search.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Default conductance shunted across junctions.
pub const DEFAULT_GMIN: f64 = 1e-12;
