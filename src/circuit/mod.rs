//! Circuit representation and validation.
//!
//! A [`Circuit`] is an ordered list of behaviors. Their unknowns live in a
//! [`VariableSet`], indexed by [`VariableId`] with ground at index 0.

mod graph;
mod types;
mod validate;

pub use graph::Circuit;
pub use types::*;
pub use validate::validate_circuit;
