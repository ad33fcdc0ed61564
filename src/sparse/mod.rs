//! Sparse storage for the MNA system.
//!
//! The matrix is an arena of elements threaded into sorted row and column
//! lists. Navigation from any element in all four directions is a single
//! index lookup, fill-ins are inserted in place, and rows or columns are
//! exchanged by relinking instead of moving values.
//!
//! Index 0 of both the matrix and the vector is the ground reference. It is
//! backed by a sink element so that stamp providers can address ground like
//! any other variable; whatever is written there is ignored.

mod matrix;
mod vector;

pub use matrix::{ElementId, LineIter, SparseMatrix};
pub use vector::{SparseVector, VectorId};
