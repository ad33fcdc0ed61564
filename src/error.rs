//! Error types for the nodal analysis engine.
//!
//! This module provides a unified error type [`NodalError`] that covers
//! configuration mistakes, circuit construction problems and the fatal
//! numerical failures of an analysis.
//!
//! A cheap refactorization that runs into a small pivot is not an error: the
//! solver reports it through a `bool` and the caller reorders.

use thiserror::Error;

/// Result type alias using [`NodalError`].
pub type Result<T> = std::result::Result<T, NodalError>;

/// Unified error type for all operations.
#[derive(Error, Debug)]
pub enum NodalError {
    // ============ Configuration Errors ============
    /// A parameter is outside its allowed range
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// A vector does not match the size of the system
    #[error("Dimension mismatch: expected at least {expected} entries, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // ============ Circuit Errors ============
    /// Duplicate behavior name
    #[error("Duplicate component name '{name}'")]
    DuplicateComponent { name: String },

    /// Variable not found in the variable set
    #[error("Variable '{name}' not found")]
    UnknownVariable { name: String },

    /// Invalid circuit topology
    #[error("Invalid circuit topology: {message}")]
    InvalidTopology { message: String },

    // ============ Numerical Errors ============
    /// No usable pivot could be found
    #[error("Singular matrix at elimination step {step} (variable '{variable}')")]
    SingularMatrix { variable: String, step: usize },

    /// Solve was called before a successful factorization
    #[error("The solver has not been factored")]
    NotFactored,

    /// Newton-Raphson iteration failed, convergence aids included
    #[error("No convergence after {iterations} iterations (problem variable: {})", .variable.as_deref().unwrap_or("unknown"))]
    NonConvergence {
        variable: Option<String>,
        iterations: usize,
    },

    /// A solution value is not a number
    #[error("Variable '{variable}' is not a number")]
    NotANumber { variable: String },

    /// A stamp provider failed while loading
    #[error("Component '{name}': {message}")]
    Device { name: String, message: String },
}

impl NodalError {
    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a device error
    pub fn device(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Device {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a non-convergence error
    pub fn non_convergence(variable: Option<String>, iterations: usize) -> Self {
        Self::NonConvergence {
            variable,
            iterations,
        }
    }
}
