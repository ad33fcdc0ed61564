//! Circuit container.

use std::fmt;

use super::types::VariableSet;
use crate::solver::Behavior;

/// A list of behaviors and the variables they share.
///
/// Variables are created when the behaviors are bound, so a fresh circuit
/// only knows ground.
pub struct Circuit {
    variables: VariableSet,
    behaviors: Vec<Box<dyn Behavior>>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

impl Circuit {
    /// Create an empty circuit.
    pub fn new() -> Self {
        Self {
            variables: VariableSet::new(),
            behaviors: Vec::new(),
        }
    }

    /// Add a behavior.
    pub fn add(&mut self, behavior: impl Behavior + 'static) -> &mut Self {
        self.behaviors.push(Box::new(behavior));
        self
    }

    /// Add an already boxed behavior.
    pub fn add_boxed(&mut self, behavior: Box<dyn Behavior>) -> &mut Self {
        self.behaviors.push(behavior);
        self
    }

    /// Declare a node up front, fixing its position in the solution vector.
    pub fn node(&mut self, name: &str) -> &mut Self {
        self.variables.node(name);
        self
    }

    /// Number of behaviors.
    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Behavior names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.behaviors.iter().map(|b| b.name())
    }

    /// Variables declared so far.
    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    /// Hand the variables and behaviors to a solver.
    pub fn into_parts(self) -> (VariableSet, Vec<Box<dyn Behavior>>) {
        (self.variables, self.behaviors)
    }
}

impl fmt::Debug for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Circuit")
            .field("variables", &self.variables.len())
            .field("behaviors", &self.names().collect::<Vec<_>>())
            .finish()
    }
}
