//! The contract between the engine and the stamp providers.
//!
//! A provider resolves every matrix and right-hand side location it needs
//! once, in [`Behavior::bind`], and keeps the returned handles. Every
//! Newton-Raphson iteration then calls [`Behavior::load`], which only adds
//! numbers through those handles.

use crate::circuit::{VariableId, VariableSet};
use crate::error::Result;
use crate::sparse::{ElementId, VectorId};

use super::lu::SparseSolver;
use super::newton::IterationState;

/// A (row, column) pair in external coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixLocation {
    pub row: usize,
    pub column: usize,
}

impl MatrixLocation {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }

    /// Location of the equation of `row` coupling to unknown `column`.
    pub fn between(row: VariableId, column: VariableId) -> Self {
        Self::new(row.index(), column.index())
    }
}

impl From<(usize, usize)> for MatrixLocation {
    fn from((row, column): (usize, usize)) -> Self {
        Self::new(row, column)
    }
}

impl From<(VariableId, VariableId)> for MatrixLocation {
    fn from((row, column): (VariableId, VariableId)) -> Self {
        Self::between(row, column)
    }
}

/// A fixed list of matrix and right-hand side elements loaded together.
///
/// `add` takes one flat slice: the matrix deltas in location order, followed
/// by the right-hand side deltas.
#[derive(Debug, Clone, Default)]
pub struct ElementSet {
    elements: Vec<ElementId>,
    rhs: Vec<VectorId>,
}

impl ElementSet {
    /// Resolve `locations` and `rhs_rows` in `solver`.
    pub fn new<L>(solver: &mut SparseSolver, locations: &[L], rhs_rows: &[VariableId]) -> Self
    where
        L: Copy + Into<MatrixLocation>,
    {
        let elements = locations
            .iter()
            .map(|&l| {
                let l: MatrixLocation = l.into();
                solver.get_element(l.row, l.column)
            })
            .collect();
        let rhs = rhs_rows
            .iter()
            .map(|row| solver.get_rhs_element(row.index()))
            .collect();
        Self { elements, rhs }
    }

    /// Number of values `add` expects.
    pub fn len(&self) -> usize {
        self.elements.len() + self.rhs.len()
    }

    /// True if the set holds no element.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add `values` to the elements of the set.
    ///
    /// # Panics
    ///
    /// If `values` does not hold exactly [`len`](Self::len) entries.
    pub fn add(&self, solver: &mut SparseSolver, values: &[f64]) {
        assert_eq!(
            values.len(),
            self.len(),
            "element set expects {} values",
            self.len()
        );
        let (matrix, rhs) = values.split_at(self.elements.len());
        for (&id, &v) in self.elements.iter().zip(matrix) {
            solver.add(id, v);
        }
        for (&id, &v) in self.rhs.iter().zip(rhs) {
            solver.add_rhs(id, v);
        }
    }
}

/// A fixed integration step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeStep {
    /// Step size in seconds
    pub dt: f64,
    /// Time of the point being solved
    pub time: f64,
}

/// What kind of solution is being computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Analysis {
    /// Operating point: capacitors open, inductors shorted
    Dc,
    /// One point of a fixed-step transient analysis
    Transient(TimeStep),
}

/// Handed to [`Behavior::bind`] to allocate variables and elements.
pub struct BindContext<'a> {
    pub solver: &'a mut SparseSolver,
    pub variables: &'a mut VariableSet,
}

impl<'a> BindContext<'a> {
    pub fn new(solver: &'a mut SparseSolver, variables: &'a mut VariableSet) -> Self {
        Self { solver, variables }
    }

    /// Get or create the voltage variable of a node.
    pub fn node(&mut self, name: &str) -> VariableId {
        self.variables.node(name)
    }

    /// Create the branch current variable of `owner`.
    pub fn branch(&mut self, owner: &str) -> Result<VariableId> {
        self.variables.branch(&format!("{owner}#branch"))
    }

    /// Get or create one matrix element.
    pub fn element(&mut self, row: VariableId, column: VariableId) -> ElementId {
        self.solver.get_element(row.index(), column.index())
    }

    /// Get or create one right-hand side element.
    pub fn rhs(&mut self, row: VariableId) -> VectorId {
        self.solver.get_rhs_element(row.index())
    }

    /// Resolve a batch of elements.
    pub fn element_set<L>(&mut self, locations: &[L], rhs_rows: &[VariableId]) -> ElementSet
    where
        L: Copy + Into<MatrixLocation>,
    {
        ElementSet::new(self.solver, locations, rhs_rows)
    }
}

/// Handed to [`Behavior::load`] once per iteration.
pub struct LoadContext<'a> {
    pub solver: &'a mut SparseSolver,
    /// Solution of the previous iteration
    pub solution: &'a [f64],
    pub state: IterationState,
    pub analysis: Analysis,
    convergent: &'a mut bool,
}

impl<'a> LoadContext<'a> {
    pub fn new(
        solver: &'a mut SparseSolver,
        solution: &'a [f64],
        state: IterationState,
        analysis: Analysis,
        convergent: &'a mut bool,
    ) -> Self {
        Self {
            solver,
            solution,
            state,
            analysis,
            convergent,
        }
    }

    /// Value of a variable in the previous iteration.
    pub fn value(&self, id: VariableId) -> f64 {
        self.solution.get(id.index()).copied().unwrap_or(0.0)
    }

    /// Mark the current iteration as not converged, e.g. after limiting.
    pub fn flag_nonconvergent(&mut self) {
        *self.convergent = false;
    }

    /// Whether nothing has flagged this iteration yet.
    pub fn is_convergent(&self) -> bool {
        *self.convergent
    }
}

/// Tolerances and solutions for a device-level convergence check.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceContext<'a> {
    pub solution: &'a [f64],
    pub old_solution: &'a [f64],
    pub reltol: f64,
    pub vntol: f64,
    pub abstol: f64,
}

/// A stamp provider.
///
/// Implementations own their element handles. `load` must not allocate
/// new elements: the sparsity pattern is fixed after `bind`.
pub trait Behavior: Send {
    /// Unique name, used in diagnostics.
    fn name(&self) -> &str;

    /// Allocate variables and resolve element handles.
    fn bind(&mut self, ctx: &mut BindContext<'_>) -> Result<()>;

    /// Add this iteration's contributions.
    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()>;

    /// Whether the contributions depend on the solution.
    fn is_nonlinear(&self) -> bool {
        false
    }

    /// Device-level convergence check.
    ///
    /// Consulted after the per-variable test. The engine logs a `false`
    /// result but does not act on it: a device that wants another
    /// iteration calls [`LoadContext::flag_nonconvergent`].
    fn is_convergent(&self, _ctx: &ConvergenceContext<'_>) -> bool {
        true
    }

    /// Called with the new solution after every solve.
    fn update(&mut self, _solution: &[f64]) -> Result<()> {
        Ok(())
    }

    /// Called once a time point has converged.
    fn accept(&mut self, _solution: &[f64], _step: &TimeStep) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_element_set_applies_matrix_then_rhs() {
        let mut solver = SparseSolver::new();
        let (a, b) = (VariableId(1), VariableId(2));
        let set = ElementSet::new(
            &mut solver,
            &[(a, a), (a, b), (b, a), (b, b)],
            &[a, VariableId::GROUND],
        );
        assert_eq!(set.len(), 6);

        set.add(&mut solver, &[1.0, -1.0, -1.0, 1.0, 0.5, 9.0]);
        set.add(&mut solver, &[1.0, -1.0, -1.0, 1.0, 0.5, 9.0]);
        let ab = solver.find_element(1, 2).unwrap();
        assert_relative_eq!(solver.value(ab), -2.0);
        let rhs = solver.find_rhs_element(1).unwrap();
        assert_relative_eq!(solver.rhs_value(rhs), 1.0);
    }

    #[test]
    #[should_panic(expected = "element set expects 2 values")]
    fn test_element_set_rejects_wrong_length() {
        let mut solver = SparseSolver::new();
        let set = ElementSet::new(&mut solver, &[(1usize, 1usize)], &[VariableId(1)]);
        set.add(&mut solver, &[1.0]);
    }

    #[test]
    fn test_load_context_flag() {
        let mut solver = SparseSolver::new();
        let mut convergent = true;
        let solution = [0.0, 2.5];
        let mut ctx = LoadContext::new(
            &mut solver,
            &solution,
            IterationState::default(),
            Analysis::Dc,
            &mut convergent,
        );
        assert_relative_eq!(ctx.value(VariableId(1)), 2.5);
        assert_relative_eq!(ctx.value(VariableId(7)), 0.0);
        ctx.flag_nonconvergent();
        assert!(!ctx.is_convergent());
        assert!(!convergent);
    }
}
