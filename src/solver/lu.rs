//! Sparse LU solver with Markowitz reordering.
//!
//! The solver owns the matrix, the right-hand side and two [`Translation`]s.
//! Callers always address the system in external coordinates; the
//! translations follow every row and column exchange made while pivoting.
//!
//! The factors are stored in place: the reciprocal of each pivot sits on the
//! diagonal, `L` below it and the unit upper triangle `U` to its right.
//!
//! With a nonzero degeneracy only the leading `size - degeneracy` rows and
//! columns are eliminated. The trailing block is left as the Schur complement
//! for an outer solver, see [`SparseSolver::forward_reduce`].

use log::debug;

use crate::error::{NodalError, Result};
use crate::sparse::{ElementId, SparseMatrix, SparseVector, VectorId};

use super::markowitz::{Markowitz, PivotConfig};
use super::stamp::MatrixLocation;
use super::translation::Translation;

/// Sparse LU solver for `A x = b`.
#[derive(Debug, Clone)]
pub struct SparseSolver {
    matrix: SparseMatrix,
    rhs: SparseVector,
    row: Translation,
    column: Translation,
    markowitz: Markowitz,
    intermediate: Vec<f64>,
    degeneracy: usize,
    pivot_search_reduction: usize,
    is_factored: bool,
    needs_reordering: bool,
    fillins: usize,
    singular_row: Option<usize>,
}

impl Default for SparseSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseSolver {
    /// Create an empty solver with default pivot thresholds.
    pub fn new() -> Self {
        Self::with_config(PivotConfig::default())
    }

    /// Create an empty solver with the given pivot thresholds.
    pub fn with_config(config: PivotConfig) -> Self {
        Self {
            matrix: SparseMatrix::new(),
            rhs: SparseVector::new(),
            row: Translation::new(),
            column: Translation::new(),
            markowitz: Markowitz::new(config),
            intermediate: vec![0.0],
            degeneracy: 0,
            pivot_search_reduction: 0,
            is_factored: false,
            needs_reordering: true,
            fillins: 0,
            singular_row: None,
        }
    }

    /// Number of unknowns.
    pub fn size(&self) -> usize {
        self.matrix.size().max(self.rhs.len())
    }

    /// Number of rows eliminated by a factorization.
    pub fn order(&self) -> usize {
        self.size().saturating_sub(self.degeneracy)
    }

    /// Grow the system to at least `size` unknowns.
    pub fn resize(&mut self, size: usize) {
        self.matrix.resize(size);
        self.rhs.resize(size);
        self.row.resize(size);
        self.column.resize(size);
        if self.intermediate.len() < size + 1 {
            self.intermediate.resize(size + 1, 0.0);
        }
    }

    /// Pivot thresholds and Markowitz strategy chain.
    pub fn markowitz(&self) -> &Markowitz {
        &self.markowitz
    }

    /// Mutable access to the pivoting parameters.
    pub fn markowitz_mut(&mut self) -> &mut Markowitz {
        self.needs_reordering = true;
        &mut self.markowitz
    }

    /// Number of trailing rows and columns left unfactored.
    pub fn degeneracy(&self) -> usize {
        self.degeneracy
    }

    /// Leave the last `degeneracy` rows and columns unfactored.
    pub fn set_degeneracy(&mut self, degeneracy: usize) {
        self.degeneracy = degeneracy;
        self.needs_reordering = true;
    }

    /// Number of trailing rows and columns excluded from the pivot search.
    pub fn pivot_search_reduction(&self) -> usize {
        self.pivot_search_reduction
    }

    /// Exclude the last `reduction` rows and columns from the pivot search.
    pub fn set_pivot_search_reduction(&mut self, reduction: usize) {
        self.pivot_search_reduction = reduction;
        self.needs_reordering = true;
    }

    /// True after a successful factorization, until the next reset.
    pub fn is_factored(&self) -> bool {
        self.is_factored
    }

    /// True if the next factorization has to search for pivots.
    pub fn needs_reordering(&self) -> bool {
        self.needs_reordering
    }

    /// Force the next [`order_and_factor`](Self::order_and_factor) to search
    /// for new pivots.
    pub fn request_reordering(&mut self) {
        self.needs_reordering = true;
    }

    /// Number of fill-ins created so far.
    pub fn fillins(&self) -> usize {
        self.fillins
    }

    /// External row that could not be pivoted by the last failed ordering.
    pub fn singular_row(&self) -> Option<usize> {
        self.singular_row
    }

    /// The matrix in internal coordinates.
    pub fn matrix(&self) -> &SparseMatrix {
        &self.matrix
    }

    /// The right-hand side in internal coordinates.
    pub fn rhs(&self) -> &SparseVector {
        &self.rhs
    }

    /// Map an external location to its current internal position.
    pub fn external_to_internal(&self, location: MatrixLocation) -> MatrixLocation {
        MatrixLocation::new(self.row.get(location.row), self.column.get(location.column))
    }

    /// Map an internal position back to the external location.
    pub fn internal_to_external(&self, location: MatrixLocation) -> MatrixLocation {
        MatrixLocation::new(
            self.row.reverse(location.row),
            self.column.reverse(location.column),
        )
    }

    /// Get or create the matrix element at an external location.
    pub fn get_element(&mut self, row: usize, column: usize) -> ElementId {
        if row == 0 || column == 0 {
            return ElementId::GROUND;
        }
        self.resize(row.max(column));
        let (r, c) = (self.row.get(row), self.column.get(column));
        self.matrix.get_element(r, c)
    }

    /// Find the matrix element at an external location.
    pub fn find_element(&self, row: usize, column: usize) -> Option<ElementId> {
        if row == 0 || column == 0 {
            return None;
        }
        self.matrix
            .find_element(self.row.get(row), self.column.get(column))
    }

    /// Get or create the right-hand side element of an external row.
    pub fn get_rhs_element(&mut self, row: usize) -> VectorId {
        if row == 0 {
            return VectorId::GROUND;
        }
        self.resize(row);
        let r = self.row.get(row);
        self.rhs.get_element(r)
    }

    /// Find the right-hand side element of an external row.
    pub fn find_rhs_element(&self, row: usize) -> Option<VectorId> {
        if row == 0 {
            return None;
        }
        self.rhs.find_element(self.row.get(row))
    }

    /// Remove the matrix element at an external location.
    ///
    /// Returns `false` if there was nothing to remove.
    pub fn remove_element(&mut self, row: usize, column: usize) -> bool {
        match self.find_element(row, column) {
            Some(id) => {
                self.matrix.remove_element(id);
                self.needs_reordering = true;
                true
            }
            None => false,
        }
    }

    /// Add to a matrix element.
    pub fn add(&mut self, id: ElementId, value: f64) {
        self.matrix[id] += value;
    }

    /// Current value of a matrix element.
    pub fn value(&self, id: ElementId) -> f64 {
        self.matrix[id]
    }

    /// Add to a right-hand side element.
    pub fn add_rhs(&mut self, id: VectorId, value: f64) {
        self.rhs[id] += value;
    }

    /// Current value of a right-hand side element.
    pub fn rhs_value(&self, id: VectorId) -> f64 {
        self.rhs[id]
    }

    /// Zero the matrix and right-hand side, keeping structure and ordering.
    pub fn reset(&mut self) {
        self.matrix.reset();
        self.rhs.reset();
        self.is_factored = false;
    }

    /// Drop every element and restore the identity ordering.
    pub fn clear(&mut self) {
        self.matrix.clear();
        self.rhs.clear();
        self.row.reset();
        self.column.reset();
        self.is_factored = false;
        self.needs_reordering = true;
        self.fillins = 0;
        self.singular_row = None;
    }

    /// Run a structural transformation on the raw system before pivoting.
    pub fn precondition<F>(&mut self, transform: F)
    where
        F: FnOnce(&mut PreconditionContext<'_>),
    {
        let mut context = PreconditionContext { solver: self };
        transform(&mut context);
    }

    /// Choose pivots and factor.
    ///
    /// Returns the number of rows eliminated. Anything short of
    /// [`order`](Self::order) means no acceptable pivot was left; the
    /// offending row is available from [`singular_row`](Self::singular_row).
    pub fn order_and_factor(&mut self) -> usize {
        let size = self.size();
        self.resize(size);
        let order = self.order();
        let max = size.saturating_sub(self.pivot_search_reduction);
        self.is_factored = false;
        self.singular_row = None;

        let mut step = 1;
        if !self.needs_reordering {
            // Keep the previous ordering as long as its pivots hold up
            while step <= order {
                match self.matrix.find_diagonal_element(step) {
                    Some(pivot) if self.markowitz.is_valid_pivot(&self.matrix, pivot, max) => {
                        self.eliminate(pivot, false);
                    }
                    _ => {
                        self.needs_reordering = true;
                        break;
                    }
                }
                step += 1;
            }
            if !self.needs_reordering {
                self.is_factored = true;
                return order;
            }
            debug!("pivot at step {step} no longer acceptable, reordering");
        }

        self.markowitz.setup(&self.matrix, &self.rhs, step, max);
        while step <= order {
            let Some(pivot) = self.markowitz.find_pivot(&self.matrix, step, max) else {
                let row = self.locate_singular_row(step, max);
                debug!("no pivot at step {step}, row {row} is singular");
                self.singular_row = Some(row);
                return step - 1;
            };
            self.move_pivot(pivot.element, step);
            self.markowitz.update(&self.matrix, pivot.element, max);
            self.eliminate(pivot.element, true);
            step += 1;
        }

        self.is_factored = true;
        self.needs_reordering = false;
        order
    }

    /// Factor with the current ordering.
    ///
    /// Returns `false` when a diagonal pivot is missing or below the absolute
    /// threshold; the solver then needs [`order_and_factor`](Self::order_and_factor).
    pub fn factor(&mut self) -> bool {
        self.is_factored = false;
        if self.needs_reordering {
            return false;
        }
        let size = self.size();
        self.resize(size);
        let absolute = self.markowitz.config().absolute_threshold;
        for step in 1..=self.order() {
            match self.matrix.find_diagonal_element(step) {
                Some(pivot) if self.matrix[pivot].abs() > absolute => self.eliminate(pivot, false),
                _ => {
                    self.needs_reordering = true;
                    return false;
                }
            }
        }
        self.is_factored = true;
        true
    }

    /// Solve the factored system.
    ///
    /// `solution` is indexed by external variable and must hold at least
    /// `size + 1` entries. Unknowns beyond [`order`](Self::order) are read from
    /// `solution` rather than computed.
    pub fn solve(&mut self, solution: &mut [f64]) -> Result<()> {
        if !self.is_factored {
            return Err(NodalError::NotFactored);
        }
        let size = self.size();
        if solution.len() < size + 1 {
            return Err(NodalError::DimensionMismatch {
                expected: size + 1,
                actual: solution.len(),
            });
        }

        self.forward();
        let order = self.order();
        for i in order + 1..=size {
            self.intermediate[i] = solution[self.column.reverse(i)];
        }
        self.backward();

        for i in 1..=size {
            solution[self.column.reverse(i)] = self.intermediate[i];
        }
        solution[0] = 0.0;
        Ok(())
    }

    /// Solve the transposed system `Aᵀ x = b` with the same factors.
    ///
    /// `rhs` and `solution` are indexed by external variable. Only defined for
    /// a full factorization.
    pub fn solve_transposed(&mut self, rhs: &[f64], solution: &mut [f64]) -> Result<()> {
        if !self.is_factored {
            return Err(NodalError::NotFactored);
        }
        if self.degeneracy > 0 {
            return Err(NodalError::invalid_config(
                "transposed solve requires a full factorization",
            ));
        }
        let size = self.size();
        for len in [rhs.len(), solution.len()] {
            if len < size + 1 {
                return Err(NodalError::DimensionMismatch {
                    expected: size + 1,
                    actual: len,
                });
            }
        }

        // Uᵀ z = b, where U has a unit diagonal
        self.intermediate.clear();
        self.intermediate.resize(size + 1, 0.0);
        for i in 1..=size {
            self.intermediate[i] = rhs[self.column.reverse(i)];
        }
        for step in 1..=size {
            let temp = self.intermediate[step];
            if temp == 0.0 {
                continue;
            }
            if let Some(pivot) = self.matrix.find_diagonal_element(step) {
                let mut cursor = self.matrix.right(pivot);
                while let Some(id) = cursor {
                    self.intermediate[self.matrix.column(id)] -= temp * self.matrix[id];
                    cursor = self.matrix.right(id);
                }
            }
        }

        // Lᵀ x = z
        for step in (1..=size).rev() {
            let Some(pivot) = self.matrix.find_diagonal_element(step) else {
                continue;
            };
            let mut temp = self.intermediate[step];
            let mut cursor = self.matrix.below(pivot);
            while let Some(id) = cursor {
                temp -= self.matrix[id] * self.intermediate[self.matrix.row(id)];
                cursor = self.matrix.below(id);
            }
            self.intermediate[step] = temp * self.matrix[pivot];
        }

        for i in 1..=size {
            solution[self.row.reverse(i)] = self.intermediate[i];
        }
        solution[0] = 0.0;
        Ok(())
    }

    /// Apply the forward elimination to the right-hand side only.
    ///
    /// Afterwards [`reduced_rhs`](Self::reduced_rhs) holds, for every row
    /// beyond the order, the right-hand side of the Schur complement left in
    /// the trailing block of the matrix.
    pub fn forward_reduce(&mut self) -> Result<()> {
        if !self.is_factored {
            return Err(NodalError::NotFactored);
        }
        self.forward();
        Ok(())
    }

    /// Right-hand side of an internal row after [`forward_reduce`](Self::forward_reduce).
    pub fn reduced_rhs(&self, internal_row: usize) -> f64 {
        self.intermediate.get(internal_row).copied().unwrap_or(0.0)
    }

    /// Scatter the right-hand side and run forward substitution.
    fn forward(&mut self) {
        let size = self.size();
        self.intermediate.clear();
        self.intermediate.resize(size + 1, 0.0);
        for (index, value) in self.rhs.iter() {
            self.intermediate[index] = value;
        }

        for step in 1..=self.order() {
            let temp = self.intermediate[step];
            if temp == 0.0 {
                continue;
            }
            let Some(pivot) = self.matrix.find_diagonal_element(step) else {
                continue;
            };
            let temp = temp * self.matrix[pivot];
            self.intermediate[step] = temp;
            let mut cursor = self.matrix.below(pivot);
            while let Some(id) = cursor {
                self.intermediate[self.matrix.row(id)] -= temp * self.matrix[id];
                cursor = self.matrix.below(id);
            }
        }
    }

    fn backward(&mut self) {
        for step in (1..=self.order()).rev() {
            let Some(pivot) = self.matrix.find_diagonal_element(step) else {
                continue;
            };
            let mut temp = self.intermediate[step];
            let mut cursor = self.matrix.right(pivot);
            while let Some(id) = cursor {
                temp -= self.matrix[id] * self.intermediate[self.matrix.column(id)];
                cursor = self.matrix.right(id);
            }
            self.intermediate[step] = temp;
        }
    }

    /// Eliminate the submatrix right of and below `pivot`.
    fn eliminate(&mut self, pivot: ElementId, track_fillins: bool) {
        let inverse = 1.0 / self.matrix[pivot];
        self.matrix[pivot] = inverse;

        let mut upper = self.matrix.right(pivot);
        while let Some(u) = upper {
            self.matrix[u] *= inverse;
            upper = self.matrix.right(u);
        }

        let mut upper = self.matrix.right(pivot);
        while let Some(u) = upper {
            let factor = self.matrix[u];
            let column = self.matrix.column(u);
            let mut sub = self.matrix.below(u);
            let mut lower = self.matrix.below(pivot);
            while let Some(l) = lower {
                let row = self.matrix.row(l);
                while let Some(s) = sub {
                    if self.matrix.row(s) >= row {
                        break;
                    }
                    sub = self.matrix.below(s);
                }
                let target = match sub {
                    Some(s) if self.matrix.row(s) == row => s,
                    _ => {
                        self.fillins += 1;
                        if track_fillins {
                            self.markowitz.create_fillin(row, column);
                        }
                        self.matrix.get_element(row, column)
                    }
                };
                self.matrix[target] -= factor * self.matrix[l];
                sub = Some(target);
                lower = self.matrix.below(l);
            }
            upper = self.matrix.right(u);
        }
    }

    /// Bring `pivot` to the diagonal position `step`.
    fn move_pivot(&mut self, pivot: ElementId, step: usize) {
        let (row, column) = (self.matrix.row(pivot), self.matrix.column(pivot));
        self.markowitz.move_pivot(row, column, step);
        if row != step {
            self.swap_rows(row, step);
        }
        if column != step {
            self.swap_columns(column, step);
        }
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        self.matrix.swap_rows(a, b);
        self.rhs.swap_elements(a, b);
        self.row.swap(a, b);
    }

    fn swap_columns(&mut self, a: usize, b: usize) {
        self.matrix.swap_columns(a, b);
        self.column.swap(a, b);
    }

    /// Find the external index of a remaining row without usable entries.
    fn locate_singular_row(&self, step: usize, max: usize) -> usize {
        let absolute = self.markowitz.config().absolute_threshold;
        let empty = (step..=max).find(|&r| {
            self.matrix
                .row_elements(r)
                .filter(|&id| (step..=max).contains(&self.matrix.column(id)))
                .all(|id| self.matrix[id].abs() <= absolute)
        });
        self.row.reverse(empty.unwrap_or(step))
    }
}

/// Raw access to a solver's system for structural passes.
///
/// Locations are internal. Row and column exchanges made here keep the
/// translations and the right-hand side consistent.
pub struct PreconditionContext<'a> {
    solver: &'a mut SparseSolver,
}

impl PreconditionContext<'_> {
    /// Number of unknowns.
    pub fn size(&self) -> usize {
        self.solver.size()
    }

    /// Number of rows a factorization eliminates.
    pub fn order(&self) -> usize {
        self.solver.order()
    }

    /// The matrix in internal coordinates.
    pub fn matrix(&self) -> &SparseMatrix {
        &self.solver.matrix
    }

    /// Get or create an element at an internal location.
    pub fn get_element(&mut self, row: usize, column: usize) -> ElementId {
        self.solver.resize(row.max(column));
        self.solver.matrix.get_element(row, column)
    }

    /// Get or create a right-hand side element at an internal row.
    pub fn get_rhs_element(&mut self, row: usize) -> VectorId {
        self.solver.resize(row);
        self.solver.rhs.get_element(row)
    }

    /// Add to a matrix element.
    pub fn add(&mut self, id: ElementId, value: f64) {
        self.solver.matrix[id] += value;
    }

    /// Overwrite a matrix element.
    pub fn set(&mut self, id: ElementId, value: f64) {
        self.solver.matrix[id] = value;
    }

    /// Overwrite a right-hand side element.
    pub fn set_rhs(&mut self, id: VectorId, value: f64) {
        self.solver.rhs[id] = value;
    }

    /// Exchange two internal rows.
    pub fn swap_rows(&mut self, a: usize, b: usize) {
        if a != b {
            self.solver.swap_rows(a, b);
            self.solver.needs_reordering = true;
        }
    }

    /// Exchange two internal columns.
    pub fn swap_columns(&mut self, a: usize, b: usize) {
        if a != b {
            self.solver.swap_columns(a, b);
            self.solver.needs_reordering = true;
        }
    }

    /// Map an external location to its current internal position.
    pub fn external_to_internal(&self, location: MatrixLocation) -> MatrixLocation {
        self.solver.external_to_internal(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Load a dense row-major matrix and right-hand side, inserting elements
    /// in the given order.
    fn load(solver: &mut SparseSolver, a: &[Vec<f64>], b: &[f64], order: &[(usize, usize)]) {
        for &(r, c) in order {
            if a[r - 1][c - 1] != 0.0 {
                let id = solver.get_element(r, c);
                solver.add(id, a[r - 1][c - 1]);
            }
        }
        for (i, &v) in b.iter().enumerate() {
            if v != 0.0 {
                let id = solver.get_rhs_element(i + 1);
                solver.add_rhs(id, v);
            }
        }
    }

    fn residual(a: &[Vec<f64>], x: &[f64], b: &[f64]) -> f64 {
        let mut worst = 0.0f64;
        for (i, row) in a.iter().enumerate() {
            let ax: f64 = row.iter().enumerate().map(|(j, v)| v * x[j + 1]).sum();
            worst = worst.max((ax - b[i]).abs());
        }
        worst
    }

    fn sample_system() -> (Vec<Vec<f64>>, Vec<f64>) {
        let a = vec![
            vec![0.0, 2.0, 0.0, 1.0, 0.0],
            vec![1.0, 0.0, 3.0, 0.0, 0.0],
            vec![0.0, 4.0, 1.0, 0.0, 2.0],
            vec![5.0, 0.0, 0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0, 6.0],
        ];
        let b = vec![1.0, -2.0, 3.0, 0.5, 4.0];
        (a, b)
    }

    fn all_locations(n: usize) -> Vec<(usize, usize)> {
        (1..=n).flat_map(|r| (1..=n).map(move |c| (r, c))).collect()
    }

    #[test]
    fn test_round_trip_independent_of_insertion_order() {
        let (a, b) = sample_system();
        let forward = all_locations(5);
        let mut backward = forward.clone();
        backward.reverse();
        let mut shuffled = forward.clone();
        shuffled.sort_by_key(|&(r, c)| (r * 7 + c * 3) % 11);

        let mut results = Vec::new();
        for order in [forward, backward, shuffled] {
            let mut solver = SparseSolver::new();
            load(&mut solver, &a, &b, &order);
            assert_eq!(solver.order_and_factor(), 5);
            let mut x = vec![0.0; 6];
            solver.solve(&mut x).unwrap();
            assert!(residual(&a, &x, &b) < 1e-12);
            results.push(x);
        }
        for x in &results[1..] {
            for i in 1..=5 {
                assert_relative_eq!(x[i], results[0][i], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_external_locations_survive_reordering() {
        let (a, b) = sample_system();
        let mut solver = SparseSolver::new();
        load(&mut solver, &a, &b, &all_locations(5));
        let handle = solver.find_element(3, 5).unwrap();
        solver.order_and_factor();

        // The element moved internally but is still found at (3, 5)
        assert_eq!(solver.find_element(3, 5), Some(handle));
        let internal = solver.external_to_internal(MatrixLocation::new(3, 5));
        assert_eq!(solver.matrix().row(handle), internal.row);
        assert_eq!(solver.matrix().column(handle), internal.column);
        assert_eq!(
            solver.internal_to_external(internal),
            MatrixLocation::new(3, 5)
        );
    }

    #[test]
    fn test_reset_and_restamp_reproduces_solution() {
        let (a, b) = sample_system();
        let locations = all_locations(5);
        let mut solver = SparseSolver::new();
        load(&mut solver, &a, &b, &locations);
        solver.order_and_factor();
        let mut first = vec![0.0; 6];
        solver.solve(&mut first).unwrap();
        let fillins = solver.fillins();

        solver.reset();
        load(&mut solver, &a, &b, &locations);
        assert!(solver.factor());
        let mut second = vec![0.0; 6];
        solver.solve(&mut second).unwrap();

        assert_eq!(solver.fillins(), fillins);
        for i in 1..=5 {
            assert_relative_eq!(first[i], second[i], epsilon = 1e-14);
        }
    }

    #[test]
    fn test_factor_reports_small_pivot() {
        let mut solver = SparseSolver::new();
        let d1 = solver.get_element(1, 1);
        let d2 = solver.get_element(2, 2);
        let o = solver.get_element(1, 2);
        solver.add(d1, 1.0);
        solver.add(d2, 1.0);
        solver.add(o, 1.0);
        assert_eq!(solver.order_and_factor(), 2);

        solver.reset();
        solver.add(o, 1.0);
        solver.add(d2, 1.0);
        assert!(!solver.factor());
        assert!(solver.needs_reordering());
    }

    #[test]
    fn test_reused_ordering_rejects_tiny_pivot() {
        let mut solver = SparseSolver::new();
        let d1 = solver.get_element(1, 1);
        let d2 = solver.get_element(2, 2);
        let b1 = solver.get_rhs_element(1);
        solver.add(d1, 1.0);
        solver.add(d2, 1.0);
        assert_eq!(solver.order_and_factor(), 2);
        assert!(!solver.needs_reordering());

        solver.reset();
        solver.add(d1, 1e-20);
        solver.add(d2, 1.0);
        solver.add_rhs(b1, 1.0);
        assert_eq!(solver.order_and_factor(), 1);
        assert!(!solver.is_factored());
        assert_eq!(solver.singular_row(), Some(1));
        let mut x = vec![0.0; 3];
        assert!(matches!(solver.solve(&mut x), Err(NodalError::NotFactored)));
    }

    #[test]
    fn test_singular_matrix_reports_rank() {
        let mut solver = SparseSolver::new();
        for &(r, c, v) in &[(1, 1, 1.0), (1, 2, 1.0), (2, 1, 1.0), (2, 2, 1.0), (3, 3, 2.0)] {
            let id = solver.get_element(r, c);
            solver.add(id, v);
        }
        assert_eq!(solver.order_and_factor(), 2);
        assert!(solver.singular_row().is_some());
        let mut x = vec![0.0; 4];
        assert!(matches!(solver.solve(&mut x), Err(NodalError::NotFactored)));
    }

    #[test]
    fn test_zero_row_is_identified() {
        let mut solver = SparseSolver::new();
        for &(r, c, v) in &[(1, 1, 2.0), (1, 3, 1.0), (3, 1, 1.0), (3, 3, 2.0), (2, 2, 0.0)] {
            let id = solver.get_element(r, c);
            solver.add(id, v);
        }
        assert_eq!(solver.order_and_factor(), 2);
        assert_eq!(solver.singular_row(), Some(2));
    }

    #[test]
    fn test_solve_rejects_short_vector() {
        let mut solver = SparseSolver::new();
        let id = solver.get_element(2, 2);
        solver.add(id, 1.0);
        let id = solver.get_element(1, 1);
        solver.add(id, 1.0);
        solver.order_and_factor();
        let mut x = vec![0.0; 2];
        assert!(matches!(
            solver.solve(&mut x),
            Err(NodalError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_solve_transposed() {
        let (a, b) = sample_system();
        let mut solver = SparseSolver::new();
        load(&mut solver, &a, &[0.0; 5], &all_locations(5));
        assert_eq!(solver.order_and_factor(), 5);

        let mut rhs = vec![0.0];
        rhs.extend_from_slice(&b);
        let mut x = vec![0.0; 6];
        solver.solve_transposed(&rhs, &mut x).unwrap();

        let at: Vec<Vec<f64>> = (0..5).map(|i| (0..5).map(|j| a[j][i]).collect()).collect();
        assert!(residual(&at, &x, &b) < 1e-12);
    }

    #[test]
    fn test_partial_factorization_leaves_schur_complement() {
        // [4 1] [x1]   [5]
        // [2 3] [x2] = [7]
        let mut solver = SparseSolver::new();
        for &(r, c, v) in &[(1, 1, 4.0), (1, 2, 1.0), (2, 1, 2.0), (2, 2, 3.0)] {
            let id = solver.get_element(r, c);
            solver.add(id, v);
        }
        let id = solver.get_rhs_element(1);
        solver.add_rhs(id, 5.0);
        let id = solver.get_rhs_element(2);
        solver.add_rhs(id, 7.0);
        solver.set_degeneracy(1);
        solver.set_pivot_search_reduction(1);

        assert_eq!(solver.order_and_factor(), 1);
        solver.forward_reduce().unwrap();

        // 3 - 2 * 1 / 4 and 7 - 2 * 5 / 4
        let trailing = solver.find_element(2, 2).unwrap();
        assert_relative_eq!(solver.value(trailing), 2.5);
        assert_relative_eq!(solver.reduced_rhs(2), 4.5);

        // Complete the solve with x2 = 4.5 / 2.5
        let mut x = vec![0.0, 0.0, 1.8];
        solver.solve(&mut x).unwrap();
        assert_relative_eq!(x[1], 0.8, epsilon = 1e-12);
        assert_relative_eq!(x[2], 1.8);
    }
}
