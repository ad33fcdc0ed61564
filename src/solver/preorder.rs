//! Structural passes specific to Modified Nodal Analysis.
//!
//! Both passes work on internal coordinates through a
//! [`PreconditionContext`] and run before any pivot search.

use crate::sparse::{ElementId, SparseMatrix};

use super::lu::PreconditionContext;

/// Move the ±1 pairs of voltage-source style branches onto the diagonal.
///
/// A branch variable produces the pattern
///
/// ```text
/// ? ... 1
/// .  \  .
/// 1 ... 0
/// ```
///
/// Exchanging the two columns puts both ones on the diagonal. Columns with a
/// single such pair ("lone twins") are handled first; when only columns with
/// several pairs remain, one of them is swapped and the search starts over.
/// Only the rows and columns a factorization eliminates are considered.
pub fn preorder_mna(ctx: &mut PreconditionContext<'_>) {
    let size = ctx.order();
    let mut start = 1;

    loop {
        let mut swapped = false;
        let mut another_pass = false;

        for j in start..=size {
            if has_diagonal(ctx.matrix(), j) {
                continue;
            }
            let (twins, partner) = count_twins(ctx.matrix(), j, size);
            if twins == 1 {
                if let Some(column) = partner {
                    ctx.swap_columns(column, j);
                    swapped = true;
                }
            } else if twins > 1 && !another_pass {
                another_pass = true;
                start = j;
            }
        }

        if !another_pass {
            break;
        }

        let mut j = start;
        while !swapped && j <= size {
            if !has_diagonal(ctx.matrix(), j) {
                if let (_, Some(column)) = count_twins(ctx.matrix(), j, size) {
                    ctx.swap_columns(column, j);
                    swapped = true;
                }
            }
            j += 1;
        }

        if !swapped {
            // Twins were counted but none could be used
            break;
        }
    }
}

/// Add `gmin` to every diagonal that already exists.
pub fn apply_diagonal_gmin(ctx: &mut PreconditionContext<'_>, gmin: f64) {
    if gmin <= 0.0 {
        return;
    }
    for i in 1..=ctx.size() {
        if let Some(diagonal) = ctx.matrix().find_diagonal_element(i) {
            ctx.add(diagonal, gmin);
        }
    }
}

fn has_diagonal(matrix: &SparseMatrix, index: usize) -> bool {
    matrix
        .find_diagonal_element(index)
        .is_some_and(|id| matrix[id] != 0.0)
}

/// Count the symmetric unit pairs hanging off `column`.
///
/// Returns the count, stopping at two, and the column of the transposed
/// element of the last pair found.
fn count_twins(matrix: &SparseMatrix, column: usize, size: usize) -> (usize, Option<usize>) {
    let mut twins = 0;
    let mut partner = None;

    for first in matrix.column_elements(column) {
        let row = matrix.row(first);
        if row > size {
            break;
        }
        if matrix[first].abs() != 1.0 {
            continue;
        }
        let second = matrix
            .column_elements(row)
            .find(|&id| matrix.row(id) == column);
        if let Some(second) = second.filter(|&id| is_unit(matrix, id)) {
            twins += 1;
            partner = Some(matrix.column(second));
            if twins >= 2 {
                break;
            }
        }
    }
    (twins, partner)
}

fn is_unit(matrix: &SparseMatrix, id: ElementId) -> bool {
    matrix[id].abs() == 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::lu::SparseSolver;
    use approx::assert_relative_eq;

    /// Source V1 between node 1 and ground, 1 kOhm from node 1 to node 2,
    /// 1 kOhm from node 2 to ground. Variable 3 is the branch current.
    fn divider() -> SparseSolver {
        let mut solver = SparseSolver::new();
        let g = 1e-3;
        for &(r, c, v) in &[
            (1, 1, g),
            (1, 2, -g),
            (2, 1, -g),
            (2, 2, 2.0 * g),
            (1, 3, 1.0),
            (3, 1, 1.0),
        ] {
            let id = solver.get_element(r, c);
            solver.add(id, v);
        }
        let id = solver.get_rhs_element(3);
        solver.add_rhs(id, 1.0);
        solver
    }

    #[test]
    fn test_lone_twins_land_on_diagonal() {
        let mut solver = divider();
        assert!(solver.find_element(3, 3).is_none());
        solver.precondition(|ctx| preorder_mna(ctx));

        for i in 1..=3 {
            let diagonal = solver.matrix().find_diagonal_element(i);
            assert!(diagonal.is_some(), "diagonal {i} missing");
        }

        // Reordering must not change the answer
        assert_eq!(solver.order_and_factor(), 3);
        let mut x = vec![0.0; 4];
        solver.solve(&mut x).unwrap();
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(x[2], 0.5, epsilon = 1e-12);
        assert_relative_eq!(x[3], -1.0 / 2000.0, epsilon = 1e-15);
    }

    #[test]
    fn test_diagonal_gmin_only_touches_existing_diagonals() {
        let mut solver = divider();
        solver.precondition(|ctx| apply_diagonal_gmin(ctx, 1e-6));
        let d1 = solver.find_element(1, 1).unwrap();
        assert_relative_eq!(solver.value(d1), 1e-3 + 1e-6);
        assert!(solver.find_element(3, 3).is_none());

        solver.precondition(|ctx| apply_diagonal_gmin(ctx, 0.0));
        assert_relative_eq!(solver.value(d1), 1e-3 + 1e-6);
    }
}
