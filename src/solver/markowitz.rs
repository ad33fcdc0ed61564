//! Markowitz pivot selection.
//!
//! For every position `i` of the active submatrix we keep the number of other
//! elements in row `i` and in column `i`. Their product estimates the fill-in
//! caused by eliminating the diagonal at `i`. A product of zero marks a
//! singleton, which causes no fill-in at all.
//!
//! Pivots are chosen by an ordered chain of [`PivotStrategy`] values; the first
//! strategy that yields a pivot wins.

use log::debug;

use crate::sparse::{ElementId, SparseMatrix, SparseVector};

/// Counts are capped so that products stay well inside the integer range.
const MAX_MARKOWITZ_COUNT: usize = 46340;

/// Numerical thresholds for accepting pivots.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotConfig {
    /// A pivot must be larger than this fraction of the largest element in
    /// its column.
    pub relative_threshold: f64,
    /// A pivot must be larger than this magnitude.
    pub absolute_threshold: f64,
    /// Stop searching when the number of ties exceeds this multiple of the
    /// best product found so far.
    pub ties_multiplier: usize,
    /// Maximum number of tied diagonals compared numerically.
    pub max_ties: usize,
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self {
            relative_threshold: 1e-3,
            absolute_threshold: 1e-13,
            ties_multiplier: 5,
            max_ties: 100,
        }
    }
}

/// How confident the strategy that found a pivot is in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotQuality {
    /// No better choice exists.
    Good,
    /// Acceptable, a better one may exist.
    Suboptimal,
    /// Nothing passed the relative test; the largest element was taken.
    Bad,
}

/// A selected pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pivot {
    pub element: ElementId,
    pub quality: PivotQuality,
}

impl Pivot {
    fn new(element: ElementId, quality: PivotQuality) -> Self {
        Self { element, quality }
    }
}

/// A pivot search heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotStrategy {
    /// A row or column with a single element in the active submatrix.
    Singleton,
    /// The first diagonals with the lowest product, with an early exit for
    /// symmetric off-diagonal pairs.
    QuickDiagonal,
    /// All diagonals, lowest product that passes the relative test.
    Diagonal,
    /// Every element of the active submatrix.
    EntireMatrix,
}

impl PivotStrategy {
    /// The default search order.
    pub const CHAIN: [PivotStrategy; 4] = [
        PivotStrategy::Singleton,
        PivotStrategy::QuickDiagonal,
        PivotStrategy::Diagonal,
        PivotStrategy::EntireMatrix,
    ];

    /// Search the active submatrix `step..=max` for a pivot.
    pub fn find(
        self,
        markowitz: &Markowitz,
        matrix: &SparseMatrix,
        step: usize,
        max: usize,
    ) -> Option<Pivot> {
        if step == 0 || step > max {
            return None;
        }
        match self {
            PivotStrategy::Singleton => markowitz.search_singleton(matrix, step, max),
            PivotStrategy::QuickDiagonal => markowitz.search_quick_diagonal(matrix, step, max),
            PivotStrategy::Diagonal => markowitz.search_diagonal(matrix, step, max),
            PivotStrategy::EntireMatrix => markowitz.search_entire_matrix(matrix, step, max),
        }
    }
}

/// Markowitz bookkeeping plus the strategy chain.
#[derive(Debug, Clone)]
pub struct Markowitz {
    config: PivotConfig,
    strategies: Vec<PivotStrategy>,
    rows: Vec<usize>,
    columns: Vec<usize>,
    products: Vec<usize>,
}

impl Default for Markowitz {
    fn default() -> Self {
        Self::new(PivotConfig::default())
    }
}

impl Markowitz {
    /// Create the bookkeeping with the default strategy chain.
    pub fn new(config: PivotConfig) -> Self {
        Self {
            config,
            strategies: PivotStrategy::CHAIN.to_vec(),
            rows: Vec::new(),
            columns: Vec::new(),
            products: Vec::new(),
        }
    }

    /// Pivot thresholds.
    pub fn config(&self) -> &PivotConfig {
        &self.config
    }

    /// Replace the pivot thresholds.
    pub fn set_config(&mut self, config: PivotConfig) {
        self.config = config;
    }

    /// Replace the strategy chain.
    ///
    /// The chain should end with [`PivotStrategy::EntireMatrix`], otherwise a
    /// nonsingular matrix may be reported as singular.
    pub fn set_strategies(&mut self, strategies: Vec<PivotStrategy>) {
        self.strategies = strategies;
    }

    /// Other elements in row `i` of the active submatrix, plus one if the
    /// right-hand side has an element in that row.
    pub fn row_count(&self, i: usize) -> usize {
        self.rows[i]
    }

    /// Other elements in column `i` of the active submatrix.
    pub fn column_count(&self, i: usize) -> usize {
        self.columns[i]
    }

    /// Markowitz product of the diagonal at `i`.
    pub fn product(&self, i: usize) -> usize {
        self.products[i]
    }

    /// Check that `pivot` lies inside `max`, clears the absolute threshold and
    /// dominates the elements below it by the relative threshold.
    pub fn is_valid_pivot(&self, matrix: &SparseMatrix, pivot: ElementId, max: usize) -> bool {
        if matrix.row(pivot) > max || matrix.column(pivot) > max {
            return false;
        }
        let magnitude = matrix[pivot].abs();
        if magnitude <= self.config.absolute_threshold {
            return false;
        }
        let mut largest = 0.0f64;
        let mut cursor = matrix.below(pivot);
        while let Some(id) = cursor {
            if matrix.row(id) > max {
                break;
            }
            largest = largest.max(matrix[id].abs());
            cursor = matrix.below(id);
        }
        largest * self.config.relative_threshold < magnitude
    }

    /// Count the active submatrix `step..` (searching up to `max`).
    pub fn setup(&mut self, matrix: &SparseMatrix, rhs: &SparseVector, step: usize, max: usize) {
        let size = matrix.size();
        self.rows.resize(size + 2, 0);
        self.columns.resize(size + 2, 0);
        self.products.resize(size + 2, 0);

        for i in step..=max {
            // Elements beyond the search limit still cause fill-in
            let mut count = matrix
                .row_elements(i)
                .filter(|&id| matrix.column(id) >= step)
                .count();
            if rhs.find_element(i).is_some() {
                count += 1;
            }
            self.rows[i] = count.saturating_sub(1).min(MAX_MARKOWITZ_COUNT);

            let count = matrix
                .column_elements(i)
                .filter(|&id| matrix.row(id) >= step)
                .count();
            self.columns[i] = count.saturating_sub(1).min(MAX_MARKOWITZ_COUNT);
        }
        for i in step..=max {
            self.refresh(i);
        }
    }

    /// Account for the pivot at `(row, column)` being moved to `step`.
    pub fn move_pivot(&mut self, row: usize, column: usize, step: usize) {
        if self.products.len() <= row.max(column).max(step) {
            return;
        }
        if row != step {
            self.rows.swap(row, step);
            self.refresh(row);
        }
        if column != step {
            self.columns.swap(column, step);
            self.refresh(column);
        }
        self.refresh(step);
    }

    /// Remove the pivot row and column from the counts of the remaining
    /// submatrix. Call after the pivot has been moved into place.
    pub fn update(&mut self, matrix: &SparseMatrix, pivot: ElementId, limit: usize) {
        let mut cursor = matrix.below(pivot);
        while let Some(id) = cursor {
            let row = matrix.row(id);
            if row > limit {
                break;
            }
            self.rows[row] = self.rows[row].saturating_sub(1);
            self.refresh(row);
            cursor = matrix.below(id);
        }

        let mut cursor = matrix.right(pivot);
        while let Some(id) = cursor {
            let column = matrix.column(id);
            if column > limit {
                break;
            }
            self.columns[column] = self.columns[column].saturating_sub(1);
            self.refresh(column);
            cursor = matrix.right(id);
        }
    }

    /// Account for a fill-in created at `(row, column)`.
    pub fn create_fillin(&mut self, row: usize, column: usize) {
        if row < self.rows.len() {
            self.rows[row] = (self.rows[row] + 1).min(MAX_MARKOWITZ_COUNT);
            self.refresh(row);
        }
        if column < self.columns.len() {
            self.columns[column] = (self.columns[column] + 1).min(MAX_MARKOWITZ_COUNT);
            self.refresh(column);
        }
    }

    /// Run the strategy chain.
    pub fn find_pivot(&self, matrix: &SparseMatrix, step: usize, max: usize) -> Option<Pivot> {
        for strategy in &self.strategies {
            if let Some(pivot) = strategy.find(self, matrix, step, max) {
                if pivot.quality == PivotQuality::Bad {
                    debug!("step {step}: no pivot passes the relative threshold, taking the largest element");
                }
                return Some(pivot);
            }
        }
        None
    }

    fn refresh(&mut self, i: usize) {
        self.products[i] = self.rows[i].saturating_mul(self.columns[i]);
    }

    /// Largest magnitude in the column of `element` between `step` and
    /// `max`, the element itself excluded.
    fn largest_other_in_column(
        &self,
        matrix: &SparseMatrix,
        element: ElementId,
        step: usize,
        max: usize,
    ) -> f64 {
        let mut largest = 0.0f64;
        let mut cursor = matrix.below(element);
        while let Some(id) = cursor {
            if matrix.row(id) > max {
                break;
            }
            largest = largest.max(matrix[id].abs());
            cursor = matrix.below(id);
        }
        let mut cursor = matrix.above(element);
        while let Some(id) = cursor {
            if matrix.row(id) < step {
                break;
            }
            largest = largest.max(matrix[id].abs());
            cursor = matrix.above(id);
        }
        largest
    }

    fn search_singleton(&self, matrix: &SparseMatrix, step: usize, max: usize) -> Option<Pivot> {
        let absolute = self.config.absolute_threshold;
        for i in step..=max {
            if self.products[i] != 0 {
                continue;
            }

            if let Some(diagonal) = matrix.find_diagonal_element(i) {
                let magnitude = matrix[diagonal].abs();
                if magnitude > absolute
                    && (self.columns[i] == 0
                        || magnitude
                            > self.config.relative_threshold
                                * self.largest_other_in_column(matrix, diagonal, step, max))
                {
                    return Some(Pivot::new(diagonal, PivotQuality::Good));
                }
                continue;
            }

            // Lone element of column i
            if self.columns[i] == 0 {
                let lone = matrix.column_elements(i).find(|&id| matrix.row(id) >= step);
                if let Some(id) = lone {
                    if matrix.row(id) <= max && matrix[id].abs() > absolute {
                        return Some(Pivot::new(id, PivotQuality::Good));
                    }
                }
            }

            // Lone element of row i, it still has to hold up against its column
            if self.rows[i] == 0 {
                let lone = matrix.row_elements(i).find(|&id| matrix.column(id) >= step);
                if let Some(id) = lone {
                    let magnitude = matrix[id].abs();
                    if matrix.column(id) <= max
                        && magnitude > absolute
                        && magnitude
                            > self.config.relative_threshold
                                * self.largest_other_in_column(matrix, id, step, max)
                    {
                        return Some(Pivot::new(id, PivotQuality::Good));
                    }
                }
            }
        }
        None
    }

    fn search_quick_diagonal(&self, matrix: &SparseMatrix, step: usize, max: usize) -> Option<Pivot> {
        let mut min_product = usize::MAX;
        let mut tied: Vec<ElementId> = Vec::new();

        for i in step..=max {
            let product = self.products[i];
            if product >= min_product {
                continue;
            }
            let Some(diagonal) = matrix.find_diagonal_element(i) else {
                continue;
            };
            let magnitude = matrix[diagonal].abs();
            if magnitude <= self.config.absolute_threshold {
                continue;
            }

            if product == 1 {
                // One other element in both row and column. If they mirror each
                // other and the diagonal dominates them, nothing beats it.
                let in_row = matrix.right(diagonal).or_else(|| matrix.left(diagonal));
                let in_column = matrix.below(diagonal).or_else(|| matrix.above(diagonal));
                if let (Some(r), Some(c)) = (in_row, in_column) {
                    if matrix.column(r) == matrix.row(c)
                        && magnitude >= matrix[r].abs().max(matrix[c].abs())
                    {
                        return Some(Pivot::new(diagonal, PivotQuality::Good));
                    }
                }
            }

            if product < min_product {
                tied.clear();
                tied.push(diagonal);
                min_product = product;
            } else if tied.len() < self.config.max_ties {
                tied.push(diagonal);
                if tied.len() - 1 >= min_product.saturating_mul(self.config.ties_multiplier) {
                    break;
                }
            }
        }

        // Numerically best of the tied diagonals
        let mut chosen = None;
        let mut max_ratio = 1.0 / self.config.relative_threshold;
        for &diagonal in &tied {
            let magnitude = matrix[diagonal].abs();
            let ratio = self.largest_other_in_column(matrix, diagonal, step, max) / magnitude;
            if ratio < max_ratio {
                max_ratio = ratio;
                chosen = Some(diagonal);
            }
        }
        chosen.map(|id| Pivot::new(id, PivotQuality::Suboptimal))
    }

    fn search_diagonal(&self, matrix: &SparseMatrix, step: usize, max: usize) -> Option<Pivot> {
        let mut chosen = None;
        let mut min_product = usize::MAX;
        let mut accepted_ratio = 0.0;
        let mut ties = 0usize;

        for i in (step..=max).rev() {
            let product = self.products[i];
            if product > min_product {
                continue;
            }
            let Some(diagonal) = matrix.find_diagonal_element(i) else {
                continue;
            };
            let magnitude = matrix[diagonal].abs();
            if magnitude <= self.config.absolute_threshold {
                continue;
            }
            let largest = self.largest_other_in_column(matrix, diagonal, step, max);
            if magnitude <= self.config.relative_threshold * largest {
                continue;
            }

            let ratio = largest / magnitude;
            if product < min_product {
                chosen = Some(diagonal);
                min_product = product;
                accepted_ratio = ratio;
                ties = 0;
            } else {
                ties += 1;
                if ratio < accepted_ratio {
                    chosen = Some(diagonal);
                    accepted_ratio = ratio;
                }
                if ties >= min_product.saturating_mul(self.config.ties_multiplier) {
                    break;
                }
            }
        }
        chosen.map(|id| Pivot::new(id, PivotQuality::Suboptimal))
    }

    fn search_entire_matrix(&self, matrix: &SparseMatrix, step: usize, max: usize) -> Option<Pivot> {
        let relative = self.config.relative_threshold;
        let absolute = self.config.absolute_threshold;
        let mut chosen = None;
        let mut min_product = usize::MAX;
        let mut accepted_ratio = 0.0;
        let mut ties = 0usize;
        let mut largest_element: Option<(ElementId, f64)> = None;

        for column in step..=max {
            let largest = active_in_column(matrix, column, step, max)
                .map(|id| matrix[id].abs())
                .fold(0.0f64, f64::max);
            if largest == 0.0 {
                continue;
            }

            for id in active_in_column(matrix, column, step, max) {
                let magnitude = matrix[id].abs();
                if largest_element.map_or(true, |(_, m)| magnitude > m) {
                    largest_element = Some((id, magnitude));
                }

                let product = self.rows[matrix.row(id)].saturating_mul(self.columns[column]);
                if product <= min_product && magnitude > relative * largest && magnitude > absolute {
                    let ratio = largest / magnitude;
                    if product < min_product {
                        chosen = Some(id);
                        min_product = product;
                        accepted_ratio = ratio;
                        ties = 0;
                    } else {
                        ties += 1;
                        if ratio < accepted_ratio {
                            chosen = Some(id);
                            accepted_ratio = ratio;
                        }
                        if ties >= min_product.saturating_mul(self.config.ties_multiplier) {
                            return chosen.map(|id| Pivot::new(id, PivotQuality::Suboptimal));
                        }
                    }
                }
            }
        }

        if let Some(id) = chosen {
            return Some(Pivot::new(id, PivotQuality::Suboptimal));
        }
        // Last resort, still never below the absolute floor
        largest_element
            .filter(|&(_, magnitude)| magnitude > absolute)
            .map(|(id, _)| Pivot::new(id, PivotQuality::Bad))
    }
}

/// Elements of `column` in rows `step..=max`.
fn active_in_column(
    matrix: &SparseMatrix,
    column: usize,
    step: usize,
    max: usize,
) -> impl Iterator<Item = ElementId> + '_ {
    matrix
        .column_elements(column)
        .skip_while(move |&id| matrix.row(id) < step)
        .take_while(move |&id| matrix.row(id) <= max)
}
