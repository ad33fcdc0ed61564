//! Doubly linked sparse matrix.
//!
//! Elements live in an arena and are addressed by [`ElementId`]. Every element
//! is threaded into two sorted lists: its row (ordered by column) and its
//! column (ordered by row). Swapping rows or columns relinks elements in place,
//! so a handle stays attached to the same element for its whole life even when
//! the element changes position.

use std::ops::{Index, IndexMut};

/// Handle to an element of a [`SparseMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub(crate) usize);

impl ElementId {
    /// The sink element returned for any location in row or column 0.
    ///
    /// Values added to it are never read back by the solver.
    pub const GROUND: ElementId = ElementId(0);

    /// Check if this is the ground sink.
    pub fn is_ground(&self) -> bool {
        self.0 == 0
    }
}

/// Direction of a linked list through the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Axis {
    /// A row list, ordered by column.
    Row,
    /// A column list, ordered by row.
    Column,
}

impl Axis {
    fn slot(self) -> usize {
        match self {
            Axis::Row => 0,
            Axis::Column => 1,
        }
    }

    fn cross(self) -> Axis {
        match self {
            Axis::Row => Axis::Column,
            Axis::Column => Axis::Row,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<ElementId>,
    next: Option<ElementId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Line {
    first: Option<ElementId>,
    last: Option<ElementId>,
}

#[derive(Debug, Clone)]
struct Element {
    row: usize,
    column: usize,
    value: f64,
    /// `[row list, column list]`
    links: [Link; 2],
}

impl Element {
    fn new(row: usize, column: usize) -> Self {
        Self {
            row,
            column,
            value: 0.0,
            links: [Link::default(); 2],
        }
    }
}

/// A square sparse matrix with 1-based indices.
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    elements: Vec<Element>,
    free: Vec<ElementId>,
    /// `[rows, columns]`, index 0 unused.
    lines: [Vec<Line>; 2],
    diagonal: Vec<Option<ElementId>>,
    size: usize,
}

impl Default for SparseMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseMatrix {
    /// Create an empty matrix.
    pub fn new() -> Self {
        Self::with_size(0)
    }

    /// Create an empty matrix with room for `size` rows and columns.
    pub fn with_size(size: usize) -> Self {
        Self {
            elements: vec![Element::new(0, 0)],
            free: Vec::new(),
            lines: [vec![Line::default(); size + 1], vec![Line::default(); size + 1]],
            diagonal: vec![None; size + 1],
            size,
        }
    }

    /// Number of rows (and columns).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of elements currently stored, the ground sink excluded.
    pub fn element_count(&self) -> usize {
        self.elements.len() - 1 - self.free.len()
    }

    /// Grow the matrix to at least `size` rows and columns.
    pub fn resize(&mut self, size: usize) {
        if size <= self.size {
            return;
        }
        for lines in &mut self.lines {
            lines.resize(size + 1, Line::default());
        }
        self.diagonal.resize(size + 1, None);
        self.size = size;
    }

    /// Get the element at `(row, column)`, creating it if it does not exist.
    ///
    /// Any location in row or column 0 yields [`ElementId::GROUND`].
    pub fn get_element(&mut self, row: usize, column: usize) -> ElementId {
        if row == 0 || column == 0 {
            return ElementId::GROUND;
        }
        if row == column {
            if let Some(id) = self.diagonal.get(row).copied().flatten() {
                return id;
            }
        }
        self.resize(row.max(column));

        // Walk the row to the insertion point
        let mut cursor = self.lines[Axis::Row.slot()][row].first;
        while let Some(id) = cursor {
            let key = self.elements[id.0].column;
            if key == column {
                return id;
            }
            if key > column {
                break;
            }
            cursor = self.next(id, Axis::Row);
        }

        let id = self.allocate(row, column);
        self.link_before(Axis::Row, row, id, cursor);
        self.insert_sorted(Axis::Column, id);
        if row == column {
            self.diagonal[row] = Some(id);
        }
        id
    }

    /// Find the element at `(row, column)` without creating it.
    pub fn find_element(&self, row: usize, column: usize) -> Option<ElementId> {
        if row == 0 || column == 0 || row > self.size || column > self.size {
            return None;
        }
        if row == column {
            return self.diagonal[row];
        }
        self.find_in_line(Axis::Row, row, column)
    }

    /// Find the diagonal element of a row.
    pub fn find_diagonal_element(&self, index: usize) -> Option<ElementId> {
        self.diagonal.get(index).copied().flatten()
    }

    /// Unlink an element from its row and column and release it.
    ///
    /// The handle must not be used afterwards.
    pub fn remove_element(&mut self, id: ElementId) {
        if id.is_ground() {
            return;
        }
        let (row, column) = (self.elements[id.0].row, self.elements[id.0].column);
        self.unlink(Axis::Row, row, id);
        self.unlink(Axis::Column, column, id);
        if row == column {
            self.diagonal[row] = None;
        }
        self.elements[id.0] = Element::new(0, 0);
        self.free.push(id);
    }

    /// Zero every value while keeping the sparsity structure.
    pub fn reset(&mut self) {
        for element in &mut self.elements {
            element.value = 0.0;
        }
    }

    /// Remove every element.
    pub fn clear(&mut self) {
        *self = Self::with_size(self.size);
    }

    /// Exchange two rows.
    pub fn swap_rows(&mut self, row1: usize, row2: usize) {
        self.swap_lines(Axis::Row, row1, row2);
    }

    /// Exchange two columns.
    pub fn swap_columns(&mut self, column1: usize, column2: usize) {
        self.swap_lines(Axis::Column, column1, column2);
    }

    /// Current row of an element.
    pub fn row(&self, id: ElementId) -> usize {
        self.elements[id.0].row
    }

    /// Current column of an element.
    pub fn column(&self, id: ElementId) -> usize {
        self.elements[id.0].column
    }

    /// Value of an element.
    pub fn value(&self, id: ElementId) -> f64 {
        self.elements[id.0].value
    }

    /// First element of a row.
    pub fn first_in_row(&self, row: usize) -> Option<ElementId> {
        self.lines[Axis::Row.slot()].get(row).and_then(|line| line.first)
    }

    /// Last element of a row.
    pub fn last_in_row(&self, row: usize) -> Option<ElementId> {
        self.lines[Axis::Row.slot()].get(row).and_then(|line| line.last)
    }

    /// First element of a column.
    pub fn first_in_column(&self, column: usize) -> Option<ElementId> {
        self.lines[Axis::Column.slot()].get(column).and_then(|line| line.first)
    }

    /// Last element of a column.
    pub fn last_in_column(&self, column: usize) -> Option<ElementId> {
        self.lines[Axis::Column.slot()].get(column).and_then(|line| line.last)
    }

    /// Next element to the right in the same row.
    pub fn right(&self, id: ElementId) -> Option<ElementId> {
        self.next(id, Axis::Row)
    }

    /// Previous element to the left in the same row.
    pub fn left(&self, id: ElementId) -> Option<ElementId> {
        self.prev(id, Axis::Row)
    }

    /// Next element below in the same column.
    pub fn below(&self, id: ElementId) -> Option<ElementId> {
        self.next(id, Axis::Column)
    }

    /// Previous element above in the same column.
    pub fn above(&self, id: ElementId) -> Option<ElementId> {
        self.prev(id, Axis::Column)
    }

    /// Iterate over the elements of a row from left to right.
    pub fn row_elements(&self, row: usize) -> LineIter<'_> {
        LineIter {
            matrix: self,
            cursor: self.first_in_row(row),
            axis: Axis::Row,
        }
    }

    /// Iterate over the elements of a column from top to bottom.
    pub fn column_elements(&self, column: usize) -> LineIter<'_> {
        LineIter {
            matrix: self,
            cursor: self.first_in_column(column),
            axis: Axis::Column,
        }
    }

    pub(crate) fn next(&self, id: ElementId, axis: Axis) -> Option<ElementId> {
        self.elements[id.0].links[axis.slot()].next
    }

    pub(crate) fn prev(&self, id: ElementId, axis: Axis) -> Option<ElementId> {
        self.elements[id.0].links[axis.slot()].prev
    }

    fn allocate(&mut self, row: usize, column: usize) -> ElementId {
        match self.free.pop() {
            Some(id) => {
                self.elements[id.0] = Element::new(row, column);
                id
            }
            None => {
                self.elements.push(Element::new(row, column));
                ElementId(self.elements.len() - 1)
            }
        }
    }

    /// Index of the list an element belongs to along `axis`.
    fn line_of(&self, id: ElementId, axis: Axis) -> usize {
        let element = &self.elements[id.0];
        match axis {
            Axis::Row => element.row,
            Axis::Column => element.column,
        }
    }

    /// Sort key of an element within its list along `axis`.
    fn key_of(&self, id: ElementId, axis: Axis) -> usize {
        let element = &self.elements[id.0];
        match axis {
            Axis::Row => element.column,
            Axis::Column => element.row,
        }
    }

    fn set_key(&mut self, id: ElementId, axis: Axis, key: usize) {
        let element = &mut self.elements[id.0];
        match axis {
            Axis::Row => element.column = key,
            Axis::Column => element.row = key,
        }
    }

    fn find_in_line(&self, axis: Axis, line: usize, key: usize) -> Option<ElementId> {
        let mut cursor = self.lines[axis.slot()].get(line)?.first;
        while let Some(id) = cursor {
            let k = self.key_of(id, axis);
            if k == key {
                return Some(id);
            }
            if k > key {
                return None;
            }
            cursor = self.next(id, axis);
        }
        None
    }

    fn insert_sorted(&mut self, axis: Axis, id: ElementId) {
        let line = self.line_of(id, axis);
        let key = self.key_of(id, axis);
        let mut cursor = self.lines[axis.slot()][line].first;
        while let Some(c) = cursor {
            if self.key_of(c, axis) > key {
                break;
            }
            cursor = self.next(c, axis);
        }
        self.link_before(axis, line, id, cursor);
    }

    /// Link `id` into a list in front of `before` (at the tail if `None`).
    fn link_before(&mut self, axis: Axis, line: usize, id: ElementId, before: Option<ElementId>) {
        let slot = axis.slot();
        let prev = match before {
            Some(b) => self.elements[b.0].links[slot].prev,
            None => self.lines[slot][line].last,
        };
        self.elements[id.0].links[slot] = Link { prev, next: before };
        match prev {
            Some(p) => self.elements[p.0].links[slot].next = Some(id),
            None => self.lines[slot][line].first = Some(id),
        }
        match before {
            Some(b) => self.elements[b.0].links[slot].prev = Some(id),
            None => self.lines[slot][line].last = Some(id),
        }
    }

    fn unlink(&mut self, axis: Axis, line: usize, id: ElementId) {
        let slot = axis.slot();
        let Link { prev, next } = self.elements[id.0].links[slot];
        match prev {
            Some(p) => self.elements[p.0].links[slot].next = next,
            None => self.lines[slot][line].first = next,
        }
        match next {
            Some(n) => self.elements[n.0].links[slot].prev = prev,
            None => self.lines[slot][line].last = prev,
        }
        self.elements[id.0].links[slot] = Link::default();
    }

    /// Give `id` a larger key, moving it towards the tail of its list.
    fn move_forward(&mut self, axis: Axis, line: usize, id: ElementId, key: usize) {
        let mut cursor = self.next(id, axis);
        let mut moved = false;
        while let Some(c) = cursor {
            if self.key_of(c, axis) > key {
                break;
            }
            moved = true;
            cursor = self.next(c, axis);
        }
        if moved {
            self.unlink(axis, line, id);
            self.link_before(axis, line, id, cursor);
        }
        self.set_key(id, axis, key);
    }

    /// Give `id` a smaller key, moving it towards the head of its list.
    fn move_backward(&mut self, axis: Axis, line: usize, id: ElementId, key: usize) {
        let mut cursor = self.prev(id, axis);
        let mut moved = false;
        while let Some(c) = cursor {
            if self.key_of(c, axis) < key {
                break;
            }
            moved = true;
            cursor = self.prev(c, axis);
        }
        if moved {
            self.unlink(axis, line, id);
            let before = match cursor {
                Some(c) => self.next(c, axis),
                None => self.lines[axis.slot()][line].first,
            };
            self.link_before(axis, line, id, before);
        }
        self.set_key(id, axis, key);
    }

    /// Exchange the keys `low < high` of up to two elements sharing a list.
    fn exchange(
        &mut self,
        axis: Axis,
        line: usize,
        at_low: Option<ElementId>,
        at_high: Option<ElementId>,
        low: usize,
        high: usize,
    ) {
        match (at_low, at_high) {
            (Some(a), None) => self.move_forward(axis, line, a, high),
            (None, Some(b)) => self.move_backward(axis, line, b, low),
            (Some(a), Some(b)) => {
                let anchor = self.prev(a, axis);
                self.unlink(axis, line, b);
                self.move_forward(axis, line, a, high);
                self.set_key(b, axis, low);
                let before = match anchor {
                    Some(p) => self.next(p, axis),
                    None => self.lines[axis.slot()][line].first,
                };
                self.link_before(axis, line, b, before);
            }
            (None, None) => {}
        }
    }

    /// Exchange two rows (`Axis::Row`) or two columns (`Axis::Column`).
    fn swap_lines(&mut self, axis: Axis, first: usize, second: usize) {
        if first == second {
            return;
        }
        let (low, high) = if first < second { (first, second) } else { (second, first) };
        self.resize(high);
        let cross = axis.cross();

        // Walk both lines in step; each crossing list sees at most two moves
        let mut a = self.lines[axis.slot()][low].first;
        let mut b = self.lines[axis.slot()][high].first;
        while a.is_some() || b.is_some() {
            let ka = a.map_or(usize::MAX, |id| self.key_of(id, axis));
            let kb = b.map_or(usize::MAX, |id| self.key_of(id, axis));
            if ka < kb {
                let next = a.and_then(|id| self.next(id, axis));
                self.exchange(cross, ka, a, None, low, high);
                a = next;
            } else if kb < ka {
                let next = b.and_then(|id| self.next(id, axis));
                self.exchange(cross, kb, None, b, low, high);
                b = next;
            } else {
                let next_a = a.and_then(|id| self.next(id, axis));
                let next_b = b.and_then(|id| self.next(id, axis));
                self.exchange(cross, ka, a, b, low, high);
                a = next_a;
                b = next_b;
            }
        }

        self.lines[axis.slot()].swap(low, high);
        self.diagonal[low] = self.find_in_line(Axis::Row, low, low);
        self.diagonal[high] = self.find_in_line(Axis::Row, high, high);
    }
}

impl Index<ElementId> for SparseMatrix {
    type Output = f64;

    fn index(&self, id: ElementId) -> &f64 {
        &self.elements[id.0].value
    }
}

impl IndexMut<ElementId> for SparseMatrix {
    fn index_mut(&mut self, id: ElementId) -> &mut f64 {
        &mut self.elements[id.0].value
    }
}

/// Iterator over one row or column of a [`SparseMatrix`].
pub struct LineIter<'a> {
    matrix: &'a SparseMatrix,
    cursor: Option<ElementId>,
    axis: Axis,
}

impl Iterator for LineIter<'_> {
    type Item = ElementId;

    fn next(&mut self) -> Option<ElementId> {
        let id = self.cursor?;
        self.cursor = self.matrix.next(id, self.axis);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collect `(row, column, value)` for every element, row by row.
    fn triplets(matrix: &SparseMatrix) -> Vec<(usize, usize, f64)> {
        let mut out = Vec::new();
        for r in 1..=matrix.size() {
            for id in matrix.row_elements(r) {
                out.push((matrix.row(id), matrix.column(id), matrix[id]));
            }
        }
        out
    }

    /// Check that both link directions agree with the element coordinates.
    fn assert_consistent(matrix: &SparseMatrix) {
        for r in 1..=matrix.size() {
            let mut last = 0;
            for id in matrix.row_elements(r) {
                assert_eq!(matrix.row(id), r);
                assert!(matrix.column(id) > last, "row {r} not sorted");
                last = matrix.column(id);
            }
            assert_eq!(matrix.find_diagonal_element(r), matrix.find_in_line(Axis::Row, r, r));
        }
        for c in 1..=matrix.size() {
            let mut last = 0;
            for id in matrix.column_elements(c) {
                assert_eq!(matrix.column(id), c);
                assert!(matrix.row(id) > last, "column {c} not sorted");
                last = matrix.row(id);
            }
        }
    }

    #[test]
    fn test_get_element_is_get_or_create() {
        let mut m = SparseMatrix::new();
        let a = m.get_element(2, 3);
        let b = m.get_element(2, 3);
        assert_eq!(a, b);
        assert_eq!(m.size(), 3);
        assert_eq!(m.element_count(), 1);
        assert_eq!(m.find_element(3, 2), None);
        assert_eq!(m.find_element(2, 3), Some(a));
    }

    #[test]
    fn test_insertion_order_keeps_lists_sorted() {
        let mut m = SparseMatrix::new();
        for &(r, c) in &[(3, 3), (1, 3), (2, 1), (3, 1), (1, 1), (2, 2), (1, 2)] {
            let id = m.get_element(r, c);
            m[id] = (10 * r + c) as f64;
        }
        assert_consistent(&m);
        let cols: Vec<usize> = m.row_elements(1).map(|id| m.column(id)).collect();
        assert_eq!(cols, vec![1, 2, 3]);
        let rows: Vec<usize> = m.column_elements(1).map(|id| m.row(id)).collect();
        assert_eq!(rows, vec![1, 2, 3]);
    }

    #[test]
    fn test_add_accumulates() {
        let mut m = SparseMatrix::new();
        let id = m.get_element(1, 1);
        m[id] += 1.5;
        m[id] += 2.0;
        assert_eq!(m.value(id), 3.5);
    }

    #[test]
    fn test_ground_locations_hit_sink() {
        let mut m = SparseMatrix::new();
        assert_eq!(m.get_element(0, 4), ElementId::GROUND);
        assert_eq!(m.get_element(2, 0), ElementId::GROUND);
        assert_eq!(m.find_element(0, 0), None);
        assert_eq!(m.element_count(), 0);
    }

    #[test]
    fn test_swap_rows_preserves_handles() {
        let mut m = SparseMatrix::new();
        let mut handles = Vec::new();
        for &(r, c) in &[(1, 1), (1, 3), (2, 2), (3, 1), (3, 2), (3, 3), (4, 4), (1, 4)] {
            let id = m.get_element(r, c);
            m[id] = (10 * r + c) as f64;
            handles.push((id, r, c));
        }

        m.swap_rows(1, 3);
        assert_consistent(&m);
        for &(id, r, c) in &handles {
            let expected_row = match r {
                1 => 3,
                3 => 1,
                other => other,
            };
            assert_eq!(m.row(id), expected_row);
            assert_eq!(m.column(id), c);
            assert_eq!(m[id], (10 * r + c) as f64);
            assert_eq!(m.find_element(expected_row, c), Some(id));
        }
        // (3, 1) and (1, 3) are now on the diagonal
        assert_eq!(m.find_diagonal_element(1), Some(handles[3].0));
        assert_eq!(m.find_diagonal_element(3), Some(handles[1].0));
    }

    #[test]
    fn test_swap_columns_preserves_handles() {
        let mut m = SparseMatrix::new();
        let a = m.get_element(1, 1);
        let b = m.get_element(2, 1);
        let c = m.get_element(2, 3);
        let d = m.get_element(3, 2);
        m.swap_columns(3, 1);
        assert_consistent(&m);
        assert_eq!((m.row(a), m.column(a)), (1, 3));
        assert_eq!((m.row(b), m.column(b)), (2, 3));
        assert_eq!((m.row(c), m.column(c)), (2, 1));
        assert_eq!((m.row(d), m.column(d)), (3, 2));
        assert_eq!(m.find_diagonal_element(1), None);
        assert_eq!(m.find_diagonal_element(2), None);
    }

    #[test]
    fn test_swap_back_restores_structure() {
        let mut m = SparseMatrix::new();
        for &(r, c) in &[(1, 2), (2, 1), (2, 2), (3, 3), (3, 1), (1, 3), (4, 2)] {
            let id = m.get_element(r, c);
            m[id] = (r * c) as f64;
        }
        let before = triplets(&m);
        m.swap_rows(2, 4);
        m.swap_columns(1, 3);
        m.swap_columns(3, 1);
        m.swap_rows(4, 2);
        assert_consistent(&m);
        assert_eq!(triplets(&m), before);
    }

    #[test]
    fn test_remove_element() {
        let mut m = SparseMatrix::new();
        let a = m.get_element(1, 1);
        let b = m.get_element(1, 2);
        m.remove_element(a);
        assert_eq!(m.find_diagonal_element(1), None);
        assert_eq!(m.first_in_row(1), Some(b));
        assert_eq!(m.first_in_column(1), None);
        assert_eq!(m.element_count(), 1);
        // The slot is reused
        let c = m.get_element(2, 2);
        assert_eq!(c, a);
        assert_consistent(&m);
    }

    #[test]
    fn test_reset_keeps_structure() {
        let mut m = SparseMatrix::new();
        let a = m.get_element(1, 2);
        m[a] = 4.0;
        m.reset();
        assert_eq!(m[a], 0.0);
        assert_eq!(m.find_element(1, 2), Some(a));
    }
}
