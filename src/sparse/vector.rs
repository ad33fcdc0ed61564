//! Sparse vector used as the right-hand side of the system.

use std::ops::{Index, IndexMut};

/// Handle to an element of a [`SparseVector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VectorId(pub(crate) usize);

impl VectorId {
    /// The sink element returned for index 0.
    pub const GROUND: VectorId = VectorId(0);

    /// Check if this is the ground sink.
    pub fn is_ground(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone)]
struct Entry {
    index: usize,
    value: f64,
    prev: Option<VectorId>,
    next: Option<VectorId>,
}

impl Entry {
    fn new(index: usize) -> Self {
        Self {
            index,
            value: 0.0,
            prev: None,
            next: None,
        }
    }
}

/// A sparse vector with 1-based indices, kept as a sorted linked list.
#[derive(Debug, Clone)]
pub struct SparseVector {
    entries: Vec<Entry>,
    free: Vec<VectorId>,
    /// Index to element lookup, slot 0 unused.
    slots: Vec<Option<VectorId>>,
    first: Option<VectorId>,
    last: Option<VectorId>,
}

impl Default for SparseVector {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseVector {
    /// Create an empty vector.
    pub fn new() -> Self {
        Self {
            entries: vec![Entry::new(0)],
            free: Vec::new(),
            slots: vec![None],
            first: None,
            last: None,
        }
    }

    /// Highest addressable index.
    pub fn len(&self) -> usize {
        self.slots.len() - 1
    }

    /// True if no index has been addressed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow the vector to at least `len` entries.
    pub fn resize(&mut self, len: usize) {
        if len + 1 > self.slots.len() {
            self.slots.resize(len + 1, None);
        }
    }

    /// Get the element at `index`, creating it if needed.
    pub fn get_element(&mut self, index: usize) -> VectorId {
        if index == 0 {
            return VectorId::GROUND;
        }
        self.resize(index);
        if let Some(id) = self.slots[index] {
            return id;
        }
        let id = match self.free.pop() {
            Some(id) => {
                self.entries[id.0] = Entry::new(index);
                id
            }
            None => {
                self.entries.push(Entry::new(index));
                VectorId(self.entries.len() - 1)
            }
        };
        self.slots[index] = Some(id);
        self.insert_sorted(id);
        id
    }

    /// Find the element at `index` without creating it.
    pub fn find_element(&self, index: usize) -> Option<VectorId> {
        if index == 0 {
            return None;
        }
        self.slots.get(index).copied().flatten()
    }

    /// Remove an element. The handle must not be used afterwards.
    pub fn remove_element(&mut self, id: VectorId) {
        if id.is_ground() {
            return;
        }
        let index = self.entries[id.0].index;
        self.unlink(id);
        self.slots[index] = None;
        self.entries[id.0] = Entry::new(0);
        self.free.push(id);
    }

    /// Index of an element.
    pub fn index_of(&self, id: VectorId) -> usize {
        self.entries[id.0].index
    }

    /// First element in index order.
    pub fn first(&self) -> Option<VectorId> {
        self.first
    }

    /// Element following `id` in index order.
    pub fn next(&self, id: VectorId) -> Option<VectorId> {
        self.entries[id.0].next
    }

    /// Iterate over `(index, value)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        let mut cursor = self.first;
        std::iter::from_fn(move || {
            let id = cursor?;
            cursor = self.entries[id.0].next;
            Some((self.entries[id.0].index, self.entries[id.0].value))
        })
    }

    /// Exchange the elements at two indices.
    ///
    /// Elements are relinked starting from their own position, so only the
    /// elements between the two indices are visited.
    pub fn swap_elements(&mut self, index1: usize, index2: usize) {
        if index1 == index2 {
            return;
        }
        let (low, high) = if index1 < index2 { (index1, index2) } else { (index2, index1) };
        self.resize(high);
        match (self.slots[low], self.slots[high]) {
            (Some(a), None) => self.move_forward(a, high),
            (None, Some(b)) => self.move_backward(b, low),
            (Some(a), Some(b)) => {
                let anchor = self.entries[a.0].prev;
                self.unlink(b);
                self.move_forward(a, high);
                self.entries[b.0].index = low;
                let before = match anchor {
                    Some(p) => self.entries[p.0].next,
                    None => self.first,
                };
                self.link_before(b, before);
            }
            (None, None) => {}
        }
        self.slots.swap(low, high);
    }

    /// Zero every value.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.value = 0.0;
        }
    }

    /// Remove every element.
    pub fn clear(&mut self) {
        let len = self.len();
        *self = Self::new();
        self.resize(len);
    }

    fn insert_sorted(&mut self, id: VectorId) {
        let index = self.entries[id.0].index;
        let mut before = self.first;
        while let Some(c) = before {
            if self.entries[c.0].index > index {
                break;
            }
            before = self.entries[c.0].next;
        }
        self.link_before(id, before);
    }

    /// Give `id` the larger index `index`, moving it towards the tail.
    fn move_forward(&mut self, id: VectorId, index: usize) {
        let mut before = self.entries[id.0].next;
        while let Some(c) = before {
            if self.entries[c.0].index > index {
                break;
            }
            before = self.entries[c.0].next;
        }
        self.unlink(id);
        self.entries[id.0].index = index;
        self.link_before(id, before);
    }

    /// Give `id` the smaller index `index`, moving it towards the head.
    fn move_backward(&mut self, id: VectorId, index: usize) {
        let mut after = self.entries[id.0].prev;
        while let Some(c) = after {
            if self.entries[c.0].index < index {
                break;
            }
            after = self.entries[c.0].prev;
        }
        let before = match after {
            Some(p) => self.entries[p.0].next,
            None => self.first,
        };
        let before = if before == Some(id) { self.entries[id.0].next } else { before };
        self.unlink(id);
        self.entries[id.0].index = index;
        self.link_before(id, before);
    }

    /// Link a detached element in front of `before`, or at the tail.
    fn link_before(&mut self, id: VectorId, before: Option<VectorId>) {
        let prev = match before {
            Some(b) => self.entries[b.0].prev,
            None => self.last,
        };
        self.entries[id.0].prev = prev;
        self.entries[id.0].next = before;
        match prev {
            Some(p) => self.entries[p.0].next = Some(id),
            None => self.first = Some(id),
        }
        match before {
            Some(b) => self.entries[b.0].prev = Some(id),
            None => self.last = Some(id),
        }
    }

    fn unlink(&mut self, id: VectorId) {
        let (prev, next) = (self.entries[id.0].prev, self.entries[id.0].next);
        match prev {
            Some(p) => self.entries[p.0].next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.entries[n.0].prev = prev,
            None => self.last = prev,
        }
        self.entries[id.0].prev = None;
        self.entries[id.0].next = None;
    }
}

impl Index<VectorId> for SparseVector {
    type Output = f64;

    fn index(&self, id: VectorId) -> &f64 {
        &self.entries[id.0].value
    }
}

impl IndexMut<VectorId> for SparseVector {
    fn index_mut(&mut self, id: VectorId) -> &mut f64 {
        &mut self.entries[id.0].value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elements_iterate_in_index_order() {
        let mut v = SparseVector::new();
        for &i in &[5, 2, 7, 1] {
            let id = v.get_element(i);
            v[id] = i as f64;
        }
        let indices: Vec<usize> = v.iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![1, 2, 5, 7]);
        assert_eq!(v.len(), 7);
    }

    #[test]
    fn test_swap_elements_keeps_handles() {
        let mut v = SparseVector::new();
        let a = v.get_element(1);
        let b = v.get_element(4);
        v[a] = 1.0;
        v[b] = 4.0;

        v.swap_elements(1, 3);
        assert_eq!(v.index_of(a), 3);
        assert_eq!(v.find_element(1), None);
        assert_eq!(v.find_element(3), Some(a));

        v.swap_elements(3, 4);
        assert_eq!(v.index_of(a), 4);
        assert_eq!(v.index_of(b), 3);
        let pairs: Vec<(usize, f64)> = v.iter().collect();
        assert_eq!(pairs, vec![(3, 4.0), (4, 1.0)]);
    }

    /// Check both link directions against the stored indices.
    fn assert_linked(v: &SparseVector) {
        let mut prev = None;
        let mut cursor = v.first;
        let mut last_index = 0;
        while let Some(id) = cursor {
            let entry = &v.entries[id.0];
            assert_eq!(entry.prev, prev);
            assert!(entry.index > last_index, "list not sorted");
            assert_eq!(v.slots[entry.index], Some(id));
            last_index = entry.index;
            prev = Some(id);
            cursor = entry.next;
        }
        assert_eq!(v.last, prev);
    }

    #[test]
    fn test_swap_elements_relinks_in_place() {
        let mut v = SparseVector::new();
        for i in [1, 2, 4, 6, 7, 9] {
            let id = v.get_element(i);
            v[id] = i as f64;
        }
        let swaps = [(2, 7), (1, 9), (3, 6), (8, 4), (5, 2), (9, 1), (4, 5), (7, 6)];
        let mut expected: Vec<f64> = (0..=9)
            .map(|i| v.find_element(i).map_or(0.0, |_| i as f64))
            .collect();
        for (a, b) in swaps {
            v.swap_elements(a, b);
            expected.swap(a, b);
            assert_linked(&v);
            let dense: Vec<f64> = (0..=9)
                .map(|i| v.find_element(i).map_or(0.0, |id| v[id]))
                .collect();
            assert_eq!(dense, expected, "after swapping {a} and {b}");
        }
    }

    #[test]
    fn test_ground_index_is_sink() {
        let mut v = SparseVector::new();
        let g = v.get_element(0);
        assert!(g.is_ground());
        v[g] += 3.0;
        assert_eq!(v.iter().count(), 0);
        v.reset();
        assert_eq!(v[g], 0.0);
    }
}
