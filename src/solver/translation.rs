//! External/internal index permutation.

/// A bijection between external (problem) indices and internal (matrix)
/// indices. Index 0 always maps to itself.
#[derive(Debug, Clone)]
pub struct Translation {
    external_to_internal: Vec<usize>,
    internal_to_external: Vec<usize>,
}

impl Default for Translation {
    fn default() -> Self {
        Self::new()
    }
}

impl Translation {
    /// Create an identity translation covering only index 0.
    pub fn new() -> Self {
        Self {
            external_to_internal: vec![0],
            internal_to_external: vec![0],
        }
    }

    /// Number of mapped indices, 0 excluded.
    pub fn len(&self) -> usize {
        self.external_to_internal.len() - 1
    }

    /// True if only index 0 is mapped.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extend the mapping with identity entries up to `size`.
    pub fn resize(&mut self, size: usize) {
        for i in self.external_to_internal.len()..=size {
            self.external_to_internal.push(i);
            self.internal_to_external.push(i);
        }
    }

    /// Map an internal position back to the external index.
    pub fn reverse(&self, internal: usize) -> usize {
        self.internal_to_external.get(internal).copied().unwrap_or(internal)
    }

    /// Map an external index without extending.
    pub fn get(&self, external: usize) -> usize {
        self.external_to_internal.get(external).copied().unwrap_or(external)
    }

    /// Record that internal positions `a` and `b` have been exchanged.
    pub fn swap(&mut self, a: usize, b: usize) {
        self.resize(a.max(b));
        let ea = self.internal_to_external[a];
        let eb = self.internal_to_external[b];
        self.internal_to_external.swap(a, b);
        self.external_to_internal[ea] = b;
        self.external_to_internal[eb] = a;
    }

    /// Restore the identity mapping.
    pub fn reset(&mut self) {
        let size = self.len();
        *self = Self::new();
        self.resize(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bijection(t: &Translation) {
        for e in 0..=t.len() {
            assert_eq!(t.reverse(t.get(e)), e);
        }
        let mut seen = vec![false; t.len() + 1];
        for e in 0..=t.len() {
            let i = t.get(e);
            assert!(!seen[i], "internal index {i} mapped twice");
            seen[i] = true;
        }
    }

    #[test]
    fn test_swaps_stay_bijective() {
        let mut t = Translation::new();
        t.resize(6);
        for &(a, b) in &[(1, 4), (2, 6), (4, 2), (5, 1), (3, 3), (6, 5)] {
            t.swap(a, b);
            assert_bijection(&t);
        }
        assert_eq!(t.get(0), 0);
    }

    #[test]
    fn test_resize_extends_identity() {
        let mut t = Translation::new();
        t.swap(1, 2);
        t.resize(5);
        assert_eq!(t.get(5), 5);
        assert_eq!(t.get(1), 2);
        assert_eq!(t.reverse(1), 2);
        assert_eq!(t.len(), 5);
    }
}
