//! Hierarchical, index-addressed value container
//!
//! A [`Matrix`] is either empty, a single leaf, or an ordered array of
//! matrices. Nodes are addressed by an [`Index`]: the path of array
//! positions from the root. Empty slots inside an array are holes; trailing
//! holes are always pruned.

mod builder;

pub use builder::{MatrixChange, build};

use serde::{Deserialize, Serialize};

/// Path of array positions from the root
pub type Index = Vec<usize>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Matrix<V> {
    Empty,
    Leaf(V),
    Array(Vec<Matrix<V>>),
}

impl<V> Default for Matrix<V> {
    fn default() -> Self {
        Matrix::Empty
    }
}

impl<V> Matrix<V> {
    /// Array constructor that prunes trailing holes and collapses to `Empty`.
    pub fn array(mut children: Vec<Matrix<V>>) -> Self {
        while children.last().is_some_and(Matrix::is_empty) {
            children.pop();
        }
        if children.is_empty() {
            Matrix::Empty
        } else {
            Matrix::Array(children)
        }
    }

    /// Array of leaves at sequential single-level indices.
    pub fn from_list(values: Vec<V>) -> Self {
        Matrix::array(values.into_iter().map(Matrix::Leaf).collect())
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (Index, V)>) -> Self {
        let mut matrix = Matrix::Empty;
        for (index, value) in entries {
            matrix.set(&index, value);
        }
        matrix
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Matrix::Empty => true,
            Matrix::Leaf(_) => false,
            Matrix::Array(children) => children.iter().all(Matrix::is_empty),
        }
    }

    /// Node at `index`, if one is present.
    pub fn get(&self, index: &[usize]) -> Option<&Matrix<V>> {
        let mut node = self;
        for &position in index {
            match node {
                Matrix::Array(children) => node = children.get(position)?,
                _ => return None,
            }
        }
        if node.is_empty() { None } else { Some(node) }
    }

    /// Leaf value stored exactly at `index`.
    pub fn leaf(&self, index: &[usize]) -> Option<&V> {
        match self.get(index)? {
            Matrix::Leaf(value) => Some(value),
            _ => None,
        }
    }

    /// Value that governs `index`: a leaf on the way down applies to
    /// everything below it, and an array yields its first leaf.
    pub fn value_at(&self, index: &[usize]) -> Option<&V> {
        let mut node = self;
        for &position in index {
            match node {
                Matrix::Leaf(value) => return Some(value),
                Matrix::Array(children) => node = children.get(position)?,
                Matrix::Empty => return None,
            }
        }
        node.first_leaf()
    }

    fn first_leaf(&self) -> Option<&V> {
        match self {
            Matrix::Empty => None,
            Matrix::Leaf(value) => Some(value),
            Matrix::Array(children) => children.iter().find_map(Matrix::first_leaf),
        }
    }

    pub fn set(&mut self, index: &[usize], value: V) {
        self.set_node(index, Matrix::Leaf(value));
    }

    /// Replace the node at `index`, creating intermediate arrays as needed.
    pub fn set_node(&mut self, index: &[usize], node: Matrix<V>) {
        let Some((&position, rest)) = index.split_first() else {
            *self = node;
            return;
        };
        if !matches!(self, Matrix::Array(_)) {
            *self = Matrix::Array(Vec::new());
        }
        if let Matrix::Array(children) = self {
            while children.len() <= position {
                children.push(Matrix::Empty);
            }
            children[position].set_node(rest, node);
            while children.last().is_some_and(Matrix::is_empty) {
                children.pop();
            }
            if children.is_empty() {
                *self = Matrix::Empty;
            }
        }
    }

    /// Splice the node at `index` out of its parent, shifting later siblings
    /// down by one. Ancestors left empty are removed as well; the root may
    /// end up empty.
    ///
    /// Removing an index that holds nothing, including an empty slot inside
    /// an array, leaves the matrix untouched and returns `None`.
    pub fn remove(&mut self, index: &[usize]) -> Option<Matrix<V>> {
        if index.is_empty() {
            let removed = std::mem::take(self);
            return if removed.is_empty() { None } else { Some(removed) };
        }
        self.remove_below(index)
    }

    fn remove_below(&mut self, index: &[usize]) -> Option<Matrix<V>> {
        let Matrix::Array(children) = self else {
            return None;
        };
        let (&position, rest) = index.split_first()?;
        let removed = if rest.is_empty() {
            if children.get(position).is_some_and(|child| !child.is_empty()) {
                Some(children.remove(position))
            } else {
                return None;
            }
        } else {
            let child = children.get_mut(position)?;
            let removed = child.remove_below(rest);
            if removed.is_some() && child.is_empty() {
                children.remove(position);
            }
            removed
        };
        while children.last().is_some_and(Matrix::is_empty) {
            children.pop();
        }
        if children.is_empty() {
            *self = Matrix::Empty;
        }
        removed.filter(|node| !node.is_empty())
    }

    /// Leaves with their indices, depth-first.
    pub fn entries(&self) -> Vec<(Index, &V)> {
        let mut entries = Vec::new();
        let mut prefix = Vec::new();
        self.collect_entries(&mut prefix, &mut entries);
        entries
    }

    fn collect_entries<'a>(&'a self, prefix: &mut Index, out: &mut Vec<(Index, &'a V)>) {
        match self {
            Matrix::Empty => {}
            Matrix::Leaf(value) => out.push((prefix.clone(), value)),
            Matrix::Array(children) => {
                for (position, child) in children.iter().enumerate() {
                    prefix.push(position);
                    child.collect_entries(prefix, out);
                    prefix.pop();
                }
            }
        }
    }

    pub fn into_entries(self) -> Vec<(Index, V)> {
        let mut entries = Vec::new();
        let mut prefix = Vec::new();
        self.collect_owned(&mut prefix, &mut entries);
        entries
    }

    fn collect_owned(self, prefix: &mut Index, out: &mut Vec<(Index, V)>) {
        match self {
            Matrix::Empty => {}
            Matrix::Leaf(value) => out.push((prefix.clone(), value)),
            Matrix::Array(children) => {
                for (position, child) in children.into_iter().enumerate() {
                    prefix.push(position);
                    child.collect_owned(prefix, out);
                    prefix.pop();
                }
            }
        }
    }

    /// Depth-first list of leaves.
    pub fn leaves(&self) -> Vec<&V> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    pub fn into_leaves(self) -> Vec<V> {
        self.into_entries()
            .into_iter()
            .map(|(_, value)| value)
            .collect()
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            Matrix::Empty => 0,
            Matrix::Leaf(_) => 1,
            Matrix::Array(children) => children.iter().map(Matrix::leaf_count).sum(),
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(V) -> U) -> Matrix<U> {
        self.map_with(&mut f)
    }

    fn map_with<U, F: FnMut(V) -> U>(self, f: &mut F) -> Matrix<U> {
        match self {
            Matrix::Empty => Matrix::Empty,
            Matrix::Leaf(value) => Matrix::Leaf(f(value)),
            Matrix::Array(children) => {
                Matrix::Array(children.into_iter().map(|child| child.map_with(f)).collect())
            }
        }
    }

    /// Replace leaves failing `keep` with holes, leaving other indices intact.
    pub fn retain_leaves(self, mut keep: impl FnMut(&V) -> bool) -> Matrix<V> {
        self.retain_with(&mut keep)
    }

    fn retain_with<F: FnMut(&V) -> bool>(self, keep: &mut F) -> Matrix<V> {
        match self {
            Matrix::Leaf(value) if keep(&value) => Matrix::Leaf(value),
            Matrix::Leaf(_) | Matrix::Empty => Matrix::Empty,
            Matrix::Array(children) => Matrix::array(
                children
                    .into_iter()
                    .map(|child| child.retain_with(keep))
                    .collect(),
            ),
        }
    }

    /// Union of two matrices; where both hold a node, `top` wins.
    pub fn overlay(self, top: Matrix<V>) -> Matrix<V> {
        match (self, top) {
            (base, Matrix::Empty) => base,
            (Matrix::Empty, top) => top,
            (Matrix::Array(base), Matrix::Array(top)) => {
                let length = base.len().max(top.len());
                let mut base = base.into_iter();
                let mut top = top.into_iter();
                Matrix::array(
                    (0..length)
                        .map(|_| {
                            let below = base.next().unwrap_or_default();
                            let above = top.next().unwrap_or_default();
                            below.overlay(above)
                        })
                        .collect(),
                )
            }
            (_, top) => top,
        }
    }

    /// Combine two matrices positionally.
    ///
    /// Arrays pair up element by element up to the shorter length, a leaf
    /// is broadcast against every element of an array, and a hole on either
    /// side yields a hole.
    pub fn zip_with<W, U>(self, other: Matrix<W>, mut f: impl FnMut(V, W) -> U) -> Matrix<U>
    where
        V: Clone,
        W: Clone,
    {
        self.zip_inner(other, &mut f)
    }

    fn zip_inner<W, U, F>(self, other: Matrix<W>, f: &mut F) -> Matrix<U>
    where
        V: Clone,
        W: Clone,
        F: FnMut(V, W) -> U,
    {
        match (self, other) {
            (Matrix::Leaf(left), Matrix::Leaf(right)) => Matrix::Leaf(f(left, right)),
            (Matrix::Array(left), Matrix::Array(right)) => Matrix::array(
                left.into_iter()
                    .zip(right)
                    .map(|(l, r)| l.zip_inner(r, f))
                    .collect(),
            ),
            (Matrix::Leaf(left), Matrix::Array(right)) => Matrix::array(
                right
                    .into_iter()
                    .map(|r| Matrix::Leaf(left.clone()).zip_inner(r, f))
                    .collect(),
            ),
            (Matrix::Array(left), Matrix::Leaf(right)) => Matrix::array(
                left.into_iter()
                    .map(|l| l.zip_inner(Matrix::Leaf(right.clone()), f))
                    .collect(),
            ),
            _ => Matrix::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(value: i32) -> Matrix<i32> {
        Matrix::Leaf(value)
    }

    #[test]
    fn test_set_creates_intermediate_arrays() {
        let mut matrix = Matrix::Empty;
        matrix.set(&[1, 2], 7);
        assert_eq!(
            matrix,
            Matrix::Array(vec![
                Matrix::Empty,
                Matrix::Array(vec![Matrix::Empty, Matrix::Empty, leaf(7)]),
            ])
        );
        assert_eq!(matrix.leaf(&[1, 2]), Some(&7));
        assert_eq!(matrix.get(&[0]), None);
        assert_eq!(matrix.get(&[1, 2, 0]), None);
    }

    #[test]
    fn test_set_replaces_leaf_with_array() {
        let mut matrix = leaf(1);
        matrix.set(&[0], 2);
        assert_eq!(matrix, Matrix::Array(vec![leaf(2)]));
        matrix.set(&[], 3);
        assert_eq!(matrix, leaf(3));
    }

    #[test]
    fn test_remove_shifts_later_siblings() {
        let mut matrix = Matrix::from_list(vec![1, 2, 3]);
        assert_eq!(matrix.remove(&[0]), Some(leaf(1)));
        assert_eq!(matrix, Matrix::from_list(vec![2, 3]));
        assert_eq!(matrix.leaf(&[0]), Some(&2));
        assert_eq!(matrix.remove(&[5]), None);
    }

    #[test]
    fn test_remove_of_empty_slot_is_noop() {
        let mut matrix = Matrix::Empty;
        matrix.set(&[2], 5);
        let before = matrix.clone();

        assert_eq!(matrix.remove(&[0]), None);
        assert_eq!(matrix, before);
        assert_eq!(matrix.leaf(&[2]), Some(&5));

        assert_eq!(matrix.remove(&[1, 4]), None);
        assert_eq!(matrix, before);
    }

    #[test]
    fn test_remove_collapses_empty_ancestors() {
        let mut matrix = Matrix::Empty;
        matrix.set(&[0], 1);
        matrix.set(&[1, 0, 0], 2);
        matrix.set(&[2], 3);
        assert_eq!(matrix.remove(&[1, 0, 0]), Some(leaf(2)));
        assert_eq!(matrix, Matrix::from_list(vec![1, 3]));

        assert!(matrix.remove(&[0]).is_some());
        assert!(matrix.remove(&[0]).is_some());
        assert_eq!(matrix, Matrix::Empty);
    }

    #[test]
    fn test_entries_and_list_conversions() {
        let matrix = Matrix::Array(vec![
            leaf(1),
            Matrix::Array(vec![leaf(2), Matrix::Empty, leaf(3)]),
        ]);
        let entries: Vec<(Index, i32)> = matrix.clone().into_entries();
        assert_eq!(
            entries,
            vec![(vec![0], 1), (vec![1, 0], 2), (vec![1, 2], 3)]
        );
        assert_eq!(Matrix::from_entries(entries), matrix);
        assert_eq!(matrix.leaves(), vec![&1, &2, &3]);
        assert_eq!(
            Matrix::from_list(matrix.into_leaves()),
            Matrix::from_list(vec![1, 2, 3])
        );
        assert_eq!(Matrix::<i32>::from_list(Vec::new()), Matrix::Empty);
    }

    #[test]
    fn test_value_at_broadcasts_ancestor_leaf() {
        let matrix = Matrix::Array(vec![leaf(1), Matrix::Array(vec![Matrix::Empty, leaf(2)])]);
        assert_eq!(matrix.value_at(&[1]), Some(&2));
        assert_eq!(matrix.value_at(&[1, 0]), None);
        assert_eq!(leaf(9).value_at(&[3, 4]), Some(&9));
    }

    #[test]
    fn test_overlay_prefers_top() {
        let base = Matrix::from_list(vec![1, 2]);
        let mut top = Matrix::Empty;
        top.set(&[1], 20);
        top.set(&[2], 30);
        assert_eq!(base.overlay(top), Matrix::from_list(vec![1, 20, 30]));
        assert_eq!(leaf(1).overlay(Matrix::Empty), leaf(1));
    }

    #[test]
    fn test_retain_keeps_positions() {
        let matrix = Matrix::from_list(vec![1, 2, 3, 4]).retain_leaves(|v| v % 2 == 1);
        assert_eq!(
            matrix,
            Matrix::Array(vec![leaf(1), Matrix::Empty, leaf(3)])
        );
    }

    #[test]
    fn test_zip_broadcasts_leaf() {
        let zipped = leaf(10).zip_with(Matrix::from_list(vec![1, 2]), |a, b| a + b);
        assert_eq!(zipped, Matrix::from_list(vec![11, 12]));

        let shorter = Matrix::from_list(vec![1, 2, 3]).zip_with(Matrix::from_list(vec![1]), |a, b| a * b);
        assert_eq!(shorter, Matrix::from_list(vec![1]));

        let holes = Matrix::<i32>::Empty.zip_with(leaf(1), |a, b| a + b);
        assert_eq!(holes, Matrix::Empty);
    }
}
