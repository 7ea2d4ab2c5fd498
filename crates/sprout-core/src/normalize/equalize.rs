//! Structural deduplication of step trees

use std::collections::HashMap;

use crate::ast::Step;
use crate::printer::print_step;

/// Index of a node inside a [`SharedSteps`] arena
pub type NodeId = usize;

/// A deduplicated node: its full subtree plus the ids of its children
#[derive(Debug, Clone, PartialEq)]
pub struct SharedNode {
    pub step: Step,
    pub children: Vec<NodeId>,
    /// Canonical serialization shared by every structurally equal subtree
    pub key: String,
}

/// Arena of structurally unique subtrees reachable from a list of roots
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedSteps {
    nodes: Vec<SharedNode>,
    roots: Vec<NodeId>,
    index: HashMap<String, NodeId>,
}

/// Map structurally identical subtrees of `roots` onto shared nodes.
///
/// Nodes are interned post-order, so children always have smaller ids than
/// their parents. Feed trimmed trees for bracket-insensitive sharing.
pub fn equalize(roots: &[Step]) -> SharedSteps {
    let mut shared = SharedSteps::default();
    for root in roots {
        let id = shared.intern(root);
        shared.roots.push(id);
    }
    shared
}

impl SharedSteps {
    fn intern(&mut self, step: &Step) -> NodeId {
        let children: Vec<NodeId> = step
            .children()
            .into_iter()
            .map(|child| self.intern(child))
            .collect();
        let key = print_step(step);
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.nodes.len();
        self.index.insert(key.clone(), id);
        self.nodes.push(SharedNode {
            step: step.clone(),
            children,
            key,
        });
        id
    }

    /// Root ids, one per input step and in input order
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> Option<&SharedNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &SharedNode)> {
        self.nodes.iter().enumerate()
    }

    pub fn key(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id).map(|node| node.key.as_str())
    }

    pub fn to_step(&self, id: NodeId) -> Option<Step> {
        self.nodes.get(id).map(|node| node.step.clone())
    }

    /// Rebuild the root list.
    pub fn to_steps(&self) -> Vec<Step> {
        self.roots
            .iter()
            .filter_map(|&id| self.to_step(id))
            .collect()
    }

    /// Number of unique nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Count parent references per node over parent→child edges.
    ///
    /// Every root occurrence counts as one reference. Each unique parent is
    /// counted once, so a subtree repeated inside one shared parent is only
    /// counted through that parent's edges.
    pub fn reference_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.nodes.len()];
        for &root in &self.roots {
            counts[root] += 1;
        }
        for node in &self.nodes {
            for &child in &node.children {
                counts[child] += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_steps;

    #[test]
    fn test_identical_roots_share_one_node() {
        let a = parse_steps("(A B) + 1").unwrap();
        let shared = equalize(&[a.clone(), a]);
        assert_eq!(shared.roots()[0], shared.roots()[1]);
        assert_eq!(shared.key(shared.roots()[0]), Some("(A B) + 1"));
    }

    #[test]
    fn test_shared_subtrees_across_roots() {
        let first = parse_steps("f(A B) | C").unwrap();
        let second = parse_steps("A B").unwrap();
        let shared = equalize(&[first, second]);
        let counts = shared.reference_counts();
        let ab = shared.roots()[1];
        assert_eq!(counts[ab], 2);
        assert!(shared.len() < 9);
    }

    #[test]
    fn test_equalize_is_idempotent() {
        let roots = vec![
            parse_steps("A (B | C) A").unwrap(),
            parse_steps("B | C").unwrap(),
        ];
        let once = equalize(&roots);
        let twice = equalize(&once.to_steps());
        assert_eq!(once.roots(), twice.roots());
        assert_eq!(once.len(), twice.len());
        assert_eq!(once.to_steps(), twice.to_steps());
    }

    #[test]
    fn test_children_precede_parents() {
        let shared = equalize(&[parse_steps("1 + 2 * 3").unwrap()]);
        for (id, node) in shared.nodes() {
            assert!(node.children.iter().all(|&child| child < id));
        }
    }
}
