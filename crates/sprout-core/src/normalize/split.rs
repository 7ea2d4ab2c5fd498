//! Extraction of shared subtrees into synthetic rules

use std::collections::HashMap;

use tracing::debug;

use super::equalize::{NodeId, SharedSteps, equalize};
use super::trim::trim_grammar;
use crate::ast::{Grammar, Step};

/// Move every non-leaf subtree referenced by more than one parent into a new
/// rule named `{prefix}{n}` and reference it by symbol.
///
/// The grammar is trimmed first so bracketing does not hide sharing. New
/// rules are appended after the existing ones; the pass runs once and does
/// not look for sharing inside the rules it creates.
pub fn split(grammar: &Grammar, prefix: &str) -> Grammar {
    let trimmed = trim_grammar(grammar);
    let roots: Vec<Step> = trimmed.rules().map(|(_, step)| step.clone()).collect();
    let shared = equalize(&roots);
    let counts = shared.reference_counts();

    let mut names: HashMap<NodeId, String> = HashMap::new();
    let mut next_suffix = 1usize;
    for (id, node) in shared.nodes() {
        if counts[id] < 2 || node.children.is_empty() {
            continue;
        }
        let name = loop {
            let candidate = format!("{}{}", prefix, next_suffix);
            next_suffix += 1;
            if !trimmed.contains(&candidate) {
                break candidate;
            }
        };
        names.insert(id, name);
    }
    debug!("split extracted {} shared subtrees", names.len());

    let mut result: Grammar = trimmed
        .names()
        .zip(shared.roots())
        .map(|(name, &root)| (name.to_string(), rebuild(&shared, &names, root)))
        .collect();

    let mut extracted: Vec<(&NodeId, &String)> = names.iter().collect();
    extracted.sort_by_key(|(id, _)| **id);
    for (&id, name) in extracted {
        result.insert(name.clone(), rebuild_body(&shared, &names, id));
    }
    result
}

/// Rebuild a subtree, replacing extracted nodes by symbols.
fn rebuild(shared: &SharedSteps, names: &HashMap<NodeId, String>, id: NodeId) -> Step {
    match names.get(&id) {
        Some(name) => Step::symbol(name.clone()),
        None => rebuild_body(shared, names, id),
    }
}

/// Rebuild a node itself, replacing only extracted descendants.
fn rebuild_body(shared: &SharedSteps, names: &HashMap<NodeId, String>, id: NodeId) -> Step {
    let Some(node) = shared.node(id) else {
        return Step::This;
    };
    let children: Vec<Step> = node
        .children
        .iter()
        .map(|&child| rebuild(shared, names, child))
        .collect();
    match node.step.with_children(children) {
        // A symbol is already primary, so an extracted bracket keeps only its content
        Step::Bracket { child } if names.contains_key(&id) => *child,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_grammar;
    use crate::printer::print_grammar;

    #[test]
    fn test_split_extracts_shared_subtree() {
        let grammar = parse_grammar("Start -> f(A B) g(A B)\nA -> 1\nB -> 2").unwrap();
        let result = split(&grammar, "Rule");
        assert_eq!(
            print_grammar(&result),
            "Start -> f(Rule1) g(Rule1)\nA -> 1\nB -> 2\nRule1 -> A B\n"
        );
    }

    #[test]
    fn test_split_skips_leaves_and_taken_names() {
        let grammar = parse_grammar("Rule1 -> (X | Y) + (X | Y)\nX -> 1\nY -> 2").unwrap();
        let result = split(&grammar, "Rule");
        assert_eq!(
            print_grammar(&result),
            "Rule1 -> Rule2 + Rule2\nX -> 1\nY -> 2\nRule2 -> X | Y\n"
        );
    }

    #[test]
    fn test_split_without_sharing_only_trims() {
        let grammar = parse_grammar("Start -> (A) | (B C)").unwrap();
        let result = split(&grammar, "Rule");
        assert_eq!(print_grammar(&result), "Start -> A | B C\n");
    }
}
