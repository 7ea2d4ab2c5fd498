//! Bracket trimming and associative flattening

use crate::ast::{Grammar, Literal, Step, precedence};

/// Remove every bracket the precedence ladder makes redundant and flatten
/// nested sequential/parallel compositions.
///
/// The result carries the minimal bracketing needed for the printed form to
/// re-parse into the same tree, so `trim(trim(s)) == trim(s)`.
pub fn trim(step: &Step) -> Step {
    trim_at(step, precedence::TOP)
}

/// Trim every rule root of a grammar.
pub fn trim_grammar(grammar: &Grammar) -> Grammar {
    grammar.map_rules(|_, step| trim(step))
}

fn trim_at(step: &Step, context: u8) -> Step {
    let trimmed = trim_node(unbracket(step));
    if trimmed.precedence() >= context {
        trimmed
    } else {
        Step::bracket(trimmed)
    }
}

fn unbracket(mut step: &Step) -> &Step {
    while let Step::Bracket { child } = step {
        step = child;
    }
    step
}

fn trim_node(step: &Step) -> Step {
    let contexts = child_contexts(step);
    let children: Vec<Step> = step
        .children()
        .into_iter()
        .zip(contexts)
        .map(|(child, context)| trim_at(child, context))
        .collect();

    match step {
        Step::Sequential { .. } => {
            let mut flat = flatten(children, |child| match child {
                Step::Sequential { children } => Ok(children),
                other => Err(other),
            });
            // `a (-b)` must not print as the subtraction `a -b`
            for child in flat.iter_mut().skip(1) {
                if starts_with_minus(child) {
                    let inner = std::mem::replace(child, Step::This);
                    *child = Step::bracket(inner);
                }
            }
            Step::sequential(flat)
        }
        Step::Parallel { .. } => Step::parallel(flatten(children, |child| match child {
            Step::Parallel { children } => Ok(children),
            other => Err(other),
        })),
        _ => step.with_children(children),
    }
}

fn flatten(children: Vec<Step>, open: impl Fn(Step) -> Result<Vec<Step>, Step>) -> Vec<Step> {
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match open(child) {
            Ok(nested) => flat.extend(nested),
            Err(single) => flat.push(single),
        }
    }
    flat
}

/// Context precedence of each child, in the order of [`Step::children`].
fn child_contexts(step: &Step) -> Vec<u8> {
    match step {
        Step::Sequential { children } => vec![precedence::SEQUENTIAL; children.len()],
        Step::Parallel { children } => vec![precedence::PARALLEL; children.len()],
        Step::Binary { operator, .. } => {
            let level = operator.precedence();
            vec![level, level + 1]
        }
        Step::Unary { operator, .. } => vec![operator.precedence()],
        Step::If { .. } => vec![precedence::OR; 3],
        Step::Switch { cases, .. } => vec![precedence::OR; cases.len() + 1],
        Step::SetVariable { .. } => vec![precedence::OR],
        Step::Operation { arguments, .. } => vec![precedence::TOP; arguments.len()],
        Step::Random { branches } => vec![precedence::TOP; branches.len()],
        Step::Bracket { .. } => vec![precedence::TOP],
        _ => Vec::new(),
    }
}

fn starts_with_minus(step: &Step) -> bool {
    match step {
        Step::Unary {
            operator: crate::ast::UnaryOperator::Invert,
            ..
        } => true,
        Step::Raw {
            value: Literal::Number(value),
        } => value.is_sign_negative(),
        Step::Binary { left, .. } => starts_with_minus(left),
        Step::Sequential { children } | Step::Parallel { children } => {
            children.first().is_some_and(starts_with_minus)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_steps;
    use crate::printer::print_step;

    fn trimmed(source: &str) -> String {
        print_step(&trim(&parse_steps(source).unwrap()))
    }

    #[test]
    fn test_removes_redundant_brackets() {
        assert_eq!(trimmed("(1 * 2) + 3"), "1 * 2 + 3");
        assert_eq!(trimmed("((A))"), "A");
        assert_eq!(trimmed("(this.x)"), "this.x");
    }

    #[test]
    fn test_keeps_required_brackets() {
        assert_eq!(trimmed("(1 + 2) * 3"), "(1 + 2) * 3");
        assert_eq!(trimmed("1 - (2 - 3)"), "1 - (2 - 3)");
        assert_eq!(trimmed("-(1 * 2)"), "-(1 * 2)");
        assert_eq!(trimmed("A (B | C)"), "A (B | C)");
        assert_eq!(trimmed("(if true then 1 else 2) + 1"), "(if true then 1 else 2) + 1");
    }

    #[test]
    fn test_flattens_nested_compositions() {
        let step = trim(&parse_steps("A (B C) D | (E | F)").unwrap());
        match step {
            Step::Parallel { children } => {
                assert_eq!(children.len(), 3);
                assert!(matches!(&children[0], Step::Sequential { children } if children.len() == 4));
            }
            other => panic!("expected parallel, got {:?}", other),
        }
    }

    #[test]
    fn test_keeps_bracket_before_leading_minus() {
        assert_eq!(trimmed("A (-1)"), "A (-1)");
        assert_eq!(trimmed("(-1) A"), "-1 A");
        assert_eq!(trimmed("A (-B * 2)"), "A (-B * 2)");
    }

    #[test]
    fn test_trim_is_idempotent() {
        for source in ["(A (B C)) | ((D))", "!(1 == 2) && (3 < 4)", "{ 50%: (A) case 50%: (B | C) }"] {
            let once = trim(&parse_steps(source).unwrap());
            assert_eq!(trim(&once), once, "{}", source);
        }
    }
}
