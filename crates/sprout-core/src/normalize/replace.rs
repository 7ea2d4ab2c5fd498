//! Symbol inlining

use tracing::trace;

use super::{NormalizeError, format_chain};
use crate::ast::{Grammar, Step};

/// Inline every symbol in `step` with a bracketed copy of its rule, recursively.
///
/// Fails when a rule would be inlined into itself along one path; the same
/// rule may still appear on sibling paths.
pub fn replace_symbols(grammar: &Grammar, step: &Step) -> Result<Step, NormalizeError> {
    let mut path = Vec::new();
    inline(grammar, step, &mut path)
}

/// Inline every rule of a grammar, keeping names and order.
pub fn inline_grammar(grammar: &Grammar) -> Result<Grammar, NormalizeError> {
    grammar
        .rules()
        .map(|(name, step)| {
            let mut path = vec![name.to_string()];
            inline(grammar, step, &mut path).map(|inlined| (name.to_string(), inlined))
        })
        .collect()
}

fn inline(grammar: &Grammar, step: &Step, path: &mut Vec<String>) -> Result<Step, NormalizeError> {
    if let Step::Symbol { name } = step {
        if path.contains(name) {
            path.push(name.clone());
            let chain = format_chain(path);
            return Err(NormalizeError::RecursiveInline { chain });
        }
        let body = grammar
            .get(name)
            .ok_or_else(|| NormalizeError::UnknownSymbol { name: name.clone() })?;
        trace!("inlining rule '{}'", name);

        path.push(name.clone());
        let inlined = inline(grammar, body, path);
        path.pop();
        return inlined.map(Step::bracket);
    }

    let children = step
        .children()
        .into_iter()
        .map(|child| inline(grammar, child, path))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(step.with_children(children))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::trim;
    use crate::parser::{parse_grammar, parse_steps};
    use crate::printer::print_step;

    #[test]
    fn test_inlines_nested_symbols() {
        let grammar = parse_grammar("Start -> A * 2\nA -> B + 1\nB -> this").unwrap();
        let start = grammar.get("Start").unwrap();
        let inlined = replace_symbols(&grammar, start).unwrap();
        assert_eq!(print_step(&inlined), "((this) + 1) * 2");
        assert_eq!(print_step(&trim(&inlined)), "(this + 1) * 2");
    }

    #[test]
    fn test_same_rule_on_sibling_paths_is_allowed() {
        let grammar = parse_grammar("Start -> A A\nA -> 1").unwrap();
        let inlined = replace_symbols(&grammar, &parse_steps("A | A").unwrap()).unwrap();
        assert_eq!(print_step(&inlined), "(1) | (1)");
    }

    #[test]
    fn test_recursion_is_rejected() {
        let grammar = parse_grammar("A -> B\nB -> 1 | A").unwrap();
        let err = inline_grammar(&grammar).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::RecursiveInline {
                chain: "A → B → A".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_symbol() {
        let grammar = parse_grammar("A -> Missing").unwrap();
        assert_eq!(
            inline_grammar(&grammar).unwrap_err(),
            NormalizeError::UnknownSymbol {
                name: "Missing".to_string()
            }
        );
    }
}
