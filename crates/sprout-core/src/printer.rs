//! Canonical pretty-printer
//!
//! Renders steps back to grammar source. The printer is literal: it emits
//! exactly the brackets present in the tree, so [`crate::normalize::trim`]
//! decides which brackets survive. Its output doubles as the structural
//! equality key used by [`crate::normalize::equalize`].

use std::fmt::{self, Write as _};

use crate::ast::{Grammar, Literal, Step};

/// Render a single step as grammar source.
pub fn print_step(step: &Step) -> String {
    let mut out = String::new();
    write_step(&mut out, step);
    out
}

/// Render a grammar as one `Name -> steps` line per rule.
pub fn print_grammar(grammar: &Grammar) -> String {
    let mut out = String::new();
    for (name, step) in grammar.rules() {
        out.push_str(name);
        out.push_str(" -> ");
        write_step(&mut out, step);
        out.push('\n');
    }
    out
}

fn write_list(out: &mut String, steps: &[Step], separator: &str) {
    for (position, step) in steps.iter().enumerate() {
        if position > 0 {
            out.push_str(separator);
        }
        write_step(out, step);
    }
}

fn write_step(out: &mut String, step: &Step) {
    match step {
        Step::This => out.push_str("this"),
        Step::Return => out.push_str("return"),
        Step::Raw { value } => write_literal(out, value),
        Step::Symbol { name } => out.push_str(name),
        Step::Bracket { child } => {
            out.push('(');
            write_step(out, child);
            out.push(')');
        }
        Step::Sequential { children } => write_list(out, children, " "),
        Step::Parallel { children } => write_list(out, children, " | "),
        Step::Operation { name, arguments } => {
            out.push_str(name);
            out.push('(');
            write_list(out, arguments, ", ");
            out.push(')');
        }
        Step::Unary { operator, child } => {
            out.push_str(operator.symbol());
            write_step(out, child);
        }
        Step::Binary {
            operator,
            left,
            right,
        } => {
            write_step(out, left);
            out.push(' ');
            out.push_str(operator.symbol());
            out.push(' ');
            write_step(out, right);
        }
        Step::If {
            condition,
            then_branch,
            else_branch,
        } => {
            out.push_str("if ");
            write_step(out, condition);
            out.push_str(" then ");
            write_step(out, then_branch);
            out.push_str(" else ");
            write_step(out, else_branch);
        }
        Step::Switch {
            discriminant,
            cases,
        } => {
            out.push_str("switch ");
            write_step(out, discriminant);
            for case in cases {
                out.push_str(" case ");
                write_literal(out, &case.value);
                out.push_str(": ");
                write_step(out, &case.branch);
            }
        }
        Step::GetVariable { name } => {
            out.push_str("this.");
            out.push_str(name);
        }
        Step::SetVariable { name, value } => {
            out.push_str("this.");
            out.push_str(name);
            out.push_str(" = ");
            write_step(out, value);
        }
        Step::Random { branches } => {
            out.push_str("{ ");
            for (position, branch) in branches.iter().enumerate() {
                if position > 0 {
                    out.push_str(" case ");
                }
                write_percent(out, branch.probability);
                out.push_str("%: ");
                write_step(out, &branch.branch);
            }
            out.push_str(" }");
        }
    }
}

/// Write `probability` as a percentage by moving the decimal point of its
/// shortest round-trip rendering, so the text parses back to the same value.
fn write_percent(out: &mut String, probability: f64) {
    let rendered = probability.abs().to_string();
    let (whole, fraction) = rendered.split_once('.').unwrap_or((rendered.as_str(), ""));
    let fraction = format!("{:0<2}", fraction);
    let (shifted, rest) = fraction.split_at(2);

    let whole = format!("{}{}", whole, shifted);
    let whole = whole.trim_start_matches('0');
    let rest = rest.trim_end_matches('0');

    if probability.is_sign_negative() && probability != 0.0 {
        out.push('-');
    }
    out.push_str(if whole.is_empty() { "0" } else { whole });
    if !rest.is_empty() {
        out.push('.');
        out.push_str(rest);
    }
}

fn write_number(out: &mut String, value: f64) {
    // Display for f64 never uses exponents and prints integers without `.0`
    let _ = write!(out, "{}", value);
}

fn write_literal(out: &mut String, literal: &Literal) {
    match literal {
        Literal::Boolean(value) => out.push_str(if *value { "true" } else { "false" }),
        Literal::Number(value) => write_number(out, *value),
        Literal::String(value) => {
            out.push('"');
            for ch in value.chars() {
                match ch {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    '\r' => out.push_str("\\r"),
                    other => out.push(other),
                }
            }
            out.push('"');
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&print_step(self))
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_literal(&mut out, self);
        f.write_str(&out)
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&print_grammar(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOperator, RandomBranch, SwitchCase, UnaryOperator};

    #[test]
    fn test_print_operators_and_brackets() {
        let step = Step::binary(
            BinaryOperator::Multiply,
            Step::bracket(Step::binary(
                BinaryOperator::Add,
                Step::raw(1.0),
                Step::raw(2.5),
            )),
            Step::unary(UnaryOperator::Invert, Step::get_variable("x")),
        );
        insta::assert_snapshot!(print_step(&step), @"(1 + 2.5) * -this.x");
    }

    #[test]
    fn test_print_control_flow() {
        let step = Step::Sequential {
            children: vec![
                Step::set_variable("size", Step::raw(3.0)),
                Step::Switch {
                    discriminant: Box::new(Step::get_variable("size")),
                    cases: vec![
                        SwitchCase {
                            value: Literal::Number(3.0),
                            branch: Step::raw("three"),
                        },
                        SwitchCase {
                            value: Literal::Number(-1.0),
                            branch: Step::Return,
                        },
                    ],
                },
            ],
        };
        insta::assert_snapshot!(
            print_step(&step),
            @r#"this.size = 3 switch this.size case 3: "three" case -1: return"#
        );
    }

    #[test]
    fn test_print_random_and_operations() {
        let step = Step::Parallel {
            children: vec![
                Step::Random {
                    branches: vec![
                        RandomBranch {
                            probability: 0.07,
                            branch: Step::symbol("A"),
                        },
                        RandomBranch {
                            probability: 0.93,
                            branch: Step::symbol("B"),
                        },
                    ],
                },
                Step::Operation {
                    name: "translate".to_string(),
                    arguments: vec![Step::raw(1.0), Step::This],
                },
            ],
        };
        insta::assert_snapshot!(
            print_step(&step),
            @"{ 7%: A case 93%: B } | translate(1, this)"
        );
    }

    #[test]
    fn test_random_probabilities_survive_reparsing() {
        for probability in [0.07, 0.123456789012345, 1.0 / 3.0, 0.000_000_000_017, 0.5] {
            let step = Step::Random {
                branches: vec![RandomBranch {
                    probability,
                    branch: Step::This,
                }],
            };
            let reparsed = crate::parser::parse_steps(&print_step(&step)).unwrap();
            assert_eq!(reparsed, step, "probability {probability}");
        }
    }

    #[test]
    fn test_print_escapes_strings() {
        assert_eq!(
            print_step(&Step::raw("say \"hi\"\n")),
            r#""say \"hi\"\n""#
        );
    }

    #[test]
    fn test_print_grammar_lines() {
        let mut grammar = Grammar::new();
        grammar.insert("Start", Step::symbol("Leaf"));
        grammar.insert("Leaf", Step::if_else(Step::raw(true), Step::This, Step::Return));
        assert_eq!(
            print_grammar(&grammar),
            "Start -> Leaf\nLeaf -> if true then this else return\n"
        );
    }
}
