//! Parser and printer integration tests

use sprout_core::{
    Grammar, ParseErrorKind, Step, parse_grammar, parse_steps, print_grammar, print_step,
    trim_grammar,
};

const GRAMMARS: &[&str] = &[
    "Start -> 1 + 2 * 3 - -4",
    "Start -> if this > 2 && !(this == 4) then A else B | C\nA -> \"a\"\nB -> true\nC -> false",
    "Start -> switch this.kind case \"door\": Door case -1: return case true: 0.5\nDoor -> this",
    "Start -> { 25%: A case 75%: B C }\nA -> 1\nB -> 2\nC -> 3",
    "Start -> place(1, this | 2) A (B)\nA -> this\nB -> this",
    "Start -> this.x = 3 this.x % 2 >= 1 || this.x != 7 && this.x <= 9",
    "Start -> (this | 1) * (2 + 3) / 4",
    "Start -> \"quote \\\" and \\\\ backslash\" return",
];

fn round_trip(grammar: &Grammar) -> Grammar {
    parse_grammar(&print_grammar(grammar)).unwrap()
}

#[test]
fn test_print_then_parse_is_identity() {
    for source in GRAMMARS {
        let grammar = parse_grammar(source).unwrap_or_else(|e| panic!("{source}: {e}"));
        assert_eq!(round_trip(&grammar), grammar, "round trip of {source}");
    }
}

#[test]
fn test_trimmed_grammars_round_trip() {
    for source in GRAMMARS {
        let trimmed = trim_grammar(&parse_grammar(source).unwrap());
        assert_eq!(round_trip(&trimmed), trimmed, "round trip of trimmed {source}");
        assert_eq!(trim_grammar(&trimmed), trimmed, "trim is idempotent for {source}");
    }
}

#[test]
fn test_operation_requires_adjacent_parenthesis() {
    let call = parse_steps("A(B)").unwrap();
    assert!(matches!(call, Step::Operation { ref name, .. } if name == "A"));

    let sequence = parse_steps("A (B)").unwrap();
    assert_eq!(
        sequence,
        Step::sequential(vec![Step::symbol("A"), Step::bracket(Step::symbol("B"))])
    );
}

#[test]
fn test_rules_keep_source_order() {
    let grammar = parse_grammar("Zeta -> 1\nAlpha -> Zeta\nMid -> Alpha").unwrap();
    let names: Vec<&str> = grammar.names().collect();
    assert_eq!(names, vec!["Zeta", "Alpha", "Mid"]);
    assert_eq!(grammar.start_rule().map(|(name, _)| name), Some("Zeta"));
}

#[test]
fn test_duplicate_rule_is_rejected() {
    let err = parse_grammar("A -> 1\nB -> 2\nA -> 3").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::DuplicateRule);
    assert_eq!(err.line, 2);
}

#[test]
fn test_incomplete_expression_is_rejected() {
    let err = parse_grammar("Start -> 1 +").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Parser);
}

#[test]
fn test_unterminated_string_is_a_lexer_error() {
    let err = parse_grammar("Start -> \"open").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Lexer);
}

#[test]
fn test_printed_grammar_snapshot() {
    let grammar = parse_grammar(GRAMMARS[1]).unwrap();
    insta::assert_snapshot!(print_step(grammar.get("Start").unwrap()), @"if this > 2 && !(this == 4) then A else B | C");
}
