//! Normalization passes: structure and meaning preservation

use sprout_core::{
    Grammar, InterpretationValue, Matrix, NormalizeError, Operations, Value, compile,
    inline_grammar, parse_grammar, print_grammar, run_once, split, trim_grammar,
};

const NON_RECURSIVE: &[&str] = &[
    "Start -> (A B) * 2 | (A B) + (A B)\nA -> this + 1\nB -> (this * 3)",
    "Start -> if (this > 1) then (X | Y) else (X | Y)\nX -> -(this)\nY -> ((this)) - 1",
    "Start -> this.n = (this + 1) (this.n * (this.n))",
];

async fn evaluate(grammar: &Grammar, input: f64) -> Matrix<InterpretationValue<Value>> {
    let pipeline = compile(grammar, &Operations::new()).unwrap();
    run_once(&pipeline, Matrix::Leaf(InterpretationValue::new(Value::from(input))))
        .await
        .unwrap()
}

fn values(snapshot: Matrix<InterpretationValue<Value>>) -> Vec<Value> {
    snapshot
        .into_leaves()
        .into_iter()
        .map(|leaf| leaf.value)
        .collect()
}

#[tokio::test]
async fn test_trim_preserves_meaning() {
    for source in NON_RECURSIVE {
        let grammar = parse_grammar(source).unwrap();
        let trimmed = trim_grammar(&grammar);
        for input in [0.0, 2.0, 5.5] {
            assert_eq!(
                values(evaluate(&trimmed, input).await),
                values(evaluate(&grammar, input).await),
                "{source} on {input}"
            );
        }
    }
}

#[tokio::test]
async fn test_split_preserves_meaning() {
    for source in NON_RECURSIVE {
        let grammar = parse_grammar(source).unwrap();
        let extracted = split(&grammar, "Rule");
        assert!(extracted.len() >= grammar.len());
        assert_eq!(extracted.start_rule().map(|(name, _)| name), Some("Start"));
        for input in [1.0, 3.0] {
            assert_eq!(
                values(evaluate(&extracted, input).await),
                values(evaluate(&grammar, input).await),
                "{source} on {input}"
            );
        }
    }
}

#[test]
fn test_split_then_inline_matches_inline() {
    for source in NON_RECURSIVE {
        let grammar = parse_grammar(source).unwrap();
        let extracted = split(&grammar, "Rule");

        let direct = trim_grammar(&inline_grammar(&grammar).unwrap());
        let round = trim_grammar(&inline_grammar(&extracted).unwrap());
        for (name, step) in direct.rules() {
            assert_eq!(round.get(name), Some(step), "rule {name} of {source}");
        }
    }
}

#[test]
fn test_split_output_snapshot() {
    let grammar = parse_grammar(NON_RECURSIVE[1]).unwrap();
    insta::assert_snapshot!(print_grammar(&split(&grammar, "Part")), @r"
    Start -> if this > 1 then Part1 else Part1
    X -> -this
    Y -> this - 1
    Part1 -> X | Y
    ");
}

#[test]
fn test_inline_rejects_recursion() {
    let grammar = parse_grammar("Start -> A\nA -> B + 1\nB -> A").unwrap();
    let err = inline_grammar(&grammar).unwrap_err();
    assert_eq!(
        err,
        NormalizeError::RecursiveInline {
            chain: "Start → A → B → A".to_string()
        }
    );
}
