//! Leaf payloads: the [`Operand`] contract and the built-in dynamic [`Value`]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOperator, Literal, UnaryOperator};

/// Domain value carried through a pipeline.
///
/// The engine only needs to create values from literals, apply the built-in
/// operators, test truthiness for `if`, and compare against `switch` labels.
pub trait Operand: Clone + fmt::Debug + Send + Sync + 'static {
    fn from_literal(literal: &Literal) -> Self;

    /// Value of an unbound variable
    fn undefined() -> Self;

    fn unary(operator: UnaryOperator, operand: &Self) -> Self;

    fn binary(operator: BinaryOperator, left: &Self, right: &Self) -> Self;

    fn is_truthy(&self) -> bool;

    /// Whether this value equals `literal` in both type and value
    fn matches(&self, literal: &Literal) -> bool;
}

/// Dynamically typed scalar used when the host brings no value type of its own
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Undefined,
    Boolean(bool),
    Number(f64),
    String(String),
}

impl Value {
    fn to_number(&self) -> f64 {
        match self {
            Value::Number(value) => *value,
            Value::Boolean(true) => 1.0,
            Value::Boolean(false) => 0.0,
            Value::Undefined | Value::String(_) => f64::NAN,
        }
    }

    fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
        match (left, right) {
            (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
            _ => left.to_number().partial_cmp(&right.to_number()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Boolean(value) => write!(f, "{}", value),
            Value::Number(value) => write!(f, "{}", value),
            Value::String(value) => write!(f, "{}", value),
        }
    }
}

impl From<Literal> for Value {
    fn from(literal: Literal) -> Self {
        match literal {
            Literal::Boolean(value) => Value::Boolean(value),
            Literal::Number(value) => Value::Number(value),
            Literal::String(value) => Value::String(value),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl Operand for Value {
    fn from_literal(literal: &Literal) -> Self {
        Value::from(literal.clone())
    }

    fn undefined() -> Self {
        Value::Undefined
    }

    fn unary(operator: UnaryOperator, operand: &Self) -> Self {
        match operator {
            UnaryOperator::Not => Value::Boolean(!operand.is_truthy()),
            UnaryOperator::Invert => Value::Number(-operand.to_number()),
        }
    }

    fn binary(operator: BinaryOperator, left: &Self, right: &Self) -> Self {
        use std::cmp::Ordering;

        match operator {
            BinaryOperator::Add => match (left, right) {
                (Value::String(_), _) | (_, Value::String(_)) => {
                    Value::String(format!("{}{}", left, right))
                }
                _ => Value::Number(left.to_number() + right.to_number()),
            },
            BinaryOperator::Subtract => Value::Number(left.to_number() - right.to_number()),
            BinaryOperator::Multiply => Value::Number(left.to_number() * right.to_number()),
            BinaryOperator::Divide => Value::Number(left.to_number() / right.to_number()),
            BinaryOperator::Modulo => Value::Number(left.to_number() % right.to_number()),
            BinaryOperator::And => Value::Boolean(left.is_truthy() && right.is_truthy()),
            BinaryOperator::Or => Value::Boolean(left.is_truthy() || right.is_truthy()),
            BinaryOperator::Equal => Value::Boolean(left == right),
            BinaryOperator::Unequal => Value::Boolean(left != right),
            BinaryOperator::Smaller => {
                Value::Boolean(Value::compare(left, right) == Some(Ordering::Less))
            }
            BinaryOperator::SmallerEqual => Value::Boolean(matches!(
                Value::compare(left, right),
                Some(Ordering::Less | Ordering::Equal)
            )),
            BinaryOperator::Greater => {
                Value::Boolean(Value::compare(left, right) == Some(Ordering::Greater))
            }
            BinaryOperator::GreaterEqual => Value::Boolean(matches!(
                Value::compare(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            )),
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Boolean(value) => *value,
            Value::Number(value) => *value != 0.0 && !value.is_nan(),
            Value::String(value) => !value.is_empty(),
        }
    }

    fn matches(&self, literal: &Literal) -> bool {
        match (self, literal) {
            (Value::Boolean(l), Literal::Boolean(r)) => l == r,
            (Value::Number(l), Literal::Number(r)) => l == r,
            (Value::String(l), Literal::String(r)) => l == r,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(operator: BinaryOperator, left: impl Into<Value>, right: impl Into<Value>) -> Value {
        Value::binary(operator, &left.into(), &right.into())
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(binary(BinaryOperator::Add, 1.0, 2.0), Value::Number(3.0));
        assert_eq!(binary(BinaryOperator::Modulo, 7.0, 3.0), Value::Number(1.0));
        assert_eq!(binary(BinaryOperator::Add, "a", 1.0), Value::from("a1"));
        assert_eq!(
            Value::unary(UnaryOperator::Invert, &Value::Number(2.0)),
            Value::Number(-2.0)
        );
    }

    #[test]
    fn test_comparisons_are_strict() {
        assert_eq!(binary(BinaryOperator::Equal, 1.0, "1"), Value::Boolean(false));
        assert_eq!(binary(BinaryOperator::Smaller, "a", "b"), Value::Boolean(true));
        assert_eq!(
            binary(BinaryOperator::GreaterEqual, 2.0, 2.0),
            Value::Boolean(true)
        );
        assert_eq!(
            Value::binary(BinaryOperator::Smaller, &Value::Undefined, &Value::Number(1.0)),
            Value::Boolean(false)
        );
    }

    #[test]
    fn test_truthiness_and_matching() {
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::Number(3.0).matches(&Literal::Number(3.0)));
        assert!(!Value::from("3").matches(&Literal::Number(3.0)));
    }
}
