//! Abstract syntax tree for Sprout grammars
//!
//! A [`Grammar`] maps rule names to root [`Step`]s. Rule order is preserved
//! and the first rule is the start rule.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Literal value written directly in grammar source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Boolean(bool),
    Number(f64),
    String(String),
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Number(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Boolean(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::String(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnaryOperator {
    Invert,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    And,
    Or,
    Equal,
    Unequal,
    Smaller,
    SmallerEqual,
    Greater,
    GreaterEqual,
}

impl UnaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOperator::Invert => "-",
            UnaryOperator::Not => "!",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            UnaryOperator::Not => precedence::NOT,
            UnaryOperator::Invert => precedence::INVERT,
        }
    }
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
            BinaryOperator::Equal => "==",
            BinaryOperator::Unequal => "!=",
            BinaryOperator::Smaller => "<",
            BinaryOperator::SmallerEqual => "<=",
            BinaryOperator::Greater => ">",
            BinaryOperator::GreaterEqual => ">=",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            BinaryOperator::Or => precedence::OR,
            BinaryOperator::And => precedence::AND,
            BinaryOperator::Equal | BinaryOperator::Unequal => precedence::EQUALITY,
            BinaryOperator::Smaller
            | BinaryOperator::SmallerEqual
            | BinaryOperator::Greater
            | BinaryOperator::GreaterEqual => precedence::RELATIONAL,
            BinaryOperator::Add | BinaryOperator::Subtract => precedence::ADDITIVE,
            BinaryOperator::Multiply | BinaryOperator::Divide | BinaryOperator::Modulo => {
                precedence::MULTIPLICATIVE
            }
        }
    }
}

/// Binding strength of each syntactic level, lowest first.
pub mod precedence {
    /// Context of a rule root, random branch or operation argument
    pub const TOP: u8 = 0;
    pub const PARALLEL: u8 = 1;
    pub const SEQUENTIAL: u8 = 2;
    pub const OR: u8 = 3;
    pub const AND: u8 = 4;
    pub const NOT: u8 = 5;
    pub const EQUALITY: u8 = 6;
    pub const RELATIONAL: u8 = 7;
    pub const ADDITIVE: u8 = 8;
    pub const MULTIPLICATIVE: u8 = 9;
    pub const INVERT: u8 = 10;
    pub const PRIMARY: u8 = 11;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub value: Literal,
    pub branch: Step,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomBranch {
    /// Share of values routed here, in `0..=1`
    pub probability: f64,
    pub branch: Step,
}

/// One AST node of the grammar language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Step {
    This,
    Return,
    Raw {
        value: Literal,
    },
    Symbol {
        name: String,
    },
    Bracket {
        child: Box<Step>,
    },
    Sequential {
        children: Vec<Step>,
    },
    Parallel {
        children: Vec<Step>,
    },
    Operation {
        name: String,
        arguments: Vec<Step>,
    },
    Unary {
        operator: UnaryOperator,
        child: Box<Step>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Step>,
        right: Box<Step>,
    },
    If {
        condition: Box<Step>,
        then_branch: Box<Step>,
        else_branch: Box<Step>,
    },
    Switch {
        discriminant: Box<Step>,
        cases: Vec<SwitchCase>,
    },
    GetVariable {
        name: String,
    },
    SetVariable {
        name: String,
        value: Box<Step>,
    },
    Random {
        branches: Vec<RandomBranch>,
    },
}

impl Step {
    pub fn raw(value: impl Into<Literal>) -> Self {
        Step::Raw {
            value: value.into(),
        }
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Step::Symbol { name: name.into() }
    }

    pub fn bracket(child: Step) -> Self {
        Step::Bracket {
            child: Box::new(child),
        }
    }

    pub fn unary(operator: UnaryOperator, child: Step) -> Self {
        Step::Unary {
            operator,
            child: Box::new(child),
        }
    }

    pub fn binary(operator: BinaryOperator, left: Step, right: Step) -> Self {
        Step::Binary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn if_else(condition: Step, then_branch: Step, else_branch: Step) -> Self {
        Step::If {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        }
    }

    pub fn get_variable(name: impl Into<String>) -> Self {
        Step::GetVariable { name: name.into() }
    }

    pub fn set_variable(name: impl Into<String>, value: Step) -> Self {
        Step::SetVariable {
            name: name.into(),
            value: Box::new(value),
        }
    }

    /// Sequential composition; a single child stands for itself.
    pub fn sequential(mut children: Vec<Step>) -> Self {
        if children.len() == 1
            && let Some(only) = children.pop()
        {
            return only;
        }
        Step::Sequential { children }
    }

    /// Parallel composition; a single child stands for itself.
    pub fn parallel(mut children: Vec<Step>) -> Self {
        if children.len() == 1
            && let Some(only) = children.pop()
        {
            return only;
        }
        Step::Parallel { children }
    }

    /// Binding strength used for bracket trimming and printing.
    ///
    /// `if`, `switch` and `setVariable` extend as far right as possible, so
    /// they rank with sequential composition even though they are primaries.
    pub fn precedence(&self) -> u8 {
        match self {
            Step::Parallel { .. } => precedence::PARALLEL,
            Step::Sequential { .. } => precedence::SEQUENTIAL,
            Step::If { .. } | Step::Switch { .. } | Step::SetVariable { .. } => {
                precedence::SEQUENTIAL
            }
            Step::Binary { operator, .. } => operator.precedence(),
            Step::Unary { operator, .. } => operator.precedence(),
            _ => precedence::PRIMARY,
        }
    }

    /// Children in source order.
    pub fn children(&self) -> Vec<&Step> {
        match self {
            Step::This
            | Step::Return
            | Step::Raw { .. }
            | Step::Symbol { .. }
            | Step::GetVariable { .. } => Vec::new(),
            Step::Bracket { child } | Step::Unary { child, .. } => vec![child.as_ref()],
            Step::SetVariable { value, .. } => vec![value.as_ref()],
            Step::Sequential { children } | Step::Parallel { children } => {
                children.iter().collect()
            }
            Step::Operation { arguments, .. } => arguments.iter().collect(),
            Step::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Step::If {
                condition,
                then_branch,
                else_branch,
            } => vec![
                condition.as_ref(),
                then_branch.as_ref(),
                else_branch.as_ref(),
            ],
            Step::Switch {
                discriminant,
                cases,
            } => std::iter::once(discriminant.as_ref())
                .chain(cases.iter().map(|case| &case.branch))
                .collect(),
            Step::Random { branches } => branches.iter().map(|branch| &branch.branch).collect(),
        }
    }

    /// Rebuild this node with new children, in the order of [`Step::children`].
    ///
    /// Missing children leave the original child in place.
    pub fn with_children(&self, children: Vec<Step>) -> Step {
        let mut replacements = children.into_iter();
        let mut next = |original: &Step| replacements.next().unwrap_or_else(|| original.clone());
        match self {
            Step::This
            | Step::Return
            | Step::Raw { .. }
            | Step::Symbol { .. }
            | Step::GetVariable { .. } => self.clone(),
            Step::Bracket { child } => Step::bracket(next(child)),
            Step::Unary { operator, child } => Step::unary(*operator, next(child)),
            Step::SetVariable { name, value } => Step::set_variable(name.clone(), next(value)),
            Step::Sequential { children } => Step::Sequential {
                children: children.iter().map(&mut next).collect(),
            },
            Step::Parallel { children } => Step::Parallel {
                children: children.iter().map(&mut next).collect(),
            },
            Step::Operation { name, arguments } => Step::Operation {
                name: name.clone(),
                arguments: arguments.iter().map(&mut next).collect(),
            },
            Step::Binary {
                operator,
                left,
                right,
            } => {
                let left = next(left);
                let right = next(right);
                Step::binary(*operator, left, right)
            }
            Step::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = next(condition);
                let then_branch = next(then_branch);
                let else_branch = next(else_branch);
                Step::if_else(condition, then_branch, else_branch)
            }
            Step::Switch {
                discriminant,
                cases,
            } => {
                let discriminant = Box::new(next(discriminant));
                let cases = cases
                    .iter()
                    .map(|case| SwitchCase {
                        value: case.value.clone(),
                        branch: next(&case.branch),
                    })
                    .collect();
                Step::Switch {
                    discriminant,
                    cases,
                }
            }
            Step::Random { branches } => Step::Random {
                branches: branches
                    .iter()
                    .map(|branch| RandomBranch {
                        probability: branch.probability,
                        branch: next(&branch.branch),
                    })
                    .collect(),
            },
        }
    }

    /// A leaf has no children.
    pub fn is_leaf(&self) -> bool {
        self.children().is_empty()
    }
}

/// Ordered mapping from rule name to root step
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grammar {
    rules: IndexMap<String, Step>,
}

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a rule, returning the previous definition.
    pub fn insert(&mut self, name: impl Into<String>, step: Step) -> Option<Step> {
        self.rules.insert(name.into(), step)
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.rules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// The first rule, where evaluation begins
    pub fn start_rule(&self) -> Option<(&str, &Step)> {
        self.rules
            .get_index(0)
            .map(|(name, step)| (name.as_str(), step))
    }

    pub fn rules(&self) -> impl Iterator<Item = (&str, &Step)> {
        self.rules.iter().map(|(name, step)| (name.as_str(), step))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply `f` to every rule root, keeping names and order.
    pub fn map_rules(&self, mut f: impl FnMut(&str, &Step) -> Step) -> Grammar {
        self.rules
            .iter()
            .map(|(name, step)| (name.clone(), f(name, step)))
            .collect()
    }
}

impl FromIterator<(String, Step)> for Grammar {
    fn from_iter<I: IntoIterator<Item = (String, Step)>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}
