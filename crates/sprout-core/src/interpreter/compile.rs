//! Lowering of [`Step`] trees into [`Pipeline`]s

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use rand::Rng;
use rand::rngs::StdRng;
use tracing::trace;

use super::{
    CompileError, EvaluationError, InterpretationValue, MatrixStream, Operand, Operations,
    Pipeline, Snapshot,
};
use crate::ast::{BinaryOperator, Grammar, Literal, RandomBranch, Step, SwitchCase, UnaryOperator};
use crate::matrix::{Index, Matrix};
use crate::stream::{combine_latest, defer_until, detach, fan_out, fork, until_error};

/// Picks the branch for one value, given the selector output governing it
type Choose<T> = Arc<dyn Fn(Option<&InterpretationValue<T>>) -> Option<usize> + Send + Sync>;

pub(super) struct Compiler<'a, T> {
    grammar: &'a Grammar,
    operations: &'a Operations<T>,
    max_depth: usize,
    random: Arc<Mutex<StdRng>>,
    /// Rule bodies, registered before lowering so recursion finds them
    rules: DashMap<String, Arc<OnceLock<Pipeline<T>>>>,
}

impl<'a, T: Operand> Compiler<'a, T> {
    pub(super) fn new(
        grammar: &'a Grammar,
        operations: &'a Operations<T>,
        max_depth: usize,
        random: Arc<Mutex<StdRng>>,
    ) -> Self {
        Self {
            grammar,
            operations,
            max_depth,
            random,
            rules: DashMap::new(),
        }
    }

    /// Pipeline invoking rule `name`, lowering its body on first use
    pub(super) fn symbol(&self, name: &str) -> Result<Pipeline<T>, CompileError> {
        let body = self
            .grammar
            .get(name)
            .ok_or_else(|| CompileError::UnknownSymbol {
                name: name.to_string(),
            })?;

        let (cell, fresh) = match self.rules.entry(name.to_string()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let cell = Arc::new(OnceLock::new());
                entry.insert(Arc::clone(&cell));
                (cell, true)
            }
        };

        if fresh {
            trace!("Lowering rule '{}'", name);
            let pipeline = self.lower(body)?;
            let _ = cell.set(pipeline);
        }

        Ok(rule_pipeline(name, self.max_depth, cell))
    }

    fn lower(&self, step: &Step) -> Result<Pipeline<T>, CompileError> {
        match step {
            Step::This => Ok(Pipeline::identity()),
            Step::Return => Ok(Pipeline::map_values(|mut value| {
                value.terminated = true;
                value
            })),
            Step::Raw { value } => Ok(self.raw(value)),
            Step::Symbol { name } => self.symbol(name),
            Step::Bracket { child } => self.lower(child),
            Step::Sequential { children } => self.sequential(children),
            Step::Parallel { children } => self.parallel(children),
            Step::Operation { name, arguments } => self.operation(name, arguments),
            Step::Unary { operator, child } => Ok(unary(*operator, self.lower(child)?)),
            Step::Binary {
                operator,
                left,
                right,
            } => Ok(binary(*operator, self.lower(left)?, self.lower(right)?)),
            Step::If {
                condition,
                then_branch,
                else_branch,
            } => self.if_else(condition, then_branch, else_branch),
            Step::Switch {
                discriminant,
                cases,
            } => self.switch(discriminant, cases),
            Step::GetVariable { name } => Ok(get_variable(name.clone())),
            Step::SetVariable { name, value } => Ok(set_variable(name.clone(), self.lower(value)?)),
            Step::Random { branches } => self.random(branches),
        }
    }

    fn raw(&self, literal: &Literal) -> Pipeline<T> {
        let constant = T::from_literal(literal);
        Pipeline::map_values(move |current| InterpretationValue {
            value: constant.clone(),
            ..current
        })
    }

    fn lower_all(&self, steps: &[Step]) -> Result<Vec<Pipeline<T>>, CompileError> {
        steps.iter().map(|step| self.lower(step)).collect()
    }

    /// Thread live values through every stage; values terminated by a stage
    /// are held back and merged into the output.
    fn sequential(&self, children: &[Step]) -> Result<Pipeline<T>, CompileError> {
        let stages = self.lower_all(children)?;
        let Some((last, init)) = stages.split_last() else {
            return Err(CompileError::EmptyComposition { kind: "sequential" });
        };
        let (last, init) = (last.clone(), init.to_vec());

        Ok(Pipeline::new(move |input| {
            let mut held = Vec::with_capacity(init.len() + 1);
            let mut live = input;
            for stage in &init {
                let (finished, running) = fork(stage.apply(live));
                held.push(
                    finished
                        .map(|item| item.map(|snapshot| snapshot.retain_leaves(|v| v.terminated)))
                        .boxed(),
                );
                live = running
                    .map(|item| item.map(|snapshot| snapshot.retain_leaves(|v| !v.terminated)))
                    .boxed();
            }
            held.push(last.apply(live));
            overlay_all(held)
        }))
    }

    /// Run every branch on the full input; branch `i` lands under index `[i, ..]`
    fn parallel(&self, children: &[Step]) -> Result<Pipeline<T>, CompileError> {
        let branches = self.lower_all(children)?;
        if branches.is_empty() {
            return Err(CompileError::EmptyComposition { kind: "parallel" });
        }

        Ok(Pipeline::new(move |input| {
            let outputs = fan_out(input, branches.len())
                .into_iter()
                .zip(branches.iter())
                .map(|(feed, branch)| branch.apply(feed))
                .collect();
            combine_latest(outputs)
                .map(|item| item.map(Matrix::array))
                .boxed()
        }))
    }

    fn operation(&self, name: &str, arguments: &[Step]) -> Result<Pipeline<T>, CompileError> {
        let operation = self
            .operations
            .get(name)
            .ok_or_else(|| CompileError::UnknownOperation {
                name: name.to_string(),
            })?;
        let arguments = self.lower_all(arguments)?;
        Ok(operation(arguments))
    }

    fn if_else(
        &self,
        condition: &Step,
        then_branch: &Step,
        else_branch: &Step,
    ) -> Result<Pipeline<T>, CompileError> {
        let choose: Choose<T> = Arc::new(|decided: Option<&InterpretationValue<T>>| {
            decided.map(|decided| if decided.value.is_truthy() { 0 } else { 1 })
        });
        Ok(route(
            Some(self.lower(condition)?),
            vec![self.lower(then_branch)?, self.lower(else_branch)?],
            choose,
        ))
    }

    /// Values whose discriminant matches no case are dropped.
    fn switch(&self, discriminant: &Step, cases: &[SwitchCase]) -> Result<Pipeline<T>, CompileError> {
        let labels: Vec<Literal> = cases.iter().map(|case| case.value.clone()).collect();
        let branches = cases
            .iter()
            .map(|case| self.lower(&case.branch))
            .collect::<Result<Vec<_>, _>>()?;
        let choose: Choose<T> = Arc::new(move |decided: Option<&InterpretationValue<T>>| {
            let decided = decided?;
            labels.iter().position(|label| decided.value.matches(label))
        });
        Ok(route(Some(self.lower(discriminant)?), branches, choose))
    }

    /// Each value draws one sample and keeps it while its index stays
    /// populated; the last branch takes whatever the probabilities leave
    /// uncovered.
    fn random(&self, branches: &[RandomBranch]) -> Result<Pipeline<T>, CompileError> {
        if branches.is_empty() {
            return Err(CompileError::EmptyComposition { kind: "random" });
        }
        let probabilities: Vec<f64> = branches.iter().map(|branch| branch.probability).collect();
        let pipelines = branches
            .iter()
            .map(|branch| self.lower(&branch.branch))
            .collect::<Result<Vec<_>, _>>()?;

        let random = Arc::clone(&self.random);
        let choose: Choose<T> = Arc::new(move |_: Option<&InterpretationValue<T>>| {
            let sample: f64 = random
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .gen_range(0.0..1.0);
            let mut cumulative = 0.0;
            for (branch, probability) in probabilities.iter().enumerate() {
                cumulative += probability;
                if sample < cumulative {
                    return Some(branch);
                }
            }
            Some(probabilities.len() - 1)
        });
        Ok(route(None, pipelines, choose))
    }
}

fn unary<T: Operand>(operator: UnaryOperator, child: Pipeline<T>) -> Pipeline<T> {
    Pipeline::new(move |input| {
        child
            .apply(input)
            .map(move |item| {
                item.map(|snapshot| {
                    snapshot.map(|operand| {
                        let value = T::unary(operator, &operand.value);
                        InterpretationValue::merge(&[&operand], value)
                    })
                })
            })
            .boxed()
    })
}

fn binary<T: Operand>(operator: BinaryOperator, left: Pipeline<T>, right: Pipeline<T>) -> Pipeline<T> {
    Pipeline::new(move |input| {
        let (first, second) = fork(input);
        combine_latest(vec![left.apply(first), right.apply(second)])
            .map(move |item| {
                item.map(|mut pair| {
                    let rhs = pair.pop().unwrap_or_default();
                    let lhs = pair.pop().unwrap_or_default();
                    lhs.zip_with(rhs, |a, b| {
                        let value = T::binary(operator, &a.value, &b.value);
                        InterpretationValue::merge(&[&a, &b], value)
                    })
                })
            })
            .boxed()
    })
}

fn get_variable<T: Operand>(name: String) -> Pipeline<T> {
    Pipeline::map_values(move |current| {
        let bound = current
            .parameter(&name)
            .cloned()
            .unwrap_or_else(T::undefined);
        InterpretationValue {
            value: bound,
            ..current
        }
    })
}

/// Bind the value computed at each index; indices left without one bind undefined.
fn set_variable<T: Operand>(name: String, value: Pipeline<T>) -> Pipeline<T> {
    Pipeline::new(move |input| {
        let (values, observed) = fork(input);
        let name = name.clone();
        combine_latest(vec![values, value.apply(observed)])
            .map(move |item| {
                item.map(|mut pair| {
                    let bound = pair.pop().unwrap_or_default();
                    let values = pair.pop().unwrap_or_default();
                    Matrix::from_entries(values.into_entries().into_iter().map(|(index, current)| {
                        let assigned = bound
                            .value_at(&index)
                            .map(|bound| bound.value.clone())
                            .unwrap_or_else(T::undefined);
                        let current = current.with_parameter(name.clone(), assigned);
                        (index, current)
                    }))
                })
            })
            .boxed()
    })
}

/// Split the input between `branches` according to `choose` and overlay
/// their outputs. With a selector, its output at a value's index decides.
/// Without one, `choose` runs once per index and later snapshots reuse
/// that choice.
fn route<T: Operand>(
    selector: Option<Pipeline<T>>,
    branches: Vec<Pipeline<T>>,
    choose: Choose<T>,
) -> Pipeline<T> {
    if branches.is_empty() {
        return Pipeline::map_matrix(|_| Ok(Matrix::Empty));
    }

    Pipeline::new(move |input| {
        let count = branches.len();
        let choose = Arc::clone(&choose);
        let partitions: BoxStream<'static, Result<Vec<Snapshot<T>>, EvaluationError>> =
            match &selector {
                Some(selector) => {
                    let (values, observed) = fork(input);
                    combine_latest(vec![values, selector.apply(observed)])
                        .map(move |item| {
                            item.map(|mut pair| {
                                let decided = pair.pop().unwrap_or_default();
                                let values = pair.pop().unwrap_or_default();
                                partition(values, count, |index| choose(decided.value_at(index)))
                            })
                        })
                        .boxed()
                }
                None => {
                    let mut chosen: HashMap<Index, usize> = HashMap::new();
                    input
                        .map(move |item| {
                            item.map(|values| {
                                let mut kept = HashMap::new();
                                let parts = partition(values, count, |index| {
                                    let branch =
                                        chosen.get(index).copied().or_else(|| choose(None))?;
                                    kept.insert(index.clone(), branch);
                                    Some(branch)
                                });
                                chosen = kept;
                                parts
                            })
                        })
                        .boxed()
                }
            };

        let outputs = fan_out(partitions, count)
            .into_iter()
            .zip(branches.iter())
            .enumerate()
            .map(|(slot, (feed, branch))| {
                let own = feed
                    .map(move |item| {
                        item.map(|parts| parts.into_iter().nth(slot).unwrap_or_default())
                    })
                    .boxed();
                branch.apply(own)
            })
            .collect();
        overlay_all(outputs)
    })
}

fn partition<T: Operand>(
    values: Snapshot<T>,
    count: usize,
    mut decide: impl FnMut(&Index) -> Option<usize>,
) -> Vec<Snapshot<T>> {
    let mut parts: Vec<Snapshot<T>> = (0..count).map(|_| Matrix::Empty).collect();
    for (index, value) in values.into_entries() {
        if let Some(part) = decide(&index).and_then(|branch| parts.get_mut(branch)) {
            part.set(&index, value);
        }
    }
    parts
}

/// Latest outputs of all streams, overlaid in order; later streams win collisions.
fn overlay_all<T: Operand>(outputs: Vec<MatrixStream<T>>) -> MatrixStream<T> {
    combine_latest(outputs)
        .map(|item| {
            item.map(|snapshots| snapshots.into_iter().fold(Matrix::Empty, Matrix::overlay))
        })
        .boxed()
}

fn rule_pipeline<T: Operand>(
    rule: &str,
    limit: usize,
    body: Arc<OnceLock<Pipeline<T>>>,
) -> Pipeline<T> {
    let rule = rule.to_string();
    Pipeline::new(move |input| {
        let entering = rule.clone();
        let counted = until_error(
            input
                .map(move |item| item.and_then(|snapshot| enter_rule(snapshot, &entering, limit)))
                .boxed(),
        );

        // Building the body lazily keeps recursive rules from unfolding on
        // empty snapshots
        let body = Arc::clone(&body);
        let unresolved = rule.clone();
        let exiting = rule.clone();
        let expanded = defer_until(counted, is_populated::<T>, move |stream| match body.get() {
            Some(pipeline) => pipeline.apply(stream),
            None => stream::once(future::ready(Err(EvaluationError::UnresolvedRule {
                rule: unresolved,
            })))
            .boxed(),
        })
        .map(move |item| item.map(|snapshot| snapshot.map(|value| exit_rule(value, &exiting))))
        .boxed();

        // Each expansion runs on its own task so deep recursion never nests polls
        detach(expanded)
    })
}

fn is_populated<T>(snapshot: &Snapshot<T>) -> bool {
    !snapshot.is_empty()
}

fn enter_rule<T: Operand>(
    snapshot: Snapshot<T>,
    rule: &str,
    limit: usize,
) -> Result<Snapshot<T>, EvaluationError> {
    let mut exceeded = false;
    let snapshot = snapshot.map(|mut value| {
        let depth = value.event_depth_map.entry(rule.to_string()).or_insert(0);
        *depth += 1;
        exceeded |= *depth > limit;
        value
    });
    if exceeded {
        Err(EvaluationError::DepthExceeded {
            rule: rule.to_string(),
            limit,
        })
    } else {
        Ok(snapshot)
    }
}

fn exit_rule<T>(mut value: InterpretationValue<T>, rule: &str) -> InterpretationValue<T> {
    let finished = match value.event_depth_map.get_mut(rule) {
        Some(depth) => {
            *depth = depth.saturating_sub(1);
            *depth == 0
        }
        None => false,
    };
    if finished {
        value.event_depth_map.remove(rule);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Value;

    #[test]
    fn test_depth_is_counted_per_rule() {
        let snapshot = Matrix::Leaf(InterpretationValue::new(Value::from(1.0)));
        let once = enter_rule(snapshot, "A", 2).unwrap();
        let twice = enter_rule(once, "A", 2).unwrap();
        assert_eq!(twice.leaf(&[]).unwrap().depth("A"), 2);

        let err = enter_rule(twice.clone(), "A", 2).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::DepthExceeded {
                rule: "A".to_string(),
                limit: 2
            }
        );

        let other = enter_rule(twice, "B", 2).unwrap();
        assert_eq!(other.leaf(&[]).unwrap().depth("B"), 1);
    }

    #[test]
    fn test_exit_restores_depth() {
        let mut value = InterpretationValue::new(Value::from(1.0));
        value.event_depth_map.insert("A".to_string(), 1);
        let value = exit_rule(value, "A");
        assert_eq!(value.depth("A"), 0);
        assert!(value.event_depth_map.is_empty());
    }

    #[test]
    fn test_partition_without_selector() {
        let values = Matrix::from_list(vec![
            InterpretationValue::new(Value::from(1.0)),
            InterpretationValue::new(Value::from(2.0)),
        ]);
        let parts = partition(values, 2, |_| Some(1));
        assert!(parts[0].is_empty());
        assert_eq!(parts[1].leaf_count(), 2);
    }
}
