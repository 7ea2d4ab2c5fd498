//! Grammar interpreter
//!
//! A [`Grammar`] is compiled into a [`Pipeline`]: a function from a stream of
//! [`Matrix`] snapshots to another such stream. Each leaf of a snapshot is an
//! [`InterpretationValue`] carrying the host's [`Operand`] payload together
//! with its recursion depths, termination flag, and variable bindings.

mod compile;
mod value;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use indexmap::IndexMap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::ast::Grammar;
use crate::cache::{CacheComputeError, CacheConfig, CacheItem, DependencyCache, Fingerprint};
use crate::config::InterpreterConfig;
use crate::matrix::Matrix;
use crate::stream::{combine_latest, switch_latest, until_error};

use compile::Compiler;
pub use value::{Operand, Value};

/// Error raised while lowering a grammar into a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Grammar has no rules")]
    EmptyGrammar,

    #[error("Unknown symbol '{name}'")]
    UnknownSymbol { name: String },

    #[error("Unknown operation '{name}'")]
    UnknownOperation { name: String },

    #[error("Empty {kind} composition")]
    EmptyComposition { kind: &'static str },
}

/// Error travelling through a running pipeline
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("Maximum recursion depth of {limit} exceeded in rule '{rule}'")]
    DepthExceeded { rule: String, limit: usize },

    #[error(transparent)]
    Cache(#[from] CacheComputeError),

    #[error("Operation '{name}' failed: {message}")]
    Operation { name: String, message: String },

    #[error("Rule '{rule}' was used before it was compiled")]
    UnresolvedRule { rule: String },
}

impl EvaluationError {
    pub fn operation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// One leaf of a snapshot flowing through a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpretationValue<T> {
    pub value: T,
    /// Current nesting depth per rule name
    pub event_depth_map: HashMap<String, usize>,
    /// Set by `return`; terminated values skip the rest of a sequence
    pub terminated: bool,
    /// Variables bound with `this.name = ...`
    pub parameters: IndexMap<String, T>,
}

impl<T: Operand> InterpretationValue<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            event_depth_map: HashMap::new(),
            terminated: false,
            parameters: IndexMap::new(),
        }
    }

    /// Same metadata, different payload
    pub fn with_value(&self, value: T) -> Self {
        Self {
            value,
            event_depth_map: self.event_depth_map.clone(),
            terminated: self.terminated,
            parameters: self.parameters.clone(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: T) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn depth(&self, rule: &str) -> usize {
        self.event_depth_map.get(rule).copied().unwrap_or(0)
    }

    pub fn parameter(&self, name: &str) -> Option<&T> {
        self.parameters.get(name)
    }

    /// Combine the metadata of several operands into a fresh, live value.
    ///
    /// Depths take the per-rule maximum; for parameters, later operands
    /// override earlier ones.
    pub fn merge(parts: &[&Self], value: T) -> Self {
        let mut event_depth_map = HashMap::new();
        let mut parameters = IndexMap::new();
        for part in parts {
            for (rule, depth) in &part.event_depth_map {
                let entry = event_depth_map.entry(rule.clone()).or_insert(0);
                *entry = (*entry).max(*depth);
            }
            for (name, bound) in &part.parameters {
                parameters.insert(name.clone(), bound.clone());
            }
        }
        Self {
            value,
            event_depth_map,
            terminated: false,
            parameters,
        }
    }
}

/// A full snapshot of interpretation values
pub type Snapshot<T> = Matrix<InterpretationValue<T>>;

/// Stream of snapshots, possibly interrupted by an evaluation error
pub type MatrixStream<T> = BoxStream<'static, Result<Snapshot<T>, EvaluationError>>;

type Transform<T> = dyn Fn(MatrixStream<T>) -> MatrixStream<T> + Send + Sync;

/// A compiled, reusable stream transformer
pub struct Pipeline<T> {
    transform: Arc<Transform<T>>,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl<T: Operand> Pipeline<T> {
    pub fn new(
        transform: impl Fn(MatrixStream<T>) -> MatrixStream<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            transform: Arc::new(transform),
        }
    }

    pub fn identity() -> Self {
        Self::new(|input| input)
    }

    pub fn apply(&self, input: MatrixStream<T>) -> MatrixStream<T> {
        (self.transform)(input)
    }

    /// Transform every snapshot as a whole
    pub fn map_matrix(
        f: impl Fn(Snapshot<T>) -> Result<Snapshot<T>, EvaluationError> + Send + Sync + 'static,
    ) -> Self {
        let f = Arc::new(f);
        Self::new(move |input| {
            let f = Arc::clone(&f);
            input.map(move |item| item.and_then(|snapshot| f(snapshot))).boxed()
        })
    }

    /// Transform every leaf, keeping its index
    pub fn map_values(
        f: impl Fn(InterpretationValue<T>) -> InterpretationValue<T> + Send + Sync + 'static,
    ) -> Self {
        let f = Arc::new(f);
        Self::map_matrix(move |snapshot| Ok(snapshot.map(|value| f(value))))
    }

    /// Map each input snapshot to a stream of its own, following only the
    /// stream of the newest snapshot
    pub fn switch_latest(
        project: impl Fn(Snapshot<T>) -> MatrixStream<T> + Send + Sync + 'static,
    ) -> Self {
        let project = Arc::new(project);
        Self::new(move |input| {
            let project = Arc::clone(&project);
            let output = switch_latest(input, move |item| match item {
                Ok(snapshot) => project(snapshot),
                Err(err) => stream::once(future::ready(Err(err))).boxed(),
            });
            until_error(output)
        })
    }

    /// Feed the output of `self` into `next`
    pub fn then(&self, next: &Pipeline<T>) -> Pipeline<T> {
        let (first, second) = (self.clone(), next.clone());
        Self::new(move |input| second.apply(first.apply(input)))
    }
}

/// Host-provided operation: receives the compiled argument pipelines
pub type Operation<T> = Arc<dyn Fn(Vec<Pipeline<T>>) -> Pipeline<T> + Send + Sync>;

/// Table of host operations, looked up by name during compilation
pub struct Operations<T> {
    table: HashMap<String, Operation<T>>,
}

impl<T> Default for Operations<T> {
    fn default() -> Self {
        Self {
            table: HashMap::new(),
        }
    }
}

impl<T> fmt::Debug for Operations<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.table.keys().collect();
        names.sort();
        f.debug_struct("Operations").field("names", &names).finish()
    }
}

impl<T: Operand> Operations<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        operation: impl Fn(Vec<Pipeline<T>>) -> Pipeline<T> + Send + Sync + 'static,
    ) -> &mut Self {
        self.table.insert(name.into(), Arc::new(operation));
        self
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(
        mut self,
        name: impl Into<String>,
        operation: impl Fn(Vec<Pipeline<T>>) -> Pipeline<T> + Send + Sync + 'static,
    ) -> Self {
        self.register(name, operation);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Operation<T>> {
        self.table.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.table.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// One interpretation session: a grammar plus the state shared by every
/// pipeline compiled from it (dependency cache and random source).
pub struct Interpreter<T> {
    grammar: Arc<Grammar>,
    config: InterpreterConfig,
    cache: Arc<DependencyCache<T>>,
    random: Arc<Mutex<StdRng>>,
}

impl<T: Operand> Interpreter<T> {
    pub fn new(grammar: Grammar) -> Self {
        Self::with_config(grammar, InterpreterConfig::default(), CacheConfig::default())
    }

    pub fn with_config(grammar: Grammar, config: InterpreterConfig, cache: CacheConfig) -> Self {
        let random = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            grammar: Arc::new(grammar),
            config,
            cache: Arc::new(DependencyCache::new(cache)),
            random: Arc::new(Mutex::new(random)),
        }
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Session cache, shared with operations built by [`cached_operation`]
    pub fn cache(&self) -> Arc<DependencyCache<T>> {
        Arc::clone(&self.cache)
    }

    /// Compile every rule and return the pipeline of the start rule.
    ///
    /// All rules are lowered up front, so an unknown symbol or operation
    /// anywhere in the grammar is reported here, even in unreachable rules.
    pub fn compile(&self, operations: &Operations<T>) -> Result<Pipeline<T>, CompileError> {
        let (start, _) = self.grammar.start_rule().ok_or(CompileError::EmptyGrammar)?;
        let compiler = self.compiler(operations);
        for (name, _) in self.grammar.rules() {
            compiler.symbol(name)?;
        }
        info!(
            "Compiled {} rules starting at '{}'",
            self.grammar.len(),
            start
        );
        compiler.symbol(start)
    }

    /// Compile a single rule and the rules it references
    pub fn compile_rule(
        &self,
        name: &str,
        operations: &Operations<T>,
    ) -> Result<Pipeline<T>, CompileError> {
        debug!("Compiling rule '{}'", name);
        self.compiler(operations).symbol(name)
    }

    fn compiler<'a>(&'a self, operations: &'a Operations<T>) -> Compiler<'a, T> {
        Compiler::new(
            &self.grammar,
            operations,
            self.config.max_depth,
            Arc::clone(&self.random),
        )
    }
}

/// Compile `grammar` with a default session
pub fn compile<T: Operand>(
    grammar: &Grammar,
    operations: &Operations<T>,
) -> Result<Pipeline<T>, CompileError> {
    Interpreter::new(grammar.clone()).compile(operations)
}

/// Feed a single snapshot through `pipeline` and wait for its final output
pub async fn run_once<T: Operand>(
    pipeline: &Pipeline<T>,
    input: Snapshot<T>,
) -> Result<Snapshot<T>, EvaluationError> {
    let mut output = pipeline.apply(stream::once(future::ready(Ok(input))).boxed());
    let mut latest = Matrix::Empty;
    while let Some(item) = output.next().await {
        latest = item?;
    }
    Ok(latest)
}

/// Build a pipeline whose leaves are computed through `cache`.
///
/// `get_dependencies` extracts the fingerprint of a leaf; leaves with equal
/// fingerprints share one `compute` invocation. A new input snapshot
/// replaces every subscription made for the previous one, and fingerprints
/// the new snapshot no longer uses are released from the cache.
pub fn cached_operation<T, D, C>(
    cache: Arc<DependencyCache<T>>,
    get_dependencies: D,
    compute: C,
) -> Pipeline<T>
where
    T: Operand,
    D: Fn(&InterpretationValue<T>) -> Fingerprint + Send + Sync + 'static,
    C: Fn(&InterpretationValue<T>) -> BoxStream<'static, CacheItem<T>> + Send + Sync + 'static,
{
    let leaf_ops = Arc::new((get_dependencies, compute));
    Pipeline::new(move |input| {
        let cache = Arc::clone(&cache);
        let leaf_ops = Arc::clone(&leaf_ops);
        let mut current: Vec<Fingerprint> = Vec::new();
        let output = switch_latest(input, move |item| match item {
            Ok(snapshot) => {
                let (get_dependencies, compute) = &*leaf_ops;
                let (leaves, fingerprints) =
                    attach_leaves(&cache, snapshot, get_dependencies, compute);
                let superseded: Vec<Fingerprint> = current
                    .drain(..)
                    .filter(|fingerprint| !fingerprints.contains(fingerprint))
                    .collect();
                current = fingerprints;
                release_first(Arc::clone(&cache), superseded, leaves)
            }
            Err(err) => stream::once(future::ready(Err(err))).boxed(),
        });
        until_error(output)
    })
}

/// Release `superseded` once `leaves` is first polled, which is after the
/// subscriptions of the previous snapshot have been dropped.
fn release_first<T: Operand>(
    cache: Arc<DependencyCache<T>>,
    superseded: Vec<Fingerprint>,
    leaves: MatrixStream<T>,
) -> MatrixStream<T> {
    if superseded.is_empty() {
        return leaves;
    }
    stream::once(future::lazy(move |_| {
        for fingerprint in &superseded {
            cache.release(fingerprint);
        }
    }))
    .filter_map(|_| future::ready(None::<Result<Snapshot<T>, EvaluationError>>))
    .chain(leaves)
    .boxed()
}

fn attach_leaves<T: Operand>(
    cache: &DependencyCache<T>,
    snapshot: Snapshot<T>,
    get_dependencies: &(dyn Fn(&InterpretationValue<T>) -> Fingerprint + Send + Sync),
    compute: &(dyn Fn(&InterpretationValue<T>) -> BoxStream<'static, CacheItem<T>> + Send + Sync),
) -> (MatrixStream<T>, Vec<Fingerprint>) {
    let entries = snapshot.into_entries();
    if entries.is_empty() {
        return (stream::once(future::ready(Ok(Matrix::Empty))).boxed(), Vec::new());
    }

    let mut fingerprints = Vec::with_capacity(entries.len());
    let leaves = entries
        .iter()
        .map(|(_, value)| {
            let fingerprint = get_dependencies(value);
            fingerprints.push(fingerprint.clone());
            cache
                .attach(fingerprint, || compute(value))
                .map(|item| item.map_err(EvaluationError::from))
                .boxed()
        })
        .collect();

    let combined = combine_latest(leaves)
        .map(move |item| {
            item.map(|results| {
                Matrix::from_entries(
                    entries
                        .iter()
                        .zip(results)
                        .map(|((index, value), result)| (index.clone(), value.with_value(result))),
                )
            })
        })
        .boxed();
    (combined, fingerprints)
}
