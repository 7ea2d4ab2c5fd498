//! Sprout Core
//!
//! Compiler-and-runtime core for the Sprout procedural-generation grammar
//! language: grammar text is lexed and parsed into a [`Grammar`] of [`Step`]
//! trees, normalized, and compiled into a [`Pipeline`] that transforms live
//! streams of [`Matrix`] snapshots.

pub mod ast;
pub mod cache;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod matrix;
pub mod normalize;
pub mod parser;
pub mod printer;
pub mod result;
pub mod stream;

mod parser_chumsky;

// Re-export commonly used types
pub use ast::{BinaryOperator, Grammar, Literal, RandomBranch, Step, SwitchCase, UnaryOperator};
pub use cache::{
    CacheComputeError, CacheConfig, CacheStats, Cached, DependencyCache, Fingerprint, Primitive,
};
pub use config::{ConfigLoader, FormatterConfig, InterpreterConfig, NormalizeConfig, SproutConfig};
pub use error::{ErrorKind, SproutError};
pub use interpreter::{
    CompileError, EvaluationError, InterpretationValue, Interpreter, MatrixStream, Operand,
    Operation, Operations, Pipeline, Value, cached_operation, compile, run_once,
};
pub use matrix::{Index, Matrix, MatrixChange};
pub use normalize::{
    NodeId, NormalizeError, SharedSteps, equalize, inline_grammar, replace_symbols, split, trim,
    trim_grammar,
};
pub use parser::{ParseError, ParseErrorKind, parse_grammar, parse_steps};
pub use printer::{print_grammar, print_step};
pub use result::Result;

/// Initialize tracing for the library
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sprout=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
