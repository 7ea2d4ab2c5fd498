//! Pure tree-to-tree transforms over the grammar AST
//!
//! - [`trim`]: precedence-aware bracket removal and associative flattening
//! - [`equalize`]: structural deduplication into a shared-node arena
//! - [`split`]: extraction of shared subtrees into synthetic rules
//! - [`replace_symbols`]: inlining of symbol references

mod equalize;
mod replace;
mod split;
mod trim;

pub use equalize::{NodeId, SharedNode, SharedSteps, equalize};
pub use replace::{inline_grammar, replace_symbols};
pub use split::split;
pub use trim::{trim, trim_grammar};

use thiserror::Error;

/// Errors raised by AST transforms
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("Recursive rule cannot be inlined: {chain}")]
    RecursiveInline { chain: String },

    #[error("Unknown symbol '{name}'")]
    UnknownSymbol { name: String },
}

/// Format a chain of rule names for error messages.
pub(crate) fn format_chain(chain: &[String]) -> String {
    chain.join(" → ")
}
