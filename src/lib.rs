//! querent — exact result counts for Boolean search queries.
//!
//! The remote search API only answers conjunctive queries and caps how
//! much it tells you about them. querent rewrites an arbitrary Boolean
//! query into disjunctive normal form, enumerates every non-empty
//! subset of the disjuncts, issues one conjunctive sub-query per
//! subset, and sums the counts with alternating signs — the
//! inclusion–exclusion principle — to recover the exact cardinality of
//! the union.

pub mod cache;
pub mod cli;
pub mod decompose;
pub mod dnf;
pub mod engine;
pub mod error;
pub mod expr;
pub mod issue;
pub mod logging;
pub mod parse;
pub mod report;
pub mod runner;
pub mod translate;

pub use engine::{Engine, EngineOptions, RunStats};
pub use error::{Error, ExitCode, Result};
