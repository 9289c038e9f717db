//! Reference signal semantics — the executable definition of what the
//! compiler's generated program does.
//!
//! The code generator in [`crate::compile`] emits program text for the remote
//! service; this module implements the same bar-by-bar semantics natively so
//! the crossover seeding policy, missing-data guard, and exit precedence can
//! be tested without a network. Codegen and this evaluator must agree; tests
//! for both live against this module.

pub mod eval;
pub mod indicators;
pub mod sim;

pub use eval::{build_indicator_table, evaluate_group, IndicatorTable};
pub use sim::{simulate, Bar, ExitReason, SimResult, SimTrade};
