//! StratForge Core — spec model, compiler, and reference signal semantics.
//!
//! This crate is pure data and pure transformations:
//! - Strategy spec model with a tagged condition AST
//! - Structural validation (dangling and unused indicator references are
//!   hard errors)
//! - Parameter sweeps that expand ranges into child specs
//! - Deterministic compiler from spec to program source text
//! - Reference evaluator and simulator defining the exact semantics the
//!   generated programs must reproduce
//! - Content-derived ids and the append-only spec registry
//!
//! Nothing here touches the network or the clock (the registry stamps event
//! times, everything else is deterministic).

pub mod compile;
pub mod ids;
pub mod registry;
pub mod signals;
pub mod spec;

pub use compile::{compile, CompiledProgram, CostModel, DateRange, LiquidityFilter};
pub use ids::{ProgramHash, SpecId};
pub use registry::{Registry, RegistryError, SpecStatus};
pub use spec::{SpecError, StrategySpec};
