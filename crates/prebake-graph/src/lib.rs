//! # prebake-graph
//!
//! The module-lifecycle pipeline: a monotonic module-set bus that stores
//! modules under both their absolute and canonical keys, a gatherer that
//! turns unresolved modules into resolved ones through the fetcher chain,
//! and a rewriter driver that parses, links, and rewrites resolved modules
//! with cycle-aware completion.

pub mod gatherer;
pub mod module_set;
pub mod rewriter;

pub use gatherer::Gatherer;
pub use module_set::{ModuleListener, ModuleSet};
pub use rewriter::{
    Instrumenter, InstrumentedAsts, Job, JobState, PassthroughInstrumenter, Rewriter,
};
