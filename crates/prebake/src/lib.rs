//! # prebake
//!
//! A partial-evaluation precompiler core for module sets with both
//! declaration-based and require-style linkage. Given a set of entry
//! specifiers, the pipeline discovers, canonicalizes, fetches, parses, and
//! statically links every reachable module, then rewrites each one so the
//! output performs no dynamic code generation at run time. Values touched
//! by precompile-time code are tracked by the object-graph recorder, whose
//! compacted event scripts let a reknitter recreate them in the output.
//!
//! This crate binds the pipeline together and defines the interfaces of
//! the external peers (instrumenter, reknitter); the subsystems live in
//! `prebake-core`, `prebake-analysis`, `prebake-graph`, and
//! `prebake-record`.

pub mod logger;
pub mod peers;
pub mod prebakery;

pub use logger::{init_logger, init_logger_with_filter};
pub use peers::{PassthroughReknitter, Reknitter};
pub use prebakery::{Prebakery, PrebakeryBuilder, PrebakeReport, PrebakeStats};

pub use prebake_analysis::{BindingStage, Finding, FindingKind, LinkKind, Local, Remote};
pub use prebake_core::{
    BuiltinModules, Diagnostic, DiagnosticSink, FetchContext, FetchOutcome, Fetched, Fetcher,
    FetcherChain, FsFetcher, MemorySink, Module, ModuleAst, ModuleId, Reporter, Severity, Stage,
    TracingSink,
};
pub use prebake_graph::{Gatherer, Instrumenter, ModuleSet, PassthroughInstrumenter, Rewriter};
pub use prebake_record::{Recorder, Replayer, ReplayScript, Value};
