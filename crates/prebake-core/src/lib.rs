//! # prebake-core
//!
//! Core types for the prebake precompiler: the diagnostics bus, module
//! identifiers, the module lifecycle, the fetcher chain, and specifier
//! resolution.
//!
//! This crate contains no dependencies on other prebake crates, breaking the
//! cyclic dependency chain: the pipeline crates (`prebake-graph`,
//! `prebake-analysis`) and the façade all build on top of it.

pub mod diagnostics;
pub mod fetcher;
pub mod fs_fetcher;
pub mod module;
pub mod module_id;
pub mod resolver;

pub use diagnostics::{
    Diagnostic, DiagnosticSink, MemorySink, Reporter, Severity, SinkError, TracingSink,
};
pub use fetcher::{FetchOutcome, Fetched, Fetcher, FetcherChain};
pub use fs_fetcher::FsFetcher;
pub use module::{
    AstFlavor, FetchContext, Module, ModuleAst, ModuleMetadata, ModuleState, PromotionError, Stage,
};
pub use module_id::ModuleId;
pub use resolver::{BuiltinModules, NoProbe, ResolveError, Resolver, UrlProbe};

/// Error types for prebake operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Pipeline or graph operation error.
    #[error("operation error: {0}")]
    Operation(String),
}

/// Result type alias for prebake operations.
pub type Result<T> = std::result::Result<T, Error>;
