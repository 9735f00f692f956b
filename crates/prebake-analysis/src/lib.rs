//! # prebake-analysis
//!
//! Static linkage extraction for the prebake pipeline: parses module source
//! and produces structured findings for every import and export, covering
//! both declaration-style and require-style linkage, with the stage
//! annotation (`@prebake.moot` / `@prebake.eager` / `@prebake.runtime`)
//! attached to each bound symbol.
//!
//! The extractor is pure: it never mutates the AST it walks.

pub mod extract;
pub mod findings;
pub mod parser;
mod require;
pub mod stage;

pub use extract::{analyze_source, extract_findings};
pub use findings::{
    BindingStage, Finding, FindingKind, LinkKind, Local, Remote, SourceSpan, SymbolFinding,
};
pub use parser::{parse, LineIndex, ParseDiagnostic, ParseError, ParseOptions, ParsedModule};
pub use stage::CommentIndex;

/// Oxc foundation types re-exported for workspace consistency.
///
/// This ensures every prebake crate that touches the AST uses the same oxc
/// version for types that cross crate boundaries.
pub mod oxc {
    pub use oxc_allocator::Allocator;
    pub use oxc_ast::ast;
    pub use oxc_parser::{Parser, ParserReturn};
    pub use oxc_semantic::SemanticBuilder;
    pub use oxc_span::{GetSpan, SourceType, Span};
}
