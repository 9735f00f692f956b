//! Structured linkage findings.
//!
//! One [`Finding`] per import or export construct; one [`SymbolFinding`] per
//! bound symbol inside it. Findings retain the source span of their
//! specifier literal so the rewriter can match pending fetches back to the
//! exact occurrence that requested them.

use serde::{Deserialize, Serialize};

/// Whether a finding brings names in or sends them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindingKind {
    Import,
    Export,
}

/// How the linkage is expressed in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkKind {
    /// `import` / `export` declarations.
    Declaration,
    /// `require(...)` calls and `exports`-object assignments.
    RequireLike,
}

/// Prebake stage requested by a leading annotation comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingStage {
    /// Needed only by precompile-time code.
    Moot,
    /// Should be pre-computed where possible.
    Eager,
    /// Left for run time.
    Runtime,
}

/// The name a symbol has in the foreign module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Remote {
    Named(String),
    Default,
    Star,
    None,
}

/// The name a symbol binds locally (or presents to importers, for exports).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Local {
    Named(String),
    Star,
    None,
}

/// Byte span in the original source. Spans are the identity of specifier
/// literals: the rewriter splices pending specifiers out by span as their
/// fetches complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: u32,
    pub end: u32,
}

impl SourceSpan {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// One bound symbol within a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFinding {
    pub remote: Remote,
    pub local: Local,
    pub stage: Option<BindingStage>,
    pub line: u32,
}

impl SymbolFinding {
    pub fn new(remote: Remote, local: Local, line: u32) -> Self {
        Self {
            remote,
            local,
            stage: None,
            line,
        }
    }

    pub fn with_stage(mut self, stage: Option<BindingStage>) -> Self {
        self.stage = stage;
        self
    }
}

/// One import or export construct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub link: LinkKind,
    /// The module specifier string literal, when the construct has one.
    pub specifier: Option<String>,
    /// Span of that literal in the source.
    pub specifier_span: Option<SourceSpan>,
    pub symbols: Vec<SymbolFinding>,
    pub line: u32,
}

impl Finding {
    pub fn new(kind: FindingKind, link: LinkKind, line: u32) -> Self {
        Self {
            kind,
            link,
            specifier: None,
            specifier_span: None,
            symbols: Vec::new(),
            line,
        }
    }

    pub fn with_specifier(mut self, specifier: impl Into<String>, span: SourceSpan) -> Self {
        self.specifier = Some(specifier.into());
        self.specifier_span = Some(span);
        self
    }

    pub fn with_symbols(mut self, symbols: Vec<SymbolFinding>) -> Self {
        self.symbols = symbols;
        self
    }

    /// True for findings that pull in another module.
    pub fn references_module(&self) -> bool {
        self.specifier.is_some()
    }
}
