//! The module lifecycle.
//!
//! A module advances through a total order of stages,
//! `Unresolved < Resolved < Rewritten < Output < Error`, where `Error`
//! compares greater than every non-error stage so an error is never
//! overwritten by a non-error. Each stage is a distinct [`ModuleState`]
//! variant carrying exactly the fields that exist at that point; promotion
//! is a fallible conversion that consumes the older variant.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::Diagnostic;
use crate::module_id::ModuleId;

/// Lifecycle stage of a module. The derived order is the lifecycle order;
/// `Error` is deliberately last so it compares greater than every other
/// stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Unresolved,
    Resolved,
    Rewritten,
    Output,
    Error,
}

/// Where a fetch came from: the importer's id and line, kept for
/// diagnostics and for resolving the module's own specifiers later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchContext {
    pub importer_base: ModuleId,
    pub importer_line: Option<u32>,
}

impl FetchContext {
    pub fn new(importer_base: ModuleId) -> Self {
        Self {
            importer_base,
            importer_line: None,
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.importer_line = Some(line);
        self
    }
}

/// Metadata carried by a fetched module: the id it was first fetched
/// through (used as the base for resolving its specifiers) and free-form
/// provider properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub base: ModuleId,
    pub properties: FxHashMap<String, String>,
}

impl ModuleMetadata {
    pub fn new(base: ModuleId) -> Self {
        Self {
            base,
            properties: FxHashMap::default(),
        }
    }
}

/// Which rendition of a module's syntax a [`ModuleAst`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AstFlavor {
    /// As parsed from the fetched source.
    Original,
    /// After the instrumenter replaced dynamic code generation.
    Rewritten,
    /// With marked holes for the reknitter to fill.
    Swiss,
    /// Final output with holes filled.
    Output,
}

/// Opaque parsed-module handle.
///
/// The pipeline stores and forwards these without inspecting them; only the
/// analysis crate and the external instrumenter/reknitter look inside. The
/// handle is text-backed so it can outlive any parser arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleAst {
    pub flavor: AstFlavor,
    pub source: Arc<str>,
}

impl ModuleAst {
    pub fn new(flavor: AstFlavor, source: impl Into<Arc<str>>) -> Self {
        Self {
            flavor,
            source: source.into(),
        }
    }
}

/// Per-stage state of a module. Fields carry forward as the module
/// advances; the error variant absorbs any other.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleState {
    Unresolved {
        fetch_context: FetchContext,
    },
    Resolved {
        source: Arc<str>,
        metadata: ModuleMetadata,
    },
    Rewritten {
        source: Arc<str>,
        metadata: ModuleMetadata,
        original_ast: Arc<ModuleAst>,
        rewritten_ast: Arc<ModuleAst>,
        swiss_ast: Arc<ModuleAst>,
    },
    Output {
        source: Arc<str>,
        metadata: ModuleMetadata,
        original_ast: Arc<ModuleAst>,
        rewritten_ast: Arc<ModuleAst>,
        swiss_ast: Arc<ModuleAst>,
        output_ast: Arc<ModuleAst>,
    },
    Error {
        diagnostics: Vec<Diagnostic>,
    },
}

/// Attempted an impossible stage conversion.
#[derive(Debug, Clone, Error)]
#[error("cannot promote module from {from:?} to {to:?}")]
pub struct PromotionError {
    pub from: Stage,
    pub to: Stage,
}

/// A module at some point in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub id: ModuleId,
    state: ModuleState,
}

impl Module {
    /// A fresh unresolved module, remembering who asked for it.
    pub fn unresolved(id: ModuleId, fetch_context: FetchContext) -> Self {
        Self {
            id,
            state: ModuleState::Unresolved { fetch_context },
        }
    }

    /// A resolved module carrying fetched source and metadata.
    pub fn resolved(id: ModuleId, source: impl Into<Arc<str>>, metadata: ModuleMetadata) -> Self {
        Self {
            id,
            state: ModuleState::Resolved {
                source: source.into(),
                metadata,
            },
        }
    }

    /// An error module created from scratch.
    pub fn error_at(id: ModuleId, diagnostic: Diagnostic) -> Self {
        Self {
            id,
            state: ModuleState::Error {
                diagnostics: vec![diagnostic],
            },
        }
    }

    /// The stage is a function of the state variant.
    pub fn stage(&self) -> Stage {
        match &self.state {
            ModuleState::Unresolved { .. } => Stage::Unresolved,
            ModuleState::Resolved { .. } => Stage::Resolved,
            ModuleState::Rewritten { .. } => Stage::Rewritten,
            ModuleState::Output { .. } => Stage::Output,
            ModuleState::Error { .. } => Stage::Error,
        }
    }

    pub fn state(&self) -> &ModuleState {
        &self.state
    }

    pub fn is_error(&self) -> bool {
        matches!(self.state, ModuleState::Error { .. })
    }

    /// The fetch context, present only while unresolved.
    pub fn fetch_context(&self) -> Option<&FetchContext> {
        match &self.state {
            ModuleState::Unresolved { fetch_context } => Some(fetch_context),
            _ => None,
        }
    }

    /// Fetched source text, absent before resolution and after an error.
    pub fn source(&self) -> Option<&Arc<str>> {
        match &self.state {
            ModuleState::Resolved { source, .. }
            | ModuleState::Rewritten { source, .. }
            | ModuleState::Output { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn metadata(&self) -> Option<&ModuleMetadata> {
        match &self.state {
            ModuleState::Resolved { metadata, .. }
            | ModuleState::Rewritten { metadata, .. }
            | ModuleState::Output { metadata, .. } => Some(metadata),
            _ => None,
        }
    }

    pub fn original_ast(&self) -> Option<&Arc<ModuleAst>> {
        match &self.state {
            ModuleState::Rewritten { original_ast, .. }
            | ModuleState::Output { original_ast, .. } => Some(original_ast),
            _ => None,
        }
    }

    pub fn rewritten_ast(&self) -> Option<&Arc<ModuleAst>> {
        match &self.state {
            ModuleState::Rewritten { rewritten_ast, .. }
            | ModuleState::Output { rewritten_ast, .. } => Some(rewritten_ast),
            _ => None,
        }
    }

    pub fn swiss_ast(&self) -> Option<&Arc<ModuleAst>> {
        match &self.state {
            ModuleState::Rewritten { swiss_ast, .. } | ModuleState::Output { swiss_ast, .. } => {
                Some(swiss_ast)
            }
            _ => None,
        }
    }

    pub fn output_ast(&self) -> Option<&Arc<ModuleAst>> {
        match &self.state {
            ModuleState::Output { output_ast, .. } => Some(output_ast),
            _ => None,
        }
    }

    /// Diagnostics accumulated on an error module.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match &self.state {
            ModuleState::Error { diagnostics } => diagnostics,
            _ => &[],
        }
    }

    /// The same module under a canonicalized id.
    pub fn with_id(mut self, id: ModuleId) -> Self {
        self.id = id;
        self
    }

    /// Promote a resolved module to rewritten.
    pub fn into_rewritten(
        self,
        original_ast: Arc<ModuleAst>,
        rewritten_ast: Arc<ModuleAst>,
        swiss_ast: Arc<ModuleAst>,
    ) -> Result<Self, PromotionError> {
        match self.state {
            ModuleState::Resolved { source, metadata } => Ok(Self {
                id: self.id,
                state: ModuleState::Rewritten {
                    source,
                    metadata,
                    original_ast,
                    rewritten_ast,
                    swiss_ast,
                },
            }),
            other => Err(PromotionError {
                from: stage_of(&other),
                to: Stage::Rewritten,
            }),
        }
    }

    /// Promote a rewritten module to output.
    pub fn into_output(self, output_ast: Arc<ModuleAst>) -> Result<Self, PromotionError> {
        match self.state {
            ModuleState::Rewritten {
                source,
                metadata,
                original_ast,
                rewritten_ast,
                swiss_ast,
            } => Ok(Self {
                id: self.id,
                state: ModuleState::Output {
                    source,
                    metadata,
                    original_ast,
                    rewritten_ast,
                    swiss_ast,
                    output_ast,
                },
            }),
            other => Err(PromotionError {
                from: stage_of(&other),
                to: Stage::Output,
            }),
        }
    }

    /// Absorb this module into the error state. Works from any stage; an
    /// already-error module just accumulates the new diagnostic.
    pub fn into_error(self, diagnostic: Diagnostic) -> Self {
        let mut diagnostics = match self.state {
            ModuleState::Error { diagnostics } => diagnostics,
            _ => Vec::new(),
        };
        diagnostics.push(diagnostic);
        Self {
            id: self.id,
            state: ModuleState::Error { diagnostics },
        }
    }

    /// Merge another module's diagnostics into this error module.
    ///
    /// A no-op unless `self` is in the error state; error modules never
    /// leave that state.
    pub fn merge_errors(&mut self, other: &Module) {
        if let ModuleState::Error { diagnostics } = &mut self.state {
            diagnostics.extend(other.diagnostics().iter().cloned());
        }
    }
}

fn stage_of(state: &ModuleState) -> Stage {
    match state {
        ModuleState::Unresolved { .. } => Stage::Unresolved,
        ModuleState::Resolved { .. } => Stage::Resolved,
        ModuleState::Rewritten { .. } => Stage::Rewritten,
        ModuleState::Output { .. } => Stage::Output,
        ModuleState::Error { .. } => Stage::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ModuleId {
        ModuleId::tentative(s)
    }

    #[test]
    fn stage_order_is_total_with_error_greatest() {
        assert!(Stage::Unresolved < Stage::Resolved);
        assert!(Stage::Resolved < Stage::Rewritten);
        assert!(Stage::Rewritten < Stage::Output);
        assert!(Stage::Output < Stage::Error);
        // Equality holds only between identical variants.
        assert_eq!(Stage::Resolved.cmp(&Stage::Resolved), std::cmp::Ordering::Equal);
    }

    #[test]
    fn promotion_carries_fields_forward() {
        let base = id("file:///m.js");
        let module = Module::resolved(
            base.clone(),
            "export const x = 1;",
            ModuleMetadata::new(base.clone()),
        );
        let ast = Arc::new(ModuleAst::new(AstFlavor::Original, "export const x = 1;"));
        let rewritten = module
            .clone()
            .into_rewritten(
                ast.clone(),
                Arc::new(ModuleAst::new(AstFlavor::Rewritten, "export const x = 1;")),
                Arc::new(ModuleAst::new(AstFlavor::Swiss, "export const x = 1;")),
            )
            .unwrap();
        assert_eq!(rewritten.stage(), Stage::Rewritten);
        assert_eq!(rewritten.source(), module.source());
        assert!(rewritten.metadata().is_some());
    }

    #[test]
    fn promotion_from_wrong_stage_fails() {
        let m = Module::unresolved(
            id("file:///m.js"),
            FetchContext::new(id("file:///base.js")),
        );
        let ast = Arc::new(ModuleAst::new(AstFlavor::Original, ""));
        let err = m
            .into_rewritten(ast.clone(), ast.clone(), ast)
            .unwrap_err();
        assert_eq!(err.from, Stage::Unresolved);
        assert_eq!(err.to, Stage::Rewritten);
    }

    #[test]
    fn error_absorbs_and_accumulates() {
        let m = Module::resolved(
            id("file:///m.js"),
            "x",
            ModuleMetadata::new(id("file:///m.js")),
        );
        let mut errored = m.into_error(Diagnostic::error("parse failed"));
        assert_eq!(errored.stage(), Stage::Error);

        let other = Module::error_at(id("file:///m.js"), Diagnostic::error("fetch failed"));
        errored.merge_errors(&other);
        assert_eq!(errored.diagnostics().len(), 2);
    }

    #[test]
    fn error_module_stays_error() {
        let m = Module::error_at(id("file:///m.js"), Diagnostic::error("boom"));
        let still = m.into_error(Diagnostic::error("again"));
        assert_eq!(still.stage(), Stage::Error);
        assert_eq!(still.diagnostics().len(), 2);
    }
}
