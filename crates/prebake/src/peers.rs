//! External peer interfaces.
//!
//! The instrumenter (defined next to the rewriter that drives it) and the
//! reknitter are black-box collaborators: the pipeline only pins down
//! their interfaces. The reknitter receives a rewritten module's swiss
//! rendition together with the recorder's compacted event script and fills
//! the marked holes with replayed values.

use std::sync::Arc;

use async_trait::async_trait;

use prebake_core::{AstFlavor, Module, ModuleAst};
use prebake_record::ReplayScript;

/// Fills a swiss module's holes from a replay script, producing the
/// output rendition.
#[async_trait]
pub trait Reknitter: Send + Sync {
    async fn reknit(
        &self,
        module: &Module,
        script: &ReplayScript,
    ) -> prebake_core::Result<Arc<ModuleAst>>;
}

/// Reknitter that copies the swiss rendition through unchanged. Useful
/// when no early values need substituting, and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughReknitter;

#[async_trait]
impl Reknitter for PassthroughReknitter {
    async fn reknit(
        &self,
        module: &Module,
        _script: &ReplayScript,
    ) -> prebake_core::Result<Arc<ModuleAst>> {
        let swiss = module.swiss_ast().ok_or_else(|| {
            prebake_core::Error::Operation(format!(
                "module '{}' has no swiss rendition to reknit",
                module.id
            ))
        })?;
        Ok(Arc::new(ModuleAst::new(
            AstFlavor::Output,
            swiss.source.clone(),
        )))
    }
}
