//! The gatherer: turns unresolved modules into resolved (or error) ones.
//!
//! Listens for new-module events. Each unresolved module is canonicalized
//! through the fetcher chain, deduplicated against in-flight work by the
//! `(importer-abs, importer-canon, target-abs, target-canon)` quadruple,
//! and then fetched. The gatherer never re-fetches: a quadruple stays in
//! the seen set forever, and an error module would absorb a late success
//! anyway.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use prebake_core::{Diagnostic, FetchOutcome, Module, ModuleId, Stage};

use crate::module_set::{ModuleListener, ModuleSet};

type FetchKey = (String, Option<String>, String, Option<String>);

/// New-module listener driving canonicalize + fetch.
#[derive(Clone, Default)]
pub struct Gatherer {
    seen: Arc<Mutex<FxHashSet<FetchKey>>>,
}

impl Gatherer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct fetch quadruples issued so far.
    pub fn fetches_issued(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl ModuleListener for Gatherer {
    async fn on_module(&self, set: &Arc<ModuleSet>, module: Module) -> prebake_core::Result<()> {
        if module.stage() != Stage::Unresolved {
            return Ok(());
        }
        let set = Arc::clone(set);
        let seen = Arc::clone(&self.seen);
        // The new-module notification must complete before resolution can
        // fire, so the actual work runs as its own task.
        tokio::spawn(async move {
            gather(set, seen, module).await;
        });
        Ok(())
    }
}

async fn gather(set: Arc<ModuleSet>, seen: Arc<Mutex<FxHashSet<FetchKey>>>, module: Module) {
    let Some(context) = module.fetch_context().cloned() else {
        return;
    };
    let base = context.importer_base.clone();
    let chain = set.fetcher_chain();

    let canon_id = match chain.canonicalize(module.id.abs(), &base).await {
        FetchOutcome::Understood(id) => id,
        FetchOutcome::NotUnderstood => {
            publish_error(
                &set,
                module.id.clone(),
                &context,
                format!("no fetcher understood '{}'", module.id.abs()),
            )
            .await;
            return;
        }
        FetchOutcome::Failed(diagnostic) => {
            publish_failure(&set, module.id.clone(), &context, diagnostic).await;
            return;
        }
    };

    let key: FetchKey = (
        base.abs_key().to_string(),
        base.canon_key().map(str::to_string),
        canon_id.abs_key().to_string(),
        canon_id.canon_key().map(str::to_string),
    );
    if !seen.lock().insert(key) {
        // Someone is already fetching this target; canonicalization alone
        // aliases this module into the existing entry.
        set.put(module.with_id(canon_id)).await;
        return;
    }

    tracing::debug!(module = %canon_id, importer = %base, "fetching module");
    match chain.fetch(&canon_id, &base).await {
        FetchOutcome::Understood(fetched) => {
            set.put(Module::resolved(canon_id, fetched.source, fetched.metadata))
                .await;
        }
        FetchOutcome::NotUnderstood => {
            publish_error(
                &set,
                canon_id.clone(),
                &context,
                format!("no fetcher could fetch '{canon_id}'"),
            )
            .await;
        }
        FetchOutcome::Failed(diagnostic) => {
            publish_failure(&set, canon_id, &context, diagnostic).await;
        }
    }
}

async fn publish_error(
    set: &Arc<ModuleSet>,
    id: ModuleId,
    context: &prebake_core::FetchContext,
    message: String,
) {
    let diagnostic = Diagnostic::error(format!(
        "{message} (imported from '{}')",
        context.importer_base
    ))
    .with_module(id.clone());
    let diagnostic = match context.importer_line {
        Some(line) => diagnostic.with_line(line),
        None => diagnostic,
    };
    set.put(Module::error_at(id, diagnostic)).await;
}

async fn publish_failure(
    set: &Arc<ModuleSet>,
    id: ModuleId,
    context: &prebake_core::FetchContext,
    diagnostic: Diagnostic,
) {
    let mut diagnostic = diagnostic;
    if diagnostic.module.is_none() {
        diagnostic.module = Some(id.clone());
    }
    if diagnostic.line.is_none() {
        diagnostic.line = context.importer_line;
    }
    let secondary = Diagnostic::info(format!("imported from '{}'", context.importer_base))
        .with_module(id.clone());
    let module = Module::error_at(id, diagnostic).into_error(secondary);
    set.put(module).await;
}
