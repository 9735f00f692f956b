//! The prebakery façade.
//!
//! Wires the module set, gatherer, and rewriter together and exposes the
//! one call that matters: feed in entry specifiers, get back the populated
//! module set with every reachable module rewritten (or carrying the
//! errors that stopped it).

use std::sync::Arc;

use rustc_hash::FxHashMap;

use prebake_core::{
    BuiltinModules, DiagnosticSink, FetchContext, Fetcher, FsFetcher, Module, ModuleId, Reporter,
    Resolver, Stage, TracingSink, UrlProbe,
};
use prebake_graph::{Gatherer, Instrumenter, ModuleSet, PassthroughInstrumenter, Rewriter};
use prebake_record::ReplayScript;

use crate::peers::Reknitter;

/// Builder for a [`Prebakery`]. Defaults to the filesystem fetcher, the
/// tracing diagnostic sink, and the passthrough instrumenter.
pub struct PrebakeryBuilder {
    fetchers: Vec<Arc<dyn Fetcher>>,
    sinks: Vec<Arc<dyn DiagnosticSink>>,
    builtins: BuiltinModules,
    probe: Option<Arc<dyn UrlProbe>>,
    instrumenter: Arc<dyn Instrumenter>,
}

impl PrebakeryBuilder {
    /// Append a fetcher to the chain. Fetchers answer in registration
    /// order.
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    /// Append a diagnostic sink.
    pub fn sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Register a platform built-in module.
    pub fn builtin(mut self, name: impl Into<String>, abs_url: impl Into<String>) -> Self {
        self.builtins = self.builtins.with(name, abs_url);
        self
    }

    /// Override the existence probe used for bare-specifier resolution.
    pub fn probe(mut self, probe: Arc<dyn UrlProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Override the instrumenter peer.
    pub fn instrumenter(mut self, instrumenter: Arc<dyn Instrumenter>) -> Self {
        self.instrumenter = instrumenter;
        self
    }

    pub fn build(self) -> Prebakery {
        let fetchers = if self.fetchers.is_empty() {
            vec![Arc::new(FsFetcher::new()) as Arc<dyn Fetcher>]
        } else {
            self.fetchers
        };
        let sinks = if self.sinks.is_empty() {
            vec![Arc::new(TracingSink) as Arc<dyn DiagnosticSink>]
        } else {
            self.sinks
        };
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(FsFetcher::new()) as Arc<dyn UrlProbe>);

        let reporter = Reporter::new(sinks);
        let resolver = Resolver::new(self.builtins, probe);
        let set = ModuleSet::new(resolver, fetchers, reporter.clone());

        let gatherer = Gatherer::new();
        set.on_new_module(Arc::new(gatherer.clone()));

        let rewriter = Rewriter::new(self.instrumenter, reporter.clone());
        set.on_any_promoted_to(Stage::Resolved, Arc::new(rewriter.clone()));

        Prebakery {
            set,
            gatherer,
            rewriter,
            reporter,
        }
    }
}

/// Per-stage counts over the module set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrebakeStats {
    pub total: usize,
    pub unresolved: usize,
    pub resolved: usize,
    pub rewritten: usize,
    pub output: usize,
    pub errors: usize,
}

impl PrebakeStats {
    fn compute(set: &ModuleSet) -> Self {
        let mut stats = Self::default();
        for module in set.modules() {
            stats.total += 1;
            match module.stage() {
                Stage::Unresolved => stats.unresolved += 1,
                Stage::Resolved => stats.resolved += 1,
                Stage::Rewritten => stats.rewritten += 1,
                Stage::Output => stats.output += 1,
                Stage::Error => stats.errors += 1,
            }
        }
        stats
    }

    /// True when every module made it through the rewrite.
    pub fn is_clean(&self) -> bool {
        self.errors == 0 && self.unresolved == 0 && self.resolved == 0
    }
}

/// What a prebake run produced: the populated module set and the mapping
/// from entry specifier to module id.
pub struct PrebakeReport {
    pub modules: Arc<ModuleSet>,
    pub by_specifier: FxHashMap<String, ModuleId>,
}

impl PrebakeReport {
    /// The module an entry specifier resolved to.
    pub fn entry(&self, specifier: &str) -> Option<Module> {
        let id = self.by_specifier.get(specifier)?;
        self.modules.get(id)
    }

    /// Per-stage counts at the time of the call.
    pub fn stats(&self) -> PrebakeStats {
        PrebakeStats::compute(&self.modules)
    }
}

/// The assembled pipeline.
pub struct Prebakery {
    set: Arc<ModuleSet>,
    gatherer: Gatherer,
    rewriter: Rewriter,
    reporter: Reporter,
}

impl Prebakery {
    pub fn builder() -> PrebakeryBuilder {
        PrebakeryBuilder {
            fetchers: Vec::new(),
            sinks: Vec::new(),
            builtins: BuiltinModules::new(),
            probe: None,
            instrumenter: Arc::new(PassthroughInstrumenter),
        }
    }

    pub fn module_set(&self) -> &Arc<ModuleSet> {
        &self.set
    }

    pub fn gatherer(&self) -> &Gatherer {
        &self.gatherer
    }

    pub fn rewriter(&self) -> &Rewriter {
        &self.rewriter
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Fetch every entry specifier against `base`, then await promotion to
    /// `Rewritten` for the entries that did not immediately error.
    pub async fn prebake(
        &self,
        entries: &[String],
        base: &ModuleId,
    ) -> prebake_core::Result<PrebakeReport> {
        let mut pending = Vec::with_capacity(entries.len());
        for specifier in entries {
            let future = self
                .set
                .fetch(specifier, FetchContext::new(base.clone()))
                .await;
            pending.push((specifier.clone(), future));
        }

        let mut by_specifier = FxHashMap::default();
        let mut rewritten_waits = Vec::new();
        for (specifier, future) in pending {
            let module = future.await;
            by_specifier.insert(specifier, module.id.clone());
            if !module.is_error() {
                rewritten_waits.push(self.set.on_promoted_to(&module, Stage::Rewritten));
            }
        }
        for wait in rewritten_waits {
            let _ = wait.await;
        }

        Ok(PrebakeReport {
            modules: Arc::clone(&self.set),
            by_specifier,
        })
    }

    /// Run the reknitter over every rewritten module, promoting each to
    /// `Output`. Returns how many modules were finalized.
    pub async fn finalize(
        &self,
        reknitter: &dyn Reknitter,
        script: &ReplayScript,
    ) -> prebake_core::Result<usize> {
        let mut finalized = 0;
        for module in self.set.modules() {
            if module.stage() != Stage::Rewritten {
                continue;
            }
            let output = reknitter.reknit(&module, script).await?;
            if let Ok(out_module) = module.into_output(output) {
                self.set.put(out_module).await;
                finalized += 1;
            }
        }
        Ok(finalized)
    }
}
