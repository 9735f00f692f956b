//! Overlapping-fetch behavior of the bus and gatherer.
//!
//! Two specifiers that differ only in percent-encoding, fetched from two
//! distinct bases, stay distinct as tentative ids but canonicalize to one
//! module: four new-module events, then four resolved events for the same
//! module value.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use prebake_core::{
    BuiltinModules, FetchContext, Fetcher, FsFetcher, Module, ModuleId, Reporter, Resolver, Stage,
    UrlProbe,
};
use prebake_graph::{Gatherer, ModuleListener, ModuleSet};

struct CountingListener {
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl ModuleListener for CountingListener {
    async fn on_module(
        &self,
        _set: &Arc<ModuleSet>,
        _module: Module,
    ) -> prebake_core::Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn overlapping_fetches_collapse_to_one_module() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("alert( 1 ).js"), "export {};").unwrap();

    let fs = Arc::new(FsFetcher::new());
    let resolver = Resolver::new(BuiltinModules::new(), fs.clone() as Arc<dyn UrlProbe>);
    let gatherer = Gatherer::new();
    let set = ModuleSet::new(
        resolver,
        vec![fs as Arc<dyn Fetcher>],
        Reporter::default(),
    );
    set.on_new_module(Arc::new(gatherer.clone()));

    let news = Arc::new(AtomicUsize::new(0));
    let resolveds = Arc::new(AtomicUsize::new(0));
    set.on_new_module(Arc::new(CountingListener {
        count: news.clone(),
    }));
    set.on_any_promoted_to(
        Stage::Resolved,
        Arc::new(CountingListener {
            count: resolveds.clone(),
        }),
    );

    let base1 = ModuleId::tentative(format!("file://{}/main1.js", dir.path().display()));
    let base2 = ModuleId::tentative(format!("file://{}/main2.js", dir.path().display()));
    let specs = ["./alert( 1 ).js", "./alert( 1%20).js"];

    let mut pending = Vec::new();
    for base in [&base1, &base2] {
        for spec in specs {
            pending.push(set.fetch(spec, FetchContext::new(base.clone())).await);
        }
    }

    // All four distinct (absolute key, importer) pairs announced a module
    // before any resolution fired.
    assert_eq!(news.load(Ordering::SeqCst), 4);
    assert_eq!(resolveds.load(Ordering::SeqCst), 0);

    let mut modules = Vec::new();
    for future in pending {
        modules.push(future.await);
    }

    assert_eq!(resolveds.load(Ordering::SeqCst), 4);
    assert_eq!(gatherer.fetches_issued(), 4);

    // One module value behind all four fetches.
    for module in &modules {
        assert_eq!(module.stage(), Stage::Resolved);
        assert_eq!(module.id.key(), modules[0].id.key());
    }
    let resolved_count = set
        .modules()
        .iter()
        .filter(|m| m.stage() == Stage::Resolved)
        .count();
    assert_eq!(resolved_count, 1);
}

#[tokio::test]
async fn canonicalize_failure_surfaces_an_error_module() {
    let fs = Arc::new(FsFetcher::new());
    let resolver = Resolver::new(BuiltinModules::new(), fs.clone() as Arc<dyn UrlProbe>);
    let set = ModuleSet::new(
        resolver,
        vec![fs as Arc<dyn Fetcher>],
        Reporter::default(),
    );
    set.on_new_module(Arc::new(Gatherer::new()));

    // No fetcher understands this scheme, so canonicalization cannot
    // happen and the tentative id becomes an error module.
    let base = ModuleId::tentative("file:///nowhere/main.js");
    let module = set
        .fetch("unknown-scheme:thing", FetchContext::new(base).at_line(7))
        .await
        .await;
    assert!(module.is_error());
    assert!(module
        .diagnostics()
        .iter()
        .any(|d| d.message.contains("no fetcher understood")));
    assert_eq!(module.diagnostics()[0].line, Some(7));
}
