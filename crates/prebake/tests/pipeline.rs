//! End-to-end pipeline tests: entry specifiers in, rewritten modules out.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use prebake::{
    Diagnostic, FetchOutcome, Fetched, Fetcher, FetcherChain, FsFetcher, MemorySink, Module,
    ModuleId, ModuleSet, PassthroughReknitter, Prebakery, Recorder, Severity, Stage,
};
use prebake_core::ModuleMetadata;

fn write(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

fn base_of(dir: &Path) -> ModuleId {
    ModuleId::tentative(format!("file://{}/main.js", dir.display()))
}

async fn wait_rewritten(set: &Arc<ModuleSet>, suffix: &str) -> Module {
    let module = set
        .modules()
        .into_iter()
        .find(|m| m.id.key().ends_with(suffix))
        .unwrap_or_else(|| panic!("module '{suffix}' not in set"));
    match module.stage() {
        Stage::Rewritten | Stage::Output | Stage::Error => module,
        _ => set.on_promoted_to(&module, Stage::Rewritten).await,
    }
}

#[tokio::test]
async fn single_entry_reaches_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.js", "export const answer = 42;");

    let prebakery = Prebakery::builder().build();
    let report = prebakery
        .prebake(&["./a.js".to_string()], &base_of(dir.path()))
        .await
        .unwrap();

    let entry = report.entry("./a.js").expect("entry stored");
    assert_eq!(entry.stage(), Stage::Rewritten);
    assert!(entry.rewritten_ast().is_some());
    assert!(entry.swiss_ast().is_some());
}

#[tokio::test]
async fn import_chain_rewrites_transitively() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.js", "import { b } from './b.js';\nexport const a = b;");
    write(dir.path(), "b.js", "import { c } from './c.js';\nexport const b = c;");
    write(dir.path(), "c.js", "export const c = 1;");

    let prebakery = Prebakery::builder().build();
    let report = prebakery
        .prebake(&["./a.js".to_string()], &base_of(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.entry("./a.js").unwrap().stage(), Stage::Rewritten);
    assert_eq!(
        wait_rewritten(&report.modules, "b.js").await.stage(),
        Stage::Rewritten
    );
    assert_eq!(
        wait_rewritten(&report.modules, "c.js").await.stage(),
        Stage::Rewritten
    );

    let stats = report.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.rewritten, 3);
    assert!(stats.is_clean());
}

#[tokio::test]
async fn missing_dependency_errors_the_importer() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "a.js",
        "import { x } from './missing.js';\nexport const y = x;",
    );

    let sink = Arc::new(MemorySink::new());
    let prebakery = Prebakery::builder().sink(sink.clone()).build();
    let report = prebakery
        .prebake(&["./a.js".to_string()], &base_of(dir.path()))
        .await
        .unwrap();

    let entry = report.entry("./a.js").unwrap();
    assert!(entry.is_error());
    assert!(entry
        .diagnostics()
        .iter()
        .any(|d| d.message.contains("dependency") && d.message.contains("missing.js")));
}

#[tokio::test]
async fn export_star_cycle_completes_with_recursion_flags() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.js", "export * from './b.js';\nexport const a = 1;");
    write(dir.path(), "b.js", "export * from './a.js';\nexport const b = 2;");

    let sink = Arc::new(MemorySink::new());
    let prebakery = Prebakery::builder().sink(sink.clone()).build();
    let report = prebakery
        .prebake(&["./a.js".to_string()], &base_of(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.entry("./a.js").unwrap().stage(), Stage::Rewritten);
    assert_eq!(
        wait_rewritten(&report.modules, "b.js").await.stage(),
        Stage::Rewritten
    );

    let jobs = prebakery.rewriter().jobs();
    assert_eq!(jobs.len(), 2);
    for job in &jobs {
        assert!(
            job.recursively_depends_on_self,
            "job {} should be flagged",
            job.id
        );
    }

    let infos = sink.captured_at(Severity::Info);
    assert!(infos
        .iter()
        .any(|d| d.message.contains("recursively depends on itself")));
}

#[tokio::test]
async fn parse_failure_surfaces_as_error_module() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bad.js", "import from from;");

    let prebakery = Prebakery::builder().build();
    let report = prebakery
        .prebake(&["./bad.js".to_string()], &base_of(dir.path()))
        .await
        .unwrap();

    let entry = report.entry("./bad.js").unwrap();
    assert!(entry.is_error());
    assert!(entry
        .diagnostics()
        .iter()
        .any(|d| d.message.contains("syntax error")));
}

#[tokio::test]
async fn finalize_promotes_rewritten_modules_to_output() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.js", "export const answer = 42;");

    let prebakery = Prebakery::builder().build();
    let report = prebakery
        .prebake(&["./a.js".to_string()], &base_of(dir.path()))
        .await
        .unwrap();
    assert_eq!(report.entry("./a.js").unwrap().stage(), Stage::Rewritten);

    let recorder = Recorder::new();
    let script = recorder.compact(&[]).unwrap();
    let finalized = prebakery
        .finalize(&PassthroughReknitter, &script)
        .await
        .unwrap();
    assert_eq!(finalized, 1);

    let entry = report.entry("./a.js").unwrap();
    assert_eq!(entry.stage(), Stage::Output);
    assert!(entry.output_ast().is_some());
}

/// A fetcher for a `builtin:` scheme, chained ahead of the filesystem.
struct BuiltinFetcher;

#[async_trait]
impl Fetcher for BuiltinFetcher {
    async fn canonicalize(
        &self,
        abs: &str,
        _base: &ModuleId,
        _next: FetcherChain<'_>,
    ) -> FetchOutcome<ModuleId> {
        if !abs.starts_with("builtin:") {
            return FetchOutcome::NotUnderstood;
        }
        match Url::parse(abs) {
            Ok(canon) => FetchOutcome::Understood(ModuleId::canonical(abs, canon)),
            Err(err) => FetchOutcome::Failed(Diagnostic::error(err.to_string())),
        }
    }

    async fn list(
        &self,
        _glob: &str,
        _base: &ModuleId,
        _next: FetcherChain<'_>,
    ) -> FetchOutcome<Vec<ModuleId>> {
        FetchOutcome::NotUnderstood
    }

    async fn fetch(
        &self,
        id: &ModuleId,
        _base: &ModuleId,
        _next: FetcherChain<'_>,
    ) -> FetchOutcome<Fetched> {
        if !id.abs().starts_with("builtin:") {
            return FetchOutcome::NotUnderstood;
        }
        FetchOutcome::Understood(Fetched {
            id: id.clone(),
            source: "export const sep = '/';".into(),
            metadata: ModuleMetadata::new(id.clone()),
        })
    }
}

#[tokio::test]
async fn builtin_specifiers_resolve_through_the_chain() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "a.js",
        "import { sep } from 'path';\nexport const s = sep;",
    );

    let prebakery = Prebakery::builder()
        .fetcher(Arc::new(BuiltinFetcher))
        .fetcher(Arc::new(FsFetcher::new()))
        .builtin("path", "builtin:path")
        .build();
    let report = prebakery
        .prebake(&["./a.js".to_string()], &base_of(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.entry("./a.js").unwrap().stage(), Stage::Rewritten);
    let builtin = wait_rewritten(&report.modules, "builtin:path").await;
    assert_eq!(builtin.stage(), Stage::Rewritten);
}
