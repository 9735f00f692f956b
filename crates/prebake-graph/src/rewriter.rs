//! The rewriter driver.
//!
//! Listens for resolved modules and drives parse → link → transform for
//! each one, tracked by a per-module [`Job`]:
//!
//! ```text
//! unstarted → started → satisfied → complete
//!      *    →  error (terminal)
//! ```
//!
//! A job is *started* once its source parsed and its specifier fetches are
//! in flight, *satisfied* once every outgoing fetch has published a module,
//! and *complete* once every dependency is transitively complete. A
//! dependency already on the completion walk's stack counts as complete for
//! that walk and records the cycle on the job it returns to, which is what
//! lets `export * from` cycles converge.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use prebake_analysis::{analyze_source, Finding, SourceSpan};
use prebake_core::{
    AstFlavor, Diagnostic, FetchContext, Module, ModuleAst, ModuleId, Reporter, Stage,
};

use crate::module_set::{ModuleListener, ModuleSet};

/// Lifecycle of a rewriter job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Unstarted,
    Started,
    Satisfied,
    Complete,
    Error,
}

/// A specifier whose fetch has not yet published a module. Identified by
/// the span of its literal occurrence, so duplicate specifiers splice out
/// one at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSpec {
    pub specifier: String,
    pub span: SourceSpan,
    pub line: u32,
}

/// Per-module bookkeeping for the rewriter.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: ModuleId,
    pub state: JobState,
    pub findings: Vec<Finding>,
    pub pending: Vec<PendingSpec>,
    pub deps: FxHashSet<String>,
    pub reverse_deps: FxHashSet<String>,
    pub recursively_depends_on_self: bool,
    /// Progress comments, in order.
    pub notes: Vec<String>,
}

impl Job {
    fn unstarted(id: ModuleId) -> Self {
        Self {
            id,
            state: JobState::Unstarted,
            findings: Vec::new(),
            pending: Vec::new(),
            deps: FxHashSet::default(),
            reverse_deps: FxHashSet::default(),
            recursively_depends_on_self: false,
            notes: Vec::new(),
        }
    }

    fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }
}

/// Rewritten and swiss renditions produced by the instrumenter.
pub struct InstrumentedAsts {
    pub rewritten: Arc<ModuleAst>,
    pub swiss: Arc<ModuleAst>,
}

/// External peer that replaces dynamic code generation in a module and
/// marks the holes a later stage fills with replayed values.
#[async_trait]
pub trait Instrumenter: Send + Sync {
    async fn instrument(&self, original: &ModuleAst) -> prebake_core::Result<InstrumentedAsts>;
}

/// Instrumenter that passes the source through untouched. Useful for
/// pipelines that only need linkage analysis, and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughInstrumenter;

#[async_trait]
impl Instrumenter for PassthroughInstrumenter {
    async fn instrument(&self, original: &ModuleAst) -> prebake_core::Result<InstrumentedAsts> {
        Ok(InstrumentedAsts {
            rewritten: Arc::new(ModuleAst::new(AstFlavor::Rewritten, original.source.clone())),
            swiss: Arc::new(ModuleAst::new(AstFlavor::Swiss, original.source.clone())),
        })
    }
}

struct RewriterInner {
    jobs: Mutex<FxHashMap<String, Job>>,
    instrumenter: Arc<dyn Instrumenter>,
    reporter: Reporter,
}

/// Promotion listener driving the rewrite of every resolved module.
#[derive(Clone)]
pub struct Rewriter {
    inner: Arc<RewriterInner>,
}

#[async_trait]
impl ModuleListener for Rewriter {
    async fn on_module(&self, set: &Arc<ModuleSet>, module: Module) -> prebake_core::Result<()> {
        if module.stage() != Stage::Resolved {
            return Ok(());
        }
        self.start_job(set, module).await;
        Ok(())
    }
}

impl Rewriter {
    pub fn new(instrumenter: Arc<dyn Instrumenter>, reporter: Reporter) -> Self {
        Self {
            inner: Arc::new(RewriterInner {
                jobs: Mutex::new(FxHashMap::default()),
                instrumenter,
                reporter,
            }),
        }
    }

    /// Snapshot of a job's bookkeeping, for inspection and tests.
    pub fn job(&self, key: &str) -> Option<Job> {
        self.inner.jobs.lock().get(key).cloned()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.inner.jobs.lock().values().cloned().collect()
    }

    /// unstarted → started: parse, extract linkage, request dependency
    /// fetches. Duplicate resolved promotions of the same canonical id are
    /// ignored.
    async fn start_job(&self, set: &Arc<ModuleSet>, module: Module) {
        let key = module.id.key().to_string();
        {
            let mut jobs = self.inner.jobs.lock();
            let job = jobs
                .entry(key.clone())
                .or_insert_with(|| Job::unstarted(module.id.clone()));
            // Claim under the lock: duplicate resolved promotions of the
            // same canonical id must not double-start the job.
            if job.state != JobState::Unstarted {
                return;
            }
            job.state = JobState::Started;
        }

        let Some(source) = module.source().cloned() else {
            return;
        };

        let findings = match analyze_source(&source) {
            Ok(findings) => findings,
            Err(err) => {
                {
                    let mut jobs = self.inner.jobs.lock();
                    if let Some(job) = jobs.get_mut(&key) {
                        job.note(format!("parse failed: {err}"));
                    }
                }
                self.fail_job(set, &key, Diagnostic::error(format!("{err}")))
                    .await;
                return;
            }
        };

        let pending: Vec<PendingSpec> = findings
            .iter()
            .filter_map(|finding| {
                Some(PendingSpec {
                    specifier: finding.specifier.clone()?,
                    span: finding.specifier_span?,
                    line: finding.line,
                })
            })
            .collect();

        let importer_base = module
            .metadata()
            .map(|m| m.base.clone())
            .unwrap_or_else(|| module.id.clone());

        let satisfied_immediately = {
            let mut jobs = self.inner.jobs.lock();
            let Some(job) = jobs.get_mut(&key) else {
                return;
            };
            job.findings = findings;
            job.pending = pending.clone();
            job.note(format!("started with {} specifier(s)", pending.len()));
            if pending.is_empty() {
                job.state = JobState::Satisfied;
                job.note("satisfied: no outgoing specifiers");
                true
            } else {
                false
            }
        };

        for spec in pending {
            let context =
                FetchContext::new(importer_base.clone()).at_line(spec.line);
            let future = set.fetch(&spec.specifier, context).await;
            let rewriter = self.clone();
            let set = Arc::clone(set);
            let job_key = key.clone();
            tokio::spawn(async move {
                let dep = future.await;
                rewriter.on_dep_published(&set, job_key, spec, dep).await;
            });
        }

        if satisfied_immediately {
            self.sweep(set, &key).await;
        }
    }

    /// started → satisfied: an outgoing fetch published a module. The
    /// matching pending specifier is spliced out by span identity; an error
    /// dependency sends the job (and its reverse-deps) to error.
    async fn on_dep_published(
        &self,
        set: &Arc<ModuleSet>,
        job_key: String,
        spec: PendingSpec,
        dep: Module,
    ) {
        let failed_dep = {
            let mut jobs = self.inner.jobs.lock();
            let Some(job) = jobs.get_mut(&job_key) else {
                return;
            };
            if matches!(job.state, JobState::Error | JobState::Complete) {
                return;
            }

            if let Some(position) = job.pending.iter().position(|p| p.span == spec.span) {
                job.pending.remove(position);
            }

            let dep_job_errored = jobs
                .get(dep.id.key())
                .is_some_and(|dep_job| dep_job.state == JobState::Error);

            if dep.is_error() || dep_job_errored {
                Some(dep.id.clone())
            } else {
                let dep_key = dep.id.key().to_string();
                if dep_key != job_key {
                    let job = jobs.get_mut(&job_key).expect("job present");
                    job.deps.insert(dep_key.clone());
                    jobs.entry(dep_key)
                        .or_insert_with(|| Job::unstarted(dep.id.clone()))
                        .reverse_deps
                        .insert(job_key.clone());
                } else {
                    // Direct self-import: the module depends on itself.
                    jobs.get_mut(&job_key)
                        .expect("job present")
                        .recursively_depends_on_self = true;
                }

                let job = jobs.get_mut(&job_key).expect("job present");
                if job.pending.is_empty() && job.state == JobState::Started {
                    job.state = JobState::Satisfied;
                    job.note("satisfied: all specifier fetches published");
                }
                None
            }
        };

        match failed_dep {
            Some(dep_id) => {
                self.fail_job(
                    set,
                    &job_key,
                    Diagnostic::error(format!("dependency '{dep_id}' failed")),
                )
                .await;
            }
            None => self.sweep(set, &job_key).await,
        }
    }

    /// Transition a job to error and propagate to every reverse-dep job,
    /// each carrying a secondary diagnostic naming the failing dependency.
    pub async fn fail_job(&self, set: &Arc<ModuleSet>, key: &str, diagnostic: Diagnostic) {
        let affected: Vec<(String, ModuleId, Diagnostic)> = {
            let mut jobs = self.inner.jobs.lock();
            let mut queue = vec![(key.to_string(), diagnostic)];
            let mut visited = FxHashSet::default();
            let mut affected = Vec::new();
            while let Some((job_key, diag)) = queue.pop() {
                if !visited.insert(job_key.clone()) {
                    continue;
                }
                let Some(job) = jobs.get_mut(&job_key) else {
                    continue;
                };
                if matches!(job.state, JobState::Error | JobState::Complete) {
                    continue;
                }
                job.state = JobState::Error;
                job.note("transitioned to error");
                affected.push((job_key.clone(), job.id.clone(), diag));
                let failed_id = job.id.clone();
                for reverse in job.reverse_deps.clone() {
                    queue.push((
                        reverse,
                        Diagnostic::error(format!("dependency '{failed_id}' failed")),
                    ));
                }
            }
            affected
        };

        for (_, id, diagnostic) in affected {
            let diagnostic = diagnostic.with_module(id.clone());
            match set.get(&id) {
                Some(module) => {
                    set.put(module.into_error(diagnostic)).await;
                }
                None => {
                    set.put(Module::error_at(id, diagnostic)).await;
                }
            }
        }
    }

    /// satisfied → complete. A state transition of `origin` triggers a
    /// re-check bounded to its transitive reverse-dep closure: only jobs
    /// that could have been waiting on `origin` are candidates. Each
    /// candidate gets a fresh cycle-tolerant walk; recursion flags are
    /// marked and all completable jobs transition together before
    /// instrumenting and publishing.
    async fn sweep(&self, set: &Arc<ModuleSet>, origin: &str) {
        let (completable, newly_flagged) = {
            let mut jobs = self.inner.jobs.lock();

            let mut candidates = Vec::new();
            let mut seen = FxHashSet::default();
            let mut queue = vec![origin.to_string()];
            while let Some(key) = queue.pop() {
                if !seen.insert(key.clone()) {
                    continue;
                }
                if let Some(job) = jobs.get(&key) {
                    if job.state == JobState::Satisfied {
                        candidates.push(key.clone());
                    }
                    queue.extend(job.reverse_deps.iter().cloned());
                }
            }

            let mut flagged = FxHashSet::default();
            let mut completable = Vec::new();
            for key in &candidates {
                let mut stack = Vec::new();
                if can_complete(&jobs, key, &mut stack, &mut flagged) {
                    completable.push(key.clone());
                }
            }

            let mut newly_flagged = Vec::new();
            for key in &flagged {
                if let Some(job) = jobs.get_mut(key) {
                    if !job.recursively_depends_on_self {
                        job.recursively_depends_on_self = true;
                        newly_flagged.push(job.id.clone());
                    }
                }
            }

            let mut transitioned = Vec::new();
            for key in completable {
                let Some(job) = jobs.get_mut(&key) else {
                    continue;
                };
                if job.state == JobState::Satisfied {
                    job.state = JobState::Complete;
                    job.note("complete: dependency closure complete");
                    transitioned.push((key, job.id.clone()));
                }
            }
            (transitioned, newly_flagged)
        };

        for id in newly_flagged {
            self.inner.reporter.publish_lossy(
                &Diagnostic::info("module recursively depends on itself").with_module(id),
            );
        }

        for (key, id) in completable {
            self.publish_rewritten(set, &key, &id).await;
        }
    }

    /// Run the instrumenter over a completed job's module and publish the
    /// rewritten module.
    async fn publish_rewritten(&self, set: &Arc<ModuleSet>, key: &str, id: &ModuleId) {
        let Some(module) = set.get(id) else {
            return;
        };
        if module.stage() != Stage::Resolved {
            tracing::debug!(module = %id, stage = ?module.stage(), "skipping rewrite publish");
            return;
        }
        let Some(source) = module.source().cloned() else {
            return;
        };

        let original = Arc::new(ModuleAst::new(AstFlavor::Original, source));
        let instrumented = match self.inner.instrumenter.instrument(&original).await {
            Ok(instrumented) => instrumented,
            Err(err) => {
                self.fail_job(
                    set,
                    key,
                    Diagnostic::error(format!("instrumentation failed: {err}")),
                )
                .await;
                return;
            }
        };

        match module.into_rewritten(original, instrumented.rewritten, instrumented.swiss) {
            Ok(rewritten) => {
                set.put(rewritten).await;
            }
            Err(err) => {
                tracing::debug!(module = %id, "rewrite promotion skipped: {err}");
            }
        }
    }
}

/// Cycle-tolerant completion walk. A dependency already on the walk's
/// stack is treated as complete for this walk and collected in `flagged`.
fn can_complete(
    jobs: &FxHashMap<String, Job>,
    key: &str,
    stack: &mut Vec<String>,
    flagged: &mut FxHashSet<String>,
) -> bool {
    let Some(job) = jobs.get(key) else {
        return false;
    };
    match job.state {
        JobState::Complete => return true,
        JobState::Satisfied => {}
        _ => return false,
    }
    stack.push(key.to_string());
    let mut completable = true;
    for dep in &job.deps {
        if stack.iter().any(|entry| entry == dep) {
            flagged.insert(dep.clone());
            continue;
        }
        if !can_complete(jobs, dep, stack, flagged) {
            completable = false;
            break;
        }
    }
    stack.pop();
    completable
}
