//! The module set: the pipeline's central message bus.
//!
//! Holds `key → module` where a canonically identified module is reachable
//! by both its absolute and its canonical key. All mutation goes through
//! [`ModuleSet::put`], which reconciles the incoming module against what is
//! already stored (errors are preserved, later stages win) and then fans
//! out new-module and promotion notifications.
//!
//! Stage progression per id is monotone: once stored, a module's stage
//! never decreases, and an error module is never displaced.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::oneshot;

use prebake_core::{
    Diagnostic, FetchContext, Fetcher, FetcherChain, Module, ModuleId, Reporter, Resolver, Stage,
};

/// Scheme used for ids of specifiers that could not be resolved at all.
const UNRESOLVABLE_SCHEME: &str = "failed:";

/// Callback interface for new-module and promotion notifications.
///
/// Failures are caught by the bus, reported to diagnostics, and do not
/// abort dispatch to other listeners.
#[async_trait]
pub trait ModuleListener: Send + Sync {
    async fn on_module(&self, set: &Arc<ModuleSet>, module: Module) -> prebake_core::Result<()>;
}

struct Waiter {
    stage: Stage,
    tx: oneshot::Sender<Module>,
}

#[derive(Default)]
struct Inner {
    modules: FxHashMap<String, Module>,
    waiters: FxHashMap<String, Vec<Waiter>>,
    /// Importer keys that already fetched a given absolute key.
    fetched_importers: FxHashMap<String, FxHashSet<String>>,
}

#[derive(Default)]
struct Listeners {
    new_module: Vec<Arc<dyn ModuleListener>>,
    promoted: Vec<(Stage, Arc<dyn ModuleListener>)>,
}

/// Outcome of reconciling an incoming module under the put rules.
struct Reconciled {
    stored: Module,
    /// The incoming module became the stored one.
    incoming_won: bool,
    /// Waiters to resolve, already detached from the table.
    resolved_waiters: Vec<(oneshot::Sender<Module>, Module)>,
}

/// The central store and notification bus for module lifecycle records.
pub struct ModuleSet {
    inner: Mutex<Inner>,
    listeners: RwLock<Listeners>,
    resolver: Resolver,
    fetchers: Vec<Arc<dyn Fetcher>>,
    reporter: Reporter,
}

impl ModuleSet {
    pub fn new(
        resolver: Resolver,
        fetchers: Vec<Arc<dyn Fetcher>>,
        reporter: Reporter,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            listeners: RwLock::new(Listeners::default()),
            resolver,
            fetchers,
            reporter,
        })
    }

    /// The fetcher chain this set gathers through.
    pub fn fetcher_chain(&self) -> FetcherChain<'_> {
        FetcherChain::new(&self.fetchers)
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Register interest in every fresh unresolved module.
    pub fn on_new_module(&self, listener: Arc<dyn ModuleListener>) {
        self.listeners.write().new_module.push(listener);
    }

    /// Register interest in any module arriving at `stage`.
    pub fn on_any_promoted_to(&self, stage: Stage, listener: Arc<dyn ModuleListener>) {
        self.listeners.write().promoted.push((stage, listener));
    }

    /// Lookup by either absolute or canonical key.
    pub fn get(&self, id: &ModuleId) -> Option<Module> {
        let inner = self.inner.lock();
        id.canon_key()
            .and_then(|key| inner.modules.get(key))
            .or_else(|| inner.modules.get(id.abs_key()))
            .cloned()
    }

    /// Lookup by raw key string.
    pub fn get_by_key(&self, key: &str) -> Option<Module> {
        self.inner.lock().modules.get(key).cloned()
    }

    /// Every distinct module currently stored, deduplicated by key identity.
    pub fn modules(&self) -> Vec<Module> {
        let inner = self.inner.lock();
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for module in inner.modules.values() {
            if seen.insert(module.id.key().to_string()) {
                out.push(module.clone());
            }
        }
        out
    }

    /// Reconcile a new or updated module into the set and fan out
    /// notifications. Returns the module that now occupies the id, which
    /// may be the incoming one, an existing error module with merged
    /// diagnostics, or an existing later-stage module.
    pub async fn put(self: &Arc<Self>, module: Module) -> Module {
        let reconciled = {
            let mut inner = self.inner.lock();
            reconcile(&mut inner, module)
        };

        let stored = reconciled.stored.clone();

        if reconciled.incoming_won {
            if stored.stage() == Stage::Unresolved {
                self.dispatch_new_module(&stored).await;
            } else {
                self.dispatch_promoted(&stored).await;
            }
        }

        // Waiters observe completion only after listeners had their turn,
        // so a waiter never sees a module the pipeline has not reacted to.
        for (tx, module) in reconciled.resolved_waiters {
            let _ = tx.send(module);
        }

        stored
    }

    /// One-shot future completing when `module` reaches `stage`, or with an
    /// error module if it fails. Waiting for a stage the module is already
    /// past fails immediately.
    pub fn on_promoted_to(&self, module: &Module, stage: Stage) -> BoxFuture<'static, Module> {
        let current = self.get(&module.id).unwrap_or_else(|| module.clone());
        let current_stage = current.stage();

        if current_stage == Stage::Error || current_stage == stage {
            return futures::future::ready(current).boxed();
        }
        if current_stage > stage {
            let failed = current.clone().into_error(
                Diagnostic::error(format!(
                    "waited for stage {stage:?} but module is already at {current_stage:?}"
                ))
                .with_module(current.id.clone()),
            );
            return futures::future::ready(failed).boxed();
        }

        let key = current.id.key().to_string();
        let id = current.id.clone();
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .waiters
            .entry(key)
            .or_default()
            .push(Waiter { stage, tx });

        async move {
            rx.await.unwrap_or_else(|_| {
                Module::error_at(
                    id.clone(),
                    Diagnostic::error("module set dropped before promotion").with_module(id),
                )
            })
        }
        .boxed()
    }

    /// Resolve `specifier` against the fetch context's importer base, enter
    /// a fresh unresolved module (unless the same importer already fetched
    /// the same absolute key), and return a future of the module's
    /// resolution.
    pub async fn fetch(
        self: &Arc<Self>,
        specifier: &str,
        context: FetchContext,
    ) -> BoxFuture<'static, Module> {
        let abs = match self.resolver.resolve(specifier, &context.importer_base) {
            Ok(abs) => abs,
            Err(err) => {
                let id = ModuleId::tentative(format!("{UNRESOLVABLE_SCHEME}{specifier}"));
                let diagnostic = Diagnostic::error(err.to_string())
                    .with_module(context.importer_base.clone());
                let diagnostic = match context.importer_line {
                    Some(line) => diagnostic.with_line(line),
                    None => diagnostic,
                };
                let module = self.put(Module::error_at(id, diagnostic)).await;
                return futures::future::ready(module).boxed();
            }
        };

        let id = ModuleId::tentative(abs);
        let importer_key = context.importer_base.key().to_string();

        let already_fetched = {
            let mut inner = self.inner.lock();
            !inner
                .fetched_importers
                .entry(id.abs_key().to_string())
                .or_default()
                .insert(importer_key)
        };

        // A fresh unresolved module per (absolute key, importer): distinct
        // importers each announce the module once.
        let target = if already_fetched {
            match self.get(&id) {
                Some(existing) => existing,
                None => self.put(Module::unresolved(id.clone(), context)).await,
            }
        } else {
            self.put(Module::unresolved(id.clone(), context)).await
        };

        self.on_promoted_to(&target, Stage::Resolved)
    }

    async fn dispatch_new_module(self: &Arc<Self>, module: &Module) {
        let listeners: Vec<_> = self.listeners.read().new_module.clone();
        for listener in listeners {
            if let Err(err) = listener.on_module(self, module.clone()).await {
                self.reporter.publish_lossy(
                    &Diagnostic::error(format!("new-module callback failed: {err}"))
                        .with_module(module.id.clone()),
                );
            }
        }
    }

    async fn dispatch_promoted(self: &Arc<Self>, module: &Module) {
        let stage = module.stage();
        let listeners: Vec<_> = self
            .listeners
            .read()
            .promoted
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            if let Err(err) = listener.on_module(self, module.clone()).await {
                self.reporter.publish_lossy(
                    &Diagnostic::error(format!("promotion callback failed: {err}"))
                        .with_module(module.id.clone()),
                );
            }
        }
    }
}

impl std::fmt::Debug for ModuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSet")
            .field("modules", &self.inner.lock().modules.len())
            .finish()
    }
}

/// Apply the put rules under the lock. In order:
///
/// 1. an existing error module at either slot absorbs the incoming one;
/// 2. an incoming error module takes both slots and short-circuits all
///    pending waiters;
/// 3. an existing later-stage module wins and the incoming is a no-op;
/// 4. otherwise the incoming module takes both slots.
fn reconcile(inner: &mut Inner, incoming: Module) -> Reconciled {
    let keys = slot_keys(&incoming);

    // Rule 1: merge into an existing error module.
    for key in &keys {
        if let Some(existing) = inner.modules.get(*key) {
            if existing.is_error() {
                let mut merged = existing.clone();
                merged.merge_errors(&incoming);
                let merged_keys = slot_keys(&merged)
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                store(inner, &keys, &merged);
                store_owned(inner, &merged_keys, &merged);
                let resolved_waiters = take_waiters(inner, &keys)
                    .into_iter()
                    .map(|w| (w.tx, merged.clone()))
                    .collect();
                return Reconciled {
                    stored: merged,
                    incoming_won: false,
                    resolved_waiters,
                };
            }
        }
    }

    // Rule 2: an incoming error takes both slots and fails every waiter.
    if incoming.is_error() {
        store(inner, &keys, &incoming);
        let resolved_waiters = take_waiters(inner, &keys)
            .into_iter()
            .map(|w| (w.tx, incoming.clone()))
            .collect();
        return Reconciled {
            stored: incoming,
            incoming_won: true,
            resolved_waiters,
        };
    }

    // Rule 3: a later-stage occupant wins. The incoming module's keys
    // still alias into the existing entry, and any waiters registered
    // under them resolve against the module that is actually stored.
    for key in &keys {
        if let Some(existing) = inner.modules.get(*key) {
            if existing.stage() > incoming.stage() {
                let existing = existing.clone();
                store(inner, &keys, &existing);
                let mut resolved_waiters = Vec::new();
                if existing.id.is_canonical() {
                    let stage = existing.stage();
                    for waiter in take_waiters(inner, &keys) {
                        if waiter.stage <= stage {
                            resolved_waiters.push((waiter.tx, existing.clone()));
                        } else {
                            inner
                                .waiters
                                .entry(existing.id.key().to_string())
                                .or_default()
                                .push(waiter);
                        }
                    }
                }
                return Reconciled {
                    stored: existing,
                    incoming_won: false,
                    resolved_waiters,
                };
            }
        }
    }

    // Rule 4: store the incoming module at both slots.
    store(inner, &keys, &incoming);

    // Waiter dispatch happens once the module is canonically identified:
    // waiters for this stage or earlier resolve now, later ones carry over.
    let mut resolved_waiters = Vec::new();
    if incoming.id.is_canonical() {
        let stage = incoming.stage();
        for waiter in take_waiters(inner, &keys) {
            if waiter.stage <= stage {
                resolved_waiters.push((waiter.tx, incoming.clone()));
            } else {
                inner
                    .waiters
                    .entry(incoming.id.key().to_string())
                    .or_default()
                    .push(waiter);
            }
        }
    }

    Reconciled {
        stored: incoming,
        incoming_won: true,
        resolved_waiters,
    }
}

fn slot_keys(module: &Module) -> Vec<&str> {
    let mut keys = vec![module.id.abs_key()];
    if let Some(canon) = module.id.canon_key() {
        if canon != module.id.abs_key() {
            keys.push(canon);
        }
    }
    keys
}

fn store(inner: &mut Inner, keys: &[&str], module: &Module) {
    for key in keys {
        inner.modules.insert((*key).to_string(), module.clone());
    }
}

fn store_owned(inner: &mut Inner, keys: &[String], module: &Module) {
    for key in keys {
        inner.modules.insert(key.clone(), module.clone());
    }
}

fn take_waiters(inner: &mut Inner, keys: &[&str]) -> Vec<Waiter> {
    let mut waiters = Vec::new();
    for key in keys {
        if let Some(mut list) = inner.waiters.remove(*key) {
            waiters.append(&mut list);
        }
    }
    waiters
}
