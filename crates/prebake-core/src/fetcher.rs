//! The fetcher chain.
//!
//! Fetchers are polymorphic collaborators exposing three operations:
//! `canonicalize`, `list`, and `fetch`. Each fetcher in a chain may answer,
//! fail, or return [`FetchOutcome::NotUnderstood`] to pass the question on;
//! a fetcher may also delegate to the rest of the chain explicitly through
//! the `next` argument and reinterpret the result.

use std::sync::Arc;

use async_trait::async_trait;

use crate::diagnostics::Diagnostic;
use crate::module::ModuleMetadata;
use crate::module_id::ModuleId;

/// Three-way outcome of a fetcher operation.
///
/// `NotUnderstood` advances the chain; any other outcome terminates it.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Understood(T),
    NotUnderstood,
    Failed(Diagnostic),
}

impl<T> FetchOutcome<T> {
    pub fn is_not_understood(&self) -> bool {
        matches!(self, FetchOutcome::NotUnderstood)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchOutcome<U> {
        match self {
            FetchOutcome::Understood(value) => FetchOutcome::Understood(f(value)),
            FetchOutcome::NotUnderstood => FetchOutcome::NotUnderstood,
            FetchOutcome::Failed(diag) => FetchOutcome::Failed(diag),
        }
    }

    /// The understood value, if any.
    pub fn understood(self) -> Option<T> {
        match self {
            FetchOutcome::Understood(value) => Some(value),
            _ => None,
        }
    }
}

/// A successfully fetched module body.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub id: ModuleId,
    pub source: Arc<str>,
    pub metadata: ModuleMetadata,
}

/// A provider of module content.
///
/// `abs` URLs arrive in raw (pre-canonical) form; implementations decide
/// whether they understand the scheme at all before doing any work.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Canonicalize a raw absolute URL into a canonical id.
    async fn canonicalize(
        &self,
        abs: &str,
        base: &ModuleId,
        next: FetcherChain<'_>,
    ) -> FetchOutcome<ModuleId>;

    /// Enumerate canonical ids matching a glob.
    async fn list(
        &self,
        glob: &str,
        base: &ModuleId,
        next: FetcherChain<'_>,
    ) -> FetchOutcome<Vec<ModuleId>>;

    /// Fetch the content of a canonical id.
    async fn fetch(
        &self,
        id: &ModuleId,
        base: &ModuleId,
        next: FetcherChain<'_>,
    ) -> FetchOutcome<Fetched>;
}

/// The rest of a fetcher chain, handed to each fetcher as `next`.
///
/// Calling an operation on the chain tries each remaining fetcher in order,
/// advancing past the ones that answer `NotUnderstood`.
#[derive(Clone, Copy)]
pub struct FetcherChain<'a> {
    rest: &'a [Arc<dyn Fetcher>],
}

impl<'a> FetcherChain<'a> {
    pub fn new(fetchers: &'a [Arc<dyn Fetcher>]) -> Self {
        Self { rest: fetchers }
    }

    /// An exhausted chain: every operation answers `NotUnderstood`.
    pub fn empty() -> Self {
        Self { rest: &[] }
    }

    pub async fn canonicalize(&self, abs: &str, base: &ModuleId) -> FetchOutcome<ModuleId> {
        for (index, fetcher) in self.rest.iter().enumerate() {
            let next = FetcherChain {
                rest: &self.rest[index + 1..],
            };
            match fetcher.canonicalize(abs, base, next).await {
                FetchOutcome::NotUnderstood => continue,
                outcome => return outcome,
            }
        }
        FetchOutcome::NotUnderstood
    }

    pub async fn list(&self, glob: &str, base: &ModuleId) -> FetchOutcome<Vec<ModuleId>> {
        for (index, fetcher) in self.rest.iter().enumerate() {
            let next = FetcherChain {
                rest: &self.rest[index + 1..],
            };
            match fetcher.list(glob, base, next).await {
                FetchOutcome::NotUnderstood => continue,
                outcome => return outcome,
            }
        }
        FetchOutcome::NotUnderstood
    }

    pub async fn fetch(&self, id: &ModuleId, base: &ModuleId) -> FetchOutcome<Fetched> {
        for (index, fetcher) in self.rest.iter().enumerate() {
            let next = FetcherChain {
                rest: &self.rest[index + 1..],
            };
            match fetcher.fetch(id, base, next).await {
                FetchOutcome::NotUnderstood => continue,
                outcome => return outcome,
            }
        }
        FetchOutcome::NotUnderstood
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Understands only one scheme prefix; everything else is passed on.
    struct SchemeFetcher {
        scheme: &'static str,
        body: &'static str,
    }

    #[async_trait]
    impl Fetcher for SchemeFetcher {
        async fn canonicalize(
            &self,
            abs: &str,
            _base: &ModuleId,
            _next: FetcherChain<'_>,
        ) -> FetchOutcome<ModuleId> {
            if !abs.starts_with(self.scheme) {
                return FetchOutcome::NotUnderstood;
            }
            let canon = url::Url::parse(abs).expect("test url");
            FetchOutcome::Understood(ModuleId::canonical(abs, canon))
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
            if !id.abs().starts_with(self.scheme) {
                return FetchOutcome::NotUnderstood;
            }
            FetchOutcome::Understood(Fetched {
                id: id.clone(),
                source: self.body.into(),
                metadata: ModuleMetadata::new(id.clone()),
            })
        }
    }

    /// Delegates to `next` and reinterprets the result.
    struct RelabelFetcher;

    #[async_trait]
    impl Fetcher for RelabelFetcher {
        async fn canonicalize(
            &self,
            abs: &str,
            base: &ModuleId,
            next: FetcherChain<'_>,
        ) -> FetchOutcome<ModuleId> {
            next.canonicalize(abs, base).await
        }

        async fn list(
            &self,
            glob: &str,
            base: &ModuleId,
            next: FetcherChain<'_>,
        ) -> FetchOutcome<Vec<ModuleId>> {
            next.list(glob, base).await
        }

        async fn fetch(
            &self,
            id: &ModuleId,
            base: &ModuleId,
            next: FetcherChain<'_>,
        ) -> FetchOutcome<Fetched> {
            next.fetch(id, base).await.map(|mut fetched| {
                fetched
                    .metadata
                    .properties
                    .insert("relabel".into(), "true".into());
                fetched
            })
        }
    }

    fn base() -> ModuleId {
        ModuleId::tentative("test:///base")
    }

    #[tokio::test]
    async fn not_understood_advances_the_chain() {
        let fetchers: Vec<Arc<dyn Fetcher>> = vec![
            Arc::new(SchemeFetcher {
                scheme: "alpha:",
                body: "a",
            }),
            Arc::new(SchemeFetcher {
                scheme: "beta:",
                body: "b",
            }),
        ];
        let chain = FetcherChain::new(&fetchers);

        let outcome = chain.canonicalize("beta:///m.js", &base()).await;
        let id = outcome.understood().expect("second fetcher answers");
        assert_eq!(id.abs(), "beta:///m.js");
    }

    #[tokio::test]
    async fn exhausted_chain_is_not_understood() {
        let fetchers: Vec<Arc<dyn Fetcher>> = vec![Arc::new(SchemeFetcher {
            scheme: "alpha:",
            body: "a",
        })];
        let chain = FetcherChain::new(&fetchers);
        assert!(chain
            .canonicalize("gamma:///m.js", &base())
            .await
            .is_not_understood());
    }

    #[tokio::test]
    async fn delegation_reinterprets_downstream_result() {
        let fetchers: Vec<Arc<dyn Fetcher>> = vec![
            Arc::new(RelabelFetcher),
            Arc::new(SchemeFetcher {
                scheme: "alpha:",
                body: "a",
            }),
        ];
        let chain = FetcherChain::new(&fetchers);
        let id = ModuleId::canonical(
            "alpha:///m.js",
            url::Url::parse("alpha:///m.js").unwrap(),
        );
        let fetched = chain.fetch(&id, &base()).await.understood().unwrap();
        assert_eq!(fetched.metadata.properties.get("relabel").unwrap(), "true");
    }
}
