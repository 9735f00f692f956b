//! Default filesystem fetcher for `file:` URLs.
//!
//! Canonicalization percent-decodes the raw URL, lexically cleans the path,
//! and asks the filesystem for the canonical form, falling back to the
//! cleaned path when the file does not exist yet. Reads run through
//! `spawn_blocking` so they never block the async executor.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use path_clean::PathClean;
use percent_encoding::percent_decode_str;
use url::Url;

use crate::diagnostics::Diagnostic;
use crate::fetcher::{FetchOutcome, Fetched, Fetcher, FetcherChain};
use crate::module::ModuleMetadata;
use crate::module_id::ModuleId;
use crate::resolver::UrlProbe;

/// Files larger than this are refused rather than read.
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

const FILE_PREFIX: &str = "file://";

/// Filesystem provider for `file:` URLs. Non-`file:` URLs are not
/// understood and pass on down the chain.
#[derive(Debug, Clone)]
pub struct FsFetcher {
    max_file_size: usize,
}

impl FsFetcher {
    pub fn new() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
        }
    }

    pub fn with_max_file_size(max_file_size: usize) -> Self {
        Self { max_file_size }
    }
}

impl Default for FsFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode the path of a raw `file:` URL. Returns `None` for other schemes.
fn file_url_path(abs: &str) -> Option<PathBuf> {
    let rest = abs.strip_prefix(FILE_PREFIX)?;
    // Raw absolute URLs always carry an empty host: "file:///...".
    let path = rest.strip_prefix('/').map(|p| format!("/{p}"))?;
    let decoded = percent_decode_str(&path).decode_utf8().ok()?;
    Some(PathBuf::from(decoded.into_owned()).clean())
}

fn canonical_url_for(path: &Path) -> Option<Url> {
    Url::from_file_path(path).ok()
}

#[async_trait]
impl Fetcher for FsFetcher {
    async fn canonicalize(
        &self,
        abs: &str,
        _base: &ModuleId,
        _next: FetcherChain<'_>,
    ) -> FetchOutcome<ModuleId> {
        let Some(cleaned) = file_url_path(abs) else {
            return FetchOutcome::NotUnderstood;
        };

        let resolved = tokio::task::spawn_blocking(move || match std::fs::canonicalize(&cleaned) {
            Ok(canonical) => Ok(canonical),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(cleaned),
            Err(err) => Err(err),
        })
        .await;

        match resolved {
            Ok(Ok(path)) => match canonical_url_for(&path) {
                Some(canon) => FetchOutcome::Understood(ModuleId::canonical(abs, canon)),
                None => FetchOutcome::Failed(Diagnostic::error(format!(
                    "cannot express '{}' as a file URL",
                    path.display()
                ))),
            },
            Ok(Err(err)) => FetchOutcome::Failed(Diagnostic::error(format!(
                "failed to canonicalize '{abs}': {err}"
            ))),
            Err(join_err) => FetchOutcome::Failed(Diagnostic::error(format!(
                "canonicalize task failed: {join_err}"
            ))),
        }
    }

    async fn list(
        &self,
        glob: &str,
        _base: &ModuleId,
        _next: FetcherChain<'_>,
    ) -> FetchOutcome<Vec<ModuleId>> {
        let Some(star) = glob.find('*') else {
            return FetchOutcome::NotUnderstood;
        };
        let (prefix, suffix) = glob.split_at(star);
        let suffix = suffix[1..].to_string();
        let Some(dir) = file_url_path(prefix) else {
            return FetchOutcome::NotUnderstood;
        };

        let entries = tokio::task::spawn_blocking(move || -> io::Result<Vec<PathBuf>> {
            let mut matches = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.ends_with(&suffix) {
                    matches.push(entry.path());
                }
            }
            matches.sort();
            Ok(matches)
        })
        .await;

        match entries {
            Ok(Ok(paths)) => {
                let ids = paths
                    .iter()
                    .filter_map(|p| canonical_url_for(p))
                    .map(|canon| ModuleId::canonical(canon.as_str().to_string(), canon))
                    .collect();
                FetchOutcome::Understood(ids)
            }
            Ok(Err(err)) => {
                FetchOutcome::Failed(Diagnostic::error(format!("failed to list '{glob}': {err}")))
            }
            Err(join_err) => {
                FetchOutcome::Failed(Diagnostic::error(format!("list task failed: {join_err}")))
            }
        }
    }

    async fn fetch(
        &self,
        id: &ModuleId,
        _base: &ModuleId,
        _next: FetcherChain<'_>,
    ) -> FetchOutcome<Fetched> {
        let Some(canon) = id.canon() else {
            return FetchOutcome::Failed(
                Diagnostic::error("fetch requires a canonical id").with_module(id.clone()),
            );
        };
        if canon.scheme() != "file" {
            return FetchOutcome::NotUnderstood;
        }
        let Ok(path) = canon.to_file_path() else {
            return FetchOutcome::Failed(
                Diagnostic::error(format!("'{canon}' has no filesystem path"))
                    .with_module(id.clone()),
            );
        };

        let max = self.max_file_size;
        let read = tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
            let metadata = std::fs::metadata(&path)?;
            if metadata.len() > max as u64 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("file exceeds {max} bytes"),
                ));
            }
            std::fs::read(&path)
        })
        .await;

        let bytes = match read {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => {
                return FetchOutcome::Failed(
                    Diagnostic::error(format!("failed to read module: {err}"))
                        .with_module(id.clone()),
                );
            }
            Err(join_err) => {
                return FetchOutcome::Failed(
                    Diagnostic::error(format!("read task failed: {join_err}"))
                        .with_module(id.clone()),
                );
            }
        };

        match String::from_utf8(bytes) {
            Ok(source) => FetchOutcome::Understood(Fetched {
                id: id.clone(),
                source: source.into(),
                metadata: ModuleMetadata::new(id.clone()),
            }),
            Err(err) => FetchOutcome::Failed(
                Diagnostic::error(format!("module is not valid UTF-8: {err}"))
                    .with_module(id.clone()),
            ),
        }
    }
}

impl UrlProbe for FsFetcher {
    fn exists(&self, abs: &str) -> bool {
        file_url_path(abs).is_some_and(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn base() -> ModuleId {
        ModuleId::tentative("file:///")
    }

    fn chain_of(fetcher: Arc<dyn Fetcher>) -> Vec<Arc<dyn Fetcher>> {
        vec![fetcher]
    }

    #[test]
    fn file_url_path_percent_decodes_and_cleans() {
        let path = file_url_path("file:///a/b/../alert(%201%20).js").unwrap();
        assert_eq!(path, PathBuf::from("/a/alert( 1 ).js"));
    }

    #[test]
    fn non_file_scheme_is_not_a_path() {
        assert!(file_url_path("https://example.com/x.js").is_none());
    }

    #[tokio::test]
    async fn canonicalize_aliases_encodings_of_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a b.js");
        std::fs::write(&file, "export {}").unwrap();

        let fetchers = chain_of(Arc::new(FsFetcher::new()));
        let chain = FetcherChain::new(&fetchers);
        let raw = format!("file://{}/a b.js", dir.path().display());
        let encoded = format!("file://{}/a%20b.js", dir.path().display());

        let a = chain.canonicalize(&raw, &base()).await.understood().unwrap();
        let b = chain
            .canonicalize(&encoded, &base())
            .await
            .understood()
            .unwrap();
        assert_eq!(a.canon_key(), b.canon_key());
        assert_ne!(a.abs(), b.abs());
    }

    #[tokio::test]
    async fn fetch_reads_module_source() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("m.js");
        std::fs::write(&file, "export const x = 1;").unwrap();

        let fetchers = chain_of(Arc::new(FsFetcher::new()));
        let chain = FetcherChain::new(&fetchers);
        let abs = format!("file://{}", file.display());
        let id = chain.canonicalize(&abs, &base()).await.understood().unwrap();
        let fetched = chain.fetch(&id, &base()).await.understood().unwrap();
        assert_eq!(fetched.source.as_ref(), "export const x = 1;");
        assert_eq!(fetched.metadata.base, id);
    }

    #[tokio::test]
    async fn fetch_missing_file_fails() {
        let fetchers = chain_of(Arc::new(FsFetcher::new()));
        let chain = FetcherChain::new(&fetchers);
        let id = ModuleId::canonical(
            "file:///no/such/file.js",
            Url::parse("file:///no/such/file.js").unwrap(),
        );
        assert!(matches!(
            chain.fetch(&id, &base()).await,
            FetchOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn oversized_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("big.js");
        std::fs::write(&file, "x".repeat(64)).unwrap();

        let fetchers = chain_of(Arc::new(FsFetcher::with_max_file_size(16)));
        let chain = FetcherChain::new(&fetchers);
        let abs = format!("file://{}", file.display());
        let id = chain.canonicalize(&abs, &base()).await.understood().unwrap();
        assert!(matches!(
            chain.fetch(&id, &base()).await,
            FetchOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn list_matches_suffix_globs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "").unwrap();
        std::fs::write(dir.path().join("b.js"), "").unwrap();
        std::fs::write(dir.path().join("c.css"), "").unwrap();

        let fetchers = chain_of(Arc::new(FsFetcher::new()));
        let chain = FetcherChain::new(&fetchers);
        let glob = format!("file://{}/*.js", dir.path().display());
        let ids = chain.list(&glob, &base()).await.understood().unwrap();
        assert_eq!(ids.len(), 2);
    }
}
