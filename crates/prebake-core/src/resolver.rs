//! Specifier resolution.
//!
//! Resolves a module specifier string against an importer's base id. Bare
//! specifiers go through the built-in table first, then a
//! `node_modules`-style upward walk over the importer's path; everything
//! else (and the final fallback) is a raw URL join against the base.
//!
//! The join is deliberately *raw*: it removes dot segments but never
//! re-encodes the specifier, so two spellings that differ only in
//! percent-encoding stay distinct until the fetcher canonicalizes them.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::module_id::ModuleId;

/// Existence probe used while walking `node_modules` candidates.
pub trait UrlProbe: Send + Sync {
    fn exists(&self, abs_url: &str) -> bool;
}

/// Probe that never finds anything; bare specifiers then fall through to
/// the URL join.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

impl UrlProbe for NoProbe {
    fn exists(&self, _abs_url: &str) -> bool {
        false
    }
}

/// Table of platform built-in modules, matched by bare specifier name.
#[derive(Debug, Clone, Default)]
pub struct BuiltinModules {
    map: FxHashMap<String, String>,
}

impl BuiltinModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, abs_url: impl Into<String>) -> Self {
        self.map.insert(name.into(), abs_url.into());
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("cannot resolve specifier '{specifier}' against '{base}'")]
    Unresolvable { specifier: String, base: String },

    #[error("base '{base}' is not an absolute URL")]
    RelativeBase { base: String },
}

/// Resolves specifiers to raw absolute URLs.
pub struct Resolver {
    builtins: BuiltinModules,
    probe: Arc<dyn UrlProbe>,
}

impl Resolver {
    pub fn new(builtins: BuiltinModules, probe: Arc<dyn UrlProbe>) -> Self {
        Self { builtins, probe }
    }

    /// Resolve `specifier` against the importer's base id.
    pub fn resolve(&self, specifier: &str, base: &ModuleId) -> Result<String, ResolveError> {
        let base_abs = base.abs();
        if !has_scheme(base_abs) {
            return Err(ResolveError::RelativeBase {
                base: base_abs.to_string(),
            });
        }

        if is_bare(specifier) {
            if let Some(builtin) = self.builtins.lookup(specifier) {
                return Ok(builtin.to_string());
            }
            if let Some(found) = self.walk_node_modules(specifier, base_abs) {
                return Ok(found);
            }
        }

        join_raw(base_abs, specifier).ok_or_else(|| ResolveError::Unresolvable {
            specifier: specifier.to_string(),
            base: base_abs.to_string(),
        })
    }

    /// Walk the importer's directory upward, probing
    /// `<dir>/node_modules/<specifier>` at each level.
    fn walk_node_modules(&self, specifier: &str, base_abs: &str) -> Option<String> {
        let root_len = path_root(base_abs)?;
        let mut dir_end = base_abs.rfind('/')?;
        loop {
            if dir_end < root_len {
                return None;
            }
            let dir = &base_abs[..dir_end];
            let candidate = format!("{dir}/node_modules/{specifier}");
            for probe_url in [
                candidate.clone(),
                format!("{candidate}.js"),
                format!("{candidate}/index.js"),
            ] {
                if self.probe.exists(&probe_url) {
                    return Some(probe_url);
                }
            }
            match base_abs[..dir_end].rfind('/') {
                Some(next) => dir_end = next,
                None => return None,
            }
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("builtins", &self.builtins)
            .finish()
    }
}

fn is_bare(specifier: &str) -> bool {
    !specifier.starts_with("./")
        && !specifier.starts_with("../")
        && !specifier.starts_with('/')
        && !has_scheme(specifier)
}

fn has_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    for c in chars {
        if c == ':' {
            return true;
        }
        if !(c.is_ascii_alphanumeric() || c == '+' || c == '.' || c == '-') {
            return false;
        }
    }
    false
}

/// Byte offset just past the authority of an absolute URL: the position of
/// the first `/` of the path. For "file:///a/b" this is the third slash.
fn path_root(abs: &str) -> Option<usize> {
    let scheme_end = abs.find("://")?;
    let after_authority = abs[scheme_end + 3..].find('/')?;
    Some(scheme_end + 3 + after_authority)
}

/// Join a specifier against a raw absolute base URL without re-encoding,
/// removing dot segments lexically.
fn join_raw(base_abs: &str, specifier: &str) -> Option<String> {
    if has_scheme(specifier) {
        return Some(specifier.to_string());
    }

    let root = path_root(base_abs)?;
    if let Some(rooted) = specifier.strip_prefix('/') {
        return Some(normalize_dots(&format!("{}/{rooted}", &base_abs[..root]), root));
    }

    let dir_end = base_abs.rfind('/')?;
    let dir_end = dir_end.max(root);
    let joined = format!("{}/{specifier}", &base_abs[..dir_end]);
    Some(normalize_dots(&joined, root))
}

/// Remove `.` and `..` segments from the path part of `url`, leaving the
/// prefix before `root` untouched and never escaping above it.
fn normalize_dots(url: &str, root: usize) -> String {
    let (prefix, path) = url.split_at(root);
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let mut out = String::with_capacity(url.len());
    out.push_str(prefix);
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }
    if segments.is_empty() {
        out.push('/');
    }
    out
}
