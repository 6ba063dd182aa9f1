//! Import specifier resolution (C3).
//!
//! `Resolver` is the external interface the coordinator calls for every dependency edge;
//! [`DefaultResolver`] is a concrete `node_modules`-aware implementation with a directory
//! listing cache so repeated probes (`./foo`, `./foo.js`, `./foo/index.js`, …) don't each
//! hit the filesystem.
//!
//! ## Specifier kinds
//! - Relative: `./utils`, `../lib/foo`
//! - Absolute: `/abs/path/to/module`
//! - Bare: `lodash`, `@scope/pkg`, `react/jsx-runtime`

#![allow(clippy::manual_strip)]

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

use super::asset::Package;
use crate::error::BundleError;

/// Outcome of resolving a specifier: a local file, or a module that should not be
/// bundled (external/builtin) and is instead referenced by name at runtime.
#[derive(Debug, Clone)]
pub enum ResolveResult {
    Found(PathBuf, Package),
    External(String),
    Builtin(String),
}

/// External interface between the graph builder and specifier resolution.
///
/// A caller may substitute any policy here (alias maps, workspace resolution, a
/// language-specific module system) without the graph builder changing.
pub trait Resolver: Send + Sync {
    fn resolve(
        &self,
        specifier: &str,
        from: &Path,
        cwd: &Path,
    ) -> Result<ResolveResult, BundleError>;
}

fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut result = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir => {}
            other => result.push(other),
        }
    }
    result.iter().collect()
}

type DirListing = std::sync::Arc<(HashSet<OsString>, HashSet<OsString>)>;

const EXTENSIONS: &[&str] = &[".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".css", ".json"];

/// `node_modules`-aware resolver with a read-through directory listing cache.
#[derive(Default)]
pub struct DefaultResolver {
    dir_cache: RwLock<HashMap<PathBuf, Option<DirListing>>>,
}

impl DefaultResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get_dir_listing(&self, dir: &Path) -> Option<DirListing> {
        if let Some(entry) = self.dir_cache.read().unwrap().get(dir) {
            return entry.clone();
        }
        let listing = std::fs::read_dir(dir).ok().map(|rd| {
            let mut files = HashSet::default();
            let mut subdirs = HashSet::default();
            for entry in rd.filter_map(Result::ok) {
                let name = entry.file_name();
                match entry.file_type() {
                    Ok(ft) if ft.is_dir() => {
                        subdirs.insert(name);
                    }
                    _ => {
                        files.insert(name);
                    }
                }
            }
            std::sync::Arc::new((files, subdirs))
        });
        self.dir_cache
            .write()
            .unwrap()
            .insert(dir.to_path_buf(), listing.clone());
        listing
    }

    fn file_exists_cached(&self, path: &Path) -> bool {
        let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
            return false;
        };
        self.get_dir_listing(dir).is_some_and(|l| l.0.contains(name))
    }

    fn dir_exists_cached(&self, path: &Path) -> bool {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return false;
        };
        self.get_dir_listing(parent)
            .is_some_and(|l| l.1.contains(name))
    }

    fn resolve_file_or_directory(&self, target: &Path) -> Option<PathBuf> {
        if self.file_exists_cached(target) {
            return Some(target.to_path_buf());
        }
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let stem = target.file_name().unwrap_or_default();
        if let Some(listing) = self.get_dir_listing(dir) {
            for ext in EXTENSIONS {
                let mut name = stem.to_os_string();
                name.push(ext);
                if listing.0.contains(&name) {
                    return Some(dir.join(name));
                }
            }
        }
        if self.dir_exists_cached(target) {
            for candidate in ["index.js", "index.ts", "index.mjs", "index.jsx"] {
                let index = target.join(candidate);
                if self.file_exists_cached(&index) {
                    return Some(index);
                }
            }
        }
        None
    }

    fn resolve_bare(&self, specifier: &str, from: &Path, cwd: &Path) -> Option<PathBuf> {
        let pkg_name = specifier.split('/').next().unwrap_or(specifier);
        let mut current = from.parent();
        while let Some(dir) = current {
            let node_modules = dir.join("node_modules").join(pkg_name);
            if self.dir_exists_cached(&node_modules) {
                if let Some(found) = self.resolve_file_or_directory(&node_modules) {
                    return Some(found);
                }
            }
            if dir == cwd {
                break;
            }
            current = dir.parent();
        }
        None
    }
}

impl Resolver for DefaultResolver {
    fn resolve(
        &self,
        specifier: &str,
        from: &Path,
        cwd: &Path,
    ) -> Result<ResolveResult, BundleError> {
        if specifier.starts_with("node:") {
            return Ok(ResolveResult::Builtin(specifier.to_string()));
        }

        let found = if specifier.starts_with("./") || specifier.starts_with("../") {
            let from_dir = from.parent().unwrap_or_else(|| Path::new("."));
            let target = normalize_path(&from_dir.join(specifier));
            self.resolve_file_or_directory(&target)
        } else if let Some(stripped) = specifier.strip_prefix('/') {
            self.resolve_file_or_directory(&cwd.join(stripped))
        } else {
            self.resolve_bare(specifier, from, cwd)
        };

        match found {
            Some(path) => Ok(ResolveResult::Found(path, Package::default())),
            None if !specifier.starts_with('.') && !specifier.starts_with('/') => {
                Ok(ResolveResult::External(specifier.to_string()))
            }
            None => Err(BundleError::resolve_failed(specifier, from)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolves_relative_with_extension_probe() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), b"").unwrap();
        std::fs::write(dir.path().join("b.js"), b"").unwrap();
        let resolver = DefaultResolver::new();
        let result = resolver
            .resolve("./b", &dir.path().join("a.js"), dir.path())
            .unwrap();
        assert!(matches!(result, ResolveResult::Found(p, _) if p == dir.path().join("b.js")));
    }

    #[test]
    fn resolves_relative_directory_to_index() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/index.js"), b"").unwrap();
        let resolver = DefaultResolver::new();
        let result = resolver
            .resolve("./lib", &dir.path().join("a.js"), dir.path())
            .unwrap();
        assert!(matches!(result, ResolveResult::Found(p, _) if p.ends_with("lib/index.js")));
    }

    #[test]
    fn unresolvable_bare_specifier_is_external() {
        let dir = tempdir().unwrap();
        let resolver = DefaultResolver::new();
        let result = resolver
            .resolve("react", &dir.path().join("a.js"), dir.path())
            .unwrap();
        assert!(matches!(result, ResolveResult::External(s) if s == "react"));
    }

    #[test]
    fn unresolvable_relative_specifier_errors() {
        let dir = tempdir().unwrap();
        let resolver = DefaultResolver::new();
        let err = resolver
            .resolve("./missing", &dir.path().join("a.js"), dir.path())
            .unwrap_err();
        assert!(matches!(err, BundleError::ResolveFailed { .. }));
    }
}
