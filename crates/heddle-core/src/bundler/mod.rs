//! Multi-language asset bundler.
//!
//! Given an entry file, discovers the transitive asset dependency graph, transforms each
//! asset through its registered variant, groups assets into output bundles along
//! dynamic-import boundaries, hoists shared assets to their lowest common ancestor, and
//! writes the resulting bundles to disk.
//!
//! ## Usage
//!
//! ```ignore
//! use heddle_core::bundler::{Bundler, BundleOptions};
//!
//! let mut bundler = Bundler::new(BundleOptions::new("src/index.js"));
//! let result = bundler.bundle()?;
//! ```
//!
//! ## Architecture
//!
//! 1. **Resolve** ([`resolver`]) — import specifiers to file paths
//! 2. **Graph** ([`graph`]) — discover the transitive asset graph ([`asset`])
//! 3. **Cache** ([`cache`]) — skip reprocessing unchanged assets
//! 4. **Farm** ([`farm`]) — run load/parse/transform/generate off the calling thread
//! 5. **Bundle tree** ([`bundle_tree`]) — group and hoist assets into output bundles
//! 6. **Package** ([`packager`]) — concatenate each bundle's assets into output bytes
//! 7. **Watch** ([`watch`]) / **notify** ([`notifier`]) — incremental rebuilds and
//!    live-update messages for connected clients

pub mod asset;
pub mod bundle_tree;
pub mod cache;
pub mod delegate;
pub mod farm;
pub mod graph;
pub mod notifier;
pub mod packager;
pub mod registry;
pub mod resolver;
pub mod watch;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use asset::{AssetVariant, Package};
use bundle_tree::BundleTree;
use cache::{Cache, CacheKey};
use delegate::{Delegate, NoopDelegate};
use farm::WorkerFarm;
use graph::AssetGraph;
use notifier::{UpdateMessage, UpdateNotifier, UpdatedAsset};
use packager::{ConcatPackager, Packager};
use registry::ParserRegistry;
use resolver::{DefaultResolver, Resolver};

use crate::error::BundleError;

/// Options controlling one bundle run.
pub struct BundleOptions {
    pub entries: Vec<PathBuf>,
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub public_url: String,
    pub watch: bool,
    pub cache: bool,
    pub minify: bool,
    pub hmr: bool,
    pub production: bool,
    pub num_workers: usize,
}

impl BundleOptions {
    #[must_use]
    pub fn new(entry: impl Into<PathBuf>) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            entries: vec![entry.into()],
            cwd,
            out_dir: PathBuf::from("dist"),
            public_url: "/".to_string(),
            watch: false,
            cache: true,
            minify: false,
            hmr: false,
            production: false,
            num_workers: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
        }
    }

    #[must_use]
    pub fn with_entries(mut self, entries: Vec<PathBuf>) -> Self {
        self.entries = entries;
        self
    }

    #[must_use]
    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = out_dir.into();
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    #[must_use]
    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    #[must_use]
    pub fn with_minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }

    /// The subset of options that affect transform output (§4.4): minify, production,
    /// publicURL, and the registered-extensions set, so changing any of these invalidates
    /// every cache entry rather than silently serving a stale `ProcessedResult`.
    fn fingerprint_fields(&self, registry: &ParserRegistry) -> Vec<(&str, String)> {
        vec![
            ("minify", self.minify.to_string()),
            ("production", self.production.to_string()),
            ("public_url", self.public_url.clone()),
            ("extensions", registry.registered_extensions().join(",")),
        ]
    }
}

/// One output bundle written to disk.
#[derive(Debug, Clone)]
pub struct WrittenBundle {
    pub path: PathBuf,
    pub bundle_type: String,
    pub asset_paths: Vec<PathBuf>,
}

/// Outcome of a bundle run.
#[derive(Debug, Clone, Default)]
pub struct BundleResult {
    pub bundles: Vec<WrittenBundle>,
    pub asset_count: usize,
    pub warnings: Vec<String>,
}

/// Coordinates resolution, the asset graph, the worker farm, the cache, the bundle tree,
/// and packaging into one `bundle()` entry point. Holds the pieces that must persist
/// across incremental rebuilds (the graph, the cache, the registry) so a rebuild only
/// redoes the work a changed file actually invalidates.
pub struct Bundler {
    options: BundleOptions,
    registry: ParserRegistry,
    resolver: Arc<dyn Resolver>,
    farm: WorkerFarm,
    cache: Cache,
    delegate: Arc<dyn Delegate>,
    packager: Arc<dyn Packager>,
    graph: AssetGraph,
    pub notifier: UpdateNotifier,
    started: bool,
}

impl Bundler {
    #[must_use]
    pub fn new(options: BundleOptions) -> Self {
        let cache_dir = options.cwd.join(".cache");
        let num_workers = options.num_workers;
        Self {
            options,
            registry: ParserRegistry::new(),
            resolver: Arc::new(DefaultResolver::new()),
            farm: WorkerFarm::new(num_workers.max(1)),
            cache: Cache::new(cache_dir),
            delegate: Arc::new(NoopDelegate),
            packager: Arc::new(ConcatPackager),
            graph: AssetGraph::new(),
            notifier: UpdateNotifier::new(),
            started: false,
        }
    }

    /// Registers a variant for an extension. Must be called before the first [`Self::bundle`].
    pub fn register_extension(
        &mut self,
        ext: impl Into<String>,
        variant: Arc<dyn AssetVariant>,
    ) -> Result<(), BundleError> {
        self.registry.register_extension(ext, variant)
    }

    pub fn set_resolver(&mut self, resolver: Arc<dyn Resolver>) {
        self.resolver = resolver;
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn Delegate>) {
        self.delegate = delegate;
    }

    pub fn set_packager(&mut self, packager: Arc<dyn Packager>) {
        self.packager = packager;
    }

    /// Runs one full bundle: resolve entries, load the graph, build the bundle tree,
    /// package every bundle, and write output to `out_dir`.
    pub fn bundle(&mut self) -> Result<BundleResult, BundleError> {
        if !self.started {
            self.registry.lock();
            self.started = true;
        }

        self.graph.entries.clear();
        for entry in self.options.entries.clone() {
            let abs = if entry.is_absolute() {
                entry
            } else {
                self.options.cwd.join(entry)
            };
            let id = self.graph.resolve_asset(&abs, Package::default());
            self.graph.entries.push(id);
        }

        for &entry in &self.graph.entries.clone() {
            self.load_with_cache(entry)?;
        }

        self.graph.unload_orphaned_assets();

        let mut tree = BundleTree::new();
        let entries = self.graph.entries.clone();
        tree.build(&mut self.graph, &entries);

        std::fs::create_dir_all(&self.options.out_dir)
            .map_err(|e| BundleError::io_failed(&self.options.out_dir, "create_dir_all", e))?;

        let mut bundles = Vec::new();
        for bundle in tree.iter() {
            let bytes = self.packager.package(bundle, &tree, &self.graph)?;
            let file_name = output_file_name(&self.graph, bundle);
            let out_path = self.options.out_dir.join(&file_name);
            heddle_util::fs::atomic_write(&out_path, &bytes)
                .map_err(|e| BundleError::io_failed(&out_path, "write", e))?;

            let mut asset_paths: Vec<PathBuf> =
                bundle.assets.iter().map(|&id| self.graph.get(id).path.clone()).collect();
            asset_paths.sort();
            bundles.push(WrittenBundle {
                path: out_path,
                bundle_type: bundle.bundle_type.clone(),
                asset_paths,
            });
            debug!(bundle = %file_name, assets = bundle.assets.len(), "wrote bundle");
        }

        info!(bundles = bundles.len(), assets = self.graph.len(), "bundle complete");

        Ok(BundleResult {
            bundles,
            asset_count: self.graph.len(),
            warnings: Vec::new(),
        })
    }

    /// Re-runs the pipeline for a set of changed paths: invalidates their graph nodes and
    /// cache entries, then does a full `bundle()` pass. The graph and cache retain every
    /// untouched asset, so only the changed subtree and anything downstream of it is
    /// reprocessed.
    pub fn rebuild(&mut self, changed: &[PathBuf]) -> Result<BundleResult, BundleError> {
        for path in changed {
            self.cache.invalidate(path);
            let found = self.graph.iter().position(|a| a.path == *path);
            if let Some(id) = found {
                self.graph.get_mut(id).invalidate();
            }
        }
        match self.bundle() {
            Ok(result) => {
                let assets = changed
                    .iter()
                    .filter_map(|path| self.graph.iter().position(|a| a.path == *path))
                    .map(|id| updated_asset(&self.graph, id))
                    .collect();
                self.notifier.publish(&UpdateMessage::Update { assets });
                Ok(result)
            }
            Err(e) => {
                self.notifier.publish(&UpdateMessage::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Starts a blocking watch loop: rebuilds on every coalesced filesystem change until
    /// the watcher's channel closes.
    pub fn watch(&mut self) -> Result<(), BundleError> {
        let watcher = watch::Watcher::new(&self.options.cwd)
            .map_err(|e| BundleError::io_failed(&self.options.cwd, "watch", std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        self.bundle()?;
        for changed in watcher.changes {
            if let Err(e) = self.rebuild(&changed) {
                tracing::warn!(error = %e, "rebuild failed");
            }
        }
        Ok(())
    }

    fn load_with_cache(&mut self, entry: asset::AssetId) -> Result<(), BundleError> {
        if !self.options.cache {
            return self.graph.load_asset(
                entry,
                &self.registry,
                self.resolver.as_ref(),
                &self.farm,
                self.delegate.as_ref(),
                &self.options.cwd,
            );
        }
        self.load_one_with_cache(entry)
    }

    fn load_one_with_cache(&mut self, id: asset::AssetId) -> Result<(), BundleError> {
        use asset::AssetState;
        match self.graph.get(id).state {
            AssetState::Done | AssetState::InProgress => return Ok(()),
            AssetState::NotStarted => {}
        }

        let path = self.graph.get(id).path.clone();
        let fields = self.options.fingerprint_fields(&self.registry);
        let fingerprint_fields: Vec<(&str, &str)> =
            fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let fingerprint = Cache::option_fingerprint(&fingerprint_fields);

        let result = match Cache::stamp(&path) {
            Ok((mtime, size)) => {
                let key = CacheKey {
                    path: path.clone(),
                    mtime,
                    size,
                    option_fingerprint: fingerprint,
                };
                if let Some(cached) = self.cache.read(&key) {
                    cached
                } else {
                    self.graph.get_mut(id).state = AssetState::InProgress;
                    let ext = self.graph.get(id).asset_type.clone();
                    let variant = self.registry.get(&ext);
                    let fresh = self.farm.run(&path, variant)?;
                    self.cache.write(&key, &fresh);
                    fresh
                }
            }
            Err(e) => return Err(BundleError::io_failed(&path, "stat", e)),
        };

        let mut deps = result.dependencies.clone();
        deps.extend(self.delegate.implicit_dependencies(self.graph.get(id)));

        self.graph.get_mut(id).generated = result.generated;
        self.graph.get_mut(id).hash = Some(result.hash);
        self.graph.get_mut(id).dependencies =
            deps.iter().map(|d| (d.name.clone(), d.clone())).collect();
        self.graph.get_mut(id).state = AssetState::Done;

        for dep in deps {
            if let Some(child) =
                self.graph
                    .resolve_dep(id, &dep, self.resolver.as_ref(), &self.options.cwd)?
            {
                self.graph.get_mut(id).dep_assets.push((dep.name.clone(), child));
                self.graph.get_mut(child).parent_deps.push(dep);
                self.load_one_with_cache(child)?;
            }
        }
        Ok(())
    }
}

/// Builds one asset's `update` message entry (§6): its generated output, decoded lossily
/// since the wire format carries it as a JSON string, and its resolved dependency ids.
fn updated_asset(graph: &AssetGraph, id: asset::AssetId) -> UpdatedAsset {
    let a = graph.get(id);
    let generated = a
        .generated
        .iter()
        .map(|(ty, bytes)| (ty.clone(), String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    let deps = a.dep_assets.iter().cloned().collect();
    UpdatedAsset { id, generated, deps }
}

fn output_file_name(graph: &AssetGraph, bundle: &bundle_tree::Bundle) -> String {
    let entry = graph.get(bundle.entry_asset);
    let stem = entry
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("bundle");
    let hash = entry.hash.as_deref().unwrap_or("0").get(..8).unwrap_or("0");
    format!("{stem}.{hash}.{}", bundle.bundle_type)
}

/// Convenience entry point for the common case: bundle once, no watch, default registry.
pub fn bundle(entry: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Result<BundleResult, BundleError> {
    let options = BundleOptions::new(entry).with_out_dir(out_dir);
    Bundler::new(options).bundle()
}

/// Snapshot used by callers that want to inspect asset output maps directly (e.g. tests).
#[must_use]
pub fn generated_outputs(graph: &AssetGraph) -> BTreeMap<PathBuf, Vec<String>> {
    graph
        .iter()
        .map(|a| (a.path.clone(), a.generated.keys().cloned().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bundles_entry_and_static_dependency() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.js"), b"require(\"./util.js\");").unwrap();
        std::fs::write(dir.path().join("util.js"), b"module.exports = 1;").unwrap();

        let options = BundleOptions::new(dir.path().join("index.js"))
            .with_cwd(dir.path())
            .with_out_dir(dir.path().join("dist"));
        let mut bundler = Bundler::new(options);
        let result = bundler.bundle().unwrap();

        assert_eq!(result.bundles.len(), 1);
        assert_eq!(result.asset_count, 2);
        let output = std::fs::read_to_string(&result.bundles[0].path).unwrap();
        assert!(output.contains("__register"));
    }

    #[test]
    fn dynamic_import_produces_two_bundles() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.js"), b"import(\"./lazy.js\");").unwrap();
        std::fs::write(dir.path().join("lazy.js"), b"module.exports = 1;").unwrap();

        let options = BundleOptions::new(dir.path().join("index.js"))
            .with_cwd(dir.path())
            .with_out_dir(dir.path().join("dist"));
        let mut bundler = Bundler::new(options);
        let result = bundler.bundle().unwrap();

        assert_eq!(result.bundles.len(), 2);
    }

    #[test]
    fn rebuild_after_edit_reflects_new_contents() {
        let dir = tempdir().unwrap();
        let entry = dir.path().join("index.js");
        std::fs::write(&entry, b"1").unwrap();

        let options = BundleOptions::new(&entry)
            .with_cwd(dir.path())
            .with_out_dir(dir.path().join("dist"));
        let mut bundler = Bundler::new(options);
        bundler.bundle().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(&entry, b"2").unwrap();
        let result = bundler.rebuild(&[entry]).unwrap();
        let output = std::fs::read_to_string(&result.bundles[0].path).unwrap();
        assert!(output.contains('2'));
    }

    #[test]
    fn rebuild_broadcasts_an_update_message_naming_the_changed_asset() {
        let dir = tempdir().unwrap();
        let entry = dir.path().join("foo.js");
        std::fs::write(&entry, b"1").unwrap();

        let options = BundleOptions::new(&entry)
            .with_cwd(dir.path())
            .with_out_dir(dir.path().join("dist"));
        let mut bundler = Bundler::new(options);
        bundler.bundle().unwrap();

        let received: Arc<std::sync::Mutex<Vec<UpdateMessage>>> = Arc::default();
        bundler.notifier.subscribe({
            let received = Arc::clone(&received);
            move |msg: &UpdateMessage| received.lock().unwrap().push(msg.clone())
        });

        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(&entry, b"2").unwrap();
        bundler.rebuild(&[entry.clone()]).unwrap();

        let messages = received.lock().unwrap();
        let assets = messages.iter().find_map(|m| match m {
            UpdateMessage::Update { assets } => Some(assets),
            _ => None,
        });
        let assets = assets.expect("expected an Update message");
        assert!(assets.iter().any(|a| a.generated.values().any(|v| v.contains('2'))));
    }

    #[test]
    fn cache_hit_skips_reprocessing_unchanged_asset() {
        let dir = tempdir().unwrap();
        let entry = dir.path().join("index.js");
        std::fs::write(&entry, b"1").unwrap();

        let options = BundleOptions::new(&entry)
            .with_cwd(dir.path())
            .with_out_dir(dir.path().join("dist"));
        let mut bundler = Bundler::new(options);
        bundler.bundle().unwrap();
        let second = bundler.bundle().unwrap();
        assert_eq!(second.asset_count, 1);
    }
}
