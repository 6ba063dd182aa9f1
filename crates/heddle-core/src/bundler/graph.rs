//! Asset graph (C6): the arena of every asset reachable from the entry, plus the edges
//! between them.
//!
//! Assets live in a single `Vec`, addressed by [`AssetId`], so dependency edges are plain
//! indices rather than owned references — the standard way to model a graph with cycles
//! in Rust without `Rc<RefCell<_>>` bookkeeping.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::asset::{Asset, AssetId, AssetState, DependencyRecord, Package};
use super::delegate::Delegate;
use super::registry::ParserRegistry;
use super::resolver::{ResolveResult, Resolver};
use crate::error::BundleError;

/// The full set of assets reachable from one or more entry points.
pub struct AssetGraph {
    assets: Vec<Asset>,
    path_to_id: FxHashMap<PathBuf, AssetId>,
    /// `includedInParent` edges, keyed separately from `path_to_id` since the same path
    /// can be reachable both as a standalone asset and as content inlined into a parent
    /// (e.g. a CSS file that is both `@import`ed and linked directly).
    included_edges: FxHashMap<(AssetId, String), AssetId>,
    pub entries: Vec<AssetId>,
}

impl AssetGraph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            assets: Vec::new(),
            path_to_id: FxHashMap::default(),
            included_edges: FxHashMap::default(),
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn get(&self, id: AssetId) -> &Asset {
        &self.assets[id]
    }

    pub fn get_mut(&mut self, id: AssetId) -> &mut Asset {
        &mut self.assets[id]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.iter()
    }

    /// Finds or creates the asset node for `path`, leaving it `NotStarted` if new.
    pub fn resolve_asset(&mut self, path: &Path, package: Package) -> AssetId {
        if let Some(&id) = self.path_to_id.get(path) {
            return id;
        }
        let id = self.assets.len();
        self.assets.push(Asset::new(id, path.to_path_buf(), package));
        self.path_to_id.insert(path.to_path_buf(), id);
        id
    }

    /// Resolves one dependency edge from `from` and returns the child asset id, recording
    /// `includedInParent` edges in the dedicated map rather than the main path index.
    pub fn resolve_dep(
        &mut self,
        from: AssetId,
        dep: &DependencyRecord,
        resolver: &dyn Resolver,
        cwd: &Path,
    ) -> Result<Option<AssetId>, BundleError> {
        let from_path = self.assets[from].path.clone();
        match resolver.resolve(&dep.name, &from_path, cwd)? {
            ResolveResult::Found(path, package) => {
                if dep.included_in_parent {
                    if let Some(&existing) = self.included_edges.get(&(from, dep.name.clone())) {
                        return Ok(Some(existing));
                    }
                    let id = self.resolve_asset(&path, package);
                    self.included_edges.insert((from, dep.name.clone()), id);
                    Ok(Some(id))
                } else {
                    Ok(Some(self.resolve_asset(&path, package)))
                }
            }
            ResolveResult::External(_) | ResolveResult::Builtin(_) => Ok(None),
        }
    }

    /// Loads and processes `id` if not already `Done`, recursing into its dependencies.
    /// Uses [`AssetState::InProgress`] to break cycles: a re-entrant load on an in-flight
    /// asset is a no-op rather than infinite recursion. Merges `delegate`'s implicit
    /// dependencies in alongside the ones `collectDependencies` found, the same as the
    /// cache-enabled load path, so a custom delegate behaves identically with or without
    /// caching enabled.
    pub fn load_asset(
        &mut self,
        id: AssetId,
        registry: &ParserRegistry,
        resolver: &dyn Resolver,
        farm: &super::farm::WorkerFarm,
        delegate: &dyn Delegate,
        cwd: &Path,
    ) -> Result<(), BundleError> {
        match self.assets[id].state {
            AssetState::Done | AssetState::InProgress => return Ok(()),
            AssetState::NotStarted => {}
        }
        self.assets[id].state = AssetState::InProgress;

        let (path, ext) = {
            let asset = &self.assets[id];
            (asset.path.clone(), asset.asset_type.clone())
        };
        let variant = registry.get(&ext);
        let result = farm.run(&path, Arc::clone(&variant));
        let result = match result {
            Ok(r) => r,
            Err(e) => {
                self.assets[id].state = AssetState::NotStarted;
                return Err(e);
            }
        };

        let mut deps = result.dependencies;
        deps.extend(delegate.implicit_dependencies(&self.assets[id]));

        self.assets[id].generated = result.generated;
        self.assets[id].hash = Some(result.hash);
        self.assets[id].dependencies = deps.iter().map(|d| (d.name.clone(), d.clone())).collect();
        self.assets[id].state = AssetState::Done;

        for dep in deps {
            if let Some(child) = self.resolve_dep(id, &dep, resolver, cwd)? {
                self.assets[id].dep_assets.push((dep.name.clone(), child));
                self.assets[child].parent_deps.push(dep);
                self.load_asset(child, registry, resolver, farm, delegate, cwd)?;
            }
        }
        Ok(())
    }

    /// Resets every asset's bundle assignment. Bundles are rebuilt from scratch on every
    /// `bundle()`/`rebuild()` pass, so stale `parentBundle`/`bundles`/`parentDeps` from a
    /// previous tree must be cleared before walking the graph again.
    pub fn clear_bundle_state(&mut self) {
        for asset in &mut self.assets {
            asset.invalidate_bundle();
        }
    }

    /// Removes assets no longer reachable from any entry, walking forward from `entries`
    /// rather than tracking reference counts — simpler to reason about and cheap enough
    /// for typical graph sizes.
    pub fn unload_orphaned_assets(&mut self) {
        let mut reachable = vec![false; self.assets.len()];
        let mut stack: Vec<AssetId> = self.entries.clone();
        while let Some(id) = stack.pop() {
            if reachable[id] {
                continue;
            }
            reachable[id] = true;
            for &(_, child) in &self.assets[id].dep_assets {
                stack.push(child);
            }
        }
        let orphans: Vec<PathBuf> = self
            .assets
            .iter()
            .enumerate()
            .filter(|(i, _)| !reachable[*i])
            .map(|(_, a)| a.path.clone())
            .collect();
        for path in orphans {
            self.path_to_id.remove(&path);
        }
        self.included_edges
            .retain(|&(from, _), &mut to| reachable[from] && reachable[to]);
    }
}

impl Default for AssetGraph {
    fn default() -> Self {
        Self::new()
    }
}
