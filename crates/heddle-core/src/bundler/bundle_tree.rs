//! Bundle tree (C7): groups assets into output bundles along dynamic-import boundaries,
//! then hoists an asset to the lowest common ancestor of every bundle that needs it.
//!
//! Mirrors Parcel v1's `createBundleTree` / `findCommonAncestor` / `moveAssetToBundle`
//! procedures directly: `createBundleTree` walks the graph once, creating a child bundle
//! at every dynamic edge and routing each asset into the sibling bundle matching its own
//! type; an asset reached a second time (its `parentBundle` is already set) is hoisted in
//! place to the lowest common ancestor of its old and new bundle, rather than recursed
//! into again.

use rustc_hash::{FxHashMap, FxHashSet};

use super::asset::{AssetId, BundleId, DependencyRecord};
use super::graph::AssetGraph;

pub struct Bundle {
    pub id: BundleId,
    pub parent: Option<BundleId>,
    pub children: Vec<BundleId>,
    pub entry_asset: AssetId,
    pub assets: FxHashSet<AssetId>,
    pub bundle_type: String,
    /// Bundles produced alongside this one from the same entry but emitting a different
    /// output type, keyed by that type. Created on demand by `get_or_create_sibling`.
    pub sibling_bundles: FxHashMap<String, BundleId>,
}

/// Owns every [`Bundle`] produced for one bundle run, addressed by [`BundleId`].
pub struct BundleTree {
    bundles: Vec<Bundle>,
    pub roots: Vec<BundleId>,
}

impl BundleTree {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bundles: Vec::new(),
            roots: Vec::new(),
        }
    }

    #[must_use]
    pub fn get(&self, id: BundleId) -> &Bundle {
        &self.bundles[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bundle> {
        self.bundles.iter()
    }

    fn new_bundle(&mut self, parent: Option<BundleId>, entry: AssetId, bundle_type: String) -> BundleId {
        let id = self.bundles.len();
        let mut assets = FxHashSet::default();
        assets.insert(entry);
        self.bundles.push(Bundle {
            id,
            parent,
            children: Vec::new(),
            entry_asset: entry,
            assets,
            bundle_type,
            sibling_bundles: FxHashMap::default(),
        });
        if let Some(p) = parent {
            self.bundles[p].children.push(id);
        }
        id
    }

    /// Returns `bundle` itself if its type already matches `asset_type`, otherwise the
    /// sibling bundle of that type (created on first request), reciprocally linked with
    /// every other sibling in the same group so later lookups from any of them agree.
    fn get_or_create_sibling(&mut self, bundle: BundleId, asset_type: &str, asset: AssetId) -> BundleId {
        if self.bundles[bundle].bundle_type == asset_type {
            return bundle;
        }
        if let Some(&existing) = self.bundles[bundle].sibling_bundles.get(asset_type) {
            return existing;
        }

        let parent = self.bundles[bundle].parent;
        let new_id = self.bundles.len();
        self.bundles.push(Bundle {
            id: new_id,
            parent,
            children: Vec::new(),
            entry_asset: asset,
            assets: FxHashSet::default(),
            bundle_type: asset_type.to_string(),
            sibling_bundles: FxHashMap::default(),
        });

        let bundle_type = self.bundles[bundle].bundle_type.clone();
        let other_siblings: Vec<(String, BundleId)> = self.bundles[bundle]
            .sibling_bundles
            .iter()
            .map(|(k, &v)| (k.clone(), v))
            .collect();

        self.bundles[bundle].sibling_bundles.insert(asset_type.to_string(), new_id);
        self.bundles[new_id].sibling_bundles.insert(bundle_type, bundle);
        for (ty, sib_id) in other_siblings {
            self.bundles[new_id].sibling_bundles.insert(ty.clone(), sib_id);
            self.bundles[sib_id].sibling_bundles.insert(asset_type.to_string(), new_id);
        }

        new_id
    }

    /// Builds the tree for every entry asset, resetting any bundle assignment left over
    /// from a previous rebuild first (bundles are rebuilt from scratch every time).
    pub fn build(&mut self, graph: &mut AssetGraph, entries: &[AssetId]) {
        graph.clear_bundle_state();
        for &entry in entries {
            self.create_bundle_tree(graph, entry, None, None);
        }
    }

    /// `createBundleTree(asset, dep, bundle)`: records `dep`, hoists to the lowest common
    /// ancestor if `asset` was already assigned a bundle by an earlier call, otherwise
    /// routes `asset` into the right (possibly new, possibly sibling) bundle and recurses.
    fn create_bundle_tree(
        &mut self,
        graph: &mut AssetGraph,
        asset_id: AssetId,
        dep: Option<DependencyRecord>,
        bundle: Option<BundleId>,
    ) {
        if let Some(d) = dep.clone() {
            graph.get_mut(asset_id).parent_deps.push(d);
        }

        if let Some(existing) = graph.get(asset_id).parent_bundle {
            if let Some(current) = bundle {
                if existing != current {
                    let lca = self.find_common_ancestor(existing, current);
                    let existing_type = self.bundles[existing].bundle_type.clone();
                    let lca_type = self.bundles[lca].bundle_type.clone();
                    if existing != lca && existing_type == lca_type {
                        self.move_asset_to_bundle(graph, asset_id, lca);
                    }
                }
            }
            return;
        }

        let base_bundle = match bundle {
            Some(b) => b,
            None => {
                let bundle_type = graph.get(asset_id).asset_type.clone();
                let root = self.new_bundle(None, asset_id, bundle_type);
                self.roots.push(root);
                root
            }
        };

        let active_bundle = if dep.as_ref().is_some_and(|d| d.dynamic) {
            let child_type = graph.get(asset_id).asset_type.clone();
            self.new_bundle(Some(base_bundle), asset_id, child_type)
        } else {
            base_bundle
        };

        let asset_type = graph.get(asset_id).asset_type.clone();
        let sibling = self.get_or_create_sibling(active_bundle, &asset_type, asset_id);
        self.bundles[sibling].assets.insert(asset_id);
        graph.get_mut(asset_id).bundles.push(sibling);

        let active_type = self.bundles[active_bundle].bundle_type.clone();
        if sibling != active_bundle && graph.get(asset_id).generated.contains_key(&active_type) {
            self.bundles[active_bundle].assets.insert(asset_id);
            graph.get_mut(asset_id).bundles.push(active_bundle);
        }

        graph.get_mut(asset_id).parent_bundle = Some(active_bundle);

        let dep_assets = graph.get(asset_id).dep_assets.clone();
        for (name, child) in dep_assets {
            let dep_record = graph
                .get(asset_id)
                .dependencies
                .iter()
                .find(|(n, _)| n == &name)
                .map(|(_, d)| d.clone());
            self.create_bundle_tree(graph, child, dep_record, Some(active_bundle));
        }
    }

    /// `findCommonAncestor(a, b)`: walk `a`'s ancestor chain into a set, then walk `b`'s
    /// ancestors until one is in that set. Always succeeds — the bundle tree has a
    /// single root, which is an ancestor of every bundle.
    #[must_use]
    pub fn find_common_ancestor(&self, a: BundleId, b: BundleId) -> BundleId {
        let mut seen = FxHashSet::default();
        let mut current = Some(a);
        while let Some(id) = current {
            seen.insert(id);
            current = self.bundles[id].parent;
        }
        let mut current = Some(b);
        while let Some(id) = current {
            if seen.contains(&id) {
                return id;
            }
            current = self.bundles[id].parent;
        }
        unreachable!("bundle tree is rooted; ancestor chains always intersect")
    }

    /// `moveAssetToBundle(asset, target)`: for each bundle currently holding `asset`,
    /// remove it and re-add to `target`'s sibling bundle of the matching type, then
    /// recursively move every dependency whose `parentBundle` was the asset's old one.
    fn move_asset_to_bundle(&mut self, graph: &mut AssetGraph, asset: AssetId, target: BundleId) {
        let old_parent = graph.get(asset).parent_bundle;
        let old_bundles = graph.get(asset).bundles.clone();

        let mut new_bundles = Vec::new();
        for removed in old_bundles {
            self.bundles[removed].assets.remove(&asset);
            let removed_type = self.bundles[removed].bundle_type.clone();
            let sibling = self.get_or_create_sibling(target, &removed_type, asset);
            self.bundles[sibling].assets.insert(asset);
            new_bundles.push(sibling);
        }
        graph.get_mut(asset).bundles = new_bundles;
        graph.get_mut(asset).parent_bundle = Some(target);

        if let Some(old_parent) = old_parent {
            let dep_assets = graph.get(asset).dep_assets.clone();
            for (_, child) in dep_assets {
                if graph.get(child).parent_bundle == Some(old_parent) {
                    self.move_asset_to_bundle(graph, child, target);
                }
            }
        }
    }
}

impl Default for BundleTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::asset::{DependencyRecord, Package};

    fn wire(graph: &mut AssetGraph, from: AssetId, name: &str, to: AssetId, dynamic: bool) {
        let dep = DependencyRecord::new(name).dynamic(dynamic);
        graph.get_mut(from).dependencies.push((name.to_string(), dep.clone()));
        graph.get_mut(from).dep_assets.push((name.to_string(), to));
    }

    #[test]
    fn static_deps_join_the_parent_bundle() {
        let mut graph = AssetGraph::new();
        let a = graph.resolve_asset(std::path::Path::new("a.js"), Package::default());
        let b = graph.resolve_asset(std::path::Path::new("b.js"), Package::default());
        wire(&mut graph, a, "./b.js", b, false);

        let mut tree = BundleTree::new();
        tree.build(&mut graph, &[a]);

        assert_eq!(tree.roots.len(), 1);
        let root = tree.get(tree.roots[0]);
        assert!(root.assets.contains(&a));
        assert!(root.assets.contains(&b));
    }

    #[test]
    fn dynamic_import_creates_a_child_bundle() {
        let mut graph = AssetGraph::new();
        let a = graph.resolve_asset(std::path::Path::new("a.js"), Package::default());
        let b = graph.resolve_asset(std::path::Path::new("b.js"), Package::default());
        wire(&mut graph, a, "./b.js", b, true);

        let mut tree = BundleTree::new();
        tree.build(&mut graph, &[a]);

        let root = tree.get(tree.roots[0]);
        assert_eq!(root.children.len(), 1);
        let child = tree.get(root.children[0]);
        assert!(child.assets.contains(&b));
        assert!(!root.assets.contains(&b));
    }

    #[test]
    fn asset_shared_by_two_dynamic_bundles_is_hoisted_to_the_common_ancestor() {
        let mut graph = AssetGraph::new();
        let a = graph.resolve_asset(std::path::Path::new("a.js"), Package::default());
        let x = graph.resolve_asset(std::path::Path::new("x.js"), Package::default());
        let y = graph.resolve_asset(std::path::Path::new("y.js"), Package::default());
        let shared = graph.resolve_asset(std::path::Path::new("shared.js"), Package::default());
        wire(&mut graph, a, "./x.js", x, true);
        wire(&mut graph, a, "./y.js", y, true);
        wire(&mut graph, x, "./shared.js", shared, false);
        wire(&mut graph, y, "./shared.js", shared, false);

        let mut tree = BundleTree::new();
        tree.build(&mut graph, &[a]);

        let root_id = tree.roots[0];
        let root = tree.get(root_id);
        assert!(root.assets.contains(&shared));
        for &child_id in &root.children.clone() {
            assert!(!tree.get(child_id).assets.contains(&shared));
        }
    }

    /// root --dynamic--> b --dynamic--> {c, d}, c and d both statically require shared.js.
    /// The true LCA is `b`, not the root: a buggy `find_common_ancestor` that always
    /// returns the root would leave `shared` wrongly hoisted all the way up.
    #[test]
    fn shared_asset_under_a_nested_dynamic_bundle_hoists_to_the_nested_ancestor_not_the_root() {
        let mut graph = AssetGraph::new();
        let root = graph.resolve_asset(std::path::Path::new("root.js"), Package::default());
        let b = graph.resolve_asset(std::path::Path::new("b.js"), Package::default());
        let c = graph.resolve_asset(std::path::Path::new("c.js"), Package::default());
        let d = graph.resolve_asset(std::path::Path::new("d.js"), Package::default());
        let shared = graph.resolve_asset(std::path::Path::new("shared.js"), Package::default());
        wire(&mut graph, root, "./b.js", b, true);
        wire(&mut graph, b, "./c.js", c, true);
        wire(&mut graph, b, "./d.js", d, true);
        wire(&mut graph, c, "./shared.js", shared, false);
        wire(&mut graph, d, "./shared.js", shared, false);

        let mut tree = BundleTree::new();
        tree.build(&mut graph, &[root]);

        let root_bundle = tree.get(tree.roots[0]);
        assert!(!root_bundle.assets.contains(&shared), "must not hoist past the nested ancestor");

        let b_bundle_id = root_bundle.children[0];
        let b_bundle = tree.get(b_bundle_id);
        assert!(b_bundle.assets.contains(&shared), "shared.js should land in b's bundle, the true LCA");
        for &grandchild in &b_bundle.children.clone() {
            assert!(!tree.get(grandchild).assets.contains(&shared));
        }
    }

    #[test]
    fn asset_of_a_different_type_joins_a_sibling_bundle() {
        let mut graph = AssetGraph::new();
        let entry = graph.resolve_asset(std::path::Path::new("index.js"), Package::default());
        let style = graph.resolve_asset(std::path::Path::new("style.css"), Package::default());
        wire(&mut graph, entry, "./style.css", style, false);

        let mut tree = BundleTree::new();
        tree.build(&mut graph, &[entry]);

        let root_id = tree.roots[0];
        let root = tree.get(root_id);
        assert_eq!(root.bundle_type, "js");
        assert!(!root.assets.contains(&style));

        let css_sibling_id = *root.sibling_bundles.get("css").expect("css sibling bundle created");
        let css_sibling = tree.get(css_sibling_id);
        assert!(css_sibling.assets.contains(&style));
        assert_eq!(css_sibling.parent, root.parent);
    }

    #[test]
    fn hoisting_refuses_to_cross_a_type_mismatch() {
        // root (js) dynamically imports a css entry and a js entry; both statically
        // require a shared html fragment. The css entry's own bundle type ("css") differs
        // from the LCA's type (root, "js"), so per the tie-break the asset must stay put
        // in the bundle it first landed in rather than hoist up to the mismatched LCA.
        let mut graph = AssetGraph::new();
        let root = graph.resolve_asset(std::path::Path::new("root.js"), Package::default());
        let css_entry = graph.resolve_asset(std::path::Path::new("style.css"), Package::default());
        let js_entry = graph.resolve_asset(std::path::Path::new("other.js"), Package::default());
        let shared = graph.resolve_asset(std::path::Path::new("shared.html"), Package::default());
        wire(&mut graph, root, "./style.css", css_entry, true);
        wire(&mut graph, root, "./other.js", js_entry, true);
        wire(&mut graph, css_entry, "./shared.html", shared, false);
        wire(&mut graph, js_entry, "./shared.html", shared, false);

        let mut tree = BundleTree::new();
        tree.build(&mut graph, &[root]);

        let root_bundle = tree.get(tree.roots[0]);
        let css_bundle_id = *root_bundle
            .children
            .iter()
            .find(|&&c| tree.get(c).bundle_type == "css")
            .expect("css dynamic bundle created");
        let js_bundle_id = *root_bundle
            .children
            .iter()
            .find(|&&c| tree.get(c).bundle_type == "js")
            .expect("js dynamic bundle created");

        let html_sibling_id = *tree
            .get(css_bundle_id)
            .sibling_bundles
            .get("html")
            .expect("shared.html lands in a sibling of the css bundle it first appeared under");
        assert!(tree.get(html_sibling_id).assets.contains(&shared));

        assert!(
            !tree.get(js_bundle_id).sibling_bundles.contains_key("html"),
            "mismatched-type hoist must not reach the js branch at all"
        );
    }
}
