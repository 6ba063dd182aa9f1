//! Packaging (§4.7): turns one [`Bundle`](super::bundle_tree::Bundle)'s asset set into the
//! bytes written to disk.
//!
//! `Packager` is an external interface so a caller can swap in a real JS/CSS concatenation
//! strategy (module wrapping, source maps, minification) without touching bundle-tree
//! construction. [`ConcatPackager`] is the default: assets are concatenated in dependency
//! order behind a `__register`/`__require` runtime stub, enough to prove bundle membership
//! and ordering without a real codegen backend.

use super::asset::AssetId;
use super::bundle_tree::{Bundle, BundleTree};
use super::graph::AssetGraph;
use crate::error::BundleError;

pub trait Packager: Send + Sync {
    fn package(
        &self,
        bundle: &Bundle,
        tree: &BundleTree,
        graph: &AssetGraph,
    ) -> Result<Vec<u8>, BundleError>;

    /// The file extension / subdirectory a bundle of this type is written under.
    fn output_extension(&self, bundle_type: &str) -> String {
        bundle_type.to_string()
    }
}

/// Concatenates every asset's generated output for the bundle's type, each wrapped in a
/// `__register(path, fn)` call, followed by a `__require(entry)` call for the bundle's
/// entry asset.
pub struct ConcatPackager;

impl Packager for ConcatPackager {
    fn package(
        &self,
        bundle: &Bundle,
        tree: &BundleTree,
        graph: &AssetGraph,
    ) -> Result<Vec<u8>, BundleError> {
        let mut out = String::new();
        out.push_str(RUNTIME_PRELUDE);

        let mut ordered: Vec<AssetId> = bundle.assets.iter().copied().collect();
        ordered.sort_unstable();

        for id in ordered {
            let asset = graph.get(id);
            // The bundle-tree invariant (every asset in a bundle emits that bundle's
            // type, routed through sibling bundles otherwise) guarantees this lookup
            // succeeds; skip defensively rather than panic if it's ever violated.
            let Some(body) = asset.generated.get(&bundle.bundle_type) else {
                continue;
            };
            out.push_str(&format!(
                "__register({:?}, function(module, exports, require) {{\n",
                asset.path.to_string_lossy()
            ));
            out.push_str(&String::from_utf8_lossy(body));
            out.push_str("\n});\n");
        }

        let entry_path = graph.get(bundle.entry_asset).path.to_string_lossy().to_string();
        out.push_str(&format!("__require({entry_path:?});\n"));

        for &child in &bundle.children {
            let _ = tree.get(child);
        }

        Ok(out.into_bytes())
    }
}

const RUNTIME_PRELUDE: &str = "var __modules = {};\nfunction __register(id, fn) { __modules[id] = fn; }\nfunction __require(id) { var m = { exports: {} }; __modules[id](m, m.exports, __require); return m.exports; }\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::asset::Package;

    #[test]
    fn packages_entry_and_dependency_in_order() {
        let mut graph = AssetGraph::new();
        let a = graph.resolve_asset(std::path::Path::new("a.js"), Package::default());
        graph
            .get_mut(a)
            .generated
            .insert("js".into(), b"console.log('a')".to_vec());

        let mut tree = BundleTree::new();
        tree.build(&mut graph, &[a]);
        let bundle = tree.get(tree.roots[0]);

        let bytes = ConcatPackager.package(bundle, &tree, &graph).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("__register"));
        assert!(text.contains("console.log('a')"));
        assert!(text.contains("__require"));
    }
}
