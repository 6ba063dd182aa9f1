//! Asset: a single source file plus its processing state within the dependency graph.
//!
//! Variants (script, stylesheet, markup, binary, …) share the capability set defined by
//! [`AssetVariant`]. The real per-language variants are external collaborators; this crate
//! ships [`StubVariant`] (plain-text `require`/`import` scanning) and [`BinaryVariant`] (the
//! parser registry's fallback for unregistered extensions) so the pipeline is runnable and
//! testable standalone.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Arena index into the graph's asset vector.
pub type AssetId = usize;

/// Arena index into the bundle tree's bundle vector.
pub type BundleId = usize;

/// Processing state of an asset, replacing a raw `processed` boolean so that
/// in-flight (`InProgress`) and not-yet-started (`NotStarted`) are distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    NotStarted,
    InProgress,
    Done,
}

/// A dependency edge recorded during `collectDependencies`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRecord {
    /// The specifier as written in source (e.g. `./foo.js`).
    pub name: String,
    /// Marks a split point: a new child bundle is created for the resolved asset.
    pub dynamic: bool,
    /// The resolved asset's content is already inlined into the parent's output.
    pub included_in_parent: bool,
    /// Source location, used for error code-frames when resolution fails.
    pub loc: Option<(u32, u32)>,
    /// Whether a URL-shaped reference should act as a bundle boundary.
    ///
    /// Defaults to `true`, preserving `addURLDependency`'s original behavior for
    /// emitted binary assets (fonts, images). A markup variant may set this `false`
    /// for `<script>`/`<link>` edges that should join the existing bundle graph
    /// instead of splitting into a synthetic one-asset bundle.
    pub url_is_asset_boundary: bool,
}

impl DependencyRecord {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dynamic: false,
            included_in_parent: false,
            loc: None,
            url_is_asset_boundary: true,
        }
    }

    #[must_use]
    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    #[must_use]
    pub fn included_in_parent(mut self, included: bool) -> Self {
        self.included_in_parent = included;
        self
    }

    #[must_use]
    pub fn at(mut self, loc: (u32, u32)) -> Self {
        self.loc = Some(loc);
        self
    }
}

/// The pure output of running an asset through load→parse→collect→transform→generate.
#[derive(Debug, Clone, Default)]
pub struct ProcessedResult {
    pub generated: BTreeMap<String, Vec<u8>>,
    pub hash: String,
    pub dependencies: Vec<DependencyRecord>,
}

/// Opaque package handle supplied by the resolver, passed through to transforms.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub root: Option<PathBuf>,
}

/// One source file in the dependency graph.
pub struct Asset {
    pub id: AssetId,
    pub path: PathBuf,
    pub asset_type: String,
    pub state: AssetState,
    pub contents: Option<Vec<u8>>,
    pub generated: BTreeMap<String, Vec<u8>>,
    pub hash: Option<String>,
    /// Insertion-ordered: specifier -> dependency metadata.
    pub dependencies: Vec<(String, DependencyRecord)>,
    /// Parallel mapping: specifier -> resolved child asset.
    pub dep_assets: Vec<(String, AssetId)>,
    pub parent_bundle: Option<BundleId>,
    pub bundles: Vec<BundleId>,
    pub parent_deps: Vec<DependencyRecord>,
    pub package: Package,
}

impl Asset {
    #[must_use]
    pub fn new(id: AssetId, path: PathBuf, package: Package) -> Self {
        let asset_type = extension_of(&path);
        Self {
            id,
            path,
            asset_type,
            state: AssetState::NotStarted,
            contents: None,
            generated: BTreeMap::new(),
            hash: None,
            dependencies: Vec::new(),
            dep_assets: Vec::new(),
            parent_bundle: None,
            bundles: Vec::new(),
            parent_deps: Vec::new(),
            package,
        }
    }

    /// Clears contents, generated output, hash and dependency state, resetting to `NotStarted`.
    pub fn invalidate(&mut self) {
        self.contents = None;
        self.generated.clear();
        self.hash = None;
        self.dependencies.clear();
        self.dep_assets.clear();
        self.state = AssetState::NotStarted;
    }

    /// Clears only bundle membership; called before every bundle-tree rebuild.
    pub fn invalidate_bundle(&mut self) {
        self.parent_bundle = None;
        self.bundles.clear();
        self.parent_deps.clear();
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == AssetState::Done
    }
}

#[must_use]
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Capability set shared by every asset variant.
///
/// Modeled as a trait with trait-object dispatch (`Box<dyn AssetVariant>`) rather than a
/// deep class hierarchy, since all variants sit at a single level (markup, stylesheet,
/// script, binary, …) with no further specialization.
pub trait AssetVariant: Send + Sync {
    /// Read the asset's raw contents from disk.
    fn load(&self, path: &Path) -> std::io::Result<Vec<u8>>;

    /// Fast pre-check: does this variant ever produce dependencies worth parsing for?
    fn might_have_dependencies(&self, contents: &[u8]) -> bool;

    /// Parse contents and collect dependency edges in source order.
    fn collect_dependencies(&self, path: &Path, contents: &[u8]) -> Vec<DependencyRecord>;

    /// Produce the generated output map for this asset.
    fn generate(
        &self,
        path: &Path,
        contents: &[u8],
        deps: &[DependencyRecord],
    ) -> BTreeMap<String, Vec<u8>>;
}

/// Scans plain text for `require("./x")` and `import("./x")` call-like patterns.
///
/// Stands in for the out-of-scope real per-language parsers: the import/require pattern
/// is enough to exercise the graph, cache, and bundle-tree logic end to end without a
/// real JavaScript or CSS parser.
pub struct StubVariant;

impl AssetVariant for StubVariant {
    fn load(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn might_have_dependencies(&self, contents: &[u8]) -> bool {
        let text = String::from_utf8_lossy(contents);
        text.contains("require(") || text.contains("import(")
    }

    fn collect_dependencies(&self, _path: &Path, contents: &[u8]) -> Vec<DependencyRecord> {
        let text = String::from_utf8_lossy(contents);
        scan_require_import(&text)
    }

    fn generate(
        &self,
        path: &Path,
        contents: &[u8],
        _deps: &[DependencyRecord],
    ) -> BTreeMap<String, Vec<u8>> {
        let mut out = BTreeMap::new();
        out.insert(extension_of(path), contents.to_vec());
        out
    }
}

/// Raw-binary fallback for unregistered extensions (spec §4.2): `generate()` emits the
/// contents under the asset's own extension plus a JS stub exporting the output filename.
pub struct BinaryVariant;

impl AssetVariant for BinaryVariant {
    fn load(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn might_have_dependencies(&self, _contents: &[u8]) -> bool {
        false
    }

    fn collect_dependencies(&self, _path: &Path, _contents: &[u8]) -> Vec<DependencyRecord> {
        Vec::new()
    }

    fn generate(
        &self,
        path: &Path,
        contents: &[u8],
        _deps: &[DependencyRecord],
    ) -> BTreeMap<String, Vec<u8>> {
        let ext = extension_of(path);
        let output_name = format!("{}.{ext}", heddle_util::hash::blake3_bytes(contents));
        let stub = format!("module.exports = {:?};", output_name);
        let mut out = BTreeMap::new();
        out.insert(ext, contents.to_vec());
        out.insert("js".to_string(), stub.into_bytes());
        out
    }
}

/// Whether `url` starts with a `scheme:` prefix (`^[a-zA-Z][a-zA-Z0-9+.-]*:`), per RFC 3986 —
/// covers `data:`, `mailto:`, `tel:`, and authority-bearing schemes like `https://` alike,
/// unlike a bare `contains("://")` check.
fn has_scheme(url: &str) -> bool {
    let mut chars = url.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    for (i, c) in chars {
        match c {
            ':' => return i > 0,
            c if c.is_ascii_alphanumeric() || c == '+' || c == '.' || c == '-' => {}
            _ => return false,
        }
    }
    false
}

fn scan_require_import(text: &str) -> Vec<DependencyRecord> {
    let mut deps = Vec::new();
    for (marker, dynamic) in [("require(", false), ("import(", true)] {
        let mut search_from = 0usize;
        while let Some(rel) = text[search_from..].find(marker) {
            let start = search_from + rel + marker.len();
            if let Some(spec) = extract_quoted(&text[start..]) {
                deps.push(DependencyRecord::new(spec).dynamic(dynamic));
            }
            search_from = start;
        }
    }
    deps
}

fn extract_quoted(s: &str) -> Option<String> {
    let s = s.trim_start();
    let quote = s.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let rest = &s[quote.len_utf8()..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

/// Resolves `addURLDependency`'s contract: pass absolute/scheme URLs through unchanged,
/// otherwise return the deterministic content-hash filename the referenced asset will be
/// emitted under (see SPEC_FULL.md §9 for the blake3-over-md5 substitution).
#[must_use]
pub fn add_url_dependency(url: &str, from: &Path) -> (String, Option<DependencyRecord>) {
    if url.is_empty() || has_scheme(url) {
        return (url.to_string(), None);
    }
    let dir = from.parent().unwrap_or_else(|| Path::new(""));
    let abs = dir.join(url);
    let ext = extension_of(&abs);
    let hash = heddle_util::hash::blake3_bytes(abs.to_string_lossy().as_bytes());
    let output_name = format!("{}.{ext}", &hash[..8]);
    let dep = DependencyRecord::new(url).dynamic(true);
    (output_name, Some(dep))
}
