//! Parser registry (C2): maps file extensions to [`AssetVariant`] implementations.
//!
//! Registration is only legal before bundling starts; attempting to register a new
//! extension afterwards is an error rather than a silent no-op, so a misbehaving
//! `Delegate` can't change how already-loaded assets would have been parsed.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::asset::{AssetVariant, BinaryVariant, StubVariant};
use crate::error::BundleError;

pub struct ParserRegistry {
    variants: FxHashMap<String, Arc<dyn AssetVariant>>,
    fallback: Arc<dyn AssetVariant>,
    locked: bool,
}

impl ParserRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut variants: FxHashMap<String, Arc<dyn AssetVariant>> = FxHashMap::default();
        let stub: Arc<dyn AssetVariant> = Arc::new(StubVariant);
        for ext in ["js", "jsx", "mjs", "cjs", "ts", "tsx", "css", "html", "htm", "json"] {
            variants.insert(ext.to_string(), Arc::clone(&stub));
        }
        Self {
            variants,
            fallback: Arc::new(BinaryVariant),
            locked: false,
        }
    }

    /// Registers a variant for an extension. Errors with [`BundleError::ConfigLocked`]
    /// once the first bundle run has started.
    pub fn register_extension(
        &mut self,
        ext: impl Into<String>,
        variant: Arc<dyn AssetVariant>,
    ) -> Result<(), BundleError> {
        if self.locked {
            return Err(BundleError::ConfigLocked {
                what: "asset variant",
            });
        }
        self.variants.insert(ext.into(), variant);
        Ok(())
    }

    /// Freezes the registry; called once by the coordinator when a bundle run begins.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    #[must_use]
    pub fn get(&self, ext: &str) -> Arc<dyn AssetVariant> {
        self.variants
            .get(ext)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// The registered extension set, sorted for deterministic fingerprinting.
    #[must_use]
    pub fn registered_extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.variants.keys().map(String::as_str).collect();
        exts.sort_unstable();
        exts
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_extension_falls_back_to_binary() {
        let registry = ParserRegistry::new();
        let variant = registry.get("wasm");
        assert!(!variant.might_have_dependencies(b"anything"));
    }

    #[test]
    fn registering_after_lock_is_an_error() {
        let mut registry = ParserRegistry::new();
        registry.lock();
        let err = registry
            .register_extension("svelte", Arc::new(StubVariant))
            .unwrap_err();
        assert!(matches!(err, BundleError::ConfigLocked { .. }));
    }
}
