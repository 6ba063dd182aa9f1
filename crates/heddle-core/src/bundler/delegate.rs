//! Delegate: the caller-supplied hook for dependencies that aren't visible to
//! `collectDependencies` — injected entry points, framework-generated imports, and the
//! like.
//!
//! Given a no-op default, most callers never need to implement this.

use super::asset::{Asset, DependencyRecord};

pub trait Delegate: Send + Sync {
    fn implicit_dependencies(&self, asset: &Asset) -> Vec<DependencyRecord> {
        let _ = asset;
        Vec::new()
    }
}

/// The default delegate: contributes no implicit dependencies.
pub struct NoopDelegate;

impl Delegate for NoopDelegate {}
