use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the bundling engine.
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("could not resolve {specifier:?} from {importer}")]
    ResolveFailed {
        specifier: String,
        importer: PathBuf,
    },

    #[error("failed to parse {path} at {loc:?}")]
    ParseFailed {
        path: PathBuf,
        loc: Option<(u32, u32)>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("transform failed for {path}")]
    TransformFailed {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("worker crashed while processing {path}")]
    WorkerCrashed { path: PathBuf },

    #[error("IO error during {op} on {path}")]
    IoFailed {
        path: PathBuf,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot register {what} after bundling has started")]
    ConfigLocked { what: &'static str },

    #[error("worker farm is closed")]
    FarmClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BundleError {
    #[must_use]
    pub fn resolve_failed(specifier: impl Into<String>, importer: impl Into<PathBuf>) -> Self {
        Self::ResolveFailed {
            specifier: specifier.into(),
            importer: importer.into(),
        }
    }

    #[must_use]
    pub fn io_failed(path: impl Into<PathBuf>, op: &'static str, source: std::io::Error) -> Self {
        Self::IoFailed {
            path: path.into(),
            op,
            source,
        }
    }
}
