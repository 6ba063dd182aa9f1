//! Worker farm (C4): runs the load→parse→collect→transform→generate pipeline for a single
//! asset off the calling thread.
//!
//! The teacher's daemon farms work out to OS processes over an IPC protocol; this engine's
//! farm contract is purely functional — `(path, variant, options) -> ProcessedResult` with
//! no shared mutable state — so a `rayon` thread pool is sufficient isolation without the
//! process-boundary machinery. A crashed job (panic) is retried once before surfacing
//! [`BundleError::WorkerCrashed`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};

use super::asset::{AssetVariant, DependencyRecord, ProcessedResult};
use crate::error::BundleError;

pub struct WorkerFarm {
    pool: ThreadPool,
    closed: std::sync::atomic::AtomicBool,
}

impl WorkerFarm {
    /// # Panics
    /// Panics if the underlying thread pool fails to build, which only happens under
    /// resource exhaustion.
    #[must_use]
    pub fn new(num_threads: usize) -> Self {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("heddle-worker-{i}"))
            .build()
            .expect("failed to build worker pool");
        Self {
            pool,
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Run a single asset through its variant's pipeline. Retries once on panic before
    /// surfacing [`BundleError::WorkerCrashed`].
    pub fn run(
        &self,
        path: &Path,
        variant: Arc<dyn AssetVariant>,
    ) -> Result<ProcessedResult, BundleError> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(BundleError::FarmClosed);
        }
        let path = path.to_path_buf();
        for _attempt in 0..2 {
            match self.run_once(&path, Arc::clone(&variant)) {
                Ok(result) => return Ok(result),
                Err(JobFailure::Crashed) => continue,
                Err(JobFailure::Err(e)) => return Err(e),
            }
        }
        Err(BundleError::WorkerCrashed { path })
    }

    fn run_once(
        &self,
        path: &PathBuf,
        variant: Arc<dyn AssetVariant>,
    ) -> Result<ProcessedResult, JobFailure> {
        self.pool.install(|| {
            let outcome = catch_unwind(AssertUnwindSafe(|| process(path, variant.as_ref())));
            match outcome {
                Ok(result) => result.map_err(JobFailure::Err),
                Err(_) => Err(JobFailure::Crashed),
            }
        })
    }

    /// Shuts the farm down; subsequent `run` calls fail with [`BundleError::FarmClosed`].
    pub fn end(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

enum JobFailure {
    Crashed,
    Err(BundleError),
}

fn process(path: &Path, variant: &dyn AssetVariant) -> Result<ProcessedResult, BundleError> {
    let contents = variant
        .load(path)
        .map_err(|e| BundleError::io_failed(path, "load", e))?;

    let dependencies: Vec<DependencyRecord> = if variant.might_have_dependencies(&contents) {
        variant.collect_dependencies(path, &contents)
    } else {
        Vec::new()
    };

    let generated = variant.generate(path, &contents, &dependencies);
    let hash = heddle_util::hash::blake3_bytes(&contents);

    Ok(ProcessedResult {
        generated,
        hash,
        dependencies,
    })
}
