//! `heddle build` command implementation.
//!
//! Runs one bundle pass and writes the resulting bundles to `out_dir`.

use std::path::PathBuf;
use std::time::Instant;

use heddle_core::bundler::{BundleOptions, Bundler};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub entry: PathBuf,
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub minify: bool,
    pub cache: bool,
}

#[derive(Serialize)]
struct BuildResultJson {
    ok: bool,
    entry: String,
    out_dir: String,
    bundles: Vec<String>,
    asset_count: usize,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Run the build command.
pub fn run(action: BuildAction, json: bool) -> Result<()> {
    let start = Instant::now();

    let options = BundleOptions::new(&action.entry)
        .with_cwd(&action.cwd)
        .with_out_dir(&action.out_dir)
        .with_minify(action.minify);
    let mut options = options;
    options.cache = action.cache;

    let mut bundler = Bundler::new(options);
    let result = bundler.bundle();

    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(bundle_result) => {
            if json {
                let payload = BuildResultJson {
                    ok: true,
                    entry: action.entry.display().to_string(),
                    out_dir: action.out_dir.display().to_string(),
                    bundles: bundle_result
                        .bundles
                        .iter()
                        .map(|b| b.path.display().to_string())
                        .collect(),
                    asset_count: bundle_result.asset_count,
                    duration_ms,
                    error: None,
                };
                println!("{}", serde_json::to_string(&payload).into_diagnostic()?);
            } else {
                for bundle in &bundle_result.bundles {
                    println!(
                        "  {} -> {} ({} assets)",
                        action.entry.display(),
                        bundle.path.display(),
                        bundle.asset_paths.len()
                    );
                }
                println!(
                    "{} bundles, {} assets, {}ms",
                    bundle_result.bundles.len(),
                    bundle_result.asset_count,
                    duration_ms
                );
                for warning in &bundle_result.warnings {
                    eprintln!("  warning: {warning}");
                }
            }
            Ok(())
        }
        Err(e) => {
            if json {
                let payload = BuildResultJson {
                    ok: false,
                    entry: action.entry.display().to_string(),
                    out_dir: action.out_dir.display().to_string(),
                    bundles: Vec::new(),
                    asset_count: 0,
                    duration_ms,
                    error: Some(e.to_string()),
                };
                println!("{}", serde_json::to_string(&payload).into_diagnostic()?);
            } else {
                eprintln!("error: {e}");
            }
            std::process::exit(1);
        }
    }
}
