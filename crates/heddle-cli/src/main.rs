#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]

mod commands;
mod logging;

use std::path::PathBuf;

use clap::Parser;
use heddle_core::Config;
use miette::{IntoDiagnostic, Result};

#[derive(Parser, Debug)]
#[command(name = "heddle")]
#[command(author, version, about = "A multi-language application bundler", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Bundle an entry file and its dependency graph
    Build {
        /// Entry point file
        entry: PathBuf,

        /// Output directory
        #[arg(long, short = 'o', default_value = "dist")]
        out_dir: PathBuf,

        /// Minify generated output
        #[arg(long)]
        minify: bool,

        /// Bypass the content-addressed cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Start the dev server: bundle, watch, and live-reload on change
    Dev {
        /// Entry point file
        entry: PathBuf,

        /// Output directory written on every rebuild
        #[arg(long, short = 'o', default_value = ".heddle-dev")]
        out_dir: PathBuf,

        /// Port to listen on
        #[arg(long, default_value_t = 1234)]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Open the default browser once the server is up
        #[arg(long)]
        open: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    if let Some(Commands::Build {
        entry,
        out_dir,
        minify,
        no_cache,
    }) = &cli.command
    {
        let action = commands::build::BuildAction {
            entry: entry.clone(),
            cwd: cwd.clone(),
            out_dir: out_dir.clone(),
            minify: *minify,
            cache: !no_cache,
        };
        return commands::build::run(action, cli.json);
    }

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Build { .. }) => unreachable!("handled above"),
        Some(Commands::Dev {
            entry,
            out_dir,
            port,
            host,
            open,
        }) => {
            let action = commands::dev::DevAction {
                entry,
                cwd: cwd.clone(),
                out_dir,
                port,
                host,
                open,
            };
            let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
            runtime.block_on(commands::dev::run(action))
        }
    }
}
