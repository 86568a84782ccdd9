//! facetgen CLI
//!
//! Commands:
//!   generate   - Emit Rust for facet declarations
//!   check      - Resolve every declaration and report faults
//!   inspect    - Show a resolved facet model
//!   projection - Show the projection tree of a facet
//!   convert    - Run the eager conversion over JSON data
//!   flatten    - Run a flatten routine over JSON data
//!   schema     - Print the JSON schema of the manifest format

mod cli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
const LOG_ENV: &str = "FACETGEN_LOG";

#[derive(Parser)]
#[command(name = "facetgen")]
#[command(version, about = "Declarative facet synthesis")]
struct Cli {
    /// Project config (defaults to ./facetgen.yaml when present)
    #[arg(long, global = true, env = "FACETGEN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Emit Rust for every declaration (or one) in a manifest
    Generate {
        manifest: PathBuf,
        /// Only this facet
        #[arg(long)]
        facet: Option<String>,
        /// Output directory (overrides the config)
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Print to stdout instead of writing files
        #[arg(long, conflicts_with = "output")]
        stdout: bool,
        /// Skip prettyplease
        #[arg(long)]
        no_format: bool,
    },

    /// Resolve every declaration and report faults
    Check {
        manifest: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Show the resolved model of a facet
    Inspect {
        manifest: PathBuf,
        #[arg(long)]
        facet: String,
        #[arg(long)]
        json: bool,
    },

    /// Show the projection tree of a facet
    Projection {
        manifest: PathBuf,
        #[arg(long)]
        facet: String,
        /// Print the tree as Rust builder calls
        #[arg(long)]
        rust: bool,
    },

    /// Convert JSON source data through a facet
    Convert {
        manifest: PathBuf,
        #[arg(long)]
        facet: String,
        /// JSON file holding one source object (or one facet with --reverse)
        #[arg(long)]
        input: PathBuf,
        /// Convert a facet back into its source type
        #[arg(long)]
        reverse: bool,
    },

    /// Produce flat rows from JSON source data
    Flatten {
        manifest: PathBuf,
        #[arg(long)]
        facet: String,
        /// Flatten declaration (row type) name
        #[arg(long)]
        plan: String,
        #[arg(long)]
        input: PathBuf,
    },

    /// Print the JSON schema of the manifest or config format
    Schema {
        #[arg(default_value = "manifest")]
        name: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Generate {
            manifest,
            facet,
            output,
            stdout,
            no_format,
        } => cli::cmd_generate(&cli::GenerateArgs {
            manifest,
            facet,
            output,
            stdout,
            no_format,
            config: cli.config,
        }),
        Command::Check { manifest, json } => cli::cmd_check(&manifest, json, cli.config.as_deref()),
        Command::Inspect {
            manifest,
            facet,
            json,
        } => cli::cmd_inspect(&manifest, &facet, json, cli.config.as_deref()),
        Command::Projection {
            manifest,
            facet,
            rust,
        } => cli::cmd_projection(&manifest, &facet, rust, cli.config.as_deref()),
        Command::Convert {
            manifest,
            facet,
            input,
            reverse,
        } => cli::cmd_convert(&manifest, &facet, &input, reverse, cli.config.as_deref()),
        Command::Flatten {
            manifest,
            facet,
            plan,
            input,
        } => cli::cmd_flatten(&manifest, &facet, &plan, &input, cli.config.as_deref()),
        Command::Schema { name } => cli::cmd_schema(&name),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}
