mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// crank - package-build orchestration
#[derive(Parser)]
#[command(name = "crank")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

/// Flags shared by every subcommand that resolves a manifest.
#[derive(clap::Args)]
struct TargetArgs {
  /// Path to the package manifest
  #[arg(short, long, default_value = "crank.toml")]
  manifest: PathBuf,

  /// Target platform (defaults to the current one)
  #[arg(short, long)]
  platform: Option<String>,

  /// Build configuration, e.g. "release"
  #[arg(short, long)]
  configuration: Option<String>,

  /// Install prefix the dependency tree is assembled under
  #[arg(long, default_value = "install")]
  prefix: PathBuf,

  /// Installable cache directory (default: CRANK_INSTALLABLE_CACHE or the
  /// user cache dir)
  #[arg(long)]
  cache: Option<PathBuf>,

  /// Maximum concurrent downloads
  #[arg(short, long)]
  jobs: Option<usize>,

  /// Bearer token for private archive sources
  #[arg(long, env = "CRANK_AUTH_TOKEN", hide_env_values = true)]
  auth_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve dependencies and assemble the install tree
  Install {
    #[command(flatten)]
    target: TargetArgs,
  },

  /// Install dependencies, then run the package's build commands
  Build {
    #[command(flatten)]
    target: TargetArgs,

    /// Build identifier stamped into the environment and archive name
    #[arg(long, env = "CRANK_BUILD_ID")]
    build_id: Option<String>,
  },

  /// Build, then pack outputs and dependency provenance into an archive
  Package {
    #[command(flatten)]
    target: TargetArgs,

    /// Build identifier stamped into the environment and archive name
    #[arg(long, env = "CRANK_BUILD_ID")]
    build_id: Option<String>,

    /// Directory the packed archive is written to
    #[arg(long, default_value = "dist")]
    dest: PathBuf,

    /// Provenance entries recorded in the archive metadata (repeatable)
    #[arg(long = "provenance", value_parser = cmd::parse_key_value)]
    provenance: Vec<(String, String)>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_filter = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
    .without_time()
    .init();

  match cli.command {
    Commands::Install { target } => cmd::install(target).await,
    Commands::Build { target, build_id } => cmd::build(target, build_id).await.map(|_| ()),
    Commands::Package {
      target,
      build_id,
      dest,
      provenance,
    } => cmd::package(target, build_id, dest, provenance).await,
  }
}
