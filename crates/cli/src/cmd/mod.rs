//! Subcommand implementations.

mod build;
mod install;
mod package;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use crank_lib::build::BuildOptions;
use crank_lib::cache::{CacheConfig, InstallCache};
use crank_lib::manifest::{Configuration, PackageManifest, Platform, TargetKey};
use crank_lib::resolve::{ResolutionPlan, TableSource};
use tracing::info;

pub use build::build;
pub use install::install;
pub use package::package;

use crate::TargetArgs;

/// Parse a `key=value` provenance flag.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
  match s.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
    _ => Err(format!("expected key=value, got '{s}'")),
  }
}

/// Everything a subcommand needs after the manifest is loaded and resolved.
pub(crate) struct Session {
  pub manifest: PackageManifest,
  pub plan: ResolutionPlan,
  pub cache: InstallCache,
  pub target: TargetKey,
  pub prefix: PathBuf,
  pub auth_token: Option<String>,
}

pub(crate) fn open_session(args: &TargetArgs) -> Result<Session> {
  let manifest =
    PackageManifest::from_file(&args.manifest).with_context(|| format!("loading {}", args.manifest.display()))?;

  let platform = match &args.platform {
    Some(name) => name.parse::<Platform>()?,
    None => Platform::current(),
  };
  let configuration = match &args.configuration {
    Some(name) => Configuration::new(name.clone()),
    None => match manifest.default_configurations(platform).first() {
      Some(name) => (*name).clone(),
      None => bail!(
        "no --configuration given and '{}' marks no default configuration for {platform}",
        manifest.package.name
      ),
    },
  };
  let target = TargetKey {
    platform,
    configuration,
  };

  let plan = crank_lib::resolve::resolve(&manifest, &target, &TableSource::new(&manifest))
    .with_context(|| format!("resolving dependencies for {target}"))?;
  info!(target = %target, packages = plan.len(), "resolved dependency plan");

  let mut config = CacheConfig::new(cache_root(args)?);
  if let Some(jobs) = args.jobs {
    config = config.with_concurrency(jobs);
  }

  Ok(Session {
    manifest,
    plan,
    cache: InstallCache::new(config),
    target,
    prefix: args.prefix.clone(),
    auth_token: args.auth_token.clone(),
  })
}

pub(crate) fn build_options(session: &Session, build_id: Option<String>) -> BuildOptions {
  let mut options = BuildOptions::new(session.target.clone(), &session.prefix);
  if let Some(build_id) = build_id {
    options = options.with_build_id(build_id);
  }
  options
}

fn cache_root(args: &TargetArgs) -> Result<PathBuf> {
  if let Some(cache) = &args.cache {
    return Ok(cache.clone());
  }
  if let Ok(cache) = std::env::var("CRANK_INSTALLABLE_CACHE") {
    return Ok(PathBuf::from(cache));
  }
  match dirs::cache_dir() {
    Some(dir) => Ok(dir.join("crank").join("installables")),
    None => bail!("no cache directory available; pass --cache"),
  }
}
