//! Build orchestration.
//!
//! The orchestrator turns a resolution plan into an install tree and drives
//! a build target's external command sequence against it:
//!
//! 1. fetch every planned archive through the installable cache,
//! 2. extract each archive under the install prefix in plan order
//!    (idempotently; a marker per node makes reruns no-ops),
//! 3. run the configure/build/install steps strictly in order with the
//!    constructed environment,
//! 4. collect the declared output directories for the archiver.
//!
//! One orchestrator instance owns one install prefix. It is not re-entrant
//! on that prefix: concurrent builds of different targets belong in
//! separate instances with separate prefixes.

pub mod env;
mod step;
pub mod types;

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::cache::InstallCache;
use crate::manifest::{BuildTarget, PackageManifest, TargetSelection};
use crate::resolve::ResolutionPlan;

pub use types::{
  BuildError, BuildOptions, BuildOutput, CancelHandle, CancelToken, InstallTree, InstalledNode, OutputDir, StepLog,
  cancel_pair,
};

use types::InstallMarker;

/// Drives dependency materialization and external build commands for one
/// (platform, configuration) target.
pub struct Orchestrator {
  cache: InstallCache,
  options: BuildOptions,
}

impl Orchestrator {
  pub fn new(cache: InstallCache, options: BuildOptions) -> Self {
    Orchestrator { cache, options }
  }

  pub fn options(&self) -> &BuildOptions {
    &self.options
  }

  /// Materialize the install tree for `plan` under the configured prefix.
  ///
  /// Nodes are processed in plan order so later (more dependent) nodes may
  /// overlay earlier ones. A node whose marker is already present is left
  /// untouched; a cache entry that disappeared since resolution is simply
  /// refetched.
  pub async fn materialize(&self, plan: &ResolutionPlan, token: Option<&str>) -> Result<InstallTree, BuildError> {
    let prefix = &self.options.install_prefix;
    let marker_dir = prefix.join(".crank").join("installed");
    tokio::fs::create_dir_all(&marker_dir).await?;

    let mut nodes = Vec::new();
    for node in plan.installables() {
      let Some(archive) = &node.archive else {
        continue;
      };

      let dest = if node.install_subpath.is_empty() {
        prefix.clone()
      } else {
        prefix.join(&node.install_subpath)
      };
      let marker_path = marker_dir.join(format!("{}-{}.json", node.name, archive.hash.short()));

      if tokio::fs::try_exists(&marker_path).await.unwrap_or(false) {
        debug!(package = %node.name, hash = %archive.hash.short(), "already installed");
        nodes.push(InstalledNode {
          name: node.name.clone(),
          version: node.version.clone(),
          hash: archive.hash.clone(),
          root: dest,
          freshly_extracted: false,
        });
        continue;
      }

      let entry = self.cache.fetch_or_reuse(archive, token).await?;
      crate::archive::unpack_archive(&entry.path, &dest).map_err(|source| BuildError::Extraction {
        package: node.name.clone(),
        source,
      })?;

      let marker = InstallMarker {
        name: node.name.clone(),
        version: node.version.clone(),
        hash: archive.hash.clone(),
        installed_at_unix: SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
      };
      let json = serde_json::to_vec_pretty(&marker).map_err(std::io::Error::other)?;
      tokio::fs::write(&marker_path, json).await?;

      info!(package = %node.name, version = %node.version, dest = %dest.display(), "installed dependency");
      nodes.push(InstalledNode {
        name: node.name.clone(),
        version: node.version.clone(),
        hash: archive.hash.clone(),
        root: dest,
        freshly_extracted: true,
      });
    }

    Ok(InstallTree {
      prefix: prefix.clone(),
      nodes,
    })
  }

  /// Run a build target's command sequence against a materialized tree.
  pub async fn run_target(
    &self,
    manifest: &PackageManifest,
    target: &BuildTarget,
    tree: &InstallTree,
    cancel: &mut CancelToken,
  ) -> Result<BuildOutput, BuildError> {
    let build_id = self.options.effective_build_id();
    let environment = env::build_env(&self.options, tree, &build_id);
    let cwd = self.working_dir(manifest);
    tokio::fs::create_dir_all(&cwd).await?;

    info!(
      package = %manifest.package.name,
      target = %self.options.target,
      build_dir = %cwd.display(),
      "starting build"
    );

    let mut steps = Vec::new();
    for (index, (kind, executable)) in target.steps().into_iter().enumerate() {
      let log = step::run_step(index, kind, executable, &environment, &cwd, cancel).await?;
      steps.push(log);
    }

    let mut outputs = Vec::new();
    for rel in &target.outputs {
      let abs = cwd.join(rel);
      if !abs.is_dir() {
        return Err(BuildError::MissingOutput { path: abs });
      }
      outputs.push(OutputDir {
        rel: rel.clone(),
        abs,
      });
    }

    info!(package = %manifest.package.name, steps = steps.len(), outputs = outputs.len(), "build complete");
    Ok(BuildOutput {
      package: manifest.package.clone(),
      target: self.options.target.clone(),
      build_id,
      outputs,
      steps,
    })
  }

  /// Full pipeline: fetch, materialize, then run the manifest's build target
  /// for the configured (platform, configuration).
  pub async fn build(
    &self,
    manifest: &PackageManifest,
    plan: &ResolutionPlan,
    token: Option<&str>,
    cancel: &mut CancelToken,
  ) -> Result<BuildOutput, BuildError> {
    let target = match manifest.select_target(&self.options.target) {
      TargetSelection::Selected(target) => target,
      TargetSelection::NotApplicable => {
        return Err(BuildError::NotApplicable {
          package: manifest.package.name.clone(),
          platform: self.options.target.platform,
          configuration: self.options.target.configuration.clone(),
        });
      }
    };

    // Warm the cache concurrently before the strictly ordered extraction.
    self.cache.fetch_all(plan, token).await?;
    let tree = self.materialize(plan, token).await?;
    self.run_target(manifest, target, &tree, cancel).await
  }

  fn working_dir(&self, manifest: &PackageManifest) -> PathBuf {
    self
      .options
      .working_dir
      .clone()
      .or_else(|| manifest.build_directory(self.options.target.platform))
      .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
  }
}
