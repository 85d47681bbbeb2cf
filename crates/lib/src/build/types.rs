//! Types for build orchestration: options, results, errors and cancellation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;

use crate::archive::UnpackError;
use crate::cache::FetchError;
use crate::manifest::{Configuration, PackageIdentity, Platform, StepKind, TargetKey};
use crate::util::hash::ContentHash;

/// Explicit configuration for one orchestrator instance.
///
/// One orchestrator serves one (platform, configuration) target and one
/// install prefix; concurrent builds of different targets get their own
/// instances with disjoint prefixes.
#[derive(Debug, Clone)]
pub struct BuildOptions {
  pub target: TargetKey,
  pub install_prefix: PathBuf,
  /// Overrides the manifest's declared build directory when set.
  pub working_dir: Option<PathBuf>,
  /// Identifier stamped into archive names and the build environment.
  pub build_id: Option<String>,
}

impl BuildOptions {
  pub fn new(target: TargetKey, install_prefix: impl Into<PathBuf>) -> Self {
    BuildOptions {
      target,
      install_prefix: install_prefix.into(),
      working_dir: None,
      build_id: None,
    }
  }

  pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
    self.working_dir = Some(working_dir.into());
    self
  }

  pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
    self.build_id = Some(build_id.into());
    self
  }

  /// The configured build id, or today's date when none was supplied. The
  /// date is rarely unique enough for release builds, hence the warning.
  pub fn effective_build_id(&self) -> String {
    match &self.build_id {
      Some(id) => id.clone(),
      None => {
        let id = chrono::Utc::now().format("%Y%m%d").to_string();
        warn!(build_id = %id, "no build id configured, falling back to the date");
        id
      }
    }
  }
}

/// One dependency materialized under the install prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledNode {
  pub name: String,
  pub version: String,
  pub hash: ContentHash,
  /// Absolute root of this package's files.
  pub root: PathBuf,
  /// Whether this run extracted the archive (false: marker already present).
  pub freshly_extracted: bool,
}

/// The install tree assembled from a resolution plan.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallTree {
  pub prefix: PathBuf,
  pub nodes: Vec<InstalledNode>,
}

impl InstallTree {
  pub fn node(&self, name: &str) -> Option<&InstalledNode> {
    self.nodes.iter().find(|node| node.name == name)
  }

  /// How many nodes this run actually extracted.
  pub fn extracted_count(&self) -> usize {
    self.nodes.iter().filter(|node| node.freshly_extracted).count()
  }
}

/// Marker recorded under `<prefix>/.crank/installed/` after an archive is
/// extracted; its presence makes re-materialization a no-op for that node.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct InstallMarker {
  pub name: String,
  pub version: String,
  pub hash: ContentHash,
  pub installed_at_unix: u64,
}

/// Captured output of one executed build step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepLog {
  pub kind: StepKind,
  pub command: String,
  pub stdout: String,
  pub stderr: String,
}

/// One declared output directory, by its manifest-relative name and its
/// absolute location on disk. The archiver reads from these locations; no
/// copies are made.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDir {
  pub rel: String,
  pub abs: PathBuf,
}

/// The result of a successful build run.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutput {
  pub package: PackageIdentity,
  pub target: TargetKey,
  pub build_id: String,
  pub outputs: Vec<OutputDir>,
  pub steps: Vec<StepLog>,
}

/// Errors from materialization and build execution.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The manifest declares no build target for the requested pair.
  #[error("package '{package}' declares no build target for {platform}/{configuration}")]
  NotApplicable {
    package: String,
    platform: Platform,
    configuration: Configuration,
  },

  #[error("failed to extract dependency '{package}': {source}")]
  Extraction {
    package: String,
    #[source]
    source: UnpackError,
  },

  /// An external build command exited non-zero. Carries the full captured
  /// output so the underlying tool's failure can be diagnosed without a
  /// rerun.
  #[error("{kind} step {index} failed with exit code {code:?}: {command}")]
  StepFailed {
    index: usize,
    kind: StepKind,
    command: String,
    code: Option<i32>,
    stdout: String,
    stderr: String,
  },

  /// The run was cancelled while this step was in flight. The install tree
  /// is left as-is; a rerun resumes idempotently.
  #[error("{kind} step {index} cancelled: {command}")]
  Cancelled {
    index: usize,
    kind: StepKind,
    command: String,
  },

  #[error("declared output directory missing after build: {path}")]
  MissingOutput { path: PathBuf },

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error("build i/o error: {0}")]
  Io(#[from] std::io::Error),
}

/// Create a linked cancellation handle/token pair.
///
/// The handle side requests cancellation; tokens observe it. Dropping the
/// handle without cancelling leaves every token permanently uncancelled.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
  let (tx, rx) = watch::channel(false);
  (CancelHandle { tx: std::sync::Arc::new(tx) }, CancelToken { rx })
}

/// Requests cancellation of an in-flight build.
#[derive(Debug, Clone)]
pub struct CancelHandle {
  tx: std::sync::Arc<watch::Sender<bool>>,
}

impl CancelHandle {
  pub fn cancel(&self) {
    let _ = self.tx.send(true);
  }
}

/// Observes cancellation requests.
#[derive(Debug, Clone)]
pub struct CancelToken {
  rx: watch::Receiver<bool>,
}

impl CancelToken {
  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves once cancellation is requested; never resolves if the handle
  /// is dropped without cancelling.
  pub async fn cancelled(&mut self) {
    if *self.rx.borrow() {
      return;
    }
    while self.rx.changed().await.is_ok() {
      if *self.rx.borrow() {
        return;
      }
    }
    std::future::pending::<()>().await
  }
}
