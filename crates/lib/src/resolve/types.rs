//! Resolution plan types and resolver errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::{ArchiveRef, Platform, TargetKey};
use crate::util::hash::ContentHash;

/// One package in a resolution plan.
///
/// Dependencies carry the archive chosen for them; the root node (always the
/// final entry of a plan) carries none, because the root is built locally
/// rather than fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedNode {
  pub name: String,
  pub version: String,
  pub archive: Option<ArchiveRef>,
  /// Subpath under the install prefix; empty overlays the prefix root.
  pub install_subpath: String,
  /// The package whose dependency edge first discovered this node; `None`
  /// for the root.
  pub requested_by: Option<String>,
}

impl ResolvedNode {
  pub fn hash(&self) -> Option<&ContentHash> {
    self.archive.as_ref().map(|archive| &archive.hash)
  }
}

/// The ordered, deduplicated dependency closure for one target.
///
/// Nodes are topologically sorted: every node appears after all of its
/// dependencies, with ties broken by first-discovery order. The root package
/// is the final node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionPlan {
  pub target: TargetKey,
  pub nodes: Vec<ResolvedNode>,
}

impl ResolutionPlan {
  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// The nodes that must be fetched and extracted, i.e. everything but the
  /// root.
  pub fn installables(&self) -> impl Iterator<Item = &ResolvedNode> {
    self.nodes.iter().filter(|node| node.archive.is_some())
  }

  pub fn get(&self, name: &str) -> Option<&ResolvedNode> {
    self.nodes.iter().find(|node| node.name == name)
  }

  pub fn position(&self, name: &str) -> Option<usize> {
    self.nodes.iter().position(|node| node.name == name)
  }

  /// The root node the plan was resolved for.
  pub fn root(&self) -> Option<&ResolvedNode> {
    self.nodes.last()
  }
}

/// Errors a [`ManifestSource`](super::ManifestSource) can produce.
#[derive(Debug, Error)]
pub enum SourceError {
  /// No manifest is known for the requested package name.
  #[error("package is not declared as an installable")]
  UnknownPackage,

  /// The source has a manifest, but none of its archives match the pin.
  #[error("no archive matches the pinned digest {pin}")]
  PinMismatch { pin: ContentHash },

  /// Source-specific failure (I/O, registry, ...).
  #[error("{0}")]
  Other(String),
}

/// Errors produced by dependency resolution. Any of these aborts the run: a
/// broken dependency graph cannot be partially honored.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("dependency cycle detected: {}", cycle.join(" -> "))]
  CyclicDependency { cycle: Vec<String> },

  #[error(
    "conflicting digests for package '{package}': \
     '{existing_requester}' resolved {existing_hash} but '{requester}' requires {hash}"
  )]
  VersionConflict {
    package: String,
    existing_requester: String,
    existing_hash: ContentHash,
    requester: String,
    hash: ContentHash,
  },

  #[error("unresolved dependency '{package}' (required by '{requester}'): {source}")]
  UnresolvedDependency {
    package: String,
    requester: String,
    #[source]
    source: SourceError,
  },

  #[error("package '{package}' has no archive for platform '{platform}'")]
  MissingArchive { package: String, platform: Platform },
}
