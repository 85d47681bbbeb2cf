//! The manifest model: a package's declared build targets and dependencies.
//!
//! A [`PackageManifest`] is the in-memory form of a `crank.toml` file. It is
//! immutable once loaded; the resolver and orchestrator only read it.
//!
//! # Platform rows
//!
//! Per-platform data lives in `platforms.<name>` rows. Lookups pick the row
//! for the exact platform when one exists and otherwise fall back to the
//! `common` row as a whole; rows are never merged field by field. A manifest
//! that wants platform-specific archives with shared build commands declares
//! the archives per platform and the commands under `common` only when no
//! concrete row exists for that platform.
//!
//! # Installables
//!
//! The `installables` table maps dependency names to their own (smaller)
//! package manifests, giving the resolver a manifest source to draw from
//! without any registry round trip.

pub mod types;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::hash::InvalidHash;

pub use types::{
  ArchiveRef, BuildTarget, Configuration, DependencyRef, Executable, Platform, StepKind, TargetFilter, TargetKey,
  UnknownPlatform,
};

/// Package identity plus the descriptive fields carried into packed archives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageIdentity {
  pub name: String,
  pub version: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub license: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub copyright: Option<String>,
}

impl PackageIdentity {
  pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
    PackageIdentity {
      name: name.into(),
      version: version.into(),
      description: None,
      license: None,
      copyright: None,
    }
  }
}

/// Per-platform metadata: the prebuilt archive, install subpath, build
/// directory and the configuration table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformSpec {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub archive: Option<ArchiveRef>,
  /// Subpath under the install prefix this package's archive is extracted
  /// into. Empty (the default) overlays the prefix root.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub install_dir: Option<String>,
  /// Build directory, relative to the manifest file unless absolute.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub build_directory: Option<PathBuf>,
  #[serde(default)]
  pub configurations: BTreeMap<Configuration, BuildTarget>,
}

/// Outcome of selecting a build target for a (platform, configuration) pair.
///
/// `NotApplicable` is an explicit answer, not an error: a manifest may simply
/// not build on the requested target, and callers decide whether that is
/// fatal for them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetSelection<'a> {
  Selected(&'a BuildTarget),
  NotApplicable,
}

impl<'a> TargetSelection<'a> {
  pub fn selected(self) -> Option<&'a BuildTarget> {
    match self {
      TargetSelection::Selected(target) => Some(target),
      TargetSelection::NotApplicable => None,
    }
  }
}

/// A package's declared build configurations and dependency references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
  pub package: PackageIdentity,
  #[serde(default)]
  pub platforms: BTreeMap<Platform, PlatformSpec>,
  #[serde(default)]
  pub dependencies: Vec<DependencyRef>,
  /// Known dependency packages, keyed by package name.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub installables: BTreeMap<String, PackageManifest>,
  /// Directory the manifest was loaded from; anchors relative paths.
  #[serde(skip)]
  base_dir: Option<PathBuf>,
}

impl Default for PackageIdentity {
  fn default() -> Self {
    PackageIdentity::new("", "")
  }
}

impl PackageManifest {
  pub fn new(package: PackageIdentity) -> Self {
    PackageManifest {
      package,
      platforms: BTreeMap::new(),
      dependencies: Vec::new(),
      installables: BTreeMap::new(),
      base_dir: None,
    }
  }

  /// Load and validate a manifest from a TOML file.
  pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let mut manifest: PackageManifest = toml::from_str(&text)?;
    manifest.base_dir = path.parent().map(Path::to_path_buf);
    manifest.validate()?;
    Ok(manifest)
  }

  /// Parse and validate a manifest from TOML text.
  pub fn from_toml_str(text: &str) -> Result<Self, ManifestError> {
    let manifest: PackageManifest = toml::from_str(text)?;
    manifest.validate()?;
    Ok(manifest)
  }

  /// The platform row for `platform`: the exact row when present, otherwise
  /// the `common` row.
  pub fn platform_spec(&self, platform: Platform) -> Option<&PlatformSpec> {
    self.platforms.get(&platform).or_else(|| self.platforms.get(&Platform::Common))
  }

  /// The build target for a (platform, configuration) pair.
  pub fn select_target(&self, target: &TargetKey) -> TargetSelection<'_> {
    match self.platform_spec(target.platform).and_then(|spec| spec.configurations.get(&target.configuration)) {
      Some(build_target) => TargetSelection::Selected(build_target),
      None => TargetSelection::NotApplicable,
    }
  }

  /// The prebuilt archive for `platform`, if one is declared.
  pub fn archive_for(&self, platform: Platform) -> Option<&ArchiveRef> {
    self.platform_spec(platform).and_then(|spec| spec.archive.as_ref())
  }

  /// The install subpath for `platform`; empty means the prefix root.
  pub fn install_subpath_for(&self, platform: Platform) -> String {
    self
      .platform_spec(platform)
      .and_then(|spec| spec.install_dir.clone())
      .unwrap_or_default()
  }

  /// Dependencies whose filter applies to `target`.
  pub fn dependencies_for<'a>(&'a self, target: &'a TargetKey) -> impl Iterator<Item = &'a DependencyRef> {
    self.dependencies.iter().filter(move |dep| dep.when.applies_to(target))
  }

  /// The build directory for `platform`, resolved against the manifest's own
  /// directory when relative. `None` when neither the manifest nor the
  /// platform row declares one.
  pub fn build_directory(&self, platform: Platform) -> Option<PathBuf> {
    let declared = self.platform_spec(platform)?.build_directory.as_ref()?;
    if declared.is_absolute() {
      return Some(declared.clone());
    }
    match &self.base_dir {
      Some(base) => Some(base.join(declared)),
      None => Some(declared.clone()),
    }
  }

  /// Configuration names flagged `default = true` for `platform`.
  pub fn default_configurations(&self, platform: Platform) -> Vec<&Configuration> {
    self
      .platform_spec(platform)
      .map(|spec| {
        spec
          .configurations
          .iter()
          .filter(|(_, target)| target.default)
          .map(|(name, _)| name)
          .collect()
      })
      .unwrap_or_default()
  }

  /// Validate identity, digests and key uniqueness, recursing into
  /// installables.
  pub fn validate(&self) -> Result<(), ManifestError> {
    if self.package.name.is_empty() {
      return Err(ManifestError::EmptyName);
    }
    if !self.package.name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
      return Err(ManifestError::InvalidName(self.package.name.clone()));
    }
    if self.package.version.is_empty() {
      return Err(ManifestError::EmptyVersion {
        name: self.package.name.clone(),
      });
    }

    for spec in self.platforms.values() {
      if let Some(archive) = &spec.archive {
        archive.hash.validate().map_err(|source| ManifestError::InvalidArchiveHash {
          name: self.package.name.clone(),
          source,
        })?;
      }
    }

    let mut seen = std::collections::BTreeSet::new();
    for dep in &self.dependencies {
      if !seen.insert(dep.name.as_str()) {
        return Err(ManifestError::DuplicateDependency {
          name: self.package.name.clone(),
          dependency: dep.name.clone(),
        });
      }
      if let Some(pin) = &dep.pin {
        pin.validate().map_err(|source| ManifestError::InvalidArchiveHash {
          name: dep.name.clone(),
          source,
        })?;
      }
    }

    for (key, entry) in &self.installables {
      if key != &entry.package.name {
        return Err(ManifestError::InstallableNameMismatch {
          key: key.clone(),
          name: entry.package.name.clone(),
        });
      }
      entry.validate()?;
    }

    Ok(())
  }
}

/// Errors produced while loading or validating a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse manifest: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("package name must not be empty")]
  EmptyName,

  #[error("invalid package name '{0}' (use alphanumerics, '-', '_' or '.')")]
  InvalidName(String),

  #[error("package '{name}' has an empty version")]
  EmptyVersion { name: String },

  #[error("package '{name}' declares an archive with an invalid digest: {source}")]
  InvalidArchiveHash {
    name: String,
    #[source]
    source: InvalidHash,
  },

  #[error("package '{name}' declares dependency '{dependency}' more than once")]
  DuplicateDependency { name: String, dependency: String },

  #[error("installable key '{key}' does not match its package name '{name}'")]
  InstallableNameMismatch { key: String, name: String },
}
