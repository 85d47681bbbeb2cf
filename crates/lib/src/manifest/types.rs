//! Leaf types of the manifest model.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::hash::ContentHash;

/// A build platform.
///
/// `Common` is the any-platform row: a manifest section keyed by `common`
/// applies wherever no platform-specific section exists, and a dependency
/// filter containing `Common` matches every platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
  Linux,
  Darwin,
  Windows,
  Common,
}

impl Platform {
  /// The platform crank is running on.
  pub fn current() -> Self {
    if cfg!(target_os = "macos") {
      Platform::Darwin
    } else if cfg!(windows) {
      Platform::Windows
    } else {
      Platform::Linux
    }
  }

  pub const fn as_str(&self) -> &'static str {
    match self {
      Platform::Linux => "linux",
      Platform::Darwin => "darwin",
      Platform::Windows => "windows",
      Platform::Common => "common",
    }
  }
}

impl std::fmt::Display for Platform {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// A platform name that is not one of the supported platforms.
#[derive(Debug, Error)]
#[error("unknown platform '{0}' (expected linux, darwin, windows or common)")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
  type Err = UnknownPlatform;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "linux" => Ok(Platform::Linux),
      "darwin" => Ok(Platform::Darwin),
      "windows" => Ok(Platform::Windows),
      "common" => Ok(Platform::Common),
      other => Err(UnknownPlatform(other.to_string())),
    }
  }
}

/// A build configuration name, e.g. `"release"` or `"debug"`.
///
/// Configuration names are free-form and case-preserving; manifests declare
/// whichever set their build tooling understands.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Configuration(pub String);

impl Configuration {
  pub fn new(name: impl Into<String>) -> Self {
    Configuration(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for Configuration {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// The (platform, configuration) pair one resolution or build run targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetKey {
  pub platform: Platform,
  pub configuration: Configuration,
}

impl TargetKey {
  pub fn new(platform: Platform, configuration: impl Into<String>) -> Self {
    TargetKey {
      platform,
      configuration: Configuration::new(configuration),
    }
  }
}

impl std::fmt::Display for TargetKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}", self.platform, self.configuration)
  }
}

/// One external command template: the program plus its fixed options and
/// trailing arguments. The command is executed directly (no shell) with the
/// environment the orchestrator constructs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Executable {
  pub command: String,
  #[serde(default)]
  pub options: Vec<String>,
  #[serde(default)]
  pub arguments: Vec<String>,
}

impl Executable {
  pub fn new(command: impl Into<String>) -> Self {
    Executable {
      command: command.into(),
      options: Vec::new(),
      arguments: Vec::new(),
    }
  }

  pub fn with_options<I, S>(mut self, options: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.options = options.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.arguments = arguments.into_iter().map(Into::into).collect();
    self
  }

  /// Rendered command line for diagnostics and error messages.
  pub fn command_line(&self) -> String {
    let mut parts = vec![self.command.clone()];
    parts.extend(self.options.iter().cloned());
    parts.extend(self.arguments.iter().cloned());
    parts.join(" ")
  }
}

/// Which step of a build target a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
  Configure,
  Build,
  Install,
}

impl StepKind {
  pub const fn as_str(&self) -> &'static str {
    match self {
      StepKind::Configure => "configure",
      StepKind::Build => "build",
      StepKind::Install => "install",
    }
  }
}

impl std::fmt::Display for StepKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// The command sequence and declared outputs for one (platform, configuration).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildTarget {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub configure: Option<Executable>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub build: Option<Executable>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub install: Option<Executable>,
  /// Build-output directories, relative to the build directory, collected
  /// after a successful run.
  #[serde(default)]
  pub outputs: Vec<String>,
  /// Whether this configuration is built when the caller names none.
  #[serde(default)]
  pub default: bool,
}

impl BuildTarget {
  /// The declared steps in execution order. Absent steps are skipped, not
  /// errors: plenty of packages have no separate configure or install phase.
  pub fn steps(&self) -> Vec<(StepKind, &Executable)> {
    let mut steps = Vec::new();
    if let Some(configure) = &self.configure {
      steps.push((StepKind::Configure, configure));
    }
    if let Some(build) = &self.build {
      steps.push((StepKind::Build, build));
    }
    if let Some(install) = &self.install {
      steps.push((StepKind::Install, install));
    }
    steps
  }
}

/// A downloadable prebuilt archive: where it lives and what its bytes hash to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRef {
  pub url: String,
  pub hash: ContentHash,
}

/// Restricts a dependency edge to certain platforms and/or configurations.
///
/// `None` means "applies everywhere"; an explicit set restricts the edge to
/// its members. A platform set containing [`Platform::Common`] matches any
/// platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetFilter {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub platforms: Option<BTreeSet<Platform>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub configurations: Option<BTreeSet<Configuration>>,
}

impl TargetFilter {
  pub fn applies_to(&self, target: &TargetKey) -> bool {
    if let Some(platforms) = &self.platforms
      && !platforms.contains(&target.platform)
      && !platforms.contains(&Platform::Common)
    {
      return false;
    }
    if let Some(configurations) = &self.configurations
      && !configurations.contains(&target.configuration)
    {
      return false;
    }
    true
  }
}

/// A named, constraint-bearing edge to another package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyRef {
  pub name: String,
  /// Optional digest pin handed to the manifest source; resolution fails if
  /// the source cannot satisfy it.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pin: Option<ContentHash>,
  #[serde(default)]
  pub when: TargetFilter,
}

impl DependencyRef {
  pub fn new(name: impl Into<String>) -> Self {
    DependencyRef {
      name: name.into(),
      pin: None,
      when: TargetFilter::default(),
    }
  }

  pub fn pinned(mut self, hash: ContentHash) -> Self {
    self.pin = Some(hash);
    self
  }

  pub fn only_platforms<I: IntoIterator<Item = Platform>>(mut self, platforms: I) -> Self {
    self.when.platforms = Some(platforms.into_iter().collect());
    self
  }

  pub fn only_configurations<I, S>(mut self, configurations: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.when.configurations = Some(configurations.into_iter().map(Configuration::new).collect());
    self
  }
}
