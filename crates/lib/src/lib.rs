//! crank-lib: core types and logic for crank
//!
//! This crate provides the building blocks of the crank package-build
//! orchestrator:
//! - `manifest`: a package's declared build targets and dependencies
//! - `resolve`: the dependency graph resolver producing ordered plans
//! - `cache`: the content-addressed installable cache
//! - `build`: the build orchestrator driving external build commands
//! - `archive`: archive extraction and package assembly

pub mod archive;
pub mod build;
pub mod cache;
pub mod manifest;
pub mod resolve;
pub mod util;

pub use archive::{PackError, PackageMetadata, PackedArchive, UnpackError, pack, unpack_archive};
pub use build::{BuildError, BuildOptions, BuildOutput, CancelHandle, CancelToken, Orchestrator, cancel_pair};
pub use cache::{CacheConfig, CacheEntry, FetchError, InstallCache};
pub use manifest::{
  ArchiveRef, BuildTarget, Configuration, DependencyRef, Executable, ManifestError, PackageIdentity, PackageManifest,
  Platform, TargetKey, TargetSelection,
};
pub use resolve::{ManifestSource, ResolutionPlan, ResolveError, ResolvedNode, SourceError, TableSource, resolve};
pub use util::hash::ContentHash;
