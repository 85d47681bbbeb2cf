//! End-to-end pipeline tests: resolve → fetch → materialize → build → pack.
//!
//! All archives are served over `file://` URLs from temp directories, so
//! nothing here touches the network.

use std::collections::BTreeMap;
use std::path::Path;

use crank_lib::archive::{self, PackageMetadata};
use crank_lib::build::{BuildOptions, Orchestrator, cancel_pair};
use crank_lib::cache::{CacheConfig, FetchError, InstallCache};
use crank_lib::manifest::{
  ArchiveRef, BuildTarget, Configuration, DependencyRef, Executable, PackageIdentity, PackageManifest, Platform,
  PlatformSpec, TargetKey,
};
use crank_lib::resolve::{TableSource, resolve};
use crank_lib::util::hash::hash_bytes;
use tempfile::TempDir;

fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) -> ArchiveRef {
  let file = std::fs::File::create(path).unwrap();
  let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
  let mut builder = tar::Builder::new(encoder);
  for (name, data) in entries {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, name, *data).unwrap();
  }
  builder.into_inner().unwrap().finish().unwrap();

  let bytes = std::fs::read(path).unwrap();
  ArchiveRef {
    url: format!("file://{}", path.display()),
    hash: hash_bytes(&bytes),
  }
}

fn installable(name: &str, version: &str, archive: ArchiveRef, deps: Vec<DependencyRef>) -> PackageManifest {
  let mut manifest = PackageManifest::new(PackageIdentity::new(name, version));
  manifest.platforms.insert(
    Platform::Linux,
    PlatformSpec {
      archive: Some(archive),
      ..PlatformSpec::default()
    },
  );
  manifest.dependencies = deps;
  manifest
}

fn linux_release() -> TargetKey {
  TargetKey::new(Platform::Linux, "release")
}

/// The diamond scenario: R depends on A and B, both depend on the shared
/// package C. The plan is [C, A, B, R] with C preceding both paths.
#[test]
fn diamond_resolution_produces_topological_plan() {
  let temp = TempDir::new().unwrap();
  let c = write_tar_gz(&temp.path().join("c.tar.gz"), &[("include/c.h", b"c")]);
  let a = write_tar_gz(&temp.path().join("a.tar.gz"), &[("include/a.h", b"a")]);
  let b = write_tar_gz(&temp.path().join("b.tar.gz"), &[("include/b.h", b"b")]);

  let mut root = PackageManifest::new(PackageIdentity::new("r", "1.0"));
  root.dependencies = vec![DependencyRef::new("a"), DependencyRef::new("b")];
  root
    .installables
    .insert("a".to_string(), installable("a", "1.0", a, vec![DependencyRef::new("c")]));
  root
    .installables
    .insert("b".to_string(), installable("b", "1.0", b, vec![DependencyRef::new("c")]));
  root.installables.insert("c".to_string(), installable("c", "2.0", c, vec![]));
  root.validate().unwrap();

  let plan = resolve(&root, &linux_release(), &TableSource::new(&root)).unwrap();
  let names: Vec<&str> = plan.nodes.iter().map(|n| n.name.as_str()).collect();
  assert_eq!(names, vec!["c", "a", "b", "r"]);
  assert!(plan.position("c").unwrap() < plan.position("a").unwrap());
  assert!(plan.position("c").unwrap() < plan.position("b").unwrap());
  assert_eq!(plan.root().unwrap().name, "r");
  assert!(plan.root().unwrap().archive.is_none());
}

/// Root depends on A; A depends on root's own name → CyclicDependency naming
/// both.
#[test]
fn self_reaching_graph_fails_with_cycle() {
  let temp = TempDir::new().unwrap();
  let a = write_tar_gz(&temp.path().join("a.tar.gz"), &[("include/a.h", b"a")]);

  let mut root = PackageManifest::new(PackageIdentity::new("r", "1.0"));
  root.dependencies = vec![DependencyRef::new("a")];
  root
    .installables
    .insert("a".to_string(), installable("a", "1.0", a, vec![DependencyRef::new("r")]));

  let err = resolve(&root, &linux_release(), &TableSource::new(&root)).unwrap_err();
  match err {
    crank_lib::resolve::ResolveError::CyclicDependency { cycle } => {
      assert_eq!(cycle, vec!["r", "a", "r"]);
    }
    other => panic!("expected CyclicDependency, got {other:?}"),
  }
}

/// A declared hash that doesn't match the downloaded bytes → IntegrityMismatch,
/// no cache entry, no temp leftovers.
#[tokio::test]
async fn integrity_mismatch_aborts_fetch() {
  let temp = TempDir::new().unwrap();
  let mut archive = write_tar_gz(&temp.path().join("evil.tar.gz"), &[("payload", b"tampered")]);
  archive.hash = hash_bytes(b"what the manifest promised");

  let cache_root = temp.path().join("cache");
  let cache = InstallCache::new(CacheConfig::new(&cache_root).with_retry_limit(0));

  let err = cache.fetch_or_reuse(&archive, None).await.unwrap_err();
  assert!(matches!(err, FetchError::IntegrityMismatch { .. }));
  assert!(!cache.entry_path(&archive.hash).exists());

  let files: Vec<_> = walk_files(&cache_root);
  assert!(files.is_empty(), "cache should be empty, found {files:?}");
}

fn walk_files(root: &Path) -> Vec<std::path::PathBuf> {
  if !root.exists() {
    return Vec::new();
  }
  walkdir::WalkDir::new(root)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|e| e.file_type().is_file())
    .map(|e| e.path().to_path_buf())
    .collect()
}

/// Fetching a whole plan caches every installable and is idempotent.
#[tokio::test]
async fn fetch_all_warms_cache_in_plan_order() {
  let temp = TempDir::new().unwrap();
  let c = write_tar_gz(&temp.path().join("c.tar.gz"), &[("include/c.h", b"c")]);
  let a = write_tar_gz(&temp.path().join("a.tar.gz"), &[("include/a.h", b"a")]);

  let mut root = PackageManifest::new(PackageIdentity::new("r", "1.0"));
  root.dependencies = vec![DependencyRef::new("a")];
  root
    .installables
    .insert("a".to_string(), installable("a", "1.0", a.clone(), vec![DependencyRef::new("c")]));
  root
    .installables
    .insert("c".to_string(), installable("c", "2.0", c.clone(), vec![]));

  let plan = resolve(&root, &linux_release(), &TableSource::new(&root)).unwrap();
  let cache = InstallCache::new(CacheConfig::new(temp.path().join("cache")).with_retry_limit(0));

  let entries = cache.fetch_all(&plan, None).await.unwrap();
  assert_eq!(entries.len(), 2);
  assert_eq!(entries[0].hash, c.hash);
  assert_eq!(entries[1].hash, a.hash);

  // Sources gone, cache still serves.
  std::fs::remove_file(temp.path().join("a.tar.gz")).unwrap();
  std::fs::remove_file(temp.path().join("c.tar.gz")).unwrap();
  let again = cache.fetch_all(&plan, None).await.unwrap();
  assert_eq!(again.len(), 2);
}

#[cfg(unix)]
mod full_pipeline {
  use super::*;

  fn sh(script: &str) -> Executable {
    Executable::new("/bin/sh").with_options(["-c"]).with_arguments([script])
  }

  /// Resolve, fetch, materialize, build and pack one package end to end,
  /// then read the embedded metadata back out of the produced archive.
  #[tokio::test]
  async fn resolve_fetch_build_pack_round_trip() {
    let temp = TempDir::new().unwrap();
    let zlib = write_tar_gz(
      &temp.path().join("zlib.tar.gz"),
      &[("include/zlib.h", b"zlib header"), ("lib/libz.a", b"zlib objects")],
    );

    // Root manifest: one dependency, one common build target.
    let mut root = PackageManifest::new(PackageIdentity::new("frob", "2.1.0"));
    root.dependencies = vec![DependencyRef::new("zlib")];
    root
      .installables
      .insert("zlib".to_string(), installable("zlib", "1.3.1", zlib.clone(), vec![]));

    let build_dir = temp.path().join("build");
    root.platforms.insert(
      Platform::Common,
      PlatformSpec {
        build_directory: Some(build_dir.clone()),
        configurations: [(
          Configuration::new("release"),
          BuildTarget {
            configure: Some(sh("mkdir -p stage/lib stage/include")),
            build: Some(sh(
              "cp \"$CRANK_DEP_ZLIB/lib/libz.a\" stage/lib/ && echo built > stage/include/frob.h",
            )),
            install: None,
            outputs: vec!["stage/lib".to_string(), "stage/include".to_string()],
            default: true,
          },
        )]
        .into_iter()
        .collect(),
        ..PlatformSpec::default()
      },
    );
    root.validate().unwrap();

    let target = linux_release();
    let plan = resolve(&root, &target, &TableSource::new(&root)).unwrap();
    assert_eq!(plan.len(), 2);

    let cache = InstallCache::new(CacheConfig::new(temp.path().join("cache")).with_retry_limit(0));
    let prefix = temp.path().join("prefix");
    let options = BuildOptions::new(target.clone(), &prefix).with_build_id("20260807a");
    let orchestrator = Orchestrator::new(cache, options);

    let (handle, mut cancel) = cancel_pair();
    let output = orchestrator.build(&root, &plan, None, &mut cancel).await.unwrap();
    drop(handle);

    // The dependency landed in the prefix and the build consumed it.
    assert!(prefix.join("include/zlib.h").is_file());
    assert_eq!(std::fs::read(build_dir.join("stage/lib/libz.a")).unwrap(), b"zlib objects");

    // Pack and verify the closure property: the produced archive records
    // its resolved dependencies and can be declared as an installable.
    let mut provenance = BTreeMap::new();
    provenance.insert("vcs.commit".to_string(), "0123abcd".to_string());
    let packed = archive::pack(&output, &plan, provenance, &temp.path().join("dist")).unwrap();
    assert!(packed.path.file_name().unwrap().to_str().unwrap().starts_with("frob-2.1.0-linux-20260807a"));

    let metadata = PackageMetadata::read_from_archive(&packed.path).unwrap();
    assert_eq!(metadata.package.name, "frob");
    assert_eq!(metadata.dependencies.len(), 1);
    assert_eq!(metadata.dependencies[0].name, "zlib");
    assert_eq!(metadata.dependencies[0].hash, zlib.hash);
    assert_eq!(metadata.provenance["vcs.commit"], "0123abcd");

    // The packed archive's recorded digest matches its bytes, so it can be
    // referenced as an ArchiveRef directly.
    let reref = ArchiveRef {
      url: format!("file://{}", packed.path.display()),
      hash: packed.hash.clone(),
    };
    let cache2 = InstallCache::new(CacheConfig::new(temp.path().join("cache2")).with_retry_limit(0));
    let entry = cache2.fetch_or_reuse(&reref, None).await.unwrap();
    assert_eq!(entry.size, packed.size);
  }

  /// Re-running the orchestrator over a populated prefix extracts nothing.
  #[tokio::test]
  async fn rerun_on_populated_prefix_is_a_no_op() {
    let temp = TempDir::new().unwrap();
    let zlib = write_tar_gz(&temp.path().join("zlib.tar.gz"), &[("include/zlib.h", b"header")]);

    let mut root = PackageManifest::new(PackageIdentity::new("app", "1.0"));
    root.dependencies = vec![DependencyRef::new("zlib")];
    root
      .installables
      .insert("zlib".to_string(), installable("zlib", "1.3.1", zlib, vec![]));

    let plan = resolve(&root, &linux_release(), &TableSource::new(&root)).unwrap();
    let cache = InstallCache::new(CacheConfig::new(temp.path().join("cache")).with_retry_limit(0));
    let orchestrator = Orchestrator::new(
      cache,
      BuildOptions::new(linux_release(), temp.path().join("prefix")),
    );

    let first = orchestrator.materialize(&plan, None).await.unwrap();
    assert_eq!(first.extracted_count(), 1);
    let second = orchestrator.materialize(&plan, None).await.unwrap();
    assert_eq!(second.extracted_count(), 0);
  }
}
