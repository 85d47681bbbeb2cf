//! Dependency graph resolution.
//!
//! Given a root manifest and a (platform, configuration) target, `resolve`
//! walks the dependency graph depth-first and produces a [`ResolutionPlan`]:
//! the deduplicated closure of dependencies in topological order, root last.
//!
//! The walk uses an explicit frame stack rather than recursion, so deep
//! dependency chains cannot overflow the call stack. Cycle detection tracks
//! the names currently on the stack; re-entering one is a hard error
//! carrying the cycle path.
//!
//! Diamond dependencies are the common case and collapse silently when both
//! paths agree on the archive digest. Disagreement is [`ResolveError::VersionConflict`]
//! naming both requesters: binary ABI compatibility cannot be inferred, so
//! there is no "highest wins" policy and no override knob.

pub mod source;
pub mod types;

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::manifest::{DependencyRef, PackageManifest, TargetKey};
use crate::util::hash::ContentHash;

pub use source::{ManifestSource, TableSource};
pub use types::{ResolutionPlan, ResolveError, ResolvedNode, SourceError};

struct Frame {
  name: String,
  deps: Vec<DependencyRef>,
  next: usize,
  node: ResolvedNode,
}

struct Resolved {
  hash: Option<ContentHash>,
  requester: String,
}

/// Resolve the dependency closure of `root` for `target`.
///
/// Dependency manifests are obtained through `source`; the root manifest is
/// never looked up. The resolver is pure and synchronous: identical inputs
/// produce identical plans.
pub fn resolve(
  root: &PackageManifest,
  target: &TargetKey,
  source: &impl ManifestSource,
) -> Result<ResolutionPlan, ResolveError> {
  debug!(package = %root.package.name, target = %target, "resolving dependencies");

  let mut resolved: HashMap<String, Resolved> = HashMap::new();
  let mut on_stack: HashSet<String> = HashSet::new();
  let mut stack: Vec<Frame> = Vec::new();
  let mut nodes: Vec<ResolvedNode> = Vec::new();

  let root_name = root.package.name.clone();
  resolved.insert(
    root_name.clone(),
    Resolved {
      hash: None,
      requester: root_name.clone(),
    },
  );
  on_stack.insert(root_name.clone());
  stack.push(Frame {
    name: root_name.clone(),
    deps: root.dependencies_for(target).cloned().collect(),
    next: 0,
    node: ResolvedNode {
      name: root_name,
      version: root.package.version.clone(),
      archive: None,
      install_subpath: String::new(),
      requested_by: None,
    },
  });

  while let Some(frame) = stack.last_mut() {
    if frame.next >= frame.deps.len() {
      if let Some(finished) = stack.pop() {
        on_stack.remove(&finished.name);
        trace!(package = %finished.node.name, "resolved");
        nodes.push(finished.node);
      }
      continue;
    }

    let dep = frame.deps[frame.next].clone();
    frame.next += 1;
    let requester = frame.name.clone();

    if on_stack.contains(&dep.name) {
      let start = stack
        .iter()
        .position(|f| f.name == dep.name)
        .unwrap_or(0);
      let mut cycle: Vec<String> = stack[start..].iter().map(|f| f.name.clone()).collect();
      cycle.push(dep.name.clone());
      return Err(ResolveError::CyclicDependency { cycle });
    }

    let manifest = source
      .fetch_manifest(&dep.name, dep.pin.as_ref())
      .map_err(|source| ResolveError::UnresolvedDependency {
        package: dep.name.clone(),
        requester: requester.clone(),
        source,
      })?;

    let archive = manifest
      .archive_for(target.platform)
      .cloned()
      .ok_or_else(|| ResolveError::MissingArchive {
        package: dep.name.clone(),
        platform: target.platform,
      })?;

    if let Some(existing) = resolved.get(&dep.name) {
      match &existing.hash {
        Some(existing_hash) if existing_hash == &archive.hash => {
          // The expected diamond: same package, same bytes. Its subtree is
          // already in the plan.
          trace!(package = %dep.name, "already resolved, deduplicating");
          continue;
        }
        _ => {
          return Err(ResolveError::VersionConflict {
            package: dep.name.clone(),
            existing_requester: existing.requester.clone(),
            existing_hash: existing.hash.clone().unwrap_or_else(|| archive.hash.clone()),
            requester,
            hash: archive.hash,
          });
        }
      }
    }

    resolved.insert(
      dep.name.clone(),
      Resolved {
        hash: Some(archive.hash.clone()),
        requester: requester.clone(),
      },
    );
    on_stack.insert(dep.name.clone());

    let node = ResolvedNode {
      name: dep.name.clone(),
      version: manifest.package.version.clone(),
      archive: Some(archive),
      install_subpath: manifest.install_subpath_for(target.platform),
      requested_by: Some(requester),
    };
    stack.push(Frame {
      name: dep.name,
      deps: manifest.dependencies_for(target).cloned().collect(),
      next: 0,
      node,
    });
  }

  debug!(count = nodes.len(), "resolution complete");
  Ok(ResolutionPlan {
    target: target.clone(),
    nodes,
  })
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;
  use crate::manifest::{ArchiveRef, DependencyRef, PackageIdentity, Platform, PlatformSpec};
  use crate::util::hash::hash_bytes;

  /// Test source holding possibly several manifests per name; a pin picks
  /// the matching one, no pin picks the first.
  struct MapSource {
    entries: HashMap<String, Vec<PackageManifest>>,
  }

  impl MapSource {
    fn new(manifests: Vec<PackageManifest>) -> Self {
      let mut entries: HashMap<String, Vec<PackageManifest>> = HashMap::new();
      for manifest in manifests {
        entries.entry(manifest.package.name.clone()).or_default().push(manifest);
      }
      MapSource { entries }
    }
  }

  impl ManifestSource for MapSource {
    fn fetch_manifest(&self, name: &str, pin: Option<&ContentHash>) -> Result<PackageManifest, SourceError> {
      let candidates = self.entries.get(name).ok_or(SourceError::UnknownPackage)?;
      match pin {
        None => Ok(candidates[0].clone()),
        Some(pin) => candidates
          .iter()
          .find(|m| {
            m.platforms
              .values()
              .filter_map(|spec| spec.archive.as_ref())
              .any(|archive| &archive.hash == pin)
          })
          .cloned()
          .ok_or_else(|| SourceError::PinMismatch { pin: pin.clone() }),
      }
    }
  }

  fn linux_release() -> TargetKey {
    TargetKey::new(Platform::Linux, "release")
  }

  fn installable(name: &str, version: &str, payload: &[u8], deps: Vec<DependencyRef>) -> PackageManifest {
    let mut manifest = PackageManifest::new(PackageIdentity::new(name, version));
    manifest.platforms.insert(
      Platform::Linux,
      PlatformSpec {
        archive: Some(ArchiveRef {
          url: format!("file:///packages/{name}.tar.gz"),
          hash: hash_bytes(payload),
        }),
        ..PlatformSpec::default()
      },
    );
    manifest.dependencies = deps;
    manifest
  }

  fn root(name: &str, deps: Vec<DependencyRef>) -> PackageManifest {
    let mut manifest = PackageManifest::new(PackageIdentity::new(name, "1.0"));
    manifest.dependencies = deps;
    manifest
  }

  #[test]
  fn empty_graph_contains_only_root() {
    let root = root("app", vec![]);
    let plan = resolve(&root, &linux_release(), &MapSource::new(vec![])).unwrap();

    assert_eq!(plan.len(), 1);
    let node = plan.root().unwrap();
    assert_eq!(node.name, "app");
    assert!(node.archive.is_none());
    assert!(node.requested_by.is_none());
  }

  #[test]
  fn linear_chain_orders_dependencies_first() {
    // app -> liba -> libb
    let source = MapSource::new(vec![
      installable("liba", "1.0", b"liba", vec![DependencyRef::new("libb")]),
      installable("libb", "2.0", b"libb", vec![]),
    ]);
    let root = root("app", vec![DependencyRef::new("liba")]);

    let plan = resolve(&root, &linux_release(), &source).unwrap();
    let names: Vec<&str> = plan.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["libb", "liba", "app"]);
    assert_eq!(plan.get("libb").unwrap().requested_by.as_deref(), Some("liba"));
  }

  #[test]
  fn diamond_collapses_to_one_node() {
    // app -> a -> c, app -> b -> c; both reach c at the same digest.
    let source = MapSource::new(vec![
      installable("a", "1.0", b"a", vec![DependencyRef::new("c")]),
      installable("b", "1.0", b"b", vec![DependencyRef::new("c")]),
      installable("c", "3.1", b"c", vec![]),
    ]);
    let root = root("app", vec![DependencyRef::new("a"), DependencyRef::new("b")]);

    let plan = resolve(&root, &linux_release(), &source).unwrap();
    let names: Vec<&str> = plan.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["c", "a", "b", "app"]);
    assert!(plan.position("c").unwrap() < plan.position("a").unwrap());
    assert!(plan.position("c").unwrap() < plan.position("b").unwrap());
  }

  #[test]
  fn identical_archives_under_different_names_stay_distinct() {
    // a and b ship byte-identical archives; they are still two plan nodes.
    let source = MapSource::new(vec![
      installable("a", "1.0", b"shared payload", vec![]),
      installable("b", "1.0", b"shared payload", vec![]),
    ]);
    let root = root("app", vec![DependencyRef::new("a"), DependencyRef::new("b")]);

    let plan = resolve(&root, &linux_release(), &source).unwrap();
    assert_eq!(plan.len(), 3);
    assert_eq!(plan.get("a").unwrap().hash(), plan.get("b").unwrap().hash());
  }

  #[test]
  fn conflicting_pins_fail_naming_both_requesters() {
    // a pins zlib@h1, b pins zlib@h2.
    let zlib_v1 = installable("zlib", "1.2", b"zlib-1.2", vec![]);
    let zlib_v2 = installable("zlib", "1.3", b"zlib-1.3", vec![]);
    let h1 = hash_bytes(b"zlib-1.2");
    let h2 = hash_bytes(b"zlib-1.3");

    let source = MapSource::new(vec![
      installable("a", "1.0", b"a", vec![DependencyRef::new("zlib").pinned(h1.clone())]),
      installable("b", "1.0", b"b", vec![DependencyRef::new("zlib").pinned(h2.clone())]),
      zlib_v1,
      zlib_v2,
    ]);
    let root = root("app", vec![DependencyRef::new("a"), DependencyRef::new("b")]);

    let err = resolve(&root, &linux_release(), &source).unwrap_err();
    match err {
      ResolveError::VersionConflict {
        package,
        existing_requester,
        existing_hash,
        requester,
        hash,
      } => {
        assert_eq!(package, "zlib");
        assert_eq!(existing_requester, "a");
        assert_eq!(existing_hash, h1);
        assert_eq!(requester, "b");
        assert_eq!(hash, h2);
      }
      other => panic!("expected VersionConflict, got {other:?}"),
    }
  }

  #[test]
  fn direct_cycle_names_both_packages() {
    // app -> a -> app
    let source = MapSource::new(vec![installable("a", "1.0", b"a", vec![DependencyRef::new("app")])]);
    let root = root("app", vec![DependencyRef::new("a")]);

    let err = resolve(&root, &linux_release(), &source).unwrap_err();
    match err {
      ResolveError::CyclicDependency { cycle } => {
        assert_eq!(cycle, vec!["app", "a", "app"]);
      }
      other => panic!("expected CyclicDependency, got {other:?}"),
    }
  }

  #[test]
  fn deeper_cycle_reports_the_loop_only() {
    // app -> a -> b -> a: the cycle path starts at a, not at app.
    let source = MapSource::new(vec![
      installable("a", "1.0", b"a", vec![DependencyRef::new("b")]),
      installable("b", "1.0", b"b", vec![DependencyRef::new("a")]),
    ]);
    let root = root("app", vec![DependencyRef::new("a")]);

    let err = resolve(&root, &linux_release(), &source).unwrap_err();
    match err {
      ResolveError::CyclicDependency { cycle } => assert_eq!(cycle, vec!["a", "b", "a"]),
      other => panic!("expected CyclicDependency, got {other:?}"),
    }
  }

  #[test]
  fn missing_manifest_names_requester() {
    let root = root("app", vec![DependencyRef::new("ghost")]);
    let err = resolve(&root, &linux_release(), &MapSource::new(vec![])).unwrap_err();
    match err {
      ResolveError::UnresolvedDependency { package, requester, .. } => {
        assert_eq!(package, "ghost");
        assert_eq!(requester, "app");
      }
      other => panic!("expected UnresolvedDependency, got {other:?}"),
    }
  }

  #[test]
  fn missing_platform_archive_is_an_error() {
    // zlib only declares a windows archive.
    let mut zlib = PackageManifest::new(PackageIdentity::new("zlib", "1.3"));
    zlib.platforms.insert(
      Platform::Windows,
      PlatformSpec {
        archive: Some(ArchiveRef {
          url: "file:///packages/zlib.zip".to_string(),
          hash: hash_bytes(b"zlib-win"),
        }),
        ..PlatformSpec::default()
      },
    );
    let source = MapSource::new(vec![zlib]);
    let root = root("app", vec![DependencyRef::new("zlib")]);

    let err = resolve(&root, &linux_release(), &source).unwrap_err();
    match err {
      ResolveError::MissingArchive { package, platform } => {
        assert_eq!(package, "zlib");
        assert_eq!(platform, Platform::Linux);
      }
      other => panic!("expected MissingArchive, got {other:?}"),
    }
  }

  #[test]
  fn filtered_out_edges_skip_their_subtree() {
    // The windows-only dependency (and everything under it) is ignored on linux.
    let source = MapSource::new(vec![
      installable("winlib", "1.0", b"winlib", vec![DependencyRef::new("ghost")]),
      installable("zlib", "1.3", b"zlib", vec![]),
    ]);
    let root = root(
      "app",
      vec![
        DependencyRef::new("zlib"),
        DependencyRef::new("winlib").only_platforms([Platform::Windows]),
      ],
    );

    let plan = resolve(&root, &linux_release(), &source).unwrap();
    let names: Vec<&str> = plan.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["zlib", "app"]);
  }

  #[test]
  fn configuration_filter_respected() {
    let source = MapSource::new(vec![installable("sanitizers", "1.0", b"san", vec![])]);
    let root = root(
      "app",
      vec![DependencyRef::new("sanitizers").only_configurations(["debug"])],
    );

    let release_plan = resolve(&root, &linux_release(), &source).unwrap();
    assert_eq!(release_plan.len(), 1);

    let debug_plan = resolve(&root, &TargetKey::new(Platform::Linux, "debug"), &source).unwrap();
    assert_eq!(debug_plan.len(), 2);
  }

  #[test]
  fn install_subpath_carried_from_manifest() {
    let mut zlib = installable("zlib", "1.3", b"zlib", vec![]);
    if let Some(spec) = zlib.platforms.get_mut(&Platform::Linux) {
      spec.install_dir = Some("packages/zlib".to_string());
    }
    let source = MapSource::new(vec![zlib]);
    let root = root("app", vec![DependencyRef::new("zlib")]);

    let plan = resolve(&root, &linux_release(), &source).unwrap();
    assert_eq!(plan.get("zlib").unwrap().install_subpath, "packages/zlib");
  }

  #[test]
  fn plan_is_deterministic() {
    let source = MapSource::new(vec![
      installable("a", "1.0", b"a", vec![DependencyRef::new("c")]),
      installable("b", "1.0", b"b", vec![DependencyRef::new("c")]),
      installable("c", "3.1", b"c", vec![]),
    ]);
    let root = root("app", vec![DependencyRef::new("a"), DependencyRef::new("b")]);

    let plan1 = resolve(&root, &linux_release(), &source).unwrap();
    let plan2 = resolve(&root, &linux_release(), &source).unwrap();
    assert_eq!(plan1, plan2);
  }
}
