//! Manifest sources: where the resolver looks up dependency manifests.

use crate::manifest::PackageManifest;
use crate::util::hash::ContentHash;

use super::types::SourceError;

/// Supplies dependency manifests to the resolver.
///
/// The resolver calls this once per dependency edge. A pin, when present,
/// is a hard constraint: the source must either return a manifest whose
/// declared archives include that digest or fail.
pub trait ManifestSource {
  fn fetch_manifest(&self, name: &str, pin: Option<&ContentHash>) -> Result<PackageManifest, SourceError>;
}

/// Manifest source backed by the root manifest's `installables` table.
pub struct TableSource<'a> {
  root: &'a PackageManifest,
}

impl<'a> TableSource<'a> {
  pub fn new(root: &'a PackageManifest) -> Self {
    TableSource { root }
  }
}

impl ManifestSource for TableSource<'_> {
  fn fetch_manifest(&self, name: &str, pin: Option<&ContentHash>) -> Result<PackageManifest, SourceError> {
    let entry = self.root.installables.get(name).ok_or(SourceError::UnknownPackage)?;

    if let Some(pin) = pin {
      let satisfied = entry
        .platforms
        .values()
        .filter_map(|spec| spec.archive.as_ref())
        .any(|archive| &archive.hash == pin);
      if !satisfied {
        return Err(SourceError::PinMismatch { pin: pin.clone() });
      }
    }

    Ok(entry.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::{ArchiveRef, PackageIdentity, Platform, PlatformSpec};
  use crate::util::hash::hash_bytes;

  fn root_with_zlib() -> PackageManifest {
    let mut zlib = PackageManifest::new(PackageIdentity::new("zlib", "1.3.1"));
    zlib.platforms.insert(
      Platform::Linux,
      PlatformSpec {
        archive: Some(ArchiveRef {
          url: "file:///packages/zlib.tar.gz".to_string(),
          hash: hash_bytes(b"zlib"),
        }),
        ..PlatformSpec::default()
      },
    );

    let mut root = PackageManifest::new(PackageIdentity::new("root", "1.0"));
    root.installables.insert("zlib".to_string(), zlib);
    root
  }

  #[test]
  fn serves_declared_installable() {
    let root = root_with_zlib();
    let source = TableSource::new(&root);
    let manifest = source.fetch_manifest("zlib", None).unwrap();
    assert_eq!(manifest.package.name, "zlib");
  }

  #[test]
  fn unknown_package_errors() {
    let root = root_with_zlib();
    let source = TableSource::new(&root);
    assert!(matches!(source.fetch_manifest("openssl", None), Err(SourceError::UnknownPackage)));
  }

  #[test]
  fn matching_pin_is_satisfied() {
    let root = root_with_zlib();
    let source = TableSource::new(&root);
    assert!(source.fetch_manifest("zlib", Some(&hash_bytes(b"zlib"))).is_ok());
  }

  #[test]
  fn mismatched_pin_errors() {
    let root = root_with_zlib();
    let source = TableSource::new(&root);
    let err = source.fetch_manifest("zlib", Some(&hash_bytes(b"other"))).unwrap_err();
    assert!(matches!(err, SourceError::PinMismatch { .. }));
  }
}
