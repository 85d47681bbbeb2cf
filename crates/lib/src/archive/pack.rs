//! Package assembly: build outputs + dependency provenance → one archive.
//!
//! A packed archive is a gzip-compressed tar holding each declared output
//! directory under its relative path, plus an embedded
//! [`METADATA_FILE`](self::METADATA_FILE) recording the package identity,
//! the resolved dependency set and caller-supplied provenance. That manifest
//! is what lets a produced archive serve as a dependency input to a later
//! resolution run.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::build::BuildOutput;
use crate::manifest::{Configuration, PackageIdentity, Platform};
use crate::resolve::ResolutionPlan;
use crate::util::hash::{ContentHash, hash_file};

/// Name of the metadata file embedded at the root of every packed archive.
pub const METADATA_FILE: &str = "crank-package.json";

/// One resolved dependency as recorded in a packed archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyRecord {
  pub name: String,
  pub version: String,
  pub hash: ContentHash,
}

/// The manifest embedded in a packed archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
  pub package: PackageIdentity,
  pub platform: Platform,
  pub configuration: Configuration,
  pub build_id: String,
  pub dependencies: Vec<DependencyRecord>,
  /// Opaque provenance (version-control identifiers and the like) supplied
  /// by the caller; stored and forwarded, never interpreted.
  #[serde(default)]
  pub provenance: BTreeMap<String, String>,
}

impl PackageMetadata {
  pub fn from_build(output: &BuildOutput, plan: &ResolutionPlan, provenance: BTreeMap<String, String>) -> Self {
    let dependencies = plan
      .installables()
      .filter_map(|node| {
        node.hash().map(|hash| DependencyRecord {
          name: node.name.clone(),
          version: node.version.clone(),
          hash: hash.clone(),
        })
      })
      .collect();

    PackageMetadata {
      package: output.package.clone(),
      platform: output.target.platform,
      configuration: output.target.configuration.clone(),
      build_id: output.build_id.clone(),
      dependencies,
      provenance,
    }
  }

  /// Read the embedded metadata back out of a packed archive.
  pub fn read_from_archive(path: &Path) -> Result<Self, PackError> {
    let file = File::open(path).map_err(|source| PackError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let entries = archive.entries().map_err(|source| PackError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    for entry in entries {
      let mut entry = entry.map_err(|source| PackError::Read {
        path: path.to_path_buf(),
        source,
      })?;
      let is_metadata = entry
        .path()
        .map(|p| p.as_ref() == Path::new(METADATA_FILE))
        .unwrap_or(false);
      if !is_metadata {
        continue;
      }
      let mut text = String::new();
      entry.read_to_string(&mut text).map_err(|source| PackError::Read {
        path: path.to_path_buf(),
        source,
      })?;
      return Ok(serde_json::from_str(&text)?);
    }

    Err(PackError::MissingMetadata {
      path: path.to_path_buf(),
    })
  }
}

/// A finished package archive: the artifact plus its own content digest,
/// ready to be declared as an installable.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedArchive {
  pub path: PathBuf,
  pub hash: ContentHash,
  pub size: u64,
}

/// Errors assembling or reading a packed archive.
#[derive(Debug, Error)]
pub enum PackError {
  #[error("failed to write archive '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read archive '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("archive '{path}' has no embedded package metadata")]
  MissingMetadata { path: PathBuf },

  #[error("invalid package metadata: {0}")]
  Metadata(#[from] serde_json::Error),
}

/// `<name>-<version>-<platform>-<build_id>.tar.gz`
pub fn archive_file_name(package: &PackageIdentity, platform: Platform, build_id: &str) -> String {
  format!("{}-{}-{}-{}.tar.gz", package.name, package.version, platform, build_id)
}

/// Serialize a build result into a distributable archive under `dest_dir`.
///
/// Output directories are walked in sorted order so identical inputs produce
/// byte-stable archives.
pub fn pack(
  output: &BuildOutput,
  plan: &ResolutionPlan,
  provenance: BTreeMap<String, String>,
  dest_dir: &Path,
) -> Result<PackedArchive, PackError> {
  let metadata = PackageMetadata::from_build(output, plan, provenance);
  let archive_path = dest_dir.join(archive_file_name(&output.package, output.target.platform, &output.build_id));

  std::fs::create_dir_all(dest_dir).map_err(|source| PackError::Write {
    path: dest_dir.to_path_buf(),
    source,
  })?;

  let file = File::create(&archive_path).map_err(|source| PackError::Write {
    path: archive_path.clone(),
    source,
  })?;
  let encoder = GzEncoder::new(file, Compression::default());
  let mut builder = tar::Builder::new(encoder);

  append_metadata(&mut builder, &archive_path, &metadata)?;
  for dir in &output.outputs {
    append_output_dir(&mut builder, &archive_path, &dir.rel, &dir.abs)?;
  }

  let encoder = builder.into_inner().map_err(|source| PackError::Write {
    path: archive_path.clone(),
    source,
  })?;
  encoder.finish().map_err(|source| PackError::Write {
    path: archive_path.clone(),
    source,
  })?;

  let hash = hash_file(&archive_path).map_err(|source| PackError::Read {
    path: archive_path.clone(),
    source,
  })?;
  let size = std::fs::metadata(&archive_path)
    .map_err(|source| PackError::Read {
      path: archive_path.clone(),
      source,
    })?
    .len();

  info!(archive = %archive_path.display(), hash = %hash.short(), size, "packed archive");
  Ok(PackedArchive {
    path: archive_path,
    hash,
    size,
  })
}

fn append_metadata<W: Write>(
  builder: &mut tar::Builder<W>,
  archive_path: &Path,
  metadata: &PackageMetadata,
) -> Result<(), PackError> {
  let json = serde_json::to_vec_pretty(metadata)?;
  let mut header = tar::Header::new_gnu();
  header.set_size(json.len() as u64);
  header.set_mode(0o644);
  header.set_mtime(0);
  builder
    .append_data(&mut header, METADATA_FILE, json.as_slice())
    .map_err(|source| PackError::Write {
      path: archive_path.to_path_buf(),
      source,
    })
}

fn append_output_dir<W: Write>(
  builder: &mut tar::Builder<W>,
  archive_path: &Path,
  rel: &str,
  abs: &Path,
) -> Result<(), PackError> {
  debug!(dir = rel, "packing output directory");

  for entry in WalkDir::new(abs).follow_links(false).sort_by_file_name() {
    let entry = entry.map_err(|err| PackError::Read {
      path: abs.to_path_buf(),
      source: std::io::Error::other(err),
    })?;
    let relative = entry.path().strip_prefix(abs).unwrap_or(entry.path());
    let name = if relative.as_os_str().is_empty() {
      PathBuf::from(rel)
    } else {
      Path::new(rel).join(relative)
    };

    let file_type = entry.file_type();
    if file_type.is_dir() {
      builder.append_dir(&name, entry.path()).map_err(|source| PackError::Write {
        path: archive_path.to_path_buf(),
        source,
      })?;
    } else if file_type.is_file() {
      builder
        .append_path_with_name(entry.path(), &name)
        .map_err(|source| PackError::Write {
          path: archive_path.to_path_buf(),
          source,
        })?;
    }
    // Sockets and other special files are skipped.
  }
  Ok(())
}
