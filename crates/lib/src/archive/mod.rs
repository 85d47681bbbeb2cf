//! Archive handling: extraction of installable archives and assembly of
//! packaged build results.

pub mod pack;
pub mod unpack;

use std::io::Read;
use std::path::Path;

pub use pack::{DependencyRecord, PackError, PackageMetadata, PackedArchive, archive_file_name, pack};
pub use unpack::{UnpackError, unpack_archive};

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
  TarGz,
  Tar,
  Zip,
}

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
// "ustar" at offset 257 in a POSIX tar header.
const TAR_MAGIC: [u8; 5] = [0x75, 0x73, 0x74, 0x61, 0x72];
const TAR_MAGIC_OFFSET: usize = 257;

/// Determine an archive's format from its file name, falling back to its
/// leading bytes. Cache files are content-addressed and carry no extension,
/// so the signature path is the common one for installables.
pub fn detect_kind(path: &Path) -> std::io::Result<Option<ArchiveKind>> {
  if let Some(kind) = kind_from_extension(path) {
    return Ok(Some(kind));
  }
  kind_from_signature(path)
}

fn kind_from_extension(path: &Path) -> Option<ArchiveKind> {
  let name = path.file_name()?.to_str()?;
  if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    Some(ArchiveKind::TarGz)
  } else if name.ends_with(".tar") {
    Some(ArchiveKind::Tar)
  } else if name.ends_with(".zip") {
    Some(ArchiveKind::Zip)
  } else {
    None
  }
}

fn kind_from_signature(path: &Path) -> std::io::Result<Option<ArchiveKind>> {
  let mut file = std::fs::File::open(path)?;
  let mut head = [0u8; TAR_MAGIC_OFFSET + TAR_MAGIC.len()];
  let mut read = 0;
  while read < head.len() {
    let n = file.read(&mut head[read..])?;
    if n == 0 {
      break;
    }
    read += n;
  }

  if read >= GZIP_MAGIC.len() && head[..GZIP_MAGIC.len()] == GZIP_MAGIC {
    return Ok(Some(ArchiveKind::TarGz));
  }
  if read >= ZIP_MAGIC.len() && head[..ZIP_MAGIC.len()] == ZIP_MAGIC {
    return Ok(Some(ArchiveKind::Zip));
  }
  if read >= TAR_MAGIC_OFFSET + TAR_MAGIC.len() && head[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
  {
    return Ok(Some(ArchiveKind::Tar));
  }
  Ok(None)
}
