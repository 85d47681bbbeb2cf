//! Archive extraction.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use tracing::debug;

use super::{ArchiveKind, detect_kind};

/// Errors extracting an installable archive.
#[derive(Debug, Error)]
pub enum UnpackError {
  #[error("unrecognized archive format: {path}")]
  UnknownFormat { path: PathBuf },

  #[error("failed to read archive '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to extract '{path}': {source}")]
  Extract {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to extract zip '{path}': {message}")]
  Zip { path: PathBuf, message: String },
}

/// Unpack an archive into `dest`, creating it if needed.
///
/// Entries keep their archive-relative paths; installable archives are
/// rooted at the package root (`lib/`, `include/`, ...), so no leading
/// component is stripped.
pub fn unpack_archive(archive_path: &Path, dest: &Path) -> Result<(), UnpackError> {
  let kind = detect_kind(archive_path)
    .map_err(|source| UnpackError::Read {
      path: archive_path.to_path_buf(),
      source,
    })?
    .ok_or_else(|| UnpackError::UnknownFormat {
      path: archive_path.to_path_buf(),
    })?;

  fs::create_dir_all(dest).map_err(|source| UnpackError::Extract {
    path: dest.to_path_buf(),
    source,
  })?;

  match kind {
    ArchiveKind::TarGz => unpack_tar_gz(archive_path, dest),
    ArchiveKind::Tar => unpack_tar(archive_path, dest),
    ArchiveKind::Zip => unpack_zip(archive_path, dest),
  }?;

  debug!(archive = %archive_path.display(), dest = %dest.display(), "unpacked archive");
  Ok(())
}

fn open(archive_path: &Path) -> Result<BufReader<File>, UnpackError> {
  File::open(archive_path).map(BufReader::new).map_err(|source| UnpackError::Read {
    path: archive_path.to_path_buf(),
    source,
  })
}

fn unpack_tar_gz(archive_path: &Path, dest: &Path) -> Result<(), UnpackError> {
  let mut archive = Archive::new(GzDecoder::new(open(archive_path)?));
  archive.unpack(dest).map_err(|source| UnpackError::Extract {
    path: archive_path.to_path_buf(),
    source,
  })
}

fn unpack_tar(archive_path: &Path, dest: &Path) -> Result<(), UnpackError> {
  let mut archive = Archive::new(open(archive_path)?);
  archive.unpack(dest).map_err(|source| UnpackError::Extract {
    path: archive_path.to_path_buf(),
    source,
  })
}

fn unpack_zip(archive_path: &Path, dest: &Path) -> Result<(), UnpackError> {
  let mut archive = zip::ZipArchive::new(open(archive_path)?).map_err(|err| UnpackError::Zip {
    path: archive_path.to_path_buf(),
    message: err.to_string(),
  })?;

  for index in 0..archive.len() {
    let mut file = archive.by_index(index).map_err(|err| UnpackError::Zip {
      path: archive_path.to_path_buf(),
      message: err.to_string(),
    })?;

    let Some(relative) = file.enclosed_name() else {
      return Err(UnpackError::Zip {
        path: archive_path.to_path_buf(),
        message: format!("entry {index} has an unsafe name"),
      });
    };
    let dest_path = dest.join(relative);

    if file.is_dir() {
      fs::create_dir_all(&dest_path).map_err(|source| UnpackError::Extract {
        path: dest_path.clone(),
        source,
      })?;
      continue;
    }

    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent).map_err(|source| UnpackError::Extract {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    let mut out = File::create(&dest_path).map_err(|source| UnpackError::Extract {
      path: dest_path.clone(),
      source,
    })?;
    std::io::copy(&mut file, &mut out).map_err(|source| UnpackError::Extract {
      path: dest_path.clone(),
      source,
    })?;

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      if let Some(mode) = file.unix_mode() {
        fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode)).map_err(|source| UnpackError::Extract {
          path: dest_path.clone(),
          source,
        })?;
      }
    }
  }

  Ok(())
}
